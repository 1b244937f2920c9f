use crate::error::{Result, SectorScanError};
use crate::protocol::{FILLER_BYTE, LOOKUP_OUTPUT_CAPACITY, TEMP_FILE_NAME};
use serde::{Deserialize, Serialize};

/// Options for one inspection run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanOptions {
    /// Offer to rewrite a free cluster even when it reads back fine
    pub force_rewrite: bool,
    /// Name of the throwaway file created in the volume root
    pub temp_file_name: String,
    pub filler_byte: u8,
    /// Output buffer size for cluster owner lookups
    pub lookup_capacity: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            force_rewrite: false,
            temp_file_name: TEMP_FILE_NAME.to_string(),
            filler_byte: FILLER_BYTE,
            lookup_capacity: LOOKUP_OUTPUT_CAPACITY,
        }
    }
}

/// A drive-letter volume such as `C:`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeTarget {
    letter: char,
}

impl VolumeTarget {
    /// Accepts `C`, `c`, `C:` or `c:`.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let letter_part = trimmed.strip_suffix(':').unwrap_or(trimmed);

        let mut chars = letter_part.chars();
        let letter = match (chars.next(), chars.next()) {
            (Some(c), None) => c.to_ascii_uppercase(),
            _ => {
                return Err(SectorScanError::InvalidInput(
                    "Drive letter should be in the form 'C' or 'C:'".to_string(),
                ))
            }
        };

        if !letter.is_ascii_uppercase() {
            return Err(SectorScanError::InvalidInput(
                "Drive letter should be in A...Z.".to_string(),
            ));
        }

        Ok(Self { letter })
    }

    pub fn letter(&self) -> char {
        self.letter
    }

    /// Device namespace path used to open the volume, e.g. `\\.\C:`
    pub fn device_path(&self) -> String {
        format!(r"\\.\{}:", self.letter)
    }

    /// Root directory of the mounted filesystem, e.g. `C:\`
    pub fn root_path(&self) -> String {
        format!(r"{}:\", self.letter)
    }

    /// Full path of a file in the volume root
    pub fn file_path(&self, name: &str) -> String {
        format!("{}{}", self.root_path(), name)
    }
}
