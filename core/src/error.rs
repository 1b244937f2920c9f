use serde::Serialize;
use thiserror::Error;

/// Broad classes of failure. The binary uses these to decide whether a run
/// ends with a printed diagnostic or a fatal process error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCategory {
    /// Bad input or a volume this tool does not support
    Configuration,
    /// Unexpected status or malformed output from a control request
    Protocol,
    /// The volume's own metadata disagrees with itself
    Consistency,
    /// Handle creation, I/O or close failures
    Resource,
}

#[derive(Debug, Error)]
pub enum SectorScanError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unsupported volume geometry: {0}")]
    UnsupportedGeometry(String),

    #[error("Unsupported filesystem: {0} (only NTFS is supported)")]
    UnsupportedFilesystem(String),

    #[error("Sector {sector} is not part of this volume")]
    OutOfRange { sector: u64 },

    #[error("{operation} failed with error {code}: {message}")]
    Os {
        operation: &'static str,
        code: u32,
        message: String,
    },

    #[error("{operation}: unexpected outcome: {detail}")]
    Protocol {
        operation: &'static str,
        detail: String,
    },

    #[error("Malformed {structure} buffer: {detail}")]
    Decode {
        structure: &'static str,
        detail: String,
    },

    #[error("Inconsistent volume state: {0}")]
    Consistency(String),

    #[error("No files found using cluster {cluster}; the volume bitmap marks it in use")]
    NoOwner { cluster: u64 },

    #[error("Resource error: {0}")]
    Resource(String),

    #[error("Platform not supported: {0}")]
    PlatformNotSupported(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl SectorScanError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            SectorScanError::InvalidInput(_)
            | SectorScanError::UnsupportedGeometry(_)
            | SectorScanError::UnsupportedFilesystem(_)
            | SectorScanError::OutOfRange { .. }
            | SectorScanError::PlatformNotSupported(_) => ErrorCategory::Configuration,
            SectorScanError::Os { .. }
            | SectorScanError::Protocol { .. }
            | SectorScanError::Decode { .. } => ErrorCategory::Protocol,
            SectorScanError::Consistency(_) | SectorScanError::NoOwner { .. } => {
                ErrorCategory::Consistency
            }
            SectorScanError::Resource(_)
            | SectorScanError::IoError(_)
            | SectorScanError::SerializationError(_) => ErrorCategory::Resource,
        }
    }

    /// Errors the operator should see as a plain diagnostic rather than a crash.
    pub fn is_reportable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Configuration | ErrorCategory::Consistency
        )
    }

    pub(crate) fn decode(structure: &'static str, detail: impl Into<String>) -> Self {
        SectorScanError::Decode {
            structure,
            detail: detail.into(),
        }
    }

    pub(crate) fn protocol(operation: &'static str, detail: impl Into<String>) -> Self {
        SectorScanError::Protocol {
            operation,
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SectorScanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        let err = SectorScanError::UnsupportedGeometry("2 extents".to_string());
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert!(err.is_reportable());

        let err = SectorScanError::NoOwner { cluster: 12 };
        assert_eq!(err.category(), ErrorCategory::Consistency);
        assert!(err.is_reportable());

        let err = SectorScanError::Os {
            operation: "FSCTL_MOVE_FILE",
            code: 5,
            message: "Access is denied.".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::Protocol);
        assert!(!err.is_reportable());

        let err = SectorScanError::Resource("close failed".to_string());
        assert!(!err.is_reportable());
    }

    #[test]
    fn test_os_error_message() {
        let err = SectorScanError::Os {
            operation: "ReadFile",
            code: 23,
            message: "Data error (cyclic redundancy check).".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "ReadFile failed with error 23: Data error (cyclic redundancy check)."
        );
    }
}
