// Volume I/O provider interface.
// The core issues every query through these traits so it can run against a
// real Windows volume handle or a scripted mock.

use crate::error::{Result, SectorScanError};
use crate::protocol::ERROR_SUCCESS;

/// Result of one control request.
///
/// `output` always holds the full output buffer the caller asked for; drivers
/// may fill part of it even when `status` reports an error (for example
/// `ERROR_MORE_DATA`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlReply {
    pub status: u32,
    pub output: Vec<u8>,
    pub bytes_returned: u32,
}

impl ControlReply {
    pub fn success(output: Vec<u8>) -> Self {
        let bytes_returned = output.len() as u32;
        Self {
            status: ERROR_SUCCESS,
            output,
            bytes_returned,
        }
    }

    pub fn failure(status: u32, output: Vec<u8>) -> Self {
        Self {
            status,
            output,
            bytes_returned: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ERROR_SUCCESS
    }
}

/// Sector and cluster sizes reported for the volume root
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterLayout {
    pub sectors_per_cluster: u32,
    pub bytes_per_sector: u32,
}

/// Filesystem name and flags reported for the volume root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilesystemInfo {
    pub name: String,
    pub flags: u32,
}

/// A delete-on-close file created on the volume under inspection.
pub trait TempFile {
    /// Write `data` at the current position, returning the byte count written.
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Issue a control request against this file's handle.
    fn control(&mut self, code: u32, input: &[u8], output_capacity: usize) -> ControlReply;

    /// The raw handle value, as embedded in `MOVE_FILE_DATA`.
    fn raw_handle(&self) -> u64;

    /// Close the handle. The filesystem deletes the file on close.
    fn close(self) -> Result<()>
    where
        Self: Sized;
}

/// An open, non-exclusive handle to a volume.
pub trait VolumeIo {
    type Temp: TempFile;

    /// Issue a control request against the volume handle.
    fn control(&mut self, code: u32, input: &[u8], output_capacity: usize) -> ControlReply;

    fn cluster_layout(&self) -> Result<ClusterLayout>;

    fn filesystem_info(&self) -> Result<FilesystemInfo>;

    /// Move the read position to `offset` bytes from the start of the device.
    fn seek(&mut self, offset: u64) -> Result<()>;

    /// Read into `buf` at the current position. A failed read yields the OS status code.
    fn read(&mut self, buf: &mut [u8]) -> std::result::Result<usize, u32>;

    /// Create (or truncate) `name` in the volume root with delete-on-close semantics.
    fn create_temp_file(&mut self, name: &str) -> Result<Self::Temp>;

    fn close(self) -> Result<()>
    where
        Self: Sized;

    /// Description text for an OS status code.
    fn describe_status(&self, code: u32) -> String;

    fn os_error(&self, operation: &'static str, code: u32) -> SectorScanError {
        SectorScanError::Os {
            operation,
            code,
            message: self.describe_status(code),
        }
    }
}
