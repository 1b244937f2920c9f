// Volume access is only implemented for Windows. These types keep the
// binary building elsewhere; they can never be constructed.

use sectorscan_core::{
    ClusterLayout, ControlReply, FilesystemInfo, Result, SectorScanError, TempFile, VolumeIo,
    VolumeTarget,
};

pub enum UnsupportedVolume {}

pub enum UnsupportedTempFile {}

impl UnsupportedVolume {
    pub fn open(target: &VolumeTarget) -> Result<Self> {
        Err(SectorScanError::PlatformNotSupported(format!(
            "cannot open {}: volume access requires Windows",
            target.device_path()
        )))
    }
}

pub fn is_elevated() -> bool {
    false
}

pub fn describe_status(code: u32) -> String {
    std::io::Error::from_raw_os_error(code as i32).to_string()
}

impl VolumeIo for UnsupportedVolume {
    type Temp = UnsupportedTempFile;

    fn control(&mut self, _code: u32, _input: &[u8], _output_capacity: usize) -> ControlReply {
        match *self {}
    }

    fn cluster_layout(&self) -> Result<ClusterLayout> {
        match *self {}
    }

    fn filesystem_info(&self) -> Result<FilesystemInfo> {
        match *self {}
    }

    fn seek(&mut self, _offset: u64) -> Result<()> {
        match *self {}
    }

    fn read(&mut self, _buf: &mut [u8]) -> std::result::Result<usize, u32> {
        match *self {}
    }

    fn create_temp_file(&mut self, _name: &str) -> Result<UnsupportedTempFile> {
        match *self {}
    }

    fn close(self) -> Result<()> {
        match self {}
    }

    fn describe_status(&self, _code: u32) -> String {
        match *self {}
    }
}

impl TempFile for UnsupportedTempFile {
    fn write(&mut self, _data: &[u8]) -> Result<usize> {
        match *self {}
    }

    fn control(&mut self, _code: u32, _input: &[u8], _output_capacity: usize) -> ControlReply {
        match *self {}
    }

    fn raw_handle(&self) -> u64 {
        match *self {}
    }

    fn close(self) -> Result<()> {
        match self {}
    }
}
