// Windows volume handle: the control requests, raw reads and temp file
// operations the core issues, backed by kernel32.

use super::elevation::is_elevated;
use super::error_text::describe_status;
use log::{debug, info};
use sectorscan_core::protocol::{control_code_name, ERROR_SUCCESS};
use sectorscan_core::{
    ClusterLayout, ControlReply, FilesystemInfo, Result, SectorScanError, TempFile, VolumeIo,
    VolumeTarget,
};
use std::ffi::OsStr;
use std::os::windows::ffi::OsStrExt;
use std::ptr::null_mut;
use winapi::{
    shared::minwindef::{DWORD, FALSE},
    um::errhandlingapi::GetLastError,
    um::fileapi::{
        CreateFileW, GetDiskFreeSpaceW, GetVolumeInformationW, ReadFile, SetFilePointerEx,
        WriteFile, CREATE_ALWAYS, OPEN_EXISTING,
    },
    um::handleapi::{CloseHandle, INVALID_HANDLE_VALUE},
    um::ioapiset::DeviceIoControl,
    um::winbase::{FILE_BEGIN, FILE_FLAG_DELETE_ON_CLOSE, FILE_FLAG_WRITE_THROUGH},
    um::winnt::{
        FILE_SHARE_READ, FILE_SHARE_WRITE, GENERIC_READ, GENERIC_WRITE, HANDLE, LARGE_INTEGER,
    },
};

/// Filesystem name buffer for GetVolumeInformationW, in UTF-16 units
const FS_NAME_CAPACITY: usize = 32;

fn to_wide(value: &str) -> Vec<u16> {
    OsStr::new(value).encode_wide().chain(std::iter::once(0)).collect()
}

fn last_error() -> u32 {
    unsafe { GetLastError() }
}

fn os_error(operation: &'static str, code: u32) -> SectorScanError {
    SectorScanError::Os {
        operation,
        code,
        message: describe_status(code),
    }
}

/// A kernel handle closed on drop unless closed explicitly first.
struct OwnedHandle(HANDLE);

impl OwnedHandle {
    fn from_raw(handle: HANDLE) -> Option<Self> {
        if handle.is_null() || handle == INVALID_HANDLE_VALUE {
            None
        } else {
            Some(Self(handle))
        }
    }

    fn raw(&self) -> HANDLE {
        self.0
    }

    fn close(mut self) -> Result<()> {
        let handle = std::mem::replace(&mut self.0, INVALID_HANDLE_VALUE);
        if unsafe { CloseHandle(handle) } == FALSE {
            return Err(os_error("CloseHandle", last_error()));
        }
        Ok(())
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        if self.0 != INVALID_HANDLE_VALUE {
            unsafe {
                CloseHandle(self.0);
            }
        }
    }
}

fn device_control(handle: HANDLE, code: u32, input: &[u8], output_capacity: usize) -> ControlReply {
    let mut output = vec![0u8; output_capacity];
    let mut bytes_returned: DWORD = 0;

    let ok = unsafe {
        DeviceIoControl(
            handle,
            code,
            if input.is_empty() {
                null_mut()
            } else {
                input.as_ptr() as *mut _
            },
            input.len() as DWORD,
            if output.is_empty() {
                null_mut()
            } else {
                output.as_mut_ptr() as *mut _
            },
            output.len() as DWORD,
            &mut bytes_returned,
            null_mut(),
        )
    };
    let status = if ok == FALSE { last_error() } else { ERROR_SUCCESS };

    debug!(
        "{} (0x{:x}): status {}, {} of {} bytes returned",
        control_code_name(code),
        code,
        status,
        bytes_returned,
        output_capacity
    );
    ControlReply {
        status,
        output,
        bytes_returned,
    }
}

pub struct WindowsVolume {
    handle: OwnedHandle,
    target: VolumeTarget,
}

impl WindowsVolume {
    /// Open `\\.\X:` for reading, sharing reads and writes with the
    /// filesystem.
    pub fn open(target: &VolumeTarget) -> Result<Self> {
        let path = to_wide(&target.device_path());
        let raw = unsafe {
            CreateFileW(
                path.as_ptr(),
                GENERIC_READ,
                FILE_SHARE_READ | FILE_SHARE_WRITE,
                null_mut(),
                OPEN_EXISTING,
                0,
                null_mut(),
            )
        };

        let handle = match OwnedHandle::from_raw(raw) {
            Some(handle) => handle,
            None => {
                let code = last_error();
                if !is_elevated() {
                    return Err(SectorScanError::Resource(format!(
                        "Failed to open a handle to {} (error {}: {}). \
                         Do you have admin privileges?",
                        target.device_path(),
                        code,
                        describe_status(code)
                    )));
                }
                return Err(os_error("CreateFileW", code));
            }
        };

        info!("Volume handle: {:p}", handle.raw());
        Ok(Self {
            handle,
            target: *target,
        })
    }
}

impl VolumeIo for WindowsVolume {
    type Temp = WindowsTempFile;

    fn control(&mut self, code: u32, input: &[u8], output_capacity: usize) -> ControlReply {
        device_control(self.handle.raw(), code, input, output_capacity)
    }

    fn cluster_layout(&self) -> Result<ClusterLayout> {
        let root = to_wide(&self.target.root_path());
        let mut sectors_per_cluster: DWORD = 0;
        let mut bytes_per_sector: DWORD = 0;
        let mut free_clusters: DWORD = 0;
        let mut total_clusters: DWORD = 0;

        let ok = unsafe {
            GetDiskFreeSpaceW(
                root.as_ptr(),
                &mut sectors_per_cluster,
                &mut bytes_per_sector,
                &mut free_clusters,
                &mut total_clusters,
            )
        };
        if ok == FALSE {
            return Err(os_error("GetDiskFreeSpaceW", last_error()));
        }

        debug!(
            "{} sectors per cluster, {} bytes per sector, {} of {} clusters free",
            sectors_per_cluster, bytes_per_sector, free_clusters, total_clusters
        );
        Ok(ClusterLayout {
            sectors_per_cluster,
            bytes_per_sector,
        })
    }

    fn filesystem_info(&self) -> Result<FilesystemInfo> {
        let root = to_wide(&self.target.root_path());
        let mut max_component_length: DWORD = 0;
        let mut flags: DWORD = 0;
        let mut name = [0u16; FS_NAME_CAPACITY];

        let ok = unsafe {
            GetVolumeInformationW(
                root.as_ptr(),
                null_mut(),
                0,
                null_mut(),
                &mut max_component_length,
                &mut flags,
                name.as_mut_ptr(),
                name.len() as DWORD,
            )
        };
        if ok == FALSE {
            return Err(os_error("GetVolumeInformationW", last_error()));
        }

        let len = name.iter().position(|&unit| unit == 0).unwrap_or(name.len());
        Ok(FilesystemInfo {
            name: String::from_utf16_lossy(&name[..len]),
            flags,
        })
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        let distance = i64::try_from(offset).map_err(|_| {
            SectorScanError::InvalidInput(format!("seek offset {} is too large", offset))
        })?;

        let ok = unsafe {
            let mut position: LARGE_INTEGER = std::mem::zeroed();
            *position.QuadPart_mut() = distance;
            SetFilePointerEx(self.handle.raw(), position, null_mut(), FILE_BEGIN)
        };
        if ok == FALSE {
            return Err(os_error("SetFilePointerEx", last_error()));
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> std::result::Result<usize, u32> {
        let mut bytes_read: DWORD = 0;
        let ok = unsafe {
            ReadFile(
                self.handle.raw(),
                buf.as_mut_ptr() as *mut _,
                buf.len() as DWORD,
                &mut bytes_read,
                null_mut(),
            )
        };
        if ok == FALSE {
            return Err(last_error());
        }
        Ok(bytes_read as usize)
    }

    fn create_temp_file(&mut self, name: &str) -> Result<WindowsTempFile> {
        let path = self.target.file_path(name);
        let wide = to_wide(&path);
        let raw = unsafe {
            CreateFileW(
                wide.as_ptr(),
                GENERIC_READ | GENERIC_WRITE,
                // Exclusive: nothing else may open the temp file while it is placed and moved
                0,
                null_mut(),
                CREATE_ALWAYS,
                FILE_FLAG_WRITE_THROUGH | FILE_FLAG_DELETE_ON_CLOSE,
                null_mut(),
            )
        };

        match OwnedHandle::from_raw(raw) {
            Some(handle) => {
                debug!("Created temp file {} (handle {:p})", path, handle.raw());
                Ok(WindowsTempFile { handle })
            }
            None => Err(os_error("CreateFileW", last_error())),
        }
    }

    fn close(self) -> Result<()> {
        self.handle.close()
    }

    fn describe_status(&self, code: u32) -> String {
        describe_status(code)
    }
}

/// Delete-on-close file in the volume root
pub struct WindowsTempFile {
    handle: OwnedHandle,
}

impl TempFile for WindowsTempFile {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let mut written: DWORD = 0;
        let ok = unsafe {
            WriteFile(
                self.handle.raw(),
                data.as_ptr() as *const _,
                data.len() as DWORD,
                &mut written,
                null_mut(),
            )
        };
        if ok == FALSE {
            return Err(os_error("WriteFile", last_error()));
        }
        Ok(written as usize)
    }

    fn control(&mut self, code: u32, input: &[u8], output_capacity: usize) -> ControlReply {
        device_control(self.handle.raw(), code, input, output_capacity)
    }

    fn raw_handle(&self) -> u64 {
        self.handle.raw() as usize as u64
    }

    fn close(self) -> Result<()> {
        self.handle.close()
    }
}
