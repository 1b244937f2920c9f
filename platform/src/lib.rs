use sectorscan_core::{Result, VolumeTarget};

#[cfg(target_os = "windows")]
pub mod windows;

#[cfg(not(target_os = "windows"))]
pub mod unsupported;

#[cfg(target_os = "windows")]
pub use self::windows::{
    describe_status, is_elevated, WindowsTempFile as PlatformTempFile,
    WindowsVolume as PlatformVolume,
};

#[cfg(not(target_os = "windows"))]
pub use self::unsupported::{
    describe_status, is_elevated, UnsupportedTempFile as PlatformTempFile,
    UnsupportedVolume as PlatformVolume,
};

/// Open a shared, read-only handle to `target`.
pub fn open_volume(target: &VolumeTarget) -> Result<PlatformVolume> {
    log::info!("Opening {}...", target.device_path());
    PlatformVolume::open(target)
}
