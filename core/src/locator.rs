// Physical sector to volume cluster translation

use crate::error::{Result, SectorScanError};
use crate::geometry::VolumeGeometry;

/// Map a device-relative sector number to a volume-relative cluster index.
///
/// Fails with `OutOfRange` when the sector's byte offset lies outside
/// `[volume_start, volume_end)`.
pub fn locate(sector: u64, geometry: &VolumeGeometry) -> Result<u64> {
    let offset = sector
        .checked_mul(geometry.bytes_per_sector as u64)
        .filter(|&offset| offset >= geometry.volume_start && offset < geometry.volume_end)
        .ok_or(SectorScanError::OutOfRange { sector })?;

    Ok((offset - geometry.volume_start) / geometry.cluster_size)
}

/// Byte offset of `cluster` measured from the start of the volume.
pub fn cluster_offset(cluster: u64, cluster_size: u64) -> Option<u64> {
    cluster.checked_mul(cluster_size)
}
