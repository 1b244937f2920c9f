// Volume geometry discovery
// Maps the volume onto its physical disk and validates the layout assumptions
// the rest of the cluster arithmetic depends on.

use crate::error::{Result, SectorScanError};
use crate::layout::{read_u32, read_u64};
use crate::protocol::*;
use crate::volume::VolumeIo;
use log::{debug, info, warn};
use serde::Serialize;

/// One contiguous run of a physical disk backing the volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VolumeExtent {
    pub disk_number: u32,
    pub starting_offset: u64,
    pub length: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VolumeGeometry {
    pub bytes_per_sector: u32,
    pub sectors_per_cluster: u32,
    pub cluster_size: u64,
    /// Byte offset of the volume on the physical disk
    pub volume_start: u64,
    /// First byte offset after the end of the volume
    pub volume_end: u64,
    /// Cluster at which the filesystem's cluster numbering starts, as reported
    /// by `FSCTL_GET_RETRIEVAL_POINTER_BASE`
    pub metadata_base_cluster: u64,
}

impl VolumeGeometry {
    pub fn new(
        bytes_per_sector: u32,
        sectors_per_cluster: u32,
        extent: &VolumeExtent,
        metadata_base_cluster: u64,
    ) -> Result<Self> {
        let cluster_size = bytes_per_sector as u64 * sectors_per_cluster as u64;
        if cluster_size == 0 {
            return Err(SectorScanError::UnsupportedGeometry(format!(
                "cluster size is zero ({} bytes per sector, {} sectors per cluster)",
                bytes_per_sector, sectors_per_cluster
            )));
        }

        let volume_end = extent
            .starting_offset
            .checked_add(extent.length)
            .ok_or_else(|| {
                SectorScanError::UnsupportedGeometry(format!(
                    "extent at {} with length {} overflows the disk address space",
                    extent.starting_offset, extent.length
                ))
            })?;

        Ok(Self {
            bytes_per_sector,
            sectors_per_cluster,
            cluster_size,
            volume_start: extent.starting_offset,
            volume_end,
            metadata_base_cluster,
        })
    }

    pub fn volume_length(&self) -> u64 {
        self.volume_end - self.volume_start
    }
}

/// Everything learned about the volume while validating it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeometryReport {
    pub extent: VolumeExtent,
    pub geometry: VolumeGeometry,
    pub filesystem: String,
    pub read_only: bool,
}

/// Decode a `VOLUME_DISK_EXTENTS` buffer.
pub fn decode_disk_extents(buf: &[u8]) -> Result<Vec<VolumeExtent>> {
    const STRUCTURE: &str = "VOLUME_DISK_EXTENTS";

    let count = read_u32(buf, 0, STRUCTURE)? as usize;
    let needed = count
        .checked_mul(DISK_EXTENT_SIZE)
        .and_then(|n| n.checked_add(DISK_EXTENTS_HEADER_SIZE))
        .filter(|&n| n <= buf.len())
        .ok_or_else(|| {
            SectorScanError::decode(
                STRUCTURE,
                format!("{} extents do not fit in {} bytes", count, buf.len()),
            )
        })?;
    debug!("Decoding {} disk extent(s) from {} bytes", count, needed);

    (0..count)
        .map(|i| {
            let base = DISK_EXTENTS_HEADER_SIZE + i * DISK_EXTENT_SIZE;
            Ok(VolumeExtent {
                disk_number: read_u32(buf, base, STRUCTURE)?,
                starting_offset: read_u64(buf, base + 8, STRUCTURE)?,
                length: read_u64(buf, base + 16, STRUCTURE)?,
            })
        })
        .collect()
}

/// Run the full set of geometry queries against an open volume.
///
/// The first failing check aborts; later queries are not issued.
pub fn resolve_geometry<V: VolumeIo>(io: &mut V) -> Result<GeometryReport> {
    check_mounted(io)?;

    let extent = query_disk_extent(io)?;
    info!(
        "Volume is located on \\\\.\\PhysicalDrive{}: {} bytes starting at disk offset {}",
        extent.disk_number, extent.length, extent.starting_offset
    );

    let layout = io.cluster_layout()?;
    info!(
        "{} bytes per sector, {} sectors per cluster",
        layout.bytes_per_sector, layout.sectors_per_cluster
    );

    let fs = io.filesystem_info()?;
    let read_only = fs.flags & FILE_READ_ONLY_VOLUME != 0;
    if read_only {
        warn!("Volume is read-only");
    }
    if fs.name != NTFS_NAME {
        return Err(SectorScanError::UnsupportedFilesystem(format!(
            "filesystem type is \"{}\"",
            fs.name
        )));
    }

    let base = query_retrieval_pointer_base(io)?;
    if base != 0 {
        return Err(SectorScanError::UnsupportedGeometry(format!(
            "first cluster offset in volume is not zero (got {} instead)",
            base
        )));
    }

    let geometry = VolumeGeometry::new(
        layout.bytes_per_sector,
        layout.sectors_per_cluster,
        &extent,
        base,
    )?;
    debug!("Cluster size is {} bytes", geometry.cluster_size);

    Ok(GeometryReport {
        extent,
        geometry,
        filesystem: fs.name,
        read_only,
    })
}

fn check_mounted<V: VolumeIo>(io: &mut V) -> Result<()> {
    let reply = io.control(FSCTL_IS_VOLUME_MOUNTED, &[], 0);
    if !reply.is_success() {
        return Err(io.os_error("FSCTL_IS_VOLUME_MOUNTED", reply.status));
    }
    info!("Volume is mounted");
    Ok(())
}

fn query_disk_extent<V: VolumeIo>(io: &mut V) -> Result<VolumeExtent> {
    let reply = io.control(IOCTL_VOLUME_GET_VOLUME_DISK_EXTENTS, &[], DISK_EXTENTS_BUFFER_SIZE);

    match reply.status {
        ERROR_SUCCESS => {}
        ERROR_MORE_DATA => {
            let count = read_u32(&reply.output, 0, "VOLUME_DISK_EXTENTS")?;
            return Err(multiple_extents(count));
        }
        status => return Err(io.os_error("IOCTL_VOLUME_GET_VOLUME_DISK_EXTENTS", status)),
    }

    let count = read_u32(&reply.output, 0, "VOLUME_DISK_EXTENTS")?;
    if count != 1 {
        return Err(multiple_extents(count));
    }

    let extents = decode_disk_extents(&reply.output)?;
    Ok(extents[0])
}

fn multiple_extents(count: u32) -> SectorScanError {
    SectorScanError::UnsupportedGeometry(format!(
        "Windows reports {} extents for this volume; only single-extent volumes are supported",
        count
    ))
}

fn query_retrieval_pointer_base<V: VolumeIo>(io: &mut V) -> Result<u64> {
    let reply = io.control(FSCTL_GET_RETRIEVAL_POINTER_BASE, &[], RETRIEVAL_POINTER_BASE_SIZE);
    if !reply.is_success() {
        return Err(io.os_error("FSCTL_GET_RETRIEVAL_POINTER_BASE", reply.status));
    }
    read_u64(&reply.output, 0, "RETRIEVAL_POINTER_BASE")
}
