// Single-cluster read probe

use crate::error::{Result, SectorScanError};
use crate::locator::cluster_offset;
use crate::protocol::ERROR_CRC;
use crate::volume::VolumeIo;
use log::{info, warn};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReadProbeResult {
    Success,
    /// The read succeeded but returned fewer bytes than one cluster
    PartialRead(usize),
    /// The drive reported a CRC (data) error for the cluster
    CrcFailure,
    OtherFailure(u32),
}

impl fmt::Display for ReadProbeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadProbeResult::Success => write!(f, "success"),
            ReadProbeResult::PartialRead(n) => write!(f, "partial read ({} bytes)", n),
            ReadProbeResult::CrcFailure => write!(f, "failed with CRC error (err {})", ERROR_CRC),
            ReadProbeResult::OtherFailure(code) => write!(f, "failed with error {}", code),
        }
    }
}

/// Try to read cluster `cluster` through the volume handle.
///
/// The offset is `cluster * cluster_size` from the start of the handle. Seek
/// failures are errors; read failures are classified into the result.
pub fn probe_cluster<V: VolumeIo>(
    io: &mut V,
    cluster: u64,
    cluster_size: u64,
) -> Result<ReadProbeResult> {
    let offset = cluster_offset(cluster, cluster_size).ok_or_else(|| {
        SectorScanError::InvalidInput(format!(
            "cluster {} is beyond the addressable range",
            cluster
        ))
    })?;
    let len = usize::try_from(cluster_size).map_err(|_| {
        SectorScanError::InvalidInput(format!("cluster size {} is too large", cluster_size))
    })?;

    info!("Testing read of cluster {}...", cluster);
    io.seek(offset)?;

    let mut buf = vec![0u8; len];
    let result = match io.read(&mut buf) {
        Ok(n) if n == len => ReadProbeResult::Success,
        Ok(n) => {
            warn!("Partial read ({} of {} bytes)", n, len);
            ReadProbeResult::PartialRead(n)
        }
        Err(ERROR_CRC) => ReadProbeResult::CrcFailure,
        Err(code) => ReadProbeResult::OtherFailure(code),
    };
    info!("Cluster read {}", result);
    Ok(result)
}
