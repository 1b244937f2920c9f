// Sector inspection: ties the locator, bitmap, owner lookup and read probe
// together for one queried sector.

use crate::bitmap::AllocationBitmap;
use crate::config::ScanOptions;
use crate::error::Result;
use crate::geometry::VolumeGeometry;
use crate::locator::locate;
use crate::lookup::{resolve_owners, ClusterOwners};
use crate::probe::{probe_cluster, ReadProbeResult};
use crate::volume::VolumeIo;
use log::info;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ClusterStatus {
    InUse {
        owners: ClusterOwners,
        probe: ReadProbeResult,
    },
    Free {
        probe: ReadProbeResult,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectorReport {
    pub sector: u64,
    pub cluster: u64,
    pub status: ClusterStatus,
}

impl SectorReport {
    /// A rewrite is only ever offered for a free cluster: when it failed
    /// with a CRC error, or when `force` is set.
    pub fn offers_rewrite(&self, force: bool) -> bool {
        match &self.status {
            ClusterStatus::InUse { .. } => false,
            ClusterStatus::Free { probe } => force || *probe == ReadProbeResult::CrcFailure,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Inspect the cluster holding physical sector `sector`.
///
/// A read failure other than a CRC error aborts the inspection.
pub fn inspect_sector<V: VolumeIo>(
    io: &mut V,
    geometry: &VolumeGeometry,
    bitmap: &AllocationBitmap,
    sector: u64,
    options: &ScanOptions,
) -> Result<SectorReport> {
    let cluster = locate(sector, geometry)?;
    info!("Sector {} is in cluster {} of volume", sector, cluster);

    let status = if bitmap.is_allocated(cluster) {
        info!("Cluster is in use. Querying for file...");
        let owners = resolve_owners(io, cluster, options.lookup_capacity)?;
        let probe = checked_probe(io, cluster, geometry.cluster_size)?;
        ClusterStatus::InUse { owners, probe }
    } else {
        info!("Cluster is not in use");
        let probe = checked_probe(io, cluster, geometry.cluster_size)?;
        ClusterStatus::Free { probe }
    };

    Ok(SectorReport {
        sector,
        cluster,
        status,
    })
}

fn checked_probe<V: VolumeIo>(
    io: &mut V,
    cluster: u64,
    cluster_size: u64,
) -> Result<ReadProbeResult> {
    match probe_cluster(io, cluster, cluster_size)? {
        ReadProbeResult::OtherFailure(code) => Err(io.os_error("ReadFile", code)),
        result => Ok(result),
    }
}
