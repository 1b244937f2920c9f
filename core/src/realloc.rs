// Forced reallocation of a free, unreadable cluster
//
// A one-cluster delete-on-close file is created and moved onto the target
// cluster so that the drive sees a write to the bad sector and can remap it.
// There are no retries: the first failure aborts the procedure, and cleanup
// runs exactly once on every path.

use crate::config::ScanOptions;
use crate::error::{Result, SectorScanError};
use crate::layout::{read_u32, read_u64, write_u32, write_u64};
use crate::protocol::*;
use crate::volume::{TempFile, VolumeIo};
use log::{debug, error, info};
use serde::Serialize;
use thiserror::Error;

/// States of the procedure, in the order they are entered
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ReallocState {
    CreateTemp,
    FillOneCluster,
    QueryPlacement,
    Relocate,
    Cleanup,
    Completed,
    Failed(String),
}

/// One `{NextVcn, Lcn}` pair of a retrieval pointers buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalExtent {
    pub next_vcn: u64,
    pub lcn: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalPointers {
    pub starting_vcn: u64,
    pub extents: Vec<RetrievalExtent>,
}

impl RetrievalPointers {
    /// The single cluster backing a one-cluster file, or `None` for any other shape.
    pub fn single_cluster(&self) -> Option<u64> {
        match self.extents.as_slice() {
            [extent] if extent.next_vcn.checked_sub(self.starting_vcn) == Some(1) => {
                Some(extent.lcn)
            }
            _ => None,
        }
    }
}

/// Decode a `RETRIEVAL_POINTERS_BUFFER`.
pub fn decode_retrieval_pointers(buf: &[u8]) -> Result<RetrievalPointers> {
    const STRUCTURE: &str = "RETRIEVAL_POINTERS_BUFFER";

    let count = read_u32(buf, 0, STRUCTURE)? as usize;
    let starting_vcn = read_u64(buf, 8, STRUCTURE)?;

    let available =
        buf.len().saturating_sub(RETRIEVAL_POINTERS_HEADER_SIZE) / RETRIEVAL_POINTER_EXTENT_SIZE;
    if count > available {
        return Err(SectorScanError::decode(
            STRUCTURE,
            format!("{} extents declared but only {} fit in the buffer", count, available),
        ));
    }

    let extents = (0..count)
        .map(|i| {
            let base = RETRIEVAL_POINTERS_HEADER_SIZE + i * RETRIEVAL_POINTER_EXTENT_SIZE;
            Ok(RetrievalExtent {
                next_vcn: read_u64(buf, base, STRUCTURE)?,
                lcn: read_u64(buf, base + 8, STRUCTURE)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(RetrievalPointers {
        starting_vcn,
        extents,
    })
}

/// Build a `MOVE_FILE_DATA` request. The handle is stored pointer-sized and
/// zero-extended, which gives the same bytes on 32- and 64-bit Windows.
pub fn encode_move_file(
    file_handle: u64,
    starting_vcn: u64,
    starting_lcn: u64,
    cluster_count: u32,
) -> [u8; MOVE_FILE_DATA_SIZE] {
    let mut input = [0u8; MOVE_FILE_DATA_SIZE];
    write_u64(&mut input, 0, file_handle);
    write_u64(&mut input, 8, starting_vcn);
    write_u64(&mut input, 16, starting_lcn);
    write_u32(&mut input, 24, cluster_count);
    input
}

/// Transient state for one run: the target, the temp file and where the
/// filesystem put it.
pub struct RelocationPlan<T: TempFile> {
    pub target_cluster: u64,
    pub temp_file: T,
    pub allocated_cluster: Option<u64>,
}

/// Outcome of a completed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelocationReport {
    pub target_cluster: u64,
    /// Cluster the filesystem first allocated for the temp file
    pub initial_cluster: u64,
    /// Whether a move request was needed to reach the target
    pub relocated: bool,
    pub states: Vec<ReallocState>,
}

/// A run that stopped before `Completed`
#[derive(Debug, Error)]
#[error("forced reallocation of cluster {target_cluster} failed: {error}")]
pub struct RelocationFailure {
    pub target_cluster: u64,
    /// Cluster holding the temp file when the run stopped, if it got that far
    pub allocated_cluster: Option<u64>,
    /// States entered, ending in `Cleanup, Failed(_)`
    pub states: Vec<ReallocState>,
    #[source]
    pub error: SectorScanError,
}

pub struct ForcedReallocation<V: VolumeIo> {
    volume: V,
    target_cluster: u64,
    cluster_size: u64,
    temp_file_name: String,
    filler_byte: u8,
    states: Vec<ReallocState>,
}

impl<V: VolumeIo> ForcedReallocation<V> {
    /// Takes ownership of the volume handle; it is closed when the run ends.
    pub fn new(volume: V, target_cluster: u64, cluster_size: u64, options: &ScanOptions) -> Self {
        Self {
            volume,
            target_cluster,
            cluster_size,
            temp_file_name: options.temp_file_name.clone(),
            filler_byte: options.filler_byte,
            states: Vec::new(),
        }
    }

    /// Run the procedure to `Completed` or the first failure.
    pub fn run(mut self) -> std::result::Result<RelocationReport, RelocationFailure> {
        let mut plan = None;
        let placement = self.place_temp_file(&mut plan);
        let allocated_cluster = plan.as_ref().and_then(|p| p.allocated_cluster);

        self.enter(ReallocState::Cleanup);
        let Self {
            volume,
            target_cluster,
            mut states,
            ..
        } = self;
        let cleanup = cleanup(volume, plan.map(|p| p.temp_file));

        let result = match (placement, cleanup) {
            (Ok(placement), Ok(())) => Ok(placement),
            (Err(err), cleanup) => {
                if let Err(cleanup_err) = cleanup {
                    error!("Cleanup after failure also failed: {}", cleanup_err);
                }
                Err(err)
            }
            (Ok(_), Err(err)) => Err(err),
        };

        match result {
            Ok((initial_cluster, relocated)) => {
                states.push(ReallocState::Completed);
                info!("Forced reallocation of cluster {} completed", target_cluster);
                Ok(RelocationReport {
                    target_cluster,
                    initial_cluster,
                    relocated,
                    states,
                })
            }
            Err(err) => {
                error!("Forced reallocation of cluster {} failed: {}", target_cluster, err);
                states.push(ReallocState::Failed(err.to_string()));
                Err(RelocationFailure {
                    target_cluster,
                    allocated_cluster,
                    states,
                    error: err,
                })
            }
        }
    }

    fn enter(&mut self, state: ReallocState) {
        debug!("Reallocation state: {:?}", state);
        self.states.push(state);
    }

    /// Steps up to and including the move. Leaves the temp file in `plan` for cleanup.
    fn place_temp_file(
        &mut self,
        plan: &mut Option<RelocationPlan<V::Temp>>,
    ) -> Result<(u64, bool)> {
        self.enter(ReallocState::CreateTemp);
        let temp_file = self.volume.create_temp_file(&self.temp_file_name)?;
        let plan = plan.insert(RelocationPlan {
            target_cluster: self.target_cluster,
            temp_file,
            allocated_cluster: None,
        });

        self.enter(ReallocState::FillOneCluster);
        let len = usize::try_from(self.cluster_size).map_err(|_| {
            SectorScanError::InvalidInput(format!(
                "cluster size {} is too large",
                self.cluster_size
            ))
        })?;
        let written = plan.temp_file.write(&vec![self.filler_byte; len])?;
        if written != len {
            return Err(SectorScanError::Resource(format!(
                "short write to temp file ({} of {} bytes)",
                written, len
            )));
        }

        self.enter(ReallocState::QueryPlacement);
        let mut input = [0u8; STARTING_CLUSTER_INPUT_SIZE];
        write_u64(&mut input, 0, 0);
        let reply = plan.temp_file.control(
            FSCTL_GET_RETRIEVAL_POINTERS,
            &input,
            RETRIEVAL_POINTERS_BUFFER_SIZE,
        );
        if !reply.is_success() {
            return Err(self.volume.os_error("FSCTL_GET_RETRIEVAL_POINTERS", reply.status));
        }
        let pointers = decode_retrieval_pointers(&reply.output)?;
        debug!(
            "Retrieval pointers: {} extent(s) starting at VCN {}",
            pointers.extents.len(),
            pointers.starting_vcn
        );
        for (i, extent) in pointers.extents.iter().enumerate() {
            debug!(
                " {}- {} VCs at {}",
                i + 1,
                extent.next_vcn.saturating_sub(pointers.starting_vcn),
                extent.lcn
            );
        }
        let allocated = pointers.single_cluster().ok_or_else(|| {
            SectorScanError::protocol(
                "FSCTL_GET_RETRIEVAL_POINTERS",
                format!(
                    "temp file is not a single cluster in a single extent ({} extents)",
                    pointers.extents.len()
                ),
            )
        })?;
        plan.allocated_cluster = Some(allocated);

        if allocated == plan.target_cluster {
            info!("Temp file already occupies cluster {}", allocated);
            return Ok((allocated, false));
        }

        self.enter(ReallocState::Relocate);
        info!(
            "Moving temp file from cluster {} to cluster {}",
            allocated, plan.target_cluster
        );
        let request = encode_move_file(plan.temp_file.raw_handle(), 0, plan.target_cluster, 1);
        let reply = self.volume.control(FSCTL_MOVE_FILE, &request, 0);
        if !reply.is_success() {
            return Err(self.volume.os_error("FSCTL_MOVE_FILE", reply.status));
        }

        // The move result is trusted; the cluster is not read back.
        Ok((allocated, true))
    }
}

/// Close the temp file (deleting it) and then the volume. Both are attempted.
fn cleanup<V: VolumeIo>(volume: V, temp_file: Option<V::Temp>) -> Result<()> {
    let temp_result = match temp_file {
        Some(temp_file) => temp_file.close(),
        None => Ok(()),
    };
    let volume_result = volume.close();

    match (temp_result, volume_result) {
        (Err(temp_err), Err(volume_err)) => {
            error!("Error closing volume handle: {}", volume_err);
            Err(temp_err)
        }
        (temp_result, volume_result) => temp_result.and(volume_result),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{retrieval_pointers_buffer, MockCall, MockVolume};
    use crate::volume::ControlReply;
    use byteorder::{ByteOrder, LittleEndian};

    fn run(
        volume: MockVolume,
        target: u64,
    ) -> std::result::Result<RelocationReport, RelocationFailure> {
        ForcedReallocation::new(volume, target, 4096, &ScanOptions::default()).run()
    }

    fn closes(calls: &[MockCall]) -> (usize, usize) {
        (
            calls.iter().filter(|c| **c == MockCall::TempClose).count(),
            calls.iter().filter(|c| **c == MockCall::Close).count(),
        )
    }

    #[test]
    fn test_move_file_layout() {
        let input = encode_move_file(0x1c4, 0, 777, 1);
        assert_eq!(input.len(), 32);
        assert_eq!(LittleEndian::read_u64(&input[0..8]), 0x1c4);
        assert_eq!(LittleEndian::read_u64(&input[8..16]), 0);
        assert_eq!(LittleEndian::read_u64(&input[16..24]), 777);
        assert_eq!(LittleEndian::read_u32(&input[24..28]), 1);
        assert_eq!(&input[28..], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_decode_retrieval_pointers() {
        let pointers =
            decode_retrieval_pointers(&retrieval_pointers_buffer(0, &[(1, 4242)])).unwrap();
        assert_eq!(pointers.single_cluster(), Some(4242));

        let pointers =
            decode_retrieval_pointers(&retrieval_pointers_buffer(0, &[(2, 10)])).unwrap();
        assert_eq!(pointers.single_cluster(), None);

        let pointers =
            decode_retrieval_pointers(&retrieval_pointers_buffer(0, &[(1, 10), (2, 50)])).unwrap();
        assert_eq!(pointers.single_cluster(), None);
    }

    #[test]
    fn test_decode_retrieval_pointers_overflowing_count() {
        let mut buf = retrieval_pointers_buffer(0, &[(1, 10)]);
        buf[0] = 5;
        assert!(decode_retrieval_pointers(&buf).is_err());
    }

    #[test]
    fn test_relocates_to_target() {
        let volume = MockVolume::ntfs(0, 4096 * 128);
        let journal = volume.journal();

        let report = run(volume, 100).unwrap();
        assert!(report.relocated);
        assert_eq!(report.initial_cluster, MockVolume::TEMP_INITIAL_CLUSTER);
        assert_eq!(
            report.states,
            vec![
                ReallocState::CreateTemp,
                ReallocState::FillOneCluster,
                ReallocState::QueryPlacement,
                ReallocState::Relocate,
                ReallocState::Cleanup,
                ReallocState::Completed,
            ]
        );
        assert_eq!(journal.temp_cluster(), Some(100));
        assert_eq!(closes(&journal.calls()), (1, 1));
    }

    #[test]
    fn test_already_on_target_skips_move() {
        let volume = MockVolume::ntfs(0, 4096 * 128);
        let journal = volume.journal();

        let report = run(volume, MockVolume::TEMP_INITIAL_CLUSTER).unwrap();
        assert!(!report.relocated);
        assert!(!report.states.contains(&ReallocState::Relocate));
        assert!(!journal.calls().contains(&MockCall::Control(FSCTL_MOVE_FILE)));
    }

    #[test]
    fn test_create_failure_still_cleans_up_volume() {
        let mut volume = MockVolume::ntfs(0, 4096 * 128);
        volume.create_temp_status = Some(5);
        let journal = volume.journal();

        let failure = run(volume, 100).unwrap_err();
        assert_eq!(failure.allocated_cluster, None);
        assert_eq!(
            &failure.states[..2],
            &[ReallocState::CreateTemp, ReallocState::Cleanup]
        );
        assert_eq!(closes(&journal.calls()), (0, 1));
    }

    #[test]
    fn test_short_write_fails() {
        let mut volume = MockVolume::ntfs(0, 4096 * 128);
        volume.temp_write_limit = Some(1000);
        let journal = volume.journal();

        let failure = run(volume, 100).unwrap_err();
        assert!(matches!(failure.error, SectorScanError::Resource(_)));
        assert_eq!(closes(&journal.calls()), (1, 1));
        assert!(!journal.calls().contains(&MockCall::TempControl(FSCTL_GET_RETRIEVAL_POINTERS)));
    }

    #[test]
    fn test_multi_cluster_placement_fails() {
        let mut volume = MockVolume::ntfs(0, 4096 * 128);
        volume.set_temp_reply(
            FSCTL_GET_RETRIEVAL_POINTERS,
            ControlReply::success(retrieval_pointers_buffer(0, &[(2, 40)])),
        );
        let journal = volume.journal();

        let failure = run(volume, 100).unwrap_err();
        assert!(matches!(failure.error, SectorScanError::Protocol { .. }));
        assert_eq!(closes(&journal.calls()), (1, 1));
    }

    #[test]
    fn test_move_failure_fails() {
        let mut volume = MockVolume::ntfs(0, 4096 * 128);
        // Target became allocated after the bitmap snapshot
        volume.allocate(100);
        let journal = volume.journal();

        let failure = run(volume, 100).unwrap_err();
        assert!(matches!(failure.error, SectorScanError::Os { operation: "FSCTL_MOVE_FILE", .. }));
        assert_eq!(failure.allocated_cluster, Some(MockVolume::TEMP_INITIAL_CLUSTER));
        assert_eq!(
            failure.states[..5],
            [
                ReallocState::CreateTemp,
                ReallocState::FillOneCluster,
                ReallocState::QueryPlacement,
                ReallocState::Relocate,
                ReallocState::Cleanup,
            ]
        );
        assert!(matches!(
            failure.states.last(),
            Some(ReallocState::Failed(reason)) if reason.contains("FSCTL_MOVE_FILE")
        ));
        assert_eq!(failure.states.len(), 6);
        assert_eq!(closes(&journal.calls()), (1, 1));
    }

    #[test]
    fn test_close_failures_are_reported() {
        let mut volume = MockVolume::ntfs(0, 4096 * 128);
        volume.temp_close_status = Some(6);
        let journal = volume.journal();
        assert!(run(volume, 100).is_err());
        assert_eq!(closes(&journal.calls()), (1, 1));

        let mut volume = MockVolume::ntfs(0, 4096 * 128);
        volume.close_status = Some(6);
        let failure = run(volume, 100).unwrap_err();
        assert!(matches!(failure.error, SectorScanError::Os { code: 6, .. }));
        assert!(matches!(failure.states.last(), Some(ReallocState::Failed(_))));
    }

    #[test]
    fn test_failure_display_names_cluster() {
        let mut volume = MockVolume::ntfs(0, 4096 * 128);
        volume.create_temp_status = Some(5);
        let failure = run(volume, 100).unwrap_err();
        assert!(failure.to_string().starts_with("forced reallocation of cluster 100 failed"));
    }
}
