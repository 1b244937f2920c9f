// Volume cluster allocation bitmap
// Loaded with FSCTL_GET_VOLUME_BITMAP in two requests: a deliberately small
// one to learn the bitmap size, then one sized to hold the whole bitmap.

use crate::error::{Result, SectorScanError};
use crate::layout::{read_u64, write_u64};
use crate::protocol::*;
use crate::volume::VolumeIo;
use log::{debug, info};

const STRUCTURE: &str = "VOLUME_BITMAP_BUFFER";

/// Snapshot of the allocation state of every cluster on the volume.
///
/// Bit `i` is set when cluster `starting_cluster + i` is in use. The live
/// volume may change after the snapshot is taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationBitmap {
    starting_cluster: u64,
    cluster_count: u64,
    bits: Vec<u8>,
}

impl AllocationBitmap {
    /// Decode a completely filled `VOLUME_BITMAP_BUFFER`.
    pub fn from_buffer(buf: &[u8]) -> Result<Self> {
        let starting_cluster = read_u64(buf, 0, STRUCTURE)?;
        let cluster_count = read_u64(buf, 8, STRUCTURE)?;
        let byte_len = usize::try_from(cluster_count.div_ceil(8)).map_err(|_| {
            SectorScanError::decode(
                STRUCTURE,
                format!("bitmap of {} clusters is too large", cluster_count),
            )
        })?;

        let bits = buf
            .get(BITMAP_HEADER_SIZE..)
            .and_then(|data| data.get(..byte_len))
            .ok_or_else(|| {
                SectorScanError::decode(
                    STRUCTURE,
                    format!(
                        "{} clusters need {} bitmap bytes but the buffer holds {}",
                        cluster_count,
                        byte_len,
                        buf.len().saturating_sub(BITMAP_HEADER_SIZE)
                    ),
                )
            })?
            .to_vec();

        Ok(Self {
            starting_cluster,
            cluster_count,
            bits,
        })
    }

    pub fn starting_cluster(&self) -> u64 {
        self.starting_cluster
    }

    pub fn cluster_count(&self) -> u64 {
        self.cluster_count
    }

    /// Whether `cluster` was allocated when the bitmap was loaded.
    /// Clusters outside the bitmap read as free.
    pub fn is_allocated(&self, cluster: u64) -> bool {
        let Some(index) = cluster.checked_sub(self.starting_cluster) else {
            return false;
        };
        if index >= self.cluster_count {
            return false;
        }
        self.bits
            .get((index / 8) as usize)
            .is_some_and(|byte| byte & (1 << (index % 8)) != 0)
    }
}

/// Size of the fill-phase output buffer for a bitmap of `cluster_count` clusters.
pub fn fill_buffer_size(cluster_count: u64) -> usize {
    BITMAP_HEADER_SIZE + cluster_count.div_ceil(8) as usize + BITMAP_SLACK
}

/// Load the complete allocation bitmap of the volume.
pub fn load_bitmap<V: VolumeIo>(io: &mut V) -> Result<AllocationBitmap> {
    let cluster_count = query_bitmap_size(io)?;

    let capacity = fill_buffer_size(cluster_count);
    info!("Loading volume bitmap ({} bytes)...", capacity);

    let reply = io.control(FSCTL_GET_VOLUME_BITMAP, &starting_lcn_input(0), capacity);
    if !reply.is_success() {
        return Err(io.os_error("FSCTL_GET_VOLUME_BITMAP", reply.status));
    }

    let bitmap = AllocationBitmap::from_buffer(&reply.output)?;
    debug!(
        "Bitmap covers {} clusters from cluster {}",
        bitmap.cluster_count(),
        bitmap.starting_cluster()
    );
    info!("Successfully loaded bitmap");
    Ok(bitmap)
}

/// Sizing phase: a small buffer must come back with "more data" and a header.
fn query_bitmap_size<V: VolumeIo>(io: &mut V) -> Result<u64> {
    let reply = io.control(
        FSCTL_GET_VOLUME_BITMAP,
        &starting_lcn_input(0),
        BITMAP_SIZING_BUFFER_SIZE,
    );

    match reply.status {
        ERROR_MORE_DATA => {}
        ERROR_SUCCESS => {
            return Err(SectorScanError::protocol(
                "FSCTL_GET_VOLUME_BITMAP",
                "unexpected success with a sizing buffer",
            ))
        }
        ERROR_INSUFFICIENT_BUFFER => {
            return Err(SectorScanError::protocol(
                "FSCTL_GET_VOLUME_BITMAP",
                "buffer is too small and the required size is not known",
            ))
        }
        status => return Err(io.os_error("FSCTL_GET_VOLUME_BITMAP", status)),
    }

    let cluster_count = read_u64(&reply.output, 8, STRUCTURE)?;
    if cluster_count == 0 {
        return Err(SectorScanError::protocol(
            "FSCTL_GET_VOLUME_BITMAP",
            "bitmap size is zero",
        ));
    }
    debug!("Volume bitmap covers {} clusters", cluster_count);
    Ok(cluster_count)
}

fn starting_lcn_input(lcn: u64) -> [u8; STARTING_CLUSTER_INPUT_SIZE] {
    let mut input = [0u8; STARTING_CLUSTER_INPUT_SIZE];
    write_u64(&mut input, 0, lcn);
    input
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{bitmap_buffer, MockVolume};
    use crate::volume::ControlReply;

    #[test]
    fn test_bit_test_within_byte() {
        // byte 2 = 0b00000100 -> cluster 18 is the only one in use among 16..24
        let bitmap =
            AllocationBitmap::from_buffer(&bitmap_buffer(0, 24, &[0, 0, 0b0000_0100])).unwrap();
        assert!(bitmap.is_allocated(18));
        for cluster in (16..24).filter(|&c| c != 18) {
            assert!(!bitmap.is_allocated(cluster), "cluster {} should be free", cluster);
        }
    }

    #[test]
    fn test_bits_beyond_size_read_free() {
        // 10 clusters, padding bits set in the second byte
        let bitmap = AllocationBitmap::from_buffer(&bitmap_buffer(0, 10, &[0xff, 0xff])).unwrap();
        assert!(bitmap.is_allocated(9));
        assert!(!bitmap.is_allocated(10));
        assert!(!bitmap.is_allocated(15));
        assert!(!bitmap.is_allocated(u64::MAX));
    }

    #[test]
    fn test_starting_cluster_offset() {
        let bitmap = AllocationBitmap::from_buffer(&bitmap_buffer(8, 8, &[0b0000_0001])).unwrap();
        assert!(!bitmap.is_allocated(0));
        assert!(bitmap.is_allocated(8));
        assert!(!bitmap.is_allocated(9));
    }

    #[test]
    fn test_truncated_bitmap_rejected() {
        let buf = bitmap_buffer(0, 64, &[0xff; 4]);
        assert!(matches!(
            AllocationBitmap::from_buffer(&buf),
            Err(SectorScanError::Decode { .. })
        ));
    }

    #[test]
    fn test_two_phase_load() {
        let mut volume = MockVolume::ntfs(0, 4096 * 1000);
        volume.allocate(0);
        volume.allocate(999);
        let bitmap = load_bitmap(&mut volume).unwrap();

        assert_eq!(bitmap.cluster_count(), 1000);
        assert!(bitmap.is_allocated(0));
        assert!(!bitmap.is_allocated(1));
        assert!(bitmap.is_allocated(999));
        assert_eq!(
            volume.control_codes(),
            vec![FSCTL_GET_VOLUME_BITMAP, FSCTL_GET_VOLUME_BITMAP]
        );
    }

    #[test]
    fn test_sizing_success_is_fatal() {
        let mut volume = MockVolume::ntfs(0, 4096 * 8);
        volume.push_reply(
            FSCTL_GET_VOLUME_BITMAP,
            ControlReply::success(bitmap_buffer(0, 8, &[0])),
        );
        assert!(matches!(
            load_bitmap(&mut volume),
            Err(SectorScanError::Protocol { .. })
        ));
    }

    #[test]
    fn test_sizing_insufficient_buffer_is_fatal() {
        let mut volume = MockVolume::ntfs(0, 4096 * 8);
        volume.push_reply(
            FSCTL_GET_VOLUME_BITMAP,
            ControlReply::failure(ERROR_INSUFFICIENT_BUFFER, Vec::new()),
        );
        let err = load_bitmap(&mut volume).unwrap_err();
        assert!(err.to_string().contains("required size is not known"));
    }

    #[test]
    fn test_zero_size_is_fatal() {
        let mut volume = MockVolume::ntfs(0, 4096 * 8);
        volume.push_reply(
            FSCTL_GET_VOLUME_BITMAP,
            ControlReply::failure(ERROR_MORE_DATA, bitmap_buffer(0, 0, &[0; 16])),
        );
        assert!(load_bitmap(&mut volume).is_err());
    }

    #[test]
    fn test_fill_failure_is_fatal() {
        let mut volume = MockVolume::ntfs(0, 4096 * 1000);
        volume.push_reply(
            FSCTL_GET_VOLUME_BITMAP,
            ControlReply::failure(ERROR_MORE_DATA, bitmap_buffer(0, 1000, &[0; 16])),
        );
        volume.push_reply(FSCTL_GET_VOLUME_BITMAP, ControlReply::failure(5, Vec::new()));
        assert!(matches!(
            load_bitmap(&mut volume),
            Err(SectorScanError::Os { code: 5, .. })
        ));
    }

    #[test]
    fn test_fill_buffer_size() {
        assert_eq!(fill_buffer_size(8), 16 + 1 + 16);
        assert_eq!(fill_buffer_size(9), 16 + 2 + 16);
    }
}
