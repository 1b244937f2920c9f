// Cluster owner lookup (FSCTL_LOOKUP_STREAM_FROM_CLUSTER)
// Decodes the linked list of stream entries naming the files that use a cluster.

use crate::error::{Result, SectorScanError};
use crate::layout::{read_u32, read_u64, read_wide_string, write_u32, write_u64};
use crate::protocol::*;
use crate::volume::VolumeIo;
use log::{debug, warn};
use serde::Serialize;
use std::fmt;

const STRUCTURE: &str = "LOOKUP_STREAM_FROM_CLUSTER_OUTPUT";

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    pub struct StreamFlags: u8 {
        const IN_PAGEFILE           = 0x01;
        const DEFRAG_DENIED         = 0x02;
        const IS_SYSTEM             = 0x04;
        const INDEX_ALLOCATION      = 0x08;
        const ALTERNATE_DATA_STREAM = 0x10;
    }
}

impl StreamFlags {
    /// Translate the raw `LOOKUP_STREAM_FROM_CLUSTER_ENTRY` flags.
    pub fn from_raw(raw: u32) -> Self {
        let mut flags = StreamFlags::empty();
        if raw & LOOKUP_STREAM_FLAG_PAGE_FILE != 0 {
            flags |= StreamFlags::IN_PAGEFILE;
        }
        if raw & LOOKUP_STREAM_FLAG_DENY_DEFRAG_SET != 0 {
            flags |= StreamFlags::DEFRAG_DENIED;
        }
        if raw & (LOOKUP_STREAM_FLAG_FS_SYSTEM_FILE | LOOKUP_STREAM_FLAG_TXF_SYSTEM_FILE) != 0 {
            flags |= StreamFlags::IS_SYSTEM;
        }
        match raw & LOOKUP_STREAM_FLAG_ATTRIBUTE_MASK {
            LOOKUP_STREAM_FLAG_INDEX_ATTRIBUTE => flags |= StreamFlags::INDEX_ALLOCATION,
            LOOKUP_STREAM_FLAG_OTHER_ATTRIBUTE => flags |= StreamFlags::ALTERNATE_DATA_STREAM,
            _ => {} // $DATA
        }
        flags
    }

    /// Short markers shown in front of a file name
    pub fn markers(&self) -> Vec<&'static str> {
        [
            (StreamFlags::IN_PAGEFILE, "*PF"),
            (StreamFlags::DEFRAG_DENIED, "*DD"),
            (StreamFlags::IS_SYSTEM, "*SYS"),
            (StreamFlags::INDEX_ALLOCATION, "*IDX"),
            (StreamFlags::ALTERNATE_DATA_STREAM, "*ADS"),
        ]
        .into_iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, marker)| marker)
        .collect()
    }
}

/// One file or stream using the queried cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamMatch {
    pub flags: StreamFlags,
    pub file_name: String,
}

impl fmt::Display for StreamMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for marker in self.flags.markers() {
            write!(f, "{} ", marker)?;
        }
        f.write_str(&self.file_name)
    }
}

/// Decoded `LOOKUP_STREAM_FROM_CLUSTER_OUTPUT`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupOutput {
    pub declared_matches: u32,
    pub buffer_size_required: u32,
    pub matches: Vec<StreamMatch>,
}

/// Files using one cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterOwners {
    pub cluster: u64,
    pub matches: Vec<StreamMatch>,
    /// The driver had more matches than fit in the output buffer
    pub truncated: bool,
}

/// Build a `LOOKUP_STREAM_FROM_CLUSTER_INPUT` naming a single cluster.
pub fn encode_lookup_input(cluster: u64) -> [u8; LOOKUP_INPUT_HEADER_SIZE + 8] {
    let mut input = [0u8; LOOKUP_INPUT_HEADER_SIZE + 8];
    write_u32(&mut input, 0, 0); // no flags are defined
    write_u32(&mut input, 4, 1);
    write_u64(&mut input, LOOKUP_INPUT_HEADER_SIZE, cluster);
    input
}

/// Decode the lookup output, following `OffsetToNext` links until one is zero.
///
/// Every link must land inside the buffer and leave room for an entry header,
/// so a malformed chain ends in an error instead of looping. When the driver
/// reported more data than fit (`truncated`), the walk instead stops at the
/// first entry that is cut off and keeps the entries decoded before it.
pub fn decode_lookup_output(buf: &[u8], truncated: bool) -> Result<LookupOutput> {
    let first = read_u32(buf, 0, STRUCTURE)? as usize;
    let declared_matches = read_u32(buf, 4, STRUCTURE)?;
    let buffer_size_required = read_u32(buf, 8, STRUCTURE)?;

    let mut matches = Vec::new();
    if declared_matches == 0 {
        return Ok(LookupOutput {
            declared_matches,
            buffer_size_required,
            matches,
        });
    }

    if first < LOOKUP_OUTPUT_HEADER_SIZE {
        return Err(SectorScanError::decode(
            STRUCTURE,
            format!("first entry offset {} overlaps the header", first),
        ));
    }

    let mut pos = first;
    loop {
        if truncated && !entry_fits(buf, pos, LOOKUP_ENTRY_NAME_OFFSET) {
            debug!("Stream entry at {} is cut off; keeping {} entries", pos, matches.len());
            break;
        }
        let next = read_u32(buf, pos, STRUCTURE)? as usize;
        let raw_flags = read_u32(buf, pos + 4, STRUCTURE)?;
        let cluster = read_u64(buf, pos + 16, STRUCTURE)?;

        if next != 0 && next < LOOKUP_ENTRY_NAME_OFFSET {
            return Err(SectorScanError::decode(
                STRUCTURE,
                format!("entry at {} links {} bytes ahead, inside its own header", pos, next),
            ));
        }

        let end = if next == 0 {
            buf.len()
        } else if entry_fits(buf, pos, next) {
            pos + next
        } else if truncated {
            debug!("Stream entry at {} links past the returned data", pos);
            break;
        } else {
            return Err(SectorScanError::decode(
                STRUCTURE,
                format!("entry at {} links past the end of the buffer", pos),
            ));
        };

        let name_start = pos + LOOKUP_ENTRY_NAME_OFFSET;
        if truncated && next == 0 && !has_terminator(&buf[name_start..end]) {
            debug!("Name of the last stream entry at {} is cut off", pos);
            break;
        }

        let file_name = read_wide_string(buf, name_start, end, STRUCTURE)?;
        debug!(
            "Stream entry at {}: cluster {}, flags {:#x}, {}",
            pos, cluster, raw_flags, file_name
        );
        matches.push(StreamMatch {
            flags: StreamFlags::from_raw(raw_flags),
            file_name,
        });

        if next == 0 {
            break;
        }
        pos = end;
    }

    Ok(LookupOutput {
        declared_matches,
        buffer_size_required,
        matches,
    })
}

/// Whether `len` bytes starting at `pos` lie inside `buf`
fn entry_fits(buf: &[u8], pos: usize, len: usize) -> bool {
    pos.checked_add(len).is_some_and(|end| end <= buf.len())
}

fn has_terminator(name: &[u8]) -> bool {
    name.chunks_exact(2).any(|unit| unit == [0, 0])
}

/// Ask the filesystem which files use `cluster`.
///
/// Only meaningful for clusters the bitmap marks as in use; an empty answer
/// means the bitmap and the lookup disagree and is reported as `NoOwner`.
pub fn resolve_owners<V: VolumeIo>(
    io: &mut V,
    cluster: u64,
    capacity: usize,
) -> Result<ClusterOwners> {
    let input = encode_lookup_input(cluster);
    let reply = io.control(FSCTL_LOOKUP_STREAM_FROM_CLUSTER, &input, capacity);

    let truncated = match reply.status {
        ERROR_SUCCESS => false,
        ERROR_MORE_DATA => {
            warn!("Got more file matches than will fit in buffer! Some results will not be shown");
            true
        }
        status => return Err(io.os_error("FSCTL_LOOKUP_STREAM_FROM_CLUSTER", status)),
    };

    let output = decode_lookup_output(&reply.output, truncated)?;
    if output.declared_matches == 0 {
        return Err(SectorScanError::NoOwner { cluster });
    }
    if output.declared_matches > 1 {
        warn!(
            "Unexpectedly got {} results for files using cluster {}",
            output.declared_matches, cluster
        );
    }
    if truncated {
        debug!("Lookup needs a {}-byte buffer", output.buffer_size_required);
    }

    Ok(ClusterOwners {
        cluster,
        matches: output.matches,
        truncated,
    })
}
