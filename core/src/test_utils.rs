/// Test utilities and mock implementations for safe testing
///
/// `MockVolume` simulates an NTFS volume handle in memory: it answers the
/// geometry queries, serves a bitmap through the two-phase protocol, looks up
/// owners, and tracks a delete-on-close temp file that can be moved. It never
/// touches real hardware.
use crate::error::{Result, SectorScanError};
use crate::layout::{read_u32, read_u64, write_u32, write_u64};
use crate::protocol::*;
use crate::volume::{ClusterLayout, ControlReply, FilesystemInfo, TempFile, VolumeIo};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

/// Every operation the core performed against the mock, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Control(u32),
    Seek(u64),
    Read(usize),
    CreateTemp(String),
    TempWrite(usize),
    TempControl(u32),
    TempClose,
    Close,
}

#[derive(Debug, Default)]
struct JournalState {
    calls: Vec<MockCall>,
    temp_cluster: Option<u64>,
}

/// Shared view of the mock's call log, usable after the volume has been consumed
#[derive(Debug, Clone, Default)]
pub struct MockJournal(Rc<RefCell<JournalState>>);

impl MockJournal {
    pub fn calls(&self) -> Vec<MockCall> {
        self.0.borrow().calls.clone()
    }

    /// Cluster currently backing the temp file, if one was written
    pub fn temp_cluster(&self) -> Option<u64> {
        self.0.borrow().temp_cluster
    }

    fn record(&self, call: MockCall) {
        self.0.borrow_mut().calls.push(call);
    }

    fn set_temp_cluster(&self, cluster: u64) {
        self.0.borrow_mut().temp_cluster = Some(cluster);
    }
}

pub struct MockVolume {
    pub layout: ClusterLayout,
    pub filesystem: FilesystemInfo,
    pub volume_start: u64,
    pub volume_length: u64,
    pub seek_status: Option<u32>,
    pub create_temp_status: Option<u32>,
    /// Maximum bytes a single temp file write accepts
    pub temp_write_limit: Option<usize>,
    pub temp_close_status: Option<u32>,
    pub close_status: Option<u32>,
    cluster_count: u64,
    bitmap: Vec<u8>,
    owners: HashMap<u64, Vec<(u32, String)>>,
    replies: HashMap<u32, ControlReply>,
    queued: HashMap<u32, VecDeque<ControlReply>>,
    temp_replies: HashMap<u32, ControlReply>,
    read_failures: HashMap<u64, u32>,
    short_reads: HashMap<u64, usize>,
    position: u64,
    journal: MockJournal,
}

impl MockVolume {
    /// Cluster the filesystem picks for a new temp file
    pub const TEMP_INITIAL_CLUSTER: u64 = 50;
    pub const TEMP_HANDLE: u64 = 0x1c4;

    /// A mounted NTFS volume with 512-byte sectors, 4 KiB clusters and every
    /// cluster free.
    pub fn ntfs(volume_start: u64, volume_length: u64) -> Self {
        let cluster_count = volume_length / 4096;
        Self {
            layout: ClusterLayout {
                sectors_per_cluster: 8,
                bytes_per_sector: 512,
            },
            filesystem: FilesystemInfo {
                name: NTFS_NAME.to_string(),
                flags: 0,
            },
            volume_start,
            volume_length,
            seek_status: None,
            create_temp_status: None,
            temp_write_limit: None,
            temp_close_status: None,
            close_status: None,
            cluster_count,
            bitmap: vec![0; cluster_count.div_ceil(8) as usize],
            owners: HashMap::new(),
            replies: HashMap::new(),
            queued: HashMap::new(),
            temp_replies: HashMap::new(),
            read_failures: HashMap::new(),
            short_reads: HashMap::new(),
            position: 0,
            journal: MockJournal::default(),
        }
    }

    fn cluster_size(&self) -> u64 {
        self.layout.bytes_per_sector as u64 * self.layout.sectors_per_cluster as u64
    }

    pub fn journal(&self) -> MockJournal {
        self.journal.clone()
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.journal.calls()
    }

    /// Control codes issued against the volume handle
    pub fn control_codes(&self) -> Vec<u32> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                MockCall::Control(code) => Some(code),
                _ => None,
            })
            .collect()
    }

    /// Answer every request for `code` with `reply`
    pub fn set_reply(&mut self, code: u32, reply: ControlReply) {
        self.replies.insert(code, reply);
    }

    /// Answer the next request for `code` with `reply`
    pub fn push_reply(&mut self, code: u32, reply: ControlReply) {
        self.queued.entry(code).or_default().push_back(reply);
    }

    /// Answer every temp file request for `code` with `reply`
    pub fn set_temp_reply(&mut self, code: u32, reply: ControlReply) {
        self.temp_replies.insert(code, reply);
    }

    pub fn allocate(&mut self, cluster: u64) {
        self.bitmap[(cluster / 8) as usize] |= 1 << (cluster % 8);
    }

    pub fn is_allocated(&self, cluster: u64) -> bool {
        cluster < self.cluster_count
            && self.bitmap[(cluster / 8) as usize] & (1 << (cluster % 8)) != 0
    }

    /// Mark `cluster` in use by a stream with the given raw lookup flags
    pub fn add_owner(&mut self, cluster: u64, flags: u32, name: &str) {
        self.allocate(cluster);
        self.owners
            .entry(cluster)
            .or_default()
            .push((flags, name.to_string()));
    }

    /// Reads starting at byte `offset` fail with `status`
    pub fn fail_read(&mut self, offset: u64, status: u32) {
        self.read_failures.insert(offset, status);
    }

    /// Reads starting at byte `offset` return only `len` bytes
    pub fn short_read(&mut self, offset: u64, len: usize) {
        self.short_reads.insert(offset, len);
    }

    fn scripted(&mut self, code: u32) -> Option<ControlReply> {
        self.queued
            .get_mut(&code)
            .and_then(VecDeque::pop_front)
            .or_else(|| self.replies.get(&code).cloned())
    }

    fn volume_bitmap(&self, output_capacity: usize) -> ControlReply {
        if output_capacity < BITMAP_HEADER_SIZE {
            return ControlReply::failure(ERROR_INSUFFICIENT_BUFFER, vec![0; output_capacity]);
        }

        let mut output = vec![0u8; output_capacity];
        write_u64(&mut output, 0, 0);
        write_u64(&mut output, 8, self.cluster_count);
        let fits = (output_capacity - BITMAP_HEADER_SIZE).min(self.bitmap.len());
        output[BITMAP_HEADER_SIZE..BITMAP_HEADER_SIZE + fits].copy_from_slice(&self.bitmap[..fits]);

        if fits < self.bitmap.len() {
            ControlReply::failure(ERROR_MORE_DATA, output)
        } else {
            ControlReply::success(output)
        }
    }

    fn lookup(&self, input: &[u8], output_capacity: usize) -> ControlReply {
        let cluster = match read_u64(input, LOOKUP_INPUT_HEADER_SIZE, "lookup input") {
            Ok(cluster) => cluster,
            Err(_) => return ControlReply::failure(87, Vec::new()),
        };
        let entries: Vec<(u32, &str)> = self
            .owners
            .get(&cluster)
            .map(|owners| owners.iter().map(|(f, n)| (*f, n.as_str())).collect())
            .unwrap_or_default();

        let output = lookup_output_buffer(&entries, output_capacity);
        if output.len() > output_capacity {
            let mut partial = output;
            partial.truncate(output_capacity);
            ControlReply::failure(ERROR_MORE_DATA, partial)
        } else {
            ControlReply::success(output)
        }
    }

    fn move_file(&self, input: &[u8]) -> ControlReply {
        let parsed = (|| -> Result<(u64, u64, u64, u32)> {
            Ok((
                read_u64(input, 0, "MOVE_FILE_DATA")?,
                read_u64(input, 8, "MOVE_FILE_DATA")?,
                read_u64(input, 16, "MOVE_FILE_DATA")?,
                read_u32(input, 24, "MOVE_FILE_DATA")?,
            ))
        })();
        let Ok((handle, vcn, lcn, count)) = parsed else {
            return ControlReply::failure(87, Vec::new());
        };

        if handle != Self::TEMP_HANDLE || self.journal.temp_cluster().is_none() {
            return ControlReply::failure(6, Vec::new()); // ERROR_INVALID_HANDLE
        }
        if vcn != 0 || count != 1 || lcn >= self.cluster_count || self.is_allocated(lcn) {
            return ControlReply::failure(5, Vec::new()); // ERROR_ACCESS_DENIED
        }

        self.journal.set_temp_cluster(lcn);
        ControlReply::success(Vec::new())
    }

    fn os_error_for(operation: &'static str, code: u32) -> SectorScanError {
        SectorScanError::Os {
            operation,
            code,
            message: format!("mock status {}", code),
        }
    }
}

impl VolumeIo for MockVolume {
    type Temp = MockTempFile;

    fn control(&mut self, code: u32, input: &[u8], output_capacity: usize) -> ControlReply {
        self.journal.record(MockCall::Control(code));

        if let Some(mut reply) = self.scripted(code) {
            reply.output.resize(output_capacity, 0);
            return reply;
        }

        match code {
            FSCTL_IS_VOLUME_MOUNTED => ControlReply::success(Vec::new()),
            IOCTL_VOLUME_GET_VOLUME_DISK_EXTENTS => ControlReply::success(disk_extents_buffer(&[(
                0,
                self.volume_start,
                self.volume_length,
            )])),
            FSCTL_GET_RETRIEVAL_POINTER_BASE => ControlReply::success(0u64.to_le_bytes().to_vec()),
            FSCTL_GET_VOLUME_BITMAP => self.volume_bitmap(output_capacity),
            FSCTL_LOOKUP_STREAM_FROM_CLUSTER => self.lookup(input, output_capacity),
            FSCTL_MOVE_FILE => self.move_file(input),
            _ => ControlReply::failure(1, Vec::new()), // ERROR_INVALID_FUNCTION
        }
    }

    fn cluster_layout(&self) -> Result<ClusterLayout> {
        Ok(self.layout)
    }

    fn filesystem_info(&self) -> Result<FilesystemInfo> {
        Ok(self.filesystem.clone())
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        self.journal.record(MockCall::Seek(offset));
        if let Some(code) = self.seek_status {
            return Err(Self::os_error_for("SetFilePointerEx", code));
        }
        self.position = offset;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> std::result::Result<usize, u32> {
        self.journal.record(MockCall::Read(buf.len()));
        if let Some(&code) = self.read_failures.get(&self.position) {
            return Err(code);
        }
        let n = self
            .short_reads
            .get(&self.position)
            .copied()
            .unwrap_or(buf.len())
            .min(buf.len());
        buf[..n].fill(0);
        self.position += n as u64;
        Ok(n)
    }

    fn create_temp_file(&mut self, name: &str) -> Result<MockTempFile> {
        self.journal.record(MockCall::CreateTemp(name.to_string()));
        if let Some(code) = self.create_temp_status {
            return Err(Self::os_error_for("CreateFileW", code));
        }
        Ok(MockTempFile {
            journal: self.journal.clone(),
            cluster_size: self.cluster_size(),
            written: 0,
            write_limit: self.temp_write_limit,
            close_status: self.temp_close_status,
            replies: self.temp_replies.clone(),
        })
    }

    fn close(self) -> Result<()> {
        self.journal.record(MockCall::Close);
        match self.close_status {
            Some(code) => Err(Self::os_error_for("CloseHandle", code)),
            None => Ok(()),
        }
    }

    fn describe_status(&self, code: u32) -> String {
        format!("mock status {}", code)
    }
}

pub struct MockTempFile {
    journal: MockJournal,
    cluster_size: u64,
    written: u64,
    write_limit: Option<usize>,
    close_status: Option<u32>,
    replies: HashMap<u32, ControlReply>,
}

impl TempFile for MockTempFile {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let n = self.write_limit.map_or(data.len(), |limit| limit.min(data.len()));
        self.journal.record(MockCall::TempWrite(n));
        if self.written == 0 && n > 0 {
            self.journal.set_temp_cluster(MockVolume::TEMP_INITIAL_CLUSTER);
        }
        self.written += n as u64;
        Ok(n)
    }

    fn control(&mut self, code: u32, _input: &[u8], output_capacity: usize) -> ControlReply {
        self.journal.record(MockCall::TempControl(code));
        if let Some(reply) = self.replies.get(&code) {
            return reply.clone();
        }

        match (code, self.journal.temp_cluster()) {
            (FSCTL_GET_RETRIEVAL_POINTERS, Some(lcn)) => {
                let clusters = self.written.div_ceil(self.cluster_size);
                let mut output = retrieval_pointers_buffer(0, &[(clusters, lcn)]);
                if output.len() > output_capacity {
                    output.truncate(output_capacity);
                    return ControlReply::failure(ERROR_MORE_DATA, output);
                }
                output.resize(output_capacity, 0);
                ControlReply::success(output)
            }
            _ => ControlReply::failure(1, Vec::new()),
        }
    }

    fn raw_handle(&self) -> u64 {
        MockVolume::TEMP_HANDLE
    }

    fn close(self) -> Result<()> {
        self.journal.record(MockCall::TempClose);
        match self.close_status {
            Some(code) => Err(MockVolume::os_error_for("CloseHandle", code)),
            None => Ok(()),
        }
    }
}

/// `VOLUME_DISK_EXTENTS` holding `(disk_number, starting_offset, length)` entries
pub fn disk_extents_buffer(extents: &[(u32, u64, u64)]) -> Vec<u8> {
    let mut buf = vec![0u8; DISK_EXTENTS_HEADER_SIZE + extents.len() * DISK_EXTENT_SIZE];
    write_u32(&mut buf, 0, extents.len() as u32);
    for (i, &(disk, start, len)) in extents.iter().enumerate() {
        let base = DISK_EXTENTS_HEADER_SIZE + i * DISK_EXTENT_SIZE;
        write_u32(&mut buf, base, disk);
        write_u64(&mut buf, base + 8, start);
        write_u64(&mut buf, base + 16, len);
    }
    buf
}

/// `VOLUME_BITMAP_BUFFER` with the given header and bitmap bytes
pub fn bitmap_buffer(starting_lcn: u64, bitmap_size: u64, bytes: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; BITMAP_HEADER_SIZE];
    write_u64(&mut buf, 0, starting_lcn);
    write_u64(&mut buf, 8, bitmap_size);
    buf.extend_from_slice(bytes);
    buf
}

/// `LOOKUP_STREAM_FROM_CLUSTER_OUTPUT` listing `(raw_flags, file_name)` entries,
/// zero-padded to at least `capacity` bytes
pub fn lookup_output_buffer(entries: &[(u32, &str)], capacity: usize) -> Vec<u8> {
    let encoded: Vec<Vec<u8>> = entries
        .iter()
        .map(|(flags, name)| {
            let mut entry = vec![0u8; LOOKUP_ENTRY_NAME_OFFSET];
            write_u32(&mut entry, 4, *flags);
            for unit in name.encode_utf16().chain(std::iter::once(0)) {
                entry.extend_from_slice(&unit.to_le_bytes());
            }
            entry.resize(entry.len().next_multiple_of(8), 0);
            entry
        })
        .collect();

    let total = LOOKUP_OUTPUT_HEADER_SIZE + encoded.iter().map(Vec::len).sum::<usize>();
    let mut buf = vec![0u8; LOOKUP_OUTPUT_HEADER_SIZE];
    if !entries.is_empty() {
        write_u32(&mut buf, 0, LOOKUP_OUTPUT_HEADER_SIZE as u32);
    }
    write_u32(&mut buf, 4, entries.len() as u32);
    write_u32(&mut buf, 8, total as u32);

    let last = encoded.len().saturating_sub(1);
    for (i, mut entry) in encoded.into_iter().enumerate() {
        if i != last {
            let len = entry.len() as u32;
            write_u32(&mut entry, 0, len);
        }
        buf.extend_from_slice(&entry);
    }

    if buf.len() < capacity {
        buf.resize(capacity, 0);
    }
    buf
}

/// `RETRIEVAL_POINTERS_BUFFER` with `(next_vcn, lcn)` extents
pub fn retrieval_pointers_buffer(starting_vcn: u64, extents: &[(u64, u64)]) -> Vec<u8> {
    let mut buf =
        vec![0u8; RETRIEVAL_POINTERS_HEADER_SIZE + extents.len() * RETRIEVAL_POINTER_EXTENT_SIZE];
    write_u32(&mut buf, 0, extents.len() as u32);
    write_u64(&mut buf, 8, starting_vcn);
    for (i, &(next_vcn, lcn)) in extents.iter().enumerate() {
        let base = RETRIEVAL_POINTERS_HEADER_SIZE + i * RETRIEVAL_POINTER_EXTENT_SIZE;
        write_u64(&mut buf, base, next_vcn);
        write_u64(&mut buf, base + 8, lcn);
    }
    buf
}
