// Control codes, status codes and structure layouts used to talk to the
// NTFS driver. Values match winioctl.h / winerror.h and must stay bit-exact.
// Codes are (DEVTYPE << 16 | ACCESS << 14 | FUNC << 2 | METHOD).

pub const FSCTL_IS_VOLUME_MOUNTED: u32 = 0x0009_0028; // func 10, method 0
pub const FSCTL_GET_VOLUME_BITMAP: u32 = 0x0009_006f; // func 27, method 3
pub const FSCTL_GET_RETRIEVAL_POINTERS: u32 = 0x0009_0073; // func 28, method 3
pub const FSCTL_MOVE_FILE: u32 = 0x0009_0074; // func 29, method 0
pub const FSCTL_LOOKUP_STREAM_FROM_CLUSTER: u32 = 0x0009_01fc; // func 127, method 0
pub const FSCTL_GET_RETRIEVAL_POINTER_BASE: u32 = 0x0009_0234; // func 141, method 0
pub const IOCTL_VOLUME_GET_VOLUME_DISK_EXTENTS: u32 = 0x0056_0000; // func 0, method 0

/// Human readable name of a control code, for logs and error messages
pub fn control_code_name(code: u32) -> &'static str {
    match code {
        FSCTL_IS_VOLUME_MOUNTED => "FSCTL_IS_VOLUME_MOUNTED",
        FSCTL_GET_VOLUME_BITMAP => "FSCTL_GET_VOLUME_BITMAP",
        FSCTL_GET_RETRIEVAL_POINTERS => "FSCTL_GET_RETRIEVAL_POINTERS",
        FSCTL_MOVE_FILE => "FSCTL_MOVE_FILE",
        FSCTL_LOOKUP_STREAM_FROM_CLUSTER => "FSCTL_LOOKUP_STREAM_FROM_CLUSTER",
        FSCTL_GET_RETRIEVAL_POINTER_BASE => "FSCTL_GET_RETRIEVAL_POINTER_BASE",
        IOCTL_VOLUME_GET_VOLUME_DISK_EXTENTS => "IOCTL_VOLUME_GET_VOLUME_DISK_EXTENTS",
        _ => "DeviceIoControl",
    }
}

// Status codes
pub const ERROR_SUCCESS: u32 = 0;
pub const ERROR_CRC: u32 = 23;
pub const ERROR_INSUFFICIENT_BUFFER: u32 = 122;
pub const ERROR_MORE_DATA: u32 = 234;

// GetVolumeInformation flags
pub const FILE_READ_ONLY_VOLUME: u32 = 0x0008_0000;

pub const NTFS_NAME: &str = "NTFS";

// VOLUME_DISK_EXTENTS: NumberOfDiskExtents(u32) + pad, then DISK_EXTENT[]
pub const DISK_EXTENTS_HEADER_SIZE: usize = 8;
// DISK_EXTENT: DiskNumber(u32) + pad, StartingOffset(u64), ExtentLength(u64)
pub const DISK_EXTENT_SIZE: usize = 24;
pub const DISK_EXTENTS_BUFFER_SIZE: usize = DISK_EXTENTS_HEADER_SIZE + DISK_EXTENT_SIZE;

// VOLUME_BITMAP_BUFFER: StartingLcn(u64), BitmapSize(u64), Buffer[]
pub const BITMAP_HEADER_SIZE: usize = 16;
/// The sizing request is rejected with a bare 16-byte header buffer
pub const BITMAP_SIZING_BUFFER_SIZE: usize = 32;
pub const BITMAP_SLACK: usize = 16;

// STARTING_VCN_INPUT_BUFFER / STARTING_LCN_INPUT_BUFFER
pub const STARTING_CLUSTER_INPUT_SIZE: usize = 8;

// RETRIEVAL_POINTERS_BUFFER: ExtentCount(u32) + pad, StartingVcn(u64), then {NextVcn, Lcn}[]
pub const RETRIEVAL_POINTERS_HEADER_SIZE: usize = 16;
pub const RETRIEVAL_POINTER_EXTENT_SIZE: usize = 16;
pub const RETRIEVAL_POINTERS_BUFFER_SIZE: usize =
    RETRIEVAL_POINTERS_HEADER_SIZE + RETRIEVAL_POINTER_EXTENT_SIZE;

pub const RETRIEVAL_POINTER_BASE_SIZE: usize = 8;

// MOVE_FILE_DATA: FileHandle(ptr) + pad, StartingVcn(u64), StartingLcn(u64),
// ClusterCount(u32) + pad
pub const MOVE_FILE_DATA_SIZE: usize = 32;

// LOOKUP_STREAM_FROM_CLUSTER_INPUT: Flags(u32), NumberOfClusters(u32), Cluster[](u64)
pub const LOOKUP_INPUT_HEADER_SIZE: usize = 8;
// LOOKUP_STREAM_FROM_CLUSTER_OUTPUT: Offset(u32), NumberOfMatches(u32), BufferSizeRequired(u32)
pub const LOOKUP_OUTPUT_HEADER_SIZE: usize = 12;
// LOOKUP_STREAM_FROM_CLUSTER_ENTRY: OffsetToNext(u32), Flags(u32), Reserved(u64),
// Cluster(u64), FileName[]
pub const LOOKUP_ENTRY_NAME_OFFSET: usize = 24;
/// File names may be up to 64k bytes
pub const LOOKUP_OUTPUT_CAPACITY: usize = 70_000;

// LOOKUP_STREAM_FROM_CLUSTER_ENTRY flags
pub const LOOKUP_STREAM_FLAG_PAGE_FILE: u32 = 0x0000_0001;
pub const LOOKUP_STREAM_FLAG_DENY_DEFRAG_SET: u32 = 0x0000_0002;
pub const LOOKUP_STREAM_FLAG_FS_SYSTEM_FILE: u32 = 0x0000_0004;
pub const LOOKUP_STREAM_FLAG_TXF_SYSTEM_FILE: u32 = 0x0000_0008;
pub const LOOKUP_STREAM_FLAG_ATTRIBUTE_MASK: u32 = 0x0300_0000;
pub const LOOKUP_STREAM_FLAG_DATA_ATTRIBUTE: u32 = 0x0100_0000;
pub const LOOKUP_STREAM_FLAG_INDEX_ATTRIBUTE: u32 = 0x0200_0000;
pub const LOOKUP_STREAM_FLAG_OTHER_ATTRIBUTE: u32 = 0x0300_0000;

pub const TEMP_FILE_NAME: &str = "__dummy_.tmp";
pub const FILLER_BYTE: u8 = b'.';

#[cfg(test)]
mod tests {
    use super::*;

    fn ctl_code(device_type: u32, function: u32, method: u32, access: u32) -> u32 {
        (device_type << 16) | (access << 14) | (function << 2) | method
    }

    #[test]
    fn test_control_codes_match_ctl_code_encoding() {
        const FILE_DEVICE_FILE_SYSTEM: u32 = 0x09;
        const IOCTL_VOLUME_BASE: u32 = 0x56;
        assert_eq!(ctl_code(FILE_DEVICE_FILE_SYSTEM, 10, 0, 0), FSCTL_IS_VOLUME_MOUNTED);
        assert_eq!(ctl_code(FILE_DEVICE_FILE_SYSTEM, 27, 3, 0), FSCTL_GET_VOLUME_BITMAP);
        assert_eq!(ctl_code(FILE_DEVICE_FILE_SYSTEM, 28, 3, 0), FSCTL_GET_RETRIEVAL_POINTERS);
        assert_eq!(ctl_code(FILE_DEVICE_FILE_SYSTEM, 29, 0, 0), FSCTL_MOVE_FILE);
        assert_eq!(ctl_code(FILE_DEVICE_FILE_SYSTEM, 127, 0, 0), FSCTL_LOOKUP_STREAM_FROM_CLUSTER);
        assert_eq!(ctl_code(FILE_DEVICE_FILE_SYSTEM, 141, 0, 0), FSCTL_GET_RETRIEVAL_POINTER_BASE);
        assert_eq!(ctl_code(IOCTL_VOLUME_BASE, 0, 0, 0), IOCTL_VOLUME_GET_VOLUME_DISK_EXTENTS);
    }

    #[test]
    fn test_control_code_names() {
        assert_eq!(control_code_name(FSCTL_MOVE_FILE), "FSCTL_MOVE_FILE");
        assert_eq!(control_code_name(0xdead_beef), "DeviceIoControl");
    }
}
