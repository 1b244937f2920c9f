/// Tests for the platform volume provider entry points
/// Volume access itself needs a real Windows volume and admin rights

#[cfg(test)]
mod open_volume_tests {
    use sectorscan_core::{SectorScanError, VolumeTarget};
    use sectorscan_platform::{describe_status, open_volume};

    #[test]
    fn test_status_descriptions_are_available() {
        // ERROR_FILE_NOT_FOUND, ERROR_ACCESS_DENIED, ERROR_CRC
        for code in [2u32, 5, 23] {
            assert!(!describe_status(code).is_empty(), "no text for status {}", code);
        }
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn test_open_volume_requires_windows() {
        let target = VolumeTarget::parse("c").unwrap();
        let err = match open_volume(&target) {
            Ok(_) => panic!("opened a volume without Windows"),
            Err(err) => err,
        };
        assert!(matches!(err, SectorScanError::PlatformNotSupported(_)));
        assert!(err.to_string().contains(r"\\.\C:"));
    }
}
