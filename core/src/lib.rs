pub mod bitmap;
pub mod config;
pub mod error;
pub mod geometry;
pub mod inspect;
mod layout;
pub mod locator;
pub mod lookup;
pub mod probe;
pub mod protocol;
pub mod realloc;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod volume;

pub use bitmap::{load_bitmap, AllocationBitmap};
pub use config::{ScanOptions, VolumeTarget};
pub use error::{ErrorCategory, Result, SectorScanError};
pub use geometry::{resolve_geometry, GeometryReport, VolumeExtent, VolumeGeometry};
pub use inspect::{inspect_sector, ClusterStatus, SectorReport};
pub use locator::locate;
pub use lookup::{resolve_owners, ClusterOwners, StreamFlags, StreamMatch};
pub use probe::{probe_cluster, ReadProbeResult};
pub use realloc::{
    ForcedReallocation, ReallocState, RelocationFailure, RelocationPlan, RelocationReport,
};
pub use volume::{ClusterLayout, ControlReply, FilesystemInfo, TempFile, VolumeIo};
