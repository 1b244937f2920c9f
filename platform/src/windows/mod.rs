pub mod elevation;
pub mod error_text;
pub mod volume;

pub use elevation::is_elevated;
pub use error_text::describe_status;
pub use volume::{WindowsTempFile, WindowsVolume};
