pub mod source;
pub mod types;

pub use source::{JsonDirSource, SnapshotSource};
pub use types::*;
