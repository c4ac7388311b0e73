pub mod graph;
pub mod resolver;

pub use graph::FamilyView;
pub use resolver::{FamilyResolution, resolve_family};
