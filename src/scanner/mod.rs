//! Working-copy inspection.
//!
//! Everything here reads a checked-out repository: the composer manifest,
//! the project type markers, and the framework declaration on each branch.

pub mod branches;
pub mod manifest;
pub mod project_type;

pub use branches::{BranchSource, GitBranchScanner, SkipPolicy};
