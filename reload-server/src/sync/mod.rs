//! Applying received packages to the working directory.

pub mod apply;
pub mod paths;

pub use apply::{apply_package, ApplyMode, ApplyReport, FileAction};
