//! Utility modules for the reload server.

pub mod errors;
pub mod logger;

pub use errors::{ReloadError, Result};
