//! Reload Server Library
//!
//! Receives hot-reload packages over TCP, applies them to a working
//! directory and keeps the application process running on the new code.

pub mod config;
pub mod daemon;
pub mod fs;
pub mod package;
pub mod server;
pub mod session;
pub mod supervisor;
pub mod sync;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use server::ReloadServer;
pub use utils::errors::ReloadError;
pub type Result<T> = std::result::Result<T, ReloadError>;
