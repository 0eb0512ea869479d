//! qpass Core - Shared functionality for the qpass frontend
//!
//! Standard locations, the configuration file model, small formatting
//! helpers and external program discovery.

pub mod config;
pub mod format;
pub mod paths;
pub mod process;

pub use config::{Config, StoreSpec};
pub use paths::Paths;
