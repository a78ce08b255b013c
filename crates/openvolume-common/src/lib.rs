//! OpenVolume Common Types
//!
//! Shared data model and configuration used across all OpenVolume components.

pub mod config;
pub mod types;

pub use config::Config;
pub use types::*;
