//! # CHIRP Common Library
//!
//! Shared code for the CHIRP audio engine crates:
//! - Error type shared by configuration loading
//! - Engine configuration (TOML, layered resolution, validation)
//! - Bounded fixed-capacity strings for file names and paths

pub mod bounded;
pub mod config;
pub mod error;

pub use bounded::BoundedStr;
pub use config::EngineConfig;
pub use error::{Error, Result};
