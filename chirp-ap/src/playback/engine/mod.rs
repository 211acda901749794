//! Audio engine
//!
//! **Module Structure:**
//! - `core.rs`: construction, stream control, fill and lifecycle ticks
//! - `diagnostics.rs`: status snapshots and counters

mod core;
mod diagnostics;

pub use self::core::AudioEngine;
pub use diagnostics::EngineDiagnostics;
