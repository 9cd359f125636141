//! Prelude module for common re-exports.
//!
//! ```rust
//! use msh_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{
    ConfigError, ConfigLoader, LogLevel, MshConfig, ServerConfig, SharedConfig, StopConfig,
};

// ─── Lifecycle ──────────────────────────────────────────────────────
pub use crate::lifecycle::{Occupancy, OccupancyProbe, ServCtrlError, ServerStatus};
