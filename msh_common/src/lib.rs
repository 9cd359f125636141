//! msh Common Library
//!
//! Shared types and configuration loading for the msh workspace.
//!
//! # Module Structure
//!
//! - [`config`] - Configuration loading traits and types
//! - [`consts`] - Default durations, commands and output markers
//! - [`lifecycle`] - Server status, lifecycle errors, occupancy capability
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use msh_common::prelude::*;
//! ```

pub mod config;
pub mod consts;
pub mod lifecycle;
pub mod prelude;
