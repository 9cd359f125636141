//! # msh Library
//!
//! Start-on-demand supervision of an expensive long-running server.
//!
//! # Module Structure
//!
//! - [`controller`] - `ServerController`: start, stop, debounced stop requests
//! - [`watchdog`] - Per-stop escalation to a forced kill
//! - [`process`] - Process handle (launch, console input, signals, exit)
//! - [`output`] - Console output monitor driving status transitions
//! - [`occupancy`] - Fallback connection tally
//! - [`state`] - Atomic status cell and pending-request counter
//!
//! # Architecture
//!
//! ```text
//!  request_stop ──timer──┐
//!                        ▼
//!  start ──────► ServerController ──stop cmd──► ProcessHandle ◄──kill── EscalationWatchdog
//!                   │      ▲                        │                        │
//!                   │      └──── StatusCell ◄───────┴── output / exit ◄──────┘ (reads)
//!                   └──► OccupancyProbe
//! ```

pub mod controller;
pub mod occupancy;
pub mod output;
pub mod process;
pub mod state;
pub mod watchdog;

// Re-export key types for convenience
pub use crate::controller::ServerController;
pub use crate::occupancy::ConnectionTally;
pub use crate::process::{ProcessError, ProcessExit, ProcessHandle};
pub use crate::watchdog::{EscalationWatchdog, WatchdogOutcome, WatchdogSettings};
