//! # Server Lifecycle Contract
//!
//! Types shared between the server controller and its callers: the
//! authoritative [`ServerStatus`], the [`ServCtrlError`] taxonomy and the
//! [`OccupancyProbe`] capability used to decide whether a stop is safe.
//!
//! # Status machine
//!
//! ```text
//! Offline ──start──► Starting ──ready──► Online ──stop──► Stopping ──exit──► Offline
//! ```
//!
//! Transitions only move forward along this cycle. A forced kill still
//! passes through `Stopping` before the process exit yields `Offline`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of the managed server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ServerStatus {
    /// No process is running.
    #[default]
    Offline = 0,
    /// Process launched, not yet accepting users.
    Starting = 1,
    /// Process ready.
    Online = 2,
    /// Shutdown in progress.
    Stopping = 3,
}

impl ServerStatus {
    /// Convert from raw `u8`. Returns `None` for invalid values.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Offline),
            1 => Some(Self::Starting),
            2 => Some(Self::Online),
            3 => Some(Self::Stopping),
            _ => None,
        }
    }

    /// The status that legally follows this one.
    #[inline]
    pub const fn next(self) -> Self {
        match self {
            Self::Offline => Self::Starting,
            Self::Starting => Self::Online,
            Self::Online => Self::Stopping,
            Self::Stopping => Self::Offline,
        }
    }

    /// Lowercase name used in logs and operator output.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Starting => "starting",
            Self::Online => "online",
            Self::Stopping => "stopping",
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connected-user count reported by an [`OccupancyProbe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Occupancy {
    /// Number of connected users.
    pub players: u32,
    /// `true` if the number came from the live server, `false` for a
    /// fallback estimate.
    pub from_server: bool,
}

impl Occupancy {
    /// A count obtained from the live server.
    pub const fn live(players: u32) -> Self {
        Self {
            players,
            from_server: true,
        }
    }

    /// A fallback estimate.
    pub const fn estimated(players: u32) -> Self {
        Self {
            players,
            from_server: false,
        }
    }

    /// Whether nobody is connected.
    pub const fn is_empty(&self) -> bool {
        self.players == 0
    }
}

/// Capability that reports how many users are connected.
///
/// Called once per debounced stop attempt, right before the decision to
/// issue the stop command. Implementations must not block for long.
pub trait OccupancyProbe: Send + Sync {
    /// Current number of connected users.
    fn occupancy(&self) -> Occupancy;
}

/// Error type for server lifecycle operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServCtrlError {
    /// `start` called while a process is already managed.
    #[error("server is not offline (status: {status})")]
    NotOffline { status: ServerStatus },

    /// The OS could not spawn the managed process.
    #[error("failed to launch `{command}`: {reason}")]
    ProcessLaunch { command: String, reason: String },

    /// A stop was requested for a server that is not online.
    #[error("server is not online (status: {status})")]
    NotOnline { status: ServerStatus },

    /// Users are still connected.
    #[error("server is not empty ({players} players, from server: {from_server})")]
    ServerNotEmpty { players: u32, from_server: bool },

    /// A more recent stop request is still waiting out its idle timeout.
    #[error("not enough time has passed since last disconnect (pending stop requests: {pending})")]
    PendingRequests { pending: i32 },

    /// The stop command could not be delivered to the process.
    #[error("failed to deliver stop command: {reason}")]
    StopCommand { reason: String },
}

impl ServCtrlError {
    /// `true` for [`ServCtrlError::NotOnline`].
    pub const fn is_not_online(&self) -> bool {
        matches!(self, Self::NotOnline { .. })
    }

    /// `true` for the expected outcomes of debounce races. Callers treat
    /// these as no-ops.
    pub const fn is_benign(&self) -> bool {
        matches!(
            self,
            Self::NotOnline { .. } | Self::ServerNotEmpty { .. } | Self::PendingRequests { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_u8_round_trips_every_variant() {
        for status in [
            ServerStatus::Offline,
            ServerStatus::Starting,
            ServerStatus::Online,
            ServerStatus::Stopping,
        ] {
            assert_eq!(ServerStatus::from_u8(status as u8), Some(status));
        }
        assert_eq!(ServerStatus::from_u8(4), None);
    }

    #[test]
    fn next_walks_the_cycle() {
        let mut status = ServerStatus::Offline;
        let mut seen = Vec::new();
        for _ in 0..4 {
            status = status.next();
            seen.push(status);
        }
        assert_eq!(
            seen,
            [
                ServerStatus::Starting,
                ServerStatus::Online,
                ServerStatus::Stopping,
                ServerStatus::Offline
            ]
        );
    }

    #[test]
    fn benign_errors() {
        assert!(
            ServCtrlError::NotOnline {
                status: ServerStatus::Offline
            }
            .is_benign()
        );
        assert!(
            ServCtrlError::ServerNotEmpty {
                players: 1,
                from_server: true
            }
            .is_benign()
        );
        assert!(ServCtrlError::PendingRequests { pending: 1 }.is_benign());
        assert!(
            !ServCtrlError::StopCommand {
                reason: "broken pipe".into()
            }
            .is_benign()
        );
        assert!(
            !ServCtrlError::ProcessLaunch {
                command: "java".into(),
                reason: "not found".into()
            }
            .is_benign()
        );
    }

    #[test]
    fn only_not_online_is_not_online() {
        assert!(
            ServCtrlError::NotOnline {
                status: ServerStatus::Stopping
            }
            .is_not_online()
        );
        assert!(!ServCtrlError::PendingRequests { pending: 2 }.is_not_online());
    }

    #[test]
    fn error_display_mentions_details() {
        let msg = ServCtrlError::ServerNotEmpty {
            players: 3,
            from_server: false,
        }
        .to_string();
        assert!(msg.contains('3'), "{msg}");

        let msg = ServCtrlError::NotOnline {
            status: ServerStatus::Starting,
        }
        .to_string();
        assert!(msg.contains("starting"), "{msg}");
    }

    #[test]
    fn occupancy_probe_is_object_safe() {
        struct Fixed(u32);
        impl OccupancyProbe for Fixed {
            fn occupancy(&self) -> Occupancy {
                Occupancy::live(self.0)
            }
        }

        let probe: Box<dyn OccupancyProbe> = Box::new(Fixed(2));
        assert_eq!(probe.occupancy().players, 2);
        assert!(probe.occupancy().from_server);
        assert!(Occupancy::estimated(0).is_empty());
    }
}
