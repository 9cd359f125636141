//! Fallback occupancy estimate.

use msh_common::lifecycle::{Occupancy, OccupancyProbe};
use std::sync::atomic::{AtomicU32, Ordering};

/// Counts connections seen by the proxy layer.
///
/// Used when the live server cannot be queried, so every reading is
/// reported with `from_server = false`.
#[derive(Debug, Default)]
pub struct ConnectionTally {
    connected: AtomicU32,
}

impl ConnectionTally {
    /// Empty tally.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a connection. Returns the new count.
    pub fn connect(&self) -> u32 {
        self.connected.fetch_add(1, Ordering::AcqRel).saturating_add(1)
    }

    /// Record a disconnection, saturating at zero. Returns the new count.
    pub fn disconnect(&self) -> u32 {
        let previous = self
            .connected
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(1))
            })
            .unwrap_or_default();
        previous.saturating_sub(1)
    }

    /// Overwrite the count.
    pub fn set(&self, players: u32) {
        self.connected.store(players, Ordering::Release);
    }

    /// Current count.
    pub fn connected(&self) -> u32 {
        self.connected.load(Ordering::Acquire)
    }
}

impl OccupancyProbe for ConnectionTally {
    fn occupancy(&self) -> Occupancy {
        Occupancy::estimated(self.connected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_and_disconnect() {
        let tally = ConnectionTally::new();
        assert_eq!(tally.connect(), 1);
        assert_eq!(tally.connect(), 2);
        assert_eq!(tally.disconnect(), 1);
        assert_eq!(tally.occupancy(), Occupancy::estimated(1));
    }

    #[test]
    fn disconnect_saturates_at_zero() {
        let tally = ConnectionTally::new();
        assert_eq!(tally.disconnect(), 0);
        assert_eq!(tally.connected(), 0);
        assert!(tally.occupancy().is_empty());
        assert!(!tally.occupancy().from_server);
    }

    #[test]
    fn set_overwrites() {
        let tally = ConnectionTally::new();
        tally.set(7);
        assert_eq!(tally.occupancy().players, 7);
    }
}
