//! Shared state read and written across controller tasks.
//!
//! Both types are lock-free and meant to be held behind an `Arc`.

use msh_common::lifecycle::ServerStatus;
use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};

/// Authoritative server status.
#[derive(Debug, Default)]
pub struct StatusCell {
    raw: AtomicU8,
}

impl StatusCell {
    /// Create a cell holding `status`.
    pub fn new(status: ServerStatus) -> Self {
        Self {
            raw: AtomicU8::new(status as u8),
        }
    }

    /// Current status.
    #[inline]
    pub fn load(&self) -> ServerStatus {
        // Only valid discriminants are ever stored.
        ServerStatus::from_u8(self.raw.load(Ordering::Acquire)).unwrap_or_default()
    }

    /// Move from `from` to `to` if the cell still holds `from`.
    ///
    /// Only single forward steps of the lifecycle cycle are accepted.
    /// Returns `false` and leaves the cell untouched otherwise.
    pub fn transition(&self, from: ServerStatus, to: ServerStatus) -> bool {
        if from.next() != to {
            return false;
        }
        self.raw
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Unconditionally overwrite the status. Returns the previous value.
    pub(crate) fn replace(&self, status: ServerStatus) -> ServerStatus {
        ServerStatus::from_u8(self.raw.swap(status as u8, Ordering::AcqRel)).unwrap_or_default()
    }
}

/// Number of stop requests whose debounce timer has not fired yet.
///
/// Signed so that an unpaired decrement shows up as a negative reading
/// instead of wrapping.
#[derive(Debug, Default)]
pub struct PendingStopRequests {
    count: AtomicI32,
}

impl PendingStopRequests {
    /// Counter starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// File one request. Returns the count after the increment.
    pub fn file(&self) -> i32 {
        self.count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Consume one request. Returns the count after the decrement.
    ///
    /// The returned value is the one every decision must use: it cannot be
    /// disturbed by a concurrent consumer.
    pub fn consume(&self) -> i32 {
        self.count.fetch_sub(1, Ordering::AcqRel) - 1
    }

    /// Current count.
    pub fn load(&self) -> i32 {
        self.count.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn status_cell_defaults_to_offline() {
        assert_eq!(StatusCell::default().load(), ServerStatus::Offline);
    }

    #[test]
    fn transition_requires_expected_state() {
        let cell = StatusCell::new(ServerStatus::Offline);
        assert!(!cell.transition(ServerStatus::Online, ServerStatus::Stopping));
        assert_eq!(cell.load(), ServerStatus::Offline);

        assert!(cell.transition(ServerStatus::Offline, ServerStatus::Starting));
        assert_eq!(cell.load(), ServerStatus::Starting);
    }

    #[test]
    fn transition_rejects_skips_and_reversals() {
        let cell = StatusCell::new(ServerStatus::Offline);
        assert!(!cell.transition(ServerStatus::Offline, ServerStatus::Online));
        assert!(!cell.transition(ServerStatus::Offline, ServerStatus::Offline));
        assert_eq!(cell.load(), ServerStatus::Offline);

        let cell = StatusCell::new(ServerStatus::Online);
        assert!(!cell.transition(ServerStatus::Online, ServerStatus::Starting));
        assert!(cell.transition(ServerStatus::Online, ServerStatus::Stopping));
        assert!(cell.transition(ServerStatus::Stopping, ServerStatus::Offline));
    }

    #[test]
    fn replace_returns_previous() {
        let cell = StatusCell::new(ServerStatus::Stopping);
        assert_eq!(cell.replace(ServerStatus::Offline), ServerStatus::Stopping);
        assert_eq!(cell.load(), ServerStatus::Offline);
    }

    #[test]
    fn counter_reports_post_update_values() {
        let pending = PendingStopRequests::new();
        assert_eq!(pending.file(), 1);
        assert_eq!(pending.file(), 2);
        assert_eq!(pending.consume(), 1);
        assert_eq!(pending.consume(), 0);
        assert_eq!(pending.consume(), -1);
        assert_eq!(pending.load(), -1);
    }

    #[test]
    fn concurrent_consumers_each_see_a_distinct_value() {
        let pending = Arc::new(PendingStopRequests::new());
        for _ in 0..64 {
            pending.file();
        }

        let handles: Vec<_> = (0..64)
            .map(|_| {
                let pending = Arc::clone(&pending);
                thread::spawn(move || pending.consume())
            })
            .collect();

        let mut seen: Vec<i32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..64).collect::<Vec<_>>());
        // Exactly one consumer observed the drained counter.
        assert_eq!(seen.iter().filter(|v| **v == 0).count(), 1);
        assert_eq!(pending.load(), 0);
    }
}
