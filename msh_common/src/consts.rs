//! Shared defaults for the msh workspace.
//!
//! Single source of truth for default durations, console commands and
//! output markers. Imported by the config layer and the controller.

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "msh.toml";

/// Default service name used in log lines.
pub const DEFAULT_SERVICE_NAME: &str = "msh";

/// Console command that asks the server to shut down gracefully.
pub const DEFAULT_STOP_COMMAND: &str = "stop";

/// Console command that flushes world/state to disk before a forced kill.
pub const DEFAULT_FLUSH_COMMAND: &str = "save-all";

/// Output marker printed by the server once it accepts connections.
pub const DEFAULT_READY_PATTERN: &str = "]: Done (";

/// Output marker printed by the server when it begins shutting down.
pub const DEFAULT_STOPPING_PATTERN: &str = "]: Stopping";

/// Seconds an empty server is kept alive before a stop is attempted.
pub const DEFAULT_IDLE_TIMEOUT_S: f64 = 60.0;

/// Seconds allowed for graceful shutdown before escalation (0 = never kill).
pub const DEFAULT_GRACE_PERIOD_S: f64 = 10.0;

/// Status polling interval in seconds.
pub const DEFAULT_POLL_INTERVAL_S: f64 = 1.0;

/// Seconds to wait after the flush command before the kill signal.
pub const DEFAULT_FLUSH_WAIT_S: f64 = 10.0;

/// Upper bound accepted for any configured duration (one day).
pub const MAX_DURATION_S: f64 = 86_400.0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_are_sane() {
        assert!(DEFAULT_IDLE_TIMEOUT_S > 0.0);
        assert!(DEFAULT_GRACE_PERIOD_S >= 0.0);
        assert!(DEFAULT_POLL_INTERVAL_S > 0.0);
        // Polling must be coarser than sub-second but finer than the grace period.
        assert!(DEFAULT_POLL_INTERVAL_S >= 1.0);
        assert!(DEFAULT_POLL_INTERVAL_S <= DEFAULT_GRACE_PERIOD_S);
        for default in [
            DEFAULT_IDLE_TIMEOUT_S,
            DEFAULT_GRACE_PERIOD_S,
            DEFAULT_FLUSH_WAIT_S,
        ] {
            assert!(default <= MAX_DURATION_S);
        }
    }

    #[test]
    fn commands_are_single_lines() {
        for cmd in [DEFAULT_STOP_COMMAND, DEFAULT_FLUSH_COMMAND] {
            assert!(!cmd.is_empty());
            assert!(!cmd.contains('\n'));
        }
    }
}
