//! # Escalation Watchdog
//!
//! One watchdog is armed per successful stop command. It polls the
//! server status for up to the grace period:
//!
//! ```text
//! Armed ──offline / process gone──► Disarmed
//!   │
//!   └──grace period elapsed──► Escalating ──flush, wait, SIGKILL──► Killed
//! ```
//!
//! The watchdog never reports errors to its caller. A failed flush or a
//! kill that races with process exit is logged and the run completes.

use crate::process::{ProcessError, ProcessHandle};
use crate::state::StatusCell;
use msh_common::config::StopConfig;
use msh_common::lifecycle::ServerStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

/// Timing and commands used by an [`EscalationWatchdog`].
#[derive(Debug, Clone, PartialEq)]
pub struct WatchdogSettings {
    /// Time allowed for graceful shutdown.
    pub grace_period: Duration,
    /// Status polling interval.
    pub poll_interval: Duration,
    /// Data-safety command sent before the kill.
    pub flush_command: String,
    /// Delay between flush and kill.
    pub flush_wait: Duration,
}

impl WatchdogSettings {
    /// Settings from the `[stop]` table.
    pub fn from_config(stop: &StopConfig) -> Self {
        Self {
            grace_period: stop.grace_period(),
            poll_interval: stop.poll_interval(),
            flush_command: stop.flush_command.clone(),
            flush_wait: stop.flush_wait(),
        }
    }
}

/// How a watchdog run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogOutcome {
    /// The server went offline within the grace period.
    Disarmed,
    /// The grace period elapsed and the process was sent `SIGKILL`.
    Killed,
}

/// Per-stop-attempt supervisor that force-kills a server stuck in shutdown.
pub struct EscalationWatchdog {
    status: Arc<StatusCell>,
    process: Arc<ProcessHandle>,
    settings: WatchdogSettings,
}

impl EscalationWatchdog {
    /// Watchdog over `process`. `status` is only read, except for the
    /// `Online -> Stopping` step taken when escalating.
    pub fn new(
        status: Arc<StatusCell>,
        process: Arc<ProcessHandle>,
        settings: WatchdogSettings,
    ) -> Self {
        Self {
            status,
            process,
            settings,
        }
    }

    /// Spawn the watchdog on the current runtime.
    pub fn arm(self) -> JoinHandle<WatchdogOutcome> {
        tokio::spawn(self.run())
    }

    /// Run to completion.
    pub async fn run(self) -> WatchdogOutcome {
        let pid = self.process.pid();
        info!(
            "Escalation watchdog armed for pid {} (grace period {:?})",
            pid, self.settings.grace_period
        );

        if self.wait_for_offline().await {
            info!("Escalation watchdog disarmed: pid {} stopped in time", pid);
            return WatchdogOutcome::Disarmed;
        }

        warn!(
            "Server still {} after {:?}, escalating to kill pid {}",
            self.status.load(),
            self.settings.grace_period,
            pid
        );

        // The kill path must still pass through Stopping.
        if self.status.transition(ServerStatus::Online, ServerStatus::Stopping) {
            debug!("Server status: online -> stopping (escalation)");
        }

        info!("Saving state before killing the server process");
        if let Err(e) = self.process.send_command(&self.settings.flush_command).await {
            warn!("Flush command `{}` not delivered: {}", self.settings.flush_command, e);
        }
        sleep(self.settings.flush_wait).await;

        warn!("Sending kill signal to pid {} since it won't stop normally", pid);
        match self.process.kill().await {
            Ok(()) => {}
            Err(ProcessError::AlreadyExited { .. }) => {
                debug!("Process {} exited before the kill signal", pid);
            }
            Err(e) => warn!("Kill signal not delivered: {}", e),
        }
        WatchdogOutcome::Killed
    }

    /// Poll until offline (`true`) or the grace period ends (`false`).
    async fn wait_for_offline(&self) -> bool {
        let deadline = Instant::now().checked_add(self.settings.grace_period);
        let poll = self.settings.poll_interval;
        loop {
            // An exited process counts even if a new cycle already left Offline.
            if self.status.load() == ServerStatus::Offline || self.process.has_exited() {
                return true;
            }
            let now = Instant::now();
            let nap = match deadline {
                Some(deadline) if now >= deadline => return false,
                Some(deadline) => (deadline - now).min(poll),
                None => poll,
            };
            sleep(nap).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn settings(grace_ms: u64) -> WatchdogSettings {
        WatchdogSettings {
            grace_period: Duration::from_millis(grace_ms),
            poll_interval: Duration::from_millis(20),
            flush_command: "save-all".into(),
            flush_wait: Duration::from_millis(20),
        }
    }

    fn spawn_sh(script: &str) -> Arc<ProcessHandle> {
        let cmd = vec!["sh".to_string(), "-c".to_string(), script.to_string()];
        Arc::new(ProcessHandle::spawn(&cmd, Path::new(".")).unwrap())
    }

    fn stubborn() -> Arc<ProcessHandle> {
        spawn_sh("while read line; do :; done")
    }

    #[test]
    fn settings_follow_config() {
        let stop = StopConfig {
            grace_period_s: 5.0,
            poll_interval_s: 0.5,
            flush_command: "flush".into(),
            flush_wait_s: 2.0,
            ..StopConfig::default()
        };
        let s = WatchdogSettings::from_config(&stop);
        assert_eq!(s.grace_period, Duration::from_secs(5));
        assert_eq!(s.poll_interval, Duration::from_millis(500));
        assert_eq!(s.flush_command, "flush");
        assert_eq!(s.flush_wait, Duration::from_secs(2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn disarms_when_status_goes_offline() {
        let status = Arc::new(StatusCell::new(ServerStatus::Stopping));
        let process = stubborn();
        let watchdog =
            EscalationWatchdog::new(Arc::clone(&status), Arc::clone(&process), settings(2_000))
                .arm();

        sleep(Duration::from_millis(60)).await;
        status.replace(ServerStatus::Offline);

        assert_eq!(watchdog.await.unwrap(), WatchdogOutcome::Disarmed);
        assert!(!process.has_exited());
        process.kill().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn kills_after_grace_period() {
        let status = Arc::new(StatusCell::new(ServerStatus::Online));
        let process = stubborn();
        let started = Instant::now();

        let outcome =
            EscalationWatchdog::new(Arc::clone(&status), Arc::clone(&process), settings(100))
                .run()
                .await;

        assert_eq!(outcome, WatchdogOutcome::Killed);
        assert!(started.elapsed() >= Duration::from_millis(120));
        assert_eq!(status.load(), ServerStatus::Stopping);
        let exit = tokio::time::timeout(Duration::from_secs(5), process.wait())
            .await
            .unwrap();
        assert!(exit.was_killed(), "{exit}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn kills_even_when_flush_is_undeliverable() {
        // Closes its console but keeps running.
        let process = spawn_sh("exec 0<&-; while true; do sleep 0.05; done");
        let status = Arc::new(StatusCell::new(ServerStatus::Online));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let outcome =
            EscalationWatchdog::new(Arc::clone(&status), Arc::clone(&process), settings(50))
                .run()
                .await;

        assert_eq!(outcome, WatchdogOutcome::Killed);
        assert_eq!(status.load(), ServerStatus::Stopping);
        let exit = tokio::time::timeout(Duration::from_secs(5), process.wait())
            .await
            .unwrap();
        assert!(exit.was_killed(), "{exit}");
        let err = process.send_command("save-all").await.unwrap_err();
        assert!(matches!(err, ProcessError::AlreadyExited { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn escalation_tolerates_exited_process() {
        let status = Arc::new(StatusCell::new(ServerStatus::Online));
        let process = stubborn();
        process.kill().await.unwrap();
        process.wait().await;

        // Status never went offline, but the process is gone.
        let outcome = EscalationWatchdog::new(Arc::clone(&status), process, settings(50))
            .run()
            .await;
        assert_eq!(outcome, WatchdogOutcome::Disarmed);
        assert_eq!(status.load(), ServerStatus::Online);
    }
}
