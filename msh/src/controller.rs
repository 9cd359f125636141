//! Lifecycle controller for the managed server.
//!
//! [`ServerController`] owns the authoritative status and the process
//! handle. It is cheap to clone; every clone drives the same server.
//!
//! # Debounced stop
//!
//! Each [`ServerController::request_stop`] files one pending request and
//! schedules `stop(true)` after the idle timeout. When a timer fires it
//! consumes its request, then:
//!
//! 1. aborts with `ServerNotEmpty` if anybody is connected,
//! 2. aborts with `PendingRequests` if the counter it left behind is not
//!    zero (a later request is still waiting),
//! 3. otherwise issues the stop command.
//!
//! Only the last timer of a burst can therefore stop the server, and
//! only while it is empty.

use crate::output::{self, OutputMarkers};
use crate::process::ProcessHandle;
use crate::state::{PendingStopRequests, StatusCell};
use crate::watchdog::{EscalationWatchdog, WatchdogOutcome, WatchdogSettings};
use msh_common::config::{MshConfig, ServerConfig, StopConfig};
use msh_common::lifecycle::{OccupancyProbe, ServCtrlError, ServerStatus};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, warn};

struct Shared {
    server: ServerConfig,
    stop: StopConfig,
    status: Arc<StatusCell>,
    pending: Arc<PendingStopRequests>,
    occupancy: Arc<dyn OccupancyProbe>,
    process: Mutex<Option<Arc<ProcessHandle>>>,
    watchdog: Mutex<Option<JoinHandle<WatchdogOutcome>>>,
}

/// Starts, stops and supervises the managed server.
#[derive(Clone)]
pub struct ServerController {
    shared: Arc<Shared>,
}

impl ServerController {
    /// Controller for the server described by `config`. The server starts
    /// out offline.
    pub fn new(config: &MshConfig, occupancy: Arc<dyn OccupancyProbe>) -> Self {
        Self {
            shared: Arc::new(Shared {
                server: config.server.clone(),
                stop: config.stop.clone(),
                status: Arc::new(StatusCell::new(ServerStatus::Offline)),
                pending: Arc::new(PendingStopRequests::new()),
                occupancy,
                process: Mutex::new(None),
                watchdog: Mutex::new(None),
            }),
        }
    }

    /// Current status. Safe to poll from any task.
    pub fn status(&self) -> ServerStatus {
        self.shared.status.load()
    }

    /// Stop requests whose timers have not fired yet.
    pub fn pending_stop_requests(&self) -> i32 {
        self.shared.pending.load()
    }

    /// Pid of the managed process, if one is running.
    pub fn pid(&self) -> Option<u32> {
        self.shared.process.lock().as_ref().map(|p| p.pid())
    }

    /// Launch the server. Only valid while offline.
    ///
    /// On success the status is `Starting`; it becomes `Online` when the
    /// ready marker shows up in the output or [`mark_online`] is called.
    ///
    /// [`mark_online`]: ServerController::mark_online
    pub fn start(&self) -> Result<(), ServCtrlError> {
        let shared = &self.shared;
        if !shared
            .status
            .transition(ServerStatus::Offline, ServerStatus::Starting)
        {
            return Err(ServCtrlError::NotOffline {
                status: shared.status.load(),
            });
        }

        let command = &shared.server.start_command;
        let handle = match ProcessHandle::spawn(command, &shared.server.folder) {
            Ok(handle) => Arc::new(handle),
            Err(e) => {
                shared.status.replace(ServerStatus::Offline);
                error!("Failed to start server: {}", e);
                return Err(ServCtrlError::ProcessLaunch {
                    command: command.join(" "),
                    reason: e.to_string(),
                });
            }
        };

        if let Some(stdout) = handle.take_stdout() {
            output::spawn_monitor(
                stdout,
                Arc::clone(&shared.status),
                OutputMarkers::from_config(&shared.server),
            );
        }
        *shared.process.lock() = Some(Arc::clone(&handle));
        tokio::spawn(watch_exit(Arc::clone(shared), Arc::clone(&handle)));

        info!("Server starting (pid {})", handle.pid());
        Ok(())
    }

    /// Record that the server finished booting (`Starting -> Online`).
    ///
    /// Returns `false` if the server was not starting.
    pub fn mark_online(&self) -> bool {
        let changed = self
            .shared
            .status
            .transition(ServerStatus::Starting, ServerStatus::Online);
        if changed {
            info!("Server status: starting -> online");
        }
        changed
    }

    /// Issue the graceful stop command.
    ///
    /// Waits while the server is starting. With `players_check` the call
    /// consumes one pending stop request and refuses to stop a server with
    /// connected users or with later requests still pending.
    ///
    /// The request is consumed before the `NotOnline` check, not after it.
    /// A timer that fires while the server is down therefore still pays
    /// back its increment, and the counter cannot drift upwards across
    /// stop cycles.
    ///
    /// On success the escalation watchdog is armed if the grace period is
    /// non-zero. The status is not changed here; it follows the process.
    pub async fn stop(&self, players_check: bool) -> Result<(), ServCtrlError> {
        let shared = &self.shared;
        let poll = shared.stop.poll_interval();
        while shared.status.load() == ServerStatus::Starting {
            sleep(poll).await;
        }

        // Consumed before the status gate so every filed request is
        // paired with exactly one decrement.
        let pending = players_check.then(|| shared.pending.consume());

        let status = shared.status.load();
        if status != ServerStatus::Online {
            return Err(ServCtrlError::NotOnline { status });
        }

        if let Some(pending) = pending {
            let occupancy = shared.occupancy.occupancy();
            info!(
                "{} online players - number got from server: {}",
                occupancy.players, occupancy.from_server
            );
            if !occupancy.is_empty() {
                return Err(ServCtrlError::ServerNotEmpty {
                    players: occupancy.players,
                    from_server: occupancy.from_server,
                });
            }
            if pending != 0 {
                if pending < 0 {
                    warn!("Pending stop request counter is negative ({})", pending);
                }
                return Err(ServCtrlError::PendingRequests { pending });
            }
        }

        let handle = shared
            .process
            .lock()
            .clone()
            .ok_or_else(|| ServCtrlError::StopCommand {
                reason: "no managed process".to_string(),
            })?;
        handle
            .send_command(&shared.server.stop_command)
            .await
            .map_err(|e| ServCtrlError::StopCommand {
                reason: e.to_string(),
            })?;
        info!(
            "Stop command `{}` issued to pid {}",
            shared.server.stop_command,
            handle.pid()
        );

        if shared.stop.allows_kill() {
            self.arm_watchdog(handle);
        }
        Ok(())
    }

    /// File a stop request and schedule `stop(true)` after the idle timeout.
    ///
    /// Fire-and-forget: the outcome is only logged. `NotOnline` is logged
    /// at debug level since it is routine when the server is already down.
    pub fn request_stop(&self) {
        let pending = self.shared.pending.file();
        let delay = self.shared.stop.idle_timeout();
        debug!(
            "Stop request filed (pending: {}), checking in {:?}",
            pending, delay
        );

        let controller = self.clone();
        tokio::spawn(async move {
            sleep(delay).await;
            match controller.stop(true).await {
                Ok(()) => info!("Stopping empty server"),
                Err(e) if e.is_not_online() => debug!("Stop request dropped: {}", e),
                Err(e) if e.is_benign() => info!("Stop request dropped: {}", e),
                Err(e) => error!("Stop request failed: {}", e),
            }
        });
    }

    /// Wait for the most recently armed watchdog, if any, and return its
    /// outcome.
    pub async fn join_watchdog(&self) -> Option<WatchdogOutcome> {
        let handle = self.shared.watchdog.lock().take()?;
        handle.await.ok()
    }

    /// Poll until the server is offline or `limit` elapses.
    pub async fn wait_until_offline(&self, limit: Duration) -> bool {
        let deadline = Instant::now().checked_add(limit);
        let poll = self.shared.stop.poll_interval();
        loop {
            if self.status() == ServerStatus::Offline {
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

    /// Bring the server down ahead of supervisor exit, giving up after
    /// `limit`.
    ///
    /// Issues `stop(false)` if the server is starting or online, then
    /// waits for `Offline`. A still-starting server counts against
    /// `limit`. Returns `false` if the server is still up; it is then left
    /// running, since only the escalation watchdog force-kills.
    pub async fn shutdown(&self, limit: Duration) -> bool {
        let poll = self.shared.stop.poll_interval();
        let stopped = async {
            match self.status() {
                ServerStatus::Offline => return true,
                ServerStatus::Starting | ServerStatus::Online => {
                    info!("Stopping server before exit...");
                    match self.stop(false).await {
                        Ok(()) => {}
                        Err(e) if e.is_not_online() => debug!("Stop on exit: {}", e),
                        Err(e) => {
                            warn!("Stop on exit: {}", e);
                            return false;
                        }
                    }
                }
                ServerStatus::Stopping => {}
            }
            while self.status() != ServerStatus::Offline {
                sleep(poll).await;
            }
            true
        };

        let offline = tokio::time::timeout(limit, stopped)
            .await
            .unwrap_or(false);
        if !offline {
            warn!(
                "Server still {} on exit, leaving pid {} running",
                self.status(),
                self.pid()
                    .map_or_else(|| "-".to_string(), |pid| pid.to_string())
            );
        }
        offline
    }

    fn arm_watchdog(&self, process: Arc<ProcessHandle>) {
        let mut slot = self.shared.watchdog.lock();
        if slot.as_ref().is_some_and(|w| !w.is_finished()) {
            debug!("Escalation watchdog already armed for this stop cycle");
            return;
        }
        let watchdog = EscalationWatchdog::new(
            Arc::clone(&self.shared.status),
            process,
            WatchdogSettings::from_config(&self.shared.stop),
        );
        *slot = Some(watchdog.arm());
    }
}

/// Reconcile status once `handle` exits.
async fn watch_exit(shared: Arc<Shared>, handle: Arc<ProcessHandle>) {
    let exit = handle.wait().await;

    {
        let mut slot = shared.process.lock();
        // A newer process already owns the slot.
        if !slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, &handle)) {
            return;
        }
        *slot = None;
    }

    match shared.status.load() {
        ServerStatus::Online => {
            shared
                .status
                .transition(ServerStatus::Online, ServerStatus::Stopping);
            warn!("Server exited while online ({})", exit);
        }
        ServerStatus::Starting => warn!("Server exited while starting ({})", exit),
        _ => info!("Server stopped ({})", exit),
    }
    shared.status.replace(ServerStatus::Offline);
    info!("Server status: offline");
}
