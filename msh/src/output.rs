//! Console output monitor.
//!
//! Drains the server's stdout, forwards each line to the log and turns
//! the configured markers into status transitions.

use crate::state::StatusCell;
use msh_common::config::ServerConfig;
use msh_common::lifecycle::ServerStatus;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Output substrings that drive status transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputMarkers {
    /// `Starting -> Online`.
    pub ready: String,
    /// `Online -> Stopping`.
    pub stopping: String,
}

impl OutputMarkers {
    /// Markers configured for `server`.
    pub fn from_config(server: &ServerConfig) -> Self {
        Self {
            ready: server.ready_pattern.clone(),
            stopping: server.stopping_pattern.clone(),
        }
    }

    /// Status change implied by `line`, as `(from, to)`.
    pub fn classify(&self, line: &str) -> Option<(ServerStatus, ServerStatus)> {
        if !self.ready.is_empty() && line.contains(&self.ready) {
            Some((ServerStatus::Starting, ServerStatus::Online))
        } else if !self.stopping.is_empty() && line.contains(&self.stopping) {
            Some((ServerStatus::Online, ServerStatus::Stopping))
        } else {
            None
        }
    }
}

/// Spawn a task that reads `output` until EOF.
pub fn spawn_monitor<R>(
    output: R,
    status: Arc<StatusCell>,
    markers: OutputMarkers,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(output);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end();
                    debug!("[server] {}", line);
                    if let Some((from, to)) = markers.classify(line)
                        && status.transition(from, to)
                    {
                        info!("Server status: {} -> {}", from, to);
                    }
                }
                Err(e) => {
                    warn!("Stopped reading server output: {}", e);
                    break;
                }
            }
        }
        debug!("Server output closed");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn markers() -> OutputMarkers {
        OutputMarkers {
            ready: "]: Done (".into(),
            stopping: "]: Stopping".into(),
        }
    }

    #[test]
    fn classify_lines() {
        let m = markers();
        assert_eq!(
            m.classify("[12:00:01] [Server thread/INFO]: Done (3.2s)! For help, type \"help\""),
            Some((ServerStatus::Starting, ServerStatus::Online))
        );
        assert_eq!(
            m.classify("[12:30:00] [Server thread/INFO]: Stopping server"),
            Some((ServerStatus::Online, ServerStatus::Stopping))
        );
        assert_eq!(m.classify("[12:00:00] [Server thread/INFO]: Preparing level"), None);
    }

    #[test]
    fn empty_markers_never_match() {
        let m = OutputMarkers {
            ready: String::new(),
            stopping: String::new(),
        };
        assert_eq!(m.classify("anything"), None);
    }

    #[tokio::test]
    async fn monitor_drives_transitions_in_order() {
        let status = Arc::new(StatusCell::new(ServerStatus::Starting));
        let output: &[u8] = b"loading\n[x]: Done (1.0s)!\n\xff\xfe garbage\n[x]: Stopping server\n";
        spawn_monitor(output, Arc::clone(&status), markers())
            .await
            .unwrap();
        assert_eq!(status.load(), ServerStatus::Stopping);
    }

    #[tokio::test]
    async fn stopping_marker_ignored_while_starting() {
        let status = Arc::new(StatusCell::new(ServerStatus::Starting));
        let output: &[u8] = b"[x]: Stopping server\n";
        spawn_monitor(output, Arc::clone(&status), markers())
            .await
            .unwrap();
        assert_eq!(status.load(), ServerStatus::Starting);
    }
}
