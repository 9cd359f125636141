//! Process handle for the managed server.
//!
//! Thin wrapper around the OS child: launch, console input, signals and
//! exit observation. Holds no lifecycle policy.
//!
//! The OS child is owned by a reaper task. Signals are routed through
//! that task, so a pid is never signalled after it has been reaped.

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::fmt;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

/// Error type for process handle operations.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// No program given.
    #[error("empty command line")]
    EmptyCommand,

    /// The OS refused to spawn the program.
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The process has been reaped.
    #[error("process {pid} has already exited")]
    AlreadyExited { pid: u32 },

    /// The console pipe is gone.
    #[error("stdin of process {pid} is closed")]
    StdinClosed { pid: u32 },

    /// Writing to the console pipe failed.
    #[error("failed to write to process {pid}: {source}")]
    Write {
        pid: u32,
        #[source]
        source: io::Error,
    },

    /// `kill(2)` failed.
    #[error("failed to send {signal} to process {pid}: {errno}")]
    Signal {
        pid: u32,
        signal: Signal,
        errno: nix::errno::Errno,
    },
}

/// How the process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessExit {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// Terminating signal number, if any.
    pub signal: Option<i32>,
}

impl ProcessExit {
    /// Whether the process was terminated by `SIGKILL`.
    pub fn was_killed(&self) -> bool {
        self.signal == Some(Signal::SIGKILL as i32)
    }
}

impl From<ExitStatus> for ProcessExit {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            signal: status.signal(),
        }
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "signal {signal}"),
            (None, None) => f.write_str("unknown status"),
        }
    }
}

type SignalRequest = (Signal, oneshot::Sender<Result<(), ProcessError>>);

/// Handle to a running managed process.
pub struct ProcessHandle {
    pid: u32,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    stdout: parking_lot::Mutex<Option<ChildStdout>>,
    signals: mpsc::UnboundedSender<SignalRequest>,
    exit: watch::Receiver<Option<ProcessExit>>,
}

impl ProcessHandle {
    /// Launch `command` (program followed by arguments) in `dir`.
    ///
    /// Stdin and stdout are piped; stderr is inherited. Must be called
    /// from within a tokio runtime.
    ///
    /// The process outlives the handle and the runtime. Only [`kill`]
    /// terminates it forcefully.
    ///
    /// [`kill`]: ProcessHandle::kill
    pub fn spawn(command: &[String], dir: &Path) -> Result<Self, ProcessError> {
        let (program, args) = command.split_first().ok_or(ProcessError::EmptyCommand)?;

        let mut child = Command::new(program)
            .args(args)
            .current_dir(dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: program.clone(),
                source,
            })?;

        let pid = child.id().unwrap_or_default();
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = watch::channel(None);

        info!("Launched `{}` (pid {}) in {:?}", program, pid, dir);
        tokio::spawn(reap(child, pid, signal_rx, exit_tx));

        Ok(Self {
            pid,
            stdin: tokio::sync::Mutex::new(stdin),
            stdout: parking_lot::Mutex::new(stdout),
            signals: signal_tx,
            exit: exit_rx,
        })
    }

    /// OS process id.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Write one console line to the process.
    pub async fn send_command(&self, line: &str) -> Result<(), ProcessError> {
        if self.has_exited() {
            return Err(ProcessError::AlreadyExited { pid: self.pid });
        }

        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or(ProcessError::StdinClosed { pid: self.pid })?;

        let written = match stdin.write_all(format!("{line}\n").as_bytes()).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };
        if let Err(source) = written {
            // A broken pipe will not recover.
            guard.take();
            return Err(ProcessError::Write {
                pid: self.pid,
                source,
            });
        }
        debug!("Sent `{}` to pid {}", line, self.pid);
        Ok(())
    }

    /// Deliver `signal` to the process.
    pub async fn signal(&self, signal: Signal) -> Result<(), ProcessError> {
        let exited = ProcessError::AlreadyExited { pid: self.pid };
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.signals.send((signal, reply_tx)).is_err() {
            return Err(exited);
        }
        reply_rx.await.unwrap_or(Err(exited))
    }

    /// Forcefully terminate the process (`SIGKILL`).
    pub async fn kill(&self) -> Result<(), ProcessError> {
        self.signal(Signal::SIGKILL).await
    }

    /// Whether the process has been reaped.
    pub fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }

    /// Wait for the process to exit. Safe to call from many tasks.
    pub async fn wait(&self) -> ProcessExit {
        let mut rx = self.exit.clone();
        // Err only if the reaper was dropped without publishing (runtime shutdown).
        rx.wait_for(Option::is_some)
            .await
            .map(|exit| exit.unwrap_or_default())
            .unwrap_or_default()
    }

    /// Take the stdout pipe. Returns `None` after the first call.
    pub fn take_stdout(&self) -> Option<ChildStdout> {
        self.stdout.lock().take()
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("exited", &self.has_exited())
            .finish()
    }
}

/// Own the child until it exits, serving signal requests meanwhile.
async fn reap(
    mut child: Child,
    pid: u32,
    mut signals: mpsc::UnboundedReceiver<SignalRequest>,
    exit_tx: watch::Sender<Option<ProcessExit>>,
) {
    let exit = loop {
        tokio::select! {
            status = child.wait() => {
                break match status {
                    Ok(status) => ProcessExit::from(status),
                    Err(e) => {
                        warn!("Failed to wait on pid {}: {}", pid, e);
                        ProcessExit::default()
                    }
                };
            }
            Some((signal, reply)) = signals.recv() => {
                let result = match child.id() {
                    Some(raw) => kill(Pid::from_raw(raw as i32), signal).map_err(|errno| {
                        ProcessError::Signal { pid, signal, errno }
                    }),
                    None => Err(ProcessError::AlreadyExited { pid }),
                };
                let _ = reply.send(result);
            }
        }
    };

    info!("Process {} exited ({})", pid, exit);
    exit_tx.send_replace(Some(exit));
}
