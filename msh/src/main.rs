//! # msh Supervisor Binary
//!
//! Keeps an expensive server offline until it is needed and shuts it down
//! again once it has been empty for the idle timeout.
//!
//! The connection-facing proxy is a separate component; this binary
//! exposes the same signals as operator commands on stdin:
//!
//! | Command        | Effect                                              |
//! |----------------|-----------------------------------------------------|
//! | `start`        | launch the server                                   |
//! | `stop`         | issue the stop command now (no occupancy check)     |
//! | `join`         | count one connected user                            |
//! | `leave`        | uncount one user and file a stop request            |
//! | `request-stop` | file a stop request                                 |
//! | `status`       | print status, pid and pending stop requests         |
//! | `quit`         | stop the server if running and exit                 |
//!
//! # Usage
//!
//! ```bash
//! msh --config msh.toml --autostart
//! msh --config msh.toml -v --json
//! ```

use clap::Parser;
use msh::{ConnectionTally, ServerController};
use msh_common::config::MshConfig;
use msh_common::consts::DEFAULT_CONFIG_PATH;
use msh_common::lifecycle::ServerStatus;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Extra time allowed on exit beyond grace period and flush wait.
const SHUTDOWN_MARGIN: Duration = Duration::from_secs(5);

/// msh - start-on-demand server supervisor
#[derive(Parser, Debug)]
#[command(name = "msh")]
#[command(version)]
#[command(about = "Start-on-demand supervisor for an expensive long-running server")]
#[command(long_about = None)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Start the server immediately.
    #[arg(long)]
    autostart: bool,

    /// Enable verbose logging (overrides the configured level)
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("msh failed: {}", e);
        eprintln!("msh: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = MshConfig::load_validated(&args.config)?;

    setup_tracing(&args, &config);
    info!(
        "{} v{} starting (config {:?})",
        config.shared.service_name,
        env!("CARGO_PKG_VERSION"),
        args.config
    );

    let tally = Arc::new(ConnectionTally::new());
    let controller = ServerController::new(&config, tally.clone());

    if args.autostart {
        controller.start()?;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        if !handle_command(line.trim(), &controller, &tally).await {
                            break;
                        }
                    }
                    None => {
                        info!("stdin closed");
                        break;
                    }
                }
            }
            result = signal::ctrl_c() => {
                match result {
                    Ok(()) => info!("Received shutdown signal (Ctrl+C)"),
                    Err(err) => error!("Unable to listen for shutdown signal: {}", err),
                }
                break;
            }
        }
    }

    let limit = config.stop.grace_period() + config.stop.flush_wait() + SHUTDOWN_MARGIN;
    tokio::select! {
        offline = controller.shutdown(limit) => {
            if offline {
                info!("msh shutdown complete");
            }
        }
        _ = signal::ctrl_c() => {
            warn!("Second shutdown signal, exiting while server is {}", controller.status());
        }
    }
    Ok(())
}

/// Execute one operator command. Returns `false` to exit.
async fn handle_command(
    command: &str,
    controller: &ServerController,
    tally: &ConnectionTally,
) -> bool {
    match command {
        "" => {}
        "start" => match controller.start() {
            Ok(()) => {}
            Err(e) => warn!("start: {}", e),
        },
        "stop" => match controller.stop(false).await {
            Ok(()) => {}
            Err(e) if e.is_benign() => info!("stop: {}", e),
            Err(e) => error!("stop: {}", e),
        },
        "join" => {
            let players = tally.connect();
            info!("{} connected", players);
            if controller.status() == ServerStatus::Offline
                && let Err(e) = controller.start()
            {
                warn!("start: {}", e);
            }
        }
        "leave" => {
            let players = tally.disconnect();
            info!("{} connected", players);
            controller.request_stop();
        }
        "request-stop" => controller.request_stop(),
        "status" => println!(
            "status: {}, pid: {}, players: {}, pending stop requests: {}",
            controller.status(),
            controller
                .pid()
                .map_or_else(|| "-".to_string(), |pid| pid.to_string()),
            tally.connected(),
            controller.pending_stop_requests()
        ),
        "quit" | "exit" => return false,
        other => warn!("Unknown command `{}`", other),
    }
    true
}

/// Setup tracing subscriber from configuration and CLI arguments.
fn setup_tracing(args: &Args, config: &MshConfig) {
    let level = if args.verbose {
        "debug"
    } else {
        config.shared.log_level.as_str()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}
