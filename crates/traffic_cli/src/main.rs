//! Traffic Replay CLI
//!
//! Replays a captured HTTP traffic log against a target host.
//!
//! # Usage
//!
//! ```text
//! traffic-replay -f traffic.log -h staging.local -p 8080 -m -k sid
//! traffic-replay -c replay.json
//! traffic-replay -f traffic.log -h staging.local -v
//! ```

mod commands;
mod config;

use clap::{ArgAction, Parser};
use config::FileConfig;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Replays captured HTTP traffic with its original timing.
#[derive(Parser, Debug)]
#[command(name = "traffic-replay")]
#[command(author, version, about, long_about = None, disable_help_flag = true)]
struct Cli {
    /// Path to the traffic log
    #[arg(short = 'f', long = "filepath")]
    filepath: Option<PathBuf>,

    /// Host to replay against
    #[arg(short = 'h', long)]
    host: Option<String>,

    /// Port to replay against [default: 80]
    #[arg(short, long)]
    port: Option<u16>,

    /// Translate session cookies to the ids issued during replay
    #[arg(short, long)]
    mutate: bool,

    /// Cookie carrying the session id [default: sid]
    #[arg(short = 'k', long = "sessionkey")]
    session_key: Option<String>,

    /// Enable debug output
    #[arg(short, long)]
    debug: bool,

    /// JSON config file; its values win over flags
    #[arg(short, long = "configfile")]
    config_file: Option<PathBuf>,

    /// Skip everything recorded before this offset (ms)
    #[arg(short = 'w', long)]
    fastforward: Option<u64>,

    /// Only check the log, send nothing
    #[arg(short, long)]
    validate: bool,

    /// Records decoded ahead of the schedule [default: 20]
    #[arg(short, long)]
    queue_size: Option<usize>,

    /// Start the replay at this time (ms since the Unix epoch)
    #[arg(long)]
    start_time: Option<u64>,

    /// Print help
    #[arg(long, action = ArgAction::Help)]
    help: Option<bool>,
}

impl Cli {
    fn into_file_config(self) -> FileConfig {
        FileConfig {
            path: self.filepath,
            host: self.host,
            port: self.port,
            mutate_session: self.mutate.then_some(true),
            session_key: self.session_key,
            debug: self.debug.then_some(true),
            processors: None,
            fastforward: self.fastforward,
            validate: self.validate.then_some(true),
            queue_size: self.queue_size,
            start_time: self.start_time,
            connect_timeout_ms: None,
            response_timeout_ms: None,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config_file = cli.config_file.clone();
    let flags = cli.into_file_config();
    let settings = match config_file {
        Some(path) => match FileConfig::load(&path) {
            Ok(file) => file.or(flags),
            Err(e) => {
                eprintln!("error: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => flags,
    };

    // Initialize logging
    let level = if settings.debug() { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match settings.into_replay_config() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let outcome = if config.validate {
        commands::validate::run(config).await
    } else {
        commands::replay::run(config).await.map(|_| true)
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %e, "replay aborted");
            ExitCode::FAILURE
        }
    }
}
