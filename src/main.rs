//! Battle Recorder - ingests battle chat logs into classified,
//! owner-attributed match records.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use battle_recorder::commands::{self, CommandError};
use battle_recorder::config::{ConfigLoader, RecorderConfig};

#[derive(Parser)]
#[command(
    name = "battle-recorder",
    about = "Record battle chat logs as classified, owner-attributed events",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Config file (defaults to ./battle-recorder.toml, then the user config dir).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Data directory for the database and fallback live log.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Overrides for where the watcher reads from.
#[derive(Args, Debug, Default)]
struct SourceArgs {
    /// Tail this log file.
    #[arg(long)]
    log_path: Option<PathBuf>,
    /// Follow the newest .txt log in this directory.
    #[arg(long)]
    log_dir: Option<PathBuf>,
    /// Poll interval in milliseconds.
    #[arg(long)]
    poll_ms: Option<u64>,
    /// Also import replay URLs queued in this file.
    #[arg(long)]
    replay_file: Option<PathBuf>,
    /// Watch only the replay queue, not a chat log.
    #[arg(long)]
    replays: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API.
    Serve {
        /// Host address to bind to.
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on.
        #[arg(short, long)]
        port: Option<u16>,
        /// Also tail the configured log in-process.
        #[arg(long)]
        watch: bool,
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Tail a log and push new lines to a running server.
    Watch {
        /// Ingestion endpoint to post lines to.
        #[arg(long)]
        api_url: Option<String>,
        /// Replay import endpoint to post queued URLs to.
        #[arg(long)]
        replay_api_url: Option<String>,
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Ingest a saved log file, or a replay URL with --replay.
    Import {
        /// Log file path, or replay URL with --replay.
        input: String,
        /// Treat the input as a replay URL.
        #[arg(long)]
        replay: bool,
        /// Append to this stream instead of a fresh one.
        #[arg(long)]
        stream: Option<String>,
        /// Leave the last match open.
        #[arg(long)]
        keep_open: bool,
    },
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

fn load_config(cli: &Cli) -> Result<RecorderConfig, CommandError> {
    let loader = cli
        .config
        .clone()
        .map_or_else(ConfigLoader::new, ConfigLoader::with_path);
    let mut config = loader.load()?;
    config.apply_env();
    if let Some(dir) = &cli.data_dir {
        config.store.data_dir = Some(dir.clone());
    }
    Ok(config)
}

fn apply_source_args(config: &mut RecorderConfig, args: SourceArgs) {
    if let Some(path) = args.log_path {
        config.watcher.log_path = Some(path);
    }
    if let Some(dir) = args.log_dir {
        config.watcher.log_dir = Some(dir);
    }
    if let Some(ms) = args.poll_ms {
        config.watcher.poll_interval_ms = ms;
    }
    if let Some(path) = args.replay_file {
        config.watcher.replay_file = Some(path);
    }
    if args.replays {
        config.watcher.replay_mode = true;
    }
}

fn shutdown_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl-C, shutting down");
        }
        token.cancel();
    });
    cancel
}

async fn run(cli: Cli) -> Result<(), CommandError> {
    let mut config = load_config(&cli)?;

    match cli.command {
        Commands::Serve {
            host,
            port,
            watch,
            source,
        } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            apply_source_args(&mut config, source);
            commands::serve(config, watch, shutdown_on_ctrl_c()).await
        }
        Commands::Watch {
            api_url,
            replay_api_url,
            source,
        } => {
            if let Some(url) = api_url {
                config.watcher.api_url = url;
            }
            if let Some(url) = replay_api_url {
                config.watcher.replay_api_url = url;
            }
            apply_source_args(&mut config, source);
            commands::watch(config, shutdown_on_ctrl_c()).await
        }
        Commands::Import {
            input,
            replay,
            stream,
            keep_open,
        } => {
            let report = if replay {
                commands::import_replay(&config, &input).await?
            } else {
                commands::import_file(&config, Path::new(&input), stream.as_deref(), keep_open)
                    .await?
            };
            tracing::info!(
                stream = %report.stream,
                accepted = report.accepted,
                duplicates = report.duplicates,
                matches = report.matches.len(),
                "Import finished"
            );
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            ExitCode::FAILURE
        }
    }
}
