//! CLI entry point for ripline
//!
//! Parses command line arguments, sets up logging and either runs the
//! daemon with its console or adds a single file to the queue.

mod console;

use clap::{Parser, Subcommand, ValueEnum};
use ripline::{add_to_queue, Config, Daemon, DiscKind, InstanceLock, LockError};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

const LOG_FILE_NAME: &str = "ripline.log";

/// ripline - rip optical discs with MakeMKV and encode them with HandBrake
#[derive(Parser, Debug)]
#[command(name = "ripline")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (config.toml)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run the daemon (default)
    Run {
        /// Skip startup checks for makemkvcon and HandBrakeCLI. For testing only.
        #[arg(long, default_value = "false")]
        skip_checks: bool,

        /// Do not read commands from stdin or print events to stdout
        #[arg(long, default_value = "false")]
        no_console: bool,
    },
    /// Add a file to the encoding queue
    Add {
        /// File to encode
        file: PathBuf,

        /// Encoding profile to use
        #[arg(long, value_enum, default_value_t = KindArg::Auto)]
        kind: KindArg,

        /// Output path (default: <stem>_encoded.<ext> next to the source)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum KindArg {
    #[value(alias = "blu-ray", alias = "br")]
    Bluray,
    Dvd,
    /// Guess from the file size
    Auto,
}

impl KindArg {
    fn to_kind(self) -> Option<DiscKind> {
        match self {
            KindArg::Bluray => Some(DiscKind::BluRay),
            KindArg::Dvd => Some(DiscKind::Dvd),
            KindArg::Auto => None,
        }
    }
}

/// Take the instance lock, then start a fresh session log.
///
/// The log is truncated only once the lock is held, so a refused second
/// launch leaves the running instance's log intact.
fn open_session(state_dir: &Path) -> Result<(InstanceLock, File), LockError> {
    let lock = InstanceLock::acquire(state_dir)?;
    let file = File::create(state_dir.join(LOG_FILE_NAME))?;
    Ok((lock, file))
}

/// Log to stderr and to the session log file.
///
/// Tool output is kept out of stderr; it still reaches the file.
fn init_logging(log_file: File) -> WorkerGuard {
    let (non_blocking, guard) = tracing_appender::non_blocking(log_file);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(filter_fn(|meta| meta.target() != "ripline::tool")),
        )
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    guard
}

fn add_file(config: &Config, file: &Path, kind: KindArg, output: Option<&Path>) -> ExitCode {
    match add_to_queue(&config.resolved_state_dir(), file, kind.to_kind(), output) {
        Ok(item) => {
            println!("Added to queue:");
            println!("  Source: {}", item.source_path.display());
            println!("  Output: {}", item.dest_path.display());
            println!("  Type: {}", item.disc_kind);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error adding file to queue: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Cancel `shutdown` on Ctrl-C or SIGTERM.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                shutdown.cancel();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Interrupt received"),
            _ = term.recv() => info!("SIGTERM received"),
        }
        shutdown.cancel();
    });
}

async fn run_daemon(config: Config, skip_checks: bool, no_console: bool) -> ExitCode {
    let state_dir = config.resolved_state_dir();
    let (lock, log_file) = match open_session(&state_dir) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("Failed to start session in {}: {}", state_dir.display(), e);
            return ExitCode::FAILURE;
        }
    };
    let _guard = init_logging(log_file);
    info!(version = env!("CARGO_PKG_VERSION"), "=== ripline session started ===");

    if skip_checks {
        info!("Skipping startup checks (--skip-checks enabled)");
    }
    let daemon_result = Daemon::with_lock(config, lock, !skip_checks);
    let daemon = match daemon_result {
        Ok(daemon) => daemon,
        Err(e) => {
            error!(error = %e, "Failed to initialize daemon");
            eprintln!("Failed to initialize daemon: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    if !no_console {
        console::spawn(daemon.subscribe(), cmd_tx, daemon.queue.clone(), shutdown.clone());
    } else {
        drop(cmd_tx);
    }

    match daemon.run(cmd_rx, shutdown).await {
        Ok(()) => {
            info!("=== ripline session ended ===");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Daemon error");
            ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading config {}: {}", args.config.display(), e);
            return ExitCode::FAILURE;
        }
    };

    match args.command.unwrap_or(Cmd::Run {
        skip_checks: false,
        no_console: false,
    }) {
        Cmd::Run {
            skip_checks,
            no_console,
        } => run_daemon(config, skip_checks, no_console).await,
        Cmd::Add { file, kind, output } => add_file(&config, &file, kind, output.as_deref()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_subcommand_is_none() {
        let args = Args::try_parse_from(["ripline"]).unwrap();
        assert_eq!(args.config, PathBuf::from("config.toml"));
        assert!(args.command.is_none());
    }

    #[test]
    fn test_add_parses_kind_aliases() {
        let args = Args::try_parse_from(["ripline", "add", "a.mkv", "--kind", "blu-ray"]).unwrap();
        match args.command {
            Some(Cmd::Add { kind, output, .. }) => {
                assert_eq!(kind, KindArg::Bluray);
                assert_eq!(output, None);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(Args::try_parse_from(["ripline", "add", "a.mkv", "--kind", "vhs"]).is_err());
    }

    #[test]
    fn test_refused_session_keeps_running_log() {
        let dir = tempfile::TempDir::new().unwrap();
        let (_lock, mut log) = open_session(dir.path()).unwrap();
        std::io::Write::write_all(&mut log, b"first session\n").unwrap();

        match open_session(dir.path()) {
            Err(LockError::Held(pid)) => assert_eq!(pid, std::process::id()),
            other => panic!("expected Held, got {:?}", other.map(|_| ())),
        }
        let contents = std::fs::read_to_string(dir.path().join(LOG_FILE_NAME)).unwrap();
        assert_eq!(contents, "first session\n");
    }

    #[test]
    fn test_new_session_truncates_previous_log() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join(LOG_FILE_NAME), "old session\n").unwrap();

        let (_lock, _log) = open_session(dir.path()).unwrap();
        let contents = std::fs::read_to_string(dir.path().join(LOG_FILE_NAME)).unwrap();
        assert!(contents.is_empty());
    }

    #[test]
    fn test_kind_arg_mapping() {
        assert_eq!(KindArg::Auto.to_kind(), None);
        assert_eq!(KindArg::Dvd.to_kind(), Some(DiscKind::Dvd));
        assert_eq!(KindArg::Bluray.to_kind(), Some(DiscKind::BluRay));
    }
}
