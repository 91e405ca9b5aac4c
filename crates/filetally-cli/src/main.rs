//! filetally: search a handful of files for interactively entered tokens.
//!
//! Run with: filetally [--mode task|process] <FILES>...

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use filetally::{
    Controller, ControllerConfig, ControllerError, DEFAULT_PROMPT, LoopExit, MAX_WORKERS,
    ProcessSpawner, TaskSpawner, WorkerError, WorkerSpawner,
};
use tokio::io::BufReader;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Subcommand a worker process is started with in process mode.
const WORKER_SUBCOMMAND: &str = "__worker";

#[derive(Parser)]
#[command(
    name = "filetally",
    version,
    about = "Count occurrences of interactively entered tokens across files",
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Files to search, one worker each
    files: Vec<PathBuf>,

    /// How workers are run
    #[arg(long, value_enum, default_value_t = Mode::Task)]
    mode: Mode,

    /// Maximum number of files accepted (cannot exceed the built-in cap)
    #[arg(long, default_value_t = MAX_WORKERS)]
    max_files: usize,

    /// Milliseconds to wait after terminating workers
    #[arg(long, default_value_t = 1000)]
    grace_ms: u64,
}

#[derive(Subcommand)]
enum Command {
    /// Serve queries for one file over stdin/stdout
    #[command(name = "__worker", hide = true)]
    Worker {
        #[arg(long)]
        file: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    /// Workers are tasks inside this process
    Task,
    /// Workers are child processes of this binary
    Process,
}

fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match std::env::var("FILETALLY_LOG").as_deref() {
            Ok("debug") => "debug",
            Ok("info") => "info",
            Ok("error") => "error",
            _ => "warn",
        };
        EnvFilter::new(format!("filetally={level}"))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

/// Completes on Ctrl+C, or SIGTERM on unix.
///
/// If a handler cannot be installed that source is logged and ignored.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, shutting down...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down...");
        }
    }
}

async fn run_worker_process(file: PathBuf) -> ExitCode {
    let err = filetally::run_stdio_worker(file).await;
    match err {
        WorkerError::Disconnected => tracing::debug!("Controller closed the channel"),
        ref e => tracing::error!(error = %e, "Worker process failed"),
    }
    ExitCode::from(err.exit_code())
}

async fn run_controller(cli: Cli) -> anyhow::Result<ExitCode> {
    let spawner: Arc<dyn WorkerSpawner> = match cli.mode {
        Mode::Task => Arc::new(TaskSpawner::new()),
        Mode::Process => Arc::new(
            ProcessSpawner::current_exe()
                .context("failed to locate the filetally executable")?
                .with_args([WORKER_SUBCOMMAND, "--file"]),
        ),
    };

    let mut config = ControllerConfig::default()
        .with_max_workers(cli.max_files)
        .with_shutdown_grace(Duration::from_millis(cli.grace_ms))
        .with_spawner(spawner);
    if std::io::stdin().is_terminal() {
        config = config.with_prompt(DEFAULT_PROMPT);
    }

    let mut controller = Controller::new(config);
    match controller.spawn(&cli.files) {
        Ok(()) => {}
        // File-list problems are usage help, printed with the normal output.
        Err(e @ ControllerError::Startup(_)) => {
            println!("{e}");
            return Ok(ExitCode::from(e.exit_code()));
        }
        Err(e) => {
            eprintln!("Error: {e}");
            return Ok(ExitCode::from(e.exit_code()));
        }
    }

    let input = BufReader::new(tokio::io::stdin());
    let mut out = std::io::stdout();
    let outcome = controller
        .run_query_loop(input, &mut out, shutdown_signal())
        .await;

    let mut status = ExitCode::SUCCESS;
    let interrupted = match outcome {
        Ok(LoopExit::Interrupted) => {
            println!("\nInterrupt received.");
            true
        }
        Ok(LoopExit::EndOfInput) => false,
        Err(e) => {
            eprintln!("Error: {e}");
            status = ExitCode::from(e.exit_code());
            false
        }
    };

    // Every exit path goes through shutdown so no worker outlives the controller.
    if let Err(e) = controller.shutdown(&mut out).await {
        eprintln!("Error: {e}");
        return Ok(ExitCode::from(e.exit_code()));
    }

    if interrupted {
        println!("Program will now exit.");
    }
    Ok(status)
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    let status = match cli.command {
        Some(Command::Worker { file }) => Ok(runtime.block_on(run_worker_process(file))),
        None => runtime.block_on(run_controller(cli)),
    };

    // A blocking stdin read cannot be cancelled; don't wait for it.
    runtime.shutdown_background();
    status
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli) {
        Ok(status) => status,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
