//! warden CLI entry point.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use warden::commands;

#[derive(Parser)]
#[command(name = "warden")]
#[command(
    version,
    about = "Supervise an external daemon: relaunch it when it dies or logs a known fault",
    after_help = "EXAMPLES:
    warden check                       # Validate ~/.warden/warden.toml
    warden --config agent.toml run     # Supervise until SIGINT/SIGTERM
    warden launch                      # Start once with env overrides, then exit
    warden probe && echo alive
    warden scan --window 300"
)]
struct Cli {
    /// Configuration file (default: ~/.warden/warden.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the supervisor loop until SIGINT or SIGTERM
    Run,

    /// Launch the process once and record its pid
    Launch {
        /// Stop a running instance and launch again instead of refusing
        #[arg(long)]
        force: bool,
    },

    /// Probe liveness once (exit code 0 when running)
    Probe,

    /// Scan the log for the fault signature once (exit code 1 when found)
    Scan {
        /// Look back this many seconds instead of fault.window_secs
        #[arg(long)]
        window: Option<u64>,
    },

    /// Show the recorded pid and whether it is alive
    Status {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Validate the configuration
    Check,
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry.with(fmt::layer().with_writer(std::io::stderr)).init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    let config = cli.config.as_deref();
    let result = match cli.command {
        Commands::Run => commands::run::execute(config).await.map(|()| ExitCode::SUCCESS),
        Commands::Launch { force } => commands::launch::execute(config, force)
            .await
            .map(|()| ExitCode::SUCCESS),
        Commands::Probe => commands::probe::execute(config).await,
        Commands::Scan { window } => commands::scan::execute(config, window).await,
        Commands::Status { json } => commands::status::execute(config, json)
            .await
            .map(|()| ExitCode::SUCCESS),
        Commands::Check => commands::check::execute(config).map(|()| ExitCode::SUCCESS),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(2)
        },
    }
}
