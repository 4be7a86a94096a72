//! zerowire main entry point
//!
//! Handles CLI parsing, logging setup, and supervisor startup.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use zerowire::{
    config::{Config, DEFAULT_CONFIG_PATH},
    supervisor, APP_NAME, VERSION, ZeroWireError,
};

/// Zeroconf WireGuard mesh daemon
#[derive(Parser, Debug)]
#[command(name = APP_NAME, version = VERSION, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Logging level
    #[arg(short, long, value_enum, default_value = "info")]
    level: LogLevel,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum LogLevel {
    Critical,
    Error,
    Warning,
    Info,
    Debug,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Critical | LogLevel::Error => "error",
            LogLevel::Warning => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_logging(cli.level);

    info!("Starting {} v{}", APP_NAME, VERSION);

    if let Err(e) = run(cli).await {
        error!("Error: {:#}", e);
        let code = e
            .downcast_ref::<ZeroWireError>()
            .map(ZeroWireError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

/// Load the configuration and run the supervisor
async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(&cli.config)?;
    supervisor::run(config).await?;
    Ok(())
}

/// Initialize structured logging with tracing
fn init_logging(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.directive()));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
