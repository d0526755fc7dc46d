use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use print_api::config::Config;
use std::str::FromStr;
use tracing_subscriber::{fmt::format::FmtSpan, FmtSubscriber};

/// Serve the print-api server.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "print-api")]
struct Cli {
    /// verbosity of logging output [trace, debug, info, warn, error]
    #[arg(long, short, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve HTTP requests: accept model uploads, slice them, and
    /// estimate print cost.
    Serve {
        /// `host:port` to bind to on the host system.
        #[arg(long, short, default_value = "127.0.0.1:8080")]
        bind: String,
    },
}

/// Resolve once the process has been asked to stop, returning the name
/// of the signal that asked.
#[cfg(unix)]
async fn shutdown_requested() -> Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;

    Ok(tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
    })
}

#[cfg(not(unix))]
async fn shutdown_requested() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .context("installing Ctrl+C handler")?;
    Ok("Ctrl+C")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tokio::spawn(async {
        match shutdown_requested().await {
            Ok(signal) => {
                tracing::info!(signal, "shutdown requested, exiting");
                std::process::exit(0);
            }
            // Without handlers the default signal disposition still
            // terminates the process; we only lose the log line.
            Err(e) => tracing::error!(error = %e, "failed to install signal handlers"),
        }
    });

    let subscriber = FmtSubscriber::builder()
        .with_writer(std::io::stderr)
        .with_max_level(
            tracing::Level::from_str(&cli.log_level)
                .map_err(|_| anyhow::anyhow!("invalid log level: {}", cli.log_level))?,
        )
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let config = Config::from_env()?;

    match cli.command {
        Commands::Serve { ref bind } => print_api::server::serve(config, bind).await,
    }
}
