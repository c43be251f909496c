//! piper-speak-rs: HTTP text-to-speech service around the Piper binary.

mod api;
mod artifacts;
mod config;
mod effects;
mod error;
mod synth;
#[cfg(test)]
mod testutil;

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "piper-speak-rs", about = "Text-to-speech HTTP service backed by Piper")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind (overrides server.host)
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides server.port)
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // RUST_LOG wins over --verbose
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if args.verbose {
            EnvFilter::new("debug,hyper=info")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("piper-speak-rs starting");

    let mut config = config::Config::load(args.config.as_deref());
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.validate()?;
    info!(
        "Effects: rate={} (x{}), pitch={} (x{}, gain {})",
        config.effects.rate.enabled,
        config.effects.rate.speed_factor,
        config.effects.pitch.enabled,
        config.effects.pitch.pitch_factor,
        config.effects.pitch.gain
    );

    std::fs::create_dir_all(&config.artifacts.output_dir)?;

    let state = api::AppState::new(&config);
    state.synthesizer.check();

    let sweeper = (config.artifacts.sweep_interval_secs > 0).then(|| {
        artifacts::start_sweeper(
            config.artifacts.output_dir.clone(),
            Duration::from_secs(config.artifacts.retain_secs),
            Duration::from_secs(config.artifacts.sweep_interval_secs),
        )
    });

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    api::serve(listener, state, shutdown_signal()).await?;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    info!("piper-speak-rs stopped");
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
