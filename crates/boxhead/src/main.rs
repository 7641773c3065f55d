//! Boxhead
//!
//! Starts the enabled plugins and routes their events until interrupted.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{debug, error, info, warn};

use boxhead::boxhead_runtime::ConfigSnapshot;
use boxhead::config::{ConfigLoader, LoadOptions, expand_home};
use boxhead::logging::{self, LogFormat};
use boxhead::plugins;
use boxhead::supervisor::{Supervisor, SupervisorOptions};

/// Boxhead plugin host
#[derive(Parser, Debug)]
#[command(name = "boxhead", version)]
#[command(about = "Runs plugins and routes events between them", long_about = None)]
struct Args {
    /// Config overrides, e.g. `runtime.queue_capacity=8@@plugins.example.smile=;)`
    #[arg(short, long, default_value = "")]
    options: String,

    /// Directory holding the user's config.toml
    #[arg(short = 'd', long)]
    user_dir: Option<PathBuf>,

    /// More output; repeat for more (-v warn, -vv info, -vvv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbosity: u8,

    /// Additional config file, loaded before the user's config.toml
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log as JSON
    #[arg(long)]
    log_json: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(args))
}

async fn async_main(args: Args) -> Result<()> {
    let loaded = ConfigLoader::load(&LoadOptions {
        config_file: args.config,
        user_dir: args.user_dir,
        overrides: args.options,
    })
    .await?;
    let config = loaded.config;

    // Logging comes second because its settings live in the config
    let (format, bad_format) = if args.log_json {
        (LogFormat::Json, None)
    } else {
        match config.get_str(&["logging", "format"], "plain").parse() {
            Ok(format) => (format, None),
            Err(e) => (LogFormat::Plain, Some(e)),
        }
    };
    let log_file = config.get_str(&["logging", "file"], "");
    let log_file = (!log_file.is_empty()).then(|| expand_home(Path::new(&log_file)));
    logging::init(args.verbosity, format, log_file.as_deref())?;

    info!("Starting boxhead v{}", env!("CARGO_PKG_VERSION"));
    if let Some(e) = bad_format {
        warn!("{}, logging plain text", e);
    }
    for source in &loaded.report.sources {
        info!("Config loaded from {}", source.display());
    }
    for rejected in &loaded.report.rejected {
        warn!("{}", rejected);
    }

    let supervisor = Supervisor::new(SupervisorOptions::from_config(&config));
    let started = plugins::spawn_enabled(&supervisor, &config);
    if started.is_empty() {
        warn!("No plugins running");
    } else {
        info!("Running plugins:");
        for (name, state) in supervisor.list() {
            info!("  - {} ({})", name, state);
        }
    }
    match serde_json::to_string(&supervisor.status()) {
        Ok(status) => debug!(%status, "Plugin status"),
        Err(e) => warn!("Failed to serialize plugin status: {}", e),
    }

    let poll = config.get_duration_ms(&["runtime", "poll_interval_ms"], Duration::from_millis(100));
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = supervisor.next_event(poll) => {}
        }
    }

    info!("Shutting down plugins...");
    for (name, result) in supervisor.shutdown_all().await {
        match result {
            Ok(exit) => info!(
                plugin = %name,
                ticks = exit.stats.ticks,
                dispatched = exit.stats.dispatched,
                unroutable = exit.stats.unroutable,
                "Plugin stopped"
            ),
            Err(e) => warn!(plugin = %name, error = %e, "Plugin did not shut down cleanly"),
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
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
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down...");
        },
    }
}
