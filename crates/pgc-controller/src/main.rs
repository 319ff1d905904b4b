//! pgc-controller entry point.
//!
//! This file is intentionally thin: it parses flags, loads layered config,
//! sets up tracing, wires the live transport and gateway factory into the
//! driver, and maps the driver's exit onto a process exit code. All control
//! logic lives in `pgc-watch` and `pgc-reconcile`.

use clap::Parser;
use pgc_db::pg::PgGatewayFactory;
use pgc_reconcile::Reconciler;
use pgc_source_http::HttpWatchSource;
use pgc_watch::{Driver, DriverExit};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

/// Startup/config failure (unparseable config, missing secret, bad endpoint).
const EXIT_STARTUP: u8 = 1;
/// The watch source rejected our credentials.
const EXIT_UNAUTHORIZED: u8 = 2;
/// The watched resource type is not registered at the source.
const EXIT_NOT_REGISTERED: u8 = 3;

#[derive(Parser)]
#[command(name = "pgc-controller")]
#[command(about = "PostgreSQL claim controller", long_about = None)]
struct Args {
    /// Config paths in merge order (base -> overlay -> ...)
    #[arg(long = "config", required = true)]
    config_paths: Vec<String>,

    /// Log level when RUST_LOG is unset; falls back to the config file's
    /// `log_level`, then "info".
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Dev convenience; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    let args = Args::parse();
    let paths: Vec<&str> = args.config_paths.iter().map(String::as_str).collect();

    let loaded = match pgc_config::load_layered_yaml(&paths) {
        Ok(loaded) => loaded,
        Err(err) => {
            eprintln!("pgc-controller startup failed: {err:#}");
            return ExitCode::from(EXIT_STARTUP);
        }
    };
    let config = loaded.config;

    init_tracing(args.log_level.as_deref().unwrap_or(&config.log_level));

    info!(
        config_hash = %loaded.config_hash,
        instances = config.instances.len(),
        watch_url = %format!("{}{}", config.watch.base_url, config.watch.resource_path),
        "pgc-controller initializing"
    );
    if !config.instances.contains_key(pgc_config::DEFAULT_INSTANCE_ID) {
        warn!(
            "no '{}' instance configured; claims without dbInstanceId will be dropped",
            pgc_config::DEFAULT_INSTANCE_ID
        );
    }

    let source = match HttpWatchSource::new(&config.watch) {
        Ok(source) => source,
        Err(err) => {
            error!(error = %format!("{err:#}"), "failed to build watch transport");
            return ExitCode::from(EXIT_STARTUP);
        }
    };

    let mut reconciler = Reconciler::new(config.resolver(), Arc::new(PgGatewayFactory));
    let mut driver = Driver::new(source);

    match driver.run(&mut reconciler, shutdown_signal()).await {
        DriverExit::Shutdown => {
            info!("pgc-controller shut down cleanly");
            ExitCode::SUCCESS
        }
        DriverExit::Unauthorized(msg) => {
            error!(detail = %msg, "stopping: watch unauthorized");
            ExitCode::from(EXIT_UNAUTHORIZED)
        }
        DriverExit::NotRegistered(msg) => {
            error!(detail = %msg, "stopping: claim resource type not registered");
            ExitCode::from(EXIT_NOT_REGISTERED)
        }
    }
}

fn init_tracing(fallback_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback_level.into()),
        )
        .init();
}

/// Resolves on ctrl-c or SIGTERM. The driver observes this between events,
/// never mid-event, so an in-flight reconcile pass completes first.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
