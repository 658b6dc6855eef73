// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
use anyhow::Context;
use clap::Parser;
use mpl_daemon::{bootstrap, build_app};
use mpl_fs::RuntimePaths;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mpl-daemon", version, about = "Mediaplane orchestrator daemon")]
struct Args {
    /// Bind address.
    #[arg(long, default_value = "127.0.0.1:8787")]
    bind: String,

    /// Runtime directory root (assets/cache/logs live underneath).
    /// Defaults to ORCH_RUNTIME_DIR or ./runtime.
    #[arg(long)]
    runtime_dir: Option<PathBuf>,

    /// Replace the default providers with deterministic mocks (offline runs).
    #[arg(long)]
    mock_providers: bool,

    /// Enable request/response debug logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("mpl=debug,mpl_daemon=debug,mpl_scheduler=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mpl=info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Configuration errors exit with 2; runtime errors with 1.
    let paths = match resolve_paths(args.runtime_dir.clone()) {
        Ok(paths) => paths,
        Err(e) => {
            eprintln!("configuration error: {e:#}");
            return ExitCode::from(2);
        }
    };
    let listener = match tokio::net::TcpListener::bind(&args.bind).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("configuration error: cannot bind {}: {e}", args.bind);
            return ExitCode::from(2);
        }
    };

    let (state, worker) = bootstrap(paths, args.mock_providers);
    let app = build_app(state);

    info!(bind = %args.bind, mock_providers = args.mock_providers, "mpl-daemon listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve");
    worker.abort();

    match served {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn resolve_paths(runtime_dir: Option<PathBuf>) -> anyhow::Result<RuntimePaths> {
    match runtime_dir {
        Some(root) => RuntimePaths::with_root(root),
        None => RuntimePaths::resolve(),
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
}
