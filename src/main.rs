//! Gridstore daemon entry point.

use gridstore_lib::api::{self, ApiState};
use gridstore_lib::cli::Cli;
use gridstore_lib::core::{Config, Result};
use gridstore_lib::storage::{self, lifecycle};
use std::sync::Arc;
use std::time::Instant;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();
    init_logging(&cli);

    if let Err(err) = run(cli).await {
        tracing::error!("fatal: {}", err);
        std::process::exit(1);
    }
}

fn init_logging(cli: &Cli) {
    let level = match cli.loglevel.as_str() {
        "debug" => "debug",
        "info" => "info",
        "err" | "error" => "error",
        "fatal" | "crit" => "error",
        _ => "warn",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if cli.logdate {
        builder.init();
    } else {
        builder.without_time().init();
    }
}

async fn run(cli: Cli) -> Result<()> {
    let startup = Instant::now();
    let config = Config::load(&cli.config)?;
    storage::init(config.metrics.clone())?;
    let store = storage::get();

    // Restore happens before anything else may touch the store.
    let restore_from = storage::unix_now() - config.checkpoints.restore.as_secs() as i64;
    tracing::info!("loading checkpoints newer than {}", restore_from);
    let files = {
        let store = Arc::clone(&store);
        let dir = config.checkpoints.root_dir.clone();
        tokio::task::spawn_blocking(move || store.from_checkpoint(&dir, restore_from)).await??
    };
    tracing::info!(
        "checkpoints loaded ({} files, {} MB, took {:.1}s)",
        files,
        store.size_in_bytes() / 1024 / 1024,
        startup.elapsed().as_secs_f64()
    );

    storage::set_last_checkpoint(storage::unix_now());

    let token = CancellationToken::new();
    let tasks = vec![
        lifecycle::spawn_retention(
            Arc::clone(&store),
            token.clone(),
            config.retention_in_memory,
        ),
        lifecycle::spawn_checkpointing(
            Arc::clone(&store),
            token.clone(),
            config.checkpoints.interval,
            config.checkpoints.root_dir.clone(),
            config.checkpoints.file_format,
        ),
        lifecycle::spawn_archiving(
            token.clone(),
            config.archive.interval,
            config.checkpoints.root_dir.clone(),
            config.archive.root_dir.clone(),
            config.archive.retention(),
        ),
    ];

    // SIGUSR1 dumps the in-memory tree to stdout.
    {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            let Ok(mut usr1) = signal(SignalKind::user_defined1()) else {
                return;
            };
            while usr1.recv().await.is_some() {
                let mut out = std::io::stdout();
                if let Err(err) = store.debug_dump(&mut out, &[]) {
                    tracing::warn!("debug dump failed: {}", err);
                }
            }
        });
    }

    let state = Arc::new(ApiState::new(Arc::clone(&store), cli.dev));
    api::serve(&config.http_api.address, state, shutdown_signal()).await?;

    // Intake has stopped. Cancel the background tasks, wait for
    // in-flight passes, then write the tail of the data out. This order
    // matters: cancelling after the final checkpoint would lose it.
    tracing::info!("shutting down...");
    token.cancel();
    for task in tasks {
        let _ = task.await;
    }
    lifecycle::final_checkpoint(
        &store,
        &config.checkpoints.root_dir,
        config.checkpoints.file_format,
    );
    tracing::info!("graceful shutdown completed");
    Ok(())
}

async fn shutdown_signal() {
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(err) => {
            tracing::error!("cannot install SIGINT handler: {}", err);
            return std::future::pending::<()>().await;
        },
    };
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(err) => {
            tracing::error!("cannot install SIGTERM handler: {}", err);
            return std::future::pending::<()>().await;
        },
    };

    tokio::select! {
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
    }
}
