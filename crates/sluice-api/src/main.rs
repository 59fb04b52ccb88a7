//! `sluice` binary entrypoint: API surface and worker loops in one
//! process, sharing one bounded connection pool.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use sluice_api::config::Config;
use sluice_api::server::{self, AppState};
use sluice_core::observability::{init_logging, LogFormat};
use sluice_core::ports::EngineStore;
use sluice_engine::{
    run_stuck_sweeper, ActionDispatcher, EventBroadcaster, RuleEngine, Worker,
};
use sluice_store::EventStore;

fn choose_log_format(config: &Config) -> LogFormat {
    if config.debug {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_logging(choose_log_format(&config));

    let pool = sluice_store::connect(&config.database_url, config.max_connections).await?;
    sluice_store::migrate(&pool).await?;
    sluice_store::ping(&pool).await?;
    tracing::info!(max_connections = config.max_connections, "store connected");

    let broadcaster = EventBroadcaster::new();
    let engine_store: Arc<dyn EngineStore> = Arc::new(EventStore::new(pool.clone()));
    let dispatcher = ActionDispatcher::new(config.webhook_timeout(), config.email_mode);
    let engine = Arc::new(RuleEngine::new(
        Arc::clone(&engine_store),
        dispatcher,
        broadcaster.clone(),
    ));

    let shutdown = CancellationToken::new();
    let mut background = tokio::task::JoinSet::new();

    for id in 0..config.worker_count {
        let worker = Worker::new(
            id,
            Arc::clone(&engine_store),
            Arc::clone(&engine),
            broadcaster.clone(),
            config.worker_config(),
            shutdown.clone(),
        );
        background.spawn(worker.run());
    }

    if config.stuck_sweep_interval_secs > 0 {
        background.spawn(run_stuck_sweeper(
            Arc::clone(&engine_store),
            broadcaster.clone(),
            Duration::from_secs(config.stuck_sweep_interval_secs),
            config.stuck_threshold_secs,
            shutdown.clone(),
        ));
    }

    let state = Arc::new(AppState::new(
        config.clone(),
        pool.clone(),
        broadcaster.clone(),
    ));
    let router = server::router(state);

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown signal received");
        signal_token.cancel();
    });

    server::serve(router, config.http_port, shutdown.clone()).await?;

    // The HTTP server is down; stop the loops and drain outstanding
    // work before closing the pool.
    shutdown.cancel();
    while background.join_next().await.is_some() {}
    pool.close().await;
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
