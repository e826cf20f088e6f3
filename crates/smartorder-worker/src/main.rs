use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::future::join_all;
use smartorder_platform::{PgCatalogSource, PgOrderRepository, RedisQueue, ServiceConfig, connect_database};
use smartorder_worker::health::{self, HealthState};
use smartorder_worker::{AppContext, QueueMetrics, WorkerPool, WorkerSettings};
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "smartorder_worker=info".to_string()))
        .init();

    let config = ServiceConfig::from_env()?;
    let db = connect_database(&config.database_url, 10).await?;
    let queue = Arc::new(RedisQueue::connect(
        &config.redis_url,
        &config.queue.queue_key,
        &config.queue.dead_letter_key,
    )?);

    let context = AppContext::new(
        &config,
        Arc::new(PgOrderRepository::new(db.clone())),
        Arc::new(PgCatalogSource::new(db.clone())),
    )?;
    if let Err(err) = context.catalog.get_catalog(true).await {
        warn!("catalog warm-up failed, will retry on first message: {err}");
    }

    let metrics = Arc::new(QueueMetrics::new());
    let settings = WorkerSettings::from(&config.queue);
    let workers = settings.concurrency;
    let pool = Arc::new(WorkerPool::new(
        queue.clone(),
        queue.clone(),
        Arc::new(context.processor()),
        metrics.clone(),
        settings,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = pool.spawn(shutdown_rx.clone());
    info!(workers, queue = %config.queue.queue_key, "order worker started");

    let health_state = HealthState {
        queue,
        metrics,
        shutdown: shutdown_rx,
        workers,
    };
    let health_addr = config.health_addr.clone();
    let health_task = tokio::spawn(async move { health::serve(&health_addr, health_state).await });

    shutdown_signal().await.context("failed to listen for shutdown signal")?;
    info!("shutdown requested, waiting for in-flight messages");
    shutdown_tx.send_replace(true);

    for result in join_all(handles).await {
        if let Err(err) = result {
            error!("worker task failed: {err}");
        }
    }
    match health_task.await {
        Ok(Err(err)) => error!("health server failed: {err:#}"),
        Err(err) => error!("health server task failed: {err}"),
        Ok(Ok(())) => {}
    }
    db.close().await;

    info!("order worker stopped");
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
