use std::sync::Arc;

use anyhow::Context;
use reposcan_config::Config;
use reposcan_core::channel::{RedisStreamConsumer, RedisStreamPublisher, connect_redis};
use reposcan_core::orchestration::{RepositoryService, ScanService, StaleScanReaper};
use reposcan_core::store::{Migrator, PostgresStore};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::routes::create_router;
use crate::state::AppState;

/// HTTP surface, result consumer and stale-scan reaper in one process.
///
/// Returns when `shutdown` fires or the result consumer fails; either way
/// the HTTP server is drained before returning.
pub async fn run(config: &Config, shutdown: CancellationToken) -> anyhow::Result<()> {
    let store = Arc::new(
        PostgresStore::connect(&config.database.url, config.database.max_connections)
            .await
            .context("failed to connect to PostgreSQL")?,
    );
    Migrator::new(store.pool().clone())
        .run()
        .await
        .context("database migration failed")?;

    let redis = connect_redis(&config.channel.redis_url)
        .await
        .context("failed to connect to Redis")?;
    let requests = Arc::new(RedisStreamPublisher::new(
        redis.clone(),
        &config.channel.request_topic,
        config.channel.max_len,
    ));
    let results = RedisStreamConsumer::subscribe(
        redis,
        &config.channel.result_topic,
        &config.channel.result_group,
        &config.channel.consumer_name,
        config.channel.poll_interval(),
    )
    .await
    .context("failed to subscribe to the result topic")?;

    let scans = Arc::new(ScanService::new(store.clone(), store.clone(), requests));
    let repositories = Arc::new(RepositoryService::new(store.clone()));
    let reaper = StaleScanReaper::new(
        store,
        config.reaper.interval(),
        chrono::Duration::minutes(config.reaper.max_stale_minutes),
    );

    let router = create_router(AppState {
        repositories,
        scans: scans.clone(),
    });
    let addr = config.server.bind_address();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "api listening");

    let http_shutdown = shutdown.clone();
    let http = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { http_shutdown.cancelled().await })
            .await
    });

    let consumed = scans.start(&results, reaper, &shutdown).await;
    shutdown.cancel();

    http.await.context("http server task panicked")??;
    consumed.context("result consumer stopped")
}
