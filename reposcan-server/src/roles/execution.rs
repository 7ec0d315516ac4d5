use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reposcan_config::Config;
use reposcan_core::channel::{
    RedisStreamConsumer, RedisStreamPublisher, connect_redis, run_consume_loop,
};
use reposcan_core::inspect::{EngineConfig, FetchInspectEngine};
use reposcan_core::orchestration::{ScanDispatcher, ScanJobHandler};
use reposcan_core::queue::{
    JobQueue, PostgresJobQueue, RetryConfig, WorkerPool, WorkerPoolConfig,
};
use reposcan_core::store::{Migrator, PostgresStore};
use reposcan_model::SCAN_SOURCE_CODE_JOB;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Dispatcher and worker pool in one process.
pub async fn run(config: &Config, shutdown: CancellationToken) -> anyhow::Result<()> {
    let store = PostgresStore::connect(&config.database.url, config.database.max_connections)
        .await
        .context("failed to connect to PostgreSQL")?;
    Migrator::new(store.pool().clone())
        .run()
        .await
        .context("database migration failed")?;

    let retry = RetryConfig {
        max_attempts: config.queue.max_attempts,
        backoff_base_ms: config.queue.backoff_base_ms,
        backoff_max_ms: config.queue.backoff_max_ms,
        ..RetryConfig::default()
    };
    let queue: Arc<dyn JobQueue> =
        Arc::new(PostgresJobQueue::new(store.pool().clone(), retry));

    let redis = connect_redis(&config.channel.redis_url)
        .await
        .context("failed to connect to Redis")?;
    let results = Arc::new(RedisStreamPublisher::new(
        redis.clone(),
        &config.channel.result_topic,
        config.channel.max_len,
    ));
    let requests = RedisStreamConsumer::subscribe(
        redis,
        &config.channel.request_topic,
        &config.channel.request_group,
        &config.channel.consumer_name,
        config.channel.poll_interval(),
    )
    .await
    .context("failed to subscribe to the request topic")?;

    tokio::fs::create_dir_all(&config.inspect.working_dir)
        .await
        .with_context(|| {
            format!(
                "failed to create working directory {}",
                config.inspect.working_dir.display()
            )
        })?;
    let engine = Arc::new(
        FetchInspectEngine::new(EngineConfig {
            working_dir: config.inspect.working_dir.clone(),
            archive_base_url: config.inspect.archive_base_url.clone(),
            http_timeout: config.inspect.http_timeout(),
            user_agent: config.inspect.user_agent.clone(),
            github_token: config.inspect.github_token.clone(),
        })
        .context("failed to build inspect engine")?,
    );

    let mut pool = WorkerPool::new(
        WorkerPoolConfig {
            queue: config.queue.name.clone(),
            concurrency: config.queue.concurrency,
            lease_ttl: chrono::Duration::seconds(config.queue.lease_ttl_secs),
            poll_interval: Duration::from_millis(config.queue.poll_interval_ms),
            housekeeping_interval: Duration::from_secs(
                config.queue.housekeeping_interval_secs,
            ),
            worker_group: config.channel.consumer_name.clone(),
        },
        queue.clone(),
    );
    pool.register(
        SCAN_SOURCE_CODE_JOB,
        Arc::new(ScanJobHandler::new(engine, results)),
    );
    pool.start().await;

    let dispatcher = ScanDispatcher::new(queue, config.queue.name.clone());
    info!(
        topic = %config.channel.request_topic,
        queue = %config.queue.name,
        "dispatching scan requests"
    );
    let consumed = run_consume_loop(&requests, &dispatcher, &shutdown).await;
    if let Err(e) = &consumed {
        error!(error = %e, "request consumer stopped");
    }

    pool.shutdown().await;
    consumed.context("request consumer stopped")
}
