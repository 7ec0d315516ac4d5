//! Process roles selectable from the command line.

pub mod api;
pub mod execution;

use anyhow::Context;
use reposcan_config::Config;
use reposcan_core::store::{Migrator, PostgresStore};
use tracing::info;

/// Apply pending migrations and exit.
pub async fn migrate(config: &Config) -> anyhow::Result<()> {
    let store = PostgresStore::connect(&config.database.url, 1)
        .await
        .context("failed to connect to PostgreSQL")?;
    Migrator::new(store.pool().clone())
        .run()
        .await
        .context("database migration failed")?;
    info!("migrations applied");
    Ok(())
}
