use sqlx::PgPool;
use tracing::info;

use crate::error::{Result, ScanError};

/// Applies the embedded schema migrations to a pool.
///
/// Built once by the process entry point and handed to whoever needs the
/// schema in place; there is no global migration state.
pub struct Migrator {
    pool: PgPool,
    migrator: sqlx::migrate::Migrator,
}

impl std::fmt::Debug for Migrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migrator")
            .field("migrations", &self.migrator.iter().count())
            .finish()
    }
}

impl Migrator {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            migrator: sqlx::migrate!("./migrations"),
        }
    }

    /// Run pending migrations after checking that the server is reachable.
    pub async fn run(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                ScanError::Database(format!("Preflight check failed: {e}"))
            })?;

        self.migrator.run(&self.pool).await?;

        info!(
            migrations = self.migrator.iter().count(),
            "database schema up to date"
        );
        Ok(())
    }
}
