//! PostgreSQL database layer for Cascade CI.

pub mod repositories;

pub use repositories::*;

use cascade_core::Result;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tracing::info;

/// Database connection pool.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to the database.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(|e| cascade_core::Error::Database(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Run migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| cascade_core::Error::Database(e.to_string()))?;
        info!("Database migrations applied");
        Ok(())
    }

    /// Repository over this pool.
    pub fn jobs(&self) -> PgJobRepository {
        PgJobRepository::new(self.pool.clone())
    }
}
