//! Disposable PostgreSQL for the scheduler's integration tests.

use cascade_db::Database;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;

/// Matches the server version the migrations are written against.
pub const POSTGRES_TAG: &str = "16-alpine";

const POOL_SIZE: u32 = 5;

/// A PostgreSQL container holding the job tables.
///
/// The container stops when this value is dropped, so keep it alive for
/// as long as any [`Database`] obtained from it is in use.
pub struct JobStoreContainer {
    _container: ContainerAsync<Postgres>,
    url: String,
}

impl JobStoreContainer {
    pub async fn start() -> anyhow::Result<Self> {
        let container = Postgres::default().with_tag(POSTGRES_TAG).start().await?;
        let host = container.get_host().await?;
        let port = container.get_host_port_ipv4(5432).await?;

        Ok(Self {
            _container: container,
            url: format!("postgres://postgres:postgres@{host}:{port}/postgres"),
        })
    }

    /// Connect and apply the `jobs` and `job_links` migrations.
    pub async fn migrated_database(&self) -> anyhow::Result<Database> {
        let db = Database::connect(&self.url, POOL_SIZE).await?;
        db.migrate().await?;
        Ok(db)
    }
}
