//! Test context backed by a migrated PostgreSQL container.

use crate::containers::JobStoreContainer;
use cascade_db::{Database, PgJobRepository};
use std::sync::Arc;

/// Drop this to stop the container.
pub struct TestContext {
    pub store: JobStoreContainer,
    pub db: Database,
}

impl TestContext {
    /// Start PostgreSQL and apply migrations.
    pub async fn new() -> anyhow::Result<Self> {
        crate::init_test_logging();

        let store = JobStoreContainer::start().await?;
        let db = store.migrated_database().await?;
        Ok(Self { store, db })
    }

    /// Job repository over the test database.
    pub fn jobs(&self) -> Arc<PgJobRepository> {
        Arc::new(self.db.jobs())
    }
}
