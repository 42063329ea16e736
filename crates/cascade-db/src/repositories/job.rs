//! PostgreSQL implementation of JobRepository.

use async_trait::async_trait;
use cascade_core::ids::{BatchId, JobId, JobLinkId};
use cascade_core::job::{Job, JobLink, JobStatus, NewJob};
use cascade_core::ports::{BatchTransaction, JobRepository};
use cascade_core::project::JobPayload;
use cascade_core::{Error, Result};
use sqlx::postgres::PgRow;
use sqlx::{Acquire, Executor, PgPool, Postgres, Row, Transaction};
use tracing::{debug, warn};

const JOB_COLUMNS: &str = "id, parent_job_id, batch_id, project, status, payload, branch, \
     waits_on, created_at, updated_at";

fn db_err(e: sqlx::Error) -> Error {
    Error::Database(e.to_string())
}

fn row_to_job(r: &PgRow) -> Result<Job> {
    let status: String = r.get("status");
    Ok(Job {
        id: JobId::from_uuid(r.get::<uuid::Uuid, _>("id")),
        parent_id: r
            .get::<Option<uuid::Uuid>, _>("parent_job_id")
            .map(JobId::from_uuid),
        batch_id: BatchId::from_uuid(r.get::<uuid::Uuid, _>("batch_id")),
        project: r.get("project"),
        status: status.parse()?,
        payload: JobPayload::from_bytes(r.get::<Vec<u8>, _>("payload")),
        branch: r.get("branch"),
        waits_on: r
            .get::<Vec<uuid::Uuid>, _>("waits_on")
            .into_iter()
            .map(JobId::from_uuid)
            .collect(),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    })
}

fn row_to_link(r: &PgRow) -> JobLink {
    JobLink {
        id: JobLinkId::from_uuid(r.get::<uuid::Uuid, _>("id")),
        job_id: JobId::from_uuid(r.get::<uuid::Uuid, _>("job_id")),
        repo_full_name: r.get("repo_full_name"),
        created_at: r.get("created_at"),
    }
}

async fn insert_job<'e, E>(executor: E, job: &Job) -> Result<()>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"INSERT INTO jobs (id, parent_job_id, batch_id, project, status, payload, branch,
                             waits_on, created_at, updated_at)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"#,
    )
    .bind(job.id.as_uuid())
    .bind(job.parent_id.map(|p| *p.as_uuid()))
    .bind(job.batch_id.as_uuid())
    .bind(&job.project)
    .bind(job.status.as_str())
    .bind(job.payload.as_bytes())
    .bind(&job.branch)
    .bind(job.waits_on.iter().map(|id| *id.as_uuid()).collect::<Vec<_>>())
    .bind(job.created_at)
    .bind(job.updated_at)
    .execute(executor)
    .await
    .map_err(db_err)?;
    Ok(())
}

async fn insert_link<'e, E>(executor: E, link: &JobLink) -> Result<()>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        "INSERT INTO job_links (id, job_id, repo_full_name, created_at) VALUES ($1, $2, $3, $4)",
    )
    .bind(link.id.as_uuid())
    .bind(link.job_id.as_uuid())
    .bind(&link.repo_full_name)
    .bind(link.created_at)
    .execute(executor)
    .await
    .map_err(db_err)?;
    Ok(())
}

/// PostgreSQL implementation of JobRepository.
#[derive(Clone)]
pub struct PgJobRepository {
    pool: PgPool,
}

impl PgJobRepository {
    /// Create a new PgJobRepository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn exists(&self, id: JobId) -> Result<bool> {
        let row = sqlx::query("SELECT EXISTS (SELECT 1 FROM jobs WHERE id = $1) AS found")
            .bind(id.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.get("found"))
    }
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn create_job(
        &self,
        batch_id: BatchId,
        parent_id: Option<JobId>,
        project: &str,
        payload: &JobPayload,
        branch: &str,
    ) -> Result<Job> {
        let job = NewJob {
            batch_id,
            parent_id,
            project: project.to_string(),
            payload: payload.clone(),
            branch: branch.to_string(),
            waits_on: vec![],
        }
        .into_job();
        insert_job(&self.pool, &job).await?;
        Ok(job)
    }

    async fn create_job_link(&self, job_id: JobId, repo_full_name: &str) -> Result<JobLink> {
        let link = JobLink::new(job_id, repo_full_name);
        insert_link(&self.pool, &link).await?;
        Ok(link)
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.as_ref().map(row_to_job).transpose()
    }

    async fn get_by_batch(&self, batch_id: BatchId) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE batch_id = $1 ORDER BY created_at ASC, id ASC"
        ))
        .bind(batch_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(row_to_job).collect()
    }

    async fn get_links(&self, job_id: JobId) -> Result<Vec<JobLink>> {
        let rows = sqlx::query(
            r#"SELECT id, job_id, repo_full_name, created_at FROM job_links
               WHERE job_id = $1 ORDER BY created_at ASC"#,
        )
        .bind(job_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.iter().map(row_to_link).collect())
    }

    async fn get_jobs_by_parent_and_status(
        &self,
        parent_id: JobId,
        status: JobStatus,
    ) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs
             WHERE parent_job_id = $1 AND status = $2 ORDER BY created_at ASC"
        ))
        .bind(parent_id.as_uuid())
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(row_to_job).collect()
    }

    async fn get_jobs_waiting_on(&self, job_id: JobId, status: JobStatus) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs
             WHERE $1 = ANY(waits_on) AND status = $2 ORDER BY created_at ASC"
        ))
        .bind(job_id.as_uuid())
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(row_to_job).collect()
    }

    async fn transition_status(&self, id: JobId, from: JobStatus, to: JobStatus) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET status = $3, updated_at = NOW() WHERE id = $1 AND status = $2",
        )
        .bind(id.as_uuid())
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 1 {
            debug!(job_id = %id, %from, %to, "Job status changed");
            return Ok(true);
        }
        if !self.exists(id).await? {
            return Err(Error::JobNotFound(id.to_string()));
        }
        Ok(false)
    }

    async fn begin_batch(&self) -> Result<Box<dyn BatchTransaction>> {
        let tx = self.pool.begin().await.map_err(db_err)?;
        Ok(Box::new(PgBatchTransaction { tx }))
    }
}

/// One batch of inserts inside a database transaction.
///
/// Each job and its link are written under a savepoint, so a failed insert
/// is rolled back on its own without aborting the enclosing transaction.
pub struct PgBatchTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl BatchTransaction for PgBatchTransaction {
    async fn create_job_with_link(
        &mut self,
        job: NewJob,
        repo_full_name: &str,
    ) -> Result<(Job, JobLink)> {
        let job = job.into_job();
        let link = JobLink::new(job.id, repo_full_name);

        let mut savepoint = Acquire::begin(&mut self.tx).await.map_err(db_err)?;
        let inserted = match insert_job(&mut *savepoint, &job).await {
            Ok(()) => insert_link(&mut *savepoint, &link).await,
            Err(e) => Err(e),
        };

        match inserted {
            Ok(()) => {
                savepoint.commit().await.map_err(db_err)?;
                Ok((job, link))
            }
            Err(e) => {
                if let Err(rollback) = savepoint.rollback().await {
                    warn!(job_id = %job.id, error = %rollback, "Failed to roll back savepoint");
                }
                Err(e)
            }
        }
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        this.tx.commit().await.map_err(db_err)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let this = *self;
        this.tx.rollback().await.map_err(db_err)
    }
}
