//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the scheduler and its
//! persistence and execution adapters.

use crate::ids::{BatchId, JobId};
use crate::job::{Job, JobLink, JobStatus, NewJob, RepoRef};
use crate::project::JobPayload;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Repository for jobs and their repository links.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Create a single job outside of any batch transaction.
    async fn create_job(
        &self,
        batch_id: BatchId,
        parent_id: Option<JobId>,
        project: &str,
        payload: &JobPayload,
        branch: &str,
    ) -> Result<Job>;

    /// Link a job to the repository it was planned for.
    async fn create_job_link(&self, job_id: JobId, repo_full_name: &str) -> Result<JobLink>;

    /// Get a job by ID.
    async fn get(&self, id: JobId) -> Result<Option<Job>>;

    /// Get all jobs of a batch, oldest first.
    async fn get_by_batch(&self, batch_id: BatchId) -> Result<Vec<Job>>;

    /// Get the links recorded for a job.
    async fn get_links(&self, job_id: JobId) -> Result<Vec<JobLink>>;

    /// Get the children of a job that are in the given status.
    async fn get_jobs_by_parent_and_status(
        &self,
        parent_id: JobId,
        status: JobStatus,
    ) -> Result<Vec<Job>>;

    /// Get the jobs in the given status that list `job_id` in `waits_on`.
    async fn get_jobs_waiting_on(&self, job_id: JobId, status: JobStatus) -> Result<Vec<Job>>;

    /// Atomically move a job from `from` to `to`.
    ///
    /// Returns `false` when the job was not in `from` any more, so two
    /// callers racing on the same job cannot both win.
    async fn transition_status(&self, id: JobId, from: JobStatus, to: JobStatus) -> Result<bool>;

    /// Open a transaction that groups all writes of one batch.
    async fn begin_batch(&self) -> Result<Box<dyn BatchTransaction>>;
}

/// Unit of work for materializing one batch.
///
/// Nothing written through the transaction is visible to other readers
/// until [`BatchTransaction::commit`] succeeds.
#[async_trait]
pub trait BatchTransaction: Send {
    /// Insert a job and its link as one atomic step.
    ///
    /// On error neither row is kept and the transaction stays usable.
    async fn create_job_with_link(
        &mut self,
        job: NewJob,
        repo_full_name: &str,
    ) -> Result<(Job, JobLink)>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Inputs passed to the executor workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchInputs {
    /// Serialized job payload.
    pub job: String,
    /// Job ID, reported back on completion.
    pub id: String,
}

/// Request to start a job on the remote executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRequest {
    pub repo: RepoRef,
    pub workflow_id: String,
    pub git_ref: String,
    pub inputs: DispatchInputs,
}

impl DispatchRequest {
    /// Build the request that starts `job` on `repo`.
    pub fn for_job(job: &Job, repo: &RepoRef, workflow_id: &str) -> Result<Self> {
        Ok(Self {
            repo: repo.clone(),
            workflow_id: workflow_id.to_string(),
            git_ref: job.branch.clone(),
            inputs: DispatchInputs {
                job: job.payload.as_str()?.to_string(),
                id: job.id.to_string(),
            },
        })
    }
}

/// Remote executor that runs jobs.
///
/// Dispatch is fire-and-forget: success only means the executor accepted the
/// request. Completion is reported back separately.
#[async_trait]
pub trait WorkflowDispatcher: Send + Sync {
    async fn dispatch(&self, request: &DispatchRequest) -> Result<()>;
}
