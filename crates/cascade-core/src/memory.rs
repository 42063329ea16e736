//! In-memory job repository.
//!
//! Backs scheduler tests and local dry runs. Batch transactions stage their
//! rows privately and publish them on commit, matching the visibility rules
//! of the database implementation.

use crate::ids::{BatchId, JobId};
use crate::job::{Job, JobLink, JobStatus, NewJob};
use crate::ports::{BatchTransaction, JobRepository};
use crate::project::JobPayload;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Default)]
struct State {
    jobs: Vec<Job>,
    links: Vec<JobLink>,
    failing_projects: HashSet<String>,
}

impl State {
    fn check_insert(&self, project: &str) -> Result<()> {
        if self.failing_projects.contains(project) {
            return Err(Error::Database(format!(
                "insert rejected for project {project}"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryJobRepository {
    state: Arc<Mutex<State>>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>> {
        lock(&self.state)
    }

    /// Make every insert for `project` fail with a database error.
    pub fn fail_inserts_for(&self, project: impl Into<String>) -> Result<()> {
        self.state()?.failing_projects.insert(project.into());
        Ok(())
    }

    /// Store a job as-is, bypassing the lifecycle.
    pub fn insert_job(&self, job: Job) -> Result<()> {
        self.state()?.jobs.push(job);
        Ok(())
    }

    /// Snapshot of every committed job.
    pub fn jobs(&self) -> Result<Vec<Job>> {
        Ok(self.state()?.jobs.clone())
    }

    /// Snapshot of every committed link.
    pub fn links(&self) -> Result<Vec<JobLink>> {
        Ok(self.state()?.links.clone())
    }
}

fn lock(state: &Mutex<State>) -> Result<MutexGuard<'_, State>> {
    state
        .lock()
        .map_err(|_| Error::Internal("job store lock poisoned".to_string()))
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn create_job(
        &self,
        batch_id: BatchId,
        parent_id: Option<JobId>,
        project: &str,
        payload: &JobPayload,
        branch: &str,
    ) -> Result<Job> {
        let mut state = self.state()?;
        state.check_insert(project)?;
        let job = NewJob {
            batch_id,
            parent_id,
            project: project.to_string(),
            payload: payload.clone(),
            branch: branch.to_string(),
            waits_on: vec![],
        }
        .into_job();
        state.jobs.push(job.clone());
        Ok(job)
    }

    async fn create_job_link(&self, job_id: JobId, repo_full_name: &str) -> Result<JobLink> {
        let mut state = self.state()?;
        if !state.jobs.iter().any(|j| j.id == job_id) {
            return Err(Error::JobNotFound(job_id.to_string()));
        }
        let link = JobLink::new(job_id, repo_full_name);
        state.links.push(link.clone());
        Ok(link)
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.state()?.jobs.iter().find(|j| j.id == id).cloned())
    }

    async fn get_by_batch(&self, batch_id: BatchId) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .state()?
            .jobs
            .iter()
            .filter(|j| j.batch_id == batch_id)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    async fn get_links(&self, job_id: JobId) -> Result<Vec<JobLink>> {
        Ok(self
            .state()?
            .links
            .iter()
            .filter(|l| l.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn get_jobs_by_parent_and_status(
        &self,
        parent_id: JobId,
        status: JobStatus,
    ) -> Result<Vec<Job>> {
        Ok(self
            .state()?
            .jobs
            .iter()
            .filter(|j| j.parent_id == Some(parent_id) && j.status == status)
            .cloned()
            .collect())
    }

    async fn get_jobs_waiting_on(&self, job_id: JobId, status: JobStatus) -> Result<Vec<Job>> {
        Ok(self
            .state()?
            .jobs
            .iter()
            .filter(|j| j.waits_on.contains(&job_id) && j.status == status)
            .cloned()
            .collect())
    }

    async fn transition_status(&self, id: JobId, from: JobStatus, to: JobStatus) -> Result<bool> {
        let mut state = self.state()?;
        match state.jobs.iter_mut().find(|j| j.id == id) {
            Some(job) if job.status == from => {
                job.status = to;
                job.updated_at = Utc::now();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(Error::JobNotFound(id.to_string())),
        }
    }

    async fn begin_batch(&self) -> Result<Box<dyn BatchTransaction>> {
        Ok(Box::new(InMemoryBatch {
            state: self.state.clone(),
            jobs: vec![],
            links: vec![],
        }))
    }
}

struct InMemoryBatch {
    state: Arc<Mutex<State>>,
    jobs: Vec<Job>,
    links: Vec<JobLink>,
}

#[async_trait]
impl BatchTransaction for InMemoryBatch {
    async fn create_job_with_link(
        &mut self,
        job: NewJob,
        repo_full_name: &str,
    ) -> Result<(Job, JobLink)> {
        lock(&self.state)?.check_insert(&job.project)?;
        let job = job.into_job();
        let link = JobLink::new(job.id, repo_full_name);
        self.jobs.push(job.clone());
        self.links.push(link.clone());
        Ok((job, link))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        let mut state = lock(&this.state)?;
        debug!(jobs = this.jobs.len(), "Committing in-memory batch");
        state.jobs.extend(this.jobs);
        state.links.extend(this.links);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        debug!(jobs = self.jobs.len(), "Discarding in-memory batch");
        Ok(())
    }
}
