//! Completion-driven dispatch of child jobs.

use cascade_core::ids::{BatchId, JobId};
use cascade_core::job::{Job, JobStatus, RepoRef};
use cascade_core::ports::{DispatchRequest, JobRepository, WorkflowDispatcher};
use cascade_core::{Error, Result};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Outcome of dispatching the ready children of one job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub triggered: Vec<JobId>,
    /// Children another caller claimed first.
    pub skipped: Vec<JobId>,
    /// Children with another dependency that has not succeeded yet.
    pub waiting: Vec<JobId>,
    pub failed: Vec<(JobId, String)>,
}

impl DispatchReport {
    fn record(&mut self, outcome: ChildOutcome) {
        match outcome {
            ChildOutcome::Triggered(id) => self.triggered.push(id),
            ChildOutcome::Skipped(id) => self.skipped.push(id),
            ChildOutcome::Waiting(id) => self.waiting.push(id),
            ChildOutcome::Failed(id, reason) => self.failed.push((id, reason)),
        }
    }
}

enum ChildOutcome {
    Triggered(JobId),
    Skipped(JobId),
    Waiting(JobId),
    Failed(JobId, String),
}

/// Triggers a job's children once the job completes.
pub struct CompletionCoordinator {
    jobs: Arc<dyn JobRepository>,
    dispatcher: Arc<dyn WorkflowDispatcher>,
}

impl CompletionCoordinator {
    pub fn new(jobs: Arc<dyn JobRepository>, dispatcher: Arc<dyn WorkflowDispatcher>) -> Self {
        Self { jobs, dispatcher }
    }

    /// Dispatch every job downstream of `parent_id` that is still `created`.
    ///
    /// Downstream jobs are the children of `parent_id` and the collapsed
    /// fan-in jobs listing it in `waits_on`. A job whose other dependencies
    /// have not all succeeded is left `created`; the last of them to
    /// complete dispatches it. Jobs are claimed one by one with a
    /// `created -> triggered` compare-and-set, so concurrent completions
    /// dispatch each job once. A failed dispatch puts the job back to
    /// `created` and does not stop its siblings.
    pub async fn on_job_completed(
        &self,
        parent_id: JobId,
        repo: &RepoRef,
        workflow_id: &str,
    ) -> Result<DispatchReport> {
        if self.jobs.get(parent_id).await?.is_none() {
            return Err(Error::JobNotFound(parent_id.to_string()));
        }

        let mut children = self
            .jobs
            .get_jobs_by_parent_and_status(parent_id, JobStatus::Created)
            .await?;
        for job in self
            .jobs
            .get_jobs_waiting_on(parent_id, JobStatus::Created)
            .await?
        {
            if !children.iter().any(|c| c.id == job.id) {
                children.push(job);
            }
        }
        debug!(%parent_id, children = children.len(), "Found ready children");

        let report = self
            .dispatch_all(&children, Some(parent_id), repo, workflow_id)
            .await;
        info!(
            %parent_id,
            triggered = report.triggered.len(),
            skipped = report.skipped.len(),
            waiting = report.waiting.len(),
            failed = report.failed.len(),
            "Dispatched children"
        );
        Ok(report)
    }

    /// Dispatch the root jobs of a freshly materialized batch.
    pub async fn dispatch_roots(
        &self,
        batch_id: BatchId,
        repo: &RepoRef,
        workflow_id: &str,
    ) -> Result<DispatchReport> {
        let roots: Vec<Job> = self
            .jobs
            .get_by_batch(batch_id)
            .await?
            .into_iter()
            .filter(|j| j.is_root() && j.status == JobStatus::Created)
            .collect();

        let report = self.dispatch_all(&roots, None, repo, workflow_id).await;
        info!(
            %batch_id,
            triggered = report.triggered.len(),
            failed = report.failed.len(),
            "Dispatched batch roots"
        );
        Ok(report)
    }

    /// Record a status reported by the executor and cascade on success.
    ///
    /// Returns the dispatch report when children were considered. Reporting
    /// the status a job already has is accepted and cascades again, which
    /// is harmless because children are claimed atomically.
    pub async fn report_completion(
        &self,
        job_id: JobId,
        status: JobStatus,
        repo: &RepoRef,
        workflow_id: &str,
    ) -> Result<Option<DispatchReport>> {
        if !status.is_terminal() {
            return Err(Error::InvalidStatus(status.to_string()));
        }

        let job = self
            .jobs
            .get(job_id)
            .await?
            .ok_or_else(|| Error::JobNotFound(job_id.to_string()))?;

        if job.status != status {
            if !job.status.can_transition_to(status) {
                return Err(Error::InvalidTransition {
                    from: job.status,
                    to: status,
                });
            }
            if !self.jobs.transition_status(job_id, job.status, status).await? {
                warn!(%job_id, %status, "Job status changed concurrently, ignoring report");
                return Ok(None);
            }
            info!(%job_id, project = %job.project, %status, "Job completed");
        }

        if status == JobStatus::Succeeded {
            self.on_job_completed(job_id, repo, workflow_id)
                .await
                .map(Some)
        } else {
            Ok(None)
        }
    }

    async fn dispatch_all(
        &self,
        jobs: &[Job],
        completed: Option<JobId>,
        repo: &RepoRef,
        workflow_id: &str,
    ) -> DispatchReport {
        let dispatches = jobs
            .iter()
            .map(|job| self.dispatch_child(job, completed, repo, workflow_id));
        let outcomes = join_all(dispatches).await;

        let mut report = DispatchReport::default();
        for outcome in outcomes {
            report.record(outcome);
        }
        report
    }

    /// First dependency of `job`, other than `completed`, that has not succeeded.
    async fn pending_dependency(
        &self,
        job: &Job,
        completed: Option<JobId>,
    ) -> Result<Option<JobId>> {
        for dependency in job.dependencies().filter(|d| Some(*d) != completed) {
            let status = self
                .jobs
                .get(dependency)
                .await?
                .ok_or_else(|| Error::JobNotFound(dependency.to_string()))?
                .status;
            if status != JobStatus::Succeeded {
                return Ok(Some(dependency));
            }
        }
        Ok(None)
    }

    async fn dispatch_child(
        &self,
        job: &Job,
        completed: Option<JobId>,
        repo: &RepoRef,
        workflow_id: &str,
    ) -> ChildOutcome {
        match self.pending_dependency(job, completed).await {
            Ok(None) => {}
            Ok(Some(dependency)) => {
                debug!(job_id = %job.id, %dependency, "Job still waiting on a dependency");
                return ChildOutcome::Waiting(job.id);
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Failed to check job dependencies");
                return ChildOutcome::Failed(job.id, e.to_string());
            }
        }

        match self
            .jobs
            .transition_status(job.id, JobStatus::Created, JobStatus::Triggered)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(job_id = %job.id, "Job already claimed");
                return ChildOutcome::Skipped(job.id);
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Failed to claim job");
                return ChildOutcome::Failed(job.id, e.to_string());
            }
        }

        let result = match DispatchRequest::for_job(job, repo, workflow_id) {
            Ok(request) => self.dispatcher.dispatch(&request).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                info!(
                    job_id = %job.id,
                    project = %job.project,
                    %repo,
                    workflow_id,
                    "Triggered job"
                );
                ChildOutcome::Triggered(job.id)
            }
            Err(e) => {
                warn!(
                    job_id = %job.id,
                    project = %job.project,
                    error = %e,
                    "Failed to trigger job"
                );
                if let Err(revert) = self
                    .jobs
                    .transition_status(job.id, JobStatus::Triggered, JobStatus::Created)
                    .await
                {
                    error!(job_id = %job.id, error = %revert, "Failed to release claimed job");
                }
                ChildOutcome::Failed(job.id, e.to_string())
            }
        }
    }
}
