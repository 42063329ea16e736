//! Job, batch and link types.

use crate::ids::{BatchId, JobId, JobLinkId};
use crate::project::JobPayload;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A persisted execution record for one impacted project within one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    pub id: JobId,
    /// Parent job in the same batch; `None` for batch roots.
    pub parent_id: Option<JobId>,
    pub batch_id: BatchId,
    pub project: String,
    pub status: JobStatus,
    pub payload: JobPayload,
    pub branch: String,
    /// Other jobs in the batch that must succeed before this one is
    /// dispatched. Set for collapsed fan-in, where the job has a single
    /// parent but several predecessors.
    #[serde(default)]
    pub waits_on: Vec<JobId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Every job that must succeed before this one runs.
    pub fn dependencies(&self) -> impl Iterator<Item = JobId> + '_ {
        self.parent_id.into_iter().chain(self.waits_on.iter().copied())
    }
}

/// Input for creating a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub batch_id: BatchId,
    pub parent_id: Option<JobId>,
    pub project: String,
    pub payload: JobPayload,
    pub branch: String,
    pub waits_on: Vec<JobId>,
}

impl NewJob {
    /// Materialize the record with a fresh id and `created` status.
    pub fn into_job(self) -> Job {
        let now = Utc::now();
        Job {
            id: JobId::new(),
            parent_id: self.parent_id,
            batch_id: self.batch_id,
            project: self.project,
            status: JobStatus::Created,
            payload: self.payload,
            branch: self.branch,
            waits_on: self.waits_on,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Created,
    Triggered,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// `Triggered -> Created` is the revert taken when a dispatch call fails
    /// after the job was claimed.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Created, JobStatus::Triggered)
                | (JobStatus::Created, JobStatus::Failed)
                | (JobStatus::Triggered, JobStatus::Created)
                | (JobStatus::Triggered, JobStatus::Succeeded)
                | (JobStatus::Triggered, JobStatus::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Created => "created",
            JobStatus::Triggered => "triggered",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "created" => Ok(JobStatus::Created),
            "triggered" => Ok(JobStatus::Triggered),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            other => Err(Error::InvalidStatus(other.to_string())),
        }
    }
}

/// Association of a job to the repository it was planned for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct JobLink {
    pub id: JobLinkId,
    pub job_id: JobId,
    pub repo_full_name: String,
    pub created_at: DateTime<Utc>,
}

impl JobLink {
    pub fn new(job_id: JobId, repo_full_name: impl Into<String>) -> Self {
        Self {
            id: JobLinkId::new(),
            job_id,
            repo_full_name: repo_full_name.into(),
            created_at: Utc::now(),
        }
    }
}

/// Repository coordinates (`owner/name`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl FromStr for RepoRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('/') {
            Some((owner, name))
                if !owner.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self::new(owner, name))
            }
            _ => Err(Error::Config(format!(
                "repository must be in owner/name form: {s}"
            ))),
        }
    }
}
