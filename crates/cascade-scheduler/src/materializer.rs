//! Materialization of impacted projects into a persisted job forest.

use crate::dag::{DagError, DependencyGraph};
use crate::reducer::GraphReducer;
use crate::traversal::ParentFirstTraversal;
use cascade_core::ids::{BatchId, JobId};
use cascade_core::job::{NewJob, RepoRef};
use cascade_core::ports::JobRepository;
use cascade_core::project::{ImpactedSet, PayloadMap};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// How a project with several dependencies is materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanInPolicy {
    /// One job per incoming dependency edge, each chained to that
    /// dependency's job. A diamond yields two jobs for the downstream project.
    #[default]
    PerEdge,
    /// One job per project, chained to the dependency visited last. The
    /// other dependencies' jobs are recorded in `waits_on` and must also
    /// succeed before the job is dispatched.
    Collapsed,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaterializerConfig {
    #[serde(default)]
    pub fan_in: FanInPolicy,
    /// Roll back the whole batch when any job fails to persist.
    #[serde(default)]
    pub strict: bool,
}

#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("Graph error: {0}")]
    Graph(#[from] DagError),
    #[error("Persistence error: {0}")]
    Persistence(#[from] cascade_core::Error),
    #[error("Batch rolled back, {} job(s) failed to persist", .failures.len())]
    Incomplete { failures: Vec<VertexFailure> },
}

/// A job that could not be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexFailure {
    pub project: String,
    /// Dependency whose edge the job was created for, if any.
    pub parent_project: Option<String>,
    pub reason: String,
}

/// Result of one materialization run.
#[derive(Debug, Clone)]
pub struct MaterializedBatch {
    pub batch_id: BatchId,
    /// Created jobs per project, in creation order.
    pub jobs: BTreeMap<String, Vec<JobId>>,
    pub failures: Vec<VertexFailure>,
}

impl MaterializedBatch {
    pub fn job_count(&self) -> usize {
        self.jobs.values().map(Vec::len).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Creates the jobs of one batch from a dependency graph and impacted set.
pub struct JobMaterializer {
    jobs: Arc<dyn JobRepository>,
    config: MaterializerConfig,
}

impl JobMaterializer {
    pub fn new(jobs: Arc<dyn JobRepository>, config: MaterializerConfig) -> Self {
        Self { jobs, config }
    }

    /// Reduce `graph` to the impacted projects and persist one batch of jobs.
    ///
    /// Graph errors abort before anything is written. A job that fails to
    /// persist is logged and reported in [`MaterializedBatch::failures`];
    /// traversal continues with the remaining projects unless the
    /// materializer is strict, in which case the batch is rolled back.
    pub async fn materialize(
        &self,
        graph: &DependencyGraph,
        impacted: &ImpactedSet,
        payloads: &PayloadMap,
        branch: &str,
        repo: &RepoRef,
    ) -> Result<MaterializedBatch, MaterializeError> {
        let reduced = GraphReducer::reduce(graph, impacted)?;
        let order = ParentFirstTraversal::order(&reduced)?;
        let predecessors = reduced.predecessor_map();
        for name in &order {
            if !payloads.contains_key(name) {
                return Err(DagError::MissingPayload(name.clone()).into());
            }
        }

        let batch_id = BatchId::new();
        let repo_full_name = repo.full_name();
        let position: HashMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();

        let mut tx = self.jobs.begin_batch().await?;
        let mut recorded: BTreeMap<String, Vec<JobId>> = BTreeMap::new();
        let mut failures = Vec::new();

        for name in &order {
            let payload = payloads
                .get(name)
                .ok_or_else(|| DagError::MissingPayload(name.clone()))?;
            let preds = predecessors
                .get(name)
                .ok_or_else(|| DagError::MissingVertex(name.clone()))?;

            // One entry per job to create: its parent project and the other
            // predecessors it must wait for.
            let plans: Vec<(Option<&String>, Vec<&String>)> = if preds.is_empty() {
                vec![(None, vec![])]
            } else {
                match self.config.fan_in {
                    FanInPolicy::PerEdge => preds.iter().map(|p| (Some(p), vec![])).collect(),
                    FanInPolicy::Collapsed => {
                        let mut waiting: Vec<&String> = preds.iter().collect();
                        waiting.sort_by_key(|p| position.get(p.as_str()).copied());
                        let parent = waiting.pop();
                        vec![(parent, waiting)]
                    }
                }
            };

            for (parent_project, waiting) in plans {
                let unresolved = parent_project
                    .into_iter()
                    .chain(waiting.iter().copied())
                    .find(|p| newest_job(&recorded, p).is_none());
                if let Some(parent) = unresolved {
                    warn!(
                        %batch_id,
                        project = %name,
                        parent = %parent,
                        "Skipping job, parent project has no persisted job"
                    );
                    failures.push(VertexFailure {
                        project: name.clone(),
                        parent_project: Some(parent.clone()),
                        reason: format!("parent project {parent} has no persisted job"),
                    });
                    continue;
                }

                let new_job = NewJob {
                    batch_id,
                    parent_id: parent_project.and_then(|p| newest_job(&recorded, p)),
                    project: name.clone(),
                    payload: payload.clone(),
                    branch: branch.to_string(),
                    waits_on: waiting
                        .iter()
                        .filter_map(|p| newest_job(&recorded, p))
                        .collect(),
                };

                match tx.create_job_with_link(new_job, &repo_full_name).await {
                    Ok((job, _link)) => {
                        debug!(
                            %batch_id,
                            project = %name,
                            job_id = %job.id,
                            parent_id = ?job.parent_id,
                            waits_on = ?job.waits_on,
                            "Created job"
                        );
                        recorded.entry(name.clone()).or_default().push(job.id);
                    }
                    Err(e) => {
                        warn!(%batch_id, project = %name, error = %e, "Failed to persist job");
                        failures.push(VertexFailure {
                            project: name.clone(),
                            parent_project: parent_project.cloned(),
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }

        if self.config.strict && !failures.is_empty() {
            if let Err(e) = tx.rollback().await {
                error!(%batch_id, error = %e, "Failed to roll back batch");
            }
            warn!(%batch_id, failures = failures.len(), "Rolled back incomplete batch");
            return Err(MaterializeError::Incomplete { failures });
        }

        tx.commit().await?;

        let batch = MaterializedBatch {
            batch_id,
            jobs: recorded,
            failures,
        };
        info!(
            %batch_id,
            projects = order.len(),
            jobs = batch.job_count(),
            failures = batch.failures.len(),
            "Materialized batch"
        );

        Ok(batch)
    }
}

/// A fan-in parent has one job per edge; children chain to the newest.
fn newest_job(recorded: &BTreeMap<String, Vec<JobId>>, project: &str) -> Option<JobId> {
    recorded.get(project).and_then(|ids| ids.last()).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::DagBuilder;
    use cascade_core::job::Job;
    use cascade_core::memory::InMemoryJobRepository;
    use cascade_core::project::{JobPayload, Project};

    fn graph(projects: &[(&str, &[&str])]) -> DependencyGraph {
        let projects: Vec<Project> = projects
            .iter()
            .map(|(name, deps)| Project::new(*name).depends_on(deps.iter().copied()))
            .collect();
        DagBuilder::new().build(&projects).unwrap()
    }

    fn impacted(names: &[&str]) -> ImpactedSet {
        names.iter().map(|n| Project::new(*n)).collect()
    }

    fn payloads(names: &[&str]) -> PayloadMap {
        names
            .iter()
            .map(|n| {
                let payload = serde_json::json!({"project": n, "command": "apply"});
                (n.to_string(), JobPayload::from_json(&payload).unwrap())
            })
            .collect()
    }

    fn repo() -> RepoRef {
        RepoRef::new("acme", "infra")
    }

    fn materializer(repo: &InMemoryJobRepository, config: MaterializerConfig) -> JobMaterializer {
        JobMaterializer::new(Arc::new(repo.clone()), config)
    }

    fn job(jobs: &[Job], id: JobId) -> &Job {
        jobs.iter().find(|j| j.id == id).unwrap()
    }

    #[tokio::test]
    async fn test_linear_chain() {
        let store = InMemoryJobRepository::new();
        let g = graph(&[("a", &[]), ("b", &["a"]), ("c", &["b"])]);
        let names = ["a", "b", "c"];

        let batch = materializer(&store, MaterializerConfig::default())
            .materialize(&g, &impacted(&names), &payloads(&names), "main", &repo())
            .await
            .unwrap();

        let jobs = store.jobs().unwrap();
        assert_eq!(jobs.len(), 3);
        assert!(jobs.iter().all(|j| j.batch_id == batch.batch_id));

        let a = batch.jobs["a"][0];
        let b = batch.jobs["b"][0];
        let c = batch.jobs["c"][0];
        assert_eq!(job(&jobs, a).parent_id, None);
        assert_eq!(job(&jobs, b).parent_id, Some(a));
        assert_eq!(job(&jobs, c).parent_id, Some(b));
        assert!(batch.is_complete());
    }

    #[tokio::test]
    async fn test_contracted_middle() {
        let store = InMemoryJobRepository::new();
        let g = graph(&[("a", &[]), ("b", &["a"]), ("c", &["b"])]);

        let batch = materializer(&store, MaterializerConfig::default())
            .materialize(&g, &impacted(&["a", "c"]), &payloads(&["a", "c"]), "main", &repo())
            .await
            .unwrap();

        let jobs = store.jobs().unwrap();
        assert_eq!(jobs.len(), 2);
        assert!(!batch.jobs.contains_key("b"));
        assert_eq!(
            job(&jobs, batch.jobs["c"][0]).parent_id,
            Some(batch.jobs["a"][0])
        );
    }

    #[tokio::test]
    async fn test_diamond_duplicates_fan_in() {
        let store = InMemoryJobRepository::new();
        let g = graph(&[("a", &[]), ("b", &["a"]), ("c", &["a"]), ("d", &["b", "c"])]);
        let names = ["a", "b", "c", "d"];

        let batch = materializer(&store, MaterializerConfig::default())
            .materialize(&g, &impacted(&names), &payloads(&names), "main", &repo())
            .await
            .unwrap();

        assert_eq!(batch.job_count(), 5);
        let jobs = store.jobs().unwrap();
        let mut d_parents: Vec<JobId> = batch.jobs["d"]
            .iter()
            .filter_map(|id| job(&jobs, *id).parent_id)
            .collect();
        d_parents.sort();
        let mut expected = vec![batch.jobs["b"][0], batch.jobs["c"][0]];
        expected.sort();
        assert_eq!(d_parents, expected);
    }

    #[tokio::test]
    async fn test_diamond_collapsed() {
        let store = InMemoryJobRepository::new();
        let g = graph(&[("a", &[]), ("b", &["a"]), ("c", &["a"]), ("d", &["b", "c"])]);
        let names = ["a", "b", "c", "d"];
        let config = MaterializerConfig {
            fan_in: FanInPolicy::Collapsed,
            strict: false,
        };

        let batch = materializer(&store, config)
            .materialize(&g, &impacted(&names), &payloads(&names), "main", &repo())
            .await
            .unwrap();

        assert_eq!(batch.job_count(), 4);
        assert_eq!(batch.jobs["d"].len(), 1);
        let jobs = store.jobs().unwrap();
        let d = job(&jobs, batch.jobs["d"][0]);
        // c is visited after b, so d hangs off c and waits for b.
        assert_eq!(d.parent_id, Some(batch.jobs["c"][0]));
        assert_eq!(d.waits_on, vec![batch.jobs["b"][0]]);
        assert!(job(&jobs, batch.jobs["b"][0]).waits_on.is_empty());
    }

    #[tokio::test]
    async fn test_collapsed_skips_job_with_missing_predecessor() {
        let store = InMemoryJobRepository::new();
        store.fail_inserts_for("b").unwrap();
        let g = graph(&[("a", &[]), ("b", &["a"]), ("c", &["a"]), ("d", &["b", "c"])]);
        let names = ["a", "b", "c", "d"];
        let config = MaterializerConfig {
            fan_in: FanInPolicy::Collapsed,
            strict: false,
        };

        let batch = materializer(&store, config)
            .materialize(&g, &impacted(&names), &payloads(&names), "main", &repo())
            .await
            .unwrap();

        assert!(!batch.jobs.contains_key("d"));
        let failed: Vec<(&str, Option<&str>)> = batch
            .failures
            .iter()
            .map(|f| (f.project.as_str(), f.parent_project.as_deref()))
            .collect();
        assert_eq!(failed, vec![("b", Some("a")), ("d", Some("b"))]);
    }

    #[tokio::test]
    async fn test_fan_in_parent_chains_to_newest_job() {
        let store = InMemoryJobRepository::new();
        let g = graph(&[
            ("a", &[]),
            ("b", &["a"]),
            ("c", &["a"]),
            ("d", &["b", "c"]),
            ("e", &["d"]),
        ]);
        let names = ["a", "b", "c", "d", "e"];

        let batch = materializer(&store, MaterializerConfig::default())
            .materialize(&g, &impacted(&names), &payloads(&names), "main", &repo())
            .await
            .unwrap();

        let jobs = store.jobs().unwrap();
        assert_eq!(batch.jobs["e"].len(), 1);
        assert_eq!(
            job(&jobs, batch.jobs["e"][0]).parent_id,
            batch.jobs["d"].last().copied()
        );
    }

    #[tokio::test]
    async fn test_disjoint_roots_share_batch() {
        let store = InMemoryJobRepository::new();
        let g = graph(&[("x", &[]), ("y", &[])]);

        let batch = materializer(&store, MaterializerConfig::default())
            .materialize(&g, &impacted(&["x", "y"]), &payloads(&["x", "y"]), "main", &repo())
            .await
            .unwrap();

        let jobs = store.jobs().unwrap();
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|j| j.is_root()));
        assert!(jobs.iter().all(|j| j.batch_id == batch.batch_id));
    }

    #[tokio::test]
    async fn test_jobs_carry_payload_branch_and_link() {
        let store = InMemoryJobRepository::new();
        let g = graph(&[("a", &[])]);
        let p = payloads(&["a"]);

        let batch = materializer(&store, MaterializerConfig::default())
            .materialize(&g, &impacted(&["a"]), &p, "feature/x", &repo())
            .await
            .unwrap();

        let jobs = store.jobs().unwrap();
        assert_eq!(jobs[0].payload, p["a"]);
        assert_eq!(jobs[0].branch, "feature/x");
        assert_eq!(jobs[0].project, "a");

        let links = store.links().unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].job_id, batch.jobs["a"][0]);
        assert_eq!(links[0].repo_full_name, "acme/infra");
    }

    #[tokio::test]
    async fn test_cycle_creates_nothing() {
        let store = InMemoryJobRepository::new();
        let g = graph(&[("a", &["b"]), ("b", &["a"])]);

        let err = materializer(&store, MaterializerConfig::default())
            .materialize(&g, &impacted(&["a", "b"]), &payloads(&["a", "b"]), "main", &repo())
            .await
            .unwrap_err();

        assert!(matches!(err, MaterializeError::Graph(DagError::CycleDetected)));
        assert!(store.jobs().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_payload_creates_nothing() {
        let store = InMemoryJobRepository::new();
        let g = graph(&[("a", &[]), ("b", &["a"])]);

        let err = materializer(&store, MaterializerConfig::default())
            .materialize(&g, &impacted(&["a", "b"]), &payloads(&["a"]), "main", &repo())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            MaterializeError::Graph(DagError::MissingPayload(ref p)) if p == "b"
        ));
        assert!(store.jobs().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persistence_failure_is_partial() {
        let store = InMemoryJobRepository::new();
        store.fail_inserts_for("b").unwrap();
        let g = graph(&[("a", &[]), ("b", &["a"]), ("c", &["b"]), ("x", &[])]);
        let names = ["a", "b", "c", "x"];

        let batch = materializer(&store, MaterializerConfig::default())
            .materialize(&g, &impacted(&names), &payloads(&names), "main", &repo())
            .await
            .unwrap();

        assert!(!batch.is_complete());
        let failed: Vec<&str> = batch.failures.iter().map(|f| f.project.as_str()).collect();
        assert_eq!(failed, vec!["b", "c"]);
        assert_eq!(batch.failures[1].parent_project.as_deref(), Some("b"));

        let mut persisted: Vec<String> =
            store.jobs().unwrap().into_iter().map(|j| j.project).collect();
        persisted.sort();
        assert_eq!(persisted, vec!["a", "x"]);
    }

    #[tokio::test]
    async fn test_strict_mode_rolls_back() {
        let store = InMemoryJobRepository::new();
        store.fail_inserts_for("b").unwrap();
        let g = graph(&[("a", &[]), ("b", &["a"])]);
        let config = MaterializerConfig {
            fan_in: FanInPolicy::PerEdge,
            strict: true,
        };

        let err = materializer(&store, config)
            .materialize(&g, &impacted(&["a", "b"]), &payloads(&["a", "b"]), "main", &repo())
            .await
            .unwrap_err();

        match err {
            MaterializeError::Incomplete { failures } => assert_eq!(failures.len(), 1),
            other => panic!("unexpected error: {other}"),
        }
        assert!(store.jobs().unwrap().is_empty());
        assert!(store.links().unwrap().is_empty());
    }

    #[test]
    fn test_config_from_yaml() {
        let config: MaterializerConfig =
            serde_yaml::from_str("fan_in: collapsed\nstrict: true\n").unwrap();
        assert_eq!(config.fan_in, FanInPolicy::Collapsed);
        assert!(config.strict);

        let config: MaterializerConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.fan_in, FanInPolicy::PerEdge);
        assert!(!config.strict);
    }
}
