//! Test fixtures for project graphs and payloads.

use cascade_core::job::RepoRef;
use cascade_core::project::{ImpactedSet, JobPayload, PayloadMap, Project};
use cascade_scheduler::{DagBuilder, DependencyGraph};

/// Factory for project graphs.
pub struct ProjectFixture;

impl ProjectFixture {
    /// `names[0] -> names[1] -> ...`
    pub fn chain(names: &[&str]) -> Vec<Project> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let project = Project::new(*name);
                match i.checked_sub(1) {
                    Some(prev) => project.depends_on([names[prev]]),
                    None => project,
                }
            })
            .collect()
    }

    /// `a -> b, a -> c, b -> d, c -> d`
    pub fn diamond() -> Vec<Project> {
        vec![
            Project::new("a"),
            Project::new("b").depends_on(["a"]),
            Project::new("c").depends_on(["a"]),
            Project::new("d").depends_on(["b", "c"]),
        ]
    }

    pub fn graph(projects: &[Project]) -> DependencyGraph {
        DagBuilder::new()
            .build(projects)
            .expect("fixture graph is valid")
    }

    /// Every project is impacted.
    pub fn impacted_all(projects: &[Project]) -> ImpactedSet {
        projects.iter().cloned().collect()
    }

    /// One JSON payload per project naming it.
    pub fn payloads(projects: &[Project]) -> PayloadMap {
        projects
            .iter()
            .map(|p| {
                let payload = JobPayload::from_json(&serde_json::json!({ "project": p.name }))
                    .expect("payload serializes");
                (p.name.clone(), payload)
            })
            .collect()
    }

    pub fn repo() -> RepoRef {
        RepoRef::new("acme", "infra")
    }
}
