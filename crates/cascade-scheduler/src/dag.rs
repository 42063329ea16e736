//! Project dependency graphs.

use cascade_core::project::Project;
use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DagError {
    #[error("Cycle detected in project dependencies")]
    CycleDetected,
    #[error("Unknown project dependency: {project} depends on {dependency}")]
    UnknownDependency { project: String, dependency: String },
    #[error("Duplicate project: {0}")]
    DuplicateProject(String),
    #[error("Impacted project is not part of the dependency graph: {0}")]
    UnknownProject(String),
    #[error("No payload for impacted project: {0}")]
    MissingPayload(String),
    #[error("Vertex missing from graph: {0}")]
    MissingVertex(String),
}

/// Directed graph over projects.
///
/// An edge `X -> Y` means Y depends on X, so X runs first.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    graph: DiGraph<String, ()>,
    name_to_index: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a project vertex. Adding an existing name returns its index.
    pub fn add_project(&mut self, name: &str) -> NodeIndex {
        if let Some(&idx) = self.name_to_index.get(name) {
            return idx;
        }
        let idx = self.graph.add_node(name.to_string());
        self.name_to_index.insert(name.to_string(), idx);
        idx
    }

    /// Record that `downstream` depends on `upstream`. Duplicate edges are ignored.
    pub fn add_dependency(&mut self, upstream: &str, downstream: &str) -> Result<(), DagError> {
        let from = self.index_of(upstream)?;
        let to = self.index_of(downstream)?;
        self.graph.update_edge(from, to, ());
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.name_to_index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn has_edge(&self, upstream: &str, downstream: &str) -> bool {
        match (
            self.name_to_index.get(upstream),
            self.name_to_index.get(downstream),
        ) {
            (Some(&from), Some(&to)) => self.graph.contains_edge(from, to),
            _ => false,
        }
    }

    /// All project names, sorted.
    pub fn projects(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.graph.node_weights().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Projects with no dependencies, sorted.
    pub fn roots(&self) -> Vec<&str> {
        let mut roots: Vec<&str> = self
            .graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|idx| self.graph[idx].as_str())
            .collect();
        roots.sort_unstable();
        roots
    }

    /// Projects that depend directly on `name`, sorted.
    pub fn successors(&self, name: &str) -> Vec<&str> {
        self.neighbors(name, Direction::Outgoing)
    }

    /// Projects `name` depends on directly, sorted.
    pub fn predecessors(&self, name: &str) -> Vec<&str> {
        self.neighbors(name, Direction::Incoming)
    }

    /// Direct predecessors of every vertex. Vertices without predecessors map to an empty list.
    pub fn predecessor_map(&self) -> BTreeMap<String, Vec<String>> {
        self.graph
            .node_indices()
            .map(|idx| {
                let name = self.graph[idx].clone();
                let preds = self
                    .predecessors(&name)
                    .into_iter()
                    .map(str::to_string)
                    .collect();
                (name, preds)
            })
            .collect()
    }

    /// Whether the graph contains a dependency cycle.
    pub fn is_cyclic(&self) -> bool {
        toposort(&self.graph, None).is_err()
    }

    fn neighbors(&self, name: &str, direction: Direction) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .name_to_index
            .get(name)
            .map(|&idx| {
                self.graph
                    .neighbors_directed(idx, direction)
                    .map(|n| self.graph[n].as_str())
                    .collect()
            })
            .unwrap_or_default();
        names.sort_unstable();
        names.dedup();
        names
    }

    pub(crate) fn index_of(&self, name: &str) -> Result<NodeIndex, DagError> {
        self.name_to_index
            .get(name)
            .copied()
            .ok_or_else(|| DagError::MissingVertex(name.to_string()))
    }

    pub(crate) fn inner(&self) -> &DiGraph<String, ()> {
        &self.graph
    }
}

/// Builder for constructing dependency graphs from project configuration.
pub struct DagBuilder;

impl DagBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Build a graph from a project list.
    ///
    /// Names must be unique and every dependency must name a listed project.
    /// Cycles are accepted here and rejected when the graph is reduced.
    pub fn build(&self, projects: &[Project]) -> Result<DependencyGraph, DagError> {
        let mut dag = DependencyGraph::new();

        for project in projects {
            if dag.contains(&project.name) {
                return Err(DagError::DuplicateProject(project.name.clone()));
            }
            dag.add_project(&project.name);
        }

        for project in projects {
            for dep in &project.depends_on {
                if !dag.contains(dep) {
                    return Err(DagError::UnknownDependency {
                        project: project.name.clone(),
                        dependency: dep.clone(),
                    });
                }
                dag.add_dependency(dep, &project.name)?;
            }
        }

        Ok(dag)
    }
}

impl Default for DagBuilder {
    fn default() -> Self {
        Self::new()
    }
}
