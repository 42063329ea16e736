//! Reduction of the full dependency graph to the impacted projects.

use crate::dag::{DagError, DependencyGraph};
use cascade_core::project::ImpactedSet;
use petgraph::Direction;
use petgraph::graph::NodeIndex;
use std::collections::HashSet;
use tracing::debug;

/// Collapses a dependency graph to the subgraph over impacted projects.
///
/// Paths running through projects that are not impacted are contracted, so
/// `A -> B -> C` with only A and C impacted becomes `A -> C`.
pub struct GraphReducer;

impl GraphReducer {
    pub fn reduce(
        full: &DependencyGraph,
        impacted: &ImpactedSet,
    ) -> Result<DependencyGraph, DagError> {
        if full.is_cyclic() {
            return Err(DagError::CycleDetected);
        }
        for name in impacted.names() {
            if !full.contains(name) {
                return Err(DagError::UnknownProject(name.to_string()));
            }
        }

        let graph = full.inner();
        let mut reduced = DependencyGraph::new();

        // (vertex, nearest impacted ancestor) pairs. Each pair expands once,
        // which bounds the walk on DAGs with many converging paths.
        let mut expanded: HashSet<(NodeIndex, Option<NodeIndex>)> = HashSet::new();
        let mut stack: Vec<(NodeIndex, Option<NodeIndex>)> = full
            .roots()
            .into_iter()
            .rev()
            .map(|name| full.index_of(name).map(|idx| (idx, None)))
            .collect::<Result<_, _>>()?;

        while let Some((node, ancestor)) = stack.pop() {
            if !expanded.insert((node, ancestor)) {
                continue;
            }

            let name = &graph[node];
            let next_ancestor = if impacted.contains(name) {
                reduced.add_project(name);
                if let Some(ancestor) = ancestor {
                    reduced.add_dependency(&graph[ancestor], name)?;
                }
                Some(node)
            } else {
                ancestor
            };

            let mut children: Vec<NodeIndex> =
                graph.neighbors_directed(node, Direction::Outgoing).collect();
            children.sort_unstable_by(|a, b| graph[*b].cmp(&graph[*a]));
            stack.extend(children.into_iter().map(|child| (child, next_ancestor)));
        }

        debug!(
            full = full.len(),
            impacted = impacted.len(),
            reduced = reduced.len(),
            edges = reduced.edge_count(),
            "Reduced dependency graph"
        );

        Ok(reduced)
    }
}
