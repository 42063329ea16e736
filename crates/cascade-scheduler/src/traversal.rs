//! Parent-first ordering of a dependency graph.

use crate::dag::{DagError, DependencyGraph};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};

/// Orders vertices so that every vertex comes after all of its direct
/// predecessors.
///
/// Kahn's algorithm over in-degrees. Among vertices that are ready at the
/// same time the lexicographically smallest name goes first, which makes the
/// order stable across runs.
pub struct ParentFirstTraversal;

impl ParentFirstTraversal {
    pub fn order(graph: &DependencyGraph) -> Result<Vec<String>, DagError> {
        let predecessors = graph.predecessor_map();
        let mut in_degree: BTreeMap<&str, usize> = predecessors
            .iter()
            .map(|(name, preds)| (name.as_str(), preds.len()))
            .collect();

        let mut ready: BinaryHeap<Reverse<&str>> = in_degree
            .iter()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(&name, _)| Reverse(name))
            .collect();

        let mut order = Vec::with_capacity(in_degree.len());
        while let Some(Reverse(name)) = ready.pop() {
            order.push(name.to_string());
            for successor in graph.successors(name) {
                let degree = in_degree
                    .get_mut(successor)
                    .ok_or_else(|| DagError::MissingVertex(successor.to_string()))?;
                *degree -= 1;
                if *degree == 0 {
                    ready.push(Reverse(successor));
                }
            }
        }

        if order.len() != in_degree.len() {
            return Err(DagError::CycleDetected);
        }

        Ok(order)
    }
}
