//! A small generic directed-acyclic-graph used to order models and
//! snapshots by dependency.
//!
//! Nodes are anything `Ord + Clone + Hash`; the graph only ever stores
//! edges, so it is reused for both the model-name DAG (loader) and the
//! snapshot-id DAG (diff/promotion).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::hash::Hash;

use planforge_error::{PlanError, PlanResult};

/// A directed graph with a fixed node set, built once and queried many
/// times (topological order, transitive closure).
#[derive(Debug, Clone, Default)]
pub struct Dag<N: Ord + Clone + Hash + Debug> {
    nodes: BTreeSet<N>,
    /// node -> its direct dependencies (edges point from child to parent,
    /// matching "parents must be created before children").
    edges: BTreeMap<N, BTreeSet<N>>,
}

impl<N: Ord + Clone + Hash + Debug> Dag<N> {
    pub fn new() -> Self {
        Self {
            nodes: BTreeSet::new(),
            edges: BTreeMap::new(),
        }
    }

    pub fn add_node(&mut self, node: N) {
        self.nodes.insert(node.clone());
        self.edges.entry(node).or_default();
    }

    /// Adds an edge meaning `node` depends on `parent` (`parent` must be
    /// ordered first).
    pub fn add_edge(&mut self, node: N, parent: N) {
        self.add_node(node.clone());
        self.add_node(parent.clone());
        self.edges.entry(node).or_default().insert(parent);
    }

    pub fn parents_of(&self, node: &N) -> impl Iterator<Item = &N> {
        self.edges.get(node).into_iter().flatten()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &N> {
        self.nodes.iter()
    }

    /// Returns nodes in topological order (parents before children),
    /// tie-broken by `Ord` so the result is deterministic. Errors if the
    /// graph contains a cycle.
    ///
    /// Implemented as depth-first search with gray/black marks per
    /// Design Note 9: gray = on the current recursion stack, black =
    /// fully processed. Encountering a gray node closes a cycle.
    pub fn topological_order(&self) -> PlanResult<Vec<N>> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            Gray,
            Black,
        }

        let mut marks: BTreeMap<N, Mark> = BTreeMap::new();
        let mut order: Vec<N> = Vec::with_capacity(self.nodes.len());

        fn visit<N: Ord + Clone + Hash + Debug>(
            dag: &Dag<N>,
            node: &N,
            marks: &mut BTreeMap<N, Mark>,
            stack: &mut Vec<N>,
            order: &mut Vec<N>,
        ) -> PlanResult<()> {
            match marks.get(node) {
                Some(Mark::Black) => return Ok(()),
                Some(Mark::Gray) => {
                    stack.push(node.clone());
                    let cycle = stack
                        .iter()
                        .map(|n| format!("{n:?}"))
                        .collect::<Vec<_>>()
                        .join(" -> ");
                    return Err(PlanError::config(
                        "<dag>",
                        0,
                        format!("cyclic model reference: {cycle}"),
                    ));
                }
                None => {}
            }

            marks.insert(node.clone(), Mark::Gray);
            stack.push(node.clone());

            if let Some(parents) = dag.edges.get(node) {
                for parent in parents {
                    visit(dag, parent, marks, stack, order)?;
                }
            }

            stack.pop();
            marks.insert(node.clone(), Mark::Black);
            order.push(node.clone());
            Ok(())
        }

        let mut stack = Vec::new();
        for node in &self.nodes {
            visit(self, node, &mut marks, &mut stack, &mut order)?;
        }

        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toposort_orders_parents_first() {
        let mut dag = Dag::new();
        dag.add_edge("b", "a");
        dag.add_edge("c", "b");
        let order = dag.topological_order().unwrap();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn toposort_is_deterministic_for_independent_branches() {
        let mut dag = Dag::new();
        dag.add_edge("z", "a");
        dag.add_edge("y", "a");
        let order = dag.topological_order().unwrap();
        // "a" must precede both children; ties broken by Ord.
        let pos_a = order.iter().position(|n| *n == "a").unwrap();
        let pos_y = order.iter().position(|n| *n == "y").unwrap();
        let pos_z = order.iter().position(|n| *n == "z").unwrap();
        assert!(pos_a < pos_y && pos_a < pos_z);
    }

    #[test]
    fn detects_cycle() {
        let mut dag = Dag::new();
        dag.add_edge("a", "b");
        dag.add_edge("b", "a");
        assert!(dag.topological_order().is_err());
    }
}
