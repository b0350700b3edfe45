//! A declared, non-interpreted graph of the orchestration topology.
//!
//! `orchestrator::run` does not walk this structure to decide what to
//! execute — it is plain `async fn` composition, direct method calls over
//! a generic engine. `Graph` exists so the topology (`START → A; A → B;
//! A → C; C → D; {B,D} → E → END`) is an explicit, testable value rather
//! than something only implicit in `orchestrator.rs`'s control flow.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub &'static str);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// A single deterministic or LLM-calling step.
    Leaf,
    /// A join point: all of its declared predecessors must complete before
    /// it runs.
    Barrier,
    /// A node that dispatches N parallel successor tasks (e.g. one
    /// investigator per mission, or per URL).
    FanOut,
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    predecessors: Vec<NodeId>,
}

/// An immutable graph of nodes and directed edges. Built once via
/// [`GraphBuilder`]; never mutated after.
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: HashMap<NodeId, Node>,
}

impl Graph {
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.nodes.get(&id).map(|n| &n.kind)
    }

    pub fn predecessors(&self, id: NodeId) -> &[NodeId] {
        self.nodes.get(&id).map(|n| n.predecessors.as_slice()).unwrap_or(&[])
    }

    /// Topological validity check: every predecessor referenced by a node
    /// must itself be a declared node. Used by tests, not at runtime.
    pub fn is_well_formed(&self) -> bool {
        self.nodes.values().all(|n| n.predecessors.iter().all(|p| self.nodes.contains_key(p)))
    }
}

#[derive(Debug, Default)]
pub struct GraphBuilder {
    nodes: HashMap<NodeId, Node>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(mut self, id: NodeId, kind: NodeKind, predecessors: &[NodeId]) -> Self {
        self.nodes.insert(
            id,
            Node {
                kind,
                predecessors: predecessors.to_vec(),
            },
        );
        self
    }

    pub fn build(self) -> Graph {
        Graph { nodes: self.nodes }
    }
}

/// The declared topology: `START → A; A → B; A → C; C → D; {B,D} → E →
/// END`, with E as a barrier over B and D.
pub fn pdf_hunter_topology() -> Graph {
    const A: NodeId = NodeId("agent_a_extraction");
    const B: NodeId = NodeId("agent_b_file_analysis");
    const C: NodeId = NodeId("agent_c_image_analysis");
    const D: NodeId = NodeId("agent_d_url_investigation");
    const E: NodeId = NodeId("agent_e_report");

    GraphBuilder::new()
        .add_node(A, NodeKind::Leaf, &[])
        .add_node(B, NodeKind::FanOut, &[A])
        .add_node(C, NodeKind::Leaf, &[A])
        .add_node(D, NodeKind::FanOut, &[C])
        .add_node(E, NodeKind::Barrier, &[B, D])
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topology_is_well_formed() {
        let graph = pdf_hunter_topology();
        assert!(graph.is_well_formed());
    }

    #[test]
    fn report_is_a_barrier_over_b_and_d() {
        let graph = pdf_hunter_topology();
        let e = NodeId("agent_e_report");
        assert_eq!(graph.kind(e), Some(&NodeKind::Barrier));
        let preds = graph.predecessors(e);
        assert!(preds.contains(&NodeId("agent_b_file_analysis")));
        assert!(preds.contains(&NodeId("agent_d_url_investigation")));
    }

    #[test]
    fn extraction_has_no_predecessors() {
        let graph = pdf_hunter_topology();
        assert!(graph.predecessors(NodeId("agent_a_extraction")).is_empty());
    }
}
