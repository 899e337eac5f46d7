//! Flow graph: arena-allocated nodes and labeled successor tables.
//!
//! Nodes live in an arena and are referenced by [`NodeId`] handles; the
//! successor tables are immutable once the graph is built and shared by all
//! traversals. Per-execution state (attempt counters, bound parameters)
//! never lives here, so loops within one traversal and concurrent
//! traversals of the same graph cannot bleed state into each other.
//!
//! A graph entry is either a leaf task node or a nested (batch) flow; the
//! orchestrator dispatches through [`NodeKind`] and never inspects concrete
//! types at run time.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::flow::{BatchFlow, Flow};
use crate::label::Label;
use crate::task::Node;

/// Handle to a node in a flow graph's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// What a graph entry runs: a leaf task or a nested flow.
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// A leaf task node.
    Task(Node),
    /// A nested flow, run as a single node; its final label drives the
    /// successor lookup.
    Flow(Arc<Flow>),
    /// A nested batch flow (sequential or parallel).
    BatchFlow(Arc<BatchFlow>),
}

impl NodeKind {
    /// Name used for tracing and error attribution.
    pub fn name(&self) -> &str {
        match self {
            NodeKind::Task(node) => node.name(),
            NodeKind::Flow(flow) => flow.name(),
            NodeKind::BatchFlow(flow) => flow.name(),
        }
    }
}

/// Errors detected when building a flow graph.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphBuildError {
    /// A [`NodeId`] from a different builder (or otherwise out of range)
    /// was used in an edge or as the start node.
    #[error("node id n{id} out of range (graph has {len} nodes)")]
    UnknownNode { id: usize, len: usize },
}

#[derive(Debug, Clone)]
struct Edge {
    from: NodeId,
    label: Label,
    to: NodeId,
}

/// Builder for [`FlowGraph`].
///
/// Edges are recorded as registered and validated at [`build`](Self::build);
/// re-registering a label on the same node overwrites the previous target
/// with a warning. This is deliberate - rebinding a transition (for example
/// redirecting a resumable workflow's start) is a supported pattern, so it
/// warns rather than errs.
#[derive(Debug, Default)]
pub struct FlowGraphBuilder {
    records: Vec<NodeKind>,
    edges: Vec<Edge>,
    start: Option<NodeId>,
}

impl FlowGraphBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a leaf task node, returning its handle.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        self.push(NodeKind::Task(node))
    }

    /// Add a nested flow as a node, returning its handle.
    pub fn add_flow(&mut self, flow: Flow) -> NodeId {
        self.push(NodeKind::Flow(Arc::new(flow)))
    }

    /// Add a nested batch flow as a node, returning its handle.
    pub fn add_batch_flow(&mut self, flow: BatchFlow) -> NodeId {
        self.push(NodeKind::BatchFlow(Arc::new(flow)))
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.records.len());
        self.records.push(kind);
        id
    }

    /// Register `to` as the successor of `from` under `label`.
    ///
    /// Returns `to` so chains read naturally:
    /// `builder.connect(a, "ok", b); builder.connect(b, "ok", c);`
    pub fn connect(&mut self, from: NodeId, label: impl Into<Label>, to: NodeId) -> NodeId {
        self.edges.push(Edge {
            from,
            label: label.into(),
            to,
        });
        to
    }

    /// Register `to` as the successor of `from` under the default label.
    pub fn connect_default(&mut self, from: NodeId, to: NodeId) -> NodeId {
        self.connect(from, Label::default(), to)
    }

    /// Set the start node. A graph without one is legal; running it
    /// terminates immediately with the default label.
    pub fn start(&mut self, id: NodeId) -> &mut Self {
        self.start = Some(id);
        self
    }

    /// Validate ids and assemble the immutable graph.
    pub fn build(self) -> Result<FlowGraph, GraphBuildError> {
        let len = self.records.len();
        let check = |id: NodeId| -> Result<NodeId, GraphBuildError> {
            if id.0 < len {
                Ok(id)
            } else {
                Err(GraphBuildError::UnknownNode { id: id.0, len })
            }
        };

        if let Some(start) = self.start {
            check(start)?;
        }

        let mut successors: Vec<HashMap<Label, NodeId>> = vec![HashMap::new(); len];
        for edge in self.edges {
            let from = check(edge.from)?;
            let to = check(edge.to)?;
            if let Some(previous) = successors[from.0].insert(edge.label.clone(), to) {
                tracing::warn!(
                    node = %self.records[from.0].name(),
                    label = %edge.label,
                    old_target = %self.records[previous.0].name(),
                    new_target = %self.records[to.0].name(),
                    "successor label re-registered, overwriting previous target"
                );
            }
        }

        Ok(FlowGraph {
            records: self.records,
            successors,
            start: self.start,
        })
    }
}

/// Immutable node graph shared by every traversal of a flow.
#[derive(Debug)]
pub struct FlowGraph {
    records: Vec<NodeKind>,
    successors: Vec<HashMap<Label, NodeId>>,
    start: Option<NodeId>,
}

impl FlowGraph {
    /// The configured start node, if any.
    pub fn start(&self) -> Option<NodeId> {
        self.start
    }

    /// Number of nodes in the graph.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn record(&self, id: NodeId) -> &NodeKind {
        &self.records[id.0]
    }

    /// Name of the node behind `id`.
    pub fn node_name(&self, id: NodeId) -> &str {
        self.records[id.0].name()
    }

    /// Look up the successor of `id` under `label`.
    pub fn successor(&self, id: NodeId, label: &Label) -> Option<NodeId> {
        self.successors[id.0].get(label).copied()
    }

    /// Check whether `id` has any registered successors.
    pub fn has_successors(&self, id: NodeId) -> bool {
        !self.successors[id.0].is_empty()
    }

    /// Render the graph as a Mermaid diagram for debugging.
    ///
    /// Leaf nodes render as rectangles, nested flows as subroutine shapes,
    /// and edges carry their transition labels.
    pub fn to_mermaid(&self) -> String {
        use std::fmt::Write;

        let mut output = String::new();
        let _ = writeln!(output, "graph TD");

        if let Some(start) = self.start {
            let _ = writeln!(output, "    start([START]) --> {}", start);
        }
        for (index, record) in self.records.iter().enumerate() {
            let id = NodeId(index);
            let line = match record {
                NodeKind::Task(node) => format!("    {}[\"{}\"]", id, node.name()),
                NodeKind::Flow(flow) => format!("    {}[[\"{}\"]]", id, flow.name()),
                NodeKind::BatchFlow(flow) => format!("    {}[[\"{}\"]]", id, flow.name()),
            };
            let _ = writeln!(output, "{}", line);
        }

        let _ = writeln!(output);
        for (index, table) in self.successors.iter().enumerate() {
            let mut entries: Vec<_> = table.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            for (label, target) in entries {
                let _ = writeln!(output, "    {} -->|{}| {}", NodeId(index), label, target);
            }
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl Task for Noop {}

    fn noop(name: &str) -> Node {
        Node::new(name, Noop)
    }

    #[test]
    fn test_builder_basic() {
        let mut builder = FlowGraphBuilder::new();
        let a = builder.add_node(noop("a"));
        let b = builder.add_node(noop("b"));
        builder.connect(a, "next", b);
        builder.start(a);

        let graph = builder.build().unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.start(), Some(a));
        assert_eq!(graph.successor(a, &"next".into()), Some(b));
        assert_eq!(graph.successor(a, &Label::default()), None);
        assert!(graph.has_successors(a));
        assert!(!graph.has_successors(b));
    }

    #[test]
    fn test_connect_returns_target_for_chaining() {
        let mut builder = FlowGraphBuilder::new();
        let a = builder.add_node(noop("a"));
        let b = builder.add_node(noop("b"));
        let c = builder.add_node(noop("c"));

        let next = builder.connect_default(a, b);
        builder.connect_default(next, c);
        builder.start(a);

        let graph = builder.build().unwrap();
        assert_eq!(graph.successor(a, &Label::default()), Some(b));
        assert_eq!(graph.successor(b, &Label::default()), Some(c));
    }

    #[test]
    fn test_duplicate_label_overwrites() {
        let mut builder = FlowGraphBuilder::new();
        let a = builder.add_node(noop("a"));
        let b = builder.add_node(noop("b"));
        let c = builder.add_node(noop("c"));
        builder.connect(a, "go", b);
        builder.connect(a, "go", c);
        builder.start(a);

        let graph = builder.build().unwrap();
        // Rebinding wins; the previous target is dropped with a warning.
        assert_eq!(graph.successor(a, &"go".into()), Some(c));
        assert_eq!(graph.successors[a.0].len(), 1);
    }

    #[test]
    fn test_foreign_id_rejected_at_build() {
        let mut other = FlowGraphBuilder::new();
        let foreign = other.add_node(noop("x"));
        let _ = other.add_node(noop("y"));

        let mut builder = FlowGraphBuilder::new();
        let a = builder.add_node(noop("a"));
        let bad = NodeId(foreign.0 + 5);
        builder.connect(a, "next", bad);

        let err = builder.build().unwrap_err();
        assert_eq!(err, GraphBuildError::UnknownNode { id: bad.0, len: 1 });
    }

    #[test]
    fn test_graph_without_start_is_legal() {
        let mut builder = FlowGraphBuilder::new();
        builder.add_node(noop("orphan"));
        let graph = builder.build().unwrap();
        assert_eq!(graph.start(), None);
    }

    #[test]
    fn test_mermaid_rendering() {
        let mut builder = FlowGraphBuilder::new();
        let a = builder.add_node(noop("decide"));
        let b = builder.add_node(noop("search"));
        builder.connect(a, "search", b);
        builder.connect(b, "decide", a);
        builder.start(a);

        let diagram = builder.build().unwrap().to_mermaid();
        assert!(diagram.starts_with("graph TD"));
        assert!(diagram.contains("start([START]) --> n0"));
        assert!(diagram.contains("n0[\"decide\"]"));
        assert!(diagram.contains("n0 -->|search| n1"));
        assert!(diagram.contains("n1 -->|decide| n0"));
    }
}
