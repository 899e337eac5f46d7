//! taskflow: a minimal task-graph execution runtime.
//!
//! Composable task units connected by labeled transitions, executed by an
//! orchestrator that walks the graph until no transition applies. Intended
//! as an embeddable control-flow kernel for agentic pipelines - decision
//! loops, retries, batch and parallel fan-out - not as an integration with
//! any particular model or transport.
//!
//! # Core concepts
//!
//! - [`Task`]: the atomic prepare/execute/finalize unit; every phase is
//!   suspendable, and `execute` runs under the node's retry policy with a
//!   fallback on exhaustion.
//! - [`SharedContext`]: the mutable key/value store all nodes of one
//!   traversal communicate through.
//! - [`Label`]: the string transition tag finalize returns; the flow uses
//!   it to pick the next node from the successor table.
//! - [`Flow`]: the orchestrator; itself usable as a node inside a larger
//!   flow. [`BatchFlow`] re-runs a whole subgraph once per parameter set,
//!   sequentially or concurrently.
//!
//! # Example
//!
//! ```ignore
//! let mut builder = FlowGraphBuilder::new();
//! let decide = builder.add_node(Node::new("decide", Decide));
//! let search = builder.add_node(Node::new("search", Search).with_retry(RetryPolicy::new(3)));
//! let answer = builder.add_node(Node::new("answer", Answer));
//! builder.connect(decide, "search", search);
//! builder.connect(search, "decide", decide);
//! builder.connect(decide, "answer", answer);
//! builder.start(decide);
//!
//! let flow = Flow::new("agent", builder.build()?);
//! let ctx = SharedContext::new();
//! ctx.insert("question", "who are you?")?;
//! let label = flow.run(&ctx).await?;
//! ```

pub mod context;
pub mod error;
pub mod flow;
pub mod graph;
pub mod label;
pub mod retry;
pub mod task;

// Re-exports for convenience
pub use context::{RunParams, SharedContext};
pub use error::FlowError;
pub use flow::{BatchFlow, Flow, ParamSource};
pub use graph::{FlowGraph, FlowGraphBuilder, GraphBuildError, NodeId, NodeKind};
pub use label::{Label, DEFAULT_LABEL};
pub use retry::RetryPolicy;
pub use task::{BatchMode, BoxedTask, Node, Task};
