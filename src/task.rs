//! Task contract and leaf node configuration.
//!
//! A task is the atomic unit of work: `prepare` reads the shared context,
//! `execute` transforms the prepare result, `finalize` writes back to the
//! context and returns the transition label. `execute` deliberately receives
//! only the prepare result - no context - so the engine can retry it,
//! fan it out per batch item, or run it concurrently without re-reading
//! mutable shared state.
//!
//! Every phase is suspendable; a synchronous task simply returns without
//! awaiting anything. All phases have default implementations, so an
//! implementor overrides only what it needs.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::{RunParams, SharedContext};
use crate::error::FlowError;
use crate::label::Label;
use crate::retry::RetryPolicy;

/// The three-phase task contract.
///
/// Phase results are plain JSON values: the context is an open-ended map,
/// and keeping `prepare`/`execute` results in the same representation lets
/// heterogeneous tasks share one graph without generics at the seams.
///
/// # Example
///
/// ```ignore
/// struct Greet;
///
/// #[async_trait]
/// impl Task for Greet {
///     async fn prepare(&self, ctx: &SharedContext, _params: &RunParams) -> Result<Value, FlowError> {
///         Ok(ctx.get("name").unwrap_or(Value::Null))
///     }
///
///     async fn execute(&self, prep: &Value) -> Result<Value, FlowError> {
///         Ok(json!(format!("hello, {}", prep.as_str().unwrap_or("world"))))
///     }
///
///     async fn finalize(&self, ctx: &SharedContext, _prep: &Value, exec: &Value) -> Result<Label, FlowError> {
///         ctx.insert("greeting", exec.clone())?;
///         Ok(Label::default())
///     }
/// }
/// ```
#[async_trait]
pub trait Task: Send + Sync {
    /// Read whatever the task needs from the shared context and bound run
    /// parameters. All context reads belong here.
    async fn prepare(&self, _ctx: &SharedContext, _params: &RunParams) -> Result<Value, FlowError> {
        Ok(Value::Null)
    }

    /// Transform the prepare result. Runs under the node's retry policy and
    /// must not touch the shared context.
    async fn execute(&self, _prep: &Value) -> Result<Value, FlowError> {
        Ok(Value::Null)
    }

    /// Write results back to the shared context and pick the transition
    /// label. All context writes belong here.
    async fn finalize(
        &self,
        _ctx: &SharedContext,
        _prep: &Value,
        _exec: &Value,
    ) -> Result<Label, FlowError> {
        Ok(Label::default())
    }

    /// Invoked once when every execute attempt has failed, with the prepare
    /// result and the last error. The default re-raises, making exhaustion
    /// fatal; override to turn a terminal error into a sentinel result for
    /// `finalize` to consume.
    async fn fallback(&self, _prep: &Value, error: FlowError) -> Result<Value, FlowError> {
        Err(error)
    }
}

/// Shared task handle for dynamic dispatch.
pub type BoxedTask = Arc<dyn Task>;

/// How a node's execute phase is applied to its prepare result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchMode {
    /// Execute once on the prepare result.
    #[default]
    Off,

    /// Prepare must yield an array; execute-with-retry runs on each element
    /// one at a time, in input order.
    Sequential,

    /// Prepare must yield an array; all per-item execute-with-retry cycles
    /// are launched together and joined. Result order matches input order.
    /// Every item runs to completion; afterwards the first fatal item
    /// error, in input order, aborts the node.
    Concurrent,
}

/// A leaf node: a task plus its retry policy and batch mode.
///
/// Nodes carry no successor table and no retry state - successors live in
/// the flow graph, and each execution gets a private attempt counter - so a
/// node appearing at several points of a graph, or revisited in a loop,
/// never leaks state between visits.
#[derive(Clone)]
pub struct Node {
    name: String,
    task: BoxedTask,
    retry: RetryPolicy,
    batch: BatchMode,
}

impl Node {
    /// Create a node around a task.
    pub fn new(name: impl Into<String>, task: impl Task + 'static) -> Self {
        Self::from_arc(name, Arc::new(task))
    }

    /// Create a node around an already-shared task.
    pub fn from_arc(name: impl Into<String>, task: BoxedTask) -> Self {
        Self {
            name: name.into(),
            task,
            retry: RetryPolicy::default(),
            batch: BatchMode::Off,
        }
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the batch mode.
    pub fn with_batch(mut self, batch: BatchMode) -> Self {
        self.batch = batch;
        self
    }

    /// The node's name, used for tracing and error attribution.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The node's retry policy.
    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// The node's batch mode.
    pub fn batch(&self) -> BatchMode {
        self.batch
    }

    /// The wrapped task.
    pub fn task(&self) -> &BoxedTask {
        &self.task
    }

    /// Run this node's full lifecycle once, outside any flow.
    ///
    /// Legal and occasionally useful (testing a node in isolation); the
    /// returned label is simply handed back since there is no successor
    /// table to consult.
    pub async fn run(
        &self,
        ctx: &SharedContext,
        params: &RunParams,
    ) -> Result<Label, FlowError> {
        crate::flow::run_node_lifecycle(self, ctx, params).await
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("retry", &self.retry)
            .field("batch", &self.batch)
            .finish_non_exhaustive()
    }
}
