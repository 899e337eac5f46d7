//! Flow orchestration: graph traversal, retry execution, and batch flows.
//!
//! A [`Flow`] walks its graph from the start node: bind the per-step run
//! parameters, run the current node's full lifecycle, look up the next node
//! by the returned transition label, and stop when no successor matches.
//! The flow's result is the last label produced, which is what lets a flow
//! sit as a node inside a larger flow.
//!
//! Retry state is a local of each execute-with-retry call, so revisiting a
//! node in a loop or running the same graph from several traversals at once
//! can never observe another execution's attempt counter or parameter
//! binding.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{join_all, BoxFuture};
use serde_json::Value;
use uuid::Uuid;

use crate::context::{RunParams, SharedContext};
use crate::error::FlowError;
use crate::graph::{FlowGraph, NodeKind};
use crate::label::Label;
use crate::task::{BatchMode, Node};

/// Run a task's execute phase under the node's retry policy.
///
/// The attempt counter lives on this call's stack, never on the node.
/// On the final failed attempt the task's fallback receives the prepare
/// result and the last error; its result (or re-raised error) is the
/// outcome of the whole cycle.
async fn execute_with_retry(node: &Node, prep: &Value) -> Result<Value, FlowError> {
    let policy = node.retry();
    let mut attempt = 0usize;
    loop {
        match node.task().execute(prep).await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if policy.is_last_attempt(attempt) {
                    tracing::debug!(
                        node = %node.name(),
                        attempts = attempt + 1,
                        error = %error,
                        "execute attempts exhausted, invoking fallback"
                    );
                    return node.task().fallback(prep, error).await;
                }
                tracing::debug!(
                    node = %node.name(),
                    attempt = attempt,
                    error = %error,
                    "execute failed, retrying"
                );
                if !policy.wait.is_zero() {
                    tokio::time::sleep(policy.wait).await;
                }
                attempt += 1;
            }
        }
    }
}

fn batch_items<'a>(node: &Node, prep: &'a Value) -> Result<&'a Vec<Value>, FlowError> {
    prep.as_array().ok_or_else(|| FlowError::BatchPrepNotArray {
        node: node.name().to_string(),
    })
}

/// Run one node's full prepare/execute/finalize lifecycle.
///
/// In the batched modes the execute-with-retry cycle applies to each
/// element of the prepare result independently; results are collected in
/// input order into the array handed to finalize. One item's retry
/// exhaustion only aborts the node if that item's fallback re-raises.
pub(crate) async fn run_node_lifecycle(
    node: &Node,
    ctx: &SharedContext,
    params: &RunParams,
) -> Result<Label, FlowError> {
    let task = node.task();
    let prep = task.prepare(ctx, params).await?;

    let exec = match node.batch() {
        BatchMode::Off => execute_with_retry(node, &prep).await?,
        BatchMode::Sequential => {
            let items = batch_items(node, &prep)?;
            let mut results = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                let value = execute_with_retry(node, item)
                    .await
                    .map_err(|error| FlowError::batch_item(index, error))?;
                results.push(value);
            }
            Value::Array(results)
        }
        BatchMode::Concurrent => {
            let items = batch_items(node, &prep)?;
            // All cycles run jointly; nothing is cancelled when a sibling
            // fails. The first fatal error in input order wins afterwards.
            let outcomes = join_all(items.iter().map(|item| execute_with_retry(node, item))).await;
            let mut results = Vec::with_capacity(outcomes.len());
            for (index, outcome) in outcomes.into_iter().enumerate() {
                results.push(outcome.map_err(|error| FlowError::batch_item(index, error))?);
            }
            Value::Array(results)
        }
    };

    task.finalize(ctx, &prep, &exec).await
}

/// Dispatch one traversal step through the node-kind union.
async fn run_step(
    kind: &NodeKind,
    ctx: &SharedContext,
    params: &RunParams,
) -> Result<Label, FlowError> {
    match kind {
        NodeKind::Task(node) => run_node_lifecycle(node, ctx, params).await,
        NodeKind::Flow(sub) => {
            // Boxed to bound the future type of nested traversals.
            let fut: BoxFuture<'_, Result<Label, FlowError>> = Box::pin(sub.run_with(ctx, params));
            fut.await
        }
        NodeKind::BatchFlow(sub) => {
            let fut: BoxFuture<'_, Result<Label, FlowError>> = Box::pin(sub.run_with(ctx, params));
            fut.await
        }
    }
}

/// Walk the graph once. Returns the last label produced; a graph without a
/// start node terminates immediately with the default label.
async fn orchestrate(
    graph: &FlowGraph,
    ctx: &SharedContext,
    params: &RunParams,
    flow_name: &str,
) -> Result<Label, FlowError> {
    let run_id = Uuid::new_v4();
    let mut current = graph.start();
    let mut label = Label::default();

    if current.is_none() {
        tracing::debug!(flow = %flow_name, run_id = %run_id, "no start node, nothing to run");
    }

    while let Some(id) = current {
        let name = graph.node_name(id).to_string();
        tracing::debug!(flow = %flow_name, run_id = %run_id, node = %name, "running node");

        label = run_step(graph.record(id), ctx, params)
            .await
            .map_err(|error| FlowError::node_failed(name.clone(), error))?;

        current = match graph.successor(id, &label) {
            Some(next) => Some(next),
            None => {
                if !label.is_default() {
                    tracing::warn!(
                        flow = %flow_name,
                        run_id = %run_id,
                        node = %name,
                        label = %label,
                        "no successor registered for transition label, ending traversal"
                    );
                }
                None
            }
        };
    }

    Ok(label)
}

/// Orchestrator over a node graph.
///
/// Cheap to share: the graph is behind an `Arc`, and a traversal needs only
/// `&self`, so independent traversals of the same flow can run at once.
#[derive(Debug, Clone)]
pub struct Flow {
    name: String,
    graph: Arc<FlowGraph>,
    params: RunParams,
}

impl Flow {
    /// Create a flow over a built graph.
    pub fn new(name: impl Into<String>, graph: FlowGraph) -> Self {
        Self {
            name: name.into(),
            graph: Arc::new(graph),
            params: RunParams::new(),
        }
    }

    /// Set the flow's base run parameters, bound to every node it runs.
    pub fn with_params(mut self, params: RunParams) -> Self {
        self.params = params;
        self
    }

    /// The flow's name, used for tracing and error attribution.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The underlying graph.
    pub fn graph(&self) -> &FlowGraph {
        &self.graph
    }

    /// The flow's base run parameters.
    pub fn params(&self) -> &RunParams {
        &self.params
    }

    /// Run one traversal against the given context, returning the final
    /// transition label. Mutations are observed through `ctx`; partial
    /// writes made before a fatal error remain visible.
    pub async fn run(&self, ctx: &SharedContext) -> Result<Label, FlowError> {
        self.run_with(ctx, &RunParams::new()).await
    }

    /// Run with additional parameter bindings merged over the flow's own.
    /// This is what a parent flow or batch flow calls per step.
    pub(crate) fn run_with<'a>(
        &'a self,
        ctx: &'a SharedContext,
        overrides: &'a RunParams,
    ) -> BoxFuture<'a, Result<Label, FlowError>> {
        Box::pin(async move {
            let params = self.params.merged(overrides);
            orchestrate(&self.graph, ctx, &params, &self.name).await
        })
    }

    /// Drive one traversal to completion on a private current-thread
    /// runtime, for callers without an async context.
    ///
    /// Not usable from inside a tokio runtime, and not recommended when
    /// nodes carry nonzero retry waits - prefer [`Flow::run`].
    pub fn run_blocking(&self, ctx: &SharedContext) -> Result<Label, FlowError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|error| FlowError::Runtime(error.to_string()))?;
        runtime.block_on(self.run(ctx))
    }
}

/// Collaborator that plans the parameter sets of a batch flow.
///
/// Invoked once per batch-flow run with the shared context and the flow's
/// merged base parameters; each returned set drives one full independent
/// traversal of the subgraph.
#[async_trait]
pub trait ParamSource: Send + Sync {
    async fn prepare(
        &self,
        ctx: &SharedContext,
        base: &RunParams,
    ) -> Result<Vec<RunParams>, FlowError>;
}

/// A fixed parameter list is the simplest source.
#[async_trait]
impl ParamSource for Vec<RunParams> {
    async fn prepare(
        &self,
        _ctx: &SharedContext,
        _base: &RunParams,
    ) -> Result<Vec<RunParams>, FlowError> {
        Ok(self.clone())
    }
}

/// A flow re-run once per parameter set produced by its [`ParamSource`].
///
/// Sequential by default; [`concurrent`](BatchFlow::concurrent) launches
/// every traversal together (the parallel batch flow). Traversals share
/// only the context: each gets its own merged parameter binding and its
/// own per-step retry state. Error policy matches the batched node policy:
/// all traversals run to completion, then the first fatal error in input
/// order aborts the batch. The final label of a successful batch is the
/// default label.
pub struct BatchFlow {
    name: String,
    flow: Arc<Flow>,
    source: Arc<dyn ParamSource>,
    concurrent: bool,
}

impl BatchFlow {
    /// Create a sequential batch flow.
    pub fn new(
        name: impl Into<String>,
        flow: Flow,
        source: impl ParamSource + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            flow: Arc::new(flow),
            source: Arc::new(source),
            concurrent: false,
        }
    }

    /// Launch all traversals together instead of one at a time.
    pub fn concurrent(mut self) -> Self {
        self.concurrent = true;
        self
    }

    /// The batch flow's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether traversals run concurrently.
    pub fn is_concurrent(&self) -> bool {
        self.concurrent
    }

    /// Run the whole batch against the given context.
    pub async fn run(&self, ctx: &SharedContext) -> Result<Label, FlowError> {
        self.run_with(ctx, &RunParams::new()).await
    }

    pub(crate) async fn run_with(
        &self,
        ctx: &SharedContext,
        overrides: &RunParams,
    ) -> Result<Label, FlowError> {
        let base = self.flow.params().merged(overrides);
        let sets = self.source.prepare(ctx, &base).await?;
        tracing::debug!(
            flow = %self.name,
            traversals = sets.len(),
            concurrent = self.concurrent,
            "starting batch flow"
        );

        if self.concurrent {
            let mut handles = Vec::with_capacity(sets.len());
            for set in sets {
                let flow = Arc::clone(&self.flow);
                let ctx = ctx.clone();
                let params = base.merged(&set);
                handles.push(tokio::spawn(
                    async move { flow.run_with(&ctx, &params).await },
                ));
            }

            // Await every traversal before surfacing anything, so sibling
            // fallbacks always get to run.
            let mut first_error = None;
            for (index, handle) in handles.into_iter().enumerate() {
                let outcome = match handle.await {
                    Ok(result) => result.map_err(|error| FlowError::batch_item(index, error)),
                    Err(join) => Err(FlowError::Join(join.to_string())),
                };
                if let Err(error) = outcome {
                    first_error.get_or_insert(error);
                }
            }
            if let Some(error) = first_error {
                return Err(error);
            }
        } else {
            for (index, set) in sets.iter().enumerate() {
                let params = base.merged(set);
                self.flow
                    .run_with(ctx, &params)
                    .await
                    .map_err(|error| FlowError::batch_item(index, error))?;
            }
        }

        Ok(Label::default())
    }
}

impl std::fmt::Debug for BatchFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchFlow")
            .field("name", &self.name)
            .field("flow", &self.flow)
            .field("concurrent", &self.concurrent)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::FlowGraphBuilder;
    use crate::retry::RetryPolicy;
    use crate::task::Task;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails the first `failures` execute calls, then succeeds.
    struct Flaky {
        failures: usize,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Task for Flaky {
        async fn execute(&self, _prep: &Value) -> Result<Value, FlowError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(FlowError::execution(format!("attempt {} failed", call)))
            } else {
                Ok(json!("ok"))
            }
        }

        async fn finalize(
            &self,
            ctx: &SharedContext,
            _prep: &Value,
            exec: &Value,
        ) -> Result<Label, FlowError> {
            ctx.insert("result", exec.clone())?;
            Ok(Label::default())
        }
    }

    /// Always fails; counts fallback invocations and records the last error.
    struct Doomed {
        fallback_calls: Arc<AtomicUsize>,
        tolerant: bool,
    }

    #[async_trait]
    impl Task for Doomed {
        async fn execute(&self, _prep: &Value) -> Result<Value, FlowError> {
            Err(FlowError::execution("doomed"))
        }

        async fn fallback(&self, _prep: &Value, error: FlowError) -> Result<Value, FlowError> {
            self.fallback_calls.fetch_add(1, Ordering::SeqCst);
            if self.tolerant {
                Ok(json!("sentinel"))
            } else {
                Err(error)
            }
        }
    }

    fn single_node_flow(node: Node) -> Flow {
        let mut builder = FlowGraphBuilder::new();
        let id = builder.add_node(node);
        builder.start(id);
        Flow::new("test", builder.build().unwrap())
    }

    #[tokio::test]
    async fn test_retry_succeeds_without_fallback() {
        let calls = Arc::new(AtomicUsize::new(0));
        let node = Node::new(
            "flaky",
            Flaky {
                failures: 2,
                calls: Arc::clone(&calls),
            },
        )
        .with_retry(RetryPolicy::new(3));

        let ctx = SharedContext::new();
        let label = single_node_flow(node).run(&ctx).await.unwrap();
        assert!(label.is_default());
        assert_eq!(ctx.get("result"), Some(json!("ok")));
        // k attempts total: k - 1 failures then one success.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_invokes_fallback_once() {
        let fallback_calls = Arc::new(AtomicUsize::new(0));
        let node = Node::new(
            "doomed",
            Doomed {
                fallback_calls: Arc::clone(&fallback_calls),
                tolerant: false,
            },
        )
        .with_retry(RetryPolicy::new(3));

        let ctx = SharedContext::new();
        let err = single_node_flow(node).run(&ctx).await.unwrap_err();
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err.root(), FlowError::Execution(m) if m == "doomed"));
    }

    #[tokio::test]
    async fn test_tolerant_fallback_recovers() {
        let fallback_calls = Arc::new(AtomicUsize::new(0));
        let node = Node::new(
            "doomed",
            Doomed {
                fallback_calls: Arc::clone(&fallback_calls),
                tolerant: true,
            },
        );

        let ctx = SharedContext::new();
        let label = single_node_flow(node).run(&ctx).await.unwrap();
        assert!(label.is_default());
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_flow_without_start_returns_default() {
        let flow = Flow::new("empty", FlowGraphBuilder::new().build().unwrap());
        let label = flow.run(&SharedContext::new()).await.unwrap();
        assert!(label.is_default());
    }

    /// Echoes a configured label and appends its name to a context log.
    struct Hop {
        name: &'static str,
        label: &'static str,
    }

    #[async_trait]
    impl Task for Hop {
        async fn finalize(
            &self,
            ctx: &SharedContext,
            _prep: &Value,
            _exec: &Value,
        ) -> Result<Label, FlowError> {
            ctx.update("visits", |current| {
                let mut visits = current
                    .and_then(|v| v.as_array().cloned())
                    .unwrap_or_default();
                visits.push(json!(self.name));
                Value::Array(visits)
            });
            Ok(Label::new(self.label))
        }
    }

    #[tokio::test]
    async fn test_traversal_follows_labels() {
        let mut builder = FlowGraphBuilder::new();
        let a = builder.add_node(Node::new("a", Hop { name: "a", label: "x" }));
        let b = builder.add_node(Node::new("b", Hop { name: "b", label: "done" }));
        builder.connect(a, "x", b);
        builder.start(a);

        let ctx = SharedContext::new();
        let flow = Flow::new("ab", builder.build().unwrap());
        let label = flow.run(&ctx).await.unwrap();

        assert_eq!(label, Label::new("done"));
        assert_eq!(ctx.get("visits"), Some(json!(["a", "b"])));
    }

    #[tokio::test]
    async fn test_unmatched_label_terminates_without_error() {
        let mut builder = FlowGraphBuilder::new();
        let a = builder.add_node(Node::new("a", Hop { name: "a", label: "nowhere" }));
        let b = builder.add_node(Node::new("b", Hop { name: "b", label: "done" }));
        builder.connect(a, "elsewhere", b);
        builder.start(a);

        let ctx = SharedContext::new();
        let label = Flow::new("f", builder.build().unwrap())
            .run(&ctx)
            .await
            .unwrap();

        assert_eq!(label, Label::new("nowhere"));
        assert_eq!(ctx.get("visits"), Some(json!(["a"])));
    }

    /// Doubles each number; records the prepare list it was handed.
    struct Doubler;

    #[async_trait]
    impl Task for Doubler {
        async fn prepare(
            &self,
            ctx: &SharedContext,
            _params: &RunParams,
        ) -> Result<Value, FlowError> {
            Ok(ctx.get("numbers").unwrap_or(json!([])))
        }

        async fn execute(&self, item: &Value) -> Result<Value, FlowError> {
            let n = item
                .as_i64()
                .ok_or_else(|| FlowError::execution("not a number"))?;
            Ok(json!(n * 2))
        }

        async fn finalize(
            &self,
            ctx: &SharedContext,
            _prep: &Value,
            exec: &Value,
        ) -> Result<Label, FlowError> {
            ctx.insert("doubled", exec.clone())?;
            Ok(Label::default())
        }
    }

    #[tokio::test]
    async fn test_sequential_batch_preserves_order() {
        let ctx = SharedContext::new();
        ctx.insert("numbers", json!([1, 2, 3])).unwrap();

        let node = Node::new("double", Doubler).with_batch(BatchMode::Sequential);
        single_node_flow(node).run(&ctx).await.unwrap();
        assert_eq!(ctx.get("doubled"), Some(json!([2, 4, 6])));
    }

    #[tokio::test]
    async fn test_concurrent_batch_preserves_result_order() {
        let ctx = SharedContext::new();
        ctx.insert("numbers", json!([5, 6, 7, 8])).unwrap();

        let node = Node::new("double", Doubler).with_batch(BatchMode::Concurrent);
        single_node_flow(node).run(&ctx).await.unwrap();
        assert_eq!(ctx.get("doubled"), Some(json!([10, 12, 14, 16])));
    }

    #[tokio::test]
    async fn test_batch_requires_array_prepare() {
        let ctx = SharedContext::new();
        ctx.insert("numbers", json!("not a list")).unwrap();

        let node = Node::new("double", Doubler).with_batch(BatchMode::Sequential);
        let err = single_node_flow(node).run(&ctx).await.unwrap_err();
        assert!(matches!(
            err.root(),
            FlowError::BatchPrepNotArray { node } if node == "double"
        ));
    }

    #[tokio::test]
    async fn test_batch_item_failure_is_attributed() {
        let ctx = SharedContext::new();
        ctx.insert("numbers", json!([1, "two", 3])).unwrap();

        let node = Node::new("double", Doubler).with_batch(BatchMode::Concurrent);
        let err = single_node_flow(node).run(&ctx).await.unwrap_err();
        match err {
            FlowError::NodeFailed { source, .. } => match *source {
                FlowError::BatchItem { index, .. } => assert_eq!(index, 1),
                other => panic!("expected batch item error, got {other}"),
            },
            other => panic!("expected node failure, got {other}"),
        }
    }

    #[test]
    fn test_run_blocking() {
        let ctx = SharedContext::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let node = Node::new(
            "flaky",
            Flaky {
                failures: 0,
                calls,
            },
        );
        let label = single_node_flow(node).run_blocking(&ctx).unwrap();
        assert!(label.is_default());
        assert_eq!(ctx.get("result"), Some(json!("ok")));
    }
}
