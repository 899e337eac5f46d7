//! Error types for the task-graph runtime.
//!
//! The engine does not distinguish a task's own logic failures from the
//! failures of collaborators a task calls (network, parsing, model calls):
//! both surface as execute failures subject to the node's retry policy.
//! Only fallback exhaustion escalates into a fatal error that aborts the
//! enclosing traversal.

use thiserror::Error;

/// Errors that can occur while running a task or traversing a flow.
#[derive(Debug, Error)]
pub enum FlowError {
    /// A task phase failed with a message.
    ///
    /// This is the variant task implementations raise directly; under the
    /// retry policy it is retryable until attempts are exhausted.
    #[error("execution failed: {0}")]
    Execution(String),

    /// A collaborator reachable from a task phase failed.
    ///
    /// Indistinguishable from [`FlowError::Execution`] as far as retry is
    /// concerned; the engine imposes no schema on collaborator errors.
    #[error("collaborator error: {message}")]
    Collaborator {
        message: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A node's lifecycle failed fatally (retries and fallback exhausted).
    #[error("node '{node}' failed")]
    NodeFailed {
        node: String,
        #[source]
        source: Box<FlowError>,
    },

    /// One item of a batched execution failed fatally.
    #[error("batch item {index} failed")]
    BatchItem {
        index: usize,
        #[source]
        source: Box<FlowError>,
    },

    /// A spawned batch traversal could not be joined.
    #[error("join error: {0}")]
    Join(String),

    /// The blocking facade could not construct its runtime.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// A context value could not be serialized or deserialized.
    #[error("serialization error")]
    Serialization(#[from] serde_json::Error),

    /// A batched node's prepare phase did not produce a sequence.
    #[error("batched node '{node}' prepare did not return an array")]
    BatchPrepNotArray { node: String },
}

impl FlowError {
    /// Create an execution failure with a message.
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }

    /// Wrap a collaborator error (HTTP, model call, persistence, ...).
    pub fn collaborator(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Collaborator {
            message: source.to_string(),
            source: Box::new(source),
        }
    }

    /// Attribute a fatal error to a named node.
    pub fn node_failed(node: impl Into<String>, source: FlowError) -> Self {
        Self::NodeFailed {
            node: node.into(),
            source: Box::new(source),
        }
    }

    /// Attribute a fatal error to a batch item by input position.
    pub fn batch_item(index: usize, source: FlowError) -> Self {
        Self::BatchItem {
            index,
            source: Box::new(source),
        }
    }

    /// Walk to the innermost engine error, stripping attribution wrappers.
    pub fn root(&self) -> &FlowError {
        match self {
            FlowError::NodeFailed { source, .. } => source.root(),
            FlowError::BatchItem { source, .. } => source.root(),
            other => other,
        }
    }
}
