//! Execution progress events
//!
//! The engine emits structured events through a caller-supplied
//! [`EventSink`] and mirrors them on the stream returned by
//! [`ExecutionEngine::run`](crate::engine::ExecutionEngine::run). Per node
//! the order is `node_start` followed by exactly one of `node_complete`,
//! `node_skipped`, or `node_error`. Across nodes dispatched in the same
//! round no ordering is guaranteed.
//!
//! Sinks may be synchronous or asynchronous; [`FnSink`] adapts a plain
//! closure, [`ChannelSink`] forwards into an mpsc channel, and
//! [`CollectSink`] buffers events for inspection in tests.

use crate::context::SkipReason;
use crate::output::TokenUsage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// One progress event, serializable in the wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// Run started; carries the planned node order
    ExecutionStarted {
        /// Run id
        execution_id: String,
        /// Topological order the scheduler will follow
        order: Vec<String>,
    },
    /// A node was dispatched
    NodeStart {
        /// Run id
        execution_id: String,
        /// Dispatched node
        node_id: String,
    },
    /// A node finished successfully
    NodeComplete {
        /// Run id
        execution_id: String,
        /// Completed node
        node_id: String,
        /// Output value
        output: Value,
        /// Handler metadata
        metadata: Map<String, Value>,
        /// Token usage, for LLM-backed nodes
        #[serde(skip_serializing_if = "Option::is_none")]
        token_usage: Option<TokenUsage>,
    },
    /// A node was skipped before execution
    NodeSkipped {
        /// Run id
        execution_id: String,
        /// Skipped node
        node_id: String,
        /// Why it was skipped
        reason: SkipReason,
    },
    /// A node handler failed
    NodeError {
        /// Run id
        execution_id: String,
        /// Failing node
        node_id: String,
        /// Error message
        error: String,
    },
    /// Run finished; carries the final context summary
    ExecutionComplete {
        /// Run id
        execution_id: String,
        /// Order actually executed
        order: Vec<String>,
        /// Output value per node
        outputs: HashMap<String, Value>,
        /// Skip reasons per node
        skipped: HashMap<String, SkipReason>,
        /// Token totals for the run
        total_tokens: TokenUsage,
    },
    /// Run failed
    ExecutionFailed {
        /// Run id
        execution_id: String,
        /// Failure description
        error: String,
    },
}

impl ExecutionEvent {
    /// Node this event refers to, when node-scoped.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::NodeStart { node_id, .. }
            | Self::NodeComplete { node_id, .. }
            | Self::NodeSkipped { node_id, .. }
            | Self::NodeError { node_id, .. } => Some(node_id),
            _ => None,
        }
    }
}

/// Consumer of execution events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver one event. Implementations should not block the scheduler
    /// longer than necessary; slow consumers delay the run.
    async fn emit(&self, event: ExecutionEvent);
}

/// Sink that discards every event.
#[derive(Default)]
pub struct NullSink;

#[async_trait]
impl EventSink for NullSink {
    async fn emit(&self, _event: ExecutionEvent) {}
}

/// Adapter for synchronous consumers.
pub struct FnSink {
    callback: Box<dyn Fn(ExecutionEvent) + Send + Sync>,
}

impl FnSink {
    /// Wrap a synchronous callback as a sink.
    pub fn new(callback: impl Fn(ExecutionEvent) + Send + Sync + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }
}

#[async_trait]
impl EventSink for FnSink {
    async fn emit(&self, event: ExecutionEvent) {
        (self.callback)(event);
    }
}

/// Sink forwarding events into an unbounded channel.
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelSink {
    /// Wrap a channel sender as a sink.
    pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
        Self { sender }
    }

    /// Create a sink together with the stream of events it feeds.
    pub fn pair() -> (
        Arc<Self>,
        tokio_stream::wrappers::UnboundedReceiverStream<ExecutionEvent>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self::new(tx)),
            tokio_stream::wrappers::UnboundedReceiverStream::new(rx),
        )
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn emit(&self, event: ExecutionEvent) {
        // Receiver dropped means nobody is listening anymore.
        let _ = self.sender.send(event);
    }
}

/// Sink buffering events in memory, for tests and debugging.
#[derive(Default)]
pub struct CollectSink {
    events: tokio::sync::Mutex<Vec<ExecutionEvent>>,
}

impl CollectSink {
    /// Create an empty collector.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of the events received so far.
    pub async fn events(&self) -> Vec<ExecutionEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl EventSink for CollectSink {
    async fn emit(&self, event: ExecutionEvent) {
        self.events.lock().await.push(event);
    }
}
