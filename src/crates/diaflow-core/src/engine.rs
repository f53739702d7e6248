//! Scheduler and execution engine
//!
//! The engine owns the execution context and drives a diagram to completion:
//!
//! ```text
//! build graph ── emit execution_started
//!      │
//!      ▼
//! ┌─ round ───────────────────────────────────────────────┐
//! │ ready ← pending nodes whose dependencies are met      │
//! │ skip policy per ready node (max-iteration, cascades)  │
//! │ dispatch the rest concurrently, join the round        │
//! │ merge results under the scheduler (single writer)     │
//! │ false conditions re-queue their loop members          │
//! └───────────────────────────────────────────────────────┘
//!      │
//!      ▼
//! emit execution_complete / execution_failed
//! ```
//!
//! Within one ready-set, handlers run in parallel against a read-only
//! context snapshot; all context mutation happens on the scheduler task
//! after the round joins. Concurrent `execute` calls on one engine
//! serialize on an internal lock.
//!
//! When no node is ready and none is running, the scheduler first prunes
//! branches that can never fire (condition resolved the other way, outside
//! any cycle), then re-polls briefly, and finally reports a deadlock with
//! the unresolvable set.

use crate::config::Settings;
use crate::context::{ExecutionContext, SkipReason};
use crate::conversation::ConversationManager;
use crate::diagram::Diagram;
use crate::error::{EngineError, Result};
use crate::events::{ChannelSink, EventSink, ExecutionEvent};
use crate::graph::{Graph, Node, NodeId, NodeKind};
use crate::handler::{
    FileService, HandlerRegistry, InteractiveHandler, LocalFileService, Services,
};
use crate::inputs::{self, ResolvedInputs};
use crate::llm::{LlmClient, LlmService};
use crate::output::NodeOutput;
use crate::resolver::DependencyResolver;
use crate::controller::{SkipDecision, SkipPolicy};
use futures::future::join_all;
use futures::Stream;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};

/// Cooperative cancellation signal for a run.
#[derive(Clone)]
pub struct CancelToken {
    sender: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    /// Create a token in the not-cancelled state.
    pub fn new() -> Self {
        Self {
            sender: Arc::new(watch::channel(false).0),
        }
    }

    /// Request cancellation. In-flight handlers are dropped at the next
    /// scheduler join point.
    pub fn cancel(&self) {
        let _ = self.sender.send(true);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        loop {
            if *receiver.borrow_and_update() {
                return;
            }
            if receiver.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-run options.
#[derive(Clone, Default)]
pub struct ExecutionOptions {
    /// Keep executing after a handler failure; downstream nodes whose only
    /// dependencies failed are skipped with `dependency_failed`
    pub continue_on_error: bool,
    /// On deadlock, skip the unresolvable nodes and finish instead of
    /// failing
    pub allow_partial: bool,
    /// Verbose scheduler logging
    pub debug_mode: bool,
    /// Run id; generated when absent
    pub execution_id: Option<String>,
    /// Override of the per-node timeout
    pub node_timeout: Option<Duration>,
    /// Override of the whole-run timeout
    pub execution_timeout: Option<Duration>,
    /// Callback for user_response nodes and interactive person jobs
    pub interactive: Option<Arc<dyn InteractiveHandler>>,
    /// Cooperative cancellation signal
    pub cancel: Option<CancelToken>,
    /// Pass-through fields consumed by handlers
    pub extra: Map<String, Value>,
}

/// Outcome of a run that started: the context, and the terminal error if
/// the run did not finish cleanly. Cancellation and timeouts still return
/// the partially populated context.
pub struct RunResult {
    /// Final execution context
    pub context: ExecutionContext,
    /// Terminal error, when the run failed
    pub error: Option<EngineError>,
}

impl RunResult {
    /// Whether the run completed without a terminal error.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Convert into a plain result, discarding the context on failure.
    pub fn into_result(self) -> Result<ExecutionContext> {
        match self.error {
            None => Ok(self.context),
            Some(error) => Err(error),
        }
    }
}

/// The diagram execution engine.
pub struct ExecutionEngine {
    settings: Arc<Settings>,
    handlers: Arc<HandlerRegistry>,
    llm: Option<Arc<LlmService>>,
    files: Option<Arc<dyn FileService>>,
    conversations: Arc<ConversationManager>,
    run_lock: Mutex<()>,
}

impl ExecutionEngine {
    /// Create an engine with the default handler set and a local file
    /// service rooted at the settings' base directory.
    pub fn new(settings: Settings) -> Self {
        let settings = Arc::new(settings);
        Self {
            files: Some(Arc::new(LocalFileService::new(settings.clone()))),
            settings,
            handlers: Arc::new(HandlerRegistry::with_defaults()),
            llm: None,
            conversations: Arc::new(ConversationManager::new()),
            run_lock: Mutex::new(()),
        }
    }

    /// Attach an LLM service.
    pub fn with_llm(mut self, llm: Arc<LlmService>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Attach a fixed LLM client (wrapped in a service with the engine's
    /// retry configuration).
    pub fn with_llm_client(self, client: Arc<dyn LlmClient>) -> Self {
        let service = Arc::new(LlmService::with_client(client, &self.settings));
        self.with_llm(service)
    }

    /// Replace the handler registry.
    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = Arc::new(handlers);
        self
    }

    /// Replace the file service.
    pub fn with_file_service(mut self, files: Arc<dyn FileService>) -> Self {
        self.files = Some(files);
        self
    }

    /// Conversation history shared with person-job handlers.
    pub fn conversations(&self) -> Arc<ConversationManager> {
        self.conversations.clone()
    }

    /// Execute a diagram, emitting events through `sink`.
    ///
    /// Returns `Err` only for failures before the run starts (invalid
    /// graph, invalid settings); those emit no events. Once started, the
    /// outcome is a [`RunResult`] whose context is populated as far as the
    /// run got.
    pub async fn execute(
        &self,
        diagram: &Diagram,
        options: ExecutionOptions,
        sink: Arc<dyn EventSink>,
    ) -> Result<RunResult> {
        self.settings.validate()?;
        let _guard = self.run_lock.lock().await;

        let graph = Arc::new(Graph::build(diagram)?);
        let execution_id = options
            .execution_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let persons = diagram
            .persons
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let api_keys = diagram
            .api_keys
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let mut ctx = ExecutionContext::new(graph.clone(), execution_id.clone(), persons, api_keys);
        ctx.options = options.extra.clone();

        let services = Services {
            llm: self.llm.clone(),
            files: self.files.clone(),
            conversations: Some(self.conversations.clone()),
            interactive: options.interactive.clone(),
            settings: self.settings.clone(),
        };

        tracing::info!(execution_id = %execution_id, nodes = graph.order().len(), "execution started");
        sink.emit(ExecutionEvent::ExecutionStarted {
            execution_id: execution_id.clone(),
            order: graph.order().to_vec(),
        })
        .await;

        let execution_timeout = options
            .execution_timeout
            .unwrap_or(self.settings.execution_timeout);
        let drive = self.drive(&mut ctx, &options, &services, &sink);
        let outcome = match tokio::time::timeout(execution_timeout, drive).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout {
                operation: "execution".to_string(),
                duration_ms: execution_timeout.as_millis() as u64,
            }),
        };

        match outcome {
            Ok(()) => {
                tracing::info!(execution_id = %execution_id, steps = ctx.order.len(), "execution complete");
                sink.emit(ExecutionEvent::ExecutionComplete {
                    execution_id,
                    order: ctx.order.clone(),
                    outputs: ctx
                        .outputs
                        .iter()
                        .map(|(k, v)| (k.clone(), v.value.clone()))
                        .collect(),
                    skipped: ctx.skipped.clone().into_iter().collect(),
                    total_tokens: ctx.total_tokens,
                })
                .await;
                Ok(RunResult {
                    context: ctx,
                    error: None,
                })
            }
            Err(error) => {
                tracing::error!(execution_id = %execution_id, error = %error, "execution failed");
                sink.emit(ExecutionEvent::ExecutionFailed {
                    execution_id,
                    error: error.to_string(),
                })
                .await;
                Ok(RunResult {
                    context: ctx,
                    error: Some(error),
                })
            }
        }
    }

    /// Execute a diagram and stream its events.
    ///
    /// Equivalent to [`execute`](Self::execute) with a channel sink; the
    /// stream ends after the terminal `execution_complete` or
    /// `execution_failed` event. Build failures surface as a single
    /// `execution_failed` item.
    pub fn run(
        &self,
        diagram: Diagram,
        options: ExecutionOptions,
    ) -> impl Stream<Item = ExecutionEvent> + Send + '_ {
        async_stream::stream! {
            let execution_id = options
                .execution_id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let options = ExecutionOptions {
                execution_id: Some(execution_id.clone()),
                ..options
            };

            let (tx, mut rx) = mpsc::unbounded_channel();
            let sink: Arc<dyn EventSink> = Arc::new(ChannelSink::new(tx));
            let exec = self.execute(&diagram, options, sink);
            tokio::pin!(exec);

            let mut done = false;
            let mut build_error = None;
            loop {
                tokio::select! {
                    result = &mut exec, if !done => {
                        done = true;
                        if let Err(e) = result {
                            build_error = Some(e);
                        }
                    }
                    event = rx.recv() => {
                        match event {
                            Some(event) => yield event,
                            None => break,
                        }
                    }
                }
            }
            if let Some(error) = build_error {
                yield ExecutionEvent::ExecutionFailed {
                    execution_id,
                    error: error.to_string(),
                };
            }
        }
    }

    async fn drive(
        &self,
        ctx: &mut ExecutionContext,
        options: &ExecutionOptions,
        services: &Services,
        sink: &Arc<dyn EventSink>,
    ) -> Result<()> {
        let graph = ctx.graph.clone();
        let order: Vec<NodeId> = graph.order().to_vec();
        let position: HashMap<&NodeId, usize> =
            order.iter().enumerate().map(|(i, id)| (id, i)).collect();
        let mut pending: BTreeSet<usize> = (0..order.len()).collect();
        let node_timeout = options.node_timeout.unwrap_or(self.settings.node_timeout);

        while !pending.is_empty() {
            if let Some(cancel) = &options.cancel {
                if cancel.is_cancelled() {
                    return Err(EngineError::Cancelled);
                }
            }

            let mut ready = self.ready_set(&order, &pending, ctx);
            if ready.is_empty() {
                if self.prune_dead_branches(ctx, &order, &mut pending, sink).await > 0 {
                    continue;
                }
                ready = self.poll_for_ready(&order, &pending, ctx).await;
                if ready.is_empty() {
                    let remaining: Vec<NodeId> =
                        pending.iter().map(|&i| order[i].clone()).collect();
                    if options.allow_partial {
                        for node_id in &remaining {
                            ctx.record_skip(node_id, SkipReason::UnmetDependencies, false);
                            sink.emit(ExecutionEvent::NodeSkipped {
                                execution_id: ctx.execution_id.clone(),
                                node_id: node_id.clone(),
                                reason: SkipReason::UnmetDependencies,
                            })
                            .await;
                        }
                        pending.clear();
                        break;
                    }
                    return Err(EngineError::Deadlock { remaining });
                }
            }

            if options.debug_mode {
                tracing::info!(ready = ?ready, "dispatching ready set");
            }

            for node_id in &ready {
                pending.remove(&position[node_id]);
            }

            // Decide skips and resolve inputs against the round-start
            // snapshot, then apply the skips before anything runs.
            let mut skips: Vec<(NodeId, SkipReason, bool)> = Vec::new();
            let mut to_run: Vec<(Node, Arc<dyn crate::handler::NodeHandler>, ResolvedInputs)> =
                Vec::new();
            let mut failures: Vec<(NodeId, EngineError)> = Vec::new();

            for node_id in &ready {
                let node = graph
                    .node(node_id)
                    .ok_or_else(|| EngineError::InvalidGraph(format!("unknown node {node_id}")))?;
                match SkipPolicy::evaluate(node, ctx) {
                    SkipDecision::Skip {
                        reason,
                        passthrough,
                    } => skips.push((node_id.clone(), reason, passthrough)),
                    SkipDecision::Run => match self.handlers.prepare(node, services) {
                        Ok(handler) => {
                            let resolved = inputs::resolve(node, ctx);
                            to_run.push((node.clone(), handler, resolved));
                        }
                        Err(e) => failures.push((node_id.clone(), e)),
                    },
                }
            }

            for (node_id, reason, passthrough) in &skips {
                sink.emit(ExecutionEvent::NodeStart {
                    execution_id: ctx.execution_id.clone(),
                    node_id: node_id.clone(),
                })
                .await;
                ctx.record_skip(node_id, *reason, *passthrough);
                tracing::debug!(node = %node_id, reason = %reason, "node skipped");
                sink.emit(ExecutionEvent::NodeSkipped {
                    execution_id: ctx.execution_id.clone(),
                    node_id: node_id.clone(),
                    reason: *reason,
                })
                .await;
            }

            // Validation failures are terminal for the node, not the run.
            for (node_id, error) in failures {
                sink.emit(ExecutionEvent::NodeStart {
                    execution_id: ctx.execution_id.clone(),
                    node_id: node_id.clone(),
                })
                .await;
                tracing::error!(node = %node_id, error = %error, "node validation failed");
                sink.emit(ExecutionEvent::NodeError {
                    execution_id: ctx.execution_id.clone(),
                    node_id: node_id.clone(),
                    error: error.to_string(),
                })
                .await;
                ctx.record_error(&node_id, error.to_string());
            }

            for (node, _, _) in &to_run {
                sink.emit(ExecutionEvent::NodeStart {
                    execution_id: ctx.execution_id.clone(),
                    node_id: node.id.clone(),
                })
                .await;
            }

            let results = {
                let snapshot: &ExecutionContext = ctx;
                let futures = to_run.iter().map(|(node, handler, resolved)| {
                    let inputs = resolved.clone();
                    async move {
                        match tokio::time::timeout(
                            node_timeout,
                            handler.execute(node, snapshot, inputs, services),
                        )
                        .await
                        {
                            Ok(result) => result,
                            Err(_) => Err(EngineError::Timeout {
                                operation: format!("node '{}'", node.id),
                                duration_ms: node_timeout.as_millis() as u64,
                            }),
                        }
                    }
                });
                let joined = join_all(futures);
                match &options.cancel {
                    Some(cancel) => {
                        tokio::select! {
                            results = joined => results,
                            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                        }
                    }
                    None => joined.await,
                }
            };

            // Merge results under the scheduler: the single-writer section.
            let mut completed_conditions: Vec<(NodeId, bool)> = Vec::new();
            let mut completed_nodes: Vec<NodeId> = Vec::new();
            for ((node, _, _), result) in to_run.iter().zip(results) {
                ctx.current_node = Some(node.id.clone());
                match result {
                    Ok(output) if output.is_skip() => {
                        // Handler-level skip; builtin handlers only produce
                        // these for exhausted iteration ceilings.
                        let passthrough = output.is_passthrough();
                        ctx.record_skip(&node.id, SkipReason::MaxIterations, passthrough);
                        sink.emit(ExecutionEvent::NodeSkipped {
                            execution_id: ctx.execution_id.clone(),
                            node_id: node.id.clone(),
                            reason: SkipReason::MaxIterations,
                        })
                        .await;
                    }
                    Ok(output) => {
                        self.apply_success(ctx, node, output, sink).await;
                        completed_nodes.push(node.id.clone());
                        if node.kind == NodeKind::Condition {
                            if let Some(value) = ctx.condition_value(&node.id) {
                                completed_conditions.push((node.id.clone(), value));
                            }
                        }
                    }
                    Err(error) => {
                        tracing::error!(node = %node.id, error = %error, "node execution failed");
                        sink.emit(ExecutionEvent::NodeError {
                            execution_id: ctx.execution_id.clone(),
                            node_id: node.id.clone(),
                            error: error.to_string(),
                        })
                        .await;
                        if !options.continue_on_error {
                            return Err(match error {
                                e @ EngineError::HandlerFailure { .. }
                                | e @ EngineError::Timeout { .. }
                                | e @ EngineError::Validation { .. } => e,
                                e => EngineError::handler(&node.id, e.to_string()),
                            });
                        }
                        ctx.record_error(&node.id, error.to_string());
                    }
                }
            }
            ctx.current_node = None;

            // Person-job loop bookkeeping and condition re-queues.
            for node_id in &completed_nodes {
                let Some(node) = graph.node(node_id) else {
                    continue;
                };
                if node.kind.is_person() {
                    ctx.first_only_consumed.insert(node_id.clone());
                    self.person_post_processing(ctx, node, &position, &mut pending);
                }
                self.reschedule_false_conditions(ctx, node_id, &position, &mut pending);
            }
            for (condition_id, value) in completed_conditions {
                if value {
                    continue;
                }
                let members = graph.loop_members(&condition_id);
                if members.is_empty() {
                    continue;
                }
                tracing::debug!(
                    condition = %condition_id,
                    members = members.len(),
                    "false condition re-queues loop members"
                );
                for member in members {
                    if member == condition_id {
                        // The condition re-enters pending when a loop
                        // member completes with fresh data.
                        continue;
                    }
                    pending.insert(position[&member]);
                }
            }
        }

        Ok(())
    }

    fn ready_set(
        &self,
        order: &[NodeId],
        pending: &BTreeSet<usize>,
        ctx: &ExecutionContext,
    ) -> Vec<NodeId> {
        pending
            .iter()
            .filter_map(|&i| {
                let node = ctx.graph.node(&order[i])?;
                DependencyResolver::is_ready(node, ctx).then(|| order[i].clone())
            })
            .collect()
    }

    /// Brief re-poll before declaring deadlock, bounded by
    /// `node_ready_max_polls` at `node_ready_poll_interval` apart.
    async fn poll_for_ready(
        &self,
        order: &[NodeId],
        pending: &BTreeSet<usize>,
        ctx: &ExecutionContext,
    ) -> Vec<NodeId> {
        for _ in 0..self.settings.node_ready_max_polls {
            tokio::time::sleep(self.settings.node_ready_poll_interval).await;
            let ready = self.ready_set(order, pending, ctx);
            if !ready.is_empty() {
                return ready;
            }
        }
        Vec::new()
    }

    /// Skip pending nodes that can never become ready because a condition
    /// resolved to the other branch outside any cycle. Cascades resolve in
    /// later rounds: released successors either run or hit the
    /// dependency-skip policy at dispatch.
    async fn prune_dead_branches(
        &self,
        ctx: &mut ExecutionContext,
        order: &[NodeId],
        pending: &mut BTreeSet<usize>,
        sink: &Arc<dyn EventSink>,
    ) -> usize {
        let mut pruned = Vec::new();
        for &i in pending.iter() {
            let node_id = &order[i];
            let Some(node) = ctx.graph.node(node_id) else {
                continue;
            };
            let mut saw_dead = false;
            let mut blocked_alive = false;
            for arrow in ctx.graph.incoming(node_id) {
                if DependencyResolver::is_first_only(arrow, node)
                    || DependencyResolver::arrow_met(arrow, ctx)
                {
                    continue;
                }
                if DependencyResolver::arrow_dead(arrow, ctx) {
                    saw_dead = true;
                } else {
                    blocked_alive = true;
                }
            }
            if saw_dead && !blocked_alive {
                pruned.push((i, node_id.clone()));
            }
        }

        for (i, node_id) in &pruned {
            pending.remove(i);
            ctx.record_skip(node_id, SkipReason::ConditionNotMet, false);
            tracing::debug!(node = %node_id, "pruned dead branch");
            sink.emit(ExecutionEvent::NodeSkipped {
                execution_id: ctx.execution_id.clone(),
                node_id: node_id.clone(),
                reason: SkipReason::ConditionNotMet,
            })
            .await;
        }
        pruned.len()
    }

    async fn apply_success(
        &self,
        ctx: &mut ExecutionContext,
        node: &Node,
        mut output: NodeOutput,
        sink: &Arc<dyn EventSink>,
    ) {
        output.node_id = Some(node.id.clone());
        if node.kind == NodeKind::Condition {
            let value = output
                .metadata
                .get("conditionResult")
                .and_then(Value::as_bool)
                .unwrap_or_else(|| truthy(&output.value));
            ctx.cond_val.insert(node.id.clone(), value);
        }

        sink.emit(ExecutionEvent::NodeComplete {
            execution_id: ctx.execution_id.clone(),
            node_id: node.id.clone(),
            output: output.value.clone(),
            metadata: output.metadata.clone(),
            token_usage: output.token_usage,
        })
        .await;

        ctx.record_success(&node.id, output);
        tracing::debug!(
            node = %node.id,
            count = ctx.execution_count(&node.id),
            "node complete"
        );
    }

    /// Person-job special case: below the ceiling the node goes straight
    /// back to pending so the loop continues without an explicit re-queue;
    /// at the ceiling it enters the terminal max-iteration state and any
    /// downstream condition that already completed is reset to re-evaluate
    /// the now-final output.
    fn person_post_processing(
        &self,
        ctx: &mut ExecutionContext,
        node: &Node,
        position: &HashMap<&NodeId, usize>,
        pending: &mut BTreeSet<usize>,
    ) {
        let Some(max) = node.max_iteration() else {
            return;
        };
        if ctx.execution_count(&node.id) < max {
            pending.insert(position[&node.id]);
            return;
        }

        ctx.maxiter_reached.insert(node.id.clone());
        tracing::debug!(node = %node.id, max, "person job reached max iterations");
        let downstream: Vec<NodeId> = ctx
            .graph
            .outgoing(&node.id)
            .map(|arrow| arrow.target.node_id.clone())
            .collect();
        for target in downstream {
            let Some(target_node) = ctx.graph.node(&target) else {
                continue;
            };
            if target_node.kind == NodeKind::Condition && ctx.has_output(&target) {
                pending.insert(position[&target]);
            }
        }
    }

    /// Re-enter a false condition into pending once one of its loop-member
    /// predecessors completes with fresh data, so it re-evaluates against
    /// the new state rather than racing the loop body.
    fn reschedule_false_conditions(
        &self,
        ctx: &ExecutionContext,
        completed: &NodeId,
        position: &HashMap<&NodeId, usize>,
        pending: &mut BTreeSet<usize>,
    ) {
        let targets: Vec<NodeId> = ctx
            .graph
            .outgoing(completed)
            .map(|arrow| arrow.target.node_id.clone())
            .collect();
        for target in targets {
            let Some(node) = ctx.graph.node(&target) else {
                continue;
            };
            if node.kind == NodeKind::Condition && ctx.condition_value(&target) == Some(false) {
                pending.insert(position[&target]);
            }
        }
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectSink;
    use serde_json::json;

    fn fast_settings() -> Settings {
        let mut settings = Settings::from_env();
        settings.node_ready_max_polls = 2;
        settings.node_ready_poll_interval = Duration::from_millis(1);
        settings
    }

    fn linear_diagram() -> Diagram {
        Diagram::from_value(json!({
            "nodes": {
                "s": {"type": "start", "data": {"output": "hello"}},
                "e": {"type": "endpoint", "data": {"save_to_file": false}},
            },
            "arrows": {"a1": {"source": "s", "target": "e"}},
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn linear_run_produces_expected_events() {
        let engine = ExecutionEngine::new(fast_settings());
        let sink = CollectSink::new();
        let result = engine
            .execute(&linear_diagram(), ExecutionOptions::default(), sink.clone())
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(result.context.execution_count("s"), 1);
        assert_eq!(result.context.execution_count("e"), 1);

        let kinds: Vec<&'static str> = sink
            .events()
            .await
            .iter()
            .map(|e| match e {
                ExecutionEvent::ExecutionStarted { .. } => "started",
                ExecutionEvent::NodeStart { .. } => "node_start",
                ExecutionEvent::NodeComplete { .. } => "node_complete",
                ExecutionEvent::NodeSkipped { .. } => "node_skipped",
                ExecutionEvent::NodeError { .. } => "node_error",
                ExecutionEvent::ExecutionComplete { .. } => "complete",
                ExecutionEvent::ExecutionFailed { .. } => "failed",
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                "started",
                "node_start",
                "node_complete",
                "node_start",
                "node_complete",
                "complete",
            ]
        );
    }

    #[tokio::test]
    async fn invalid_graph_emits_no_events() {
        let engine = ExecutionEngine::new(fast_settings());
        let sink = CollectSink::new();
        let diagram = Diagram::from_value(json!({
            "nodes": {"e": {"type": "endpoint", "data": {}}},
            "arrows": {},
        }))
        .unwrap();
        let result = engine
            .execute(&diagram, ExecutionOptions::default(), sink.clone())
            .await;
        assert!(matches!(result, Err(EngineError::InvalidGraph(_))));
        assert!(sink.events().await.is_empty());
    }

    #[tokio::test]
    async fn cancelled_before_start_fails_with_cancelled() {
        let engine = ExecutionEngine::new(fast_settings());
        let cancel = CancelToken::new();
        cancel.cancel();
        let options = ExecutionOptions {
            cancel: Some(cancel),
            ..Default::default()
        };
        let result = engine
            .execute(&linear_diagram(), options, CollectSink::new())
            .await
            .unwrap();
        assert!(matches!(result.error, Some(EngineError::Cancelled)));
    }

    #[test]
    fn truthiness() {
        assert!(!truthy(&json!(null)));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!("")));
        assert!(truthy(&json!("x")));
        assert!(truthy(&json!(1.5)));
        assert!(truthy(&json!({"a": 1})));
        assert!(!truthy(&json!([])));
    }
}
