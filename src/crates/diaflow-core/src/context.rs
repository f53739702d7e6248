//! Per-run execution state
//!
//! [`ExecutionContext`] is created when a run starts and destroyed when the
//! engine returns. It is mutated only by the scheduler task (single-writer
//! discipline): handlers receive a shared reference and return results, they
//! never write. Everything downstream readiness depends on lives here:
//! outputs, execution counts, condition values, skip records, and the order
//! actually taken.

use crate::conversation::{PersonConfig, PersonId};
use crate::diagram::ApiKeyRef;
use crate::graph::{Graph, NodeId};
use crate::output::{NodeOutput, TokenUsage};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Why a node was skipped instead of executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Iteration ceiling reached
    MaxIterations,
    /// First-only prompt already used and no default prompt exists
    FirstOnlyConsumed,
    /// Every required predecessor was skipped without a passthrough output
    DependencySkipped,
    /// A required predecessor failed and the run continues on error
    DependencyFailed,
    /// A user skip condition evaluated true, or a branch was pruned
    ConditionNotMet,
    /// Dependencies could not be satisfied and partial results were allowed
    UnmetDependencies,
}

impl SkipReason {
    /// Wire name of this reason.
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::MaxIterations => "max_iterations",
            SkipReason::FirstOnlyConsumed => "first_only_consumed",
            SkipReason::DependencySkipped => "dependency_skipped",
            SkipReason::DependencyFailed => "dependency_failed",
            SkipReason::ConditionNotMet => "condition_not_met",
            SkipReason::UnmetDependencies => "unmet_dependencies",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable state of one diagram run, owned by the scheduler.
pub struct ExecutionContext {
    /// Compiled graph being executed
    pub graph: Arc<Graph>,
    /// Identifier of this run
    pub execution_id: String,
    /// Successful executions per node
    pub exec_cnt: HashMap<NodeId, u32>,
    /// Latest output per node
    pub outputs: HashMap<NodeId, NodeOutput>,
    /// Boolean results of condition nodes
    pub cond_val: HashMap<NodeId, bool>,
    /// Skipped nodes and why
    pub skipped: HashMap<NodeId, SkipReason>,
    /// Failed nodes and their error text (continue-on-error runs)
    pub errors: HashMap<NodeId, String>,
    /// Execution order actually taken
    pub order: Vec<NodeId>,
    /// Person configurations from the diagram
    pub persons: HashMap<PersonId, PersonConfig>,
    /// API key references from the diagram
    pub api_keys: HashMap<String, ApiKeyRef>,
    /// Run-wide token accounting
    pub total_tokens: TokenUsage,
    /// Person nodes that hit their iteration ceiling
    pub maxiter_reached: HashSet<NodeId>,
    /// Nodes whose first-only inputs have been consumed
    pub first_only_consumed: HashSet<NodeId>,
    /// Node currently being finalized by the scheduler
    pub current_node: Option<NodeId>,
    /// Pass-through option fields for handlers
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl ExecutionContext {
    /// Create the context for a fresh run.
    pub fn new(
        graph: Arc<Graph>,
        execution_id: String,
        persons: HashMap<PersonId, PersonConfig>,
        api_keys: HashMap<String, ApiKeyRef>,
    ) -> Self {
        Self {
            graph,
            execution_id,
            exec_cnt: HashMap::new(),
            outputs: HashMap::new(),
            cond_val: HashMap::new(),
            skipped: HashMap::new(),
            errors: HashMap::new(),
            order: Vec::new(),
            persons,
            api_keys,
            total_tokens: TokenUsage::default(),
            maxiter_reached: HashSet::new(),
            first_only_consumed: HashSet::new(),
            current_node: None,
            options: serde_json::Map::new(),
        }
    }

    /// Successful execution count of a node, zero when it never ran.
    pub fn execution_count(&self, node: &str) -> u32 {
        self.exec_cnt.get(node).copied().unwrap_or(0)
    }

    /// Whether a node has produced an output (including passthrough copies).
    pub fn has_output(&self, node: &str) -> bool {
        self.outputs.contains_key(node)
    }

    /// Whether a node is recorded as skipped.
    pub fn is_skipped(&self, node: &str) -> bool {
        self.skipped.contains_key(node)
    }

    /// Whether a node failed in a continue-on-error run.
    pub fn has_failed(&self, node: &str) -> bool {
        self.errors.contains_key(node)
    }

    /// Record a successful execution: store the output, bump the counter,
    /// append to the order, and accumulate tokens.
    pub fn record_success(&mut self, node: &NodeId, output: NodeOutput) {
        if let Some(usage) = &output.token_usage {
            self.total_tokens.add(usage);
        }
        self.outputs.insert(node.clone(), output);
        *self.exec_cnt.entry(node.clone()).or_insert(0) += 1;
        self.order.push(node.clone());
        // A successful run clears any earlier skip record for loop nodes.
        self.skipped.remove(node);
    }

    /// Record a skip, optionally keeping the previous output visible for
    /// downstream readiness (passthrough).
    pub fn record_skip(&mut self, node: &NodeId, reason: SkipReason, passthrough: bool) {
        self.skipped.insert(node.clone(), reason);
        if !passthrough {
            self.outputs.remove(node);
        }
    }

    /// Record a handler failure in a continue-on-error run.
    pub fn record_error(&mut self, node: &NodeId, error: String) {
        self.errors.insert(node.clone(), error);
    }

    /// Condition result of a node, if it has been evaluated.
    pub fn condition_value(&self, node: &str) -> Option<bool> {
        self.cond_val.get(node).copied()
    }

    /// Flattened view of outputs for expression evaluation: object outputs
    /// spread their keys, scalars bind under the node id.
    pub fn flattened_outputs(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut flat = serde_json::Map::new();
        for (node_id, output) in &self.outputs {
            match &output.value {
                serde_json::Value::Object(map) => {
                    for (k, v) in map {
                        flat.insert(k.clone(), v.clone());
                    }
                }
                other => {
                    flat.insert(node_id.clone(), other.clone());
                }
            }
        }
        flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagram::Diagram;
    use serde_json::json;

    fn context() -> ExecutionContext {
        let diagram = Diagram::from_value(json!({
            "nodes": {
                "s": {"type": "start", "data": {}},
                "e": {"type": "endpoint", "data": {}},
            },
            "arrows": {"a1": {"source": "s", "target": "e"}},
        }))
        .unwrap();
        let graph = Arc::new(Graph::build(&diagram).unwrap());
        ExecutionContext::new(graph, "exec-1".to_string(), HashMap::new(), HashMap::new())
    }

    #[test]
    fn record_success_updates_counters_and_order() {
        let mut ctx = context();
        let output = NodeOutput::scalar(json!("hi")).with_tokens(TokenUsage {
            input: 3,
            output: 4,
            cached: 0,
        });
        ctx.record_success(&"s".to_string(), output);

        assert_eq!(ctx.execution_count("s"), 1);
        assert_eq!(ctx.order, vec!["s".to_string()]);
        assert_eq!(ctx.total_tokens.total(), 7);
        assert!(ctx.has_output("s"));
    }

    #[test]
    fn skip_without_passthrough_clears_output() {
        let mut ctx = context();
        ctx.record_success(&"s".to_string(), NodeOutput::scalar(json!("v1")));
        ctx.record_skip(&"s".to_string(), SkipReason::MaxIterations, false);
        assert!(!ctx.has_output("s"));
        assert!(ctx.is_skipped("s"));
    }

    #[test]
    fn skip_with_passthrough_keeps_output() {
        let mut ctx = context();
        ctx.record_success(&"s".to_string(), NodeOutput::scalar(json!("v1")));
        ctx.record_skip(&"s".to_string(), SkipReason::MaxIterations, true);
        assert!(ctx.has_output("s"));
        assert_eq!(ctx.outputs["s"].default_value(), &json!("v1"));
    }

    #[test]
    fn flattened_outputs_spread_objects() {
        let mut ctx = context();
        ctx.record_success(&"s".to_string(), NodeOutput::scalar(json!("hello")));
        ctx.outputs
            .insert("e".to_string(), NodeOutput::new(json!(42)));

        let flat = ctx.flattened_outputs();
        assert_eq!(flat["default"], json!("hello"));
        assert_eq!(flat["e"], json!(42));
    }

    #[test]
    fn success_clears_previous_skip() {
        let mut ctx = context();
        ctx.record_skip(&"s".to_string(), SkipReason::DependencySkipped, false);
        ctx.record_success(&"s".to_string(), NodeOutput::scalar(json!("v")));
        assert!(!ctx.is_skipped("s"));
    }
}
