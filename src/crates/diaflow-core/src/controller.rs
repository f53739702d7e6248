//! Skip policy and iteration control
//!
//! Before a ready node is dispatched, the skip policy decides whether it
//! should run at all. Skips are terminal for the current round but a node
//! can run again later (loop re-queues clear skip records on success).
//!
//! Passthrough: when a node is skipped after at least one successful
//! execution, its previous output stays visible so downstream readiness is
//! preserved. This is what lets a loop body exit on max-iteration without
//! starving its successors.

use crate::context::{ExecutionContext, SkipReason};
use crate::expr;
use crate::graph::Node;
use crate::resolver::DependencyResolver;
use serde_json::{json, Map, Value};

/// Outcome of the pre-dispatch skip check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipDecision {
    /// Dispatch the node
    Run,
    /// Skip with a reason; `passthrough` keeps the previous output visible
    Skip {
        /// Why the node is not executed
        reason: SkipReason,
        /// Whether the previous output remains available downstream
        passthrough: bool,
    },
}

/// Pre-dispatch skip policy.
pub struct SkipPolicy;

impl SkipPolicy {
    /// Decide whether `node` should run or be skipped.
    pub fn evaluate(node: &Node, ctx: &ExecutionContext) -> SkipDecision {
        if let Some(max) = node.max_iteration() {
            if ctx.execution_count(&node.id) >= max {
                return SkipDecision::Skip {
                    reason: SkipReason::MaxIterations,
                    passthrough: ctx.has_output(&node.id),
                };
            }
        }

        if Self::first_only_exhausted(node, ctx) {
            return SkipDecision::Skip {
                reason: SkipReason::FirstOnlyConsumed,
                passthrough: ctx.has_output(&node.id),
            };
        }

        if let Some(reason) = Self::dependencies_unavailable(node, ctx) {
            return SkipDecision::Skip {
                reason,
                passthrough: false,
            };
        }

        if Self::skip_condition_met(node, ctx) {
            return SkipDecision::Skip {
                reason: SkipReason::ConditionNotMet,
                passthrough: ctx.has_output(&node.id),
            };
        }

        SkipDecision::Run
    }

    /// Person node whose only prompt was first-only and has been used.
    fn first_only_exhausted(node: &Node, ctx: &ExecutionContext) -> bool {
        node.kind.is_person()
            && node.first_only_prompt().is_some()
            && node.default_prompt().is_none()
            && ctx.first_only_consumed.contains(&node.id)
    }

    /// All required predecessors skipped or failed without passthrough data.
    fn dependencies_unavailable(node: &Node, ctx: &ExecutionContext) -> Option<SkipReason> {
        let mut has_required = false;
        let mut any_failed = false;
        for arrow in ctx.graph.incoming(&node.id) {
            if DependencyResolver::is_first_only(arrow, node) {
                continue;
            }
            has_required = true;
            let source = &arrow.source.node_id;
            if ctx.has_output(source) {
                return None;
            }
            if ctx.has_failed(source) {
                any_failed = true;
            } else if !ctx.is_skipped(source) {
                return None;
            }
        }
        if !has_required {
            return None;
        }
        Some(if any_failed {
            SkipReason::DependencyFailed
        } else {
            SkipReason::DependencySkipped
        })
    }

    /// Explicit user skip condition on the node evaluated true.
    fn skip_condition_met(node: &Node, ctx: &ExecutionContext) -> bool {
        let Some(expression) = node.skip_condition() else {
            return false;
        };
        let bindings = condition_bindings(ctx, &Map::new());
        expr::evaluate(expression, &bindings).result
    }
}

/// Bindings shared by skip conditions and condition-node expressions:
/// resolved inputs, per-node execution counts, and flattened outputs.
pub fn condition_bindings(
    ctx: &ExecutionContext,
    inputs: &Map<String, Value>,
) -> Map<String, Value> {
    let mut bindings = ctx.flattened_outputs();
    for (key, value) in inputs {
        bindings.insert(key.clone(), value.clone());
    }
    let mut counts = Map::new();
    for node_id in ctx.graph.nodes().keys() {
        let count = ctx.execution_count(node_id);
        counts.insert(node_id.clone(), json!(count));
        bindings.insert(format!("executionCount.{node_id}"), json!(count));
    }
    bindings.insert("executionCount".to_string(), Value::Object(counts));
    bindings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagram::Diagram;
    use crate::graph::Graph;
    use crate::output::NodeOutput;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn ctx_for(diagram: Value) -> ExecutionContext {
        let diagram = Diagram::from_value(diagram).unwrap();
        let graph = Arc::new(Graph::build(&diagram).unwrap());
        ExecutionContext::new(graph, "exec".to_string(), HashMap::new(), HashMap::new())
    }

    fn loop_diagram() -> Value {
        json!({
            "nodes": {
                "s": {"type": "start", "data": {}},
                "pj": {"type": "person_job", "data": {
                    "person_id": "p", "default_prompt": "go", "max_iteration": 2
                }},
            },
            "arrows": {"a1": {"source": "s", "target": "pj"}},
        })
    }

    #[test]
    fn max_iterations_skip_with_passthrough() {
        let mut ctx = ctx_for(loop_diagram());
        let pj = ctx.graph.node("pj").unwrap().clone();

        assert_eq!(SkipPolicy::evaluate(&pj, &ctx), SkipDecision::Run);

        ctx.record_success(&"pj".to_string(), NodeOutput::scalar(json!("one")));
        ctx.record_success(&"pj".to_string(), NodeOutput::scalar(json!("two")));
        assert_eq!(
            SkipPolicy::evaluate(&pj, &ctx),
            SkipDecision::Skip {
                reason: SkipReason::MaxIterations,
                passthrough: true,
            }
        );
    }

    #[test]
    fn first_only_consumed_skip() {
        let mut ctx = ctx_for(json!({
            "nodes": {
                "s": {"type": "start", "data": {}},
                "pj": {"type": "person_job", "data": {
                    "person_id": "p", "first_only_prompt": "once"
                }},
            },
            "arrows": {"a1": {"source": "s", "target": "pj"}},
        }));
        let pj = ctx.graph.node("pj").unwrap().clone();

        assert_eq!(SkipPolicy::evaluate(&pj, &ctx), SkipDecision::Run);
        ctx.first_only_consumed.insert("pj".to_string());
        assert!(matches!(
            SkipPolicy::evaluate(&pj, &ctx),
            SkipDecision::Skip {
                reason: SkipReason::FirstOnlyConsumed,
                ..
            }
        ));
    }

    #[test]
    fn all_dependencies_skipped_cascades() {
        let mut ctx = ctx_for(json!({
            "nodes": {
                "s": {"type": "start", "data": {}},
                "a": {"type": "template_job", "data": {"template": "x"}},
                "b": {"type": "template_job", "data": {"template": "y"}},
            },
            "arrows": {
                "a1": {"source": "s", "target": "a"},
                "a2": {"source": "a", "target": "b"},
            },
        }));
        let b = ctx.graph.node("b").unwrap().clone();
        ctx.record_skip(&"a".to_string(), SkipReason::ConditionNotMet, false);

        assert!(matches!(
            SkipPolicy::evaluate(&b, &ctx),
            SkipDecision::Skip {
                reason: SkipReason::DependencySkipped,
                ..
            }
        ));
    }

    #[test]
    fn failed_dependency_marks_dependency_failed() {
        let mut ctx = ctx_for(json!({
            "nodes": {
                "s": {"type": "start", "data": {}},
                "a": {"type": "template_job", "data": {"template": "x"}},
                "b": {"type": "template_job", "data": {"template": "y"}},
            },
            "arrows": {
                "a1": {"source": "s", "target": "a"},
                "a2": {"source": "a", "target": "b"},
            },
        }));
        let b = ctx.graph.node("b").unwrap().clone();
        ctx.record_error(&"a".to_string(), "boom".to_string());

        assert!(matches!(
            SkipPolicy::evaluate(&b, &ctx),
            SkipDecision::Skip {
                reason: SkipReason::DependencyFailed,
                ..
            }
        ));
    }

    #[test]
    fn passthrough_output_prevents_dependency_skip() {
        let mut ctx = ctx_for(json!({
            "nodes": {
                "s": {"type": "start", "data": {}},
                "a": {"type": "template_job", "data": {"template": "x"}},
                "b": {"type": "template_job", "data": {"template": "y"}},
            },
            "arrows": {
                "a1": {"source": "s", "target": "a"},
                "a2": {"source": "a", "target": "b"},
            },
        }));
        let b = ctx.graph.node("b").unwrap().clone();
        ctx.record_success(&"a".to_string(), NodeOutput::scalar(json!("kept")));
        ctx.record_skip(&"a".to_string(), SkipReason::MaxIterations, true);

        assert_eq!(SkipPolicy::evaluate(&b, &ctx), SkipDecision::Run);
    }

    #[test]
    fn skip_condition_expression() {
        let mut ctx = ctx_for(json!({
            "nodes": {
                "s": {"type": "start", "data": {}},
                "t": {"type": "template_job", "data": {
                    "template": "x",
                    "skip_condition": "executionCount.s >= 1",
                }},
            },
            "arrows": {"a1": {"source": "s", "target": "t"}},
        }));
        let t = ctx.graph.node("t").unwrap().clone();
        assert_eq!(SkipPolicy::evaluate(&t, &ctx), SkipDecision::Run);

        ctx.record_success(&"s".to_string(), NodeOutput::scalar(json!("v")));
        assert!(matches!(
            SkipPolicy::evaluate(&t, &ctx),
            SkipDecision::Skip {
                reason: SkipReason::ConditionNotMet,
                ..
            }
        ));
    }
}
