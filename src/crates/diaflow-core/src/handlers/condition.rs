//! Condition node: boolean branch points
//!
//! Two condition types:
//!
//! - `expression` evaluates a restricted expression against the node's
//!   inputs, per-node execution counts, and flattened outputs. Evaluation
//!   failures are recovered locally: the result is `false` and the error is
//!   recorded in metadata.
//! - `detect_max_iterations` is true when every predecessor that declares a
//!   `max_iteration` has exhausted it, and false when no predecessor
//!   declares one.
//!
//! The boolean travels in `metadata["conditionResult"]`; the node's value
//! passes its inputs through so downstream nodes keep their data on either
//! branch.

use crate::context::ExecutionContext;
use crate::controller::condition_bindings;
use crate::error::EngineError;
use crate::expr;
use crate::graph::{Node, NodeKind};
use crate::handler::{NodeHandler, Services};
use crate::inputs::ResolvedInputs;
use crate::output::NodeOutput;
use async_trait::async_trait;
use serde_json::{json, Value};

const CONDITION_TYPES: &[&str] = &["expression", "detect_max_iterations"];

/// Handler for `condition` nodes.
pub struct ConditionHandler;

impl ConditionHandler {
    fn detect_max_iterations(node: &Node, ctx: &ExecutionContext) -> bool {
        let mut found = false;
        for arrow in ctx.graph.incoming(&node.id) {
            let source_id = &arrow.source.node_id;
            let Some(source) = ctx.graph.node(source_id) else {
                continue;
            };
            let Some(max) = source.max_iteration() else {
                continue;
            };
            found = true;
            if ctx.execution_count(source_id) < max {
                return false;
            }
        }
        found
    }
}

#[async_trait]
impl NodeHandler for ConditionHandler {
    fn node_kind(&self) -> NodeKind {
        NodeKind::Condition
    }

    fn validate(&self, node: &Node) -> crate::error::Result<()> {
        let condition_type = node.condition_type();
        if !CONDITION_TYPES.contains(&condition_type) {
            return Err(EngineError::validation(
                &node.id,
                format!("unknown condition_type '{condition_type}'"),
            ));
        }
        if condition_type == "expression" && node.expression().is_none() {
            return Err(EngineError::validation(
                &node.id,
                "condition requires an expression",
            ));
        }
        Ok(())
    }

    async fn execute(
        &self,
        node: &Node,
        ctx: &ExecutionContext,
        inputs: ResolvedInputs,
        _services: &Services,
    ) -> crate::error::Result<NodeOutput> {
        let condition_type = node.condition_type();
        let (result, error) = if condition_type == "detect_max_iterations" {
            (Self::detect_max_iterations(node, ctx), None)
        } else {
            let expression = node.expression().unwrap_or_default();
            let bindings = condition_bindings(ctx, &inputs.values());
            let eval = expr::evaluate(expression, &bindings);
            (eval.result, eval.error)
        };

        tracing::debug!(node = %node.id, condition_type, result, "condition evaluated");

        let mut output = NodeOutput::new(inputs.collapsed_value())
            .with_metadata("conditionType", json!(condition_type))
            .with_metadata("conditionResult", json!(result))
            .with_metadata("evaluatedAt", json!(chrono::Utc::now().to_rfc3339()));
        if let Some(error) = error {
            output = output.with_metadata("error", Value::String(error));
        }
        output.node_id = Some(node.id.clone());
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagram::Diagram;
    use crate::graph::Graph;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn ctx_for(diagram: Value) -> ExecutionContext {
        let diagram = Diagram::from_value(diagram).unwrap();
        let graph = Arc::new(Graph::build(&diagram).unwrap());
        ExecutionContext::new(graph, "e".into(), HashMap::new(), HashMap::new())
    }

    fn loop_diagram() -> Value {
        json!({
            "nodes": {
                "s": {"type": "start", "data": {}},
                "pj": {"type": "person_job", "data": {
                    "person_id": "p", "default_prompt": "x", "max_iteration": 2
                }},
                "c": {"type": "condition", "data": {"condition_type": "detect_max_iterations"}},
            },
            "arrows": {
                "a1": {"source": "s", "target": "pj"},
                "a2": {"source": "pj", "target": "c"},
            },
        })
    }

    #[tokio::test]
    async fn expression_result_lands_in_metadata() {
        let mut ctx = ctx_for(json!({
            "nodes": {
                "s": {"type": "start", "data": {}},
                "c": {"type": "condition", "data": {"expression": "executionCount.s >= 1"}},
            },
            "arrows": {"a1": {"source": "s", "target": "c"}},
        }));
        ctx.exec_cnt.insert("s".to_string(), 1);
        let node = ctx.graph.node("c").unwrap().clone();

        let out = ConditionHandler
            .execute(&node, &ctx, ResolvedInputs::default(), &Services::default())
            .await
            .unwrap();
        assert_eq!(out.metadata["conditionResult"], json!(true));
        assert!(!out.metadata.contains_key("error"));
    }

    #[tokio::test]
    async fn evaluation_failure_is_false_with_error() {
        let ctx = ctx_for(json!({
            "nodes": {
                "s": {"type": "start", "data": {}},
                "c": {"type": "condition", "data": {"expression": "ghost > 1"}},
            },
            "arrows": {"a1": {"source": "s", "target": "c"}},
        }));
        let node = ctx.graph.node("c").unwrap().clone();

        let out = ConditionHandler
            .execute(&node, &ctx, ResolvedInputs::default(), &Services::default())
            .await
            .unwrap();
        assert_eq!(out.metadata["conditionResult"], json!(false));
        assert!(out.metadata.contains_key("error"));
    }

    #[tokio::test]
    async fn detect_max_iterations_tracks_predecessors() {
        let mut ctx = ctx_for(loop_diagram());
        let node = ctx.graph.node("c").unwrap().clone();

        let out = ConditionHandler
            .execute(&node, &ctx, ResolvedInputs::default(), &Services::default())
            .await
            .unwrap();
        assert_eq!(out.metadata["conditionResult"], json!(false));

        ctx.exec_cnt.insert("pj".to_string(), 2);
        let out = ConditionHandler
            .execute(&node, &ctx, ResolvedInputs::default(), &Services::default())
            .await
            .unwrap();
        assert_eq!(out.metadata["conditionResult"], json!(true));
    }

    #[tokio::test]
    async fn detect_max_iterations_false_without_bounded_predecessors() {
        let ctx = ctx_for(json!({
            "nodes": {
                "s": {"type": "start", "data": {}},
                "c": {"type": "condition", "data": {"condition_type": "detect_max_iterations"}},
            },
            "arrows": {"a1": {"source": "s", "target": "c"}},
        }));
        let node = ctx.graph.node("c").unwrap().clone();
        let out = ConditionHandler
            .execute(&node, &ctx, ResolvedInputs::default(), &Services::default())
            .await
            .unwrap();
        assert_eq!(out.metadata["conditionResult"], json!(false));
    }

    #[test]
    fn validation_requires_expression() {
        let node = Node {
            id: "c".to_string(),
            kind: NodeKind::Condition,
            props: serde_json::Map::new(),
        };
        assert!(ConditionHandler.validate(&node).is_err());

        let node = Node {
            id: "c".to_string(),
            kind: NodeKind::Condition,
            props: serde_json::from_value(json!({"condition_type": "bogus"})).unwrap(),
        };
        assert!(ConditionHandler.validate(&node).is_err());
    }
}
