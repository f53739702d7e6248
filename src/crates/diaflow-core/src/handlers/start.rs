//! Start node: emits the configured output and kicks off the run.

use crate::context::ExecutionContext;
use crate::graph::{Node, NodeKind};
use crate::handler::{NodeHandler, Services};
use crate::inputs::ResolvedInputs;
use crate::output::NodeOutput;
use async_trait::async_trait;
use serde_json::Value;

/// Handler for `start` nodes.
pub struct StartHandler;

#[async_trait]
impl NodeHandler for StartHandler {
    fn node_kind(&self) -> NodeKind {
        NodeKind::Start
    }

    async fn execute(
        &self,
        node: &Node,
        _ctx: &ExecutionContext,
        _inputs: ResolvedInputs,
        _services: &Services,
    ) -> crate::error::Result<NodeOutput> {
        let value = node
            .props
            .get("output")
            .cloned()
            .unwrap_or(Value::Null);
        let mut output = NodeOutput::scalar(value);
        output.node_id = Some(node.id.clone());
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagram::Diagram;
    use crate::graph::Graph;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[tokio::test]
    async fn emits_configured_output() {
        let diagram = Diagram::from_value(json!({
            "nodes": {"s": {"type": "start", "data": {"output": "hello"}}},
            "arrows": {},
        }))
        .unwrap();
        let graph = Arc::new(Graph::build(&diagram).unwrap());
        let ctx = ExecutionContext::new(graph, "e".into(), HashMap::new(), HashMap::new());
        let node = ctx.graph.node("s").unwrap().clone();

        let out = StartHandler
            .execute(&node, &ctx, ResolvedInputs::default(), &Services::default())
            .await
            .unwrap();
        assert_eq!(out.default_value(), &json!("hello"));
    }
}
