//! User response node: delegate a question to the interactive handler.

use crate::context::ExecutionContext;
use crate::error::{EngineError, Result};
use crate::graph::{Node, NodeKind};
use crate::handler::{service_names, NodeHandler, Services};
use crate::inputs::ResolvedInputs;
use crate::output::NodeOutput;
use crate::template;
use async_trait::async_trait;
use serde_json::{json, Value};

/// Handler for `user_response` nodes.
pub struct UserResponseHandler;

#[async_trait]
impl NodeHandler for UserResponseHandler {
    fn node_kind(&self) -> NodeKind {
        NodeKind::UserResponse
    }

    fn requires_services(&self) -> &'static [&'static str] {
        &[service_names::INTERACTIVE]
    }

    async fn execute(
        &self,
        node: &Node,
        ctx: &ExecutionContext,
        inputs: ResolvedInputs,
        services: &Services,
    ) -> Result<NodeOutput> {
        let interactive = services.interactive.as_ref().ok_or_else(|| {
            EngineError::Configuration("interactive_handler not configured".to_string())
        })?;

        let prompt_source = node
            .props
            .get("prompt")
            .and_then(Value::as_str)
            .unwrap_or("Your response:");
        let values = template::prepare_values(&inputs.values());
        let prompt = template::render(prompt_source, &values).content;

        let answer = interactive
            .respond(
                &node.id,
                &prompt,
                json!({
                    "execution_id": ctx.execution_id,
                    "inputs": inputs.values(),
                }),
            )
            .await?;

        let mut output = NodeOutput::scalar(json!(answer)).with_metadata("prompt", json!(prompt));
        output.node_id = Some(node.id.clone());
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagram::Diagram;
    use crate::graph::Graph;
    use crate::handler::InteractiveHandler;
    use std::collections::HashMap;
    use std::sync::Arc;

    struct CannedAnswer;

    #[async_trait]
    impl InteractiveHandler for CannedAnswer {
        async fn respond(&self, _node: &str, prompt: &str, _context: Value) -> Result<String> {
            Ok(format!("answer to: {prompt}"))
        }
    }

    #[tokio::test]
    async fn asks_the_interactive_handler() {
        let diagram = Diagram::from_value(json!({
            "nodes": {
                "s": {"type": "start", "data": {}},
                "u": {"type": "user_response", "data": {"prompt": "Proceed?"}},
            },
            "arrows": {"a1": {"source": "s", "target": "u"}},
        }))
        .unwrap();
        let graph = Arc::new(Graph::build(&diagram).unwrap());
        let ctx = ExecutionContext::new(graph, "e".into(), HashMap::new(), HashMap::new());

        let services = Services {
            interactive: Some(Arc::new(CannedAnswer)),
            ..Services::default()
        };
        let node = ctx.graph.node("u").unwrap().clone();
        let out = UserResponseHandler
            .execute(&node, &ctx, ResolvedInputs::default(), &services)
            .await
            .unwrap();
        assert_eq!(out.default_value(), &json!("answer to: Proceed?"));
    }
}
