//! Endpoint node: terminal collector with optional save-to-file.

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::graph::{Node, NodeKind};
use crate::handler::{NodeHandler, Services};
use crate::inputs::ResolvedInputs;
use crate::output::NodeOutput;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;

/// Handler for `endpoint` nodes.
pub struct EndpointHandler;

fn content_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

#[async_trait]
impl NodeHandler for EndpointHandler {
    fn node_kind(&self) -> NodeKind {
        NodeKind::Endpoint
    }

    async fn execute(
        &self,
        node: &Node,
        _ctx: &ExecutionContext,
        inputs: ResolvedInputs,
        services: &Services,
    ) -> Result<NodeOutput> {
        let value = inputs.collapsed_value();

        let save = node
            .props
            .get("save_to_file")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let mut output = NodeOutput::scalar(value.clone());

        if save {
            let path = node
                .props
                .get("file_path")
                .and_then(Value::as_str)
                .unwrap_or("results/output.txt");
            services
                .files()?
                .write(Path::new(path), &content_text(&value))
                .await?;
            tracing::info!(node = %node.id, path, "endpoint result saved");
            output = output.with_metadata("saved_to", json!(path));
        }

        output.node_id = Some(node.id.clone());
        Ok(output)
    }
}
