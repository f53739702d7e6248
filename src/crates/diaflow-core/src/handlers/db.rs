//! Db node: file-backed read/write through the file service.

use crate::context::ExecutionContext;
use crate::error::{EngineError, Result};
use crate::graph::{Node, NodeKind};
use crate::handler::{service_names, NodeHandler, Services};
use crate::inputs::ResolvedInputs;
use crate::output::NodeOutput;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;

/// Handler for `db` nodes.
pub struct DbHandler;

impl DbHandler {
    fn file_path(node: &Node) -> Result<&str> {
        node.props
            .get("file_path")
            .or_else(|| node.props.get("file"))
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::validation(&node.id, "db node requires file_path"))
    }
}

#[async_trait]
impl NodeHandler for DbHandler {
    fn node_kind(&self) -> NodeKind {
        NodeKind::Db
    }

    fn requires_services(&self) -> &'static [&'static str] {
        &[service_names::FILES]
    }

    fn validate(&self, node: &Node) -> Result<()> {
        Self::file_path(node)?;
        let operation = node
            .props
            .get("operation")
            .and_then(Value::as_str)
            .unwrap_or("read");
        if !matches!(operation, "read" | "write") {
            return Err(EngineError::validation(
                &node.id,
                format!("unsupported db operation '{operation}'"),
            ));
        }
        Ok(())
    }

    async fn execute(
        &self,
        node: &Node,
        _ctx: &ExecutionContext,
        inputs: ResolvedInputs,
        services: &Services,
    ) -> Result<NodeOutput> {
        let path = Self::file_path(node)?;
        let operation = node
            .props
            .get("operation")
            .and_then(Value::as_str)
            .unwrap_or("read");
        let files = services.files()?;

        let value = match operation {
            "write" => {
                let payload = inputs.collapsed_value();
                let text = match &payload {
                    Value::String(s) => s.clone(),
                    other => serde_json::to_string_pretty(other)?,
                };
                files.write(Path::new(path), &text).await?;
                tracing::info!(node = %node.id, path, "db write");
                json!({"written": true, "path": path})
            }
            _ => {
                let text = files.read(Path::new(path)).await?;
                if path.ends_with(".json") {
                    serde_json::from_str(&text).unwrap_or(Value::String(text))
                } else {
                    Value::String(text)
                }
            }
        };

        let mut output = NodeOutput::scalar(value).with_metadata("operation", json!(operation));
        output.node_id = Some(node.id.clone());
        Ok(output)
    }
}
