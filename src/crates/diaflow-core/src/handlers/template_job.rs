//! Template job: render a template over the node's inputs.

use crate::context::ExecutionContext;
use crate::error::{EngineError, Result};
use crate::graph::{Node, NodeKind};
use crate::handler::{NodeHandler, Services};
use crate::inputs::ResolvedInputs;
use crate::output::NodeOutput;
use crate::template;
use async_trait::async_trait;
use serde_json::{json, Value};

/// Handler for `template_job` nodes.
pub struct TemplateJobHandler;

#[async_trait]
impl NodeHandler for TemplateJobHandler {
    fn node_kind(&self) -> NodeKind {
        NodeKind::TemplateJob
    }

    fn validate(&self, node: &Node) -> Result<()> {
        if node.props.get("template").and_then(Value::as_str).is_none() {
            return Err(EngineError::validation(
                &node.id,
                "template_job requires a template",
            ));
        }
        Ok(())
    }

    async fn execute(
        &self,
        node: &Node,
        _ctx: &ExecutionContext,
        inputs: ResolvedInputs,
        _services: &Services,
    ) -> Result<NodeOutput> {
        let source = node
            .props
            .get("template")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::validation(&node.id, "template_job requires a template"))?;

        let values = template::prepare_values(&inputs.values());
        let rendered = template::render(source, &values);

        let mut output = NodeOutput::scalar(json!(rendered.content));
        if !rendered.missing.is_empty() {
            output = output.with_metadata("missing_variables", json!(rendered.missing));
        }
        output.node_id = Some(node.id.clone());
        Ok(output)
    }
}
