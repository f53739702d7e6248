//! Canonical diagram form
//!
//! A diagram arrives as keyed maps of nodes and arrows plus person and
//! api-key references, in JSON or YAML. Handle references use the form
//! `nodeId:handleName`; a bare node id means the `default` handle. This
//! module only parses the wire shape; structural validation happens when the
//! diagram is compiled into a [`Graph`](crate::graph::Graph).

use crate::conversation::PersonConfig;
use crate::error::Result;
use crate::graph::NodeKind;
use crate::transform::ContentType;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A node as it appears on the wire: a kind tag plus type-specific data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Node kind tag
    #[serde(rename = "type")]
    pub kind: NodeKind,
    /// Type-specific properties
    #[serde(default)]
    pub data: Map<String, Value>,
}

/// An arrow as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrowSpec {
    /// Source handle reference (`nodeId` or `nodeId:handle`)
    pub source: String,
    /// Target handle reference (`nodeId` or `nodeId:handle`)
    pub target: String,
    /// Explicit source handle, overriding the one embedded in `source`
    #[serde(default, rename = "sourceHandle")]
    pub source_handle: Option<String>,
    /// Explicit target handle, overriding the one embedded in `target`
    #[serde(default, rename = "targetHandle")]
    pub target_handle: Option<String>,
    /// Input key on the target node
    #[serde(default)]
    pub label: Option<String>,
    /// Transformation applied to values flowing through this arrow
    #[serde(default)]
    pub content_type: Option<ContentType>,
    /// Strategy-specific transform configuration
    #[serde(default)]
    pub data: Option<Value>,
}

/// Reference to an API key held outside the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyRef {
    /// Provider this key belongs to
    pub service: String,
    /// Key material or an external reference to it
    #[serde(default)]
    pub key: Option<String>,
}

/// A complete diagram in canonical form.
///
/// Maps are ordered so compilation and cycle-remainder ordering are
/// deterministic for a given diagram.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diagram {
    /// Nodes keyed by node id
    pub nodes: BTreeMap<String, NodeSpec>,
    /// Arrows keyed by arrow id
    #[serde(default)]
    pub arrows: BTreeMap<String, ArrowSpec>,
    /// Person configurations keyed by person id
    #[serde(default)]
    pub persons: BTreeMap<String, PersonConfig>,
    /// API key references keyed by key id
    #[serde(default, rename = "apiKeys")]
    pub api_keys: BTreeMap<String, ApiKeyRef>,
}

impl Diagram {
    /// Parse a diagram from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Parse a diagram from YAML text.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Parse a diagram from an in-memory JSON value.
    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}
