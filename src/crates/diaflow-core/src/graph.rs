//! Typed execution graph
//!
//! [`Graph`] is the compiled form of a [`Diagram`]: typed nodes, arrows with
//! resolved handle references, adjacency in both directions, and a
//! topological order computed with Kahn's algorithm. The engine tolerates
//! cycles, so the order is a scheduling hint rather than a correctness
//! requirement: nodes left with nonzero in-degree after Kahn terminates
//! (cycle members) are appended at the end in diagram order.
//!
//! # Structure
//!
//! ```text
//! Diagram (wire form)
//!     │  Graph::build
//!     ▼
//! Graph
//!  ├── nodes      NodeId → Node (kind + properties)
//!  ├── arrows     resolved handle references, labels, content types
//!  ├── order      Kahn order, cycle members appended
//!  └── adjacency  incoming / outgoing arrow indices per node
//! ```
//!
//! Reachability queries (`loop_members`) run over dense node indices with
//! bitsets, so re-queue decisions stay `O(|V| + |E|)`.

use crate::conversation::PersonConfig;
use crate::diagram::Diagram;
use crate::error::{EngineError, Result};
use crate::memory::ForgetMode;
use crate::transform::ContentType;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};

/// Node identifier, unique within a diagram.
pub type NodeId = String;

/// Arrow identifier, unique within a diagram.
pub type ArrowId = String;

/// Name of the default handle on every node.
pub const DEFAULT_HANDLE: &str = "default";

/// Suffix marking a first-only target handle.
pub const FIRST_ONLY_SUFFIX: &str = "-first";

/// The kind of work a node performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Entry point; emits its configured output
    Start,
    /// Boolean branch point
    Condition,
    /// LLM call bound to a person
    PersonJob,
    /// LLM call over a batch of inputs
    PersonBatchJob,
    /// Subprocess code execution
    CodeJob,
    /// File-backed data access
    Db,
    /// Terminal node collecting results
    Endpoint,
    /// Outbound HTTP call
    ApiJob,
    /// Template rendering
    TemplateJob,
    /// External side-effect hook
    Hook,
    /// Nested diagram execution
    SubDiagram,
    /// Interactive prompt to the user
    UserResponse,
    /// JSON schema validation gate
    JsonSchemaValidator,
}

impl NodeKind {
    /// Whether this kind is an LLM persona node.
    pub fn is_person(self) -> bool {
        matches!(self, NodeKind::PersonJob | NodeKind::PersonBatchJob)
    }

    /// Wire name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Start => "start",
            NodeKind::Condition => "condition",
            NodeKind::PersonJob => "person_job",
            NodeKind::PersonBatchJob => "person_batch_job",
            NodeKind::CodeJob => "code_job",
            NodeKind::Db => "db",
            NodeKind::Endpoint => "endpoint",
            NodeKind::ApiJob => "api_job",
            NodeKind::TemplateJob => "template_job",
            NodeKind::Hook => "hook",
            NodeKind::SubDiagram => "sub_diagram",
            NodeKind::UserResponse => "user_response",
            NodeKind::JsonSchemaValidator => "json_schema_validator",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `(node, handle)` endpoint of an arrow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleRef {
    /// Node the handle belongs to
    pub node_id: NodeId,
    /// Handle name, [`DEFAULT_HANDLE`] when unspecified
    pub handle: String,
}

impl HandleRef {
    /// Parse `nodeId` or `nodeId:handleName`, with an optional override.
    pub fn parse(reference: &str, handle_override: Option<&str>) -> Self {
        let (node_id, handle) = match reference.split_once(':') {
            Some((node, handle)) if !handle.is_empty() => (node, handle),
            _ => (reference, DEFAULT_HANDLE),
        };
        Self {
            node_id: node_id.to_string(),
            handle: handle_override.unwrap_or(handle).to_string(),
        }
    }

    /// Handle name with any first-only suffix stripped.
    pub fn base_handle(&self) -> &str {
        self.handle
            .strip_suffix(FIRST_ONLY_SUFFIX)
            .unwrap_or(&self.handle)
    }

    /// Whether this handle is marked first-only.
    pub fn is_first_only(&self) -> bool {
        self.handle.ends_with(FIRST_ONLY_SUFFIX)
    }
}

/// A directed, labeled connection between two node handles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Arrow {
    /// Stable arrow id
    pub id: ArrowId,
    /// Source endpoint
    pub source: HandleRef,
    /// Target endpoint
    pub target: HandleRef,
    /// Input key on the target node
    pub label: Option<String>,
    /// Transformation applied to the flowing value
    pub content_type: Option<ContentType>,
    /// Strategy-specific transform configuration
    pub data: Option<Value>,
}

impl Arrow {
    /// Branch constraint encoded in this arrow's source handle or label.
    ///
    /// `Some(true)` restricts the arrow to a true condition result,
    /// `Some(false)` to a false one, `None` means always valid. The handle
    /// takes precedence; the label decides only when the handle carries no
    /// branch token.
    pub fn branch(&self) -> Option<bool> {
        if let Some(branch) = branch_of(&self.source.handle) {
            return Some(branch);
        }
        self.label.as_deref().and_then(branch_of)
    }
}

/// Classify a handle or label by the branch tokens it contains: `true`,
/// `yes`, or `1` select the true branch; `false`, `no`, or `0` the false
/// branch. Tokens match on non-alphanumeric boundaries, so `branch10` and
/// `node` carry no branch while `output-yes` and `approved_yes` do.
fn branch_of(text: &str) -> Option<bool> {
    let text = text.to_lowercase();
    for token in ["true", "yes", "1"] {
        if contains_token(&text, token) {
            return Some(true);
        }
    }
    for token in ["false", "no", "0"] {
        if contains_token(&text, token) {
            return Some(false);
        }
    }
    None
}

fn contains_token(haystack: &str, token: &str) -> bool {
    let mut from = 0;
    while let Some(found) = haystack[from..].find(token) {
        let begin = from + found;
        let end = begin + token.len();
        let bounded_before = !haystack[..begin]
            .chars()
            .next_back()
            .map_or(false, char::is_alphanumeric);
        let bounded_after = !haystack[end..]
            .chars()
            .next()
            .map_or(false, char::is_alphanumeric);
        if bounded_before && bounded_after {
            return true;
        }
        from = begin + 1;
    }
    false
}

/// A typed node with its properties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Stable node id
    pub id: NodeId,
    /// Node kind
    pub kind: NodeKind,
    /// Type-specific configuration
    pub props: Map<String, Value>,
}

impl Node {
    fn prop_str(&self, key: &str) -> Option<&str> {
        self.props.get(key).and_then(Value::as_str)
    }

    /// Iteration ceiling for loop nodes.
    pub fn max_iteration(&self) -> Option<u32> {
        self.props
            .get("max_iteration")
            .and_then(Value::as_u64)
            .map(|v| v as u32)
    }

    /// Prompt used on every execution.
    pub fn default_prompt(&self) -> Option<&str> {
        self.prop_str("default_prompt")
    }

    /// Prompt used only on the first execution.
    pub fn first_only_prompt(&self) -> Option<&str> {
        self.prop_str("first_only_prompt")
    }

    /// Person reference for person nodes.
    pub fn person_id(&self) -> Option<&str> {
        self.prop_str("person_id")
    }

    /// Inline person configuration, if the node carries one.
    pub fn inline_person(&self) -> Option<PersonConfig> {
        self.props
            .get("person")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
    }

    /// Forget mode for person nodes, defaulting to no forgetting.
    pub fn forget_mode(&self) -> ForgetMode {
        self.props
            .get("forget_mode")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    /// Memory configuration map for person nodes.
    pub fn memory_config(&self) -> Map<String, Value> {
        match self.props.get("memory_config") {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        }
    }

    /// Condition type, defaulting to `expression`.
    pub fn condition_type(&self) -> &str {
        self.prop_str("condition_type").unwrap_or("expression")
    }

    /// Condition expression source.
    pub fn expression(&self) -> Option<&str> {
        self.prop_str("expression")
            .or_else(|| self.prop_str("condition_expression"))
    }

    /// User skip condition evaluated before dispatch.
    pub fn skip_condition(&self) -> Option<&str> {
        self.prop_str("skip_condition")
    }

    /// Whether the node consults the interactive handler.
    pub fn interactive(&self) -> bool {
        self.props
            .get("interactive")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Dense bitset over node indices.
#[derive(Clone)]
struct Bitset {
    words: Vec<u64>,
}

impl Bitset {
    fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(64)],
        }
    }

    fn set(&mut self, i: usize) {
        self.words[i / 64] |= 1 << (i % 64);
    }

    fn get(&self, i: usize) -> bool {
        self.words[i / 64] & (1 << (i % 64)) != 0
    }

    fn and(&self, other: &Bitset) -> Bitset {
        Bitset {
            words: self
                .words
                .iter()
                .zip(&other.words)
                .map(|(a, b)| a & b)
                .collect(),
        }
    }

    fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(w, &word)| {
            (0..64)
                .filter(move |b| word & (1 << b) != 0)
                .map(move |b| w * 64 + b)
        })
    }
}

/// Compiled diagram ready for scheduling.
#[derive(Clone)]
pub struct Graph {
    nodes: HashMap<NodeId, Node>,
    arrows: Vec<Arrow>,
    order: Vec<NodeId>,
    start: NodeId,
    incoming: HashMap<NodeId, Vec<usize>>,
    outgoing: HashMap<NodeId, Vec<usize>>,
    ids: Vec<NodeId>,
    index: HashMap<NodeId, usize>,
    succ: Vec<Vec<usize>>,
    pred: Vec<Vec<usize>>,
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("nodes", &self.nodes.len())
            .field("arrows", &self.arrows.len())
            .field("order", &self.order)
            .finish()
    }
}

impl Graph {
    /// Compile a diagram into a graph.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidGraph`] when the diagram has no start
    /// node (or more than one), an arrow references a missing node, a person
    /// node lacks a prompt or carries both an inline person and a person id,
    /// or `max_iteration` is present but not a positive integer.
    pub fn build(diagram: &Diagram) -> Result<Self> {
        let mut nodes = HashMap::new();
        let mut ids = Vec::new();
        let mut start = None;

        for (id, spec) in &diagram.nodes {
            let node = Node {
                id: id.clone(),
                kind: spec.kind,
                props: spec.data.clone(),
            };
            Self::validate_node(&node)?;
            if node.kind == NodeKind::Start {
                if start.replace(id.clone()).is_some() {
                    return Err(EngineError::InvalidGraph(
                        "diagram has more than one start node".to_string(),
                    ));
                }
            }
            ids.push(id.clone());
            nodes.insert(id.clone(), node);
        }

        let start = start.ok_or_else(|| {
            EngineError::InvalidGraph("diagram has no start node".to_string())
        })?;

        let mut arrows = Vec::with_capacity(diagram.arrows.len());
        let mut incoming: HashMap<NodeId, Vec<usize>> = HashMap::new();
        let mut outgoing: HashMap<NodeId, Vec<usize>> = HashMap::new();

        for (arrow_id, spec) in &diagram.arrows {
            let source = HandleRef::parse(&spec.source, spec.source_handle.as_deref());
            let target = HandleRef::parse(&spec.target, spec.target_handle.as_deref());
            for endpoint in [&source, &target] {
                if !nodes.contains_key(&endpoint.node_id) {
                    return Err(EngineError::InvalidGraph(format!(
                        "arrow '{}' references missing node '{}'",
                        arrow_id, endpoint.node_id
                    )));
                }
            }
            let idx = arrows.len();
            outgoing.entry(source.node_id.clone()).or_default().push(idx);
            incoming.entry(target.node_id.clone()).or_default().push(idx);
            arrows.push(Arrow {
                id: arrow_id.clone(),
                source,
                target,
                label: spec.label.clone(),
                content_type: spec.content_type,
                data: spec.data.clone(),
            });
        }

        let index: HashMap<NodeId, usize> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();

        let mut succ = vec![Vec::new(); ids.len()];
        let mut pred = vec![Vec::new(); ids.len()];
        for arrow in &arrows {
            let s = index[&arrow.source.node_id];
            let t = index[&arrow.target.node_id];
            succ[s].push(t);
            pred[t].push(s);
        }

        let order = Self::topological_order(&ids, &index, &succ);

        Ok(Self {
            nodes,
            arrows,
            order,
            start,
            incoming,
            outgoing,
            ids,
            index,
            succ,
            pred,
        })
    }

    fn validate_node(node: &Node) -> Result<()> {
        if let Some(value) = node.props.get("max_iteration") {
            let valid = value.as_u64().map(|v| v > 0).unwrap_or(false);
            if !valid {
                return Err(EngineError::InvalidGraph(format!(
                    "node '{}': max_iteration must be a positive integer",
                    node.id
                )));
            }
        }
        if node.kind.is_person() {
            if node.default_prompt().is_none() && node.first_only_prompt().is_none() {
                return Err(EngineError::InvalidGraph(format!(
                    "node '{}': person node requires default_prompt or first_only_prompt",
                    node.id
                )));
            }
            if node.props.contains_key("person") && node.person_id().is_some() {
                return Err(EngineError::InvalidGraph(format!(
                    "node '{}': inline person and person_id are mutually exclusive",
                    node.id
                )));
            }
        }
        Ok(())
    }

    /// Kahn's algorithm with in-degree decrement; cycle members keep a
    /// nonzero in-degree and are appended afterwards in diagram order.
    fn topological_order(
        ids: &[NodeId],
        index: &HashMap<NodeId, usize>,
        succ: &[Vec<usize>],
    ) -> Vec<NodeId> {
        let mut in_degree = vec![0usize; ids.len()];
        for targets in succ {
            for &t in targets {
                in_degree[t] += 1;
            }
        }

        let mut queue: VecDeque<usize> = ids
            .iter()
            .map(|id| index[id])
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut order = Vec::with_capacity(ids.len());
        let mut placed = vec![false; ids.len()];

        while let Some(current) = queue.pop_front() {
            order.push(ids[current].clone());
            placed[current] = true;
            for &next in &succ[current] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        for (i, id) in ids.iter().enumerate() {
            if !placed[i] {
                order.push(id.clone());
            }
        }
        order
    }

    /// Node lookup by id.
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// All nodes keyed by id.
    pub fn nodes(&self) -> &HashMap<NodeId, Node> {
        &self.nodes
    }

    /// The single start node.
    pub fn start_node(&self) -> &NodeId {
        &self.start
    }

    /// Topological order, cycle members appended.
    pub fn order(&self) -> &[NodeId] {
        &self.order
    }

    /// Incoming arrows of a node, in diagram order.
    pub fn incoming(&self, id: &str) -> impl Iterator<Item = &Arrow> {
        self.incoming
            .get(id)
            .into_iter()
            .flatten()
            .map(|&i| &self.arrows[i])
    }

    /// Outgoing arrows of a node, in diagram order.
    pub fn outgoing(&self, id: &str) -> impl Iterator<Item = &Arrow> {
        self.outgoing
            .get(id)
            .into_iter()
            .flatten()
            .map(|&i| &self.arrows[i])
    }

    fn reach(&self, from: usize, edges: &[Vec<usize>]) -> Bitset {
        let mut seen = Bitset::new(self.ids.len());
        let mut queue: VecDeque<usize> = edges[from].iter().copied().collect();
        while let Some(current) = queue.pop_front() {
            if seen.get(current) {
                continue;
            }
            seen.set(current);
            for &next in &edges[current] {
                if !seen.get(next) {
                    queue.push_back(next);
                }
            }
        }
        seen
    }

    /// Whether `a` and `b` sit on a common cycle: `b` is both forward- and
    /// backward-reachable from `a`.
    pub fn same_cycle(&self, a: &str, b: &str) -> bool {
        let (Some(&from), Some(&to)) = (self.index.get(a), self.index.get(b)) else {
            return false;
        };
        self.reach(from, &self.succ).get(to) && self.reach(from, &self.pred).get(to)
    }

    /// Nodes on a cycle through `condition_id`: the intersection of its
    /// forward- and backward-reachable sets. Includes the condition node
    /// itself when it sits on a cycle; empty when it does not.
    pub fn loop_members(&self, condition_id: &str) -> Vec<NodeId> {
        let Some(&start) = self.index.get(condition_id) else {
            return Vec::new();
        };
        let forward = self.reach(start, &self.succ);
        let backward = self.reach(start, &self.pred);
        forward
            .and(&backward)
            .iter_ones()
            .map(|i| self.ids[i].clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn diagram(value: Value) -> Diagram {
        Diagram::from_value(value).unwrap()
    }

    fn linear_diagram() -> Diagram {
        diagram(json!({
            "nodes": {
                "s": {"type": "start", "data": {"output": "hi"}},
                "a": {"type": "template_job", "data": {"template": "x"}},
                "e": {"type": "endpoint", "data": {}},
            },
            "arrows": {
                "a1": {"source": "s", "target": "a"},
                "a2": {"source": "a", "target": "e"},
            },
        }))
    }

    #[test]
    fn handle_ref_parsing() {
        let h = HandleRef::parse("node1:conversation", None);
        assert_eq!(h.node_id, "node1");
        assert_eq!(h.handle, "conversation");

        let h = HandleRef::parse("node1", None);
        assert_eq!(h.handle, DEFAULT_HANDLE);

        let h = HandleRef::parse("node1:default-first", None);
        assert!(h.is_first_only());
        assert_eq!(h.base_handle(), "default");

        let h = HandleRef::parse("node1:x", Some("override"));
        assert_eq!(h.handle, "override");
    }

    #[test]
    fn topological_order_respects_edges() {
        let graph = Graph::build(&linear_diagram()).unwrap();
        assert_eq!(graph.order(), &["s", "a", "e"]);
        assert_eq!(graph.start_node(), "s");
    }

    #[test]
    fn cycle_members_appended_after_kahn() {
        let graph = Graph::build(&diagram(json!({
            "nodes": {
                "s": {"type": "start", "data": {}},
                "w": {"type": "template_job", "data": {"template": "x"}},
                "c": {"type": "condition", "data": {"expression": "true"}},
                "e": {"type": "endpoint", "data": {}},
            },
            "arrows": {
                "a1": {"source": "s", "target": "w"},
                "a2": {"source": "w", "target": "c"},
                "a3": {"source": "c", "target": "w", "label": "false"},
                "a4": {"source": "c", "target": "e", "label": "true"},
            },
        })))
        .unwrap();

        // Only s clears Kahn's queue; the rest keep nonzero in-degree and
        // are appended in diagram order.
        assert_eq!(graph.order()[0], "s");
        let pos = |id: &str| graph.order().iter().position(|n| n == id).unwrap();
        assert!(pos("s") < pos("c"));
        assert!(pos("s") < pos("w"));
        assert_eq!(graph.order().len(), 4);
    }

    #[test]
    fn loop_members_are_cycle_intersection() {
        let graph = Graph::build(&diagram(json!({
            "nodes": {
                "s": {"type": "start", "data": {}},
                "w": {"type": "template_job", "data": {"template": "x"}},
                "c": {"type": "condition", "data": {"expression": "true"}},
                "e": {"type": "endpoint", "data": {}},
            },
            "arrows": {
                "a1": {"source": "s", "target": "w"},
                "a2": {"source": "w", "target": "c"},
                "a3": {"source": "c", "target": "w", "label": "false"},
                "a4": {"source": "c", "target": "e", "label": "true"},
            },
        })))
        .unwrap();

        let mut members = graph.loop_members("c");
        members.sort();
        assert_eq!(members, vec!["c".to_string(), "w".to_string()]);
    }

    #[test]
    fn loop_members_empty_without_cycle() {
        let graph = Graph::build(&linear_diagram()).unwrap();
        assert!(graph.loop_members("a").is_empty());
    }

    #[test]
    fn same_cycle_detection() {
        let graph = Graph::build(&diagram(json!({
            "nodes": {
                "s": {"type": "start", "data": {}},
                "w": {"type": "template_job", "data": {"template": "x"}},
                "c": {"type": "condition", "data": {"expression": "true"}},
                "e": {"type": "endpoint", "data": {}},
            },
            "arrows": {
                "a1": {"source": "s", "target": "w"},
                "a2": {"source": "w", "target": "c"},
                "a3": {"source": "c", "target": "w", "label": "false"},
                "a4": {"source": "c", "target": "e", "label": "true"},
            },
        })))
        .unwrap();

        assert!(graph.same_cycle("c", "w"));
        assert!(graph.same_cycle("w", "c"));
        assert!(!graph.same_cycle("c", "e"));
        assert!(!graph.same_cycle("s", "w"));
    }

    #[test]
    fn build_requires_exactly_one_start() {
        let err = Graph::build(&diagram(json!({
            "nodes": {"e": {"type": "endpoint", "data": {}}},
            "arrows": {},
        })))
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidGraph(_)));

        let err = Graph::build(&diagram(json!({
            "nodes": {
                "s1": {"type": "start", "data": {}},
                "s2": {"type": "start", "data": {}},
            },
            "arrows": {},
        })))
        .unwrap_err();
        assert!(err.to_string().contains("more than one start"));
    }

    #[test]
    fn build_rejects_dangling_arrow() {
        let err = Graph::build(&diagram(json!({
            "nodes": {"s": {"type": "start", "data": {}}},
            "arrows": {"a1": {"source": "s", "target": "ghost"}},
        })))
        .unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn build_rejects_person_without_prompt() {
        let err = Graph::build(&diagram(json!({
            "nodes": {
                "s": {"type": "start", "data": {}},
                "pj": {"type": "person_job", "data": {"person_id": "p"}},
            },
            "arrows": {},
        })))
        .unwrap_err();
        assert!(err.to_string().contains("requires default_prompt"));
    }

    #[test]
    fn build_rejects_zero_max_iteration() {
        let err = Graph::build(&diagram(json!({
            "nodes": {
                "s": {"type": "start", "data": {}},
                "pj": {"type": "person_job", "data": {
                    "person_id": "p", "default_prompt": "x", "max_iteration": 0
                }},
            },
            "arrows": {},
        })))
        .unwrap_err();
        assert!(err.to_string().contains("max_iteration"));
    }

    #[test]
    fn build_rejects_inline_person_with_person_id() {
        let err = Graph::build(&diagram(json!({
            "nodes": {
                "s": {"type": "start", "data": {}},
                "pj": {"type": "person_job", "data": {
                    "person_id": "p",
                    "person": {"model": "m"},
                    "default_prompt": "x",
                }},
            },
            "arrows": {},
        })))
        .unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn branch_detection_from_handles_and_labels() {
        let arrow = |source: &str, label: Option<&str>| Arrow {
            id: "a".to_string(),
            source: HandleRef::parse(source, None),
            target: HandleRef::parse("t", None),
            label: label.map(str::to_string),
            content_type: None,
            data: None,
        };

        assert_eq!(arrow("c:output-true", None).branch(), Some(true));
        assert_eq!(arrow("c:output-false", None).branch(), Some(false));
        assert_eq!(arrow("c:output-yes", None).branch(), Some(true));
        assert_eq!(arrow("c:output-no", None).branch(), Some(false));
        assert_eq!(arrow("c:output-1", None).branch(), Some(true));
        assert_eq!(arrow("c:output-0", None).branch(), Some(false));
        assert_eq!(arrow("c", Some("true")).branch(), Some(true));
        assert_eq!(arrow("c", Some("no")).branch(), Some(false));
        assert_eq!(arrow("c", Some("1")).branch(), Some(true));
        assert_eq!(arrow("c", Some("approved_yes")).branch(), Some(true));
        assert_eq!(arrow("c", Some("is_true")).branch(), Some(true));
        assert_eq!(arrow("c", Some("not_needed_no")).branch(), Some(false));
        assert_eq!(arrow("c", None).branch(), None);

        // Tokens only count on their own boundaries.
        assert_eq!(arrow("c:branch10", None).branch(), None);
        assert_eq!(arrow("c:node", None).branch(), None);
        assert_eq!(arrow("c", Some("notes")).branch(), None);
        assert_eq!(arrow("c", Some("untrue")).branch(), None);

        // The handle wins over a contradicting label.
        assert_eq!(arrow("c:output-true", Some("false")).branch(), Some(true));
    }
}
