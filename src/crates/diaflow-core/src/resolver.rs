//! Dependency resolution
//!
//! Decides whether a node is ready to execute given the current execution
//! context. The rules:
//!
//! 1. Start nodes and nodes without incoming arrows are always ready.
//! 2. Incoming arrows are *required* unless the target is a person node and
//!    the arrow lands on a `-first` handle (*first-only*).
//! 3. An arrow is met when its source has an output. Arrows from condition
//!    nodes additionally need the branch encoded in their handle or label to
//!    match the condition's value. A skipped or failed source satisfies the
//!    arrow for readiness but contributes no data; the skip policy decides
//!    at dispatch whether a node fed only by such sources runs at all.
//! 4. On the first execution, one satisfied first-only arrow can stand in
//!    for an unsatisfied required arrow; a node with only first-only inputs
//!    needs at least one of them met.
//! 5. On re-execution (loop iterations), first-only arrows are consumed and
//!    ignored; readiness depends on required arrows alone, and a node whose
//!    only inputs were first-only is ready without new data.

use crate::context::ExecutionContext;
use crate::graph::{Arrow, Node};

/// Readiness decisions over the execution context.
pub struct DependencyResolver;

impl DependencyResolver {
    /// Whether `node` can execute now.
    pub fn is_ready(node: &Node, ctx: &ExecutionContext) -> bool {
        if node.kind == crate::graph::NodeKind::Start {
            return true;
        }

        let incoming: Vec<&Arrow> = ctx.graph.incoming(&node.id).collect();
        if incoming.is_empty() {
            return true;
        }

        let execution_count = ctx.execution_count(&node.id);
        let mut first_only: Vec<&Arrow> = Vec::new();
        let mut required: Vec<&Arrow> = Vec::new();
        for arrow in incoming {
            if Self::is_first_only(arrow, node) {
                first_only.push(arrow);
            } else if execution_count == 0 && Self::pending_cycle_feedback(arrow, node, ctx) {
                // Loop entry: a back edge from a condition that has not
                // evaluated yet cannot be satisfied on the first pass.
            } else {
                required.push(arrow);
            }
        }

        if execution_count > 0 {
            // Loop re-execution: first-only inputs are consumed.
            if required.is_empty() {
                return true;
            }
            return required.iter().all(|a| Self::arrow_met(a, ctx));
        }

        let met_required = required.iter().filter(|a| Self::arrow_met(a, ctx)).count();
        let first_met = first_only.iter().any(|a| Self::arrow_met(a, ctx));

        if required.is_empty() {
            if first_only.is_empty() {
                return true;
            }
            return first_met;
        }

        // A satisfied first-only input may stand in for one required input
        // on the first execution.
        met_required + usize::from(first_met) >= required.len()
    }

    /// Whether an arrow counts as a first-only input for `node`.
    pub fn is_first_only(arrow: &Arrow, node: &Node) -> bool {
        node.kind.is_person() && arrow.target.is_first_only()
    }

    /// Whether an arrow is a cycle back edge from a condition that has not
    /// produced a value yet. Such arrows are ignored on the target's first
    /// execution; once the condition evaluates they gate re-execution like
    /// any other branch arrow.
    fn pending_cycle_feedback(arrow: &Arrow, node: &Node, ctx: &ExecutionContext) -> bool {
        let source_id = &arrow.source.node_id;
        let Some(source) = ctx.graph.node(source_id) else {
            return false;
        };
        source.kind == crate::graph::NodeKind::Condition
            && ctx.condition_value(source_id).is_none()
            && ctx.graph.same_cycle(source_id, &node.id)
    }

    /// Whether one arrow's dependency is satisfied.
    pub fn arrow_met(arrow: &Arrow, ctx: &ExecutionContext) -> bool {
        let source_id = &arrow.source.node_id;
        let Some(source) = ctx.graph.node(source_id) else {
            return false;
        };

        if ctx.has_output(source_id) {
            if source.kind == crate::graph::NodeKind::Condition {
                return Self::branch_valid(arrow, ctx);
            }
            return true;
        }

        // A skipped or failed source releases the dependency without data.
        ctx.is_skipped(source_id) || ctx.has_failed(source_id)
    }

    /// Whether a condition arrow's branch matches the evaluated value.
    pub fn branch_valid(arrow: &Arrow, ctx: &ExecutionContext) -> bool {
        match arrow.branch() {
            None => true,
            Some(required) => ctx.condition_value(&arrow.source.node_id) == Some(required),
        }
    }

    /// Whether an arrow is permanently dead: its source condition has
    /// resolved to the other branch and sits outside any cycle, so the value
    /// can never change.
    pub fn arrow_dead(arrow: &Arrow, ctx: &ExecutionContext) -> bool {
        let source_id = &arrow.source.node_id;
        let Some(source) = ctx.graph.node(source_id) else {
            return false;
        };
        if source.kind != crate::graph::NodeKind::Condition {
            return false;
        }
        if Self::branch_valid(arrow, ctx) || ctx.condition_value(source_id).is_none() {
            return false;
        }
        ctx.graph.loop_members(source_id).is_empty()
    }
}
