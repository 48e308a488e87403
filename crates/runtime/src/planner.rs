//! Action plan builder: turns a decoded model reply into an ordered plan.

use cadence_core::ActionPlan;
use tracing::{debug, warn};

use crate::decoder::{Mapping, Node};
use crate::registry::ActionRegistry;

/// Build the plan for a decoded reply.
///
/// References come from `actions` (comma list, repeated tags, or nested
/// `<action>` children) and then `action` (scalar, repeated, or a nested
/// element with a `name` child),
/// in the order the model wrote them. Each is resolved by name or simile;
/// unknown references are dropped. When nothing resolves, or the reply
/// could not be decoded at all, the plan is a single `reply_action` step.
pub fn build_plan(
    decoded: Option<&Mapping>,
    actions: &ActionRegistry,
    reply_action: &str,
) -> ActionPlan {
    let Some(decoded) = decoded else {
        debug!("Reply had no structure, planning a plain reply");
        return ActionPlan::new("", [reply_action.to_string()]);
    };

    let thought = decoded.text("thought").unwrap_or_default();
    let mut resolved = Vec::new();

    for reference in action_references(decoded) {
        match actions.resolve(&reference) {
            Some(action) => resolved.push(action.name().to_string()),
            None => warn!(action = %reference, "Model named an unknown action, dropping it"),
        }
    }

    if resolved.is_empty() {
        debug!("No actions resolved, planning a plain reply");
        resolved.push(reply_action.to_string());
    }

    debug!(steps = ?resolved, "Built action plan");
    ActionPlan::new(thought, resolved)
}

fn action_references(decoded: &Mapping) -> Vec<String> {
    let mut refs = Vec::new();
    if let Some(node) = decoded.get("actions") {
        collect_actions_node(node, &mut refs);
    }
    if let Some(node) = decoded.get("action") {
        collect_action_node(node, &mut refs);
    }
    refs
}

// `<actions>` holds a comma list or `<action>` children.
fn collect_actions_node(node: &Node, out: &mut Vec<String>) {
    match node {
        Node::Map(map) => {
            if let Some(action) = map.get("action") {
                collect_action_node(action, out);
            }
        }
        Node::List(items) => {
            for item in items {
                collect_actions_node(item, out);
            }
        }
        Node::Text(_) => collect_action_node(node, out),
    }
}

fn collect_action_node(node: &Node, out: &mut Vec<String>) {
    match node {
        Node::Text(text) => out.extend(
            text.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from),
        ),
        Node::Map(map) => {
            if let Some(name) = map.text("name") {
                out.push(name.trim().to_string());
            }
        }
        Node::List(items) => {
            for item in items {
                collect_action_node(item, out);
            }
        }
    }
}
