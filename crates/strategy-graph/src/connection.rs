//! Connection rules
//!
//! Decides whether an edge between two nodes is legal. The engine only
//! evaluates; the caller decides whether to materialize the edge.
//! Rules run in a fixed precedence order and the first failure wins.

use std::collections::{HashMap, HashSet};

use crate::error::ConnectionError;
use crate::types::{ActionKind, Edge, Node, NodeRole};

/// Outcome of an accepted connection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionVerdict {
    /// Non-blocking advisories, e.g. the outgoing edge soft cap
    pub warnings: Vec<String>,
}

impl ConnectionVerdict {
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Evaluate a proposed edge `source_id -> target_id` against the current
/// nodes and edges. Nothing is modified.
pub fn can_connect(
    nodes: &[Node],
    existing_edges: &[Edge],
    source_id: &str,
    target_id: &str,
    max_outgoing_edges: usize,
) -> Result<ConnectionVerdict, ConnectionError> {
    // 1. Both ends exist
    let source = find(nodes, source_id)
        .ok_or_else(|| ConnectionError::NodeNotFound(source_id.to_string()))?;
    let target = find(nodes, target_id)
        .ok_or_else(|| ConnectionError::NodeNotFound(target_id.to_string()))?;

    // 2. Terminals have no outputs
    if source.role.is_terminal() {
        return Err(ConnectionError::TerminalHasNoOutputs(source.id.clone()));
    }

    // 3. Start has no inputs
    if target.role.is_start() {
        return Err(ConnectionError::StartHasNoInputs(target.id.clone()));
    }

    // 4. No self-loop
    if source.id == target.id {
        return Err(ConnectionError::SelfLoop(source.id.clone()));
    }

    // 5. No duplicate edge for the same ordered pair
    if existing_edges
        .iter()
        .any(|e| e.source == source.id && e.target == target.id)
    {
        return Err(ConnectionError::DuplicateEdge {
            from: source.id.clone(),
            to: target.id.clone(),
        });
    }

    // 6. No cycle: target must not already reach source
    if path_exists(existing_edges, &target.id, &source.id) {
        return Err(ConnectionError::WouldCreateCycle {
            from: source.id.clone(),
            to: target.id.clone(),
        });
    }

    // 7. Order nodes do not link to each other directly
    if !is_retry_link(source.role, target.role)
        && source.role.is_order_action()
        && target.role.is_order_action()
    {
        return Err(ConnectionError::OrderNodesCannotLink {
            from: source.id.clone(),
            to: target.id.clone(),
        });
    }

    if target.role.is_order_action() {
        // 8. Orders are fed by signals, start, or retry
        if !(source.role.is_trigger_source() || matches!(source.role, NodeRole::Retry)) {
            return Err(ConnectionError::InvalidActionSource {
                target: target.id.clone(),
                source_role: source.role,
            });
        }

        // 9. At most one triggering signal per order
        if source.role.is_trigger_source() {
            let already_triggered = existing_edges
                .iter()
                .filter(|e| e.target == target.id)
                .filter_map(|e| find(nodes, &e.source))
                .any(|n| n.role.is_trigger_source());
            if already_triggered {
                return Err(ConnectionError::ActionAlreadyTriggered(target.id.clone()));
            }
        }
    }

    // 10. Soft cap on fan-out
    let mut verdict = ConnectionVerdict::default();
    let outgoing = existing_edges
        .iter()
        .filter(|e| e.source == source.id)
        .count()
        + 1;
    if outgoing > max_outgoing_edges {
        let message = format!(
            "Node '{}' has {} outgoing connections (recommended maximum {})",
            source.id, outgoing, max_outgoing_edges
        );
        log::warn!("{}", message);
        verdict.warnings.push(message);
    }

    Ok(verdict)
}

fn find<'a>(nodes: &'a [Node], id: &str) -> Option<&'a Node> {
    nodes.iter().find(|n| n.id == id)
}

/// `Exit -> Retry` and `Retry -> Entry` are the sanctioned re-entry links
fn is_retry_link(source: NodeRole, target: NodeRole) -> bool {
    matches!(
        (source, target),
        (NodeRole::Action(ActionKind::Exit), NodeRole::Retry)
            | (NodeRole::Retry, NodeRole::Action(ActionKind::Entry))
    )
}

/// Depth-first search over `edges` from `from` looking for `to`
pub fn path_exists(edges: &[Edge], from: &str, to: &str) -> bool {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in edges {
        adjacency
            .entry(edge.source.as_str())
            .or_default()
            .push(edge.target.as_str());
    }

    let mut visited: HashSet<&str> = HashSet::new();
    let mut stack = vec![from];
    while let Some(current) = stack.pop() {
        if current == to {
            return true;
        }
        if !visited.insert(current) {
            continue;
        }
        if let Some(next) = adjacency.get(current) {
            stack.extend(next.iter().copied());
        }
    }
    false
}
