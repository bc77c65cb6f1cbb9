//! Core types for strategy graphs
//!
//! These types define the structure of a strategy graph: nodes with a
//! typed role and role-specific data, and the edges connecting them.
//! Node ids are opaque unique keys; the role is carried by `NodeRole`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::node_data::NodeData;

/// Unique identifier for a node
pub type NodeId = String;

/// Unique identifier for an edge
pub type EdgeId = String;

/// The kind of order an action node places
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Entry,
    Exit,
    Modify,
    Alert,
}

/// The role a node plays in a strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum NodeRole {
    /// Data source and entry point of the strategy
    Start,
    /// Generic condition node
    Signal,
    /// Condition node that opens positions
    EntrySignal,
    /// Condition node that closes positions
    ExitSignal,
    /// Order action
    Action(ActionKind),
    /// Re-entry after an exit, paired with an Exit node
    Retry,
    /// Normal terminus
    End,
    /// Terminus that flattens all positions
    ForceEnd,
}

impl NodeRole {
    /// All roles, in palette order
    pub const ALL: [NodeRole; 11] = [
        NodeRole::Start,
        NodeRole::Signal,
        NodeRole::EntrySignal,
        NodeRole::ExitSignal,
        NodeRole::Action(ActionKind::Entry),
        NodeRole::Action(ActionKind::Exit),
        NodeRole::Action(ActionKind::Modify),
        NodeRole::Action(ActionKind::Alert),
        NodeRole::Retry,
        NodeRole::End,
        NodeRole::ForceEnd,
    ];

    /// Shorthand for the Entry action role
    pub const ENTRY: NodeRole = NodeRole::Action(ActionKind::Entry);
    /// Shorthand for the Exit action role
    pub const EXIT: NodeRole = NodeRole::Action(ActionKind::Exit);
    /// Shorthand for the Modify action role
    pub const MODIFY: NodeRole = NodeRole::Action(ActionKind::Modify);
    /// Shorthand for the Alert action role
    pub const ALERT: NodeRole = NodeRole::Action(ActionKind::Alert);

    /// The `type` string used in persisted records
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeRole::Start => "startNode",
            NodeRole::Signal => "signalNode",
            NodeRole::EntrySignal => "entrySignalNode",
            NodeRole::ExitSignal => "exitSignalNode",
            NodeRole::Action(ActionKind::Entry) => "actionNode",
            NodeRole::Action(ActionKind::Exit) => "exitNode",
            NodeRole::Action(ActionKind::Modify) => "modifyNode",
            NodeRole::Action(ActionKind::Alert) => "alertNode",
            NodeRole::Retry => "retryNode",
            NodeRole::End => "endNode",
            NodeRole::ForceEnd => "forceEndNode",
        }
    }

    /// Parse a persisted `type` string
    pub fn from_type_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|role| role.type_name() == name)
    }

    /// Infer a role from a legacy id such as `entry-signal-3`.
    ///
    /// Older files encoded the role in the id prefix. Longer prefixes are
    /// tested first so `entry-signal` wins over `entry`.
    pub fn from_legacy_id(id: &str) -> Option<Self> {
        const PREFIXES: [(&str, NodeRole); 11] = [
            ("entry-signal", NodeRole::EntrySignal),
            ("exit-signal", NodeRole::ExitSignal),
            ("force-end", NodeRole::ForceEnd),
            ("start", NodeRole::Start),
            ("signal", NodeRole::Signal),
            ("entry", NodeRole::ENTRY),
            ("exit", NodeRole::EXIT),
            ("modify", NodeRole::MODIFY),
            ("alert", NodeRole::ALERT),
            ("retry", NodeRole::Retry),
            ("end", NodeRole::End),
        ];
        let id = id.to_ascii_lowercase();
        PREFIXES
            .iter()
            .find(|(prefix, _)| id.starts_with(prefix))
            .map(|(_, role)| *role)
    }

    /// Short prefix used when generating node ids
    pub fn id_prefix(&self) -> &'static str {
        match self {
            NodeRole::Start => "start",
            NodeRole::Signal => "signal",
            NodeRole::EntrySignal => "entry-signal",
            NodeRole::ExitSignal => "exit-signal",
            NodeRole::Action(ActionKind::Entry) => "entry",
            NodeRole::Action(ActionKind::Exit) => "exit",
            NodeRole::Action(ActionKind::Modify) => "modify",
            NodeRole::Action(ActionKind::Alert) => "alert",
            NodeRole::Retry => "retry",
            NodeRole::End => "end",
            NodeRole::ForceEnd => "force-end",
        }
    }

    /// End or ForceEnd
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeRole::End | NodeRole::ForceEnd)
    }

    pub fn is_start(&self) -> bool {
        matches!(self, NodeRole::Start)
    }

    /// Any of the three condition-bearing roles
    pub fn is_signal(&self) -> bool {
        matches!(
            self,
            NodeRole::Signal | NodeRole::EntrySignal | NodeRole::ExitSignal
        )
    }

    /// Entry or Exit, the roles that place or close orders
    pub fn is_order_action(&self) -> bool {
        matches!(
            self,
            NodeRole::Action(ActionKind::Entry) | NodeRole::Action(ActionKind::Exit)
        )
    }

    /// Roles allowed to trigger an order action
    pub fn is_trigger_source(&self) -> bool {
        self.is_start() || self.is_signal()
    }

    pub fn action_kind(&self) -> Option<ActionKind> {
        match self {
            NodeRole::Action(kind) => Some(*kind),
            _ => None,
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NodeRole::Start => "Start",
            NodeRole::Signal => "Signal",
            NodeRole::EntrySignal => "Entry Signal",
            NodeRole::ExitSignal => "Exit Signal",
            NodeRole::Action(ActionKind::Entry) => "Entry",
            NodeRole::Action(ActionKind::Exit) => "Exit",
            NodeRole::Action(ActionKind::Modify) => "Modify",
            NodeRole::Action(ActionKind::Alert) => "Alert",
            NodeRole::Retry => "Retry",
            NodeRole::End => "End",
            NodeRole::ForceEnd => "Force End",
        };
        f.write_str(label)
    }
}

impl From<NodeRole> for String {
    fn from(role: NodeRole) -> Self {
        role.type_name().to_string()
    }
}

impl TryFrom<String> for NodeRole {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        NodeRole::from_type_name(&value).ok_or_else(|| format!("unknown node type '{}'", value))
    }
}

/// Canvas coordinates. Layout only, no semantic weight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CanvasPosition {
    pub x: f64,
    pub y: f64,
}

impl CanvasPosition {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl From<(f64, f64)> for CanvasPosition {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

/// Cosmetic node styling
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStyle {
    #[serde(default)]
    pub z_index: i32,
}

/// A node instance in a strategy graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawNode", into = "RawNode")]
pub struct Node {
    /// Unique, stable identifier
    pub id: NodeId,
    /// What the node does
    pub role: NodeRole,
    /// Position in the editor
    pub position: CanvasPosition,
    /// Role-specific configuration
    pub data: NodeData,
    /// Optional styling
    pub style: Option<NodeStyle>,
}

impl Node {
    /// Create a node with the default data for its role
    pub fn new(id: impl Into<String>, role: NodeRole, position: impl Into<CanvasPosition>) -> Self {
        Self {
            id: id.into(),
            role,
            position: position.into(),
            data: NodeData::default_for(role),
            style: None,
        }
    }

    /// Replace the node's data
    pub fn with_data(mut self, data: NodeData) -> Self {
        self.data = data;
        self
    }

    /// Equality that ignores position and styling
    pub fn same_content(&self, other: &Node) -> bool {
        self.id == other.id && self.role == other.role && self.data == other.data
    }
}

/// Wire shape of a node: the role travels as `type`, data is untagged.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawNode {
    id: NodeId,
    #[serde(rename = "type")]
    node_type: String,
    #[serde(default)]
    position: CanvasPosition,
    #[serde(default)]
    data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    style: Option<NodeStyle>,
}

impl TryFrom<RawNode> for Node {
    type Error = String;

    fn try_from(raw: RawNode) -> Result<Self, Self::Error> {
        let role = NodeRole::try_from(raw.node_type)?;
        let data = NodeData::from_value(role, raw.data)
            .map_err(|e| format!("invalid data for node '{}': {}", raw.id, e))?;
        Ok(Node {
            id: raw.id,
            role,
            position: raw.position,
            data,
            style: raw.style,
        })
    }
}

impl From<Node> for RawNode {
    fn from(node: Node) -> Self {
        RawNode {
            id: node.id,
            node_type: node.role.type_name().to_string(),
            position: node.position,
            data: node.data.to_value(),
            style: node.style,
        }
    }
}

/// How an edge is drawn
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EdgeKind {
    #[default]
    Default,
    DashedAnimated,
    FixedLength,
}

/// An edge connecting two nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    /// Unique identifier for this edge
    pub id: EdgeId,
    /// Source node ID
    pub source: NodeId,
    /// Target node ID
    pub target: NodeId,
    /// Presentation kind
    #[serde(default, rename = "type")]
    pub kind: EdgeKind,
    /// Opaque styling passed through to the editor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<serde_json::Value>,
}

impl Edge {
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
        kind: EdgeKind,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            kind,
            style: None,
        }
    }

    pub fn touches(&self, node_id: &str) -> bool {
        self.source == node_id || self.target == node_id
    }
}

/// Nodes and edges of one strategy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyGraph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl StrategyGraph {
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self { nodes, edges }
    }

    /// Find a node by ID
    pub fn find_node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Find a node by ID (mutable)
    pub fn find_node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    /// Find an edge by ID
    pub fn find_edge(&self, id: &str) -> Option<&Edge> {
        self.edges.iter().find(|e| e.id == id)
    }

    /// Get edges coming into a node
    pub fn incoming_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.target == node_id)
    }

    /// Get edges going out of a node
    pub fn outgoing_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.source == node_id)
    }

    /// Whether the editor should offer to delete this edge.
    ///
    /// Edges touching a Retry node are managed by re-entry wiring.
    pub fn is_edge_deletable(&self, edge_id: &str) -> bool {
        let Some(edge) = self.find_edge(edge_id) else {
            return false;
        };
        ![&edge.source, &edge.target].iter().any(|id| {
            self.find_node(id)
                .is_some_and(|n| matches!(n.role, NodeRole::Retry))
        })
    }

    /// Sorted node and edge ids, used to detect structural changes
    pub fn id_signature(&self) -> (Vec<NodeId>, Vec<EdgeId>) {
        let mut node_ids: Vec<NodeId> = self.nodes.iter().map(|n| n.id.clone()).collect();
        let mut edge_ids: Vec<EdgeId> = self.edges.iter().map(|e| e.id.clone()).collect();
        node_ids.sort();
        edge_ids.sort();
        (node_ids, edge_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_type_names_roundtrip() {
        for role in NodeRole::ALL {
            assert_eq!(NodeRole::from_type_name(role.type_name()), Some(role));
        }
        assert_eq!(NodeRole::from_type_name("mysteryNode"), None);
    }

    #[test]
    fn test_legacy_id_inference_prefers_longest_prefix() {
        assert_eq!(NodeRole::from_legacy_id("entry-signal-1"), Some(NodeRole::EntrySignal));
        assert_eq!(NodeRole::from_legacy_id("entry-2"), Some(NodeRole::ENTRY));
        assert_eq!(NodeRole::from_legacy_id("force-end-1"), Some(NodeRole::ForceEnd));
        assert_eq!(NodeRole::from_legacy_id("end-1"), Some(NodeRole::End));
        assert_eq!(NodeRole::from_legacy_id("a1b2"), None);
    }

    #[test]
    fn test_node_wire_shape() {
        let node = Node::new("end-1", NodeRole::End, (10.0, 20.0));
        let value = serde_json::to_value(&node).unwrap();
        assert_eq!(value["type"], "endNode");
        assert_eq!(value["position"]["x"], 10.0);

        let restored: Node = serde_json::from_value(value).unwrap();
        assert_eq!(restored, node);
    }

    #[test]
    fn test_node_rejects_unknown_type() {
        let result: Result<Node, _> =
            serde_json::from_value(serde_json::json!({"id": "x", "type": "bogus"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_same_content_ignores_layout() {
        let a = Node::new("n", NodeRole::End, (0.0, 0.0));
        let mut b = a.clone();
        b.position = CanvasPosition::new(500.0, 500.0);
        b.style = Some(NodeStyle { z_index: 3 });
        assert!(a.same_content(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn test_graph_edges() {
        let graph = StrategyGraph::new(
            vec![
                Node::new("start", NodeRole::Start, (0.0, 0.0)),
                Node::new("end", NodeRole::End, (100.0, 0.0)),
            ],
            vec![Edge::new("e1", "start", "end", EdgeKind::Default)],
        );

        assert_eq!(graph.incoming_edges("end").count(), 1);
        assert_eq!(graph.outgoing_edges("start").count(), 1);
        assert!(graph.is_edge_deletable("e1"));
        assert!(!graph.is_edge_deletable("missing"));
    }

    #[test]
    fn test_retry_edges_not_deletable() {
        let graph = StrategyGraph::new(
            vec![
                Node::new("exit", NodeRole::EXIT, (0.0, 0.0)),
                Node::new("retry", NodeRole::Retry, (100.0, 0.0)),
            ],
            vec![Edge::new("e1", "exit", "retry", EdgeKind::DashedAnimated)],
        );
        assert!(!graph.is_edge_deletable("e1"));
    }
}
