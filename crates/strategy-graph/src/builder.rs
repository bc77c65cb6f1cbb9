//! Fluent builder for strategy graphs
//!
//! Provides a fluent API for constructing graphs programmatically. The
//! builder does not apply connection rules; run the validator on the
//! result when that matters.

use chrono::Utc;

use crate::node_data::NodeData;
use crate::serialization::StrategyRecord;
use crate::types::{CanvasPosition, Edge, EdgeKind, Node, NodeRole, StrategyGraph};

/// Horizontal spacing used when no position is given
const AUTO_LAYOUT_SPACING: f64 = 200.0;

/// Fluent builder for strategy graphs
///
/// # Example
///
/// ```ignore
/// let graph = StrategyBuilder::new("s-1", "Breakout")
///     .add_node("start", NodeRole::Start)
///     .add_node("signal", NodeRole::EntrySignal)
///     .with_data(signal_data)
///     .add_node("end", NodeRole::End)
///     .connect("start", "signal")
///     .connect("signal", "end")
///     .build();
/// ```
pub struct StrategyBuilder {
    id: String,
    name: String,
    description: String,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

impl StrategyBuilder {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add a node with default data, laid out left to right
    pub fn add_node(self, id: impl Into<String>, role: NodeRole) -> Self {
        let x = self.nodes.len() as f64 * AUTO_LAYOUT_SPACING;
        self.add_node_at(id, role, (x, 0.0))
    }

    pub fn add_node_at(
        mut self,
        id: impl Into<String>,
        role: NodeRole,
        position: impl Into<CanvasPosition>,
    ) -> Self {
        self.nodes.push(Node::new(id, role, position));
        self
    }

    /// Set data on the most recently added node
    ///
    /// Must be called immediately after `add_node`.
    pub fn with_data(mut self, data: NodeData) -> Self {
        if let Some(node) = self.nodes.last_mut() {
            node.data = data;
        }
        self
    }

    /// Add a default edge; its id is derived from the endpoints
    pub fn connect(self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.connect_with(source, target, EdgeKind::Default)
    }

    pub fn connect_with(
        mut self,
        source: impl Into<String>,
        target: impl Into<String>,
        kind: EdgeKind,
    ) -> Self {
        let source = source.into();
        let target = target.into();
        let id = format!("edge-{}-{}", source, target);
        self.edges.push(Edge::new(id, source, target, kind));
        self
    }

    /// Build the graph without validation
    pub fn build(self) -> StrategyGraph {
        StrategyGraph::new(self.nodes, self.edges)
    }

    /// Build a record stamped with the current time
    pub fn build_record(self) -> StrategyRecord {
        let now = Utc::now();
        StrategyRecord {
            id: self.id,
            name: self.name,
            created: now,
            last_modified: now,
            description: self.description,
            nodes: self.nodes,
            edges: self.edges,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_data::StartData;

    #[test]
    fn test_builder_basic() {
        let graph = StrategyBuilder::new("s1", "Test Strategy")
            .add_node("start", NodeRole::Start)
            .with_data(NodeData::Start(StartData {
                symbol: "NIFTY".into(),
                ..StartData::default()
            }))
            .add_node("end", NodeRole::End)
            .connect("start", "end")
            .build();

        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.nodes[0].data.as_start().unwrap().symbol, "NIFTY");
        assert_eq!(graph.nodes[1].position, CanvasPosition::new(200.0, 0.0));
        assert_eq!(graph.edges[0].id, "edge-start-end");
    }

    #[test]
    fn test_explicit_positions_and_edge_kinds() {
        let graph = StrategyBuilder::new("s1", "Test")
            .add_node_at("exit", NodeRole::EXIT, (10.0, 20.0))
            .add_node_at("retry", NodeRole::Retry, (10.0, 140.0))
            .connect_with("exit", "retry", EdgeKind::DashedAnimated)
            .build();

        assert_eq!(graph.nodes[1].position, CanvasPosition::new(10.0, 140.0));
        assert_eq!(graph.edges[0].kind, EdgeKind::DashedAnimated);
        assert!(!graph.is_edge_deletable("edge-exit-retry"));
    }

    #[test]
    fn test_build_record() {
        let record = StrategyBuilder::new("s1", "Recorded")
            .with_description("demo")
            .add_node("start", NodeRole::Start)
            .build_record();

        assert_eq!(record.id, "s1");
        assert_eq!(record.name, "Recorded");
        assert_eq!(record.description, "demo");
        assert_eq!(record.nodes.len(), 1);

        let json = serde_json::to_string(&record).unwrap();
        let restored: StrategyRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, record);
    }
}
