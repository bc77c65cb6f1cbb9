//! Strategy graph validation
//!
//! Runs over a whole graph snapshot and reports every problem found, not
//! just the first. Diagnostics are emitted in discovery order: checks run
//! in a fixed sequence, and each check walks nodes in array order and then
//! edges in array order, so two runs over the same graph produce identical
//! reports.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::constants::defaults;
use crate::node_data::NodeData;
use crate::types::{ActionKind, Edge, Node, NodeRole};

/// Category of a diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticKind {
    // Structural errors
    MissingStartNode,
    MissingEndNode,
    DuplicateId,
    InvalidEdgeReference,
    IncompletePath,
    IncompleteWorkflow,
    CircularDependency,
    CycleDetail,
    // Position reference errors
    InvalidPositionReference,
    AmbiguousPositionOwnership,
    MultipleModify,
    DuplicatePositionId,
    // Trigger errors
    MissingTrigger,
    InvalidTrigger,
    // Field errors
    MissingSymbol,
    EmptyCondition,
    MissingExitCondition,
    ExpressionTooDeep,
    InvalidOffset,
    // Warnings
    OrphanNode,
    DeadEnd,
    DuplicatePriority,
    ConnectionLimit,
}

impl DiagnosticKind {
    /// The wire name, e.g. `multiple-modify`
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticKind::MissingStartNode => "missing-start-node",
            DiagnosticKind::MissingEndNode => "missing-end-node",
            DiagnosticKind::DuplicateId => "duplicate-id",
            DiagnosticKind::InvalidEdgeReference => "invalid-edge-reference",
            DiagnosticKind::IncompletePath => "incomplete-path",
            DiagnosticKind::IncompleteWorkflow => "incomplete-workflow",
            DiagnosticKind::CircularDependency => "circular-dependency",
            DiagnosticKind::CycleDetail => "cycle-detail",
            DiagnosticKind::InvalidPositionReference => "invalid-position-reference",
            DiagnosticKind::AmbiguousPositionOwnership => "ambiguous-position-ownership",
            DiagnosticKind::MultipleModify => "multiple-modify",
            DiagnosticKind::DuplicatePositionId => "duplicate-position-id",
            DiagnosticKind::MissingTrigger => "missing-trigger",
            DiagnosticKind::InvalidTrigger => "invalid-trigger",
            DiagnosticKind::MissingSymbol => "missing-symbol",
            DiagnosticKind::EmptyCondition => "empty-condition",
            DiagnosticKind::MissingExitCondition => "missing-exit-condition",
            DiagnosticKind::ExpressionTooDeep => "expression-too-deep",
            DiagnosticKind::InvalidOffset => "invalid-offset",
            DiagnosticKind::OrphanNode => "orphan-node",
            DiagnosticKind::DeadEnd => "dead-end",
            DiagnosticKind::DuplicatePriority => "duplicate-priority",
            DiagnosticKind::ConnectionLimit => "connection-limit",
        }
    }
}

/// A single finding, located on a node or edge where possible
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    #[serde(rename = "type")]
    pub kind: DiagnosticKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_id: Option<String>,
}

impl Diagnostic {
    fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            node_id: None,
            edge_id: None,
        }
    }

    fn at_node(mut self, node_id: &str) -> Self {
        self.node_id = Some(node_id.to_string());
        self
    }

    fn at_edge(mut self, edge_id: &str) -> Self {
        self.edge_id = Some(edge_id.to_string());
        self
    }
}

/// Report consumed by the editor before run, export or reset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
}

impl ValidationResult {
    /// Number of errors of `kind`
    pub fn error_count(&self, kind: DiagnosticKind) -> usize {
        self.errors.iter().filter(|d| d.kind == kind).count()
    }

    /// Number of warnings of `kind`
    pub fn warning_count(&self, kind: DiagnosticKind) -> usize {
        self.warnings.iter().filter(|d| d.kind == kind).count()
    }

    pub fn has_error(&self, kind: DiagnosticKind) -> bool {
        self.error_count(kind) > 0
    }
}

/// Validate with default limits
pub fn validate(nodes: &[Node], edges: &[Edge]) -> ValidationResult {
    Validator::default().validate(nodes, edges)
}

/// Whole-graph validator
#[derive(Debug, Clone, Copy)]
pub struct Validator {
    max_outgoing_edges: usize,
    max_expression_depth: usize,
}

impl Default for Validator {
    fn default() -> Self {
        Self {
            max_outgoing_edges: defaults::MAX_OUTGOING_EDGES,
            max_expression_depth: defaults::MAX_EXPRESSION_DEPTH,
        }
    }
}

impl Validator {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_outgoing_edges: config.max_outgoing_edges,
            max_expression_depth: config.max_expression_depth,
        }
    }

    /// Run every check over the graph
    pub fn validate(&self, nodes: &[Node], edges: &[Edge]) -> ValidationResult {
        let graph = IndexedGraph::new(nodes, edges);
        let mut report = Report::default();

        check_unique_ids(&graph, &mut report);
        check_edge_references(&graph, &mut report);
        check_start_end_presence(&graph, &mut report);
        self.check_node_fields(&graph, &mut report);
        check_orphans(&graph, &mut report);
        check_dead_ends(&graph, &mut report);
        check_paths_to_end(&graph, &mut report);
        check_cycles(&graph, &mut report);
        check_signal_priorities(&graph, &mut report);
        check_position_references(&graph, &mut report);
        check_triggers(&graph, &mut report);
        self.check_connection_limits(&graph, &mut report);

        let result = report.finish();
        log::debug!(
            "Validated {} nodes / {} edges: {} errors, {} warnings",
            nodes.len(),
            edges.len(),
            result.errors.len(),
            result.warnings.len()
        );
        result
    }

    /// Start needs a symbol, signals a non-empty tree, exits an order config
    fn check_node_fields(&self, graph: &IndexedGraph<'_>, report: &mut Report) {
        for node in graph.nodes {
            match &node.data {
                NodeData::Start(start) if node.role.is_start() => {
                    if start.symbol.trim().is_empty() {
                        report.error(
                            Diagnostic::new(
                                DiagnosticKind::MissingSymbol,
                                format!("Start node '{}' has no symbol", node.id),
                            )
                            .at_node(&node.id),
                        );
                    }
                }
                NodeData::Signal(_) if node.role.is_signal() => {
                    for root in node.data.condition_roots() {
                        if root.leaf_count() == 0 {
                            report.error(
                                Diagnostic::new(
                                    DiagnosticKind::EmptyCondition,
                                    format!("Signal node '{}' has no conditions", node.id),
                                )
                                .at_node(&node.id),
                            );
                        }
                        let depth = root.max_expression_depth();
                        if depth > self.max_expression_depth {
                            report.error(
                                Diagnostic::new(
                                    DiagnosticKind::ExpressionTooDeep,
                                    format!(
                                        "Signal node '{}' nests expressions {} deep (maximum {})",
                                        node.id, depth, self.max_expression_depth
                                    ),
                                )
                                .at_node(&node.id),
                            );
                        }
                        if let Some(offset) = root.max_offset().filter(|o| *o > 0) {
                            report.error(
                                Diagnostic::new(
                                    DiagnosticKind::InvalidOffset,
                                    format!(
                                        "Signal node '{}' looks {} bar(s) ahead; offsets must be zero or negative",
                                        node.id, offset
                                    ),
                                )
                                .at_node(&node.id),
                            );
                        }
                    }
                }
                NodeData::Exit(exit) if node.role == NodeRole::Action(ActionKind::Exit) => {
                    if exit.exit_condition.is_none() {
                        report.error(
                            Diagnostic::new(
                                DiagnosticKind::MissingExitCondition,
                                format!("Exit node '{}' has no exit condition", node.id),
                            )
                            .at_node(&node.id),
                        );
                    }
                }
                _ => {}
            }
        }
    }

    /// Fan-out above the soft cap
    fn check_connection_limits(&self, graph: &IndexedGraph<'_>, report: &mut Report) {
        for (index, node) in graph.nodes.iter().enumerate() {
            let outgoing = graph.outgoing[index].len();
            if outgoing > self.max_outgoing_edges {
                report.warning(
                    Diagnostic::new(
                        DiagnosticKind::ConnectionLimit,
                        format!(
                            "Node '{}' has {} outgoing connections (recommended maximum {})",
                            node.id, outgoing, self.max_outgoing_edges
                        ),
                    )
                    .at_node(&node.id),
                );
            }
        }
    }
}

#[derive(Default)]
struct Report {
    errors: Vec<Diagnostic>,
    warnings: Vec<Diagnostic>,
}

impl Report {
    fn error(&mut self, diagnostic: Diagnostic) {
        self.errors.push(diagnostic);
    }

    fn warning(&mut self, diagnostic: Diagnostic) {
        self.warnings.push(diagnostic);
    }

    fn finish(self) -> ValidationResult {
        ValidationResult {
            valid: self.errors.is_empty(),
            errors: self.errors,
            warnings: self.warnings,
        }
    }
}

/// Index-based view of the graph. Edges with unknown endpoints are kept
/// out of the adjacency lists and reported separately.
struct IndexedGraph<'a> {
    nodes: &'a [Node],
    edges: &'a [Edge],
    index_of: HashMap<&'a str, usize>,
    /// (edge index, target node index), in edge order
    outgoing: Vec<Vec<(usize, usize)>>,
    /// (edge index, source node index), in edge order
    incoming: Vec<Vec<(usize, usize)>>,
}

impl<'a> IndexedGraph<'a> {
    fn new(nodes: &'a [Node], edges: &'a [Edge]) -> Self {
        let mut index_of = HashMap::new();
        for (index, node) in nodes.iter().enumerate() {
            index_of.entry(node.id.as_str()).or_insert(index);
        }

        let mut outgoing = vec![Vec::new(); nodes.len()];
        let mut incoming = vec![Vec::new(); nodes.len()];
        for (edge_index, edge) in edges.iter().enumerate() {
            let source = index_of.get(edge.source.as_str());
            let target = index_of.get(edge.target.as_str());
            if let (Some(&source), Some(&target)) = (source, target) {
                outgoing[source].push((edge_index, target));
                incoming[target].push((edge_index, source));
            }
        }

        Self {
            nodes,
            edges,
            index_of,
            outgoing,
            incoming,
        }
    }

    fn role(&self, index: usize) -> NodeRole {
        self.nodes[index].role
    }

    fn id(&self, index: usize) -> &'a str {
        &self.nodes[index].id
    }
}

/// Node and edge ids must be unique
fn check_unique_ids(graph: &IndexedGraph<'_>, report: &mut Report) {
    let mut seen = HashSet::new();
    for node in graph.nodes {
        if !seen.insert(node.id.as_str()) {
            report.error(
                Diagnostic::new(
                    DiagnosticKind::DuplicateId,
                    format!("Node id '{}' is used more than once", node.id),
                )
                .at_node(&node.id),
            );
        }
    }

    let mut seen = HashSet::new();
    for edge in graph.edges {
        if !seen.insert(edge.id.as_str()) {
            report.error(
                Diagnostic::new(
                    DiagnosticKind::DuplicateId,
                    format!("Edge id '{}' is used more than once", edge.id),
                )
                .at_edge(&edge.id),
            );
        }
    }
}

/// Check that all edge source/target nodes exist
fn check_edge_references(graph: &IndexedGraph<'_>, report: &mut Report) {
    for edge in graph.edges {
        for endpoint in [&edge.source, &edge.target] {
            if !graph.index_of.contains_key(endpoint.as_str()) {
                report.error(
                    Diagnostic::new(
                        DiagnosticKind::InvalidEdgeReference,
                        format!("Edge '{}' references unknown node '{}'", edge.id, endpoint),
                    )
                    .at_edge(&edge.id),
                );
            }
        }
    }
}

/// At least one Start and at least one terminal
fn check_start_end_presence(graph: &IndexedGraph<'_>, report: &mut Report) {
    if !graph.nodes.iter().any(|n| n.role.is_start()) {
        report.error(Diagnostic::new(
            DiagnosticKind::MissingStartNode,
            "Strategy has no Start node",
        ));
    }
    if !graph.nodes.iter().any(|n| n.role.is_terminal()) {
        report.error(Diagnostic::new(
            DiagnosticKind::MissingEndNode,
            "Strategy has no End or Force End node",
        ));
    }
}

/// Non-start nodes without any connection
fn check_orphans(graph: &IndexedGraph<'_>, report: &mut Report) {
    for (index, node) in graph.nodes.iter().enumerate() {
        if node.role.is_start() {
            continue;
        }
        if graph.outgoing[index].is_empty() && graph.incoming[index].is_empty() {
            report.warning(
                Diagnostic::new(
                    DiagnosticKind::OrphanNode,
                    format!("Node '{}' has no connections", node.id),
                )
                .at_node(&node.id),
            );
        }
    }
}

/// Only terminals may have zero outgoing edges. Start is exempt.
fn check_dead_ends(graph: &IndexedGraph<'_>, report: &mut Report) {
    for (index, node) in graph.nodes.iter().enumerate() {
        if node.role.is_terminal() || node.role.is_start() {
            continue;
        }
        if graph.outgoing[index].is_empty() {
            report.warning(
                Diagnostic::new(
                    DiagnosticKind::DeadEnd,
                    format!("Node '{}' has no outgoing connection to a terminal", node.id),
                )
                .at_node(&node.id),
            );
        }
    }
}

/// Every non-terminal node with outgoing edges must reach a terminal.
///
/// Each search has its own visited set so diamonds are explored fully
/// from every starting node.
fn check_paths_to_end(graph: &IndexedGraph<'_>, report: &mut Report) {
    let mut failing = 0;
    for (index, node) in graph.nodes.iter().enumerate() {
        if node.role.is_terminal() || graph.outgoing[index].is_empty() {
            continue;
        }
        if !reaches_terminal(graph, index) {
            failing += 1;
            report.error(
                Diagnostic::new(
                    DiagnosticKind::IncompletePath,
                    format!("Node '{}' has no path to an End node", node.id),
                )
                .at_node(&node.id),
            );
        }
    }

    if failing > 0 {
        report.error(Diagnostic::new(
            DiagnosticKind::IncompleteWorkflow,
            format!("{} node(s) cannot reach an End node", failing),
        ));
    }
}

fn reaches_terminal(graph: &IndexedGraph<'_>, from: usize) -> bool {
    let mut visited = vec![false; graph.nodes.len()];
    let mut stack = vec![from];
    while let Some(current) = stack.pop() {
        if graph.role(current).is_terminal() {
            return true;
        }
        if std::mem::replace(&mut visited[current], true) {
            continue;
        }
        stack.extend(graph.outgoing[current].iter().map(|&(_, target)| target));
    }
    false
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// Full-graph DFS; every back-edge becomes one `cycle-detail`
fn check_cycles(graph: &IndexedGraph<'_>, report: &mut Report) {
    let mut marks = vec![Mark::Unvisited; graph.nodes.len()];
    let mut cycles: Vec<(String, usize, usize)> = Vec::new();

    for root in 0..graph.nodes.len() {
        if marks[root] != Mark::Unvisited {
            continue;
        }
        // Frames of (node, next outgoing slot); `path` mirrors the frames
        let mut frames: Vec<(usize, usize)> = vec![(root, 0)];
        let mut path: Vec<usize> = vec![root];
        marks[root] = Mark::OnStack;

        while let Some(frame) = frames.last_mut() {
            let (node, slot) = *frame;
            if let Some(&(edge_index, target)) = graph.outgoing[node].get(slot) {
                frame.1 += 1;
                match marks[target] {
                    Mark::Unvisited => {
                        marks[target] = Mark::OnStack;
                        frames.push((target, 0));
                        path.push(target);
                    }
                    Mark::OnStack => {
                        let start = path.iter().position(|&n| n == target).unwrap_or(0);
                        let mut ids: Vec<&str> = path[start..].iter().map(|&n| graph.id(n)).collect();
                        ids.push(graph.id(target));
                        cycles.push((ids.join(" → "), target, edge_index));
                    }
                    Mark::Done => {}
                }
            } else {
                marks[node] = Mark::Done;
                frames.pop();
                path.pop();
            }
        }
    }

    if cycles.is_empty() {
        return;
    }

    report.error(Diagnostic::new(
        DiagnosticKind::CircularDependency,
        format!("Strategy contains {} circular dependency(ies)", cycles.len()),
    ));
    for (description, start, edge_index) in cycles {
        report.error(
            Diagnostic::new(DiagnosticKind::CycleDetail, format!("Cycle: {}", description))
                .at_node(graph.id(start))
                .at_edge(&graph.edges[edge_index].id),
        );
    }
}

/// Signals carrying a priority must not share it
fn check_signal_priorities(graph: &IndexedGraph<'_>, report: &mut Report) {
    let mut counts: HashMap<i64, usize> = HashMap::new();
    let prioritized: Vec<(&Node, i64)> = graph
        .nodes
        .iter()
        .filter(|n| n.role.is_signal())
        .filter_map(|n| n.data.as_signal().and_then(|s| s.priority).map(|p| (n, p)))
        .collect();
    for (_, priority) in &prioritized {
        *counts.entry(*priority).or_default() += 1;
    }

    for (node, priority) in prioritized {
        if counts[&priority] > 1 {
            report.warning(
                Diagnostic::new(
                    DiagnosticKind::DuplicatePriority,
                    format!(
                        "Signal node '{}' shares priority {} with another signal",
                        node.id, priority
                    ),
                )
                .at_node(&node.id),
            );
        }
    }
}

/// Per-vpi bookkeeping, kept in first-seen order
#[derive(Default)]
struct VpiUsage<'a> {
    order: Vec<&'a str>,
    entries: HashMap<&'a str, Vec<&'a str>>,
    modifies: HashMap<&'a str, Vec<&'a str>>,
    exits: HashMap<&'a str, Vec<&'a str>>,
}

impl<'a> VpiUsage<'a> {
    fn touch(&mut self, vpi: &'a str) {
        if !self.entries.contains_key(vpi)
            && !self.modifies.contains_key(vpi)
            && !self.exits.contains_key(vpi)
        {
            self.order.push(vpi);
        }
    }

    fn record(&mut self, kind: ActionKind, vpi: &'a str, node_id: &'a str) {
        self.touch(vpi);
        let table = match kind {
            ActionKind::Entry => &mut self.entries,
            ActionKind::Modify => &mut self.modifies,
            ActionKind::Exit => &mut self.exits,
            ActionKind::Alert => return,
        };
        table.entry(vpi).or_default().push(node_id);
    }
}

/// Modify/Exit references must resolve to an Entry vpi
fn check_position_references(graph: &IndexedGraph<'_>, report: &mut Report) {
    let mut usage = VpiUsage::default();
    for node in graph.nodes {
        let Some(kind) = node.role.action_kind() else {
            continue;
        };
        match kind {
            ActionKind::Entry => {
                for vpi in node.data.produced_vpis() {
                    usage.record(kind, vpi, &node.id);
                }
            }
            ActionKind::Modify | ActionKind::Exit => {
                if let Some(vpi) = node.data.referenced_vpi() {
                    usage.record(kind, vpi, &node.id);
                }
            }
            ActionKind::Alert => {}
        }
    }

    // Dangling references, in node order
    for node in graph.nodes {
        if !matches!(
            node.role,
            NodeRole::Action(ActionKind::Modify) | NodeRole::Action(ActionKind::Exit)
        ) {
            continue;
        }
        if let Some(vpi) = node.data.referenced_vpi() {
            if !usage.entries.contains_key(vpi) {
                report.error(
                    Diagnostic::new(
                        DiagnosticKind::InvalidPositionReference,
                        format!(
                            "{} node '{}' references position '{}' which no Entry node opens",
                            node.role, node.id, vpi
                        ),
                    )
                    .at_node(&node.id),
                );
            }
        }
    }

    for vpi in &usage.order {
        let entries = usage.entries.get(vpi).map_or(&[][..], Vec::as_slice);
        let modifies = usage.modifies.get(vpi).map_or(&[][..], Vec::as_slice);
        let exits = usage.exits.get(vpi).map_or(&[][..], Vec::as_slice);

        if entries.len() > 1 {
            report.error(
                Diagnostic::new(
                    DiagnosticKind::DuplicatePositionId,
                    format!("Position '{}' is opened by {} entries", vpi, entries.len()),
                )
                .at_node(entries[1]),
            );
        }
        if !entries.is_empty() && !modifies.is_empty() && !exits.is_empty() {
            report.error(
                Diagnostic::new(
                    DiagnosticKind::AmbiguousPositionOwnership,
                    format!(
                        "Position '{}' is used by Entry, Modify and Exit nodes at once",
                        vpi
                    ),
                )
                .at_node(entries[0]),
            );
        }
        if modifies.len() > 1 {
            report.error(
                Diagnostic::new(
                    DiagnosticKind::MultipleModify,
                    format!(
                        "Position '{}' is modified by {} nodes: {}",
                        vpi,
                        modifies.len(),
                        modifies.join(", ")
                    ),
                )
                .at_node(modifies[0]),
            );
        }
    }
}

/// Entry and Exit nodes need a signal or start node feeding them
fn check_triggers(graph: &IndexedGraph<'_>, report: &mut Report) {
    for (index, node) in graph.nodes.iter().enumerate() {
        if !node.role.is_order_action() {
            continue;
        }
        let incoming = &graph.incoming[index];
        if incoming.is_empty() {
            report.error(
                Diagnostic::new(
                    DiagnosticKind::MissingTrigger,
                    format!("{} node '{}' has no incoming connection", node.role, node.id),
                )
                .at_node(&node.id),
            );
        } else if !incoming
            .iter()
            .any(|&(_, source)| graph.role(source).is_trigger_source())
        {
            report.error(
                Diagnostic::new(
                    DiagnosticKind::InvalidTrigger,
                    format!(
                        "{} node '{}' is not triggered by a Signal or Start node",
                        node.role, node.id
                    ),
                )
                .at_node(&node.id),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::StrategyBuilder;
    use crate::condition::{ComparisonOperator, Condition, GroupCondition, GroupLogic};
    use crate::expression::{ComplexOperation, Expression, MarketField};
    use crate::node_data::{
        EntryData, ExitCondition, ExitData, ModifyData, Position, SignalData, StartData,
    };

    fn start_data() -> NodeData {
        NodeData::Start(StartData {
            symbol: "NIFTY".into(),
            ..StartData::default()
        })
    }

    fn signal_data(priority: Option<i64>) -> NodeData {
        NodeData::Signal(SignalData {
            priority,
            conditions: GroupCondition::with_id("root", GroupLogic::And).with_item(
                Condition::with_id(
                    "c1",
                    Expression::market(MarketField::Close),
                    ComparisonOperator::GreaterThan,
                    Expression::constant(100.0),
                ),
            ),
            ..SignalData::default()
        })
    }

    fn entry_data(vpis: &[&str]) -> NodeData {
        NodeData::Entry(EntryData {
            label: "Buy".into(),
            positions: vpis.iter().map(|v| Position::new(*v)).collect(),
        })
    }

    fn exit_data(vpi: &str) -> NodeData {
        NodeData::Exit(ExitData {
            target_vpi: Some(vpi.into()),
            exit_condition: Some(ExitCondition::default()),
            ..ExitData::default()
        })
    }

    fn modify_data(vpi: &str) -> NodeData {
        NodeData::Modify(ModifyData {
            target_vpi: Some(vpi.into()),
            ..ModifyData::default()
        })
    }

    fn valid_builder() -> StrategyBuilder {
        StrategyBuilder::new("s1", "Valid")
            .add_node("start", NodeRole::Start)
            .with_data(start_data())
            .add_node("signal", NodeRole::EntrySignal)
            .with_data(signal_data(None))
            .add_node("entry", NodeRole::ENTRY)
            .with_data(entry_data(&["p1"]))
            .add_node("end", NodeRole::End)
            .connect("start", "signal")
            .connect("signal", "entry")
            .connect("entry", "end")
    }

    #[test]
    fn test_valid_graph() {
        let graph = valid_builder().build();
        let result = validate(&graph.nodes, &graph.edges);
        assert!(result.valid, "Expected no errors, got: {:?}", result.errors);
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
    }

    #[test]
    fn test_lone_start_is_invalid_without_incomplete_path() {
        let graph = StrategyBuilder::new("s", "Lone")
            .add_node("start", NodeRole::Start)
            .with_data(start_data())
            .build();

        let result = validate(&graph.nodes, &graph.edges);
        assert!(!result.valid);
        assert!(!result.has_error(DiagnosticKind::IncompletePath));
        assert!(!result.has_error(DiagnosticKind::IncompleteWorkflow));
        assert!(result.has_error(DiagnosticKind::MissingEndNode));
        assert_eq!(result.warning_count(DiagnosticKind::DeadEnd), 0);
        assert_eq!(result.warning_count(DiagnosticKind::OrphanNode), 0);
    }

    #[test]
    fn test_missing_start() {
        let graph = StrategyBuilder::new("s", "No start")
            .add_node("end", NodeRole::End)
            .build();
        let result = validate(&graph.nodes, &graph.edges);
        assert!(result.has_error(DiagnosticKind::MissingStartNode));
        assert_eq!(result.warning_count(DiagnosticKind::OrphanNode), 1);
    }

    #[test]
    fn test_multiple_modify_reported_once() {
        let graph = valid_builder()
            .add_node("modify", NodeRole::MODIFY)
            .with_data(modify_data("p1"))
            .add_node("modify2", NodeRole::MODIFY)
            .with_data(modify_data("p1"))
            .connect("entry", "modify")
            .build();

        let result = validate(&graph.nodes, &graph.edges);
        assert_eq!(result.error_count(DiagnosticKind::MultipleModify), 1);
        let diagnostic = result
            .errors
            .iter()
            .find(|d| d.kind == DiagnosticKind::MultipleModify)
            .unwrap();
        assert!(diagnostic.message.contains("p1"));
    }

    #[test]
    fn test_three_node_cycle() {
        let graph = StrategyBuilder::new("s", "Cycle")
            .add_node("A", NodeRole::Signal)
            .add_node("B", NodeRole::Signal)
            .add_node("C", NodeRole::Signal)
            .connect("A", "B")
            .connect("B", "C")
            .connect("C", "A")
            .build();

        let result = validate(&graph.nodes, &graph.edges);
        assert_eq!(result.error_count(DiagnosticKind::CircularDependency), 1);
        let details: Vec<&Diagnostic> = result
            .errors
            .iter()
            .filter(|d| d.kind == DiagnosticKind::CycleDetail)
            .collect();
        assert_eq!(details.len(), 1);
        assert!(details[0].message.contains("A → B → C → A"));
        assert_eq!(details[0].node_id.as_deref(), Some("A"));
    }

    #[test]
    fn test_acyclic_graph_has_no_cycle_reports() {
        let graph = valid_builder()
            .add_node("signal2", NodeRole::Signal)
            .with_data(signal_data(None))
            .connect("start", "signal2")
            .connect("signal2", "end")
            .build();
        let result = validate(&graph.nodes, &graph.edges);
        assert!(!result.has_error(DiagnosticKind::CircularDependency));
        assert!(!result.has_error(DiagnosticKind::CycleDetail));
    }

    #[test]
    fn test_single_back_edge_yields_single_closed_path() {
        let graph = valid_builder()
            .add_node("filter", NodeRole::Signal)
            .with_data(signal_data(None))
            .connect("signal", "filter")
            .connect("filter", "signal")
            .build();
        let result = validate(&graph.nodes, &graph.edges);
        let details: Vec<&Diagnostic> = result
            .errors
            .iter()
            .filter(|d| d.kind == DiagnosticKind::CycleDetail)
            .collect();
        assert_eq!(details.len(), 1);
        let path: Vec<&str> = details[0]
            .message
            .trim_start_matches("Cycle: ")
            .split(" → ")
            .collect();
        assert_eq!(path.first(), path.last());
    }

    #[test]
    fn test_diamond_reaches_end() {
        let graph = valid_builder()
            .add_node("left", NodeRole::Signal)
            .with_data(signal_data(None))
            .add_node("right", NodeRole::Signal)
            .with_data(signal_data(None))
            .add_node("join", NodeRole::Signal)
            .with_data(signal_data(None))
            .connect("start", "left")
            .connect("start", "right")
            .connect("left", "join")
            .connect("right", "join")
            .connect("join", "end")
            .build();
        let result = validate(&graph.nodes, &graph.edges);
        assert!(result.valid, "{:?}", result.errors);
    }

    #[test]
    fn test_path_without_end_reported_per_node_and_summary() {
        let graph = valid_builder()
            .add_node("a", NodeRole::Signal)
            .with_data(signal_data(None))
            .add_node("b", NodeRole::Signal)
            .with_data(signal_data(None))
            .connect("start", "a")
            .connect("a", "b")
            .build();
        let result = validate(&graph.nodes, &graph.edges);

        let failing: Vec<&str> = result
            .errors
            .iter()
            .filter(|d| d.kind == DiagnosticKind::IncompletePath)
            .filter_map(|d| d.node_id.as_deref())
            .collect();
        // `b` has no outgoing edges, so it is a dead end rather than a path failure
        assert_eq!(failing, vec!["a"]);
        assert_eq!(result.error_count(DiagnosticKind::IncompleteWorkflow), 1);
        assert_eq!(result.warning_count(DiagnosticKind::DeadEnd), 1);
    }

    #[test]
    fn test_duplicate_priorities_warn_per_node() {
        let graph = valid_builder()
            .add_node("signal2", NodeRole::Signal)
            .with_data(signal_data(Some(1)))
            .add_node("signal3", NodeRole::Signal)
            .with_data(signal_data(Some(1)))
            .add_node("signal4", NodeRole::Signal)
            .with_data(signal_data(Some(2)))
            .connect("start", "signal2")
            .connect("start", "signal3")
            .connect("start", "signal4")
            .connect("signal2", "end")
            .connect("signal3", "end")
            .connect("signal4", "end")
            .build();
        let result = validate(&graph.nodes, &graph.edges);
        assert_eq!(result.warning_count(DiagnosticKind::DuplicatePriority), 2);
        assert!(result.valid);
    }

    #[test]
    fn test_dangling_position_reference() {
        let builder = valid_builder()
            .add_node("modify", NodeRole::MODIFY)
            .with_data(modify_data("X"))
            .connect("entry", "modify");
        let graph = builder.build();
        let result = validate(&graph.nodes, &graph.edges);
        assert_eq!(result.error_count(DiagnosticKind::InvalidPositionReference), 1);

        let without_modify = valid_builder().build();
        let result = validate(&without_modify.nodes, &without_modify.edges);
        assert!(!result.has_error(DiagnosticKind::InvalidPositionReference));
    }

    #[test]
    fn test_entry_modify_exit_on_same_vpi_is_ambiguous() {
        let graph = valid_builder()
            .add_node("modify", NodeRole::MODIFY)
            .with_data(modify_data("p1"))
            .add_node("exit-signal", NodeRole::ExitSignal)
            .with_data(signal_data(None))
            .add_node("exit", NodeRole::EXIT)
            .with_data(exit_data("p1"))
            .connect("entry", "modify")
            .connect("modify", "end")
            .connect("start", "exit-signal")
            .connect("exit-signal", "exit")
            .connect("exit", "end")
            .build();
        let result = validate(&graph.nodes, &graph.edges);
        assert_eq!(result.error_count(DiagnosticKind::AmbiguousPositionOwnership), 1);
        assert!(!result.has_error(DiagnosticKind::InvalidPositionReference));
    }

    #[test]
    fn test_duplicate_vpi_across_entries() {
        let graph = valid_builder()
            .add_node("signal2", NodeRole::EntrySignal)
            .with_data(signal_data(None))
            .add_node("entry2", NodeRole::ENTRY)
            .with_data(entry_data(&["p1"]))
            .connect("start", "signal2")
            .connect("signal2", "entry2")
            .connect("entry2", "end")
            .build();
        let result = validate(&graph.nodes, &graph.edges);
        assert_eq!(result.error_count(DiagnosticKind::DuplicatePositionId), 1);
    }

    #[test]
    fn test_trigger_rules() {
        // Entry fed only by a retry node
        let graph = StrategyBuilder::new("s", "Retry only")
            .add_node("start", NodeRole::Start)
            .with_data(start_data())
            .add_node("retry", NodeRole::Retry)
            .add_node("entry", NodeRole::ENTRY)
            .with_data(entry_data(&["p1"]))
            .add_node("exit", NodeRole::EXIT)
            .with_data(exit_data("p1"))
            .add_node("end", NodeRole::End)
            .connect("retry", "entry")
            .connect("entry", "end")
            .connect("exit", "end")
            .build();
        let result = validate(&graph.nodes, &graph.edges);
        let invalid: Vec<_> = result
            .errors
            .iter()
            .filter(|d| d.kind == DiagnosticKind::InvalidTrigger)
            .filter_map(|d| d.node_id.as_deref())
            .collect();
        assert_eq!(invalid, vec!["entry"]);
        let missing: Vec<_> = result
            .errors
            .iter()
            .filter(|d| d.kind == DiagnosticKind::MissingTrigger)
            .filter_map(|d| d.node_id.as_deref())
            .collect();
        assert_eq!(missing, vec!["exit"]);
    }

    #[test]
    fn test_field_checks() {
        let graph = StrategyBuilder::new("s", "Fields")
            .add_node("start", NodeRole::Start)
            .add_node("signal", NodeRole::Signal)
            .add_node("exit", NodeRole::EXIT)
            .add_node("end", NodeRole::End)
            .connect("start", "signal")
            .connect("signal", "exit")
            .connect("exit", "end")
            .build();
        let result = validate(&graph.nodes, &graph.edges);
        assert!(result.has_error(DiagnosticKind::MissingSymbol));
        assert!(result.has_error(DiagnosticKind::EmptyCondition));
        assert!(result.has_error(DiagnosticKind::MissingExitCondition));
    }

    #[test]
    fn test_expression_depth_limit() {
        let mut deep = Expression::constant(1.0);
        for _ in 0..5 {
            deep = Expression::complex(ComplexOperation::Add, deep, Expression::constant(1.0));
        }
        let data = NodeData::Signal(SignalData {
            conditions: GroupCondition::default().with_item(Condition::with_id(
                "deep",
                deep,
                ComparisonOperator::Equal,
                Expression::constant(0.0),
            )),
            ..SignalData::default()
        });
        let graph = valid_builder()
            .add_node("deep", NodeRole::Signal)
            .with_data(data)
            .connect("start", "deep")
            .connect("deep", "end")
            .build();

        let config = EngineConfig {
            max_expression_depth: 4,
            ..EngineConfig::default()
        };
        let result = Validator::from_config(&config).validate(&graph.nodes, &graph.edges);
        assert_eq!(result.error_count(DiagnosticKind::ExpressionTooDeep), 1);
        assert!(!validate(&graph.nodes, &graph.edges).has_error(DiagnosticKind::ExpressionTooDeep));
    }

    #[test]
    fn test_look_ahead_offset_is_an_error() {
        let close_at = |offset: i32| {
            NodeData::Signal(SignalData {
                conditions: GroupCondition::default().with_item(Condition::with_id(
                    "peek",
                    Expression::MarketData {
                        field: MarketField::Close,
                        offset,
                    },
                    ComparisonOperator::GreaterThan,
                    Expression::constant(1.0),
                )),
                ..SignalData::default()
            })
        };
        let graph = valid_builder()
            .add_node("ahead", NodeRole::Signal)
            .with_data(close_at(5))
            .add_node("behind", NodeRole::Signal)
            .with_data(close_at(-3))
            .connect("start", "ahead")
            .connect("ahead", "end")
            .connect("start", "behind")
            .connect("behind", "end")
            .build();

        let result = validate(&graph.nodes, &graph.edges);
        assert!(!result.valid);
        assert_eq!(result.error_count(DiagnosticKind::InvalidOffset), 1);
        let diagnostic = result
            .errors
            .iter()
            .find(|d| d.kind == DiagnosticKind::InvalidOffset)
            .unwrap();
        assert_eq!(diagnostic.node_id.as_deref(), Some("ahead"));
    }

    #[test]
    fn test_reference_integrity_of_edges_and_ids() {
        let mut graph = valid_builder().build();
        graph.edges.push(Edge::new(
            graph.edges[0].id.clone(),
            "start",
            "ghost",
            crate::types::EdgeKind::Default,
        ));
        let result = validate(&graph.nodes, &graph.edges);
        assert_eq!(result.error_count(DiagnosticKind::DuplicateId), 1);
        assert_eq!(result.error_count(DiagnosticKind::InvalidEdgeReference), 1);
    }

    #[test]
    fn test_connection_limit_warning() {
        let mut builder = valid_builder();
        for i in 0..11 {
            let id = format!("s{}", i);
            builder = builder
                .add_node(&id, NodeRole::Signal)
                .with_data(signal_data(None))
                .connect("start", &id)
                .connect(&id, "end");
        }
        let graph = builder.build();
        let result = validate(&graph.nodes, &graph.edges);
        assert_eq!(result.warning_count(DiagnosticKind::ConnectionLimit), 1);
    }

    #[test]
    fn test_deterministic_and_serializable() {
        let graph = StrategyBuilder::new("s", "Messy")
            .add_node("A", NodeRole::Signal)
            .add_node("B", NodeRole::ENTRY)
            .add_node("C", NodeRole::MODIFY)
            .with_data(modify_data("zz"))
            .connect("A", "B")
            .connect("B", "A")
            .build();

        let first = validate(&graph.nodes, &graph.edges);
        let second = validate(&graph.nodes, &graph.edges);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );

        let json = serde_json::to_value(&first).unwrap();
        assert_eq!(json["valid"], false);
        assert!(json["errors"]
            .as_array()
            .unwrap()
            .iter()
            .any(|d| d["type"] == "circular-dependency"));
    }
}
