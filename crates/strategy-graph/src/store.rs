//! Graph store
//!
//! Owns the nodes and edges of the strategy being edited. All mutation goes
//! through a [`GraphTransaction`]: it holds the only mutable borrow of the
//! store, buffers change events until [`GraphTransaction::commit`], and
//! restores the prior graph if dropped without committing. The single-op
//! helpers on [`GraphStore`] each run inside their own transaction.

use std::sync::Arc;

use serde_json::Value;

use crate::condition::GroupCondition;
use crate::config::EngineConfig;
use crate::connection::{self, ConnectionVerdict};
use crate::error::{AstError, ConnectionError, Result, StoreError, StrategyError};
use crate::events::{EventSink, GraphEvent, NullEventSink};
use crate::node_data::{NodeData, ReEntryConfig, RetryData};
use crate::types::{
    ActionKind, CanvasPosition, Edge, EdgeId, EdgeKind, Node, NodeId, NodeRole, StrategyGraph,
};
use crate::validation::{ValidationResult, Validator};

/// Vertical offset of an auto-created Retry node below its Exit node
const RETRY_NODE_OFFSET: f64 = 120.0;

/// Nodes and edges created by [`GraphTransaction::enable_re_entry`]
#[derive(Debug, Clone, PartialEq)]
pub struct ReEntryWiring {
    pub retry_node: Node,
    pub edges: Vec<Edge>,
}

/// The graph being edited
pub struct GraphStore {
    graph: StrategyGraph,
    config: EngineConfig,
    events: Arc<dyn EventSink>,
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl GraphStore {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            graph: StrategyGraph::default(),
            config,
            events: Arc::new(NullEventSink),
        }
    }

    /// Deliver committed changes to `sink`
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn graph(&self) -> &StrategyGraph {
        &self.graph
    }

    pub fn nodes(&self) -> &[Node] {
        &self.graph.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.graph.edges
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.graph.find_node(id)
    }

    /// Deep copy of the current graph
    pub fn snapshot(&self) -> StrategyGraph {
        self.graph.clone()
    }

    /// Evaluate a proposed edge without creating it
    pub fn can_connect(&self, source: &str, target: &str) -> std::result::Result<ConnectionVerdict, ConnectionError> {
        connection::can_connect(
            &self.graph.nodes,
            &self.graph.edges,
            source,
            target,
            self.config.max_outgoing_edges,
        )
    }

    /// Run the validator over the current graph
    pub fn validate(&self) -> ValidationResult {
        Validator::from_config(&self.config).validate(&self.graph.nodes, &self.graph.edges)
    }

    /// Start a transaction. The store is exclusively borrowed until the
    /// transaction is committed or dropped.
    pub fn begin_mutation(&mut self) -> GraphTransaction<'_> {
        let backup = self.graph.clone();
        GraphTransaction {
            store: self,
            backup: Some(backup),
            pending: Vec::new(),
        }
    }

    pub fn add_node(&mut self, role: NodeRole, position: impl Into<CanvasPosition>) -> Node {
        let mut txn = self.begin_mutation();
        let node = txn.add_node(role, position);
        txn.commit();
        node
    }

    pub fn add_edge(
        &mut self,
        source: &str,
        target: &str,
        kind: EdgeKind,
    ) -> std::result::Result<Edge, ConnectionError> {
        let mut txn = self.begin_mutation();
        let edge = txn.add_edge(source, target, kind)?;
        txn.commit();
        Ok(edge)
    }

    pub fn remove_node(&mut self, id: &str) -> std::result::Result<Vec<EdgeId>, StoreError> {
        let mut txn = self.begin_mutation();
        let removed = txn.remove_node(id)?;
        txn.commit();
        Ok(removed)
    }

    pub fn remove_edge(&mut self, id: &str) -> std::result::Result<Edge, StoreError> {
        let mut txn = self.begin_mutation();
        let edge = txn.remove_edge(id)?;
        txn.commit();
        Ok(edge)
    }

    pub fn update_node_data(&mut self, id: &str, patch: &Value) -> std::result::Result<bool, StoreError> {
        let mut txn = self.begin_mutation();
        let changed = txn.update_node_data(id, patch)?;
        txn.commit();
        Ok(changed)
    }

    pub fn edit_conditions<F>(&mut self, id: &str, edit: F) -> Result<bool>
    where
        F: FnOnce(&GroupCondition) -> std::result::Result<GroupCondition, AstError>,
    {
        let mut txn = self.begin_mutation();
        let changed = txn.edit_conditions(id, edit)?;
        txn.commit();
        Ok(changed)
    }

    pub fn enable_re_entry(&mut self, exit_id: &str, config: ReEntryConfig) -> Result<ReEntryWiring> {
        let mut txn = self.begin_mutation();
        let wiring = txn.enable_re_entry(exit_id, config)?;
        txn.commit();
        Ok(wiring)
    }

    pub fn disable_re_entry(&mut self, exit_id: &str) -> std::result::Result<Option<NodeId>, StoreError> {
        let mut txn = self.begin_mutation();
        let removed = txn.disable_re_entry(exit_id)?;
        txn.commit();
        Ok(removed)
    }

    /// Swap in a whole graph
    pub fn replace_graph(&mut self, graph: StrategyGraph) {
        let mut txn = self.begin_mutation();
        txn.replace_graph(graph);
        txn.commit();
    }
}

/// Exclusive, all-or-nothing edit of a [`GraphStore`]
pub struct GraphTransaction<'a> {
    store: &'a mut GraphStore,
    /// Graph as it was at `begin_mutation`; `None` once committed
    backup: Option<StrategyGraph>,
    pending: Vec<GraphEvent>,
}

impl GraphTransaction<'_> {
    /// Current (uncommitted) graph
    pub fn graph(&self) -> &StrategyGraph {
        &self.store.graph
    }

    /// Keep the changes and deliver buffered events
    pub fn commit(mut self) {
        self.backup = None;
        let events = std::mem::take(&mut self.pending);
        log::debug!("Committed graph transaction with {} change(s)", events.len());
        for event in events {
            if let Err(e) = self.store.events.send(event) {
                log::warn!("Dropped graph event: {}", e);
            }
        }
    }

    /// Discard the changes
    pub fn rollback(self) {
        // Drop restores the backup
    }

    /// Create a node with a fresh id and the role's default data
    pub fn add_node(&mut self, role: NodeRole, position: impl Into<CanvasPosition>) -> Node {
        let id = format!("{}-{}", role.id_prefix(), uuid::Uuid::new_v4());
        let node = Node::new(id, role, position);
        log::debug!("Adding {} node '{}'", role, node.id);
        self.store.graph.nodes.push(node.clone());
        self.pending.push(GraphEvent::NodeAdded {
            node_id: node.id.clone(),
            role,
        });
        node
    }

    /// Create an edge if the connection rules allow it. A rejected edge
    /// leaves the graph untouched.
    pub fn add_edge(
        &mut self,
        source: &str,
        target: &str,
        kind: EdgeKind,
    ) -> std::result::Result<Edge, ConnectionError> {
        if let Err(e) = self.store.can_connect(source, target) {
            log::debug!("Rejected edge {} -> {}: {}", source, target, e);
            return Err(e);
        }
        let edge = Edge::new(format!("edge-{}", uuid::Uuid::new_v4()), source, target, kind);
        self.push_edge(edge.clone());
        Ok(edge)
    }

    fn push_edge(&mut self, edge: Edge) {
        log::debug!("Adding edge '{}' ({} -> {})", edge.id, edge.source, edge.target);
        self.pending.push(GraphEvent::EdgeAdded {
            edge_id: edge.id.clone(),
            source: edge.source.clone(),
            target: edge.target.clone(),
        });
        self.store.graph.edges.push(edge);
    }

    /// Remove a node and every edge touching it.
    ///
    /// Removing an Exit node also removes its Retry node; removing a Retry
    /// node clears the re-entry setting of its Exit node.
    pub fn remove_node(&mut self, id: &str) -> std::result::Result<Vec<EdgeId>, StoreError> {
        let Some(index) = self.store.graph.nodes.iter().position(|n| n.id == id) else {
            log::warn!("remove_node: node '{}' not found", id);
            return Err(StoreError::NodeNotFound(id.to_string()));
        };
        let node = self.store.graph.nodes.remove(index);

        let mut removed = self.remove_edges_touching(id);
        match node.role {
            NodeRole::Action(ActionKind::Exit) => {
                if let Some(retry_id) = self.retry_for(id) {
                    removed.extend(self.remove_node(&retry_id)?);
                }
            }
            NodeRole::Retry => {
                if let Some(exit_id) = node.data.as_retry().map(|r| r.source_exit_id.clone()) {
                    if let Some(exit) = self
                        .store
                        .graph
                        .find_node_mut(&exit_id)
                        .and_then(|n| n.data.as_exit_mut())
                    {
                        exit.re_entry = None;
                        self.pending.push(GraphEvent::NodeUpdated { node_id: exit_id });
                    }
                }
            }
            _ => {}
        }

        log::debug!("Removed node '{}' and {} edge(s)", id, removed.len());
        self.pending.push(GraphEvent::NodeRemoved {
            node_id: id.to_string(),
            removed_edges: removed.clone(),
        });
        Ok(removed)
    }

    fn remove_edges_touching(&mut self, node_id: &str) -> Vec<EdgeId> {
        let mut removed = Vec::new();
        self.store.graph.edges.retain(|e| {
            if e.touches(node_id) {
                removed.push(e.id.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn remove_edge(&mut self, id: &str) -> std::result::Result<Edge, StoreError> {
        let Some(index) = self.store.graph.edges.iter().position(|e| e.id == id) else {
            log::warn!("remove_edge: edge '{}' not found", id);
            return Err(StoreError::EdgeNotFound(id.to_string()));
        };
        let edge = self.store.graph.edges.remove(index);
        log::debug!("Removed edge '{}'", id);
        self.pending.push(GraphEvent::EdgeRemoved {
            edge_id: edge.id.clone(),
        });
        Ok(edge)
    }

    /// Shallow-merge `patch` into the node's data. The id and role are never
    /// touched, and an Exit node's re-entry setting only changes through
    /// [`Self::enable_re_entry`]. Returns whether anything changed.
    pub fn update_node_data(&mut self, id: &str, patch: &Value) -> std::result::Result<bool, StoreError> {
        let Some(node) = self.store.graph.find_node(id) else {
            log::warn!("update_node_data: node '{}' not found", id);
            return Err(StoreError::NodeNotFound(id.to_string()));
        };

        let mut data = node
            .data
            .merge_patch(node.role, patch)
            .map_err(|reason| StoreError::InvalidPatch {
                node_id: id.to_string(),
                reason,
            })?;
        if let (Some(before), Some(after)) = (node.data.as_exit(), data.as_exit_mut()) {
            if before.re_entry != after.re_entry {
                log::warn!("Ignoring re-entry change on '{}'; use enable_re_entry", id);
                after.re_entry = before.re_entry;
            }
        }

        self.set_data(id, data)
    }

    /// Replace the node's data with a typed value of the matching role
    pub fn set_node_data(&mut self, id: &str, data: NodeData) -> std::result::Result<bool, StoreError> {
        let Some(node) = self.store.graph.find_node(id) else {
            log::warn!("set_node_data: node '{}' not found", id);
            return Err(StoreError::NodeNotFound(id.to_string()));
        };
        if !data.matches_role(node.role) {
            return Err(StoreError::InvalidPatch {
                node_id: id.to_string(),
                reason: format!("data does not belong to a {} node", node.role),
            });
        }
        self.set_data(id, data)
    }

    fn set_data(&mut self, id: &str, data: NodeData) -> std::result::Result<bool, StoreError> {
        let node = self
            .store
            .graph
            .find_node_mut(id)
            .ok_or_else(|| StoreError::NodeNotFound(id.to_string()))?;
        if node.data == data {
            return Ok(false);
        }
        node.data = data;
        log::debug!("Updated data of node '{}'", id);
        self.pending.push(GraphEvent::NodeUpdated {
            node_id: id.to_string(),
        });
        Ok(true)
    }

    /// Apply a condition-tree edit to a signal node's primary tree
    pub fn edit_conditions<F>(&mut self, id: &str, edit: F) -> Result<bool>
    where
        F: FnOnce(&GroupCondition) -> std::result::Result<GroupCondition, AstError>,
    {
        let node = self
            .store
            .graph
            .find_node(id)
            .ok_or_else(|| StoreError::NodeNotFound(id.to_string()))?;
        let Some(signal) = node.data.as_signal() else {
            return Err(StoreError::WrongRole {
                node_id: id.to_string(),
                role: node.role,
                expected: "signal",
            }
            .into());
        };

        let mut updated = signal.clone();
        updated.conditions = edit(&signal.conditions)?;
        Ok(self.set_data(id, NodeData::Signal(updated))?)
    }

    /// Enable re-entry on an Exit node, creating its Retry node and wiring
    /// `Exit -> Retry` and `Retry -> Entry` (the Entry that opens the exit's
    /// target position). Calling it again only updates the config.
    pub fn enable_re_entry(&mut self, exit_id: &str, config: ReEntryConfig) -> Result<ReEntryWiring> {
        let exit = self.exit_node(exit_id)?.clone();
        let target_vpi = exit.data.as_exit().and_then(|e| e.target_vpi.clone());

        if let Some(exit_data) = self
            .store
            .graph
            .find_node_mut(exit_id)
            .and_then(|n| n.data.as_exit_mut())
        {
            exit_data.re_entry = Some(config);
        }
        self.pending.push(GraphEvent::NodeUpdated {
            node_id: exit_id.to_string(),
        });

        if let Some(retry_id) = self.retry_for(exit_id) {
            let retry = self
                .store
                .graph
                .find_node_mut(&retry_id)
                .ok_or_else(|| StoreError::NodeNotFound(retry_id.clone()))?;
            if let NodeData::Retry(data) = &mut retry.data {
                data.config = config;
            }
            let retry_node = retry.clone();
            let edges = self
                .store
                .graph
                .edges
                .iter()
                .filter(|e| e.touches(&retry_id))
                .cloned()
                .collect();
            log::debug!("Updated re-entry config of '{}'", exit_id);
            return Ok(ReEntryWiring { retry_node, edges });
        }

        let retry_id = format!("{}-{}", NodeRole::Retry.id_prefix(), uuid::Uuid::new_v4());
        let position = CanvasPosition::new(exit.position.x, exit.position.y + RETRY_NODE_OFFSET);
        let retry_node = Node::new(&retry_id, NodeRole::Retry, position).with_data(NodeData::Retry(
            RetryData {
                label: "Re-entry".to_string(),
                source_exit_id: exit_id.to_string(),
                config,
            },
        ));
        self.store.graph.nodes.push(retry_node.clone());
        self.pending.push(GraphEvent::NodeAdded {
            node_id: retry_id.clone(),
            role: NodeRole::Retry,
        });

        let mut edges = vec![self.add_edge(exit_id, &retry_id, EdgeKind::DashedAnimated)?];
        match target_vpi.as_deref().and_then(|vpi| self.entry_opening(vpi)) {
            Some(entry_id) => {
                edges.push(self.add_edge(&retry_id, &entry_id, EdgeKind::DashedAnimated)?);
            }
            None => log::warn!(
                "Exit node '{}' has no Entry node to re-enter; retry left unlinked",
                exit_id
            ),
        }

        log::debug!("Enabled re-entry on '{}' via '{}'", exit_id, retry_id);
        self.pending.push(GraphEvent::ReEntryEnabled {
            exit_node_id: exit_id.to_string(),
            retry_node_id: retry_id,
        });
        Ok(ReEntryWiring { retry_node, edges })
    }

    /// Remove the Retry node paired with an Exit node and clear its
    /// re-entry setting. Returns the removed Retry node id, if any.
    pub fn disable_re_entry(&mut self, exit_id: &str) -> std::result::Result<Option<NodeId>, StoreError> {
        self.exit_node(exit_id)?;

        let retry_id = self.retry_for(exit_id);
        if let Some(retry_id) = &retry_id {
            // Clears the exit's re-entry config as well
            self.remove_node(retry_id)?;
            self.pending.push(GraphEvent::ReEntryDisabled {
                exit_node_id: exit_id.to_string(),
                retry_node_id: retry_id.clone(),
            });
        } else if let Some(exit) = self
            .store
            .graph
            .find_node_mut(exit_id)
            .and_then(|n| n.data.as_exit_mut())
        {
            if exit.re_entry.take().is_some() {
                self.pending.push(GraphEvent::NodeUpdated {
                    node_id: exit_id.to_string(),
                });
            }
        }
        Ok(retry_id)
    }

    /// Swap in a whole graph
    pub fn replace_graph(&mut self, graph: StrategyGraph) {
        log::debug!(
            "Replacing graph with {} nodes / {} edges",
            graph.nodes.len(),
            graph.edges.len()
        );
        self.pending.push(GraphEvent::GraphReplaced {
            node_count: graph.nodes.len(),
            edge_count: graph.edges.len(),
        });
        self.store.graph = graph;
    }

    /// Remove every node and edge
    pub fn clear(&mut self) {
        self.replace_graph(StrategyGraph::default());
    }

    pub fn set_nodes(&mut self, nodes: Vec<Node>) {
        let edges = std::mem::take(&mut self.store.graph.edges);
        self.replace_graph(StrategyGraph::new(nodes, edges));
    }

    pub fn set_edges(&mut self, edges: Vec<Edge>) {
        let nodes = std::mem::take(&mut self.store.graph.nodes);
        self.replace_graph(StrategyGraph::new(nodes, edges));
    }

    fn exit_node(&self, id: &str) -> std::result::Result<&Node, StoreError> {
        let node = self
            .store
            .graph
            .find_node(id)
            .ok_or_else(|| StoreError::NodeNotFound(id.to_string()))?;
        if node.role != NodeRole::EXIT {
            return Err(StoreError::WrongRole {
                node_id: id.to_string(),
                role: node.role,
                expected: "exit",
            });
        }
        Ok(node)
    }

    fn retry_for(&self, exit_id: &str) -> Option<NodeId> {
        self.store
            .graph
            .nodes
            .iter()
            .find(|n| n.data.as_retry().is_some_and(|r| r.source_exit_id == exit_id))
            .map(|n| n.id.clone())
    }

    fn entry_opening(&self, vpi: &str) -> Option<NodeId> {
        self.store
            .graph
            .nodes
            .iter()
            .filter(|n| n.role == NodeRole::ENTRY)
            .find(|n| n.data.produced_vpis().contains(&vpi))
            .map(|n| n.id.clone())
    }
}

impl Drop for GraphTransaction<'_> {
    fn drop(&mut self) {
        if let Some(backup) = self.backup.take() {
            log::debug!(
                "Rolling back graph transaction ({} discarded change(s))",
                self.pending.len()
            );
            self.store.graph = backup;
        }
    }
}
