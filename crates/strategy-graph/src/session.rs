//! Editing session
//!
//! Pairs a [`GraphStore`] with its undo history and the identity of the
//! strategy being edited. Every mutation runs in one store transaction and
//! records a history snapshot after it commits; a failed mutation leaves
//! both the graph and the history untouched.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::config::EngineConfig;
use crate::error::{Result, StrategyError};
use crate::events::EventSink;
use crate::node_data::ReEntryConfig;
use crate::persistence::{KeyValueBackend, StrategyRepository};
use crate::serialization::{export_strategy, import_from_str, StrategyRecord};
use crate::store::{GraphStore, GraphTransaction, ReEntryWiring};
use crate::types::{CanvasPosition, Edge, EdgeId, EdgeKind, Node, NodeId, NodeRole};
use crate::undo::UndoStack;
use crate::validation::ValidationResult;

const UNTITLED: &str = "Untitled Strategy";

/// A strategy open for editing
pub struct StrategySession {
    id: Option<String>,
    name: String,
    description: String,
    created: Option<DateTime<Utc>>,
    store: GraphStore,
    history: UndoStack,
}

impl Default for StrategySession {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl StrategySession {
    /// Empty session; the empty graph is the first history entry
    pub fn new(config: EngineConfig) -> Self {
        let history = UndoStack::new(config.history_limit);
        let mut session = Self {
            id: None,
            name: UNTITLED.to_string(),
            description: String::new(),
            created: None,
            store: GraphStore::new(config),
            history,
        };
        if let Err(e) = session.record_history() {
            log::warn!("Unable to record initial history snapshot: {}", e);
        }
        session
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.store = self.store.with_event_sink(sink);
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    pub fn history(&self) -> &UndoStack {
        &self.history
    }

    /// Run `edit` as one transaction. On success the changes are committed
    /// and a history snapshot is recorded; on failure they are rolled back.
    pub fn mutate<T, E, F>(&mut self, edit: F) -> Result<T>
    where
        E: Into<StrategyError>,
        F: FnOnce(&mut GraphTransaction<'_>) -> std::result::Result<T, E>,
    {
        let mut txn = self.store.begin_mutation();
        match edit(&mut txn) {
            Ok(value) => {
                txn.commit();
                self.record_history()?;
                Ok(value)
            }
            Err(e) => {
                txn.rollback();
                Err(e.into())
            }
        }
    }

    pub fn add_node(&mut self, role: NodeRole, position: impl Into<CanvasPosition>) -> Result<Node> {
        let position = position.into();
        self.mutate(|txn| Ok::<_, StrategyError>(txn.add_node(role, position)))
    }

    pub fn add_edge(&mut self, source: &str, target: &str, kind: EdgeKind) -> Result<Edge> {
        self.mutate(|txn| txn.add_edge(source, target, kind))
    }

    pub fn remove_node(&mut self, id: &str) -> Result<Vec<EdgeId>> {
        self.mutate(|txn| txn.remove_node(id))
    }

    pub fn remove_edge(&mut self, id: &str) -> Result<Edge> {
        self.mutate(|txn| txn.remove_edge(id))
    }

    pub fn update_node_data(&mut self, id: &str, patch: &Value) -> Result<bool> {
        self.mutate(|txn| txn.update_node_data(id, patch))
    }

    pub fn enable_re_entry(&mut self, exit_id: &str, config: ReEntryConfig) -> Result<ReEntryWiring> {
        self.mutate(|txn| txn.enable_re_entry(exit_id, config))
    }

    pub fn disable_re_entry(&mut self, exit_id: &str) -> Result<Option<NodeId>> {
        self.mutate(|txn| txn.disable_re_entry(exit_id))
    }

    /// Snapshot the current graph unless its id sets are unchanged
    pub fn record_history(&mut self) -> Result<bool> {
        self.history.push(self.store.graph())
    }

    /// Restore the previous snapshot. Returns `false` at the oldest entry.
    pub fn undo(&mut self) -> Result<bool> {
        match self.history.undo() {
            Some(graph) => {
                self.store.replace_graph(graph?);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Restore the next snapshot. Returns `false` at the newest entry.
    pub fn redo(&mut self) -> Result<bool> {
        match self.history.redo() {
            Some(graph) => {
                self.store.replace_graph(graph?);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn validate(&self) -> ValidationResult {
        self.store.validate()
    }

    /// Replace the session with the strategy in `json`.
    ///
    /// Parsing happens first; on any import error the current graph and
    /// history are left exactly as they were. On success the graph is
    /// cleared, the history reset, the imported nodes and edges set, and
    /// one history entry recorded, all before anyone can observe the store.
    pub fn import_strategy_from_event(&mut self, json: &str) -> Result<()> {
        let imported = import_from_str(json).map_err(|e| {
            log::warn!("Import failed: {}", e);
            e
        })?;

        let node_count = imported.graph.nodes.len();
        let edge_count = imported.graph.edges.len();

        let mut txn = self.store.begin_mutation();
        txn.clear();
        self.history.clear();
        txn.set_nodes(imported.graph.nodes);
        txn.set_edges(imported.graph.edges);
        txn.commit();
        self.history.push(self.store.graph())?;

        self.id = imported.id;
        self.name = imported.name.unwrap_or_else(|| UNTITLED.to_string());
        self.description = imported.description;
        self.created = imported.created;

        log::info!(
            "Imported strategy '{}' with {} nodes and {} edges",
            self.name,
            node_count,
            edge_count
        );
        Ok(())
    }

    /// Open a stored record
    pub fn open_record(&mut self, record: StrategyRecord) -> Result<()> {
        let graph = record.graph();
        self.store.replace_graph(graph);
        self.history.clear();
        self.history.push(self.store.graph())?;
        self.id = Some(record.id);
        self.name = record.name;
        self.description = record.description;
        self.created = Some(record.created);
        Ok(())
    }

    /// Export after validating. An invalid graph is refused with its report.
    pub fn export(&self) -> Result<StrategyRecord> {
        let report = self.validate();
        if !report.valid {
            log::warn!(
                "Refusing to export '{}': {} validation error(s)",
                self.name,
                report.errors.len()
            );
            return Err(StrategyError::Invalid(report));
        }
        Ok(self.export_unchecked())
    }

    /// Export without validating
    pub fn export_unchecked(&self) -> StrategyRecord {
        let mut record = export_strategy(self.store.nodes(), self.store.edges(), &self.name);
        if let Some(id) = &self.id {
            record.id = id.clone();
        }
        if let Some(created) = self.created {
            record.created = created;
        }
        record.description = self.description.clone();
        log::info!("Exported strategy '{}' ({})", record.name, record.id);
        record
    }

    /// Validate, export and persist. The session adopts the stored id.
    pub fn save<B: KeyValueBackend>(&mut self, repository: &StrategyRepository<B>) -> Result<StrategyRecord> {
        let record = self.export()?;
        let stored = repository.save(&record)?;
        self.id = Some(stored.id.clone());
        self.created = Some(stored.created);
        Ok(stored)
    }
}
