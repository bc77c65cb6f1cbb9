//! Strategy Graph - visual trading strategy graphs
//!
//! This crate models a trading strategy as a directed graph of typed nodes
//! (start, signals, order actions, retry, terminals). It supports:
//!
//! - A closed set of node roles with typed per-role payloads
//! - Recursive condition and expression trees with structural sharing
//! - Rule-checked edge creation and whole-graph validation
//! - Transactional mutation with compressed snapshot-based undo/redo
//! - Lenient import, sanitized persistence and batched autosave
//!
//! # Architecture
//!
//! - `GraphStore`: owns the graph; all edits run in a `GraphTransaction`
//! - `can_connect`: per-edge connection rules, checked on every new edge
//! - `Validator`: deterministic whole-graph diagnostics
//! - `StrategySession`: store plus history plus strategy identity
//! - `StrategyRepository`: strategy records over a `KeyValueBackend`
//!
//! # Example
//!
//! ```ignore
//! use strategy_graph::{EdgeKind, NodeRole, StrategySession};
//!
//! let mut session = StrategySession::default();
//! let start = session.add_node(NodeRole::Start, (0.0, 0.0))?;
//! let end = session.add_node(NodeRole::End, (200.0, 0.0))?;
//! session.add_edge(&start.id, &end.id, EdgeKind::Default)?;
//! let report = session.validate();
//! ```

pub mod autosave;
pub mod builder;
pub mod condition;
pub mod config;
pub mod connection;
pub mod constants;
pub mod error;
pub mod events;
pub mod expression;
pub mod node_data;
pub mod persistence;
pub mod serialization;
pub mod session;
pub mod store;
pub mod types;
pub mod undo;
pub mod validation;

// Re-export key types
pub use autosave::{spawn_autosave, AutosaveHandle};
pub use builder::StrategyBuilder;
pub use condition::{ComparisonOperator, Condition, ConditionItem, GroupCondition, GroupLogic};
pub use config::EngineConfig;
pub use connection::{can_connect, ConnectionVerdict};
pub use error::{
    AstError, ConnectionError, ExportError, ImportError, PersistenceError, Result, StoreError,
    StrategyError,
};
pub use events::{EventSink, GraphEvent, NullEventSink, VecEventSink};
pub use expression::Expression;
pub use node_data::{NodeData, ReEntryConfig};
pub use persistence::{FileBackend, KeyValueBackend, MemoryBackend, StrategyRepository};
pub use serialization::{export_strategy, import_strategy, StrategyMetadata, StrategyRecord};
pub use session::StrategySession;
pub use store::{GraphStore, GraphTransaction, ReEntryWiring};
pub use types::{CanvasPosition, Edge, EdgeKind, Node, NodeRole, StrategyGraph};
pub use undo::UndoStack;
pub use validation::{validate, Diagnostic, DiagnosticKind, ValidationResult, Validator};
