//! Error types for the strategy graph engine

use thiserror::Error;

use crate::types::{EdgeId, NodeId, NodeRole};

/// Result type alias using StrategyError
pub type Result<T> = std::result::Result<T, StrategyError>;

/// Top-level error for the engine
#[derive(Debug, Error)]
pub enum StrategyError {
    /// A proposed edge was rejected
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// A store mutation referenced something that does not exist
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A condition tree edit failed
    #[error(transparent)]
    Ast(#[from] AstError),

    /// Import failed; the prior graph is untouched
    #[error(transparent)]
    Import(#[from] ImportError),

    /// Export failed
    #[error(transparent)]
    Export(#[from] ExportError),

    /// Persistence backend failure
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// The graph failed validation and cannot be exported or run
    #[error("Strategy has {} validation error(s)", .0.errors.len())]
    Invalid(crate::validation::ValidationResult),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Compression error
    #[error("Compression error: {0}")]
    Compression(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasons the connection rule engine refuses an edge.
///
/// Variants are listed in rule precedence order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("Node '{0}' does not exist")]
    NodeNotFound(NodeId),

    #[error("Terminal node '{0}' cannot have outgoing connections")]
    TerminalHasNoOutputs(NodeId),

    #[error("Start node '{0}' cannot have incoming connections")]
    StartHasNoInputs(NodeId),

    #[error("Node '{0}' cannot connect to itself")]
    SelfLoop(NodeId),

    #[error("Nodes '{from}' and '{to}' are already connected")]
    DuplicateEdge { from: NodeId, to: NodeId },

    #[error("Connecting '{from}' to '{to}' would create a cycle")]
    WouldCreateCycle { from: NodeId, to: NodeId },

    #[error("Order nodes '{from}' and '{to}' cannot be linked directly")]
    OrderNodesCannotLink { from: NodeId, to: NodeId },

    #[error("Order node '{target}' cannot be triggered by a {source_role} node")]
    InvalidActionSource { target: NodeId, source_role: NodeRole },

    #[error("Order node '{0}' is already triggered by a signal")]
    ActionAlreadyTriggered(NodeId),
}

/// Store mutation referenced a missing id or carried unusable data
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Edge not found: {0}")]
    EdgeNotFound(EdgeId),

    #[error("Node '{node_id}' is a {role} node, expected {expected}")]
    WrongRole {
        node_id: NodeId,
        role: NodeRole,
        expected: &'static str,
    },

    #[error("Patch for node '{node_id}' is invalid: {reason}")]
    InvalidPatch { node_id: NodeId, reason: String },
}

/// Condition tree edit failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AstError {
    #[error("Condition not found: {0}")]
    ConditionNotFound(String),

    #[error("Group not found: {0}")]
    GroupNotFound(String),

    #[error("Expression path does not exist at step {0}")]
    InvalidPath(usize),

    #[error("Expression depth {depth} exceeds maximum of {max}")]
    DepthExceeded { depth: usize, max: usize },

    #[error("Offset {0} looks ahead; offsets must be zero or negative")]
    PositiveOffset(i32),
}

/// Import failures. The caller's graph is never modified when these occur.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Unable to read strategy file: {0}")]
    Unreadable(#[from] std::io::Error),

    #[error("Strategy file is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Strategy file must be a JSON object")]
    NotAnObject,

    #[error("Strategy file has no '{0}' array")]
    MissingArray(&'static str),

    #[error("Edge at index {index} has no {endpoint}")]
    MalformedEdge { index: usize, endpoint: &'static str },
}

/// Export failures
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Unable to write strategy: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unable to encode strategy: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Failures of the key-value persistence collaborator
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stored value is not valid JSON: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Key '{key}' holds strategy '{found}' instead of '{expected}'")]
    KeyMismatch {
        key: String,
        expected: String,
        found: String,
    },

    #[error("Strategy id '{id}' cannot be stored: {reason}")]
    InvalidId { id: String, reason: &'static str },
}
