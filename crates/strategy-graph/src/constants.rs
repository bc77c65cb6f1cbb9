//! Engine-wide constants
//!
//! Single source of truth for limits and defaults used by the store,
//! validator, history and persistence layers.

/// Default limits
pub mod defaults {
    /// Maximum number of undo snapshots kept before the oldest is evicted
    pub const HISTORY_LIMIT: usize = 30;
    /// Soft cap on outgoing edges per node (warning only)
    pub const MAX_OUTGOING_EDGES: usize = 10;
    /// Maximum nesting depth of an expression tree
    pub const MAX_EXPRESSION_DEPTH: usize = 32;
    /// Collections longer than this are sampled before storage
    pub const SAMPLE_THRESHOLD: usize = 100;
    /// Elements kept verbatim at each end of a sampled collection
    pub const SAMPLE_EDGE: usize = 50;
    /// Stride used when sampling the middle of a collection
    pub const SAMPLE_STRIDE: usize = 5;
    /// Autosave flush interval in milliseconds
    pub const AUTOSAVE_INTERVAL_MS: u64 = 1000;
}

/// Property names stripped from values before they are persisted.
///
/// These are canvas bookkeeping fields that carry no strategy meaning.
pub const DENIED_PROPERTIES: &[&str] = &[
    "__rf",
    "internals",
    "measured",
    "dragging",
    "selected",
    "resizing",
    "positionAbsolute",
    "handleBounds",
    "_owner",
    "$$typeof",
];

/// Persisted key namespace
pub mod keys {
    /// Prefix of the key holding one full strategy record
    pub const STRATEGY_PREFIX: &str = "strategy_";
    /// Suffix of the key holding a strategy's first-created timestamp
    pub const CREATED_SUFFIX: &str = "_created";
    /// Key of the shared strategy metadata list
    pub const STRATEGY_LIST: &str = "strategies";
}

/// Fallback text when a condition tree cannot be rendered
pub const INVALID_CONDITION_TEXT: &str = "Invalid condition structure";
