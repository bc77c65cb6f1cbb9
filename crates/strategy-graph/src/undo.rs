//! Undo/redo history using compressed snapshots
//!
//! Each entry is a zstd-compressed JSON copy of the whole graph, so a
//! restored graph never shares state with the live one. An entry is only
//! appended when the sorted node/edge id sets differ from the current one,
//! and the oldest entries are evicted past the configured limit.

use std::collections::VecDeque;

use crate::constants::defaults;
use crate::error::{Result, StrategyError};
use crate::types::{EdgeId, NodeId, StrategyGraph};

/// zstd level used for snapshots
const COMPRESSION_LEVEL: i32 = 3;

struct Snapshot {
    compressed: Vec<u8>,
    signature: (Vec<NodeId>, Vec<EdgeId>),
}

/// Undo/redo stack of compressed snapshots
pub struct UndoStack {
    snapshots: VecDeque<Snapshot>,
    /// Current position in the stack
    current: usize,
    /// Maximum number of snapshots to keep
    max_snapshots: usize,
}

impl UndoStack {
    /// Create a new undo stack with the specified maximum size
    pub fn new(max_snapshots: usize) -> Self {
        Self {
            snapshots: VecDeque::new(),
            current: 0,
            max_snapshots: max_snapshots.max(1),
        }
    }

    /// Record `graph` after the current position.
    ///
    /// Returns `false` without recording when the graph has the same id
    /// sets as the current snapshot. Any redo history is discarded.
    pub fn push(&mut self, graph: &StrategyGraph) -> Result<bool> {
        let signature = graph.id_signature();
        if self
            .snapshots
            .get(self.current)
            .is_some_and(|s| s.signature == signature)
        {
            log::debug!("Skipping history snapshot: node/edge ids unchanged");
            return Ok(false);
        }

        let json = serde_json::to_vec(graph)?;
        let compressed = zstd::encode_all(&json[..], COMPRESSION_LEVEL)
            .map_err(|e| StrategyError::Compression(e.to_string()))?;

        // Truncate any redo history
        self.snapshots.truncate(self.current + 1);

        self.snapshots.push_back(Snapshot {
            compressed,
            signature,
        });
        self.current = self.snapshots.len() - 1;

        while self.snapshots.len() > self.max_snapshots {
            self.snapshots.pop_front();
            self.current = self.current.saturating_sub(1);
            log::debug!("Evicted oldest history snapshot");
        }

        log::debug!(
            "Recorded history snapshot {}/{}",
            self.current + 1,
            self.snapshots.len()
        );
        Ok(true)
    }

    /// Move back one snapshot
    ///
    /// Returns the previous graph state, or None if at the beginning.
    pub fn undo(&mut self) -> Option<Result<StrategyGraph>> {
        if self.can_undo() {
            self.current -= 1;
            Some(self.decompress(self.current))
        } else {
            None
        }
    }

    /// Move forward one snapshot
    ///
    /// Returns the next graph state, or None if at the end.
    pub fn redo(&mut self) -> Option<Result<StrategyGraph>> {
        if self.can_redo() {
            self.current += 1;
            Some(self.decompress(self.current))
        } else {
            None
        }
    }

    /// Get the current graph state without moving
    pub fn current(&self) -> Option<Result<StrategyGraph>> {
        if self.snapshots.is_empty() {
            None
        } else {
            Some(self.decompress(self.current))
        }
    }

    pub fn can_undo(&self) -> bool {
        self.current > 0
    }

    pub fn can_redo(&self) -> bool {
        self.current + 1 < self.snapshots.len()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
        self.current = 0;
    }

    /// Total compressed size of all snapshots
    pub fn compressed_size(&self) -> usize {
        self.snapshots.iter().map(|s| s.compressed.len()).sum()
    }

    fn decompress(&self, index: usize) -> Result<StrategyGraph> {
        let snapshot = self
            .snapshots
            .get(index)
            .ok_or_else(|| StrategyError::Compression(format!("no snapshot at {}", index)))?;
        let json = zstd::decode_all(&snapshot.compressed[..])
            .map_err(|e| StrategyError::Compression(e.to_string()))?;
        Ok(serde_json::from_slice(&json)?)
    }
}

impl Default for UndoStack {
    fn default() -> Self {
        Self::new(defaults::HISTORY_LIMIT)
    }
}
