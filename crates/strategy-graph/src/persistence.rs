//! Key-value persistence of strategy records
//!
//! Key namespace, per strategy id `X`:
//! - `strategy_X` holds the full record of `X` and nothing else
//! - `strategy_X_created` holds the first-created timestamp of `X`
//! - `strategies` holds the metadata list of every saved strategy
//!
//! A record is only ever written under the key derived from its own id,
//! and a load verifies that the stored record carries the id it was
//! requested by.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::config::EngineConfig;
use crate::constants::keys;
use crate::error::PersistenceError;
use crate::serialization::{sanitize_for_storage, StrategyMetadata, StrategyRecord};

type Result<T> = std::result::Result<T, PersistenceError>;

/// String key-value storage collaborator
pub trait KeyValueBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
    fn keys(&self) -> Result<Vec<String>>;
}

/// In-memory backend
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KeyValueBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries().keys().cloned().collect())
    }
}

/// One `<key>.json` file per key in a directory.
///
/// The directory is created on first write.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let safe = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !safe {
            return Err(PersistenceError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("key '{}' is not a valid file name", key),
            )));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl KeyValueBackend for FileBackend {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(std::fs::read_to_string(path)?))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(&path, value)?;
        log::debug!("Wrote {:?}", path);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        if path.exists() {
            std::fs::remove_file(&path)?;
            log::debug!("Deleted {:?}", path);
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    keys.push(stem.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Strategy records over a key-value backend
pub struct StrategyRepository<B> {
    backend: B,
    config: EngineConfig,
}

impl<B: KeyValueBackend> StrategyRepository<B> {
    pub fn new(backend: B, config: EngineConfig) -> Self {
        Self { backend, config }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn record_key(id: &str) -> String {
        format!("{}{}", keys::STRATEGY_PREFIX, id)
    }

    pub fn created_key(id: &str) -> String {
        format!("{}{}{}", keys::STRATEGY_PREFIX, id, keys::CREATED_SUFFIX)
    }

    fn check_id(id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(PersistenceError::InvalidId {
                id: id.to_string(),
                reason: "id is empty",
            });
        }
        // `X_created` would alias the created-timestamp key of `X`
        if id.ends_with(keys::CREATED_SUFFIX) {
            return Err(PersistenceError::InvalidId {
                id: id.to_string(),
                reason: "id collides with the created-timestamp key namespace",
            });
        }
        Ok(())
    }

    /// Persist a record. The first-created timestamp is written once and
    /// wins over the record's own `created`; `lastModified` is set to now.
    /// Returns the record as stored.
    pub fn save(&self, record: &StrategyRecord) -> Result<StrategyRecord> {
        Self::check_id(&record.id)?;

        let mut stored = record.clone();
        stored.touch();
        let first_save = match self.created_at(&record.id)? {
            Some(created) => {
                stored.created = created;
                false
            }
            None => true,
        };

        // A created key only exists alongside a stored record
        let value = self.sanitize_record(&stored)?;
        self.backend
            .set(&Self::record_key(&stored.id), &serde_json::to_string(&value)?)?;
        if first_save {
            self.backend.set(
                &Self::created_key(&stored.id),
                &serde_json::to_string(&stored.created)?,
            )?;
        }

        let mut list = self.list()?;
        list.retain(|m| m.id != stored.id);
        list.push(stored.metadata());
        self.write_list(list)?;

        log::info!("Saved strategy '{}' ({})", stored.name, stored.id);
        Ok(stored)
    }

    /// Load the record stored for `id`
    pub fn load(&self, id: &str) -> Result<Option<StrategyRecord>> {
        let key = Self::record_key(id);
        let Some(raw) = self.backend.get(&key)? else {
            return Ok(None);
        };
        let record: StrategyRecord = serde_json::from_str(&raw)?;
        if record.id != id {
            log::warn!("Key '{}' holds strategy '{}'", key, record.id);
            return Err(PersistenceError::KeyMismatch {
                key,
                expected: id.to_string(),
                found: record.id,
            });
        }
        log::info!("Loaded strategy '{}' ({})", record.name, record.id);
        Ok(Some(record))
    }

    /// Remove a strategy and its list entry. Returns whether it existed.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let existed = self.backend.get(&Self::record_key(id))?.is_some();
        self.backend.remove(&Self::record_key(id))?;
        self.backend.remove(&Self::created_key(id))?;

        let mut list = self.list()?;
        let before = list.len();
        list.retain(|m| m.id != id);
        if list.len() != before {
            self.write_list(list)?;
        }
        if existed {
            log::info!("Deleted strategy '{}'", id);
        }
        Ok(existed)
    }

    /// Metadata of every saved strategy, most recently modified first
    pub fn list(&self) -> Result<Vec<StrategyMetadata>> {
        match self.backend.get(keys::STRATEGY_LIST)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    pub fn created_at(&self, id: &str) -> Result<Option<DateTime<Utc>>> {
        match self.backend.get(&Self::created_key(id))? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn write_list(&self, mut list: Vec<StrategyMetadata>) -> Result<()> {
        list.sort_by(|a, b| {
            b.last_modified
                .cmp(&a.last_modified)
                .then_with(|| a.id.cmp(&b.id))
        });
        self.backend
            .set(keys::STRATEGY_LIST, &serde_json::to_string(&list)?)
    }

    /// Sanitize node and edge entries one by one so every entry is
    /// stripped, not just a sample.
    fn sanitize_record(&self, record: &StrategyRecord) -> Result<Value> {
        let mut value = serde_json::to_value(record)?;
        for field in ["nodes", "edges"] {
            if let Some(Value::Array(items)) = value.get_mut(field) {
                for item in items.iter_mut() {
                    *item = sanitize_for_storage(item, &self.config);
                }
            }
        }
        Ok(value)
    }
}
