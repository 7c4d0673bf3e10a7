//! Key-value storage consumed by the persistence layer
//!
//! The orchestrator only needs `get`/`store` over scoped string values; the
//! host decides what actually backs them. Two reference backends are bundled:
//! [`MemoryStorage`] for tests and embedding, and [`FileStorage`] for a simple
//! on-disk setup with one JSON file per scope.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::warn;

use crate::error::{Error, Result};

/// Which store a key lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageScope {
    /// Scoped to the current workspace
    Workspace,
    /// Shared by every window of the application
    Application,
    /// Scoped to the user profile, shared across workspaces
    Profile,
}

/// Whether a value should roam with the user or stay on this machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceTarget {
    Machine,
    User,
}

/// The storage contract the orchestrator persists through
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Read a value, `None` when the key has never been written
    async fn get(&self, key: &str, scope: StorageScope) -> Result<Option<String>>;

    /// Write a full replacement value for a key
    async fn store(
        &self,
        key: &str,
        value: &str,
        scope: StorageScope,
        target: PersistenceTarget,
    ) -> Result<()>;
}

/// In-memory backend for tests and single-process embedding
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<(StorageScope, String), String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn get(&self, key: &str, scope: StorageScope) -> Result<Option<String>> {
        Ok(self.entries.lock().get(&(scope, key.to_string())).cloned())
    }

    async fn store(
        &self,
        key: &str,
        value: &str,
        scope: StorageScope,
        _target: PersistenceTarget,
    ) -> Result<()> {
        self.entries
            .lock()
            .insert((scope, key.to_string()), value.to_string());
        Ok(())
    }
}

/// File-backed storage: one JSON object per scope under a base directory.
///
/// Writes go to a temporary file in the same directory and are renamed into
/// place, so a crash mid-write never leaves a scope file half-written. The
/// machine/user persistence target is the host's concern and is not encoded
/// in the file layout.
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn scope_file(&self, scope: StorageScope) -> PathBuf {
        let name = match scope {
            StorageScope::Workspace => "workspace.json",
            StorageScope::Application => "application.json",
            StorageScope::Profile => "profile.json",
        };
        self.dir.join(name)
    }

    fn read_scope(&self, scope: StorageScope) -> Result<HashMap<String, String>> {
        let path = self.scope_file(scope);
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let raw = fs::read_to_string(&path)?;
        match serde_json::from_str(&raw) {
            Ok(table) => Ok(table),
            Err(err) => {
                warn!("Ignoring unreadable storage file {}: {}", path.display(), err);
                Ok(HashMap::new())
            }
        }
    }

    fn write_scope(&self, scope: StorageScope, table: &HashMap<String, String>) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.scope_file(scope);
        let tmp = path.with_extension("json.tmp");
        let raw = serde_json::to_string(table)?;
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &path)
            .map_err(|err| Error::Storage(format!("rename {}: {}", path.display(), err)))?;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FileStorage {
    async fn get(&self, key: &str, scope: StorageScope) -> Result<Option<String>> {
        Ok(self.read_scope(scope)?.remove(key))
    }

    async fn store(
        &self,
        key: &str,
        value: &str,
        scope: StorageScope,
        _target: PersistenceTarget,
    ) -> Result<()> {
        let mut table = self.read_scope(scope)?;
        table.insert(key.to_string(), value.to_string());
        self.write_scope(scope, &table)
    }
}
