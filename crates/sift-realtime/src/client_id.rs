//! Stable per-principal client identifiers.
//!
//! A client id survives reconnects and restarts so the server can correlate
//! a device across sessions. [`FileClientIdStore`] keeps the map in
//! `client_ids.json` and rewrites it atomically (temp file + rename).

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use sift_core::{ClientId, PrincipalId};
use tracing::{debug, info};

use crate::errors::ClientIdStoreError;

/// File name of the persisted map inside the state directory.
pub const CLIENT_ID_FILE: &str = "client_ids.json";

/// Persistence for principal → client id.
pub trait ClientIdStore: Send + Sync {
    /// Stored id for `principal`, if any.
    fn load(&self, principal: &PrincipalId) -> Result<Option<ClientId>, ClientIdStoreError>;

    /// Persist `client_id` for `principal`.
    fn save(&self, principal: &PrincipalId, client_id: &ClientId) -> Result<(), ClientIdStoreError>;

    /// Stored id, or a freshly generated and persisted one.
    fn get_or_create(&self, principal: &PrincipalId) -> Result<ClientId, ClientIdStoreError> {
        if let Some(id) = self.load(principal)? {
            return Ok(id);
        }
        let id = ClientId::new();
        self.save(principal, &id)?;
        info!(principal_id = %principal, client_id = %id, "generated client id");
        Ok(id)
    }
}

/// In-process store; ids last as long as the value.
#[derive(Debug, Default)]
pub struct MemoryClientIdStore {
    ids: Mutex<HashMap<PrincipalId, ClientId>>,
}

impl MemoryClientIdStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClientIdStore for MemoryClientIdStore {
    fn load(&self, principal: &PrincipalId) -> Result<Option<ClientId>, ClientIdStoreError> {
        Ok(self.ids.lock().get(principal).cloned())
    }

    fn save(&self, principal: &PrincipalId, client_id: &ClientId) -> Result<(), ClientIdStoreError> {
        let _ = self.ids.lock().insert(principal.clone(), client_id.clone());
        Ok(())
    }

    fn get_or_create(&self, principal: &PrincipalId) -> Result<ClientId, ClientIdStoreError> {
        Ok(self
            .ids
            .lock()
            .entry(principal.clone())
            .or_insert_with(|| {
                let id = ClientId::new();
                info!(principal_id = %principal, client_id = %id, "generated client id");
                id
            })
            .clone())
    }
}

/// JSON file store shared by every process of one user.
#[derive(Debug)]
pub struct FileClientIdStore {
    path: PathBuf,
    // Serializes read-modify-write (including get-or-create) within this
    // process.
    write_lock: Mutex<()>,
}

impl FileClientIdStore {
    /// Store `client_ids.json` inside `dir`.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(CLIENT_ID_FILE),
            write_lock: Mutex::new(()),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<BTreeMap<String, String>, ClientIdStoreError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn write_map(&self, map: &BTreeMap<String, String>) -> Result<(), ClientIdStoreError> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, map)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        let _ = tmp.persist(&self.path).map_err(|e| e.error)?;
        debug!(path = %self.path.display(), entries = map.len(), "client id map written");
        Ok(())
    }
}

impl ClientIdStore for FileClientIdStore {
    fn load(&self, principal: &PrincipalId) -> Result<Option<ClientId>, ClientIdStoreError> {
        Ok(self
            .read_map()?
            .get(principal.as_str())
            .map(|s| ClientId::from(s.as_str())))
    }

    fn save(&self, principal: &PrincipalId, client_id: &ClientId) -> Result<(), ClientIdStoreError> {
        let _guard = self.write_lock.lock();
        let mut map = self.read_map()?;
        let _ = map.insert(principal.to_string(), client_id.to_string());
        self.write_map(&map)
    }

    fn get_or_create(&self, principal: &PrincipalId) -> Result<ClientId, ClientIdStoreError> {
        let _guard = self.write_lock.lock();
        let mut map = self.read_map()?;
        if let Some(existing) = map.get(principal.as_str()) {
            return Ok(ClientId::from(existing.as_str()));
        }
        let id = ClientId::new();
        let _ = map.insert(principal.to_string(), id.to_string());
        self.write_map(&map)?;
        info!(principal_id = %principal, client_id = %id, "generated client id");
        Ok(id)
    }
}
