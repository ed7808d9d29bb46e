//! Key-value persistence for the last launched target.

use std::{
    collections::BTreeMap,
    fs,
    io::ErrorKind as IoErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{
    descriptor::{PersistedTarget, TargetDescriptor},
    error::{Error, Result},
};

/// Key holding the JSON-encoded descriptor, or [`CLEARED`].
pub const PERSISTED_KEY: &str = "PERSISTED";
/// Key holding the port as a decimal string.
pub const PERSISTED_PORT_KEY: &str = "PERSISTEDPORT";
/// Falsy sentinel written when nothing is persisted.
pub const CLEARED: &str = "false";

/// A string key-value store.
pub trait KeyValueStore: Send + Sync {
    /// Read a value.
    fn get(&self, key: &str) -> Result<Option<String>>;
    /// Write a value.
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// In-memory store, used by tests and when persistence is disabled.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    /// Stored values.
    values: Arc<Mutex<BTreeMap<String, String>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Store backed by a JSON object on disk.
///
/// Every write rewrites the whole file through a temporary sibling and a rename.
#[derive(Debug)]
pub struct FileStore {
    /// Location of the JSON file.
    path: PathBuf,
    /// Serializes read-modify-write cycles.
    lock: Mutex<()>,
}

impl FileStore {
    /// Use the file at `path`; it is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole map; a missing file is an empty map.
    fn read_all(&self) -> Result<BTreeMap<String, String>> {
        match fs::read_to_string(&self.path) {
            Ok(s) if s.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(s) => Ok(serde_json::from_str(&s)?),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(Error::Store(format!("{}: {e}", self.path.display()))),
        }
    }

    /// Replace the file contents with `map`.
    fn write_all(&self, map: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(map)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock();
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.lock();
        let mut map = self.read_all()?;
        map.insert(key.to_string(), value.to_string());
        self.write_all(&map)
    }
}

/// Typed access to the persisted target keys of a [`KeyValueStore`].
#[derive(Clone)]
pub struct PersistedTargets {
    /// Backing store.
    store: Arc<dyn KeyValueStore>,
}

impl PersistedTargets {
    /// Wrap a store.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// The stored target, if any. Invalid records read as absent.
    pub fn load(&self, default_port: u16) -> Result<Option<PersistedTarget>> {
        let Some(raw) = self.store.get(PERSISTED_KEY)? else {
            return Ok(None);
        };
        if is_falsy(&raw) {
            return Ok(None);
        }
        let descriptor: TargetDescriptor = match serde_json::from_str(&raw) {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "ignoring unreadable persisted target");
                return Ok(None);
            }
        };
        let port = self
            .store
            .get(PERSISTED_PORT_KEY)?
            .and_then(|p| p.trim().parse::<u16>().ok())
            .unwrap_or(default_port);
        Ok(Some(PersistedTarget { descriptor, port }))
    }

    /// Remember `target` for the next launch.
    pub fn save(&self, target: &PersistedTarget) -> Result<()> {
        let json = serde_json::to_string(&target.descriptor)?;
        self.store.set(PERSISTED_KEY, &json)?;
        self.store.set(PERSISTED_PORT_KEY, &target.port.to_string())?;
        debug!(descriptor = %target.descriptor, port = target.port, "persisted_target_saved");
        Ok(())
    }

    /// Forget the stored target and reset the stored port to `default_port`.
    pub fn clear(&self, default_port: u16) -> Result<()> {
        self.store.set(PERSISTED_KEY, CLEARED)?;
        self.store
            .set(PERSISTED_PORT_KEY, &default_port.to_string())?;
        debug!("persisted_target_cleared");
        Ok(())
    }
}

/// Values the store treats as "nothing persisted".
fn is_falsy(raw: &str) -> bool {
    matches!(raw.trim(), "" | "false" | "null" | "0" | "undefined")
}
