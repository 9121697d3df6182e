//! Persisted client session cache.
//!
//! The subscriber's identity survives restarts through a small key/value
//! store. [`stored_user_id`] rehydrates it at startup.

use std::path::{Path, PathBuf};

use livefolio_core::UserId;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::ClientError;

/// Key under which the signed-in user id is stored.
pub const USER_ID_KEY: &str = "userId";

/// Key/value session persistence.
pub trait SessionStore: Send + Sync {
    /// Read a value.
    fn get(&self, key: &str) -> Result<Option<Value>, ClientError>;
    /// Write a value.
    fn set(&self, key: &str, value: Value) -> Result<(), ClientError>;
    /// Remove every value.
    fn clear(&self) -> Result<(), ClientError>;
}

/// The stored user id, if present and well-formed.
pub fn stored_user_id(store: &dyn SessionStore) -> Result<Option<UserId>, ClientError> {
    let Some(value) = store.get(USER_ID_KEY)? else {
        return Ok(None);
    };
    match serde_json::from_value::<UserId>(value) {
        Ok(id) => Ok(Some(id)),
        Err(e) => {
            warn!(error = %e, "ignoring malformed stored user id");
            Ok(None)
        }
    }
}

/// Persist `user_id` as the signed-in user.
pub fn store_user_id(store: &dyn SessionStore, user_id: UserId) -> Result<(), ClientError> {
    store.set(USER_ID_KEY, serde_json::to_value(user_id)?)
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    values: Mutex<Map<String, Value>>,
}

impl MemorySessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, key: &str) -> Result<Option<Value>, ClientError> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), ClientError> {
        let _ = self.values.lock().insert(key.to_owned(), value);
        Ok(())
    }

    fn clear(&self) -> Result<(), ClientError> {
        self.values.lock().clear();
        Ok(())
    }
}

/// Store backed by one JSON object file.
#[derive(Debug)]
pub struct FileSessionStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileSessionStore {
    /// Store at `path`. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Map<String, Value>, ClientError> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str(&content)? {
            Value::Object(map) => Ok(map),
            _ => {
                warn!(path = ?self.path, "session file is not a JSON object, treating as empty");
                Ok(Map::new())
            }
        }
    }

    fn write_all(&self, map: Map<String, Value>) -> Result<(), ClientError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&Value::Object(map))?)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = ?self.path, "session saved");
        Ok(())
    }
}

impl SessionStore for FileSessionStore {
    fn get(&self, key: &str) -> Result<Option<Value>, ClientError> {
        let _guard = self.lock.lock();
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: Value) -> Result<(), ClientError> {
        let _guard = self.lock.lock();
        let mut map = self.read_all()?;
        let _ = map.insert(key.to_owned(), value);
        self.write_all(map)
    }

    fn clear(&self) -> Result<(), ClientError> {
        let _guard = self.lock.lock();
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
