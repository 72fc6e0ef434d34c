//! Key/value storage the profile is persisted in.
//!
//! A [`StorageArea`] is shared by every execution context of one client
//! installation. Each context writes through its own [`StorageContext`] and
//! receives a [`StorageEvent`] whenever *another* context changes a key; the
//! writer itself is never notified of its own writes.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid storage key: {0:?}")]
    InvalidKey(String),
    #[error("storage I/O failed for key {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },
    #[error("storage lock poisoned")]
    Poisoned,
}

pub trait Storage: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}

impl<S: Storage + ?Sized> Storage for Arc<S> {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        (**self).get_item(key)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        (**self).set_item(key, value)
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        (**self).remove_item(key)
    }
}

/// Storage backed by a directory, one file per key.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let invalid = key.is_empty()
            || key == "."
            || key == ".."
            || key.starts_with('.')
            || key.contains(['/', '\\', '\0']);
        if invalid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(key))
    }
}

impl Storage for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StorageError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let io_err = |source| StorageError::Io {
            key: key.to_string(),
            source,
        };

        fs::create_dir_all(&self.dir).map_err(io_err)?;

        // Each write stages into its own file so concurrent writers never
        // rename each other's data; readers only ever see whole records.
        let mut staged = NamedTempFile::new_in(&self.dir).map_err(io_err)?;
        staged.write_all(value.as_bytes()).map_err(io_err)?;
        staged.persist(&path).map_err(|err| io_err(err.error))?;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let items = self.items.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut items = self.items.lock().map_err(|_| StorageError::Poisoned)?;
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let mut items = self.items.lock().map_err(|_| StorageError::Poisoned)?;
        items.remove(key);
        Ok(())
    }
}

/// Notification that a key was changed by some other context.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageEvent {
    pub key: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub observed_at: DateTime<Utc>,
}

impl StorageEvent {
    pub fn new(key: impl Into<String>, old_value: Option<String>, new_value: Option<String>) -> Self {
        Self {
            key: key.into(),
            old_value,
            new_value,
            observed_at: Utc::now(),
        }
    }
}

struct AreaInner {
    backend: Box<dyn Storage>,
    peers: Mutex<Vec<(u64, Sender<StorageEvent>)>>,
    next_id: AtomicU64,
}

impl AreaInner {
    fn broadcast(&self, origin: u64, event: StorageEvent) {
        let Ok(mut peers) = self.peers.lock() else {
            tracing::warn!(key = %event.key, "Storage peers lock poisoned, change not broadcast");
            return;
        };
        peers.retain(|(id, tx)| *id == origin || tx.send(event.clone()).is_ok());
    }
}

/// Storage shared by all contexts of one installation.
#[derive(Clone)]
pub struct StorageArea {
    inner: Arc<AreaInner>,
}

impl StorageArea {
    pub fn new(backend: impl Storage + 'static) -> Self {
        Self {
            inner: Arc::new(AreaInner {
                backend: Box::new(backend),
                peers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Open a new context on this area, together with the stream of changes
    /// made by other contexts.
    pub fn attach(&self) -> (StorageContext, Receiver<StorageEvent>) {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel();
        match self.inner.peers.lock() {
            Ok(mut peers) => peers.push((id, tx)),
            Err(_) => tracing::warn!(context = id, "Storage peers lock poisoned, context detached"),
        }
        let context = StorageContext {
            id,
            inner: Arc::clone(&self.inner),
        };
        (context, rx)
    }
}

pub struct StorageContext {
    id: u64,
    inner: Arc<AreaInner>,
}

impl Storage for StorageContext {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.inner.backend.get_item(key)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let old_value = self.inner.backend.get_item(key)?;
        self.inner.backend.set_item(key, value)?;
        if old_value.as_deref() != Some(value) {
            let event = StorageEvent::new(key, old_value, Some(value.to_string()));
            self.inner.broadcast(self.id, event);
        }
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let old_value = self.inner.backend.get_item(key)?;
        self.inner.backend.remove_item(key)?;
        if old_value.is_some() {
            self.inner
                .broadcast(self.id, StorageEvent::new(key, old_value, None));
        }
        Ok(())
    }
}

impl Drop for StorageContext {
    fn drop(&mut self) {
        if let Ok(mut peers) = self.inner.peers.lock() {
            peers.retain(|(id, _)| *id != self.id);
        }
    }
}
