//! Detects writes made by other processes to file-backed storage.
//!
//! In-process contexts get their [`StorageEvent`]s from the shared
//! [`StorageArea`](crate::storage::StorageArea). A second process writing the
//! same storage directory is invisible to it, so the CLI polls the key and
//! turns every observed change into the same kind of event.

use std::time::Duration;

use crate::profile::ClientProfile;
use crate::storage::{Storage, StorageError, StorageEvent};
use crate::store::{ProfileStore, StoreError};

pub struct StoragePoller<S> {
    storage: S,
    key: String,
    last_seen: Option<String>,
}

impl<S: Storage> StoragePoller<S> {
    /// Start polling `key`; its current value is the baseline and does not
    /// count as a change.
    pub fn new(storage: S, key: impl Into<String>) -> Result<Self, StorageError> {
        let key = key.into();
        let last_seen = storage.get_item(&key)?;
        Ok(Self {
            storage,
            key,
            last_seen,
        })
    }

    pub fn poll(&mut self) -> Option<StorageEvent> {
        let current = match self.storage.get_item(&self.key) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(key = %self.key, error = %err, "Failed to poll storage");
                return None;
            }
        };
        if current == self.last_seen {
            return None;
        }
        let old_value = std::mem::replace(&mut self.last_seen, current.clone());
        Some(StorageEvent::new(self.key.clone(), old_value, current))
    }
}

/// Poll until ctrl-c, reloading `store` and reporting the fresh profile on
/// every external change.
pub async fn watch_profile<S, F>(
    store: &ProfileStore,
    mut poller: StoragePoller<S>,
    interval: Duration,
    mut on_change: F,
) -> Result<(), StoreError>
where
    S: Storage,
    F: FnMut(&ClientProfile),
{
    let mut ticker = tokio::time::interval(interval);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Some(event) = poller.poll() {
                    if store.handle_storage_event(&event) {
                        on_change(&store.load()?);
                    }
                }
            }
            _ = &mut shutdown => {
                tracing::info!("Stopping profile watch");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PROFILE_STORE_KEY;
    use crate::storage::FileStorage;

    #[test]
    fn baseline_is_not_a_change() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(temp_dir.path());
        storage.set_item(PROFILE_STORE_KEY, "{}").unwrap();

        let mut poller = StoragePoller::new(storage, PROFILE_STORE_KEY).unwrap();

        assert!(poller.poll().is_none());
    }

    #[test]
    fn reports_each_change_once() {
        let temp_dir = tempfile::tempdir().unwrap();
        let writer = FileStorage::new(temp_dir.path());
        let mut poller = StoragePoller::new(FileStorage::new(temp_dir.path()), PROFILE_STORE_KEY).unwrap();

        writer.set_item(PROFILE_STORE_KEY, "first").unwrap();
        let event = poller.poll().unwrap();
        assert_eq!(event.key, PROFILE_STORE_KEY);
        assert_eq!(event.old_value, None);
        assert_eq!(event.new_value.as_deref(), Some("first"));
        assert!(poller.poll().is_none());

        writer.remove_item(PROFILE_STORE_KEY).unwrap();
        let event = poller.poll().unwrap();
        assert_eq!(event.old_value.as_deref(), Some("first"));
        assert_eq!(event.new_value, None);
    }

    #[test]
    fn unreadable_baseline_is_an_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(temp_dir.path());
        std::fs::create_dir(temp_dir.path().join(PROFILE_STORE_KEY)).unwrap();

        let result = StoragePoller::new(storage, PROFILE_STORE_KEY);

        assert!(matches!(result, Err(StorageError::Io { .. })));
    }

    #[test]
    fn polled_change_reloads_store() {
        let temp_dir = tempfile::tempdir().unwrap();
        let other_process = ProfileStore::new(FileStorage::new(temp_dir.path()));
        let this_process = ProfileStore::new(FileStorage::new(temp_dir.path()));
        let mut poller = StoragePoller::new(FileStorage::new(temp_dir.path()), PROFILE_STORE_KEY).unwrap();
        this_process.load().unwrap();

        other_process
            .update(|profile| profile.stats.sent_pings_count = 5)
            .unwrap();
        let event = poller.poll().unwrap();

        assert!(this_process.handle_storage_event(&event));
        assert_eq!(this_process.load().unwrap().stats.sent_pings_count, 5);
    }
}
