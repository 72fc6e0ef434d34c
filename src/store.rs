//! The profile store: one in-memory reflection of the persisted
//! [`ClientProfile`] per context.
//!
//! Reads are lazy: the first [`ProfileStore::load`] reads storage and caches
//! the result. Every [`ProfileStore::set`] notifies the registered listeners
//! in registration order, and persistence is the first of those listeners.
//! When another context writes the profile key, the local cache is dropped
//! and the reload hook runs; incoming values are never merged.

use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;
use thiserror::Error;

use crate::config::PROFILE_STORE_KEY;
use crate::profile::{self, ClientProfile};
use crate::storage::{Storage, StorageError, StorageEvent};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to serialize profile: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("profile store lock poisoned")]
    Poisoned,
}

type Listener = dyn Fn(&ClientProfile) -> Result<(), StoreError> + Send + Sync;
type ReloadHook = dyn Fn() + Send + Sync;

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: Vec<(u64, Arc<Listener>)>,
}

/// Handle returned by [`ProfileStore::on_change`]; the listener stays
/// registered until the handle is dropped or unsubscribed.
#[must_use = "dropping a Subscription unregisters its listener"]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            if let Ok(mut registry) = registry.lock() {
                registry.listeners.retain(|(id, _)| *id != self.id);
            }
        }
    }
}

enum Persisted {
    Absent,
    Corrupt(serde_json::Error),
    Present(ClientProfile),
}

fn read_persisted(storage: &dyn Storage, key: &str) -> Persisted {
    let raw = match storage.get_item(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return Persisted::Absent,
        Err(err) => {
            tracing::warn!(key = %key, error = %err, "Failed to read stored profile");
            return Persisted::Absent;
        }
    };
    match ClientProfile::from_json(&raw) {
        Ok(profile) => Persisted::Present(profile::migrate(profile)),
        Err(err) => Persisted::Corrupt(err),
    }
}

/// Read the profile straight from storage, bypassing any cache.
///
/// For contexts that cannot reload themselves (the service worker) and so
/// must never hold a copy across events.
pub fn read_profile(storage: &dyn Storage, key: &str) -> Option<ClientProfile> {
    match read_persisted(storage, key) {
        Persisted::Present(profile) => Some(profile),
        Persisted::Corrupt(err) => {
            tracing::warn!(key = %key, error = %err, "Stored profile is not valid JSON for this format");
            None
        }
        Persisted::Absent => None,
    }
}

pub struct ProfileStore {
    key: String,
    storage: Arc<dyn Storage>,
    cached: Mutex<Option<ClientProfile>>,
    registry: Arc<Mutex<Registry>>,
    reload_hook: Option<Box<ReloadHook>>,
    _persistence: Subscription,
}

impl ProfileStore {
    pub fn new(storage: impl Storage + 'static) -> Self {
        Self::with_key(storage, PROFILE_STORE_KEY)
    }

    pub fn with_key(storage: impl Storage + 'static, key: impl Into<String>) -> Self {
        let key = key.into();
        let storage: Arc<dyn Storage> = Arc::new(storage);
        let registry = Arc::new(Mutex::new(Registry::default()));

        let persist_storage = Arc::clone(&storage);
        let persist_key = key.clone();
        let persistence = register(&registry, move |profile: &ClientProfile| {
            let raw = profile.to_json()?;
            persist_storage.set_item(&persist_key, &raw)?;
            tracing::debug!(key = %persist_key, "Persisted profile");
            Ok(())
        });

        Self {
            key,
            storage,
            cached: Mutex::new(None),
            registry,
            reload_hook: None,
            _persistence: persistence,
        }
    }

    /// Run `hook` whenever another context changes the stored profile.
    pub fn with_reload_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.reload_hook = Some(Box::new(hook));
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn load(&self) -> Result<ClientProfile, StoreError> {
        let mut cached = self.cached.lock().map_err(|_| StoreError::Poisoned)?;
        if let Some(profile) = cached.as_ref() {
            return Ok(profile.clone());
        }

        let profile = match read_persisted(self.storage.as_ref(), &self.key) {
            Persisted::Present(profile) => profile,
            Persisted::Absent => {
                tracing::info!("Returning default persistent data store values");
                ClientProfile::default()
            }
            Persisted::Corrupt(err) => {
                tracing::warn!(
                    key = %self.key,
                    error = %err,
                    "Stored profile could not be parsed, returning default values"
                );
                ClientProfile::default()
            }
        };
        *cached = Some(profile.clone());
        Ok(profile)
    }

    /// Replace the profile and notify every listener, persistence included.
    ///
    /// All listeners run even when one fails; the first failure is returned.
    pub fn set(&self, profile: ClientProfile) -> Result<(), StoreError> {
        {
            let mut cached = self.cached.lock().map_err(|_| StoreError::Poisoned)?;
            *cached = Some(profile.clone());
        }

        let listeners: Vec<Arc<Listener>> = {
            let registry = self.registry.lock().map_err(|_| StoreError::Poisoned)?;
            registry
                .listeners
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect()
        };

        let mut first_error = None;
        for listener in listeners {
            if let Err(err) = listener(&profile) {
                tracing::warn!(error = %err, "Profile listener failed");
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn update<F>(&self, mutate: F) -> Result<ClientProfile, StoreError>
    where
        F: FnOnce(&mut ClientProfile),
    {
        let mut profile = self.load()?;
        mutate(&mut profile);
        self.set(profile.clone())?;
        Ok(profile)
    }

    pub fn on_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ClientProfile) -> Result<(), StoreError> + Send + Sync + 'static,
    {
        register(&self.registry, listener)
    }

    /// Drop the cached profile so the next [`load`](Self::load) reads storage.
    pub fn invalidate(&self) {
        if let Ok(mut cached) = self.cached.lock() {
            *cached = None;
        }
    }

    /// React to a change made by another context. Returns whether the event
    /// concerned the profile key.
    pub fn handle_storage_event(&self, event: &StorageEvent) -> bool {
        if event.key != self.key {
            return false;
        }

        tracing::info!(
            key = %event.key,
            observed_at = %event.observed_at,
            "Profile changed in another context, discarding local state"
        );
        self.invalidate();
        if let Some(hook) = &self.reload_hook {
            hook();
        }
        true
    }

    /// Handle every event already queued, without blocking. Returns how many
    /// of them concerned the profile key.
    pub fn process_pending(&self, events: &Receiver<StorageEvent>) -> usize {
        events
            .try_iter()
            .filter(|event| self.handle_storage_event(event))
            .count()
    }
}

fn register<F>(registry: &Arc<Mutex<Registry>>, listener: F) -> Subscription
where
    F: Fn(&ClientProfile) -> Result<(), StoreError> + Send + Sync + 'static,
{
    let id = match registry.lock() {
        Ok(mut registry) => {
            let id = registry.next_id;
            registry.next_id += 1;
            registry.listeners.push((id, Arc::new(listener)));
            id
        }
        Err(_) => {
            tracing::warn!("Profile listener registry poisoned, listener not registered");
            u64::MAX
        }
    };
    Subscription {
        id,
        registry: Arc::downgrade(registry),
    }
}

/// Apply external changes on a background thread. The worker holds the store
/// weakly and exits once the store is dropped and its event stream closes.
pub fn spawn_sync_worker(store: &Arc<ProfileStore>, events: Receiver<StorageEvent>) -> JoinHandle<()> {
    let store = Arc::downgrade(store);
    std::thread::spawn(move || {
        while let Ok(event) = events.recv() {
            let Some(store) = store.upgrade() else {
                break;
            };
            store.handle_storage_event(&event);
        }
        tracing::debug!("Storage event stream closed");
    })
}
