//! The trusted-device registry.
//!
//! Device credentials and device records live in two maps behind a single
//! lock: the one-to-one relation between them cannot be checked or changed
//! safely under separate locks. Each mutation writes a full snapshot through
//! [`PersistenceStore`] while the lock is still held, so saves land in the
//! order the mutations happened.
//!
//! The on-disk document may be edited by another process (the `devices` CLI
//! commands), so the capacity check always reloads first and credential
//! validation reloads whenever the document changed since we last touched it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::error::CredentialError;
use crate::pairing::device::{DeviceCredential, DeviceRecord};
use crate::pairing::store::{PersistenceStore, RegistrySnapshot};

#[derive(Debug, Default)]
struct RegistryState {
    credentials: HashMap<String, DeviceCredential>,
    records: HashMap<String, DeviceRecord>,
    /// Document mtime as of our last load or save.
    synced_mtime: Option<SystemTime>,
    /// Set when the last save failed; the document is behind memory.
    unsaved: bool,
}

impl RegistryState {
    /// Build state from a snapshot, dropping expired credentials and any
    /// entry whose counterpart is missing.
    fn from_snapshot(snapshot: RegistrySnapshot, now: DateTime<Utc>) -> Self {
        let RegistrySnapshot {
            permanent_tokens,
            mut connected_devices,
        } = snapshot;

        let mut state = Self::default();
        for (device_id, mut credential) in permanent_tokens {
            if credential.is_expired_at(now) {
                tracing::info!(device_id = %device_id, "Dropping expired device credential");
                continue;
            }
            let Some(mut record) = connected_devices.remove(&device_id) else {
                tracing::warn!(device_id = %device_id, "Device credential without record, dropping");
                continue;
            };
            credential.device_id = device_id.clone();
            record.device_id = device_id.clone();
            state.records.insert(device_id.clone(), record);
            state.credentials.insert(device_id, credential);
        }

        for device_id in connected_devices.keys() {
            tracing::warn!(device_id = %device_id, "Device record without credential, dropping");
        }

        state
    }

    fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            permanent_tokens: self
                .credentials
                .iter()
                .map(|(id, c)| (id.clone(), c.clone()))
                .collect(),
            connected_devices: self
                .records
                .iter()
                .map(|(id, r)| (id.clone(), r.clone()))
                .collect(),
        }
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

/// Authoritative table of trusted devices, bounded by `max_devices`.
#[derive(Debug)]
pub struct DeviceRegistry {
    state: Mutex<RegistryState>,
    store: PersistenceStore,
    max_devices: usize,
    clock: Arc<dyn Clock>,
}

impl DeviceRegistry {
    /// Open the registry, loading whatever the store currently holds.
    pub fn open(store: PersistenceStore, max_devices: usize, clock: Arc<dyn Clock>) -> Self {
        let synced_mtime = store.modified();
        let mut state = RegistryState::from_snapshot(store.load(), clock.now());
        state.synced_mtime = synced_mtime;

        tracing::debug!(
            path = %store.path().display(),
            devices = state.len(),
            max_devices,
            "Device registry opened"
        );

        Self {
            state: Mutex::new(state),
            store,
            max_devices,
            clock,
        }
    }

    /// Maximum number of trusted devices.
    pub fn max_devices(&self) -> usize {
        self.max_devices
    }

    /// Replace in-memory state with the stored document.
    ///
    /// A missing document means an empty registry. An unreadable or corrupt
    /// one is logged and the in-memory state is kept. While a save is
    /// outstanding the document is stale, so the save is retried instead.
    pub async fn reload(&self) {
        let mut state = self.state.lock().await;
        self.reload_locked(&mut state);
    }

    /// Reload, then report whether another device fits.
    pub async fn can_add_device(&self) -> bool {
        let mut state = self.state.lock().await;
        self.reload_locked(&mut state);
        state.len() < self.max_devices
    }

    /// Insert a device credential and its record as one unit.
    ///
    /// Capacity is re-checked under the lock, so two redemptions racing for
    /// the last slot cannot both succeed. Re-adding an existing id replaces
    /// it without taking another slot.
    pub async fn add_device(
        &self,
        credential: DeviceCredential,
        mut record: DeviceRecord,
    ) -> Result<(), CredentialError> {
        let mut state = self.state.lock().await;

        let device_id = credential.device_id.clone();
        if !state.records.contains_key(&device_id) && state.len() >= self.max_devices {
            return Err(CredentialError::CapacityExceeded {
                max_devices: self.max_devices,
            });
        }

        record.device_id = device_id.clone();
        state.records.insert(device_id.clone(), record);
        state.credentials.insert(device_id.clone(), credential);
        self.persist_locked(&mut state);

        tracing::info!(device_id = %device_id, devices = state.len(), "Device added");
        Ok(())
    }

    /// Record that `device_id` was just seen.
    ///
    /// Returns the updated record, or `None` if the device is not registered.
    pub async fn touch(&self, device_id: &str) -> Option<DeviceRecord> {
        let mut state = self.state.lock().await;
        self.reload_if_changed_locked(&mut state);

        let now = self.clock.now();
        let record = state.records.get_mut(device_id)?;
        record.last_seen = now;
        let record = record.clone();
        self.persist_locked(&mut state);
        Some(record)
    }

    /// Remove a device. Returns `true` if it was registered.
    pub async fn revoke_device(&self, device_id: &str) -> bool {
        let mut state = self.state.lock().await;
        let had_credential = state.credentials.remove(device_id).is_some();
        let had_record = state.records.remove(device_id).is_some();
        self.persist_locked(&mut state);

        let removed = had_credential || had_record;
        if removed {
            tracing::info!(device_id = %device_id, "Device revoked");
        }
        removed
    }

    /// Remove every device. Returns how many were removed.
    pub async fn revoke_all(&self) -> usize {
        let mut state = self.state.lock().await;
        let removed = state.len();
        state.credentials.clear();
        state.records.clear();
        self.persist_locked(&mut state);

        tracing::info!(removed, "All devices revoked");
        removed
    }

    /// Snapshot of every device record, oldest connection first.
    pub async fn list_devices(&self) -> Vec<DeviceRecord> {
        let state = self.state.lock().await;
        let mut list: Vec<DeviceRecord> = state.records.values().cloned().collect();
        list.sort_by(|a, b| a.connected_at.cmp(&b.connected_at));
        list
    }

    /// Look up a single device record.
    pub async fn get_device(&self, device_id: &str) -> Option<DeviceRecord> {
        self.state.lock().await.records.get(device_id).cloned()
    }

    /// Look up the credential metadata issued to a device.
    pub async fn get_credential(&self, device_id: &str) -> Option<DeviceCredential> {
        self.state.lock().await.credentials.get(device_id).cloned()
    }

    /// Number of trusted devices.
    pub async fn device_count(&self) -> usize {
        self.state.lock().await.len()
    }

    // -- internal helpers --

    fn reload_locked(&self, state: &mut RegistryState) {
        if state.unsaved {
            tracing::warn!("Registry has unsaved changes, retrying save instead of reloading");
            self.persist_locked(state);
            return;
        }

        let synced_mtime = self.store.modified();
        let snapshot = match self.store.try_load() {
            Ok(snapshot) => snapshot.unwrap_or_default(),
            Err(e) => {
                tracing::error!(error = %e, "Registry reload failed, keeping in-memory state");
                return;
            }
        };
        *state = RegistryState::from_snapshot(snapshot, self.clock.now());
        state.synced_mtime = synced_mtime;
    }

    fn reload_if_changed_locked(&self, state: &mut RegistryState) {
        if self.store.modified() != state.synced_mtime {
            tracing::debug!("Registry document changed on disk, reloading");
            self.reload_locked(state);
        }
    }

    /// Save the current state. Failures are logged and otherwise ignored:
    /// the in-memory state stays authoritative for this process.
    fn persist_locked(&self, state: &mut RegistryState) {
        match self.store.save(&state.snapshot()) {
            Ok(()) => {
                state.synced_mtime = self.store.modified();
                state.unsaved = false;
            }
            Err(e) => {
                state.unsaved = true;
                tracing::error!(error = %e, "Error saving registry");
            }
        }
    }
}
