//! Transient table of issued pairing credentials.
//!
//! Entries exist only in memory; a restart invalidates every outstanding
//! pairing credential. Expired entries are removed when validation notices
//! them, or in bulk by [`PairingTable::cleanup_expired`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::CredentialError;

/// Lifecycle of a pairing credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingState {
    /// Issued and not yet redeemed.
    Unused,
    /// A redemption is in flight.
    Redeeming,
    /// Redeemed; every further use fails.
    Used,
}

/// A pairing credential as remembered by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPairing {
    pub id: String,
    pub name_hint: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub state: PairingState,
}

impl PendingPairing {
    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Shared pairing table. Cloning shares the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct PairingTable {
    entries: Arc<Mutex<HashMap<String, PendingPairing>>>,
}

impl PairingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember a freshly issued pairing credential.
    pub async fn insert(&self, entry: PendingPairing) {
        self.entries.lock().await.insert(entry.id.clone(), entry);
    }

    /// Check that `id` is known, unused and unexpired at `now`.
    ///
    /// An expired entry is removed as a side effect.
    pub async fn check(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<PendingPairing, CredentialError> {
        let mut entries = self.entries.lock().await;
        Self::check_locked(&mut entries, id, now).cloned()
    }

    /// Move `id` from `Unused` to `Redeeming`.
    ///
    /// Runs the same checks as [`check`](Self::check), so only one of several
    /// concurrent redemptions of the same credential gets through.
    pub async fn reserve(&self, id: &str, now: DateTime<Utc>) -> Result<(), CredentialError> {
        let mut entries = self.entries.lock().await;
        Self::check_locked(&mut entries, id, now)?;
        if let Some(entry) = entries.get_mut(id) {
            entry.state = PairingState::Redeeming;
        }
        Ok(())
    }

    /// Return a reserved credential to `Unused` after a failed redemption.
    pub async fn release(&self, id: &str) {
        if let Some(entry) = self.entries.lock().await.get_mut(id)
            && entry.state == PairingState::Redeeming
        {
            entry.state = PairingState::Unused;
        }
    }

    /// Mark a credential `Used`.
    pub async fn consume(&self, id: &str) {
        if let Some(entry) = self.entries.lock().await.get_mut(id) {
            entry.state = PairingState::Used;
        }
    }

    /// Current state of `id`, if it is still in the table.
    pub async fn state(&self, id: &str) -> Option<PairingState> {
        self.entries.lock().await.get(id).map(|e| e.state)
    }

    /// Number of entries still held.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Drop every entry expired at `now`. Returns how many were removed.
    pub async fn cleanup_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired_at(now));
        before - entries.len()
    }

    fn check_locked<'a>(
        entries: &'a mut HashMap<String, PendingPairing>,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<&'a PendingPairing, CredentialError> {
        let entry = entries.get(id).ok_or(CredentialError::UnknownCredential)?;

        if entry.state != PairingState::Unused {
            return Err(CredentialError::CredentialAlreadyUsed);
        }

        if entry.is_expired_at(now) {
            entries.remove(id);
            return Err(CredentialError::ExpiredCredential);
        }

        entries.get(id).ok_or(CredentialError::UnknownCredential)
    }
}
