//! Minting of pairing and device credentials.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, TimeDelta, Utc};
use rand::RngCore;
use rand::rngs::OsRng;

use crate::clock::Clock;
use crate::error::CredentialError;
use crate::pairing::device::{DeviceCredential, DeviceRecord};
use crate::pairing::pending::{PairingState, PairingTable, PendingPairing};
use crate::pairing::registry::DeviceRegistry;
use crate::pairing::token::{CredentialCodec, DeviceClaims, PairingClaims};

/// An encoded credential together with what it was issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCredential {
    /// Pairing table id or device id.
    pub subject: String,
    /// Signed, encoded credential.
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Issues credentials and records them where validation will look.
#[derive(Debug)]
pub struct CredentialIssuer {
    codec: Arc<CredentialCodec>,
    pending: PairingTable,
    registry: Arc<DeviceRegistry>,
    clock: Arc<dyn Clock>,
    pairing_ttl: TimeDelta,
    device_ttl: TimeDelta,
}

impl CredentialIssuer {
    pub fn new(
        codec: Arc<CredentialCodec>,
        pending: PairingTable,
        registry: Arc<DeviceRegistry>,
        clock: Arc<dyn Clock>,
        pairing_ttl: TimeDelta,
        device_ttl: TimeDelta,
    ) -> Self {
        Self {
            codec,
            pending,
            registry,
            clock,
            pairing_ttl,
            device_ttl,
        }
    }

    /// Issue a single-use pairing credential.
    pub async fn issue_temp(
        &self,
        name_hint: Option<&str>,
    ) -> Result<IssuedCredential, CredentialError> {
        let now = self.clock.now();
        let claims = PairingClaims {
            id: new_pairing_id(),
            name_hint: name_hint
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string),
            issued_at: now,
            expires_at: now + self.pairing_ttl,
        };
        let token = self.codec.encode_pairing(&claims)?;

        self.pending
            .insert(PendingPairing {
                id: claims.id.clone(),
                name_hint: claims.name_hint.clone(),
                issued_at: claims.issued_at,
                expires_at: claims.expires_at,
                state: PairingState::Unused,
            })
            .await;

        tracing::info!(expires_at = %claims.expires_at, "Pairing credential issued");

        Ok(IssuedCredential {
            subject: claims.id,
            token,
            issued_at: claims.issued_at,
            expires_at: claims.expires_at,
        })
    }

    /// Issue a device credential and register the device.
    ///
    /// The credential metadata and device record are inserted together and
    /// persisted before the encoded credential is handed back.
    pub async fn issue_permanent(
        &self,
        device_id: &str,
        device_name: &str,
    ) -> Result<IssuedCredential, CredentialError> {
        let now = self.clock.now();
        let credential = DeviceCredential::issue(device_id, device_name, now, self.device_ttl);
        let token = self.codec.encode_device(&DeviceClaims {
            device_id: device_id.to_string(),
            device_name: device_name.to_string(),
            issued_at: now,
            expires_at: credential.expires,
        })?;
        let expires_at = credential.expires;

        self.registry
            .add_device(credential, DeviceRecord::connected(device_id, device_name, now))
            .await?;

        Ok(IssuedCredential {
            subject: device_id.to_string(),
            token,
            issued_at: now,
            expires_at,
        })
    }
}

/// 16 random bytes, URL-safe base64.
fn new_pairing_id() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
