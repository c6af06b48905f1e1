//! The two-step pairing handshake.
//!
//! ```text
//! initiate()        ──► pairing credential (Unused) ──► connection URI, out of band
//! redeem(token)     ──► validate_temp ──► reserve (Redeeming)
//!                        ──► can_add_device ──► issue_permanent
//!                        ├─ ok  ──► Used, device credential returned
//!                        └─ err ──► Unused again, retry allowed until expiry
//! ```
//!
//! Expiry is discovered lazily at validation. The cleanup task only reclaims
//! memory; correctness never depends on it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::error::CredentialError;
use crate::pairing::device::{new_device_id, resolve_device_name};
use crate::pairing::issuer::CredentialIssuer;
use crate::pairing::pending::PairingTable;
use crate::pairing::registry::DeviceRegistry;
use crate::pairing::validator::CredentialValidator;

/// Where a scanned connection URI sends the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    web_app_url: String,
    service_url: String,
}

impl ConnectTarget {
    pub fn new(web_app_url: impl Into<String>, service_url: impl Into<String>) -> Self {
        Self {
            web_app_url: web_app_url.into().trim_end_matches('/').to_string(),
            service_url: service_url.into(),
        }
    }

    /// Target for this machine, advertised as `https://<hostname>.local:<port>`.
    pub fn for_local_host(web_app_url: impl Into<String>, port: u16) -> Self {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());
        let host = host.trim_end_matches(".local");
        Self::new(web_app_url, format!("https://{host}.local:{port}"))
    }

    /// Connection URI carrying `token`.
    pub fn connection_url(&self, token: &str) -> String {
        format!(
            "{}/connect?token={}&serviceUrl={}",
            self.web_app_url,
            urlencoding::encode(token),
            urlencoding::encode(&self.service_url)
        )
    }
}

/// A pairing credential ready for out-of-band delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingTicket {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    /// Present when a web app URL is configured.
    pub connection_url: Option<String>,
}

/// Result of a successful redemption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedeemedDevice {
    pub device_id: String,
    pub device_name: String,
    /// The device credential.
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Orchestrates issuance and redemption of pairing credentials.
#[derive(Debug)]
pub struct PairingFlow {
    issuer: CredentialIssuer,
    validator: Arc<CredentialValidator>,
    pending: PairingTable,
    registry: Arc<DeviceRegistry>,
    clock: Arc<dyn Clock>,
    connect: Option<ConnectTarget>,
}

impl PairingFlow {
    pub fn new(
        issuer: CredentialIssuer,
        validator: Arc<CredentialValidator>,
        pending: PairingTable,
        registry: Arc<DeviceRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            issuer,
            validator,
            pending,
            registry,
            clock,
            connect: None,
        }
    }

    /// Builder: embed pairing credentials in connection URIs for `target`.
    pub fn with_connect_target(mut self, target: ConnectTarget) -> Self {
        self.connect = Some(target);
        self
    }

    /// Issue a pairing credential.
    ///
    /// `name_hint` is advisory; the redeeming client names itself.
    pub async fn initiate(
        &self,
        name_hint: Option<&str>,
    ) -> Result<PairingTicket, CredentialError> {
        let issued = self.issuer.issue_temp(name_hint).await?;
        let connection_url = self
            .connect
            .as_ref()
            .map(|target| target.connection_url(&issued.token));

        Ok(PairingTicket {
            token: issued.token,
            expires_at: issued.expires_at,
            connection_url,
        })
    }

    /// Exchange a pairing credential for a device credential.
    ///
    /// The pairing credential is consumed only if the device was registered.
    /// On any failure it stays redeemable until its original expiry.
    pub async fn redeem(
        &self,
        pairing_token: &str,
        device_name: Option<&str>,
    ) -> Result<RedeemedDevice, CredentialError> {
        let claims = self.validator.validate_temp(pairing_token).await?;
        self.pending.reserve(&claims.id, self.clock.now()).await?;

        let result = self
            .register(device_name, claims.name_hint.as_deref())
            .await;

        match &result {
            Ok(device) => {
                self.pending.consume(&claims.id).await;
                tracing::info!(
                    device_id = %device.device_id,
                    device_name = %device.device_name,
                    "Device paired"
                );
            }
            Err(e) => {
                self.pending.release(&claims.id).await;
                tracing::warn!(kind = e.kind(), "Pairing redemption failed");
            }
        }
        result
    }

    /// Drop expired pairing credentials. Returns how many were removed.
    pub async fn cleanup_expired(&self) -> usize {
        self.pending.cleanup_expired(self.clock.now()).await
    }

    /// Periodically run [`cleanup_expired`](Self::cleanup_expired).
    pub fn spawn_cleanup_task(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = self.cleanup_expired().await;
                if removed > 0 {
                    tracing::debug!(removed, "Expired pairing credentials removed");
                }
            }
        })
    }

    async fn register(
        &self,
        requested_name: Option<&str>,
        name_hint: Option<&str>,
    ) -> Result<RedeemedDevice, CredentialError> {
        if !self.registry.can_add_device().await {
            return Err(CredentialError::CapacityExceeded {
                max_devices: self.registry.max_devices(),
            });
        }

        let device_id = new_device_id();
        let device_name = resolve_device_name(requested_name, name_hint);
        let issued = self.issuer.issue_permanent(&device_id, &device_name).await?;

        Ok(RedeemedDevice {
            device_id,
            device_name,
            token: issued.token,
            expires_at: issued.expires_at,
        })
    }
}
