//! Persisted device state.
//!
//! A device that completed pairing is represented twice: a
//! [`DeviceCredential`] describing the long-lived bearer credential it was
//! issued, and a [`DeviceRecord`] tracking when it connected and when it was
//! last seen. Both are keyed by the same server-generated device id and are
//! only ever created or removed together.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, TimeDelta, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

/// Name used when neither the redeeming client nor the pairing hint supplies one.
pub const UNKNOWN_DEVICE_NAME: &str = "Unknown Device";

/// Longest display name kept, in characters.
pub const MAX_DEVICE_NAME_LEN: usize = 64;

/// Metadata about the device credential issued to a paired device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCredential {
    /// Unique identifier for the device.
    pub device_id: String,
    /// Display name at issuance.
    pub device_name: String,
    /// When the credential was issued.
    pub created_at: DateTime<Utc>,
    /// When the credential stops being accepted.
    pub expires: DateTime<Utc>,
}

impl DeviceCredential {
    /// Describe a credential issued at `now` that lives for `ttl`.
    pub fn issue(
        device_id: impl Into<String>,
        device_name: impl Into<String>,
        now: DateTime<Utc>,
        ttl: TimeDelta,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            device_name: device_name.into(),
            created_at: now,
            expires: now + ttl,
        }
    }

    /// Whether the credential has passed its expiry at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires
    }
}

/// A trusted device as shown to administrators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Unique identifier for the device.
    pub device_id: String,
    /// Human-readable device name.
    pub name: String,
    /// When the device completed pairing.
    pub connected_at: DateTime<Utc>,
    /// When the device last presented a valid credential.
    pub last_seen: DateTime<Utc>,
}

impl DeviceRecord {
    /// A record for a device that just connected.
    pub fn connected(
        device_id: impl Into<String>,
        name: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            name: name.into(),
            connected_at: now,
            last_seen: now,
        }
    }
}

/// Generate an opaque device id: 8 random bytes, URL-safe base64.
pub fn new_device_id() -> String {
    let mut bytes = [0u8; 8];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Pick the display name for a newly paired device.
///
/// The redeeming client's name wins; the hint recorded when the pairing
/// credential was issued is only a fallback.
pub fn resolve_device_name(requested: Option<&str>, hint: Option<&str>) -> String {
    [requested, hint]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|name| !name.is_empty())
        .map(|name| name.chars().take(MAX_DEVICE_NAME_LEN).collect())
        .unwrap_or_else(|| UNKNOWN_DEVICE_NAME.to_string())
}
