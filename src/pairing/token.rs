//! Signed credential encoding.
//!
//! Both credential kinds are HS256 JWTs signed with the host's secret. The
//! `type` claim tells them apart; pairing credentials carry their table id in
//! `jti`, device credentials carry the device id in `sub`.
//!
//! The JWT library's own `exp` check is switched off: expiry is judged by the
//! validator against the injected clock, so there is a single time source.

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::error::CredentialError;

/// Maximum accepted credential length (8 KiB).
const MAX_TOKEN_LENGTH: usize = 8192;

/// Which of the two credential kinds a token is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialKind {
    Pairing,
    Device,
}

/// Wire claims shared by both kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Claims {
    #[serde(rename = "type")]
    kind: CredentialKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    jti: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    iat: i64,
    exp: i64,
}

/// Decoded contents of a pairing credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingClaims {
    /// Pairing table id.
    pub id: String,
    /// Advisory device name given at issuance.
    pub name_hint: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Decoded contents of a device credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceClaims {
    pub device_id: String,
    pub device_name: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// A verified credential of either kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedCredential {
    Pairing(PairingClaims),
    Device(DeviceClaims),
}

/// Signs and verifies credentials with one HMAC key.
pub struct CredentialCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for CredentialCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCodec").finish_non_exhaustive()
    }
}

impl CredentialCodec {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "iat"]);

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Encode a pairing credential.
    pub fn encode_pairing(&self, claims: &PairingClaims) -> Result<String, CredentialError> {
        self.sign(&Claims {
            kind: CredentialKind::Pairing,
            jti: Some(claims.id.clone()),
            sub: None,
            name: claims.name_hint.clone(),
            iat: claims.issued_at.timestamp(),
            exp: claims.expires_at.timestamp(),
        })
    }

    /// Encode a device credential.
    pub fn encode_device(&self, claims: &DeviceClaims) -> Result<String, CredentialError> {
        self.sign(&Claims {
            kind: CredentialKind::Device,
            jti: None,
            sub: Some(claims.device_id.clone()),
            name: Some(claims.device_name.clone()),
            iat: claims.issued_at.timestamp(),
            exp: claims.expires_at.timestamp(),
        })
    }

    /// Verify the signature and structure of `token`.
    ///
    /// Any failure (bad signature, wrong algorithm, missing claim, absurd
    /// timestamp) is reported as [`CredentialError::MalformedCredential`].
    pub fn decode(&self, token: &str) -> Result<DecodedCredential, CredentialError> {
        if token.is_empty() || token.len() > MAX_TOKEN_LENGTH {
            return Err(CredentialError::MalformedCredential);
        }

        let claims = decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|e| {
                tracing::debug!(error = %e, "Credential failed verification");
                CredentialError::MalformedCredential
            })?
            .claims;

        let issued_at = timestamp(claims.iat)?;
        let expires_at = timestamp(claims.exp)?;

        match claims.kind {
            CredentialKind::Pairing => {
                let id = claims
                    .jti
                    .filter(|id| !id.is_empty())
                    .ok_or(CredentialError::MalformedCredential)?;
                Ok(DecodedCredential::Pairing(PairingClaims {
                    id,
                    name_hint: claims.name,
                    issued_at,
                    expires_at,
                }))
            }
            CredentialKind::Device => {
                let device_id = claims
                    .sub
                    .filter(|id| !id.is_empty())
                    .ok_or(CredentialError::MalformedCredential)?;
                Ok(DecodedCredential::Device(DeviceClaims {
                    device_id,
                    device_name: claims.name.unwrap_or_default(),
                    issued_at,
                    expires_at,
                }))
            }
        }
    }

    fn sign(&self, claims: &Claims) -> Result<String, CredentialError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding).map_err(|e| {
            CredentialError::Signing {
                reason: e.to_string(),
            }
        })
    }
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, CredentialError> {
    DateTime::from_timestamp(secs, 0).ok_or(CredentialError::MalformedCredential)
}
