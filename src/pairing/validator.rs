//! Checking presented credentials.

use std::str::FromStr;
use std::sync::Arc;

use crate::clock::Clock;
use crate::error::CredentialError;
use crate::pairing::pending::PairingTable;
use crate::pairing::registry::DeviceRegistry;
use crate::pairing::token::{CredentialCodec, DecodedCredential, DeviceClaims, PairingClaims};

/// How a device credential is re-checked on each authenticated call.
///
/// Revocation always works by registry presence. The policies differ in
/// whether the credential's own expiry is enforced as well.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeviceValidation {
    /// Accept any well-signed credential whose device is registered.
    PresenceOnly,
    /// Additionally reject credentials past their expiry.
    #[default]
    PresenceAndExpiry,
}

impl FromStr for DeviceValidation {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "presence" | "presence_only" => Ok(Self::PresenceOnly),
            "presence_and_expiry" | "expiry" | "strict" => Ok(Self::PresenceAndExpiry),
            _ => Err(format!("invalid device validation policy: {value}")),
        }
    }
}

/// Validates pairing and device credentials.
#[derive(Debug)]
pub struct CredentialValidator {
    codec: Arc<CredentialCodec>,
    pending: PairingTable,
    registry: Arc<DeviceRegistry>,
    clock: Arc<dyn Clock>,
    device_validation: DeviceValidation,
}

impl CredentialValidator {
    pub fn new(
        codec: Arc<CredentialCodec>,
        pending: PairingTable,
        registry: Arc<DeviceRegistry>,
        clock: Arc<dyn Clock>,
        device_validation: DeviceValidation,
    ) -> Self {
        Self {
            codec,
            pending,
            registry,
            clock,
            device_validation,
        }
    }

    /// Validate a pairing credential without consuming it.
    ///
    /// Expiry is checked both against the signed claim and against the
    /// host's own record of the credential.
    pub async fn validate_temp(&self, token: &str) -> Result<PairingClaims, CredentialError> {
        let DecodedCredential::Pairing(claims) = self.codec.decode(token)? else {
            return Err(CredentialError::WrongCredentialType);
        };

        let now = self.clock.now();
        self.pending.check(&claims.id, now).await?;

        if now > claims.expires_at {
            return Err(CredentialError::ExpiredCredential);
        }
        Ok(claims)
    }

    /// Validate a device credential and refresh the device's last-seen time.
    ///
    /// The returned claims carry the registry's current display name.
    pub async fn validate_permanent(&self, token: &str) -> Result<DeviceClaims, CredentialError> {
        let DecodedCredential::Device(mut claims) = self.codec.decode(token)? else {
            return Err(CredentialError::WrongCredentialType);
        };

        if self.device_validation == DeviceValidation::PresenceAndExpiry
            && self.clock.now() > claims.expires_at
        {
            return Err(CredentialError::ExpiredCredential);
        }

        let record = self
            .registry
            .touch(&claims.device_id)
            .await
            .ok_or(CredentialError::DeviceNotRegistered)?;

        claims.device_name = record.name;
        Ok(claims)
    }

    pub fn device_validation(&self) -> DeviceValidation {
        self.device_validation
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeDelta, Utc};
    use tempfile::TempDir;

    use super::*;
    use crate::clock::ManualClock;
    use crate::pairing::issuer::CredentialIssuer;
    use crate::pairing::store::PersistenceStore;

    struct Fixture {
        _dir: TempDir,
        clock: Arc<ManualClock>,
        issuer: CredentialIssuer,
        validator: CredentialValidator,
        pending: PairingTable,
        registry: Arc<DeviceRegistry>,
    }

    fn fixture(policy: DeviceValidation) -> Fixture {
        let dir = TempDir::new().unwrap();
        // Whole seconds, so signed claims and stored records agree exactly.
        let start = DateTime::from_timestamp(Utc::now().timestamp(), 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let codec = Arc::new(CredentialCodec::new(b"validator-test"));
        let pending = PairingTable::new();
        let registry = Arc::new(DeviceRegistry::open(
            PersistenceStore::new(dir.path().join("auth_data.json")),
            5,
            clock.clone(),
        ));
        let issuer = CredentialIssuer::new(
            Arc::clone(&codec),
            pending.clone(),
            Arc::clone(&registry),
            clock.clone(),
            TimeDelta::minutes(10),
            TimeDelta::days(30),
        );
        let validator = CredentialValidator::new(
            codec,
            pending.clone(),
            Arc::clone(&registry),
            clock.clone(),
            policy,
        );
        Fixture {
            _dir: dir,
            clock,
            issuer,
            validator,
            pending,
            registry,
        }
    }

    #[tokio::test]
    async fn test_fresh_pairing_credential_validates() {
        let f = fixture(DeviceValidation::default());
        let issued = f.issuer.issue_temp(Some("hint")).await.unwrap();

        let claims = f.validator.validate_temp(&issued.token).await.unwrap();
        assert_eq!(claims.id, issued.subject);
        // Validation alone does not consume the credential.
        assert!(f.validator.validate_temp(&issued.token).await.is_ok());
    }

    #[tokio::test]
    async fn test_used_pairing_credential_is_rejected() {
        let f = fixture(DeviceValidation::default());
        let issued = f.issuer.issue_temp(None).await.unwrap();
        f.pending.consume(&issued.subject).await;

        assert_eq!(
            f.validator.validate_temp(&issued.token).await.unwrap_err(),
            CredentialError::CredentialAlreadyUsed
        );
    }

    #[tokio::test]
    async fn test_expired_pairing_credential_is_rejected() {
        let f = fixture(DeviceValidation::default());
        let issued = f.issuer.issue_temp(None).await.unwrap();

        f.clock.advance(TimeDelta::minutes(10) + TimeDelta::seconds(1));
        assert_eq!(
            f.validator.validate_temp(&issued.token).await.unwrap_err(),
            CredentialError::ExpiredCredential
        );
        // The expired entry is gone from the table.
        assert_eq!(
            f.validator.validate_temp(&issued.token).await.unwrap_err(),
            CredentialError::UnknownCredential
        );
    }

    #[tokio::test]
    async fn test_pairing_credential_valid_at_exact_expiry() {
        let f = fixture(DeviceValidation::default());
        let issued = f.issuer.issue_temp(None).await.unwrap();

        f.clock.set(issued.expires_at);
        assert!(f.validator.validate_temp(&issued.token).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_pairing_credential_is_rejected() {
        let f = fixture(DeviceValidation::default());
        let issued = f.issuer.issue_temp(None).await.unwrap();

        // Same key, but the pairing table was lost in a restart.
        let restarted = CredentialValidator::new(
            Arc::new(CredentialCodec::new(b"validator-test")),
            PairingTable::new(),
            Arc::clone(&f.registry),
            f.clock.clone(),
            DeviceValidation::default(),
        );
        assert_eq!(
            restarted.validate_temp(&issued.token).await.unwrap_err(),
            CredentialError::UnknownCredential
        );
    }

    #[tokio::test]
    async fn test_credential_kinds_are_not_interchangeable() {
        let f = fixture(DeviceValidation::default());
        let pairing = f.issuer.issue_temp(None).await.unwrap();
        let device = f.issuer.issue_permanent("dev-1", "Phone").await.unwrap();

        assert_eq!(
            f.validator.validate_temp(&device.token).await.unwrap_err(),
            CredentialError::WrongCredentialType
        );
        assert_eq!(
            f.validator
                .validate_permanent(&pairing.token)
                .await
                .unwrap_err(),
            CredentialError::WrongCredentialType
        );
    }

    #[tokio::test]
    async fn test_malformed_credentials_are_rejected() {
        let f = fixture(DeviceValidation::default());
        assert_eq!(
            f.validator.validate_temp("garbage").await.unwrap_err(),
            CredentialError::MalformedCredential
        );
        assert_eq!(
            f.validator.validate_permanent("").await.unwrap_err(),
            CredentialError::MalformedCredential
        );
    }

    #[tokio::test]
    async fn test_device_credential_validates_and_touches() {
        let f = fixture(DeviceValidation::default());
        let issued = f.issuer.issue_permanent("dev-1", "Phone").await.unwrap();

        f.clock.advance(TimeDelta::hours(1));
        let claims = f.validator.validate_permanent(&issued.token).await.unwrap();
        assert_eq!(claims.device_id, "dev-1");
        assert_eq!(claims.device_name, "Phone");

        let record = f.registry.get_device("dev-1").await.unwrap();
        assert!(record.last_seen >= issued.issued_at);
        assert_eq!(record.last_seen, issued.issued_at + TimeDelta::hours(1));
    }

    #[tokio::test]
    async fn test_revoked_device_is_rejected() {
        let f = fixture(DeviceValidation::default());
        let issued = f.issuer.issue_permanent("dev-1", "Phone").await.unwrap();
        f.registry.revoke_device("dev-1").await;

        assert_eq!(
            f.validator.validate_permanent(&issued.token).await.unwrap_err(),
            CredentialError::DeviceNotRegistered
        );
    }

    #[tokio::test]
    async fn test_device_credential_validates_while_saves_fail() {
        let f = fixture(DeviceValidation::default());
        std::fs::create_dir(f._dir.path().join("auth_data.json.tmp")).unwrap();

        let issued = f.issuer.issue_permanent("dev-1", "Phone").await.unwrap();
        assert!(f.registry.can_add_device().await);

        let claims = f.validator.validate_permanent(&issued.token).await.unwrap();
        assert_eq!(claims.device_id, "dev-1");
        assert_eq!(f.registry.device_count().await, 1);
    }

    #[tokio::test]
    async fn test_expired_device_credential_rejected_with_expiry_policy() {
        let f = fixture(DeviceValidation::PresenceAndExpiry);
        let issued = f.issuer.issue_permanent("dev-1", "Phone").await.unwrap();

        f.clock.advance(TimeDelta::days(30) + TimeDelta::seconds(1));
        assert_eq!(
            f.validator.validate_permanent(&issued.token).await.unwrap_err(),
            CredentialError::ExpiredCredential
        );
    }

    #[tokio::test]
    async fn test_expired_device_credential_accepted_with_presence_policy() {
        let f = fixture(DeviceValidation::PresenceOnly);
        let issued = f.issuer.issue_permanent("dev-1", "Phone").await.unwrap();

        f.clock.advance(TimeDelta::days(30) + TimeDelta::seconds(1));
        let claims = f.validator.validate_permanent(&issued.token).await.unwrap();
        assert_eq!(claims.device_id, "dev-1");
    }

    #[tokio::test]
    async fn test_presence_policy_still_honours_revocation() {
        let f = fixture(DeviceValidation::PresenceOnly);
        let issued = f.issuer.issue_permanent("dev-1", "Phone").await.unwrap();
        f.registry.revoke_all().await;

        assert_eq!(
            f.validator.validate_permanent(&issued.token).await.unwrap_err(),
            CredentialError::DeviceNotRegistered
        );
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!(
            "presence".parse::<DeviceValidation>().unwrap(),
            DeviceValidation::PresenceOnly
        );
        assert_eq!(
            " Presence_And_Expiry ".parse::<DeviceValidation>().unwrap(),
            DeviceValidation::PresenceAndExpiry
        );
        assert!("never".parse::<DeviceValidation>().is_err());
    }
}
