//! Device pairing and the trusted-device registry.
//!
//! A client proves it saw a pairing credential shown on the host (usually as
//! a QR code) and trades it for a long-lived device credential. Device
//! credentials are checked on every privileged request; removing a device
//! from the registry revokes its credential.
//!
//! [`PairingService`] wires the pieces together and is the only owner of
//! shared state; there is no global registry.

pub mod device;
pub mod flow;
pub mod issuer;
pub mod pending;
pub mod registry;
pub mod store;
pub mod token;
pub mod validator;

use std::sync::Arc;

use secrecy::ExposeSecret;

pub use device::{DeviceCredential, DeviceRecord};
pub use flow::{ConnectTarget, PairingFlow, PairingTicket, RedeemedDevice};
pub use issuer::{CredentialIssuer, IssuedCredential};
pub use pending::{PairingState, PairingTable};
pub use registry::DeviceRegistry;
pub use store::{PersistenceStore, RegistrySnapshot};
pub use token::{CredentialCodec, DeviceClaims, PairingClaims};
pub use validator::{CredentialValidator, DeviceValidation};

use crate::clock::{Clock, SystemClock};
use crate::config::PairingConfig;

/// Owns the registry, validator and pairing flow for one host process.
#[derive(Debug, Clone)]
pub struct PairingService {
    registry: Arc<DeviceRegistry>,
    validator: Arc<CredentialValidator>,
    flow: Arc<PairingFlow>,
}

impl PairingService {
    /// Build the service on the system clock.
    pub fn new(config: &PairingConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Build the service on an explicit clock.
    pub fn with_clock(config: &PairingConfig, clock: Arc<dyn Clock>) -> Self {
        let codec = Arc::new(CredentialCodec::new(
            config.secret_key.expose_secret().as_bytes(),
        ));
        let pending = PairingTable::new();
        let registry = Arc::new(DeviceRegistry::open(
            PersistenceStore::new(&config.data_path),
            config.max_devices,
            Arc::clone(&clock),
        ));
        let issuer = CredentialIssuer::new(
            Arc::clone(&codec),
            pending.clone(),
            Arc::clone(&registry),
            Arc::clone(&clock),
            config.pairing_ttl,
            config.device_ttl,
        );
        let validator = Arc::new(CredentialValidator::new(
            codec,
            pending.clone(),
            Arc::clone(&registry),
            Arc::clone(&clock),
            config.device_validation,
        ));

        let mut flow = PairingFlow::new(
            issuer,
            Arc::clone(&validator),
            pending,
            Arc::clone(&registry),
            clock,
        );
        if let Some(web_app_url) = &config.web_app_url {
            flow = flow.with_connect_target(ConnectTarget::for_local_host(
                web_app_url.as_str(),
                config.port,
            ));
        }

        Self {
            registry,
            validator,
            flow: Arc::new(flow),
        }
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn validator(&self) -> &Arc<CredentialValidator> {
        &self.validator
    }

    pub fn flow(&self) -> &Arc<PairingFlow> {
        &self.flow
    }
}
