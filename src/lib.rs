//! Pairing and device-credential registry for trusted LAN remotes.
//!
//! A host shows a short-lived pairing credential (usually as a QR code). A
//! client on the local network redeems it once for a long-lived device
//! credential, which then authorizes every privileged request until the
//! device is revoked or the credential expires.

pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod pairing;
pub mod web;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::PairingConfig;
pub use error::{ConfigError, CredentialError, Error, PersistenceError, Result};
pub use pairing::{DeviceRegistry, PairingService};
