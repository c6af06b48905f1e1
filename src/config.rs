//! Environment-driven configuration for the pairing host.
//!
//! Values come from the process environment (after `.env` is loaded by
//! `main`). Every key has a default, so an empty environment yields a
//! working, if forgetful, configuration.

use std::path::PathBuf;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::TimeDelta;
use rand::RngCore;
use rand::rngs::OsRng;
use secrecy::SecretString;

use crate::error::ConfigError;
use crate::pairing::DeviceValidation;
use crate::pairing::store::PersistenceStore;

/// Default cap on simultaneously trusted devices.
pub const DEFAULT_MAX_DEVICES: usize = 5;

/// Default pairing credential lifetime (10 minutes).
pub const DEFAULT_PAIRING_TTL_SECS: i64 = 600;

/// Default device credential lifetime.
pub const DEFAULT_DEVICE_TTL_DAYS: i64 = 30;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;

const ENV_SECRET_KEY: &str = "AUTH_SECRET_KEY";
const ENV_MAX_DEVICES: &str = "MAX_DEVICES";
const ENV_PAIRING_TTL: &str = "PAIRING_TTL_SECS";
const ENV_DEVICE_TTL: &str = "DEVICE_TTL_DAYS";
const ENV_DATA_PATH: &str = "AUTH_DATA_PATH";
const ENV_HOST: &str = "SERVER_HOST";
const ENV_PORT: &str = "SERVER_PORT";
const ENV_WEB_APP_URL: &str = "WEB_APP_URL";
const ENV_DEVICE_VALIDATION: &str = "DEVICE_VALIDATION";

/// Settings for credential issuance, the device registry and the HTTP listener.
#[derive(Debug)]
pub struct PairingConfig {
    /// HMAC key used to sign every credential.
    pub secret_key: SecretString,
    /// True when `secret_key` was generated for this process only.
    pub ephemeral_secret: bool,
    /// Maximum number of trusted devices.
    pub max_devices: usize,
    /// Lifetime of a pairing credential.
    pub pairing_ttl: TimeDelta,
    /// Lifetime of a device credential.
    pub device_ttl: TimeDelta,
    /// Location of the registry document.
    pub data_path: PathBuf,
    /// Listener bind address.
    pub host: String,
    /// Listener port, also advertised in connection URIs.
    pub port: u16,
    /// Base URL of the companion web app that receives connection URIs.
    pub web_app_url: Option<String>,
    /// How strictly device credentials are re-checked on each call.
    pub device_validation: DeviceValidation,
}

impl PairingConfig {
    /// Build a configuration with defaults for everything but the storage
    /// location and signing key.
    pub fn new(data_path: impl Into<PathBuf>, secret_key: impl Into<String>) -> Self {
        Self {
            secret_key: SecretString::from(secret_key.into()),
            ephemeral_secret: false,
            max_devices: DEFAULT_MAX_DEVICES,
            pairing_ttl: TimeDelta::seconds(DEFAULT_PAIRING_TTL_SECS),
            device_ttl: TimeDelta::days(DEFAULT_DEVICE_TTL_DAYS),
            data_path: data_path.into(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            web_app_url: None,
            device_validation: DeviceValidation::default(),
        }
    }

    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| read_non_empty(&lookup, key);

        let (secret, ephemeral_secret) = match read(ENV_SECRET_KEY) {
            Some(secret) => (secret, false),
            None => (generate_secret(), true),
        };

        let max_devices: usize = parse_or(&read, ENV_MAX_DEVICES, DEFAULT_MAX_DEVICES)?;
        if max_devices == 0 {
            return Err(invalid(ENV_MAX_DEVICES, "must be at least 1"));
        }

        let pairing_ttl_secs: i64 = parse_or(&read, ENV_PAIRING_TTL, DEFAULT_PAIRING_TTL_SECS)?;
        if pairing_ttl_secs <= 0 {
            return Err(invalid(ENV_PAIRING_TTL, "must be positive"));
        }

        let device_ttl_days: i64 = parse_or(&read, ENV_DEVICE_TTL, DEFAULT_DEVICE_TTL_DAYS)?;
        if device_ttl_days <= 0 {
            return Err(invalid(ENV_DEVICE_TTL, "must be positive"));
        }

        let data_path = read(ENV_DATA_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(PersistenceStore::default_path);

        Ok(Self {
            secret_key: SecretString::from(secret),
            ephemeral_secret,
            max_devices,
            pairing_ttl: TimeDelta::seconds(pairing_ttl_secs),
            device_ttl: TimeDelta::days(device_ttl_days),
            data_path,
            host: read(ENV_HOST).unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parse_or(&read, ENV_PORT, DEFAULT_PORT)?,
            web_app_url: read(ENV_WEB_APP_URL).map(|url| url.trim_end_matches('/').to_string()),
            device_validation: parse_or(
                &read,
                ENV_DEVICE_VALIDATION,
                DeviceValidation::default(),
            )?,
        })
    }

    /// Builder: set the device cap.
    pub fn with_max_devices(mut self, max_devices: usize) -> Self {
        self.max_devices = max_devices;
        self
    }

    /// Builder: set the pairing credential lifetime.
    pub fn with_pairing_ttl(mut self, ttl: TimeDelta) -> Self {
        self.pairing_ttl = ttl;
        self
    }

    /// Builder: set the device credential lifetime.
    pub fn with_device_ttl(mut self, ttl: TimeDelta) -> Self {
        self.device_ttl = ttl;
        self
    }

    /// Builder: choose the device validation policy.
    pub fn with_device_validation(mut self, policy: DeviceValidation) -> Self {
        self.device_validation = policy;
        self
    }

    /// Builder: set the companion web app URL.
    pub fn with_web_app_url(mut self, url: impl Into<String>) -> Self {
        self.web_app_url = Some(url.into());
        self
    }

    /// Listener socket address as `host:port`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn read_non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(key)?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_or<T, R>(read: &R, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    R: Fn(&str) -> Option<String>,
{
    match read(key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| invalid(key, &e.to_string())),
        None => Ok(default),
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

/// 32 random bytes, URL-safe base64.
fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
