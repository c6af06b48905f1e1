//! Trusted-device management commands.
//!
//! These operate on the persisted registry directly, so they work whether
//! or not a server is running. A running server notices the change the next
//! time a device presents its credential.

use chrono::{DateTime, Utc};
use clap::Subcommand;

use crate::pairing::{DeviceRecord, DeviceRegistry};

#[derive(Subcommand, Debug, Clone)]
pub enum DevicesCommand {
    /// List connected devices
    List,

    /// Revoke one device
    Revoke {
        /// Device id as shown by `devices list`
        device_id: String,
    },

    /// Revoke every device
    RevokeAll {
        /// Skip confirmation
        #[arg(long)]
        force: bool,
    },
}

/// Run a devices command against `registry`.
pub async fn run_devices_command(
    cmd: DevicesCommand,
    registry: &DeviceRegistry,
) -> anyhow::Result<()> {
    match cmd {
        DevicesCommand::List => {
            let devices = registry.list_devices().await;
            print!(
                "{}",
                format_devices(&devices, registry.max_devices(), Utc::now())
            );
        }
        DevicesCommand::Revoke { device_id } => {
            if !registry.revoke_device(&device_id).await {
                anyhow::bail!("No device with id '{}'", device_id);
            }
            println!("Revoked device {}", device_id);
        }
        DevicesCommand::RevokeAll { force } => {
            let count = registry.device_count().await;
            if count == 0 {
                println!("No devices connected.");
                return Ok(());
            }
            if !force {
                anyhow::bail!(
                    "Refusing to revoke {} device(s) without --force",
                    count
                );
            }
            let removed = registry.revoke_all().await;
            println!("Revoked {} device(s)", removed);
        }
    }
    Ok(())
}

fn format_devices(devices: &[DeviceRecord], max_devices: usize, now: DateTime<Utc>) -> String {
    if devices.is_empty() {
        return format!("No devices connected (limit {}).\n", max_devices);
    }

    let mut out = format!("Connected devices ({}/{}):\n\n", devices.len(), max_devices);
    for device in devices {
        out.push_str(&format!("  {}  {}\n", device.device_id, device.name));
        out.push_str(&format!("    Connected: {}\n", device.connected_at.to_rfc3339()));
        out.push_str(&format!(
            "    Last seen: {} ({})\n",
            device.last_seen.to_rfc3339(),
            ago(now, device.last_seen)
        ));
    }
    out
}

fn ago(now: DateTime<Utc>, then: DateTime<Utc>) -> String {
    let secs = now.signed_duration_since(then).num_seconds().max(0);
    match secs {
        0..60 => format!("{}s ago", secs),
        60..3600 => format!("{}m ago", secs / 60),
        3600..86400 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86400),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeDelta;
    use tempfile::TempDir;

    use super::*;
    use crate::clock::SystemClock;
    use crate::pairing::{DeviceCredential, PersistenceStore};

    async fn registry_with(dir: &TempDir, ids: &[&str]) -> DeviceRegistry {
        let registry = DeviceRegistry::open(
            PersistenceStore::new(dir.path().join("auth_data.json")),
            5,
            Arc::new(SystemClock),
        );
        let now = Utc::now();
        for id in ids {
            registry
                .add_device(
                    DeviceCredential::issue(*id, "Phone", now, TimeDelta::days(30)),
                    DeviceRecord::connected(*id, "Phone", now),
                )
                .await
                .unwrap();
        }
        registry
    }

    #[test]
    fn test_format_empty_list() {
        assert_eq!(
            format_devices(&[], 5, Utc::now()),
            "No devices connected (limit 5).\n"
        );
    }

    #[test]
    fn test_format_lists_devices() {
        let now = Utc::now();
        let record = DeviceRecord::connected("abc", "Laptop", now - TimeDelta::hours(2));
        let out = format_devices(&[record], 3, now);
        assert!(out.starts_with("Connected devices (1/3):"));
        assert!(out.contains("abc  Laptop"));
        assert!(out.contains("(2h ago)"));
    }

    #[test]
    fn test_ago_buckets() {
        let now = Utc::now();
        assert_eq!(ago(now, now), "0s ago");
        assert_eq!(ago(now, now - TimeDelta::minutes(5)), "5m ago");
        assert_eq!(ago(now, now - TimeDelta::days(3)), "3d ago");
        assert_eq!(ago(now, now + TimeDelta::minutes(1)), "0s ago");
    }

    #[tokio::test]
    async fn test_revoke_command() {
        let dir = TempDir::new().unwrap();
        let registry = registry_with(&dir, &["a", "b"]).await;

        run_devices_command(
            DevicesCommand::Revoke {
                device_id: "a".into(),
            },
            &registry,
        )
        .await
        .unwrap();
        assert!(registry.get_device("a").await.is_none());

        let err = run_devices_command(
            DevicesCommand::Revoke {
                device_id: "missing".into(),
            },
            &registry,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[tokio::test]
    async fn test_revoke_all_requires_force() {
        let dir = TempDir::new().unwrap();
        let registry = registry_with(&dir, &["a", "b"]).await;

        assert!(
            run_devices_command(DevicesCommand::RevokeAll { force: false }, &registry)
                .await
                .is_err()
        );
        assert_eq!(registry.device_count().await, 2);

        run_devices_command(DevicesCommand::RevokeAll { force: true }, &registry)
            .await
            .unwrap();
        assert_eq!(registry.device_count().await, 0);
    }
}
