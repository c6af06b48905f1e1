use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use hostpair::cli::{Cli, Command, run_devices_command};
use hostpair::clock::SystemClock;
use hostpair::config::PairingConfig;
use hostpair::pairing::{DeviceRegistry, PairingService, PersistenceStore};
use hostpair::web;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hostpair=info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    let config = PairingConfig::from_env()?;

    match cli.command {
        Some(Command::Devices(cmd)) => {
            let registry = DeviceRegistry::open(
                PersistenceStore::new(&config.data_path),
                config.max_devices,
                Arc::new(SystemClock),
            );
            run_devices_command(cmd, &registry).await
        }
        Some(Command::Serve { initial_pairing }) => serve(config, initial_pairing).await,
        None => serve(config, true).await,
    }
}

async fn serve(config: PairingConfig, initial_pairing: bool) -> anyhow::Result<()> {
    if config.ephemeral_secret {
        tracing::warn!(
            "AUTH_SECRET_KEY is not set; using a random key. \
             Device credentials will stop working after a restart."
        );
    }

    let service = PairingService::new(&config);
    tracing::info!(
        path = %config.data_path.display(),
        devices = service.registry().device_count().await,
        max_devices = config.max_devices,
        "Device registry loaded"
    );

    let cleanup = Arc::clone(service.flow()).spawn_cleanup_task(CLEANUP_INTERVAL);

    if initial_pairing {
        let ticket = service.flow().initiate(Some("Initial pairing")).await?;
        match &ticket.connection_url {
            Some(url) => println!("Pair a device by opening:\n  {}\n", url),
            None => println!("Pairing token:\n  {}\n", ticket.token),
        }
        println!("Valid until {}", ticket.expires_at.to_rfc3339());
    }

    let app = web::router(&service, Router::new());
    let result = web::serve(&config.bind_addr(), app, shutdown_signal()).await;

    cleanup.abort();
    result.map_err(Into::into)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
