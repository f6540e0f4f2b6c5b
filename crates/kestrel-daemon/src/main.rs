//! `kestreld` entry point.
//!
//! Loads configuration, builds the sandbox service and runs the expiry
//! janitor until Ctrl-C.

use kestrel_core::{Janitor, ListOptions, MemoryStore, SandboxFilter, SandboxService};
use kestrel_daemon::{KestrelConfig, LogFormat};
use kestrel_keys::{KeyManager, SshKeygenAuthority};
use kestrel_vm::VirshDriver;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("kestrel=info".parse()?);
    let (json, text) = match format {
        LogFormat::Json => (
            Some(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)),
            None,
        ),
        LogFormat::Text => (
            None,
            Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
        ),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(text)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config = KestrelConfig::load()?;
    init_tracing(config.log_format)?;

    tracing::info!("Starting Kestrel daemon");
    config.validate()?;
    config.validate_warn();

    if config.driver.ssh_ca_public_key.is_none() {
        let public = config.keys.ca_key_path.with_extension("pub");
        if let Ok(key) = tokio::fs::read_to_string(&public).await {
            tracing::info!(path = %public.display(), "Guests will trust the SSH CA");
            config.driver.ssh_ca_public_key = Some(key.trim().to_string());
        }
    }
    tracing::info!(?config, "Configuration loaded");

    let driver = Arc::new(VirshDriver::new(config.driver.clone())?);
    let store = Arc::new(MemoryStore::new());
    let mut service = SandboxService::new(driver, store, config.service.clone())?;

    if config.managed_credentials_available() {
        let ca = SshKeygenAuthority::new(
            &config.keys.ca_key_path,
            config.keys.max_ttl,
            config.keys.command_timeout,
        );
        ca.check_ca_key().await?;
        let keys = KeyManager::new(Arc::new(ca), config.keys.clone()).await?;
        service = service.with_key_provider(Arc::new(keys));
        tracing::info!(key_dir = %config.keys.key_dir.display(), "Managed SSH credentials enabled");
    }
    let service = Arc::new(service);

    let shutdown = CancellationToken::new();
    let janitor = tokio::spawn(Janitor::from_config(service.clone()).run(shutdown.clone()));

    tracing::info!(
        libvirt_uri = %config.driver.libvirt_uri,
        network = %config.service.network,
        "Daemon ready"
    );

    signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal, cleaning up...");

    shutdown.cancel();
    if let Err(e) = janitor.await {
        tracing::error!(error = %e, "Janitor task failed");
    }

    if config.destroy_on_exit {
        let sandboxes = service
            .list_sandboxes(&SandboxFilter::default(), &ListOptions::default())
            .await?;
        for sandbox in sandboxes {
            if let Err(e) = service.destroy_sandbox(&sandbox.id).await {
                tracing::error!(sandbox_id = %sandbox.id, error = %e, "Error during sandbox cleanup");
            }
        }
        tracing::info!("All sandboxes cleaned up");
    }

    tracing::info!("Daemon shutdown complete");
    Ok(())
}
