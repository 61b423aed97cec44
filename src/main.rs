use color_eyre::{eyre::eyre, Result};
use opencomposite::composite::{load_composite_profiles, CompositeDeviceManager};
use opencomposite::config::ServiceConfig;
use opencomposite::mapping::CapabilityMapRegistry;
use opencomposite::target::LoggingTargetFactory;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

const CONFIG_ENV: &str = "OPENCOMPOSITE_CONFIG";

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config_path = std::env::var(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| ServiceConfig::default_path());
    let config = ServiceConfig::load(&config_path)
        .await
        .map_err(|e| eyre!("Failed to load {}: {}", config_path.display(), e))?;
    setup_logging_env(config.level()?);
    info!("Using config {}", config_path.display());

    let maps = CapabilityMapRegistry::load_dirs(&config.capability_map_dirs).await;
    let profiles = load_composite_profiles(&config.device_dirs).await;
    if profiles.is_empty() {
        warn!("No composite device profiles found in {:?}", config.device_dirs);
    }

    let (manager, manager_handle) = CompositeDeviceManager::spawn(
        profiles,
        maps,
        Arc::new(LoggingTargetFactory),
        &config,
    );

    // Beenden über Ctrl+C
    let token = CancellationToken::new();
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C"),
            Err(e) => error!("Unable to listen for shutdown signal: {}", e),
        }
        ctrl_c_token.cancel();
    });

    info!("Waiting for devices");
    token.cancelled().await;

    for status in manager.list_instances().await? {
        info!("'{}' was {}", status.name, status.state);
    }
    manager.shutdown().await?;
    manager_handle
        .await
        .map_err(|e| eyre!("Manager task failed: {}", e))?;
    info!("Shutdown complete");
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    Ok(())
}

fn setup_logging_env(level: Level) {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
