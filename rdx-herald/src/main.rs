use anyhow::{Context, Result};
use herald::memory::{collaborators, MemoryPlatform, MemoryStore};
use herald::prelude::*;
use herald::{ENGINE_NAME, VERSION};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize structured logging, honouring RUST_LOG.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    // 2. Load the configuration from an optional TOML path plus HERALD_* variables.
    let path = std::env::args().nth(1).map(PathBuf::from);
    let config = HeraldConfig::load(path.as_deref())
        .with_context(|| format!("loading configuration from {:?}", path))?;
    info!("{} v{} with {} configured channel(s)", ENGINE_NAME, VERSION, config.channels.len());

    // 3. Create the engine over the in-memory collaborators.
    let collab = collaborators(Arc::new(MemoryStore::new()), Arc::new(MemoryPlatform::new()));
    let engine = HeraldEngine::new(config, collab);

    // 4. Log everything the dispatcher does.
    spawn_event_listener(&engine);

    // 5. Run the engine until Ctrl+C.
    engine.run().await?;

    Ok(())
}

fn spawn_event_listener(engine: &HeraldEngine) {
    let mut events = engine.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                HeraldEvent::TimedOut { id } => warn!("[ENGINE] entry {} timed out", id),
                HeraldEvent::ScanFailed { reason } => warn!("[ENGINE] scan failed: {}", reason),
                other => info!("[ENGINE] => {:?}", other),
            }
        }
    });
}
