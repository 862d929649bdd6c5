use std::sync::Arc;

use anyhow::Result;
use common::config::OzoneConfig;
use ksm::{KeySpaceManager, KsmMetrics, ScmBlockAllocator};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("OZONE_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = match std::env::var("OZONE_CONFIG") {
        Ok(path) => OzoneConfig::load(path)?,
        Err(_) => OzoneConfig::from_env(),
    };
    let dir = std::env::var("OZONE_KSM_DIR").unwrap_or_else(|_| "ksm-meta".to_string());

    let allocator = Arc::new(ScmBlockAllocator::new(
        config.scm_address.clone(),
        config.rpc_timeout(),
    ));
    let ksm = KeySpaceManager::open(config, dir, allocator, Arc::new(KsmMetrics::new()))?;
    ksm.start().await?;

    tokio::signal::ctrl_c().await?;
    Ok(())
}
