use anyhow::Result;
use common::config::OzoneConfig;
use datanode::DatanodeService;
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
    let root = std::env::var("OZONE_DATANODE_DIR").unwrap_or_else(|_| "datanode-data".to_string());

    let _service = DatanodeService::start(config, root).await?;

    tokio::signal::ctrl_c().await?;
    Ok(())
}
