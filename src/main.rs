use std::path::PathBuf;

use anyhow::{Context, Result};
use chimer::Chimer;
use log::info;

fn data_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os("CHIMER_DATA_DIR") {
        return Ok(PathBuf::from(dir));
    }
    let home = std::env::var_os("HOME").context("HOME is not set; set CHIMER_DATA_DIR instead")?;
    Ok(PathBuf::from(home).join(".chimer"))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("chimer starting up...");

    let data_dir = data_dir()?;
    let engine = Chimer::bootstrap(&data_dir)?;
    engine.start().await?;
    info!("engine running, data in {}", data_dir.display());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("ctrl-c received, shutting down");
    engine.shutdown().await?;
    Ok(())
}
