use anyhow::Context;
use limbo_keeper::Keeper;
use limbo_keeper::config::load_config;
use limbo_logger::Logger;
use std::path::PathBuf;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args_os().nth(1).map(PathBuf::from);
    let cfg = load_config(path.as_deref()).context("Critical: Configuration is malformed")?;

    let _log = Logger::from_settings(env!("CARGO_PKG_NAME"), &cfg.log)?;

    Keeper::builder().config(cfg.storage).build().await?.run().await
}
