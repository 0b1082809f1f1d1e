use anyhow::Context;
use clap::Parser;
use tracing::info;

use pixel_streamer::{config::Config, streamer, util::init_log};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    init_log(&config.log);

    info!(
        "Starting streamer '{}', relay {}",
        config.streamer_id, config.relay_url
    );
    streamer::run(config).await.context("streamer stopped")?;

    Ok(())
}
