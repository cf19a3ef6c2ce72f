//! Connectivity probe.
//!
//! Usage: `rkv-probe [key]`
//!
//! Loads settings from the environment (and `.env.$ENV`), pings the store and
//! optionally prints the decoded value of `key`.

use anyhow::{Context, Result};
use rkv_client::{KVClient, RedisSettings};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let key = std::env::args().nth(1);

    let settings = RedisSettings::from_env().context("failed to load redis settings")?;
    let client = KVClient::connect(settings).context("failed to set up redis client")?;
    info!(mode = client.mode().as_str(), "client ready");

    let alive = client.ping().await.context("ping failed")?;
    println!("ping: {}", if alive { "PONG" } else { "unreachable" });

    if let Some(key) = key {
        let value = client.get(&key).await.context("get failed")?;
        println!("{key} = {value}");
    }

    client.close();
    if alive {
        Ok(())
    } else {
        anyhow::bail!("store did not answer ping")
    }
}
