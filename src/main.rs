mod client;
mod config;
mod error;
mod mirror;
mod models;

use std::sync::Arc;

use anyhow::{Context, Result};
use client::TvClient;
use config::Config;
use dotenvy::dotenv;
use mirror::Mirror;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cfg = Config::from_env()?;
    let base = if cfg.live { client::LIVE_BASE } else { client::DEMO_BASE };
    info!("api base: {base}");

    let http = reqwest::Client::builder()
        .timeout(cfg.http_timeout)
        .build()
        .context("building http client")?;

    let leader = Arc::new(TvClient::new(base, cfg.leader.clone(), http.clone()));
    let follower = Arc::new(TvClient::new(base, cfg.follower.clone(), http));

    // Fail fast on bad credentials before entering the loop.
    leader
        .access_token()
        .await
        .context("leader authentication failed")?;
    follower
        .access_token()
        .await
        .context("follower authentication failed")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested; finishing current cycle");
            let _ = shutdown_tx.send(true);
        }
    });

    let mirror = Mirror::new(leader, follower, cfg.poll_interval, cfg.step_pause);
    mirror.run(shutdown_rx).await;

    Ok(())
}
