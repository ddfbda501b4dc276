use anyhow::{anyhow, Context, Result};
use std::env;
use std::time::Duration;

/// One account's identity on the platform. Immutable for the process
/// lifetime; owned by exactly one session client.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub app_id: String,
    pub app_version: String,
    pub device_id: String,
    pub cid: i64,
    pub secret: String,
    // Orders placed under these credentials are booked to this account.
    pub account_id: i64,
}

impl Credentials {
    fn from_env(prefix: &str) -> Result<Self> {
        Ok(Self {
            username: var(prefix, "USERNAME")?,
            password: var(prefix, "PASSWORD")?,
            app_id: var(prefix, "APP_ID")?,
            app_version: var(prefix, "APP_VERSION")?,
            device_id: var(prefix, "DEVICE_ID")?,
            cid: parsed(prefix, "CID")?,
            secret: var(prefix, "SECRET")?,
            account_id: parsed(prefix, "ACCOUNT_ID")?,
        })
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub leader: Credentials,
    pub follower: Credentials,

    // false selects the demo environment
    pub live: bool,
    pub poll_interval: Duration,
    pub http_timeout: Duration,

    // Wait for Enter after each mirrored order; manual supervision only.
    pub step_pause: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            leader: Credentials::from_env("LEADER")?,
            follower: Credentials::from_env("FOLLOWER")?,
            live: flag("TV_USE_LIVE")?,
            poll_interval: Duration::from_secs(parsed_or("TV_POLL_SECS", 30)?),
            http_timeout: Duration::from_secs(parsed_or("TV_HTTP_TIMEOUT_SECS", 10)?),
            step_pause: flag("TV_STEP_PAUSE")?,
        })
    }
}

fn var(prefix: &str, key: &str) -> Result<String> {
    let name = format!("TV_{prefix}_{key}");
    env::var(&name).map_err(|_| anyhow!("missing env var {name}"))
}

fn parsed<T: std::str::FromStr>(prefix: &str, key: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(prefix, key)?
        .parse()
        .with_context(|| format!("invalid TV_{prefix}_{key}"))
}

fn parsed_or(name: &str, default: u64) -> Result<u64> {
    match env::var(name) {
        Ok(s) => s.parse().with_context(|| format!("invalid {name}")),
        Err(_) => Ok(default),
    }
}

fn flag(name: &str) -> Result<bool> {
    match env::var(name) {
        Ok(s) => s.parse().with_context(|| format!("invalid {name} (expected true/false)")),
        Err(_) => Ok(false),
    }
}
