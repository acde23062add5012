//! Server configuration
//!
//! Loaded from environment variables (a `.env` file is honored), with defaults
//! matching a single-node deployment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the HTTP/WebSocket listener binds to
    pub bind_addr: SocketAddr,
    /// Directory holding per-session source and binary artifacts
    pub artifact_dir: PathBuf,
    /// Directory with the static editor assets
    pub public_dir: PathBuf,
    /// Input-wait settings shared by every session
    pub probe: ProbeConfig,
    /// How long a shared snippet stays retrievable (default: 1 hour)
    pub share_ttl: Duration,
    /// Interval of the expired-share sweep (default: 10 minutes)
    pub share_sweep_interval: Duration,
}

/// Timing of the dynamic input-wait heuristic
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Delay after process start before the first prompt (default: 100ms)
    pub initial_delay: Duration,
    /// Quiet period after an output burst before prompting (default: 50ms)
    pub idle_delay: Duration,
    /// Also prompt as soon as output contains the word "Enter"
    pub prompt_on_enter_text: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            idle_delay: Duration::from_millis(50),
            prompt_on_enter_text: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 10000)),
            artifact_dir: PathBuf::from("./artifacts"),
            public_dir: PathBuf::from("./public"),
            probe: ProbeConfig::default(),
            share_ttl: Duration::from_secs(3600),
            share_sweep_interval: Duration::from_secs(600),
        }
    }
}

impl ServerConfig {
    /// Build the configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let host = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env_parse("PORT", 10000)?;
        let bind_addr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("Invalid listen address {}:{}", host, port))?;

        let artifact_dir = std::env::var("ARTIFACT_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.artifact_dir);
        let public_dir = std::env::var("PUBLIC_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.public_dir);

        let probe = ProbeConfig {
            initial_delay: Duration::from_millis(env_parse("INPUT_PROBE_INITIAL_MS", 100)?),
            idle_delay: Duration::from_millis(env_parse("INPUT_PROBE_IDLE_MS", 50)?),
            prompt_on_enter_text: env_flag("PROMPT_ON_ENTER_TEXT"),
        };

        Ok(Self {
            bind_addr,
            artifact_dir,
            public_dir,
            probe,
            share_ttl: Duration::from_secs(env_parse("SHARE_TTL_SECS", 3600)?),
            share_sweep_interval: Duration::from_secs(env_parse("SHARE_SWEEP_SECS", 600)?),
        })
    }
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Invalid value for {}: {}", key, raw)),
        Err(_) => Ok(default),
    }
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}
