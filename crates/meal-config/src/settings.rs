//! Typed service settings read out of the merged config JSON.
//!
//! Every key is optional; absent keys take the defaults below. Present keys
//! with the wrong type or an unknown enum value are errors, so a typo in a
//! layer fails at boot instead of silently falling back.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8088";
pub const DEFAULT_DATABASE_URL_ENV: &str = "MEAL_DATABASE_URL";

const DEFAULT_CORS_ORIGINS: &[&str] = &[
    "http://localhost",
    "http://127.0.0.1",
    "http://localhost:3000",
    "http://127.0.0.1:3000",
    "http://localhost:5173",
    "http://127.0.0.1:5173",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusPolicySetting {
    Lenient,
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSettings {
    pub bind_addr: SocketAddr,
    pub heartbeat: Duration,
    pub cors_origins: Vec<String>,
    pub fanout_capacity: usize,
    pub status_policy: StatusPolicySetting,
    pub store_backend: StoreBackend,
    /// Name of the env var holding the database URL (never the URL itself).
    pub database_url_env: String,
    pub retry_max_attempts: u32,
    pub retry_backoff: Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8088)),
            heartbeat: Duration::from_secs(15),
            cors_origins: DEFAULT_CORS_ORIGINS.iter().map(|s| s.to_string()).collect(),
            fanout_capacity: 1024,
            status_policy: StatusPolicySetting::Lenient,
            store_backend: StoreBackend::Memory,
            database_url_env: DEFAULT_DATABASE_URL_ENV.to_string(),
            retry_max_attempts: 3,
            retry_backoff: Duration::from_millis(50),
        }
    }
}

impl ServiceSettings {
    pub fn from_config_json(config: &Value) -> Result<Self> {
        let mut s = Self::default();

        if let Some(addr) = opt_str(config, "/daemon/bind_addr")? {
            s.bind_addr = addr
                .parse()
                .with_context(|| format!("/daemon/bind_addr is not a socket address: {addr}"))?;
        }
        if let Some(secs) = opt_u64(config, "/daemon/heartbeat_secs")? {
            if secs == 0 {
                bail!("/daemon/heartbeat_secs must be > 0");
            }
            s.heartbeat = Duration::from_secs(secs);
        }
        if let Some(v) = config.pointer("/daemon/cors_origins") {
            let arr = v
                .as_array()
                .ok_or_else(|| anyhow!("/daemon/cors_origins must be a list of strings"))?;
            s.cors_origins = arr
                .iter()
                .map(|o| {
                    o.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| anyhow!("/daemon/cors_origins entries must be strings"))
                })
                .collect::<Result<_>>()?;
        }
        if let Some(cap) = opt_u64(config, "/fanout/capacity")? {
            if cap == 0 {
                bail!("/fanout/capacity must be > 0");
            }
            s.fanout_capacity = cap as usize;
        }
        if let Some(p) = opt_str(config, "/delivery/status_policy")? {
            s.status_policy = match p.as_str() {
                "lenient" => StatusPolicySetting::Lenient,
                "strict" => StatusPolicySetting::Strict,
                other => bail!("/delivery/status_policy must be lenient|strict, got {other:?}"),
            };
        }
        if let Some(b) = opt_str(config, "/store/backend")? {
            s.store_backend = match b.as_str() {
                "memory" => StoreBackend::Memory,
                "postgres" => StoreBackend::Postgres,
                other => bail!("/store/backend must be memory|postgres, got {other:?}"),
            };
        }
        if let Some(name) = opt_str(config, "/store/database_url_env")? {
            s.database_url_env = name;
        }
        if let Some(n) = opt_u64(config, "/store/retry/max_attempts")? {
            if n == 0 {
                bail!("/store/retry/max_attempts must be >= 1");
            }
            s.retry_max_attempts = u32::try_from(n).context("/store/retry/max_attempts too large")?;
        }
        if let Some(ms) = opt_u64(config, "/store/retry/backoff_ms")? {
            s.retry_backoff = Duration::from_millis(ms);
        }

        Ok(s)
    }

    /// `MEAL_DAEMON_ADDR` wins over the configured bind address.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(raw) = std::env::var("MEAL_DAEMON_ADDR") {
            self.bind_addr = raw
                .parse()
                .with_context(|| format!("MEAL_DAEMON_ADDR is not a socket address: {raw}"))?;
        }
        Ok(self)
    }
}

fn opt_str(config: &Value, pointer: &str) -> Result<Option<String>> {
    match config.pointer(pointer) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(_) => bail!("{pointer} must be a string"),
    }
}

fn opt_u64(config: &Value, pointer: &str) -> Result<Option<u64>> {
    match config.pointer(pointer) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(Some)
            .ok_or_else(|| anyhow!("{pointer} must be a non-negative integer")),
    }
}
