// Gateway configuration.
//
// Centralizes environment variable parsing with defaults for local
// development.

use std::net::SocketAddr;
use std::time::Duration;

use crate::db::pool::{
    PoolConfig, DEFAULT_ACQUIRE_TIMEOUT_SECS, DEFAULT_MAX_CONNECTIONS, DEFAULT_MIN_CONNECTIONS,
};

const DEFAULT_PORT: u16 = 5001;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Core gateway configuration.
///
/// Constructed via [`GatewayConfig::from_env`] which reads environment
/// variables and falls back to development defaults.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// PostgreSQL connection string. `None` selects the in-memory store.
    pub database_url: Option<String>,
    /// Comma-separated CORS origins (or `"*"` for any).
    pub cors_origins: Option<String>,
    /// Log filter directive (e.g. `info`, `parley_gateway=debug`).
    pub log_filter: String,
    pub log_format: LogFormat,
    pub pool: PoolConfig,
}

impl GatewayConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `PARLEY_GATEWAY_HOST` | `0.0.0.0` |
    /// | `PARLEY_GATEWAY_PORT` | `5001` |
    /// | `PARLEY_GATEWAY_DATABASE_URL` | *(none: in-memory store)* |
    /// | `PARLEY_GATEWAY_CORS_ORIGINS` | *(none: cors.rs uses dev defaults)* |
    /// | `PARLEY_GATEWAY_LOG_FILTER` | `info` |
    /// | `PARLEY_GATEWAY_LOG_FORMAT` | `text` |
    /// | `PARLEY_GATEWAY_DB_MIN_CONNECTIONS` | `2` |
    /// | `PARLEY_GATEWAY_DB_MAX_CONNECTIONS` | `20` |
    /// | `PARLEY_GATEWAY_DB_ACQUIRE_TIMEOUT_SECS` | `10` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("PARLEY_GATEWAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port = parse_or(&env, "PARLEY_GATEWAY_PORT", DEFAULT_PORT);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let database_url =
            env("PARLEY_GATEWAY_DATABASE_URL").ok().filter(|value| !value.trim().is_empty());
        let cors_origins = env("PARLEY_GATEWAY_CORS_ORIGINS").ok();
        let log_filter = env("PARLEY_GATEWAY_LOG_FILTER").unwrap_or_else(|_| "info".into());
        let log_format = match env("PARLEY_GATEWAY_LOG_FORMAT").ok().as_deref() {
            Some(value) if value.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        let pool = PoolConfig {
            min_connections: parse_or(
                &env,
                "PARLEY_GATEWAY_DB_MIN_CONNECTIONS",
                DEFAULT_MIN_CONNECTIONS,
            ),
            max_connections: parse_or(
                &env,
                "PARLEY_GATEWAY_DB_MAX_CONNECTIONS",
                DEFAULT_MAX_CONNECTIONS,
            ),
            acquire_timeout: Duration::from_secs(parse_or(
                &env,
                "PARLEY_GATEWAY_DB_ACQUIRE_TIMEOUT_SECS",
                DEFAULT_ACQUIRE_TIMEOUT_SECS,
            )),
        };

        Self { listen_addr, database_url, cors_origins, log_filter, log_format, pool }
    }
}

fn parse_or<F, T>(env: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
    T: std::str::FromStr,
{
    env(key).ok().and_then(|value| value.trim().parse().ok()).unwrap_or(default)
}
