use std::{env, fmt::Display, str::FromStr, time::Duration};

use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" | "mem" => Ok(StoreBackend::Memory),
            other => Err(format!("unknown store backend '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub store_backend: StoreBackend,
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub request_timeout: Duration,
    pub body_limit: usize,
}

impl Config {
    pub fn load() -> Self {
        Self {
            port: try_load("PORT", 8081),
            store_backend: try_load("STORE_BACKEND", StoreBackend::Postgres),
            database_url: env::var("DATABASE_URL").ok(),
            max_connections: try_load("DATABASE_MAX_CONNECTIONS", 10),
            request_timeout: Duration::from_secs(try_load("REQUEST_TIMEOUT_SECS", 30)),
            body_limit: try_load("BODY_LIMIT_BYTES", 1024 * 1024),
        }
    }
}

fn try_load<T>(key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Debug,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => parse_or(key, &raw, default),
        Err(_) => {
            info!("{key} not set, using default: {default:?}");
            default
        }
    }
}

fn parse_or<T>(key: &str, raw: &str, default: T) -> T
where
    T: FromStr + std::fmt::Debug,
    T::Err: Display,
{
    raw.trim().parse().unwrap_or_else(|e| {
        warn!("Invalid {key} value '{raw}': {e}, using default: {default:?}");
        default
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_values_fall_back() {
        assert_eq!(parse_or("PORT", "not-a-port", 8081u16), 8081);
        assert_eq!(parse_or("PORT", " 9000 ", 8081u16), 9000);
        assert_eq!(
            parse_or("STORE_BACKEND", "Memory", StoreBackend::Postgres),
            StoreBackend::Memory
        );
        assert_eq!(
            parse_or("STORE_BACKEND", "redis", StoreBackend::Postgres),
            StoreBackend::Postgres
        );
    }
}
