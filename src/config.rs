//! Runtime configuration read from environment variables.
//!
//! | Variable             | Default                         |
//! |----------------------|---------------------------------|
//! | `HOST`               | `0.0.0.0`                       |
//! | `PORT`               | `8080`                          |
//! | `DATA_DIR`           | `<platform data dir>/igc-logbook` |
//! | `STORE_BACKEND`      | `duckdb` (or `memory`)          |
//! | `TICKER_PAGE_SIZE`   | `5`                             |
//! | `FETCH_TIMEOUT_SECS` | `40`                            |

use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

use crate::ticker::DEFAULT_PAGE_SIZE;

/// Maximum time allowed for downloading a single track file (seconds)
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 40;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    DuckDb,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "duckdb" => Ok(Self::DuckDb),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown store backend '{}', expected duckdb or memory", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub backend: StoreBackend,
    pub page_size: usize,
    pub fetch_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup (the process environment in production)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = parse_var(&lookup, "PORT", 8080u16)?;

        let data_dir = lookup("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::data_dir()
                    .unwrap_or_else(|| PathBuf::from("/data"))
                    .join("igc-logbook")
            });

        let backend = parse_var(&lookup, "STORE_BACKEND", StoreBackend::DuckDb)?;

        let page_size = parse_var(&lookup, "TICKER_PAGE_SIZE", DEFAULT_PAGE_SIZE)?;
        if page_size == 0 {
            return Err(ConfigError::Invalid {
                key: "TICKER_PAGE_SIZE",
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        let fetch_timeout_secs = parse_var(&lookup, "FETCH_TIMEOUT_SECS", DEFAULT_FETCH_TIMEOUT_SECS)?;

        Ok(Self {
            host,
            port,
            data_dir,
            backend,
            page_size,
            fetch_timeout_secs,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => {
            let parsed = value.trim().parse::<T>();
            parsed.map_err(|e| ConfigError::Invalid {
                key,
                reason: e.to_string(),
                value,
            })
        }
    }
}
