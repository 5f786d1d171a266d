use std::{net::SocketAddr, str::FromStr, time::Duration};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("invalid value for {key}: {value:?}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
}

/// Runtime configuration, read from the environment (and `.env` if present).
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub db_path: String,
    pub session_db_path: String,
    pub frontend_url: String,
    pub portfolio_cache_ttl: Duration,
    pub starting_balance: Decimal,
    pub catalog_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            db_path: "db.sqlite".to_string(),
            session_db_path: "sessions.db".to_string(),
            frontend_url: "http://localhost:5173".to_string(),
            portfolio_cache_ttl: Duration::from_secs(300),
            starting_balance: dec!(100000),
            catalog_path: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        let defaults = Self::default();

        Ok(Self {
            listen_addr: parse_var("STOCKDESK_LISTEN_ADDR")?.unwrap_or(defaults.listen_addr),
            db_path: dotenv::var("STOCKDESK_DB_PATH").unwrap_or(defaults.db_path),
            session_db_path: dotenv::var("STOCKDESK_SESSION_DB_PATH")
                .unwrap_or(defaults.session_db_path),
            frontend_url: dotenv::var("FRONTEND_URL").unwrap_or(defaults.frontend_url),
            portfolio_cache_ttl: parse_var("STOCKDESK_PORTFOLIO_CACHE_TTL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.portfolio_cache_ttl),
            starting_balance: parse_var("STOCKDESK_STARTING_BALANCE")?
                .unwrap_or(defaults.starting_balance),
            catalog_path: dotenv::var("STOCKDESK_CATALOG_PATH").ok(),
        })
    }
}

/// Reads and parses an optional variable. Unset is `None`, unparsable is an error.
fn parse_var<T: FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match dotenv::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError { key, value }),
        Err(_) => Ok(None),
    }
}
