use std::env;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value}")]
    InvalidNumber { name: &'static str, value: String },

    #[error("{name} must be greater than zero")]
    Zero { name: &'static str },

    #[error("{name} must be an http(s) url, got {value}")]
    InvalidUrl { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Default: https://hacker-news.firebaseio.com/v0
    pub hn_api_url: String,
    /// Default: https://hn.algolia.com/api/v1
    pub search_api_url: String,
    pub request_timeout: Duration,
    /// Default: 50
    pub rate_limit_rps: u32,
    pub item_cache_ttl: Duration,
    /// Idle time after which the server drops a pagination session. Default: 1800s
    pub session_idle_ttl: Duration,
    /// Default: 3000
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hn_api_url: "https://hacker-news.firebaseio.com/v0".to_string(),
            search_api_url: "https://hn.algolia.com/api/v1".to_string(),
            request_timeout: Duration::from_millis(10_000),
            rate_limit_rps: 50,
            item_cache_ttl: Duration::from_secs(300),
            session_idle_ttl: Duration::from_secs(1800),
            port: 3000,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the config from an arbitrary variable source; unset values keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let hn_api_url = url_var(&lookup, "HN_API_URL")?.unwrap_or(defaults.hn_api_url);
        let search_api_url =
            url_var(&lookup, "SEARCH_API_URL")?.unwrap_or(defaults.search_api_url);

        let request_timeout = match positive_var::<u64, _>(&lookup, "REQUEST_TIMEOUT_MS")? {
            Some(ms) => Duration::from_millis(ms),
            None => defaults.request_timeout,
        };
        let rate_limit_rps =
            positive_var(&lookup, "RATE_LIMIT_RPS")?.unwrap_or(defaults.rate_limit_rps);
        let item_cache_ttl = match positive_var::<u64, _>(&lookup, "ITEM_CACHE_TTL_SECS")? {
            Some(secs) => Duration::from_secs(secs),
            None => defaults.item_cache_ttl,
        };
        let session_idle_ttl = match positive_var::<u64, _>(&lookup, "SESSION_IDLE_SECS")? {
            Some(secs) => Duration::from_secs(secs),
            None => defaults.session_idle_ttl,
        };
        let port = positive_var(&lookup, "PORT")?.unwrap_or(defaults.port);

        Ok(Self {
            hn_api_url,
            search_api_url,
            request_timeout,
            rate_limit_rps,
            item_cache_ttl,
            session_idle_ttl,
            port,
        })
    }
}

fn url_var<F>(lookup: &F, name: &'static str) -> Result<Option<String>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(value) if value.starts_with("http://") || value.starts_with("https://") => {
            Ok(Some(value))
        }
        Some(value) => Err(ConfigError::InvalidUrl { name, value }),
    }
}

fn positive_var<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr + Default + PartialEq,
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = lookup(name) else {
        return Ok(None);
    };
    let parsed = value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidNumber {
            name,
            value: value.clone(),
        })?;
    if parsed == T::default() {
        return Err(ConfigError::Zero { name });
    }
    Ok(Some(parsed))
}
