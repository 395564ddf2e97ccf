//! Service configuration read from environment variables.
//!
//! Every key has a default; malformed values are rejected with a [`ConfigError`]
//! so the process can exit before the event core starts.

use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use url::Url;

pub const ENV_HOST: &str = "HOST";
pub const ENV_RCV_PORT: &str = "RCV_PORT";
pub const ENV_RCV_PATH: &str = "RCV_PATH";
pub const ENV_HEALTH_PORT: &str = "HEALTH_PORT";
pub const ENV_GRACE_PERIOD_SECONDS: &str = "GRACE_PERIOD_SECONDS";
pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";
pub const ENV_SYNCHRONIZE_SERVICES: &str = "SYNCHRONIZE_SERVICES";
pub const ENV_SYNCHRONIZE_INTERVAL_SECONDS: &str = "SYNCHRONIZE_INTERVAL_SECONDS";

// Reference handler targets
pub const ENV_FORWARD_URL: &str = "FORWARD_URL";
pub const ENV_REPLY_URL: &str = "REPLY_URL";

pub const DEFAULT_RCV_PORT: u16 = 8080;
pub const DEFAULT_RCV_PATH: &str = "/";
pub const DEFAULT_HEALTH_PORT: u16 = 8070;
pub const DEFAULT_GRACE_PERIOD_SECONDS: u64 = 20;
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_SYNCHRONIZE_INTERVAL_SECONDS: u64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} must be a {expected}, got '{value}'")]
    InvalidValue {
        key: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("{key} is not a valid URL: {source}")]
    InvalidUrl {
        key: &'static str,
        #[source]
        source: url::ParseError,
    },

    #[error("RCV_PATH must start with '/', got '{0}'")]
    InvalidPath(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub path: String,
    pub health_port: u16,
    pub grace_period_seconds: u64,
    pub log_level: String,
    pub synchronize_services: bool,
    pub synchronize_interval: Duration,
    pub forward_url: Option<Url>,
    pub reply_url: Option<Url>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_RCV_PORT,
            path: DEFAULT_RCV_PATH.to_string(),
            health_port: DEFAULT_HEALTH_PORT,
            grace_period_seconds: DEFAULT_GRACE_PERIOD_SECONDS,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            synchronize_services: false,
            synchronize_interval: Duration::from_secs(DEFAULT_SYNCHRONIZE_INTERVAL_SECONDS),
            forward_url: None,
            reply_url: None,
        }
    }
}

impl Config {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads the configuration through `lookup`, which returns the raw value of a
    /// key or `None` when unset. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let defaults = Self::default();

        let path = get(ENV_RCV_PATH).unwrap_or(defaults.path);
        if !path.starts_with('/') {
            return Err(ConfigError::InvalidPath(path));
        }

        Ok(Self {
            host: parse_or(get(ENV_HOST), ENV_HOST, "valid IP address", defaults.host)?,
            port: parse_or(get(ENV_RCV_PORT), ENV_RCV_PORT, "port number", defaults.port)?,
            path,
            health_port: parse_or(
                get(ENV_HEALTH_PORT),
                ENV_HEALTH_PORT,
                "port number",
                defaults.health_port,
            )?,
            grace_period_seconds: parse_or(
                get(ENV_GRACE_PERIOD_SECONDS),
                ENV_GRACE_PERIOD_SECONDS,
                "non-negative number of seconds",
                defaults.grace_period_seconds,
            )?,
            log_level: get(ENV_LOG_LEVEL).unwrap_or(defaults.log_level),
            synchronize_services: match get(ENV_SYNCHRONIZE_SERVICES) {
                Some(value) => parse_bool(ENV_SYNCHRONIZE_SERVICES, &value)?,
                None => defaults.synchronize_services,
            },
            synchronize_interval: Duration::from_secs(parse_or(
                get(ENV_SYNCHRONIZE_INTERVAL_SECONDS),
                ENV_SYNCHRONIZE_INTERVAL_SECONDS,
                "non-negative number of seconds",
                DEFAULT_SYNCHRONIZE_INTERVAL_SECONDS,
            )?),
            forward_url: parse_url(get(ENV_FORWARD_URL), ENV_FORWARD_URL)?,
            reply_url: parse_url(get(ENV_REPLY_URL), ENV_REPLY_URL)?,
        })
    }

    pub fn receiver_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn health_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.health_port)
    }
}

fn parse_or<T: FromStr>(
    raw: Option<String>,
    key: &'static str,
    expected: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue {
                key,
                value,
                expected,
            }),
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
            expected: "boolean",
        }),
    }
}

fn parse_url(raw: Option<String>, key: &'static str) -> Result<Option<Url>, ConfigError> {
    raw.map(|value| {
        Url::parse(value.trim()).map_err(|source| ConfigError::InvalidUrl { key, source })
    })
    .transpose()
}
