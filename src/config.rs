use std::{env, fmt::Display, path::PathBuf, str::FromStr, time::Duration};

use thiserror::Error;
use tracing::info;

use crate::web::session::MAX_SESSION_TTL;

#[derive(Debug, Error)]
#[error("invalid {key} value {value:?}: {reason}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub compact_threshold: u64,
    pub session_ttl: Duration,
    pub metrics_port: Option<u16>,
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
    pub seed_facilities: bool,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup. Unset keys take their default; set but
    /// unparsable keys are an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let ttl_secs: u64 = try_load(&lookup, "CAMPUSBOOK_SESSION_TTL_SECS", "86400")?;
        if ttl_secs == 0 || ttl_secs > MAX_SESSION_TTL.as_secs() {
            return Err(ConfigError {
                key: "CAMPUSBOOK_SESSION_TTL_SECS",
                value: ttl_secs.to_string(),
                reason: format!("must be between 1 and {}", MAX_SESSION_TTL.as_secs()),
            });
        }
        Ok(Self {
            bind: try_load(&lookup, "CAMPUSBOOK_BIND", "0.0.0.0")?,
            port: try_load(&lookup, "CAMPUSBOOK_PORT", "3000")?,
            data_dir: try_load(&lookup, "CAMPUSBOOK_DATA_DIR", "./data")?,
            compact_threshold: try_load(&lookup, "CAMPUSBOOK_COMPACT_THRESHOLD", "1000")?,
            session_ttl: Duration::from_secs(ttl_secs),
            metrics_port: optional(&lookup, "CAMPUSBOOK_METRICS_PORT")?,
            admin_email: optional(&lookup, "CAMPUSBOOK_ADMIN_EMAIL")?,
            admin_password: optional(&lookup, "CAMPUSBOOK_ADMIN_PASSWORD")?,
            seed_facilities: try_load(&lookup, "CAMPUSBOOK_SEED_FACILITIES", "false")?,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("campusbook.wal")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 3000,
            data_dir: PathBuf::from("./data"),
            compact_threshold: 1000,
            session_ttl: Duration::from_secs(86_400),
            metrics_port: None,
            admin_email: None,
            admin_password: None,
            seed_facilities: false,
        }
    }
}

fn parse<T: FromStr>(key: &'static str, value: String) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError {
        key,
        reason: e.to_string(),
        value,
    })
}

fn try_load<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: &str,
) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    let value = lookup(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });
    parse(key, value)
}

fn optional<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T::Err: Display,
{
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => parse(key, value).map(Some),
        _ => Ok(None),
    }
}
