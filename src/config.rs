use std::path::PathBuf;
use std::str::FromStr;

use crate::calendar::Calendar;
use crate::engine::EngineConfig;
use crate::model::MINUTE_MS;

/// Server settings, read from `STUDIOBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub engine: EngineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "studiobook".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
            engine: EngineConfig::default(),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ConfigError {
    pub var: &'static str,
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.var, self.message)
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source. Unset variables keep their default;
    /// set but unparsable ones are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let window_minutes: i64 = parsed(&lookup, "STUDIOBOOK_CONFLICT_WINDOW_MINUTES")?.unwrap_or(60);
        if window_minutes < 0 {
            return Err(ConfigError {
                var: "STUDIOBOOK_CONFLICT_WINDOW_MINUTES",
                message: "must not be negative".into(),
            });
        }
        let conflict_radius = window_minutes.checked_mul(MINUTE_MS).ok_or_else(|| ConfigError {
            var: "STUDIOBOOK_CONFLICT_WINDOW_MINUTES",
            message: format!("{window_minutes} minutes does not fit in milliseconds"),
        })?;
        let offset_minutes: i32 = parsed(&lookup, "STUDIOBOOK_UTC_OFFSET_MINUTES")?.unwrap_or(0);
        let calendar = Calendar::with_offset_minutes(offset_minutes).ok_or_else(|| ConfigError {
            var: "STUDIOBOOK_UTC_OFFSET_MINUTES",
            message: format!("offset {offset_minutes} is outside ±24h"),
        })?;
        let max_connections = parsed(&lookup, "STUDIOBOOK_MAX_CONNECTIONS")?
            .unwrap_or(defaults.max_connections);
        if max_connections == 0 {
            return Err(ConfigError {
                var: "STUDIOBOOK_MAX_CONNECTIONS",
                message: "must be at least 1".into(),
            });
        }

        Ok(Self {
            port: parsed(&lookup, "STUDIOBOOK_PORT")?.unwrap_or(defaults.port),
            bind: lookup("STUDIOBOOK_BIND").unwrap_or(defaults.bind),
            data_dir: lookup("STUDIOBOOK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            password: lookup("STUDIOBOOK_PASSWORD").unwrap_or(defaults.password),
            max_connections,
            compact_threshold: parsed(&lookup, "STUDIOBOOK_COMPACT_THRESHOLD")?
                .unwrap_or(defaults.compact_threshold),
            metrics_port: parsed(&lookup, "STUDIOBOOK_METRICS_PORT")?,
            tls_cert: lookup("STUDIOBOOK_TLS_CERT"),
            tls_key: lookup("STUDIOBOOK_TLS_KEY"),
            engine: EngineConfig {
                conflict_radius,
                calendar,
            },
        })
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(var)
        .map(|raw| {
            raw.trim().parse().map_err(|e| ConfigError {
                var,
                message: format!("{raw:?}: {e}"),
            })
        })
        .transpose()
}
