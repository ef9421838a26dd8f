use std::fmt;
use std::path::PathBuf;

use chrono_tz::Tz;

use crate::engine::EngineSettings;
use crate::limits::MAX_PER_SLOT_LIMIT;

/// Server settings read from `RIDESLOT_*` environment variables.
#[derive(Debug, Clone)]
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
    pub engine: EngineSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    UnknownTimezone(String),
    InvalidDefaultCapacity(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::UnknownTimezone(tz) => write!(f, "RIDESLOT_TIMEZONE: unknown timezone {tz:?}"),
            ConfigError::InvalidDefaultCapacity(v) => write!(
                f,
                "RIDESLOT_DEFAULT_MAX_PER_SLOT: expected 1..={MAX_PER_SLOT_LIMIT}, got {v:?}"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = EngineSettings::default();

        let timezone = match var("RIDESLOT_TIMEZONE") {
            Some(name) => name
                .trim()
                .parse::<Tz>()
                .map_err(|_| ConfigError::UnknownTimezone(name.clone()))?,
            None => defaults.timezone,
        };
        let default_max_per_slot = match var("RIDESLOT_DEFAULT_MAX_PER_SLOT") {
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(n) if (1..=MAX_PER_SLOT_LIMIT).contains(&n) => n,
                Ok(_) => return Err(ConfigError::InvalidDefaultCapacity(raw)),
                Err(_) => defaults.default_max_per_slot,
            },
            None => defaults.default_max_per_slot,
        };

        Ok(Self {
            port: var("RIDESLOT_PORT").and_then(|s| s.parse().ok()).unwrap_or(5433),
            bind: var("RIDESLOT_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            data_dir: PathBuf::from(var("RIDESLOT_DATA_DIR").unwrap_or_else(|| "./data".into())),
            password: var("RIDESLOT_PASSWORD").unwrap_or_else(|| "rideslot".into()),
            max_connections: var("RIDESLOT_MAX_CONNECTIONS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(256),
            compact_threshold: var("RIDESLOT_COMPACT_THRESHOLD")
                .and_then(|s| s.parse().ok())
                .unwrap_or(1000),
            metrics_port: var("RIDESLOT_METRICS_PORT").and_then(|s| s.parse().ok()),
            tls_cert: var("RIDESLOT_TLS_CERT"),
            tls_key: var("RIDESLOT_TLS_KEY"),
            engine: EngineSettings { timezone, default_max_per_slot },
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.listen_addr(), "0.0.0.0:5433");
        assert_eq!(cfg.data_dir, PathBuf::from("./data"));
        assert_eq!(cfg.password, "rideslot");
        assert_eq!(cfg.max_connections, 256);
        assert_eq!(cfg.compact_threshold, 1000);
        assert_eq!(cfg.metrics_port, None);
        assert_eq!(cfg.engine.timezone, chrono_tz::Asia::Seoul);
        assert_eq!(cfg.engine.default_max_per_slot, 10);
    }

    #[test]
    fn overrides_are_read() {
        let cfg = Config::from_lookup(lookup(&[
            ("RIDESLOT_PORT", "6000"),
            ("RIDESLOT_BIND", "127.0.0.1"),
            ("RIDESLOT_METRICS_PORT", "9100"),
            ("RIDESLOT_TIMEZONE", "Europe/Berlin"),
            ("RIDESLOT_DEFAULT_MAX_PER_SLOT", "4"),
        ]))
        .unwrap();
        assert_eq!(cfg.listen_addr(), "127.0.0.1:6000");
        assert_eq!(cfg.metrics_port, Some(9100));
        assert_eq!(cfg.engine.timezone, chrono_tz::Europe::Berlin);
        assert_eq!(cfg.engine.default_max_per_slot, 4);
    }

    #[test]
    fn garbage_numbers_fall_back() {
        let cfg = Config::from_lookup(lookup(&[
            ("RIDESLOT_PORT", "http"),
            ("RIDESLOT_MAX_CONNECTIONS", "-3"),
            ("RIDESLOT_DEFAULT_MAX_PER_SLOT", "lots"),
        ]))
        .unwrap();
        assert_eq!(cfg.port, 5433);
        assert_eq!(cfg.max_connections, 256);
        assert_eq!(cfg.engine.default_max_per_slot, 10);
    }

    #[test]
    fn unknown_timezone_is_fatal() {
        let err = Config::from_lookup(lookup(&[("RIDESLOT_TIMEZONE", "Mars/Olympus")])).unwrap_err();
        assert_eq!(err, ConfigError::UnknownTimezone("Mars/Olympus".into()));
    }

    #[test]
    fn zero_default_capacity_is_fatal() {
        let err = Config::from_lookup(lookup(&[("RIDESLOT_DEFAULT_MAX_PER_SLOT", "0")])).unwrap_err();
        assert_eq!(err, ConfigError::InvalidDefaultCapacity("0".into()));
    }
}
