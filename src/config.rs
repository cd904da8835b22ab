//! Process configuration from `CARBOOK_*` environment variables. Unset or
//! unparsable values fall back to the defaults.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    /// WAL appends between compactions.
    pub compact_threshold: u64,
    pub persist_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5000,
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            compact_threshold: 1000,
            persist_timeout: Duration::from_millis(5000),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            bind: lookup("CARBOOK_BIND").unwrap_or(defaults.bind),
            port: parse_var(&lookup, "CARBOOK_PORT").unwrap_or(defaults.port),
            data_dir: lookup("CARBOOK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            metrics_port: parse_var(&lookup, "CARBOOK_METRICS_PORT"),
            compact_threshold: parse_var(&lookup, "CARBOOK_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            persist_timeout: parse_var::<u64>(&lookup, "CARBOOK_PERSIST_TIMEOUT_MS")
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.persist_timeout),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("cars.wal")
    }
}

fn parse_var<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = from_pairs(&[]);
        assert_eq!(config, Config::default());
        assert_eq!(config.addr(), "0.0.0.0:5000");
        assert_eq!(config.wal_path(), PathBuf::from("./data/cars.wal"));
    }

    #[test]
    fn reads_every_variable() {
        let config = from_pairs(&[
            ("CARBOOK_BIND", "127.0.0.1"),
            ("CARBOOK_PORT", "8080"),
            ("CARBOOK_DATA_DIR", "/var/lib/carbook"),
            ("CARBOOK_METRICS_PORT", "9000"),
            ("CARBOOK_COMPACT_THRESHOLD", "50"),
            ("CARBOOK_PERSIST_TIMEOUT_MS", "250"),
        ]);
        assert_eq!(config.addr(), "127.0.0.1:8080");
        assert_eq!(config.wal_path(), PathBuf::from("/var/lib/carbook/cars.wal"));
        assert_eq!(config.metrics_port, Some(9000));
        assert_eq!(config.compact_threshold, 50);
        assert_eq!(config.persist_timeout, Duration::from_millis(250));
    }

    #[test]
    fn garbage_falls_back() {
        let config = from_pairs(&[
            ("CARBOOK_PORT", "eighty"),
            ("CARBOOK_METRICS_PORT", ""),
            ("CARBOOK_PERSIST_TIMEOUT_MS", "0"),
        ]);
        assert_eq!(config.port, 5000);
        assert_eq!(config.metrics_port, None);
        assert_eq!(config.persist_timeout, Duration::from_millis(5000));
    }
}
