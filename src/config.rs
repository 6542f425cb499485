use crate::alerts::{default_rules, AlertRule, Comparator};
use crate::monitor::{MonitorConfig, MonitorOptions};
use crate::sample::MetricKind;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "./vigild.yaml";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_rules")]
    pub alerts: Vec<AlertRule>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            interval_ms: default_interval_ms(),
            history_capacity: default_history_capacity(),
            subscriber_buffer: default_subscriber_buffer(),
            read_timeout_ms: default_read_timeout_ms(),
            alerts: default_rules(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("не удалось прочитать файл конфигурации {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("не удалось разобрать YAML в {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("ошибка валидации конфигурации: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;
        Self::from_yaml(&text, path_display)
    }

    /// Like `load_from_file`, but a missing file at the default location
    /// yields the built-in defaults. An explicit path must exist.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        match Self::load_from_file(path_ref) {
            Err(ConfigError::Read { source, .. })
                if source.kind() == ErrorKind::NotFound
                    && path_ref == Path::new(DEFAULT_CONFIG_PATH) =>
            {
                Ok(Self::default())
            }
            other => other,
        }
    }

    pub fn from_yaml(text: &str, origin: impl Into<String>) -> Result<Self, ConfigError> {
        let cfg: Config = serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.into(),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Validation(
                "поле listen обязательно".to_string(),
            ));
        }
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "поле listen должно быть корректным адресом host:port".to_string(),
            ));
        }
        if self.interval_ms == 0 {
            return Err(ConfigError::Validation(
                "interval_ms должно быть > 0".to_string(),
            ));
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::Validation(
                "history_capacity должно быть > 0".to_string(),
            ));
        }
        if self.subscriber_buffer == 0 {
            return Err(ConfigError::Validation(
                "subscriber_buffer должно быть > 0".to_string(),
            ));
        }
        if self.read_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "read_timeout_ms должно быть > 0".to_string(),
            ));
        }
        validate_rules(&self.alerts)
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            interval: self.interval(),
            alert_rules: self.alerts.clone(),
        }
    }

    pub fn monitor_options(&self) -> MonitorOptions {
        MonitorOptions {
            history_capacity: self.history_capacity,
            subscriber_buffer: self.subscriber_buffer,
            read_timeout: Duration::from_millis(self.read_timeout_ms),
        }
    }

    /// Sets the threshold of every rule for `metric`, adding a `>` rule when
    /// none exists.
    pub fn override_threshold(&mut self, metric: MetricKind, threshold: f64) {
        let mut found = false;
        for rule in self.alerts.iter_mut().filter(|r| r.metric == metric) {
            rule.threshold = threshold;
            found = true;
        }
        if !found {
            self.alerts
                .push(AlertRule::new(metric, Comparator::Gt, threshold));
        }
    }
}

pub fn validate_rules(rules: &[AlertRule]) -> Result<(), ConfigError> {
    for (idx, rule) in rules.iter().enumerate() {
        if !rule.threshold.is_finite() {
            return Err(ConfigError::Validation(format!(
                "alerts[{idx}] ({}) threshold должен быть конечным числом",
                rule.metric
            )));
        }
        if rule.metric != MetricKind::Network && !(0.0..=100.0).contains(&rule.threshold) {
            return Err(ConfigError::Validation(format!(
                "alerts[{idx}] ({}) threshold должен быть в диапазоне 0..100",
                rule.metric
            )));
        }
        if rule.metric == MetricKind::Network && rule.threshold < 0.0 {
            return Err(ConfigError::Validation(format!(
                "alerts[{idx}] (network) threshold должен быть >= 0"
            )));
        }
    }
    Ok(())
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

const fn default_interval_ms() -> u64 {
    2000
}

const fn default_history_capacity() -> usize {
    crate::history::DEFAULT_HISTORY_CAPACITY
}

const fn default_subscriber_buffer() -> usize {
    64
}

const fn default_read_timeout_ms() -> u64 {
    5000
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_yaml_uses_defaults() {
        let cfg = Config::from_yaml("{}", "inline").unwrap();
        assert_eq!(cfg.listen, "0.0.0.0:8080");
        assert_eq!(cfg.interval(), Duration::from_secs(2));
        assert_eq!(cfg.history_capacity, 100);
        assert_eq!(cfg.alerts, default_rules());
    }

    #[test]
    fn bundled_example_is_valid() {
        let cfg = Config::from_yaml(Config::example_yaml(), "config.yaml.example").unwrap();
        assert_eq!(cfg.alerts.len(), 3);
        assert_eq!(cfg.alerts[1].metric, MetricKind::Memory);
        assert_eq!(cfg.alerts[1].threshold, 85.0);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let err = Config::from_yaml("interval_ms: 0\n", "inline").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(msg) if msg.contains("interval_ms")));
    }

    #[test]
    fn bad_listen_is_rejected() {
        let err = Config::from_yaml("listen: \"not an address\"\n", "inline").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let rules = vec![AlertRule::new(MetricKind::Cpu, Comparator::Gt, 120.0)];
        assert!(validate_rules(&rules).is_err());

        let rules = vec![AlertRule::new(MetricKind::Network, Comparator::Gt, 500.0)];
        assert!(validate_rules(&rules).is_ok());

        let rules = vec![AlertRule::new(MetricKind::Disk, Comparator::Gt, f64::NAN)];
        assert!(validate_rules(&rules).is_err());
    }

    #[test]
    fn unknown_metric_fails_to_parse() {
        let yaml = "alerts:\n  - { metric: gpu, threshold: 1, comparator: \">\" }\n";
        let err = Config::from_yaml(yaml, "inline").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn loads_file_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "interval_ms: 500\nhistory_capacity: 10").unwrap();
        let cfg = Config::load_from_file(file.path()).unwrap();
        assert_eq!(cfg.interval(), Duration::from_millis(500));
        assert_eq!(cfg.monitor_options().history_capacity, 10);
    }

    #[test]
    fn missing_explicit_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yaml");
        assert!(matches!(
            Config::load_or_default(&path),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn threshold_override_replaces_or_appends() {
        let mut cfg = Config {
            alerts: vec![AlertRule::new(MetricKind::Cpu, Comparator::Ge, 80.0)],
            ..Config::default()
        };
        cfg.override_threshold(MetricKind::Cpu, 70.0);
        cfg.override_threshold(MetricKind::Disk, 95.0);
        assert_eq!(cfg.alerts[0].threshold, 70.0);
        assert_eq!(cfg.alerts[0].comparator, Comparator::Ge);
        assert_eq!(
            cfg.alerts[1],
            AlertRule::new(MetricKind::Disk, Comparator::Gt, 95.0)
        );
    }
}
