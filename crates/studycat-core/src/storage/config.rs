//! TOML-based application configuration.
//!
//! Stores:
//! - Timer scoring defaults and the session duration ceiling
//! - Heartbeat and maintenance intervals
//! - Ledger token lifetime and client timeout
//!
//! Configuration is stored at `<data_dir>/config.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::data_dir;
use crate::calendar::Zone;
use crate::error::{ConfigError, ValidationError};
use crate::timer::{ScoringMode, DEFAULT_LINEAR_PER_MIN};

/// Timer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerConfig {
    /// Scoring mode applied to a fresh timer record.
    #[serde(default)]
    pub mode: ScoringMode,
    #[serde(default = "default_linear_per_min")]
    pub linear_per_min: f64,
    #[serde(default = "default_max_session_secs")]
    pub max_session_secs: u64,
    /// Fixed offset for calendar bucketing; unset uses the system zone.
    #[serde(default)]
    pub utc_offset_minutes: Option<i32>,
}

/// Heartbeat and maintenance intervals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    #[serde(default = "default_persist_secs")]
    pub persist_secs: u64,
    #[serde(default = "default_maintenance_secs")]
    pub maintenance_secs: u64,
}

/// Points ledger configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
    #[serde(default = "default_client_timeout_ms")]
    pub client_timeout_ms: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// Application configuration.
///
/// Serialized to/from TOML at `<data_dir>/config.toml`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub timer: TimerConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
}

// Default functions
fn default_linear_per_min() -> f64 {
    DEFAULT_LINEAR_PER_MIN
}
fn default_max_session_secs() -> u64 {
    99 * 60 + 59
}
fn default_tick_secs() -> u64 {
    1
}
fn default_persist_secs() -> u64 {
    15
}
fn default_maintenance_secs() -> u64 {
    60
}
fn default_token_ttl_secs() -> u64 {
    180
}
fn default_client_timeout_ms() -> u64 {
    300
}
fn default_queue_capacity() -> usize {
    64
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            mode: ScoringMode::default(),
            linear_per_min: default_linear_per_min(),
            max_session_secs: default_max_session_secs(),
            utc_offset_minutes: None,
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            persist_secs: default_persist_secs(),
            maintenance_secs: default_maintenance_secs(),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: default_token_ttl_secs(),
            client_timeout_ms: default_client_timeout_ms(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl HeartbeatConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs.max(1))
    }

    pub fn persist(&self) -> Duration {
        Duration::from_secs(self.persist_secs.max(1))
    }

    pub fn maintenance(&self) -> Duration {
        Duration::from_secs(self.maintenance_secs.max(1))
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let (parent, leaf) = match key.rsplit_once('.') {
            Some((parent, leaf)) => (Some(parent), leaf),
            None => (None, key),
        };
        if leaf.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        if let Some(parent) = parent {
            for part in parent.split('.') {
                current = current.get_mut(part).ok_or_else(unknown)?;
            }
        }
        let obj = current.as_object_mut().ok_or_else(unknown)?;
        let existing = obj.get(leaf).ok_or_else(unknown)?;

        let new_value = match existing {
            serde_json::Value::Bool(_) => serde_json::Value::Bool(
                value
                    .parse::<bool>()
                    .map_err(|e| invalid(e.to_string()))?,
            ),
            serde_json::Value::Number(_) => {
                if matches!(value.trim(), "" | "none") {
                    serde_json::Value::Null
                } else if let Ok(n) = value.parse::<i64>() {
                    serde_json::Value::Number(n.into())
                } else if let Ok(n) = value.parse::<f64>() {
                    serde_json::Number::from_f64(n)
                        .map(serde_json::Value::Number)
                        .ok_or_else(|| invalid(format!("cannot parse '{value}' as number")))?
                } else {
                    return Err(invalid(format!("cannot parse '{value}' as number")));
                }
            }
            // Optional values: empty or "none" clears, anything else is parsed as JSON.
            serde_json::Value::Null => match value.trim() {
                "" | "none" => serde_json::Value::Null,
                other => serde_json::from_str(other)
                    .unwrap_or_else(|_| serde_json::Value::String(other.to_string())),
            },
            serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
            }
            serde_json::Value::String(_) => serde_json::Value::String(value.into()),
        };

        obj.insert(leaf.to_string(), new_value);
        Ok(())
    }

    pub fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from the data directory, writing defaults on first run.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
            Err(_) => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
        }
    }

    /// Persist to the data directory.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let fail = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| fail(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| fail(e.to_string()))
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by key without saving.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or the value does not fit
    /// the field's type.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json = serde_json::to_value(&*self).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let next: Config =
            serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            })?;
        next.validate()?;
        *self = next;
        Ok(())
    }

    /// Every dotted key with its current value, sorted.
    pub fn entries(&self) -> Vec<(String, String)> {
        fn walk(prefix: &str, value: &serde_json::Value, out: &mut Vec<(String, String)>) {
            match value {
                serde_json::Value::Object(map) => {
                    for (k, v) in map {
                        let key = if prefix.is_empty() {
                            k.clone()
                        } else {
                            format!("{prefix}.{k}")
                        };
                        walk(&key, v, out);
                    }
                }
                serde_json::Value::String(s) => out.push((prefix.to_string(), s.clone())),
                other => out.push((prefix.to_string(), other.to_string())),
            }
        }

        let mut out = Vec::new();
        if let Ok(json) = serde_json::to_value(self) {
            walk("", &json, &mut out);
        }
        out.sort();
        out
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, message: &str| ConfigError::InvalidValue {
            key: key.to_string(),
            message: message.to_string(),
        };
        if !self.timer.linear_per_min.is_finite() || self.timer.linear_per_min < 0.0 {
            return Err(invalid("timer.linear_per_min", "must be a finite non-negative number"));
        }
        if self.timer.max_session_secs == 0 {
            return Err(invalid("timer.max_session_secs", "must be positive"));
        }
        self.zone().map_err(|e| invalid("timer.utc_offset_minutes", &e.to_string()))?;
        if self.ledger.queue_capacity == 0 {
            return Err(invalid("ledger.queue_capacity", "must be positive"));
        }
        Ok(())
    }

    pub fn zone(&self) -> Result<Zone, ValidationError> {
        Zone::from_offset_minutes(self.timer.utc_offset_minutes)
    }

    pub fn max_session_ms(&self) -> u64 {
        self.timer.max_session_secs.saturating_mul(1000)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_millis(self.ledger.client_timeout_ms)
    }
}
