// Detection Configuration
//
// The normalized form is an ordered list of enabled strategy names plus a
// per-strategy parameter mapping (strategy name → parameter table). It can be
// built in code, loaded from TOML, or taken from the embedded
// strategies-default.toml.
//
// A configuration is validated as a whole when it is built into a
// `StrategySet`; a running detector only ever sees fully constructed strategies.

use crate::detector::StrategySet;
use crate::strategy::{build_strategy, default_params, STRATEGY_NAMES};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use thiserror::Error;

const DEFAULT_TOML: &str = include_str!("../../strategies-default.toml");

/// Errors raised while building strategies from configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("Strategy '{0}' is enabled more than once")]
    DuplicateStrategy(String),

    #[error("Invalid parameters for strategy '{strategy}': {source}")]
    InvalidParameters {
        strategy: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid value for {strategy}.{parameter}: {reason}")]
    InvalidValue {
        strategy: String,
        parameter: String,
        reason: String,
    },

    #[error("Invalid pattern for strategy '{strategy}': {source}")]
    InvalidPattern {
        strategy: String,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Enabled strategies (in priority order) and their parameters
///
/// # Example
/// ```
/// use racimo::config::DetectionConfig;
///
/// let config = DetectionConfig::from_toml_str(r#"
///     enabled = ["sequence_count", "time_window"]
///
///     [strategies.time_window]
///     window_ms = 25.0
/// "#)?;
/// let strategies = config.build()?;
/// assert_eq!(strategies.names(), vec!["sequence_count", "time_window"]);
/// # Ok::<(), racimo::config::ConfigError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetectionConfig {
    /// Strategy names in priority order
    #[serde(default = "default_enabled")]
    pub enabled: Vec<String>,

    /// Parameter mapping per strategy; strategies without an entry use defaults
    #[serde(default)]
    pub strategies: BTreeMap<String, Value>,
}

fn default_enabled() -> Vec<String> {
    STRATEGY_NAMES.iter().map(|name| name.to_string()).collect()
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self::embedded().unwrap_or_else(|err| {
            tracing::warn!("embedded strategy defaults unusable ({}), using built-in", err);
            Self::builtin()
        })
    }
}

impl DetectionConfig {
    /// Every strategy enabled in default order with built-in parameters
    pub fn builtin() -> Self {
        Self {
            enabled: default_enabled(),
            strategies: BTreeMap::new(),
        }
    }

    /// Configuration compiled in from strategies-default.toml
    pub fn embedded() -> std::result::Result<Self, ConfigError> {
        Self::from_toml_str(DEFAULT_TOML)
    }

    /// Load and validate a TOML configuration file
    ///
    /// # Example TOML
    /// ```toml
    /// enabled = ["target_cluster", "name_similarity"]
    ///
    /// [strategies.target_cluster]
    /// max_gap = 2
    /// targets = ["pump", "valve"]
    /// ```
    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).with_context(|| {
            format!("Failed to read strategy config: {}", path.as_ref().display())
        })?;
        Self::from_toml_str(&content).with_context(|| {
            format!("Invalid strategy config: {}", path.as_ref().display())
        })
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(content: &str) -> std::result::Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Only run the named strategies, in this order
    pub fn with_enabled<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enabled = names.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the parameter mapping of one strategy
    pub fn with_params(mut self, strategy: impl Into<String>, params: Value) -> Self {
        self.strategies.insert(strategy.into(), params);
        self
    }

    /// Parameters for `strategy` (null when none are configured)
    pub fn params(&self, strategy: &str) -> &Value {
        self.strategies.get(strategy).unwrap_or(&Value::Null)
    }

    /// Check names and parameters without keeping the built strategies
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        self.build().map(|_| ())
    }

    /// Build the immutable strategy set this configuration describes
    ///
    /// Parameter tables for strategies that are not enabled must still name a
    /// known strategy, so a typo is never silently ignored.
    pub fn build(&self) -> std::result::Result<StrategySet, ConfigError> {
        for name in self.strategies.keys() {
            if default_params(name).is_none() {
                return Err(ConfigError::UnknownStrategy(name.clone()));
            }
        }

        let mut seen = HashSet::new();
        let mut strategies = Vec::with_capacity(self.enabled.len());
        for name in &self.enabled {
            if !seen.insert(name.as_str()) {
                return Err(ConfigError::DuplicateStrategy(name.clone()));
            }
            strategies.push(build_strategy(name, self.params(name))?);
        }

        Ok(StrategySet::new(strategies))
    }
}

#[cfg(test)]
mod tests;
