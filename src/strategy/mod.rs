// Meta-Operation Clustering Strategies
//
// Each strategy looks at one sub-operation together with all of its siblings and
// proposes a cluster identifier, or nothing. Strategies are pure: they never touch
// the sibling list and never keep state between calls. The detector runs them in
// priority order and the first proposal wins.
//
// Strategies are built once from a typed, validated configuration and are
// immutable afterwards. Reconfiguration means building a new set.
//
// Available strategies (registry names):
// - time_window          : contiguous bursts in start time
// - name_similarity      : shared operation-name prefix or pattern
// - target_cluster       : runs addressed to the same component, gap tolerant
// - sequence_count       : repeated (operation, status) runs
// - frequency_threshold  : same operation repeated within a time window
// - request_params       : similar keyword arguments among neighbors
// - dispatch_burst       : short fan-out calls from one dispatch call-site

mod dispatch_burst;
mod frequency;
mod name_similarity;
mod request_params;
mod sequence_count;
mod target_cluster;
mod time_window;

pub use dispatch_burst::{DispatchBurstConfig, DispatchBurstStrategy};
pub use frequency::{FrequencyThresholdConfig, FrequencyThresholdStrategy};
pub use name_similarity::{operation_prefix, NameSimilarityConfig, NameSimilarityStrategy};
pub use request_params::{parameter_similarity, RequestParamsConfig, RequestParamsStrategy};
pub use sequence_count::{SequenceCountConfig, SequenceCountStrategy};
pub use target_cluster::{TargetClusterConfig, TargetClusterStrategy};
pub use time_window::{TimeWindowConfig, TimeWindowStrategy};

use crate::config::ConfigError;
use crate::record::SubOperationRecord;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// Identifier proposed by a strategy; unique within that strategy for one pass
pub type ClusterId = String;

/// A pluggable clustering heuristic
pub trait ClusteringStrategy: Send + Sync + fmt::Debug {
    /// Registry name (e.g., "time_window")
    fn name(&self) -> &'static str;

    /// Propose a cluster for `candidate` given every sub-operation of the same parent
    ///
    /// `siblings` includes `candidate` itself.
    fn detect(&self, candidate: &SubOperationRecord, siblings: &[SubOperationRecord])
        -> Option<ClusterId>;
}

/// Registry names of every built-in strategy
pub const STRATEGY_NAMES: [&str; 7] = [
    DispatchBurstStrategy::NAME,
    SequenceCountStrategy::NAME,
    TargetClusterStrategy::NAME,
    TimeWindowStrategy::NAME,
    FrequencyThresholdStrategy::NAME,
    RequestParamsStrategy::NAME,
    NameSimilarityStrategy::NAME,
];

/// Build a strategy from its registry name and parameter mapping
///
/// A `null` parameter value means "all defaults".
///
/// # Example
/// ```
/// use racimo::strategy::build_strategy;
/// use serde_json::json;
///
/// let strategy = build_strategy("time_window", &json!({"window_ms": 25.0}))?;
/// assert_eq!(strategy.name(), "time_window");
///
/// assert!(build_strategy("no_such_strategy", &json!(null)).is_err());
/// # Ok::<(), racimo::config::ConfigError>(())
/// ```
pub fn build_strategy(
    name: &str,
    params: &Value,
) -> Result<Box<dyn ClusteringStrategy>, ConfigError> {
    let strategy: Box<dyn ClusteringStrategy> = match name {
        TimeWindowStrategy::NAME => Box::new(TimeWindowStrategy::new(parse_params(name, params)?)?),
        NameSimilarityStrategy::NAME => {
            Box::new(NameSimilarityStrategy::new(parse_params(name, params)?)?)
        }
        TargetClusterStrategy::NAME => {
            Box::new(TargetClusterStrategy::new(parse_params(name, params)?)?)
        }
        SequenceCountStrategy::NAME => {
            Box::new(SequenceCountStrategy::new(parse_params(name, params)?)?)
        }
        FrequencyThresholdStrategy::NAME => {
            Box::new(FrequencyThresholdStrategy::new(parse_params(name, params)?)?)
        }
        RequestParamsStrategy::NAME => {
            Box::new(RequestParamsStrategy::new(parse_params(name, params)?)?)
        }
        DispatchBurstStrategy::NAME => {
            Box::new(DispatchBurstStrategy::new(parse_params(name, params)?)?)
        }
        other => return Err(ConfigError::UnknownStrategy(other.to_string())),
    };
    Ok(strategy)
}

/// Default parameter mapping for a strategy, as it would appear in configuration
pub fn default_params(name: &str) -> Option<Value> {
    match name {
        TimeWindowStrategy::NAME => to_value(TimeWindowConfig::default()),
        NameSimilarityStrategy::NAME => to_value(NameSimilarityConfig::default()),
        TargetClusterStrategy::NAME => to_value(TargetClusterConfig::default()),
        SequenceCountStrategy::NAME => to_value(SequenceCountConfig::default()),
        FrequencyThresholdStrategy::NAME => to_value(FrequencyThresholdConfig::default()),
        RequestParamsStrategy::NAME => to_value(RequestParamsConfig::default()),
        DispatchBurstStrategy::NAME => to_value(DispatchBurstConfig::default()),
        _ => None,
    }
}

fn to_value<T: Serialize>(config: T) -> Option<Value> {
    serde_json::to_value(config).ok()
}

fn parse_params<T: DeserializeOwned + Default>(
    name: &str,
    params: &Value,
) -> Result<T, ConfigError> {
    if params.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(params.clone()).map_err(|source| ConfigError::InvalidParameters {
        strategy: name.to_string(),
        source,
    })
}

/// Siblings ordered by step number
pub(crate) fn ordered_by_step(siblings: &[SubOperationRecord]) -> Vec<&SubOperationRecord> {
    let mut ordered: Vec<&SubOperationRecord> = siblings.iter().collect();
    ordered.sort_by_key(|s| s.step);
    ordered
}

/// Index of the record with `step` in an ordered slice
pub(crate) fn position_of(ordered: &[&SubOperationRecord], step: u32) -> Option<usize> {
    ordered.iter().position(|s| s.step == step)
}

pub(crate) fn invalid(strategy: &str, parameter: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        strategy: strategy.to_string(),
        parameter: parameter.to_string(),
        reason: reason.into(),
    }
}

pub(crate) fn check_min_size(
    strategy: &str,
    parameter: &str,
    value: usize,
) -> Result<(), ConfigError> {
    if value < 2 {
        return Err(invalid(strategy, parameter, format!("must be >= 2, got {}", value)));
    }
    Ok(())
}

pub(crate) fn check_window(strategy: &str, parameter: &str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(invalid(
            strategy,
            parameter,
            format!("must be a non-negative number of milliseconds, got {}", value),
        ));
    }
    Ok(())
}
