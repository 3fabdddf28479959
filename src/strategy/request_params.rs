use crate::config::ConfigError;
use crate::record::SubOperationRecord;
use crate::strategy::{invalid, ordered_by_step, position_of, ClusterId, ClusteringStrategy};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Configuration for keyword-argument similarity clustering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RequestParamsConfig {
    /// Minimum similarity score (0.0-1.0)
    pub threshold: f64,

    /// Neighbors compared on each side, by step order
    pub search_radius: usize,

    /// Parameter keys left out of the comparison (e.g., timestamps, request ids)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ignore_keys: Vec<String>,

    /// Cluster every call to a target shared by two or more siblings first
    pub group_by_target: bool,
}

impl Default for RequestParamsConfig {
    fn default() -> Self {
        Self {
            threshold: 0.8,
            search_radius: 5,
            ignore_keys: Vec::new(),
            group_by_target: false,
        }
    }
}

/// Similarity of two keyword-argument mappings
///
/// Matching key/value pairs divided by the size of the key union, ignoring
/// `ignore` keys. Two empty mappings score 0.
///
/// # Example
/// ```
/// use racimo::strategy::parameter_similarity;
/// use serde_json::json;
///
/// let a = json!({"channel": 1, "gain": 2}).as_object().cloned().unwrap();
/// let b = json!({"channel": 1, "gain": 3}).as_object().cloned().unwrap();
/// assert_eq!(parameter_similarity(&a, &b, &[]), 0.5);
/// ```
pub fn parameter_similarity(
    a: &Map<String, Value>,
    b: &Map<String, Value>,
    ignore: &[String],
) -> f64 {
    let kept = |key: &&String| !ignore.iter().any(|i| i == *key);
    let union: BTreeSet<&String> = a.keys().chain(b.keys()).filter(kept).collect();
    if union.is_empty() {
        return 0.0;
    }

    let matching = union
        .iter()
        .filter(|key| match (a.get(key.as_str()), b.get(key.as_str())) {
            (Some(left), Some(right)) => left == right,
            _ => false,
        })
        .count();

    matching as f64 / union.len() as f64
}

/// Groups nearby calls made with near-identical arguments
///
/// Members converge on the lowest step among the candidate and its similar
/// neighbors.
#[derive(Debug, Clone)]
pub struct RequestParamsStrategy {
    threshold: f64,
    search_radius: usize,
    ignore_keys: Vec<String>,
    group_by_target: bool,
}

impl RequestParamsStrategy {
    pub const NAME: &'static str = "request_params";

    pub fn new(config: RequestParamsConfig) -> Result<Self, ConfigError> {
        if !(0.0..=1.0).contains(&config.threshold) || config.threshold == 0.0 {
            return Err(invalid(
                Self::NAME,
                "threshold",
                format!("must be in (0, 1], got {}", config.threshold),
            ));
        }
        if config.search_radius == 0 {
            return Err(invalid(Self::NAME, "search_radius", "must be >= 1"));
        }
        Ok(Self {
            threshold: config.threshold,
            search_radius: config.search_radius,
            ignore_keys: config.ignore_keys,
            group_by_target: config.group_by_target,
        })
    }
}

impl ClusteringStrategy for RequestParamsStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn detect(
        &self,
        candidate: &SubOperationRecord,
        siblings: &[SubOperationRecord],
    ) -> Option<ClusterId> {
        if self.group_by_target && !candidate.target.is_empty() {
            let sharing = siblings
                .iter()
                .filter(|s| s.target == candidate.target)
                .count();
            if sharing >= 2 {
                return Some(format!("target:{}", candidate.target));
            }
        }

        let ordered = ordered_by_step(siblings);
        let index = position_of(&ordered, candidate.step)?;
        let lo = index.saturating_sub(self.search_radius);
        let hi = (index + self.search_radius).min(ordered.len() - 1);

        let anchor = (lo..=hi)
            .filter(|&i| i != index)
            .map(|i| ordered[i])
            .filter(|s| {
                parameter_similarity(&candidate.params, &s.params, &self.ignore_keys)
                    >= self.threshold
            })
            .map(|s| s.step)
            .min()?;

        Some(format!("anchor:{}", anchor.min(candidate.step)))
    }
}
