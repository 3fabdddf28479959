use crate::clock::ms_to_nanos;
use crate::config::ConfigError;
use crate::record::SubOperationRecord;
use crate::strategy::{check_min_size, invalid, ClusterId, ClusteringStrategy};
use serde::{Deserialize, Serialize};

/// Configuration for repeated-operation frequency clustering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FrequencyThresholdConfig {
    /// Half-width of the window around the candidate's start
    pub window_ms: f64,

    /// Minimum same-name calls inside the window (candidate included)
    pub threshold: usize,
}

impl Default for FrequencyThresholdConfig {
    fn default() -> Self {
        Self {
            window_ms: 100.0,
            threshold: 3,
        }
    }
}

/// Groups a hot operation repeated many times within a time window
///
/// Qualifying calls are bucketed by `window_ms` intervals measured from the
/// earliest sibling, so all hits in one bucket converge on one cluster id.
#[derive(Debug, Clone)]
pub struct FrequencyThresholdStrategy {
    window_nanos: u64,
    threshold: usize,
}

impl FrequencyThresholdStrategy {
    pub const NAME: &'static str = "frequency_threshold";

    pub fn new(config: FrequencyThresholdConfig) -> Result<Self, ConfigError> {
        if !config.window_ms.is_finite() || config.window_ms <= 0.0 {
            return Err(invalid(
                Self::NAME,
                "window_ms",
                format!("must be > 0, got {}", config.window_ms),
            ));
        }
        check_min_size(Self::NAME, "threshold", config.threshold)?;
        Ok(Self {
            window_nanos: ms_to_nanos(config.window_ms).max(1),
            threshold: config.threshold,
        })
    }
}

impl ClusteringStrategy for FrequencyThresholdStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn detect(
        &self,
        candidate: &SubOperationRecord,
        siblings: &[SubOperationRecord],
    ) -> Option<ClusterId> {
        let hits = siblings
            .iter()
            .filter(|s| s.operation == candidate.operation)
            .filter(|s| s.start_nanos.abs_diff(candidate.start_nanos) <= self.window_nanos)
            .count();
        if hits < self.threshold {
            return None;
        }

        let origin = siblings.iter().map(|s| s.start_nanos).min()?;
        let bucket = (candidate.start_nanos - origin) / self.window_nanos;
        Some(format!("{}:{}", candidate.operation, bucket))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_support::{op, proposals};

    #[test]
    fn test_hot_operation_in_one_bucket() {
        let siblings = vec![
            op(1, "POLL", "t", 0),
            op(2, "POLL", "t", 10),
            op(3, "OTHER", "t", 15),
            op(4, "POLL", "t", 30),
            op(5, "POLL", "t", 900),
        ];
        let strategy =
            FrequencyThresholdStrategy::new(FrequencyThresholdConfig::default()).unwrap();
        let ids = proposals(&strategy, &siblings);

        assert_eq!(ids[0].as_deref(), Some("POLL:0"));
        assert_eq!(ids[1], ids[0]);
        assert_eq!(ids[3], ids[0]);
        assert_eq!(ids[2], None);
        assert_eq!(ids[4], None);
    }

    #[test]
    fn test_below_threshold() {
        let siblings = vec![op(1, "POLL", "t", 0), op(2, "POLL", "t", 10)];
        let strategy =
            FrequencyThresholdStrategy::new(FrequencyThresholdConfig::default()).unwrap();
        assert!(proposals(&strategy, &siblings).iter().all(Option::is_none));
    }

    #[test]
    fn test_zero_window_rejected() {
        assert!(FrequencyThresholdStrategy::new(FrequencyThresholdConfig {
            window_ms: 0.0,
            threshold: 3
        })
        .is_err());
    }
}
