use crate::config::ConfigError;
use crate::record::{SubOperationRecord, SubOperationStatus};
use crate::strategy::{check_min_size, ordered_by_step, position_of, ClusterId, ClusteringStrategy};
use serde::{Deserialize, Serialize};

/// Configuration for repeated-call run clustering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SequenceCountConfig {
    /// Minimum run length
    pub min_sequence: usize,

    /// Only these operations may form runs (empty = any)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub operations: Vec<String>,

    /// Only runs with these statuses (empty = any)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub statuses: Vec<SubOperationStatus>,
}

impl Default for SequenceCountConfig {
    fn default() -> Self {
        Self {
            min_sequence: 3,
            operations: Vec::new(),
            statuses: Vec::new(),
        }
    }
}

/// Groups consecutive calls with identical (operation, status)
///
/// This is the RLE view of a sub-operation list: a tight loop of the same call
/// collapses into one run.
#[derive(Debug, Clone)]
pub struct SequenceCountStrategy {
    min_sequence: usize,
    operations: Vec<String>,
    statuses: Vec<SubOperationStatus>,
}

impl SequenceCountStrategy {
    pub const NAME: &'static str = "sequence_count";

    pub fn new(config: SequenceCountConfig) -> Result<Self, ConfigError> {
        check_min_size(Self::NAME, "min_sequence", config.min_sequence)?;
        Ok(Self {
            min_sequence: config.min_sequence,
            operations: config.operations,
            statuses: config.statuses,
        })
    }

    fn eligible(&self, record: &SubOperationRecord) -> bool {
        (self.operations.is_empty() || self.operations.iter().any(|o| *o == record.operation))
            && (self.statuses.is_empty() || self.statuses.contains(&record.status))
    }
}

impl ClusteringStrategy for SequenceCountStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn detect(
        &self,
        candidate: &SubOperationRecord,
        siblings: &[SubOperationRecord],
    ) -> Option<ClusterId> {
        if !self.eligible(candidate) {
            return None;
        }

        let ordered = ordered_by_step(siblings);
        let index = position_of(&ordered, candidate.step)?;
        let same = |s: &SubOperationRecord| {
            s.operation == candidate.operation && s.status == candidate.status
        };

        let mut lo = index;
        while lo > 0 && same(ordered[lo - 1]) {
            lo -= 1;
        }
        let mut hi = index;
        while hi + 1 < ordered.len() && same(ordered[hi + 1]) {
            hi += 1;
        }

        if hi - lo + 1 < self.min_sequence {
            return None;
        }

        Some(format!(
            "{}:{}:{}",
            candidate.operation, candidate.status, ordered[lo].step
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_support::{failed, op, proposals};

    #[test]
    fn test_run_of_four() {
        let siblings = vec![
            op(1, "GET_VALUE", "t", 0),
            op(2, "GET_VALUE", "t", 1),
            op(3, "GET_VALUE", "t", 2),
            op(4, "GET_VALUE", "t", 3),
            op(5, "SET_VALUE", "t", 4),
        ];
        let strategy = SequenceCountStrategy::new(SequenceCountConfig::default()).unwrap();
        let ids = proposals(&strategy, &siblings);

        assert_eq!(ids[0].as_deref(), Some("GET_VALUE:OK:1"));
        assert!(ids[..4].iter().all(|id| *id == ids[0]));
        assert_eq!(ids[4], None);
    }

    #[test]
    fn test_status_change_breaks_run() {
        let siblings = vec![
            op(1, "GET_VALUE", "t", 0),
            op(2, "GET_VALUE", "t", 1),
            failed(3, "GET_VALUE", "t", 2),
            op(4, "GET_VALUE", "t", 3),
        ];
        let strategy = SequenceCountStrategy::new(SequenceCountConfig {
            min_sequence: 2,
            ..Default::default()
        })
        .unwrap();
        let ids = proposals(&strategy, &siblings);

        assert_eq!(ids[0].as_deref(), Some("GET_VALUE:OK:1"));
        assert_eq!(ids[1], ids[0]);
        assert_eq!(ids[2], None);
        assert_eq!(ids[3], None);
    }

    #[test]
    fn test_short_run_rejected() {
        let siblings = vec![op(1, "A", "t", 0), op(2, "A", "t", 1), op(3, "B", "t", 2)];
        let strategy = SequenceCountStrategy::new(SequenceCountConfig::default()).unwrap();
        assert!(proposals(&strategy, &siblings).iter().all(Option::is_none));
    }

    #[test]
    fn test_allow_lists() {
        let siblings = vec![
            failed(1, "A", "t", 0),
            failed(2, "A", "t", 1),
            op(3, "B", "t", 2),
            op(4, "B", "t", 3),
        ];
        let strategy = SequenceCountStrategy::new(SequenceCountConfig {
            min_sequence: 2,
            operations: vec!["A".into(), "B".into()],
            statuses: vec![SubOperationStatus::Error],
        })
        .unwrap();
        let ids = proposals(&strategy, &siblings);

        assert_eq!(ids[0].as_deref(), Some("A:ERROR:1"));
        assert_eq!(ids[2], None);
    }
}
