// Meta-Operation Detection
//
// One batch pass over the frozen sub-operation list of a completed operation:
// every sub-operation (in step order) is offered to the enabled strategies in
// priority order and the first proposal wins, so a sub-operation joins at most
// one cluster. Clusters are keyed by (strategy, cluster id); only clusters with
// two or more members become meta-operations.
//
// A strategy that panics is logged and counts as "no match" for that one
// sub-operation. The pass itself never fails.
//
// The enabled strategies live in an immutable `StrategySet` snapshot. A
// `StrategyHandle` swaps whole snapshots, so a pass that already holds one keeps
// reading it undisturbed.

mod meta_operation;

pub use meta_operation::{meta_operation_id, DetectionReport, MetaOperation, MetaStatus};

use crate::config::{ConfigError, DetectionConfig};
use crate::record::SubOperationRecord;
use crate::strategy::{build_strategy, ClusteringStrategy, STRATEGY_NAMES};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use tracing::{debug, trace};

/// Ordered, immutable list of enabled strategies
pub struct StrategySet {
    strategies: Vec<Box<dyn ClusteringStrategy>>,
}

impl StrategySet {
    /// Strategies in priority order
    pub fn new(strategies: Vec<Box<dyn ClusteringStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn ClusteringStrategy> {
        self.strategies.iter().map(|s| s.as_ref())
    }
}

impl Default for StrategySet {
    /// Every built-in strategy with default parameters, in default order
    fn default() -> Self {
        DetectionConfig::default().build().unwrap_or_else(|err| {
            tracing::warn!("default strategy configuration rejected ({}), using built-in", err);
            Self::new(
                STRATEGY_NAMES
                    .iter()
                    .filter_map(|name| build_strategy(name, &Value::Null).ok())
                    .collect(),
            )
        })
    }
}

impl fmt::Debug for StrategySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.strategies.iter()).finish()
    }
}

/// Shared, atomically replaceable strategy snapshot
#[derive(Debug, Default)]
pub struct StrategyHandle {
    current: RwLock<Arc<StrategySet>>,
}

impl StrategyHandle {
    pub fn new(strategies: StrategySet) -> Self {
        Self {
            current: RwLock::new(Arc::new(strategies)),
        }
    }

    /// Snapshot for one detection pass
    pub fn snapshot(&self) -> Arc<StrategySet> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Install a new snapshot, returning the previous one
    pub fn replace(&self, strategies: StrategySet) -> Arc<StrategySet> {
        let next = Arc::new(strategies);
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *guard, next)
    }
}

/// Runs clustering strategies over completed sub-operation lists
///
/// # Example
/// ```
/// use racimo::detector::MetaOperationDetector;
/// use racimo::record::{SubOperationRecord, SubOperationStatus};
/// use racimo::result_shape::ResultShape;
///
/// let subs: Vec<SubOperationRecord> = (1..=4)
///     .map(|step| {
///         let start = step as u64 * 1_000_000;
///         let mut record = SubOperationRecord::new(step, "GET_VALUE", "pump", start);
///         record.complete(start + 500_000, ResultShape::Boolean(true), SubOperationStatus::Ok);
///         record
///     })
///     .collect();
///
/// let detector = MetaOperationDetector::default();
/// let metas = detector.detect(&subs);
/// assert_eq!(metas.len(), 1);
/// assert_eq!(metas[0].steps(), vec![1, 2, 3, 4]);
/// ```
#[derive(Debug, Default)]
pub struct MetaOperationDetector {
    strategies: StrategyHandle,
}

impl MetaOperationDetector {
    pub fn new(strategies: StrategySet) -> Self {
        Self {
            strategies: StrategyHandle::new(strategies),
        }
    }

    pub fn from_config(config: &DetectionConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(config.build()?))
    }

    /// Build and install a new strategy set; the old one stays active on error
    pub fn reconfigure(&self, config: &DetectionConfig) -> Result<(), ConfigError> {
        let strategies = config.build()?;
        debug!(strategies = ?strategies.names(), "detector reconfigured");
        self.strategies.replace(strategies);
        Ok(())
    }

    pub fn strategies(&self) -> &StrategyHandle {
        &self.strategies
    }

    /// Group related sub-operations into meta-operations
    pub fn detect(&self, sub_operations: &[SubOperationRecord]) -> Vec<MetaOperation> {
        let strategies = self.strategies.snapshot();
        detect_with(&strategies, sub_operations)
    }

    /// Detection pass plus the standalone remainder
    pub fn report(&self, sub_operations: &[SubOperationRecord]) -> DetectionReport {
        DetectionReport::new(sub_operations, self.detect(sub_operations))
    }
}

/// One detection pass with an explicit strategy set
pub fn detect_with(
    strategies: &StrategySet,
    sub_operations: &[SubOperationRecord],
) -> Vec<MetaOperation> {
    if sub_operations.len() < 2 || strategies.is_empty() {
        return Vec::new();
    }

    let mut order: Vec<usize> = (0..sub_operations.len()).collect();
    order.sort_by_key(|&i| sub_operations[i].step);

    // Insertion-ordered clusters: (strategy, cluster id) -> member indices
    let mut index: HashMap<(&'static str, String), usize> = HashMap::new();
    let mut clusters: Vec<(&'static str, String, Vec<usize>)> = Vec::new();

    for &i in &order {
        let candidate = &sub_operations[i];
        let Some((strategy, cluster_id)) = first_match(strategies, candidate, sub_operations) else {
            continue;
        };
        trace!(step = candidate.step, strategy, cluster = %cluster_id, "sub-operation matched");

        let key = (strategy, cluster_id);
        match index.get(&key) {
            Some(&slot) => clusters[slot].2.push(i),
            None => {
                index.insert(key.clone(), clusters.len());
                clusters.push((key.0, key.1, vec![i]));
            }
        }
    }

    let mut metas = Vec::new();
    for (strategy, cluster_id, members) in clusters {
        if members.len() < 2 {
            trace!(strategy, cluster = %cluster_id, "singleton cluster discarded");
            continue;
        }
        let records = members.iter().map(|&i| sub_operations[i].clone()).collect();
        if let Some(meta) = MetaOperation::new(strategy, &cluster_id, metas.len(), records) {
            debug!(id = %meta.id, strategy, members = meta.len(), "meta-operation formed");
            metas.push(meta);
        }
    }
    metas
}

/// First strategy (in priority order) proposing a cluster for `candidate`
fn first_match(
    strategies: &StrategySet,
    candidate: &SubOperationRecord,
    siblings: &[SubOperationRecord],
) -> Option<(&'static str, String)> {
    for strategy in strategies.iter() {
        let outcome = catch_unwind(AssertUnwindSafe(|| strategy.detect(candidate, siblings)));
        match outcome {
            Ok(Some(cluster_id)) => return Some((strategy.name(), cluster_id)),
            Ok(None) => {}
            Err(panic) => {
                debug!(
                    strategy = strategy.name(),
                    step = candidate.step,
                    "strategy panicked ({}), treated as no match",
                    panic_message(panic.as_ref())
                );
            }
        }
    }
    None
}

/// Best-effort text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
