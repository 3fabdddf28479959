use crate::clock::NANOS_PER_MS;
use crate::record::{SubOperationRecord, SubOperationStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hasher;

/// Aggregate status of a meta-operation's members
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MetaStatus {
    /// Every member succeeded
    Ok,
    /// Every member failed
    Error,
    Mixed,
}

impl fmt::Display for MetaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaStatus::Ok => write!(f, "OK"),
            MetaStatus::Error => write!(f, "ERROR"),
            MetaStatus::Mixed => write!(f, "MIXED"),
        }
    }
}

/// Group of related sub-operations found in one detection pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaOperation {
    /// Content-derived identifier, stable across passes over the same input
    pub id: String,

    /// Strategy that formed the group
    pub strategy: String,

    /// Cluster identifier the strategy proposed
    pub cluster_key: String,

    /// Members ordered by step (always two or more)
    pub members: Vec<SubOperationRecord>,

    pub start_nanos: u64,
    pub end_nanos: u64,
    pub status: MetaStatus,
}

impl MetaOperation {
    /// Build from members; returns `None` for fewer than two
    pub(crate) fn new(
        strategy: &str,
        cluster_key: &str,
        ordinal: usize,
        mut members: Vec<SubOperationRecord>,
    ) -> Option<Self> {
        if members.len() < 2 {
            return None;
        }
        members.sort_by_key(|m| m.step);

        let start_nanos = members.iter().map(|m| m.start_nanos).min()?;
        let end_nanos = members
            .iter()
            .map(|m| m.end_nanos.unwrap_or(m.start_nanos))
            .max()?;

        Some(Self {
            id: meta_operation_id(strategy, start_nanos, cluster_key, ordinal),
            strategy: strategy.to_string(),
            cluster_key: cluster_key.to_string(),
            status: meta_status(&members),
            members,
            start_nanos,
            end_nanos: end_nanos.max(start_nanos),
        })
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Member step numbers in ascending order
    pub fn steps(&self) -> Vec<u32> {
        self.members.iter().map(|m| m.step).collect()
    }

    pub fn contains(&self, step: u32) -> bool {
        self.members.iter().any(|m| m.step == step)
    }

    pub fn duration_ms(&self) -> f64 {
        (self.end_nanos - self.start_nanos) as f64 / NANOS_PER_MS as f64
    }

    pub fn error_count(&self) -> usize {
        self.members.iter().filter(|m| m.is_error()).count()
    }

    /// Distinct member operation names in first-seen order
    pub fn operation_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for member in &self.members {
            if !names.contains(&member.operation.as_str()) {
                names.push(&member.operation);
            }
        }
        names
    }
}

impl fmt::Display for MetaOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} x{} ({}) steps {} {:.2}ms {}",
            self.id,
            self.strategy,
            self.len(),
            self.operation_names().join(", "),
            format_steps(&self.steps()),
            self.duration_ms(),
            self.status
        )
    }
}

/// Deterministic meta-operation id
///
/// FNV-1a over strategy name, earliest member start, cluster key and the
/// cluster's ordinal in its pass. Nothing time- or randomness-dependent goes in.
pub fn meta_operation_id(
    strategy: &str,
    start_nanos: u64,
    cluster_key: &str,
    ordinal: usize,
) -> String {
    let mut hasher = fnv::FnvHasher::default();

    // Hash format: "strategy::start::cluster_key::ordinal"
    hasher.write(strategy.as_bytes());
    hasher.write(b"::");
    hasher.write(&start_nanos.to_le_bytes());
    hasher.write(b"::");
    hasher.write(cluster_key.as_bytes());
    hasher.write(b"::");
    hasher.write(&(ordinal as u64).to_le_bytes());

    format!("meta-{:016x}", hasher.finish())
}

fn meta_status(members: &[SubOperationRecord]) -> MetaStatus {
    if members.iter().all(|m| m.status == SubOperationStatus::Ok) {
        MetaStatus::Ok
    } else if members.iter().all(|m| m.status == SubOperationStatus::Error) {
        MetaStatus::Error
    } else {
        MetaStatus::Mixed
    }
}

/// Compact step list: "1-4", "2,5,7-9"
fn format_steps(steps: &[u32]) -> String {
    let mut parts = Vec::new();
    let mut iter = steps.iter().copied().peekable();
    while let Some(first) = iter.next() {
        let mut last = first;
        while let Some(next) = last.checked_add(1) {
            if iter.next_if_eq(&next).is_none() {
                break;
            }
            last = next;
        }
        if first == last {
            parts.push(first.to_string());
        } else {
            parts.push(format!("{}-{}", first, last));
        }
    }
    parts.join(",")
}

/// Rendered view of one detection pass over a sub-operation list
///
/// Rows are meta-operations plus the sub-operations no cluster claimed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionReport {
    pub meta_operations: Vec<MetaOperation>,

    /// Steps of sub-operations that stayed standalone
    pub standalone: Vec<u32>,

    /// Number of sub-operations examined
    pub total: usize,
}

impl DetectionReport {
    pub fn new(sub_operations: &[SubOperationRecord], meta_operations: Vec<MetaOperation>) -> Self {
        let mut standalone: Vec<u32> = sub_operations
            .iter()
            .map(|s| s.step)
            .filter(|step| !meta_operations.iter().any(|m| m.contains(*step)))
            .collect();
        standalone.sort_unstable();

        Self {
            meta_operations,
            standalone,
            total: sub_operations.len(),
        }
    }

    /// Rows shown after grouping
    pub fn rows(&self) -> usize {
        self.meta_operations.len() + self.standalone.len()
    }

    /// Input records per rendered row (1.0 means nothing was grouped)
    pub fn compression_ratio(&self) -> f64 {
        match self.rows() {
            0 => 1.0,
            rows => self.total as f64 / rows as f64,
        }
    }

    /// Sub-operations covered by some meta-operation
    pub fn clustered(&self) -> usize {
        self.meta_operations.iter().map(MetaOperation::len).sum()
    }
}

impl fmt::Display for DetectionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} sub-operations -> {} rows ({} meta-operations, {} standalone, {:.2}x)",
            self.total,
            self.rows(),
            self.meta_operations.len(),
            self.standalone.len(),
            self.compression_ratio()
        )?;
        for meta in &self.meta_operations {
            writeln!(f, "  {}", meta)?;
        }
        if !self.standalone.is_empty() {
            writeln!(f, "  standalone steps {}", format_steps(&self.standalone))?;
        }
        Ok(())
    }
}
