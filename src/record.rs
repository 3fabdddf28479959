//! Operation and sub-operation records
//!
//! An [`OperationRecord`] is one user-visible unit of work bracketed by
//! begin/end calls. Every atomic call made inside it is a [`SubOperationRecord`],
//! numbered by a step counter that follows creation order.
//!
//! Records are built and mutated only by the owning thread's context stack and
//! are frozen once the operation closes; everything downstream (detection, sinks,
//! error handlers) sees immutable snapshots.

use crate::clock::NANOS_PER_MS;
use crate::error_analysis::ErrorAnalysis;
use crate::result_shape::{ResultShape, ShapeKind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::panic::Location;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_OPERATION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique operation identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(pub u64);

impl OperationId {
    /// Allocate the next id for this process
    pub fn next() -> Self {
        OperationId(NEXT_OPERATION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

/// Lifecycle state of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationStatus {
    #[default]
    Running,
    Succeeded,
    Failed,
}

/// Completion state of a sub-operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum SubOperationStatus {
    #[default]
    Running,
    Ok,
    Error,
}

impl fmt::Display for SubOperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubOperationStatus::Running => write!(f, "RUNNING"),
            SubOperationStatus::Ok => write!(f, "OK"),
            SubOperationStatus::Error => write!(f, "ERROR"),
        }
    }
}

/// Source location a call was dispatched from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallerSite {
    pub file: String,
    pub line: u32,
}

impl CallerSite {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }

    /// Location of the code calling this function
    #[track_caller]
    pub fn here() -> Self {
        let location = Location::caller();
        Self::new(location.file(), location.line())
    }
}

impl fmt::Display for CallerSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Capture the current source location as a [`CallerSite`]
#[macro_export]
macro_rules! caller_site {
    () => {
        $crate::record::CallerSite::new(file!(), line!())
    };
}

/// One atomic call recorded inside an operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubOperationRecord {
    /// Creation-order step number, unique within the parent operation (starts at 1)
    pub step: u32,

    /// Operation name (e.g., "GET_VALUE")
    pub operation: String,

    /// Component the call was addressed to
    pub target: String,

    pub start_nanos: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_nanos: Option<u64>,

    pub status: SubOperationStatus,

    /// Display tag of the raw result
    pub result_shape: ShapeKind,

    /// Raw result payload, kept for error analysis only
    #[serde(default)]
    pub raw_result: ResultShape,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller: Option<CallerSite>,

    /// Keyword arguments of the call
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,

    /// Step of the sub-operation that was in flight when this one started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_step: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorAnalysis>,
}

impl SubOperationRecord {
    /// Create a running record
    pub fn new(
        step: u32,
        operation: impl Into<String>,
        target: impl Into<String>,
        start_nanos: u64,
    ) -> Self {
        Self {
            step,
            operation: operation.into(),
            target: target.into(),
            start_nanos,
            end_nanos: None,
            status: SubOperationStatus::Running,
            result_shape: ShapeKind::Absent,
            raw_result: ResultShape::Absent,
            caller: None,
            params: Map::new(),
            parent_step: None,
            error: None,
        }
    }

    pub fn with_caller(mut self, caller: CallerSite) -> Self {
        self.caller = Some(caller);
        self
    }

    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = params;
        self
    }

    /// Record completion; returns false if the record was already complete
    ///
    /// Status, end time and raw result are written exactly once. The error
    /// analysis is attached separately by the caller once the status is known.
    pub fn complete(
        &mut self,
        end_nanos: u64,
        raw_result: ResultShape,
        status: SubOperationStatus,
    ) -> bool {
        if self.status != SubOperationStatus::Running {
            return false;
        }
        self.end_nanos = Some(end_nanos.max(self.start_nanos));
        self.result_shape = raw_result.kind();
        self.raw_result = raw_result;
        self.status = status;
        true
    }

    /// Attach an error analysis; only the first one sticks
    pub fn attach_error(&mut self, analysis: ErrorAnalysis) -> bool {
        if self.status != SubOperationStatus::Error || self.error.is_some() {
            return false;
        }
        self.error = Some(analysis);
        true
    }

    pub fn duration_nanos(&self) -> u64 {
        self.end_nanos
            .map(|end| end.saturating_sub(self.start_nanos))
            .unwrap_or(0)
    }

    pub fn duration_ms(&self) -> f64 {
        self.duration_nanos() as f64 / NANOS_PER_MS as f64
    }

    pub fn is_ok(&self) -> bool {
        self.status == SubOperationStatus::Ok
    }

    pub fn is_error(&self) -> bool {
        self.status == SubOperationStatus::Error
    }
}

impl fmt::Display for SubOperationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} -> {} [{}] {:.2}ms ({})",
            self.step,
            self.operation,
            self.target,
            self.status,
            self.duration_ms(),
            self.result_shape
        )?;
        if let Some(error) = &self.error {
            write!(f, " {}: {}", error.category, error.message)?;
        }
        Ok(())
    }
}

/// One user-visible unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: OperationId,
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<OperationId>,

    pub start_nanos: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_nanos: Option<u64>,

    pub status: OperationStatus,

    /// Error description supplied when the operation failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Metrics in insertion order
    #[serde(default)]
    pub metrics: Map<String, Value>,

    /// Calls made directly inside this operation, ordered by step
    #[serde(default)]
    pub sub_operations: Vec<SubOperationRecord>,

    /// Nested operations closed while this one was running
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<OperationRecord>,
}

impl OperationRecord {
    pub fn new(
        id: OperationId,
        name: impl Into<String>,
        parent_id: Option<OperationId>,
        start_nanos: u64,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            parent_id,
            start_nanos,
            end_nanos: None,
            status: OperationStatus::Running,
            error: None,
            metrics: Map::new(),
            sub_operations: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Set a metric; an existing key keeps its original position
    pub fn add_metric(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.metrics.insert(key.into(), value.into());
    }

    /// Step number the next sub-operation will receive
    pub fn next_step(&self) -> u32 {
        self.sub_operations.len() as u32 + 1
    }

    pub fn sub_operation(&self, step: u32) -> Option<&SubOperationRecord> {
        let index = step.checked_sub(1)? as usize;
        self.sub_operations.get(index)
    }

    pub fn sub_operation_mut(&mut self, step: u32) -> Option<&mut SubOperationRecord> {
        let index = step.checked_sub(1)? as usize;
        self.sub_operations.get_mut(index)
    }

    /// Close the operation; a supplied error marks it FAILED
    pub fn close(&mut self, end_nanos: u64, error: Option<String>) {
        self.end_nanos = Some(end_nanos.max(self.start_nanos));
        self.status = if error.is_some() {
            OperationStatus::Failed
        } else {
            OperationStatus::Succeeded
        };
        self.error = error;
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn is_running(&self) -> bool {
        self.status == OperationStatus::Running
    }

    pub fn duration_nanos(&self) -> u64 {
        self.end_nanos
            .map(|end| end.saturating_sub(self.start_nanos))
            .unwrap_or(0)
    }

    pub fn duration_ms(&self) -> f64 {
        self.duration_nanos() as f64 / NANOS_PER_MS as f64
    }

    /// Number of failed sub-operations
    pub fn error_count(&self) -> usize {
        self.sub_operations.iter().filter(|s| s.is_error()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operation_ids_are_unique() {
        let a = OperationId::next();
        let b = OperationId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_sub_operation_completes_once() {
        let mut record = SubOperationRecord::new(1, "GET_VALUE", "pump", 100);
        assert!(record.complete(250, ResultShape::Boolean(true), SubOperationStatus::Ok));
        assert!(!record.complete(900, ResultShape::Absent, SubOperationStatus::Error));

        assert_eq!(record.status, SubOperationStatus::Ok);
        assert_eq!(record.end_nanos, Some(250));
        assert_eq!(record.duration_nanos(), 150);
        assert_eq!(record.result_shape, ShapeKind::Boolean);
    }

    #[test]
    fn test_error_attaches_only_on_error_status() {
        let analysis = crate::error_analysis::ErrorAnalysis::unknown(None, Default::default());

        let mut ok = SubOperationRecord::new(1, "GET_VALUE", "pump", 0);
        ok.complete(1, ResultShape::Boolean(true), SubOperationStatus::Ok);
        assert!(!ok.attach_error(analysis.clone()));

        let mut failed = SubOperationRecord::new(2, "GET_VALUE", "pump", 0);
        failed.complete(1, ResultShape::Absent, SubOperationStatus::Error);
        assert!(failed.attach_error(analysis.clone()));
        assert!(!failed.attach_error(analysis));
    }

    #[test]
    fn test_end_never_precedes_start() {
        let mut record = SubOperationRecord::new(1, "GET_VALUE", "pump", 500);
        record.complete(100, ResultShape::Boolean(true), SubOperationStatus::Ok);
        assert_eq!(record.duration_nanos(), 0);
    }

    #[test]
    fn test_metrics_preserve_insertion_order() {
        let mut op = OperationRecord::new(OperationId(7), "load", None, 0);
        op.add_metric("zeta", 1);
        op.add_metric("alpha", "two");
        op.add_metric("mid", json!([3]));
        op.add_metric("zeta", 10);

        let keys: Vec<_> = op.metrics.keys().cloned().collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
        assert_eq!(op.metrics["zeta"], json!(10));
    }

    #[test]
    fn test_close_sets_status() {
        let mut ok = OperationRecord::new(OperationId(1), "a", None, 10);
        ok.close(30, None);
        assert_eq!(ok.status, OperationStatus::Succeeded);
        assert_eq!(ok.duration_nanos(), 20);

        let mut failed = OperationRecord::new(OperationId(2), "b", Some(OperationId(1)), 10);
        failed.close(30, Some("boom".into()));
        assert_eq!(failed.status, OperationStatus::Failed);
        assert!(!failed.is_root());
    }

    #[test]
    fn test_sub_operation_lookup_by_step() {
        let mut op = OperationRecord::new(OperationId(3), "c", None, 0);
        assert_eq!(op.next_step(), 1);
        op.sub_operations.push(SubOperationRecord::new(1, "A", "t", 0));
        op.sub_operations.push(SubOperationRecord::new(2, "B", "t", 0));
        assert_eq!(op.sub_operation(2).map(|s| s.operation.as_str()), Some("B"));
        assert!(op.sub_operation(0).is_none());
        assert!(op.sub_operation(3).is_none());
    }

    #[test]
    fn test_caller_site_here() {
        let site = CallerSite::here();
        assert!(site.file.ends_with("record.rs"));
        assert!(site.line > 0);

        let from_macro = crate::caller_site!();
        assert!(from_macro.file.ends_with("record.rs"));
    }

    #[test]
    fn test_display_omits_raw_result() {
        let mut record = SubOperationRecord::new(4, "GET_VALUE", "pump", 0);
        record.complete(
            2_000_000,
            ResultShape::Text("secret-payload".into()),
            SubOperationStatus::Ok,
        );
        let line = record.to_string();
        assert!(line.contains("#4 GET_VALUE -> pump [OK]"));
        assert!(!line.contains("secret-payload"));
    }
}
