// Operation Aggregation
//
// The aggregator receives every completed root operation from the context
// stacks, runs detection over its sub-operations (and those of nested
// operations), walks the error-handler chain for failed operations, and hands
// the resulting immutable summary to the registered sinks.
//
// Handlers and sinks are external code: a panic in one is caught and logged, and
// the remaining handlers/sinks still run.

mod ring_buffer;
mod sink;

pub use ring_buffer::{BufferStats, SummaryRingBuffer};
pub use sink::{CollectingSink, OperationSink, TracingSink};

use crate::detector::{panic_message, MetaOperation, MetaOperationDetector};
use crate::record::{OperationId, OperationRecord, OperationStatus};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// A completed root operation together with its detection results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationSummary {
    pub record: OperationRecord,

    /// Meta-operations over the root's own sub-operations
    pub meta_operations: Vec<MetaOperation>,

    /// Meta-operations of nested operations that produced any
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub nested: BTreeMap<OperationId, Vec<MetaOperation>>,

    /// Whether an error handler claimed the failure
    #[serde(default)]
    pub handled: bool,
}

impl OperationSummary {
    pub fn id(&self) -> OperationId {
        self.record.id
    }

    pub fn is_failed(&self) -> bool {
        self.record.status == OperationStatus::Failed
    }

    /// Meta-operations detected for `operation` (root or nested)
    pub fn meta_operations_for(&self, operation: OperationId) -> &[MetaOperation] {
        if operation == self.record.id {
            &self.meta_operations
        } else {
            self.nested.get(&operation).map(Vec::as_slice).unwrap_or(&[])
        }
    }
}

/// Context passed to error handlers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationSnapshot {
    pub id: OperationId,
    pub name: String,
    pub elapsed_ms: f64,
    pub metrics: Map<String, Value>,
}

impl From<&OperationRecord> for OperationSnapshot {
    fn from(record: &OperationRecord) -> Self {
        Self {
            id: record.id,
            name: record.name.clone(),
            elapsed_ms: record.duration_ms(),
            metrics: record.metrics.clone(),
        }
    }
}

/// One link of the failure-handling chain
///
/// Handlers run in registration order until one returns `true`.
pub trait ErrorHandler: Send + Sync {
    fn handle(&self, error: &str, operation: &OperationSnapshot) -> bool;
}

impl<F> ErrorHandler for F
where
    F: Fn(&str, &OperationSnapshot) -> bool + Send + Sync,
{
    fn handle(&self, error: &str, operation: &OperationSnapshot) -> bool {
        self(error, operation)
    }
}

/// Bridges completed operations to detection and outbound consumers
///
/// # Example
/// ```
/// use racimo::aggregator::{Aggregator, CollectingSink};
/// use racimo::record::{OperationId, OperationRecord};
/// use std::sync::Arc;
///
/// let sink = Arc::new(CollectingSink::new());
/// let aggregator = Aggregator::default();
/// aggregator.add_sink(sink.clone());
///
/// let mut record = OperationRecord::new(OperationId::next(), "load", None, 0);
/// record.close(1_000, None);
/// aggregator.submit(record);
///
/// assert_eq!(sink.len(), 1);
/// ```
#[derive(Default)]
pub struct Aggregator {
    detector: MetaOperationDetector,
    sinks: RwLock<Vec<Arc<dyn OperationSink>>>,
    handlers: RwLock<Vec<Arc<dyn ErrorHandler>>>,
}

impl Aggregator {
    pub fn new(detector: MetaOperationDetector) -> Self {
        Self {
            detector,
            sinks: RwLock::new(Vec::new()),
            handlers: RwLock::new(Vec::new()),
        }
    }

    pub fn detector(&self) -> &MetaOperationDetector {
        &self.detector
    }

    pub fn add_sink(&self, sink: Arc<dyn OperationSink>) {
        match self.sinks.write() {
            Ok(mut sinks) => sinks.push(sink),
            Err(poisoned) => poisoned.into_inner().push(sink),
        }
    }

    /// Append a handler to the end of the chain
    pub fn add_error_handler(&self, handler: Arc<dyn ErrorHandler>) {
        match self.handlers.write() {
            Ok(mut handlers) => handlers.push(handler),
            Err(poisoned) => poisoned.into_inner().push(handler),
        }
    }

    /// Run detection and the outbound chain for a completed root operation
    pub fn submit(&self, record: OperationRecord) -> Arc<OperationSummary> {
        if record.is_running() {
            warn!(
                operation = %record.id,
                name = %record.name,
                "submitted operation is still running"
            );
        }

        let meta_operations = self.detector.detect(&record.sub_operations);
        let mut nested = BTreeMap::new();
        self.detect_nested(&record.children, &mut nested);

        let mut summary = OperationSummary {
            record,
            meta_operations,
            nested,
            handled: false,
        };
        if summary.is_failed() {
            summary.handled = self.run_error_handlers(&summary.record);
        }

        let summary = Arc::new(summary);
        self.dispatch(&summary);
        summary
    }

    fn detect_nested(
        &self,
        children: &[OperationRecord],
        out: &mut BTreeMap<OperationId, Vec<MetaOperation>>,
    ) {
        for child in children {
            let metas = self.detector.detect(&child.sub_operations);
            if !metas.is_empty() {
                out.insert(child.id, metas);
            }
            self.detect_nested(&child.children, out);
        }
    }

    /// Chain of responsibility; returns whether some handler claimed the error
    fn run_error_handlers(&self, record: &OperationRecord) -> bool {
        let handlers: Vec<Arc<dyn ErrorHandler>> = match self.handlers.read() {
            Ok(handlers) => handlers.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        if handlers.is_empty() {
            return false;
        }

        let error = record.error.as_deref().unwrap_or(crate::error_analysis::UNKNOWN_ERROR);
        let snapshot = OperationSnapshot::from(record);

        for (position, handler) in handlers.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| handler.handle(error, &snapshot))) {
                Ok(true) => {
                    debug!(operation = %record.id, handler = position, "error handled");
                    return true;
                }
                Ok(false) => {}
                Err(panic) => {
                    warn!(
                        operation = %record.id,
                        handler = position,
                        "error handler panicked: {}",
                        panic_message(panic.as_ref())
                    );
                }
            }
        }
        false
    }

    fn dispatch(&self, summary: &Arc<OperationSummary>) {
        let sinks: Vec<Arc<dyn OperationSink>> = match self.sinks.read() {
            Ok(sinks) => sinks.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        for sink in sinks {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| sink.consume(summary))) {
                warn!(
                    operation = %summary.record.id,
                    sink = sink.name(),
                    "operation sink panicked: {}",
                    panic_message(panic.as_ref())
                );
            }
        }
    }
}

impl fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sinks = self.sinks.read().map(|s| s.len()).unwrap_or(0);
        let handlers = self.handlers.read().map(|h| h.len()).unwrap_or(0);
        f.debug_struct("Aggregator")
            .field("detector", &self.detector)
            .field("sinks", &sinks)
            .field("handlers", &handlers)
            .finish()
    }
}
