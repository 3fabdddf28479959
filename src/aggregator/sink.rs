use super::OperationSummary;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Consumer of finalized operation summaries (formatter, log writer, ...)
pub trait OperationSink: Send + Sync {
    /// Short name used in diagnostics
    fn name(&self) -> &str {
        "sink"
    }

    fn consume(&self, summary: &Arc<OperationSummary>);
}

/// Keeps every summary in memory
#[derive(Debug, Default)]
pub struct CollectingSink {
    summaries: Mutex<Vec<Arc<OperationSummary>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summaries(&self) -> Vec<Arc<OperationSummary>> {
        match self.summaries.lock() {
            Ok(summaries) => summaries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Remove and return everything collected so far
    pub fn take(&self) -> Vec<Arc<OperationSummary>> {
        match self.summaries.lock() {
            Ok(mut summaries) => std::mem::take(&mut *summaries),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    pub fn len(&self) -> usize {
        self.summaries.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl OperationSink for CollectingSink {
    fn name(&self) -> &str {
        "collecting"
    }

    fn consume(&self, summary: &Arc<OperationSummary>) {
        match self.summaries.lock() {
            Ok(mut summaries) => summaries.push(Arc::clone(summary)),
            Err(poisoned) => poisoned.into_inner().push(Arc::clone(summary)),
        }
    }
}

/// Emits one `info!` event per completed operation
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl OperationSink for TracingSink {
    fn name(&self) -> &str {
        "tracing"
    }

    fn consume(&self, summary: &Arc<OperationSummary>) {
        let record = &summary.record;
        let clustered: usize = summary.meta_operations.iter().map(|m| m.len()).sum();
        info!(
            operation = %record.id,
            name = %record.name,
            status = ?record.status,
            duration_ms = record.duration_ms(),
            sub_operations = record.sub_operations.len(),
            errors = record.error_count(),
            meta_operations = summary.meta_operations.len(),
            clustered,
            "operation completed"
        );
    }
}
