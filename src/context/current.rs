//! Thread-local convenience layer over [`ContextStack`]
//!
//! Every thread gets its own stack, created on first use and dropped with the
//! thread. All stacks hand completed root operations to one process-wide
//! aggregator: the one passed to [`install_aggregator`], or a default one if
//! nothing was installed before the first operation.
//!
//! Calls made while this thread's stack is busy (for example from a sink that
//! runs inside `end_operation`) are reported and ignored.
//!
//! # Example
//! ```
//! use racimo::context::{current, Call};
//! use racimo::result_shape::ResultShape;
//!
//! let op = current::begin_operation("apply_preset").unwrap();
//! current::add_metric("preset", "fast");
//! for rate in [1, 2, 3] {
//!     current::record_sub_operation(
//!         Call::new("SET_RATE", "pump").param("rate", rate),
//!         ResultShape::Boolean(true),
//!         None,
//!     );
//! }
//! let summary = current::end_operation(op, None).unwrap();
//! assert_eq!(summary.record.sub_operations.len(), 3);
//! ```

use super::{Call, ContextStack, OperationHandle, SubOperationHandle};
use crate::aggregator::{Aggregator, OperationSummary};
use crate::record::SubOperationStatus;
use crate::result_shape::ResultShape;
use serde::Serialize;
use serde_json::Value;
use std::cell::RefCell;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::warn;

static AGGREGATOR: OnceLock<Arc<Aggregator>> = OnceLock::new();

thread_local! {
    static STACK: RefCell<Option<ContextStack>> = const { RefCell::new(None) };
}

/// Install the process-wide aggregator
///
/// Returns false if one is already in place (installed earlier or created by
/// a first operation); the existing aggregator stays.
pub fn install_aggregator(aggregator: Arc<Aggregator>) -> bool {
    AGGREGATOR.set(aggregator).is_ok()
}

/// The process-wide aggregator, creating a default one if needed
pub fn aggregator() -> Arc<Aggregator> {
    Arc::clone(AGGREGATOR.get_or_init(|| Arc::new(Aggregator::default())))
}

fn with_stack<R>(f: impl FnOnce(&mut ContextStack) -> R) -> Option<R> {
    STACK
        .try_with(|cell| match cell.try_borrow_mut() {
            Ok(mut slot) => {
                let stack = slot.get_or_insert_with(|| ContextStack::new(aggregator()));
                Some(f(stack))
            }
            Err(_) => {
                warn!("operation context re-entered on this thread, call ignored");
                None
            }
        })
        .ok()
        .flatten()
}

pub fn begin_operation(name: impl Into<String>) -> Option<OperationHandle> {
    with_stack(|stack| stack.begin(name))
}

pub fn add_metric(key: impl Into<String>, value: impl Into<Value>) -> bool {
    with_stack(|stack| stack.add_metric(key, value)).unwrap_or(false)
}

pub fn end_operation(
    handle: OperationHandle,
    error: Option<String>,
) -> Option<Arc<OperationSummary>> {
    with_stack(|stack| stack.end(handle, error)).flatten()
}

pub fn end_timed_out(handle: OperationHandle) -> Option<Arc<OperationSummary>> {
    with_stack(|stack| stack.end_timed_out(handle)).flatten()
}

pub fn start_sub_operation(call: Call) -> Option<SubOperationHandle> {
    with_stack(|stack| stack.start_sub_operation(call)).flatten()
}

pub fn finish_sub_operation(
    handle: SubOperationHandle,
    raw: ResultShape,
    raised: Option<&str>,
) -> Option<SubOperationStatus> {
    with_stack(|stack| stack.finish_sub_operation(handle, raw, raised)).flatten()
}

pub fn record_sub_operation(
    call: Call,
    raw: ResultShape,
    raised: Option<&str>,
) -> Option<SubOperationStatus> {
    with_stack(|stack| stack.record_sub_operation(call, raw, raised)).flatten()
}

/// Run `f` as an instrumented call on this thread's stack
///
/// The stack is not borrowed while `f` runs, so `f` may record nested calls
/// through this module.
pub fn call_sub_operation<T, E, F>(call: Call, f: F) -> Result<T, E>
where
    T: Serialize,
    E: fmt::Display,
    F: FnOnce() -> Result<T, E>,
{
    let handle = start_sub_operation(call);
    let outcome = f();
    if let Some(handle) = handle {
        let (raw, raised) = super::stack::outcome_shape(&outcome);
        finish_sub_operation(handle, raw, raised.as_deref());
    }
    outcome
}

/// Open operations on this thread
pub fn depth() -> usize {
    with_stack(|stack| stack.depth()).unwrap_or(0)
}

/// Drop this thread's stack (and any operations still open on it)
pub fn reset() {
    let _ = STACK.try_with(|cell| {
        if let Ok(mut slot) = cell.try_borrow_mut() {
            slot.take();
        }
    });
}
