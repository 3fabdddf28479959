use crate::aggregator::{Aggregator, OperationSummary};
use crate::clock::{Clock, SystemClock};
use crate::detector::panic_message;
use crate::error_analysis::{ErrorAnalysis, ErrorClassifier, ErrorContext};
use crate::record::{
    CallerSite, OperationId, OperationRecord, SubOperationRecord, SubOperationStatus,
};
use crate::result_shape::{infer_status, ResultShape};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Error recorded on inner operations closed by an outer `end`
pub const IMPLICIT_CLOSE: &str = "closed implicitly by parent";

/// Error recorded on operations force-closed by a timeout
pub const TIMEOUT_MARKER: &str = "timeout";

/// Error recorded on calls still running when their operation closed
pub const ABANDONED_CALL: &str = "operation closed before call completed";

/// Handle to an open operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationHandle {
    id: OperationId,
}

impl OperationHandle {
    pub fn id(&self) -> OperationId {
        self.id
    }
}

/// Handle to a started sub-operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubOperationHandle {
    operation: OperationId,
    step: u32,
}

impl SubOperationHandle {
    pub fn operation(&self) -> OperationId {
        self.operation
    }

    pub fn step(&self) -> u32 {
        self.step
    }
}

/// Description of one instrumented call
///
/// `Call::new` captures the location it is written at as the caller site.
///
/// # Example
/// ```
/// use racimo::context::Call;
///
/// let call = Call::new("SET_VALUE", "pump").param("rate", 4.5);
/// assert_eq!(call.operation, "SET_VALUE");
/// assert!(call.caller.as_ref().unwrap().file.ends_with(".rs"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub operation: String,
    pub target: String,
    pub caller: Option<CallerSite>,
    pub params: Map<String, Value>,
}

impl Call {
    #[track_caller]
    pub fn new(operation: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            target: target.into(),
            caller: Some(CallerSite::here()),
            params: Map::new(),
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

    /// Add one keyword argument
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

struct Frame {
    record: OperationRecord,
    /// Steps started but not finished, innermost last
    in_flight: Vec<u32>,
}

/// Per-thread stack of in-flight operations
///
/// # Example
/// ```
/// use racimo::aggregator::Aggregator;
/// use racimo::context::{Call, ContextStack};
/// use racimo::result_shape::ResultShape;
/// use std::sync::Arc;
///
/// let mut stack = ContextStack::new(Arc::new(Aggregator::default()));
/// let op = stack.begin("load_project");
/// stack.add_metric("files", 3);
/// stack.record_sub_operation(Call::new("LOAD_FILE", "disk"), ResultShape::Boolean(true), None);
///
/// let summary = stack.end(op, None).unwrap();
/// assert_eq!(summary.record.sub_operations.len(), 1);
/// ```
pub struct ContextStack {
    aggregator: Arc<Aggregator>,
    clock: Arc<dyn Clock>,
    classifier: ErrorClassifier,
    frames: Vec<Frame>,
}

impl ContextStack {
    pub fn new(aggregator: Arc<Aggregator>) -> Self {
        Self::with_clock(aggregator, Arc::new(SystemClock))
    }

    pub fn with_clock(aggregator: Arc<Aggregator>, clock: Arc<dyn Clock>) -> Self {
        Self {
            aggregator,
            clock,
            classifier: ErrorClassifier::new(),
            frames: Vec::new(),
        }
    }

    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    /// Number of open operations
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Innermost open operation
    pub fn current(&self) -> Option<OperationHandle> {
        self.frames.last().map(|f| OperationHandle { id: f.record.id })
    }

    /// Innermost open operation's record as recorded so far
    pub fn current_record(&self) -> Option<&OperationRecord> {
        self.frames.last().map(|f| &f.record)
    }

    /// Open an operation nested under the current one (if any)
    pub fn begin(&mut self, name: impl Into<String>) -> OperationHandle {
        let id = OperationId::next();
        let parent_id = self.frames.last().map(|f| f.record.id);
        let record = OperationRecord::new(id, name, parent_id, self.clock.now_nanos());
        trace!(
            operation = %id,
            name = %record.name,
            depth = self.frames.len(),
            "operation started"
        );

        self.frames.push(Frame {
            record,
            in_flight: Vec::new(),
        });
        OperationHandle { id }
    }

    /// Set a metric on the current operation; reported and ignored when none is open
    pub fn add_metric(&mut self, key: impl Into<String>, value: impl Into<Value>) -> bool {
        let key = key.into();
        match self.frames.last_mut() {
            Some(frame) => {
                frame.record.add_metric(key, value);
                true
            }
            None => {
                warn!(key = %key, "add_metric called with no active operation");
                false
            }
        }
    }

    /// Close an operation; a supplied error marks it FAILED
    ///
    /// Operations opened inside `handle` and still open are closed first as
    /// FAILED with [`IMPLICIT_CLOSE`]. Returns the summary when a root
    /// operation closes.
    pub fn end(
        &mut self,
        handle: OperationHandle,
        error: Option<String>,
    ) -> Option<Arc<OperationSummary>> {
        self.close(handle, error, false)
    }

    /// Force-close an operation that exceeded its deadline
    pub fn end_timed_out(&mut self, handle: OperationHandle) -> Option<Arc<OperationSummary>> {
        self.close(handle, Some(TIMEOUT_MARKER.to_string()), true)
    }

    fn close(
        &mut self,
        handle: OperationHandle,
        error: Option<String>,
        timed_out: bool,
    ) -> Option<Arc<OperationSummary>> {
        if self.frames.is_empty() {
            warn!(operation = %handle.id, "end_operation called with no active operation");
            return None;
        }
        let Some(position) = self.frames.iter().rposition(|f| f.record.id == handle.id) else {
            warn!(operation = %handle.id, "end_operation for an operation that is not open");
            return None;
        };

        while self.frames.len() > position + 1 {
            if let Some(inner) = self.frames.pop() {
                warn!(
                    operation = %inner.record.id,
                    name = %inner.record.name,
                    "operation still open when its parent ended"
                );
                self.finalize(inner, Some(IMPLICIT_CLOSE.to_string()));
            }
        }

        let mut frame = self.frames.pop()?;
        if timed_out {
            frame.record.add_metric("timeout", true);
        }
        self.finalize(frame, error)
    }

    fn finalize(
        &mut self,
        mut frame: Frame,
        error: Option<String>,
    ) -> Option<Arc<OperationSummary>> {
        let now = self.clock.now_nanos();
        let id = frame.record.id;

        while let Some(step) = frame.in_flight.pop() {
            if let Some(sub) = frame.record.sub_operation_mut(step) {
                debug!(operation = %id, step, "abandoning unfinished call");
                complete(&self.classifier, sub, now, ResultShape::Absent, Some(ABANDONED_CALL));
            }
        }

        frame.record.close(now, error);
        trace!(
            operation = %frame.record.id,
            status = ?frame.record.status,
            sub_operations = frame.record.sub_operations.len(),
            "operation closed"
        );

        match self.frames.last_mut() {
            Some(parent) => {
                parent.record.children.push(frame.record);
                None
            }
            None => Some(self.aggregator.submit(frame.record)),
        }
    }

    /// Record the start of a call inside the current operation
    ///
    /// A call started while another call of the same operation is still in
    /// flight is recorded as that call's child.
    pub fn start_sub_operation(&mut self, call: Call) -> Option<SubOperationHandle> {
        let now = self.clock.now_nanos();
        let Some(frame) = self.frames.last_mut() else {
            warn!(
                operation = %call.operation,
                target = %call.target,
                "sub-operation recorded with no active operation"
            );
            return None;
        };

        let step = frame.record.next_step();
        let mut record = SubOperationRecord::new(step, call.operation, call.target, now)
            .with_params(call.params);
        record.caller = call.caller;
        record.parent_step = frame.in_flight.last().copied();

        frame.record.sub_operations.push(record);
        frame.in_flight.push(step);

        Some(SubOperationHandle {
            operation: frame.record.id,
            step,
        })
    }

    /// Record the outcome of a started call
    ///
    /// Status is inferred from `raw` (and `raised`, the message of an error the
    /// call raised); failed calls get an [`ErrorAnalysis`] attached. Returns
    /// `None` if the handle is stale or the call was already finished.
    pub fn finish_sub_operation(
        &mut self,
        handle: SubOperationHandle,
        raw: ResultShape,
        raised: Option<&str>,
    ) -> Option<SubOperationStatus> {
        let now = self.clock.now_nanos();
        let Some(frame) = self
            .frames
            .iter_mut()
            .rev()
            .find(|f| f.record.id == handle.operation)
        else {
            warn!(
                operation = %handle.operation,
                step = handle.step,
                "sub-operation finished after its operation closed"
            );
            return None;
        };

        frame.in_flight.retain(|&step| step != handle.step);
        let sub = frame.record.sub_operation_mut(handle.step)?;
        let status = complete(&self.classifier, sub, now, raw, raised);
        if status.is_none() {
            warn!(
                operation = %handle.operation,
                step = handle.step,
                "sub-operation finished twice"
            );
        }
        status
    }

    /// Record a call that has already completed
    pub fn record_sub_operation(
        &mut self,
        call: Call,
        raw: ResultShape,
        raised: Option<&str>,
    ) -> Option<SubOperationStatus> {
        let handle = self.start_sub_operation(call)?;
        self.finish_sub_operation(handle, raw, raised)
    }

    /// Run `f` as an instrumented call
    ///
    /// `Ok` values are serialized into the raw result; an `Err` is recorded as
    /// a raised error with its display text. `f` receives the stack so it can
    /// record nested calls, and its result is returned unchanged.
    pub fn call_sub_operation<T, E, F>(&mut self, call: Call, f: F) -> Result<T, E>
    where
        T: Serialize,
        E: fmt::Display,
        F: FnOnce(&mut Self) -> Result<T, E>,
    {
        let handle = self.start_sub_operation(call);
        let outcome = f(self);
        if let Some(handle) = handle {
            let (raw, raised) = outcome_shape(&outcome);
            self.finish_sub_operation(handle, raw, raised.as_deref());
        }
        outcome
    }
}

impl Drop for ContextStack {
    fn drop(&mut self) {
        if !self.frames.is_empty() {
            warn!(open = self.frames.len(), "context stack dropped with open operations");
        }
    }
}

impl fmt::Debug for ContextStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextStack")
            .field("depth", &self.frames.len())
            .field("clock", &self.clock)
            .finish()
    }
}

/// Raw result and raised message of a call outcome
pub(crate) fn outcome_shape<T: Serialize, E: fmt::Display>(
    outcome: &Result<T, E>,
) -> (ResultShape, Option<String>) {
    match outcome {
        Ok(value) => {
            let raw = serde_json::to_value(value)
                .map(ResultShape::from)
                .unwrap_or_else(|_| ResultShape::Opaque(std::any::type_name::<T>().to_string()));
            (raw, None)
        }
        Err(err) => (ResultShape::Absent, Some(err.to_string())),
    }
}

/// Write status, timing and (for failures) error analysis onto a running call
fn complete(
    classifier: &ErrorClassifier,
    sub: &mut SubOperationRecord,
    end_nanos: u64,
    raw: ResultShape,
    raised: Option<&str>,
) -> Option<SubOperationStatus> {
    let status = infer_status(&raw, raised.is_some());
    if !sub.complete(end_nanos, raw, status) {
        return None;
    }
    trace!(step = sub.step, operation = %sub.operation, %status, "sub-operation completed");

    if status == SubOperationStatus::Error {
        let context = ErrorContext {
            operation: sub.operation.clone(),
            target: sub.target.clone(),
            parameters: sub.params.clone(),
            start_nanos: sub.start_nanos,
            end_nanos: sub.end_nanos,
        };
        let analysis = catch_unwind(AssertUnwindSafe(|| {
            classifier.analyze(&sub.raw_result, raised, context.clone())
        }))
        .unwrap_or_else(|panic| {
            debug!(
                step = sub.step,
                "error classification panicked: {}",
                panic_message(panic.as_ref())
            );
            ErrorAnalysis::unknown(raised, context)
        });
        sub.attach_error(analysis);
    }
    Some(status)
}
