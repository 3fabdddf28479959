// Tests for the operation context stack

use super::*;
use crate::aggregator::{Aggregator, CollectingSink};
use crate::clock::{ManualClock, NANOS_PER_MS};
use crate::error_analysis::{ErrorCategory, Severity};
use crate::record::{CallerSite, OperationStatus, SubOperationStatus};
use crate::result_shape::ResultShape;
use serde_json::json;
use std::sync::Arc;

fn stack() -> (ContextStack, Arc<ManualClock>, Arc<CollectingSink>) {
    let clock = Arc::new(ManualClock::new(0));
    let sink = Arc::new(CollectingSink::new());
    let aggregator = Arc::new(Aggregator::default());
    aggregator.add_sink(sink.clone());
    (ContextStack::with_clock(aggregator, clock.clone()), clock, sink)
}

#[test]
fn test_root_operation_reaches_aggregator() {
    let (mut stack, clock, sink) = stack();
    let op = stack.begin("load");
    clock.advance_ms(12);

    let summary = stack.end(op, None).unwrap();
    assert_eq!(summary.record.status, OperationStatus::Succeeded);
    assert_eq!(summary.record.duration_ms(), 12.0);
    assert!(summary.record.is_root());
    assert_eq!(sink.len(), 1);
    assert!(stack.is_empty());
}

#[test]
fn test_current_record_tracks_innermost_operation() {
    let (mut stack, _, _) = stack();
    assert!(stack.current_record().is_none());

    let outer = stack.begin("outer");
    stack.record_sub_operation(Call::new("GET_VALUE", "pump"), ResultShape::Boolean(true), None);
    let record = stack.current_record().unwrap();
    assert_eq!(record.name, "outer");
    assert_eq!(record.status, OperationStatus::Running);
    assert_eq!(record.sub_operations.len(), 1);

    let inner = stack.begin("inner");
    let record = stack.current_record().unwrap();
    assert_eq!(record.name, "inner");
    assert_eq!(record.parent_id, Some(outer.id()));
    assert!(record.sub_operations.is_empty());

    stack.end(inner, None);
    assert_eq!(stack.current_record().unwrap().name, "outer");
    stack.end(outer, None);
    assert!(stack.current_record().is_none());
}

#[test]
fn test_error_marks_operation_failed() {
    let (mut stack, _, _) = stack();
    let op = stack.begin("save");
    let summary = stack.end(op, Some("disk full".into())).unwrap();

    assert_eq!(summary.record.status, OperationStatus::Failed);
    assert_eq!(summary.record.error.as_deref(), Some("disk full"));
}

#[test]
fn test_nested_operations_attach_to_parent() {
    let (mut stack, _, sink) = stack();
    let outer = stack.begin("outer");
    let inner = stack.begin("inner");
    assert_eq!(stack.depth(), 2);
    assert_eq!(stack.current(), Some(inner));

    assert!(stack.end(inner, None).is_none(), "nested close is not handed off");
    assert!(sink.is_empty());

    let summary = stack.end(outer, None).unwrap();
    assert_eq!(summary.record.children.len(), 1);
    let child = &summary.record.children[0];
    assert_eq!(child.name, "inner");
    assert_eq!(child.parent_id, Some(outer.id()));
}

#[test]
fn test_ending_outer_closes_inner_implicitly() {
    let (mut stack, _, _) = stack();
    let outer = stack.begin("outer");
    let _middle = stack.begin("middle");
    let _inner = stack.begin("inner");

    let summary = stack.end(outer, None).unwrap();
    assert_eq!(summary.record.status, OperationStatus::Succeeded);

    let middle = &summary.record.children[0];
    assert_eq!(middle.status, OperationStatus::Failed);
    assert_eq!(middle.error.as_deref(), Some(IMPLICIT_CLOSE));
    assert_eq!(middle.children[0].error.as_deref(), Some(IMPLICIT_CLOSE));
    assert!(stack.is_empty());
}

#[test]
fn test_usage_errors_are_ignored() {
    let (mut stack, _, sink) = stack();
    assert!(!stack.add_metric("orphan", 1));
    assert!(stack
        .record_sub_operation(Call::new("GET_VALUE", "pump"), ResultShape::Boolean(true), None)
        .is_none());

    let op = stack.begin("once");
    stack.end(op, None);
    // second end: empty stack
    assert!(stack.end(op, None).is_none());
    assert_eq!(sink.len(), 1);
}

#[test]
fn test_stale_handle_is_ignored() {
    let (mut stack, _, _) = stack();
    let first = stack.begin("first");
    stack.end(first, None);

    let second = stack.begin("second");
    assert!(stack.end(first, None).is_none());
    assert_eq!(stack.depth(), 1);
    assert!(stack.end(second, None).is_some());
}

#[test]
fn test_metrics_keep_insertion_order() {
    let (mut stack, _, _) = stack();
    let op = stack.begin("metrics");
    stack.add_metric("zeta", 1);
    stack.add_metric("alpha", json!(["a", "b"]));
    stack.add_metric("mid", 2.5);

    let summary = stack.end(op, None).unwrap();
    let keys: Vec<&str> = summary.record.metrics.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
}

#[test]
fn test_steps_follow_creation_order() {
    let (mut stack, clock, _) = stack();
    let op = stack.begin("steps");
    for name in ["A", "B", "C"] {
        stack.record_sub_operation(Call::new(name, "t"), ResultShape::Boolean(true), None);
        clock.advance_ms(1);
    }

    let summary = stack.end(op, None).unwrap();
    let steps: Vec<(u32, &str)> = summary
        .record
        .sub_operations
        .iter()
        .map(|s| (s.step, s.operation.as_str()))
        .collect();
    assert_eq!(steps, vec![(1, "A"), (2, "B"), (3, "C")]);
}

#[test]
fn test_two_phase_recording_measures_duration() {
    let (mut stack, clock, _) = stack();
    let op = stack.begin("timed");
    let call = stack.start_sub_operation(Call::new("FIT_MODEL", "solver")).unwrap();
    clock.advance_ms(30);
    assert_eq!(
        stack.finish_sub_operation(call, ResultShape::from(json!({"chi2": 1.2})), None),
        Some(SubOperationStatus::Ok)
    );
    // finishing twice is refused
    assert!(stack.finish_sub_operation(call, ResultShape::Absent, None).is_none());

    let summary = stack.end(op, None).unwrap();
    let sub = &summary.record.sub_operations[0];
    assert_eq!(sub.duration_nanos(), 30 * NANOS_PER_MS);
    assert!(sub.is_ok());
}

#[test]
fn test_nested_calls_record_parent_step() {
    let (mut stack, _, _) = stack();
    let op = stack.begin("dispatch");
    let outer = stack.start_sub_operation(Call::new("APPLY", "ui")).unwrap();
    stack.record_sub_operation(Call::new("SET_A", "device"), ResultShape::Boolean(true), None);
    stack.record_sub_operation(Call::new("SET_B", "device"), ResultShape::Boolean(true), None);
    stack.finish_sub_operation(outer, ResultShape::Boolean(true), None);
    stack.record_sub_operation(Call::new("REFRESH", "ui"), ResultShape::Boolean(true), None);

    let summary = stack.end(op, None).unwrap();
    let parents: Vec<Option<u32>> =
        summary.record.sub_operations.iter().map(|s| s.parent_step).collect();
    assert_eq!(parents, vec![None, Some(1), Some(1), None]);
}

#[test]
fn test_failed_call_gets_error_analysis() {
    let (mut stack, _, _) = stack();
    let op = stack.begin("connect");
    let status = stack.record_sub_operation(
        Call::new("GET_VALUE", "controller").param("channel", 3),
        ResultShape::from(json!({"success": false, "error": "connection timeout"})),
        None,
    );
    assert_eq!(status, Some(SubOperationStatus::Error));

    let summary = stack.end(op, None).unwrap();
    let error = summary.record.sub_operations[0].error.as_ref().unwrap();
    assert_eq!(error.category, ErrorCategory::CommunicationError);
    assert_eq!(error.message, "connection timeout");
    assert_eq!(error.context.operation, "GET_VALUE");
    assert_eq!(error.context.target, "controller");
    assert_eq!(error.context.parameters["channel"], 3);
}

#[test]
fn test_raised_error_without_message_still_described() {
    let (mut stack, _, _) = stack();
    let op = stack.begin("raise");
    stack.record_sub_operation(Call::new("MYSTERY", "x"), ResultShape::Absent, Some(""));

    let summary = stack.end(op, None).unwrap();
    let sub = &summary.record.sub_operations[0];
    assert!(sub.is_error());
    assert!(!sub.error.as_ref().unwrap().message.is_empty());
}

#[test]
fn test_critical_raised_error() {
    let (mut stack, _, _) = stack();
    let op = stack.begin("solve");
    stack.record_sub_operation(
        Call::new("CALC_SPECTRUM", "solver"),
        ResultShape::Absent,
        Some("critical system failure"),
    );

    let summary = stack.end(op, None).unwrap();
    let error = summary.record.sub_operations[0].error.as_ref().unwrap();
    assert_eq!(error.severity, Severity::Critical);
    assert!(error.suggested_action.starts_with("URGENT"));
}

#[test]
fn test_unfinished_calls_are_abandoned_on_close() {
    let (mut stack, _, _) = stack();
    let op = stack.begin("abandon");
    stack.start_sub_operation(Call::new("WAIT", "device"));

    let summary = stack.end(op, None).unwrap();
    let sub = &summary.record.sub_operations[0];
    assert!(sub.is_error());
    assert!(sub.end_nanos.is_some());
    assert_eq!(sub.error.as_ref().unwrap().message, ABANDONED_CALL);
}

#[test]
fn test_finish_after_close_is_ignored() {
    let (mut stack, _, _) = stack();
    let op = stack.begin("late");
    let call = stack.start_sub_operation(Call::new("WAIT", "device")).unwrap();
    stack.end(op, None);

    assert!(stack
        .finish_sub_operation(call, ResultShape::Boolean(true), None)
        .is_none());
}

#[test]
fn test_timeout_close() {
    let (mut stack, _, _) = stack();
    let op = stack.begin("stuck");
    let summary = stack.end_timed_out(op).unwrap();

    assert_eq!(summary.record.status, OperationStatus::Failed);
    assert_eq!(summary.record.error.as_deref(), Some(TIMEOUT_MARKER));
    assert_eq!(summary.record.metrics["timeout"], true);
}

#[test]
fn test_call_sub_operation_ok_and_err() {
    let (mut stack, _, _) = stack();
    let op = stack.begin("calls");

    let value: Result<u32, String> =
        stack.call_sub_operation(Call::new("GET_COUNT", "db"), |_| Ok(7));
    assert_eq!(value, Ok(7));

    let failed: Result<u32, String> =
        stack.call_sub_operation(Call::new("LOAD_FILE", "disk"), |_| {
            Err("file not found".to_string())
        });
    assert!(failed.is_err());

    let summary = stack.end(op, None).unwrap();
    let subs = &summary.record.sub_operations;
    assert!(subs[0].is_ok());
    assert_eq!(subs[0].raw_result, ResultShape::from(json!(7)));
    assert!(subs[1].is_error());
    assert_eq!(subs[1].error.as_ref().unwrap().message, "file not found");
    assert_eq!(subs[1].error.as_ref().unwrap().category, ErrorCategory::FileOperation);
}

#[test]
fn test_call_sub_operation_allows_nested_calls() {
    let (mut stack, _, _) = stack();
    let op = stack.begin("nested");

    let result: Result<bool, String> = stack.call_sub_operation(Call::new("APPLY", "ui"), |stack| {
        stack.record_sub_operation(Call::new("SET_A", "device"), ResultShape::Boolean(true), None);
        Ok(true)
    });
    assert_eq!(result, Ok(true));

    let summary = stack.end(op, None).unwrap();
    assert_eq!(summary.record.sub_operations[1].parent_step, Some(1));
}

#[test]
fn test_call_captures_caller_site() {
    let call = Call::new("SET_VALUE", "pump");
    let caller = call.caller.unwrap();
    assert!(caller.file.ends_with("tests.rs"));
    assert!(caller.line > 0);

    let explicit = Call::new("SET_VALUE", "pump").with_caller(CallerSite::new("dispatcher.rs", 10));
    assert_eq!(explicit.caller.unwrap().line, 10);
}

#[test]
fn test_failed_root_with_unclassifiable_payload() {
    let (mut stack, _, _) = stack();
    let op = stack.begin("unknown");
    stack.record_sub_operation(
        Call::new("PING", "x"),
        ResultShape::from(json!({"error": true})),
        None,
    );

    let summary = stack.end(op, None).unwrap();
    let error = summary.record.sub_operations[0].error.as_ref().unwrap();
    assert_eq!(error.category, ErrorCategory::Unknown);
    assert!(!error.message.is_empty());
}
