// Shared helpers for racimo integration tests

#![allow(dead_code)]

use racimo::clock::NANOS_PER_MS;
use racimo::config::DetectionConfig;
use racimo::detector::MetaOperationDetector;
use racimo::record::{SubOperationRecord, SubOperationStatus};
use racimo::result_shape::ResultShape;
use serde_json::Value;

/// Completed OK sub-operation starting at `start_ms`, lasting 1ms
pub fn ok_call(step: u32, operation: &str, target: &str, start_ms: u64) -> SubOperationRecord {
    let mut record = SubOperationRecord::new(step, operation, target, start_ms * NANOS_PER_MS);
    record.complete(
        (start_ms + 1) * NANOS_PER_MS,
        ResultShape::Boolean(true),
        SubOperationStatus::Ok,
    );
    record
}

/// Completed ERROR sub-operation starting at `start_ms`, lasting 1ms
pub fn failed_call(step: u32, operation: &str, target: &str, start_ms: u64) -> SubOperationRecord {
    let mut record = SubOperationRecord::new(step, operation, target, start_ms * NANOS_PER_MS);
    record.complete(
        (start_ms + 1) * NANOS_PER_MS,
        ResultShape::Absent,
        SubOperationStatus::Error,
    );
    record
}

/// Detector running one strategy with the given parameters
pub fn single_strategy(name: &str, params: Value) -> MetaOperationDetector {
    let config = DetectionConfig::builtin()
        .with_enabled([name])
        .with_params(name, params);
    MetaOperationDetector::from_config(&config).unwrap()
}
