// Tests for failure classification
//
// Covers both classification stages, severity adjustment and the
// raised-vs-returned normalization.

use super::*;
use crate::result_shape::ResultShape;
use serde_json::json;

fn context(operation: &str) -> ErrorContext {
    ErrorContext {
        operation: operation.to_string(),
        target: "controller".to_string(),
        ..ErrorContext::default()
    }
}

fn error_payload(message: &str) -> ResultShape {
    ResultShape::from(json!({ "error": message }))
}

#[test]
fn test_connection_timeout_is_communication() {
    let classifier = ErrorClassifier::new();
    let category = classifier.classify(&error_payload("connection timeout"), "SET_VALUE", "pump");
    assert_eq!(category, ErrorCategory::CommunicationError);
}

#[test]
fn test_message_families_in_priority_order() {
    let classifier = ErrorClassifier::new();

    // configuration beats communication
    assert_eq!(
        classifier.classify(&error_payload("config server connection lost"), "X", "t"),
        ErrorCategory::ConfigurationError
    );
    // file beats validation
    assert_eq!(
        classifier.classify(&error_payload("file not found"), "X", "t"),
        ErrorCategory::FileOperation
    );
    assert_eq!(
        classifier.classify(&error_payload("Invalid value for channel"), "X", "t"),
        ErrorCategory::DataValidation
    );
}

#[test]
fn test_message_without_keywords_falls_back_to_prefix() {
    let classifier = ErrorClassifier::new();
    assert_eq!(
        classifier.classify(&error_payload("something odd"), "FIT_PEAKS", "t"),
        ErrorCategory::Calculation
    );
}

#[test]
fn test_operation_prefix_families() {
    let classifier = ErrorClassifier::new();
    let raw = ResultShape::Absent;

    let cases = [
        ("LOAD_FILE", ErrorCategory::FileOperation),
        ("export_csv", ErrorCategory::FileOperation),
        ("CALC_AREA", ErrorCategory::Calculation),
        ("DECONVOLUTION_RUN", ErrorCategory::Calculation),
        ("CONFIG_APPLY", ErrorCategory::ConfigurationError),
        ("GET_VALUE", ErrorCategory::DataValidation),
        ("VALIDATE_INPUT", ErrorCategory::DataValidation),
        ("PING", ErrorCategory::Unknown),
    ];
    for (operation, expected) in cases {
        assert_eq!(classifier.classify(&raw, operation, "t"), expected, "{operation}");
    }
}

#[test]
fn test_default_severities() {
    assert_eq!(ErrorCategory::Calculation.default_severity(), Severity::High);
    assert_eq!(ErrorCategory::FileOperation.default_severity(), Severity::High);
    assert_eq!(ErrorCategory::DataValidation.default_severity(), Severity::Low);
    assert_eq!(ErrorCategory::Unknown.default_severity(), Severity::Medium);
}

#[test]
fn test_catastrophic_keywords_escalate_to_critical() {
    let classifier = ErrorClassifier::new();
    for category in [
        ErrorCategory::DataValidation,
        ErrorCategory::CommunicationError,
        ErrorCategory::Unknown,
    ] {
        assert_eq!(
            classifier.severity(category, "critical system failure"),
            Severity::Critical
        );
    }
    assert_eq!(
        classifier.severity(ErrorCategory::Unknown, "process CRASHED"),
        Severity::Critical
    );
}

#[test]
fn test_failure_and_warning_keywords() {
    let classifier = ErrorClassifier::new();
    assert_eq!(
        classifier.severity(ErrorCategory::DataValidation, "write failed"),
        Severity::High
    );
    assert_eq!(
        classifier.severity(ErrorCategory::Calculation, "warning: slow convergence"),
        Severity::Medium
    );
    assert_eq!(
        classifier.severity(ErrorCategory::DataValidation, "deprecated call"),
        Severity::Low
    );
}

#[test]
fn test_warning_keywords_cap_severity_at_medium() {
    let classifier = ErrorClassifier::new();
    for message in ["warning: value clamped", "retrying read"] {
        assert_eq!(
            classifier.severity(ErrorCategory::FileOperation, message),
            Severity::Medium
        );
        assert_eq!(
            classifier.severity(ErrorCategory::Unknown, message),
            Severity::Medium
        );
        assert_eq!(
            classifier.severity(ErrorCategory::DataValidation, message),
            Severity::Low
        );
    }
}

#[test]
fn test_suggested_action_prefixes() {
    assert!(
        suggested_action(ErrorCategory::FileOperation, Severity::Critical).starts_with("URGENT: ")
    );
    assert!(
        suggested_action(ErrorCategory::FileOperation, Severity::High).starts_with("Important: ")
    );
    assert_eq!(
        suggested_action(ErrorCategory::Unknown, Severity::Medium),
        ErrorCategory::Unknown.remediation()
    );
}

#[test]
fn test_raised_and_returned_errors_analyze_alike() {
    let classifier = ErrorClassifier::new();

    let returned = classifier.analyze(
        &error_payload("connection refused"),
        None,
        context("GET_VALUE"),
    );
    let raised = classifier.analyze(
        &ResultShape::Absent,
        Some("connection refused"),
        context("GET_VALUE"),
    );

    assert_eq!(returned.category, raised.category);
    assert_eq!(returned.severity, raised.severity);
    assert_eq!(returned.message, raised.message);
    assert_eq!(returned.suggested_action, raised.suggested_action);
}

#[test]
fn test_analysis_always_has_a_message() {
    let classifier = ErrorClassifier::new();

    let absent = classifier.analyze(&ResultShape::Absent, None, context("PING"));
    assert_eq!(absent.message, "No result returned");

    let opaque =
        classifier.analyze(&ResultShape::Opaque("Thing".into()), Some("  "), context("PING"));
    assert_eq!(opaque.message, UNKNOWN_ERROR);
    assert_eq!(opaque.category, ErrorCategory::Unknown);
}

#[test]
fn test_unknown_fallback() {
    let analysis = ErrorAnalysis::unknown(None, context("GET_VALUE"));
    assert_eq!(analysis.category, ErrorCategory::Unknown);
    assert_eq!(analysis.message, UNKNOWN_ERROR);
    assert_eq!(analysis.context.operation, "GET_VALUE");
}

#[test]
fn test_severity_ordering() {
    assert!(Severity::Critical > Severity::High);
    assert!(Severity::High > Severity::Medium);
    assert!(Severity::Medium > Severity::Low);
}

#[test]
fn test_category_display() {
    assert_eq!(ErrorCategory::CommunicationError.to_string(), "COMMUNICATION_ERROR");
    assert_eq!(
        serde_json::to_value(ErrorCategory::FileOperation).unwrap(),
        json!("FILE_OPERATION")
    );
}
