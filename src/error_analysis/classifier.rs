use crate::error_analysis::{
    suggested_action, ErrorAnalysis, ErrorCategory, ErrorContext, Severity, UNKNOWN_ERROR,
};
use crate::result_shape::ResultShape;

const CONFIGURATION_KEYWORDS: &[&str] = &["config", "setting", "preference", "option"];
const COMMUNICATION_KEYWORDS: &[&str] = &[
    "connection",
    "timeout",
    "timed out",
    "network",
    "socket",
    "communication",
    "unreachable",
    "refused",
    "disconnected",
];
const FILE_KEYWORDS: &[&str] = &["file", "path", "directory", "folder", "permission"];
const VALIDATION_KEYWORDS: &[&str] = &["not found", "missing", "invalid", "format"];

const FILE_VERBS: &[&str] = &["LOAD", "SAVE", "EXPORT", "IMPORT", "READ", "WRITE"];
const CALCULATION_VERBS: &[&str] = &["CALC", "FIT", "OPTIMIZATION", "DECONVOLUTION", "MODEL"];
const CONFIGURATION_NOUNS: &[&str] = &["CONFIG", "SETTING", "PREFERENCE"];
const DATA_VERBS: &[&str] = &["GET", "SET", "UPDATE", "VALIDATE", "CHECK"];

const CATASTROPHIC_KEYWORDS: &[&str] = &["critical", "fatal", "abort", "crash"];
const FAILURE_KEYWORDS: &[&str] = &["fail", "exception", "denied", "corrupt"];
const WARNING_KEYWORDS: &[&str] = &["warning", "deprecated", "retry", "retrying"];

/// Keyword- and prefix-based failure classifier
///
/// # Example
/// ```
/// use racimo::error_analysis::{ErrorCategory, ErrorClassifier, Severity};
/// use racimo::result_shape::ResultShape;
/// use serde_json::json;
///
/// let classifier = ErrorClassifier::new();
/// let raw = ResultShape::from(json!({"error": "connection timeout"}));
/// assert_eq!(
///     classifier.classify(&raw, "GET_VALUE", "pump"),
///     ErrorCategory::CommunicationError
/// );
/// assert_eq!(
///     classifier.severity(ErrorCategory::DataValidation, "critical system failure"),
///     Severity::Critical
/// );
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Categorize a failed call from its raw result and operation name
    pub fn classify(&self, raw: &ResultShape, operation: &str, target: &str) -> ErrorCategory {
        self.classify_message(raw.error_message(), operation, target)
    }

    fn classify_message(
        &self,
        message: Option<&str>,
        operation: &str,
        target: &str,
    ) -> ErrorCategory {
        if let Some(category) = message.and_then(category_from_message) {
            tracing::trace!(operation, target, %category, "classified from error message");
            return category;
        }
        category_from_operation(operation)
    }

    /// Severity for a category, adjusted by keywords in the message
    pub fn severity(&self, category: ErrorCategory, message: &str) -> Severity {
        let lowered = message.to_lowercase();
        let default = category.default_severity();

        if contains_any(&lowered, CATASTROPHIC_KEYWORDS) {
            Severity::Critical
        } else if contains_any(&lowered, FAILURE_KEYWORDS) {
            default.max(Severity::High)
        } else if contains_any(&lowered, WARNING_KEYWORDS) {
            // warnings only lower; a LOW default is never raised to MEDIUM
            default.min(Severity::Medium)
        } else {
            default
        }
    }

    /// Full analysis for a failed call
    ///
    /// A raised error's message takes the place of the payload's `error` string,
    /// so both failure paths classify identically.
    pub fn analyze(
        &self,
        raw: &ResultShape,
        raised: Option<&str>,
        context: ErrorContext,
    ) -> ErrorAnalysis {
        let explicit = raised.or_else(|| raw.error_message());
        let category = self.classify_message(explicit, &context.operation, &context.target);
        let message = explicit
            .filter(|m| !m.trim().is_empty())
            .map(str::to_string)
            .or_else(|| describe_failure(raw).map(str::to_string))
            .unwrap_or_else(|| UNKNOWN_ERROR.to_string());
        let severity = self.severity(category, &message);

        ErrorAnalysis {
            category,
            severity,
            suggested_action: suggested_action(category, severity),
            message,
            context,
        }
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

fn category_from_message(message: &str) -> Option<ErrorCategory> {
    let lowered = message.to_lowercase();
    let families = [
        (CONFIGURATION_KEYWORDS, ErrorCategory::ConfigurationError),
        (COMMUNICATION_KEYWORDS, ErrorCategory::CommunicationError),
        (FILE_KEYWORDS, ErrorCategory::FileOperation),
        (VALIDATION_KEYWORDS, ErrorCategory::DataValidation),
    ];
    families
        .iter()
        .find(|(keywords, _)| contains_any(&lowered, keywords))
        .map(|(_, category)| *category)
}

fn category_from_operation(operation: &str) -> ErrorCategory {
    let upper = operation.to_uppercase();
    let starts = |prefixes: &[&str]| prefixes.iter().any(|p| upper.starts_with(p));

    if starts(FILE_VERBS) {
        ErrorCategory::FileOperation
    } else if starts(CALCULATION_VERBS) {
        ErrorCategory::Calculation
    } else if starts(CONFIGURATION_NOUNS) {
        ErrorCategory::ConfigurationError
    } else if starts(DATA_VERBS) {
        ErrorCategory::DataValidation
    } else {
        ErrorCategory::Unknown
    }
}

/// Short description for failures that carry no message of their own
fn describe_failure(raw: &ResultShape) -> Option<&'static str> {
    match raw {
        ResultShape::Absent => Some("No result returned"),
        ResultShape::Boolean(false) => Some("Call returned false"),
        ResultShape::Sequence(items) if items.is_empty() => Some("Empty result"),
        ResultShape::Table(table) if table.rows == Some(0) => Some("Empty table returned"),
        ResultShape::Mapping(map) if map.is_empty() => Some("Empty mapping returned"),
        ResultShape::Mapping(_) => Some("Call reported failure"),
        _ => None,
    }
}
