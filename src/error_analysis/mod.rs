// Error Classification for Failed Sub-Operations
//
// A failed call is annotated with a category, a severity and a remediation hint
// so the rendered log says *what kind* of failure happened, not only that one did.
//
// Two-stage heuristic:
// 1. Keyword families scanned in the error message (configuration, communication,
//    file/path, validation).
// 2. Operation-name prefix families (LOAD_/SAVE_ → file, CALC_/FIT_ → calculation, ...).
//
// Returned errors and raised errors land in the same `ErrorAnalysis`, so nothing
// downstream needs to know which one it was.

mod classifier;

pub use classifier::ErrorClassifier;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Fallback message when a failure carries no description
pub const UNKNOWN_ERROR: &str = "Unknown error";

/// Severity of a failure (Critical > High > Medium > Low)
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "LOW"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::High => write!(f, "HIGH"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Broad failure category
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    ConfigurationError,
    CommunicationError,
    FileOperation,
    DataValidation,
    Calculation,
    Unknown,
}

impl ErrorCategory {
    /// Severity before message keywords are considered
    pub fn default_severity(self) -> Severity {
        match self {
            ErrorCategory::Calculation | ErrorCategory::FileOperation => Severity::High,
            ErrorCategory::ConfigurationError
            | ErrorCategory::CommunicationError
            | ErrorCategory::Unknown => Severity::Medium,
            ErrorCategory::DataValidation => Severity::Low,
        }
    }

    /// Fixed remediation hint for this category
    pub fn remediation(self) -> &'static str {
        match self {
            ErrorCategory::ConfigurationError => {
                "Review the configuration values and reload the settings"
            }
            ErrorCategory::CommunicationError => {
                "Check the connection to the target component and retry"
            }
            ErrorCategory::FileOperation => "Verify the file path exists and is accessible",
            ErrorCategory::DataValidation => "Validate the input data and parameter values",
            ErrorCategory::Calculation => {
                "Check model parameters and input ranges before re-running the calculation"
            }
            ErrorCategory::Unknown => "Inspect the operation log for details",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorCategory::CommunicationError => "COMMUNICATION_ERROR",
            ErrorCategory::FileOperation => "FILE_OPERATION",
            ErrorCategory::DataValidation => "DATA_VALIDATION",
            ErrorCategory::Calculation => "CALCULATION",
            ErrorCategory::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// Where a failure happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ErrorContext {
    pub operation: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
    pub start_nanos: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_nanos: Option<u64>,
}

/// Classified failure attached to a sub-operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorAnalysis {
    pub category: ErrorCategory,
    pub message: String,
    pub context: ErrorContext,
    pub severity: Severity,
    pub suggested_action: String,
}

impl ErrorAnalysis {
    /// Degraded analysis used when classification itself fails
    pub fn unknown(message: Option<&str>, context: ErrorContext) -> Self {
        let category = ErrorCategory::Unknown;
        let severity = category.default_severity();
        Self {
            category,
            message: message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or(UNKNOWN_ERROR)
                .to_string(),
            context,
            severity,
            suggested_action: suggested_action(category, severity),
        }
    }
}

/// Remediation hint with a severity-dependent prefix
pub fn suggested_action(category: ErrorCategory, severity: Severity) -> String {
    match severity {
        Severity::Critical => format!("URGENT: {}", category.remediation()),
        Severity::High => format!("Important: {}", category.remediation()),
        Severity::Medium | Severity::Low => category.remediation().to_string(),
    }
}

#[cfg(test)]
mod tests;
