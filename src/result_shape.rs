//! Heterogeneous call results and status inference
//!
//! Instrumented calls return whatever their target returns: a flag, a mapping
//! with `success`/`error` markers, an optional `data` envelope, a table, a bare
//! string, or nothing at all. [`ResultShape`] closes that set into explicit
//! variants and [`infer_status`] applies one fixed precedence over it.
//!
//! # Precedence (first match wins)
//!
//! 1. The call raised → `Error`
//! 2. No value → `Error`
//! 3. Mapping with a `data` envelope → decided by the envelope; mapping without
//!    one → `success` flag, then `error` flag, then non-empty
//! 4. Boolean → used directly
//! 5. Table or sequence → non-empty (uninspectable tables count as `Ok`)
//! 6. Anything else → `Ok`

use crate::record::SubOperationStatus;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Raw result of one instrumented call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "shape", content = "value", rename_all = "snake_case")]
pub enum ResultShape {
    /// The call returned no value
    #[default]
    Absent,
    Boolean(bool),
    Number(serde_json::Number),
    Text(String),
    /// Structured key/value result
    Mapping(Map<String, Value>),
    /// List-like collection
    Sequence(Vec<Value>),
    /// Table-like result (data frame, grid, query result)
    Table(TableShape),
    /// Any other value, described by its type name
    Opaque(String),
}

/// Summary of a table-like result
///
/// `rows` is `None` when the producer could not report its size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TableShape {
    pub rows: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
}

/// Display tag for a result shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeKind {
    Absent,
    Boolean,
    Number,
    Text,
    Mapping,
    Sequence,
    Table,
    Opaque,
}

impl fmt::Display for ShapeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShapeKind::Absent => "absent",
            ShapeKind::Boolean => "boolean",
            ShapeKind::Number => "number",
            ShapeKind::Text => "text",
            ShapeKind::Mapping => "mapping",
            ShapeKind::Sequence => "sequence",
            ShapeKind::Table => "table",
            ShapeKind::Opaque => "opaque",
        };
        f.write_str(name)
    }
}

impl ResultShape {
    pub fn kind(&self) -> ShapeKind {
        match self {
            ResultShape::Absent => ShapeKind::Absent,
            ResultShape::Boolean(_) => ShapeKind::Boolean,
            ResultShape::Number(_) => ShapeKind::Number,
            ResultShape::Text(_) => ShapeKind::Text,
            ResultShape::Mapping(_) => ShapeKind::Mapping,
            ResultShape::Sequence(_) => ShapeKind::Sequence,
            ResultShape::Table(_) => ShapeKind::Table,
            ResultShape::Opaque(_) => ShapeKind::Opaque,
        }
    }

    /// Build a table shape with a known row count
    pub fn table(rows: usize) -> Self {
        ResultShape::Table(TableShape {
            rows: Some(rows),
            columns: Vec::new(),
        })
    }

    /// Error message carried by the payload, if any
    ///
    /// Looks at a top-level `error` string first, then inside a `data` envelope.
    pub fn error_message(&self) -> Option<&str> {
        let ResultShape::Mapping(map) = self else {
            return None;
        };
        if let Some(Value::String(msg)) = map.get("error") {
            return Some(msg.as_str());
        }
        match map.get("data") {
            Some(Value::Object(inner)) => match inner.get("error") {
                Some(Value::String(msg)) => Some(msg.as_str()),
                _ => None,
            },
            _ => None,
        }
    }
}

impl From<Value> for ResultShape {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => ResultShape::Absent,
            Value::Bool(b) => ResultShape::Boolean(b),
            Value::Number(n) => ResultShape::Number(n),
            Value::String(s) => ResultShape::Text(s),
            Value::Array(items) => ResultShape::Sequence(items),
            Value::Object(map) => ResultShape::Mapping(map),
        }
    }
}

impl From<bool> for ResultShape {
    fn from(value: bool) -> Self {
        ResultShape::Boolean(value)
    }
}

impl From<&str> for ResultShape {
    fn from(value: &str) -> Self {
        ResultShape::Text(value.to_string())
    }
}

impl From<String> for ResultShape {
    fn from(value: String) -> Self {
        ResultShape::Text(value)
    }
}

impl<T: Into<ResultShape>> From<Option<T>> for ResultShape {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(ResultShape::Absent)
    }
}

/// Loose truthiness for marker values (`success`, `error`)
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn from_flag(ok: bool) -> SubOperationStatus {
    if ok {
        SubOperationStatus::Ok
    } else {
        SubOperationStatus::Error
    }
}

/// Infer the completion status of a call from its raw result
///
/// # Example
/// ```
/// use racimo::record::SubOperationStatus;
/// use racimo::result_shape::{infer_status, ResultShape};
/// use serde_json::json;
///
/// let failed = ResultShape::from(json!({"success": false}));
/// assert_eq!(infer_status(&failed, false), SubOperationStatus::Error);
/// assert_eq!(infer_status(&ResultShape::Boolean(true), false), SubOperationStatus::Ok);
/// assert_eq!(infer_status(&ResultShape::Absent, false), SubOperationStatus::Error);
/// ```
pub fn infer_status(shape: &ResultShape, raised: bool) -> SubOperationStatus {
    if raised {
        return SubOperationStatus::Error;
    }

    match shape {
        ResultShape::Absent => SubOperationStatus::Error,
        ResultShape::Mapping(map) => infer_mapping_status(map),
        ResultShape::Boolean(b) => from_flag(*b),
        ResultShape::Sequence(items) => from_flag(!items.is_empty()),
        ResultShape::Table(table) => match table.rows {
            Some(rows) => from_flag(rows > 0),
            None => SubOperationStatus::Ok,
        },
        ResultShape::Number(_) | ResultShape::Text(_) | ResultShape::Opaque(_) => {
            SubOperationStatus::Ok
        }
    }
}

fn infer_mapping_status(map: &Map<String, Value>) -> SubOperationStatus {
    if let Some(data) = map.get("data") {
        return match data {
            Value::Null => SubOperationStatus::Error,
            Value::Object(inner) => {
                if let Some(success) = inner.get("success") {
                    from_flag(is_truthy(success))
                } else if let Some(error) = inner.get("error") {
                    from_flag(!is_truthy(error))
                } else {
                    SubOperationStatus::Ok
                }
            }
            Value::Bool(b) => from_flag(*b),
            _ => SubOperationStatus::Ok,
        };
    }

    if let Some(success) = map.get("success") {
        from_flag(is_truthy(success))
    } else if let Some(error) = map.get("error") {
        from_flag(!is_truthy(error))
    } else {
        from_flag(!map.is_empty())
    }
}
