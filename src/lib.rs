//! Racimo - in-process operation tracking with meta-operation detection
//!
//! Application code brackets units of work with begin/end calls and records
//! every atomic call made inside them. When a root operation closes, its
//! sub-operations are grouped into meta-operations by a prioritized set of
//! clustering strategies, so a burst of a dozen related calls renders as one
//! row instead of twelve while every individual record stays available.
//!
//! Failed calls are classified (category, severity, suggested action) at the
//! moment they complete, whether they returned an error payload or raised.

pub mod aggregator;
pub mod cli;
pub mod clock;
pub mod config;
pub mod context;
pub mod detector;
pub mod error_analysis;
pub mod record;
pub mod result_shape;
pub mod strategy;

pub use aggregator::{Aggregator, OperationSummary};
pub use context::{Call, ContextStack};
pub use detector::{MetaOperation, MetaOperationDetector};
pub use record::{OperationRecord, SubOperationRecord};
