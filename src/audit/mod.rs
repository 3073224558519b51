//! Audit trail of intercepted operations
//!
//! Every hook emits one `OperationEvent`. Events accumulate in memory for
//! one audit window and are then flushed as CSV by a background timer task:
//!
//! ```text
//! hooks ──record()──► [ buffer (Mutex) ] ──rotate() every window──► logfileN.csv
//!                                                          (or appended to monitor.csv)
//! ```
//!
//! Auditing is best-effort: when an artifact cannot be written the window's
//! records are dropped and logged, and interception carries on.

pub mod event;
pub mod sink;

pub use event::{extension_of, OperationEvent, OperationKind, CSV_HEADER};
pub use sink::{AuditError, AuditSink};
