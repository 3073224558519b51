//! mtdfs - moving-target-defense interception layer for a passthrough filesystem
//!
//! Sits between user processes and the real filesystem. Every open, read,
//! write, rename and unlink is attributed to the calling process, scored
//! (write payload entropy), checked against block/allow sets and an external
//! malicious-process classifier, and then either executed, delayed, or
//! silently dropped. Each call leaves an audit row for the classifier to
//! learn from.
//!
//! # Modules
//!
//! - `analysis` - Shannon entropy of write payloads
//! - `policy` - verdict reader, block/allow sets, decision engine
//! - `audit` - operation events and the rotating CSV sink
//! - `intercept` - per-operation hooks over a backing store
//! - `guard` - context object wiring all of the above
//! - `config` - immutable startup configuration
//! - `metrics` - Prometheus metrics
//! - `tracing` - logging and optional OTLP export
//!
//! # Quick Start
//!
//! ```ignore
//! use mtdfs::{CallerContext, Guard, GuardConfig};
//!
//! let mut guard = Guard::new(GuardConfig::from_file("mtdfs.json".as_ref())?);
//! guard.start();
//!
//! // Called by the filesystem protocol layer for each request
//! let hooks = guard.interceptor();
//! let file = hooks.create(&CallerContext::new(pid), "x.txt".as_ref(), libc::O_RDWR, 0o644)?;
//! hooks.write(&CallerContext::new(pid), &file, 0, b"hello")?;
//! ```

pub mod analysis;
pub mod audit;
pub mod config;
pub mod guard;
pub mod intercept;
pub mod metrics;
pub mod policy;
pub mod shutdown;
pub mod tracing;

// Re-export commonly used types at crate root for convenience
pub use config::{AuditMode, GuardConfig, PolicyMode};
pub use guard::Guard;
pub use intercept::{CallerContext, GuardedFile, Interceptor};
pub use policy::{Decision, Pid};
