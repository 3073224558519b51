//! Operation events: one immutable audit row per intercepted call

use std::fmt;

use crate::analysis::NO_ENTROPY;
use crate::policy::Pid;

/// CSV header written at the top of every audit artifact
pub const CSV_HEADER: &str = "pid,entropy,op,ext,filename,timestamp";

/// Kind of filesystem operation seen by a hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Read,
    Write,
    Rename,
    Unlink,
    Create,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Read => "read",
            OperationKind::Write => "write",
            OperationKind::Rename => "rename",
            OperationKind::Unlink => "unlink",
            OperationKind::Create => "create",
        }
    }

    /// Whether the operation changes data or namespace on the backing store
    pub fn is_modifying(&self) -> bool {
        !matches!(self, OperationKind::Read)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single audit record
#[derive(Debug, Clone, PartialEq)]
pub struct OperationEvent {
    pub pid: Pid,
    /// Shannon entropy of the payload, `NO_ENTROPY` when there is none
    pub entropy: f64,
    pub op: OperationKind,
    pub extension: String,
    pub file_name: String,
    /// Whole seconds since the guard started
    pub elapsed_secs: u64,
}

impl OperationEvent {
    pub fn new(pid: Pid, op: OperationKind, file_name: &str, elapsed_secs: u64) -> Self {
        Self {
            pid,
            entropy: NO_ENTROPY,
            op,
            extension: extension_of(file_name).to_string(),
            file_name: file_name.to_string(),
            elapsed_secs,
        }
    }

    pub fn with_entropy(mut self, entropy: f64) -> Self {
        self.entropy = entropy;
        self
    }

    /// Format as one CSV data line (no trailing newline)
    pub fn to_csv_line(&self) -> String {
        format!(
            "{},{:.6},{},{},{},{}",
            self.pid,
            self.entropy,
            self.op,
            csv_field(&self.extension),
            csv_field(&self.file_name),
            self.elapsed_secs
        )
    }
}

/// Extension of a file name: everything after the first `.` of its last
/// path component, or `""` when there is none.
///
/// `report.pdf` → `pdf`, `archive.tar.gz` → `tar.gz`, `Makefile` → `""`.
pub fn extension_of(file_name: &str) -> &str {
    let base = file_name.rsplit('/').next().unwrap_or(file_name);
    match base.split_once('.') {
        Some((_, ext)) => ext,
        None => "",
    }
}

/// Keep a field on one line and inside one column
fn csv_field(value: &str) -> String {
    value.replace(&[',', '\n', '\r'][..], "_")
}
