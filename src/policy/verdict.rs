//! Classifier verdict artifact
//!
//! An external classifier periodically rewrites a small text file listing
//! the process identifiers it currently considers malicious, one decimal
//! pid per line. We re-read it on every query: the file is the only channel
//! between the two processes and it changes underneath us at any time.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::Pid;
use crate::metrics::VERDICT_READ_FAILURES;

/// Anything that can answer "which processes are malicious right now?"
pub trait VerdictSource: Send + Sync {
    /// Fresh snapshot of the malicious set. Never cached by implementors.
    fn current_malicious_set(&self) -> HashSet<Pid>;
}

/// Verdict source backed by the classifier's output file
#[derive(Debug, Clone)]
pub struct VerdictFile {
    path: PathBuf,
}

impl VerdictFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse the artifact contents. Lines that are not a plain decimal pid
    /// (signs included) are skipped.
    pub fn parse(contents: &str) -> HashSet<Pid> {
        contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter_map(|line| match parse_pid(line) {
                Some(pid) => Some(pid),
                None => {
                    debug!(line, "skipping malformed verdict line");
                    None
                }
            })
            .collect()
    }
}

fn parse_pid(line: &str) -> Option<Pid> {
    if !line.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    line.parse().ok()
}

impl VerdictSource for VerdictFile {
    fn current_malicious_set(&self) -> HashSet<Pid> {
        match fs::read(&self.path) {
            Ok(bytes) => Self::parse(&String::from_utf8_lossy(&bytes)),
            Err(e) => {
                // No verdict yet means nobody is known to be malicious
                VERDICT_READ_FAILURES.inc();
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "classifier verdict unavailable, treating as empty"
                );
                HashSet::new()
            }
        }
    }
}
