//! Audit log sink
//!
//! `record()` is called concurrently from every hook; `rotate()` is called
//! by the window timer. The buffer lock only covers appending and the
//! snapshot-and-clear at the window boundary, the file write happens outside
//! it under a separate writer lock so hooks never wait on disk I/O.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::event::{OperationEvent, CSV_HEADER};
use crate::config::{AuditConfig, AuditMode};
use crate::metrics::{AUDIT_FLUSH_FAILURES, AUDIT_ROWS, AUDIT_WINDOWS};

/// Error type for audit artifact writes
#[derive(Debug)]
pub enum AuditError {
    /// The artifact could not be created or written
    Io(PathBuf, io::Error),
}

impl fmt::Display for AuditError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditError::Io(path, e) => write!(f, "audit write to {} failed: {}", path.display(), e),
        }
    }
}

impl std::error::Error for AuditError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AuditError::Io(_, e) => Some(e),
        }
    }
}

/// State of the active audit window
#[derive(Debug)]
struct Window {
    /// Formatted CSV rows recorded so far
    rows: Vec<String>,
    /// Sequence number of this window (rotating mode file index)
    number: u64,
}

/// Process-wide accumulator for operation events
pub struct AuditSink {
    config: AuditConfig,
    started: Instant,
    window: Mutex<Window>,
    /// Serializes artifact writes so windows land in order
    writer: Mutex<()>,
}

impl AuditSink {
    pub fn new(config: AuditConfig) -> Self {
        Self {
            config,
            started: Instant::now(),
            window: Mutex::new(Window {
                rows: Vec::new(),
                number: 1,
            }),
            writer: Mutex::new(()),
        }
    }

    /// Whole seconds since the sink was created
    pub fn elapsed_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Append an event to the active window
    pub fn record(&self, event: &OperationEvent) {
        let line = event.to_csv_line();
        self.window
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .rows
            .push(line);
        AUDIT_ROWS.inc();
    }

    /// Number of rows waiting in the active window
    pub fn pending(&self) -> usize {
        self.window
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .rows
            .len()
    }

    /// Close the active window and persist it.
    ///
    /// Returns the artifact the window was written to. On failure the
    /// window's rows are gone; the error is logged and returned for callers
    /// that care.
    pub fn rotate(&self) -> Result<PathBuf, AuditError> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let (rows, number) = {
            let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
            let rows = mem::take(&mut window.rows);
            let number = window.number;
            window.number += 1;
            (rows, number)
        };

        let path = self.artifact_path(number);
        let fresh = self.config.mode == AuditMode::Rotating;
        match write_window(&path, &rows, fresh) {
            Ok(()) => {
                AUDIT_WINDOWS.inc();
                debug!(
                    window = number,
                    rows = rows.len(),
                    path = %path.display(),
                    "audit window flushed"
                );
                Ok(path)
            }
            Err(e) => {
                AUDIT_FLUSH_FAILURES.inc();
                let err = AuditError::Io(path, e);
                warn!(window = number, dropped = rows.len(), error = %err, "audit window lost");
                Err(err)
            }
        }
    }

    /// Spawn the window timer.
    ///
    /// Rotates once per `window_secs` until `shutdown` flips (or its sender
    /// goes away), then flushes whatever is left.
    pub fn spawn_rotation(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let sink = Arc::clone(self);
        tokio::spawn(async move {
            let period = sink.config.window();
            info!(
                window_secs = period.as_secs(),
                mode = ?sink.config.mode,
                dir = %sink.config.dir.display(),
                "audit rotation started"
            );

            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => sink.rotate_in_background().await,
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            sink.rotate_in_background().await;
            info!("audit rotation stopped");
        })
    }

    async fn rotate_in_background(self: &Arc<Self>) {
        let sink = Arc::clone(self);
        // Failures are already logged inside rotate()
        if let Err(e) = tokio::task::spawn_blocking(move || sink.rotate()).await {
            warn!(error = %e, "audit rotation task panicked");
        }
    }

    fn artifact_path(&self, number: u64) -> PathBuf {
        let name = match self.config.mode {
            AuditMode::Rotating => self
                .config
                .rotating_file_pattern
                .replace("{}", &number.to_string()),
            AuditMode::Continuous => self.config.continuous_file.clone(),
        };
        self.config.dir.join(name)
    }
}

/// Write one window. `fresh` truncates the file; otherwise rows are
/// appended and the header is only written into an empty file.
fn write_window(path: &Path, rows: &[String], fresh: bool) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let file: File = if fresh {
        File::create(path)?
    } else {
        OpenOptions::new().create(true).append(true).open(path)?
    };
    let needs_header = fresh || file.metadata()?.len() == 0;

    let mut out = BufWriter::new(file);
    if needs_header {
        writeln!(out, "{}", CSV_HEADER)?;
    }
    for row in rows {
        writeln!(out, "{}", row)?;
    }
    out.flush()
}
