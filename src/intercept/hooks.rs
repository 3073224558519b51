//! Per-operation interception hooks
//!
//! Every hook follows the same template:
//!
//! ```text
//! lock (handle or path) → caller pid → [entropy of payload]
//!     → policy decision ──ALLOW──► backing store, result propagated
//!                       ──DENY───► skipped, caller told it succeeded
//!                       ──DELAY──► unlock, sleep grace period, relock, decide again
//!     → audit row (always) → unlock
//! ```
//!
//! Delay releases the lock while sleeping so other callers on the same
//! handle are not starved behind a suspect process; the price is that
//! another operation may slip in between the first decision and the real
//! one. The sleep ends early when shutdown is triggered.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::stat::Mode;
use tracing::{debug, debug_span, info, warn};

use super::backing::BackingStore;
use super::handle::{file_name_of, GuardedFile, HandleState};
use super::locks::PathLocks;
use crate::analysis::shannon_entropy;
use crate::audit::{AuditSink, OperationEvent, OperationKind};
use crate::metrics::DELAYED_OPERATIONS;
use crate::policy::{Decision, Pid, PolicyEngine};
use crate::shutdown::ShutdownSignal;

/// Identity of the process behind an intercepted call, supplied by the
/// filesystem protocol layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerContext {
    pub pid: Pid,
}

impl CallerContext {
    pub fn new(pid: Pid) -> Self {
        Self { pid }
    }
}

/// Policy-aware wrapper around a backing store
pub struct Interceptor {
    backing: Arc<dyn BackingStore>,
    policy: Arc<PolicyEngine>,
    audit: Arc<AuditSink>,
    shutdown: Arc<ShutdownSignal>,
    paths: PathLocks,
    rename_on_malicious_read: bool,
}

impl Interceptor {
    pub fn new(
        backing: Arc<dyn BackingStore>,
        policy: Arc<PolicyEngine>,
        audit: Arc<AuditSink>,
        shutdown: Arc<ShutdownSignal>,
        rename_on_malicious_read: bool,
    ) -> Self {
        Self {
            backing,
            policy,
            audit,
            shutdown,
            paths: PathLocks::new(),
            rename_on_malicious_read,
        }
    }

    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    pub fn audit(&self) -> &AuditSink {
        &self.audit
    }

    /// Open a file. A plain open is neither gated nor audited, the operations
    /// on the handle are. An open that creates or truncates changes the
    /// backing store, so it goes through policy like any other modification
    /// and a denied caller gets a detached handle.
    pub fn open(&self, ctx: &CallerContext, path: &Path, flags: i32) -> Result<GuardedFile, Errno> {
        let op = match open_operation(flags) {
            Some(OperationKind::Create) => return self.create(ctx, path, flags, OPEN_CREATE_MODE),
            Some(op) => op,
            None => {
                let _span = debug_span!("intercept", op = "open", pid = ctx.pid).entered();
                let file = self.backing.open(path, open_flags(flags))?;
                return Ok(GuardedFile::new(path, file));
            }
        };

        let name = file_name_of(path);
        let _span = debug_span!("intercept", op = "open", pid = ctx.pid, file = %name).entered();

        let guard = self.paths.lock(path);
        let (decision, _guard) = self.settle(ctx.pid, op, guard, || self.paths.lock(path));

        let result = match decision {
            Decision::Allow => self
                .backing
                .open(path, open_flags(flags))
                .map(|file| GuardedFile::new(path, file)),
            _ => {
                info!(pid = ctx.pid, file = %name, "truncating open suppressed");
                Ok(GuardedFile::detached(path))
            }
        };

        self.emit(OperationEvent::new(ctx.pid, op, &name, self.audit.elapsed_secs()));
        result
    }

    /// Create a file. A denied caller gets a detached handle that swallows
    /// writes, and nothing is created on the backing store.
    pub fn create(
        &self,
        ctx: &CallerContext,
        path: &Path,
        flags: i32,
        mode: u32,
    ) -> Result<GuardedFile, Errno> {
        let op = OperationKind::Create;
        let name = file_name_of(path);
        let _span = debug_span!("intercept", op = "create", pid = ctx.pid, file = %name).entered();

        let guard = self.paths.lock(path);
        let (decision, _guard) = self.settle(ctx.pid, op, guard, || self.paths.lock(path));

        let result = match decision {
            Decision::Allow => self
                .backing
                .create(path, open_flags(flags), Mode::from_bits_truncate(mode as libc::mode_t))
                .map(|file| GuardedFile::new(path, file)),
            _ => {
                info!(pid = ctx.pid, file = %name, "create suppressed");
                Ok(GuardedFile::detached(path))
            }
        };

        self.emit(OperationEvent::new(ctx.pid, op, &name, self.audit.elapsed_secs()));
        result
    }

    /// Read up to `len` bytes at `offset`. A denied read returns no data.
    pub fn read(
        &self,
        ctx: &CallerContext,
        handle: &GuardedFile,
        offset: u64,
        len: usize,
    ) -> Result<Vec<u8>, Errno> {
        let op = OperationKind::Read;
        let _span =
            debug_span!("intercept", op = "read", pid = ctx.pid, file = %handle.name()).entered();

        let guard = handle.lock();
        let (decision, mut state) = self.settle(ctx.pid, op, guard, || handle.lock());

        let result = match decision {
            Decision::Allow => match &state.file {
                Some(file) => self.backing.read(file, offset, len),
                None => Ok(Vec::new()),
            },
            _ => {
                info!(pid = ctx.pid, file = %handle.name(), "read suppressed");
                if self.rename_on_malicious_read {
                    self.trip(ctx, &mut state);
                }
                Ok(Vec::new())
            }
        };

        self.emit(OperationEvent::new(
            ctx.pid,
            op,
            handle.name(),
            self.audit.elapsed_secs(),
        ));
        result
    }

    /// Write `data` at `offset`. A denied write is dropped but reported as
    /// fully written; its audit row still carries the payload entropy.
    pub fn write(
        &self,
        ctx: &CallerContext,
        handle: &GuardedFile,
        offset: u64,
        data: &[u8],
    ) -> Result<usize, Errno> {
        let op = OperationKind::Write;
        let _span =
            debug_span!("intercept", op = "write", pid = ctx.pid, file = %handle.name()).entered();

        let guard = handle.lock();
        let entropy = shannon_entropy(data);
        let (decision, state) = self.settle(ctx.pid, op, guard, || handle.lock());

        let result = match decision {
            Decision::Allow => match &state.file {
                Some(file) => {
                    debug!(file = %handle.name(), bytes = data.len(), "executing write");
                    self.backing.write(file, offset, data)
                }
                None => Ok(data.len()),
            },
            _ => {
                info!(pid = ctx.pid, file = %handle.name(), entropy, "write suppressed");
                Ok(data.len())
            }
        };

        self.emit(
            OperationEvent::new(ctx.pid, op, handle.name(), self.audit.elapsed_secs())
                .with_entropy(entropy),
        );
        result
    }

    /// Rename `from` to `to` on the backing store
    pub fn rename(&self, ctx: &CallerContext, from: &Path, to: &Path) -> Result<(), Errno> {
        let op = OperationKind::Rename;
        let name = file_name_of(from);
        let _span = debug_span!("intercept", op = "rename", pid = ctx.pid, file = %name).entered();

        let guard = self.paths.lock_pair(from, to);
        let (decision, _guard) =
            self.settle(ctx.pid, op, guard, || self.paths.lock_pair(from, to));

        let result = match decision {
            Decision::Allow => self.backing.rename(from, to),
            _ => {
                info!(
                    pid = ctx.pid,
                    from = %from.display(),
                    to = %to.display(),
                    "rename suppressed"
                );
                Ok(())
            }
        };

        self.emit(OperationEvent::new(ctx.pid, op, &name, self.audit.elapsed_secs()));
        result
    }

    /// Remove `path` from the backing store
    pub fn unlink(&self, ctx: &CallerContext, path: &Path) -> Result<(), Errno> {
        let op = OperationKind::Unlink;
        let name = file_name_of(path);
        let _span = debug_span!("intercept", op = "unlink", pid = ctx.pid, file = %name).entered();

        let guard = self.paths.lock(path);
        let (decision, _guard) = self.settle(ctx.pid, op, guard, || self.paths.lock(path));

        let result = match decision {
            Decision::Allow => self.backing.unlink(path),
            _ => {
                info!(pid = ctx.pid, file = %name, "unlink suppressed");
                Ok(())
            }
        };

        self.emit(OperationEvent::new(ctx.pid, op, &name, self.audit.elapsed_secs()));
        result
    }

    /// Resolve the policy decision, sitting out the grace period when the
    /// engine asks for a delay. The lock is dropped for the sleep and
    /// reacquired through `relock`.
    fn settle<G>(
        &self,
        pid: Pid,
        op: OperationKind,
        guard: G,
        relock: impl FnOnce() -> G,
    ) -> (Decision, G) {
        match self.policy.decide(pid, op) {
            Decision::Delay => {
                drop(guard);
                self.sit_out_grace(pid, op);
                let guard = relock();
                (self.policy.decide_after_grace(pid, op), guard)
            }
            decision => (decision, guard),
        }
    }

    fn sit_out_grace(&self, pid: Pid, op: OperationKind) {
        let Some(period) = self.policy.grace_period() else {
            return;
        };
        DELAYED_OPERATIONS.inc();
        debug!(pid, op = %op, grace_ms = period.as_millis() as u64, "delaying operation");
        if self.shutdown.sleep(period) {
            debug!(pid, op = %op, "delay cut short by shutdown");
        }
    }

    /// Tripwire: move the file a malicious reader is looking at out of the
    /// way by renaming it to `_<name>` in the same directory. Fires at most
    /// once per handle and never replaces an existing file.
    fn trip(&self, ctx: &CallerContext, state: &mut HandleState) {
        if state.tripped {
            return;
        }
        let from = state.path.clone();
        let to = tripwire_path(&from);
        let _paths = self.paths.lock_pair(&from, &to);
        match self.backing.rename_noreplace(&from, &to) {
            Ok(()) => {
                info!(
                    pid = ctx.pid,
                    from = %from.display(),
                    to = %to.display(),
                    "tripwire rename applied"
                );
                state.path = to;
                state.tripped = true;
            }
            Err(e) => {
                warn!(pid = ctx.pid, file = %from.display(), error = %e, "tripwire rename failed");
            }
        }
    }

    fn emit(&self, event: OperationEvent) {
        self.audit.record(&event);
    }
}

/// Mode for files created through `open(O_CREAT)`, before the umask
const OPEN_CREATE_MODE: u32 = 0o666;

/// Operation an open with these flags performs on the backing store, `None`
/// when it leaves the file untouched
fn open_operation(flags: i32) -> Option<OperationKind> {
    let flags = OFlag::from_bits_truncate(flags);
    if flags.contains(OFlag::O_CREAT) {
        Some(OperationKind::Create)
    } else if flags.contains(OFlag::O_TRUNC) {
        Some(OperationKind::Write)
    } else {
        None
    }
}

/// Offsets are always explicit, so append mode is never passed through
fn open_flags(flags: i32) -> OFlag {
    OFlag::from_bits_truncate(flags) & !OFlag::O_APPEND
}

fn tripwire_path(path: &Path) -> PathBuf {
    let renamed = format!("_{}", file_name_of(path));
    match path.parent() {
        Some(parent) => parent.join(renamed),
        None => PathBuf::from(renamed),
    }
}
