//! Policy decision engine
//!
//! Holds the block and allow sets and consults the classifier verdict. The
//! block set is checked first so a confirmed process is denied without
//! touching the verdict file again, and a classifier that later clears its
//! output cannot un-flag it.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::lists::ProcessSet;
use super::verdict::VerdictSource;
use super::Pid;
use crate::audit::OperationKind;
use crate::config::{PolicyConfig, PolicyMode};
use crate::metrics::{BLOCKED_PROCESSES, DECISIONS};

/// Outcome of a policy query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Run the real operation and propagate its result
    Allow,
    /// Drop the operation and report success to the caller
    Deny,
    /// Wait out the grace period, then ask again via `decide_after_grace`
    Delay,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::Deny => "deny",
            Decision::Delay => "delay",
        }
    }
}

/// Decides whether an intercepted operation may reach the backing store
pub struct PolicyEngine {
    mode: PolicyMode,
    grace_period: Option<Duration>,
    verdicts: Arc<dyn VerdictSource>,
    blocked: ProcessSet,
    allowed: ProcessSet,
}

impl PolicyEngine {
    pub fn new(config: &PolicyConfig, verdicts: Arc<dyn VerdictSource>) -> Self {
        Self {
            mode: config.mode,
            grace_period: config.grace_period(),
            verdicts,
            blocked: ProcessSet::new(),
            allowed: ProcessSet::new(),
        }
    }

    /// Seed the allow set with trusted daemons
    pub fn with_allowed(mut self, pids: impl IntoIterator<Item = Pid>) -> Self {
        self.allowed = pids.into_iter().collect();
        self
    }

    /// First-pass decision. May return `Decision::Delay` for modifying
    /// operations when a grace period is configured.
    pub fn decide(&self, pid: Pid, op: OperationKind) -> Decision {
        self.record(op, self.evaluate(pid, op, true))
    }

    /// Decision after the grace period has elapsed. Never returns `Delay`.
    pub fn decide_after_grace(&self, pid: Pid, op: OperationKind) -> Decision {
        self.record(op, self.evaluate(pid, op, false))
    }

    /// Configured grace period for `Decision::Delay`
    pub fn grace_period(&self) -> Option<Duration> {
        self.grace_period
    }

    /// Block-list a process explicitly
    pub fn block(&self, pid: Pid) -> bool {
        let added = self.blocked.insert(pid);
        if added {
            BLOCKED_PROCESSES.set(self.blocked.len() as f64);
        }
        added
    }

    /// Add a process to the allow set
    pub fn allow(&self, pid: Pid) -> bool {
        self.allowed.insert(pid)
    }

    pub fn is_blocked(&self, pid: Pid) -> bool {
        self.blocked.contains(pid)
    }

    pub fn blocked(&self) -> &ProcessSet {
        &self.blocked
    }

    pub fn allowed(&self) -> &ProcessSet {
        &self.allowed
    }

    fn evaluate(&self, pid: Pid, op: OperationKind, may_delay: bool) -> Decision {
        if self.mode == PolicyMode::ListsThenClassifier {
            if self.blocked.contains(pid) {
                return Decision::Deny;
            }
            if self.allowed.contains(pid) {
                return Decision::Allow;
            }
        }

        if may_delay && self.grace_period.is_some() && op.is_modifying() {
            return Decision::Delay;
        }

        if self.verdicts.current_malicious_set().contains(&pid) {
            if self.block(pid) {
                warn!(pid, op = %op, "classifier flagged process, now block-listed");
            }
            return Decision::Deny;
        }

        Decision::Allow
    }

    fn record(&self, op: OperationKind, decision: Decision) -> Decision {
        DECISIONS
            .with_label_values(&[op.as_str(), decision.as_str()])
            .inc();
        debug!(op = %op, decision = decision.as_str(), "policy decision");
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Verdict source whose contents the test controls
    #[derive(Default)]
    struct FakeVerdicts {
        flagged: Mutex<HashSet<Pid>>,
        reads: Mutex<usize>,
    }

    impl FakeVerdicts {
        fn set(&self, pids: &[Pid]) {
            *self.flagged.lock().unwrap() = pids.iter().copied().collect();
        }

        fn reads(&self) -> usize {
            *self.reads.lock().unwrap()
        }
    }

    impl VerdictSource for FakeVerdicts {
        fn current_malicious_set(&self) -> HashSet<Pid> {
            *self.reads.lock().unwrap() += 1;
            self.flagged.lock().unwrap().clone()
        }
    }

    fn build(config: PolicyConfig) -> (PolicyEngine, Arc<FakeVerdicts>) {
        let verdicts = Arc::new(FakeVerdicts::default());
        let engine = PolicyEngine::new(&config, verdicts.clone());
        (engine, verdicts)
    }

    #[test]
    fn test_unknown_process_allowed() {
        let (engine, _) = build(PolicyConfig::default());
        for op in [
            OperationKind::Read,
            OperationKind::Write,
            OperationKind::Rename,
            OperationKind::Unlink,
            OperationKind::Create,
        ] {
            assert_eq!(engine.decide(100, op), Decision::Allow);
        }
        assert!(engine.blocked().is_empty());
    }

    #[test]
    fn test_flagged_process_denied_immediately() {
        let (engine, verdicts) = build(PolicyConfig::default());
        verdicts.set(&[66]);

        assert_eq!(engine.decide(66, OperationKind::Write), Decision::Deny);
        assert!(engine.is_blocked(66));
        assert_eq!(engine.decide(67, OperationKind::Write), Decision::Allow);
    }

    #[test]
    fn test_block_survives_cleared_verdict() {
        let (engine, verdicts) = build(PolicyConfig::default());
        verdicts.set(&[66]);
        assert_eq!(engine.decide(66, OperationKind::Write), Decision::Deny);

        verdicts.set(&[]);
        let reads_before = verdicts.reads();
        for op in [OperationKind::Read, OperationKind::Unlink, OperationKind::Rename] {
            assert_eq!(engine.decide(66, op), Decision::Deny);
        }
        // Block-listed pids never hit the verdict source again
        assert_eq!(verdicts.reads(), reads_before);
    }

    #[test]
    fn test_allow_set_bypasses_classifier() {
        let (engine, verdicts) = build(PolicyConfig::default());
        let engine = engine.with_allowed([1]);
        verdicts.set(&[1]);

        assert_eq!(engine.decide(1, OperationKind::Write), Decision::Allow);
        assert_eq!(verdicts.reads(), 0);
    }

    #[test]
    fn test_block_beats_allow() {
        let (engine, _) = build(PolicyConfig::default());
        engine.allow(5);
        engine.block(5);
        assert_eq!(engine.decide(5, OperationKind::Read), Decision::Deny);
    }

    #[test]
    fn test_delay_only_for_modifying_ops() {
        let config = PolicyConfig {
            delay_modifications: true,
            delay_secs: 1,
            ..PolicyConfig::default()
        };
        let (engine, verdicts) = build(config);
        verdicts.set(&[9]);

        assert_eq!(engine.decide(8, OperationKind::Write), Decision::Delay);
        assert_eq!(engine.decide(8, OperationKind::Read), Decision::Allow);
        assert_eq!(engine.decide_after_grace(8, OperationKind::Write), Decision::Allow);
        assert_eq!(engine.decide_after_grace(9, OperationKind::Unlink), Decision::Deny);

        // Confirmed pids are denied without waiting
        assert_eq!(engine.decide(9, OperationKind::Write), Decision::Deny);
    }

    #[test]
    fn test_classifier_only_mode_ignores_lists() {
        let config = PolicyConfig {
            mode: PolicyMode::ClassifierOnly,
            ..PolicyConfig::default()
        };
        let (engine, verdicts) = build(config);
        engine.allow(3);
        verdicts.set(&[3]);

        assert_eq!(engine.decide(3, OperationKind::Write), Decision::Deny);
        verdicts.set(&[]);
        assert_eq!(engine.decide(3, OperationKind::Write), Decision::Allow);
    }
}
