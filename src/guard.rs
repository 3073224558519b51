//! Guard context: wires the interception pipeline together
//!
//! ```text
//! GuardConfig ──► Guard
//!                  ├── Interceptor ──► PassthroughStore (backing_root)
//!                  │        ├── PolicyEngine ──► VerdictFile (verdict_path)
//!                  │        └── AuditSink
//!                  ├── ShutdownSignal
//!                  └── rotation task (tokio)
//! ```
//!
//! There is exactly one guard per mount. Its state (block/allow sets, audit
//! window) lives until the process exits.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::audit::AuditSink;
use crate::config::GuardConfig;
use crate::intercept::{BackingStore, Interceptor, PassthroughStore};
use crate::policy::{PolicyEngine, VerdictFile, VerdictSource};
use crate::shutdown::ShutdownSignal;

pub struct Guard {
    config: Arc<GuardConfig>,
    interceptor: Arc<Interceptor>,
    audit: Arc<AuditSink>,
    shutdown: Arc<ShutdownSignal>,
    rotation: Option<JoinHandle<()>>,
}

impl Guard {
    /// Build a guard over the real backing directory and verdict file
    pub fn new(config: GuardConfig) -> Self {
        let backing = Arc::new(PassthroughStore::new(&config.backing_root));
        let verdicts = Arc::new(VerdictFile::new(&config.policy.verdict_path));
        Self::with_parts(config, backing, verdicts)
    }

    /// Build a guard with explicit backing store and verdict source
    pub fn with_parts(
        config: GuardConfig,
        backing: Arc<dyn BackingStore>,
        verdicts: Arc<dyn VerdictSource>,
    ) -> Self {
        let config = Arc::new(config);
        let policy = Arc::new(PolicyEngine::new(&config.policy, verdicts));
        let audit = Arc::new(AuditSink::new(config.audit.clone()));
        let shutdown = Arc::new(ShutdownSignal::new());
        let interceptor = Arc::new(Interceptor::new(
            backing,
            policy,
            Arc::clone(&audit),
            Arc::clone(&shutdown),
            config.rename_on_malicious_read,
        ));

        Self {
            config,
            interceptor,
            audit,
            shutdown,
            rotation: None,
        }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Hook entry points, shareable across protocol worker threads
    pub fn interceptor(&self) -> Arc<Interceptor> {
        Arc::clone(&self.interceptor)
    }

    pub fn audit(&self) -> &Arc<AuditSink> {
        &self.audit
    }

    pub fn shutdown_signal(&self) -> &Arc<ShutdownSignal> {
        &self.shutdown
    }

    /// Start the audit window timer. Must be called inside a tokio runtime.
    pub fn start(&mut self) {
        if self.rotation.is_some() {
            return;
        }
        info!(
            backing_root = %self.config.backing_root.display(),
            verdict_path = %self.config.policy.verdict_path.display(),
            delay = self.config.policy.delay_modifications,
            rename_on_malicious_read = self.config.rename_on_malicious_read,
            "guard started"
        );
        self.rotation = Some(self.audit.spawn_rotation(self.shutdown.subscribe()));
    }

    /// Cancel pending delays, stop the timer and flush the last window
    pub async fn shutdown(mut self) {
        self.shutdown.trigger();
        match self.rotation.take() {
            Some(task) => {
                if let Err(e) = task.await {
                    tracing::warn!(error = %e, "audit rotation task failed");
                }
            }
            None => {
                // rotate() already warned about the lost window
                if let Err(e) = self.audit.rotate() {
                    debug!(error = %e, "final audit flush failed");
                }
            }
        }
        info!(
            blocked = self.interceptor.policy().blocked().len(),
            "guard stopped"
        );
    }
}
