//! Guard configuration
//!
//! Built once at startup and shared read-only (`Arc<GuardConfig>`) by the
//! hooks, the policy engine and the audit sink. Nothing mutates it after
//! construction.
//!
//! ```json
//! {
//!   "backing_root": "/srv/underlay",
//!   "audit": { "dir": "/var/log/mtdfs", "window_secs": 5, "mode": "rotating" },
//!   "policy": { "verdict_path": "/var/log/mtdfs/classifier.log", "delay_modifications": false },
//!   "rename_on_malicious_read": false
//! }
//! ```

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// How audit windows are persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditMode {
    /// One artifact per window, named by an incrementing sequence number.
    /// Each window can later be labelled malicious/benign on its own.
    Rotating,
    /// Every window appended to one long-lived artifact (training data).
    Continuous,
}

/// Order in which the policy engine consults its inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyMode {
    /// Block set, then allow set, then the classifier verdict.
    ListsThenClassifier,
    /// Ask the classifier on every call; block/allow sets are not consulted.
    ClassifierOnly,
}

/// Audit sink settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Directory receiving audit artifacts
    pub dir: PathBuf,
    /// Length of one audit window in seconds
    pub window_secs: u64,
    pub mode: AuditMode,
    /// File name pattern for rotating mode; `{}` is replaced by the window number
    pub rotating_file_pattern: String,
    /// File name for continuous mode
    pub continuous_file: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("../logs"),
            window_secs: 5,
            mode: AuditMode::Rotating,
            rotating_file_pattern: "logfile{}.csv".to_string(),
            continuous_file: "monitor.csv".to_string(),
        }
    }
}

impl AuditConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Policy engine settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Verdict artifact maintained by the external classifier
    pub verdict_path: PathBuf,
    pub mode: PolicyMode,
    /// Hold modifying operations for `delay_secs` before asking the classifier
    pub delay_modifications: bool,
    pub delay_secs: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            verdict_path: PathBuf::from("../logs/classifier.log"),
            mode: PolicyMode::ListsThenClassifier,
            delay_modifications: false,
            delay_secs: 5,
        }
    }
}

impl PolicyConfig {
    /// Grace period for delayed operations, `None` when delaying is off.
    pub fn grace_period(&self) -> Option<Duration> {
        self.delay_modifications
            .then(|| Duration::from_secs(self.delay_secs))
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Real directory the intercepted operations are applied to
    pub backing_root: PathBuf,
    pub audit: AuditConfig,
    pub policy: PolicyConfig,
    /// Rename a file to `_<name>` when a malicious process reads it
    pub rename_on_malicious_read: bool,
    /// OTLP collector endpoint; console logging only when unset
    pub otlp_endpoint: Option<String>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            backing_root: PathBuf::from("/srv/mtdfs/underlay"),
            audit: AuditConfig::default(),
            policy: PolicyConfig::default(),
            rename_on_malicious_read: false,
            otlp_endpoint: None,
        }
    }
}

impl GuardConfig {
    /// Load and validate a JSON configuration file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_json(&raw)
    }

    /// Parse and validate a JSON document
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: GuardConfig =
            serde_json::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.audit.window_secs == 0 {
            return Err(ConfigError::Invalid(
                "audit.window_secs must be greater than zero".to_string(),
            ));
        }
        if self.policy.delay_modifications && self.policy.delay_secs == 0 {
            return Err(ConfigError::Invalid(
                "policy.delay_secs must be greater than zero when delaying".to_string(),
            ));
        }
        if self.audit.mode == AuditMode::Rotating && !self.audit.rotating_file_pattern.contains("{}") {
            return Err(ConfigError::Invalid(
                "audit.rotating_file_pattern must contain {}".to_string(),
            ));
        }
        Ok(())
    }
}

/// Error type for configuration loading
#[derive(Debug)]
pub enum ConfigError {
    /// Configuration file could not be read
    Io(PathBuf, io::Error),
    /// Configuration file is not valid JSON for `GuardConfig`
    Parse(String),
    /// Configuration parsed but a value is out of range
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "cannot read config {}: {}", path.display(), e),
            ConfigError::Parse(msg) => write!(f, "config parse error: {}", msg),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(_, e) => Some(e),
            _ => None,
        }
    }
}
