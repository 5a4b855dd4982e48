//! Machine configuration.

use serde::{Deserialize, Serialize};

/// Default name used in logs when none is configured.
pub const DEFAULT_MACHINE_NAME: &str = "machine";

/// Default pending-queue depth above which a warning is logged.
pub const DEFAULT_QUEUE_WARN_THRESHOLD: usize = 256;

/// Per-machine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    /// Name used in log fields and errors.
    pub name: String,
    /// Log a warning when more than this many requests are pending (0 = never).
    pub queue_warn_threshold: usize,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_MACHINE_NAME.to_string(),
            queue_warn_threshold: DEFAULT_QUEUE_WARN_THRESHOLD,
        }
    }
}

impl MachineConfig {
    /// Creates a config with the given name and default limits.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Sets the queue warning threshold.
    pub fn with_queue_warn_threshold(mut self, threshold: usize) -> Self {
        self.queue_warn_threshold = threshold;
        self
    }

    /// Returns true if `depth` pending requests should trigger a warning.
    pub fn exceeds_queue_threshold(&self, depth: usize) -> bool {
        self.queue_warn_threshold > 0 && depth > self.queue_warn_threshold
    }
}
