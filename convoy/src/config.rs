use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::worker::Operation;

/// Configuration handed to a runner and, through it, to container factories.
///
/// The runner itself only reads `label`; `settings` is an opaque document
/// that factories interpret when building workers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Human-readable label attached to runner logs and spans.
    pub label: String,
    /// Per-deployment settings passed through to factories untouched.
    pub settings: Map<String, Value>,
}

impl RunnerConfig {
    /// Create a configuration with the given label and no settings.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            settings: Map::new(),
        }
    }

    /// Set a single setting.
    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    /// Look up a setting by key.
    pub fn setting(&self, key: &str) -> Option<&Value> {
        self.settings.get(key)
    }
}

/// Options for a scoped session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Kill the services on exit instead of stopping them.
    pub kill_on_exit: bool,
}

impl SessionOptions {
    /// Set whether the session kills rather than stops its services on exit.
    pub fn with_kill_on_exit(mut self, kill_on_exit: bool) -> Self {
        self.kill_on_exit = kill_on_exit;
        self
    }

    /// The operation a session with these options runs on exit.
    pub fn exit_operation(&self) -> Operation {
        if self.kill_on_exit {
            Operation::Kill
        } else {
            Operation::Stop
        }
    }
}
