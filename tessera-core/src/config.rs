//! Runtime configuration.
//!
//! ```json
//! { "deferral": "queue", "dispose_on_clear": true }
//! ```

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Where deferred disposal checks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferralMode {
    /// A current-thread tokio runtime when one is current, the process turn
    /// queue otherwise.
    #[default]
    Auto,
    /// Spawn on the current tokio runtime. Multi-thread runtimes still use
    /// the process turn queue.
    Tokio,
    /// Always use the process turn queue, drained by
    /// [`flush_deferred`](crate::scope::flush_deferred).
    Queue,
}

/// Settings for registries and scope caches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub deferral: DeferralMode,

    /// Whether `Registry::clear` disposes instances made by `create`.
    pub dispose_on_clear: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            deferral: DeferralMode::Auto,
            dispose_on_clear: true,
        }
    }
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
