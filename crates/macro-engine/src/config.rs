//! Engine configuration

use serde::{Deserialize, Serialize};

fn default_interval_ms() -> u64 {
    300
}

/// Settings for an [`Engine`](crate::Engine) instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Time between scheduler ticks in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// How forced reruns interact with on-change suppression
    #[serde(default)]
    pub on_change_policy: OnChangePolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            on_change_policy: OnChangePolicy::default(),
        }
    }
}

/// Whether a forced rerun counts as acting on the current match state
///
/// Forced reruns come from callers that must not block, for example one
/// macro running another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnChangePolicy {
    /// Forced runs leave on-change state untouched
    #[default]
    Independent,
    /// A forced run records its branch as the last acted-upon match, so the
    /// next tick does not fire again for the same transition
    Consume,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.interval_ms, 300);
        assert_eq!(config.on_change_policy, OnChangePolicy::Independent);
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_policy_names() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"interval_ms": 50, "on_change_policy": "consume"}"#).unwrap();
        assert_eq!(config.interval_ms, 50);
        assert_eq!(config.on_change_policy, OnChangePolicy::Consume);
    }
}
