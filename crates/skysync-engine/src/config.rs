//! Sync engine configuration
//!
//! Explicit, serializable runtime settings: role, tolerances, timers, and
//! the per-key animation table. Built once at startup and passed into the
//! components that need it.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Peer role in the star topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Hub: broadcasts local changes to all clients
    Host,
    /// Spoke: sends local changes to the host only
    Client,
}

/// Interpolation settings for one animated key
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnimationSettings {
    /// Nominal per-step increment used to derive the step count
    pub step_size: f64,
    /// Milliseconds between intermediate writes
    pub step_ms: u64,
    /// Targets within this distance of the current value are written
    /// immediately, without spawning a task
    pub tolerance: f64,
}

impl AnimationSettings {
    /// Settings with the given step size and default pacing
    pub fn with_step(step_size: f64) -> Self {
        Self {
            step_size,
            step_ms: 50,
            tolerance: 1e-9,
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// This peer's role
    pub role: Role,
    /// Stable identifier of this instance; generated when absent
    #[serde(default)]
    pub instance_id: Option<String>,
    /// Default numeric diff tolerance (overridden per-key by the catalog)
    pub epsilon: f64,
    /// Milliseconds after the first sample before sends start
    pub warmup_ms: u64,
    /// Milliseconds between persistence attempts
    pub persist_every_ms: u64,
    /// Whether a host forwards inbound client changes to other peers
    pub relay: bool,
    /// Keys whose incoming numeric targets are interpolated
    pub animations: IndexMap<String, AnimationSettings>,
}

impl SyncConfig {
    /// Configuration for the given role with the builtin animation table
    pub fn for_role(role: Role) -> Self {
        let mut animations = IndexMap::new();
        animations.insert("Controls.Flaps".to_string(), AnimationSettings::with_step(0.5));
        animations.insert(
            "Controls.Throttle".to_string(),
            AnimationSettings {
                step_size: 0.05,
                step_ms: 50,
                tolerance: 1e-9,
            },
        );

        Self {
            role,
            instance_id: None,
            epsilon: 0.001,
            warmup_ms: 1_000,
            persist_every_ms: 5_000,
            relay: false,
            animations,
        }
    }

    /// Warm-up window before the first sends
    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }

    /// Interval between persistence attempts
    pub fn persist_every(&self) -> Duration {
        Duration::from_millis(self.persist_every_ms)
    }

    /// Animation settings for a key (case-insensitive)
    pub fn animation(&self, path: &str) -> Option<AnimationSettings> {
        self.animations
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(path))
            .map(|(_, s)| *s)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::for_role(Role::Host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_animation_table() {
        let config = SyncConfig::for_role(Role::Client);
        let flaps = config.animation("controls.flaps").unwrap();
        assert_eq!(flaps.step_size, 0.5);
        assert!(config.animation("Systems.LightsOn").is_none());
    }

    #[test]
    fn test_durations() {
        let config = SyncConfig::default();
        assert_eq!(config.warmup(), Duration::from_secs(1));
        assert_eq!(config.persist_every(), Duration::from_secs(5));
    }
}
