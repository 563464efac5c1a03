//! Controller policy
//!
//! Every timing and threshold value the controller uses lives in
//! [`ControllerPolicy`]. Policies deserialize from partial documents (missing
//! keys take the defaults) and can start from a [`PolicyPreset`].
//!
//! ```rust
//! use carelink_quality_core::config::{ControllerPolicy, PolicyPreset};
//! use carelink_quality_core::QualityLevel;
//!
//! let policy = ControllerPolicy::from_preset(PolicyPreset::Conservative)
//!     .with_poll_interval_ms(2500)
//!     .with_min_quality_floor(QualityLevel::Good);
//! assert!(policy.validate().is_ok());
//! assert!(!policy.auto_mode);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::mitigation::DEFAULT_MITIGATION_LOG_SIZE;
use crate::scoring::QualityLevel;
use crate::trend::DEFAULT_HISTORY_WINDOW;

/// Samples a trend needs; shorter histories are rejected
const MIN_HISTORY_WINDOW: usize = 10;

/// Policy presets for common deployments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyPreset {
    /// Slow to react, operator approves every mitigation
    Conservative,
    /// Reference policy
    Balanced,
    /// Fast polling, short cooldown, degrades down to audio-only
    Aggressive,
}

/// Timing and threshold policy for one degradation controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerPolicy {
    /// Interval between polling cycles
    pub poll_interval_ms: u64,
    /// Minimum time between automatic mitigations
    pub cooldown_ms: u64,
    /// Consecutive poor/offline readings before auto-apply is considered
    pub consecutive_poor_threshold: u32,
    /// Consecutive offline readings before a reconnect is requested
    pub consecutive_offline_threshold: u32,
    /// Mitigations never degrade below this level
    pub min_quality_floor: QualityLevel,
    /// Apply urgent mitigations without operator approval
    pub auto_mode: bool,
    /// Scored samples kept for trend analysis
    pub history_window: usize,
    /// Mitigation records kept for display
    pub mitigation_log_size: usize,
    /// Upper bound on one statistics request
    pub stats_timeout_ms: u64,
}

impl Default for ControllerPolicy {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            cooldown_ms: 30_000,
            consecutive_poor_threshold: 3,
            consecutive_offline_threshold: 5,
            min_quality_floor: QualityLevel::Fair,
            auto_mode: true,
            history_window: DEFAULT_HISTORY_WINDOW,
            mitigation_log_size: DEFAULT_MITIGATION_LOG_SIZE,
            stats_timeout_ms: 1_500,
        }
    }
}

impl ControllerPolicy {
    /// Create a policy from a preset
    pub fn from_preset(preset: PolicyPreset) -> Self {
        match preset {
            PolicyPreset::Conservative => Self {
                poll_interval_ms: 3_000,
                cooldown_ms: 60_000,
                consecutive_poor_threshold: 5,
                consecutive_offline_threshold: 8,
                min_quality_floor: QualityLevel::Fair,
                auto_mode: false,
                ..Self::default()
            },
            PolicyPreset::Balanced => Self::default(),
            PolicyPreset::Aggressive => Self {
                poll_interval_ms: 1_000,
                cooldown_ms: 15_000,
                consecutive_poor_threshold: 2,
                consecutive_offline_threshold: 4,
                min_quality_floor: QualityLevel::Poor,
                auto_mode: true,
                stats_timeout_ms: 800,
                ..Self::default()
            },
        }
    }

    /// Set the polling interval
    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Set the auto-mitigation cooldown
    pub fn with_cooldown_ms(mut self, ms: u64) -> Self {
        self.cooldown_ms = ms;
        self
    }

    /// Set the consecutive poor readings threshold
    pub fn with_consecutive_poor_threshold(mut self, count: u32) -> Self {
        self.consecutive_poor_threshold = count;
        self
    }

    /// Set the consecutive offline readings threshold
    pub fn with_consecutive_offline_threshold(mut self, count: u32) -> Self {
        self.consecutive_offline_threshold = count;
        self
    }

    /// Set the quality floor
    pub fn with_min_quality_floor(mut self, level: QualityLevel) -> Self {
        self.min_quality_floor = level;
        self
    }

    /// Enable or disable automatic mitigation
    pub fn with_auto_mode(mut self, enabled: bool) -> Self {
        self.auto_mode = enabled;
        self
    }

    /// Set the trend history window
    pub fn with_history_window(mut self, samples: usize) -> Self {
        self.history_window = samples;
        self
    }

    /// Set the number of mitigation records kept
    pub fn with_mitigation_log_size(mut self, records: usize) -> Self {
        self.mitigation_log_size = records;
        self
    }

    /// Set the statistics request timeout
    pub fn with_stats_timeout_ms(mut self, ms: u64) -> Self {
        self.stats_timeout_ms = ms;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn stats_timeout(&self) -> Duration {
        Duration::from_millis(self.stats_timeout_ms)
    }

    /// Check the policy for values the controller cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(Error::invalid_policy("poll_interval_ms must be greater than zero"));
        }
        if self.stats_timeout_ms == 0 {
            return Err(Error::invalid_policy("stats_timeout_ms must be greater than zero"));
        }
        if self.consecutive_poor_threshold == 0 {
            return Err(Error::invalid_policy(
                "consecutive_poor_threshold must be at least 1",
            ));
        }
        if self.consecutive_offline_threshold == 0 {
            return Err(Error::invalid_policy(
                "consecutive_offline_threshold must be at least 1",
            ));
        }
        if matches!(
            self.min_quality_floor,
            QualityLevel::Offline | QualityLevel::Unknown
        ) {
            return Err(Error::invalid_policy(format!(
                "min_quality_floor cannot be '{}'",
                self.min_quality_floor
            )));
        }
        if self.history_window < MIN_HISTORY_WINDOW {
            return Err(Error::invalid_policy(format!(
                "history_window must hold at least {} samples",
                MIN_HISTORY_WINDOW
            )));
        }
        if self.mitigation_log_size == 0 {
            return Err(Error::invalid_policy("mitigation_log_size must be at least 1"));
        }
        Ok(())
    }
}
