//! Per-session controller state

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::ControllerPolicy;
use crate::mitigation::MitigationLog;
use crate::scoring::QualityLevel;
use crate::stats::StatsSnapshot;
use crate::suggestions::Suggestion;
use crate::trend::{QualityTrend, TrendAnalyzer};

/// Result of the most recent polling cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityAnalysis {
    pub level: QualityLevel,
    /// Absent when statistics were unavailable
    pub score: Option<u8>,
    pub trend: QualityTrend,
    pub suggestions: Vec<Suggestion>,
    pub snapshot: Option<StatsSnapshot>,
    pub consecutive_poor_count: u32,
    pub timestamp: DateTime<Utc>,
}

/// Mutable state of one monitored session
///
/// Only touched while the controller's state lock is held, so a cycle's
/// counters, cooldown and decision are updated together.
#[derive(Debug)]
pub(crate) struct ControllerState {
    pub(crate) history: TrendAnalyzer,
    pub(crate) mitigations: MitigationLog,
    pub(crate) analysis: Option<QualityAnalysis>,
    /// Level reported to the host, including mitigation-induced changes
    pub(crate) last_level: QualityLevel,
    /// Level computed by the most recent cycle
    pub(crate) measured_level: QualityLevel,
    pub(crate) consecutive_poor: u32,
    /// Set once a reconnect was requested for the current offline episode
    pub(crate) offline_escalated: bool,
    pub(crate) pending: Option<Suggestion>,
    pub(crate) last_mitigation_at: Option<Instant>,
}

impl ControllerState {
    pub(crate) fn new(policy: &ControllerPolicy) -> Self {
        Self {
            history: TrendAnalyzer::new(policy.history_window),
            mitigations: MitigationLog::new(policy.mitigation_log_size),
            analysis: None,
            last_level: QualityLevel::Unknown,
            measured_level: QualityLevel::Unknown,
            consecutive_poor: 0,
            offline_escalated: false,
            pending: None,
            last_mitigation_at: None,
        }
    }

    /// Count a reading towards (or reset) the degraded run
    ///
    /// The offline escalation re-arms only when the run ends, so a link
    /// flapping between poor and offline stays one episode.
    pub(crate) fn record_level(&mut self, level: QualityLevel) {
        if level.is_degraded() {
            self.consecutive_poor = self.consecutive_poor.saturating_add(1);
        } else {
            self.consecutive_poor = 0;
            self.offline_escalated = false;
        }
    }

    /// Time left before another automatic mitigation may run
    pub(crate) fn cooldown_remaining(&self, cooldown: Duration) -> Option<Duration> {
        let elapsed = self.last_mitigation_at?.elapsed();
        cooldown.checked_sub(elapsed).filter(|left| !left.is_zero())
    }

    /// Discard everything learned about the session
    pub(crate) fn reset(&mut self, policy: &ControllerPolicy) {
        *self = Self::new(policy);
    }
}
