//! Remediation suggestions
//!
//! Every rule is evaluated independently and in a fixed order; the output is
//! truncated to the first [`MAX_SUGGESTIONS`] hits without re-sorting. That
//! order decides which suggestion the controller treats as primary when
//! priorities tie, so it must not change.
//!
//! | order | rule | fires when | priority |
//! |-------|------|-----------|----------|
//! | 1 | high latency | RTT > 200ms | high |
//! | 2 | video packet loss | video loss > 2% | high |
//! | 3 | frame drops | frame drop rate > 5% | medium |
//! | 4 | degrading trend | trend is degrading | medium |
//! | 5 | low bandwidth | 0 < outgoing bitrate < 500 kbps | high |

use std::cmp::Reverse;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::scoring::QualityLevel;
use crate::stats::StatsSnapshot;
use crate::trend::QualityTrend;

/// Maximum number of suggestions returned per cycle
pub const MAX_SUGGESTIONS: usize = 3;

const HIGH_RTT_MS: f64 = 200.0;
const HIGH_VIDEO_LOSS_PCT: f64 = 2.0;
const HIGH_FRAME_DROP_PCT: f64 = 5.0;
const LOW_BANDWIDTH_BPS: f64 = 500_000.0;

/// Severity class of a suggestion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionKind {
    Error,
    Warning,
    Info,
}

/// Suggestion priority levels
///
/// ```rust
/// use carelink_quality_core::SuggestionPriority;
///
/// assert!(SuggestionPriority::Critical > SuggestionPriority::High);
/// assert!(SuggestionPriority::High > SuggestionPriority::Medium);
/// assert!(SuggestionPriority::Medium > SuggestionPriority::Low);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl SuggestionPriority {
    /// Priorities that make a suggestion eligible for automatic mitigation
    pub fn is_urgent(&self) -> bool {
        *self >= Self::High
    }
}

/// The rule that produced a suggestion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionRule {
    HighLatency,
    VideoPacketLoss,
    FrameDrops,
    DegradingTrend,
    LowBandwidth,
}

impl fmt::Display for SuggestionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::HighLatency => "high_latency",
            Self::VideoPacketLoss => "video_packet_loss",
            Self::FrameDrops => "frame_drops",
            Self::DegradingTrend => "degrading_trend",
            Self::LowBandwidth => "low_bandwidth",
        };
        f.write_str(name)
    }
}

/// A human-actionable remediation suggestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub kind: SuggestionKind,
    pub rule: SuggestionRule,
    pub title: String,
    pub message: String,
    pub priority: SuggestionPriority,
    /// Quality tier a mitigation for this suggestion would move the call to
    pub target_level: Option<QualityLevel>,
}

impl Suggestion {
    fn new(
        rule: SuggestionRule,
        kind: SuggestionKind,
        priority: SuggestionPriority,
        title: &str,
        message: String,
    ) -> Self {
        Self {
            kind,
            rule,
            title: title.to_string(),
            message,
            priority,
            target_level: None,
        }
    }

    fn targeting(mut self, level: QualityLevel) -> Self {
        self.target_level = Some(level);
        self
    }
}

/// Derives prioritised suggestions from one analysed cycle
#[derive(Debug, Clone, Copy, Default)]
pub struct SuggestionEngine;

impl SuggestionEngine {
    /// Create a new engine
    pub fn new() -> Self {
        Self
    }

    /// Evaluate all rules in order, keeping at most three suggestions
    pub fn evaluate(
        &self,
        snapshot: &StatsSnapshot,
        level: QualityLevel,
        trend: QualityTrend,
    ) -> Vec<Suggestion> {
        if level == QualityLevel::Unknown {
            return Vec::new();
        }

        let rtt_ms = snapshot.connection.round_trip_time_ms;
        let video_loss = snapshot.video_loss_pct();
        let frame_drop = snapshot.frame_drop_pct();
        let outgoing_bps = snapshot.connection.outgoing_bitrate_bps;

        let mut suggestions = Vec::with_capacity(MAX_SUGGESTIONS);

        if rtt_ms > HIGH_RTT_MS {
            suggestions.push(Suggestion::new(
                SuggestionRule::HighLatency,
                SuggestionKind::Warning,
                SuggestionPriority::High,
                "High latency",
                format!(
                    "Round-trip time is {:.0}ms. Move closer to the router or switch to a wired connection.",
                    rtt_ms
                ),
            ));
        }

        if video_loss > HIGH_VIDEO_LOSS_PCT {
            suggestions.push(
                Suggestion::new(
                    SuggestionRule::VideoPacketLoss,
                    SuggestionKind::Error,
                    SuggestionPriority::High,
                    "Video packet loss",
                    format!(
                        "{:.1}% of video packets are being lost. Free up bandwidth by closing applications that use the network.",
                        video_loss
                    ),
                )
                .targeting(QualityLevel::Fair),
            );
        }

        if frame_drop > HIGH_FRAME_DROP_PCT {
            suggestions.push(
                Suggestion::new(
                    SuggestionRule::FrameDrops,
                    SuggestionKind::Warning,
                    SuggestionPriority::Medium,
                    "Dropped video frames",
                    format!(
                        "{:.1}% of video frames are dropped. Reduce video quality or close other applications.",
                        frame_drop
                    ),
                )
                .targeting(QualityLevel::Fair),
            );
        }

        if trend == QualityTrend::Degrading {
            suggestions.push(Suggestion::new(
                SuggestionRule::DegradingTrend,
                SuggestionKind::Info,
                SuggestionPriority::Medium,
                "Connection declining",
                "Connection quality has been declining. Check the network for competing traffic."
                    .to_string(),
            ));
        }

        if outgoing_bps > 0.0 && outgoing_bps < LOW_BANDWIDTH_BPS {
            suggestions.push(
                Suggestion::new(
                    SuggestionRule::LowBandwidth,
                    SuggestionKind::Warning,
                    SuggestionPriority::High,
                    "Very low bandwidth",
                    format!(
                        "Only {:.0} kbps of upload bandwidth is available. Consider switching to audio only.",
                        outgoing_bps / 1000.0
                    ),
                )
                .targeting(QualityLevel::Poor),
            );
        }

        suggestions.truncate(MAX_SUGGESTIONS);
        suggestions
    }

    /// The primary suggestion: highest priority, earliest rule on ties
    pub fn primary(suggestions: &[Suggestion]) -> Option<&Suggestion> {
        suggestions
            .iter()
            .enumerate()
            .max_by_key(|(index, s)| (s.priority, Reverse(*index)))
            .map(|(_, s)| s)
    }

    /// Whether any suggestion is urgent enough for automatic mitigation
    pub fn has_urgent(suggestions: &[Suggestion]) -> bool {
        suggestions.iter().any(|s| s.priority.is_urgent())
    }
}
