//! Quality scoring
//!
//! Maps a [`StatsSnapshot`] to a 0-100 score and a discrete [`QualityLevel`]
//! with a fixed penalty function. The weights are part of the behavioural
//! contract: two implementations fed the same snapshot must agree.
//!
//! | term | penalty |
//! |------|---------|
//! | video packet loss | 10 per percent |
//! | audio packet loss | 15 per percent |
//! | frame drop rate | 5 per percent |
//! | round-trip time | 30 above 300ms, 20 above 200ms, 10 above 100ms |
//! | video jitter | 15 above 50ms |
//! | audio jitter | 20 above 30ms |

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::stats::StatsSnapshot;

const VIDEO_LOSS_WEIGHT: f64 = 10.0;
const AUDIO_LOSS_WEIGHT: f64 = 15.0;
const FRAME_DROP_WEIGHT: f64 = 5.0;

/// RTT tiers, highest first; only the first match applies
const RTT_TIERS: [(f64, f64); 3] = [(300.0, 30.0), (200.0, 20.0), (100.0, 10.0)];

const VIDEO_JITTER_LIMIT_MS: f64 = 50.0;
const VIDEO_JITTER_PENALTY: f64 = 15.0;
const AUDIO_JITTER_LIMIT_MS: f64 = 30.0;
const AUDIO_JITTER_PENALTY: f64 = 20.0;

/// Discrete connection quality, ordered from best to worst
///
/// `Unknown` sorts last: it carries no measurement and is never treated as
/// degraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityLevel {
    /// Score 80 and above
    Excellent,
    /// Score 60-79
    Good,
    /// Score 40-59
    Fair,
    /// Score 20-39
    Poor,
    /// Score below 20
    Offline,
    /// No statistics were available this cycle
    Unknown,
}

impl QualityLevel {
    /// Classify a raw score
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            Self::Excellent
        } else if score >= 60.0 {
            Self::Good
        } else if score >= 40.0 {
            Self::Fair
        } else if score >= 20.0 {
            Self::Poor
        } else {
            Self::Offline
        }
    }

    /// Whether this level counts towards the consecutive-poor counter
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Poor | Self::Offline)
    }

    /// Whether this level is strictly worse than `other`
    ///
    /// `Unknown` is never worse or better than a measured level.
    pub fn is_worse_than(&self, other: QualityLevel) -> bool {
        *self != Self::Unknown && other != Self::Unknown && *self > other
    }

    /// Lowercase name, as used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Fair => "fair",
            Self::Poor => "poor",
            Self::Offline => "offline",
            Self::Unknown => "unknown",
        }
    }

    /// Get a description of the quality level
    pub fn description(&self) -> &'static str {
        match self {
            Self::Excellent => "Excellent connection, full quality video",
            Self::Good => "Good connection, minor impairments",
            Self::Fair => "Fair connection, noticeable impairments",
            Self::Poor => "Poor connection, video likely unusable",
            Self::Offline => "Connection lost or unusable",
            Self::Unknown => "Connection quality unknown",
        }
    }
}

impl fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Individual penalty terms that make up a score
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub video_loss: f64,
    pub audio_loss: f64,
    pub frame_drop: f64,
    pub rtt: f64,
    pub video_jitter: f64,
    pub audio_jitter: f64,
}

impl ScoreBreakdown {
    /// Sum of all penalties
    pub fn total(&self) -> f64 {
        self.video_loss
            + self.audio_loss
            + self.frame_drop
            + self.rtt
            + self.video_jitter
            + self.audio_jitter
    }
}

/// Result of scoring one snapshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    /// Unclamped score (100 minus all penalties)
    pub raw: f64,
    /// Rounded score clamped to 0..=100
    pub score: u8,
    /// Level derived from the raw score
    pub level: QualityLevel,
    /// Per-term penalties
    pub breakdown: ScoreBreakdown,
}

/// Deterministic snapshot scorer
#[derive(Debug, Clone, Copy, Default)]
pub struct QualityScorer;

impl QualityScorer {
    /// Create a new scorer
    pub fn new() -> Self {
        Self
    }

    /// Score a snapshot
    pub fn score(&self, snapshot: &StatsSnapshot) -> QualityScore {
        let breakdown = Self::penalties(snapshot);
        let raw = 100.0 - breakdown.total();

        QualityScore {
            raw,
            score: raw.round().clamp(0.0, 100.0) as u8,
            level: QualityLevel::from_score(raw),
            breakdown,
        }
    }

    /// Compute each penalty term independently
    pub fn penalties(snapshot: &StatsSnapshot) -> ScoreBreakdown {
        let rtt_ms = snapshot.connection.round_trip_time_ms;
        let rtt = RTT_TIERS
            .iter()
            .find(|(limit, _)| rtt_ms > *limit)
            .map(|(_, penalty)| *penalty)
            .unwrap_or(0.0);

        ScoreBreakdown {
            video_loss: snapshot.video_loss_pct() * VIDEO_LOSS_WEIGHT,
            audio_loss: snapshot.audio_loss_pct() * AUDIO_LOSS_WEIGHT,
            frame_drop: snapshot.frame_drop_pct() * FRAME_DROP_WEIGHT,
            rtt,
            video_jitter: if snapshot.video.inbound.jitter_ms > VIDEO_JITTER_LIMIT_MS {
                VIDEO_JITTER_PENALTY
            } else {
                0.0
            },
            audio_jitter: if snapshot.audio.inbound.jitter_ms > AUDIO_JITTER_LIMIT_MS {
                AUDIO_JITTER_PENALTY
            } else {
                0.0
            },
        }
    }
}
