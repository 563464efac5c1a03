//! Short-term quality trend analysis
//!
//! Keeps a bounded FIFO of scored samples and compares the mean of the most
//! recent five samples with the five before them.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scoring::{QualityLevel, QualityScore};

/// Default number of samples kept in the rolling history
pub const DEFAULT_HISTORY_WINDOW: usize = 30;

/// Samples averaged on each side of the comparison
const TREND_SPAN: usize = 5;

/// Mean score difference required to call a direction
const TREND_THRESHOLD: f64 = 10.0;

/// Quality trend indicators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTrend {
    Improving,
    Stable,
    Degrading,
}

/// One scored polling cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredSample {
    pub level: QualityLevel,
    pub score: u8,
    pub timestamp: DateTime<Utc>,
}

impl ScoredSample {
    /// Create a sample stamped now
    pub fn new(level: QualityLevel, score: u8) -> Self {
        Self {
            level,
            score,
            timestamp: Utc::now(),
        }
    }

    /// Create a sample from a score result
    pub fn from_score(score: &QualityScore) -> Self {
        Self::new(score.level, score.score)
    }
}

/// Rolling history of scored samples with trend classification
#[derive(Debug, Clone)]
pub struct TrendAnalyzer {
    window: usize,
    samples: VecDeque<ScoredSample>,
}

impl Default for TrendAnalyzer {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_WINDOW)
    }
}

impl TrendAnalyzer {
    /// Create an analyzer keeping at most `window` samples
    ///
    /// The window never drops below the ten samples a trend needs.
    pub fn new(window: usize) -> Self {
        let window = window.max(TREND_SPAN * 2);
        Self {
            window,
            samples: VecDeque::with_capacity(window),
        }
    }

    /// Append a sample, evicting the oldest once the window is full
    pub fn push(&mut self, sample: ScoredSample) {
        if self.samples.len() >= self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Classify the current trend
    pub fn trend(&self) -> QualityTrend {
        let len = self.samples.len();
        if len < TREND_SPAN * 2 {
            return QualityTrend::Stable;
        }

        let recent_avg = self.mean(len - TREND_SPAN..len);
        let older_avg = self.mean(len - TREND_SPAN * 2..len - TREND_SPAN);
        let delta = recent_avg - older_avg;

        if delta > TREND_THRESHOLD {
            QualityTrend::Improving
        } else if delta < -TREND_THRESHOLD {
            QualityTrend::Degrading
        } else {
            QualityTrend::Stable
        }
    }

    fn mean(&self, range: std::ops::Range<usize>) -> f64 {
        let count = range.len() as f64;
        let total: u32 = self.samples.range(range).map(|s| u32::from(s.score)).sum();
        f64::from(total) / count
    }

    /// Samples oldest first
    pub fn samples(&self) -> impl Iterator<Item = &ScoredSample> {
        self.samples.iter()
    }

    /// Most recent sample
    pub fn latest(&self) -> Option<&ScoredSample> {
        self.samples.back()
    }

    /// Number of samples held
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the history is empty
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Maximum number of samples held
    pub fn window(&self) -> usize {
        self.window
    }

    /// Drop all samples
    pub fn clear(&mut self) {
        self.samples.clear();
    }
}
