//! Mitigation seam and audit trail
//!
//! The controller never touches the peer connection or media stream itself.
//! It hands a [`MitigationRequest`] to the host's [`MitigationApplier`], which
//! owns those references, and records the outcome in a bounded
//! [`MitigationLog`].

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::scoring::QualityLevel;
use crate::stats::StatsSnapshot;
use crate::suggestions::Suggestion;

/// Default number of mitigation records kept for display
pub const DEFAULT_MITIGATION_LOG_SIZE: usize = 5;

/// Options passed through to the host with every request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MitigationOptions {
    /// Whether the host may lower quality on its own initiative
    pub auto_degrade: bool,
    /// Never degrade below this level
    pub min_quality_floor: QualityLevel,
}

/// A request to mitigate the current connection problem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MitigationRequest {
    pub snapshot: StatsSnapshot,
    pub current_level: QualityLevel,
    /// Suggestion that triggered the request
    pub suggestion: Suggestion,
    pub options: MitigationOptions,
    /// `true` when the controller acted without operator approval
    pub automatic: bool,
}

/// Description of the media stream after a mitigation swapped it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaStreamInfo {
    pub stream_id: String,
    pub audio_enabled: bool,
    pub video_enabled: bool,
    pub max_video_bitrate_bps: Option<u64>,
}

impl MediaStreamInfo {
    /// An audio-only stream
    pub fn audio_only(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            audio_enabled: true,
            video_enabled: false,
            max_video_bitrate_bps: None,
        }
    }
}

/// What the host did with a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MitigationOutcome {
    /// Whether anything was changed
    pub applied: bool,
    /// Quality level the call is expected to run at afterwards
    pub new_level: QualityLevel,
    pub reason: String,
    pub suggestion: Option<Suggestion>,
    /// Set when the active media stream was replaced
    pub stream: Option<MediaStreamInfo>,
}

impl MitigationOutcome {
    /// Outcome for a request the host chose not to act on
    pub fn declined(level: QualityLevel, reason: impl Into<String>) -> Self {
        Self {
            applied: false,
            new_level: level,
            reason: reason.into(),
            suggestion: None,
            stream: None,
        }
    }
}

/// Host-provided mitigation operation
///
/// Implementations hold the peer connection and local media stream. Errors
/// are reported to the host as `MitigationFailed` events and do not change
/// controller state.
#[async_trait]
pub trait MitigationApplier: Send + Sync {
    /// Apply a mitigation for the given request
    async fn apply(&self, request: MitigationRequest) -> Result<MitigationOutcome>;
}

/// One applied mitigation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MitigationRecord {
    pub timestamp: DateTime<Utc>,
    pub from_level: QualityLevel,
    pub to_level: QualityLevel,
    pub reason: String,
    pub triggering_suggestion: Suggestion,
    pub automatic: bool,
}

/// Bounded append-only log of applied mitigations, newest last
#[derive(Debug, Clone)]
pub struct MitigationLog {
    capacity: usize,
    records: VecDeque<MitigationRecord>,
}

impl Default for MitigationLog {
    fn default() -> Self {
        Self::new(DEFAULT_MITIGATION_LOG_SIZE)
    }
}

impl MitigationLog {
    /// Create a log that keeps the last `capacity` records
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a record, dropping the oldest when full
    pub fn push(&mut self, record: MitigationRecord) {
        if self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Records oldest first
    pub fn records(&self) -> impl Iterator<Item = &MitigationRecord> {
        self.records.iter()
    }

    /// Copy of the records, oldest first
    pub fn to_vec(&self) -> Vec<MitigationRecord> {
        self.records.iter().cloned().collect()
    }

    /// Most recent record
    pub fn latest(&self) -> Option<&MitigationRecord> {
        self.records.back()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

/// How the host should re-establish the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectKind {
    /// Restart ICE on the existing peer connection
    IceRestart,
    /// Tear down and rebuild the peer connection
    FullReconnect,
    /// Stop trying; the call cannot be recovered
    Abandon,
    /// The connection does not need re-establishing
    NotNeeded,
}

/// Reconnect plan handed to the host on escalation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectStrategy {
    pub should_retry: bool,
    pub delay_ms: u64,
    pub kind: ReconnectKind,
}

impl ReconnectStrategy {
    /// Derive a strategy from the current level and consecutive bad readings
    ///
    /// | level | consecutive | strategy |
    /// |-------|-------------|----------|
    /// | offline | < 10 | ICE restart after 1s |
    /// | offline | 10-19 | full reconnect after 3s |
    /// | offline | ≥ 20 | abandon |
    /// | poor | any | immediate ICE restart |
    /// | other | any | not needed |
    pub fn derive(level: QualityLevel, consecutive: u32) -> Self {
        match level {
            QualityLevel::Offline if consecutive < 10 => Self {
                should_retry: true,
                delay_ms: 1_000,
                kind: ReconnectKind::IceRestart,
            },
            QualityLevel::Offline if consecutive < 20 => Self {
                should_retry: true,
                delay_ms: 3_000,
                kind: ReconnectKind::FullReconnect,
            },
            QualityLevel::Offline => Self {
                should_retry: false,
                delay_ms: 0,
                kind: ReconnectKind::Abandon,
            },
            QualityLevel::Poor => Self {
                should_retry: true,
                delay_ms: 0,
                kind: ReconnectKind::IceRestart,
            },
            _ => Self {
                should_retry: false,
                delay_ms: 0,
                kind: ReconnectKind::NotNeeded,
            },
        }
    }
}
