//! Quality monitoring events
//!
//! The controller reports everything the host needs to react to through a
//! [`QualityEventHandler`]. Hosts implement the three required callbacks and
//! may override the optional ones; [`QualityEventHandler::on_event`] routes a
//! [`QualityEvent`] to the matching callback.
//!
//! # Usage Examples
//!
//! ## Basic Event Handler
//!
//! ```rust
//! use carelink_quality_core::events::QualityEventHandler;
//! use carelink_quality_core::{MediaStreamInfo, QualityLevel, ReconnectStrategy, StatsSnapshot};
//! use async_trait::async_trait;
//!
//! struct ConsultationView;
//!
//! #[async_trait]
//! impl QualityEventHandler for ConsultationView {
//!     async fn on_quality_change(&self, level: QualityLevel, _snapshot: Option<StatsSnapshot>) {
//!         println!("Connection is now {}", level);
//!     }
//!
//!     async fn on_stream_change(&self, stream: MediaStreamInfo) {
//!         println!("Switched to stream {}", stream.stream_id);
//!     }
//!
//!     async fn on_reconnect_needed(&self, strategy: ReconnectStrategy) {
//!         println!("Reconnecting: {:?} in {}ms", strategy.kind, strategy.delay_ms);
//!     }
//! }
//! ```
//!
//! ## Channel Forwarding
//!
//! ```rust
//! use carelink_quality_core::events::ChannelEventHandler;
//!
//! let (handler, mut events) = ChannelEventHandler::new();
//! assert!(events.try_recv().is_err());
//! # drop(handler);
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::mitigation::{MediaStreamInfo, MitigationRecord, ReconnectStrategy};
use crate::scoring::QualityLevel;
use crate::stats::StatsSnapshot;
use crate::suggestions::Suggestion;

/// Event priority levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventPriority {
    /// Routine updates
    Low,
    /// Level changes and pending suggestions
    Normal,
    /// Applied or failed mitigations
    High,
    /// The call needs reconnecting
    Critical,
}

/// Events emitted by a degradation controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QualityEvent {
    /// The computed level changed, or a mitigation altered quality
    QualityChanged {
        previous: QualityLevel,
        level: QualityLevel,
        /// Absent when statistics were unavailable
        snapshot: Option<StatsSnapshot>,
        timestamp: DateTime<Utc>,
    },
    /// A mitigation replaced the active media stream
    StreamChanged {
        stream: MediaStreamInfo,
        timestamp: DateTime<Utc>,
    },
    /// Sustained offline readings; the host should re-establish transport
    ReconnectNeeded {
        strategy: ReconnectStrategy,
        consecutive_readings: u32,
        timestamp: DateTime<Utc>,
    },
    /// A mitigation was applied
    MitigationApplied { record: MitigationRecord },
    /// The host's mitigation operation failed
    MitigationFailed {
        suggestion: Suggestion,
        reason: String,
        automatic: bool,
        timestamp: DateTime<Utc>,
    },
    /// A suggestion awaits operator approval
    SuggestionPending {
        suggestion: Suggestion,
        timestamp: DateTime<Utc>,
    },
}

impl QualityEvent {
    /// Get the priority of this event
    pub fn priority(&self) -> EventPriority {
        match self {
            QualityEvent::QualityChanged { level, .. } if level.is_degraded() => EventPriority::High,
            QualityEvent::QualityChanged { .. } => EventPriority::Normal,
            QualityEvent::StreamChanged { .. } => EventPriority::Normal,
            QualityEvent::SuggestionPending { .. } => EventPriority::Normal,
            QualityEvent::MitigationApplied { .. } => EventPriority::High,
            QualityEvent::MitigationFailed { .. } => EventPriority::High,
            QualityEvent::ReconnectNeeded { .. } => EventPriority::Critical,
        }
    }

    /// When the event was raised
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            QualityEvent::QualityChanged { timestamp, .. }
            | QualityEvent::StreamChanged { timestamp, .. }
            | QualityEvent::ReconnectNeeded { timestamp, .. }
            | QualityEvent::MitigationFailed { timestamp, .. }
            | QualityEvent::SuggestionPending { timestamp, .. } => *timestamp,
            QualityEvent::MitigationApplied { record } => record.timestamp,
        }
    }

    /// Short event name for logs
    pub fn name(&self) -> &'static str {
        match self {
            QualityEvent::QualityChanged { .. } => "quality_changed",
            QualityEvent::StreamChanged { .. } => "stream_changed",
            QualityEvent::ReconnectNeeded { .. } => "reconnect_needed",
            QualityEvent::MitigationApplied { .. } => "mitigation_applied",
            QualityEvent::MitigationFailed { .. } => "mitigation_failed",
            QualityEvent::SuggestionPending { .. } => "suggestion_pending",
        }
    }
}

/// Host callbacks for quality monitoring
///
/// Callbacks run on the controller's polling task. They must not await
/// `DegradationController::stop` on the controller that invoked them.
#[async_trait]
pub trait QualityEventHandler: Send + Sync {
    /// Handle a change of the computed quality level
    async fn on_quality_change(&self, level: QualityLevel, snapshot: Option<StatsSnapshot>);

    /// Handle a media stream swap performed by a mitigation
    async fn on_stream_change(&self, stream: MediaStreamInfo);

    /// Handle an escalation; the host re-establishes the transport
    async fn on_reconnect_needed(&self, strategy: ReconnectStrategy);

    /// Handle an applied mitigation (optional)
    async fn on_mitigation_applied(&self, _record: MitigationRecord) {
        // Default implementation - hosts that keep their own audit trail override this
    }

    /// Handle a failed mitigation (optional)
    async fn on_mitigation_failed(&self, _suggestion: Suggestion, _reason: String) {
        // Default implementation - the failure is already logged by the controller
    }

    /// Handle a suggestion awaiting operator approval (optional)
    async fn on_suggestion(&self, _suggestion: Suggestion) {
        // Default implementation - hosts without a manual flow ignore suggestions
    }

    /// Dispatch a quality event to the specific callback
    ///
    /// Generally there is no need to override this unless the handler wants
    /// the raw events.
    async fn on_event(&self, event: QualityEvent) {
        match event {
            QualityEvent::QualityChanged { level, snapshot, .. } => {
                self.on_quality_change(level, snapshot).await;
            }
            QualityEvent::StreamChanged { stream, .. } => {
                self.on_stream_change(stream).await;
            }
            QualityEvent::ReconnectNeeded { strategy, .. } => {
                self.on_reconnect_needed(strategy).await;
            }
            QualityEvent::MitigationApplied { record } => {
                self.on_mitigation_applied(record).await;
            }
            QualityEvent::MitigationFailed { suggestion, reason, .. } => {
                self.on_mitigation_failed(suggestion, reason).await;
            }
            QualityEvent::SuggestionPending { suggestion, .. } => {
                self.on_suggestion(suggestion).await;
            }
        }
    }
}

/// Forwards every event into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelEventHandler {
    sender: mpsc::UnboundedSender<QualityEvent>,
}

impl ChannelEventHandler {
    /// Create a handler and the receiving end of its channel
    pub fn new() -> (Self, mpsc::UnboundedReceiver<QualityEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    fn forward(&self, event: QualityEvent) {
        if self.sender.send(event).is_err() {
            debug!("Quality event receiver dropped, discarding event");
        }
    }
}

/// Only events delivered through `on_event` are forwarded. The individual
/// callbacks lack the context a full event carries, so direct calls are
/// dropped.
#[async_trait]
impl QualityEventHandler for ChannelEventHandler {
    async fn on_quality_change(&self, level: QualityLevel, _snapshot: Option<StatsSnapshot>) {
        debug!("Ignoring direct quality change to {}, forward the event instead", level);
    }

    async fn on_stream_change(&self, stream: MediaStreamInfo) {
        debug!("Ignoring direct stream change to {}, forward the event instead", stream.stream_id);
    }

    async fn on_reconnect_needed(&self, strategy: ReconnectStrategy) {
        debug!("Ignoring direct reconnect request {:?}, forward the event instead", strategy.kind);
    }

    async fn on_event(&self, event: QualityEvent) {
        self.forward(event);
    }
}

/// Handler that only writes events to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEventHandler;

#[async_trait]
impl QualityEventHandler for LoggingEventHandler {
    async fn on_quality_change(&self, level: QualityLevel, _snapshot: Option<StatsSnapshot>) {
        info!("Connection quality changed to {}: {}", level, level.description());
    }

    async fn on_stream_change(&self, stream: MediaStreamInfo) {
        info!(
            "Media stream changed to {} (video: {})",
            stream.stream_id, stream.video_enabled
        );
    }

    async fn on_reconnect_needed(&self, strategy: ReconnectStrategy) {
        warn!(
            "Reconnect needed: {:?} after {}ms",
            strategy.kind, strategy.delay_ms
        );
    }
}
