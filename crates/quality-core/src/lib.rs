//! # CareLink Quality Core
//!
//! Real-time connection-quality monitoring and adaptive degradation control
//! for live video consultations.
//!
//! A [`DegradationController`] polls the host's transport statistics on a
//! fixed cadence, scores them, tracks the short-term trend, derives
//! remediation suggestions and decides whether to do nothing, ask the
//! operator, mitigate automatically or request a reconnect.
//!
//! ```text
//! StatsProvider ─▶ StatsCollector ─▶ QualityScorer ─▶ TrendAnalyzer ─▶ SuggestionEngine
//!                                                                          │
//!            QualityEventHandler ◀── DegradationController ◀───────────────┘
//!                                          │
//!                                          ▼
//!                                  MitigationApplier
//! ```
//!
//! The host owns the transport and the media stream. It plugs in through
//! three seams: [`StatsProvider`] for statistics, [`MitigationApplier`] for
//! quality changes and [`QualityEventHandler`] for notifications.

pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod mitigation;
pub mod registry;
pub mod scoring;
pub mod stats;
pub mod suggestions;
pub mod trend;

pub use config::{ControllerPolicy, PolicyPreset};
pub use controller::{CycleDecision, DegradationController, QualityAnalysis};
pub use error::{Error, Result};
pub use events::{
    ChannelEventHandler, EventPriority, LoggingEventHandler, QualityEvent, QualityEventHandler,
};
pub use mitigation::{
    MediaStreamInfo, MitigationApplier, MitigationLog, MitigationOptions, MitigationOutcome,
    MitigationRecord, MitigationRequest, ReconnectKind, ReconnectStrategy,
};
pub use registry::{SessionId, SessionMonitors};
pub use scoring::{QualityLevel, QualityScore, QualityScorer, ScoreBreakdown};
pub use stats::{StatsCollector, StatsProvider, StatsRecord, StatsReport, StatsSnapshot};
pub use suggestions::{
    Suggestion, SuggestionEngine, SuggestionKind, SuggestionPriority, SuggestionRule,
};
pub use trend::{QualityTrend, ScoredSample, TrendAnalyzer};

/// Commonly used types for hosts embedding a controller
pub mod prelude {
    pub use crate::config::{ControllerPolicy, PolicyPreset};
    pub use crate::controller::{CycleDecision, DegradationController, QualityAnalysis};
    pub use crate::error::{Error, Result};
    pub use crate::events::{ChannelEventHandler, QualityEvent, QualityEventHandler};
    pub use crate::mitigation::{
        MediaStreamInfo, MitigationApplier, MitigationOutcome, MitigationRequest,
        ReconnectStrategy,
    };
    pub use crate::registry::{SessionId, SessionMonitors};
    pub use crate::scoring::QualityLevel;
    pub use crate::stats::{StatsProvider, StatsReport, StatsSnapshot};
    pub use crate::suggestions::Suggestion;
}
