//! Adaptive degradation controller
//!
//! One [`DegradationController`] watches one call session. While monitoring
//! it runs a single polling task that, every `poll_interval_ms`:
//!
//! 1. collects and scores a snapshot, updates the trend and derives
//!    suggestions
//! 2. updates the consecutive poor/offline counter
//! 3. escalates to a reconnect once per offline episode
//! 4. otherwise applies the primary suggestion automatically when auto mode
//!    is on, no cooldown is active, a suggestion is urgent and the degraded
//!    run is long enough
//! 5. otherwise surfaces the primary suggestion for operator approval if
//!    none is pending
//!
//! Cycles never overlap: the state lock is held for the whole cycle,
//! including the host's mitigation call. Events are delivered to the
//! handler after the lock is released.
//!
//! # Example
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use carelink_quality_core::prelude::*;
//! # async fn example(
//! #     provider: Arc<dyn StatsProvider>,
//! #     applier: Arc<dyn MitigationApplier>,
//! # ) -> carelink_quality_core::Result<()> {
//! let (handler, mut events) = ChannelEventHandler::new();
//! let controller = DegradationController::new(
//!     ControllerPolicy::default(),
//!     provider,
//!     applier,
//!     Arc::new(handler),
//! )?;
//!
//! controller.start().await;
//! while let Some(event) = events.recv().await {
//!     println!("{}: {:?}", event.name(), event);
//! }
//! controller.stop().await;
//! # Ok(())
//! # }
//! ```

mod state;

pub use state::QualityAnalysis;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::config::ControllerPolicy;
use crate::error::{Error, Result};
use crate::events::{QualityEvent, QualityEventHandler};
use crate::mitigation::{
    MitigationApplier, MitigationOptions, MitigationOutcome, MitigationRecord, MitigationRequest,
    ReconnectStrategy,
};
use crate::registry::SessionId;
use crate::scoring::{QualityLevel, QualityScorer};
use crate::stats::{StatsCollector, StatsProvider, StatsSnapshot};
use crate::suggestions::{Suggestion, SuggestionEngine};
use crate::trend::ScoredSample;

use state::ControllerState;

/// What a polling cycle decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleDecision {
    /// Nothing to do
    NoAction,
    /// No statistics this cycle; level is unknown
    StatsUnavailable,
    /// A suggestion was surfaced for operator approval
    SuggestManual,
    /// A mitigation was applied automatically
    AutoApplied,
    /// The host declined the automatic mitigation
    AutoDeclined,
    /// The host's mitigation operation failed
    MitigationFailed,
    /// A reconnect was requested
    Escalated,
}

struct MonitorTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct ControllerInner {
    session_id: SessionId,
    policy: ControllerPolicy,
    provider: Arc<dyn StatsProvider>,
    applier: Arc<dyn MitigationApplier>,
    handler: Arc<dyn QualityEventHandler>,
    collector: StatsCollector,
    scorer: QualityScorer,
    engine: SuggestionEngine,
    state: Mutex<ControllerState>,
    auto_mode: AtomicBool,
    monitoring: AtomicBool,
    /// Set once stop begins; no mitigation starts while set
    cancelled: AtomicBool,
    task: Mutex<Option<MonitorTask>>,
}

/// Connection-quality monitor and degradation controller for one session
#[derive(Clone)]
pub struct DegradationController {
    inner: Arc<ControllerInner>,
}

impl std::fmt::Debug for DegradationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DegradationController")
            .field("session_id", &self.inner.session_id)
            .field("policy", &self.inner.policy)
            .field("monitoring", &self.is_monitoring())
            .field("auto_mode", &self.auto_mode())
            .finish()
    }
}

impl DegradationController {
    /// Create a controller for a new session
    pub fn new(
        policy: ControllerPolicy,
        provider: Arc<dyn StatsProvider>,
        applier: Arc<dyn MitigationApplier>,
        handler: Arc<dyn QualityEventHandler>,
    ) -> Result<Self> {
        Self::for_session(SessionId::generate(), policy, provider, applier, handler)
    }

    /// Create a controller for a known session
    pub fn for_session(
        session_id: SessionId,
        policy: ControllerPolicy,
        provider: Arc<dyn StatsProvider>,
        applier: Arc<dyn MitigationApplier>,
        handler: Arc<dyn QualityEventHandler>,
    ) -> Result<Self> {
        policy.validate()?;

        let inner = ControllerInner {
            session_id,
            collector: StatsCollector::new(policy.stats_timeout()),
            scorer: QualityScorer::new(),
            engine: SuggestionEngine::new(),
            state: Mutex::new(ControllerState::new(&policy)),
            auto_mode: AtomicBool::new(policy.auto_mode),
            monitoring: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            task: Mutex::new(None),
            policy,
            provider,
            applier,
            handler,
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn session_id(&self) -> &SessionId {
        &self.inner.session_id
    }

    pub fn policy(&self) -> &ControllerPolicy {
        &self.inner.policy
    }

    /// Start the polling task
    ///
    /// Returns `false` if the controller was already monitoring.
    pub async fn start(&self) -> bool {
        let mut task = self.inner.task.lock().await;
        if task.is_some() {
            debug!("Quality monitor for {} already running", self.inner.session_id);
            return false;
        }

        self.inner.cancelled.store(false, Ordering::SeqCst);
        self.inner.monitoring.store(true, Ordering::SeqCst);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let controller = self.clone();
        let span = info_span!("quality_monitor", session = %self.inner.session_id);
        let handle = tokio::spawn(controller.run(shutdown_rx).instrument(span));

        *task = Some(MonitorTask { shutdown, handle });
        info!(
            "Started quality monitoring for {} every {}ms",
            self.inner.session_id, self.inner.policy.poll_interval_ms
        );
        true
    }

    /// Stop the polling task and discard the session state
    ///
    /// Waits for an in-flight cycle to settle. Calling this when not
    /// monitoring is a no-op.
    pub async fn stop(&self) {
        // Held until teardown completes so a concurrent start waits for it
        let mut slot = self.inner.task.lock().await;
        let Some(task) = slot.take() else {
            return;
        };

        self.inner.cancelled.store(true, Ordering::SeqCst);
        let _ = task.shutdown.send(true);
        if let Err(e) = task.handle.await {
            warn!("Quality monitor task for {} ended abnormally: {}", self.inner.session_id, e);
        }

        self.inner.state.lock().await.reset(&self.inner.policy);
        self.inner.monitoring.store(false, Ordering::SeqCst);
        drop(slot);
        info!("Stopped quality monitoring for {}", self.inner.session_id);
    }

    /// Whether the polling task is running
    pub fn is_monitoring(&self) -> bool {
        self.inner.monitoring.load(Ordering::SeqCst)
    }

    /// Enable or disable automatic mitigation
    pub fn set_auto_mode(&self, enabled: bool) {
        self.inner.auto_mode.store(enabled, Ordering::SeqCst);
        debug!("Auto mode for {} set to {}", self.inner.session_id, enabled);
    }

    pub fn auto_mode(&self) -> bool {
        self.inner.auto_mode.load(Ordering::SeqCst)
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.inner.policy.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    debug!("Quality monitor received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    let decision = self.poll_once().await;
                    debug!("Polling cycle decided {:?}", decision);
                }
            }
        }
    }

    /// Run one full polling cycle
    pub async fn poll_once(&self) -> CycleDecision {
        let (decision, events) = {
            let mut state = self.inner.state.lock().await;
            self.inner.cycle(&mut state, self.auto_mode()).await
        };
        self.dispatch(events).await;
        decision
    }

    /// The suggestion awaiting operator approval
    pub async fn pending_suggestion(&self) -> Option<Suggestion> {
        self.inner.state.lock().await.pending.clone()
    }

    /// Apply the pending suggestion on the operator's behalf
    pub async fn approve_pending(&self) -> Result<MitigationOutcome> {
        let (result, events) = {
            let mut state = self.inner.state.lock().await;
            if self.inner.is_cancelled() {
                return Err(Error::mitigation_failed("monitoring is stopping"));
            }
            let suggestion = state.pending.take().ok_or(Error::NoPendingSuggestion)?;
            self.inner.approve(&mut state, suggestion, self.auto_mode()).await
        };
        self.dispatch(events).await;
        result
    }

    /// Discard the pending suggestion without side effects
    pub async fn reject_pending(&self) -> Option<Suggestion> {
        let rejected = self.inner.state.lock().await.pending.take();
        if let Some(suggestion) = &rejected {
            debug!("Operator rejected suggestion {}", suggestion.rule);
        }
        rejected
    }

    /// Result of the most recent cycle
    pub async fn current_analysis(&self) -> Option<QualityAnalysis> {
        self.inner.state.lock().await.analysis.clone()
    }

    /// Applied mitigations, oldest first
    pub async fn mitigation_history(&self) -> Vec<MitigationRecord> {
        self.inner.state.lock().await.mitigations.to_vec()
    }

    /// Scored samples in the trend window, oldest first
    pub async fn quality_history(&self) -> Vec<ScoredSample> {
        self.inner.state.lock().await.history.samples().cloned().collect()
    }

    /// Time left before another automatic mitigation may run
    pub async fn cooldown_remaining(&self) -> Option<Duration> {
        self.inner
            .state
            .lock()
            .await
            .cooldown_remaining(self.inner.policy.cooldown())
    }

    async fn dispatch(&self, events: Vec<QualityEvent>) {
        for event in events {
            self.inner.handler.on_event(event).await;
        }
    }
}

impl ControllerInner {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    async fn cycle(
        &self,
        state: &mut ControllerState,
        auto_mode: bool,
    ) -> (CycleDecision, Vec<QualityEvent>) {
        let mut events = Vec::new();

        let Some(snapshot) = self.collector.collect(self.provider.as_ref()).await else {
            self.record_unavailable(state, &mut events);
            return (CycleDecision::StatsUnavailable, events);
        };

        let score = self.scorer.score(&snapshot);
        let level = score.level;
        state.history.push(ScoredSample::from_score(&score));
        let trend = state.history.trend();
        let suggestions = self.engine.evaluate(&snapshot, level, trend);

        state.record_level(level);
        let consecutive = state.consecutive_poor;

        if level != state.measured_level {
            events.push(QualityEvent::QualityChanged {
                previous: state.last_level,
                level,
                snapshot: Some(snapshot),
                timestamp: Utc::now(),
            });
            state.last_level = level;
        }
        state.measured_level = level;

        state.analysis = Some(QualityAnalysis {
            level,
            score: Some(score.score),
            trend,
            suggestions: suggestions.clone(),
            snapshot: Some(snapshot),
            consecutive_poor_count: consecutive,
            timestamp: Utc::now(),
        });

        debug!(
            "Scored {} ({}), trend {:?}, {} suggestions, {} consecutive degraded",
            score.score,
            level,
            trend,
            suggestions.len(),
            consecutive
        );

        if level == QualityLevel::Offline
            && consecutive >= self.policy.consecutive_offline_threshold
        {
            if state.offline_escalated {
                return (CycleDecision::NoAction, events);
            }
            state.offline_escalated = true;

            let strategy = ReconnectStrategy::derive(level, consecutive);
            warn!(
                "Connection offline for {} consecutive readings, requesting {:?}",
                consecutive, strategy.kind
            );
            events.push(QualityEvent::ReconnectNeeded {
                strategy,
                consecutive_readings: consecutive,
                timestamp: Utc::now(),
            });
            return (CycleDecision::Escalated, events);
        }

        let cooldown_active = state
            .cooldown_remaining(self.policy.cooldown())
            .is_some();
        let auto_eligible = auto_mode
            && !cooldown_active
            && SuggestionEngine::has_urgent(&suggestions)
            && consecutive >= self.policy.consecutive_poor_threshold;

        if auto_eligible {
            if self.is_cancelled() {
                debug!("Skipping automatic mitigation, monitoring is stopping");
                return (CycleDecision::NoAction, events);
            }
            if let Some(primary) = SuggestionEngine::primary(&suggestions) {
                let decision = self
                    .auto_apply(state, snapshot, level, primary.clone(), &mut events)
                    .await;
                return (decision, events);
            }
        }

        if state.pending.is_none() {
            if let Some(primary) = SuggestionEngine::primary(&suggestions) {
                info!("Suggesting {} for operator approval", primary.rule);
                state.pending = Some(primary.clone());
                events.push(QualityEvent::SuggestionPending {
                    suggestion: primary.clone(),
                    timestamp: Utc::now(),
                });
                return (CycleDecision::SuggestManual, events);
            }
        }

        (CycleDecision::NoAction, events)
    }

    fn record_unavailable(&self, state: &mut ControllerState, events: &mut Vec<QualityEvent>) {
        state.record_level(QualityLevel::Unknown);

        if state.measured_level != QualityLevel::Unknown {
            events.push(QualityEvent::QualityChanged {
                previous: state.last_level,
                level: QualityLevel::Unknown,
                snapshot: None,
                timestamp: Utc::now(),
            });
            state.last_level = QualityLevel::Unknown;
        }
        state.measured_level = QualityLevel::Unknown;

        state.analysis = Some(QualityAnalysis {
            level: QualityLevel::Unknown,
            score: None,
            trend: state.history.trend(),
            suggestions: Vec::new(),
            snapshot: None,
            consecutive_poor_count: 0,
            timestamp: Utc::now(),
        });
    }

    async fn auto_apply(
        &self,
        state: &mut ControllerState,
        snapshot: StatsSnapshot,
        level: QualityLevel,
        suggestion: Suggestion,
        events: &mut Vec<QualityEvent>,
    ) -> CycleDecision {
        let request = self.request(snapshot, level, suggestion.clone(), true, true);

        match self.applier.apply(request).await {
            Ok(outcome) if outcome.applied => {
                state.pending = None;
                self.record_success(state, level, suggestion, &outcome, true, events);
                CycleDecision::AutoApplied
            }
            Ok(outcome) => {
                debug!("Host declined automatic mitigation: {}", outcome.reason);
                CycleDecision::AutoDeclined
            }
            Err(e) => {
                warn!("Automatic mitigation for {} failed: {}", suggestion.rule, e);
                events.push(QualityEvent::MitigationFailed {
                    suggestion,
                    reason: e.to_string(),
                    automatic: true,
                    timestamp: Utc::now(),
                });
                CycleDecision::MitigationFailed
            }
        }
    }

    async fn approve(
        &self,
        state: &mut ControllerState,
        suggestion: Suggestion,
        auto_mode: bool,
    ) -> (Result<MitigationOutcome>, Vec<QualityEvent>) {
        let mut events = Vec::new();

        let snapshot = state
            .analysis
            .as_ref()
            .and_then(|analysis| analysis.snapshot)
            .unwrap_or_default();
        let level = state.measured_level;
        let request = self.request(snapshot, level, suggestion.clone(), auto_mode, false);

        match self.applier.apply(request).await {
            Ok(outcome) => {
                if outcome.applied {
                    self.record_success(state, level, suggestion, &outcome, false, &mut events);
                } else {
                    debug!("Host declined approved mitigation: {}", outcome.reason);
                }
                (Ok(outcome), events)
            }
            Err(e) => {
                warn!("Approved mitigation for {} failed: {}", suggestion.rule, e);
                events.push(QualityEvent::MitigationFailed {
                    suggestion,
                    reason: e.to_string(),
                    automatic: false,
                    timestamp: Utc::now(),
                });
                let err = match e {
                    Error::MitigationFailed { .. } => e,
                    other => Error::mitigation_failed(other.to_string()),
                };
                (Err(err), events)
            }
        }
    }

    fn request(
        &self,
        snapshot: StatsSnapshot,
        level: QualityLevel,
        suggestion: Suggestion,
        auto_degrade: bool,
        automatic: bool,
    ) -> MitigationRequest {
        MitigationRequest {
            snapshot,
            current_level: level,
            suggestion,
            options: MitigationOptions {
                auto_degrade,
                min_quality_floor: self.policy.min_quality_floor,
            },
            automatic,
        }
    }

    fn record_success(
        &self,
        state: &mut ControllerState,
        from_level: QualityLevel,
        suggestion: Suggestion,
        outcome: &MitigationOutcome,
        automatic: bool,
        events: &mut Vec<QualityEvent>,
    ) {
        let record = MitigationRecord {
            timestamp: Utc::now(),
            from_level,
            to_level: outcome.new_level,
            reason: outcome.reason.clone(),
            triggering_suggestion: suggestion,
            automatic,
        };
        info!(
            "Applied {} mitigation: {} ({} -> {})",
            if automatic { "automatic" } else { "manual" },
            record.reason,
            from_level,
            outcome.new_level
        );

        state.mitigations.push(record.clone());
        state.last_mitigation_at = Some(Instant::now());
        events.push(QualityEvent::MitigationApplied { record });

        if outcome.new_level != state.last_level {
            events.push(QualityEvent::QualityChanged {
                previous: state.last_level,
                level: outcome.new_level,
                snapshot: state.analysis.as_ref().and_then(|analysis| analysis.snapshot),
                timestamp: Utc::now(),
            });
            state.last_level = outcome.new_level;
        }

        if let Some(stream) = &outcome.stream {
            events.push(QualityEvent::StreamChanged {
                stream: stream.clone(),
                timestamp: Utc::now(),
            });
        }
    }
}
