//! End-to-end controller scenarios driven by scripted statistics

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use carelink_quality_core::prelude::*;
use carelink_quality_core::{ReconnectKind, SuggestionPriority, SuggestionRule};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_test::{assert_err, assert_ok};

/// Provider whose next report the test controls
#[derive(Default)]
struct ScriptedProvider {
    current: Mutex<Option<StatsSnapshot>>,
}

impl ScriptedProvider {
    fn with(snapshot: StatsSnapshot) -> Arc<Self> {
        let provider = Arc::new(Self::default());
        provider.set(snapshot);
        provider
    }

    fn set(&self, snapshot: StatsSnapshot) {
        *self.current.lock().unwrap() = Some(snapshot);
    }

    fn fail(&self) {
        *self.current.lock().unwrap() = None;
    }
}

#[async_trait]
impl StatsProvider for ScriptedProvider {
    async fn get_stats(&self) -> Result<StatsReport> {
        match *self.current.lock().unwrap() {
            Some(snapshot) => Ok(StatsReport::from_snapshot(&snapshot)),
            None => Err(Error::stats_unavailable("peer connection closed")),
        }
    }
}

/// Provider that takes a while to answer
struct SlowProvider {
    delay: Duration,
    snapshot: StatsSnapshot,
}

#[async_trait]
impl StatsProvider for SlowProvider {
    async fn get_stats(&self) -> Result<StatsReport> {
        tokio::time::sleep(self.delay).await;
        Ok(StatsReport::from_snapshot(&self.snapshot))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ApplierMode {
    Apply,
    ApplyWithStreamSwap,
    Decline,
    Fail,
}

/// Applier that records every request
struct RecordingApplier {
    mode: Mutex<ApplierMode>,
    calls: AtomicUsize,
    requests: Mutex<Vec<MitigationRequest>>,
}

impl RecordingApplier {
    fn new(mode: ApplierMode) -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(mode),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn set_mode(&self, mode: ApplierMode) {
        *self.mode.lock().unwrap() = mode;
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn last_request(&self) -> Option<MitigationRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl MitigationApplier for RecordingApplier {
    async fn apply(&self, request: MitigationRequest) -> Result<MitigationOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        let mode = *self.mode.lock().unwrap();
        let new_level = request
            .suggestion
            .target_level
            .unwrap_or(request.options.min_quality_floor);

        match mode {
            ApplierMode::Apply | ApplierMode::ApplyWithStreamSwap => Ok(MitigationOutcome {
                applied: true,
                new_level,
                reason: format!("mitigated {}", request.suggestion.rule),
                suggestion: Some(request.suggestion.clone()),
                stream: (mode == ApplierMode::ApplyWithStreamSwap)
                    .then(|| MediaStreamInfo::audio_only("audio-only-1")),
            }),
            ApplierMode::Decline => Ok(MitigationOutcome::declined(
                request.current_level,
                "already at the floor",
            )),
            ApplierMode::Fail => Err(Error::mitigation_failed("encoder rejected parameters")),
        }
    }
}

struct Harness {
    controller: DegradationController,
    provider: Arc<ScriptedProvider>,
    applier: Arc<RecordingApplier>,
    events: UnboundedReceiver<QualityEvent>,
}

impl Harness {
    fn new(policy: ControllerPolicy, snapshot: StatsSnapshot, mode: ApplierMode) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let provider = ScriptedProvider::with(snapshot);
        let applier = RecordingApplier::new(mode);
        let (handler, events) = ChannelEventHandler::new();
        let controller = DegradationController::new(
            policy,
            provider.clone(),
            applier.clone(),
            Arc::new(handler),
        )
        .unwrap();

        Self {
            controller,
            provider,
            applier,
            events,
        }
    }

    async fn poll(&self, cycles: usize) -> Vec<CycleDecision> {
        let mut decisions = Vec::with_capacity(cycles);
        for _ in 0..cycles {
            decisions.push(self.controller.poll_once().await);
        }
        decisions
    }

    fn drain(&mut self) -> Vec<QualityEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

fn healthy() -> StatsSnapshot {
    StatsSnapshot::builder()
        .video_loss_pct(1.0)
        .audio_loss_pct(0.0)
        .rtt_ms(20.0)
        .outgoing_bitrate_bps(2_500_000.0)
        .build()
}

/// Scores 30: high latency plus 4% video loss
fn poor() -> StatsSnapshot {
    StatsSnapshot::builder()
        .rtt_ms(400.0)
        .video_loss_pct(4.0)
        .build()
}

/// Scores 0: 10% video loss alone
fn offline() -> StatsSnapshot {
    StatsSnapshot::builder().video_loss_pct(10.0).build()
}

fn count<F: Fn(&QualityEvent) -> bool>(events: &[QualityEvent], predicate: F) -> usize {
    events.iter().filter(|event| predicate(event)).count()
}

#[tokio::test(start_paused = true)]
async fn healthy_call_takes_no_action() {
    let mut harness = Harness::new(ControllerPolicy::default(), healthy(), ApplierMode::Apply);

    let decisions = harness.poll(5).await;
    assert!(decisions.iter().all(|d| *d == CycleDecision::NoAction));

    let analysis = harness.controller.current_analysis().await.unwrap();
    assert!(matches!(
        analysis.level,
        QualityLevel::Excellent | QualityLevel::Good
    ));
    assert!(
        analysis
            .suggestions
            .iter()
            .all(|s| s.priority < SuggestionPriority::High)
    );
    assert_eq!(analysis.consecutive_poor_count, 0);
    assert_eq!(harness.applier.calls(), 0);
    assert!(harness.controller.mitigation_history().await.is_empty());
    assert_eq!(harness.controller.quality_history().await.len(), 5);

    // Only the initial unknown -> measured transition is reported
    let events = harness.drain();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0],
        QualityEvent::QualityChanged {
            previous: QualityLevel::Unknown,
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn sustained_degradation_auto_applies_once() {
    let snapshot = StatsSnapshot::builder()
        .video_loss_pct(10.0)
        .frame_drop_pct(10.0)
        .rtt_ms(400.0)
        .build();
    let mut harness = Harness::new(ControllerPolicy::default(), snapshot, ApplierMode::Apply);

    let decisions = harness.poll(3).await;
    assert_eq!(
        decisions,
        vec![
            CycleDecision::SuggestManual,
            CycleDecision::NoAction,
            CycleDecision::AutoApplied,
        ]
    );
    assert_eq!(harness.applier.calls(), 1);

    let history = harness.controller.mitigation_history().await;
    assert_eq!(history.len(), 1);
    assert!(history[0].automatic);
    assert_eq!(history[0].triggering_suggestion.rule, SuggestionRule::HighLatency);

    let request = harness.applier.last_request().unwrap();
    assert!(request.automatic);
    assert!(request.options.auto_degrade);
    assert_eq!(request.options.min_quality_floor, QualityLevel::Fair);

    // The automatic mitigation supersedes the suggestion that was pending
    assert!(harness.controller.pending_suggestion().await.is_none());
    assert!(harness.controller.cooldown_remaining().await.is_some());

    let events = harness.drain();
    assert_eq!(
        count(&events, |e| matches!(e, QualityEvent::MitigationApplied { .. })),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn cooldown_blocks_repeat_auto_mitigation() {
    let mut harness = Harness::new(ControllerPolicy::default(), poor(), ApplierMode::Apply);

    let decisions = harness.poll(3).await;
    assert_eq!(decisions[2], CycleDecision::AutoApplied);

    // Fourteen more eligible cycles at the 2s cadence: 28s, still cooling down
    for _ in 0..14 {
        tokio::time::advance(Duration::from_secs(2)).await;
        let decision = harness.controller.poll_once().await;
        assert_ne!(decision, CycleDecision::AutoApplied);
    }
    assert_eq!(harness.applier.calls(), 1);

    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(harness.controller.cooldown_remaining().await, None);
    assert_eq!(harness.controller.poll_once().await, CycleDecision::AutoApplied);
    assert_eq!(harness.applier.calls(), 2);
    assert_eq!(harness.controller.mitigation_history().await.len(), 2);

    let events = harness.drain();
    assert_eq!(
        count(&events, |e| matches!(e, QualityEvent::MitigationApplied { .. })),
        2
    );
}

#[tokio::test(start_paused = true)]
async fn manual_mode_keeps_one_pending_suggestion() {
    let policy = ControllerPolicy::default().with_auto_mode(false);
    let mut harness = Harness::new(policy, poor(), ApplierMode::Apply);

    let decisions = harness.poll(6).await;
    assert_eq!(decisions[0], CycleDecision::SuggestManual);
    assert!(decisions[1..].iter().all(|d| *d == CycleDecision::NoAction));
    assert_eq!(harness.applier.calls(), 0);

    let pending = harness.controller.pending_suggestion().await.unwrap();
    assert_eq!(pending.rule, SuggestionRule::HighLatency);

    let events = harness.drain();
    assert_eq!(
        count(&events, |e| matches!(e, QualityEvent::SuggestionPending { .. })),
        1
    );

    // Approval applies the same suggestion without auto degradation
    let outcome = assert_ok!(harness.controller.approve_pending().await);
    assert!(outcome.applied);
    let request = harness.applier.last_request().unwrap();
    assert!(!request.automatic);
    assert!(!request.options.auto_degrade);
    assert_eq!(request.suggestion, pending);

    let history = harness.controller.mitigation_history().await;
    assert_eq!(history.len(), 1);
    assert!(!history[0].automatic);
    assert!(harness.controller.pending_suggestion().await.is_none());

    // The next degraded cycle can surface a fresh suggestion
    assert_eq!(harness.controller.poll_once().await, CycleDecision::SuggestManual);
}

#[tokio::test(start_paused = true)]
async fn rejecting_a_suggestion_has_no_side_effects() {
    let policy = ControllerPolicy::default().with_auto_mode(false);
    let harness = Harness::new(policy, poor(), ApplierMode::Apply);

    harness.poll(1).await;
    let rejected = harness.controller.reject_pending().await.unwrap();
    assert_eq!(rejected.rule, SuggestionRule::HighLatency);
    assert!(harness.controller.pending_suggestion().await.is_none());
    assert_eq!(harness.applier.calls(), 0);
    assert!(harness.controller.cooldown_remaining().await.is_none());

    // Same kind of suggestion is offered again
    assert_eq!(harness.controller.poll_once().await, CycleDecision::SuggestManual);
    assert!(harness.controller.reject_pending().await.is_some());
    assert!(harness.controller.reject_pending().await.is_none());

    assert!(matches!(
        harness.controller.approve_pending().await,
        Err(Error::NoPendingSuggestion)
    ));
}

#[tokio::test(start_paused = true)]
async fn offline_episode_escalates_exactly_once() {
    let policy = ControllerPolicy::default().with_auto_mode(false);
    let mut harness = Harness::new(policy, offline(), ApplierMode::Decline);

    assert!(harness.controller.start().await);
    tokio::time::sleep(Duration::from_millis(10_500)).await;
    harness.controller.stop().await;

    let events = harness.drain();
    let reconnects: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            QualityEvent::ReconnectNeeded {
                strategy,
                consecutive_readings,
                ..
            } => Some((*strategy, *consecutive_readings)),
            _ => None,
        })
        .collect();

    assert_eq!(reconnects.len(), 1);
    let (strategy, readings) = reconnects[0];
    assert_eq!(readings, 5);
    assert_eq!(strategy.kind, ReconnectKind::IceRestart);
    assert!(strategy.should_retry);
    assert_eq!(strategy.delay_ms, 1_000);
}

#[tokio::test(start_paused = true)]
async fn escalation_rearms_after_recovery() {
    let harness = Harness::new(ControllerPolicy::default(), offline(), ApplierMode::Decline);

    let decisions = harness.poll(8).await;
    assert_eq!(
        decisions
            .iter()
            .filter(|d| **d == CycleDecision::Escalated)
            .count(),
        1
    );
    assert_eq!(decisions[4], CycleDecision::Escalated);

    harness.provider.set(healthy());
    harness.poll(1).await;
    let analysis = harness.controller.current_analysis().await.unwrap();
    assert_eq!(analysis.consecutive_poor_count, 0);

    harness.provider.set(offline());
    let decisions = harness.poll(5).await;
    assert_eq!(decisions[4], CycleDecision::Escalated);
}

#[tokio::test(start_paused = true)]
async fn flapping_between_poor_and_offline_is_one_episode() {
    let mut harness = Harness::new(ControllerPolicy::default(), offline(), ApplierMode::Decline);

    let mut decisions = Vec::new();
    for cycle in 0..12 {
        harness
            .provider
            .set(if cycle % 2 == 0 { offline() } else { poor() });
        decisions.push(harness.controller.poll_once().await);
    }

    assert_eq!(
        decisions
            .iter()
            .filter(|d| **d == CycleDecision::Escalated)
            .count(),
        1
    );
    assert_eq!(decisions[4], CycleDecision::Escalated);
    assert_eq!(
        harness.controller.current_analysis().await.unwrap().consecutive_poor_count,
        12
    );

    let events = harness.drain();
    assert_eq!(
        count(&events, |e| matches!(e, QualityEvent::ReconnectNeeded { .. })),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn failed_mitigation_leaves_state_untouched() {
    let mut harness = Harness::new(ControllerPolicy::default(), poor(), ApplierMode::Fail);

    let decisions = harness.poll(3).await;
    assert_eq!(decisions[2], CycleDecision::MitigationFailed);
    assert!(harness.controller.mitigation_history().await.is_empty());
    assert!(harness.controller.cooldown_remaining().await.is_none());

    let events = harness.drain();
    let failure = events
        .iter()
        .find_map(|event| match event {
            QualityEvent::MitigationFailed {
                reason, automatic, ..
            } => Some((reason.clone(), *automatic)),
            _ => None,
        })
        .unwrap();
    assert!(failure.0.contains("encoder rejected parameters"));
    assert!(failure.1);

    // No cooldown was started, so the next eligible cycle retries
    harness.applier.set_mode(ApplierMode::Apply);
    assert_eq!(harness.controller.poll_once().await, CycleDecision::AutoApplied);
}

#[tokio::test(start_paused = true)]
async fn failed_manual_approval_reports_error() {
    let policy = ControllerPolicy::default().with_auto_mode(false);
    let mut harness = Harness::new(policy, poor(), ApplierMode::Fail);

    harness.poll(1).await;
    let err = assert_err!(harness.controller.approve_pending().await);
    assert!(matches!(err, Error::MitigationFailed { .. }));
    assert!(harness.controller.pending_suggestion().await.is_none());
    assert!(harness.controller.mitigation_history().await.is_empty());

    let events = harness.drain();
    assert_eq!(
        count(&events, |e| matches!(
            e,
            QualityEvent::MitigationFailed {
                automatic: false,
                ..
            }
        )),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn declined_auto_mitigation_starts_no_cooldown() {
    let harness = Harness::new(ControllerPolicy::default(), poor(), ApplierMode::Decline);

    let decisions = harness.poll(4).await;
    assert_eq!(decisions[2], CycleDecision::AutoDeclined);
    assert_eq!(decisions[3], CycleDecision::AutoDeclined);
    assert!(harness.controller.mitigation_history().await.is_empty());
    assert!(harness.controller.cooldown_remaining().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn stream_swap_is_reported() {
    let mut harness = Harness::new(
        ControllerPolicy::default(),
        poor(),
        ApplierMode::ApplyWithStreamSwap,
    );

    harness.poll(3).await;
    let events = harness.drain();

    let stream = events
        .iter()
        .find_map(|event| match event {
            QualityEvent::StreamChanged { stream, .. } => Some(stream.clone()),
            _ => None,
        })
        .unwrap();
    assert!(!stream.video_enabled);

    // Poor -> fair after the mitigation
    assert!(events.iter().any(|event| matches!(
        event,
        QualityEvent::QualityChanged {
            previous: QualityLevel::Poor,
            level: QualityLevel::Fair,
            ..
        }
    )));

    // The measurement is still poor, which is no change from the last cycle
    harness.poll(1).await;
    let events = harness.drain();
    assert_eq!(
        count(&events, |e| matches!(e, QualityEvent::QualityChanged { .. })),
        0
    );

    // A measured recovery is reported against the mitigated level
    harness.provider.set(healthy());
    harness.poll(1).await;
    let events = harness.drain();
    assert!(events.iter().any(|event| matches!(
        event,
        QualityEvent::QualityChanged {
            previous: QualityLevel::Fair,
            level,
            ..
        } if !level.is_degraded()
    )));
}

#[tokio::test(start_paused = true)]
async fn unavailable_stats_hold_level_at_unknown() {
    let mut harness = Harness::new(ControllerPolicy::default(), poor(), ApplierMode::Decline);

    harness.poll(2).await;
    harness.provider.fail();
    assert_eq!(harness.controller.poll_once().await, CycleDecision::StatsUnavailable);
    assert_eq!(harness.controller.poll_once().await, CycleDecision::StatsUnavailable);

    let analysis = harness.controller.current_analysis().await.unwrap();
    assert_eq!(analysis.level, QualityLevel::Unknown);
    assert_eq!(analysis.score, None);
    assert!(analysis.suggestions.is_empty());
    assert_eq!(analysis.consecutive_poor_count, 0);

    // Unknown breaks the degraded run
    harness.provider.set(poor());
    harness.poll(1).await;
    let analysis = harness.controller.current_analysis().await.unwrap();
    assert_eq!(analysis.consecutive_poor_count, 1);

    let events = harness.drain();
    assert_eq!(
        count(&events, |e| matches!(
            e,
            QualityEvent::QualityChanged {
                level: QualityLevel::Unknown,
                ..
            }
        )),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn start_and_stop_are_idempotent() {
    let harness = Harness::new(ControllerPolicy::default(), healthy(), ApplierMode::Apply);

    harness.controller.stop().await;
    assert!(!harness.controller.is_monitoring());

    assert!(harness.controller.start().await);
    assert!(!harness.controller.start().await);
    assert!(harness.controller.is_monitoring());

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(harness.controller.current_analysis().await.is_some());

    harness.controller.stop().await;
    harness.controller.stop().await;
    assert!(!harness.controller.is_monitoring());
    assert!(harness.controller.current_analysis().await.is_none());
    assert!(harness.controller.quality_history().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn no_mitigation_after_stop() {
    let harness = Harness::new(ControllerPolicy::default(), poor(), ApplierMode::Apply);

    harness.controller.start().await;
    harness.controller.stop().await;
    let calls = harness.applier.calls();

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(harness.applier.calls(), calls);

    // Cycles run by hand after stop still never reach the applier
    let decisions = harness.poll(4).await;
    assert!(!decisions.contains(&CycleDecision::AutoApplied));
    assert_eq!(harness.applier.calls(), calls);
}

#[tokio::test(start_paused = true)]
async fn start_during_stop_waits_for_teardown() {
    let provider = Arc::new(SlowProvider {
        delay: Duration::from_secs(1),
        snapshot: poor(),
    });
    let applier = RecordingApplier::new(ApplierMode::Apply);
    let (handler, _events) = ChannelEventHandler::new();
    let controller = DegradationController::new(
        ControllerPolicy::default(),
        provider,
        applier.clone(),
        Arc::new(handler),
    )
    .unwrap();

    assert!(controller.start().await);
    // First cycle is now waiting on the provider
    tokio::time::sleep(Duration::from_millis(10)).await;

    let stopping = tokio::spawn({
        let controller = controller.clone();
        async move { controller.stop().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(controller.start().await);
    stopping.await.unwrap();

    assert!(controller.is_monitoring());
    assert!(!controller.start().await);

    controller.stop().await;
    assert!(!controller.is_monitoring());
    assert!(controller.start().await);
    controller.stop().await;
    assert_eq!(applier.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn approval_during_stop_is_refused() {
    let provider = Arc::new(SlowProvider {
        delay: Duration::from_secs(1),
        snapshot: poor(),
    });
    let applier = RecordingApplier::new(ApplierMode::Apply);
    let (handler, _events) = ChannelEventHandler::new();
    let policy = ControllerPolicy::default().with_auto_mode(false);
    let controller =
        DegradationController::new(policy, provider, applier.clone(), Arc::new(handler)).unwrap();

    assert_eq!(controller.poll_once().await, CycleDecision::SuggestManual);
    assert!(controller.start().await);
    tokio::time::sleep(Duration::from_millis(10)).await;

    let stopping = tokio::spawn({
        let controller = controller.clone();
        async move { controller.stop().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let err = assert_err!(controller.approve_pending().await);
    assert!(matches!(err, Error::MitigationFailed { .. }));
    stopping.await.unwrap();
    assert_eq!(applier.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn auto_mode_toggle_takes_effect_next_cycle() {
    let policy = ControllerPolicy::default().with_auto_mode(false);
    let harness = Harness::new(policy, poor(), ApplierMode::Apply);

    harness.poll(4).await;
    assert_eq!(harness.applier.calls(), 0);

    harness.controller.set_auto_mode(true);
    assert!(harness.controller.auto_mode());
    assert_eq!(harness.controller.poll_once().await, CycleDecision::AutoApplied);
}

#[test]
fn invalid_policy_is_rejected() {
    let provider = ScriptedProvider::with(healthy());
    let applier = RecordingApplier::new(ApplierMode::Apply);
    let (handler, _events) = ChannelEventHandler::new();

    let result = DegradationController::new(
        ControllerPolicy::default().with_poll_interval_ms(0),
        provider,
        applier,
        Arc::new(handler),
    );
    assert!(matches!(result, Err(Error::InvalidPolicy { .. })));
}
