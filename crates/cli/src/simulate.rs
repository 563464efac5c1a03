//! Scenario runner

use std::collections::BTreeMap;
use std::sync::Arc;

use carelink_quality_core::{
    ChannelEventHandler, ControllerPolicy, CycleDecision, DegradationController, MitigationRecord,
    QualityAnalysis, QualityEvent, QualityLevel, SessionId,
};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::applier::SimulatedApplier;
use crate::scenario::{Scenario, ScriptedProvider};

/// How a simulation is driven
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Approve every pending suggestion as soon as it appears
    pub approve: bool,
    /// Use the controller's own polling task on the wall clock
    pub realtime: bool,
    /// Suppress per-event output
    pub quiet: bool,
}

/// Outcome of a simulation run
#[derive(Debug, Serialize)]
pub struct SimulationSummary {
    pub scenario: String,
    pub session_id: String,
    pub cycles: u32,
    /// Per-decision counts; empty for realtime runs
    pub decisions: BTreeMap<String, u32>,
    pub final_analysis: Option<QualityAnalysis>,
    pub mitigations: Vec<MitigationRecord>,
    pub reconnect_requests: u32,
    pub approvals: u32,
    pub final_stream_tier: QualityLevel,
}

#[derive(Debug, Default)]
struct EventTally {
    reconnects: u32,
    approvals: u32,
}

/// Run a scenario against a fresh controller
pub async fn run(
    scenario: &Scenario,
    policy: ControllerPolicy,
    options: RunOptions,
) -> anyhow::Result<SimulationSummary> {
    let session_id = scenario
        .session_id
        .clone()
        .map(SessionId::from)
        .unwrap_or_else(SessionId::generate);

    let provider = Arc::new(ScriptedProvider::new(scenario));
    let applier = Arc::new(SimulatedApplier::new());
    let (handler, events) = ChannelEventHandler::new();

    let controller = DegradationController::for_session(
        session_id.clone(),
        policy,
        provider.clone(),
        applier.clone(),
        Arc::new(handler),
    )?;

    let (done, done_rx) = oneshot::channel();
    let printer = spawn_event_printer(
        events,
        done_rx,
        controller.clone(),
        options.approve && options.realtime,
        options.quiet,
    );

    let mut decisions = BTreeMap::new();
    let mut inline_approvals = 0;

    if options.realtime {
        info!(
            "Running {} cycles in real time every {}ms",
            scenario.total_cycles(),
            controller.policy().poll_interval_ms
        );
        controller.start().await;
        provider.wait_exhausted().await;
    } else {
        tokio::time::pause();
        let interval = controller.policy().poll_interval();

        for cycle in 0..scenario.total_cycles() {
            if cycle > 0 {
                tokio::time::advance(interval).await;
            }
            let decision = controller.poll_once().await;
            *decisions.entry(decision_name(decision)).or_insert(0) += 1;

            if options.approve && controller.pending_suggestion().await.is_some() {
                match controller.approve_pending().await {
                    Ok(outcome) if outcome.applied => inline_approvals += 1,
                    Ok(outcome) => info!("Approved suggestion declined: {}", outcome.reason),
                    Err(e) => warn!("Approval failed: {}", e),
                }
            }
        }
    }

    // Waits for any in-flight cycle, since the cycle holds the state lock
    let final_analysis = controller.current_analysis().await;
    let mitigations = controller.mitigation_history().await;
    controller.stop().await;

    // The controller outlives the run, so the event channel never closes
    let _ = done.send(());
    let tally = match printer.await {
        Ok(tally) => tally,
        Err(e) => {
            warn!("Event printer ended abnormally: {}", e);
            EventTally::default()
        }
    };

    Ok(SimulationSummary {
        scenario: scenario.name.clone(),
        session_id: session_id.to_string(),
        cycles: scenario.total_cycles(),
        decisions,
        final_analysis,
        mitigations,
        reconnect_requests: tally.reconnects,
        approvals: inline_approvals + tally.approvals,
        final_stream_tier: applier.tier(),
    })
}

fn decision_name(decision: CycleDecision) -> String {
    serde_json::to_value(decision)
        .ok()
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("{:?}", decision))
}

fn spawn_event_printer(
    mut events: UnboundedReceiver<QualityEvent>,
    mut done: oneshot::Receiver<()>,
    controller: DegradationController,
    approve: bool,
    quiet: bool,
) -> JoinHandle<EventTally> {
    tokio::spawn(async move {
        let mut tally = EventTally::default();
        // Only the approving printer needs the controller
        let controller = approve.then_some(controller);

        loop {
            tokio::select! {
                biased;
                event = events.recv() => match event {
                    Some(event) => handle_event(&event, controller.as_ref(), quiet, &mut tally).await,
                    None => break,
                },
                _ = &mut done => {
                    // Everything sent before the run finished is already queued
                    while let Ok(event) = events.try_recv() {
                        handle_event(&event, None, quiet, &mut tally).await;
                    }
                    break;
                }
            }
        }
        tally
    })
}

async fn handle_event(
    event: &QualityEvent,
    approver: Option<&DegradationController>,
    quiet: bool,
    tally: &mut EventTally,
) {
    if !quiet {
        println!("{}", describe(event));
    }
    match event {
        QualityEvent::ReconnectNeeded { .. } => tally.reconnects += 1,
        QualityEvent::SuggestionPending { .. } => {
            if let Some(controller) = approver {
                match controller.approve_pending().await {
                    Ok(outcome) if outcome.applied => tally.approvals += 1,
                    Ok(outcome) => info!("Approved suggestion declined: {}", outcome.reason),
                    Err(e) => warn!("Approval failed: {}", e),
                }
            }
        }
        _ => {}
    }
}

/// One-line human description of an event
pub fn describe(event: &QualityEvent) -> String {
    let time = event.timestamp().format("%H:%M:%S%.3f");
    let detail = match event {
        QualityEvent::QualityChanged {
            previous, level, ..
        } => format!("{} -> {}", previous, level),
        QualityEvent::StreamChanged { stream, .. } => format!(
            "{} (video: {}, cap: {})",
            stream.stream_id,
            stream.video_enabled,
            stream
                .max_video_bitrate_bps
                .map(|bps| format!("{} kbps", bps / 1000))
                .unwrap_or_else(|| "none".to_string())
        ),
        QualityEvent::ReconnectNeeded {
            strategy,
            consecutive_readings,
            ..
        } => format!(
            "{:?} in {}ms after {} offline readings",
            strategy.kind, strategy.delay_ms, consecutive_readings
        ),
        QualityEvent::MitigationApplied { record } => format!(
            "{} ({} -> {}, {})",
            record.reason,
            record.from_level,
            record.to_level,
            if record.automatic { "automatic" } else { "approved" }
        ),
        QualityEvent::MitigationFailed {
            suggestion, reason, ..
        } => format!("{}: {}", suggestion.rule, reason),
        QualityEvent::SuggestionPending { suggestion, .. } => {
            format!("[{:?}] {}: {}", suggestion.priority, suggestion.title, suggestion.message)
        }
    };
    format!("{} {:<18} {}", time, event.name(), detail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use carelink_quality_core::ReconnectStrategy;
    use chrono::Utc;

    const DEGRADING: &str = r#"
        name = "congestion"
        session_id = "visit-9"

        [[phases]]
        cycles = 3
        rtt_ms = 40.0
        outgoing_bitrate_bps = 2500000.0

        [[phases]]
        cycles = 4
        rtt_ms = 400.0
        video_loss_pct = 4.0
    "#;

    const OUTAGE: &str = r#"
        [[phases]]
        cycles = 2
        rtt_ms = 40.0

        [[phases]]
        cycles = 8
        video_loss_pct = 15.0
    "#;

    fn quiet() -> RunOptions {
        RunOptions {
            quiet: true,
            ..RunOptions::default()
        }
    }

    #[tokio::test]
    async fn test_auto_mode_applies_one_mitigation() {
        let scenario = Scenario::parse(DEGRADING).unwrap();
        let summary = run(&scenario, ControllerPolicy::default(), quiet())
            .await
            .unwrap();

        assert_eq!(summary.session_id, "visit-9");
        assert_eq!(summary.cycles, 7);
        assert_eq!(summary.mitigations.len(), 1);
        assert!(summary.mitigations[0].automatic);
        assert_eq!(summary.decisions.get("auto_applied"), Some(&1));
        assert_eq!(summary.final_stream_tier, QualityLevel::Good);
        assert_eq!(summary.reconnect_requests, 0);
        assert_eq!(
            summary.final_analysis.map(|analysis| analysis.level),
            Some(QualityLevel::Poor)
        );
    }

    #[tokio::test]
    async fn test_manual_approval_flow() {
        let scenario = Scenario::parse(DEGRADING).unwrap();
        let policy = ControllerPolicy::default().with_auto_mode(false);
        let options = RunOptions {
            approve: true,
            ..quiet()
        };

        let summary = run(&scenario, policy, options).await.unwrap();
        assert!(summary.approvals >= 1);
        assert!(summary.mitigations.iter().all(|record| !record.automatic));
        assert_eq!(summary.decisions.get("auto_applied"), None);
    }

    #[tokio::test]
    async fn test_outage_requests_one_reconnect() {
        let scenario = Scenario::parse(OUTAGE).unwrap();
        let summary = run(&scenario, ControllerPolicy::default(), quiet())
            .await
            .unwrap();

        assert_eq!(summary.reconnect_requests, 1);
        assert_eq!(summary.decisions.get("escalated"), Some(&1));
    }

    #[tokio::test]
    async fn test_demo_scenario_with_demo_policy() {
        let demos = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../demos");
        let scenario = Scenario::load(&demos.join("wifi-drop.toml")).unwrap();
        let policy: ControllerPolicy = carelink_infra_common::load_settings(
            Some(&demos.join("policy.toml")),
            "CARELINK_TEST_DEMO_POLICY",
        )
        .unwrap();
        assert_eq!(policy.min_quality_floor, QualityLevel::Poor);

        let summary = run(&scenario, policy, quiet()).await.unwrap();
        assert_eq!(summary.cycles, 25);
        assert_eq!(summary.reconnect_requests, 1);
        assert_eq!(summary.decisions.get("stats_unavailable"), Some(&2));
        assert!(!summary.mitigations.is_empty());
        assert_eq!(
            summary.final_analysis.map(|analysis| analysis.level),
            Some(QualityLevel::Excellent)
        );
    }

    #[test]
    fn test_describe_reconnect() {
        let event = QualityEvent::ReconnectNeeded {
            strategy: ReconnectStrategy::derive(QualityLevel::Offline, 12),
            consecutive_readings: 12,
            timestamp: Utc::now(),
        };
        let line = describe(&event);
        assert!(line.contains("reconnect_needed"));
        assert!(line.contains("FullReconnect in 3000ms after 12 offline readings"));
    }
}
