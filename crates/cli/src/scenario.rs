//! Scenario files and the scripted statistics provider
//!
//! A scenario is a sequence of network phases. Each phase holds its
//! conditions for a number of polling cycles:
//!
//! ```toml
//! name = "wifi-drop"
//!
//! [[phases]]
//! label = "stable"
//! cycles = 5
//! rtt_ms = 40.0
//! outgoing_bitrate_bps = 2500000.0
//!
//! [[phases]]
//! label = "congested"
//! cycles = 8
//! video_loss_pct = 4.0
//! rtt_ms = 350.0
//! ```

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, bail};
use async_trait::async_trait;
use carelink_quality_core::{Error, StatsProvider, StatsReport, StatsSnapshot};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::debug;

fn default_cycles() -> u32 {
    1
}

/// Network conditions held for a number of cycles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default = "default_cycles")]
    pub cycles: u32,
    #[serde(default)]
    pub video_loss_pct: f64,
    #[serde(default)]
    pub audio_loss_pct: f64,
    #[serde(default)]
    pub frame_drop_pct: f64,
    #[serde(default)]
    pub rtt_ms: f64,
    #[serde(default)]
    pub video_jitter_ms: f64,
    #[serde(default)]
    pub audio_jitter_ms: f64,
    #[serde(default)]
    pub outgoing_bitrate_bps: f64,
    /// The provider fails for every cycle of this phase
    #[serde(default)]
    pub stats_unavailable: bool,
}

impl Phase {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot::builder()
            .video_loss_pct(self.video_loss_pct)
            .audio_loss_pct(self.audio_loss_pct)
            .frame_drop_pct(self.frame_drop_pct)
            .rtt_ms(self.rtt_ms)
            .video_jitter_ms(self.video_jitter_ms)
            .audio_jitter_ms(self.audio_jitter_ms)
            .outgoing_bitrate_bps(self.outgoing_bitrate_bps)
            .build()
    }
}

/// A scripted call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default = "Scenario::default_name")]
    pub name: String,
    #[serde(default)]
    pub session_id: Option<String>,
    pub phases: Vec<Phase>,
}

impl Scenario {
    fn default_name() -> String {
        "scenario".to_string()
    }

    /// Parse and check a scenario document
    pub fn parse(toml_text: &str) -> anyhow::Result<Self> {
        let scenario: Scenario = toml::from_str(toml_text).context("invalid scenario document")?;
        if scenario.phases.is_empty() {
            bail!("scenario '{}' has no phases", scenario.name);
        }
        if let Some(index) = scenario.phases.iter().position(|phase| phase.cycles == 0) {
            bail!("phase {} of scenario '{}' has zero cycles", index + 1, scenario.name);
        }
        Ok(scenario)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("in {}", path.display()))
    }

    pub fn total_cycles(&self) -> u32 {
        self.phases.iter().map(|phase| phase.cycles).sum()
    }
}

/// One scripted polling result
#[derive(Debug, Clone, Copy)]
enum Step {
    Report(StatsSnapshot),
    Unavailable,
}

/// Provider that replays a scenario one cycle per call
///
/// Once the script runs out the last step repeats.
pub struct ScriptedProvider {
    steps: Mutex<VecDeque<Step>>,
    last: Mutex<Step>,
    exhausted: Notify,
}

impl ScriptedProvider {
    pub fn new(scenario: &Scenario) -> Self {
        let steps: VecDeque<Step> = scenario
            .phases
            .iter()
            .flat_map(|phase| {
                let step = if phase.stats_unavailable {
                    Step::Unavailable
                } else {
                    Step::Report(phase.snapshot())
                };
                std::iter::repeat_n(step, phase.cycles as usize)
            })
            .collect();

        Self {
            steps: Mutex::new(steps),
            last: Mutex::new(Step::Unavailable),
            exhausted: Notify::new(),
        }
    }

    /// Steps not yet replayed
    pub fn remaining(&self) -> usize {
        self.steps.lock().map(|steps| steps.len()).unwrap_or(0)
    }

    /// Wait until every scripted step has been served
    pub async fn wait_exhausted(&self) {
        let notified = self.exhausted.notified();
        if self.remaining() == 0 {
            return;
        }
        notified.await;
    }

    fn next_step(&self) -> Step {
        let (next, now_empty) = match self.steps.lock() {
            Ok(mut steps) => {
                let next = steps.pop_front();
                (next, steps.is_empty())
            }
            Err(_) => (None, true),
        };

        let mut last = match self.last.lock() {
            Ok(last) => last,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(step) = next {
            *last = step;
            if now_empty {
                self.exhausted.notify_waiters();
            }
        }
        *last
    }
}

#[async_trait]
impl StatsProvider for ScriptedProvider {
    async fn get_stats(&self) -> carelink_quality_core::Result<StatsReport> {
        match self.next_step() {
            Step::Report(snapshot) => Ok(StatsReport::from_snapshot(&snapshot)),
            Step::Unavailable => {
                debug!("Scripted phase has no statistics");
                Err(Error::stats_unavailable("scripted outage"))
            }
        }
    }
}
