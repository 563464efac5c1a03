//! Simulated media pipeline
//!
//! Stands in for the host's encoder and media stream: every applied
//! mitigation steps the outgoing stream down one tier, never below the
//! policy floor. The lowest tier is audio-only.

use std::sync::Mutex;

use async_trait::async_trait;
use carelink_quality_core::{
    MediaStreamInfo, MitigationApplier, MitigationOutcome, MitigationRequest, QualityLevel,
};
use tracing::info;

/// Outgoing video bitrate cap per tier
fn video_bitrate_cap(level: QualityLevel) -> Option<u64> {
    match level {
        QualityLevel::Excellent => Some(2_500_000),
        QualityLevel::Good => Some(1_200_000),
        QualityLevel::Fair => Some(500_000),
        _ => None,
    }
}

fn one_step_down(level: QualityLevel) -> Option<QualityLevel> {
    match level {
        QualityLevel::Excellent => Some(QualityLevel::Good),
        QualityLevel::Good => Some(QualityLevel::Fair),
        QualityLevel::Fair => Some(QualityLevel::Poor),
        _ => None,
    }
}

#[derive(Debug)]
struct StreamState {
    tier: QualityLevel,
    generation: u32,
}

/// Applier that degrades a simulated stream one tier at a time
#[derive(Debug)]
pub struct SimulatedApplier {
    stream: Mutex<StreamState>,
}

impl Default for SimulatedApplier {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedApplier {
    pub fn new() -> Self {
        Self {
            stream: Mutex::new(StreamState {
                tier: QualityLevel::Excellent,
                generation: 0,
            }),
        }
    }

    /// Tier the simulated stream currently runs at
    pub fn tier(&self) -> QualityLevel {
        match self.stream.lock() {
            Ok(stream) => stream.tier,
            Err(poisoned) => poisoned.into_inner().tier,
        }
    }
}

#[async_trait]
impl MitigationApplier for SimulatedApplier {
    async fn apply(&self, request: MitigationRequest) -> carelink_quality_core::Result<MitigationOutcome> {
        let mut stream = match self.stream.lock() {
            Ok(stream) => stream,
            Err(poisoned) => poisoned.into_inner(),
        };

        let floor = request.options.min_quality_floor;
        let next = match one_step_down(stream.tier) {
            Some(next) if !next.is_worse_than(floor) => next,
            _ => {
                return Ok(MitigationOutcome::declined(
                    stream.tier,
                    format!("stream already at the {} floor", floor),
                ));
            }
        };

        stream.tier = next;
        stream.generation += 1;
        let stream_id = format!("sim-stream-{}", stream.generation);

        let info = match video_bitrate_cap(next) {
            Some(cap) => MediaStreamInfo {
                stream_id,
                audio_enabled: true,
                video_enabled: true,
                max_video_bitrate_bps: Some(cap),
            },
            None => MediaStreamInfo::audio_only(stream_id),
        };

        let reason = if info.video_enabled {
            format!("capped video at {} kbps", info.max_video_bitrate_bps.unwrap_or(0) / 1000)
        } else {
            "switched to audio only".to_string()
        };
        info!("Simulated pipeline: {} for {}", reason, request.suggestion.rule);

        Ok(MitigationOutcome {
            applied: true,
            new_level: next,
            reason,
            suggestion: Some(request.suggestion),
            stream: Some(info),
        })
    }
}
