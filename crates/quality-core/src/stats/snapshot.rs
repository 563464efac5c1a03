//! Canonical statistics snapshot
//!
//! A [`StatsSnapshot`] is produced once per polling cycle and never mutated
//! afterwards. Every counter defaults to zero when the transport did not
//! report it.

use serde::{Deserialize, Serialize};

/// Inbound video counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoInboundStats {
    pub packets_received: u64,
    pub packets_lost: u64,
    pub frames_received: u64,
    pub frames_dropped: u64,
    /// Interarrival jitter in milliseconds
    pub jitter_ms: f64,
}

/// Inbound audio counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioInboundStats {
    pub packets_received: u64,
    pub packets_lost: u64,
    /// Interarrival jitter in milliseconds
    pub jitter_ms: f64,
}

/// Outbound counters (shared shape for audio and video)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundStats {
    pub packets_sent: u64,
    pub bytes_sent: u64,
}

/// Video direction pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoStats {
    pub inbound: VideoInboundStats,
    pub outbound: OutboundStats,
}

/// Audio direction pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioStats {
    pub inbound: AudioInboundStats,
    pub outbound: OutboundStats,
}

/// Selected candidate-pair measurements
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStats {
    pub round_trip_time_ms: f64,
    pub outgoing_bitrate_bps: f64,
    pub incoming_bitrate_bps: f64,
}

/// Canonical per-cycle view of the media transport
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub video: VideoStats,
    pub audio: AudioStats,
    pub connection: ConnectionStats,
}

impl StatsSnapshot {
    /// Start building a synthetic snapshot
    pub fn builder() -> SnapshotBuilder {
        SnapshotBuilder::default()
    }

    /// Video packet loss as a percentage of expected packets
    pub fn video_loss_pct(&self) -> f64 {
        loss_pct(self.video.inbound.packets_received, self.video.inbound.packets_lost)
    }

    /// Audio packet loss as a percentage of expected packets
    pub fn audio_loss_pct(&self) -> f64 {
        loss_pct(self.audio.inbound.packets_received, self.audio.inbound.packets_lost)
    }

    /// Dropped frames as a percentage of received frames
    pub fn frame_drop_pct(&self) -> f64 {
        let inbound = &self.video.inbound;
        if inbound.frames_received == 0 {
            return 0.0;
        }
        inbound.frames_dropped as f64 * 100.0 / inbound.frames_received as f64
    }
}

fn loss_pct(received: u64, lost: u64) -> f64 {
    let expected = received.saturating_add(lost);
    if expected == 0 {
        return 0.0;
    }
    lost as f64 * 100.0 / expected as f64
}

/// Base used when converting percentages into counters
const SYNTHETIC_PACKETS: u64 = 10_000;

/// Builder for synthetic snapshots expressed in percentages
///
/// Used by the simulator and tests; real snapshots come from
/// [`StatsCollector`](super::StatsCollector).
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotBuilder {
    snapshot: StatsSnapshot,
}

impl SnapshotBuilder {
    /// Video packet loss percentage (0-100)
    pub fn video_loss_pct(mut self, pct: f64) -> Self {
        let (received, lost) = split_packets(pct);
        self.snapshot.video.inbound.packets_received = received;
        self.snapshot.video.inbound.packets_lost = lost;
        self
    }

    /// Audio packet loss percentage (0-100)
    pub fn audio_loss_pct(mut self, pct: f64) -> Self {
        let (received, lost) = split_packets(pct);
        self.snapshot.audio.inbound.packets_received = received;
        self.snapshot.audio.inbound.packets_lost = lost;
        self
    }

    /// Dropped frames as a percentage of received frames
    pub fn frame_drop_pct(mut self, pct: f64) -> Self {
        let dropped = (pct.max(0.0) / 100.0 * SYNTHETIC_PACKETS as f64).round() as u64;
        self.snapshot.video.inbound.frames_received = SYNTHETIC_PACKETS;
        self.snapshot.video.inbound.frames_dropped = dropped;
        self
    }

    /// Round-trip time in milliseconds
    pub fn rtt_ms(mut self, rtt_ms: f64) -> Self {
        self.snapshot.connection.round_trip_time_ms = rtt_ms.max(0.0);
        self
    }

    /// Video jitter in milliseconds
    pub fn video_jitter_ms(mut self, jitter_ms: f64) -> Self {
        self.snapshot.video.inbound.jitter_ms = jitter_ms.max(0.0);
        self
    }

    /// Audio jitter in milliseconds
    pub fn audio_jitter_ms(mut self, jitter_ms: f64) -> Self {
        self.snapshot.audio.inbound.jitter_ms = jitter_ms.max(0.0);
        self
    }

    /// Available outgoing bitrate in bits per second
    pub fn outgoing_bitrate_bps(mut self, bps: f64) -> Self {
        self.snapshot.connection.outgoing_bitrate_bps = bps.max(0.0);
        self
    }

    /// Available incoming bitrate in bits per second
    pub fn incoming_bitrate_bps(mut self, bps: f64) -> Self {
        self.snapshot.connection.incoming_bitrate_bps = bps.max(0.0);
        self
    }

    /// Finish the snapshot
    pub fn build(self) -> StatsSnapshot {
        self.snapshot
    }
}

fn split_packets(pct: f64) -> (u64, u64) {
    let pct = pct.clamp(0.0, 100.0);
    let lost = (pct / 100.0 * SYNTHETIC_PACKETS as f64).round() as u64;
    (SYNTHETIC_PACKETS - lost, lost)
}
