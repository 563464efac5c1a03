//! Statistics collector
//!
//! Pulls a report from the host's [`StatsProvider`] and normalises the
//! recognised records into a [`StatsSnapshot`]. Unrecognised record types are
//! ignored, missing fields read as zero and nothing here ever returns an error
//! to the polling loop.

use std::time::Duration;

use tracing::{debug, warn};

use super::snapshot::StatsSnapshot;
use super::{StatsProvider, StatsRecord, StatsReport, CANDIDATE_PAIR, INBOUND_RTP, OUTBOUND_RTP};

/// Candidate pair state that identifies the active transport path
const SUCCEEDED: &str = "succeeded";

/// Polls a statistics provider and produces canonical snapshots
#[derive(Debug, Clone)]
pub struct StatsCollector {
    /// Upper bound on a single provider call
    timeout: Duration,
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new(Duration::from_millis(1500))
    }
}

impl StatsCollector {
    /// Create a collector that abandons provider calls after `timeout`
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Provider call timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Retrieve and normalise one snapshot
    ///
    /// Returns `None` when the provider fails or times out; the failure is
    /// logged and does not propagate.
    pub async fn collect(&self, provider: &dyn StatsProvider) -> Option<StatsSnapshot> {
        match tokio::time::timeout(self.timeout, provider.get_stats()).await {
            Ok(Ok(report)) => {
                debug!("Collected statistics report with {} records", report.len());
                Some(Self::parse_report(&report))
            }
            Ok(Err(e)) => {
                warn!("Failed to retrieve transport statistics: {}", e);
                None
            }
            Err(_) => {
                warn!(
                    "Transport statistics request timed out after {}ms",
                    self.timeout.as_millis()
                );
                None
            }
        }
    }

    /// Normalise a raw report into a snapshot
    pub fn parse_report(report: &StatsReport) -> StatsSnapshot {
        let mut snapshot = StatsSnapshot::default();
        let mut nominated_pair = false;

        for (_, record) in report.records() {
            match (record.record_type(), record.media_type()) {
                (Some(INBOUND_RTP), Some("video")) => {
                    let inbound = &mut snapshot.video.inbound;
                    inbound.packets_received += counter(record, "packetsReceived");
                    inbound.packets_lost += counter(record, "packetsLost");
                    inbound.frames_received += counter(record, "framesReceived");
                    inbound.frames_dropped += counter(record, "framesDropped");
                    inbound.jitter_ms = inbound.jitter_ms.max(seconds_to_ms(record, "jitter"));
                }
                (Some(INBOUND_RTP), Some("audio")) => {
                    let inbound = &mut snapshot.audio.inbound;
                    inbound.packets_received += counter(record, "packetsReceived");
                    inbound.packets_lost += counter(record, "packetsLost");
                    inbound.jitter_ms = inbound.jitter_ms.max(seconds_to_ms(record, "jitter"));
                }
                (Some(OUTBOUND_RTP), Some("video")) => {
                    let outbound = &mut snapshot.video.outbound;
                    outbound.packets_sent += counter(record, "packetsSent");
                    outbound.bytes_sent += counter(record, "bytesSent");
                }
                (Some(OUTBOUND_RTP), Some("audio")) => {
                    let outbound = &mut snapshot.audio.outbound;
                    outbound.packets_sent += counter(record, "packetsSent");
                    outbound.bytes_sent += counter(record, "bytesSent");
                }
                (Some(CANDIDATE_PAIR), _) if record.state() == Some(SUCCEEDED) => {
                    // A nominated pair wins over any other succeeded pair
                    if nominated_pair && !record.is_nominated() {
                        continue;
                    }
                    nominated_pair = record.is_nominated();

                    let connection = &mut snapshot.connection;
                    connection.round_trip_time_ms = seconds_to_ms(record, "currentRoundTripTime");
                    connection.outgoing_bitrate_bps = non_negative(record, "availableOutgoingBitrate");
                    connection.incoming_bitrate_bps = non_negative(record, "availableIncomingBitrate");
                }
                _ => {}
            }
        }

        snapshot
    }
}

fn counter(record: &StatsRecord, field: &str) -> u64 {
    non_negative(record, field).round() as u64
}

fn non_negative(record: &StatsRecord, field: &str) -> f64 {
    record.number(field).max(0.0)
}

fn seconds_to_ms(record: &StatsRecord, field: &str) -> f64 {
    non_negative(record, field) * 1000.0
}
