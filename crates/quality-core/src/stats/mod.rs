//! Transport statistics collection
//!
//! This module turns the heterogeneous report records exposed by a peer
//! connection into the canonical [`StatsSnapshot`] consumed by the scorer.
//!
//! # Data Flow
//!
//! ```text
//! ┌───────────────┐   get_stats()   ┌────────────────┐  parse_report()  ┌───────────────┐
//! │ StatsProvider │ ──────────────▶ │  StatsReport   │ ───────────────▶ │ StatsSnapshot │
//! │  (host peer)  │                 │ {id → record}  │                  │  (canonical)  │
//! └───────────────┘                 └────────────────┘                  └───────────────┘
//! ```
//!
//! Provider failures never escape the collector: they are logged and surface
//! as "no snapshot" for that cycle.

pub mod collector;
pub mod snapshot;

pub use collector::StatsCollector;
pub use snapshot::{
    AudioInboundStats, AudioStats, ConnectionStats, OutboundStats, SnapshotBuilder,
    StatsSnapshot, VideoInboundStats, VideoStats,
};

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Report record type for inbound RTP streams
pub const INBOUND_RTP: &str = "inbound-rtp";
/// Report record type for outbound RTP streams
pub const OUTBOUND_RTP: &str = "outbound-rtp";
/// Report record type for ICE candidate pairs
pub const CANDIDATE_PAIR: &str = "candidate-pair";

/// One heterogeneous statistics record as reported by the transport
///
/// Records are loosely typed: every record carries a `type`, most carry a
/// `mediaType` (or `kind`), and the remaining members depend on the type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatsRecord(Map<String, Value>);

impl StatsRecord {
    /// Create an empty record of the given type
    pub fn new(record_type: &str) -> Self {
        let mut fields = Map::new();
        fields.insert("type".to_string(), Value::from(record_type));
        Self(fields)
    }

    /// Create a typed record for a media kind (`audio` / `video`)
    pub fn media(record_type: &str, media_type: &str) -> Self {
        Self::new(record_type).with_field("mediaType", media_type)
    }

    /// Builder-style field setter
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    /// The record's `type` member
    pub fn record_type(&self) -> Option<&str> {
        self.0.get("type").and_then(Value::as_str)
    }

    /// The record's media type, accepting both `mediaType` and `kind`
    pub fn media_type(&self) -> Option<&str> {
        self.0
            .get("mediaType")
            .or_else(|| self.0.get("kind"))
            .and_then(Value::as_str)
    }

    /// The record's `state` member (candidate pairs)
    pub fn state(&self) -> Option<&str> {
        self.0.get("state").and_then(Value::as_str)
    }

    /// Whether the record is flagged as the nominated candidate pair
    pub fn is_nominated(&self) -> bool {
        self.0
            .get("nominated")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Lenient numeric accessor; anything absent or malformed reads as 0
    pub fn number(&self, field: &str) -> f64 {
        self.strict_number(field).unwrap_or(0.0)
    }

    /// Strict numeric accessor used where a caller wants to know why a value is missing
    pub fn strict_number(&self, field: &str) -> Result<f64> {
        let value = self
            .0
            .get(field)
            .ok_or_else(|| Error::invalid_field(field, "field is absent"))?;

        let number = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
        .ok_or_else(|| Error::invalid_field(field, format!("not a number: {}", value)))?;

        if number.is_finite() {
            Ok(number)
        } else {
            Err(Error::invalid_field(field, "value is not finite"))
        }
    }
}

/// Keyed collection of statistics records returned by one provider call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatsReport {
    records: HashMap<String, StatsRecord>,
}

impl StatsReport {
    /// Create an empty report
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record under its report id
    pub fn insert(&mut self, id: impl Into<String>, record: StatsRecord) {
        self.records.insert(id.into(), record);
    }

    /// Builder-style insert
    pub fn with_record(mut self, id: impl Into<String>, record: StatsRecord) -> Self {
        self.insert(id, record);
        self
    }

    /// Iterate over all records
    pub fn records(&self) -> impl Iterator<Item = (&String, &StatsRecord)> {
        self.records.iter()
    }

    /// Look up a record by id
    pub fn get(&self, id: &str) -> Option<&StatsRecord> {
        self.records.get(id)
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the report holds no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Decode a report from JSON
    ///
    /// Accepts either an object keyed by record id or an array of records,
    /// in which case each record's `id` member (or its index) becomes the key.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        match value {
            Value::Object(map) => {
                let mut report = Self::new();
                for (id, record) in map {
                    report.insert(id, Self::record_from_value(record)?);
                }
                Ok(report)
            }
            Value::Array(items) => {
                let mut report = Self::new();
                for (index, record) in items.into_iter().enumerate() {
                    let record = Self::record_from_value(record)?;
                    let id = record
                        .0
                        .get("id")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| index.to_string());
                    report.insert(id, record);
                }
                Ok(report)
            }
            other => Err(Error::Serialization(format!(
                "expected an object or array of records, got {}",
                other
            ))),
        }
    }

    /// Synthesise the raw report a transport would produce for `snapshot`
    ///
    /// Inverse of [`StatsCollector::parse_report`], used by simulators and
    /// scripted providers. Milliseconds are written back out as seconds.
    pub fn from_snapshot(snapshot: &StatsSnapshot) -> Self {
        let video = &snapshot.video;
        let audio = &snapshot.audio;
        let connection = &snapshot.connection;

        Self::new()
            .with_record(
                "inbound-video",
                StatsRecord::media(INBOUND_RTP, "video")
                    .with_field("packetsReceived", video.inbound.packets_received)
                    .with_field("packetsLost", video.inbound.packets_lost)
                    .with_field("framesReceived", video.inbound.frames_received)
                    .with_field("framesDropped", video.inbound.frames_dropped)
                    .with_field("jitter", video.inbound.jitter_ms / 1000.0),
            )
            .with_record(
                "inbound-audio",
                StatsRecord::media(INBOUND_RTP, "audio")
                    .with_field("packetsReceived", audio.inbound.packets_received)
                    .with_field("packetsLost", audio.inbound.packets_lost)
                    .with_field("jitter", audio.inbound.jitter_ms / 1000.0),
            )
            .with_record(
                "outbound-video",
                StatsRecord::media(OUTBOUND_RTP, "video")
                    .with_field("packetsSent", video.outbound.packets_sent)
                    .with_field("bytesSent", video.outbound.bytes_sent),
            )
            .with_record(
                "outbound-audio",
                StatsRecord::media(OUTBOUND_RTP, "audio")
                    .with_field("packetsSent", audio.outbound.packets_sent)
                    .with_field("bytesSent", audio.outbound.bytes_sent),
            )
            .with_record(
                "candidate-pair",
                StatsRecord::new(CANDIDATE_PAIR)
                    .with_field("state", "succeeded")
                    .with_field("nominated", true)
                    .with_field("currentRoundTripTime", connection.round_trip_time_ms / 1000.0)
                    .with_field("availableOutgoingBitrate", connection.outgoing_bitrate_bps)
                    .with_field("availableIncomingBitrate", connection.incoming_bitrate_bps),
            )
    }

    fn record_from_value(value: Value) -> Result<StatsRecord> {
        match value {
            Value::Object(fields) => Ok(StatsRecord(fields)),
            other => Err(Error::Serialization(format!(
                "statistics record must be an object, got {}",
                other
            ))),
        }
    }
}

impl FromIterator<(String, StatsRecord)> for StatsReport {
    fn from_iter<I: IntoIterator<Item = (String, StatsRecord)>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

/// Host-provided source of transport statistics
///
/// Implementations wrap the host's peer connection. The call may fail; the
/// collector contains the failure so it never reaches the controller loop.
#[async_trait]
pub trait StatsProvider: Send + Sync {
    /// Retrieve the current statistics report for the peer
    async fn get_stats(&self) -> Result<StatsReport>;
}
