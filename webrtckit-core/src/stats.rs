//! Connection statistics parsing and quality scoring.

use serde::Serialize;
use std::collections::HashMap;

/// One flattened entry of an engine stats report.
///
/// `kind` is the W3C stats type (`candidate-pair`, `inbound-rtp`, ...),
/// `values` holds every numeric member keyed by its camelCase name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawStatsEntry {
    pub id: String,
    pub kind: String,
    pub values: HashMap<String, f64>,
}

impl RawStatsEntry {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            values: HashMap::new(),
        }
    }

    pub fn with_value(mut self, key: impl Into<String>, value: f64) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    /// Stats type with separators removed, so `inbound-rtp`, `InboundRTP`
    /// and `inbound_rtp` compare equal.
    fn normalized_kind(&self) -> String {
        self.kind
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum QualityState {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl QualityState {
    pub fn from_score(score: u32) -> Self {
        match score {
            85.. => Self::Excellent,
            70..=84 => Self::Good,
            50..=69 => Self::Fair,
            _ => Self::Poor,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Excellent => "Excellent",
            Self::Good => "Good",
            Self::Fair => "Fair",
            Self::Poor => "Poor",
        }
    }

    /// Material palette color used by the call overlay.
    pub fn color(&self) -> &'static str {
        match self {
            Self::Excellent => "#4CAF50",
            Self::Good => "#8BC34A",
            Self::Fair => "#FF9800",
            Self::Poor => "#F44336",
        }
    }
}

/// A digested snapshot of one stats poll.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RtcStatsReport {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub rtt_ms: f64,
    /// Inbound packet loss, in percent.
    pub packet_loss: f64,
    pub bitrate_bps: f64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub frames_decoded: u64,
    pub frames_encoded: u64,
    pub frame_width: u32,
    pub frame_height: u32,
    pub quality_score: u32,
    pub quality_state: QualityState,
}

/// Byte counters remembered between polls to derive the bitrate.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BitrateSample {
    pub timestamp: i64,
    pub total_bytes: u64,
}

#[derive(Debug, Default)]
struct Totals {
    rtt_ms: f64,
    packets_lost: f64,
    packets_received: f64,
    bytes_received: f64,
    bytes_sent: f64,
    frames_decoded: f64,
    frames_encoded: f64,
    frame_width: f64,
    frame_height: f64,
}

/// Turns raw stats into a [`RtcStatsReport`].
///
/// `previous` is the sample from the last poll; the bitrate is 0 without one.
/// Returns the report together with the sample to feed into the next call.
pub fn parse_report(
    entries: &[RawStatsEntry],
    timestamp: i64,
    previous: Option<BitrateSample>,
) -> (RtcStatsReport, BitrateSample) {
    let mut totals = Totals::default();

    for entry in entries {
        match entry.normalized_kind().as_str() {
            "candidatepair" => {
                // Only the active pair carries a round trip time.
                if let Some(rtt) = entry.get("currentRoundTripTime").filter(|v| *v > 0.0) {
                    totals.rtt_ms = rtt * 1000.0;
                }
            }
            "inboundrtp" => {
                totals.packets_lost += entry.get("packetsLost").unwrap_or(0.0).max(0.0);
                totals.packets_received += entry.get("packetsReceived").unwrap_or(0.0);
                totals.bytes_received += entry.get("bytesReceived").unwrap_or(0.0);
                totals.frames_decoded += entry.get("framesDecoded").unwrap_or(0.0);
                merge_frame_size(&mut totals, entry);
            }
            "outboundrtp" => {
                totals.bytes_sent += entry.get("bytesSent").unwrap_or(0.0);
                totals.frames_encoded += entry.get("framesEncoded").unwrap_or(0.0);
            }
            "track" | "mediasource" => merge_frame_size(&mut totals, entry),
            _ => {}
        }
    }

    let packet_total = totals.packets_lost + totals.packets_received;
    let packet_loss = if packet_total > 0.0 {
        totals.packets_lost / packet_total * 100.0
    } else {
        0.0
    };

    let total_bytes = (totals.bytes_received + totals.bytes_sent) as u64;
    let sample = BitrateSample {
        timestamp,
        total_bytes,
    };
    let bitrate_bps = previous.map_or(0.0, |prev| bitrate_between(prev, sample));

    let quality_score = quality_score(totals.rtt_ms, packet_loss, bitrate_bps);
    let report = RtcStatsReport {
        timestamp,
        rtt_ms: totals.rtt_ms,
        packet_loss,
        bitrate_bps,
        bytes_received: totals.bytes_received as u64,
        bytes_sent: totals.bytes_sent as u64,
        frames_decoded: totals.frames_decoded as u64,
        frames_encoded: totals.frames_encoded as u64,
        frame_width: totals.frame_width as u32,
        frame_height: totals.frame_height as u32,
        quality_score,
        quality_state: QualityState::from_score(quality_score),
    };
    (report, sample)
}

fn merge_frame_size(totals: &mut Totals, entry: &RawStatsEntry) {
    if let Some(w) = entry.get("frameWidth").filter(|w| *w > totals.frame_width) {
        totals.frame_width = w;
        totals.frame_height = entry.get("frameHeight").unwrap_or(totals.frame_height);
    }
}

/// Bits per second between two samples. Counter resets yield 0.
pub fn bitrate_between(previous: BitrateSample, current: BitrateSample) -> f64 {
    let elapsed_ms = current.timestamp - previous.timestamp;
    if elapsed_ms <= 0 || current.total_bytes < previous.total_bytes {
        return 0.0;
    }
    let delta_bytes = (current.total_bytes - previous.total_bytes) as f64;
    delta_bytes * 8.0 / (elapsed_ms as f64 / 1000.0)
}

/// Scores a connection from 0 to 100.
pub fn quality_score(rtt_ms: f64, packet_loss: f64, bitrate_bps: f64) -> u32 {
    let rtt_penalty = if rtt_ms < 50.0 {
        0
    } else if rtt_ms < 100.0 {
        10
    } else if rtt_ms < 200.0 {
        30
    } else {
        50
    };

    let loss_penalty = if packet_loss < 1.0 {
        0
    } else if packet_loss < 3.0 {
        10
    } else if packet_loss < 5.0 {
        20
    } else {
        40
    };

    let bitrate_penalty = if bitrate_bps > 1_000_000.0 {
        0
    } else if bitrate_bps > 500_000.0 {
        5
    } else if bitrate_bps > 250_000.0 {
        15
    } else {
        25
    };

    100u32.saturating_sub(rtt_penalty + loss_penalty + bitrate_penalty)
}
