//! Shared analysis data model
//!
//! Defines the types that flow between pipeline stages and the
//! `CoachingPayload` handed to external collaborators. Payload field
//! names and units are contractual; floats serialize with 4 decimal
//! places to keep the JSON output compact and deterministic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Round f64 to 4 decimal places for compact JSON serialization
pub(crate) fn round4<S: serde::Serializer>(val: &f64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64((*val * 10000.0).round() / 10000.0)
}

fn round4_opt<S: serde::Serializer>(val: &Option<f64>, s: S) -> Result<S::Ok, S::Error> {
    match val {
        Some(v) => round4(v, s),
        None => s.serialize_none(),
    }
}

// ============================================================================
// Session metadata
// ============================================================================

/// Session-level metadata decoded from the capture's metadata document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionMeta {
    pub track_id: String,
    pub track_name: String,
    pub track_config: Option<String>,
    /// Track length in metres, converted from the document's km field.
    pub track_length_m: f64,
    pub car_id: String,
    pub car_name: String,
    pub driver_id: String,
    pub driver_name: String,
    pub session_type: Option<String>,
    /// Sample frequency of the capture in Hz (the header tick rate).
    pub sample_rate_hz: u32,
    pub started_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Laps
// ============================================================================

/// Why the normaliser refused a lap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LapRejection {
    InsufficientCoverage,
    DistanceJump,
    TooShort,
    PitLap,
}

impl LapRejection {
    pub fn tag(&self) -> &'static str {
        match self {
            LapRejection::InsufficientCoverage => "insufficient_coverage",
            LapRejection::DistanceJump => "distance_jump",
            LapRejection::TooShort => "too_short",
            LapRejection::PitLap => "pit_lap",
        }
    }
}

/// A lap resampled onto a uniform 1-metre distance grid.
///
/// The grid index IS the distance: element `i` of every channel holds the
/// value at `i` metres from the start line, from 0 to ⌊track_length⌋
/// inclusive. `session_time` is strictly increasing across the lap.
#[derive(Debug, Clone)]
pub struct NormalizedLap {
    pub lap_number: i32,
    /// Official lap time: the final `LapCurrentLapTime` sample of the
    /// source lap, not its maximum (the lap-index channel flips before
    /// the lap clock resets, so the maximum reads the previous lap).
    pub lap_time_s: f64,
    pub track_length_m: f64,
    pub speed: Vec<f64>,
    pub throttle: Vec<f64>,
    pub brake: Vec<f64>,
    pub steering: Vec<f64>,
    pub rpm: Vec<f64>,
    pub lat: Vec<f64>,
    pub lon: Vec<f64>,
    pub session_time: Vec<f64>,
    pub gear: Vec<i32>,
    pub track_surface: Vec<i32>,
    pub on_pit_road: Vec<bool>,
}

impl NormalizedLap {
    pub fn len(&self) -> usize {
        self.speed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.speed.is_empty()
    }

    /// Elapsed time from lap start at grid index `i`.
    pub fn elapsed_at(&self, i: usize) -> f64 {
        self.session_time[i.min(self.session_time.len() - 1)] - self.session_time[0]
    }
}

// ============================================================================
// Corner segments
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CornerType {
    Hairpin,
    Sweeper,
    Chicane,
    Kink,
    HeavyBraking,
    Unknown,
}

/// A corner detected on a normalised lap.
///
/// Distances are grid indices (integer metres). Invariant:
/// `entry_m < apex_m < exit_m`, and segments of one lap never overlap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CornerSegment {
    /// 1-based sequential index in order of occurrence. Not a canonical
    /// track turn number.
    pub number: u32,
    pub entry_m: usize,
    pub apex_m: usize,
    pub exit_m: usize,
    /// Smoothed speed at the apex, m/s.
    #[serde(serialize_with = "round4")]
    pub apex_speed_mps: f64,
    pub corner_type: CornerType,
}

impl CornerSegment {
    pub fn span_m(&self) -> usize {
        self.exit_m - self.entry_m
    }
}

/// A detected segment paired with its matched track-database name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedSegment {
    #[serde(flatten)]
    pub segment: CornerSegment,
    pub name: Option<String>,
}

// ============================================================================
// Comparison output
// ============================================================================

/// Per-corner comparison of a candidate lap against the reference lap.
/// Positive `time_delta_s` means the candidate is slower.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CornerDelta {
    pub corner_name: Option<String>,
    pub corner_number: u32,
    pub entry_m: usize,
    pub apex_m: usize,
    pub exit_m: usize,
    /// Candidate braking point minus reference braking point, metres.
    /// Positive = candidate brakes later.
    #[serde(serialize_with = "round4")]
    pub braking_point_delta_m: f64,
    /// Candidate minimum (smoothed) corner speed minus reference, m/s.
    #[serde(serialize_with = "round4")]
    pub min_speed_delta: f64,
    /// Candidate throttle pickup point minus reference, metres.
    #[serde(serialize_with = "round4")]
    pub throttle_application_delta_m: f64,
    /// Elapsed-time difference through the corner. `None` when either
    /// lap shows a negative interval (incident reconstruction).
    #[serde(serialize_with = "round4_opt")]
    pub time_delta_s: Option<f64>,
    #[serde(serialize_with = "round4")]
    pub entry_speed_delta: f64,
    #[serde(serialize_with = "round4")]
    pub exit_speed_delta: f64,
    /// Apex position as a percentage of the lap, for plotting.
    #[serde(serialize_with = "round4")]
    pub lap_position_percent: f64,
}

/// What the corner delta pattern says about the driving mistake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosisTag {
    LateBrakeOverSlow,
    EarlyLift,
    TightLine,
    EarlyThrottleLossOfDrive,
    Other,
}

/// A corner ranked by coaching priority (most time available).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorityCorner {
    pub corner_name: Option<String>,
    pub corner_number: u32,
    #[serde(serialize_with = "round4")]
    pub time_lost_s: f64,
    pub diagnosis: DiagnosisTag,
    pub delta: CornerDelta,
}

/// Best-lap attribution for one corner of the theoretical best.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CornerBest {
    pub corner_number: u32,
    pub lap_number: i32,
    #[serde(serialize_with = "round4")]
    pub time_s: f64,
}

/// Sum of the best corner times across a lap set plus the actual best
/// lap's straight times. Always ≤ the fastest realised lap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TheoreticalBest {
    #[serde(serialize_with = "round4")]
    pub actual_best_time_s: f64,
    #[serde(serialize_with = "round4")]
    pub theoretical_time_s: f64,
    #[serde(serialize_with = "round4")]
    pub gap_s: f64,
    pub corner_attribution: Vec<CornerBest>,
}

/// Per-corner spread of traversal times across the surviving laps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencyFinding {
    pub corner_number: u32,
    pub corner_name: Option<String>,
    #[serde(serialize_with = "round4")]
    pub mean_time_s: f64,
    #[serde(serialize_with = "round4")]
    pub std_dev_s: f64,
    #[serde(serialize_with = "round4")]
    pub best_time_s: f64,
    #[serde(serialize_with = "round4")]
    pub worst_time_s: f64,
    /// High lap-to-lap spread through this corner.
    pub consistency_issue: bool,
    /// Repeatably slower than the reference with low spread.
    pub technique_issue: bool,
}

// ============================================================================
// Coaching payload
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LapSummary {
    pub lap_number: i32,
    #[serde(serialize_with = "round4")]
    pub lap_time_s: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LapTimeEntry {
    pub lap_number: i32,
    #[serde(serialize_with = "round4")]
    pub lap_time_s: f64,
}

/// The single structured output of an analysis invocation.
///
/// This is the contract consumed by the UI, the report renderer and the
/// coaching-prose generator. Field names and units are stable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoachingPayload {
    pub session: SessionMeta,
    pub reference_lap: LapSummary,
    pub candidate_lap: LapSummary,
    /// Cumulative session-time difference over the whole distance grid,
    /// consistent with the per-corner deltas (not official-lap-time
    /// subtraction).
    #[serde(serialize_with = "round4")]
    pub total_time_delta_s: f64,
    pub theoretical_best: TheoreticalBest,
    pub priority_corners: Vec<PriorityCorner>,
    pub consistency: Vec<ConsistencyFinding>,
    /// The reference lap's segmentation with matched names, for
    /// downstream plotting.
    pub segments: Vec<NamedSegment>,
    pub lap_times: Vec<LapTimeEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_tags() {
        assert_eq!(LapRejection::PitLap.tag(), "pit_lap");
        assert_eq!(
            LapRejection::InsufficientCoverage.tag(),
            "insufficient_coverage"
        );
        assert_eq!(
            serde_json::to_string(&LapRejection::DistanceJump).unwrap(),
            "\"distance_jump\""
        );
    }

    #[test]
    fn test_corner_type_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&CornerType::HeavyBraking).unwrap(),
            "\"heavy_braking\""
        );
        assert_eq!(
            serde_json::to_string(&DiagnosisTag::LateBrakeOverSlow).unwrap(),
            "\"late_brake_over_slow\""
        );
    }

    #[test]
    fn test_round4_in_payload_floats() {
        let seg = CornerSegment {
            number: 1,
            entry_m: 100,
            apex_m: 150,
            exit_m: 210,
            apex_speed_mps: 21.123456,
            corner_type: CornerType::Unknown,
        };
        let json = serde_json::to_string(&seg).unwrap();
        assert!(json.contains("21.1235"), "{json}");
    }

    #[test]
    fn test_elapsed_at() {
        let lap = NormalizedLap {
            lap_number: 3,
            lap_time_s: 2.0,
            track_length_m: 2.0,
            speed: vec![10.0; 3],
            throttle: vec![1.0; 3],
            brake: vec![0.0; 3],
            steering: vec![0.0; 3],
            rpm: vec![0.0; 3],
            lat: vec![0.0; 3],
            lon: vec![0.0; 3],
            session_time: vec![100.0, 100.1, 100.2],
            gear: vec![4; 3],
            track_surface: vec![3; 3],
            on_pit_road: vec![false; 3],
        };
        assert!((lap.elapsed_at(2) - 0.2).abs() < 1e-9);
        assert_eq!(lap.len(), 3);
    }
}
