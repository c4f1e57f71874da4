//! End-to-end analysis orchestration
//!
//! One invocation processes one capture: every stage runs to completion
//! before the next begins, a cancellation token is checked between
//! stages, and all intermediate buffers die with the invocation. The
//! track store is the only shared resource and is passed in explicitly;
//! its failures degrade the output (unnamed corners) instead of failing
//! the analysis.

use apexcoach_core::error::AnalysisError;
use apexcoach_core::model::{
    CoachingPayload, CornerDelta, CornerSegment, LapSummary, LapTimeEntry, NamedSegment,
    NormalizedLap, PriorityCorner,
};
use apexcoach_telemetry::compare::{
    compare_laps, consistency, diagnose, theoretical_best, ConsistencyThresholds,
};
use apexcoach_telemetry::corners::{detect_corners, DetectionParams, DetectionPreset};
use apexcoach_telemetry::ibt::{split_laps, IbtCapture};
use apexcoach_telemetry::normalize::normalize_session;
use apexcoach_track::models::TrackType;
use apexcoach_track::{match_segments, LandmarkSeeder, TrackStore};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct AnalyzerOptions {
    /// Detection preset override. When unset the preset follows the
    /// stored track type, defaulting to road for unknown tracks.
    pub preset: Option<DetectionPreset>,
    /// Landmarks dataset snapshot used for lazy corner-name seeding.
    pub landmarks_path: Option<PathBuf>,
    pub thresholds: ConsistencyThresholds,
    /// Laps slower than `session minimum × ratio` count as disrupted.
    /// A pace filter keeps laps with minor single incidents; filtering
    /// on incident count threw those away.
    pub pace_filter_ratio: f64,
    /// Corners losing less than this never rank as priorities.
    pub priority_noise_floor_s: f64,
    pub max_priority_corners: usize,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        AnalyzerOptions {
            preset: None,
            landmarks_path: None,
            thresholds: ConsistencyThresholds::default(),
            pace_filter_ratio: 1.10,
            priority_noise_floor_s: 0.05,
            max_priority_corners: 3,
        }
    }
}

pub struct Analyzer {
    opts: AnalyzerOptions,
}

impl Analyzer {
    pub fn new(opts: AnalyzerOptions) -> Self {
        Analyzer { opts }
    }

    /// Analyse a capture file on disk.
    pub fn analyse(
        &self,
        capture_path: &Path,
        store: Option<&TrackStore>,
        cancel: &CancellationToken,
    ) -> Result<CoachingPayload, AnalysisError> {
        let bytes = std::fs::read(capture_path).map_err(|e| {
            AnalysisError::malformed(format!("cannot read {}: {e}", capture_path.display()))
        })?;
        self.analyse_bytes(bytes, store, cancel)
    }

    /// Analyse a capture already held in memory.
    pub fn analyse_bytes(
        &self,
        bytes: Vec<u8>,
        store: Option<&TrackStore>,
        cancel: &CancellationToken,
    ) -> Result<CoachingPayload, AnalysisError> {
        let capture = IbtCapture::parse(bytes)?;
        let session = capture.session.clone();
        let track_length_m = session.track_length_m;
        if track_length_m <= 0.0 {
            return Err(AnalysisError::malformed(
                "capture metadata carries no track length",
            ));
        }
        info!(
            track = %session.track_name,
            track_id = %session.track_id,
            car = %session.car_name,
            samples = capture.sample_count(),
            "decoded capture"
        );
        check(cancel)?;

        let channels = capture.core_channels()?;
        let raw_laps = split_laps(&channels.lap);
        debug!(laps = raw_laps.len(), "split sample stream");

        let (normalized, rejections) = normalize_session(&channels, &raw_laps, track_length_m);
        for (lap_number, reason) in &rejections {
            debug!(lap_number, reason = reason.tag(), "lap rejected");
        }
        check(cancel)?;

        let survivors = self.pace_filter(normalized);
        if survivors.len() < 2 {
            return Err(AnalysisError::NoUsableLap);
        }

        let mut by_time: Vec<&NormalizedLap> = survivors.iter().collect();
        by_time.sort_by(|a, b| {
            a.lap_time_s
                .total_cmp(&b.lap_time_s)
                .then(a.lap_number.cmp(&b.lap_number))
        });
        let reference = by_time[0];
        let mut candidate = by_time[by_time.len() / 2];
        if candidate.lap_number == reference.lap_number {
            candidate = by_time[by_time.len() - 1];
        }
        info!(
            reference = reference.lap_number,
            reference_time = reference.lap_time_s,
            candidate = candidate.lap_number,
            candidate_time = candidate.lap_time_s,
            survivors = by_time.len(),
            "selected laps"
        );

        let preset = self.resolve_preset(store, &session.track_id);
        let segments = detect_corners(reference, &DetectionParams::for_preset(preset));
        info!(preset = preset.as_str(), corners = segments.len(), "segmented reference lap");
        check(cancel)?;

        let names = self.corner_names(store, &session.track_id, &segments);

        // Per-corner comparison, cancellable between corners.
        let mut corner_deltas: Vec<CornerDelta> = Vec::with_capacity(segments.len());
        let total_time_delta_s = compare_laps(candidate, reference, &[]).total_time_delta_s;
        for seg in &segments {
            check(cancel)?;
            let mut cmp = compare_laps(candidate, reference, std::slice::from_ref(seg));
            let mut delta = cmp
                .corner_deltas
                .pop()
                .ok_or_else(|| AnalysisError::internal("comparator returned no corner delta"))?;
            delta.corner_name = names.get(&seg.number).cloned();
            corner_deltas.push(delta);
        }

        let theoretical = theoretical_best(&survivors, &segments);
        let mut consistency_findings =
            consistency(&survivors, reference, &segments, &self.opts.thresholds);
        for finding in &mut consistency_findings {
            finding.corner_name = names.get(&finding.corner_number).cloned();
        }

        let priority_corners =
            self.rank_priorities(&corner_deltas, candidate, reference, &segments);

        let mut lap_times: Vec<LapTimeEntry> = by_time
            .iter()
            .map(|l| LapTimeEntry {
                lap_number: l.lap_number,
                lap_time_s: l.lap_time_s,
            })
            .collect();
        lap_times.sort_by_key(|e| e.lap_number);

        let named_segments = segments
            .iter()
            .map(|seg| NamedSegment {
                segment: seg.clone(),
                name: names.get(&seg.number).cloned(),
            })
            .collect();

        Ok(CoachingPayload {
            reference_lap: LapSummary {
                lap_number: reference.lap_number,
                lap_time_s: reference.lap_time_s,
            },
            candidate_lap: LapSummary {
                lap_number: candidate.lap_number,
                lap_time_s: candidate.lap_time_s,
            },
            session,
            total_time_delta_s,
            theoretical_best: theoretical,
            priority_corners,
            consistency: consistency_findings,
            segments: named_segments,
            lap_times,
        })
    }

    /// Drop disrupted laps: anything slower than the session minimum by
    /// the configured ratio.
    fn pace_filter(&self, laps: Vec<NormalizedLap>) -> Vec<NormalizedLap> {
        let timed: Vec<NormalizedLap> =
            laps.into_iter().filter(|l| l.lap_time_s > 0.0).collect();
        let Some(fastest) = timed
            .iter()
            .map(|l| l.lap_time_s)
            .min_by(|a, b| a.total_cmp(b))
        else {
            return timed;
        };
        let threshold = fastest * self.opts.pace_filter_ratio;
        timed
            .into_iter()
            .filter(|l| {
                let keep = l.lap_time_s <= threshold;
                if !keep {
                    debug!(
                        lap_number = l.lap_number,
                        lap_time = l.lap_time_s,
                        threshold,
                        "lap dropped by pace filter"
                    );
                }
                keep
            })
            .collect()
    }

    fn resolve_preset(&self, store: Option<&TrackStore>, track_id: &str) -> DetectionPreset {
        if let Some(preset) = self.opts.preset {
            return preset;
        }
        let stored = store.and_then(|s| match s.get_track(track_id) {
            Ok(track) => track,
            Err(e) => {
                warn!(track_id, error = %e, "track lookup failed, using road preset");
                None
            }
        });
        match stored.map(|t| t.track_type) {
            Some(TrackType::Street) => DetectionPreset::Street,
            Some(TrackType::Oval) => DetectionPreset::Oval,
            _ => DetectionPreset::Road,
        }
    }

    /// Resolve display names for detected segments. Store trouble never
    /// fails the analysis; it only leaves segments unnamed. Seeding
    /// runs lazily the first time an unseeded track is analysed.
    fn corner_names(
        &self,
        store: Option<&TrackStore>,
        track_id: &str,
        segments: &[CornerSegment],
    ) -> HashMap<u32, String> {
        let mut names = HashMap::new();
        let Some(store) = store else {
            return names;
        };
        if track_id.is_empty() || segments.is_empty() {
            return names;
        }

        match store.has_named_corners(track_id) {
            Ok(false) => {
                if let Some(path) = &self.opts.landmarks_path {
                    match LandmarkSeeder::load_snapshot(path)
                        .and_then(|snap| LandmarkSeeder::new(store).seed_track_by_id(&snap, track_id))
                    {
                        Ok(seeded) => {
                            debug!(track_id, seeded, "lazy landmark seeding");
                        }
                        Err(e) => {
                            // Recorded, never fatal: analysis proceeds
                            // with whatever names exist.
                            warn!(track_id, error = %e, tag = e.tag(), "landmark seeding failed");
                        }
                    }
                }
            }
            Ok(true) => {}
            Err(e) => {
                warn!(track_id, error = %e, "track store unreadable, corners stay unnamed");
                return names;
            }
        }

        let records = match store.list_corners(track_id) {
            Ok(records) => records,
            Err(e) => {
                warn!(track_id, error = %e, "corner listing failed, corners stay unnamed");
                return names;
            }
        };

        for (seg, record) in segments.iter().zip(match_segments(&records, segments)) {
            if let Some(name) = record.and_then(|r| r.name.clone()) {
                names.insert(seg.number, name);
            }
        }
        info!(
            track_id,
            named = names.len(),
            detected = segments.len(),
            "matched corner names"
        );
        names
    }

    fn rank_priorities(
        &self,
        deltas: &[CornerDelta],
        candidate: &NormalizedLap,
        reference: &NormalizedLap,
        segments: &[CornerSegment],
    ) -> Vec<PriorityCorner> {
        let mut ranked: Vec<(f64, &CornerDelta, &CornerSegment)> = deltas
            .iter()
            .zip(segments)
            .filter_map(|(d, seg)| {
                let t = d.time_delta_s?;
                (t.abs() >= self.opts.priority_noise_floor_s).then_some((t, d, seg))
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.0.abs()
                .total_cmp(&a.0.abs())
                .then(a.1.corner_number.cmp(&b.1.corner_number))
        });

        ranked
            .into_iter()
            .take(self.opts.max_priority_corners)
            .map(|(t, delta, seg)| PriorityCorner {
                corner_name: delta.corner_name.clone(),
                corner_number: delta.corner_number,
                time_lost_s: t,
                diagnosis: diagnose(delta, candidate, reference, seg),
                delta: delta.clone(),
            })
            .collect()
    }
}

fn check(cancel: &CancellationToken) -> Result<(), AnalysisError> {
    if cancel.is_cancelled() {
        Err(AnalysisError::Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pace_filter_keeps_minor_offenders() {
        let analyzer = Analyzer::new(AnalyzerOptions::default());
        let mk = |n: i32, t: f64| NormalizedLap {
            lap_number: n,
            lap_time_s: t,
            track_length_m: 10.0,
            speed: vec![1.0; 11],
            throttle: vec![1.0; 11],
            brake: vec![0.0; 11],
            steering: vec![0.0; 11],
            rpm: vec![0.0; 11],
            lat: vec![0.0; 11],
            lon: vec![0.0; 11],
            session_time: (0..11).map(|i| i as f64).collect(),
            gear: vec![3; 11],
            track_surface: vec![3; 11],
            on_pit_road: vec![false; 11],
        };
        // 100.0 is the floor; 109 is within 10%, 111 is out.
        let kept = analyzer.pace_filter(vec![mk(1, 100.0), mk(2, 109.0), mk(3, 111.0)]);
        let numbers: Vec<i32> = kept.iter().map(|l| l.lap_number).collect();
        assert_eq!(numbers, vec![1, 2]);
    }

    #[test]
    fn test_preset_defaults_to_road_without_store() {
        let analyzer = Analyzer::new(AnalyzerOptions::default());
        assert_eq!(analyzer.resolve_preset(None, "219"), DetectionPreset::Road);
    }

    #[test]
    fn test_preset_override_wins() {
        let analyzer = Analyzer::new(AnalyzerOptions {
            preset: Some(DetectionPreset::Oval),
            ..AnalyzerOptions::default()
        });
        assert_eq!(analyzer.resolve_preset(None, "219"), DetectionPreset::Oval);
    }
}
