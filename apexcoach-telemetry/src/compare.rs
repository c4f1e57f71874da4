//! Lap-to-lap comparison
//!
//! Computes per-corner deltas between a candidate lap and the reference
//! lap sharing the reference's segmentation, the theoretical best over
//! a lap set, per-corner consistency statistics, and the diagnosis tag
//! used for priority ranking.

use crate::corners::smooth_speed;
use apexcoach_core::model::{
    ConsistencyFinding, CornerBest, CornerDelta, CornerSegment, DiagnosisTag, NormalizedLap,
    TheoreticalBest,
};

/// Brake pressure that counts as the braking point when comparing laps.
const BRAKE_ONSET: f64 = 0.1;
/// Throttle fraction that counts as full application after the apex.
const THROTTLE_ONSET: f64 = 0.9;
/// The entry marker already *is* the braking point, so the search for
/// the candidate's braking point starts well before it; comparing at
/// the entry would trivially read zero.
const BRAKE_SEARCH_BACK_M: usize = 200;
/// Where exit drive is probed for the loss-of-drive diagnosis.
const EXIT_PROBE_M: usize = 100;

// Diagnosis thresholds
const LATE_BRAKE_M: f64 = 5.0;
const LATE_BRAKE_MIN_SPEED: f64 = -2.0;
const EARLY_LIFT_PEAK_BRAKE: f64 = 0.3;
const TIGHT_LINE_MIN_SPEED: f64 = -3.0;
const EARLY_THROTTLE_M: f64 = -10.0;

/// Tunable consistency/technique thresholds with stable defaults.
#[derive(Debug, Clone, Copy)]
pub struct ConsistencyThresholds {
    /// Std-dev of per-lap corner times above which a corner is flagged
    /// as a consistency issue.
    pub std_dev_s: f64,
    /// Mean delta vs the reference above which a low-spread corner is a
    /// technique issue.
    pub mean_delta_s: f64,
}

impl Default for ConsistencyThresholds {
    fn default() -> Self {
        ConsistencyThresholds {
            std_dev_s: 0.15,
            mean_delta_s: 0.20,
        }
    }
}

/// Full pairwise comparison of two laps on the same grid.
#[derive(Debug, Clone)]
pub struct LapComparison {
    pub corner_deltas: Vec<CornerDelta>,
    /// Cumulative session-time difference over the whole grid; positive
    /// means the candidate is slower. Derived from the time axis, not
    /// from official lap-time subtraction, so it stays consistent with
    /// the per-corner deltas.
    pub total_time_delta_s: f64,
}

/// Compare a candidate lap against the reference through the
/// reference's segmentation.
pub fn compare_laps(
    candidate: &NormalizedLap,
    reference: &NormalizedLap,
    segments: &[CornerSegment],
) -> LapComparison {
    let cand_smooth = smooth_speed(&candidate.speed, 21, 3);
    let ref_smooth = smooth_speed(&reference.speed, 21, 3);

    let corner_deltas = segments
        .iter()
        .map(|seg| corner_delta(candidate, &cand_smooth, reference, &ref_smooth, seg))
        .collect();

    let last = candidate.len().min(reference.len()) - 1;
    let total_time_delta_s = candidate.elapsed_at(last) - reference.elapsed_at(last);

    LapComparison {
        corner_deltas,
        total_time_delta_s,
    }
}

fn corner_delta(
    candidate: &NormalizedLap,
    cand_smooth: &[f64],
    reference: &NormalizedLap,
    ref_smooth: &[f64],
    seg: &CornerSegment,
) -> CornerDelta {
    let entry = seg.entry_m;
    let apex = seg.apex_m;
    let exit = seg.exit_m.min(candidate.len() - 1).min(reference.len() - 1);

    let cand_brake = brake_onset_m(candidate, entry, apex);
    let ref_brake = brake_onset_m(reference, entry, apex);

    let cand_throttle = throttle_onset_m(candidate, apex, exit);
    let ref_throttle = throttle_onset_m(reference, apex, exit);

    let cand_min = min_in(cand_smooth, entry, exit);
    let ref_min = min_in(ref_smooth, entry, exit);

    let cand_interval = candidate.session_time[exit] - candidate.session_time[entry];
    let ref_interval = reference.session_time[exit] - reference.session_time[entry];
    // Incident laps can reconstruct with non-monotonic elapsed time;
    // report nothing rather than a nonsense positive number.
    let time_delta_s = if cand_interval < 0.0 || ref_interval < 0.0 {
        None
    } else {
        Some(cand_interval - ref_interval)
    };

    CornerDelta {
        corner_name: None,
        corner_number: seg.number,
        entry_m: seg.entry_m,
        apex_m: seg.apex_m,
        exit_m: seg.exit_m,
        braking_point_delta_m: cand_brake - ref_brake,
        min_speed_delta: cand_min - ref_min,
        throttle_application_delta_m: cand_throttle - ref_throttle,
        time_delta_s,
        entry_speed_delta: candidate.speed[entry] - reference.speed[entry],
        exit_speed_delta: candidate.speed[exit] - reference.speed[exit],
        lap_position_percent: 100.0 * apex as f64 / candidate.track_length_m.max(1.0),
    }
}

/// First distance at or after `entry − 200` where the brake crosses the
/// onset threshold, bounded by the apex. Falls back to the entry.
fn brake_onset_m(lap: &NormalizedLap, entry: usize, apex: usize) -> f64 {
    let start = entry.saturating_sub(BRAKE_SEARCH_BACK_M);
    let end = apex.min(lap.len() - 1);
    for i in start..=end {
        if lap.brake[i] >= BRAKE_ONSET {
            return i as f64;
        }
    }
    entry as f64
}

/// First distance at or after the apex where the throttle reaches full
/// application. Falls back to the exit.
fn throttle_onset_m(lap: &NormalizedLap, apex: usize, exit: usize) -> f64 {
    for (i, &t) in lap.throttle.iter().enumerate().skip(apex) {
        if t >= THROTTLE_ONSET {
            return i as f64;
        }
    }
    exit as f64
}

fn min_in(values: &[f64], from: usize, to: usize) -> f64 {
    let to = to.min(values.len() - 1);
    values[from..=to].iter().fold(f64::INFINITY, |a, &b| a.min(b))
}

/// Time through a corner on a lap's own time axis. `None` when the
/// reconstruction is non-monotonic through the segment.
pub fn corner_time(lap: &NormalizedLap, seg: &CornerSegment) -> Option<f64> {
    let exit = seg.exit_m.min(lap.len() - 1);
    let entry = seg.entry_m.min(exit);
    let dt = lap.session_time[exit] - lap.session_time[entry];
    (dt > 0.0).then_some(dt)
}

/// Theoretical best over a lap set: the fastest traversal of every
/// corner plus the actual best lap's straight times. Always at or under
/// the fastest realised lap.
pub fn theoretical_best(laps: &[NormalizedLap], segments: &[CornerSegment]) -> TheoreticalBest {
    let Some(best_lap) = laps
        .iter()
        .min_by(|a, b| a.lap_time_s.total_cmp(&b.lap_time_s))
    else {
        return TheoreticalBest {
            actual_best_time_s: 0.0,
            theoretical_time_s: 0.0,
            gap_s: 0.0,
            corner_attribution: Vec::new(),
        };
    };
    let actual_best = best_lap.lap_time_s;

    let mut corner_sum = 0.0;
    let mut best_lap_corner_sum = 0.0;
    let mut attribution = Vec::with_capacity(segments.len());

    for seg in segments {
        // A corner the best lap cannot time is left out of both sums so
        // the bound against the actual best stays exact.
        let Some(best_lap_time) = corner_time(best_lap, seg) else {
            continue;
        };

        let mut fastest = best_lap_time;
        let mut fastest_lap = best_lap.lap_number;
        for lap in laps {
            if let Some(t) = corner_time(lap, seg) {
                if t < fastest {
                    fastest = t;
                    fastest_lap = lap.lap_number;
                }
            }
        }

        corner_sum += fastest;
        best_lap_corner_sum += best_lap_time;
        attribution.push(CornerBest {
            corner_number: seg.number,
            lap_number: fastest_lap,
            time_s: fastest,
        });
    }

    let straight_time = actual_best - best_lap_corner_sum;
    let theoretical = corner_sum + straight_time;

    TheoreticalBest {
        actual_best_time_s: actual_best,
        theoretical_time_s: theoretical,
        gap_s: actual_best - theoretical,
        corner_attribution: attribution,
    }
}

/// Per-corner spread of traversal times across the lap set.
pub fn consistency(
    laps: &[NormalizedLap],
    reference: &NormalizedLap,
    segments: &[CornerSegment],
    thresholds: &ConsistencyThresholds,
) -> Vec<ConsistencyFinding> {
    let mut findings = Vec::with_capacity(segments.len());

    for seg in segments {
        let times: Vec<f64> = laps.iter().filter_map(|l| corner_time(l, seg)).collect();
        if times.len() < 2 {
            continue;
        }

        let mean = times.iter().sum::<f64>() / times.len() as f64;
        let var = times.iter().map(|t| (t - mean) * (t - mean)).sum::<f64>() / times.len() as f64;
        let std_dev = var.sqrt();
        let best = times.iter().fold(f64::INFINITY, |a, &b| a.min(b));
        let worst = times.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));

        let consistency_issue = std_dev > thresholds.std_dev_s;
        let mean_delta = corner_time(reference, seg).map(|rt| mean - rt).unwrap_or(0.0);
        let technique_issue = !consistency_issue && mean_delta > thresholds.mean_delta_s;

        findings.push(ConsistencyFinding {
            corner_number: seg.number,
            corner_name: None,
            mean_time_s: mean,
            std_dev_s: std_dev,
            best_time_s: best,
            worst_time_s: worst,
            consistency_issue,
            technique_issue,
        });
    }
    findings
}

/// Tag a per-corner delta with the driving mistake it points to.
pub fn diagnose(
    delta: &CornerDelta,
    candidate: &NormalizedLap,
    reference: &NormalizedLap,
    seg: &CornerSegment,
) -> DiagnosisTag {
    let exit = seg.exit_m.min(candidate.len() - 1);
    let peak_brake = candidate.brake[seg.entry_m..=exit]
        .iter()
        .fold(0.0f64, |acc, &b| acc.max(b));

    let probe = (seg.exit_m + EXIT_PROBE_M)
        .min(candidate.len() - 1)
        .min(reference.len() - 1);
    let exit_slower = candidate.speed[probe] < reference.speed[probe];

    if delta.braking_point_delta_m > LATE_BRAKE_M && delta.min_speed_delta < LATE_BRAKE_MIN_SPEED {
        DiagnosisTag::LateBrakeOverSlow
    } else if delta.braking_point_delta_m < -LATE_BRAKE_M && peak_brake < EARLY_LIFT_PEAK_BRAKE {
        DiagnosisTag::EarlyLift
    } else if delta.min_speed_delta < TIGHT_LINE_MIN_SPEED
        && delta.braking_point_delta_m.abs() <= LATE_BRAKE_M
    {
        DiagnosisTag::TightLine
    } else if delta.throttle_application_delta_m < EARLY_THROTTLE_M && exit_slower {
        DiagnosisTag::EarlyThrottleLossOfDrive
    } else {
        DiagnosisTag::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A lap with a V-shaped corner at `corner_center`, dipping to
    /// `min_speed`, with session times integrated from the speed trace.
    fn lap_with_corner(
        lap_number: i32,
        length: usize,
        corner_center: usize,
        half_width: usize,
        min_speed: f64,
        brake_shift_m: i64,
    ) -> NormalizedLap {
        let straight: f64 = 50.0;
        let n = length + 1;
        let mut speed = vec![straight; n];
        for i in corner_center - half_width..=(corner_center + half_width).min(n - 1) {
            let x = (i as f64 - corner_center as f64).abs() / half_width as f64;
            speed[i] = speed[i].min(min_speed + (straight - min_speed) * x);
        }

        let mut throttle = vec![1.0; n];
        let mut brake = vec![0.0; n];
        for i in 0..n - 1 {
            if speed[i + 1] < speed[i] {
                throttle[i] = 0.0;
                brake[i] = 0.0;
            }
        }
        // Brake trace can be shifted to fake a later/earlier braker
        // without touching the speed trace.
        for i in 0..n - 1 {
            if speed[i + 1] < speed[i] {
                let j = (i as i64 + brake_shift_m).clamp(0, n as i64 - 1) as usize;
                brake[j] = 0.9;
            }
        }

        let mut session_time = Vec::with_capacity(n);
        let mut t = 50.0;
        for &v in &speed {
            session_time.push(t);
            t += 1.0 / v.max(1.0);
        }
        let lap_time = t - 50.0;

        NormalizedLap {
            lap_number,
            lap_time_s: lap_time,
            track_length_m: length as f64,
            speed,
            throttle,
            brake,
            steering: vec![0.0; n],
            rpm: vec![6000.0; n],
            lat: vec![0.0; n],
            lon: vec![0.0; n],
            session_time,
            gear: vec![4; n],
            track_surface: vec![3; n],
            on_pit_road: vec![false; n],
        }
    }

    fn segment_for(lap: &NormalizedLap) -> CornerSegment {
        let segs = crate::corners::detect_corners(lap, &crate::corners::DetectionParams::default());
        assert_eq!(segs.len(), 1, "expected one corner: {segs:?}");
        segs[0].clone()
    }

    #[test]
    fn test_identical_laps_zero_deltas() {
        let a = lap_with_corner(1, 1000, 500, 80, 20.0, 0);
        let b = lap_with_corner(2, 1000, 500, 80, 20.0, 0);
        let seg = segment_for(&a);
        let cmp = compare_laps(&b, &a, &[seg]);
        let d = &cmp.corner_deltas[0];
        assert!(d.time_delta_s.unwrap().abs() < 1e-3);
        assert!(d.braking_point_delta_m.abs() < 1e-9);
        assert!(d.min_speed_delta.abs() < 1e-9);
        assert!(cmp.total_time_delta_s.abs() < 1e-3);
    }

    #[test]
    fn test_slower_corner_costs_time() {
        let reference = lap_with_corner(1, 1000, 500, 80, 24.0, 0);
        let candidate = lap_with_corner(2, 1000, 500, 80, 18.0, 0);
        let seg = segment_for(&reference);
        let cmp = compare_laps(&candidate, &reference, &[seg.clone()]);
        let d = &cmp.corner_deltas[0];
        assert!(d.time_delta_s.unwrap() > 0.0, "candidate must lose time");
        assert!(d.min_speed_delta < -4.0, "min speed clearly lower: {d:?}");
        // The whole loss happens inside the corner, so the total delta
        // must agree with the corner delta.
        assert!((cmp.total_time_delta_s - d.time_delta_s.unwrap()).abs() < 0.05);
    }

    #[test]
    fn test_late_braker_positive_braking_delta() {
        let reference = lap_with_corner(1, 1000, 500, 80, 20.0, 0);
        let candidate = lap_with_corner(2, 1000, 500, 80, 16.0, 15);
        let seg = segment_for(&reference);
        let cmp = compare_laps(&candidate, &reference, &[seg.clone()]);
        let d = &cmp.corner_deltas[0];
        assert!(
            d.braking_point_delta_m > 5.0,
            "braking {} should read later",
            d.braking_point_delta_m
        );
        assert!(d.min_speed_delta < -2.0);
        assert_eq!(
            diagnose(d, &candidate, &reference, &seg),
            DiagnosisTag::LateBrakeOverSlow
        );
    }

    #[test]
    fn test_negative_interval_reports_none() {
        let reference = lap_with_corner(1, 1000, 500, 80, 20.0, 0);
        let mut candidate = lap_with_corner(2, 1000, 500, 80, 20.0, 0);
        let seg = segment_for(&reference);
        // Incident reconstruction: time runs backwards inside the corner.
        candidate.session_time[seg.exit_m] = candidate.session_time[seg.entry_m] - 1.0;
        let cmp = compare_laps(&candidate, &reference, &[seg]);
        assert_eq!(cmp.corner_deltas[0].time_delta_s, None);
    }

    #[test]
    fn test_theoretical_best_at_most_actual_best() {
        let laps = vec![
            lap_with_corner(1, 1000, 500, 80, 24.0, 0),
            lap_with_corner(2, 1000, 500, 80, 20.0, 0),
            lap_with_corner(3, 1000, 500, 80, 22.0, 0),
        ];
        let best = laps
            .iter()
            .min_by(|a, b| a.lap_time_s.total_cmp(&b.lap_time_s))
            .unwrap();
        let seg = segment_for(best);
        let tb = theoretical_best(&laps, &[seg]);
        assert!(tb.theoretical_time_s <= tb.actual_best_time_s + 1e-6);
        assert!(tb.gap_s >= -1e-6);
        assert_eq!(tb.corner_attribution.len(), 1);
    }

    #[test]
    fn test_theoretical_best_attributes_fastest_lap() {
        // Lap 2 carries the fastest corner (higher minimum speed) even
        // though lap 1's official time makes it the session best.
        let mut lap1 = lap_with_corner(1, 1000, 500, 80, 22.0, 0);
        let lap2 = lap_with_corner(2, 1000, 500, 80, 26.0, 0);
        lap1.lap_time_s = lap2.lap_time_s - 1.0;
        let seg = segment_for(&lap1);
        let tb = theoretical_best(&[lap2.clone(), lap1.clone()], &[seg]);
        assert_eq!(tb.corner_attribution[0].lap_number, 2);
        // The faster corner pulls the theoretical under the actual best.
        assert!(tb.gap_s > 0.0);
    }

    #[test]
    fn test_consistency_flags_spread() {
        let laps = vec![
            lap_with_corner(1, 1000, 500, 80, 27.0, 0),
            lap_with_corner(2, 1000, 500, 80, 17.0, 0),
            lap_with_corner(3, 1000, 500, 80, 26.5, 0),
        ];
        let seg = segment_for(&laps[1]);
        let findings = consistency(
            &laps,
            &laps[1],
            &[seg],
            &ConsistencyThresholds::default(),
        );
        assert_eq!(findings.len(), 1);
        assert!(findings[0].consistency_issue, "{findings:?}");
        assert!(!findings[0].technique_issue);
        assert!(findings[0].worst_time_s > findings[0].best_time_s);
    }

    #[test]
    fn test_consistency_flags_technique() {
        // Tight spread, but repeatably slower than the reference.
        let reference = lap_with_corner(1, 1000, 500, 80, 26.0, 0);
        let laps = vec![
            lap_with_corner(2, 1000, 500, 80, 19.0, 0),
            lap_with_corner(3, 1000, 500, 80, 19.2, 0),
            lap_with_corner(4, 1000, 500, 80, 18.8, 0),
        ];
        let seg = segment_for(&reference);
        let findings = consistency(
            &laps,
            &reference,
            &[seg],
            &ConsistencyThresholds::default(),
        );
        assert_eq!(findings.len(), 1);
        assert!(!findings[0].consistency_issue);
        assert!(findings[0].technique_issue, "{findings:?}");
    }
}
