//! Corner detection from the speed trace
//!
//! Segments a normalised lap into corners and straights:
//!
//! 1. Smooth the speed trace (Savitzky-Golay, window 21 m, order 3)
//! 2. Find apex candidates (local speed minima with enough prominence)
//! 3. Walk backward from each apex to the braking point (entry)
//! 4. Walk forward from each apex to sustained throttle (exit)
//! 5. Merge close corners into chicanes
//! 6. Filter false positives
//! 7. Classify and number the survivors
//!
//! No crate in the ecosystem we build on ships a Savitzky-Golay filter,
//! so the coefficients are solved here from the least-squares normal
//! equations.

use apexcoach_core::model::{CornerSegment, CornerType, NormalizedLap};
use std::str::FromStr;
use tracing::debug;

/// How far back from an apex the entry search may walk.
const ENTRY_WALK_LIMIT_M: usize = 250;
/// Speed must keep rising this long past the throttle pickup for the
/// pickup to count as the corner exit.
const EXIT_RISE_M: usize = 20;
/// Segments shorter than this are noise.
const MIN_SPAN_M: usize = 40;
/// Forward speed slope (m/s per metre) that marks the pre-corner peak
/// when walking backwards from the apex.
const DECEL_ONSET_EPS: f64 = 0.02;

// Classification thresholds
const HAIRPIN_APEX_SPEED_MPS: f64 = 20.0;
const HAIRPIN_TURN_DEG: f64 = 120.0;
const SWEEPER_APEX_SPEED_MPS: f64 = 40.0;
const SWEEPER_MAX_BRAKE: f64 = 0.2;
const HEAVY_BRAKING_PEAK: f64 = 0.8;
const HEAVY_BRAKING_DROP_MPS: f64 = 25.0;
const KINK_SPAN_M: usize = 80;
const KINK_DROP_MPS: f64 = 6.0;

// Small-angle bicycle model for cumulative heading change: wheel angle
// is steering divided by the rack ratio, yaw per metre is wheel angle
// over the wheelbase.
const STEERING_RATIO: f64 = 11.0;
const WHEELBASE_M: f64 = 2.6;

/// Detection presets tuned per track type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionPreset {
    Road,
    Street,
    Oval,
}

impl DetectionPreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionPreset::Road => "road",
            DetectionPreset::Street => "street",
            DetectionPreset::Oval => "oval",
        }
    }
}

impl FromStr for DetectionPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "road" => Ok(DetectionPreset::Road),
            "street" => Ok(DetectionPreset::Street),
            "oval" => Ok(DetectionPreset::Oval),
            other => Err(format!("unknown preset '{other}'")),
        }
    }
}

/// Tunable detection parameters. Use [`DetectionParams::for_preset`]
/// unless a caller has measured better values for a specific circuit.
#[derive(Debug, Clone)]
pub struct DetectionParams {
    pub smoothing_window_m: usize,
    pub smoothing_order: usize,
    /// Minimum surrounding peak-to-trough drop for an apex candidate.
    pub min_corner_speed_drop_mps: f64,
    /// Local minima above this speed are not corners.
    pub apex_speed_ceiling_mps: f64,
    pub brake_threshold: f64,
    pub throttle_threshold: f64,
    /// Corners whose gap is within this merge into one chicane.
    pub merge_gap_m: usize,
}

impl DetectionParams {
    pub fn for_preset(preset: DetectionPreset) -> Self {
        // The road preset's 3.0 m/s drop is deliberate: 5.0 missed fast
        // sweepers like Eau Rouge.
        match preset {
            DetectionPreset::Road => DetectionParams {
                smoothing_window_m: 21,
                smoothing_order: 3,
                min_corner_speed_drop_mps: 3.0,
                apex_speed_ceiling_mps: 60.0,
                brake_threshold: 0.05,
                throttle_threshold: 0.90,
                merge_gap_m: 30,
            },
            DetectionPreset::Street => DetectionParams {
                smoothing_window_m: 21,
                smoothing_order: 3,
                min_corner_speed_drop_mps: 2.0,
                apex_speed_ceiling_mps: 45.0,
                brake_threshold: 0.05,
                throttle_threshold: 0.85,
                merge_gap_m: 20,
            },
            DetectionPreset::Oval => DetectionParams {
                smoothing_window_m: 21,
                smoothing_order: 3,
                min_corner_speed_drop_mps: 8.0,
                apex_speed_ceiling_mps: 70.0,
                brake_threshold: 0.03,
                throttle_threshold: 0.90,
                merge_gap_m: 60,
            },
        }
    }
}

impl Default for DetectionParams {
    fn default() -> Self {
        DetectionParams::for_preset(DetectionPreset::Road)
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    entry: usize,
    apex: usize,
    exit: usize,
    merged: bool,
}

/// Run the full detection pipeline on a normalised lap.
pub fn detect_corners(lap: &NormalizedLap, params: &DetectionParams) -> Vec<CornerSegment> {
    if lap.len() < params.smoothing_window_m.max(3) {
        return Vec::new();
    }

    let smoothed = smooth_speed(&lap.speed, params.smoothing_window_m, params.smoothing_order);
    let apexes = find_apex_candidates(&smoothed, params);
    debug!(
        lap_number = lap.lap_number,
        candidates = apexes.len(),
        "apex candidates found"
    );

    let mut candidates: Vec<Candidate> = Vec::with_capacity(apexes.len());
    for apex in apexes {
        if apex == 0 || apex + 1 >= smoothed.len() {
            continue;
        }
        let entry = find_entry(&lap.brake, &smoothed, apex, params);
        let exit = find_exit(&lap.throttle, &smoothed, apex, params);
        if entry < apex && apex < exit {
            candidates.push(Candidate {
                entry,
                apex,
                exit,
                merged: false,
            });
        }
    }

    let merged = merge_close(candidates, &smoothed, params.merge_gap_m);

    let mut segments = Vec::with_capacity(merged.len());
    for c in merged {
        let drop = smoothed[c.entry] - smoothed[c.apex];
        if drop < params.min_corner_speed_drop_mps || c.exit - c.entry < MIN_SPAN_M {
            continue;
        }
        let corner_type = if c.merged {
            CornerType::Chicane
        } else {
            classify(lap, &smoothed, &c)
        };
        segments.push(CornerSegment {
            number: segments.len() as u32 + 1,
            entry_m: c.entry,
            apex_m: c.apex,
            exit_m: c.exit,
            apex_speed_mps: smoothed[c.apex],
            corner_type,
        });
    }
    segments
}

/// Savitzky-Golay smoothing with edge replication. The window is
/// clamped to an odd value no larger than the signal; degenerate
/// windows fall back to a copy.
pub fn smooth_speed(speed: &[f64], window: usize, order: usize) -> Vec<f64> {
    let n = speed.len();
    let mut window = window.min(n);
    if window % 2 == 0 {
        window = window.saturating_sub(1);
    }
    if window < 3 || order + 1 >= window {
        return speed.to_vec();
    }

    let half = window / 2;
    let coeffs = savgol_coefficients(window, order);

    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let mut acc = 0.0;
        for (j, &c) in coeffs.iter().enumerate() {
            // replicate edges
            let idx = (i + j).saturating_sub(half).min(n - 1);
            acc += c * speed[idx];
        }
        out.push(acc);
    }
    out
}

/// Central smoothing coefficients for a least-squares polynomial fit of
/// the given order over a symmetric window: solve the normal equations
/// G z = e0 over the moment matrix, then h_j = Σ_p z_p x_j^p.
fn savgol_coefficients(window: usize, order: usize) -> Vec<f64> {
    let m = (window / 2) as i64;
    let terms = order + 1;

    let mut g = vec![vec![0.0f64; terms]; terms];
    for (p, row) in g.iter_mut().enumerate() {
        for (q, cell) in row.iter_mut().enumerate() {
            let mut s = 0.0;
            for x in -m..=m {
                s += (x as f64).powi((p + q) as i32);
            }
            *cell = s;
        }
    }

    let mut e0 = vec![0.0f64; terms];
    e0[0] = 1.0;
    let z = solve_linear(g, e0);

    (-m..=m)
        .map(|x| {
            (0..terms)
                .map(|p| z[p] * (x as f64).powi(p as i32))
                .sum::<f64>()
        })
        .collect()
}

/// Gaussian elimination with partial pivoting on a small dense system.
fn solve_linear(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Vec<f64> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| {
                a[i][col]
                    .abs()
                    .partial_cmp(&a[j][col].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(col);
        a.swap(col, pivot);
        b.swap(col, pivot);

        let diag = a[col][col];
        for row in col + 1..n {
            let factor = a[row][col] / diag;
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = vec![0.0f64; n];
    for row in (0..n).rev() {
        let mut acc = b[row];
        for k in row + 1..n {
            acc -= a[row][k] * x[k];
        }
        x[row] = acc / a[row][row];
    }
    x
}

/// Local minima of the smoothed trace whose value is under the apex
/// ceiling and whose surrounding peak-to-trough drop reaches the
/// preset's minimum.
fn find_apex_candidates(s: &[f64], params: &DetectionParams) -> Vec<usize> {
    let n = s.len();
    let mut apexes = Vec::new();

    for i in 1..n - 1 {
        if !(s[i] < s[i - 1] && s[i] <= s[i + 1]) {
            continue;
        }
        if s[i] >= params.apex_speed_ceiling_mps {
            continue;
        }
        if prominence(s, i) < params.min_corner_speed_drop_mps {
            continue;
        }
        apexes.push(i);
    }
    apexes
}

/// Height of the lowest of the two enclosing peaks above the minimum at
/// `i`: walk outward until a sample lower than s[i] (or the edge) and
/// take the maximum seen on each side.
fn prominence(s: &[f64], i: usize) -> f64 {
    let mut left_max = s[i];
    let mut j = i;
    while j > 0 {
        j -= 1;
        if s[j] < s[i] {
            break;
        }
        left_max = left_max.max(s[j]);
    }

    let mut right_max = s[i];
    let mut j = i;
    while j + 1 < s.len() {
        j += 1;
        if s[j] < s[i] {
            break;
        }
        right_max = right_max.max(s[j]);
    }

    left_max.min(right_max) - s[i]
}

/// Walk backward from the apex to the braking point: the first brake
/// onset, or the pre-corner speed peak (deceleration onset) when the
/// corner is taken without brakes. Bounded to 250 m.
fn find_entry(brake: &[f64], s: &[f64], apex: usize, params: &DetectionParams) -> usize {
    let lo = apex.saturating_sub(ENTRY_WALK_LIMIT_M);
    let mut i = apex;
    while i > lo {
        i -= 1;
        if brake[i] >= params.brake_threshold
            && (i == 0 || brake[i - 1] < params.brake_threshold)
        {
            return i;
        }
        // Speed rising again (walking backwards) means we crossed the
        // pre-corner peak.
        if apex - i > 3 && s[i + 1] > s[i] + DECEL_ONSET_EPS {
            return i + 1;
        }
    }
    lo
}

/// Walk forward from the apex to the exit: sustained throttle with the
/// speed still rising 20 m later, or failing that, clear speed recovery.
fn find_exit(throttle: &[f64], s: &[f64], apex: usize, params: &DetectionParams) -> usize {
    let n = s.len();
    for i in apex + 1..n - 1 {
        if throttle[i] >= params.throttle_threshold && rising_through(s, i, EXIT_RISE_M) {
            return i;
        }
    }
    for i in apex + 1..n {
        if s[i] > s[apex] * 1.3 {
            return i;
        }
    }
    n - 1
}

fn rising_through(s: &[f64], i: usize, span: usize) -> bool {
    let hi = (i + span).min(s.len() - 1);
    hi > i && (i..hi).all(|j| s[j + 1] >= s[j])
}

/// Merge adjacent corners whose gap is inside `merge_gap_m`. The merged
/// corner spans both, keeps the slower apex, and is tagged a chicane.
fn merge_close(candidates: Vec<Candidate>, s: &[f64], merge_gap_m: usize) -> Vec<Candidate> {
    let mut merged: Vec<Candidate> = Vec::with_capacity(candidates.len());
    for next in candidates {
        let close_to_prev = merged
            .last()
            .is_some_and(|prev| next.entry as i64 - prev.exit as i64 <= merge_gap_m as i64);
        if close_to_prev {
            if let Some(prev) = merged.last_mut() {
                if s[next.apex] < s[prev.apex] {
                    prev.apex = next.apex;
                }
                prev.exit = prev.exit.max(next.exit);
                prev.merged = true;
            }
        } else {
            merged.push(next);
        }
    }
    merged
}

fn classify(lap: &NormalizedLap, s: &[f64], c: &Candidate) -> CornerType {
    let apex_speed = s[c.apex];
    let drop = s[c.entry] - s[c.apex];
    let span = c.exit - c.entry;

    let peak_brake = lap.brake[c.entry..=c.exit]
        .iter()
        .fold(0.0f64, |acc, &b| acc.max(b));

    // Cumulative heading change across the segment, degrees.
    let turn_rad: f64 = lap.steering[c.entry..=c.exit]
        .iter()
        .map(|&sw| sw.abs() / (STEERING_RATIO * WHEELBASE_M))
        .sum();
    let turn_deg = turn_rad.to_degrees();

    if apex_speed < HAIRPIN_APEX_SPEED_MPS && turn_deg > HAIRPIN_TURN_DEG {
        CornerType::Hairpin
    } else if apex_speed > SWEEPER_APEX_SPEED_MPS && peak_brake < SWEEPER_MAX_BRAKE {
        CornerType::Sweeper
    } else if peak_brake > HEAVY_BRAKING_PEAK && drop > HEAVY_BRAKING_DROP_MPS {
        CornerType::HeavyBraking
    } else if span < KINK_SPAN_M && drop < KINK_DROP_MPS {
        CornerType::Kink
    } else {
        CornerType::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_lap(speed: Vec<f64>, throttle: Vec<f64>, brake: Vec<f64>) -> NormalizedLap {
        let n = speed.len();
        NormalizedLap {
            lap_number: 1,
            lap_time_s: 30.0,
            track_length_m: (n - 1) as f64,
            speed,
            throttle,
            brake,
            steering: vec![0.0; n],
            rpm: vec![6000.0; n],
            lat: vec![0.0; n],
            lon: vec![0.0; n],
            session_time: (0..n).map(|i| i as f64 * 0.02).collect(),
            gear: vec![4; n],
            track_surface: vec![3; n],
            on_pit_road: vec![false; n],
        }
    }

    /// V-shaped speed dip centred at `center`, linear ramps.
    fn dip(speed: &mut [f64], center: usize, half_width: usize, min_speed: f64) {
        let straight = speed[0];
        for i in center.saturating_sub(half_width)..=(center + half_width).min(speed.len() - 1) {
            let x = (i as f64 - center as f64).abs() / half_width as f64;
            let v = min_speed + (straight - min_speed) * x;
            speed[i] = speed[i].min(v);
        }
    }

    /// Derive plausible pedal traces from a speed profile.
    fn pedals(speed: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let n = speed.len();
        let mut throttle = vec![1.0; n];
        let mut brake = vec![0.0; n];
        for i in 0..n - 1 {
            if speed[i + 1] < speed[i] {
                throttle[i] = 0.0;
                brake[i] = 0.9;
            }
        }
        (throttle, brake)
    }

    fn single_corner_lap() -> NormalizedLap {
        let mut speed = vec![50.0; 1001];
        dip(&mut speed, 500, 80, 20.0);
        let (throttle, brake) = pedals(&speed);
        flat_lap(speed, throttle, brake)
    }

    #[test]
    fn test_savgol_preserves_line() {
        // A degree-3 fit reproduces any cubic exactly; a line certainly.
        let line: Vec<f64> = (0..100).map(|i| 2.0 + 0.5 * i as f64).collect();
        let smoothed = smooth_speed(&line, 21, 3);
        for (a, b) in line.iter().zip(&smoothed).skip(10).take(80) {
            assert!((a - b).abs() < 1e-6, "{a} vs {b}");
        }
    }

    #[test]
    fn test_savgol_coefficients_sum_to_one() {
        let coeffs = savgol_coefficients(21, 3);
        let sum: f64 = coeffs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9, "sum = {sum}");
        assert_eq!(coeffs.len(), 21);
    }

    #[test]
    fn test_detects_single_corner() {
        let lap = single_corner_lap();
        let segments = detect_corners(&lap, &DetectionParams::default());
        assert_eq!(segments.len(), 1, "{segments:?}");
        let seg = &segments[0];
        assert!(seg.entry_m < seg.apex_m && seg.apex_m < seg.exit_m);
        assert!((seg.apex_m as i64 - 500).unsigned_abs() < 10);
        assert!(seg.apex_speed_mps < 25.0);
        assert_eq!(seg.number, 1);
    }

    #[test]
    fn test_straight_lap_detects_nothing() {
        let lap = flat_lap(vec![55.0; 800], vec![1.0; 800], vec![0.0; 800]);
        assert!(detect_corners(&lap, &DetectionParams::default()).is_empty());
    }

    #[test]
    fn test_fast_sweeper_found_by_road_preset() {
        // A 4 m/s dip at high speed: under the old 5.0 m/s drop this was
        // lost; the road preset must keep it.
        let mut speed = vec![58.0; 1001];
        dip(&mut speed, 400, 100, 54.0);
        let (throttle, brake) = pedals(&speed);
        let lap = flat_lap(speed, throttle, brake);
        let segments = detect_corners(&lap, &DetectionParams::default());
        assert_eq!(segments.len(), 1, "{segments:?}");
    }

    #[test]
    fn test_two_apexes_within_merge_gap_become_chicane() {
        let mut speed = vec![50.0; 1001];
        dip(&mut speed, 300, 50, 20.0);
        dip(&mut speed, 360, 50, 18.0);
        let (throttle, brake) = pedals(&speed);
        let lap = flat_lap(speed, throttle, brake);
        let segments = detect_corners(&lap, &DetectionParams::default());
        assert_eq!(segments.len(), 1, "{segments:?}");
        assert_eq!(segments[0].corner_type, CornerType::Chicane);
        // Slower of the two apexes wins.
        assert!((segments[0].apex_speed_mps - 18.0).abs() < 2.0);
    }

    #[test]
    fn test_separated_corners_stay_separate() {
        let mut speed = vec![50.0; 1201];
        dip(&mut speed, 300, 60, 22.0);
        dip(&mut speed, 800, 60, 24.0);
        let (throttle, brake) = pedals(&speed);
        let lap = flat_lap(speed, throttle, brake);
        let segments = detect_corners(&lap, &DetectionParams::default());
        assert_eq!(segments.len(), 2, "{segments:?}");
        assert!(segments[0].exit_m < segments[1].entry_m);
        assert_eq!(segments[0].number, 1);
        assert_eq!(segments[1].number, 2);
    }

    #[test]
    fn test_segments_disjoint_and_ordered() {
        let mut speed = vec![52.0; 2001];
        for (c, m) in [(250, 20.0), (600, 30.0), (1000, 15.0), (1500, 35.0)] {
            dip(&mut speed, c, 70, m);
        }
        let (throttle, brake) = pedals(&speed);
        let lap = flat_lap(speed, throttle, brake);
        let segments = detect_corners(&lap, &DetectionParams::default());
        assert!(segments.len() >= 3);
        for w in segments.windows(2) {
            assert!(w[0].exit_m < w[1].entry_m, "{segments:?}");
        }
        for s in &segments {
            assert!(s.entry_m < s.apex_m && s.apex_m < s.exit_m);
        }
    }

    #[test]
    fn test_hairpin_classification_needs_steering() {
        let mut speed = vec![50.0; 1001];
        dip(&mut speed, 500, 100, 12.0);
        let (throttle, brake) = pedals(&speed);
        let mut lap = flat_lap(speed, throttle, brake);
        // Plenty of lock through the corner: ~0.7 rad wheel over 200 m.
        for i in 400..=600 {
            lap.steering[i] = 0.7;
        }
        let segments = detect_corners(&lap, &DetectionParams::default());
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].corner_type, CornerType::Hairpin);
    }

    #[test]
    fn test_oval_preset_ignores_small_drops() {
        let mut speed = vec![60.0; 1001];
        dip(&mut speed, 500, 80, 55.0); // 5 m/s drop
        let (throttle, brake) = pedals(&speed);
        let lap = flat_lap(speed, throttle, brake);
        let road = detect_corners(&lap, &DetectionParams::for_preset(DetectionPreset::Road));
        let oval = detect_corners(&lap, &DetectionParams::for_preset(DetectionPreset::Oval));
        assert_eq!(road.len(), 1);
        assert!(oval.is_empty());
    }

    #[test]
    fn test_preset_parsing() {
        assert_eq!("road".parse::<DetectionPreset>().unwrap(), DetectionPreset::Road);
        assert_eq!("OVAL".parse::<DetectionPreset>().unwrap(), DetectionPreset::Oval);
        assert!("figure8".parse::<DetectionPreset>().is_err());
    }
}
