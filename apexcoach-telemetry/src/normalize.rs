//! Distance-based lap normalisation
//!
//! Resamples a lap's time-series channels onto a uniform 1-metre
//! distance grid so laps can be compared point for point. Laps that
//! cannot be resampled faithfully (pit laps, spins, teleports, partial
//! coverage) are rejected with a reason rather than silently skewed.

use crate::ibt::{CoreChannels, RawLap};
use apexcoach_core::model::{LapRejection, NormalizedLap};

/// Minimum samples for a lap to be worth resampling.
const MIN_SAMPLES: usize = 100;
/// A lap must cover at least this fraction of the track length.
const MIN_COVERAGE: f64 = 0.90;
/// Below this speed the car counts as stationary (tail trimming).
const STATIONARY_SPEED_MPS: f64 = 0.1;
/// Above this speed distance discontinuities are real track cutting or
/// GPS teleports, not harmless resets.
const MOVING_SPEED_MPS: f64 = 1.0;
/// A forward step larger than this while moving is a teleport.
const MAX_FORWARD_STEP_M: f64 = 50.0;

/// Resample one lap onto the `[0, 1, …, ⌊track_length⌋]` metre grid.
///
/// Continuous channels interpolate linearly; `Gear`,
/// `PlayerTrackSurface` and `OnPitRoad` take the nearest source sample.
/// The lap time is the source lap's final `LapCurrentLapTime` value.
pub fn normalize_lap(
    channels: &CoreChannels,
    lap: &RawLap,
    track_length_m: f64,
) -> Result<NormalizedLap, LapRejection> {
    let (start, end) = (lap.start, lap.end);
    if end - start < MIN_SAMPLES {
        return Err(LapRejection::TooShort);
    }
    if track_length_m <= 1.0 {
        return Err(LapRejection::InsufficientCoverage);
    }

    if channels.on_pit_road[start..end].iter().any(|&p| p) {
        return Err(LapRejection::PitLap);
    }

    // The lap clock at the lap's final sample. The lap-index channel
    // flips before the clock resets, so max() would read the previous
    // lap's stale tail.
    let lap_time_s = channels.lap_current_lap_time[end - 1];

    // Trim trailing stationary samples (car parked at session end).
    let speed = &channels.speed[start..end];
    let last_moving = match speed.iter().rposition(|&v| v >= STATIONARY_SPEED_MPS) {
        Some(i) => i,
        None => return Err(LapRejection::TooShort),
    };
    let n = last_moving + 1;
    if n < MIN_SAMPLES {
        return Err(LapRejection::TooShort);
    }

    let dist = &channels.lap_dist[start..start + n];
    let speed = &channels.speed[start..start + n];

    let (mut dist_min, mut dist_max) = (f64::INFINITY, f64::NEG_INFINITY);
    for &d in dist {
        dist_min = dist_min.min(d);
        dist_max = dist_max.max(d);
    }
    if dist_max - dist_min < MIN_COVERAGE * track_length_m {
        return Err(LapRejection::InsufficientCoverage);
    }

    // Discontinuities while moving are disqualifying; while stationary
    // they are harmless (session resets, tow-backs).
    for i in 1..n {
        let step = dist[i] - dist[i - 1];
        if speed[i - 1] > MOVING_SPEED_MPS && (step < 0.0 || step > MAX_FORWARD_STEP_M) {
            return Err(LapRejection::DistanceJump);
        }
    }

    // Deduplicate equal consecutive distances, last occurrence wins, so
    // the latest channel state at a distance is the one that survives.
    // Samples that move backwards (stationary shuffling) are dropped.
    let mut kept: Vec<usize> = Vec::with_capacity(n);
    kept.push(0);
    let mut last_dist = dist[0];
    for i in 1..n {
        if dist[i] > last_dist {
            kept.push(i);
            last_dist = dist[i];
        } else if dist[i] == last_dist {
            if let Some(slot) = kept.last_mut() {
                *slot = i;
            }
        }
    }
    if kept.len() < 2 {
        return Err(LapRejection::TooShort);
    }

    let xs: Vec<f64> = kept.iter().map(|&i| dist[i]).collect();
    // Project a full-session column down to the kept lap samples.
    let take = |src: &[f64]| -> Vec<f64> { kept.iter().map(|&i| src[start + i]).collect() };

    // Target grid: integer metres, 0 to floor(track_length) inclusive.
    let grid_len = track_length_m.floor() as usize + 1;

    let session_time = interp_linear(&xs, &take(&channels.session_time), grid_len, true);
    for i in 1..session_time.len() {
        if session_time[i] <= session_time[i - 1] {
            return Err(LapRejection::DistanceJump);
        }
    }

    let mut speed_g = interp_linear(&xs, &take(&channels.speed), grid_len, false);
    let mut throttle = interp_linear(&xs, &take(&channels.throttle), grid_len, false);
    let mut brake = interp_linear(&xs, &take(&channels.brake), grid_len, false);
    let steering = interp_linear(&xs, &take(&channels.steering), grid_len, false);
    let rpm = interp_linear(&xs, &take(&channels.rpm), grid_len, false);
    let lat = interp_linear(&xs, &take(&channels.lat), grid_len, false);
    let lon = interp_linear(&xs, &take(&channels.lon), grid_len, false);

    let gear = interp_nearest(&xs, &kept, &channels.gear[start..start + n], grid_len);
    let track_surface =
        interp_nearest(&xs, &kept, &channels.track_surface[start..start + n], grid_len);
    let on_pit_road =
        interp_nearest(&xs, &kept, &channels.on_pit_road[start..start + n], grid_len);

    // Physical bounds
    for v in &mut speed_g {
        *v = v.max(0.0);
    }
    for v in &mut throttle {
        *v = v.clamp(0.0, 1.0);
    }
    for v in &mut brake {
        *v = v.clamp(0.0, 1.0);
    }

    Ok(NormalizedLap {
        lap_number: lap.lap_number,
        lap_time_s,
        track_length_m,
        speed: speed_g,
        throttle,
        brake,
        steering,
        rpm,
        lat,
        lon,
        session_time,
        gear,
        track_surface,
        on_pit_road,
    })
}

/// Normalise every lap of a session, partitioning into survivors and
/// per-lap rejections.
pub fn normalize_session(
    channels: &CoreChannels,
    laps: &[RawLap],
    track_length_m: f64,
) -> (Vec<NormalizedLap>, Vec<(i32, LapRejection)>) {
    let mut kept = Vec::new();
    let mut rejected = Vec::new();
    for lap in laps {
        match normalize_lap(channels, lap, track_length_m) {
            Ok(nlap) => kept.push(nlap),
            Err(reason) => rejected.push((lap.lap_number, reason)),
        }
    }
    (kept, rejected)
}

/// Linear interpolation of `(xs, ys)` onto the integer grid
/// `0..grid_len`. `xs` must be strictly increasing. Outside the source
/// range values clamp to the edge, or extrapolate along the boundary
/// segment when `extrapolate` is set (used for the time axis, which
/// must stay strictly increasing across the whole grid).
fn interp_linear(xs: &[f64], ys: &[f64], grid_len: usize, extrapolate: bool) -> Vec<f64> {
    let n = xs.len();
    let mut out = Vec::with_capacity(grid_len);
    let mut seg = 0usize;

    for g in 0..grid_len {
        let x = g as f64;
        if x <= xs[0] {
            out.push(if extrapolate && n >= 2 {
                let slope = (ys[1] - ys[0]) / (xs[1] - xs[0]);
                ys[0] + slope * (x - xs[0])
            } else {
                ys[0]
            });
            continue;
        }
        if x >= xs[n - 1] {
            out.push(if extrapolate && n >= 2 {
                let slope = (ys[n - 1] - ys[n - 2]) / (xs[n - 1] - xs[n - 2]);
                ys[n - 1] + slope * (x - xs[n - 1])
            } else {
                ys[n - 1]
            });
            continue;
        }
        while xs[seg + 1] < x {
            seg += 1;
        }
        let t = (x - xs[seg]) / (xs[seg + 1] - xs[seg]);
        out.push(ys[seg] + t * (ys[seg + 1] - ys[seg]));
    }
    out
}

/// Nearest-neighbour resampling for discrete channels.
fn interp_nearest<T: Copy>(xs: &[f64], kept: &[usize], src: &[T], grid_len: usize) -> Vec<T> {
    let n = xs.len();
    let mut out = Vec::with_capacity(grid_len);
    let mut seg = 0usize;

    for g in 0..grid_len {
        let x = g as f64;
        if x <= xs[0] {
            out.push(src[kept[0]]);
            continue;
        }
        if x >= xs[n - 1] {
            out.push(src[kept[n - 1]]);
            continue;
        }
        while xs[seg + 1] < x {
            seg += 1;
        }
        let pick = if x - xs[seg] <= xs[seg + 1] - x {
            seg
        } else {
            seg + 1
        };
        out.push(src[kept[pick]]);
    }
    out
}
