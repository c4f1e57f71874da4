//! Corner registry: match detected segments to named corner records
//!
//! Primary rule is maximal interval overlap, assigned greedily from the
//! largest overlap down so each detected segment takes at most one
//! record and each record is used at most once per lap. Segments with
//! no overlapping record fall back to apex proximity.

use crate::models::CornerRecord;
use apexcoach_core::model::CornerSegment;

/// Apex-to-record-midpoint tolerance for the fallback match, metres.
const APEX_PROXIMITY_M: f64 = 50.0;

/// Match each detected segment to at most one corner record. The
/// result is index-aligned with `segments`; unmatched entries are
/// `None`.
pub fn match_segments<'a>(
    records: &'a [CornerRecord],
    segments: &[CornerSegment],
) -> Vec<Option<&'a CornerRecord>> {
    let mut matches: Vec<Option<&CornerRecord>> = vec![None; segments.len()];
    if records.is_empty() || segments.is_empty() {
        return matches;
    }

    // All positive-overlap pairs, largest overlap first. Ties break on
    // segment then record order so results are deterministic.
    let mut pairs: Vec<(f64, usize, usize)> = Vec::new();
    for (si, seg) in segments.iter().enumerate() {
        for (ri, rec) in records.iter().enumerate() {
            let overlap = interval_overlap(
                seg.entry_m as f64,
                seg.exit_m as f64,
                rec.distance_start_meters,
                rec.distance_end_meters,
            );
            if overlap > 0.0 {
                pairs.push((overlap, si, ri));
            }
        }
    }
    pairs.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

    let mut record_used = vec![false; records.len()];
    for (_, si, ri) in pairs {
        if matches[si].is_none() && !record_used[ri] {
            matches[si] = Some(&records[ri]);
            record_used[ri] = true;
        }
    }

    // Fallback: nearest record midpoint within tolerance of the apex.
    for (si, seg) in segments.iter().enumerate() {
        if matches[si].is_some() {
            continue;
        }
        let apex = seg.apex_m as f64;
        let mut best: Option<(f64, usize)> = None;
        for (ri, rec) in records.iter().enumerate() {
            if record_used[ri] {
                continue;
            }
            let midpoint = (rec.distance_start_meters + rec.distance_end_meters) / 2.0;
            let dist = (apex - midpoint).abs();
            if dist < APEX_PROXIMITY_M && best.map_or(true, |(d, _)| dist < d) {
                best = Some((dist, ri));
            }
        }
        if let Some((_, ri)) = best {
            matches[si] = Some(&records[ri]);
            record_used[ri] = true;
        }
    }

    matches
}

fn interval_overlap(start_a: f64, end_a: f64, start_b: f64, end_b: f64) -> f64 {
    (end_a.min(end_b) - start_a.max(start_b)).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use apexcoach_core::model::CornerType;

    fn record(number: i64, start: f64, end: f64, name: &str) -> CornerRecord {
        CornerRecord {
            corner_id: None,
            track_id: "219".to_string(),
            corner_number: number,
            name: Some(name.to_string()),
            distance_start_meters: start,
            distance_end_meters: end,
            corner_type: None,
            notes: None,
        }
    }

    fn segment(number: u32, entry: usize, apex: usize, exit: usize) -> CornerSegment {
        CornerSegment {
            number,
            entry_m: entry,
            apex_m: apex,
            exit_m: exit,
            apex_speed_mps: 25.0,
            corner_type: CornerType::Unknown,
        }
    }

    #[test]
    fn test_overlap_match() {
        let records = vec![
            record(1, 100.0, 250.0, "First"),
            record(2, 800.0, 950.0, "Second"),
        ];
        let segments = vec![segment(1, 120, 180, 260), segment(2, 790, 870, 940)];
        let matches = match_segments(&records, &segments);
        assert_eq!(matches[0].unwrap().name.as_deref(), Some("First"));
        assert_eq!(matches[1].unwrap().name.as_deref(), Some("Second"));
    }

    #[test]
    fn test_each_record_matches_once() {
        // Two detected segments both overlap one record; only the
        // larger overlap takes it.
        let records = vec![record(1, 100.0, 300.0, "Only")];
        let segments = vec![segment(1, 90, 150, 200), segment(2, 210, 260, 310)];
        let matches = match_segments(&records, &segments);
        let named: Vec<bool> = matches.iter().map(|m| m.is_some()).collect();
        assert_eq!(named.iter().filter(|&&b| b).count(), 1);
        // Segment 1 overlaps 100..200 = 100 m; segment 2 overlaps
        // 210..300 = 90 m, so segment 1 wins.
        assert!(matches[0].is_some());
        assert!(matches[1].is_none());
    }

    #[test]
    fn test_apex_proximity_fallback() {
        // Record interval misses the detected span entirely, but its
        // midpoint is within 50 m of the apex.
        let records = vec![record(1, 300.0, 340.0, "Close By")];
        let segments = vec![segment(1, 200, 280, 295)];
        let matches = match_segments(&records, &segments);
        assert_eq!(matches[0].unwrap().name.as_deref(), Some("Close By"));
    }

    #[test]
    fn test_far_segment_stays_unnamed() {
        let records = vec![record(1, 2000.0, 2200.0, "Far Away")];
        let segments = vec![segment(1, 100, 150, 220)];
        let matches = match_segments(&records, &segments);
        assert!(matches[0].is_none());
    }

    #[test]
    fn test_greedy_assignment_is_longest_overlap_first() {
        // One record overlapping two segments, and a second record
        // overlapping the second segment a little: the big overlap
        // pairs first, leaving the small record for the other segment.
        let records = vec![
            record(1, 100.0, 400.0, "Big"),
            record(2, 390.0, 430.0, "Small"),
        ];
        let segments = vec![segment(1, 120, 200, 380), segment(2, 385, 400, 420)];
        let matches = match_segments(&records, &segments);
        assert_eq!(matches[0].unwrap().name.as_deref(), Some("Big"));
        assert_eq!(matches[1].unwrap().name.as_deref(), Some("Small"));
    }
}
