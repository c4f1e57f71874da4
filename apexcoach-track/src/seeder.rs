//! Landmark seeding
//!
//! Imports the landmarks dataset snapshot into the track store. The
//! snapshot is a file an operator refreshes out of band; the core never
//! fetches it over the network. Each track seeds in one transaction so
//! a failed import leaves prior state intact.

use crate::landmarks::{
    cross_sim_key, dataset_key_for_track_id, format_corner_name, native_track_mapping,
    LandmarkEntry, LandmarksSnapshot,
};
use crate::models::{CornerRecord, TrackRecord, TrackType};
use crate::store::TrackStore;
use apexcoach_core::error::AnalysisError;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

pub struct LandmarkSeeder<'a> {
    store: &'a TrackStore,
}

/// Outcome of a bulk seed.
#[derive(Debug, Default)]
pub struct SeedReport {
    pub seeded: Vec<String>,
    pub skipped: Vec<String>,
}

impl<'a> LandmarkSeeder<'a> {
    pub fn new(store: &'a TrackStore) -> Self {
        LandmarkSeeder { store }
    }

    /// Load a dataset snapshot from disk.
    pub fn load_snapshot(path: &Path) -> Result<LandmarksSnapshot, AnalysisError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AnalysisError::SeedingFailed(format!("cannot read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            AnalysisError::SeedingFailed(format!("snapshot parse error: {e}"))
        })
    }

    /// Resolve snapshot entries to canonical dataset keys. Entries with
    /// a native key win outright; cross-sim entries claim a canonical
    /// key only when no direct entry did, first match only.
    fn resolve_entries(snapshot: &LandmarksSnapshot) -> Vec<(String, &LandmarkEntry)> {
        let mut resolved: Vec<(String, &LandmarkEntry)> = Vec::new();
        let mut claimed: HashSet<&str> = HashSet::new();

        for entry in &snapshot.tracks {
            if entry.landmarks.is_empty() {
                continue;
            }
            if let Some(key) = entry.ir_track_name.as_deref() {
                let key = key.trim();
                if !key.is_empty() {
                    claimed.insert(key);
                    resolved.push((key.to_string(), entry));
                }
            }
        }

        for entry in &snapshot.tracks {
            if entry.landmarks.is_empty() || entry.ir_track_name.is_some() {
                continue;
            }
            if let Some(key) = cross_sim_key(entry) {
                if claimed.insert(key) {
                    resolved.push((key.to_string(), entry));
                }
            }
        }

        resolved
    }

    /// Seed every snapshot entry with a known native mapping. Tracks
    /// that already carry named corners are skipped.
    pub fn seed_all(&self, snapshot: &LandmarksSnapshot) -> Result<SeedReport, AnalysisError> {
        let mut report = SeedReport::default();
        for (key, entry) in Self::resolve_entries(snapshot) {
            if self.seed_entry(&key, entry, false)? {
                report.seeded.push(key);
            } else {
                report.skipped.push(key);
            }
        }
        info!(
            seeded = report.seeded.len(),
            skipped = report.skipped.len(),
            "landmark seeding finished"
        );
        Ok(report)
    }

    /// Lazy-seeding entry point: seed the one track the analyser is
    /// currently looking at. Returns false when the dataset has no
    /// entry for it, which is not an error.
    pub fn seed_track_by_id(
        &self,
        snapshot: &LandmarksSnapshot,
        track_id: &str,
    ) -> Result<bool, AnalysisError> {
        let Some(key) = dataset_key_for_track_id(track_id) else {
            debug!(track_id, "no dataset key for track, leaving unnamed");
            return Ok(false);
        };
        for (resolved_key, entry) in Self::resolve_entries(snapshot) {
            if resolved_key == key {
                return self.seed_entry(&resolved_key, entry, false);
            }
        }
        Ok(false)
    }

    fn seed_entry(
        &self,
        key: &str,
        entry: &LandmarkEntry,
        force: bool,
    ) -> Result<bool, AnalysisError> {
        let Some((track_id, display_name, config)) = native_track_mapping(key) else {
            return Ok(false);
        };

        let already_named = self
            .store
            .has_named_corners(track_id)
            .map_err(|e| AnalysisError::SeedingFailed(e.to_string()))?;
        if already_named && !force {
            return Ok(false);
        }

        self.store
            .upsert_track(&TrackRecord {
                track_id: track_id.to_string(),
                name: display_name.to_string(),
                config: config.map(String::from),
                length_meters: 0.0,
                track_type: TrackType::Road,
                character: None,
                notes: None,
            })
            .map_err(|e| AnalysisError::SeedingFailed(e.to_string()))?;

        let corners = landmarks_to_corners(track_id, entry);
        self.store
            .replace_corners(track_id, &corners)
            .map_err(|e| AnalysisError::SeedingFailed(e.to_string()))?;

        info!(track_id, corners = corners.len(), "seeded {display_name}");
        Ok(true)
    }
}

impl TrackStore {
    /// Import a landmarks dataset snapshot file into this store.
    pub fn seed_from_landmarks_dataset(&self, source: &Path) -> Result<SeedReport, AnalysisError> {
        let snapshot = LandmarkSeeder::load_snapshot(source)?;
        LandmarkSeeder::new(self).seed_all(&snapshot)
    }
}

/// Convert an entry's landmarks to corner records: display-formatted
/// names, sorted by start distance, overlaps clipped to touch.
fn landmarks_to_corners(track_id: &str, entry: &LandmarkEntry) -> Vec<CornerRecord> {
    let mut landmarks = entry.landmarks.clone();
    landmarks.sort_by(|a, b| a.distance_start_m.total_cmp(&b.distance_start_m));

    let mut corners: Vec<CornerRecord> = Vec::with_capacity(landmarks.len());
    let mut prev_end = f64::NEG_INFINITY;

    for lm in &landmarks {
        let start = lm.distance_start_m.max(prev_end);
        if start >= lm.distance_end_m {
            // Fully swallowed by the previous landmark; drop it.
            continue;
        }
        prev_end = lm.distance_end_m;

        corners.push(CornerRecord {
            corner_id: None,
            track_id: track_id.to_string(),
            corner_number: corners.len() as i64 + 1,
            name: Some(format_corner_name(&lm.name)),
            distance_start_meters: start,
            distance_end_meters: lm.distance_end_m,
            corner_type: None,
            notes: lm
                .is_common_overtaking_spot
                .then(|| "Common overtaking spot".to_string()),
        });
    }
    corners
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::Landmark;

    fn snapshot_json() -> LandmarksSnapshot {
        let json = r#"{
            "TrackLandmarksData": [
                {
                    "irTrackName": "bathurst",
                    "trackLandmarks": [
                        {"landmarkName": "the_cutting",
                         "distanceRoundLapStart": 1300.0, "distanceRoundLapEnd": 1500.0},
                        {"landmarkName": "mcphillamy_park",
                         "distanceRoundLapStart": 2100.0, "distanceRoundLapEnd": 2400.0},
                        {"landmarkName": "the_chase",
                         "distanceRoundLapStart": 3700.0, "distanceRoundLapEnd": 4000.0,
                         "isCommonOvertakingSpot": true}
                    ]
                },
                {
                    "irTrackName": "spa up",
                    "trackLandmarks": [
                        {"landmarkName": "la_source",
                         "distanceRoundLapStart": 200.0, "distanceRoundLapEnd": 420.0},
                        {"landmarkName": "eau_rouge",
                         "distanceRoundLapStart": 950.0, "distanceRoundLapEnd": 1250.0},
                        {"landmarkName": "radillion",
                         "distanceRoundLapStart": 1250.0, "distanceRoundLapEnd": 1450.0}
                    ]
                },
                {
                    "pcarsTrackName": "Brands Hatch:GP",
                    "trackLandmarks": [
                        {"landmarkName": "paddock_hill",
                         "distanceRoundLapStart": 80.0, "distanceRoundLapEnd": 320.0}
                    ]
                },
                {
                    "irTrackName": "some track nobody maps",
                    "trackLandmarks": [
                        {"landmarkName": "turn_1",
                         "distanceRoundLapStart": 10.0, "distanceRoundLapEnd": 90.0}
                    ]
                }
            ]
        }"#;
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_seed_all_known_tracks() {
        let store = TrackStore::open_in_memory().unwrap();
        let seeder = LandmarkSeeder::new(&store);
        let report = seeder.seed_all(&snapshot_json()).unwrap();

        assert_eq!(report.seeded.len(), 3, "{report:?}");
        assert!(report.skipped.contains(&"some track nobody maps".to_string()));

        let bathurst = store.list_corners("219").unwrap();
        assert_eq!(bathurst.len(), 3);
        assert_eq!(bathurst[1].name.as_deref(), Some("McPhillamy Park"));
        assert_eq!(bathurst[2].name.as_deref(), Some("The Chase"));
        assert_eq!(
            bathurst[2].notes.as_deref(),
            Some("Common overtaking spot")
        );

        let spa = store.list_corners("523").unwrap();
        assert_eq!(spa[1].name.as_deref(), Some("Eau Rouge"));
        assert_eq!(spa[2].name.as_deref(), Some("Raidillon"));

        // Cross-sim entry landed under its canonical id
        let brands = store.list_corners("145").unwrap();
        assert_eq!(brands[0].name.as_deref(), Some("Paddock Hill Bend"));
    }

    #[test]
    fn test_seed_track_by_id_lazy_path() {
        let store = TrackStore::open_in_memory().unwrap();
        let seeder = LandmarkSeeder::new(&store);

        assert!(seeder.seed_track_by_id(&snapshot_json(), "219").unwrap());
        assert!(store.has_named_corners("219").unwrap());

        // Second run is a no-op: corners already named.
        assert!(!seeder.seed_track_by_id(&snapshot_json(), "219").unwrap());

        // Unknown track id is not an error.
        assert!(!seeder.seed_track_by_id(&snapshot_json(), "424242").unwrap());
    }

    #[test]
    fn test_direct_match_beats_cross_sim() {
        // A snapshot where one entry claims suzuka natively and another
        // only via the Assetto Corsa key: the direct entry must win.
        let json = r#"{
            "TrackLandmarksData": [
                {
                    "irTrackName": "xsim_suzuka",
                    "trackLandmarks": [
                        {"landmarkName": "degner1",
                         "distanceRoundLapStart": 100.0, "distanceRoundLapEnd": 200.0}
                    ]
                },
                {
                    "acTrackNames": ["ks_suzuka"],
                    "trackLandmarks": [
                        {"landmarkName": "spoon_curve",
                         "distanceRoundLapStart": 300.0, "distanceRoundLapEnd": 400.0}
                    ]
                }
            ]
        }"#;
        let snapshot: LandmarksSnapshot = serde_json::from_str(json).unwrap();
        let store = TrackStore::open_in_memory().unwrap();
        LandmarkSeeder::new(&store).seed_all(&snapshot).unwrap();

        let corners = store.list_corners("310").unwrap();
        assert_eq!(corners.len(), 1);
        assert_eq!(corners[0].name.as_deref(), Some("Degner 1"));
    }

    #[test]
    fn test_overlapping_landmarks_clipped_to_touch() {
        let entry = LandmarkEntry {
            ir_track_name: Some("bathurst".to_string()),
            pcars_track_name: None,
            ac_track_names: vec![],
            rf1_track_names: vec![],
            landmarks: vec![
                Landmark {
                    name: "first".to_string(),
                    distance_start_m: 100.0,
                    distance_end_m: 300.0,
                    is_common_overtaking_spot: false,
                },
                Landmark {
                    name: "second".to_string(),
                    distance_start_m: 250.0,
                    distance_end_m: 500.0,
                    is_common_overtaking_spot: false,
                },
                Landmark {
                    name: "swallowed".to_string(),
                    distance_start_m: 260.0,
                    distance_end_m: 480.0,
                    is_common_overtaking_spot: false,
                },
            ],
        };
        let corners = landmarks_to_corners("219", &entry);
        assert_eq!(corners.len(), 2);
        assert_eq!(corners[0].distance_end_meters, 300.0);
        assert_eq!(corners[1].distance_start_meters, 300.0, "clipped to touch");
        for w in corners.windows(2) {
            assert!(w[0].distance_end_meters <= w[1].distance_start_meters);
        }
    }
}
