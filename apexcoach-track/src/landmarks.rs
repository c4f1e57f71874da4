//! Landmarks dataset model and translation tables
//!
//! The corner-names dataset is a third-party JSON document keyed by
//! simulator-specific track names. Two tables translate those keys to
//! native track ids: a direct map for entries that carry the native
//! key, and a cross-sim map that claims entries only reachable through
//! Project Cars / Assetto Corsa / rFactor key fields under canonical
//! `xsim_` keys. A direct match always wins over a cross-sim match for
//! the same track.

use serde::Deserialize;

/// One landmark: a named stretch of track with start/end distances.
#[derive(Debug, Clone, Deserialize)]
pub struct Landmark {
    #[serde(rename = "landmarkName")]
    pub name: String,
    #[serde(rename = "distanceRoundLapStart")]
    pub distance_start_m: f64,
    #[serde(rename = "distanceRoundLapEnd")]
    pub distance_end_m: f64,
    #[serde(rename = "isCommonOvertakingSpot", default)]
    pub is_common_overtaking_spot: bool,
}

/// One dataset entry with its per-simulator key variants.
#[derive(Debug, Clone, Deserialize)]
pub struct LandmarkEntry {
    #[serde(rename = "irTrackName", default)]
    pub ir_track_name: Option<String>,
    #[serde(rename = "pcarsTrackName", default)]
    pub pcars_track_name: Option<String>,
    #[serde(rename = "acTrackNames", default)]
    pub ac_track_names: Vec<String>,
    #[serde(rename = "rf1TrackNames", default)]
    pub rf1_track_names: Vec<String>,
    #[serde(rename = "trackLandmarks", default)]
    pub landmarks: Vec<Landmark>,
}

/// The dataset snapshot document.
#[derive(Debug, Clone, Deserialize)]
pub struct LandmarksSnapshot {
    #[serde(rename = "TrackLandmarksData", default)]
    pub tracks: Vec<LandmarkEntry>,
}

/// Dataset key -> (native track id, display name, config).
/// Ids verified from real capture files where available.
pub const DIRECT_TRACK_MAP: &[(&str, &str, &str, Option<&str>)] = &[
    ("bathurst", "219", "Mount Panorama Circuit", None),
    ("spa up", "523", "Circuit de Spa-Francorchamps", Some("Grand Prix")),
    ("roadamerica full", "18", "Road America", Some("Full Course")),
    ("lagunaseca", "47", "WeatherTech Raceway Laguna Seca", None),
    ("monza full", "239", "Autodromo Nazionale Monza", None),
    ("sebring international", "95", "Sebring International Raceway", Some("International")),
    ("sebring club course", "233", "Sebring International Raceway", Some("Club")),
    ("phillipisland", "167", "Phillip Island Circuit", None),
    ("hungaroring", "225", "Hungaroring", None),
    ("imola gp", "283", "Autodromo Enzo e Dino Ferrari", Some("Grand Prix")),
    ("spielberg gp", "299", "Red Bull Ring", Some("Grand Prix")),
    ("zandvoort grandprix", "341", "Circuit Zandvoort", Some("Grand Prix")),
    ("knockhill international", "353", "Knockhill Racing Circuit", Some("International")),
    ("montreal", "125", "Circuit Gilles Villeneuve", None),
    ("limerock full", "111", "Lime Rock Park", Some("Full Course")),
    ("limerock chicane", "112", "Lime Rock Park", Some("Chicane")),
    ("zolder gp", "343", "Circuit Zolder", Some("Grand Prix")),
    ("oulton fosters", "293", "Oulton Park", Some("Fosters")),
    ("oulton international", "294", "Oulton Park", Some("International")),
    ("oulton inthislop", "295", "Oulton Park", Some("International with Hislop")),
    ("oulton islandhistoric", "296", "Oulton Park", Some("Island Historic")),
    // Canonical keys for entries only reachable through cross-sim names
    ("xsim_brands_gp", "145", "Brands Hatch Circuit", Some("Grand Prix")),
    ("xsim_nurburgring_gp", "187", "Nürburgring Grand-Prix-Strecke", None),
    ("xsim_silverstone_national", "268", "Silverstone Circuit", Some("National")),
    ("xsim_lemans_24h", "169", "Circuit des 24 Heures du Mans", None),
    ("xsim_vir_grand", "371", "Virginia International Raceway", Some("Grand Course")),
    ("xsim_donington_gp", "351", "Donington Park Racing Circuit", Some("Grand Prix")),
    ("xsim_suzuka", "310", "Suzuka International Racing Course", None),
    ("xsim_hockenheim_gp", "207", "Hockenheimring Baden-Württemberg", Some("Grand Prix")),
    ("xsim_mid_ohio_chicane", "281", "Mid-Ohio Sports Car Course", Some("Full Course")),
];

/// Which alternate-simulator field identifies a cross-sim entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossSimField {
    Pcars,
    AssettoCorsa,
    Rf1,
}

/// Canonical `xsim_` key -> the alternate-simulator key that claims it.
/// Only the first dataset entry matching a key is used.
pub const CROSS_SIM_MAP: &[(&str, CrossSimField, &str)] = &[
    ("xsim_brands_gp", CrossSimField::Pcars, "Brands Hatch:GP"),
    ("xsim_nurburgring_gp", CrossSimField::Pcars, "Nurburgring:Grand Prix"),
    ("xsim_silverstone_national", CrossSimField::Pcars, "Silverstone:National"),
    ("xsim_lemans_24h", CrossSimField::Pcars, "Le Mans:Circuit des 24 Heures du Mans"),
    ("xsim_vir_grand", CrossSimField::Rf1, "VIR Grand Course"),
    ("xsim_donington_gp", CrossSimField::Pcars, "Donington Park:Grand Prix"),
    ("xsim_suzuka", CrossSimField::AssettoCorsa, "ks_suzuka"),
    ("xsim_hockenheim_gp", CrossSimField::Pcars, "Hockenheim:Grand Prix"),
    ("xsim_mid_ohio_chicane", CrossSimField::Rf1, "Mid-Ohio Sports Car Course with Chicane"),
];

/// Proper display names the title-casing fallback would mangle.
pub const NAME_OVERRIDES: &[(&str, &str)] = &[
    ("eau_rouge", "Eau Rouge"),
    ("radillion", "Raidillon"),
    ("mcphillamy_park", "McPhillamy Park"),
    ("les_combes", "Les Combes"),
    ("lesmos1", "Lesmo 1"),
    ("lesmos2", "Lesmo 2"),
    ("la_source", "La Source"),
    ("variante_del_rettifilo", "Variante del Rettifilo"),
    ("variante_della_roggia", "Variante della Roggia"),
    ("curva_grande", "Curva Grande"),
    ("curva_parabolica", "Curva Parabolica"),
    ("fangio_chicane", "Fangio Chicane"),
    ("the_andretti_hairpin", "Andretti Hairpin"),
    ("the_corkscrew", "The Corkscrew"),
    ("the_cutting", "The Cutting"),
    ("the_dipper", "The Dipper"),
    ("the_esses", "The Esses"),
    ("the_chase", "The Chase"),
    ("the_sweep", "The Sweep"),
    ("the_kink", "The Kink"),
    ("the_carousel", "The Carousel"),
    ("the_hairpin", "The Hairpin"),
    ("le_mans", "Le Mans"),
    ("rainey_curve", "Rainey Curve"),
    ("bill_mitchell_bend", "Bill Mitchell Bend"),
    ("paddock_hill", "Paddock Hill Bend"),
    ("graham_hill_bend", "Graham Hill Bend"),
    ("dingle_dell", "Dingle Dell"),
    ("the_chicane", "The Chicane"),
    ("dunlop_curve", "Dunlop Curve"),
    ("dunlop_chicane", "Dunlop Chicane"),
    ("tetre_rouge", "Tertre Rouge"),
    ("playstation_chicane", "Playstation Chicane"),
    ("michelin_chicane", "Michelin Chicane"),
    ("porsche_curves", "Porsche Curves"),
    ("the_first_ford_chicane", "Ford Chicane 1"),
    ("the_second_ford_chicane", "Ford Chicane 2"),
    ("nascar_bend", "NASCAR Bend"),
    ("left_hook", "Left Hook"),
    ("south_bend", "South Bend"),
    ("oak_tree", "Oak Tree"),
    ("roller_coaster", "Roller Coaster"),
    ("hog_pen", "Hog Pen"),
    ("the_craner_curves", "Craner Curves"),
    ("the_old_hairpin", "Old Hairpin"),
    ("melbourne_hairpin", "Melbourne Hairpin"),
    ("degner1", "Degner 1"),
    ("degner2", "Degner 2"),
    ("130R", "130R"),
    ("spoon_curve", "Spoon Curve"),
    ("nord_kurve", "Nordkurve"),
    ("mobile_1", "Mobil 1"),
    ("sud_kurve", "Südkurve"),
    ("thunder_valley", "Thunder Valley"),
];

/// Look up the native track mapping for a dataset key.
pub fn native_track_mapping(key: &str) -> Option<(&'static str, &'static str, Option<&'static str>)> {
    DIRECT_TRACK_MAP
        .iter()
        .find(|(k, _, _, _)| *k == key)
        .map(|(_, id, name, config)| (*id, *name, *config))
}

/// Reverse lookup: the dataset key for a native track id.
pub fn dataset_key_for_track_id(track_id: &str) -> Option<&'static str> {
    DIRECT_TRACK_MAP
        .iter()
        .find(|(_, id, _, _)| *id == track_id)
        .map(|(k, _, _, _)| *k)
}

/// Resolve a dataset entry without a native key through the cross-sim
/// tables. Returns the canonical `xsim_` key, or `None`.
pub fn cross_sim_key(entry: &LandmarkEntry) -> Option<&'static str> {
    for &(canonical, field, expected) in CROSS_SIM_MAP {
        let matched = match field {
            CrossSimField::Pcars => entry
                .pcars_track_name
                .as_deref()
                .is_some_and(|v| v == expected),
            CrossSimField::AssettoCorsa => entry.ac_track_names.iter().any(|v| v == expected),
            CrossSimField::Rf1 => entry.rf1_track_names.iter().any(|v| v == expected),
        };
        if matched {
            return Some(canonical);
        }
    }
    None
}

/// Convert a dataset's snake_case landmark name to display form, with
/// overrides for proper names.
pub fn format_corner_name(raw: &str) -> String {
    if let Some((_, display)) = NAME_OVERRIDES.iter().find(|(k, _)| *k == raw) {
        return (*display).to_string();
    }
    raw.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_map_has_verified_ids() {
        assert_eq!(native_track_mapping("bathurst").unwrap().0, "219");
        assert_eq!(native_track_mapping("spa up").unwrap().0, "523");
        assert!(native_track_mapping("imaginary circuit").is_none());
        assert!(DIRECT_TRACK_MAP.len() >= 21);
    }

    #[test]
    fn test_reverse_lookup() {
        assert_eq!(dataset_key_for_track_id("219"), Some("bathurst"));
        assert_eq!(dataset_key_for_track_id("310"), Some("xsim_suzuka"));
        assert_eq!(dataset_key_for_track_id("0"), None);
    }

    #[test]
    fn test_cross_sim_resolution() {
        let entry = LandmarkEntry {
            ir_track_name: None,
            pcars_track_name: Some("Brands Hatch:GP".to_string()),
            ac_track_names: vec![],
            rf1_track_names: vec![],
            landmarks: vec![],
        };
        assert_eq!(cross_sim_key(&entry), Some("xsim_brands_gp"));

        let entry_ac = LandmarkEntry {
            ir_track_name: None,
            pcars_track_name: None,
            ac_track_names: vec!["ks_suzuka".to_string()],
            rf1_track_names: vec![],
            landmarks: vec![],
        };
        assert_eq!(cross_sim_key(&entry_ac), Some("xsim_suzuka"));

        let unknown = LandmarkEntry {
            ir_track_name: None,
            pcars_track_name: Some("Nowhere:Short".to_string()),
            ac_track_names: vec![],
            rf1_track_names: vec![],
            landmarks: vec![],
        };
        assert_eq!(cross_sim_key(&unknown), None);
    }

    #[test]
    fn test_every_cross_sim_key_has_a_direct_mapping() {
        for (canonical, _, _) in CROSS_SIM_MAP {
            assert!(
                native_track_mapping(canonical).is_some(),
                "{canonical} missing from DIRECT_TRACK_MAP"
            );
        }
    }

    #[test]
    fn test_format_corner_name() {
        assert_eq!(format_corner_name("eau_rouge"), "Eau Rouge");
        assert_eq!(format_corner_name("radillion"), "Raidillon");
        assert_eq!(format_corner_name("tetre_rouge"), "Tertre Rouge");
        assert_eq!(format_corner_name("130R"), "130R");
        assert_eq!(format_corner_name("the_craner_curves"), "Craner Curves");
        assert_eq!(format_corner_name("paddock_hill"), "Paddock Hill Bend");
        // Fallback title-casing
        assert_eq!(format_corner_name("turn_one_complex"), "Turn One Complex");
    }

    #[test]
    fn test_snapshot_deserializes() {
        let json = r#"{
            "TrackLandmarksData": [
                {
                    "irTrackName": "bathurst",
                    "trackLandmarks": [
                        {"landmarkName": "mcphillamy_park",
                         "distanceRoundLapStart": 2100.0,
                         "distanceRoundLapEnd": 2400.0,
                         "isCommonOvertakingSpot": false}
                    ]
                },
                {
                    "pcarsTrackName": "Brands Hatch:GP",
                    "trackLandmarks": [
                        {"landmarkName": "paddock_hill",
                         "distanceRoundLapStart": 100.0,
                         "distanceRoundLapEnd": 300.0}
                    ]
                }
            ]
        }"#;
        let snapshot: LandmarksSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.tracks.len(), 2);
        assert_eq!(snapshot.tracks[0].ir_track_name.as_deref(), Some("bathurst"));
        assert_eq!(snapshot.tracks[0].landmarks[0].name, "mcphillamy_park");
        assert!(!snapshot.tracks[1].landmarks[0].is_common_overtaking_spot);
    }
}
