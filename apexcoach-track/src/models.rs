//! Persistent track and corner records

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackType {
    Road,
    Street,
    Oval,
}

impl TrackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackType::Road => "road",
            TrackType::Street => "street",
            TrackType::Oval => "oval",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "road" => Some(TrackType::Road),
            "street" => Some(TrackType::Street),
            "oval" => Some(TrackType::Oval),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackCharacter {
    Momentum,
    PointAndShoot,
    Mixed,
}

impl TrackCharacter {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackCharacter::Momentum => "momentum",
            TrackCharacter::PointAndShoot => "point_and_shoot",
            TrackCharacter::Mixed => "mixed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "momentum" => Some(TrackCharacter::Momentum),
            "point_and_shoot" => Some(TrackCharacter::PointAndShoot),
            "mixed" => Some(TrackCharacter::Mixed),
            _ => None,
        }
    }
}

/// A track configuration known to the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackRecord {
    pub track_id: String,
    pub name: String,
    pub config: Option<String>,
    pub length_meters: f64,
    pub track_type: TrackType,
    pub character: Option<TrackCharacter>,
    pub notes: Option<String>,
}

/// A named corner on a track. Within a track, corner numbers are unique
/// and records are ordered by `distance_start_meters`; intervals may
/// touch but never overlap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CornerRecord {
    pub corner_id: Option<i64>,
    pub track_id: String,
    pub corner_number: i64,
    pub name: Option<String>,
    pub distance_start_meters: f64,
    pub distance_end_meters: f64,
    pub corner_type: Option<String>,
    pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_type_round_trip() {
        for t in [TrackType::Road, TrackType::Street, TrackType::Oval] {
            assert_eq!(TrackType::parse(t.as_str()), Some(t));
        }
        assert_eq!(TrackType::parse("rally"), None);
    }

    #[test]
    fn test_character_round_trip() {
        for c in [
            TrackCharacter::Momentum,
            TrackCharacter::PointAndShoot,
            TrackCharacter::Mixed,
        ] {
            assert_eq!(TrackCharacter::parse(c.as_str()), Some(c));
        }
    }
}
