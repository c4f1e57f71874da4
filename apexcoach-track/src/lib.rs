//! Track database for ApexCoach
//!
//! Persists tracks and named corners, seeds them from a third-party
//! landmarks dataset snapshot, and matches detected corner segments to
//! named corner records.

pub mod landmarks;
pub mod models;
pub mod registry;
pub mod seeder;
pub mod store;

pub use models::{CornerRecord, TrackRecord};
pub use registry::match_segments;
pub use seeder::LandmarkSeeder;
pub use store::TrackStore;
