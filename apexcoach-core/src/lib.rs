//! ApexCoach Core Library
//!
//! This crate provides the shared data model for the telemetry analysis
//! pipeline: normalised laps, corner segments, per-corner deltas, the
//! coaching payload contract, and the error kinds every stage reports.

pub mod error;
pub mod model;

pub use error::AnalysisError;
pub use model::{CoachingPayload, CornerDelta, CornerSegment, NormalizedLap, PriorityCorner};
