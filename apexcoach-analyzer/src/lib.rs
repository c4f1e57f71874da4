//! ApexCoach analyser
//!
//! Orchestrates the full pipeline for one capture file: decode, split,
//! normalise, filter, segment, name, compare, rank. The single output
//! is the `CoachingPayload` consumed by external collaborators.

pub mod analyzer;

pub use analyzer::{Analyzer, AnalyzerOptions};
