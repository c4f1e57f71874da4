//! Capture decoding and telemetry analysis primitives
//!
//! This crate owns the front half of the coaching pipeline: decoding the
//! vendor binary capture format, splitting the sample stream into laps,
//! resampling laps onto a uniform distance grid, detecting corners on
//! the speed trace, and computing per-corner deltas between laps.

pub mod compare;
pub mod corners;
pub mod ibt;
pub mod normalize;
pub mod testutil;

pub use corners::{detect_corners, DetectionParams, DetectionPreset};
pub use ibt::{IbtCapture, RawLap};
pub use normalize::normalize_lap;
