//! Error kinds for the analysis pipeline
//!
//! Every failure mode the pipeline can surface maps to exactly one of
//! these variants. The string tags and exit codes are part of the
//! external contract and must stay stable across releases.

use thiserror::Error;

/// Top-level error type for the analysis pipeline.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Header, offset or size inconsistency in the capture file.
    #[error("malformed capture: {0}")]
    MalformedCapture(String),

    /// A channel descriptor carries a type code the decoder does not know.
    #[error("unsupported type code {code} for channel '{name}'")]
    UnsupportedChannelType { name: String, code: i32 },

    /// A channel required by the pipeline is absent from the capture.
    #[error("required channel '{0}' missing from capture")]
    MissingChannel(String),

    /// All laps were rejected by the normaliser or the pace filter.
    #[error("no usable lap after filtering")]
    NoUsableLap,

    /// The track store could not be opened.
    #[error("track store unavailable: {0}")]
    TrackStoreUnavailable(String),

    /// A landmark import transaction aborted; prior state is intact.
    #[error("landmark seeding failed: {0}")]
    SeedingFailed(String),

    /// Cooperative cancellation was observed between stages.
    #[error("analysis cancelled")]
    Cancelled,

    /// An internal invariant was violated. Never recoverable.
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl AnalysisError {
    /// Stable string tag for logs and machine consumers.
    pub fn tag(&self) -> &'static str {
        match self {
            AnalysisError::MalformedCapture(_) => "MalformedCapture",
            AnalysisError::UnsupportedChannelType { .. } => "UnsupportedChannelType",
            AnalysisError::MissingChannel(_) => "MissingChannel",
            AnalysisError::NoUsableLap => "NoUsableLap",
            AnalysisError::TrackStoreUnavailable(_) => "TrackStoreUnavailable",
            AnalysisError::SeedingFailed(_) => "SeedingFailed",
            AnalysisError::Cancelled => "Cancelled",
            AnalysisError::Internal(_) => "Internal",
        }
    }

    /// Process exit code when the analyser runs as a CLI tool.
    pub fn exit_code(&self) -> i32 {
        match self {
            AnalysisError::MalformedCapture(_)
            | AnalysisError::UnsupportedChannelType { .. }
            | AnalysisError::MissingChannel(_) => 2,
            AnalysisError::NoUsableLap => 3,
            AnalysisError::TrackStoreUnavailable(_) => 4,
            _ => 1,
        }
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        AnalysisError::MalformedCapture(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AnalysisError::Internal(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_are_stable() {
        assert_eq!(AnalysisError::malformed("x").tag(), "MalformedCapture");
        assert_eq!(AnalysisError::NoUsableLap.tag(), "NoUsableLap");
        assert_eq!(AnalysisError::Cancelled.tag(), "Cancelled");
        assert_eq!(
            AnalysisError::UnsupportedChannelType {
                name: "Speed".into(),
                code: 9
            }
            .tag(),
            "UnsupportedChannelType"
        );
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(AnalysisError::malformed("x").exit_code(), 2);
        assert_eq!(AnalysisError::MissingChannel("Lap".into()).exit_code(), 2);
        assert_eq!(AnalysisError::NoUsableLap.exit_code(), 3);
        assert_eq!(
            AnalysisError::TrackStoreUnavailable("locked".into()).exit_code(),
            4
        );
        assert_eq!(AnalysisError::Cancelled.exit_code(), 1);
        assert_eq!(AnalysisError::internal("bug").exit_code(), 1);
    }
}
