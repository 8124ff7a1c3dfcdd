//! AutoDJ error types
//!
//! Every variant here is recovered locally by the orchestrator. Queue
//! exhaustion is deliberately absent: it is the normal session-end path.

use thiserror::Error;

use crate::types::TrackId;

/// Errors raised by the analyzer, engine and orchestrator
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AutoDjError {
    /// The analyzer was given a track it cannot score
    #[error("Insufficient analysis data for track {track}: {reason}")]
    InsufficientData { track: TrackId, reason: String },

    /// An out point matched but the target carries no compatible in point
    #[error("No matching mix-in on {target} for mix-out at {out_time:.1}s (score {score:.0})")]
    NoMatchingMixIn {
        target: TrackId,
        out_time: f64,
        score: f32,
    },

    /// A transition name outside the closed archetype set
    #[error("Unknown transition archetype: {0}")]
    UnknownArchetype(String),

    /// A second transition was requested while one is still running
    #[error("A transition is already in flight")]
    TransitionInFlight,

    /// Neither deck nor the queue holds a track to start with
    #[error("No playable track on either deck or in the queue")]
    NoPlayableTrack,

    /// The mixer failed to finalize or persist the session recording
    #[error("Recording error: {0}")]
    Recording(String),
}

/// Result type for AutoDJ operations
pub type Result<T> = std::result::Result<T, AutoDjError>;
