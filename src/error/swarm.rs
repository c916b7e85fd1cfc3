use crate::error::hashtree::CheckpointError;
use crate::error::live::LiveError;
use crate::SwarmId;

pub type Result<T, E = SwarmError> = std::result::Result<T, E>;

/// Error type for swarm lifecycle operations.
///
/// These errors are non-fatal to the engine: a failure in one swarm never
/// aborts processing of other swarms.
#[derive(Debug, thiserror::Error)]
pub enum SwarmError {
    #[error("hash mismatch: content hashes to {computed}, wanted {expected}")]
    /// The content on disk does not match the requested identifier.
    /// The session enters its failed state.
    HashMismatch {
        expected: SwarmId,
        computed: SwarmId,
    },

    #[error("invalid state: swarm is {0}")]
    /// Operation against a closed or failed session.
    InvalidState(&'static str),

    #[error("no such swarm")]
    /// The identifier maps to no open session.
    NotFound,

    #[error("cannot derive identifier from empty content")]
    /// Seeding from disk needs at least one chunk; an empty file's derived
    /// identifier would collide with the all-zero sentinel.
    EmptyFile,

    #[error("not a live swarm")]
    /// A live-only operation was applied to a static session.
    NotLive,

    #[error("{0}")]
    /// The live source rejected an append.
    Live(LiveError),

    #[error("{0}")]
    /// Checkpoint load/save failure that was not recoverable by rebuild.
    Checkpoint(CheckpointError),

    #[error("{0}")]
    /// An IO error occurred.
    Io(std::io::Error),
}

impl From<std::io::Error> for SwarmError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<LiveError> for SwarmError {
    fn from(value: LiveError) -> Self {
        Self::Live(value)
    }
}

impl From<CheckpointError> for SwarmError {
    fn from(value: CheckpointError) -> Self {
        Self::Checkpoint(value)
    }
}
