use tokio::io::Error as IoError;
use tokio::sync::mpsc::error::SendError;

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("engine already running")]
    /// The run loop was entered a second time while an instance was
    /// active. The loop is not reentrant.
    AlreadyRunning,

    #[error("engine not initialized")]
    /// An operation was attempted before `init`.
    NotInitialized,

    #[error("channel error")]
    /// The channel on which some component in engine was
    /// listening or sending died.
    Channel,

    #[error("{0}")]
    /// An Io error occurred.
    Io(std::io::Error),
}

impl From<IoError> for EngineError {
    fn from(value: IoError) -> Self {
        Self::Io(value)
    }
}

impl<T> From<SendError<T>> for EngineError {
    fn from(_: SendError<T>) -> Self {
        Self::Channel
    }
}
