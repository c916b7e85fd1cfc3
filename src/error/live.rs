pub type Result<T, E = LiveError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum LiveError {
    #[error("out of order append: expected offset {expected}, got {got}")]
    /// Live content is accepted strictly in order; a unit can only be
    /// chained once its predecessor is known. Already accepted state is
    /// untouched and the caller may retry with the expected offset.
    OutOfOrder { expected: u64, got: u64 },

    #[error("empty append")]
    /// A unit must carry at least one byte; an empty unit would not
    /// advance the chain.
    Empty,

    #[error("{0}")]
    /// An IO error occurred.
    Io(std::io::Error),
}

impl From<std::io::Error> for LiveError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}
