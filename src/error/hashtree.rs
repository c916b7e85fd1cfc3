pub type Result<T, E = CheckpointError> = std::result::Result<T, E>;

/// Error type returned on failed checkpoint loads.
///
/// Any of these invalidates the entire checkpoint, never a part of it;
/// the caller falls back to a full rebuild from the content file.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint files missing")]
    /// One or both sidecar files do not exist.
    Missing,

    #[error("bad checkpoint magic")]
    /// The header does not start with the expected magic bytes.
    BadMagic,

    #[error("unsupported checkpoint version {0}")]
    /// The format version is newer than this build understands.
    BadVersion(u16),

    #[error("checkpoint truncated")]
    /// A sidecar file is shorter than its header claims.
    Truncated,

    #[error("chunk size mismatch")]
    /// The checkpoint was taken with a different chunk size.
    ChunkSizeMismatch,

    #[error("content size changed since checkpoint")]
    /// The recorded content length differs from the file's current size.
    SizeMismatch,

    #[error("content modified since checkpoint")]
    /// The content file's modification time no longer matches the one
    /// recorded at checkpoint time.
    Modified,

    #[error("progress counters disagree with bitmap")]
    /// The recorded complete counters do not match the verified bitmap.
    CounterMismatch,

    #[error("root hash mismatch")]
    /// The stored hashes do not reduce to the expected root.
    RootMismatch,

    #[error("{0}")]
    /// An IO error occurred.
    Io(std::io::Error),
}

impl From<std::io::Error> for CheckpointError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}
