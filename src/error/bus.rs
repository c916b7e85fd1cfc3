pub type Result<T, E = BusError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("engine stopped")]
    /// The engine loop has terminated; the bus accepts no further
    /// submissions. Results already produced stay fetchable.
    EngineStopped,
}
