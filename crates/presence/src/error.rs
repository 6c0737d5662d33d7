pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to encode event frame: {0}")]
    Encode(#[from] serde_json::Error),

    /// The transport could not attempt delivery at all.
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}
