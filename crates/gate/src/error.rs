/// Crate-wide result type for content gate construction.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A moderation rule could not be compiled.
    #[error("invalid moderation rule \"{code}\": {source}")]
    InvalidRule {
        code: String,
        #[source]
        source: regex::Error,
    },
}
