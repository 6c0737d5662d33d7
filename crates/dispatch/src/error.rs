pub type Result<T> = std::result::Result<T, Error>;

/// Errors building the delivery service. Pipeline outcomes are never errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Message(String),
}

impl courier_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

courier_common::impl_context!();
