//! Error types for charla-app

use thiserror::Error;

/// Result type alias using charla-app Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the application layer
#[derive(Error, Debug)]
pub enum Error {
    /// Gateway request failed
    #[error("Gateway error: {0}")]
    Gateway(#[from] charla_gateway::Error),

    /// Reading or writing persisted state failed
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// Persisted state could not be decoded
    #[error("Storage decode error: {0}")]
    StorageDecode(#[from] serde_json::Error),

    /// A send was attempted with nothing to say
    #[error("empty prompt")]
    EmptyPrompt,

    /// A send was attempted while another is in flight
    #[error("a generation is already in progress")]
    Busy,

    /// The referenced conversation does not exist
    #[error("conversation not found: {0}")]
    ConversationNotFound(String),
}
