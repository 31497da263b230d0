//! Error types for charla-gateway

use thiserror::Error;

/// Result type alias using charla-gateway Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to the inference gateway
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The gateway answered with a non-2xx status
    #[error("Error {status}: {message}")]
    Gateway {
        status: u16,
        message: String,
        details: Option<String>,
    },
}

impl Error {
    /// Create a gateway error from a status and message
    pub fn gateway(status: u16, message: impl Into<String>, details: Option<String>) -> Self {
        Self::Gateway {
            status,
            message: message.into(),
            details,
        }
    }

    /// Human-readable description, used as the content of the assistant
    /// message that replaces the answer when a send operation fails.
    pub fn user_message(&self) -> String {
        match self {
            Error::Gateway {
                message,
                details: Some(details),
                ..
            } => format!("Error: {message}. {details}"),
            Error::Gateway { message, .. } => format!("Error: {message}."),
            Error::Http(e) if e.is_timeout() => {
                "Error: el modelo tardó demasiado en responder.".to_string()
            }
            other => format!("Error: {other}. Revisa la conexión con el servidor de inferencia."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_error_user_message_includes_details() {
        let e = Error::gateway(500, "boom", Some("el servidor explotó".into()));
        assert_eq!(e.user_message(), "Error: boom. el servidor explotó");
    }

    #[test]
    fn test_gateway_error_user_message_without_details() {
        let e = Error::gateway(404, "no encontrado", None);
        assert_eq!(e.user_message(), "Error: no encontrado.");
    }

    #[test]
    fn test_json_error_user_message_mentions_connection() {
        let e = Error::Json(serde_json::from_str::<serde_json::Value>("{").unwrap_err());
        assert!(e.user_message().starts_with("Error: "));
        assert!(e.user_message().contains("Revisa la conexión"));
    }
}
