//! User-adjustable generation settings.

use serde::{Deserialize, Serialize};

/// Settings applied to every send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Stream the response instead of waiting for the full completion.
    pub streaming: bool,
    /// Surface the model's reasoning section to the user.
    pub show_reasoning: bool,
    /// Sampling temperature.
    pub temperature: f64,
    /// Prepended as the system message of a conversation's first send.
    pub system_prompt: String,
    /// Response token cap. `None` leaves the model unbounded.
    pub max_tokens: Option<u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            streaming: true,
            show_reasoning: true,
            temperature: 0.7,
            system_prompt: "Eres un asistente útil y conciso.".to_string(),
            max_tokens: None,
        }
    }
}
