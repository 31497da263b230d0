//! Application state events

use serde::{Deserialize, Serialize};

/// Events emitted as the conversation state changes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateEvent {
    /// A conversation's messages or title changed
    Updated { conversation_id: String },

    /// A send operation started generating
    GenerationStarted { conversation_id: String },

    /// The in-flight send operation finished (success or failure)
    GenerationEnded { conversation_id: String },

    /// Settings were modified
    SettingsChanged,
}
