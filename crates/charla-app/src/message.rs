//! Conversation data model.

use serde::{Deserialize, Serialize};

/// Title given to a conversation before its first prompt names it.
pub const NEW_CHAT_TITLE: &str = "Nuevo chat";

/// Maximum characters of an attached text file carried into the prompt.
pub const MAX_FILE_CHARS: usize = 5000;

/// Characters of the first prompt used as the conversation title.
pub const TITLE_CHARS: usize = 30;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    /// Holds the model's deliberation text; shown to the user on request,
    /// never sent back to the model.
    Reasoning,
}

/// One message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Data-URI images attached to a user message. Stripped on persistence.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    /// Set when images were stripped so a reload can still show the marker.
    #[serde(default, skip_serializing_if = "is_false")]
    pub had_images: bool,
}

fn is_false(v: &bool) -> bool {
    !v
}

impl Message {
    pub fn user(content: impl Into<String>, images: Vec<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            images,
            had_images: false,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            images: vec![],
            had_images: false,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            images: vec![],
            had_images: false,
        }
    }

    pub fn reasoning(content: impl Into<String>) -> Self {
        Self {
            role: Role::Reasoning,
            content: content.into(),
            images: vec![],
            had_images: false,
        }
    }
}

/// One conversation thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    /// Creation time, milliseconds since the Unix epoch.
    pub created: i64,
}

impl Conversation {
    /// Create an empty conversation with a fresh id.
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: NEW_CHAT_TITLE.to_string(),
            messages: vec![],
            created: chrono::Utc::now().timestamp_millis(),
        }
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

/// A file picked to accompany a prompt.
#[derive(Debug, Clone)]
pub enum Attachment {
    /// An image, already encoded as a data URI.
    Image { name: String, data_uri: String },
    /// A text file, inlined into the prompt body.
    File { name: String, content: String },
}

impl Attachment {
    pub fn image(name: impl Into<String>, data_uri: impl Into<String>) -> Self {
        Self::Image {
            name: name.into(),
            data_uri: data_uri.into(),
        }
    }

    /// Create a text attachment, truncating oversized content.
    pub fn file(name: impl Into<String>, content: impl Into<String>) -> Self {
        let mut content = content.into();
        if content.chars().count() > MAX_FILE_CHARS {
            content = content.chars().take(MAX_FILE_CHARS).collect();
        }
        Self::File {
            name: name.into(),
            content,
        }
    }
}

/// Derive a conversation title from its first prompt.
pub fn derive_title(prompt: &str) -> String {
    let trimmed = prompt.trim();
    if trimmed.is_empty() {
        "Imagen".to_string()
    } else {
        trimmed.chars().take(TITLE_CHARS).collect()
    }
}
