//! JSON persistence for history and settings.

use std::fs;
use std::path::PathBuf;

use crate::error::Result;
use crate::message::Conversation;
use crate::settings::Settings;

const HISTORY_FILE: &str = "history.json";
const SETTINGS_FILE: &str = "settings.json";

/// Reads and writes application state under a data directory.
#[derive(Debug, Clone)]
pub struct Storage {
    dir: PathBuf,
}

impl Storage {
    /// Storage under the platform's local data directory.
    pub fn new() -> Self {
        let dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("charla");
        Self { dir }
    }

    /// Storage under an explicit directory.
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    /// Load persisted conversations. A missing file is an empty history.
    pub fn load_history(&self) -> Result<Vec<Conversation>> {
        let path = self.dir.join(HISTORY_FILE);
        if !path.exists() {
            return Ok(vec![]);
        }
        let data = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Persist conversations. Image payloads are stripped; messages that
    /// carried them keep a `had_images` marker instead.
    pub fn save_history(&self, conversations: &[Conversation]) -> Result<()> {
        let mut stripped = conversations.to_vec();
        for conversation in &mut stripped {
            for message in &mut conversation.messages {
                if !message.images.is_empty() {
                    message.images.clear();
                    message.had_images = true;
                }
            }
        }
        fs::create_dir_all(&self.dir)?;
        let data = serde_json::to_string_pretty(&stripped)?;
        fs::write(self.dir.join(HISTORY_FILE), data)?;
        Ok(())
    }

    /// Load persisted settings, falling back to defaults when absent.
    pub fn load_settings(&self) -> Result<Settings> {
        let path = self.dir.join(SETTINGS_FILE);
        if !path.exists() {
            return Ok(Settings::default());
        }
        let data = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Persist settings.
    pub fn save_settings(&self, settings: &Settings) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let data = serde_json::to_string_pretty(settings)?;
        fs::write(self.dir.join(SETTINGS_FILE), data)?;
        Ok(())
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self::new()
    }
}
