//! charla-app: Conversation state, projection, and request orchestration
//!
//! Sits between the gateway client and a frontend: owns the conversation
//! list, applies streamed deltas to the visible message pair, suppresses
//! stale writes from superseded sends, and persists history and settings.

pub mod app;
pub mod error;
pub mod events;
pub mod message;
pub mod projector;
pub mod settings;
pub mod storage;
pub mod store;
pub mod transport;

pub use app::ChatApp;
pub use error::{Error, Result};
pub use events::StateEvent;
pub use message::{Attachment, Conversation, Message, Role};
pub use projector::Projector;
pub use settings::Settings;
pub use storage::Storage;
pub use store::ConversationStore;
pub use transport::Gateway;
