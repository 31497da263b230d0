//! Projection of accumulated stream content onto a conversation tail.

use charla_gateway::SplitContent;

use crate::message::{Message, Role};

/// Applies successive (reasoning, answer) splits to the tail of a message
/// list during a streaming send.
///
/// The list is expected to end with the assistant placeholder pushed at the
/// start of the send. The first time the reasoning half turns non-empty, a
/// reasoning message is inserted just before the placeholder; afterwards
/// every projection rewrites that pair in place. Projecting the same split
/// twice leaves the list unchanged.
#[derive(Debug, Default)]
pub struct Projector {
    reasoning_inserted: bool,
}

impl Projector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewrite the tail of `messages` with the current split.
    pub fn project(&mut self, messages: &mut Vec<Message>, split: &SplitContent) {
        if messages.is_empty() {
            return;
        }
        if !self.reasoning_inserted && !split.reasoning.is_empty() {
            messages.insert(messages.len() - 1, Message::reasoning(""));
            self.reasoning_inserted = true;
        }
        if self.reasoning_inserted && messages.len() >= 2 {
            let index = messages.len() - 2;
            messages[index].content = split.reasoning.clone();
        }
        if let Some(last) = messages.last_mut() {
            last.content = split.answer.clone();
        }
    }
}
