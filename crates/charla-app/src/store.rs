//! Shared conversation state with stale-write suppression.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::message::{Conversation, Message};

#[derive(Debug, Default)]
struct Inner {
    conversations: HashMap<String, Conversation>,
    /// Latest send operation number per conversation. A write tagged with an
    /// older number is stale and gets dropped.
    ops: HashMap<String, u64>,
    active: Option<String>,
}

/// Cloneable handle to the conversation list.
///
/// Message-list updates are full replacements: a writer snapshots the list,
/// rebuilds it, and writes it back tagged with the operation number it was
/// given when its send began. Starting a new send or deleting the
/// conversation invalidates every older tag, so a superseded stream's writes
/// land nowhere without the stream itself being torn down.
#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    inner: Arc<Mutex<Inner>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole list, typically from persisted history. The most
    /// recently created conversation becomes active.
    pub fn load(&self, conversations: Vec<Conversation>) {
        let mut inner = self.inner.lock();
        inner.active = conversations
            .iter()
            .max_by_key(|c| c.created)
            .map(|c| c.id.clone());
        inner.conversations = conversations.into_iter().map(|c| (c.id.clone(), c)).collect();
        inner.ops.clear();
    }

    /// Add a conversation and make it active.
    pub fn insert(&self, conversation: Conversation) {
        let mut inner = self.inner.lock();
        inner.active = Some(conversation.id.clone());
        inner.conversations.insert(conversation.id.clone(), conversation);
    }

    /// Delete a conversation. In-flight writes against it become stale. If it
    /// was active, the most recently created survivor takes its place.
    pub fn remove(&self, id: &str) -> bool {
        let mut inner = self.inner.lock();
        let removed = inner.conversations.remove(id).is_some();
        if removed {
            *inner.ops.entry(id.to_string()).or_insert(0) += 1;
            if inner.active.as_deref() == Some(id) {
                inner.active = inner
                    .conversations
                    .values()
                    .max_by_key(|c| c.created)
                    .map(|c| c.id.clone());
            }
        }
        removed
    }

    /// Make a conversation active. Returns false when it does not exist.
    pub fn select(&self, id: &str) -> bool {
        let mut inner = self.inner.lock();
        if inner.conversations.contains_key(id) {
            inner.active = Some(id.to_string());
            true
        } else {
            false
        }
    }

    pub fn active_id(&self) -> Option<String> {
        self.inner.lock().active.clone()
    }

    pub fn get(&self, id: &str) -> Option<Conversation> {
        self.inner.lock().conversations.get(id).cloned()
    }

    /// All conversations, most recently created first.
    pub fn all(&self) -> Vec<Conversation> {
        let inner = self.inner.lock();
        let mut list: Vec<Conversation> = inner.conversations.values().cloned().collect();
        list.sort_by_key(|c| std::cmp::Reverse(c.created));
        list
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().conversations.is_empty()
    }

    /// Start a send: commit the pre-stream message list and title, bump the
    /// conversation's operation number, and return the new number. Writes
    /// tagged with any earlier number are rejected from here on.
    pub fn begin_send(
        &self,
        id: &str,
        messages: Vec<Message>,
        title: String,
    ) -> Option<u64> {
        let mut inner = self.inner.lock();
        let op = inner.ops.entry(id.to_string()).or_insert(0);
        *op += 1;
        let op = *op;
        let conversation = inner.conversations.get_mut(id)?;
        conversation.messages = messages;
        conversation.title = title;
        Some(op)
    }

    /// Full-replacement write of a conversation's messages, accepted only
    /// when `op` is still the latest for that conversation.
    pub fn replace_messages(&self, id: &str, op: u64, messages: Vec<Message>) -> bool {
        let mut inner = self.inner.lock();
        if inner.ops.get(id).copied() != Some(op) {
            tracing::debug!(conversation = id, op, "dropping stale write");
            return false;
        }
        match inner.conversations.get_mut(id) {
            Some(conversation) => {
                conversation.messages = messages;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation_at(created: i64) -> Conversation {
        Conversation {
            created,
            ..Conversation::new()
        }
    }

    #[test]
    fn test_insert_makes_active() {
        let store = ConversationStore::new();
        let c = Conversation::new();
        let id = c.id.clone();
        store.insert(c);
        assert_eq!(store.active_id(), Some(id));
    }

    #[test]
    fn test_load_activates_most_recent() {
        let store = ConversationStore::new();
        let older = conversation_at(100);
        let newer = conversation_at(200);
        let newer_id = newer.id.clone();
        store.load(vec![older, newer]);
        assert_eq!(store.active_id(), Some(newer_id));
    }

    #[test]
    fn test_all_sorted_most_recent_first() {
        let store = ConversationStore::new();
        store.load(vec![conversation_at(100), conversation_at(300), conversation_at(200)]);
        let created: Vec<i64> = store.all().iter().map(|c| c.created).collect();
        assert_eq!(created, vec![300, 200, 100]);
    }

    #[test]
    fn test_remove_active_falls_back_to_most_recent() {
        let store = ConversationStore::new();
        let a = conversation_at(100);
        let b = conversation_at(200);
        let a_id = a.id.clone();
        let b_id = b.id.clone();
        store.load(vec![a, b]);
        assert!(store.remove(&b_id));
        assert_eq!(store.active_id(), Some(a_id));
    }

    #[test]
    fn test_begin_send_commits_tail_and_title() {
        let store = ConversationStore::new();
        let c = Conversation::new();
        let id = c.id.clone();
        store.insert(c);
        let op = store
            .begin_send(&id, vec![Message::user("hola", vec![])], "hola".into())
            .unwrap();
        assert_eq!(op, 1);
        let stored = store.get(&id).unwrap();
        assert_eq!(stored.title, "hola");
        assert_eq!(stored.messages.len(), 1);
    }

    #[test]
    fn test_superseded_op_writes_are_dropped() {
        let store = ConversationStore::new();
        let c = Conversation::new();
        let id = c.id.clone();
        store.insert(c);
        let first = store.begin_send(&id, vec![], "t".into()).unwrap();
        let second = store.begin_send(&id, vec![], "t".into()).unwrap();
        assert!(!store.replace_messages(&id, first, vec![Message::assistant("vieja")]));
        assert!(store.replace_messages(&id, second, vec![Message::assistant("nueva")]));
        assert_eq!(store.get(&id).unwrap().messages[0].content, "nueva");
    }

    #[test]
    fn test_writes_after_delete_are_dropped() {
        let store = ConversationStore::new();
        let c = Conversation::new();
        let id = c.id.clone();
        store.insert(c);
        let op = store.begin_send(&id, vec![], "t".into()).unwrap();
        assert!(store.remove(&id));
        assert!(!store.replace_messages(&id, op, vec![Message::assistant("fantasma")]));
        assert!(store.get(&id).is_none());
    }

    #[test]
    fn test_select_unknown_conversation() {
        let store = ConversationStore::new();
        assert!(!store.select("no-existe"));
    }
}
