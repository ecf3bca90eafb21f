//! In-memory conversation log

use crate::message::{Message, MessageId, MessagePatch};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Message not found: {0}")]
    UnknownMessage(MessageId),
    #[error("Message is no longer streaming: {0}")]
    NotStreaming(MessageId),
}

/// Ordered message log.
///
/// Only the currently streaming message can be patched after insertion; its
/// position is tracked so lookups never scan the log.
#[derive(Debug, Default)]
pub struct ConversationStore {
    messages: Vec<Message>,
    /// Index of the message with `streaming = true`, if any
    streaming: Option<usize>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole log (hydration). Any streaming flag is cleared.
    pub fn replace_all(&mut self, mut messages: Vec<Message>) {
        for message in &mut messages {
            message.streaming = false;
        }
        self.messages = messages;
        self.streaming = None;
    }

    /// Add a message at the end of the log
    pub fn append(&mut self, message: Message) {
        if message.streaming {
            if let Some(previous) = self.streaming.and_then(|i| self.messages.get_mut(i)) {
                tracing::warn!(message_id = %previous.id, "Closing stale streaming message");
                previous.streaming = false;
            }
            self.streaming = Some(self.messages.len());
        }
        self.messages.push(message);
    }

    /// Patch the streaming message in place and return its new state
    ///
    /// # Errors
    ///
    /// Fails if `id` is unknown or is not the streaming message.
    pub fn patch(&mut self, id: &MessageId, patch: MessagePatch) -> Result<&Message, StoreError> {
        let Some(index) = self.streaming.filter(|&i| &self.messages[i].id == id) else {
            return Err(if self.get(id).is_some() {
                StoreError::NotStreaming(id.clone())
            } else {
                StoreError::UnknownMessage(id.clone())
            });
        };

        if patch.is_final() {
            self.streaming = None;
        }
        let message = &mut self.messages[index];
        message.apply(patch);
        Ok(&*message)
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.streaming = None;
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn streaming_message(&self) -> Option<&Message> {
        self.streaming.map(|i| &self.messages[i])
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        // Fast path: the only message that changes after insertion
        if let Some(message) = self.streaming_message().filter(|m| &m.id == id) {
            return Some(message);
        }
        self.messages.iter().rev().find(|m| &m.id == id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Role, Source};

    #[test]
    fn test_append_preserves_order() {
        let mut store = ConversationStore::new();
        let user = Message::user("hola");
        let assistant = Message::assistant_placeholder();
        store.append(user.clone());
        store.append(assistant.clone());

        assert_eq!(store.len(), 2);
        assert_eq!(store.messages()[0].id, user.id);
        assert_eq!(store.messages()[1].id, assistant.id);
        assert_eq!(store.streaming_message().unwrap().id, assistant.id);
    }

    #[test]
    fn test_patch_streaming_message() {
        let mut store = ConversationStore::new();
        let assistant = Message::assistant_placeholder();
        store.append(assistant.clone());

        let updated = store
            .patch(&assistant.id, MessagePatch::content("Una "))
            .unwrap();
        assert_eq!(updated.content, "Una ");

        store
            .patch(&assistant.id, MessagePatch::sources(vec![Source::new("tema1.md", 0.8)]))
            .unwrap();
        let finished = store.patch(&assistant.id, MessagePatch::finish()).unwrap();
        assert!(!finished.streaming);
        assert_eq!(finished.sources.len(), 1);
        assert!(store.streaming_message().is_none());
    }

    #[test]
    fn test_patch_after_finish_is_rejected() {
        let mut store = ConversationStore::new();
        let assistant = Message::assistant_placeholder();
        store.append(assistant.clone());
        store.patch(&assistant.id, MessagePatch::finish()).unwrap();

        let err = store
            .patch(&assistant.id, MessagePatch::content("late"))
            .unwrap_err();
        assert_eq!(err, StoreError::NotStreaming(assistant.id.clone()));
        assert_eq!(store.get(&assistant.id).unwrap().content, "");
    }

    #[test]
    fn test_patch_user_message_is_rejected() {
        let mut store = ConversationStore::new();
        let user = Message::user("hola");
        store.append(user.clone());

        assert_eq!(
            store.patch(&user.id, MessagePatch::content("edited")),
            Err(StoreError::NotStreaming(user.id.clone()))
        );
    }

    #[test]
    fn test_patch_after_clear_targets_unknown_message() {
        let mut store = ConversationStore::new();
        let assistant = Message::assistant_placeholder();
        store.append(assistant.clone());
        store.clear();

        assert!(store.is_empty());
        assert_eq!(
            store.patch(&assistant.id, MessagePatch::content("late")),
            Err(StoreError::UnknownMessage(assistant.id.clone()))
        );
    }

    #[test]
    fn test_replace_all_clears_streaming() {
        let mut store = ConversationStore::new();
        let mut dangling = Message::assistant_placeholder();
        dangling.content = "a medias".to_string();

        store.replace_all(vec![Message::user("hola"), dangling]);
        assert_eq!(store.len(), 2);
        assert!(store.streaming_message().is_none());
        assert!(store.messages().iter().all(|m| !m.streaming));
        assert_eq!(store.messages()[1].role, Role::Assistant);
    }

    #[test]
    fn test_second_streaming_append_closes_first() {
        let mut store = ConversationStore::new();
        let first = Message::assistant_placeholder();
        let second = Message::assistant_placeholder();
        store.append(first.clone());
        store.append(second.clone());

        assert!(!store.get(&first.id).unwrap().streaming);
        assert_eq!(store.streaming_message().unwrap().id, second.id);
    }
}
