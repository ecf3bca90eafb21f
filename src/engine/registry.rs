//! One engine per subject, opened on first use

use super::{ConversationEngine, EngineOptions};
use crate::persistence::Persistence;
use crate::transport::AnswerTransport;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Shares one transport and persistence adapter across conversations
pub struct ConversationRegistry<T> {
    transport: T,
    persistence: Persistence,
    options: EngineOptions,
    engines: Mutex<HashMap<String, Arc<ConversationEngine<T>>>>,
}

impl<T: AnswerTransport + Clone> ConversationRegistry<T> {
    pub fn new(transport: T, persistence: Persistence, options: EngineOptions) -> Self {
        Self {
            transport,
            persistence,
            options,
            engines: Mutex::new(HashMap::new()),
        }
    }

    /// Engine for `slug`, hydrating it from persistence the first time
    pub fn engine(&self, slug: &str) -> Arc<ConversationEngine<T>> {
        let mut engines = self.engines.lock().unwrap_or_else(PoisonError::into_inner);
        engines
            .entry(slug.to_string())
            .or_insert_with(|| {
                Arc::new(ConversationEngine::open(
                    slug,
                    self.transport.clone(),
                    self.persistence.clone(),
                    self.options.clone(),
                ))
            })
            .clone()
    }

    /// Slugs with an open engine, sorted
    pub fn open_slugs(&self) -> Vec<String> {
        let engines = self.engines.lock().unwrap_or_else(PoisonError::into_inner);
        let mut slugs: Vec<_> = engines.keys().cloned().collect();
        slugs.sort();
        slugs
    }

    /// Open slugs plus every slug with a stored conversation, sorted
    pub fn known_slugs(&self) -> Vec<String> {
        let mut slugs = self.open_slugs();
        slugs.extend(self.persistence.stored_slugs());
        slugs.sort();
        slugs.dedup();
        slugs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;
    use crate::transport::StreamEvent;

    #[tokio::test]
    async fn test_same_slug_shares_engine() {
        let registry = ConversationRegistry::new(
            Arc::new(ScriptedTransport::new()),
            Persistence::in_memory(),
            EngineOptions::default(),
        );

        let a = registry.engine("bases-de-datos");
        let b = registry.engine("bases-de-datos");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.open_slugs(), vec!["bases-de-datos".to_string()]);
    }

    #[tokio::test]
    async fn test_slugs_are_independent() {
        let transport = Arc::new(ScriptedTransport::new());
        let persistence = Persistence::in_memory();
        let registry = ConversationRegistry::new(
            transport.clone(),
            persistence.clone(),
            EngineOptions::default(),
        );

        transport.queue_stream(vec![StreamEvent::Token("uno".into()), StreamEvent::Done]);
        registry.engine("redes").submit("hola").await.unwrap();

        let other = registry.engine("bases-de-datos");
        assert!(other.messages().is_empty());
        assert_eq!(registry.engine("redes").messages().len(), 2);
        assert_eq!(
            registry.open_slugs(),
            vec!["bases-de-datos".to_string(), "redes".to_string()]
        );

        // A fresh registry hydrates from the shared persistence
        let reopened = ConversationRegistry::new(transport, persistence, EngineOptions::default());
        assert!(reopened.open_slugs().is_empty());
        assert_eq!(reopened.known_slugs(), vec!["redes".to_string()]);
        assert_eq!(reopened.engine("redes").messages().len(), 2);

        reopened.engine("so");
        assert_eq!(
            reopened.known_slugs(),
            vec!["redes".to_string(), "so".to_string()]
        );
    }
}
