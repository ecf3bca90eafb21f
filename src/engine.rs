//! Conversation engine
//!
//! Owns one conversation's log, drives the answering service for each
//! submitted question and mirrors every committed change to persistence.
//!
//! At most one turn is in flight per conversation. All log mutation happens
//! under a short, non-async lock; the lock is never held across an await.

mod registry;
mod turn;

pub use registry::ConversationRegistry;
pub use turn::{apply_event, error_content, Applied, TurnOutcome, TurnPhase};

use crate::message::{Message, MessageId, MessagePatch};
use crate::persistence::Persistence;
use crate::store::ConversationStore;
use crate::transport::{AnswerTransport, EventStream, StreamEvent};
use futures::StreamExt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);
const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// Engine behaviour switches
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Use the streaming endpoint; otherwise one request/response per turn
    pub streaming: bool,
    /// Longest wait for the next event (or the whole answer when not
    /// streaming) before the turn is closed. `None` waits forever.
    pub idle_timeout: Option<Duration>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            streaming: true,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
        }
    }
}

/// Change notification for rendering layers
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationEvent {
    Appended(Message),
    Updated(Message),
    Cleared,
    /// A turn failed; the failed message has already been finalized
    Error { message: String },
}

/// Why `submit` did not complete normally
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TurnError {
    #[error("Question is empty")]
    EmptyQuestion,
    #[error("A question is already being answered")]
    TurnInFlight,
    #[error("{0}")]
    Remote(String),
    #[error("Answer stream closed before completion")]
    Truncated,
    #[error("No answer received for {}s", .0.as_secs())]
    TimedOut(Duration),
}

impl TurnError {
    /// Rejected before any state change or network call
    pub fn is_rejection(&self) -> bool {
        matches!(self, TurnError::EmptyQuestion | TurnError::TurnInFlight)
    }
}

/// Summary of a turn that ended without error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnSummary {
    pub assistant_id: MessageId,
    pub outcome: TurnOutcome,
}

struct Inner {
    store: ConversationStore,
    phase: TurnPhase,
    cancel: Option<CancellationToken>,
}

/// Question/answer engine for a single conversation
pub struct ConversationEngine<T> {
    slug: String,
    transport: T,
    persistence: Persistence,
    options: EngineOptions,
    inner: Mutex<Inner>,
    updates: broadcast::Sender<ConversationEvent>,
}

impl<T: AnswerTransport> ConversationEngine<T> {
    /// Create the engine for `slug`, hydrating its log from persistence
    pub fn open(
        slug: impl Into<String>,
        transport: T,
        persistence: Persistence,
        options: EngineOptions,
    ) -> Self {
        let slug = slug.into();
        let mut store = ConversationStore::new();
        store.replace_all(persistence.load(&slug));
        tracing::info!(slug = %slug, messages = store.len(), "Conversation opened");

        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            slug,
            transport,
            persistence,
            options,
            inner: Mutex::new(Inner {
                store,
                phase: TurnPhase::Idle,
                cancel: None,
            }),
            updates,
        }
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    /// Snapshot of the log
    pub fn messages(&self) -> Vec<Message> {
        self.lock().store.messages().to_vec()
    }

    pub fn phase(&self) -> TurnPhase {
        self.lock().phase.clone()
    }

    pub fn is_busy(&self) -> bool {
        !self.lock().phase.is_idle()
    }

    /// Subscribe to log changes and turn errors
    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.updates.subscribe()
    }

    /// Ask `text` and apply the answer to a new assistant message.
    ///
    /// Empty questions and questions submitted while another turn is in
    /// flight are rejected without touching the log. Otherwise a user
    /// message and an empty streaming assistant message are appended before
    /// the service is contacted, and the assistant message is always left
    /// finalized when this returns (or when the future is dropped).
    ///
    /// # Errors
    ///
    /// `EmptyQuestion` and `TurnInFlight` are rejections with no side effect.
    /// `Remote`, `Truncated` and `TimedOut` end a turn whose assistant message
    /// has already been finalized with partial or error content.
    pub async fn submit(&self, text: &str) -> Result<TurnSummary, TurnError> {
        let question = text.trim();
        if question.is_empty() {
            return Err(TurnError::EmptyQuestion);
        }

        let (assistant_id, cancel) = self.begin_turn(question)?;
        let mut guard = TurnGuard {
            engine: self,
            assistant_id: assistant_id.clone(),
            outcome: None,
        };

        let outcome = if self.options.streaming {
            self.drive_stream(&assistant_id, question, &cancel).await
        } else {
            self.drive_ask(&assistant_id, question, &cancel).await
        };
        guard.outcome = Some(outcome.clone());
        drop(guard);

        match outcome {
            TurnOutcome::Completed | TurnOutcome::Cancelled => Ok(TurnSummary {
                assistant_id,
                outcome,
            }),
            TurnOutcome::Failed(message) => Err(TurnError::Remote(message)),
            TurnOutcome::Truncated => Err(TurnError::Truncated),
            TurnOutcome::TimedOut(after) => Err(TurnError::TimedOut(after)),
        }
    }

    /// Stop the in-flight turn, keeping whatever content has arrived.
    ///
    /// Returns false if no turn was in flight.
    pub fn cancel(&self) -> bool {
        let mut inner = self.lock();
        let TurnPhase::Submitting { assistant_id } = inner.phase.clone() else {
            return false;
        };

        if let Ok(message) = inner.store.patch(&assistant_id, MessagePatch::finish()) {
            let snapshot = message.clone();
            self.persist(&inner.store);
            self.notify(ConversationEvent::Updated(snapshot));
        }
        if let Some(token) = &inner.cancel {
            token.cancel();
        }
        tracing::info!(slug = %self.slug, message_id = %assistant_id, "Turn cancelled");
        true
    }

    /// Empty the log and forget the stored conversation.
    ///
    /// An in-flight turn keeps running, but its remaining events are dropped.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.store.clear();
        if let Err(e) = self.persistence.remove(&self.slug) {
            tracing::warn!(slug = %self.slug, error = %e, "Failed to remove stored conversation");
        }
        self.notify(ConversationEvent::Cleared);
        tracing::info!(slug = %self.slug, "Conversation cleared");
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, event: ConversationEvent) {
        // No subscribers is fine
        let _ = self.updates.send(event);
    }

    /// Mirror the log; failures only cost durability
    fn persist(&self, store: &ConversationStore) {
        if let Err(e) = self.persistence.save(&self.slug, store.messages()) {
            tracing::warn!(slug = %self.slug, error = %e, "Failed to persist conversation");
        }
    }

    fn begin_turn(&self, question: &str) -> Result<(MessageId, CancellationToken), TurnError> {
        let mut inner = self.lock();
        if !inner.phase.is_idle() {
            tracing::debug!(slug = %self.slug, "Rejecting question, turn in flight");
            return Err(TurnError::TurnInFlight);
        }

        let user = Message::user(question);
        let assistant = Message::assistant_placeholder();
        let assistant_id = assistant.id.clone();
        inner.store.append(user.clone());
        inner.store.append(assistant.clone());

        let cancel = CancellationToken::new();
        inner.phase = TurnPhase::Submitting {
            assistant_id: assistant_id.clone(),
        };
        inner.cancel = Some(cancel.clone());

        self.persist(&inner.store);
        self.notify(ConversationEvent::Appended(user));
        self.notify(ConversationEvent::Appended(assistant));
        tracing::debug!(slug = %self.slug, message_id = %assistant_id, "Turn started");

        Ok((assistant_id, cancel))
    }

    async fn drive_stream(
        &self,
        assistant_id: &MessageId,
        question: &str,
        cancel: &CancellationToken,
    ) -> TurnOutcome {
        let mut events = self.transport.open_stream(&self.slug, question);
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return TurnOutcome::Cancelled,
                next = self.next_event(&mut events) => next,
            };
            match next {
                Ok(Some(event)) => {
                    if let Some(outcome) = self.apply(assistant_id, event) {
                        return outcome;
                    }
                }
                Ok(None) => return TurnOutcome::Truncated,
                Err(after) => return TurnOutcome::TimedOut(after),
            }
        }
    }

    async fn next_event(
        &self,
        events: &mut EventStream,
    ) -> Result<Option<StreamEvent>, Duration> {
        match self.options.idle_timeout {
            Some(limit) => tokio::time::timeout(limit, events.next())
                .await
                .map_err(|_| limit),
            None => Ok(events.next().await),
        }
    }

    fn apply(&self, assistant_id: &MessageId, event: StreamEvent) -> Option<TurnOutcome> {
        let mut inner = self.lock();
        let kind = event.kind();
        let applied = apply_event(inner.store.get(assistant_id), event);

        match applied.patch {
            Some(patch) => self.commit(&mut inner, assistant_id, patch),
            None => {
                tracing::debug!(
                    slug = %self.slug,
                    message_id = %assistant_id,
                    kind,
                    "Dropping event"
                );
            }
        }
        applied.outcome
    }

    fn commit(&self, inner: &mut Inner, assistant_id: &MessageId, patch: MessagePatch) {
        match inner.store.patch(assistant_id, patch) {
            Ok(message) => {
                let snapshot = message.clone();
                self.persist(&inner.store);
                self.notify(ConversationEvent::Updated(snapshot));
            }
            Err(e) => {
                tracing::debug!(slug = %self.slug, error = %e, "Patch not applied");
            }
        }
    }

    async fn drive_ask(
        &self,
        assistant_id: &MessageId,
        question: &str,
        cancel: &CancellationToken,
    ) -> TurnOutcome {
        let request = self.transport.ask(&self.slug, question);
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return TurnOutcome::Cancelled,
            result = async {
                match self.options.idle_timeout {
                    Some(limit) => tokio::time::timeout(limit, request).await.map_err(|_| limit),
                    None => Ok(request.await),
                }
            } => result,
        };

        let (patch, outcome) = match result {
            Ok(Ok(answer)) => (
                MessagePatch {
                    content: Some(answer.answer),
                    sources: Some(answer.sources),
                    streaming: Some(false),
                },
                TurnOutcome::Completed,
            ),
            Ok(Err(e)) => (
                MessagePatch::content(error_content(&e.message)).finishing(),
                TurnOutcome::Failed(e.message),
            ),
            Err(after) => return TurnOutcome::TimedOut(after),
        };

        let mut inner = self.lock();
        self.commit(&mut inner, assistant_id, patch);
        outcome
    }

    /// Close the turn: finalize the message if still streaming, return to idle
    fn end_turn(&self, assistant_id: &MessageId, outcome: &TurnOutcome) {
        let error = outcome.error_message();
        let mut inner = self.lock();
        // Partial content is kept; an empty answer shows the error instead
        let closing = inner
            .store
            .streaming_message()
            .filter(|m| &m.id == assistant_id)
            .map(|message| match &error {
                Some(error) if message.content.is_empty() => {
                    MessagePatch::content(error_content(error)).finishing()
                }
                _ => MessagePatch::finish(),
            });
        if let Some(patch) = closing {
            self.commit(&mut inner, assistant_id, patch);
        }
        inner.phase = TurnPhase::Idle;
        inner.cancel = None;
        drop(inner);

        if let Some(message) = error {
            tracing::warn!(
                slug = %self.slug,
                message_id = %assistant_id,
                error = %message,
                "Turn failed"
            );
            self.notify(ConversationEvent::Error { message });
        } else {
            tracing::debug!(
                slug = %self.slug,
                message_id = %assistant_id,
                ?outcome,
                "Turn finished"
            );
        }
    }
}

/// Ends the turn even if the `submit` future is dropped mid-flight
struct TurnGuard<'a, T: AnswerTransport> {
    engine: &'a ConversationEngine<T>,
    assistant_id: MessageId,
    outcome: Option<TurnOutcome>,
}

impl<T: AnswerTransport> Drop for TurnGuard<'_, T> {
    fn drop(&mut self) {
        let outcome = self.outcome.take().unwrap_or(TurnOutcome::Cancelled);
        self.engine.end_turn(&self.assistant_id, &outcome);
    }
}
