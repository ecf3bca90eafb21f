//! Client side of the answering service
//!
//! The service answers a question about a subject either as a single
//! response (`ask`) or as a sequence of typed events (`open_stream`).

mod error;
mod frame;
mod http;

pub use error::{TransportError, TransportErrorKind};
pub use frame::{decode_stream, Frame, FrameDecoder, FrameError};
pub use http::HttpTransport;

use crate::message::Source;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;

/// Lazy, finite sequence of decoded events for one question
pub type EventStream = BoxStream<'static, StreamEvent>;

/// Decoded event from the streaming endpoint
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Citation list for the answer
    Sources(Vec<Source>),
    /// Incremental fragment of answer text
    Token(String),
    /// Terminal success
    Done,
    /// Terminal failure with a human-readable message
    Error(String),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Error(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Sources(_) => "sources",
            StreamEvent::Token(_) => "token",
            StreamEvent::Done => "done",
            StreamEvent::Error(_) => "error",
        }
    }
}

/// Complete answer from the non-streaming endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<Source>,
    pub model_used: Option<String>,
}

/// Common interface for answering-service clients
#[async_trait]
pub trait AnswerTransport: Send + Sync {
    /// Open a streaming answer for `question` about `slug`.
    ///
    /// Nothing is sent until the stream is first polled. Transport failures
    /// surface as a single `StreamEvent::Error`; the stream never yields
    /// anything after a terminal event.
    fn open_stream(&self, slug: &str, question: &str) -> EventStream;

    /// Ask for a complete answer in one request/response exchange
    ///
    /// # Errors
    ///
    /// Empty questions, connection failures, non-success statuses and
    /// undecodable bodies all surface as `TransportError`.
    async fn ask(&self, slug: &str, question: &str) -> Result<Answer, TransportError>;
}

#[async_trait]
impl<T: AnswerTransport + ?Sized> AnswerTransport for Arc<T> {
    fn open_stream(&self, slug: &str, question: &str) -> EventStream {
        (**self).open_stream(slug, question)
    }

    async fn ask(&self, slug: &str, question: &str) -> Result<Answer, TransportError> {
        (**self).ask(slug, question).await
    }
}

/// Logging wrapper for transports
pub struct LoggingTransport<T> {
    inner: T,
}

impl<T: AnswerTransport> LoggingTransport<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<T: AnswerTransport> AnswerTransport for LoggingTransport<T> {
    fn open_stream(&self, slug: &str, question: &str) -> EventStream {
        let slug = slug.to_string();
        let start = Instant::now();
        let mut tokens = 0usize;
        self.inner
            .open_stream(&slug, question)
            .inspect(move |event| match event {
                StreamEvent::Token(_) => tokens += 1,
                StreamEvent::Sources(sources) => {
                    tracing::debug!(slug = %slug, count = sources.len(), "Sources received");
                }
                StreamEvent::Done => {
                    tracing::info!(
                        slug = %slug,
                        duration_ms = %start.elapsed().as_millis(),
                        tokens,
                        "Answer stream completed"
                    );
                }
                StreamEvent::Error(message) => {
                    tracing::error!(
                        slug = %slug,
                        duration_ms = %start.elapsed().as_millis(),
                        tokens,
                        error = %message,
                        "Answer stream failed"
                    );
                }
            })
            .boxed()
    }

    async fn ask(&self, slug: &str, question: &str) -> Result<Answer, TransportError> {
        let start = Instant::now();
        let result = self.inner.ask(slug, question).await;
        let duration = start.elapsed();

        match &result {
            Ok(answer) => {
                tracing::info!(
                    slug = %slug,
                    duration_ms = %duration.as_millis(),
                    sources = answer.sources.len(),
                    model = answer.model_used.as_deref().unwrap_or("unknown"),
                    "Answer request completed"
                );
            }
            Err(e) => {
                tracing::error!(
                    slug = %slug,
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    retryable = e.kind.is_retryable(),
                    "Answer request failed"
                );
            }
        }

        result
    }
}

/// Reject questions that are empty after trimming
pub(crate) fn validate_question(question: &str) -> Result<&str, TransportError> {
    let trimmed = question.trim();
    if trimmed.is_empty() {
        Err(TransportError::invalid_request("Question must not be empty"))
    } else {
        Ok(trimmed)
    }
}
