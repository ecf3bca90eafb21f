//! Tutor chat client
//!
//! Client-side conversation engine for a subject tutoring service: streams
//! answers over server-sent events, keeps an ordered per-subject message log
//! and mirrors it to durable storage.

pub mod config;
pub mod engine;
pub mod message;
pub mod persistence;
pub mod store;
pub mod transport;

#[cfg(test)]
mod testing;

pub use config::ClientConfig;
pub use engine::{
    ConversationEngine, ConversationEvent, ConversationRegistry, EngineOptions, TurnError,
    TurnOutcome, TurnPhase, TurnSummary,
};
pub use message::{Message, MessageId, MessagePatch, Role, Source};
pub use persistence::{KvStore, MemoryKv, Persistence, SqliteKv};
pub use store::ConversationStore;
pub use transport::{
    AnswerTransport, HttpTransport, LoggingTransport, StreamEvent, TransportError,
};
