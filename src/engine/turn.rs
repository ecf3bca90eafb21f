//! Pure event application for an in-flight turn
//!
//! Given the current assistant message and one stream event, decide the
//! patch to apply and whether the turn is over. No I/O happens here.

use crate::message::{Message, MessageId, MessagePatch};
use crate::transport::StreamEvent;
use std::time::Duration;

/// Engine-level turn state; gates `submit`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TurnPhase {
    #[default]
    Idle,
    Submitting { assistant_id: MessageId },
}

impl TurnPhase {
    pub fn is_idle(&self) -> bool {
        matches!(self, TurnPhase::Idle)
    }
}

/// How a turn ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// `done` received
    Completed,
    /// `error` received, or the request itself failed
    Failed(String),
    /// Stream ended without a terminal event
    Truncated,
    /// No event arrived within the idle timeout
    TimedOut(Duration),
    /// Stopped by the user (or the submit future was dropped)
    Cancelled,
}

impl TurnOutcome {
    /// Message for the caller's error channel, if this outcome is a failure
    pub fn error_message(&self) -> Option<String> {
        match self {
            TurnOutcome::Completed | TurnOutcome::Cancelled => None,
            TurnOutcome::Failed(message) => Some(message.clone()),
            TurnOutcome::Truncated => Some("Answer stream closed before completion".to_string()),
            TurnOutcome::TimedOut(after) => Some(format!(
                "No answer received for {}s",
                after.as_secs()
            )),
        }
    }
}

/// Result of applying one event
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Applied {
    pub patch: Option<MessagePatch>,
    /// Set when the event ends the turn
    pub outcome: Option<TurnOutcome>,
}

/// Content shown in place of an answer that failed
pub fn error_content(message: &str) -> String {
    format!("Error: {message}")
}

/// Apply `event` to the in-flight assistant message.
///
/// `message` is `None` when the log was cleared mid-turn; the event is then
/// dropped, but a terminal event still ends the turn. A message that is no
/// longer streaming is never patched.
pub fn apply_event(message: Option<&Message>, event: StreamEvent) -> Applied {
    let outcome = match &event {
        StreamEvent::Done => Some(TurnOutcome::Completed),
        StreamEvent::Error(message) => Some(TurnOutcome::Failed(message.clone())),
        StreamEvent::Sources(_) | StreamEvent::Token(_) => None,
    };

    let Some(message) = message.filter(|m| m.streaming) else {
        return Applied {
            patch: None,
            outcome,
        };
    };

    let patch = match event {
        // Last write wins; the service is expected to send this once
        StreamEvent::Sources(sources) => MessagePatch::sources(sources),
        StreamEvent::Token(token) => {
            let mut content = String::with_capacity(message.content.len() + token.len());
            content.push_str(&message.content);
            content.push_str(&token);
            MessagePatch::content(content)
        }
        StreamEvent::Done => MessagePatch::finish(),
        StreamEvent::Error(error) => MessagePatch::content(error_content(&error)).finishing(),
    };

    Applied {
        patch: Some(patch),
        outcome,
    }
}
