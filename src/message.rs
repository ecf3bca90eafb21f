//! Conversation message types
//!
//! A message is one side of a turn. User messages are complete when created;
//! assistant messages start empty and are filled in while `streaming` is set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque, locally generated message identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Generate a fresh identifier. Never reused within or across sessions.
    pub fn generate() -> Self {
        Self(format!("msg_{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// Citation attached to an answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub source_file: String,
    /// Relevance in `[0, 1]`
    #[serde(default)]
    pub score: f64,
    #[serde(default, rename = "titulo", skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, rename = "seccion", skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(default, rename = "subseccion", skip_serializing_if = "Option::is_none")]
    pub subsection: Option<String>,
    /// Excerpt of the cited passage
    #[serde(default, rename = "content")]
    pub excerpt: String,
}

impl Source {
    pub fn new(source_file: impl Into<String>, score: f64) -> Self {
        Self {
            source_file: source_file.into(),
            score,
            title: None,
            section: None,
            subsection: None,
            excerpt: String::new(),
        }
    }

    /// Human-readable label: section if known, else title, else file name
    pub fn label(&self) -> &str {
        self.section
            .as_deref()
            .or(self.title.as_deref())
            .unwrap_or(&self.source_file)
    }
}

/// One message in the conversation log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub streaming: bool,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: MessageId::generate(),
            role: Role::User,
            content: text.into(),
            sources: Vec::new(),
            streaming: false,
            timestamp: Utc::now(),
        }
    }

    /// Empty assistant message awaiting stream events
    pub fn assistant_placeholder() -> Self {
        Self {
            id: MessageId::generate(),
            role: Role::Assistant,
            content: String::new(),
            sources: Vec::new(),
            streaming: true,
            timestamp: Utc::now(),
        }
    }

    /// Apply a partial update in place
    pub(crate) fn apply(&mut self, patch: MessagePatch) {
        if let Some(content) = patch.content {
            self.content = content;
        }
        if let Some(sources) = patch.sources {
            self.sources = sources;
        }
        if let Some(streaming) = patch.streaming {
            self.streaming = streaming;
        }
    }
}

/// Field-level replacement for a message; `None` leaves the field untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagePatch {
    pub content: Option<String>,
    pub sources: Option<Vec<Source>>,
    pub streaming: Option<bool>,
}

impl MessagePatch {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn sources(sources: Vec<Source>) -> Self {
        Self {
            sources: Some(sources),
            ..Self::default()
        }
    }

    pub fn finish() -> Self {
        Self {
            streaming: Some(false),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn finishing(mut self) -> Self {
        self.streaming = Some(false);
        self
    }

    /// True if this patch ends the message's streaming phase
    pub fn is_final(&self) -> bool {
        self.streaming == Some(false)
    }
}
