//! Incremental server-sent-event frame decoding
//!
//! Frames are blocks of `field: value` lines terminated by a blank line:
//!
//! ```text
//! event: token
//! data: {"token": "Una "}
//!
//! ```
//!
//! Bytes are buffered only up to the end of the current line, so events are
//! surfaced as soon as their terminating blank line arrives.

use super::StreamEvent;
use crate::message::Source;
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use thiserror::Error;

/// Event kind used when a frame carries no `event:` field
const DEFAULT_EVENT: &str = "message";

/// One decoded wire frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub event: String,
    pub data: String,
}

/// Why a frame could not be turned into a `StreamEvent`
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("unknown event kind: {0}")]
    UnknownKind(String),
    #[error("invalid {kind} payload: {source}")]
    Payload {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Stateful decoder fed chunk by chunk
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Bytes of the current, not yet terminated line
    line: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every frame it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        for &byte in chunk {
            if byte == b'\n' {
                let line = std::mem::take(&mut self.line);
                if let Some(frame) = self.process_line(&line) {
                    frames.push(frame);
                }
            } else {
                self.line.push(byte);
            }
        }
        frames
    }

    /// Flush at end of input; a final frame without its blank line still counts
    pub fn finish(&mut self) -> Option<Frame> {
        let line = std::mem::take(&mut self.line);
        if !line.is_empty() {
            if let Some(frame) = self.process_line(&line) {
                return Some(frame);
            }
        }
        self.dispatch()
    }

    fn process_line(&mut self, raw: &[u8]) -> Option<Frame> {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        if raw.is_empty() {
            return self.dispatch();
        }
        // Comment / keep-alive
        if raw.first() == Some(&b':') {
            return None;
        }

        let line = String::from_utf8_lossy(raw);
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line.as_ref(), ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {} // id, retry and unknown fields carry nothing we use
        }
        None
    }

    fn dispatch(&mut self) -> Option<Frame> {
        let event = self.event.take();
        let data = std::mem::take(&mut self.data);
        if event.is_none() && data.is_empty() {
            return None;
        }
        Some(Frame {
            event: event.unwrap_or_else(|| DEFAULT_EVENT.to_string()),
            data: data.join("\n"),
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TokenPayload {
    Object { token: String },
    Bare(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorPayload {
    Object { error: String },
    Detail { detail: String },
    Bare(String),
}

impl TryFrom<&Frame> for StreamEvent {
    type Error = FrameError;

    fn try_from(frame: &Frame) -> Result<Self, FrameError> {
        match frame.event.as_str() {
            "sources" => serde_json::from_str::<Vec<Source>>(&frame.data)
                .map(StreamEvent::Sources)
                .map_err(|source| FrameError::Payload {
                    kind: "sources",
                    source,
                }),
            "token" => serde_json::from_str::<TokenPayload>(&frame.data)
                .map(|payload| match payload {
                    TokenPayload::Object { token } | TokenPayload::Bare(token) => {
                        StreamEvent::Token(token)
                    }
                })
                .map_err(|source| FrameError::Payload {
                    kind: "token",
                    source,
                }),
            "done" => Ok(StreamEvent::Done),
            // An error frame always terminates, even if its payload is odd
            "error" => {
                let message = match serde_json::from_str::<ErrorPayload>(&frame.data) {
                    Ok(
                        ErrorPayload::Object { error: message }
                        | ErrorPayload::Detail { detail: message }
                        | ErrorPayload::Bare(message),
                    ) => message,
                    Err(_) if !frame.data.trim().is_empty() => frame.data.trim().to_string(),
                    Err(_) => "Unknown stream error".to_string(),
                };
                Ok(StreamEvent::Error(message))
            }
            other => Err(FrameError::UnknownKind(other.to_string())),
        }
    }
}

struct DecodeState<S> {
    body: Pin<Box<S>>,
    decoder: FrameDecoder,
    ready: VecDeque<StreamEvent>,
    finished: bool,
}

impl<S> DecodeState<S> {
    fn enqueue(&mut self, frames: impl IntoIterator<Item = Frame>) {
        for frame in frames {
            match StreamEvent::try_from(&frame) {
                Ok(event) => self.ready.push_back(event),
                Err(e) => {
                    tracing::warn!(event = %frame.event, error = %e, "Skipping malformed frame");
                }
            }
        }
    }
}

/// Decode a chunked byte body into a lazy event stream.
///
/// A body error ends the stream with a synthetic `StreamEvent::Error`. A
/// clean end of body ends the stream with whatever frames were complete.
pub fn decode_stream<S, B, E>(body: S) -> BoxStream<'static, StreamEvent>
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let state = DecodeState {
        body: Box::pin(body),
        decoder: FrameDecoder::new(),
        ready: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.ready.pop_front() {
                if event.is_terminal() {
                    state.ready.clear();
                    state.finished = true;
                }
                return Some((event, state));
            }
            if state.finished {
                return None;
            }
            match state.body.next().await {
                Some(Ok(chunk)) => {
                    let frames = state.decoder.push(chunk.as_ref());
                    state.enqueue(frames);
                }
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((StreamEvent::Error(format!("Stream interrupted: {e}")), state));
                }
                None => {
                    state.finished = true;
                    let tail = state.decoder.finish();
                    state.enqueue(tail);
                }
            }
        }
    })
    .boxed()
}
