//! Test doubles for the transport and key/value seams

use crate::persistence::{KvError, KvStore};
use crate::transport::{Answer, AnswerTransport, EventStream, StreamEvent, TransportError};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};

enum Script {
    /// Yield these events, then end
    Events(Vec<StreamEvent>),
    /// Yield these events, then never produce anything again
    Hanging(Vec<StreamEvent>),
    /// Yield whatever the test sends, ending when the sender is dropped
    Channel(mpsc::UnboundedReceiver<StreamEvent>),
}

/// Transport that replays queued streams and answers
pub struct ScriptedTransport {
    streams: Mutex<VecDeque<Script>>,
    answers: Mutex<VecDeque<Result<Answer, TransportError>>>,
    /// `(slug, question)` for every `open_stream` call
    pub requests: Mutex<Vec<(String, String)>>,
    /// `(slug, question)` for every `ask` call
    pub asks: Mutex<Vec<(String, String)>>,
    /// Signalled whenever a stream is opened
    pub stream_started: Arc<Notify>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            streams: Mutex::new(VecDeque::new()),
            answers: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            asks: Mutex::new(Vec::new()),
            stream_started: Arc::new(Notify::new()),
        }
    }

    pub fn queue_stream(&self, events: Vec<StreamEvent>) {
        self.streams.lock().unwrap().push_back(Script::Events(events));
    }

    pub fn queue_hanging_stream(&self, events: Vec<StreamEvent>) {
        self.streams.lock().unwrap().push_back(Script::Hanging(events));
    }

    /// Queue a stream fed by the returned sender
    pub fn queue_channel_stream(&self) -> mpsc::UnboundedSender<StreamEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.streams.lock().unwrap().push_back(Script::Channel(rx));
        tx
    }

    pub fn queue_answer(&self, answer: Result<Answer, TransportError>) {
        self.answers.lock().unwrap().push_back(answer);
    }

    pub fn recorded_requests(&self) -> Vec<(String, String)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn recorded_asks(&self) -> Vec<(String, String)> {
        self.asks.lock().unwrap().clone()
    }
}

#[async_trait]
impl AnswerTransport for ScriptedTransport {
    fn open_stream(&self, slug: &str, question: &str) -> EventStream {
        self.requests
            .lock()
            .unwrap()
            .push((slug.to_string(), question.to_string()));
        let script = self.streams.lock().unwrap().pop_front();
        self.stream_started.notify_one();

        match script {
            Some(Script::Events(events)) => stream::iter(events).boxed(),
            Some(Script::Hanging(events)) => stream::iter(events).chain(stream::pending()).boxed(),
            Some(Script::Channel(rx)) => {
                stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|e| (e, rx)) })
                    .boxed()
            }
            None => stream::iter([StreamEvent::Error("No scripted stream queued".to_string())])
                .boxed(),
        }
    }

    async fn ask(&self, slug: &str, question: &str) -> Result<Answer, TransportError> {
        self.asks
            .lock()
            .unwrap()
            .push((slug.to_string(), question.to_string()));
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::network("No scripted answer queued")))
    }
}

/// Key/value store whose every operation fails
pub struct FailingKv;

impl KvStore for FailingKv {
    fn get(&self, _key: &str) -> Result<Option<String>, KvError> {
        Err(KvError::Unavailable("disk full".to_string()))
    }

    fn set(&self, _key: &str, _value: &str) -> Result<(), KvError> {
        Err(KvError::Unavailable("disk full".to_string()))
    }

    fn remove(&self, _key: &str) -> Result<(), KvError> {
        Err(KvError::Unavailable("disk full".to_string()))
    }

    fn keys_with_prefix(&self, _prefix: &str) -> Result<Vec<String>, KvError> {
        Err(KvError::Unavailable("disk full".to_string()))
    }
}
