//! HTTP implementation of the answering-service client

use super::{
    decode_stream, validate_question, Answer, AnswerTransport, EventStream, StreamEvent,
    TransportError,
};
use crate::message::Source;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::{Client, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Client for `{base_url}/chat/{slug}/stream` and `{base_url}/chat/{slug}/ask`
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: Url,
    request_timeout: Duration,
}

impl HttpTransport {
    /// `request_timeout` bounds `ask` only; streams are bounded by the caller.
    ///
    /// # Errors
    ///
    /// Fails if `base_url` is not an absolute URL that can carry a path, or
    /// the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let base_url = Url::parse(base_url).map_err(|e| {
            TransportError::invalid_request(format!("Invalid base URL {base_url}: {e}"))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(TransportError::invalid_request(format!(
                "Base URL cannot carry a path: {base_url}"
            )));
        }

        // No overall timeout here: streamed answers may legitimately run long
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| TransportError::unknown(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            request_timeout,
        })
    }

    fn endpoint(&self, slug: &str, action: &str) -> Url {
        let mut url = self.base_url.clone();
        // cannot_be_a_base was rejected in new()
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(["chat", slug, action]);
        }
        url
    }

    async fn post_question(
        client: Client,
        url: Url,
        question: String,
        timeout: Option<Duration>,
    ) -> Result<Response, TransportError> {
        let mut request = client.post(url).json(&QuestionBody { question: &question });
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }
}

#[async_trait]
impl AnswerTransport for HttpTransport {
    fn open_stream(&self, slug: &str, question: &str) -> EventStream {
        let question = match validate_question(question) {
            Ok(q) => q.to_string(),
            Err(e) => return stream::iter([StreamEvent::Error(e.message)]).boxed(),
        };
        let client = self.client.clone();
        let url = self.endpoint(slug, "stream");

        stream::once(async move {
            tracing::debug!(url = %url, "Opening answer stream");
            match Self::post_question(client, url, question, None).await {
                Ok(response) => decode_stream(response.bytes_stream()),
                Err(e) => stream::iter([StreamEvent::Error(e.message)]).boxed(),
            }
        })
        .flatten()
        .boxed()
    }

    async fn ask(&self, slug: &str, question: &str) -> Result<Answer, TransportError> {
        let question = validate_question(question)?.to_string();
        let url = self.endpoint(slug, "ask");
        let response =
            Self::post_question(self.client.clone(), url, question, Some(self.request_timeout))
                .await?;

        let body: AskResponse = response
            .json()
            .await
            .map_err(|e| TransportError::from_reqwest(&e))?;

        Ok(Answer {
            answer: body.answer,
            sources: body.sources,
            model_used: body.model_used,
        })
    }
}

/// Map a non-success status to an error, preferring the service's own message
fn classify_status(status: StatusCode, body: &str) -> TransportError {
    let detail = extract_detail(body)
        .or_else(|| status.canonical_reason().map(str::to_string))
        .unwrap_or_default();
    let message = format!("HTTP {}: {detail}", status.as_u16());
    match status.as_u16() {
        400..=499 => TransportError::rejected(message),
        500..=599 => TransportError::server_error(message),
        _ => TransportError::unknown(message),
    }
}

fn extract_detail(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }
    let Ok(parsed) = serde_json::from_str::<serde_json::Value>(body) else {
        return Some(body.to_string());
    };
    let field = parsed.get("detail").or_else(|| parsed.get("error"));
    match field {
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
        None => Some(body.to_string()),
    }
}

// Wire types

#[derive(Debug, Serialize)]
struct QuestionBody<'a> {
    question: &'a str,
}

#[derive(Debug, Deserialize)]
struct AskResponse {
    answer: String,
    #[serde(default)]
    sources: Vec<Source>,
    #[serde(default)]
    model_used: Option<String>,
}
