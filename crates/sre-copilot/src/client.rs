//! Consuming the relay's event stream.
//!
//! [`SseDecoder`] turns raw bytes into event payloads, [`ConversationView`] folds the payloads
//! into the state a front end renders, and [`StreamClient`] wires both to an HTTP response.

mod decoder;
mod view;

pub use decoder::SseDecoder;
pub use view::{ConversationView, SurfaceNode, ToolLogEntry, ToolStatus, ROOT_COMPONENT};

use futures::StreamExt;
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;

use crate::protocol::{ChatMessage, ChatRequest, StreamEvent};

/// Extension name that asks the relay for declarative UI events
pub const A2UI_EXTENSION: &str = "a2ui";

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Could not reach the SRE Copilot server at {url}")]
    Connection { url: String },

    #[error("The server rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("The connection to the server was lost")]
    Interrupted,
}

pub type ClientResult<T> = Result<T, ClientError>;

/// HTTP client for the relay
#[derive(Debug, Clone)]
pub struct StreamClient {
    client: Client,
    base_url: String,
}

impl StreamClient {
    pub fn new<S: Into<String>>(base_url: S) -> Self {
        let base_url: String = base_url.into();
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Build the body for one chat turn
    pub fn request(
        transcript: &[ChatMessage],
        thread_id: Option<&str>,
        a2ui: bool,
    ) -> ChatRequest {
        ChatRequest {
            messages: transcript.to_vec(),
            thread_id: thread_id.map(String::from),
            extensions: a2ui.then(|| vec![A2UI_EXTENSION.to_string()]),
        }
    }

    /// Run one turn against `POST /stream`.
    ///
    /// Every event applied to the view is passed to `on_event` together with the updated
    /// view. The stream ends when the server closes the connection.
    pub async fn stream<F>(
        &self,
        request: &ChatRequest,
        mut on_event: F,
    ) -> ClientResult<ConversationView>
    where
        F: FnMut(&StreamEvent, &ConversationView),
    {
        let url = self.url("/stream");
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, %url, "stream request failed");
                ClientError::Connection { url: url.clone() }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = rejection_message(response).await;
            return Err(ClientError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let mut decoder = SseDecoder::new();
        let mut view = ConversationView::new();
        let mut body = response.bytes_stream();

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| {
                tracing::error!(error = %e, "stream interrupted");
                ClientError::Interrupted
            })?;
            for payload in decoder.push(&chunk) {
                if let Some(event) = view.apply_payload(&payload) {
                    on_event(&event, &view);
                }
            }
        }
        for payload in decoder.finish() {
            if let Some(event) = view.apply_payload(&payload) {
                on_event(&event, &view);
            }
        }

        Ok(view)
    }

    /// `GET /status`
    pub async fn status(&self) -> ClientResult<Value> {
        self.get_json("/status").await
    }

    /// `GET /health`
    pub async fn health(&self) -> ClientResult<Value> {
        self.get_json("/health").await
    }

    async fn get_json(&self, path: &str) -> ClientResult<Value> {
        let url = self.url(path);
        let response = self.client.get(&url).send().await.map_err(|e| {
            tracing::error!(error = %e, %url, "request failed");
            ClientError::Connection { url: url.clone() }
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = rejection_message(response).await;
            return Err(ClientError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        response
            .json()
            .await
            .map_err(|_| ClientError::Interrupted)
    }
}

/// The `detail` field of an error body, or the raw body
async fn rejection_message(response: reqwest::Response) -> String {
    let body = response.text().await.unwrap_or_default();
    serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(String::from))
        .unwrap_or(body)
}
