use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{BoxStream, StreamExt};
use reqwest::{Client, StatusCode};
use serde::Serialize;

use crate::error::ChatError;

/// Request body for `POST /chat`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub message: String,
    pub personality_intensity: u8,
    pub mute: bool,
}

/// Response body as it arrives, one read at a time.
pub type ByteStream = BoxStream<'static, Result<Bytes, ChatError>>;

/// Opens the streaming response for one chat turn.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn open(
        &self,
        request: &ChatRequest,
        bearer_token: Option<&str>,
    ) -> Result<ByteStream, ChatError>;
}

/// reqwest transport for the Mimir backend.
#[derive(Clone)]
pub struct HttpChatClient {
    client: Client,
    base_url: String,
}

impl HttpChatClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn chat_url(&self) -> String {
        format!("{}/chat", self.base_url)
    }
}

#[async_trait]
impl ChatTransport for HttpChatClient {
    async fn open(
        &self,
        request: &ChatRequest,
        bearer_token: Option<&str>,
    ) -> Result<ByteStream, ChatError> {
        let mut builder = self.client.post(self.chat_url()).json(request);
        if let Some(token) = bearer_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Status {
                status: status.as_u16(),
                body,
            });
        }

        if !has_body(response.status()) {
            return Err(ChatError::Stream("no response body".to_string()));
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ChatError::from))
            .boxed())
    }
}

/// Statuses whose response carries no body at all, so there is nothing to stream.
fn has_body(status: StatusCode) -> bool {
    !matches!(status, StatusCode::NO_CONTENT | StatusCode::RESET_CONTENT)
}
