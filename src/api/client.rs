//! HTTP client for the chat backend

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;

use crate::api::error::ApiError;
use crate::api::transport::{ByteStream, ChatTransport, StreamRequest};
use crate::session::convert::RawMessage;
use crate::transcript::types::SessionId;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    messages: Vec<RawMessage>,
}

#[derive(Debug, Deserialize)]
pub struct UploadResponse {
    pub file_path: String,
}

/// Backend REST + event-stream client
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    api_token: Option<String>,
    client: Client,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, api_token: Option<String>) -> Result<Self, ApiError> {
        let client = Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Status check that surfaces the backend's error body
    async fn ensure_success(response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::Status { status, body })
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<(), ApiError> {
        let response = self
            .authed(self.client.post(self.url(path)))
            .json(body)
            .send()
            .await?;
        Self::ensure_success(response).await?;
        Ok(())
    }

    /// Upload a workspace file; returns the backend path it landed at.
    pub async fn upload_file(&self, path: &Path) -> Result<UploadResponse, ApiError> {
        let bytes = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename);
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .authed(self.client.post(self.url("/files/upload")))
            .multipart(form)
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl ChatTransport for ApiClient {
    async fn open_stream(&self, request: StreamRequest) -> Result<ByteStream, ApiError> {
        let builder = match request {
            StreamRequest::Send {
                session_id,
                content,
                attachments,
            } => {
                let body = json!({
                    "session_id": session_id.as_ref().map(SessionId::as_str),
                    "content": content,
                    "attachments": attachments,
                });
                self.authed(self.client.post(self.url("/chat/send"))).json(&body)
            }
            StreamRequest::Continue { session_id } => {
                let body = json!({ "session_id": session_id.as_str() });
                self.authed(self.client.post(self.url("/chat/continue")))
                    .json(&body)
            }
            StreamRequest::Resubscribe { session_id } => self.authed(
                self.client
                    .get(self.url(&format!("/chat/subscribe/{}", session_id.as_str()))),
            ),
        };

        let response = Self::ensure_success(builder.send().await?).await?;
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(ApiError::Http));
        Ok(Box::pin(stream))
    }

    async fn abort(&self, session_id: &SessionId) -> Result<(), ApiError> {
        self.post_json("/chat/abort", &json!({ "session_id": session_id.as_str() }))
            .await
    }

    async fn submit_approval(&self, approval_id: &str, approved: bool) -> Result<(), ApiError> {
        self.post_json(
            &format!("/approvals/{approval_id}"),
            &json!({ "approved": approved }),
        )
        .await
    }

    async fn answer_question(&self, question_id: &str, answers: &[String]) -> Result<(), ApiError> {
        self.post_json(
            &format!("/questions/{question_id}"),
            &json!({ "answers": answers }),
        )
        .await
    }

    async fn rollback(&self, session_id: &SessionId, message_id: &str) -> Result<(), ApiError> {
        self.post_json(
            "/chat/rollback",
            &json!({ "session_id": session_id.as_str(), "message_id": message_id }),
        )
        .await
    }

    async fn fetch_messages(
        &self,
        session_id: &SessionId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<RawMessage>, ApiError> {
        let url = format!(
            "{}?limit={}&offset={}",
            self.url(&format!("/sessions/{}/messages", session_id.as_str())),
            limit,
            offset
        );
        let response = Self::ensure_success(self.authed(self.client.get(url)).send().await?).await?;
        let parsed: MessagesResponse = response.json().await?;
        Ok(parsed.messages)
    }

    async fn fetch_workbook_events(&self, session_id: &SessionId) -> Result<Value, ApiError> {
        let url = self.url(&format!("/sessions/{}/excel-events", session_id.as_str()));
        let response = Self::ensure_success(self.authed(self.client.get(url)).send().await?).await?;
        Ok(response.json().await?)
    }
}
