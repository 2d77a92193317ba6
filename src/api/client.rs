use async_trait::async_trait;
use log::debug;
use reqwest::multipart::{Form, Part};
use reqwest::{Client as HttpClient, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;

use crate::api::models::{
    CompletionAction, Conversation, ConversationLookup, FileDescriptor, FileUpload, Message,
    OutgoingMessage,
};
use crate::error::ApiError;

/// REST surface of the chat backend.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn conversations(&self) -> Result<Vec<Conversation>, ApiError>;
    /// History of a conversation, oldest first.
    async fn messages(&self, conversation_id: &str) -> Result<Vec<Message>, ApiError>;
    async fn send_message(
        &self,
        conversation_id: &str,
        body: &OutgoingMessage,
    ) -> Result<Message, ApiError>;
    async fn mark_read(&self, conversation_id: &str) -> Result<(), ApiError>;
    async fn upload(
        &self,
        conversation_id: &str,
        file: &FileUpload,
    ) -> Result<FileDescriptor, ApiError>;
    async fn search_by_code(&self, code: &str) -> Result<ConversationLookup, ApiError>;

    async fn leave_conversation(&self, conversation_id: &str) -> Result<(), ApiError>;
    async fn complete_task(
        &self,
        conversation_id: &str,
        action: CompletionAction,
    ) -> Result<(), ApiError>;
    async fn approve_task(&self, task_id: &str) -> Result<(), ApiError>;
    async fn reject_task(&self, task_id: &str, reason: Option<&str>) -> Result<(), ApiError>;
    async fn approve_partner_request(&self, request_id: &str) -> Result<(), ApiError>;
    async fn reject_partner_request(&self, request_id: &str) -> Result<(), ApiError>;
}

pub struct ApiClient {
    pub http: HttpClient,
    base_api: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, ApiError> {
        let http = HttpClient::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        let base_api = Self::base_api(base_url);
        url::Url::parse(&base_api)?;
        Ok(Self { http, base_api, token })
    }

    pub fn base_api(base_url: &str) -> String {
        let trimmed = base_url.trim_end_matches('/');
        if trimmed.ends_with("/api") { trimmed.to_string() } else { format!("{}/api", trimmed) }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_api, path)
    }

    fn with_auth(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(t) => req.header("Authorization", format!("Bearer {}", t)),
            None => req,
        }
    }

    async fn check(resp: Response) -> Result<Response, ApiError> {
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }
        if !status.is_success() {
            let message = resp
                .json::<Value>()
                .await
                .ok()
                .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
            return Err(ApiError::Http { status: status.as_u16(), message });
        }
        Ok(resp)
    }

    async fn fetch<T: DeserializeOwned>(&self, req: RequestBuilder, keys: &[&str]) -> Result<T, ApiError> {
        let resp = Self::check(self.with_auth(req).send().await?).await?;
        let json: Value = resp.json().await?;
        Ok(serde_json::from_value(unwrap_envelope(json, keys))?)
    }

    async fn execute(&self, req: RequestBuilder) -> Result<(), ApiError> {
        Self::check(self.with_auth(req).send().await?).await?;
        Ok(())
    }
}

/// The backend answers either with the bare payload or wrapped in an object
/// (`{"data": ...}`, `{"conversations": [...]}`, ...).
fn unwrap_envelope(json: Value, keys: &[&str]) -> Value {
    match json {
        Value::Object(mut map) => {
            for key in keys.iter().copied().chain(["data"]) {
                if let Some(inner) = map.remove(key) {
                    if !inner.is_null() {
                        return unwrap_envelope_data(inner, keys);
                    }
                }
            }
            Value::Object(map)
        }
        other => other,
    }
}

// `{"data": {"message": {...}}}` nests one more level.
fn unwrap_envelope_data(inner: Value, keys: &[&str]) -> Value {
    match &inner {
        Value::Object(map) if keys.iter().any(|k| map.contains_key(*k)) => unwrap_envelope(inner, keys),
        _ => inner,
    }
}

#[async_trait]
impl ChatApi for ApiClient {
    async fn conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        let req = self.http.get(self.url("/chat/conversations"));
        let list: Vec<Conversation> = self.fetch(req, &["conversations"]).await?;
        debug!("fetched {} conversations", list.len());
        Ok(list)
    }

    async fn messages(&self, conversation_id: &str) -> Result<Vec<Message>, ApiError> {
        let req = self
            .http
            .get(self.url(&format!("/chat/conversations/{}/messages", conversation_id)));
        self.fetch(req, &["messages"]).await
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        body: &OutgoingMessage,
    ) -> Result<Message, ApiError> {
        let req = self
            .http
            .post(self.url(&format!("/chat/conversations/{}/messages", conversation_id)))
            .json(body);
        self.fetch(req, &["message"]).await
    }

    async fn mark_read(&self, conversation_id: &str) -> Result<(), ApiError> {
        let req = self
            .http
            .put(self.url(&format!("/chat/conversations/{}/read", conversation_id)));
        self.execute(req).await
    }

    async fn upload(
        &self,
        conversation_id: &str,
        file: &FileUpload,
    ) -> Result<FileDescriptor, ApiError> {
        let part = Part::bytes(file.bytes.clone())
            .file_name(file.file_name.clone())
            .mime_str(&file.mime_type)?;
        let form = Form::new().part("file", part);
        let req = self
            .http
            .post(self.url(&format!("/chat/conversations/{}/upload", conversation_id)))
            .multipart(form);
        self.fetch(req, &["file"]).await
    }

    async fn search_by_code(&self, code: &str) -> Result<ConversationLookup, ApiError> {
        let req = self
            .http
            .get(self.url(&format!("/chat/conversations/search/{}", code)));
        self.fetch(req, &[]).await
    }

    async fn leave_conversation(&self, conversation_id: &str) -> Result<(), ApiError> {
        let req = self
            .http
            .post(self.url(&format!("/admin/conversations/{}/leave", conversation_id)));
        self.execute(req).await
    }

    async fn complete_task(
        &self,
        conversation_id: &str,
        action: CompletionAction,
    ) -> Result<(), ApiError> {
        let req = self
            .http
            .post(self.url(&format!("/admin/conversations/{}/complete", conversation_id)))
            .json(&json!({ "action": action }));
        self.execute(req).await
    }

    async fn approve_task(&self, task_id: &str) -> Result<(), ApiError> {
        let req = self.http.put(self.url(&format!("/admin/tasks/{}/approve", task_id)));
        self.execute(req).await
    }

    async fn reject_task(&self, task_id: &str, reason: Option<&str>) -> Result<(), ApiError> {
        let req = self
            .http
            .put(self.url(&format!("/admin/tasks/{}/reject", task_id)))
            .json(&json!({ "reason": reason }));
        self.execute(req).await
    }

    async fn approve_partner_request(&self, request_id: &str) -> Result<(), ApiError> {
        let req = self
            .http
            .put(self.url(&format!("/admin/partner-requests/{}/approve", request_id)));
        self.execute(req).await
    }

    async fn reject_partner_request(&self, request_id: &str) -> Result<(), ApiError> {
        let req = self
            .http
            .put(self.url(&format!("/admin/partner-requests/{}/reject", request_id)));
        self.execute(req).await
    }
}
