#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use mousaada_chat::api::client::ChatApi;
use mousaada_chat::api::models::{
    CompletionAction, Conversation, ConversationLookup, ConversationStatus, Delivery,
    FileDescriptor, FileUpload, Message, MessageType, OutgoingMessage, Participant, Role,
};
use mousaada_chat::{ApiError, ChatSession, SessionOptions};

pub const LOCAL: &str = "U1";

pub fn ts(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(1_714_557_600_000 + ms).unwrap()
}

pub fn conversation(id: &str, counterpart: &str, name: &str) -> Conversation {
    Conversation {
        id: id.into(),
        conversation_code: Some(format!("CONV-{}", id.to_uppercase())),
        participants: vec![
            Participant { user_id: LOCAL.into(), role: Role::Student, name: Some("Amine".into()) },
            Participant { user_id: counterpart.into(), role: Role::Partner, name: Some(name.into()) },
        ],
        status: ConversationStatus::Active,
        task_completed: false,
        unread_count: HashMap::new(),
        last_message: None,
        assigned_agent: None,
        task_title: None,
        updated_at: None,
    }
}

pub fn with_unread(mut conv: Conversation, count: u32) -> Conversation {
    conv.unread_count.insert(LOCAL.into(), count);
    conv
}

pub fn with_status(mut conv: Conversation, status: ConversationStatus) -> Conversation {
    conv.status = status;
    conv
}

pub fn message(id: &str, conv: &str, sender: &str, content: &str, at_ms: i64) -> Message {
    Message {
        delivery: Delivery::Confirmed { id: id.into() },
        conversation_id: conv.into(),
        sender_id: sender.into(),
        content: content.into(),
        created_at: ts(at_ms),
        message_type: MessageType::Text,
        attachment: None,
        is_read: false,
    }
}

/// Canned failure for the next call of a kind. `ApiError` is not `Clone`,
/// so failures are described and built on demand.
#[derive(Debug, Clone, Copy)]
pub enum Failure {
    Status(u16),
    Unauthorized,
}

impl Failure {
    fn error(self) -> ApiError {
        match self {
            Failure::Status(status) => ApiError::Http { status, message: "refused".into() },
            Failure::Unauthorized => ApiError::Unauthorized,
        }
    }
}

#[derive(Default)]
pub struct FakeState {
    pub conversations: Vec<Conversation>,
    pub history: HashMap<String, Vec<Message>>,
    pub lookups: HashMap<String, Conversation>,
    pub fail_send: Option<Failure>,
    pub fail_upload: Option<Failure>,
    pub fail_all: Option<Failure>,
    pub calls: Vec<String>,
    pub sent: Vec<(String, OutgoingMessage)>,
    next_id: u32,
}

/// In-memory backend. Clones share state so a test can inspect calls after
/// handing one copy to the session.
#[derive(Clone, Default)]
pub struct FakeApi {
    state: Arc<Mutex<FakeState>>,
}

impl FakeApi {
    pub fn with_conversations(list: Vec<Conversation>) -> Self {
        let api = FakeApi::default();
        api.state().conversations = list;
        api
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn called(&self, prefix: &str) -> usize {
        self.state().calls.iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn record(&self, call: String) -> Result<(), ApiError> {
        let mut state = self.state();
        state.calls.push(call);
        match state.fail_all {
            Some(f) => Err(f.error()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ChatApi for FakeApi {
    async fn conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        self.record("conversations".into())?;
        Ok(self.state().conversations.clone())
    }

    async fn messages(&self, conversation_id: &str) -> Result<Vec<Message>, ApiError> {
        self.record(format!("messages {conversation_id}"))?;
        Ok(self.state().history.get(conversation_id).cloned().unwrap_or_default())
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        body: &OutgoingMessage,
    ) -> Result<Message, ApiError> {
        self.record(format!("send {conversation_id}"))?;
        let mut state = self.state();
        if let Some(f) = state.fail_send.take() {
            return Err(f.error());
        }
        state.next_id += 1;
        state.sent.push((conversation_id.to_string(), body.clone()));
        let mut msg = message(
            &format!("m{}", state.next_id),
            conversation_id,
            LOCAL,
            &body.content,
            0,
        );
        msg.created_at = Utc::now();
        if let Some(kind) = body.message_type {
            msg.message_type = kind;
        }
        Ok(msg)
    }

    async fn mark_read(&self, conversation_id: &str) -> Result<(), ApiError> {
        self.record(format!("read {conversation_id}"))
    }

    async fn upload(
        &self,
        conversation_id: &str,
        file: &FileUpload,
    ) -> Result<FileDescriptor, ApiError> {
        self.record(format!("upload {conversation_id}"))?;
        if let Some(f) = self.state().fail_upload.take() {
            return Err(f.error());
        }
        Ok(FileDescriptor {
            url: format!("/uploads/{}", file.file_name),
            file_name: file.file_name.clone(),
            file_size: file.size(),
            mime_type: file.mime_type.clone(),
            kind: MessageType::Pdf,
        })
    }

    async fn search_by_code(&self, code: &str) -> Result<ConversationLookup, ApiError> {
        self.record(format!("search {code}"))?;
        let state = self.state();
        let conversation = state
            .lookups
            .get(code)
            .cloned()
            .ok_or(ApiError::Http { status: 404, message: "Conversation not found".into() })?;
        let messages = state.history.get(&conversation.id).cloned().unwrap_or_default();
        Ok(ConversationLookup { conversation, assigned_agent: None, messages })
    }

    async fn leave_conversation(&self, conversation_id: &str) -> Result<(), ApiError> {
        self.record(format!("leave {conversation_id}"))
    }

    async fn complete_task(
        &self,
        conversation_id: &str,
        action: CompletionAction,
    ) -> Result<(), ApiError> {
        self.record(format!("complete {conversation_id} {action:?}"))
    }

    async fn approve_task(&self, task_id: &str) -> Result<(), ApiError> {
        self.record(format!("approve-task {task_id}"))
    }

    async fn reject_task(&self, task_id: &str, reason: Option<&str>) -> Result<(), ApiError> {
        self.record(format!("reject-task {task_id} {}", reason.unwrap_or("-")))
    }

    async fn approve_partner_request(&self, request_id: &str) -> Result<(), ApiError> {
        self.record(format!("approve-partner {request_id}"))
    }

    async fn reject_partner_request(&self, request_id: &str) -> Result<(), ApiError> {
        self.record(format!("reject-partner {request_id}"))
    }
}

/// Session over a fake backend with the list already loaded.
pub async fn session_with(list: Vec<Conversation>) -> (ChatSession<FakeApi>, FakeApi) {
    let api = FakeApi::with_conversations(list);
    let mut session = ChatSession::new(api.clone(), LOCAL, SessionOptions::default());
    session.refresh_conversations().await.unwrap();
    (session, api)
}
