use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

pub type ConversationId = String;
pub type UserId = String;
pub type MessageId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Partner,
    Admin,
    Superadmin,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: UserId,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    #[default]
    Active,
    Closed,
    Completed,
    Archived,
}

impl ConversationStatus {
    /// Only an active conversation accepts new messages.
    pub fn accepts_messages(self) -> bool {
        matches!(self, ConversationStatus::Active)
    }

    pub fn is_archived(self) -> bool {
        matches!(self, ConversationStatus::Archived)
    }
}

impl fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConversationStatus::Active => "active",
            ConversationStatus::Closed => "closed",
            ConversationStatus::Completed => "completed",
            ConversationStatus::Archived => "archived",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub content: String,
    pub sender_id: UserId,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignedAgent {
    #[serde(rename = "_id", alias = "id")]
    pub id: UserId,
    pub name: String,
    #[serde(default)]
    pub assigned_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    #[serde(rename = "_id", alias = "id")]
    pub id: ConversationId,
    #[serde(default)]
    pub conversation_code: Option<String>,
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub status: ConversationStatus,
    #[serde(default)]
    pub task_completed: bool,
    #[serde(default)]
    pub unread_count: HashMap<UserId, u32>,
    #[serde(default)]
    pub last_message: Option<LastMessage>,
    #[serde(default)]
    pub assigned_agent: Option<AssignedAgent>,
    #[serde(default)]
    pub task_title: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Conversation {
    /// The participant that is not `local_user`.
    pub fn counterpart(&self, local_user: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id != local_user)
    }

    pub fn counterpart_name(&self, local_user: &str) -> &str {
        self.counterpart(local_user)
            .and_then(|p| p.name.as_deref())
            .unwrap_or("")
    }

    pub fn unread_for(&self, user: &str) -> u32 {
        self.unread_count.get(user).copied().unwrap_or(0)
    }

    /// Timestamp used for recency ordering.
    pub fn activity_at(&self) -> Option<DateTime<Utc>> {
        self.last_message
            .as_ref()
            .map(|m| m.timestamp)
            .or(self.updated_at)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    System,
    Image,
    Video,
    Audio,
    Pdf,
    File,
}

impl MessageType {
    pub fn carries_file(self) -> bool {
        !matches!(self, MessageType::Text | MessageType::System)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub file_url: String,
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
}

/// Client-side identity of a message that has not been confirmed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalId(u64);

static LOCAL_SEQ: AtomicU64 = AtomicU64::new(1);

impl LocalId {
    pub fn next() -> Self {
        LocalId(LOCAL_SEQ.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "local-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Pending { local_id: LocalId },
    Confirmed { id: MessageId },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "WireMessage")]
pub struct Message {
    pub delivery: Delivery,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub message_type: MessageType,
    pub attachment: Option<Attachment>,
    pub is_read: bool,
}

impl Message {
    pub fn pending(
        local_id: LocalId,
        conversation_id: ConversationId,
        sender_id: UserId,
        content: String,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            delivery: Delivery::Pending { local_id },
            conversation_id,
            sender_id,
            content,
            created_at,
            message_type: MessageType::Text,
            attachment: None,
            is_read: false,
        }
    }

    pub fn server_id(&self) -> Option<&str> {
        match &self.delivery {
            Delivery::Confirmed { id } => Some(id),
            Delivery::Pending { .. } => None,
        }
    }

    pub fn local_id(&self) -> Option<LocalId> {
        match self.delivery {
            Delivery::Pending { local_id } => Some(local_id),
            Delivery::Confirmed { .. } => None,
        }
    }

    pub fn is_sending(&self) -> bool {
        matches!(self.delivery, Delivery::Pending { .. })
    }

    pub fn snapshot(&self) -> LastMessage {
        LastMessage {
            content: self.content.clone(),
            sender_id: self.sender_id.clone(),
            timestamp: self.created_at,
        }
    }
}

// The backend populates `senderId` with the user document on some routes.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SenderRef {
    Id(UserId),
    User {
        #[serde(rename = "_id", alias = "id")]
        id: UserId,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    #[serde(rename = "_id", alias = "id")]
    id: MessageId,
    #[serde(default)]
    conversation_id: ConversationId,
    sender_id: SenderRef,
    #[serde(default)]
    content: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    message_type: MessageType,
    #[serde(default)]
    file_url: Option<String>,
    #[serde(default)]
    file_name: Option<String>,
    #[serde(default)]
    file_size: Option<u64>,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    is_read: bool,
}

impl From<WireMessage> for Message {
    fn from(w: WireMessage) -> Self {
        let sender_id = match w.sender_id {
            SenderRef::Id(id) => id,
            SenderRef::User { id } => id,
        };
        let attachment = match (w.message_type.carries_file(), w.file_url) {
            (true, Some(file_url)) => Some(Attachment {
                file_url,
                file_name: w.file_name.unwrap_or_default(),
                file_size: w.file_size.unwrap_or(0),
                mime_type: w.mime_type.unwrap_or_default(),
            }),
            _ => None,
        };
        Message {
            delivery: Delivery::Confirmed { id: w.id },
            conversation_id: w.conversation_id,
            sender_id,
            content: w.content,
            created_at: w.created_at,
            message_type: w.message_type,
            attachment,
            is_read: w.is_read,
        }
    }
}

/// Body of `POST /chat/conversations/:id/messages`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_type: Option<MessageType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl OutgoingMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            message_type: None,
            file_url: None,
            file_name: None,
            file_size: None,
            mime_type: None,
        }
    }

    pub fn file(content: impl Into<String>, file: &FileDescriptor) -> Self {
        Self {
            content: content.into(),
            message_type: Some(file.kind),
            file_url: Some(file.url.clone()),
            file_name: Some(file.file_name.clone()),
            file_size: Some(file.file_size),
            mime_type: Some(file.mime_type.clone()),
        }
    }
}

/// What the upload endpoint returns for a stored file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    pub url: String,
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
    #[serde(rename = "type", default = "default_file_kind")]
    pub kind: MessageType,
}

fn default_file_kind() -> MessageType {
    MessageType::File
}

impl FileDescriptor {
    pub fn attachment(&self) -> Attachment {
        Attachment {
            file_url: self.url.clone(),
            file_name: self.file_name.clone(),
            file_size: self.file_size,
            mime_type: self.mime_type.clone(),
        }
    }
}

/// A local file to be uploaded before it is referenced by a message.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl FileUpload {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Support lookup result for a `CONV-XXXXXX` code.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationLookup {
    pub conversation: Conversation,
    #[serde(default)]
    pub assigned_agent: Option<AssignedAgent>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionAction {
    KeepOpen,
    CloseConversation,
}
