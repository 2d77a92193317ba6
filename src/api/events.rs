use serde::{Deserialize, Serialize};

use crate::api::models::{
    CompletionAction, ConversationId, Message, UserId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// Frames pushed by the server, as `{"event": <name>, "data": <payload>}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    #[serde(rename = "user:status")]
    UserStatus { user_id: UserId, status: PresenceStatus },
    #[serde(rename = "message:received")]
    MessageReceived {
        message: Message,
        conversation_id: ConversationId,
    },
    #[serde(rename = "messages:read")]
    MessagesRead {
        user_id: UserId,
        #[serde(default)]
        conversation_id: Option<ConversationId>,
    },
    #[serde(rename = "typing:start")]
    TypingStart {
        conversation_id: ConversationId,
        #[serde(default)]
        user_id: Option<UserId>,
    },
    #[serde(rename = "typing:stop")]
    TypingStop {
        conversation_id: ConversationId,
        #[serde(default)]
        user_id: Option<UserId>,
    },
    #[serde(rename = "conversation:closed")]
    ConversationClosed {
        conversation_id: ConversationId,
        #[serde(default)]
        message: Option<Message>,
    },
    #[serde(rename = "task:completed")]
    TaskCompleted {
        conversation_id: ConversationId,
        action: CompletionAction,
        #[serde(default)]
        message: Option<Message>,
    },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::UserStatus { .. } => "user:status",
            ServerEvent::MessageReceived { .. } => "message:received",
            ServerEvent::MessagesRead { .. } => "messages:read",
            ServerEvent::TypingStart { .. } => "typing:start",
            ServerEvent::TypingStop { .. } => "typing:stop",
            ServerEvent::ConversationClosed { .. } => "conversation:closed",
            ServerEvent::TaskCompleted { .. } => "task:completed",
        }
    }
}

/// Frames the client emits. Delivery is best effort.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    #[serde(rename = "user:online")]
    UserOnline(UserId),
    #[serde(rename = "conversation:join")]
    ConversationJoin(ConversationId),
    #[serde(rename = "conversation:leave")]
    ConversationLeave(ConversationId),
    #[serde(rename = "typing:start")]
    TypingStart { conversation_id: ConversationId },
    #[serde(rename = "typing:stop")]
    TypingStop { conversation_id: ConversationId },
}
