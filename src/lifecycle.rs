//! Conversation status transitions and the composer guard derived from them.
//!
//! ```text
//! active ──close──────────────────────────▶ closed
//! active ──complete(keep_open)──▶ completed ──close──▶ closed
//! active ──complete(close_conversation)───▶ closed (+ task_completed)
//! ```

use log::warn;
use thiserror::Error;

use crate::api::events::ServerEvent;
use crate::api::models::{CompletionAction, ConversationId, ConversationStatus, Message};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Close,
    Complete(CompletionAction),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot apply {transition:?} to a {from} conversation")]
pub struct InvalidTransition {
    pub from: ConversationStatus,
    pub transition: Transition,
}

pub fn next_status(
    from: ConversationStatus,
    transition: Transition,
) -> Result<ConversationStatus, InvalidTransition> {
    use ConversationStatus::*;
    match (from, transition) {
        (Active | Completed, Transition::Close) => Ok(Closed),
        (Active, Transition::Complete(CompletionAction::KeepOpen)) => Ok(Completed),
        (Active, Transition::Complete(CompletionAction::CloseConversation)) => Ok(Closed),
        _ => Err(InvalidTransition { from, transition }),
    }
}

/// Status a conversation ends up with after the server reports `incoming`.
/// Closed is terminal, apart from being archived.
pub fn reconcile(
    id: &str,
    current: ConversationStatus,
    incoming: ConversationStatus,
) -> ConversationStatus {
    use ConversationStatus::*;
    if current == Closed && !matches!(incoming, Closed | Archived) {
        warn!("conversation {id} is closed, ignoring transition to {incoming}");
        return current;
    }
    incoming
}

/// A status change, whether initiated here or pushed by the channel.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub conversation_id: ConversationId,
    pub status: ConversationStatus,
    pub task_completed: bool,
    pub system_message: Option<Message>,
}

impl StatusChange {
    pub fn closed(conversation_id: impl Into<ConversationId>, system_message: Option<Message>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            status: ConversationStatus::Closed,
            task_completed: false,
            system_message,
        }
    }

    pub fn completed(
        conversation_id: impl Into<ConversationId>,
        action: CompletionAction,
        system_message: Option<Message>,
    ) -> Self {
        let status = match action {
            CompletionAction::KeepOpen => ConversationStatus::Completed,
            CompletionAction::CloseConversation => ConversationStatus::Closed,
        };
        Self {
            conversation_id: conversation_id.into(),
            status,
            task_completed: true,
            system_message,
        }
    }

    pub fn from_event(event: &ServerEvent) -> Option<Self> {
        match event {
            ServerEvent::ConversationClosed { conversation_id, message } => {
                Some(Self::closed(conversation_id.clone(), message.clone()))
            }
            ServerEvent::TaskCompleted { conversation_id, action, message } => {
                Some(Self::completed(conversation_id.clone(), *action, message.clone()))
            }
            _ => None,
        }
    }
}

/// What the message composer may do, computed from status alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposerState {
    Enabled,
    Disabled { banner: &'static str },
}

impl ComposerState {
    pub fn for_status(status: ConversationStatus) -> Self {
        match status {
            ConversationStatus::Active => ComposerState::Enabled,
            ConversationStatus::Closed => ComposerState::Disabled {
                banner: "This conversation has been closed. No new messages can be sent.",
            },
            ConversationStatus::Completed => ComposerState::Disabled {
                banner: "The task has been completed. This conversation is read-only.",
            },
            ConversationStatus::Archived => ComposerState::Disabled {
                banner: "This conversation is archived.",
            },
        }
    }

    /// Covers text input, file attach and emoji insert alike.
    pub fn is_enabled(self) -> bool {
        matches!(self, ComposerState::Enabled)
    }

    pub fn banner(self) -> Option<&'static str> {
        match self {
            ComposerState::Enabled => None,
            ComposerState::Disabled { banner } => Some(banner),
        }
    }
}
