//! Optimistic send path and inbound deduplication.
//!
//! A send is split in two so the REST write can be awaited anywhere while the
//! store stays usable: [`prepare_send`] validates, appends the pending copy and
//! clears the composer; [`complete_send`] applies the outcome to the
//! conversation captured at prepare time, whatever is selected by then.

use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, error};

use crate::api::models::{
    ConversationId, FileDescriptor, LocalId, Message, OutgoingMessage,
};
use crate::error::{ApiError, SendError, SendRejected};
use crate::store::{ConfirmOutcome, ConversationStore};

pub const DEFAULT_DEDUP_WINDOW_MS: i64 = 1000;
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

/// Whether `incoming` is another copy of `existing`.
///
/// Same server id, or same content and sender with timestamps strictly less
/// than `window` apart. Two identical messages sent by one user inside the
/// window collapse into one.
pub fn is_duplicate(existing: &Message, incoming: &Message, window: TimeDelta) -> bool {
    if let (Some(a), Some(b)) = (existing.server_id(), incoming.server_id()) {
        if a == b {
            return true;
        }
    }
    existing.content == incoming.content
        && existing.sender_id == incoming.sender_id
        && (existing.created_at - incoming.created_at).abs() < window
}

/// A send whose network write has not resolved yet.
#[derive(Debug, Clone)]
pub struct PendingSend {
    pub conversation_id: ConversationId,
    pub local_id: LocalId,
    pub body: OutgoingMessage,
    restore: Option<String>,
}

/// Holds the in-flight slot of a conversation while its file uploads.
#[derive(Debug)]
pub struct UploadTicket {
    pub conversation_id: ConversationId,
}

fn check_sendable(store: &ConversationStore, id: &str) -> Result<(), SendRejected> {
    if store.is_sending(id) {
        return Err(SendRejected::SendInFlight);
    }
    let status = store
        .conversation(id)
        .map(|c| c.status)
        .ok_or(SendRejected::NoConversationSelected)?;
    if !status.accepts_messages() {
        return Err(SendRejected::ConversationInactive(status));
    }
    Ok(())
}

pub fn prepare_send(store: &mut ConversationStore, now: DateTime<Utc>) -> Result<PendingSend, SendRejected> {
    let draft = store.composer_text().to_string();
    let content = draft.trim();
    if content.is_empty() {
        return Err(SendRejected::EmptyContent);
    }
    let conversation_id = store
        .current_id()
        .map(str::to_string)
        .ok_or(SendRejected::NoConversationSelected)?;
    check_sendable(store, &conversation_id)?;

    let local_id = LocalId::next();
    let message = Message::pending(
        local_id,
        conversation_id.clone(),
        store.local_user().to_string(),
        content.to_string(),
        now,
    );
    let body = OutgoingMessage::text(content);
    store.begin_send(&conversation_id);
    store.push_local(message);
    store.set_draft(&conversation_id, "");
    debug!("sending {local_id} to {conversation_id}");

    Ok(PendingSend { conversation_id, local_id, body, restore: Some(draft) })
}

/// Validates an attachment and reserves the conversation's send slot for
/// the upload. No local message exists until the upload succeeds.
pub fn prepare_upload(
    store: &mut ConversationStore,
    size: u64,
    limit: u64,
) -> Result<UploadTicket, SendRejected> {
    let conversation_id = store
        .current_id()
        .map(str::to_string)
        .ok_or(SendRejected::NoConversationSelected)?;
    if size > limit {
        return Err(SendRejected::FileTooLarge { size, limit });
    }
    check_sendable(store, &conversation_id)?;
    store.begin_send(&conversation_id);
    Ok(UploadTicket { conversation_id })
}

pub fn upload_failed(store: &mut ConversationStore, ticket: UploadTicket, err: ApiError) -> SendError {
    error!("upload to {} failed: {err}", ticket.conversation_id);
    store.finish_send(&ticket.conversation_id);
    SendError::Upload(err)
}

/// Turns an uploaded file into an optimistic message.
pub fn prepare_attachment_send(
    store: &mut ConversationStore,
    ticket: UploadTicket,
    file: &FileDescriptor,
    now: DateTime<Utc>,
) -> Result<PendingSend, SendRejected> {
    let UploadTicket { conversation_id } = ticket;
    store.finish_send(&conversation_id);
    // The conversation may have been closed while the file was uploading.
    check_sendable(store, &conversation_id)?;

    let local_id = LocalId::next();
    let mut message = Message::pending(
        local_id,
        conversation_id.clone(),
        store.local_user().to_string(),
        file.file_name.clone(),
        now,
    );
    message.message_type = file.kind;
    message.attachment = Some(file.attachment());
    store.begin_send(&conversation_id);
    store.push_local(message);

    Ok(PendingSend {
        body: OutgoingMessage::file(file.file_name.clone(), file),
        conversation_id,
        local_id,
        restore: None,
    })
}

/// Applies the network result of a send to the conversation it targeted.
pub fn complete_send(
    store: &mut ConversationStore,
    pending: PendingSend,
    result: Result<Message, ApiError>,
) -> Result<(), SendError> {
    let PendingSend { conversation_id, local_id, restore, .. } = pending;
    store.finish_send(&conversation_id);
    match result {
        Ok(mut confirmed) => {
            if confirmed.conversation_id.is_empty() {
                confirmed.conversation_id = conversation_id.clone();
            }
            match store.confirm_local(&conversation_id, local_id, confirmed) {
                ConfirmOutcome::Dropped => debug!("{local_id} already delivered by the channel"),
                ConfirmOutcome::Replaced | ConfirmOutcome::NotOpen => {}
            }
            Ok(())
        }
        Err(err) => {
            error!("send to {conversation_id} failed: {err}");
            store.discard_local(&conversation_id, local_id);
            if let Some(text) = restore {
                let current = store.draft(&conversation_id);
                let restored = if current.is_empty() { text } else { format!("{text}\n{current}") };
                store.set_draft(&conversation_id, restored);
            }
            Err(SendError::Send(err))
        }
    }
}
