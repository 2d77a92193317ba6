use chrono::Utc;
use log::{debug, info, warn};
use tokio::time::{Instant, sleep_until};

use crate::api::client::ChatApi;
use crate::api::events::{PresenceStatus, ServerEvent};
use crate::api::models::{Conversation, ConversationLookup, FileUpload, Message};
use crate::dispatch::{self, DEFAULT_MAX_UPLOAD_BYTES};
use crate::error::{ApiError, SendError};
use crate::lifecycle::StatusChange;
use crate::realtime::{ChannelClient, ConnectionState};
use crate::store::{ConversationStore, InboundOutcome, StoreOptions};

#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub store: StoreOptions,
    pub max_upload_bytes: u64,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self { store: StoreOptions::default(), max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES }
    }
}

/// What changed after [`ChatSession::poll`] returned.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    Message { conversation_id: String, outcome: InboundOutcome },
    ReadReceipt { flipped: usize },
    Presence { user_id: String, online: bool },
    Typing { conversation_id: String },
    TypingExpired,
    Status { conversation_id: String, open: bool },
    ChannelDown,
}

/// Everything a signed-in user needs, built at sign-in and dropped at
/// sign-out. The store is only written from here.
pub struct ChatSession<A> {
    pub(crate) api: A,
    pub(crate) store: ConversationStore,
    channel: Option<ChannelClient>,
    max_upload_bytes: u64,
    typing_emitted_at: Option<Instant>,
    logged_out: bool,
}

impl<A: ChatApi> ChatSession<A> {
    pub fn new(api: A, local_user: impl Into<String>, options: SessionOptions) -> Self {
        Self {
            api,
            store: ConversationStore::new(local_user, options.store),
            channel: None,
            max_upload_bytes: options.max_upload_bytes,
            typing_emitted_at: None,
            logged_out: false,
        }
    }

    /// Attaches the realtime channel and connects it as the local user.
    pub fn attach_channel(&mut self, mut channel: ChannelClient) {
        channel.connect(self.store.local_user());
        self.channel = Some(channel);
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn channel(&self) -> Option<&ChannelClient> {
        self.channel.as_ref()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.channel.as_ref().map(|c| c.state()).unwrap_or(ConnectionState::Idle)
    }

    pub fn reconnect(&mut self) -> bool {
        self.channel.as_mut().is_some_and(|c| c.reconnect())
    }

    /// Online state of the open conversation's counterpart.
    pub fn counterpart_online(&self) -> bool {
        let Some(conv) = self.store.current() else {
            return false;
        };
        let Some(other) = conv.counterpart(self.store.local_user()) else {
            return false;
        };
        self.channel.as_ref().is_some_and(|c| c.is_online(&other.user_id))
    }

    /// True once any call came back 401. The caller clears the token and
    /// returns to sign-in.
    pub fn is_logged_out(&self) -> bool {
        self.logged_out
    }

    pub(crate) fn observe_error(&mut self, err: &ApiError) {
        if err.is_unauthorized() && !self.logged_out {
            warn!("server rejected the session token, signing out");
            self.logged_out = true;
            if let Some(channel) = self.channel.as_mut() {
                channel.disconnect();
            }
        }
    }

    pub(crate) fn checked<T>(&mut self, result: Result<T, ApiError>) -> Result<T, ApiError> {
        if let Err(e) = &result {
            self.observe_error(e);
        }
        result
    }

    /// Shows cached summaries until the first fetch lands. Ignored once the
    /// store holds anything.
    pub fn warm_start(&mut self, cached: Vec<Conversation>) {
        if !self.store.is_empty() || cached.is_empty() {
            return;
        }
        debug!("seeding {} cached conversations", cached.len());
        self.store.replace_conversations(cached);
    }

    pub async fn refresh_conversations(&mut self) -> Result<(), ApiError> {
        let fetched = self.api.conversations().await;
        let list = self.checked(fetched)?;
        info!("loaded {} conversations", list.len());
        self.store.replace_conversations(list);
        Ok(())
    }

    /// Opens a conversation: switches rooms, loads history, marks it read.
    pub async fn select(&mut self, conversation_id: &str) -> Result<(), ApiError> {
        let previous = self.store.open(conversation_id);
        if previous.as_deref() != Some(conversation_id) {
            self.typing_emitted_at = None;
        }
        // join_room leaves the previous room first
        if let Some(channel) = self.channel.as_mut() {
            channel.join_room(conversation_id);
        }

        let fetched = self.api.messages(conversation_id).await;
        let history = self.checked(fetched)?;
        debug!("{} messages in {conversation_id}", history.len());
        self.store.load_history(conversation_id, history);

        let marked = self.api.mark_read(conversation_id).await;
        self.checked(marked)?;
        self.store.mark_read(conversation_id);
        Ok(())
    }

    /// Looks up a conversation by its `CONV-XXXXXX` support code and opens it.
    pub async fn lookup_code(&mut self, code: &str) -> Result<ConversationLookup, ApiError> {
        let code = crate::utils::normalize_conversation_code(code)
            .ok_or_else(|| ApiError::InvalidCode(code.to_string()))?;
        let fetched = self.api.search_by_code(&code).await;
        let lookup = self.checked(fetched)?;
        let id = lookup.conversation.id.clone();
        self.store.upsert_conversation(lookup.conversation.clone());
        self.store.open(&id);
        self.store.load_history(&id, lookup.messages.clone());
        if let Some(channel) = self.channel.as_mut() {
            channel.join_room(&id);
        }
        Ok(lookup)
    }

    /// Updates the composer of the open conversation and throttles typing
    /// signals to one per timeout window.
    pub fn composer_input(&mut self, text: &str) {
        let Some(id) = self.store.current_id().map(str::to_string) else {
            return;
        };
        let was_empty = self.store.draft(&id).is_empty();
        self.store.set_draft(&id, text);
        let Some(channel) = self.channel.as_ref() else {
            return;
        };
        let now = Instant::now();
        let window = self.store.options().typing_timeout;
        if text.is_empty() {
            if !was_empty {
                channel.emit_stop_typing(&id);
            }
            self.typing_emitted_at = None;
        } else if self.typing_emitted_at.is_none_or(|at| now.duration_since(at) >= window) {
            channel.emit_typing(&id);
            self.typing_emitted_at = Some(now);
        }
    }

    /// Sends the composer content of the open conversation.
    pub async fn send(&mut self) -> Result<(), SendError> {
        let pending = dispatch::prepare_send(&mut self.store, Utc::now())?;
        if let Some(channel) = self.channel.as_ref() {
            channel.emit_stop_typing(&pending.conversation_id);
        }
        self.typing_emitted_at = None;
        let result = self.api.send_message(&pending.conversation_id, &pending.body).await;
        self.finish_send(pending, result).await
    }

    /// Uploads a file, then sends a message pointing at it. The two steps
    /// fail independently.
    pub async fn send_file(&mut self, file: FileUpload) -> Result<(), SendError> {
        let ticket = dispatch::prepare_upload(&mut self.store, file.size(), self.max_upload_bytes)?;
        let uploaded = self.api.upload(&ticket.conversation_id, &file).await;
        let descriptor = match uploaded {
            Ok(d) => d,
            Err(e) => {
                self.observe_error(&e);
                return Err(dispatch::upload_failed(&mut self.store, ticket, e));
            }
        };
        let pending = dispatch::prepare_attachment_send(&mut self.store, ticket, &descriptor, Utc::now())?;
        let result = self.api.send_message(&pending.conversation_id, &pending.body).await;
        self.finish_send(pending, result).await
    }

    async fn finish_send(
        &mut self,
        pending: dispatch::PendingSend,
        result: Result<Message, ApiError>,
    ) -> Result<(), SendError> {
        let outcome = dispatch::complete_send(&mut self.store, pending, result);
        if let Err(err) = &outcome {
            if let Some(api_err) = err.api_error() {
                self.observe_error(api_err);
                if api_err.is_conflict() {
                    info!("send conflicted with server state, refreshing conversations");
                    if let Err(e) = self.refresh_conversations().await {
                        warn!("refresh after conflict failed: {e}");
                    }
                }
            }
        }
        outcome
    }

    /// Applies one realtime event to the store.
    pub fn handle_server_event(&mut self, event: ServerEvent, now: Instant) -> SessionUpdate {
        match event {
            ServerEvent::UserStatus { user_id, status } => SessionUpdate::Presence {
                online: status == PresenceStatus::Online,
                user_id,
            },
            ServerEvent::MessageReceived { message, conversation_id } => {
                let outcome = self.store.apply_inbound_message(message, &conversation_id);
                if outcome == InboundOutcome::UnknownConversation {
                    debug!("message for unknown conversation {conversation_id}");
                }
                SessionUpdate::Message { conversation_id, outcome }
            }
            ServerEvent::MessagesRead { user_id, conversation_id } => {
                let flipped = self.store.apply_read_receipt(conversation_id.as_deref(), &user_id);
                SessionUpdate::ReadReceipt { flipped }
            }
            ServerEvent::TypingStart { conversation_id, user_id } => {
                if let Some(user) = user_id {
                    self.store.typing_started(&conversation_id, &user, now);
                }
                SessionUpdate::Typing { conversation_id }
            }
            ServerEvent::TypingStop { conversation_id, user_id } => {
                if let Some(user) = user_id {
                    self.store.typing_stopped(&conversation_id, &user);
                }
                SessionUpdate::Typing { conversation_id }
            }
            ServerEvent::ConversationClosed { conversation_id, message } => {
                self.apply_status(StatusChange::closed(conversation_id, message))
            }
            ServerEvent::TaskCompleted { conversation_id, action, message } => {
                self.apply_status(StatusChange::completed(conversation_id, action, message))
            }
        }
    }

    pub(crate) fn apply_status(&mut self, change: StatusChange) -> SessionUpdate {
        let conversation_id = change.conversation_id.clone();
        let open = self.store.apply_status_change(change);
        SessionUpdate::Status { conversation_id, open }
    }

    /// Waits for the next channel event or typing expiry and applies it.
    pub async fn poll(&mut self) -> SessionUpdate {
        enum Woke {
            Event(Option<ServerEvent>),
            Typing,
        }

        let deadline = self.store.next_typing_deadline();
        let woke = {
            let channel_event = async {
                match self.channel.as_mut() {
                    Some(channel) => channel.next_event().await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                ev = channel_event => Woke::Event(ev),
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => Woke::Typing,
            }
        };

        match woke {
            Woke::Event(Some(event)) => self.handle_server_event(event, Instant::now()),
            Woke::Event(None) => SessionUpdate::ChannelDown,
            Woke::Typing => {
                let expired = self.store.expire_typing(Instant::now());
                debug!("typing expired for {expired:?}");
                SessionUpdate::TypingExpired
            }
        }
    }

    /// Tears down the channel. The store is dropped with the session.
    pub fn shutdown(&mut self) {
        if let Some(channel) = self.channel.as_mut() {
            channel.disconnect();
        }
    }
}
