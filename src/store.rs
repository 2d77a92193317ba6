use chrono::TimeDelta;
use log::{debug, info};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;

use crate::api::models::{Conversation, ConversationId, LocalId, Message, UserId};
use crate::dispatch::{DEFAULT_DEDUP_WINDOW_MS, is_duplicate};
use crate::lifecycle::{ComposerState, StatusChange, reconcile};
use crate::typing::{DEFAULT_TYPING_TIMEOUT, TypingSet};

#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    pub dedup_window: TimeDelta,
    pub typing_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            dedup_window: TimeDelta::milliseconds(DEFAULT_DEDUP_WINDOW_MS),
            typing_timeout: DEFAULT_TYPING_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListFilter {
    /// Active, closed and completed conversations.
    #[default]
    Active,
    Archived,
}

impl ListFilter {
    fn admits(self, conv: &Conversation) -> bool {
        match self {
            ListFilter::Active => !conv.status.is_archived(),
            ListFilter::Archived => conv.status.is_archived(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Recent,
    Unread,
    Name,
}

#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub filter: ListFilter,
    pub search: Option<String>,
    pub sort: SortKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Appended to the open conversation.
    Appended,
    /// Already present in the open conversation; dropped.
    Duplicate,
    /// Counted as unread on a conversation that is not open.
    Counted,
    UnknownConversation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConfirmOutcome {
    Replaced,
    /// The confirmed copy was already present (realtime echo won the race).
    Dropped,
    NotOpen,
}

#[derive(Debug, Clone)]
struct OpenConversation {
    id: ConversationId,
    messages: Vec<Message>,
    typing: TypingSet,
}

/// Client-side cache of conversations and of the open conversation's history.
///
/// The session feeds it server data and channel events; views only read.
#[derive(Debug)]
pub struct ConversationStore {
    local_user: UserId,
    options: StoreOptions,
    conversations: HashMap<ConversationId, Conversation>,
    open: Option<OpenConversation>,
    unread_total: u64,
    drafts: HashMap<ConversationId, String>,
    in_flight: HashSet<ConversationId>,
}

fn unread_contribution(local_user: &str, conv: &Conversation) -> u64 {
    if conv.status.is_archived() { 0 } else { u64::from(conv.unread_for(local_user)) }
}

// A server copy never reopens a closed conversation or clears a completion.
fn settle_status(known: &Conversation, incoming: &mut Conversation) {
    incoming.status = reconcile(&incoming.id, known.status, incoming.status);
    incoming.task_completed |= known.task_completed;
}

impl ConversationStore {
    pub fn new(local_user: impl Into<UserId>, options: StoreOptions) -> Self {
        Self {
            local_user: local_user.into(),
            options,
            conversations: HashMap::new(),
            open: None,
            unread_total: 0,
            drafts: HashMap::new(),
            in_flight: HashSet::new(),
        }
    }

    pub fn local_user(&self) -> &str {
        &self.local_user
    }

    pub fn options(&self) -> StoreOptions {
        self.options
    }

    // Every mutation of a conversation goes through here so the unread badge
    // stays in step without re-summing the list.
    fn with_conversation<R>(&mut self, id: &str, f: impl FnOnce(&mut Conversation) -> R) -> Option<R> {
        let conv = self.conversations.get_mut(id)?;
        let before = unread_contribution(&self.local_user, conv);
        let out = f(conv);
        let after = unread_contribution(&self.local_user, conv);
        self.unread_total = self.unread_total.saturating_sub(before) + after;
        Some(out)
    }

    /// Replaces the list with a fresh server copy.
    pub fn replace_conversations(&mut self, list: Vec<Conversation>) {
        let mut next: HashMap<ConversationId, Conversation> = HashMap::with_capacity(list.len());
        for mut conv in list {
            if let Some(known) = self.conversations.get(&conv.id) {
                settle_status(known, &mut conv);
            }
            next.insert(conv.id.clone(), conv);
        }
        if let Some(open) = &self.open {
            if !next.contains_key(&open.id) {
                if let Some(kept) = self.conversations.remove(&open.id) {
                    debug!("open conversation {} missing from refresh, keeping local copy", open.id);
                    next.insert(kept.id.clone(), kept);
                }
            }
        }
        self.unread_total = next.values().map(|c| unread_contribution(&self.local_user, c)).sum();
        self.conversations = next;
    }

    pub fn upsert_conversation(&mut self, mut conv: Conversation) {
        if let Some(known) = self.conversations.get(&conv.id) {
            settle_status(known, &mut conv);
        }
        let contribution = unread_contribution(&self.local_user, &conv);
        if let Some(old) = self.conversations.insert(conv.id.clone(), conv) {
            self.unread_total = self
                .unread_total
                .saturating_sub(unread_contribution(&self.local_user, &old));
        }
        self.unread_total += contribution;
    }

    pub fn conversation(&self, id: &str) -> Option<&Conversation> {
        self.conversations.get(id)
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    pub fn list(&self, query: &ListQuery) -> Vec<&Conversation> {
        let needle = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);
        let mut out: Vec<&Conversation> = self
            .conversations
            .values()
            .filter(|c| query.filter.admits(c))
            .filter(|c| match &needle {
                Some(n) => self.matches_search(c, n),
                None => true,
            })
            .collect();
        out.sort_by(|a, b| self.compare(a, b, query.sort).then_with(|| a.id.cmp(&b.id)));
        out
    }

    fn matches_search(&self, conv: &Conversation, needle: &str) -> bool {
        let fields = [
            Some(conv.counterpart_name(&self.local_user)),
            conv.task_title.as_deref(),
            conv.conversation_code.as_deref(),
        ];
        fields
            .into_iter()
            .flatten()
            .any(|f| f.to_lowercase().contains(needle))
    }

    fn compare(&self, a: &Conversation, b: &Conversation, key: SortKey) -> Ordering {
        match key {
            SortKey::Recent => b.activity_at().cmp(&a.activity_at()),
            SortKey::Unread => b
                .unread_for(&self.local_user)
                .cmp(&a.unread_for(&self.local_user)),
            SortKey::Name => a
                .counterpart_name(&self.local_user)
                .to_lowercase()
                .cmp(&b.counterpart_name(&self.local_user).to_lowercase()),
        }
    }

    /// Sum of the local user's unread counts over non-archived conversations.
    pub fn unread_total(&self) -> u64 {
        self.unread_total
    }

    /// Makes `id` the open conversation with an empty history. Returns the
    /// previously open id. Reopening the same id keeps its state.
    pub fn open(&mut self, id: &str) -> Option<ConversationId> {
        if self.current_id() == Some(id) {
            return Some(id.to_string());
        }
        let previous = self.open.take().map(|o| o.id);
        self.open = Some(OpenConversation {
            id: id.to_string(),
            messages: Vec::new(),
            typing: TypingSet::new(self.options.typing_timeout),
        });
        previous
    }

    pub fn close_open(&mut self) -> Option<ConversationId> {
        self.open.take().map(|o| o.id)
    }

    pub fn current_id(&self) -> Option<&str> {
        self.open.as_ref().map(|o| o.id.as_str())
    }

    pub fn current(&self) -> Option<&Conversation> {
        self.current_id().and_then(|id| self.conversations.get(id))
    }

    pub fn messages(&self) -> &[Message] {
        self.open.as_ref().map(|o| o.messages.as_slice()).unwrap_or(&[])
    }

    /// Composer state of the open conversation, derived from its status only.
    pub fn composer_state(&self) -> Option<ComposerState> {
        self.current().map(|c| ComposerState::for_status(c.status))
    }

    /// Installs fetched history (oldest first) for the open conversation.
    /// Unconfirmed local messages stay at the tail.
    pub fn load_history(&mut self, id: &str, history: Vec<Message>) -> bool {
        let window = self.options.dedup_window;
        let Some(open) = self.open.as_mut().filter(|o| o.id == id) else {
            debug!("history for {id} arrived after switching away, dropped");
            return false;
        };
        let pending: Vec<Message> = open.messages.drain(..).filter(Message::is_sending).collect();
        open.messages = history;
        for msg in pending {
            if !open.messages.iter().any(|m| is_duplicate(m, &msg, window)) {
                open.messages.push(msg);
            }
        }
        true
    }

    /// Zeroes the local user's unread count for `id`.
    pub fn mark_read(&mut self, id: &str) -> bool {
        let local = self.local_user.clone();
        self.with_conversation(id, |c| {
            c.unread_count.insert(local, 0);
        })
        .is_some()
    }

    pub fn apply_inbound_message(&mut self, message: Message, conversation_id: &str) -> InboundOutcome {
        let window = self.options.dedup_window;
        let snapshot = message.snapshot();
        let outcome = match self.open.as_mut().filter(|o| o.id == conversation_id) {
            Some(open) => {
                if open.messages.iter().any(|m| is_duplicate(m, &message, window)) {
                    debug!("dropping duplicate message in {conversation_id}");
                    return InboundOutcome::Duplicate;
                }
                open.typing.stop(&message.sender_id);
                open.messages.push(message);
                InboundOutcome::Appended
            }
            None => InboundOutcome::Counted,
        };

        let local = self.local_user.clone();
        let known = self.with_conversation(conversation_id, |c| {
            if outcome == InboundOutcome::Counted && snapshot.sender_id != local {
                *c.unread_count.entry(local).or_insert(0) += 1;
            }
            c.last_message = Some(snapshot);
        });
        match (known, outcome) {
            (None, InboundOutcome::Counted) => InboundOutcome::UnknownConversation,
            _ => outcome,
        }
    }

    /// Flips `is_read` on every local-user message of the open conversation
    /// when someone else reads it. Returns how many changed.
    pub fn apply_read_receipt(&mut self, conversation_id: Option<&str>, reader_id: &str) -> usize {
        if reader_id == self.local_user {
            return 0;
        }
        let Some(open) = self.open.as_mut() else {
            return 0;
        };
        if conversation_id.is_some_and(|id| id != open.id) {
            return 0;
        }
        let mut flipped = 0;
        for msg in open.messages.iter_mut() {
            if msg.sender_id == self.local_user && !msg.is_read {
                msg.is_read = true;
                flipped += 1;
            }
        }
        flipped
    }

    /// Returns true when the open conversation was affected.
    pub fn apply_status_change(&mut self, change: StatusChange) -> bool {
        let StatusChange { conversation_id, status, task_completed, system_message } = change;
        let applied = self.with_conversation(&conversation_id, |c| {
            c.status = reconcile(&c.id, c.status, status);
            if task_completed {
                c.task_completed = true;
            }
            c.status
        });
        if let Some(status) = applied {
            info!("conversation {conversation_id} is now {status}");
        }

        let window = self.options.dedup_window;
        let Some(open) = self.open.as_mut().filter(|o| o.id == conversation_id) else {
            return false;
        };
        if let Some(msg) = system_message {
            if !open.messages.iter().any(|m| is_duplicate(m, &msg, window)) {
                open.messages.push(msg);
            }
        }
        true
    }

    pub fn typing_started(&mut self, conversation_id: &str, user_id: &str, now: Instant) -> bool {
        if user_id == self.local_user {
            return false;
        }
        match self.open.as_mut().filter(|o| o.id == conversation_id) {
            Some(open) => {
                open.typing.start(user_id, now);
                true
            }
            None => false,
        }
    }

    pub fn typing_stopped(&mut self, conversation_id: &str, user_id: &str) -> bool {
        self.open
            .as_mut()
            .filter(|o| o.id == conversation_id)
            .is_some_and(|o| o.typing.stop(user_id))
    }

    pub fn expire_typing(&mut self, now: Instant) -> Vec<UserId> {
        self.open.as_mut().map(|o| o.typing.expire(now)).unwrap_or_default()
    }

    pub fn typing_users(&self, now: Instant) -> Vec<&str> {
        self.open.as_ref().map(|o| o.typing.users(now)).unwrap_or_default()
    }

    pub fn next_typing_deadline(&self) -> Option<Instant> {
        self.open.as_ref().and_then(|o| o.typing.next_deadline())
    }

    pub fn draft(&self, id: &str) -> &str {
        self.drafts.get(id).map(String::as_str).unwrap_or("")
    }

    pub fn set_draft(&mut self, id: &str, text: impl Into<String>) {
        let text = text.into();
        if text.is_empty() {
            self.drafts.remove(id);
        } else {
            self.drafts.insert(id.to_string(), text);
        }
    }

    pub fn composer_text(&self) -> &str {
        self.current_id().map(|id| self.draft(id)).unwrap_or("")
    }

    pub fn is_sending(&self, id: &str) -> bool {
        self.in_flight.contains(id)
    }

    pub(crate) fn begin_send(&mut self, id: &str) -> bool {
        self.in_flight.insert(id.to_string())
    }

    pub(crate) fn finish_send(&mut self, id: &str) {
        self.in_flight.remove(id);
    }

    pub(crate) fn push_local(&mut self, message: Message) -> bool {
        match self.open.as_mut().filter(|o| o.id == message.conversation_id) {
            Some(open) => {
                open.messages.push(message);
                true
            }
            None => false,
        }
    }

    /// Swaps a pending message for its confirmed copy, in place.
    pub(crate) fn confirm_local(
        &mut self,
        conversation_id: &str,
        local_id: LocalId,
        confirmed: Message,
    ) -> ConfirmOutcome {
        let snapshot = confirmed.snapshot();
        let outcome = match self.open.as_mut().filter(|o| o.id == conversation_id) {
            Some(open) => {
                let pos = open.messages.iter().position(|m| m.local_id() == Some(local_id));
                let echoed = confirmed.server_id().is_some_and(|sid| {
                    open.messages.iter().any(|m| m.server_id() == Some(sid))
                });
                match (pos, echoed) {
                    (Some(pos), false) => {
                        open.messages[pos] = confirmed;
                        ConfirmOutcome::Replaced
                    }
                    (Some(pos), true) => {
                        open.messages.remove(pos);
                        ConfirmOutcome::Dropped
                    }
                    (None, true) => ConfirmOutcome::Dropped,
                    (None, false) => {
                        open.messages.push(confirmed);
                        ConfirmOutcome::Replaced
                    }
                }
            }
            None => ConfirmOutcome::NotOpen,
        };
        self.with_conversation(conversation_id, |c| c.last_message = Some(snapshot));
        outcome
    }

    pub(crate) fn discard_local(&mut self, conversation_id: &str, local_id: LocalId) -> bool {
        match self.open.as_mut().filter(|o| o.id == conversation_id) {
            Some(open) => {
                let before = open.messages.len();
                open.messages.retain(|m| m.local_id() != Some(local_id));
                open.messages.len() != before
            }
            None => false,
        }
    }
}
