use std::collections::HashSet;

use crate::api::events::PresenceStatus;
use crate::api::models::UserId;

/// Users currently reported online by the realtime channel.
///
/// Only `user:status` events mutate it; nothing polls.
#[derive(Debug, Default, Clone)]
pub struct PresenceSet {
    online: HashSet<UserId>,
}

impl PresenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when membership changed.
    pub fn apply(&mut self, user_id: &str, status: PresenceStatus) -> bool {
        match status {
            PresenceStatus::Online => self.online.insert(user_id.to_string()),
            PresenceStatus::Offline => self.online.remove(user_id),
        }
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.online.contains(user_id)
    }

    pub fn clear(&mut self) {
        self.online.clear();
    }
}
