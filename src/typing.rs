use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::api::models::UserId;

pub const DEFAULT_TYPING_TIMEOUT: Duration = Duration::from_secs(2);

/// Who is typing in the open conversation.
///
/// Each user holds a single deadline. A new start pushes it back, a stop
/// removes it, and [`TypingSet::expire`] drops anyone whose deadline passed
/// even if no stop ever arrived.
#[derive(Debug, Clone)]
pub struct TypingSet {
    timeout: Duration,
    deadlines: HashMap<UserId, Instant>,
}

impl Default for TypingSet {
    fn default() -> Self {
        Self::new(DEFAULT_TYPING_TIMEOUT)
    }
}

impl TypingSet {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout, deadlines: HashMap::new() }
    }

    pub fn start(&mut self, user_id: &str, now: Instant) {
        self.deadlines.insert(user_id.to_string(), now + self.timeout);
    }

    pub fn stop(&mut self, user_id: &str) -> bool {
        self.deadlines.remove(user_id).is_some()
    }

    /// Removes expired entries and returns them.
    pub fn expire(&mut self, now: Instant) -> Vec<UserId> {
        let expired: Vec<UserId> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(user, _)| user.clone())
            .collect();
        for user in &expired {
            self.deadlines.remove(user);
        }
        expired
    }

    pub fn users(&self, now: Instant) -> Vec<&str> {
        let mut users: Vec<&str> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline > now)
            .map(|(user, _)| user.as_str())
            .collect();
        users.sort_unstable();
        users
    }

    /// Earliest pending expiry, for the event loop to sleep on.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }
}
