//! ============================================================================
//! Session State - Typed awaiting-input tracking
//! ============================================================================
//! When a command is issued without its argument, the bot asks for it and
//! remembers what it is waiting for. That state is a typed value per user,
//! not a free-text flag: the host defines its own action enum and invalid
//! states are unrepresentable. In-memory only, reset on restart.
//! ============================================================================

use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// One pending prompt: the action awaiting input and when it was requested.
#[derive(Debug, Clone)]
pub struct PendingAction<A> {
    pub action: A,
    /// UTC epoch seconds when the prompt was issued.
    pub since: i64,
}

/// Per-user awaiting-input registry, keyed by user id.
pub struct SessionTracker<A> {
    pending: RwLock<HashMap<i64, PendingAction<A>>>,
}

impl<A: Clone + Send + Sync> SessionTracker<A> {
    pub fn new() -> Self {
        Self {
            pending: RwLock::new(HashMap::new()),
        }
    }

    /// Record that `user_id`'s next message is the input for `action`.
    /// Replaces any previous pending prompt for the user.
    pub async fn expect_input(&self, user_id: i64, action: A) {
        let entry = PendingAction {
            action,
            since: chrono::Utc::now().timestamp(),
        };
        self.pending.write().await.insert(user_id, entry);
        debug!("Awaiting input from {}", user_id);
    }

    /// Consume the pending prompt, if any. The reply handler calls this once
    /// per incoming message; a `None` means the message is not a reply to us.
    pub async fn take(&self, user_id: i64) -> Option<PendingAction<A>> {
        self.pending.write().await.remove(&user_id)
    }

    /// Pending prompt without consuming it.
    pub async fn peek(&self, user_id: i64) -> Option<PendingAction<A>> {
        self.pending.read().await.get(&user_id).cloned()
    }

    pub async fn clear(&self, user_id: i64) {
        self.pending.write().await.remove(&user_id);
    }

    /// Drop prompts older than `max_age_secs`. Returns how many were dropped.
    pub async fn clear_stale(&self, max_age_secs: i64) -> usize {
        let cutoff = chrono::Utc::now().timestamp() - max_age_secs;
        let mut pending = self.pending.write().await;
        let before = pending.len();
        pending.retain(|_, entry| entry.since > cutoff);
        before - pending.len()
    }
}

impl<A: Clone + Send + Sync> Default for SessionTracker<A> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Action {
        VehicleLookup,
        IpLookup,
    }

    #[tokio::test]
    async fn test_take_consumes() {
        let tracker = SessionTracker::new();
        tracker.expect_input(1, Action::VehicleLookup).await;

        assert_eq!(tracker.peek(1).await.unwrap().action, Action::VehicleLookup);
        assert_eq!(tracker.take(1).await.unwrap().action, Action::VehicleLookup);
        assert!(tracker.take(1).await.is_none());
    }

    #[tokio::test]
    async fn test_new_prompt_replaces_old() {
        let tracker = SessionTracker::new();
        tracker.expect_input(1, Action::VehicleLookup).await;
        tracker.expect_input(1, Action::IpLookup).await;
        assert_eq!(tracker.take(1).await.unwrap().action, Action::IpLookup);
    }

    #[tokio::test]
    async fn test_users_are_independent() {
        let tracker = SessionTracker::new();
        tracker.expect_input(1, Action::VehicleLookup).await;
        assert!(tracker.take(2).await.is_none());
        assert!(tracker.peek(1).await.is_some());
        tracker.clear(1).await;
        assert!(tracker.peek(1).await.is_none());
    }

    #[tokio::test]
    async fn test_clear_stale() {
        let tracker = SessionTracker::new();
        tracker.expect_input(1, Action::IpLookup).await;
        assert_eq!(tracker.clear_stale(3600).await, 0);
        assert_eq!(tracker.clear_stale(0).await, 1);
        assert!(tracker.peek(1).await.is_none());
    }
}
