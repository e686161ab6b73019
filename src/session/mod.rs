//! Session tracking
//!
//! The [`SessionTracker`] owns the current identity and fans every transition
//! out to its subscribers, in order, exactly once. Subscribers are channels:
//! dropping (or calling [`Subscription::unsubscribe`]) on the receiving side
//! stops delivery, and closed subscribers are pruned on the next transition.

use std::time::Duration;

use tokio::sync::{mpsc, Mutex};

use crate::{error::AuthError, models::Identity};

pub mod supabase;

pub use supabase::SupabaseAuth;

/// Source of truth for who is signed in
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Asks the provider for the current identity; `None` means signed out
    async fn current_identity(&self) -> Result<Option<Identity>, AuthError>;
}

/// Kind of identity transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityChange {
    SignedIn,
    SignedOut,
    /// A different user replaced the previous one
    Replaced,
    /// Same user, new access token
    TokenRefreshed,
}

/// One identity transition as delivered to subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityEvent {
    pub previous: Option<Identity>,
    pub current: Option<Identity>,
    /// Position of this transition in the tracker's history, starting at 1
    pub revision: u64,
}

/// Tracker state at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub identity: Option<Identity>,
    pub revision: u64,
}

impl IdentityEvent {
    pub fn change(&self) -> IdentityChange {
        match (&self.previous, &self.current) {
            (_, None) => IdentityChange::SignedOut,
            (None, Some(_)) => IdentityChange::SignedIn,
            (Some(prev), Some(cur)) if prev.same_user(cur) => IdentityChange::TokenRefreshed,
            (Some(_), Some(_)) => IdentityChange::Replaced,
        }
    }
}

/// Receiving end of a session subscription
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<IdentityEvent>,
}

impl Subscription {
    /// Waits for the next transition; `None` once the tracker is gone
    pub async fn next(&mut self) -> Option<IdentityEvent> {
        self.rx.recv().await
    }

    /// Stops delivery; no event is observed after this returns
    pub fn unsubscribe(mut self) {
        self.rx.close();
    }
}

struct TrackerInner {
    current: Option<Identity>,
    revision: u64,
    subscribers: Vec<mpsc::UnboundedSender<IdentityEvent>>,
}

/// Tracks the current identity for the application session
pub struct SessionTracker {
    inner: Mutex<TrackerInner>,
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionTracker {
    /// Creates a tracker with no signed-in user
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TrackerInner {
                current: None,
                revision: 0,
                subscribers: Vec::new(),
            }),
        }
    }

    /// Resolves the startup identity with a single provider call
    ///
    /// Provider failures and timeouts are logged and treated as signed out.
    pub async fn initialize(
        &self,
        provider: &dyn IdentityProvider,
        timeout: Duration,
    ) -> Option<Identity> {
        let identity = match tokio::time::timeout(timeout, provider.current_identity()).await {
            Ok(Ok(identity)) => identity,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Identity lookup failed, starting signed out");
                None
            }
            Err(_) => {
                tracing::warn!(error = %AuthError::TimedOut, "Identity lookup failed, starting signed out");
                None
            }
        };

        self.set_identity(identity.clone()).await;
        identity
    }

    pub async fn current_identity(&self) -> Option<Identity> {
        self.inner.lock().await.current.clone()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.lock().await;
        SessionSnapshot {
            identity: inner.current.clone(),
            revision: inner.revision,
        }
    }

    /// Registers a subscriber, returning the state current at registration
    ///
    /// Every transition after the returned snapshot is delivered to the
    /// subscription, so nothing falls between the two.
    pub async fn subscribe(&self) -> (SessionSnapshot, Subscription) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().await;
        inner.subscribers.push(tx);
        let snapshot = SessionSnapshot {
            identity: inner.current.clone(),
            revision: inner.revision,
        };
        (snapshot, Subscription { rx })
    }

    pub async fn sign_in(&self, identity: Identity) -> bool {
        self.set_identity(Some(identity)).await
    }

    pub async fn sign_out(&self) -> bool {
        self.set_identity(None).await
    }

    /// Applies a transition; returns false if the identity did not change
    pub async fn set_identity(&self, next: Option<Identity>) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.current == next {
            return false;
        }

        inner.revision += 1;
        let event = IdentityEvent {
            previous: std::mem::replace(&mut inner.current, next.clone()),
            current: next,
            revision: inner.revision,
        };

        tracing::info!(
            change = ?event.change(),
            user_id = ?event.current.as_ref().map(|i| i.user_id.to_string()),
            "Identity transition"
        );

        inner
            .subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
        true
    }

    pub async fn subscriber_count(&self) -> usize {
        let mut inner = self.inner.lock().await;
        inner.subscribers.retain(|subscriber| !subscriber.is_closed());
        inner.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserId;
    use uuid::Uuid;

    fn identity(token: &str) -> Identity {
        Identity::new(UserId(Uuid::new_v4()), token)
    }

    #[test]
    fn test_change_classification() {
        let a = identity("a");
        let a_refreshed = Identity::new(a.user_id, "a2");
        let b = identity("b");

        let event = |previous: Option<&Identity>, current: Option<&Identity>| IdentityEvent {
            previous: previous.cloned(),
            current: current.cloned(),
            revision: 1,
        };

        assert_eq!(event(None, Some(&a)).change(), IdentityChange::SignedIn);
        assert_eq!(event(Some(&a), None).change(), IdentityChange::SignedOut);
        assert_eq!(event(Some(&a), Some(&b)).change(), IdentityChange::Replaced);
        assert_eq!(
            event(Some(&a), Some(&a_refreshed)).change(),
            IdentityChange::TokenRefreshed
        );
    }

    #[tokio::test]
    async fn test_transitions_delivered_in_order_once() {
        let tracker = SessionTracker::new();
        let (initial, mut subscription) = tracker.subscribe().await;
        assert_eq!(initial.identity, None);
        assert_eq!(initial.revision, 0);

        let a = identity("a");
        let b = identity("b");
        assert!(tracker.sign_in(a.clone()).await);
        assert!(!tracker.sign_in(a.clone()).await);
        assert!(tracker.sign_in(b.clone()).await);
        assert!(tracker.sign_out().await);
        assert!(!tracker.sign_out().await);

        let first = subscription.next().await.unwrap();
        assert_eq!(first.current, Some(a.clone()));
        let second = subscription.next().await.unwrap();
        assert_eq!(second.previous, Some(a));
        assert_eq!(second.current, Some(b));
        let third = subscription.next().await.unwrap();
        assert_eq!(third.change(), IdentityChange::SignedOut);
        assert_eq!(third.revision, 3);
    }

    #[tokio::test]
    async fn test_unsubscribe_releases_subscriber() {
        let tracker = SessionTracker::new();
        let (_, subscription) = tracker.subscribe().await;
        assert_eq!(tracker.subscriber_count().await, 1);

        subscription.unsubscribe();
        assert_eq!(tracker.subscriber_count().await, 0);

        // Transitions after unsubscribe are not an error
        assert!(tracker.sign_in(identity("a")).await);
    }

    #[tokio::test]
    async fn test_subscribe_reports_current_identity() {
        let tracker = SessionTracker::new();
        let a = identity("a");
        tracker.sign_in(a.clone()).await;

        let (initial, _subscription) = tracker.subscribe().await;
        assert_eq!(initial.identity, Some(a));
        assert_eq!(initial.revision, 1);
    }

    #[tokio::test]
    async fn test_initialize_uses_provider() {
        let a = identity("a");
        let expected = a.clone();
        let mut provider = MockIdentityProvider::new();
        provider
            .expect_current_identity()
            .times(1)
            .returning(move || Ok(Some(expected.clone())));

        let tracker = SessionTracker::new();
        let (_, mut subscription) = tracker.subscribe().await;
        let resolved = tracker.initialize(&provider, Duration::from_secs(1)).await;

        assert_eq!(resolved, Some(a.clone()));
        assert_eq!(tracker.current_identity().await, Some(a));
        assert_eq!(
            subscription.next().await.unwrap().change(),
            IdentityChange::SignedIn
        );
    }

    #[tokio::test]
    async fn test_initialize_fails_open_to_signed_out() {
        let mut provider = MockIdentityProvider::new();
        provider
            .expect_current_identity()
            .times(1)
            .returning(|| Err(AuthError::TimedOut));

        let tracker = SessionTracker::new();
        let resolved = tracker.initialize(&provider, Duration::from_secs(1)).await;

        assert_eq!(resolved, None);
        assert_eq!(tracker.current_identity().await, None);
    }
}
