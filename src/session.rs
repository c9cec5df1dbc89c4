//! Session store and the observer that keeps it in step with the backend.
//!
//! The store is written by exactly one party, the [`SessionObserver`], which
//! replaces the whole value on every auth event. Everything else gets a
//! cloned [`SessionStore`] handle and only reads.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::RemoteError;
use crate::models::{AuthEvent, AuthEventKind, Session, User};
use crate::navigation::{Navigator, Route};
use crate::remote::{AuthSubscription, RemoteDataService};

#[derive(Debug, Clone, PartialEq, Default)]
pub enum SessionState {
    /// Initial fetch still outstanding.
    #[default]
    Unknown,
    Anonymous,
    Authenticated(User),
}

impl SessionState {
    fn from_session(session: Option<&Session>) -> Self {
        match session {
            Some(session) => SessionState::Authenticated(session.user.clone()),
            None => SessionState::Anonymous,
        }
    }

    pub fn user(&self) -> Option<&User> {
        match self {
            SessionState::Authenticated(user) => Some(user),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, SessionState::Unknown)
    }
}

/// Cloneable read handle on the current session value.
#[derive(Clone)]
pub struct SessionStore {
    sender: Arc<watch::Sender<SessionState>>,
}

impl SessionStore {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(SessionState::Unknown);
        Self {
            sender: Arc::new(sender),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_state(state: SessionState) -> Self {
        let store = Self::new();
        store.publish(state);
        store
    }

    pub fn current(&self) -> SessionState {
        self.sender.borrow().clone()
    }

    pub fn user(&self) -> Option<User> {
        self.sender.borrow().user().cloned()
    }

    /// Receiver that wakes on every replacement.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.sender.subscribe()
    }

    fn publish(&self, state: SessionState) {
        self.sender.send_replace(state);
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Follows the backend's auth events for one browser.
///
/// Transition policy:
/// - initial fetch resolves: `Unknown` becomes `Authenticated` or `Anonymous`
/// - `SignedOut`: `Anonymous`, and the browser is sent to the login view
/// - `SignedIn` while on login or sign-up: `Authenticated`, browser sent to `/`
/// - any other event: the session is replaced, no navigation
pub struct SessionObserver {
    store: SessionStore,
    navigator: Navigator,
    subscription: AuthSubscription,
    events_applied: u64,
}

impl SessionObserver {
    /// Subscribes, then fetches the initial session.
    ///
    /// The subscription is taken first so no event can slip in between the
    /// fetch and the registration. If an event arrives while the fetch is
    /// outstanding, the event wins over the fetched value.
    pub async fn start(
        remote: &dyn RemoteDataService,
        store: SessionStore,
        navigator: Navigator,
    ) -> Self {
        let subscription = remote.subscribe();
        let mut observer = Self {
            store,
            navigator,
            subscription,
            events_applied: 0,
        };

        let initial = remote.get_session().await;
        observer.pump();

        if observer.events_applied > 0 {
            debug!("initial session superseded by auth event");
            return observer;
        }

        let state = match initial {
            Ok(session) => SessionState::from_session(session.as_ref()),
            Err(e) => {
                warn!(error = %e, "initial session fetch failed");
                SessionState::Anonymous
            }
        };
        info!(authenticated = state.user().is_some(), "initial session resolved");
        observer.store.publish(state);
        observer
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn is_listening(&self) -> bool {
        self.subscription.is_active()
    }

    fn apply(&mut self, event: AuthEvent) {
        self.events_applied += 1;

        let state = match event.kind {
            AuthEventKind::SignedOut => SessionState::Anonymous,
            _ => SessionState::from_session(event.session.as_ref()),
        };
        info!(
            kind = ?event.kind,
            authenticated = state.user().is_some(),
            "auth state changed"
        );
        self.store.publish(state);

        match event.kind {
            AuthEventKind::SignedOut => self.navigator.navigate(Route::Login),
            AuthEventKind::SignedIn if self.navigator.current().is_auth_entry() => {
                self.navigator.navigate(Route::Root)
            }
            _ => {}
        }
    }

    /// Applies every event delivered so far. Returns how many were applied.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Some(event) = self.subscription.try_next() {
            self.apply(event);
            applied += 1;
        }
        applied
    }

    /// Waits for one event and applies it. `None` once stopped.
    pub async fn next_event(&mut self) -> Option<AuthEventKind> {
        let event = self.subscription.next().await?;
        let kind = event.kind;
        self.apply(event);
        Some(kind)
    }

    /// Releases the subscription. Safe to call more than once; dropping the
    /// observer has the same effect.
    pub fn stop(&mut self) {
        if self.subscription.unsubscribe() {
            debug!("session observer stopped");
        }
    }
}

/// Logout control of the auth status widget. The observer's `SignedOut`
/// handling takes care of state and redirect.
pub async fn sign_out(remote: &dyn RemoteDataService) -> Result<(), RemoteError> {
    remote.sign_out().await.map_err(|e| {
        error!(error = %e, "Error logging out");
        e
    })
}
