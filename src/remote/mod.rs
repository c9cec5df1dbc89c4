//! Contract with the hosted auth + table backend.
//!
//! The backend owns every activity row and the authoritative session. The
//! rest of the app only talks to it through [`RemoteDataService`], which
//! keeps the HTTP client swappable for a scripted one in tests.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::RemoteError;
use crate::models::{
    Activity, ActivityChanges, ActivityId, AuthEvent, Credentials, NewActivity, Session,
    SignUpResponse, User,
};

#[cfg(test)]
pub mod fake;
pub mod supabase;

pub use supabase::{SupabaseClient, SupabaseEndpoint};

/// Reported when an update matched no row owned by the caller.
pub const ACTIVITY_NOT_FOUND: &str = "Activity not found.";

#[async_trait]
pub trait RemoteDataService: Send + Sync {
    /// Locally held session, refreshed first if its access token expired.
    async fn get_session(&self) -> Result<Option<Session>, RemoteError>;

    /// User as validated by the auth server, `None` when not signed in.
    async fn get_user(&self) -> Result<Option<User>, RemoteError>;

    /// Registers a listener for auth-state changes.
    fn subscribe(&self) -> AuthSubscription;

    async fn sign_in_with_password(&self, credentials: &Credentials)
        -> Result<Session, RemoteError>;

    async fn sign_up(&self, credentials: &Credentials) -> Result<SignUpResponse, RemoteError>;

    async fn sign_out(&self) -> Result<(), RemoteError>;

    /// All activities owned by `owner`, newest first.
    async fn select_activities(&self, owner: Uuid) -> Result<Vec<Activity>, RemoteError>;

    async fn insert_activity(&self, activity: &NewActivity) -> Result<(), RemoteError>;

    /// Fails with [`ACTIVITY_NOT_FOUND`] when no row matches both `id` and `owner`.
    async fn update_activity(
        &self,
        id: ActivityId,
        owner: Uuid,
        changes: &ActivityChanges,
    ) -> Result<(), RemoteError>;
}

const EVENT_CAPACITY: usize = 16;

/// Fan-out point for auth events of one backend client.
#[derive(Clone)]
pub struct AuthEventHub {
    sender: broadcast::Sender<AuthEvent>,
    listeners: Arc<AtomicUsize>,
}

impl AuthEventHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            sender,
            listeners: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn emit(&self, event: AuthEvent) {
        debug!(kind = ?event.kind, "auth event");
        // No listener is not an error: nobody is watching yet.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> AuthSubscription {
        self.listeners.fetch_add(1, Ordering::SeqCst);
        AuthSubscription {
            receiver: Some(self.sender.subscribe()),
            listeners: Arc::clone(&self.listeners),
        }
    }

    /// Number of registrations not yet released.
    pub fn listener_count(&self) -> usize {
        self.listeners.load(Ordering::SeqCst)
    }
}

impl Default for AuthEventHub {
    fn default() -> Self {
        Self::new()
    }
}

/// A live registration on an [`AuthEventHub`].
///
/// The registration is released exactly once, either by [`unsubscribe`]
/// or when the subscription is dropped.
///
/// [`unsubscribe`]: AuthSubscription::unsubscribe
pub struct AuthSubscription {
    receiver: Option<broadcast::Receiver<AuthEvent>>,
    listeners: Arc<AtomicUsize>,
}

impl AuthSubscription {
    pub fn is_active(&self) -> bool {
        self.receiver.is_some()
    }

    /// Next already-delivered event, without waiting.
    pub fn try_next(&mut self) -> Option<AuthEvent> {
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.try_recv() {
                Ok(event) => return Some(event),
                // Every event carries the full session, so skipped ones are safe to lose.
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "auth subscription lagged");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Waits for the next event. `None` once released or once the hub is gone.
    pub async fn next(&mut self) -> Option<AuthEvent> {
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "auth subscription lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Releases the registration. Returns `false` if it was already released.
    pub fn unsubscribe(&mut self) -> bool {
        match self.receiver.take() {
            Some(_) => {
                self.listeners.fetch_sub(1, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }
}

impl Drop for AuthSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
