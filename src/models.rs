use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Server-assigned activity identifier
pub type ActivityId = i64;

/// Activity row (minimal, as stored in the activities table)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: ActivityId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
}

impl Activity {
    /// Title shown on the card; blank titles fall back to the id
    pub fn display_title(&self) -> String {
        if self.title.trim().is_empty() {
            format!("Activity {}", self.id)
        } else {
            self.title.clone()
        }
    }

    pub fn created_on(&self) -> String {
        self.created_at.format("%Y-%m-%d").to_string()
    }
}

/// Insert payload. `id` and `created_at` are assigned by the backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewActivity {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
}

/// Full-field update payload. A `None` description is written as null.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityChanges {
    pub title: String,
    pub description: Option<String>,
}

/// Identity linked to an auth user (email, oauth provider, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    #[serde(default)]
    pub identity_id: Option<String>,
    #[serde(default)]
    pub provider: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub identities: Option<Vec<Identity>>,
}

impl User {
    /// A user record with an empty identity list belongs to an email that
    /// is already registered but not yet confirmed.
    pub fn is_unconfirmed_duplicate(&self) -> bool {
        matches!(&self.identities, Some(identities) if identities.is_empty())
    }
}

/// Authenticated session as handed out by the auth API
#[derive(Clone, PartialEq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub user: User,
}

impl Session {
    /// Treat tokens as expired slightly early so a request never races the expiry.
    const EXPIRY_MARGIN_SECS: i64 = 10;

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now + Duration::seconds(Self::EXPIRY_MARGIN_SECS) >= expires_at,
            None => false,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("expires_at", &self.expires_at)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEventKind {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

/// Auth-state change notification. The session is the complete new value,
/// `None` after a sign-out.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthEvent {
    pub kind: AuthEventKind,
    pub session: Option<Session>,
}

impl AuthEvent {
    pub fn signed_in(session: Session) -> Self {
        Self {
            kind: AuthEventKind::SignedIn,
            session: Some(session),
        }
    }

    pub fn signed_out() -> Self {
        Self {
            kind: AuthEventKind::SignedOut,
            session: None,
        }
    }
}

/// Result of a sign-up call. Either part may be missing depending on
/// whether the backend requires email confirmation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SignUpResponse {
    pub user: Option<User>,
    pub session: Option<Session>,
}

#[cfg(test)]
pub(crate) fn test_user(email: &str) -> User {
    User {
        id: Uuid::new_v4(),
        email: Some(email.to_string()),
        identities: Some(vec![Identity {
            identity_id: Some(Uuid::new_v4().to_string()),
            provider: "email".to_string(),
        }]),
    }
}

#[cfg(test)]
pub(crate) fn test_session(user: User) -> Session {
    Session {
        access_token: format!("access-{}", user.id),
        refresh_token: format!("refresh-{}", user.id),
        expires_at: Some(Utc::now() + Duration::hours(1)),
        user,
    }
}
