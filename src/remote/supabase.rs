//! Hosted backend client: GoTrue for auth, PostgREST for the activities table.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use super::{AuthEventHub, AuthSubscription, RemoteDataService, ACTIVITY_NOT_FOUND};
use crate::config::Config;
use crate::error::RemoteError;
use crate::models::{
    Activity, ActivityChanges, ActivityId, AuthEvent, AuthEventKind, Credentials, NewActivity,
    Session, SignUpResponse, User,
};

/// Where the backend lives and which table holds activities.
#[derive(Debug, Clone)]
pub struct SupabaseEndpoint {
    pub url: String,
    pub anon_key: String,
    pub table: String,
}

impl SupabaseEndpoint {
    pub fn from_config(config: &Config) -> Self {
        Self {
            url: config.supabase_url.trim_end_matches('/').to_string(),
            anon_key: config.supabase_anon_key.clone(),
            table: config.activities_table.clone(),
        }
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.url, path)
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.url, self.table)
    }
}

/// Builds the HTTP client shared by every backend handle.
pub fn http_client(timeout: Duration) -> Result<Client, RemoteError> {
    Ok(Client::builder().timeout(timeout).build()?)
}

/// One browser's handle on the backend. Holds that browser's auth session.
pub struct SupabaseClient {
    http: Client,
    endpoint: SupabaseEndpoint,
    session: RwLock<Option<Session>>,
    events: AuthEventHub,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: User,
}

impl TokenResponse {
    fn into_session(self, now: DateTime<Utc>) -> Session {
        let expires_at = match (self.expires_at, self.expires_in) {
            (Some(at), _) => Utc.timestamp_opt(at, 0).single(),
            (None, Some(secs)) => Some(now + chrono::Duration::seconds(secs)),
            (None, None) => None,
        };

        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user,
        }
    }
}

/// Sign-up answers with a session when confirmation is disabled, and with
/// the bare user record otherwise.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignUpBody {
    Session(TokenResponse),
    User(User),
    /// Neither shape; reported to the form as an unexpected state.
    Empty(serde::de::IgnoredAny),
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    msg: Option<String>,
    message: Option<String>,
    error_description: Option<String>,
    error: Option<String>,
}

impl ErrorBody {
    fn into_message(self) -> Option<String> {
        self.msg
            .or(self.message)
            .or(self.error_description)
            .or(self.error)
            .filter(|m| !m.trim().is_empty())
    }
}

#[derive(Serialize)]
struct RefreshGrant<'a> {
    refresh_token: &'a str,
}

fn error_message(status: reqwest::StatusCode, body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(ErrorBody::into_message)
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .map(str::to_string)
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
        })
}

/// Turns a non-success response into a [`RemoteError`], passes others through.
async fn check(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(RemoteError::with_status(
        error_message(status, &body),
        status.as_u16(),
    ))
}

impl SupabaseClient {
    pub fn new(http: Client, endpoint: SupabaseEndpoint) -> Self {
        Self {
            http,
            endpoint,
            session: RwLock::new(None),
            events: AuthEventHub::new(),
        }
    }

    /// Applies the anon key and the bearer token of the current session,
    /// or the anon key when nobody is signed in.
    async fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let token = self
            .session
            .read()
            .await
            .as_ref()
            .map(|s| s.access_token.clone())
            .unwrap_or_else(|| self.endpoint.anon_key.clone());

        request
            .header("apikey", &self.endpoint.anon_key)
            .bearer_auth(token)
    }

    async fn store_session(&self, session: Option<Session>) {
        *self.session.write().await = session;
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, RemoteError> {
        let response = self
            .http
            .post(self.endpoint.auth_url("token"))
            .query(&[("grant_type", "refresh_token")])
            .header("apikey", &self.endpoint.anon_key)
            .json(&RefreshGrant { refresh_token })
            .send()
            .await?;

        let token: TokenResponse = check(response).await?.json().await?;
        Ok(token.into_session(Utc::now()))
    }
}

#[async_trait]
impl RemoteDataService for SupabaseClient {
    async fn get_session(&self) -> Result<Option<Session>, RemoteError> {
        let current = self.session.read().await.clone();
        let Some(session) = current else {
            return Ok(None);
        };

        if !session.is_expired(Utc::now()) {
            return Ok(Some(session));
        }

        match self.refresh_session(&session.refresh_token).await {
            Ok(refreshed) => {
                self.store_session(Some(refreshed.clone())).await;
                self.events.emit(AuthEvent {
                    kind: AuthEventKind::TokenRefreshed,
                    session: Some(refreshed.clone()),
                });
                Ok(Some(refreshed))
            }
            Err(e) => {
                warn!(error = %e, "session refresh failed, signing out locally");
                self.store_session(None).await;
                self.events.emit(AuthEvent::signed_out());
                Ok(None)
            }
        }
    }

    async fn get_user(&self) -> Result<Option<User>, RemoteError> {
        if self.get_session().await?.is_none() {
            return Ok(None);
        }

        let request = self.authorized(self.http.get(self.endpoint.auth_url("user"))).await;
        let response = request.send().await?;

        match response.status() {
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                warn!("auth server rejected the current session");
                Ok(None)
            }
            _ => Ok(Some(check(response).await?.json().await?)),
        }
    }

    fn subscribe(&self) -> AuthSubscription {
        self.events.subscribe()
    }

    async fn sign_in_with_password(
        &self,
        credentials: &Credentials,
    ) -> Result<Session, RemoteError> {
        let response = self
            .http
            .post(self.endpoint.auth_url("token"))
            .query(&[("grant_type", "password")])
            .header("apikey", &self.endpoint.anon_key)
            .json(credentials)
            .send()
            .await?;

        let token: TokenResponse = check(response).await?.json().await?;
        let session = token.into_session(Utc::now());

        info!(user = %session.user.id, "signed in");
        self.store_session(Some(session.clone())).await;
        self.events.emit(AuthEvent::signed_in(session.clone()));
        Ok(session)
    }

    async fn sign_up(&self, credentials: &Credentials) -> Result<SignUpResponse, RemoteError> {
        let response = self
            .http
            .post(self.endpoint.auth_url("signup"))
            .header("apikey", &self.endpoint.anon_key)
            .json(credentials)
            .send()
            .await?;

        let body: SignUpBody = check(response).await?.json().await?;
        match body {
            SignUpBody::Session(token) => {
                let session = token.into_session(Utc::now());
                info!(user = %session.user.id, "signed up with immediate session");
                self.store_session(Some(session.clone())).await;
                self.events.emit(AuthEvent::signed_in(session.clone()));
                Ok(SignUpResponse {
                    user: Some(session.user.clone()),
                    session: Some(session),
                })
            }
            SignUpBody::User(user) => Ok(SignUpResponse {
                user: Some(user),
                session: None,
            }),
            SignUpBody::Empty(_) => {
                warn!("sign-up response carried neither a user nor a session");
                Ok(SignUpResponse::default())
            }
        }
    }

    async fn sign_out(&self) -> Result<(), RemoteError> {
        let had_session = self.session.read().await.is_some();
        let result = if had_session {
            let request = self
                .authorized(self.http.post(self.endpoint.auth_url("logout")))
                .await;
            match request.send().await {
                Ok(response) => check(response).await.map(|_| ()),
                Err(e) => Err(e.into()),
            }
        } else {
            Ok(())
        };

        // The local session is gone whatever the server said.
        self.store_session(None).await;
        self.events.emit(AuthEvent::signed_out());
        result
    }

    async fn select_activities(&self, owner: Uuid) -> Result<Vec<Activity>, RemoteError> {
        let owner_filter = format!("eq.{}", owner);
        let request = self
            .http
            .get(self.endpoint.table_url())
            .query(&[
                ("select", "*"),
                ("user_id", owner_filter.as_str()),
                ("order", "created_at.desc"),
            ]);

        let response = self.authorized(request).await.send().await?;
        Ok(check(response).await?.json().await?)
    }

    async fn insert_activity(&self, activity: &NewActivity) -> Result<(), RemoteError> {
        let request = self
            .http
            .post(self.endpoint.table_url())
            .header("Prefer", "return=minimal")
            .json(&[activity]);

        let response = self.authorized(request).await.send().await?;
        check(response).await.map(|_| ())
    }

    async fn update_activity(
        &self,
        id: ActivityId,
        owner: Uuid,
        changes: &ActivityChanges,
    ) -> Result<(), RemoteError> {
        let id_filter = format!("eq.{}", id);
        let owner_filter = format!("eq.{}", owner);
        let request = self
            .http
            .patch(self.endpoint.table_url())
            .query(&[("id", id_filter.as_str()), ("user_id", owner_filter.as_str())])
            .header("Prefer", "return=representation")
            .json(changes);

        let response = self.authorized(request).await.send().await?;
        let rows: Vec<serde_json::Value> = check(response).await?.json().await?;
        ensure_matched(&rows)
    }
}

/// A filtered PATCH that touched nothing still answers 2xx.
fn ensure_matched(rows: &[serde_json::Value]) -> Result<(), RemoteError> {
    if rows.is_empty() {
        return Err(RemoteError::with_status(ACTIVITY_NOT_FOUND, 404));
    }
    Ok(())
}
