//! Scripted in-memory backend for tests. Records every call and emits auth
//! events the same way the real client does.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use uuid::Uuid;

use super::{AuthEventHub, AuthSubscription, RemoteDataService, ACTIVITY_NOT_FOUND};
use crate::error::RemoteError;
use crate::models::{
    test_session, test_user, Activity, ActivityChanges, ActivityId, AuthEvent, AuthEventKind,
    Credentials, NewActivity, Session, SignUpResponse, User,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    GetSession,
    GetUser,
    SignIn(String),
    SignUp(String),
    SignOut,
    Select(Uuid),
    Insert(NewActivity),
    Update(ActivityId, Uuid, ActivityChanges),
}

#[derive(Default)]
struct State {
    accounts: Vec<(String, String, User)>,
    session: Option<Session>,
    activities: Vec<Activity>,
    calls: Vec<Call>,
    fail_next: Option<RemoteError>,
    fail_select: Option<RemoteError>,
    sign_up_response: Option<SignUpResponse>,
    sign_out_during_fetch: bool,
    refresh_allowed: bool,
    next_id: ActivityId,
}

pub struct FakeRemote {
    events: AuthEventHub,
    state: Mutex<State>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self {
            events: AuthEventHub::new(),
            state: Mutex::new(State {
                next_id: 1,
                ..State::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn record(&self, call: Call) -> Result<(), RemoteError> {
        let mut state = self.state();
        state.calls.push(call);
        match state.fail_next.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn add_account(&self, email: &str, password: &str) -> User {
        let user = test_user(email);
        self.state()
            .accounts
            .push((email.to_string(), password.to_string(), user.clone()));
        user
    }

    /// Pretends a session survived from an earlier visit. No event is emitted.
    pub fn restore_session(&self, email: &str) -> User {
        let user = test_user(email);
        self.state().session = Some(test_session(user.clone()));
        user
    }

    /// Expired sessions are dropped with a sign-out unless refreshing is allowed.
    pub fn expire_session(&self) {
        if let Some(session) = self.state().session.as_mut() {
            session.expires_at = Some(Utc::now() - Duration::minutes(1));
        }
    }

    pub fn seed_activity(&self, owner: Uuid, title: &str, description: Option<&str>) -> Activity {
        let mut state = self.state();
        let activity = Activity {
            id: state.next_id,
            title: title.to_string(),
            description: description.map(str::to_string),
            created_at: Utc::now() + Duration::seconds(state.next_id),
            user_id: Some(owner),
        };
        state.next_id += 1;
        state.activities.push(activity.clone());
        activity
    }

    /// Deletes a row behind the app's back.
    pub fn remove_activity(&self, id: ActivityId) {
        self.state().activities.retain(|a| a.id != id);
    }

    pub fn allow_refresh(&self) {
        self.state().refresh_allowed = true;
    }

    pub fn fail_next(&self, message: &str) {
        self.state().fail_next = Some(RemoteError::with_status(message, 400));
    }

    /// Only the next select fails; session calls keep working.
    pub fn fail_select_with(&self, message: &str) {
        self.state().fail_select = Some(RemoteError::with_status(message, 403));
    }

    pub fn respond_to_sign_up(&self, response: SignUpResponse) {
        self.state().sign_up_response = Some(response);
    }

    /// The next `get_session` returns the stored session but emits a
    /// sign-out while doing so.
    pub fn sign_out_during_next_fetch(&self) {
        self.state().sign_out_during_fetch = true;
    }

    pub fn emit(&self, event: AuthEvent) {
        self.events.emit(event);
    }

    pub fn listener_count(&self) -> usize {
        self.events.listener_count()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn mutation_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Insert(..) | Call::Update(..)))
            .collect()
    }

    pub fn activities(&self) -> Vec<Activity> {
        self.state().activities.clone()
    }
}

#[async_trait]
impl RemoteDataService for FakeRemote {
    async fn get_session(&self) -> Result<Option<Session>, RemoteError> {
        self.record(Call::GetSession)?;
        let (session, sign_out) = {
            let mut state = self.state();
            let session = state.session.clone();
            let sign_out = std::mem::take(&mut state.sign_out_during_fetch);
            if sign_out {
                state.session = None;
            }
            (session, sign_out)
        };

        if sign_out {
            self.events.emit(AuthEvent::signed_out());
            return Ok(session);
        }

        match session {
            Some(session) if session.is_expired(Utc::now()) => {
                let renewed = {
                    let mut state = self.state();
                    state.session = state
                        .refresh_allowed
                        .then(|| test_session(session.user.clone()));
                    state.session.clone()
                };
                match &renewed {
                    Some(session) => self.events.emit(AuthEvent {
                        kind: AuthEventKind::TokenRefreshed,
                        session: Some(session.clone()),
                    }),
                    None => self.events.emit(AuthEvent::signed_out()),
                }
                Ok(renewed)
            }
            other => Ok(other),
        }
    }

    async fn get_user(&self) -> Result<Option<User>, RemoteError> {
        if self.get_session().await?.is_none() {
            return Ok(None);
        }
        self.record(Call::GetUser)?;
        Ok(self.state().session.as_ref().map(|s| s.user.clone()))
    }

    fn subscribe(&self) -> AuthSubscription {
        self.events.subscribe()
    }

    async fn sign_in_with_password(
        &self,
        credentials: &Credentials,
    ) -> Result<Session, RemoteError> {
        self.record(Call::SignIn(credentials.email.clone()))?;
        let user = self
            .state()
            .accounts
            .iter()
            .find(|(email, password, _)| {
                *email == credentials.email && *password == credentials.password
            })
            .map(|(_, _, user)| user.clone())
            .ok_or_else(|| RemoteError::with_status("Invalid login credentials", 400))?;

        let session = test_session(user);
        self.state().session = Some(session.clone());
        self.events.emit(AuthEvent::signed_in(session.clone()));
        Ok(session)
    }

    async fn sign_up(&self, credentials: &Credentials) -> Result<SignUpResponse, RemoteError> {
        self.record(Call::SignUp(credentials.email.clone()))?;
        let scripted = self.state().sign_up_response.take();
        let response = scripted.unwrap_or_else(|| SignUpResponse {
            user: Some(test_user(&credentials.email)),
            session: None,
        });

        if let Some(session) = &response.session {
            self.state().session = Some(session.clone());
            self.events.emit(AuthEvent::signed_in(session.clone()));
        }
        Ok(response)
    }

    async fn sign_out(&self) -> Result<(), RemoteError> {
        let result = self.record(Call::SignOut);
        self.state().session = None;
        self.events.emit(AuthEvent::signed_out());
        result
    }

    async fn select_activities(&self, owner: Uuid) -> Result<Vec<Activity>, RemoteError> {
        self.record(Call::Select(owner))?;
        if let Some(err) = self.state().fail_select.take() {
            return Err(err);
        }
        let mut rows: Vec<Activity> = self
            .state()
            .activities
            .iter()
            .filter(|a| a.user_id == Some(owner))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn insert_activity(&self, activity: &NewActivity) -> Result<(), RemoteError> {
        self.record(Call::Insert(activity.clone()))?;
        let mut state = self.state();
        let id = state.next_id;
        state.next_id += 1;
        state.activities.push(Activity {
            id,
            title: activity.title.clone(),
            description: activity.description.clone(),
            created_at: Utc::now() + Duration::seconds(id),
            user_id: activity.user_id,
        });
        Ok(())
    }

    async fn update_activity(
        &self,
        id: ActivityId,
        owner: Uuid,
        changes: &ActivityChanges,
    ) -> Result<(), RemoteError> {
        self.record(Call::Update(id, owner, changes.clone()))?;
        let mut state = self.state();
        let row = state
            .activities
            .iter_mut()
            .find(|a| a.id == id && a.user_id == Some(owner))
            .ok_or_else(|| RemoteError::with_status(ACTIVITY_NOT_FOUND, 404))?;
        row.title = changes.title.clone();
        row.description = changes.description.clone();
        Ok(())
    }
}
