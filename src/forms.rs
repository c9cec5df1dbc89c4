//! Add, edit, login and sign-up forms.
//!
//! All four share one contract: the draft lives in the form, blank required
//! fields stop the submit before any call is made, exactly one backend call
//! is made per submit, and a failure keeps the draft so the user can retry.
//! `submit` takes `&mut self`, so a second submit cannot start while one is
//! outstanding.

use tracing::error;

use crate::error::{FormError, RemoteError};
use crate::models::{Activity, ActivityChanges, ActivityId, Credentials, NewActivity, User};
use crate::refresh::RefreshIntents;
use crate::remote::RemoteDataService;
use crate::session::SessionStore;

pub const TITLE_REQUIRED: &str = "Title is required.";
pub const CREDENTIALS_REQUIRED: &str = "Email and password are required.";
pub const NOT_SIGNED_IN: &str = "You must be logged in to manage activities.";
pub const ACTIVITY_ADDED: &str = "Activity added successfully!";
pub const ACTIVITY_UPDATED: &str = "Activity updated successfully!";
pub const SIGN_UP_SENT: &str = "Sign up successful! Please check your email to confirm your account.";
pub const SIGN_UP_UNEXPECTED: &str = "An unexpected issue occurred during sign up. Please try again.";

/// What a form shows next to its fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormStatus {
    pub busy: bool,
    pub error: Option<String>,
    notice: Option<String>,
}

impl FormStatus {
    fn begin(&mut self) {
        self.busy = true;
        self.error = None;
        self.notice = None;
    }

    fn finish(&mut self, result: Result<(), FormError>) -> Result<(), FormError> {
        self.busy = false;
        if let Err(e) = &result {
            self.error = Some(e.to_string());
        }
        result
    }

    fn announce(&mut self, notice: &str) {
        self.notice = Some(notice.to_string());
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    /// Success notices are transient: the first view that shows one consumes it.
    pub fn take_notice(&mut self) -> Option<String> {
        self.notice.take()
    }
}

fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

fn blank_to_none(value: &str) -> Option<String> {
    if is_blank(value) {
        None
    } else {
        Some(value.to_string())
    }
}

fn remote_failure(action: &str, err: RemoteError) -> FormError {
    error!(error = %err, "Error {action}");
    FormError::Remote(format!("Failed to {action}: {}", err.message))
}

fn signed_in_user(store: &SessionStore) -> Result<User, FormError> {
    store
        .user()
        .ok_or_else(|| FormError::Unexpected(NOT_SIGNED_IN.to_string()))
}

#[derive(Debug, Clone, Default)]
pub struct AddActivityForm {
    pub title: String,
    pub description: String,
    pub status: FormStatus,
}

impl AddActivityForm {
    pub fn set_draft(&mut self, title: String, description: String) {
        self.title = title;
        self.description = description;
    }

    pub async fn submit(
        &mut self,
        remote: &dyn RemoteDataService,
        store: &SessionStore,
        refresh: &RefreshIntents,
    ) -> Result<(), FormError> {
        self.status.begin();
        let result = self.insert(remote, store).await;
        if result.is_ok() {
            self.status.announce(ACTIVITY_ADDED);
            self.title.clear();
            self.description.clear();
            refresh.request();
        }
        self.status.finish(result)
    }

    async fn insert(
        &self,
        remote: &dyn RemoteDataService,
        store: &SessionStore,
    ) -> Result<(), FormError> {
        if is_blank(&self.title) {
            return Err(FormError::Validation(TITLE_REQUIRED.to_string()));
        }
        let owner = signed_in_user(store)?;

        let activity = NewActivity {
            title: self.title.clone(),
            description: blank_to_none(&self.description),
            user_id: Some(owner.id),
        };
        remote
            .insert_activity(&activity)
            .await
            .map_err(|e| remote_failure("add activity", e))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EditActivityForm {
    pub activity_id: ActivityId,
    pub title: String,
    pub description: String,
    pub status: FormStatus,
}

impl EditActivityForm {
    /// Draft prefilled from the activity being edited.
    pub fn for_activity(activity: &Activity) -> Self {
        Self {
            activity_id: activity.id,
            title: activity.title.clone(),
            description: activity.description.clone().unwrap_or_default(),
            status: FormStatus::default(),
        }
    }

    pub fn set_draft(&mut self, title: String, description: String) {
        self.title = title;
        self.description = description;
    }

    pub async fn submit(
        &mut self,
        remote: &dyn RemoteDataService,
        store: &SessionStore,
        refresh: &RefreshIntents,
    ) -> Result<(), FormError> {
        self.status.begin();
        let result = self.update(remote, store).await;
        if result.is_ok() {
            self.status.announce(ACTIVITY_UPDATED);
            refresh.request();
        }
        self.status.finish(result)
    }

    async fn update(
        &self,
        remote: &dyn RemoteDataService,
        store: &SessionStore,
    ) -> Result<(), FormError> {
        if is_blank(&self.title) {
            return Err(FormError::Validation(TITLE_REQUIRED.to_string()));
        }
        let owner = signed_in_user(store)?;

        let changes = ActivityChanges {
            title: self.title.clone(),
            description: blank_to_none(&self.description),
        };
        remote
            .update_activity(self.activity_id, owner.id, &changes)
            .await
            .map_err(|e| remote_failure("update activity", e))
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
    pub status: FormStatus,
}

impl LoginForm {
    pub fn set_draft(&mut self, email: String, password: String) {
        self.email = email;
        self.password = password;
    }

    /// On success only a refresh is requested; moving the user off the
    /// login view is left to the session observer's `SignedIn` handling.
    pub async fn submit(
        &mut self,
        remote: &dyn RemoteDataService,
        refresh: &RefreshIntents,
    ) -> Result<(), FormError> {
        self.status.begin();
        let result = self.sign_in(remote).await;
        if result.is_ok() {
            self.password.clear();
            refresh.request();
        }
        self.status.finish(result)
    }

    async fn sign_in(&self, remote: &dyn RemoteDataService) -> Result<(), FormError> {
        if is_blank(&self.email) || is_blank(&self.password) {
            return Err(FormError::Validation(CREDENTIALS_REQUIRED.to_string()));
        }

        let credentials = Credentials {
            email: self.email.clone(),
            password: self.password.clone(),
        };
        remote
            .sign_in_with_password(&credentials)
            .await
            .map(|_| ())
            .map_err(|e| remote_failure("sign in", e))
    }
}

#[derive(Debug, Clone)]
pub struct SignUpForm {
    pub email: String,
    pub password: String,
    pub status: FormStatus,
    min_password_length: usize,
}

impl SignUpForm {
    pub fn new(min_password_length: usize) -> Self {
        Self {
            email: String::new(),
            password: String::new(),
            status: FormStatus::default(),
            min_password_length,
        }
    }

    pub fn min_password_length(&self) -> usize {
        self.min_password_length
    }

    pub fn set_draft(&mut self, email: String, password: String) {
        self.email = email;
        self.password = password;
    }

    pub async fn submit(&mut self, remote: &dyn RemoteDataService) -> Result<(), FormError> {
        self.status.begin();
        let result = self.sign_up(remote).await;
        if result.is_ok() {
            self.status.announce(SIGN_UP_SENT);
            self.email.clear();
            self.password.clear();
        }
        self.status.finish(result)
    }

    async fn sign_up(&self, remote: &dyn RemoteDataService) -> Result<(), FormError> {
        if is_blank(&self.email) || is_blank(&self.password) {
            return Err(FormError::Validation(CREDENTIALS_REQUIRED.to_string()));
        }
        if self.password.chars().count() < self.min_password_length {
            return Err(FormError::Validation(format!(
                "Password must be at least {} characters.",
                self.min_password_length
            )));
        }

        let credentials = Credentials {
            email: self.email.clone(),
            password: self.password.clone(),
        };
        let response = remote
            .sign_up(&credentials)
            .await
            .map_err(|e| remote_failure("sign up", e))?;

        match response.user {
            Some(user) if user.is_unconfirmed_duplicate() => Err(FormError::AlreadyRegistered),
            Some(_) => Ok(()),
            None => Err(FormError::Unexpected(SIGN_UP_UNEXPECTED.to_string())),
        }
    }
}
