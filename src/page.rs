//! Page composition: authenticates the caller, fetches the list when there
//! is a session, and renders the views.

use std::time::Instant;

use minijinja::{context, Environment};
use serde::Serialize;
use tracing::{error, warn};

use crate::activities::{ActivitiesManager, ListMessage};
use crate::forms::{AddActivityForm, LoginForm, SignUpForm};
use crate::models::{Activity, User};
use crate::remote::RemoteDataService;
use crate::session::SessionState;

/// Runs on every full load of the root page.
///
/// Returns the server-validated user. The list is only requested when a
/// user is present, and always scoped to that user.
pub async fn compose_home(
    remote: &dyn RemoteDataService,
    manager: &mut ActivitiesManager,
) -> Option<User> {
    let user = match remote.get_user().await {
        Ok(user) => user,
        Err(e) => {
            warn!(error = %e, "could not validate session");
            None
        }
    };

    if let Some(user) = &user {
        let message = match remote.select_activities(user.id).await {
            Ok(activities) => ListMessage::ListReplaced {
                activities,
                fetch_error: None,
            },
            Err(e) => {
                error!(error = %e, "Error fetching data");
                ListMessage::ListReplaced {
                    activities: Vec::new(),
                    fetch_error: Some(e.message),
                }
            }
        };
        manager.reduce(message);
    }

    user
}

#[derive(Serialize)]
struct AuthView {
    loading: bool,
    email: Option<String>,
}

impl AuthView {
    fn from_state(state: &SessionState) -> Self {
        Self {
            loading: state.is_loading(),
            email: state.user().and_then(|u| u.email.clone()),
        }
    }
}

#[derive(Serialize)]
struct CardView {
    id: i64,
    title: String,
    description: Option<String>,
    created_on: String,
}

impl From<&Activity> for CardView {
    fn from(activity: &Activity) -> Self {
        Self {
            id: activity.id,
            title: activity.display_title(),
            description: activity.description.clone().filter(|d| !d.is_empty()),
            created_on: activity.created_on(),
        }
    }
}

#[derive(Serialize)]
struct FieldsView {
    first: String,
    second: String,
    busy: bool,
    error: Option<String>,
    notice: Option<String>,
}

#[derive(Serialize)]
struct EditView {
    id: i64,
    fields: FieldsView,
    /// Seconds until the page should reload to pick up a pending close.
    refresh_after: Option<u64>,
}

/// Template environment with every view registered.
pub struct Pages {
    env: Environment<'static>,
}

impl Pages {
    pub fn new() -> Result<Self, minijinja::Error> {
        let mut env = Environment::new();
        env.add_template("base.html", include_str!("../templates/base.html"))?;
        env.add_template("home.html", include_str!("../templates/home.html"))?;
        env.add_template("login.html", include_str!("../templates/login.html"))?;
        env.add_template("signup.html", include_str!("../templates/signup.html"))?;
        Ok(Self { env })
    }

    /// Root view. `user` decides between the activity UI and the login prompt.
    pub fn home(
        &self,
        session: &SessionState,
        user: Option<&User>,
        add_form: &mut AddActivityForm,
        manager: &ActivitiesManager,
    ) -> Result<String, minijinja::Error> {
        let cards: Vec<CardView> = manager.activities().iter().map(CardView::from).collect();
        let add = FieldsView {
            first: add_form.title.clone(),
            second: add_form.description.clone(),
            busy: add_form.status.busy,
            error: add_form.status.error.clone(),
            notice: add_form.status.take_notice(),
        };
        let edit = manager.editing().map(|editing| EditView {
            id: editing.activity.id,
            fields: FieldsView {
                first: editing.form.title.clone(),
                second: editing.form.description.clone(),
                busy: editing.form.status.busy,
                error: editing.form.status.error.clone(),
                notice: editing.form.status.notice().map(str::to_string),
            },
            refresh_after: editing.refresh_after(Instant::now()),
        });

        self.env.get_template("home.html")?.render(context! {
            auth => AuthView::from_state(session),
            signed_in => user.is_some(),
            add => add,
            activities => cards,
            fetch_error => manager.fetch_error(),
            edit => edit,
        })
    }

    pub fn login(
        &self,
        session: &SessionState,
        form: &LoginForm,
    ) -> Result<String, minijinja::Error> {
        self.env.get_template("login.html")?.render(context! {
            auth => AuthView::from_state(session),
            form => FieldsView {
                first: form.email.clone(),
                second: String::new(),
                busy: form.status.busy,
                error: form.status.error.clone(),
                notice: None,
            },
        })
    }

    pub fn signup(
        &self,
        session: &SessionState,
        form: &mut SignUpForm,
    ) -> Result<String, minijinja::Error> {
        self.env.get_template("signup.html")?.render(context! {
            auth => AuthView::from_state(session),
            min_password_length => form.min_password_length(),
            form => FieldsView {
                first: form.email.clone(),
                second: String::new(),
                busy: form.status.busy,
                error: form.status.error.clone(),
                notice: form.status.take_notice(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::remote::fake::{Call, FakeRemote};

    fn manager() -> ActivitiesManager {
        ActivitiesManager::new(Duration::from_millis(1500))
    }

    #[tokio::test]
    async fn test_anonymous_home_skips_fetch() {
        let remote = FakeRemote::new();
        let mut manager = manager();

        let user = compose_home(&remote, &mut manager).await;

        assert_eq!(user, None);
        assert!(!remote.calls().iter().any(|c| matches!(c, Call::Select(_))));
    }

    #[tokio::test]
    async fn test_home_fetches_only_own_rows_newest_first() {
        let remote = FakeRemote::new();
        let user = remote.restore_session("a@example.com");
        remote.seed_activity(user.id, "Older", None);
        remote.seed_activity(uuid::Uuid::new_v4(), "Someone else's", None);
        remote.seed_activity(user.id, "Newer", None);
        let mut manager = manager();

        let composed = compose_home(&remote, &mut manager).await;

        assert_eq!(composed, Some(user.clone()));
        assert!(remote.calls().contains(&Call::Select(user.id)));
        let titles: Vec<&str> = manager.activities().iter().map(|a| a.title.as_str()).collect();
        assert_eq!(titles, vec!["Newer", "Older"]);
    }

    #[tokio::test]
    async fn test_fetch_error_reaches_manager() {
        let remote = FakeRemote::new();
        remote.restore_session("a@example.com");
        remote.fail_select_with("permission denied for table activities");
        let mut manager = manager();

        let user = compose_home(&remote, &mut manager).await;

        assert!(user.is_some());
        assert_eq!(
            manager.fetch_error(),
            Some("permission denied for table activities")
        );
        assert!(manager.activities().is_empty());
    }

    #[test]
    fn test_home_renders_cards_and_escapes() {
        let pages = Pages::new().unwrap();
        let remote = FakeRemote::new();
        let owner = uuid::Uuid::new_v4();
        let mut manager = manager();
        manager.reduce(ListMessage::ListReplaced {
            activities: vec![
                remote.seed_activity(owner, "<b>Run</b>", Some("park")),
                remote.seed_activity(owner, "  ", None),
            ],
            fetch_error: None,
        });
        let user = crate::models::test_user("a@example.com");
        let state = SessionState::Authenticated(user.clone());

        let html = pages
            .home(&state, Some(&user), &mut AddActivityForm::default(), &manager)
            .unwrap();

        assert!(html.contains("&lt;b&gt;Run"));
        assert!(!html.contains("<b>Run"));
        assert!(html.contains("park"));
        assert!(html.contains("Activity 2"));
        assert!(html.contains("Logged in as"));
        assert!(html.contains("a@example.com"));
    }

    #[test]
    fn test_home_prompts_when_signed_out() {
        let pages = Pages::new().unwrap();
        let html = pages
            .home(
                &SessionState::Anonymous,
                None,
                &mut AddActivityForm::default(),
                &manager(),
            )
            .unwrap();

        assert!(html.contains("Please log in to manage your activities."));
        assert!(!html.contains("Add New Activity"));
    }

    #[test]
    fn test_empty_list_message() {
        let pages = Pages::new().unwrap();
        let user = crate::models::test_user("a@example.com");
        let html = pages
            .home(
                &SessionState::Authenticated(user.clone()),
                Some(&user),
                &mut AddActivityForm::default(),
                &manager(),
            )
            .unwrap();

        assert!(html.contains("No activities found."));
    }

    #[test]
    fn test_signup_advertises_password_length() {
        let pages = Pages::new().unwrap();
        let mut form = SignUpForm::new(8);
        let html = pages.signup(&SessionState::Anonymous, &mut form).unwrap();
        assert!(html.contains("minlength=\"8\""));
    }

    #[tokio::test]
    async fn test_add_notice_rendered_once() {
        let pages = Pages::new().unwrap();
        let remote = FakeRemote::new();
        let user = remote.restore_session("a@example.com");
        let state = SessionState::Authenticated(user.clone());
        let store = crate::session::SessionStore::with_state(state.clone());
        let mut form = AddActivityForm::default();
        form.set_draft("Run".to_string(), String::new());
        form.submit(&remote, &store, &crate::refresh::RefreshIntents::new())
            .await
            .unwrap();

        let first = pages.home(&state, Some(&user), &mut form, &manager()).unwrap();
        let second = pages.home(&state, Some(&user), &mut form, &manager()).unwrap();

        assert!(first.contains(crate::forms::ACTIVITY_ADDED));
        assert!(!second.contains(crate::forms::ACTIVITY_ADDED));
    }
}
