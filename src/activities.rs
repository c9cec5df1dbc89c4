use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::FormError;
use crate::forms::EditActivityForm;
use crate::models::{Activity, ActivityId};
use crate::refresh::RefreshIntents;
use crate::remote::RemoteDataService;
use crate::session::SessionStore;

/// Inputs of the list controller.
#[derive(Debug, Clone)]
pub enum ListMessage {
    /// Page composition fetched a fresh list (or failed to).
    ListReplaced {
        activities: Vec<Activity>,
        fetch_error: Option<String>,
    },
    /// Open the edit affordance for one activity.
    Select(ActivityId),
    Close,
    /// Time moved on; closes an affordance whose close delay elapsed.
    Tick(Instant),
}

/// Edit view of a single activity.
#[derive(Debug, Clone)]
pub struct EditAffordance {
    pub activity: Activity,
    pub form: EditActivityForm,
    closes_at: Option<Instant>,
}

impl EditAffordance {
    pub fn closes_at(&self) -> Option<Instant> {
        self.closes_at
    }

    /// Whole seconds until a pending close, rounded up and never below one.
    pub fn refresh_after(&self, now: Instant) -> Option<u64> {
        let remaining = self.closes_at?.saturating_duration_since(now);
        let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
        Some(secs.max(1))
    }
}

/// Holds the rendered activity list and at most one open edit affordance.
///
/// The list only changes through [`ListMessage::ListReplaced`]; the
/// controller never fetches nor patches rows itself.
pub struct ActivitiesManager {
    activities: Vec<Activity>,
    fetch_error: Option<String>,
    editing: Option<EditAffordance>,
    close_delay: Duration,
}

impl ActivitiesManager {
    pub fn new(close_delay: Duration) -> Self {
        Self {
            activities: Vec::new(),
            fetch_error: None,
            editing: None,
            close_delay,
        }
    }

    pub fn activities(&self) -> &[Activity] {
        &self.activities
    }

    pub fn fetch_error(&self) -> Option<&str> {
        self.fetch_error.as_deref()
    }

    pub fn editing(&self) -> Option<&EditAffordance> {
        self.editing.as_ref()
    }

    pub fn editing_mut(&mut self) -> Option<&mut EditAffordance> {
        self.editing.as_mut()
    }

    /// Applies one message. Returns whether anything visible changed.
    pub fn reduce(&mut self, message: ListMessage) -> bool {
        match message {
            ListMessage::ListReplaced {
                activities,
                fetch_error,
            } => {
                let stale = matches!(
                    &self.editing,
                    Some(editing) if !activities.iter().any(|a| a.id == editing.activity.id)
                );
                if stale {
                    debug!("edited activity left the list, closing editor");
                    self.editing = None;
                }

                if self.activities == activities && self.fetch_error == fetch_error {
                    return stale;
                }
                debug!(count = activities.len(), "activity list replaced");
                self.activities = activities;
                self.fetch_error = fetch_error;
                true
            }
            ListMessage::Select(id) => {
                let Some(activity) = self.activities.iter().find(|a| a.id == id) else {
                    debug!(id, "selected activity is not in the list");
                    return false;
                };
                self.editing = Some(EditAffordance {
                    form: EditActivityForm::for_activity(activity),
                    activity: activity.clone(),
                    closes_at: None,
                });
                true
            }
            ListMessage::Close => self.editing.take().is_some(),
            ListMessage::Tick(now) => {
                let expired = matches!(
                    &self.editing,
                    Some(EditAffordance { closes_at: Some(at), .. }) if now >= *at
                );
                if expired {
                    self.editing = None;
                }
                expired
            }
        }
    }

    /// Submits the open edit form. On success the affordance is scheduled to
    /// close after the configured delay and a re-fetch is requested.
    pub async fn submit_edit(
        &mut self,
        remote: &dyn RemoteDataService,
        store: &SessionStore,
        refresh: &RefreshIntents,
        now: Instant,
    ) -> Result<(), FormError> {
        let close_delay = self.close_delay;
        let Some(editing) = self.editing.as_mut() else {
            return Err(FormError::Unexpected(
                "No activity is being edited.".to_string(),
            ));
        };

        editing.form.submit(remote, store, refresh).await?;
        editing.closes_at = Some(now + close_delay);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forms::ACTIVITY_UPDATED;
    use crate::remote::fake::{Call, FakeRemote};
    use crate::session::SessionState;

    const DELAY: Duration = Duration::from_millis(1500);

    fn list(remote: &FakeRemote, owner: uuid::Uuid) -> Vec<Activity> {
        vec![
            remote.seed_activity(owner, "Run", None),
            remote.seed_activity(owner, "Swim", Some("pool")),
        ]
    }

    fn replaced(activities: Vec<Activity>) -> ListMessage {
        ListMessage::ListReplaced {
            activities,
            fetch_error: None,
        }
    }

    #[test]
    fn test_identical_list_is_not_replaced() {
        let remote = FakeRemote::new();
        let rows = list(&remote, uuid::Uuid::new_v4());
        let mut manager = ActivitiesManager::new(DELAY);

        assert!(manager.reduce(replaced(rows.clone())));
        assert!(!manager.reduce(replaced(rows.clone())));

        let mut changed = rows;
        changed[0].title = "Run 10k".to_string();
        assert!(manager.reduce(replaced(changed)));
        assert_eq!(manager.activities()[0].title, "Run 10k");
    }

    #[test]
    fn test_fetch_error_is_kept_with_empty_list() {
        let mut manager = ActivitiesManager::new(DELAY);
        manager.reduce(ListMessage::ListReplaced {
            activities: Vec::new(),
            fetch_error: Some("relation \"activities\" does not exist".to_string()),
        });

        assert!(manager.activities().is_empty());
        assert_eq!(
            manager.fetch_error(),
            Some("relation \"activities\" does not exist")
        );
    }

    #[test]
    fn test_only_one_item_edited_at_a_time() {
        let remote = FakeRemote::new();
        let rows = list(&remote, uuid::Uuid::new_v4());
        let mut manager = ActivitiesManager::new(DELAY);
        manager.reduce(replaced(rows.clone()));

        assert!(manager.reduce(ListMessage::Select(rows[0].id)));
        assert!(manager.reduce(ListMessage::Select(rows[1].id)));

        let editing = manager.editing().unwrap();
        assert_eq!(editing.activity.id, rows[1].id);
        assert_eq!(editing.form.title, "Swim");
        assert_eq!(editing.form.description, "pool");
    }

    #[test]
    fn test_replacing_list_closes_editor_of_missing_item() {
        let remote = FakeRemote::new();
        let rows = list(&remote, uuid::Uuid::new_v4());
        let mut manager = ActivitiesManager::new(DELAY);
        manager.reduce(replaced(rows.clone()));
        manager.reduce(ListMessage::Select(rows[1].id));

        assert!(!manager.reduce(replaced(rows.clone())));
        assert!(manager.editing().is_some());

        assert!(manager.reduce(replaced(vec![rows[0].clone()])));
        assert!(manager.editing().is_none());
    }

    #[test]
    fn test_selecting_unknown_item_does_nothing() {
        let mut manager = ActivitiesManager::new(DELAY);
        assert!(!manager.reduce(ListMessage::Select(42)));
        assert!(manager.editing().is_none());
    }

    #[test]
    fn test_manual_close() {
        let remote = FakeRemote::new();
        let rows = list(&remote, uuid::Uuid::new_v4());
        let mut manager = ActivitiesManager::new(DELAY);
        manager.reduce(replaced(rows.clone()));
        manager.reduce(ListMessage::Select(rows[0].id));

        assert!(manager.reduce(ListMessage::Close));
        assert!(!manager.reduce(ListMessage::Close));
        assert!(manager.editing().is_none());
    }

    #[test]
    fn test_tick_without_deadline_keeps_affordance() {
        let remote = FakeRemote::new();
        let rows = list(&remote, uuid::Uuid::new_v4());
        let mut manager = ActivitiesManager::new(DELAY);
        manager.reduce(replaced(rows.clone()));
        manager.reduce(ListMessage::Select(rows[0].id));

        assert!(!manager.reduce(ListMessage::Tick(Instant::now() + Duration::from_secs(60))));
        assert!(manager.editing().is_some());
        assert_eq!(manager.editing().unwrap().refresh_after(Instant::now()), None);
    }

    #[tokio::test]
    async fn test_successful_edit_closes_after_delay() {
        let remote = FakeRemote::new();
        let user = remote.restore_session("a@example.com");
        let store = SessionStore::with_state(SessionState::Authenticated(user.clone()));
        let refresh = RefreshIntents::new();
        let rows = list(&remote, user.id);
        let mut manager = ActivitiesManager::new(DELAY);
        manager.reduce(replaced(rows.clone()));
        manager.reduce(ListMessage::Select(rows[0].id));
        manager
            .editing_mut()
            .unwrap()
            .form
            .set_draft("Run 5k".to_string(), String::new());

        let now = Instant::now();
        manager.submit_edit(&remote, &store, &refresh, now).await.unwrap();

        assert!(refresh.take());
        let editing = manager.editing().unwrap();
        assert_eq!(editing.form.status.notice(), Some(ACTIVITY_UPDATED));
        assert_eq!(editing.closes_at(), Some(now + DELAY));
        assert_eq!(editing.refresh_after(now), Some(2));
        assert_eq!(editing.refresh_after(now + DELAY), Some(1));
        // The rendered list is untouched until the re-fetch delivers a new one.
        assert_eq!(manager.activities()[0].title, "Run");

        assert!(!manager.reduce(ListMessage::Tick(now + DELAY / 2)));
        assert!(manager.reduce(ListMessage::Tick(now + DELAY)));
        assert!(manager.editing().is_none());

        assert!(manager.reduce(replaced(remote.activities())));
        assert_eq!(manager.activities()[0].title, "Run 5k");
    }

    #[tokio::test]
    async fn test_failed_edit_stays_open() {
        let remote = FakeRemote::new();
        let user = remote.restore_session("a@example.com");
        let store = SessionStore::with_state(SessionState::Authenticated(user.clone()));
        let refresh = RefreshIntents::new();
        let rows = list(&remote, user.id);
        let mut manager = ActivitiesManager::new(DELAY);
        manager.reduce(replaced(rows.clone()));
        manager.reduce(ListMessage::Select(rows[1].id));
        manager
            .editing_mut()
            .unwrap()
            .form
            .set_draft(" ".to_string(), String::new());

        let now = Instant::now();
        assert!(manager.submit_edit(&remote, &store, &refresh, now).await.is_err());

        assert!(!refresh.is_requested());
        assert!(manager.editing().unwrap().closes_at().is_none());
        assert!(!manager.reduce(ListMessage::Tick(now + DELAY * 10)));
        assert!(!remote
            .calls()
            .iter()
            .any(|c| matches!(c, Call::Update(..))));
    }

    #[tokio::test]
    async fn test_submit_without_open_affordance() {
        let remote = FakeRemote::new();
        let mut manager = ActivitiesManager::new(DELAY);
        let err = manager
            .submit_edit(
                &remote,
                &SessionStore::new(),
                &RefreshIntents::new(),
                Instant::now(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FormError::Unexpected(_)));
    }
}
