//! Per-browser state: one backend handle, session store, observer, navigator,
//! forms and list controller for every browser session.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::activities::{ActivitiesManager, ListMessage};
use crate::config::Config;
use crate::forms::{AddActivityForm, LoginForm, SignUpForm};
use crate::navigation::{Navigator, Route};
use crate::refresh::RefreshIntents;
use crate::remote::RemoteDataService;
use crate::session::{SessionObserver, SessionStore};

/// Creates a fresh backend handle for a new browser.
pub type RemoteFactory = Arc<dyn Fn() -> Arc<dyn RemoteDataService> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub edit_close_delay: Duration,
    pub password_min_length: usize,
}

impl From<&Config> for ClientSettings {
    fn from(config: &Config) -> Self {
        Self {
            edit_close_delay: config.edit_close_delay,
            password_min_length: config.password_min_length,
        }
    }
}

pub struct ClientContext {
    pub remote: Arc<dyn RemoteDataService>,
    pub store: SessionStore,
    pub navigator: Navigator,
    pub refresh: RefreshIntents,
    pub add_form: AddActivityForm,
    pub login_form: LoginForm,
    pub signup_form: SignUpForm,
    pub activities: ActivitiesManager,
    observer: SessionObserver,
    last_seen: Instant,
}

impl ClientContext {
    pub async fn start(remote: Arc<dyn RemoteDataService>, settings: &ClientSettings) -> Self {
        let store = SessionStore::new();
        let navigator = Navigator::new();
        let observer =
            SessionObserver::start(remote.as_ref(), store.clone(), navigator.clone()).await;

        Self {
            remote,
            store,
            navigator,
            refresh: RefreshIntents::new(),
            add_form: AddActivityForm::default(),
            login_form: LoginForm::default(),
            signup_form: SignUpForm::new(settings.password_min_length),
            activities: ActivitiesManager::new(settings.edit_close_delay),
            observer,
            last_seen: Instant::now(),
        }
    }

    /// Catches up with auth events and elapsed timers. When the signed-in
    /// user changed, everything shown for the previous one is dropped.
    pub fn sync(&mut self, now: Instant) {
        let before = self.store.user().map(|u| u.id);
        self.observer.pump();
        if self.store.user().map(|u| u.id) != before {
            self.forget_user_data();
        }
        self.activities.reduce(ListMessage::Tick(now));
        self.last_seen = now;
    }

    fn forget_user_data(&mut self) {
        debug!("session user changed, clearing activities and drafts");
        self.activities.reduce(ListMessage::ListReplaced {
            activities: Vec::new(),
            fetch_error: None,
        });
        self.activities.reduce(ListMessage::Close);
        self.add_form = AddActivityForm::default();
    }

    /// Where to send the browser after a submit: a pending navigation wins,
    /// a refresh request reloads the current view, otherwise `None` and the
    /// current view is rendered in place from memory.
    pub fn after_submit(&mut self) -> Option<Route> {
        let pending = self.navigator.take_pending();
        let refresh = self.refresh.take();
        match pending {
            Some(route) => Some(route),
            None if refresh => Some(self.navigator.current()),
            None => None,
        }
    }

    pub fn is_listening(&self) -> bool {
        self.observer.is_listening()
    }

    pub fn shutdown(&mut self) {
        self.observer.stop();
    }
}

/// All live browser contexts, keyed by the id stored in the browser's session.
pub struct ClientRegistry {
    clients: RwLock<HashMap<Uuid, Arc<Mutex<ClientContext>>>>,
    factory: RemoteFactory,
    settings: ClientSettings,
}

impl ClientRegistry {
    pub fn new(factory: RemoteFactory, settings: ClientSettings) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            factory,
            settings,
        }
    }

    pub async fn get_or_start(&self, id: Uuid) -> Arc<Mutex<ClientContext>> {
        if let Some(context) = self.clients.read().await.get(&id) {
            return Arc::clone(context);
        }

        let context = ClientContext::start((self.factory)(), &self.settings).await;
        info!(client = %id, "client context started");

        let mut clients = self.clients.write().await;
        Arc::clone(
            clients
                .entry(id)
                .or_insert_with(|| Arc::new(Mutex::new(context))),
        )
    }

    /// Drops contexts idle for at least `idle`, releasing their subscriptions.
    /// Contexts busy with a request are left alone.
    pub async fn prune(&self, idle: Duration, now: Instant) -> usize {
        let mut clients = self.clients.write().await;
        let before = clients.len();

        clients.retain(|id, context| match context.try_lock() {
            Ok(mut context) if now.saturating_duration_since(context.last_seen) >= idle => {
                debug!(client = %id, "pruning idle client context");
                context.shutdown();
                false
            }
            _ => true,
        });

        before - clients.len()
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }
}
