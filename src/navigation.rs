use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

/// Views a browser can be on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Route {
    #[default]
    Root,
    Login,
    SignUp,
}

impl Route {
    pub fn path(self) -> &'static str {
        match self {
            Route::Root => "/",
            Route::Login => "/auth/login",
            Route::SignUp => "/auth/signup",
        }
    }

    /// Login and sign-up are the authentication entry views.
    pub fn is_auth_entry(self) -> bool {
        matches!(self, Route::Login | Route::SignUp)
    }
}

#[derive(Debug, Default)]
struct Location {
    current: Route,
    pending: Option<Route>,
}

/// Shared handle on one browser's location.
///
/// Views record where the user is with [`visit`](Navigator::visit); anything
/// that wants to move the user calls [`navigate`](Navigator::navigate), and
/// the HTTP layer turns the pending route into a redirect.
#[derive(Debug, Clone, Default)]
pub struct Navigator {
    location: Arc<Mutex<Location>>,
}

impl Navigator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Location> {
        self.location.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current(&self) -> Route {
        self.lock().current
    }

    pub fn visit(&self, route: Route) {
        self.lock().current = route;
    }

    pub fn navigate(&self, route: Route) {
        debug!(to = route.path(), "navigate");
        let mut location = self.lock();
        location.current = route;
        location.pending = Some(route);
    }

    pub fn take_pending(&self) -> Option<Route> {
        self.lock().pending.take()
    }
}
