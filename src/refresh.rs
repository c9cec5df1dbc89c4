use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Requests for an authoritative re-fetch of server state.
///
/// Mutation flows only raise the flag; whoever owns page composition takes
/// it and re-fetches the whole list. Several requests before a take collapse
/// into one re-fetch.
#[derive(Debug, Clone, Default)]
pub struct RefreshIntents {
    requested: Arc<AtomicBool>,
}

impl RefreshIntents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub fn take(&self) -> bool {
        self.requested.swap(false, Ordering::SeqCst)
    }
}
