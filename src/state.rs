//! Application state shared across handlers

use std::sync::Arc;

use crate::rate_limiter::RateLimiter;
use crate::repositories::UserStore;
use crate::session::SessionStore;

/// Application state shared across handlers.
///
/// Every component that needs session access gets the store through this
/// struct; nothing in the crate reaches for a global.
#[derive(Clone)]
pub struct AppState {
    pub user_store: Arc<dyn UserStore>,
    pub sessions: SessionStore,
    pub rate_limiter: RateLimiter,
}
