//! Cookie-backed server-side sessions.
//!
//! The store is the single source of truth across requests: the client only
//! ever holds an opaque token, presented through the session cookie (or the
//! `X-Session` header in integration harnesses). [`load_and_save`] attaches a
//! request-scoped [`Session`] handle before any handler runs and commits the
//! changes back to the store on the response path, emitting the cookie when
//! the token or the value bag changed.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderValue, header::SET_COOKIE},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Duration, Utc};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::error;
use uuid::Uuid;

use crate::state::AppState;

/// Header integration harnesses may use to present a token without a cookie.
const SESSION_HEADER: &str = "X-Session";

/// Session cookie settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Name of the session cookie.
    pub cookie_name: String,
    /// Session lifetime in seconds, refreshed on every committed write.
    pub lifetime_seconds: i64,
    /// Only send the cookie over TLS.
    pub secure: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "session".to_string(),
            lifetime_seconds: 24 * 60 * 60,
            secure: true,
        }
    }
}

#[derive(Debug, Clone)]
struct StoredSession {
    values: HashMap<String, Value>,
    expires_at: DateTime<Utc>,
}

/// Process-wide session store. Cheap to clone; all clones share one map.
///
/// Tokens are independent: a request holding one token never observes another
/// token's values. Loads and saves for the same token serialize on the map
/// lock, and the last save wins.
#[derive(Clone)]
pub struct SessionStore {
    config: Arc<SessionConfig>,
    sessions: Arc<Mutex<HashMap<String, StoredSession>>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Status {
    Unchanged,
    Modified,
    Destroyed,
}

#[derive(Debug)]
struct SessionState {
    /// Token the client will be handed after this request.
    token: String,
    /// Token the store currently holds a record under, if any.
    stored_token: Option<String>,
    values: HashMap<String, Value>,
    status: Status,
}

/// Request-scoped handle onto one session's value bag.
///
/// Exactly one request context holds a given handle; mutations stay local
/// until the store commits them after the handler finishes.
#[derive(Clone)]
pub struct Session {
    state: Arc<Mutex<SessionState>>,
}

impl Session {
    fn new(token: String, stored_token: Option<String>, values: HashMap<String, Value>) -> Self {
        Self {
            state: Arc::new(Mutex::new(SessionState {
                token,
                stored_token,
                values,
                status: Status::Unchanged,
            })),
        }
    }

    /// The token the client is (or will be) associated with.
    pub async fn token(&self) -> String {
        self.state.lock().await.token.clone()
    }

    /// Whether a value is present under `key`.
    pub async fn exists(&self, key: &str) -> bool {
        self.state.lock().await.values.contains_key(key)
    }

    /// Deserialize the value under `key`, if present and well-formed.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let state = self.state.lock().await;
        let value = state.values.get(key)?.clone();
        serde_json::from_value(value).ok()
    }

    /// String value under `key`, or the empty string.
    pub async fn get_string(&self, key: &str) -> String {
        let state = self.state.lock().await;
        match state.values.get(key) {
            Some(Value::String(s)) => s.clone(),
            _ => String::new(),
        }
    }

    /// Store a serializable value under `key`, replacing any previous value.
    pub async fn put<T: Serialize>(&self, key: &str, value: T) -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(value)?;
        let mut state = self.state.lock().await;
        state.values.insert(key.to_string(), value);
        state.status = Status::Modified;
        Ok(())
    }

    /// Store a string value under `key`. A new write replaces, never appends.
    pub async fn put_string(&self, key: &str, value: &str) {
        let mut state = self.state.lock().await;
        state
            .values
            .insert(key.to_string(), Value::String(value.to_string()));
        state.status = Status::Modified;
    }

    /// Read and remove the string under `key`. Returns the empty string when
    /// nothing is there, so popping twice yields the message exactly once.
    pub async fn pop_string(&self, key: &str) -> String {
        let mut state = self.state.lock().await;
        match state.values.remove(key) {
            Some(Value::String(s)) => {
                state.status = Status::Modified;
                s
            }
            Some(_) => {
                state.status = Status::Modified;
                String::new()
            }
            None => String::new(),
        }
    }

    /// Drop the whole session. The store record is removed and the client
    /// gets a removal cookie on commit.
    pub async fn destroy(&self) {
        let mut state = self.state.lock().await;
        state.values.clear();
        state.status = Status::Destroyed;
    }

    /// Issue a fresh token for this session, keeping the value bag.
    ///
    /// Run on every privilege change: a token obtained before login cannot be
    /// replayed afterwards, because the commit retires the old token in the
    /// same step that stores the new one.
    pub async fn renew_token(&self) {
        let mut state = self.state.lock().await;
        state.token = new_token();
        state.status = Status::Modified;
    }
}

impl SessionStore {
    /// Create a new session store
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config: Arc::new(config),
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Load the session a presented token refers to, or start a fresh one.
    ///
    /// A missing, unknown or expired token yields a fresh empty session under
    /// a new token; expired records are dropped on the spot.
    pub async fn load(&self, token: Option<&str>) -> Session {
        if let Some(t) = token.map(str::trim).filter(|t| !t.is_empty()) {
            let mut sessions = self.sessions.lock().await;
            match sessions.get(t) {
                Some(record) if record.expires_at > Utc::now() => {
                    return Session::new(t.to_string(), Some(t.to_string()), record.values.clone());
                }
                Some(_) => {
                    sessions.remove(t);
                }
                None => {}
            }
        }

        Session::new(new_token(), None, HashMap::new())
    }

    /// Commit a handle back to the store.
    ///
    /// Returns the cookie to set when the session changed during the request;
    /// an untouched session produces no store write and no cookie.
    pub async fn save(&self, session: &Session) -> Option<Cookie<'static>> {
        let mut state = session.state.lock().await;
        match state.status {
            Status::Unchanged => None,
            Status::Destroyed => {
                let mut sessions = self.sessions.lock().await;
                if let Some(old) = state.stored_token.take() {
                    sessions.remove(&old);
                }
                state.status = Status::Unchanged;
                Some(self.removal_cookie())
            }
            Status::Modified => {
                let record = StoredSession {
                    values: state.values.clone(),
                    expires_at: Utc::now() + Duration::seconds(self.config.lifetime_seconds),
                };

                let mut sessions = self.sessions.lock().await;
                // The retired token and its replacement must never resolve at
                // the same time, so the swap happens under one lock.
                if let Some(old) = &state.stored_token {
                    if *old != state.token {
                        sessions.remove(old);
                    }
                }
                sessions.insert(state.token.clone(), record);

                state.stored_token = Some(state.token.clone());
                state.status = Status::Unchanged;
                Some(self.session_cookie(&state.token))
            }
        }
    }

    /// Token presented by the request, cookie first, then the test header.
    pub fn presented_token(&self, req: &Request<Body>) -> Option<String> {
        let jar = CookieJar::from_headers(req.headers());
        if let Some(cookie) = jar.get(&self.config.cookie_name) {
            return Some(cookie.value().to_string());
        }

        req.headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
    }

    fn session_cookie(&self, token: &str) -> Cookie<'static> {
        Cookie::build((self.config.cookie_name.clone(), token.to_string()))
            .http_only(true)
            .secure(self.config.secure)
            .same_site(SameSite::Lax)
            .path("/")
            .max_age(time::Duration::seconds(self.config.lifetime_seconds))
            .build()
    }

    fn removal_cookie(&self) -> Cookie<'static> {
        Cookie::build((self.config.cookie_name.clone(), ""))
            .path("/")
            .max_age(time::Duration::ZERO)
            .build()
    }
}

fn new_token() -> String {
    Uuid::new_v4().to_string()
}

/// Session load/save middleware.
///
/// Must run after the IP stage and before any handler; the commit on the way
/// out is what persists messages written during handling.
pub async fn load_and_save(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let token = state.sessions.presented_token(&req);
    let session = state.sessions.load(token.as_deref()).await;
    req.extensions_mut().insert(session.clone());

    let mut response = next.run(req).await;

    if let Some(cookie) = state.sessions.save(&session).await {
        match HeaderValue::from_str(&cookie.to_string()) {
            Ok(value) => {
                response.headers_mut().append(SET_COOKIE, value);
            }
            Err(e) => error!("failed to encode session cookie: {}", e),
        }
    }

    response
}
