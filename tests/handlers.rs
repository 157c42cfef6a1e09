//! End-to-end handler tests driving the composed router.
//!
//! Requests go through the full middleware pipeline. Session state is
//! presented with the `X-Session` header and inspected by loading the token
//! from the shared store, the same way a second request would.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode, header},
    response::Response,
};
use axum_extra::extract::cookie::Cookie;
use chrono::Utc;
use tower::ServiceExt;
use uuid::Uuid;

use webapp::models::User;
use webapp::rate_limiter::{RateLimiter, RateLimiterConfig};
use webapp::repositories::{UserStore, hash_password};
use webapp::routes::create_router;
use webapp::session::{SessionConfig, SessionStore};
use webapp::state::AppState;

/// In-memory stand-in for the Postgres user store. Knows exactly one user.
struct StubUserStore {
    admin: User,
}

impl StubUserStore {
    fn new() -> Self {
        Self { admin: admin_user() }
    }
}

#[async_trait]
impl UserStore for StubUserStore {
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        if email == self.admin.email {
            Ok(Some(self.admin.clone()))
        } else {
            Ok(None)
        }
    }
}

fn admin_user() -> User {
    User {
        id: Uuid::new_v4(),
        first_name: "Admin".to_string(),
        last_name: "User".to_string(),
        email: "admin@example.com".to_string(),
        password_hash: hash_password("secret").expect("hashing test password"),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn test_app() -> (Router, SessionStore) {
    let sessions = SessionStore::new(SessionConfig::default());
    let state = AppState {
        user_store: Arc::new(StubUserStore::new()),
        sessions: sessions.clone(),
        rate_limiter: RateLimiter::new(RateLimiterConfig::default()),
    };

    (create_router(state), sessions)
}

/// Token handed out by the response, from its Set-Cookie header.
fn session_token(response: &Response) -> Option<String> {
    let raw = response.headers().get(header::SET_COOKIE)?.to_str().ok()?;
    let cookie = Cookie::parse(raw.to_owned()).ok()?;
    (cookie.name() == "session").then(|| cookie.value().to_string())
}

fn location(response: &Response) -> &str {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

fn login_request(body: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/login")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(token) = token {
        builder = builder.header("X-Session", token);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn body_string(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn home_page_renders() {
    let (app, _) = test_app();

    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("<small>From Session:"));
}

#[tokio::test]
async fn home_page_shows_the_stored_session_message_on_a_second_visit() {
    let (app, _) = test_app();

    let first = app
        .clone()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let token = session_token(&first).expect("first visit should set a cookie");

    let second = app
        .oneshot(
            Request::builder()
                .uri("/")
                .header("X-Session", &token)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(second.status(), StatusCode::OK);
    let body = body_string(second).await;
    assert!(body.contains("<small>From Session: Hit this page at"));
}

#[tokio::test]
async fn unknown_routes_are_not_found() {
    let (app, _) = test_app();

    let response = app
        .oneshot(Request::builder().uri("/fish").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn profile_without_a_login_redirects_with_a_307() {
    let (app, sessions) = test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/user/profile")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(location(&response), "/");

    let token = session_token(&response).expect("the gate should persist its message");
    let session = sessions.load(Some(&token)).await;
    assert_eq!(session.pop_string("error").await, "Log in first!");
}

#[tokio::test]
async fn profile_renders_for_a_logged_in_user() {
    let (app, sessions) = test_app();

    let session = sessions.load(None).await;
    session.put("user", admin_user()).await.unwrap();
    let token = session.token().await;
    sessions.save(&session).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/user/profile")
                .header("X-Session", &token)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("Welcome back, Admin User!"));
}

#[tokio::test]
async fn login_with_valid_credentials_renews_the_session() {
    let (app, sessions) = test_app();

    // give the anonymous session a value that must survive renewal
    let session = sessions.load(None).await;
    session.put_string("test", "carried over").await;
    let before = session.token().await;
    sessions.save(&session).await;

    let response = app
        .oneshot(login_request(
            "email=admin%40example.com&password=secret",
            Some(&before),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/user/profile");

    let after = session_token(&response).expect("login should set a cookie");
    assert_ne!(before, after, "the token must change on login");

    let renewed = sessions.load(Some(&after)).await;
    assert!(renewed.exists("user").await);
    assert_eq!(renewed.pop_string("flash").await, "Successfully logged in!");
    assert_eq!(renewed.get_string("test").await, "carried over");

    // the pre-login token went out of circulation
    let stale = sessions.load(Some(&before)).await;
    assert!(!stale.exists("user").await);
    assert_ne!(stale.token().await, before);
}

#[tokio::test]
async fn login_with_missing_fields_is_rejected_as_invalid_credentials() {
    let (app, sessions) = test_app();

    let response = app
        .oneshot(login_request("email=&password=", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/");

    let token = session_token(&response).unwrap();
    let session = sessions.load(Some(&token)).await;
    assert_eq!(
        session.pop_string("error").await,
        "Invalid login credentials"
    );
}

#[tokio::test]
async fn login_failures_are_uniform_for_unknown_email_and_wrong_password() {
    let (app, sessions) = test_app();

    let unknown = app
        .clone()
        .oneshot(login_request("email=you%40there.com&password=password", None))
        .await
        .unwrap();

    let wrong = app
        .oneshot(login_request(
            "email=admin%40example.com&password=password",
            None,
        ))
        .await
        .unwrap();

    // same status, same target, same message: nothing distinguishes the cases
    for response in [&unknown, &wrong] {
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(response), "/");
    }

    for response in [unknown, wrong] {
        let token = session_token(&response).unwrap();
        let session = sessions.load(Some(&token)).await;
        assert_eq!(session.pop_string("error").await, "Invalid login!");
    }
}

#[tokio::test]
async fn a_failed_login_does_not_authenticate_the_session() {
    let (app, sessions) = test_app();

    let response = app
        .oneshot(login_request(
            "email=admin%40example.com&password=password",
            None,
        ))
        .await
        .unwrap();

    let token = session_token(&response).unwrap();
    let session = sessions.load(Some(&token)).await;
    assert!(!session.exists("user").await);
}

#[tokio::test]
async fn a_malformed_body_is_a_bad_request() {
    let (app, _) = test_app();

    let response = app
        .oneshot(login_request("email=%zz", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn a_missing_form_content_type_is_a_bad_request() {
    let (app, _) = test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/login")
                .body(Body::from("email=a&password=b"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn repeated_login_failures_are_throttled() {
    let (app, sessions) = test_app();

    // the default window allows five attempts for one client IP
    for _ in 0..5 {
        let response = app
            .clone()
            .oneshot(login_request(
                "email=admin%40example.com&password=password",
                None,
            ))
            .await
            .unwrap();
        let token = session_token(&response).unwrap();
        let session = sessions.load(Some(&token)).await;
        assert_eq!(session.pop_string("error").await, "Invalid login!");
    }

    let throttled = app
        .oneshot(login_request(
            "email=admin%40example.com&password=secret",
            None,
        ))
        .await
        .unwrap();

    assert_eq!(throttled.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&throttled), "/");

    let token = session_token(&throttled).unwrap();
    let session = sessions.load(Some(&token)).await;
    assert_eq!(
        session.pop_string("error").await,
        "Too many login attempts, try again later"
    );
}

#[tokio::test]
async fn the_forwarded_header_wins_over_the_peer_address() {
    let (app, _) = test_app();
    let peer: SocketAddr = "10.0.0.1:54321".parse().unwrap();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/")
                .header("X-Forwarded-For", "203.0.113.5")
                .extension(ConnectInfo(peer))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_string(response).await;
    assert!(body.contains("Your IP address: 203.0.113.5"));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/")
                .extension(ConnectInfo(peer))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_string(response).await;
    assert!(body.contains("Your IP address: 10.0.0.1"));
}

#[tokio::test]
async fn requests_without_a_peer_address_fall_back_to_unknown() {
    let (app, _) = test_app();

    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let body = body_string(response).await;
    assert!(body.contains("Your IP address: unknown"));
}

#[tokio::test]
async fn logout_drops_the_session() {
    let (app, sessions) = test_app();

    let login = app
        .clone()
        .oneshot(login_request(
            "email=admin%40example.com&password=secret",
            None,
        ))
        .await
        .unwrap();
    let logged_in = session_token(&login).expect("login should set a cookie");

    let logout = app
        .oneshot(
            Request::builder()
                .uri("/user/logout")
                .header("X-Session", &logged_in)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(logout.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&logout), "/");

    // the authenticated token is gone; the replacement is anonymous
    let stale = sessions.load(Some(&logged_in)).await;
    assert!(!stale.exists("user").await);

    let replacement = session_token(&logout).unwrap();
    let session = sessions.load(Some(&replacement)).await;
    assert!(!session.exists("user").await);
}

#[tokio::test]
async fn health_check_reports_ok() {
    let (app, _) = test_app();

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("\"status\":\"ok\""));
}

#[tokio::test]
async fn static_assets_are_served() {
    let (app, _) = test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/static/css/main.css")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}
