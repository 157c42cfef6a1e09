//! HTTP surface: router composition and page handlers

use axum::{
    Extension, Form, Json, Router,
    extract::State,
    extract::rejection::FormRejection,
    middleware::{from_fn, from_fn_with_state},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde::Deserialize;
use tower::ServiceBuilder;
use tower_http::{catch_panic::CatchPanicLayer, services::ServeDir, trace::TraceLayer};
use tracing::{error, info};

use crate::error::{AppError, AppResult};
use crate::middleware::{ClientIp, add_client_ip, require_login};
use crate::render::{TemplateData, render};
use crate::session::{Session, load_and_save};
use crate::state::AppState;
use crate::validation::validate_required;

/// Form body for `POST /login`.
#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// Compose the middleware pipeline and mount the routes.
///
/// Stage order is a contract: panic recovery, request tracing, IP attachment
/// and session load all run before any handler, and the session commit
/// happens on the way back out. The authentication gate wraps only the /user
/// subtree.
pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/profile", get(profile))
        .route("/logout", get(logout))
        .route_layer(from_fn(require_login));

    Router::new()
        .route("/", get(home))
        .route("/login", post(login))
        .route("/health", get(health_check))
        .nest("/user", protected)
        .nest_service("/static", ServeDir::new("static"))
        .layer(
            ServiceBuilder::new()
                .layer(CatchPanicLayer::new())
                .layer(TraceLayer::new_for_http())
                .layer(from_fn(add_client_ip))
                .layer(from_fn_with_state(state.clone(), load_and_save)),
        )
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "webapp"
    }))
}

/// Public home page with the login form.
pub async fn home(
    Extension(session): Extension<Session>,
    Extension(ClientIp(ip)): Extension<ClientIp>,
) -> AppResult<Html<String>> {
    let mut td = TemplateData::gather(&session, ip).await;

    // remember when this visitor first hit the page, and show it afterwards
    if session.exists("test").await {
        td.data
            .insert("test".to_string(), session.get_string("test").await);
    } else {
        session
            .put_string("test", &format!("Hit this page at {}", Utc::now()))
            .await;
    }

    render_page("home", &td)
}

/// Profile page, reachable only through the authentication gate.
pub async fn profile(
    Extension(session): Extension<Session>,
    Extension(ClientIp(ip)): Extension<ClientIp>,
) -> AppResult<Html<String>> {
    let td = TemplateData::gather(&session, ip).await;
    render_page("profile", &td)
}

/// Form login.
///
/// Apart from an unparseable body, every failure takes the same exit: a
/// one-shot session message and a 303 back to the entry point, so the
/// response alone never tells a caller whether the email, the password or the
/// form itself was wrong.
pub async fn login(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Extension(ClientIp(ip)): Extension<ClientIp>,
    form: Result<Form<LoginForm>, FormRejection>,
) -> Response {
    let Form(form) = match form {
        Ok(form) => form,
        Err(e) => {
            error!("unable to parse login form: {}", e);
            return AppError::BadRequest("bad request".to_string()).into_response();
        }
    };

    if let Err(e) = validate_required(&[("email", &form.email), ("password", &form.password)]) {
        info!("login rejected: {}", e);
        session.put_string("error", "Invalid login credentials").await;
        return Redirect::to("/").into_response();
    }

    if !state.rate_limiter.allow(&ip).await {
        session
            .put_string("error", "Too many login attempts, try again later")
            .await;
        return Redirect::to("/").into_response();
    }

    if !authenticate(&state, &session, &form.email, &form.password).await {
        session.put_string("error", "Invalid login!").await;
        return Redirect::to("/").into_response();
    }

    // hand out a fresh token on the privilege change; the value bag carries
    // over but a token captured before login stops working
    session.renew_token().await;
    session.put_string("flash", "Successfully logged in!").await;
    Redirect::to("/user/profile").into_response()
}

/// Drop the session and hand the client a fresh anonymous token.
pub async fn logout(Extension(session): Extension<Session>) -> Redirect {
    session.destroy().await;
    session.renew_token().await;
    Redirect::to("/")
}

/// Verify credentials and, on success, stash the user snapshot in the
/// session.
///
/// Unknown email, store failure and wrong password all collapse into `false`.
/// The distinction exists only in the logs.
async fn authenticate(state: &AppState, session: &Session, email: &str, password: &str) -> bool {
    let user = match state.user_store.get_user_by_email(email).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            info!("login failed: unknown email");
            return false;
        }
        Err(e) => {
            error!("user lookup failed: {}", e);
            return false;
        }
    };

    match user.password_matches(password) {
        Ok(true) => {}
        Ok(false) => {
            info!("login failed: password mismatch for user {}", user.id);
            return false;
        }
        Err(e) => {
            error!("password verification failed: {}", e);
            return false;
        }
    }

    if let Err(e) = session.put("user", &user).await {
        error!("failed to stash user in session: {}", e);
        return false;
    }

    true
}

fn render_page(view: &str, td: &TemplateData) -> AppResult<Html<String>> {
    match render(view, td) {
        Ok(html) => Ok(Html(html)),
        Err(e) => {
            error!("failed to render {}: {}", view, e);
            Err(e.into())
        }
    }
}
