//! Custom error types for the web application

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::render::RenderError;

/// Errors that reach the HTTP response as a status code. Everything else in
/// the login flow travels through the one-shot session message channel and a
/// redirect instead.
#[derive(Error, Debug)]
pub enum AppError {
    /// The client sent a body we could not parse.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A view failed to render. Treated as server misconfiguration.
    #[error(transparent)]
    Render(#[from] RenderError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Render(_) => (StatusCode::BAD_REQUEST, "Bad request".to_string()),
        };

        (status, message).into_response()
    }
}

/// Type alias for handler results
pub type AppResult<T> = Result<T, AppError>;
