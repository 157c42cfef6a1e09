//! HTML rendering boundary.
//!
//! Views are compiled in rather than loaded from disk. Handlers call
//! [`render`] with a view name and a [`TemplateData`]; an unknown view is an
//! error the caller turns into a 400 and logs.

use std::collections::HashMap;

use thiserror::Error;

use crate::models::User;
use crate::session::Session;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("no such view: {0}")]
    UnknownView(String),
}

/// Everything a view can draw on.
///
/// The error and flash slots are one-shot: [`TemplateData::gather`] pops them
/// from the session, so a message renders exactly once.
#[derive(Debug, Default)]
pub struct TemplateData {
    pub ip: String,
    pub error: String,
    pub flash: String,
    pub user: Option<User>,
    pub data: HashMap<String, String>,
}

impl TemplateData {
    /// Collect the per-request fields every view receives.
    pub async fn gather(session: &Session, ip: String) -> Self {
        Self {
            ip,
            error: session.pop_string("error").await,
            flash: session.pop_string("flash").await,
            user: session.get("user").await,
            data: HashMap::new(),
        }
    }
}

/// Render a named view to an HTML string.
pub fn render(view: &str, td: &TemplateData) -> Result<String, RenderError> {
    let body = match view {
        "home" => home_view(td),
        "profile" => profile_view(td),
        other => return Err(RenderError::UnknownView(other.to_string())),
    };

    Ok(layout(view, td, &body))
}

fn layout(title: &str, td: &TemplateData, body: &str) -> String {
    let mut banners = String::new();
    if !td.error.is_empty() {
        banners.push_str(&format!(
            r#"<div class="alert alert-danger">{}</div>"#,
            escape(&td.error)
        ));
    }
    if !td.flash.is_empty() {
        banners.push_str(&format!(
            r#"<div class="alert alert-success">{}</div>"#,
            escape(&td.flash)
        ));
    }

    format!(
        r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{title}</title>
<link rel="stylesheet" href="/static/css/main.css">
</head>
<body>
<main>
{banners}
{body}
</main>
<footer><small>Your IP address: {ip}</small></footer>
</body>
</html>
"#,
        title = escape(title),
        ip = escape(&td.ip),
    )
}

fn home_view(td: &TemplateData) -> String {
    let test = td.data.get("test").map(String::as_str).unwrap_or("");

    format!(
        r#"<h1>Home</h1>
<small>From Session: {}</small>
<form method="post" action="/login">
<div>
<label for="email">Email</label>
<input type="email" id="email" name="email" autocomplete="email">
</div>
<div>
<label for="password">Password</label>
<input type="password" id="password" name="password" autocomplete="current-password">
</div>
<button type="submit">Log in</button>
</form>"#,
        escape(test)
    )
}

fn profile_view(td: &TemplateData) -> String {
    let greeting = match &td.user {
        Some(user) => format!(
            "Welcome back, {} {}!",
            escape(&user.first_name),
            escape(&user.last_name)
        ),
        None => "Welcome back!".to_string(),
    };

    format!(
        r#"<h1>Profile</h1>
<p>{greeting}</p>
<p><a href="/user/logout">Log out</a></p>"#
    )
}

fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
