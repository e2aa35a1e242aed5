// src/server/routes.rs

//! The HTTP surface: login form, logout, and the authenticated pages that
//! borrow a pooled session for the duration of one request.
//!
//! Every protected handler resolves the session cookie through the pool and
//! holds the returned guard until the response is built; the guard's drop is
//! what releases the session, so release is guaranteed on every exit path.

use crate::core::TidemailError;
use crate::core::metrics;
use crate::imap::{ConnectionFactory, MailConnection};
use crate::pool::SessionPool;
use axum::Router;
use axum::extract::{Form, Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, warn};

const COOKIE_NAME: &str = "tidemail_session";

const LOGIN_PAGE: &str = "<!doctype html><title>Tidemail</title>\
<h1>Tidemail</h1>\
<form method=\"post\" action=\"/login\">\
<label>Username <input name=\"username\"></label>\
<label>Password <input name=\"password\" type=\"password\"></label>\
<button>Log in</button>\
</form>";

const LOGIN_FAILED_PAGE: &str = "<!doctype html><title>Tidemail</title>\
<p>Invalid username or password.</p><p><a href=\"/login\">Try again</a></p>";

const UPSTREAM_ERROR_PAGE: &str = "<!doctype html><title>Tidemail</title>\
<p>Cannot reach the mail server. Please try again later.</p>";

const INTERNAL_ERROR_PAGE: &str = "<!doctype html><title>Tidemail</title>\
<p>Something went wrong. Please log in again.</p>";

#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<SessionPool>,
    pub factory: Arc<dyn ConnectionFactory>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/login", get(login_form).post(login))
        .route("/logout", get(logout))
        .route("/mailbox/{name}", get(mailbox))
        .with_state(state)
}

#[derive(Deserialize)]
struct LoginForm {
    username: String,
    password: String,
}

async fn login_form() -> Html<&'static str> {
    Html(LOGIN_PAGE)
}

async fn login(State(state): State<AppState>, Form(form): Form<LoginForm>) -> Response {
    if form.username.is_empty() || form.password.is_empty() {
        return Html(LOGIN_PAGE).into_response();
    }

    match state.factory.connect(&form.username, &form.password).await {
        Ok(conn) => match state.pool.put(conn, &form.username, &form.password) {
            Ok(token) => {
                metrics::LOGINS_TOTAL.inc();
                (
                    [(header::SET_COOKIE, session_cookie(&token))],
                    Redirect::to("/"),
                )
                    .into_response()
            }
            Err(e) => {
                error!("failed to register session for {}: {e}", form.username);
                (StatusCode::INTERNAL_SERVER_ERROR, Html(INTERNAL_ERROR_PAGE)).into_response()
            }
        },
        Err(TidemailError::AuthFailed) => {
            metrics::AUTH_FAILURES_TOTAL.inc();
            (StatusCode::UNAUTHORIZED, Html(LOGIN_FAILED_PAGE)).into_response()
        }
        Err(e) => {
            error!("login connection to mail server failed: {e}");
            (StatusCode::BAD_GATEWAY, Html(UPSTREAM_ERROR_PAGE)).into_response()
        }
    }
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(token) = session_token(&headers) {
        state.pool.delete(&token).await;
    }
    (
        [(header::SET_COOKIE, clear_cookie())],
        Redirect::to("/login"),
    )
        .into_response()
}

async fn home(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(token) = session_token(&headers) else {
        return Redirect::to("/login").into_response();
    };

    let mut session = match state.pool.get(&token).await {
        Ok(s) => s,
        Err(e) => return force_relogin(e),
    };

    // Prove the connection is usable before claiming to be logged in.
    if let Err(e) = session.conn().noop().await {
        warn!("NOOP on pooled session failed: {e}");
        return (StatusCode::BAD_GATEWAY, Html(UPSTREAM_ERROR_PAGE)).into_response();
    }

    Html(format!(
        "<!doctype html><title>Tidemail</title>\
        <p>Logged in as {}.</p>\
        <p><a href=\"/mailbox/INBOX\">INBOX</a> | <a href=\"/logout\">Log out</a></p>",
        escape_html(session.username())
    ))
    .into_response()
}

async fn mailbox(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    let Some(token) = session_token(&headers) else {
        return Redirect::to("/login").into_response();
    };
    if name.contains(['\r', '\n', '"', '\\']) {
        return (StatusCode::BAD_REQUEST, Html(INTERNAL_ERROR_PAGE)).into_response();
    }

    let mut session = match state.pool.get(&token).await {
        Ok(s) => s,
        Err(e) => return force_relogin(e),
    };

    match session.conn().exec(&format!("EXAMINE \"{name}\"")).await {
        Ok(untagged) => {
            let exists = untagged
                .iter()
                .find_map(|line| {
                    let rest = line.strip_prefix("* ")?;
                    let (count, word) = rest.split_once(' ')?;
                    word.eq_ignore_ascii_case("EXISTS")
                        .then(|| count.to_string())
                })
                .unwrap_or_else(|| "?".to_string());

            Html(format!(
                "<!doctype html><title>Tidemail</title>\
                <p>Mailbox {} holds {} messages.</p>\
                <p><a href=\"/\">Back</a></p>",
                escape_html(&name),
                exists
            ))
            .into_response()
        }
        Err(e) => {
            error!("EXAMINE of mailbox {name} failed: {e}");
            (StatusCode::BAD_GATEWAY, Html(UPSTREAM_ERROR_PAGE)).into_response()
        }
    }
}

/// Clears the cookie and redirects to the login form. The user-visible
/// outcome is identical for an expired, broken, or timed-out session; the
/// distinction only matters in the logs.
fn force_relogin(e: TidemailError) -> Response {
    match e {
        TidemailError::SessionExpired => {}
        other => warn!("session unusable, forcing re-login: {other}"),
    }
    (
        [(header::SET_COOKIE, clear_cookie())],
        Redirect::to("/login"),
    )
        .into_response()
}

/// Extracts the session token from the request's cookies, if present.
fn session_token(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|part| {
        let (name, value) = part.trim().split_once('=')?;
        (name == COOKIE_NAME).then(|| value.to_string())
    })
}

fn session_cookie(token: &str) -> String {
    format!("{COOKIE_NAME}={token}; HttpOnly; Path=/; SameSite=Lax")
}

/// A cookie with an expiry far in the past, so the browser drops it.
fn clear_cookie() -> String {
    format!("{COOKIE_NAME}=; HttpOnly; Path=/; Expires=Thu, 01 Jan 1970 00:00:00 GMT")
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
