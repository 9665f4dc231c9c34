//! Per-request authentication gate.
//!
//! Runs before dispatch for every path outside the public set: consults
//! the rate limiter, classifies the `token` query parameter, and, for
//! long-lived tokens on plain HTTP requests, answers with a tiny page
//! that swaps the URL for a short-lived signed token so the permanent
//! credential never lingers in browser history.

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{Html, IntoResponse, Response};
use std::net::SocketAddr;
use tracing::debug;

use crate::auth::{Role, TokenKind, Verified};
use crate::gateway::{handlers, AppState};

/// Paths reachable without a token.
const PUBLIC_PATHS: [&str; 3] = ["/manifest.json", "/favicon.ico", "/healthz"];

/// Verified identity attached to the request for downstream handlers.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub role: Role,
    pub session_id: Option<String>,
}

pub async fn auth_gate(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request,
    next: Next,
) -> Response {
    if request.method() != Method::GET && request.method() != Method::POST {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let path = request.uri().path().to_string();
    if is_public(&path) {
        return next.run(request).await;
    }

    let source = addr.ip().to_string();
    if state.limiter.is_blocked(&source) {
        debug!(source, "throttled request");
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }
    state.limiter.cleanup();

    let token = query_param(request.uri().query().unwrap_or(""), "token");
    let Some(token) = token else {
        if request.method() == Method::GET && (path == "/" || path == "/index.html") {
            return handlers::login_page(&state);
        }
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let verified = state.auth.lock().verify(&token);
    let Some(verified) = verified else {
        state.limiter.record_failure(&source);
        return StatusCode::UNAUTHORIZED.into_response();
    };
    state.limiter.record_success(&source);

    // Long-lived tokens on plain requests are exchanged immediately; the
    // WebSocket endpoints accept them directly since an upgrade never
    // lands in history.
    if verified.kind != TokenKind::Signed && !is_websocket_upgrade(&request) {
        return match exchange(&state, &verified, &token) {
            Some(signed) => exchange_page(&signed),
            None => StatusCode::UNAUTHORIZED.into_response(),
        };
    }

    request.extensions_mut().insert(AuthContext {
        role: verified.role,
        session_id: verified.session_id,
    });
    next.run(request).await
}

fn is_public(path: &str) -> bool {
    PUBLIC_PATHS.contains(&path) || path.starts_with("/auth/")
}

fn is_websocket_upgrade(request: &Request) -> bool {
    request
        .headers()
        .get(header::UPGRADE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

/// Percent-decoded lookup of one query parameter.
pub fn query_param(query: &str, name: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

fn exchange(state: &AppState, verified: &Verified, presented: &str) -> Option<String> {
    let mut auth = state.auth.lock();
    match verified.kind {
        TokenKind::Permanent => auth.mint(verified.session_id.as_deref()?),
        TokenKind::ShareLink => {
            let session_id = auth.ensure_link_session(presented, verified.role).ok()?;
            auth.mint(&session_id)
        }
        TokenKind::Signed => None,
    }
}

/// 200 response whose body rewrites the location with the signed token.
pub fn exchange_page(signed: &str) -> Response {
    let body = format!(
        "<!doctype html><html><head><meta charset=\"utf-8\"></head><body>\
         <script>location.replace(location.pathname + '?token=' + \"{signed}\");</script>\
         </body></html>"
    );
    Html(body).into_response()
}
