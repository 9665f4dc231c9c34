//! Route handlers outside the WebSocket endpoints.

use axum::extract::{ConnectInfo, Form, Path, Query, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use tracing::warn;

use crate::auth::oauth::{self, Provider};
use crate::auth::{Role, TokenKind};
use crate::gateway::auth_gate::exchange_page;
use crate::gateway::{assets, AppState};

const ADMIN_SESSION_ID: &str = "admin";

pub async fn healthz() -> &'static str {
    "ok"
}

/// Runtime config the client reads before connecting.
fn config_json(state: &AppState) -> String {
    let auth = state.auth.lock();
    let mut providers = Vec::new();
    if auth.provider_config(Provider::Github).is_some() {
        providers.push("github");
    }
    if auth.provider_config(Provider::Google).is_some() {
        providers.push("google");
    }
    serde_json::json!({
        "auth_required": auth.auth_required,
        "oauth_providers": providers,
    })
    .to_string()
}

pub fn login_page(state: &AppState) -> Response {
    Html(assets::render_index(&config_json(state))).into_response()
}

pub async fn index(State(state): State<AppState>) -> Response {
    login_page(&state)
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

/// `POST /auth/login` accepts either a pasted token or the admin
/// password; both resolve to a signed token through the same exchange
/// path as the query-parameter redirect.
pub async fn login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Form(form): Form<LoginForm>,
) -> Response {
    let source = addr.ip().to_string();
    if state.limiter.is_blocked(&source) {
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }

    if let Some(token) = form.token.as_deref().filter(|token| !token.is_empty()) {
        let verified = state.auth.lock().verify(token);
        let Some(verified) = verified else {
            state.limiter.record_failure(&source);
            return error_redirect("invalid token");
        };
        state.limiter.record_success(&source);
        let signed = {
            let mut auth = state.auth.lock();
            match verified.kind {
                TokenKind::Signed => Some(token.to_string()),
                TokenKind::Permanent => verified
                    .session_id
                    .as_deref()
                    .and_then(|session_id| auth.mint(session_id)),
                TokenKind::ShareLink => auth
                    .ensure_link_session(token, verified.role)
                    .ok()
                    .and_then(|session_id| auth.mint(&session_id)),
            }
        };
        return match signed {
            Some(signed) => exchange_page(&signed),
            None => error_redirect("exchange failed"),
        };
    }

    if let Some(password) = form.password.as_deref().filter(|pw| !pw.is_empty()) {
        let ok = state.auth.lock().verify_admin_password(password);
        if !ok {
            state.limiter.record_failure(&source);
            return error_redirect("invalid password");
        }
        state.limiter.record_success(&source);
        let signed = {
            let mut auth = state.auth.lock();
            if auth.session(ADMIN_SESSION_ID).is_none() {
                if let Err(err) = auth.issue_permanent(ADMIN_SESSION_ID, "Admin", Role::Admin) {
                    warn!(error = %err, "failed to create admin session");
                    return error_redirect("exchange failed");
                }
            }
            auth.mint(ADMIN_SESSION_ID)
        };
        return match signed {
            Some(signed) => exchange_page(&signed),
            None => error_redirect("exchange failed"),
        };
    }

    error_redirect("missing credentials")
}

/// `GET /auth/<provider>`: redirect to the provider's authorize endpoint.
pub async fn oauth_authorize(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
) -> Response {
    let Some(provider) = Provider::from_path(&provider) else {
        return error_redirect("unknown provider");
    };
    let config = {
        let auth = state.auth.lock();
        auth.provider_config(provider).cloned()
    };
    let Some(config) = config else {
        return error_redirect(&format!("{} is not configured", provider.as_str()));
    };

    let redirect_uri = oauth::callback_url(&callback_base(&headers), provider);
    let url = oauth::authorize_url(provider, &config, &redirect_uri);
    Redirect::temporary(&url).into_response()
}

/// `GET /auth/<provider>/callback?code=…`: code exchange, session
/// fix-up, then the same signed-token page as every other login path.
pub async fn oauth_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let Some(provider) = Provider::from_path(&provider) else {
        return error_redirect("unknown provider");
    };
    if let Some(error) = params.get("error") {
        return error_redirect(error);
    }
    let Some(code) = params.get("code") else {
        return error_redirect("missing authorization code");
    };
    let config = {
        let auth = state.auth.lock();
        auth.provider_config(provider).cloned()
    };
    let Some(config) = config else {
        return error_redirect(&format!("{} is not configured", provider.as_str()));
    };

    let redirect_uri = oauth::callback_url(&callback_base(&headers), provider);
    let identity =
        match oauth::exchange_code(&state.http, provider, &config, code, &redirect_uri).await {
            Ok(identity) => identity,
            Err(err) => {
                warn!(provider = provider.as_str(), error = %err, "oauth exchange failed");
                return error_redirect(&err.to_string());
            }
        };

    let signed = {
        let mut auth = state.auth.lock();
        auth.find_or_create_oauth_session(
            identity.provider,
            &identity.external_id,
            &identity.display_name,
        )
        .ok()
        .and_then(|session_id| auth.mint(&session_id))
    };
    match signed {
        Some(signed) => exchange_page(&signed),
        None => error_redirect("session creation failed"),
    }
}

/// Fallback: embedded assets by path, 404 for everything else. Method
/// filtering happened in the gate.
pub async fn asset_or_404(request: Request) -> Response {
    let path = request.uri().path();
    match assets::lookup(path) {
        Some(asset) => (
            [(header::CONTENT_TYPE, assets::content_type_for(asset.path))],
            asset.body,
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn callback_base(headers: &HeaderMap) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost");
    let forwarded = headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok());
    oauth::callback_base(host, forwarded)
}

fn error_redirect(reason: &str) -> Response {
    let encoded: String = url::form_urlencoded::byte_serialize(reason.as_bytes()).collect();
    Redirect::to(&format!("/?error={encoded}")).into_response()
}
