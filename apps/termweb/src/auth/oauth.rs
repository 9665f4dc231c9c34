//! OAuth bridge for the login page.
//!
//! Exchanges a provider authorization code for a user identity, which the
//! store then maps to a session. Only the two providers the web client
//! offers are supported.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use reqwest::Client;
use serde::Deserialize;

use crate::auth::error::AuthError;
use crate::auth::store::ProviderConfig;

const GITHUB_AUTHORIZE: &str = "https://github.com/login/oauth/authorize";
const GITHUB_TOKEN: &str = "https://github.com/login/oauth/access_token";
const GITHUB_USER: &str = "https://api.github.com/user";
const GOOGLE_AUTHORIZE: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN: &str = "https://oauth2.googleapis.com/token";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Github,
    Google,
}

impl Provider {
    pub fn from_path(segment: &str) -> Option<Self> {
        match segment {
            "github" => Some(Provider::Github),
            "google" => Some(Provider::Google),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Github => "github",
            Provider::Google => "google",
        }
    }

    fn scope(self) -> &'static str {
        match self {
            Provider::Github => "user:email",
            Provider::Google => "openid email profile",
        }
    }
}

/// Identity extracted from a completed provider exchange.
#[derive(Debug, Clone)]
pub struct OAuthIdentity {
    pub provider: Provider,
    pub external_id: String,
    pub display_name: String,
}

/// Scheme+authority the provider redirects back to, derived from the
/// request `Host` header. `X-Forwarded-Proto` wins when a tunnel fronts
/// us; bare localhost defaults to http, everything else to https.
pub fn callback_base(host: &str, forwarded_proto: Option<&str>) -> String {
    let scheme = match forwarded_proto {
        Some(proto) if !proto.trim().is_empty() => proto.trim().to_string(),
        _ => {
            let bare = host.split(':').next().unwrap_or(host);
            if bare == "localhost" || bare == "127.0.0.1" || bare == "[::1]" {
                "http".to_string()
            } else {
                "https".to_string()
            }
        }
    };
    format!("{scheme}://{host}")
}

pub fn callback_url(base: &str, provider: Provider) -> String {
    format!("{base}/auth/{}/callback", provider.as_str())
}

pub fn authorize_url(provider: Provider, config: &ProviderConfig, redirect_uri: &str) -> String {
    let endpoint = match provider {
        Provider::Github => GITHUB_AUTHORIZE,
        Provider::Google => GOOGLE_AUTHORIZE,
    };
    let mut url = url::Url::parse(endpoint).expect("static endpoint parses");
    url.query_pairs_mut()
        .append_pair("client_id", &config.client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("scope", provider.scope());
    if provider == Provider::Google {
        url.query_pairs_mut().append_pair("response_type", "code");
    }
    url.into()
}

#[derive(Debug, Deserialize)]
struct GithubTokenResponse {
    access_token: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubUser {
    id: u64,
    login: String,
}

#[derive(Debug, Deserialize)]
struct GoogleTokenResponse {
    id_token: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleIdClaims {
    sub: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

/// Runs the code-for-identity exchange against the provider.
pub async fn exchange_code(
    client: &Client,
    provider: Provider,
    config: &ProviderConfig,
    code: &str,
    redirect_uri: &str,
) -> Result<OAuthIdentity, AuthError> {
    match provider {
        Provider::Github => exchange_github(client, config, code, redirect_uri).await,
        Provider::Google => exchange_google(client, config, code, redirect_uri).await,
    }
}

async fn exchange_github(
    client: &Client,
    config: &ProviderConfig,
    code: &str,
    redirect_uri: &str,
) -> Result<OAuthIdentity, AuthError> {
    let response: GithubTokenResponse = client
        .post(GITHUB_TOKEN)
        .header(reqwest::header::ACCEPT, "application/json")
        .form(&[
            ("client_id", config.client_id.as_str()),
            ("client_secret", config.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ])
        .send()
        .await?
        .json()
        .await?;
    let access_token = response.access_token.ok_or_else(|| {
        AuthError::Exchange(
            response
                .error_description
                .unwrap_or_else(|| "github returned no access token".into()),
        )
    })?;

    let user: GithubUser = client
        .get(GITHUB_USER)
        .bearer_auth(&access_token)
        .header(reqwest::header::USER_AGENT, "termweb")
        .send()
        .await?
        .json()
        .await
        .map_err(|err| AuthError::Exchange(format!("github user lookup: {err}")))?;

    Ok(OAuthIdentity {
        provider: Provider::Github,
        external_id: user.id.to_string(),
        display_name: user.login,
    })
}

async fn exchange_google(
    client: &Client,
    config: &ProviderConfig,
    code: &str,
    redirect_uri: &str,
) -> Result<OAuthIdentity, AuthError> {
    let response: GoogleTokenResponse = client
        .post(GOOGLE_TOKEN)
        .form(&[
            ("client_id", config.client_id.as_str()),
            ("client_secret", config.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("grant_type", "authorization_code"),
        ])
        .send()
        .await?
        .json()
        .await?;
    let id_token = response.id_token.ok_or_else(|| {
        AuthError::Exchange(
            response
                .error_description
                .unwrap_or_else(|| "google returned no id_token".into()),
        )
    })?;

    let claims = decode_id_token(&id_token)?;
    let display_name = claims
        .name
        .or(claims.email)
        .unwrap_or_else(|| claims.sub.clone());
    Ok(OAuthIdentity {
        provider: Provider::Google,
        external_id: claims.sub,
        display_name,
    })
}

/// The id_token is a JWS; we only need its claims, which live in the
/// base64url middle segment. Signature verification is the provider's
/// TLS channel plus the code exchange itself.
fn decode_id_token(id_token: &str) -> Result<GoogleIdClaims, AuthError> {
    let mut segments = id_token.split('.');
    let payload = segments
        .nth(1)
        .ok_or_else(|| AuthError::Exchange("id_token is not a jwt".into()))?;
    let raw = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|err| AuthError::Exchange(format!("id_token payload: {err}")))?;
    serde_json::from_slice(&raw).map_err(|err| AuthError::Exchange(format!("id_token claims: {err}")))
}
