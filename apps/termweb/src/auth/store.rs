//! Process-wide identity store.
//!
//! Sessions, share links, the optional admin password, passkey
//! credentials, and OAuth provider settings live in one structure guarded
//! by a single mutex at the call sites. Every mutation is persisted to
//! `<home>/.termweb/auth.json` (mode 0600) before returning; a failed
//! write surfaces to the caller while the in-memory state stays
//! consistent.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::auth::error::AuthError;
use crate::auth::oauth::Provider;
use crate::auth::rate_limit::unix_now;
use crate::auth::{token, PermanentToken, Role, TokenKind, Verified};

pub const AUTH_FILE: &str = "auth.json";

/// Fields that only ever appeared in the incompatible pre-rewrite layout.
const LEGACY_FIELDS: [&str; 2] = ["\"editor_token\"", "\"viewer_token\""];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub name: String,
    pub created_at: u64,
    pub token: PermanentToken,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareLink {
    pub token: PermanentToken,
    pub role: Role,
    pub created_at: u64,
    #[serde(default)]
    pub use_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_uses: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl ShareLink {
    pub fn is_valid(&self, now: u64) -> bool {
        if let Some(expires_at) = self.expires_at {
            if now > expires_at {
                return false;
            }
        }
        if let Some(max_uses) = self.max_uses {
            if self.use_count >= max_uses {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasskeyCredential {
    pub id: String,
    pub public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub created_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github: Option<ProviderConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google: Option<ProviderConfig>,
    pub default_role: Role,
}

impl Default for OAuthSettings {
    fn default() -> Self {
        Self {
            github: None,
            google: None,
            default_role: Role::Viewer,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    auth_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    admin_password_hash: Option<String>,
    #[serde(default)]
    sessions: Vec<Session>,
    #[serde(default)]
    share_links: Vec<ShareLink>,
    #[serde(default)]
    oauth: OAuthSettings,
    #[serde(default)]
    passkey_credentials: Vec<PasskeyCredential>,
}

#[derive(Debug)]
pub struct AuthStore {
    path: PathBuf,
    pub auth_required: bool,
    admin_password: Option<AdminPassword>,
    sessions: HashMap<String, Session>,
    share_links: Vec<ShareLink>,
    pub oauth: OAuthSettings,
    passkeys: Vec<PasskeyCredential>,
}

/// salt || SHA-256(salt || password), both 32 bytes.
#[derive(Debug, Clone)]
struct AdminPassword {
    salt: [u8; 32],
    hash: [u8; 32],
}

impl AdminPassword {
    fn derive(password: &str) -> Self {
        let mut salt = [0u8; 32];
        OsRng.fill_bytes(&mut salt);
        Self {
            hash: Self::digest(&salt, password),
            salt,
        }
    }

    fn digest(salt: &[u8; 32], password: &str) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(salt);
        hasher.update(password.as_bytes());
        hasher.finalize().into()
    }

    fn matches(&self, password: &str) -> bool {
        Self::digest(&self.salt, password).ct_eq(&self.hash).into()
    }

    fn to_hex(&self) -> String {
        let mut combined = [0u8; 64];
        combined[..32].copy_from_slice(&self.salt);
        combined[32..].copy_from_slice(&self.hash);
        hex::encode(combined)
    }

    fn from_hex(text: &str) -> Option<Self> {
        let raw = hex::decode(text).ok()?;
        if raw.len() != 64 {
            return None;
        }
        let mut salt = [0u8; 32];
        let mut hash = [0u8; 32];
        salt.copy_from_slice(&raw[..32]);
        hash.copy_from_slice(&raw[32..]);
        Some(Self { salt, hash })
    }
}

impl AuthStore {
    /// Loads the store from `dir/auth.json`, creating a fresh one when the
    /// file is absent or carries the incompatible legacy layout.
    pub fn load(dir: &Path) -> Result<Self, AuthError> {
        let path = dir.join(AUTH_FILE);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::fresh(path));
            }
            Err(err) => return Err(err.into()),
        };

        if LEGACY_FIELDS.iter().any(|field| raw.contains(field)) {
            warn!(path = %path.display(), "discarding incompatible legacy auth store");
            return Ok(Self::fresh(path));
        }

        let doc: StoreDocument =
            serde_json::from_str(&raw).map_err(|err| AuthError::Malformed(err.to_string()))?;
        let admin_password = match doc.admin_password_hash.as_deref() {
            Some(text) => Some(
                AdminPassword::from_hex(text)
                    .ok_or_else(|| AuthError::Malformed("bad admin password record".into()))?,
            ),
            None => None,
        };

        Ok(Self {
            path,
            auth_required: doc.auth_required,
            admin_password,
            sessions: doc
                .sessions
                .into_iter()
                .map(|session| (session.id.clone(), session))
                .collect(),
            share_links: doc.share_links,
            oauth: doc.oauth,
            passkeys: doc.passkey_credentials,
        })
    }

    fn fresh(path: PathBuf) -> Self {
        Self {
            path,
            auth_required: false,
            admin_password: None,
            sessions: HashMap::new(),
            share_links: Vec::new(),
            oauth: OAuthSettings::default(),
            passkeys: Vec::new(),
        }
    }

    pub fn save(&self) -> Result<(), AuthError> {
        let doc = StoreDocument {
            auth_required: self.auth_required,
            admin_password_hash: self.admin_password.as_ref().map(AdminPassword::to_hex),
            sessions: {
                let mut sessions: Vec<Session> = self.sessions.values().cloned().collect();
                sessions.sort_by(|a, b| a.id.cmp(&b.id));
                sessions
            },
            share_links: self.share_links.clone(),
            oauth: self.oauth.clone(),
            passkey_credentials: self.passkeys.clone(),
        };
        let body = serde_json::to_string_pretty(&doc)
            .map_err(|err| AuthError::Malformed(err.to_string()))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&self.path)?;
        file.write_all(body.as_bytes())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = file.metadata()?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(&self.path, perms)?;
        }
        Ok(())
    }

    // ---- sessions -------------------------------------------------------

    pub fn issue_permanent(
        &mut self,
        id: &str,
        name: &str,
        role: Role,
    ) -> Result<&Session, AuthError> {
        let session = Session {
            id: id.to_string(),
            name: name.to_string(),
            created_at: unix_now(),
            token: PermanentToken::generate(),
            role,
            provider: None,
            provider_user_id: None,
        };
        self.sessions.insert(id.to_string(), session);
        self.save()?;
        Ok(self.sessions.get(id).expect("just inserted"))
    }

    pub fn session(&self, id: &str) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub fn remove_session(&mut self, id: &str) -> Result<bool, AuthError> {
        let removed = self.sessions.remove(id).is_some();
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    /// Replaces the permanent token, invalidating every signed token
    /// minted under the old one.
    pub fn rotate_session_token(&mut self, id: &str) -> Result<(), AuthError> {
        let session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| AuthError::UnknownSession(id.to_string()))?;
        session.token = PermanentToken::generate();
        self.save()
    }

    /// Mints a signed token for an existing session.
    pub fn mint(&self, session_id: &str) -> Option<String> {
        self.mint_at(session_id, unix_now())
    }

    pub(crate) fn mint_at(&self, session_id: &str, now: u64) -> Option<String> {
        let session = self.sessions.get(session_id)?;
        Some(token::mint(&session.id, session.token.mac_key(), now))
    }

    // ---- verification ---------------------------------------------------

    /// Classifies and verifies a presented token. Returns `None` for every
    /// malformed, unknown, expired, or forged input; never errors.
    pub fn verify(&mut self, presented: &str) -> Option<Verified> {
        self.verify_at(presented, unix_now())
    }

    pub(crate) fn verify_at(&mut self, presented: &str, now: u64) -> Option<Verified> {
        if presented.is_empty() {
            return None;
        }
        if presented.starts_with(token::SIGNED_HEADER) {
            return self.verify_signed_at(presented, now);
        }
        if presented.len() == 64 && presented.bytes().all(|b| b.is_ascii_hexdigit()) {
            return self.verify_hex_at(presented, now);
        }
        None
    }

    fn verify_signed_at(&self, presented: &str, now: u64) -> Option<Verified> {
        let session_id = token::peek_session_id(presented)?;
        let session = self.sessions.get(&session_id)?;
        let verified_id = token::verify(presented, session.token.mac_key(), now)?;
        Some(Verified {
            role: session.role,
            session_id: Some(verified_id),
            kind: TokenKind::Signed,
        })
    }

    fn verify_hex_at(&mut self, presented: &str, now: u64) -> Option<Verified> {
        let candidate = PermanentToken::from_hex(presented)?;

        // Constant-time per candidate; the winner is folded in without
        // branching on individual byte comparisons.
        let mut matched: Option<String> = None;
        for session in self.sessions.values() {
            if candidate.ct_eq(&session.token) && matched.is_none() {
                matched = Some(session.id.clone());
            }
        }
        if let Some(session_id) = matched {
            let role = self.sessions[&session_id].role;
            return Some(Verified {
                role,
                session_id: Some(session_id),
                kind: TokenKind::Permanent,
            });
        }

        let mut hit: Option<usize> = None;
        for (idx, link) in self.share_links.iter().enumerate() {
            if candidate.ct_eq(&link.token) && hit.is_none() {
                hit = Some(idx);
            }
        }
        let idx = hit?;
        if !self.share_links[idx].is_valid(now) {
            return None;
        }
        self.share_links[idx].use_count += 1;
        let role = self.share_links[idx].role;
        if let Err(err) = self.save() {
            warn!(error = %err, "failed to persist share link use count");
        }
        Some(Verified {
            role,
            session_id: None,
            kind: TokenKind::ShareLink,
        })
    }

    // ---- share links ----------------------------------------------------

    pub fn create_share_link(
        &mut self,
        role: Role,
        expires_in: Option<u64>,
        max_uses: Option<u64>,
        label: Option<String>,
    ) -> Result<String, AuthError> {
        let link = ShareLink {
            token: PermanentToken::generate(),
            role,
            created_at: unix_now(),
            use_count: 0,
            expires_at: expires_in.map(|secs| unix_now() + secs),
            max_uses,
            label,
        };
        let token_hex = link.token.to_hex();
        self.share_links.push(link);
        self.save()?;
        Ok(token_hex)
    }

    pub fn revoke_share_link(&mut self, token_hex: &str) -> Result<bool, AuthError> {
        let Some(candidate) = PermanentToken::from_hex(token_hex) else {
            return Ok(false);
        };
        let mut hit: Option<usize> = None;
        for (idx, link) in self.share_links.iter().enumerate() {
            if candidate.ct_eq(&link.token) && hit.is_none() {
                hit = Some(idx);
            }
        }
        match hit {
            Some(idx) => {
                self.share_links.remove(idx);
                self.save()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn share_links(&self) -> &[ShareLink] {
        &self.share_links
    }

    /// Session a share-link exchange mints against. Bound to the link's
    /// token prefix so revoking the link and its synthetic session kills
    /// outstanding signed tokens together.
    pub fn ensure_link_session(
        &mut self,
        link_token_hex: &str,
        role: Role,
    ) -> Result<String, AuthError> {
        let prefix: String = link_token_hex.chars().take(8).collect();
        let id = format!("link:{prefix}");
        if !self.sessions.contains_key(&id) {
            self.issue_permanent(&id, "share link", role)?;
        }
        Ok(id)
    }

    // ---- admin password & passkeys --------------------------------------

    pub fn set_admin_password(&mut self, password: &str) -> Result<(), AuthError> {
        self.admin_password = Some(AdminPassword::derive(password));
        self.recompute_auth_required();
        self.save()
    }

    pub fn clear_admin_password(&mut self) -> Result<(), AuthError> {
        self.admin_password = None;
        self.recompute_auth_required();
        self.save()
    }

    pub fn verify_admin_password(&self, password: &str) -> bool {
        self.admin_password
            .as_ref()
            .map(|record| record.matches(password))
            .unwrap_or(false)
    }

    pub fn add_passkey(&mut self, credential: PasskeyCredential) -> Result<(), AuthError> {
        self.passkeys.retain(|existing| existing.id != credential.id);
        self.passkeys.push(credential);
        self.recompute_auth_required();
        self.save()
    }

    pub fn remove_passkey(&mut self, id: &str) -> Result<bool, AuthError> {
        let before = self.passkeys.len();
        self.passkeys.retain(|credential| credential.id != id);
        let removed = self.passkeys.len() != before;
        if removed {
            self.recompute_auth_required();
            self.save()?;
        }
        Ok(removed)
    }

    pub fn passkeys(&self) -> &[PasskeyCredential] {
        &self.passkeys
    }

    fn recompute_auth_required(&mut self) {
        self.auth_required = self.admin_password.is_some() || !self.passkeys.is_empty();
    }

    // ---- oauth ----------------------------------------------------------

    pub fn provider_config(&self, provider: Provider) -> Option<&ProviderConfig> {
        match provider {
            Provider::Github => self.oauth.github.as_ref(),
            Provider::Google => self.oauth.google.as_ref(),
        }
    }

    /// Linear scan for a session created by this provider identity;
    /// first contact creates one with the configured default role.
    pub fn find_or_create_oauth_session(
        &mut self,
        provider: Provider,
        provider_user_id: &str,
        display_name: &str,
    ) -> Result<String, AuthError> {
        let existing = self.sessions.values().find(|session| {
            session.provider.as_deref() == Some(provider.as_str())
                && session.provider_user_id.as_deref() == Some(provider_user_id)
        });
        if let Some(session) = existing {
            return Ok(session.id.clone());
        }

        let id = format!("{}:{}", provider.as_str(), provider_user_id);
        let session = Session {
            id: id.clone(),
            name: display_name.to_string(),
            created_at: unix_now(),
            token: PermanentToken::generate(),
            role: self.oauth.default_role,
            provider: Some(provider.as_str().to_string()),
            provider_user_id: Some(provider_user_id.to_string()),
        };
        self.sessions.insert(id.clone(), session);
        self.save()?;
        Ok(id)
    }

    #[cfg(test)]
    pub(crate) fn install_session(&mut self, session: Session) {
        self.sessions.insert(session.id.clone(), session);
    }
}
