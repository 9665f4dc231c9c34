pub mod error;
pub mod oauth;
pub mod rate_limit;
pub mod store;
pub mod token;

use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use subtle::ConstantTimeEq;

pub use error::AuthError;
pub use rate_limit::RateLimiter;
pub use store::{AuthStore, Session, ShareLink};

/// Access level attached to every verified request, ordered by privilege.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Admin,
    Editor,
    Viewer,
    None,
}

impl Role {
    fn privilege(self) -> u8 {
        match self {
            Role::Admin => 3,
            Role::Editor => 2,
            Role::Viewer => 1,
            Role::None => 0,
        }
    }

    pub fn at_least(self, other: Role) -> bool {
        self.privilege() >= other.privilege()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Editor => "editor",
            Role::Viewer => "viewer",
            Role::None => "none",
        }
    }
}

// Persisted as 0/1/2; `None` never hits disk.
impl Serialize for Role {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let value: u8 = match self {
            Role::Admin => 0,
            Role::Editor => 1,
            Role::Viewer => 2,
            Role::None => return Err(serde::ser::Error::custom("role none is not persisted")),
        };
        serializer.serialize_u8(value)
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match u8::deserialize(deserializer)? {
            0 => Ok(Role::Admin),
            1 => Ok(Role::Editor),
            2 => Ok(Role::Viewer),
            other => Err(D::Error::custom(format!("invalid role {other}"))),
        }
    }
}

/// 256-bit identity token. Doubles as the HMAC key for the owning
/// session's signed tokens, so it never leaves the store as a string
/// except through [`PermanentToken::to_hex`] for persistence.
#[derive(Clone, PartialEq, Eq)]
pub struct PermanentToken([u8; 32]);

impl PermanentToken {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(hex_str: &str) -> Option<Self> {
        if hex_str.len() != 64 {
            return None;
        }
        let raw = hex::decode(hex_str).ok()?;
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&raw);
        Some(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn mac_key(&self) -> &[u8; 32] {
        &self.0
    }

    /// Constant-time equality; no early exit on byte mismatch.
    pub fn ct_eq(&self, other: &PermanentToken) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl fmt::Debug for PermanentToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PermanentToken(..)")
    }
}

impl Serialize for PermanentToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PermanentToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        PermanentToken::from_hex(&text)
            .ok_or_else(|| D::Error::custom("token must be 64 hex chars"))
    }
}

/// How a presented token was classified during verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Signed,
    Permanent,
    ShareLink,
}

/// Result of a successful verification. Share links resolve to a role
/// with no session id.
#[derive(Debug, Clone)]
pub struct Verified {
    pub role: Role,
    pub session_id: Option<String>,
    pub kind: TokenKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn privilege_ordering() {
        assert!(Role::Admin.at_least(Role::Editor));
        assert!(Role::Editor.at_least(Role::Viewer));
        assert!(Role::Viewer.at_least(Role::None));
        assert!(!Role::Viewer.at_least(Role::Editor));
    }

    #[test]
    fn role_persists_as_small_int() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "0");
        assert_eq!(serde_json::to_string(&Role::Viewer).unwrap(), "2");
        assert_eq!(serde_json::from_str::<Role>("1").unwrap(), Role::Editor);
        assert!(serde_json::from_str::<Role>("7").is_err());
    }

    #[test]
    fn permanent_token_hex_round_trip() {
        let token = PermanentToken::generate();
        let hex_str = token.to_hex();
        assert_eq!(hex_str.len(), 64);
        let back = PermanentToken::from_hex(&hex_str).unwrap();
        assert!(token.ct_eq(&back));
    }

    #[test]
    fn debug_never_prints_token_bytes() {
        let token = PermanentToken::from_bytes([0x42; 32]);
        assert_eq!(format!("{token:?}"), "PermanentToken(..)");
    }
}
