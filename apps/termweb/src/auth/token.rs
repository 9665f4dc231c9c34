//! Short-lived signed tokens.
//!
//! A signed token is `header.payload.signature`, every segment base64url
//! without padding. The header is the fixed HS256 constant, the payload
//! carries only the session id and an expiry, and the signature is
//! HMAC-SHA256 keyed by the owning session's permanent token. Roles are
//! resolved server-side from the session id, never from the payload.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// base64url of `{"alg":"HS256","typ":"JWT"}`.
pub const SIGNED_HEADER: &str = "eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9";

pub const SIGNED_TOKEN_TTL_SECS: u64 = 900;

const MAC_LEN: usize = 32;

/// Builds `header.payload.signature` for `session_id`, valid for
/// [`SIGNED_TOKEN_TTL_SECS`] from `now`.
pub fn mint(session_id: &str, key: &[u8; 32], now: u64) -> String {
    let payload = format!("{{\"s\":\"{}\",\"exp\":{}}}", session_id, now + SIGNED_TOKEN_TTL_SECS);
    let payload_b64 = URL_SAFE_NO_PAD.encode(payload.as_bytes());
    let signing_input = format!("{SIGNED_HEADER}.{payload_b64}");
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(signing_input.as_bytes());
    let sig = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
    format!("{signing_input}.{sig}")
}

/// First verification pass: pull the session id out of the payload without
/// touching any key material.
///
/// The payload is scanned strictly for `"s":"<id>"`; the value must be a
/// plain string with no escapes. Returns `None` on any malformation.
pub fn peek_session_id(token: &str) -> Option<String> {
    let (_, payload_b64, _) = split(token)?;
    let payload = URL_SAFE_NO_PAD.decode(payload_b64).ok()?;
    let payload = std::str::from_utf8(&payload).ok()?;
    scan_string_field(payload, "s")
}

/// Second verification pass, once the caller has resolved the session's
/// permanent token: recompute the MAC, compare in constant time, then check
/// the expiry. Returns the session id on success.
pub fn verify(token: &str, key: &[u8; 32], now: u64) -> Option<String> {
    let (header_b64, payload_b64, sig_b64) = split(token)?;
    let sig = URL_SAFE_NO_PAD.decode(sig_b64).ok()?;
    if sig.len() != MAC_LEN {
        return None;
    }

    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(header_b64.as_bytes());
    mac.update(b".");
    mac.update(payload_b64.as_bytes());
    // verify_slice is a constant-time comparison.
    mac.verify_slice(&sig).ok()?;

    let payload = URL_SAFE_NO_PAD.decode(payload_b64).ok()?;
    let payload = std::str::from_utf8(&payload).ok()?;
    let exp = scan_int_field(payload, "exp")?;
    if now > exp {
        return None;
    }
    scan_string_field(payload, "s")
}

fn split(token: &str) -> Option<(&str, &str, &str)> {
    let first = token.find('.')?;
    let rest = &token[first + 1..];
    let second = rest.find('.')?;
    let header = &token[..first];
    let payload = &rest[..second];
    let sig = &rest[second + 1..];
    if payload.is_empty() || sig.is_empty() || sig.contains('.') {
        return None;
    }
    Some((header, payload, sig))
}

fn scan_string_field(payload: &str, name: &str) -> Option<String> {
    let needle = format!("\"{name}\":\"");
    let start = payload.find(&needle)? + needle.len();
    let end = payload[start..].find('"')?;
    let value = &payload[start..start + end];
    if value.is_empty() {
        return None;
    }
    Some(value.to_string())
}

fn scan_int_field(payload: &str, name: &str) -> Option<u64> {
    let needle = format!("\"{name}\":");
    let start = payload.find(&needle)? + needle.len();
    let digits: String = payload[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [0x42; 32];

    #[test]
    fn mint_then_verify_round_trips() {
        let token = mint("default", &KEY, 1_000);
        assert_eq!(token.matches('.').count(), 2);
        assert!(token.starts_with(SIGNED_HEADER));
        assert_eq!(peek_session_id(&token).as_deref(), Some("default"));
        assert_eq!(verify(&token, &KEY, 1_000).as_deref(), Some("default"));
        // Still valid just before expiry, dead right after.
        assert!(verify(&token, &KEY, 1_000 + SIGNED_TOKEN_TTL_SECS).is_some());
        assert!(verify(&token, &KEY, 1_001 + SIGNED_TOKEN_TTL_SECS).is_none());
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let token = mint("default", &KEY, 1_000);
        let mut bytes: Vec<char> = token.chars().collect();
        let last = *bytes.last().unwrap();
        *bytes.last_mut().unwrap() = if last == 'A' { 'B' } else { 'A' };
        let tampered: String = bytes.into_iter().collect();
        assert!(verify(&tampered, &KEY, 1_000).is_none());
    }

    #[test]
    fn wrong_key_is_rejected() {
        let token = mint("default", &KEY, 1_000);
        assert!(verify(&token, &[0x99; 32], 1_000).is_none());
    }

    #[test]
    fn truncated_or_oversized_signature_is_rejected() {
        let token = mint("default", &KEY, 1_000);
        let dot = token.rfind('.').unwrap();
        let short = format!("{}.{}", &token[..dot], &token[dot + 1..dot + 9]);
        assert!(verify(&short, &KEY, 1_000).is_none());
    }

    #[test]
    fn malformed_tokens_never_panic() {
        for garbage in ["", ".", "..", "a.b", "a.b.c", "x..y", "eyJ.!!!.sig"] {
            assert!(peek_session_id(garbage).is_none() || verify(garbage, &KEY, 0).is_none());
        }
    }
}
