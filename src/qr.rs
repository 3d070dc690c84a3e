use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt::Write;

/// The JSON text a student device scans and posts back verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckinPayload {
    pub attendance_id: String,
    pub token: String,
    pub timestamp: String,
}

/// Check-in token bound to one session: SHA-256 over the session's private
/// secret and its public id, hex encoded.
pub fn derive_token(secret: &str, attendance_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(b":");
    hasher.update(attendance_id.as_bytes());
    hex_string(&hasher.finalize())
}

pub fn verify_token(secret: &str, attendance_id: &str, presented: &str) -> bool {
    derive_token(secret, attendance_id) == presented
}

pub fn payload(secret: &str, attendance_id: &str, issued_at: DateTime<Utc>) -> CheckinPayload {
    CheckinPayload {
        attendance_id: attendance_id.to_string(),
        token: derive_token(secret, attendance_id),
        timestamp: issued_at.to_rfc3339(),
    }
}

fn hex_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_deterministic_per_session() {
        let a = derive_token("secret-1", "session-1");
        let b = derive_token("secret-1", "session-1");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn token_differs_across_sessions_and_secrets() {
        let base = derive_token("secret-1", "session-1");
        assert_ne!(base, derive_token("secret-1", "session-2"));
        assert_ne!(base, derive_token("secret-2", "session-1"));
    }

    #[test]
    fn verify_rejects_tampered_tokens() {
        let token = derive_token("secret-1", "session-1");
        assert!(verify_token("secret-1", "session-1", &token));
        assert!(!verify_token("secret-1", "session-1", "deadbeef"));
        assert!(!verify_token("secret-1", "session-2", &token));
    }

    #[test]
    fn payload_carries_id_token_and_rfc3339_timestamp() {
        let issued = Utc::now();
        let p = payload("secret-1", "session-1", issued);
        assert_eq!(p.attendance_id, "session-1");
        assert_eq!(p.token, derive_token("secret-1", "session-1"));
        assert_eq!(p.timestamp, issued.to_rfc3339());
    }
}
