//! Signed verification tokens.
//!
//! A token is four dot-separated segments:
//!
//! ```text
//! <hex email>.<hex nonce>.<expiry unix secs>.<hex HMAC-SHA256(secret, first three segments)>
//! ```
//!
//! The email travels inside the token so the verification endpoint can
//! recover it without a lookup.

use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Issues and checks verification tokens with a shared secret.
#[derive(Clone)]
pub struct VerificationSigner {
    secret: Vec<u8>,
    ttl_secs: u64,
}

impl VerificationSigner {
    pub fn new(secret: impl AsRef<[u8]>, ttl_secs: u64) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
            ttl_secs,
        }
    }

    /// Issue a fresh token for `email`.
    pub fn issue(&self, email: &str) -> String {
        self.issue_at(email, unix_now())
    }

    /// Issue a token as if the current time were `now` (unix seconds).
    pub fn issue_at(&self, email: &str, now: u64) -> String {
        let nonce: [u8; 16] = rand::thread_rng().gen();
        let payload = format!(
            "{}.{}.{}",
            hex::encode(email.as_bytes()),
            hex::encode(nonce),
            now.saturating_add(self.ttl_secs)
        );
        let signature = self.sign(&payload);
        format!("{payload}.{signature}")
    }

    /// Return the email a valid, unexpired token was issued for.
    pub fn verify(&self, token: &str) -> Option<String> {
        self.verify_at(token, unix_now())
    }

    /// Verify as if the current time were `now` (unix seconds).
    pub fn verify_at(&self, token: &str, now: u64) -> Option<String> {
        let (payload, signature) = token.rsplit_once('.')?;
        let mut parts = payload.split('.');
        let (email_hex, _nonce, expiry) = (parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() {
            return None;
        }

        let expected = self.sign(payload);
        if !constant_time_compare(&expected, signature) {
            warn!(signature_length = signature.len(), "verification_token_signature_mismatch");
            return None;
        }

        let expiry: u64 = expiry.parse().ok()?;
        if now > expiry {
            warn!(expiry = expiry, now = now, "verification_token_expired");
            return None;
        }

        let email = hex::decode(email_hex).ok()?;
        String::from_utf8(email).ok()
    }

    fn sign(&self, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}
