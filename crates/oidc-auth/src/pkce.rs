//! PKCE (Proof Key for Code Exchange) implementation per RFC 7636
//!
//! Generates the code verifier and S256 challenge used during the
//! authorization flow. The verifier stays inside the `AuthSession` and is sent
//! only in the token exchange; the challenge goes into the authorization URL so
//! the identity provider can check the exchange came from the same client.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use rand::distr::Alphanumeric;
use sha2::{Digest, Sha256};

/// Length of generated verifiers and state values.
pub const RANDOM_STRING_LEN: usize = 64;

/// The only challenge method this client sends.
pub const CHALLENGE_METHOD: &str = "S256";

/// Generate a cryptographically random PKCE code verifier.
///
/// 64 characters from `[A-Za-z0-9]`, inside the 43-128 range RFC 7636 allows.
pub fn generate_verifier() -> String {
    random_alphanumeric(RANDOM_STRING_LEN)
}

/// Generate an anti-CSRF state value with the same alphabet and length.
pub fn generate_state() -> String {
    random_alphanumeric(RANDOM_STRING_LEN)
}

/// Compute the S256 code challenge from a verifier.
///
/// `challenge = BASE64URL(SHA256(ASCII(verifier)))`, no padding.
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

fn random_alphanumeric(len: usize) -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
