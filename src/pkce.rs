use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use sha2::{Digest, Sha256};

fn random_url_safe<const N: usize>() -> String {
    let bytes: [u8; N] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generates a cryptographically random PKCE code verifier.
///
/// 48 random bytes encode to 64 URL-safe characters (RFC 7636 allows 43-128).
#[must_use]
pub fn generate_code_verifier() -> String {
    random_url_safe::<48>()
}

/// Computes the S256 code challenge: `BASE64URL(SHA256(verifier))`.
#[must_use]
pub fn generate_code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Random `state` correlating the authorization redirect with its callback.
#[must_use]
pub fn generate_state() -> String {
    random_url_safe::<16>()
}

/// Random OpenID `nonce`, echoed back inside the identity token.
#[must_use]
pub fn generate_nonce() -> String {
    random_url_safe::<16>()
}

/// Throwaway upstream password for accounts created through a one-time code.
///
/// Never shown to the customer; they regain password access through a reset.
#[must_use]
pub(crate) fn generate_account_secret() -> String {
    random_url_safe::<32>()
}
