use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::Deserialize;
use tokio::sync::RwLock;
use url::Url;

use crate::error::Error;
use crate::oauth::{OAuthConfig, ensure_success};
use crate::types::Email;

/// Identity claims from a verified OpenID Connect identity token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityClaims {
    pub subject: String,
    pub email: Email,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
}

#[derive(Deserialize)]
struct RawClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    given_name: Option<String>,
    #[serde(default)]
    family_name: Option<String>,
    #[serde(default)]
    nonce: Option<String>,
}

/// Verifies identity tokens against the provider's published key set.
///
/// Keys are fetched lazily and cached; a token signed with an unknown
/// `kid` triggers one refetch so provider key rotation needs no restart.
pub struct IdTokenVerifier {
    http: reqwest::Client,
    jwks_url: Url,
    issuer: String,
    audience: String,
    keys: RwLock<Option<JwkSet>>,
}

impl IdTokenVerifier {
    #[must_use]
    pub fn new(config: &OAuthConfig, http: reqwest::Client) -> Self {
        Self {
            http,
            jwks_url: config.endpoints.jwks.clone(),
            issuer: config.issuer.clone(),
            audience: config.client_id.clone(),
            keys: RwLock::new(None),
        }
    }

    /// Verify signature, issuer, audience, expiry and `nonce`, then extract
    /// the identity claims.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Token`] on any verification failure or missing
    /// `sub`/`email` claim. Key set download failures surface as
    /// [`Error::Upstream`] / [`Error::Http`].
    pub async fn verify(&self, id_token: &str, expected_nonce: &str) -> Result<IdentityClaims, Error> {
        let header =
            decode_header(id_token).map_err(|e| Error::Token(format!("malformed header: {e}")))?;
        if !matches!(header.alg, Algorithm::RS256 | Algorithm::ES256) {
            return Err(Error::Token(format!("unsupported alg: {:?}", header.alg)));
        }
        let kid = header
            .kid
            .ok_or_else(|| Error::Token("missing header: kid".into()))?;
        let key = self.decoding_key(&kid).await?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);

        let claims = decode::<RawClaims>(id_token, &key, &validation)
            .map_err(|e| Error::Token(e.to_string()))?
            .claims;

        if claims.nonce.as_deref() != Some(expected_nonce) {
            return Err(Error::Token("nonce mismatch".into()));
        }
        if claims.sub.is_empty() {
            return Err(Error::Token("empty claim: sub".into()));
        }
        let email: Email = claims
            .email
            .ok_or_else(|| Error::Token("missing claim: email".into()))?
            .parse()
            .map_err(|_| Error::Token("invalid claim: email".into()))?;

        Ok(IdentityClaims {
            subject: claims.sub,
            email,
            given_name: claims.given_name.filter(|s| !s.is_empty()),
            family_name: claims.family_name.filter(|s| !s.is_empty()),
        })
    }

    async fn decoding_key(&self, kid: &str) -> Result<DecodingKey, Error> {
        {
            let cached = self.keys.read().await;
            if let Some(jwk) = cached.as_ref().and_then(|set| set.find(kid)) {
                return key_from_jwk(jwk);
            }
        }

        let fresh = self.fetch_keys().await?;
        let key = fresh.find(kid).map(key_from_jwk);
        *self.keys.write().await = Some(fresh);
        key.unwrap_or_else(|| Err(Error::Token(format!("unknown kid: {kid}"))))
    }

    async fn fetch_keys(&self) -> Result<JwkSet, Error> {
        let response = self
            .http
            .get(self.jwks_url.clone())
            .send()
            .await
            .map_err(|e| Error::transport("key set download", e))?;
        let response = ensure_success(response, "key set download").await?;
        let keys = response
            .json::<JwkSet>()
            .await
            .map_err(|e| Error::transport("key set download", e))?;
        tracing::debug!(keys = keys.keys.len(), "Identity provider key set refreshed");
        Ok(keys)
    }
}

fn key_from_jwk(jwk: &Jwk) -> Result<DecodingKey, Error> {
    DecodingKey::from_jwk(jwk).map_err(|e| Error::Token(format!("unusable key: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::default_http_client;
    use crate::test_support::{MockProvider, test_oauth_config};

    async fn setup() -> (MockProvider, IdTokenVerifier) {
        let provider = MockProvider::start().await;
        let verifier =
            IdTokenVerifier::new(&test_oauth_config(&provider.base_url()), default_http_client());
        (provider, verifier)
    }

    #[tokio::test]
    async fn verifies_provider_signed_token() {
        let (provider, verifier) = setup().await;
        let token = provider.id_token("n-1");

        let claims = verifier.verify(&token, "n-1").await.unwrap();
        assert_eq!(claims.subject, "idp-user-1");
        assert_eq!(claims.email.as_str(), "oauth@x.com");
        assert_eq!(claims.given_name.as_deref(), Some("Olive"));
        assert_eq!(claims.family_name.as_deref(), Some("Auth"));
    }

    #[tokio::test]
    async fn key_set_is_cached() {
        let (provider, verifier) = setup().await;
        let token = provider.id_token("n-1");
        verifier.verify(&token, "n-1").await.unwrap();
        verifier.verify(&token, "n-1").await.unwrap();
        assert_eq!(provider.jwks_requests(), 1);
    }

    #[tokio::test]
    async fn rejects_nonce_mismatch() {
        let (provider, verifier) = setup().await;
        let err = verifier.verify(&provider.id_token("n-1"), "n-2").await.unwrap_err();
        assert!(matches!(err, Error::Token(ref m) if m.contains("nonce")));
    }

    #[tokio::test]
    async fn rejects_tampered_signature() {
        let (provider, verifier) = setup().await;
        let token = provider.id_token("n-1");
        let (head, sig) = token.rsplit_once('.').unwrap();
        let flipped = if sig.starts_with('A') { 'B' } else { 'A' };
        let tampered = format!("{head}.{flipped}{}", &sig[1..]);

        assert!(matches!(
            verifier.verify(&tampered, "n-1").await,
            Err(Error::Token(_))
        ));
    }

    #[tokio::test]
    async fn rejects_wrong_audience() {
        let (provider, verifier) = setup().await;
        provider.set_audience("someone-else");
        assert!(matches!(
            verifier.verify(&provider.id_token("n-1"), "n-1").await,
            Err(Error::Token(_))
        ));
    }

    #[tokio::test]
    async fn rejects_missing_email_claim() {
        let (provider, verifier) = setup().await;
        provider.set_email(None);
        let err = verifier.verify(&provider.id_token("n-1"), "n-1").await.unwrap_err();
        assert!(matches!(err, Error::Token(ref m) if m.contains("email")));
    }

    #[tokio::test]
    async fn rejects_unknown_kid() {
        let (provider, verifier) = setup().await;
        provider.set_kid("rotated-away");
        let err = verifier.verify(&provider.id_token("n-1"), "n-1").await.unwrap_err();
        assert!(matches!(err, Error::Token(ref m) if m.contains("unknown kid")));
    }

    #[tokio::test]
    async fn rejects_unsigned_garbage() {
        let (_provider, verifier) = setup().await;
        assert!(matches!(
            verifier.verify("not-a-jwt", "n-1").await,
            Err(Error::Token(_))
        ));
    }
}
