//! Signed session cookie.
//!
//! The session is a PASETO `v4.local` token: the payload is encrypted and
//! authenticated with a server-held 32-byte key, so a token that fails to
//! decrypt, was minted under another key, or is past its `exp` simply reads
//! as "no session". Nothing is stored server-side.

use std::sync::Arc;

use axum_extra::extract::CookieJar;
use pasetors::claims::{Claims, ClaimsValidationRules};
use pasetors::keys::{Generate, SymmetricKey};
use pasetors::token::UntrustedToken;
use pasetors::version4::V4;
use pasetors::{Local, local};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};

use crate::cookies;
use crate::error::Error;
use crate::types::{CustomerId, Email};

/// Default session lifetime.
pub const SESSION_TTL: Duration = Duration::days(7);

const SESSION_CLAIM: &str = "customer";
// Binds tokens to this use of the key.
const IMPLICIT_ASSERTION: &[u8] = b"storefront-session";

/// Payload of a signed-in customer's session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionToken {
    pub customer_id: CustomerId,
    pub email: Email,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    /// Upstream customer access token.
    pub access_token: String,
    /// Provider identity token; only present for provider sign-ins.
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// When `access_token` stops being accepted upstream.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// Fields replaced by [`SessionManager::update`]; `None` keeps the current value.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub email: Option<Email>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub access_token: Option<String>,
    pub id_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<OffsetDateTime>,
}

impl SessionToken {
    fn merge(mut self, update: SessionUpdate) -> Self {
        let SessionUpdate {
            email,
            first_name,
            last_name,
            access_token,
            id_token,
            refresh_token,
            expires_at,
        } = update;
        if let Some(v) = email {
            self.email = v;
        }
        if first_name.is_some() {
            self.first_name = first_name;
        }
        if last_name.is_some() {
            self.last_name = last_name;
        }
        if let Some(v) = access_token {
            self.access_token = v;
        }
        if id_token.is_some() {
            self.id_token = id_token;
        }
        if refresh_token.is_some() {
            self.refresh_token = refresh_token;
        }
        if let Some(v) = expires_at {
            self.expires_at = v;
        }
        self
    }
}

#[derive(Clone)]
struct SessionSettings {
    cookie_name: String,
    ttl: Duration,
    secure: bool,
}

/// Encodes, decodes and stores the session cookie.
///
/// Cheap to clone; the key is shared.
#[derive(Clone)]
pub struct SessionManager {
    key: Arc<SymmetricKey<V4>>,
    settings: SessionSettings,
}

impl SessionManager {
    /// Build a manager from a 32-byte secret.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `secret` is not exactly 32 bytes.
    pub fn new(secret: &[u8]) -> Result<Self, Error> {
        let key = SymmetricKey::<V4>::from(secret)
            .map_err(|_| Error::Config("session secret must be 32 bytes".into()))?;
        Ok(Self::with_key(key))
    }

    /// Build a manager with a random key. Sessions do not survive a restart.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the system RNG is unavailable.
    pub fn ephemeral() -> Result<Self, Error> {
        let key = SymmetricKey::<V4>::generate()
            .map_err(|e| Error::Config(format!("session key generation: {e}")))?;
        Ok(Self::with_key(key))
    }

    fn with_key(key: SymmetricKey<V4>) -> Self {
        Self {
            key: Arc::new(key),
            settings: SessionSettings {
                cookie_name: cookies::SESSION_COOKIE_NAME.into(),
                ttl: SESSION_TTL,
                secure: true,
            },
        }
    }

    #[must_use]
    pub fn with_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.settings.cookie_name = name.into();
        self
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.settings.ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.settings.secure = secure;
        self
    }

    #[must_use]
    pub fn cookie_name(&self) -> &str {
        &self.settings.cookie_name
    }

    /// Sign `payload` into a token string.
    ///
    /// The token expires after the configured lifetime or at
    /// `payload.expires_at`, whichever comes first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Session`] if the payload cannot be encoded.
    pub fn encode(&self, payload: &SessionToken) -> Result<String, Error> {
        self.encode_at(payload, OffsetDateTime::now_utc())
    }

    pub(crate) fn encode_at(&self, payload: &SessionToken, now: OffsetDateTime) -> Result<String, Error> {
        let expires = (now + self.settings.ttl).min(payload.expires_at);
        let value = serde_json::to_value(payload).map_err(|e| Error::Session(e.to_string()))?;

        let mut claims = Claims::new().map_err(session_error)?;
        claims.issued_at(&rfc3339(now)?).map_err(session_error)?;
        claims.not_before(&rfc3339(now)?).map_err(session_error)?;
        claims.expiration(&rfc3339(expires)?).map_err(session_error)?;
        claims
            .subject(&payload.customer_id.to_string())
            .map_err(session_error)?;
        claims
            .add_additional(SESSION_CLAIM, value)
            .map_err(session_error)?;

        local::encrypt(&self.key, &claims, None, Some(IMPLICIT_ASSERTION)).map_err(session_error)
    }

    /// Recover the payload from a token string.
    ///
    /// Any failure (malformed, foreign key, tampered, expired) yields `None`.
    #[must_use]
    pub fn decode(&self, token: &str) -> Option<SessionToken> {
        let untrusted = UntrustedToken::<Local, V4>::try_from(token).ok()?;
        let rules = ClaimsValidationRules::new();
        let trusted =
            local::decrypt(&self.key, &untrusted, &rules, None, Some(IMPLICIT_ASSERTION)).ok()?;
        let value = trusted.payload_claims()?.get_claim(SESSION_CLAIM)?.clone();
        let payload: SessionToken = serde_json::from_value(value).ok()?;
        (payload.expires_at > OffsetDateTime::now_utc()).then_some(payload)
    }

    /// Sign `payload` and set it as the session cookie.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Session`] if the payload cannot be encoded.
    pub fn create(&self, jar: CookieJar, payload: &SessionToken) -> Result<CookieJar, Error> {
        let token = self.encode(payload)?;
        Ok(jar.add(cookies::session_cookie(
            &self.settings.cookie_name,
            token,
            self.settings.ttl,
            self.settings.secure,
        )))
    }

    /// The current session, or `None` for an anonymous visitor.
    #[must_use]
    pub fn read(&self, jar: &CookieJar) -> Option<SessionToken> {
        jar.get(&self.settings.cookie_name)
            .and_then(|cookie| self.decode(cookie.value()))
    }

    /// Merge `update` into the current session and re-issue it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSession`] if there is no valid session to update.
    pub fn update(&self, jar: CookieJar, update: SessionUpdate) -> Result<(CookieJar, SessionToken), Error> {
        let current = self.read(&jar).ok_or(Error::NoSession)?;
        let merged = current.merge(update);
        let jar = self.create(jar, &merged)?;
        Ok((jar, merged))
    }

    /// Clear the session cookie. A no-op for anonymous visitors.
    #[must_use]
    pub fn destroy(&self, jar: CookieJar) -> CookieJar {
        jar.remove(cookies::clear_session_cookie(&self.settings.cookie_name))
    }
}

fn rfc3339(t: OffsetDateTime) -> Result<String, Error> {
    t.format(&Rfc3339).map_err(|e| Error::Session(e.to_string()))
}

fn session_error(e: pasetors::errors::Error) -> Error {
    Error::Session(e.to_string())
}
