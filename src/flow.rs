//! Authorization-code-with-PKCE redirect flow.
//!
//! `initiate` stores `state`, the code verifier and the OpenID nonce in
//! encrypted, short-lived cookies and returns the provider redirect.
//! `handle_callback` always deletes those cookies, whatever the outcome, so a
//! callback URL can be redeemed at most once per initiation.

use axum_extra::extract::PrivateCookieJar;
use serde::Deserialize;
use time::{Duration, OffsetDateTime};

use crate::cookies;
use crate::error::Error;
use crate::id_token::{IdTokenVerifier, IdentityClaims};
use crate::oauth::{AuthClient, AuthorizationRequest};

/// Access token lifetime assumed when the provider omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::hours(1);

/// Query parameters of the provider callback.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Tokens from a completed flow, with verified identity claims.
#[derive(Debug, Clone)]
pub struct OAuthTokens {
    pub access_token: String,
    pub id_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: OffsetDateTime,
    pub claims: IdentityClaims,
}

/// Why a callback was rejected.
#[derive(Debug, thiserror::Error)]
pub enum CallbackError {
    /// The provider redirected back with an `error` parameter.
    #[error("provider returned error: {0}")]
    Provider(String),

    #[error("callback without authorization code")]
    MissingParams,

    /// State mismatch, or a flow cookie missing. CSRF and cookie eviction
    /// are indistinguishable here and treated alike.
    #[error("invalid state")]
    InvalidState,

    #[error("token exchange failed: {0}")]
    TokenExchangeFailed(#[source] Error),
}

impl CallbackError {
    /// Reason code shown to the browser.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Provider(_) => "callback_failed",
            Self::MissingParams => "missing_params",
            Self::InvalidState => "invalid_state",
            Self::TokenExchangeFailed(_) => "token_exchange_failed",
        }
    }
}

/// PKCE redirect flow bound to one identity provider.
pub struct PkceFlow {
    client: AuthClient,
    verifier: IdTokenVerifier,
    cookie_path: String,
    secure_cookies: bool,
}

impl PkceFlow {
    #[must_use]
    pub fn new(client: AuthClient) -> Self {
        let verifier = IdTokenVerifier::new(client.config(), client.http().clone());
        Self {
            client,
            verifier,
            cookie_path: "/".into(),
            secure_cookies: true,
        }
    }

    /// Restrict flow cookies to `path` (normally the auth route prefix).
    #[must_use]
    pub fn with_cookie_path(mut self, path: impl Into<String>) -> Self {
        self.cookie_path = path.into();
        self
    }

    #[must_use]
    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.secure_cookies = secure;
        self
    }

    #[must_use]
    pub fn client(&self) -> &AuthClient {
        &self.client
    }

    /// Start a flow: fresh secrets into cookies, provider URL out.
    #[must_use]
    pub fn initiate(&self, jar: PrivateCookieJar) -> (PrivateCookieJar, AuthorizationRequest) {
        let request = self.client.authorization_url();
        let jar = cookies::add_flow_cookies(
            jar,
            &request.state,
            &request.code_verifier,
            &request.nonce,
            self.secure_cookies,
            &self.cookie_path,
        );
        (jar, request)
    }

    /// Validate the callback against the flow cookies and exchange the code.
    ///
    /// The returned jar has the flow cookies removed in every case.
    pub async fn handle_callback(
        &self,
        jar: PrivateCookieJar,
        params: &CallbackParams,
    ) -> (PrivateCookieJar, Result<OAuthTokens, CallbackError>) {
        let stored = cookies::read_flow_cookies(&jar);
        let jar = cookies::clear_flow_cookies(jar, &self.cookie_path);
        (jar, self.complete(stored, params).await)
    }

    async fn complete(
        &self,
        stored: cookies::FlowCookies,
        params: &CallbackParams,
    ) -> Result<OAuthTokens, CallbackError> {
        if let Some(error) = &params.error {
            let desc = params.error_description.as_deref().unwrap_or("");
            tracing::warn!(error = %error, description = %desc, "OAuth2 error from provider");
            return Err(CallbackError::Provider(error.clone()));
        }

        let code = params
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or(CallbackError::MissingParams)?;

        let (Some(received_state), Some(stored_state)) = (&params.state, &stored.state) else {
            tracing::warn!(
                has_param = params.state.is_some(),
                has_cookie = stored.state.is_some(),
                "OAuth state missing"
            );
            return Err(CallbackError::InvalidState);
        };
        if received_state != stored_state {
            tracing::warn!("OAuth state mismatch");
            return Err(CallbackError::InvalidState);
        }
        let (Some(code_verifier), Some(nonce)) = (&stored.code_verifier, &stored.nonce) else {
            tracing::warn!("OAuth flow cookies missing");
            return Err(CallbackError::InvalidState);
        };

        let tokens = self
            .client
            .exchange_code(code, code_verifier)
            .await
            .map_err(CallbackError::TokenExchangeFailed)?;

        let id_token = tokens.id_token.ok_or_else(|| {
            CallbackError::TokenExchangeFailed(Error::Token("token response without id_token".into()))
        })?;
        let claims = self
            .verifier
            .verify(&id_token, nonce)
            .await
            .map_err(CallbackError::TokenExchangeFailed)?;

        Ok(OAuthTokens {
            access_token: tokens.access_token,
            id_token,
            refresh_token: tokens.refresh_token,
            expires_at: token_expiry(tokens.expires_in),
            claims,
        })
    }
}

/// Absolute expiry for a token endpoint `expires_in` value.
pub(crate) fn token_expiry(expires_in: Option<u64>) -> OffsetDateTime {
    let lifetime = expires_in
        .and_then(|secs| i64::try_from(secs).ok())
        .map_or(DEFAULT_TOKEN_LIFETIME, Duration::seconds);
    OffsetDateTime::now_utc() + lifetime
}
