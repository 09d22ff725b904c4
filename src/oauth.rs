use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::Error;
use crate::pkce;

/// Deadline applied to every request made to the identity provider or the
/// commerce platform.
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);

/// Identity provider endpoints.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ProviderEndpoints {
    pub authorize: Url,
    pub token: Url,
    pub jwks: Url,
    pub logout: Option<Url>,
}

impl ProviderEndpoints {
    #[must_use]
    pub fn new(authorize: Url, token: Url, jwks: Url) -> Self {
        Self {
            authorize,
            token,
            jwks,
            logout: None,
        }
    }

    /// Set the provider end-session endpoint.
    #[must_use]
    pub fn with_logout(mut self, url: Url) -> Self {
        self.logout = Some(url);
        self
    }
}

/// `OAuth2` / OpenID Connect client configuration.
///
/// ```rust,ignore
/// use storefront_accounts::{OAuthConfig, ProviderEndpoints};
///
/// let endpoints = ProviderEndpoints::new(
///     "https://id.example.com/authorize".parse()?,
///     "https://id.example.com/token".parse()?,
///     "https://id.example.com/.well-known/jwks.json".parse()?,
/// );
/// let config = OAuthConfig::new(
///     "storefront",
///     "https://shop.example.com/api/auth/callback".parse()?,
///     "https://id.example.com",
///     endpoints,
/// );
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct OAuthConfig {
    pub(crate) client_id: String,
    pub(crate) redirect_uri: Url,
    pub(crate) issuer: String,
    pub(crate) endpoints: ProviderEndpoints,
    pub(crate) scopes: Vec<String>,
}

impl OAuthConfig {
    #[must_use]
    pub fn new(
        client_id: impl Into<String>,
        redirect_uri: Url,
        issuer: impl Into<String>,
        endpoints: ProviderEndpoints,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            redirect_uri,
            issuer: issuer.into(),
            endpoints,
            scopes: vec!["openid".into(), "email".into(), "profile".into()],
        }
    }

    /// Override the requested scopes (default: `["openid", "email", "profile"]`).
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn redirect_uri(&self) -> &Url {
        &self.redirect_uri
    }

    /// Expected `iss` claim of identity tokens.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn endpoints(&self) -> &ProviderEndpoints {
        &self.endpoints
    }

    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }
}

/// Authorization redirect plus the secrets the browser must hold until the callback.
#[non_exhaustive]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
    pub code_verifier: String,
    pub nonce: String,
}

/// Token endpoint response.
#[derive(Debug, Clone, Deserialize)]
#[non_exhaustive]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
}

/// `OAuth2` client for the customer identity provider.
pub struct AuthClient {
    config: OAuthConfig,
    http: reqwest::Client,
}

impl AuthClient {
    #[must_use]
    pub fn new(config: OAuthConfig) -> Self {
        Self {
            config,
            http: default_http_client(),
        }
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    #[must_use]
    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Generate an authorization URL with fresh `state`, `nonce` and PKCE verifier.
    #[must_use]
    pub fn authorization_url(&self) -> AuthorizationRequest {
        let state = pkce::generate_state();
        let nonce = pkce::generate_nonce();
        let code_verifier = pkce::generate_code_verifier();
        let code_challenge = pkce::generate_code_challenge(&code_verifier);
        let scope = self.config.scopes.join(" ");

        let mut url = self.config.endpoints.authorize.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", self.config.redirect_uri.as_str())
            .append_pair("scope", &scope)
            .append_pair("state", &state)
            .append_pair("nonce", &nonce)
            .append_pair("code_challenge", &code_challenge)
            .append_pair("code_challenge_method", "S256");

        AuthorizationRequest {
            url: url.into(),
            state,
            code_verifier,
            nonce,
        }
    }

    /// Exchange an authorization code for tokens using PKCE.
    ///
    /// # Errors
    ///
    /// [`Error::Upstream`] on a non-success response,
    /// [`Error::UpstreamUnavailable`] on timeout, [`Error::Http`] otherwise.
    pub async fn exchange_code(&self, code: &str, code_verifier: &str) -> Result<TokenResponse, Error> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("code_verifier", code_verifier),
        ];
        self.token_request(&params, "token exchange").await
    }

    /// Trade a refresh token for a new token set.
    ///
    /// # Errors
    ///
    /// Same as [`exchange_code`](Self::exchange_code).
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, Error> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
        ];
        self.token_request(&params, "token refresh").await
    }

    /// Provider end-session URL, if one is configured.
    #[must_use]
    pub fn logout_url(&self, id_token_hint: &str, post_logout_redirect: &str) -> Option<String> {
        let mut url = self.config.endpoints.logout.clone()?;
        url.query_pairs_mut()
            .append_pair("id_token_hint", id_token_hint)
            .append_pair("post_logout_redirect_uri", post_logout_redirect);
        Some(url.into())
    }

    async fn token_request(
        &self,
        params: &[(&str, &str)],
        operation: &'static str,
    ) -> Result<TokenResponse, Error> {
        let response = self
            .http
            .post(self.config.endpoints.token.clone())
            .form(params)
            .send()
            .await
            .map_err(|e| Error::transport(operation, e))?;

        let response = ensure_success(response, operation).await?;
        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| Error::transport(operation, e))
    }
}

pub(crate) fn default_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(UPSTREAM_TIMEOUT)
        .build()
        .unwrap_or_default()
}

/// Checks HTTP response status; returns the response on success or an error with details.
pub(crate) async fn ensure_success(
    response: reqwest::Response,
    operation: &'static str,
) -> Result<reqwest::Response, Error> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(Error::Upstream {
        operation,
        status: Some(status),
        detail: body,
    })
}
