use axum_extra::extract::cookie::Key;
use url::Url;

use super::error::AuthError;
use crate::oauth::{AuthClient, OAuthConfig, ProviderEndpoints};
use crate::session::SessionManager;

/// Shared auth settings used by both config and runtime state.
#[derive(Clone)]
pub(crate) struct AuthSettings {
    pub(crate) cookie_key: Key,
    pub(crate) secure_cookies: bool,
    pub(crate) auth_path: String,
    pub(crate) login_redirect: String,
    pub(crate) logout_redirect: String,
    pub(crate) error_redirect: String,
}

impl AuthSettings {
    fn defaults() -> Self {
        Self {
            cookie_key: Key::generate(),
            secure_cookies: true,
            auth_path: "/api/auth".into(),
            login_redirect: "/".into(),
            logout_redirect: "/".into(),
            error_redirect: "/login".into(),
        }
    }
}

/// Storefront sign-in configuration.
///
/// The provider client and the session key are constructor parameters; every
/// other setting has a default and a `with_*` override.
pub struct StorefrontAuthConfig {
    pub(super) client: AuthClient,
    pub(super) session: SessionManager,
    pub(super) settings: AuthSettings,
}

impl StorefrontAuthConfig {
    #[must_use]
    pub fn new(client: AuthClient, session: SessionManager) -> Self {
        Self {
            client,
            session,
            settings: AuthSettings::defaults(),
        }
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `OAUTH_CLIENT_ID`, `OAUTH_REDIRECT_URI`, `OAUTH_ISSUER`
    /// - `OAUTH_AUTH_URL`, `OAUTH_TOKEN_URL`, `OAUTH_JWKS_URL`
    /// - `SESSION_SECRET`: 64 hex characters. May be omitted with `DEV_AUTH`,
    ///   in which case sessions do not survive a restart.
    ///
    /// # Optional env vars
    /// - `OAUTH_LOGOUT_URL`: provider end-session endpoint
    /// - `OAUTH_SCOPES`: comma-separated scopes
    /// - `COOKIE_KEY`: key for the encrypted flow cookies (at least 64 bytes)
    /// - `DEV_AUTH`: `"1"` or `"true"` disables `Secure` cookies
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if a required variable is missing or a
    /// value does not parse.
    pub fn from_env() -> Result<Self, AuthError> {
        let endpoints = ProviderEndpoints::new(
            url_var("OAUTH_AUTH_URL")?,
            url_var("OAUTH_TOKEN_URL")?,
            url_var("OAUTH_JWKS_URL")?,
        );
        let endpoints = match std::env::var("OAUTH_LOGOUT_URL") {
            Ok(_) => endpoints.with_logout(url_var("OAUTH_LOGOUT_URL")?),
            Err(_) => endpoints,
        };

        let mut config = OAuthConfig::new(
            required_var("OAUTH_CLIENT_ID")?,
            url_var("OAUTH_REDIRECT_URI")?,
            required_var("OAUTH_ISSUER")?,
            endpoints,
        );
        if let Ok(scopes) = std::env::var("OAUTH_SCOPES") {
            config = config.with_scopes(parse_scopes(&scopes));
        }

        let dev_auth = matches!(
            std::env::var("DEV_AUTH").as_deref(),
            Ok("1") | Ok("true"),
        );

        let session = match std::env::var("SESSION_SECRET") {
            Ok(hex_secret) => session_from_hex(&hex_secret)?,
            Err(_) if dev_auth => {
                tracing::warn!("SESSION_SECRET not set, using an ephemeral session key");
                SessionManager::ephemeral().map_err(|e| AuthError::Config(e.to_string()))?
            }
            Err(_) => return Err(AuthError::Config("SESSION_SECRET is required".into())),
        };

        let cookie_key = match std::env::var("COOKIE_KEY") {
            Ok(k) => Key::try_from(k.as_bytes()).map_err(|_| {
                AuthError::Config(
                    "COOKIE_KEY is set but invalid (must be at least 64 bytes). \
                     Remove the env var to use an ephemeral key, or provide a valid key."
                        .into(),
                )
            })?,
            Err(_) => Key::generate(),
        };

        Ok(Self::new(AuthClient::new(config), session)
            .with_cookie_key(cookie_key)
            .with_secure_cookies(!dev_auth))
    }

    #[must_use]
    pub fn with_cookie_key(mut self, key: Key) -> Self {
        self.settings.cookie_key = key;
        self
    }

    #[must_use]
    pub fn with_session_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.session = self.session.with_cookie_name(name);
        self
    }

    #[must_use]
    pub fn with_session_ttl(mut self, ttl: time::Duration) -> Self {
        self.session = self.session.with_ttl(ttl);
        self
    }

    /// Applies to the session cookie and the flow cookies alike.
    #[must_use]
    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.settings.secure_cookies = secure;
        self.session = self.session.with_secure_cookies(secure);
        self
    }

    #[must_use]
    pub fn with_auth_path(mut self, path: impl Into<String>) -> Self {
        self.settings.auth_path = path.into();
        self
    }

    #[must_use]
    pub fn with_login_redirect(mut self, path: impl Into<String>) -> Self {
        self.settings.login_redirect = path.into();
        self
    }

    #[must_use]
    pub fn with_logout_redirect(mut self, path: impl Into<String>) -> Self {
        self.settings.logout_redirect = path.into();
        self
    }

    #[must_use]
    pub fn with_error_redirect(mut self, path: impl Into<String>) -> Self {
        self.settings.error_redirect = path.into();
        self
    }
}

fn required_var(name: &str) -> Result<String, AuthError> {
    std::env::var(name).map_err(|_| AuthError::Config(format!("{name} is required")))
}

fn url_var(name: &str) -> Result<Url, AuthError> {
    required_var(name)?
        .parse()
        .map_err(|e| AuthError::Config(format!("{name}: {e}")))
}

fn parse_scopes(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn session_from_hex(hex_secret: &str) -> Result<SessionManager, AuthError> {
    let bytes = hex::decode(hex_secret.trim())
        .map_err(|e| AuthError::Config(format!("SESSION_SECRET: {e}")))?;
    SessionManager::new(&bytes).map_err(|e| AuthError::Config(format!("SESSION_SECRET: {e}")))
}
