//! Resolves a verified credential into a customer session payload.
//!
//! Every sign-in path ends in [`IdentityBridge::finalize`]. Upstream calls run
//! in sequence, each under a deadline, and the session payload is built only
//! once all of them have succeeded.

use std::future::Future;
use std::time::Duration;

use crate::customer::{CustomerAccessToken, CustomerIdentity, NewCustomer};
use crate::error::Error;
use crate::flow::OAuthTokens;
use crate::oauth::UPSTREAM_TIMEOUT;
use crate::otp::OtpRecord;
use crate::pkce;
use crate::session::{SessionToken, SessionUpdate};
use crate::traits::CustomerApi;
use crate::types::{Email, OtpPurpose, PendingProfile};

/// A credential that has already passed its own verification step.
#[derive(Debug)]
pub enum Credential {
    /// Record returned by a successful one-time code verification.
    Otp(OtpRecord),
    /// Tokens from a completed provider redirect flow.
    OAuth(OAuthTokens),
    /// Email and password, checked upstream.
    Password { email: Email, password: String },
}

impl Credential {
    fn method(&self) -> &'static str {
        match self {
            Self::Otp(_) => "otp",
            Self::OAuth(_) => "oauth",
            Self::Password { .. } => "password",
        }
    }
}

/// Outcome of [`IdentityBridge::finalize`].
#[derive(Debug)]
pub enum Resolution {
    SignedIn(SessionToken),
    /// A login code was verified, but the platform only issues tokens against
    /// a password this service never holds. The customer has to set one.
    NeedsPasswordReset { email: Email },
}

pub struct IdentityBridge<C> {
    customers: C,
    timeout: Duration,
}

impl<C: CustomerApi> IdentityBridge<C> {
    #[must_use]
    pub fn new(customers: C) -> Self {
        Self {
            customers,
            timeout: UPSTREAM_TIMEOUT,
        }
    }

    /// Override the per-call upstream deadline (default: 10 seconds).
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn customers(&self) -> &C {
        &self.customers
    }

    /// Turn `credential` into a session payload.
    ///
    /// # Errors
    ///
    /// - [`Error::UpstreamValidation`] when the platform rejects the new
    ///   customer fields or the password.
    /// - [`Error::UpstreamUnavailable`] when a call misses its deadline.
    /// - Any other upstream failure as returned by the [`CustomerApi`].
    pub async fn finalize(&self, credential: Credential) -> Result<Resolution, Error> {
        let method = credential.method();
        let resolution = match credential {
            Credential::Otp(record) => self.finalize_otp(record).await,
            Credential::OAuth(tokens) => self.finalize_oauth(tokens).await.map(Resolution::SignedIn),
            Credential::Password { email, password } => self
                .sign_in_with_password(&email, &password)
                .await
                .map(Resolution::SignedIn),
        };

        match &resolution {
            Ok(Resolution::SignedIn(session)) => {
                tracing::info!(
                    customer_id = %session.customer_id,
                    email = %session.email,
                    method,
                    "Customer signed in"
                );
            }
            Ok(Resolution::NeedsPasswordReset { email }) => {
                tracing::info!(email = %email, "Login code verified, password reset required");
            }
            Err(Error::UpstreamValidation(errors)) => {
                tracing::warn!(method, errors = ?errors, "Upstream rejected sign-in");
            }
            Err(e) => {
                tracing::error!(method, error = %e, "Sign-in failed");
            }
        }
        resolution
    }

    /// Create a customer with a password of their choosing and sign them in.
    ///
    /// # Errors
    ///
    /// Same as [`finalize`](Self::finalize).
    pub async fn register(
        &self,
        email: &Email,
        password: &str,
        profile: PendingProfile,
    ) -> Result<SessionToken, Error> {
        let result = self.create_and_sign_in(email, password.to_owned(), profile).await;
        match &result {
            Ok(session) => tracing::info!(
                customer_id = %session.customer_id,
                email = %email,
                "Customer registered"
            ),
            Err(e) => tracing::warn!(email = %email, error = %e, "Registration failed"),
        }
        result
    }

    /// Extend the session's platform access token.
    ///
    /// # Errors
    ///
    /// Upstream failures as returned by the [`CustomerApi`].
    pub async fn renew(&self, session: &SessionToken) -> Result<SessionUpdate, Error> {
        let renewed = self
            .call(
                "access token renew",
                self.customers.renew_access_token(&session.access_token),
            )
            .await?;
        Ok(SessionUpdate {
            access_token: Some(renewed.access_token),
            expires_at: Some(renewed.expires_at),
            ..SessionUpdate::default()
        })
    }

    async fn finalize_otp(&self, record: OtpRecord) -> Result<Resolution, Error> {
        match record.purpose {
            OtpPurpose::Login => Ok(Resolution::NeedsPasswordReset {
                email: record.email,
            }),
            OtpPurpose::Signup => {
                let profile = record.pending_profile.ok_or_else(|| {
                    Error::Validation("signup code without pending profile".into())
                })?;
                // Customer never sees this password; later logins go through
                // one-time codes or a password reset.
                let secret = pkce::generate_account_secret();
                self.create_and_sign_in(&record.email, secret, profile)
                    .await
                    .map(Resolution::SignedIn)
            }
        }
    }

    async fn finalize_oauth(&self, tokens: OAuthTokens) -> Result<SessionToken, Error> {
        // The session's customer id must come from the platform; a lookup
        // failure of any kind fails the sign-in.
        let identity = self
            .call("customer lookup", self.customers.fetch_customer(&tokens.access_token))
            .await?;

        Ok(SessionToken {
            customer_id: identity.id,
            email: identity.email,
            first_name: identity.first_name.or(tokens.claims.given_name),
            last_name: identity.last_name.or(tokens.claims.family_name),
            access_token: tokens.access_token,
            id_token: Some(tokens.id_token),
            refresh_token: tokens.refresh_token,
            expires_at: tokens.expires_at,
        })
    }

    async fn sign_in_with_password(&self, email: &Email, password: &str) -> Result<SessionToken, Error> {
        let token = self
            .call(
                "access token create",
                self.customers.create_access_token(email, password),
            )
            .await?;
        let identity = self
            .call("customer lookup", self.customers.fetch_customer(&token.access_token))
            .await?;
        Ok(session_for(identity, token))
    }

    async fn create_and_sign_in(
        &self,
        email: &Email,
        password: String,
        profile: PendingProfile,
    ) -> Result<SessionToken, Error> {
        let new_customer = NewCustomer {
            email: email.clone(),
            password,
            profile,
        };
        let identity = self
            .call("customer create", self.customers.create_customer(&new_customer))
            .await?;
        let token = self
            .call(
                "access token create",
                self.customers.create_access_token(email, &new_customer.password),
            )
            .await?;
        Ok(session_for(identity, token))
    }

    async fn call<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T, Error>>,
    ) -> Result<T, Error> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| Error::UpstreamUnavailable { operation })?
    }
}

fn session_for(identity: CustomerIdentity, token: CustomerAccessToken) -> SessionToken {
    SessionToken {
        customer_id: identity.id,
        email: identity.email,
        first_name: identity.first_name,
        last_name: identity.last_name,
        access_token: token.access_token,
        id_token: None,
        refresh_token: None,
        expires_at: token.expires_at,
    }
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;

    use super::*;
    use crate::id_token::IdentityClaims;
    use crate::otp::OTP_TTL;
    use crate::test_support::MemoryCustomerApi;

    fn email(s: &str) -> Email {
        s.parse().unwrap()
    }

    fn otp_record(address: &str, purpose: OtpPurpose, profile: Option<PendingProfile>) -> OtpRecord {
        let now = OffsetDateTime::now_utc();
        OtpRecord {
            email: email(address),
            code: "123456".parse().unwrap(),
            purpose,
            pending_profile: profile,
            issued_at: now,
            expires_at: now + OTP_TTL,
        }
    }

    fn oauth_tokens(access_token: &str) -> OAuthTokens {
        OAuthTokens {
            access_token: access_token.into(),
            id_token: "header.claims.sig".into(),
            refresh_token: Some("provider-refresh-token".into()),
            expires_at: OffsetDateTime::now_utc() + time::Duration::hours(1),
            claims: IdentityClaims {
                subject: "idp-user-1".into(),
                email: email("oauth@x.com"),
                given_name: Some("Olive".into()),
                family_name: Some("Auth".into()),
            },
        }
    }

    fn signed_in(resolution: Resolution) -> SessionToken {
        match resolution {
            Resolution::SignedIn(session) => session,
            Resolution::NeedsPasswordReset { .. } => panic!("expected a session"),
        }
    }

    #[tokio::test]
    async fn otp_signup_creates_customer_and_session() {
        let api = MemoryCustomerApi::default();
        let bridge = IdentityBridge::new(api.clone());
        let profile = PendingProfile::new("A", "B").unwrap();
        let record = otp_record("new@x.com", OtpPurpose::Signup, Some(profile));

        let session = signed_in(bridge.finalize(Credential::Otp(record)).await.unwrap());

        let created = api.created();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].profile.first_name, "A");
        assert_eq!(created[0].password.len(), 43);
        assert_eq!(session.customer_id, api.customer("new@x.com").unwrap().id);
        assert_eq!(session.first_name.as_deref(), Some("A"));
        assert!(session.access_token.starts_with("customer-token-"));
        assert!(session.id_token.is_none());
    }

    #[tokio::test]
    async fn otp_signup_for_taken_email_is_rejected() {
        let api = MemoryCustomerApi::default().with_customer("taken@x.com", "pw", "T", "K");
        let bridge = IdentityBridge::new(api);
        let profile = PendingProfile::new("A", "B").unwrap();
        let record = otp_record("taken@x.com", OtpPurpose::Signup, Some(profile));

        let err = bridge.finalize(Credential::Otp(record)).await.unwrap_err();
        assert!(matches!(err, Error::UpstreamValidation(ref m) if m[0].starts_with("TAKEN")));
    }

    #[tokio::test]
    async fn otp_login_needs_password_reset() {
        let api = MemoryCustomerApi::default().with_customer("existing@x.com", "pw", "E", "X");
        let bridge = IdentityBridge::new(api.clone());
        let record = otp_record("existing@x.com", OtpPurpose::Login, None);

        let resolution = bridge.finalize(Credential::Otp(record)).await.unwrap();
        assert!(matches!(
            resolution,
            Resolution::NeedsPasswordReset { ref email } if email.as_str() == "existing@x.com"
        ));
        assert!(api.created().is_empty());
    }

    #[tokio::test]
    async fn oauth_uses_platform_customer() {
        let api = MemoryCustomerApi::default().with_customer("oauth@x.com", "pw", "Platform", "Name");
        api.link_token("provider-access-token", "oauth@x.com");
        let bridge = IdentityBridge::new(api.clone());

        let session = signed_in(
            bridge
                .finalize(Credential::OAuth(oauth_tokens("provider-access-token")))
                .await
                .unwrap(),
        );
        assert_eq!(session.customer_id, api.customer("oauth@x.com").unwrap().id);
        assert_eq!(session.first_name.as_deref(), Some("Platform"));
        assert_eq!(session.access_token, "provider-access-token");
        assert_eq!(session.id_token.as_deref(), Some("header.claims.sig"));
        assert_eq!(session.refresh_token.as_deref(), Some("provider-refresh-token"));
    }

    #[tokio::test]
    async fn oauth_token_unknown_to_platform_fails() {
        let bridge = IdentityBridge::new(MemoryCustomerApi::default());

        let err = bridge
            .finalize(Credential::OAuth(oauth_tokens("unknown-token")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Upstream { operation: "customer lookup", .. }));
    }

    #[tokio::test]
    async fn oauth_lookup_server_error_fails() {
        let api = MemoryCustomerApi::default().with_customer("oauth@x.com", "pw", "Platform", "Name");
        api.link_token("provider-access-token", "oauth@x.com");
        api.fail_lookups();
        let bridge = IdentityBridge::new(api);

        let err = bridge
            .finalize(Credential::OAuth(oauth_tokens("provider-access-token")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Upstream { status: Some(500), .. }));
    }

    #[tokio::test]
    async fn oauth_with_platform_down_fails() {
        let api = MemoryCustomerApi::default();
        api.go_down();
        let bridge = IdentityBridge::new(api);

        let err = bridge
            .finalize(Credential::OAuth(oauth_tokens("provider-access-token")))
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn password_login() {
        let api = MemoryCustomerApi::default().with_customer("shopper@x.com", "hunter22", "S", "H");
        let bridge = IdentityBridge::new(api);

        let session = signed_in(
            bridge
                .finalize(Credential::Password {
                    email: email("shopper@x.com"),
                    password: "hunter22".into(),
                })
                .await
                .unwrap(),
        );
        assert_eq!(session.email.as_str(), "shopper@x.com");
        assert!(session.refresh_token.is_none());
    }

    #[tokio::test]
    async fn wrong_password_is_upstream_validation() {
        let api = MemoryCustomerApi::default().with_customer("shopper@x.com", "hunter22", "S", "H");
        let bridge = IdentityBridge::new(api);

        let err = bridge
            .finalize(Credential::Password {
                email: email("shopper@x.com"),
                password: "nope".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UpstreamValidation(_)));
    }

    #[tokio::test]
    async fn register_then_duplicate() {
        let api = MemoryCustomerApi::default();
        let bridge = IdentityBridge::new(api.clone());
        let profile = PendingProfile::new("R", "G").unwrap();

        let session = bridge
            .register(&email("reg@x.com"), "secret-pw", profile.clone())
            .await
            .unwrap();
        assert_eq!(api.created()[0].password, "secret-pw");
        assert_eq!(session.customer_id, api.customer("reg@x.com").unwrap().id);

        let err = bridge
            .register(&email("reg@x.com"), "secret-pw", profile)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UpstreamValidation(_)));
    }

    #[tokio::test]
    async fn renew_rotates_access_token() {
        let api = MemoryCustomerApi::default().with_customer("shopper@x.com", "hunter22", "S", "H");
        let bridge = IdentityBridge::new(api);
        let session = bridge
            .sign_in_with_password(&email("shopper@x.com"), "hunter22")
            .await
            .unwrap();

        let update = bridge.renew(&session).await.unwrap();
        let renewed = update.access_token.unwrap();
        assert_ne!(renewed, session.access_token);
        assert!(update.expires_at.is_some());
    }

    #[tokio::test]
    async fn stalled_upstream_times_out() {
        let api = MemoryCustomerApi::default();
        api.stall();
        let bridge = IdentityBridge::new(api).with_timeout(Duration::from_millis(50));

        let err = bridge
            .finalize(Credential::Password {
                email: email("slow@x.com"),
                password: "pw".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::UpstreamUnavailable { operation: "access token create" }
        ));
    }
}
