use std::convert::Infallible;

use axum::extract::{FromRef, FromRequestParts, OptionalFromRequestParts};
use axum::http::request::Parts;
use axum_extra::extract::CookieJar;

use super::error::AuthError;
use crate::session::{SessionManager, SessionToken};
use crate::types::{CustomerId, Email};

/// Signed-in customer recovered from the session cookie.
///
/// Use as an Axum extractor in route handlers. Returns `401 Unauthorized`
/// if no valid session exists. Works with any router state that can hand
/// out a [`SessionManager`].
///
/// # Example
///
/// ```rust,ignore
/// async fn account(customer: SignedInCustomer) -> impl IntoResponse {
///     format!("Hello, {}", customer.email)
/// }
///
/// // Optional: accessible to both signed-in customers and anonymous visitors
/// async fn home(customer: Option<SignedInCustomer>) -> impl IntoResponse {
///     match customer {
///         Some(c) => format!("Welcome back, {}", c.email),
///         None => "Welcome".to_string(),
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct SignedInCustomer {
    pub customer_id: CustomerId,
    pub email: Email,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// Upstream customer access token, for calls made on the customer's behalf.
    pub access_token: String,
}

impl From<SessionToken> for SignedInCustomer {
    fn from(session: SessionToken) -> Self {
        Self {
            customer_id: session.customer_id,
            email: session.email,
            first_name: session.first_name,
            last_name: session.last_name,
            access_token: session.access_token,
        }
    }
}

impl<S> FromRequestParts<S> for SignedInCustomer
where
    SessionManager: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        resolve_session(&SessionManager::from_ref(state), &jar)
            .map(Self::from)
            .ok_or(AuthError::Unauthenticated)
    }
}

impl<S> OptionalFromRequestParts<S> for SignedInCustomer
where
    SessionManager: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        Ok(resolve_session(&SessionManager::from_ref(state), &jar).map(Self::from))
    }
}

/// Resolve the current session from a cookie jar.
///
/// For use in custom middleware where the extractor does not fit. Absent,
/// tampered and expired cookies all resolve to `None`.
#[must_use]
pub fn resolve_session(manager: &SessionManager, jar: &CookieJar) -> Option<SessionToken> {
    manager.read(jar)
}
