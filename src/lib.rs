//! Customer sign-in for a storefront.
//!
//! Three ways in, one session out:
//!
//! - **OAuth2 authorization code with PKCE** against the customer identity
//!   provider ([`PkceFlow`]); identity tokens are verified against the
//!   provider's published key set.
//! - **Email one-time codes** ([`OtpStore`]) for passwordless signup.
//! - **Email and password**, checked by the commerce platform.
//!
//! [`IdentityBridge`] turns any verified credential into a customer record
//! on the commerce platform, creating the customer when needed, and
//! [`SessionManager`] stores the result in an encrypted, time-limited cookie.
//! The [`middleware`] module wires all of it into an axum `Router`.

pub mod bridge;
mod cookies;
pub mod customer;
pub mod error;
pub mod flow;
pub mod id_token;
pub mod middleware;
pub mod oauth;
pub mod otp;
pub mod pkce;
pub mod session;
pub mod traits;
pub mod types;

#[cfg(test)]
mod test_support;

// Re-exports for convenient access
pub use bridge::{Credential, IdentityBridge, Resolution};
pub use customer::{CustomerAccessToken, CustomerIdentity, NewCustomer, StorefrontApi};
pub use error::Error;
pub use flow::{CallbackError, CallbackParams, OAuthTokens, PkceFlow};
pub use id_token::{IdTokenVerifier, IdentityClaims};
pub use oauth::{AuthClient, AuthorizationRequest, OAuthConfig, ProviderEndpoints, TokenResponse};
pub use otp::{LogMailer, MemoryOtpCache, OtpRecord, OtpStore};
pub use pkce::{generate_code_challenge, generate_code_verifier, generate_nonce, generate_state};
pub use session::{SessionManager, SessionToken, SessionUpdate};
pub use traits::{CustomerApi, OtpCache, OtpMailer};
pub use types::{CustomerId, Email, OtpCode, OtpPurpose, PendingProfile};
