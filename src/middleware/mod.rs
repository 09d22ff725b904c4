//! Plug-and-play storefront sign-in routes for Axum.
//!
//! Mounts the OAuth2 PKCE, one-time code and password endpoints under one
//! path and recovers the signed-in customer on every other page.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use storefront_accounts::middleware::{StorefrontAuthConfig, SignedInCustomer, auth_routes};
//! use storefront_accounts::{LogMailer, MemoryOtpCache, StorefrontApi};
//!
//! // 1. Configure from environment
//! let config = StorefrontAuthConfig::from_env()?;
//! let customers = StorefrontApi::from_env()?;
//!
//! // 2. Mount auth routes
//! let app = axum::Router::new()
//!     .merge(auth_routes(config, customers, MemoryOtpCache::new(), LogMailer));
//!
//! // 3. Use the extractor in page handlers
//! async fn account(customer: SignedInCustomer) -> String {
//!     customer.email.to_string()
//! }
//! ```

mod config;
mod error;
mod extractor;
mod routes;
mod state;
mod types;

pub use config::StorefrontAuthConfig;
pub use error::AuthError;
pub use extractor::{SignedInCustomer, resolve_session};
pub use routes::auth_routes;

/// Re-export cookie key type for builder API.
pub use axum_extra::extract::cookie::Key as CookieKey;
