use std::sync::Arc;

use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;

use super::config::AuthSettings;
use crate::bridge::IdentityBridge;
use crate::flow::PkceFlow;
use crate::otp::OtpStore;
use crate::session::SessionManager;
use crate::traits::{CustomerApi, OtpCache, OtpMailer};

/// Shared state for auth route handlers.
pub(super) struct AuthState<C, K, M> {
    pub(super) flow: Arc<PkceFlow>,
    pub(super) otp: Arc<OtpStore<K, M>>,
    pub(super) bridge: Arc<IdentityBridge<C>>,
    pub(super) session: SessionManager,
    pub(super) settings: AuthSettings,
}

// Manual Clone: avoid derive adding `C: Clone, K: Clone, M: Clone` bounds.
impl<C, K, M> Clone for AuthState<C, K, M> {
    fn clone(&self) -> Self {
        Self {
            flow: self.flow.clone(),
            otp: self.otp.clone(),
            bridge: self.bridge.clone(),
            session: self.session.clone(),
            settings: self.settings.clone(),
        }
    }
}

// PrivateCookieJar requires Key to be extractable from state
impl<C: CustomerApi, K: OtpCache, M: OtpMailer> FromRef<AuthState<C, K, M>> for Key {
    fn from_ref(state: &AuthState<C, K, M>) -> Self {
        state.settings.cookie_key.clone()
    }
}

impl<C: CustomerApi, K: OtpCache, M: OtpMailer> FromRef<AuthState<C, K, M>> for SessionManager {
    fn from_ref(state: &AuthState<C, K, M>) -> Self {
        state.session.clone()
    }
}
