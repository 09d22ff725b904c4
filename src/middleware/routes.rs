use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::extract::{CookieJar, PrivateCookieJar};

use super::config::StorefrontAuthConfig;
use super::error::AuthError;
use super::extractor::resolve_session;
use super::state::AuthState;
use super::types::{
    CustomerView, OtpIssuedBody, OtpRequestBody, OtpVerifyBody, PasswordLoginBody,
    PasswordResetBody, RegisterBody, SessionBody, SignedInBody,
};
use crate::bridge::{Credential, IdentityBridge, Resolution};
use crate::error::Error;
use crate::flow::{CallbackParams, PkceFlow, token_expiry};
use crate::otp::{OTP_TTL, OtpStore};
use crate::session::{SessionToken, SessionUpdate};
use crate::traits::{CustomerApi, OtpCache, OtpMailer};
use crate::types::{Email, OtpCode, OtpPurpose, PendingProfile};

/// Create the storefront sign-in router.
///
/// `customers` is the upstream customer API, `otp_cache` holds outstanding
/// one-time codes and `mailer` delivers them.
pub fn auth_routes<C, K, M>(
    config: StorefrontAuthConfig,
    customers: C,
    otp_cache: K,
    mailer: M,
) -> Router
where
    C: CustomerApi,
    K: OtpCache,
    M: OtpMailer,
{
    let auth_path = config.settings.auth_path.clone();
    let flow = PkceFlow::new(config.client)
        .with_cookie_path(auth_path.clone())
        .with_secure_cookies(config.settings.secure_cookies);

    let state = AuthState {
        flow: Arc::new(flow),
        otp: Arc::new(OtpStore::new(otp_cache, mailer)),
        bridge: Arc::new(IdentityBridge::new(customers)),
        session: config.session,
        settings: config.settings,
    };

    Router::new()
        .route(&format!("{auth_path}/login"), get(login::<C, K, M>))
        .route(&format!("{auth_path}/callback"), get(callback::<C, K, M>))
        .route(&format!("{auth_path}/otp/request"), post(otp_request::<C, K, M>))
        .route(&format!("{auth_path}/otp/verify"), post(otp_verify::<C, K, M>))
        .route(
            &format!("{auth_path}/password/login"),
            post(password_login::<C, K, M>),
        )
        .route(
            &format!("{auth_path}/password/register"),
            post(password_register::<C, K, M>),
        )
        .route(&format!("{auth_path}/refresh"), post(refresh::<C, K, M>))
        .route(&format!("{auth_path}/session"), get(session::<C, K, M>))
        .route(
            &format!("{auth_path}/logout"),
            get(logout::<C, K, M>).post(logout::<C, K, M>),
        )
        .with_state(state)
}

// ── OAuth ──────────────────────────────────────────────────────────

async fn login<C: CustomerApi, K: OtpCache, M: OtpMailer>(
    State(state): State<AuthState<C, K, M>>,
    jar: PrivateCookieJar,
) -> (PrivateCookieJar, Redirect) {
    let (jar, auth_req) = state.flow.initiate(jar);
    (jar, Redirect::to(&auth_req.url))
}

async fn callback<C: CustomerApi, K: OtpCache, M: OtpMailer>(
    State(state): State<AuthState<C, K, M>>,
    private: PrivateCookieJar,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> Response {
    let error_redirect = &state.settings.error_redirect;
    let (private, tokens) = state.flow.handle_callback(private, &params).await;

    let tokens = match tokens {
        Ok(tokens) => tokens,
        Err(e) => {
            tracing::warn!(reason = e.code(), error = %e, "OAuth callback rejected");
            return (private, login_error(error_redirect, e.code())).into_response();
        }
    };

    let session = match state.bridge.finalize(Credential::OAuth(tokens)).await {
        Ok(Resolution::SignedIn(session)) => session,
        Ok(Resolution::NeedsPasswordReset { .. }) | Err(_) => {
            return (private, login_error(error_redirect, "callback_failed")).into_response();
        }
    };

    match state.session.create(jar, &session) {
        Ok(jar) => (private, jar, Redirect::to(&state.settings.login_redirect)).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Session creation failed");
            (private, login_error(error_redirect, "callback_failed")).into_response()
        }
    }
}

// ── One-time codes ─────────────────────────────────────────────────

async fn otp_request<C: CustomerApi, K: OtpCache, M: OtpMailer>(
    State(state): State<AuthState<C, K, M>>,
    payload: Result<Json<OtpRequestBody>, JsonRejection>,
) -> Result<Json<OtpIssuedBody>, AuthError> {
    let body = parse_body(payload)?;
    let email: Email = body.email.parse()?;
    let profile = match body.purpose {
        OtpPurpose::Signup => Some(PendingProfile::new(
            body.first_name.as_deref().unwrap_or_default(),
            body.last_name.as_deref().unwrap_or_default(),
        )?),
        OtpPurpose::Login => None,
    };

    state.otp.issue(&email, body.purpose, profile).await?;

    Ok(Json(OtpIssuedBody {
        sent: true,
        expires_in: OTP_TTL.whole_seconds(),
    }))
}

async fn otp_verify<C: CustomerApi, K: OtpCache, M: OtpMailer>(
    State(state): State<AuthState<C, K, M>>,
    jar: CookieJar,
    payload: Result<Json<OtpVerifyBody>, JsonRejection>,
) -> Result<Response, AuthError> {
    let body = parse_body(payload)?;
    let email: Email = body.email.parse()?;
    let code: OtpCode = body.code.parse().map_err(|_| AuthError::InvalidCode)?;

    let record = state.otp.verify(&email, &code).await?.ok_or_else(|| {
        tracing::warn!(email = %email, "One-time code verification failed");
        AuthError::InvalidCode
    })?;

    match state.bridge.finalize(Credential::Otp(record)).await? {
        Resolution::SignedIn(session) => signed_in(&state.session, jar, &session),
        Resolution::NeedsPasswordReset { email } => Ok(Json(PasswordResetBody {
            needs_password_reset: true,
            email,
        })
        .into_response()),
    }
}

// ── Password ───────────────────────────────────────────────────────

async fn password_login<C: CustomerApi, K: OtpCache, M: OtpMailer>(
    State(state): State<AuthState<C, K, M>>,
    jar: CookieJar,
    payload: Result<Json<PasswordLoginBody>, JsonRejection>,
) -> Result<Response, AuthError> {
    let body = parse_body(payload)?;
    let email: Email = body.email.parse()?;
    let password = non_empty_password(body.password)?;

    let resolution = state
        .bridge
        .finalize(Credential::Password { email, password })
        .await
        .map_err(|e| match e {
            Error::UpstreamValidation(_) => AuthError::InvalidCredentials,
            other => other.into(),
        })?;

    match resolution {
        Resolution::SignedIn(session) => signed_in(&state.session, jar, &session),
        Resolution::NeedsPasswordReset { .. } => Err(AuthError::InvalidCredentials),
    }
}

async fn password_register<C: CustomerApi, K: OtpCache, M: OtpMailer>(
    State(state): State<AuthState<C, K, M>>,
    jar: CookieJar,
    payload: Result<Json<RegisterBody>, JsonRejection>,
) -> Result<Response, AuthError> {
    let body = parse_body(payload)?;
    let email: Email = body.email.parse()?;
    let password = non_empty_password(body.password)?;
    let profile = PendingProfile::new(&body.first_name, &body.last_name)?;

    let session = state.bridge.register(&email, &password, profile).await?;
    signed_in(&state.session, jar, &session)
}

// ── Session ────────────────────────────────────────────────────────

async fn refresh<C: CustomerApi, K: OtpCache, M: OtpMailer>(
    State(state): State<AuthState<C, K, M>>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<SignedInBody>), AuthError> {
    let current = resolve_session(&state.session, &jar).ok_or(AuthError::Unauthenticated)?;

    let update = match &current.refresh_token {
        Some(refresh_token) => {
            let tokens = state
                .flow
                .client()
                .refresh(refresh_token)
                .await
                .map_err(refresh_error)?;
            // A refreshed identity token is not re-verified, so the session
            // keeps the one checked at sign-in.
            SessionUpdate {
                access_token: Some(tokens.access_token),
                refresh_token: tokens.refresh_token,
                expires_at: Some(token_expiry(tokens.expires_in)),
                ..SessionUpdate::default()
            }
        }
        None => state.bridge.renew(&current).await.map_err(refresh_error)?,
    };

    let (jar, session) = state.session.update(jar, update)?;
    tracing::info!(customer_id = %session.customer_id, "Session refreshed");
    Ok((jar, Json(SignedInBody::from(&session))))
}

async fn session<C: CustomerApi, K: OtpCache, M: OtpMailer>(
    State(state): State<AuthState<C, K, M>>,
    jar: CookieJar,
) -> Json<SessionBody> {
    let customer = resolve_session(&state.session, &jar).map(|s| CustomerView::from(&s));
    Json(SessionBody {
        authenticated: customer.is_some(),
        customer,
    })
}

async fn logout<C: CustomerApi, K: OtpCache, M: OtpMailer>(
    State(state): State<AuthState<C, K, M>>,
    jar: CookieJar,
) -> (CookieJar, Redirect) {
    let current = resolve_session(&state.session, &jar);
    let jar = state.session.destroy(jar);

    let provider_logout = current.as_ref().and_then(|session| {
        let hint = session.id_token.as_deref()?;
        let return_to = absolute_url(&state.flow, &state.settings.logout_redirect);
        state.flow.client().logout_url(hint, &return_to)
    });
    if let Some(session) = &current {
        tracing::info!(customer_id = %session.customer_id, "Customer signed out");
    }

    let target = provider_logout.unwrap_or_else(|| state.settings.logout_redirect.clone());
    (jar, Redirect::to(&target))
}

// ── Helpers ────────────────────────────────────────────────────────

fn login_error(error_redirect: &str, code: &str) -> Redirect {
    let encoded = urlencoding::encode(code);
    Redirect::to(&format!("{error_redirect}?error={encoded}"))
}

fn parse_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AuthError> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| AuthError::InvalidRequest(e.body_text()))
}

fn non_empty_password(password: String) -> Result<String, AuthError> {
    if password.is_empty() {
        return Err(AuthError::InvalidRequest("password is required".into()));
    }
    Ok(password)
}

fn signed_in(
    manager: &crate::session::SessionManager,
    jar: CookieJar,
    session: &SessionToken,
) -> Result<Response, AuthError> {
    let jar = manager.create(jar, session)?;
    Ok((jar, Json(SignedInBody::from(session))).into_response())
}

/// A rejected refresh means the customer has to sign in again.
fn refresh_error(e: Error) -> AuthError {
    match e {
        Error::UpstreamValidation(_) | Error::Upstream { status: Some(400 | 401), .. } => {
            tracing::warn!(error = %e, "Token refresh rejected");
            AuthError::Unauthenticated
        }
        other => other.into(),
    }
}

/// Resolve a site-relative path against the origin of the OAuth redirect URI.
fn absolute_url(flow: &PkceFlow, path: &str) -> String {
    if !path.starts_with('/') {
        return path.to_string();
    }
    let origin = flow.client().config().redirect_uri().origin().ascii_serialization();
    format!("{origin}{path}")
}
