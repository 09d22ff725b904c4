use axum_extra::extract::PrivateCookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use time::Duration;

pub(crate) const STATE_COOKIE_NAME: &str = "oauth_state";
pub(crate) const VERIFIER_COOKIE_NAME: &str = "code_verifier";
pub(crate) const NONCE_COOKIE_NAME: &str = "oauth_nonce";
pub(crate) const SESSION_COOKIE_NAME: &str = "session";

const FLOW_COOKIES: [&str; 3] = [STATE_COOKIE_NAME, VERIFIER_COOKIE_NAME, NONCE_COOKIE_NAME];

/// Lifetime of the redirect round-trip cookies.
pub(crate) const FLOW_COOKIE_TTL: Duration = Duration::minutes(10);

/// Flow correlation values read back at the callback.
pub(crate) struct FlowCookies {
    pub(crate) state: Option<String>,
    pub(crate) code_verifier: Option<String>,
    pub(crate) nonce: Option<String>,
}

fn flow_cookie(name: &'static str, value: &str, secure: bool, path: &str) -> Cookie<'static> {
    Cookie::build((name, value.to_string()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path(path.to_string())
        .max_age(FLOW_COOKIE_TTL)
        .build()
}

/// Add `state`, verifier and nonce cookies for an authorization redirect.
pub(crate) fn add_flow_cookies(
    jar: PrivateCookieJar,
    state: &str,
    code_verifier: &str,
    nonce: &str,
    secure: bool,
    path: &str,
) -> PrivateCookieJar {
    jar.add(flow_cookie(STATE_COOKIE_NAME, state, secure, path))
        .add(flow_cookie(VERIFIER_COOKIE_NAME, code_verifier, secure, path))
        .add(flow_cookie(NONCE_COOKIE_NAME, nonce, secure, path))
}

pub(crate) fn read_flow_cookies(jar: &PrivateCookieJar) -> FlowCookies {
    let value = |name: &str| jar.get(name).map(|c| c.value().to_string());
    FlowCookies {
        state: value(STATE_COOKIE_NAME),
        code_verifier: value(VERIFIER_COOKIE_NAME),
        nonce: value(NONCE_COOKIE_NAME),
    }
}

/// Remove all three flow cookies.
pub(crate) fn clear_flow_cookies(jar: PrivateCookieJar, path: &str) -> PrivateCookieJar {
    FLOW_COOKIES.into_iter().fold(jar, |jar, name| {
        jar.remove(Cookie::build((name, "")).path(path.to_string()).build())
    })
}

/// Session cookie carrying the signed token.
pub(crate) fn session_cookie(name: &str, token: String, ttl: Duration, secure: bool) -> Cookie<'static> {
    Cookie::build((name.to_string(), token))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/".to_string())
        .max_age(ttl)
        .build()
}

/// Removal cookie for the session.
pub(crate) fn clear_session_cookie(name: &str) -> Cookie<'static> {
    Cookie::build((name.to_string(), ""))
        .path("/".to_string())
        .build()
}
