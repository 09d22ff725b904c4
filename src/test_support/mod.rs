//! Fakes shared by the unit tests: a recording mailer, an in-memory customer
//! API and a local identity provider that signs real RS256 identity tokens.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Form, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::json;
use time::{Duration, OffsetDateTime};
use url::Url;

use crate::customer::{CustomerAccessToken, CustomerIdentity, NewCustomer};
use crate::error::Error;
use crate::oauth::{OAuthConfig, ProviderEndpoints};
use crate::traits::{CustomerApi, OtpMailer};
use crate::types::{CustomerId, Email, OtpCode, OtpPurpose};

// ── Mailer ──

#[derive(Clone, Default)]
pub(crate) struct RecordingMailer {
    sent: Arc<Mutex<Vec<(Email, OtpCode, OtpPurpose)>>>,
    fail: bool,
}

impl RecordingMailer {
    /// Records the code, then reports a delivery failure.
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub(crate) fn last_code_for(&self, email: &Email) -> Option<OtpCode> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(e, _, _)| e == email)
            .map(|(_, code, _)| code.clone())
    }

    pub(crate) fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

impl OtpMailer for RecordingMailer {
    async fn send_code(&self, email: &Email, code: &OtpCode, purpose: OtpPurpose) -> Result<(), Error> {
        self.sent
            .lock()
            .unwrap()
            .push((email.clone(), code.clone(), purpose));
        if self.fail {
            return Err(Error::Delivery("mailbox unavailable".into()));
        }
        Ok(())
    }
}

// ── Customer API ──

struct StoredCustomer {
    identity: CustomerIdentity,
    password: String,
}

#[derive(Default)]
struct CustomerBook {
    customers: HashMap<Email, StoredCustomer>,
    tokens: HashMap<String, Email>,
    created: Vec<NewCustomer>,
}

/// In-memory commerce platform.
#[derive(Clone, Default)]
pub(crate) struct MemoryCustomerApi {
    book: Arc<Mutex<CustomerBook>>,
    issued: Arc<AtomicUsize>,
    stalled: Arc<AtomicBool>,
    unavailable: Arc<AtomicBool>,
    failing_lookups: Arc<AtomicBool>,
}

impl MemoryCustomerApi {
    pub(crate) fn with_customer(self, email: &str, password: &str, first: &str, last: &str) -> Self {
        let email: Email = email.parse().unwrap();
        let mut book = self.book.lock().unwrap();
        let id = CustomerId(format!("gid://shop/Customer/{}", book.customers.len() + 1));
        book.customers.insert(
            email.clone(),
            StoredCustomer {
                identity: CustomerIdentity {
                    id,
                    email,
                    first_name: Some(first.into()),
                    last_name: Some(last.into()),
                },
                password: password.into(),
            },
        );
        drop(book);
        self
    }

    /// Make `token` resolve to the customer registered under `email`.
    pub(crate) fn link_token(&self, token: &str, email: &str) {
        let email: Email = email.parse().unwrap();
        self.book.lock().unwrap().tokens.insert(token.into(), email);
    }

    pub(crate) fn created(&self) -> Vec<NewCustomer> {
        self.book.lock().unwrap().created.clone()
    }

    pub(crate) fn customer(&self, email: &str) -> Option<CustomerIdentity> {
        let email: Email = email.parse().unwrap();
        self.book
            .lock()
            .unwrap()
            .customers
            .get(&email)
            .map(|c| c.identity.clone())
    }

    /// Every call hangs forever.
    pub(crate) fn stall(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }

    /// Every call fails as a timeout.
    pub(crate) fn go_down(&self) {
        self.unavailable.store(true, Ordering::SeqCst);
    }

    /// Customer lookups answer with a server error.
    pub(crate) fn fail_lookups(&self) {
        self.failing_lookups.store(true, Ordering::SeqCst);
    }

    async fn gate(&self, operation: &'static str) -> Result<(), Error> {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::UpstreamUnavailable { operation });
        }
        Ok(())
    }

    fn mint(&self, email: &Email) -> CustomerAccessToken {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let access_token = format!("customer-token-{n}");
        self.book
            .lock()
            .unwrap()
            .tokens
            .insert(access_token.clone(), email.clone());
        CustomerAccessToken {
            access_token,
            expires_at: OffsetDateTime::now_utc() + Duration::days(30),
        }
    }
}

impl CustomerApi for MemoryCustomerApi {
    async fn create_customer(&self, customer: &NewCustomer) -> Result<CustomerIdentity, Error> {
        self.gate("customer create").await?;
        let mut book = self.book.lock().unwrap();
        book.created.push(customer.clone());
        if book.customers.contains_key(&customer.email) {
            return Err(Error::UpstreamValidation(vec![
                "TAKEN: Email has already been taken".into(),
            ]));
        }
        let identity = CustomerIdentity {
            id: CustomerId(format!("gid://shop/Customer/{}", book.customers.len() + 1)),
            email: customer.email.clone(),
            first_name: Some(customer.profile.first_name.clone()),
            last_name: Some(customer.profile.last_name.clone()),
        };
        book.customers.insert(
            customer.email.clone(),
            StoredCustomer {
                identity: identity.clone(),
                password: customer.password.clone(),
            },
        );
        Ok(identity)
    }

    async fn create_access_token(&self, email: &Email, password: &str) -> Result<CustomerAccessToken, Error> {
        self.gate("access token create").await?;
        let known = self
            .book
            .lock()
            .unwrap()
            .customers
            .get(email)
            .is_some_and(|c| c.password == password);
        if !known {
            return Err(Error::UpstreamValidation(vec![
                "UNIDENTIFIED_CUSTOMER: Unidentified customer".into(),
            ]));
        }
        Ok(self.mint(email))
    }

    async fn renew_access_token(&self, access_token: &str) -> Result<CustomerAccessToken, Error> {
        self.gate("access token renew").await?;
        let email = self.book.lock().unwrap().tokens.get(access_token).cloned();
        match email {
            Some(email) => Ok(self.mint(&email)),
            None => Err(Error::UpstreamValidation(vec!["access token does not exist".into()])),
        }
    }

    async fn fetch_customer(&self, access_token: &str) -> Result<CustomerIdentity, Error> {
        self.gate("customer lookup").await?;
        if self.failing_lookups.load(Ordering::SeqCst) {
            return Err(Error::Upstream {
                operation: "customer lookup",
                status: Some(500),
                detail: "internal error".into(),
            });
        }
        let book = self.book.lock().unwrap();
        book.tokens
            .get(access_token)
            .and_then(|email| book.customers.get(email))
            .map(|c| c.identity.clone())
            .ok_or_else(|| Error::Upstream {
                operation: "customer lookup",
                status: None,
                detail: "customer not found".into(),
            })
    }
}

// ── Identity provider ──

const PROVIDER_KEY_PEM: &[u8] = include_bytes!("provider_key.pem");
const PROVIDER_KEY_N: &str = "6ps5Y9E1B_4KqKb_aYHo6AG4xER1Mt0BtZ6o9K8OL5yPYr2OEwNh2jpKNyl61YOVnzv-aw6ynHXfaBdXit3y0fLEaS5lwgcaNn3TnX5Qr9o4w1So1CDlkuSjrR5_VZ5ii4Tcogml1fknqOO6hJumXGssaSjiWCsn7P9jyzwDGPRZFWsENc0c3xpAE37es54-DxHXqeCgo30WZepbp0uBjzp4DKmg-GAv-ej7fUJTt3sPgU4OIS1gO6f-w18zYVDKISNBhBLX24Vv82EDOVa-83a4_RkWRk0Qao7WEB2fFNMYtwbtRBfn6y2FhAKZL3pyTpjUdS3lOsllbSGjyvPCew";
const PROVIDER_KID: &str = "test-key";
const CLIENT_ID: &str = "storefront";

struct ProviderState {
    base_url: String,
    key: EncodingKey,
    nonce: Mutex<String>,
    audience: Mutex<String>,
    email: Mutex<Option<String>>,
    kid: Mutex<String>,
    token_requests: AtomicUsize,
    jwks_requests: AtomicUsize,
    last_form: Mutex<HashMap<String, String>>,
}

impl ProviderState {
    fn id_token(&self, nonce: &str) -> String {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let mut claims = json!({
            "iss": self.base_url,
            "sub": "idp-user-1",
            "aud": self.audience.lock().unwrap().clone(),
            "iat": now,
            "exp": now + 3600,
            "nonce": nonce,
            "given_name": "Olive",
            "family_name": "Auth",
        });
        if let Some(email) = self.email.lock().unwrap().clone() {
            claims["email"] = json!(email);
        }
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.kid.lock().unwrap().clone());
        jsonwebtoken::encode(&header, &claims, &self.key).unwrap()
    }
}

/// Local OpenID Connect provider serving `/token` and `/jwks`.
pub(crate) struct MockProvider {
    state: Arc<ProviderState>,
}

impl MockProvider {
    pub(crate) async fn start() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(ProviderState {
            base_url: format!("http://{addr}"),
            key: EncodingKey::from_rsa_pem(PROVIDER_KEY_PEM).unwrap(),
            nonce: Mutex::new(String::new()),
            audience: Mutex::new(CLIENT_ID.into()),
            email: Mutex::new(Some("oauth@x.com".into())),
            kid: Mutex::new(PROVIDER_KID.into()),
            token_requests: AtomicUsize::new(0),
            jwks_requests: AtomicUsize::new(0),
            last_form: Mutex::new(HashMap::new()),
        });

        let app = Router::new()
            .route("/token", post(token))
            .route("/jwks", get(jwks))
            .with_state(Arc::clone(&state));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { state }
    }

    pub(crate) fn base_url(&self) -> String {
        self.state.base_url.clone()
    }

    /// Nonce embedded in identity tokens returned from `/token`.
    pub(crate) fn expect_nonce(&self, nonce: &str) {
        *self.state.nonce.lock().unwrap() = nonce.into();
    }

    pub(crate) fn id_token(&self, nonce: &str) -> String {
        self.state.id_token(nonce)
    }

    pub(crate) fn token_requests(&self) -> usize {
        self.state.token_requests.load(Ordering::SeqCst)
    }

    pub(crate) fn jwks_requests(&self) -> usize {
        self.state.jwks_requests.load(Ordering::SeqCst)
    }

    pub(crate) fn last_form(&self, key: &str) -> Option<String> {
        self.state.last_form.lock().unwrap().get(key).cloned()
    }

    pub(crate) fn set_audience(&self, audience: &str) {
        *self.state.audience.lock().unwrap() = audience.into();
    }

    pub(crate) fn set_email(&self, email: Option<&str>) {
        *self.state.email.lock().unwrap() = email.map(str::to_string);
    }

    pub(crate) fn set_kid(&self, kid: &str) {
        *self.state.kid.lock().unwrap() = kid.into();
    }
}

async fn token(
    State(state): State<Arc<ProviderState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    state.token_requests.fetch_add(1, Ordering::SeqCst);
    *state.last_form.lock().unwrap() = form.clone();

    let grant = form.get("grant_type").map(String::as_str);
    let (access_token, refresh_token) = match grant {
        Some("authorization_code") if form.get("code").is_some_and(|c| c == "good-code") => {
            ("provider-access-token", "provider-refresh-token")
        }
        Some("refresh_token")
            if form
                .get("refresh_token")
                .is_some_and(|t| t == "provider-refresh-token") =>
        {
            ("provider-access-token-2", "provider-refresh-token-2")
        }
        _ => {
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": "invalid_grant" })))
                .into_response();
        }
    };

    // Refresh grants answer with an identity token that carries no nonce.
    let nonce = match grant {
        Some("authorization_code") => state.nonce.lock().unwrap().clone(),
        _ => String::new(),
    };
    Json(json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": 3600,
        "refresh_token": refresh_token,
        "id_token": state.id_token(&nonce),
    }))
    .into_response()
}

async fn jwks(State(state): State<Arc<ProviderState>>) -> Json<serde_json::Value> {
    state.jwks_requests.fetch_add(1, Ordering::SeqCst);
    Json(json!({
        "keys": [{
            "kty": "RSA",
            "use": "sig",
            "alg": "RS256",
            "kid": PROVIDER_KID,
            "n": PROVIDER_KEY_N,
            "e": "AQAB",
        }]
    }))
}

/// Client configuration pointing every endpoint at `base`.
pub(crate) fn test_oauth_config(base: &str) -> OAuthConfig {
    let endpoint = |path: &str| -> Url { format!("{base}{path}").parse().unwrap() };
    OAuthConfig::new(
        CLIENT_ID,
        "https://shop.example.com/api/auth/callback".parse().unwrap(),
        base,
        ProviderEndpoints::new(endpoint("/authorize"), endpoint("/token"), endpoint("/jwks")),
    )
}
