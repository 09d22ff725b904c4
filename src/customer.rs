//! Commerce platform customer API over GraphQL.
//!
//! Responses are decoded into typed structures at this boundary. A response
//! missing a required field (customer id, a well-formed email, token expiry)
//! is treated as an upstream failure rather than passed along half-filled.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use time::OffsetDateTime;
use url::Url;

use crate::error::Error;
use crate::oauth::{default_http_client, ensure_success};
use crate::traits::CustomerApi;
use crate::types::{CustomerId, Email, PendingProfile};

/// Header carrying the storefront API access token.
pub const STOREFRONT_TOKEN_HEADER: &str = "X-Shopify-Storefront-Access-Token";

/// Upstream canonical customer record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerIdentity {
    pub id: CustomerId,
    pub email: Email,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

/// Input for creating a customer upstream.
#[derive(Debug, Clone)]
pub struct NewCustomer {
    pub email: Email,
    pub password: String,
    pub profile: PendingProfile,
}

/// Customer access token issued by the commerce platform.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerAccessToken {
    pub access_token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

const CUSTOMER_CREATE: &str = "\
mutation customerCreate($input: CustomerCreateInput!) {
  customerCreate(input: $input) {
    customer { id email firstName lastName }
    customerUserErrors { code field message }
  }
}";

const ACCESS_TOKEN_CREATE: &str = "\
mutation customerAccessTokenCreate($input: CustomerAccessTokenCreateInput!) {
  customerAccessTokenCreate(input: $input) {
    customerAccessToken { accessToken expiresAt }
    customerUserErrors { code field message }
  }
}";

const ACCESS_TOKEN_RENEW: &str = "\
mutation customerAccessTokenRenew($customerAccessToken: String!) {
  customerAccessTokenRenew(customerAccessToken: $customerAccessToken) {
    customerAccessToken { accessToken expiresAt }
    userErrors { field message }
  }
}";

const CUSTOMER_QUERY: &str = "\
query customer($customerAccessToken: String!) {
  customer(customerAccessToken: $customerAccessToken) { id email firstName lastName }
}";

#[derive(Deserialize)]
struct GraphqlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Deserialize)]
struct GraphqlError {
    message: String,
}

#[derive(Deserialize)]
struct UserError {
    #[serde(default)]
    code: Option<String>,
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CustomerCreateData {
    customer_create: CustomerCreatePayload,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CustomerCreatePayload {
    customer: Option<CustomerIdentity>,
    #[serde(default)]
    customer_user_errors: Vec<UserError>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccessTokenCreateData {
    customer_access_token_create: AccessTokenPayload,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccessTokenRenewData {
    customer_access_token_renew: AccessTokenPayload,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccessTokenPayload {
    customer_access_token: Option<CustomerAccessToken>,
    #[serde(default, alias = "userErrors")]
    customer_user_errors: Vec<UserError>,
}

#[derive(Deserialize)]
struct CustomerData {
    customer: Option<CustomerIdentity>,
}

/// GraphQL client for the storefront customer API.
pub struct StorefrontApi {
    endpoint: Url,
    access_token: String,
    http: reqwest::Client,
}

impl StorefrontApi {
    #[must_use]
    pub fn new(endpoint: Url, access_token: impl Into<String>) -> Self {
        Self {
            endpoint,
            access_token: access_token.into(),
            http: default_http_client(),
        }
    }

    /// Create the client from environment variables.
    ///
    /// # Required env vars
    /// - `STOREFRONT_API_URL`: GraphQL endpoint
    /// - `STOREFRONT_API_TOKEN`: storefront access token
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable is missing or the URL is invalid.
    pub fn from_env() -> Result<Self, Error> {
        let endpoint = std::env::var("STOREFRONT_API_URL")
            .map_err(|_| Error::Config("STOREFRONT_API_URL is required".into()))?;
        let endpoint: Url = endpoint
            .parse()
            .map_err(|e| Error::Config(format!("STOREFRONT_API_URL: {e}")))?;
        let token = std::env::var("STOREFRONT_API_TOKEN")
            .map_err(|_| Error::Config("STOREFRONT_API_TOKEN is required".into()))?;
        Ok(Self::new(endpoint, token))
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: JsonValue,
        operation: &'static str,
    ) -> Result<T, Error> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .header(STOREFRONT_TOKEN_HEADER, &self.access_token)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .map_err(|e| Error::transport(operation, e))?;

        let response = ensure_success(response, operation).await?;
        let body = response
            .text()
            .await
            .map_err(|e| Error::transport(operation, e))?;
        let parsed: GraphqlResponse<T> = serde_json::from_str(&body).map_err(|e| Error::Upstream {
            operation,
            status: None,
            detail: format!("malformed response: {e}"),
        })?;

        if !parsed.errors.is_empty() {
            let detail = parsed
                .errors
                .into_iter()
                .map(|e| e.message)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(Error::Upstream {
                operation,
                status: None,
                detail,
            });
        }
        parsed.data.ok_or_else(|| Error::Upstream {
            operation,
            status: None,
            detail: "response without data".into(),
        })
    }
}

fn reject_user_errors(errors: Vec<UserError>) -> Result<(), Error> {
    if errors.is_empty() {
        return Ok(());
    }
    Err(Error::UpstreamValidation(
        errors
            .into_iter()
            .map(|e| match e.code {
                Some(code) => format!("{code}: {}", e.message),
                None => e.message,
            })
            .collect(),
    ))
}

fn missing(operation: &'static str, what: &str) -> Error {
    Error::Upstream {
        operation,
        status: None,
        detail: format!("response without {what}"),
    }
}

fn token_from(payload: AccessTokenPayload, operation: &'static str) -> Result<CustomerAccessToken, Error> {
    reject_user_errors(payload.customer_user_errors)?;
    payload
        .customer_access_token
        .ok_or_else(|| missing(operation, "customerAccessToken"))
}

impl CustomerApi for StorefrontApi {
    async fn create_customer(&self, customer: &NewCustomer) -> Result<CustomerIdentity, Error> {
        let variables = json!({
            "input": {
                "email": customer.email.as_str(),
                "password": customer.password,
                "firstName": customer.profile.first_name,
                "lastName": customer.profile.last_name,
            }
        });
        let data: CustomerCreateData = self
            .execute(CUSTOMER_CREATE, variables, "customer create")
            .await?;
        let payload = data.customer_create;
        reject_user_errors(payload.customer_user_errors)?;
        payload
            .customer
            .ok_or_else(|| missing("customer create", "customer"))
    }

    async fn create_access_token(&self, email: &Email, password: &str) -> Result<CustomerAccessToken, Error> {
        let variables = json!({ "input": { "email": email.as_str(), "password": password } });
        let data: AccessTokenCreateData = self
            .execute(ACCESS_TOKEN_CREATE, variables, "access token create")
            .await?;
        token_from(data.customer_access_token_create, "access token create")
    }

    async fn renew_access_token(&self, access_token: &str) -> Result<CustomerAccessToken, Error> {
        let variables = json!({ "customerAccessToken": access_token });
        let data: AccessTokenRenewData = self
            .execute(ACCESS_TOKEN_RENEW, variables, "access token renew")
            .await?;
        token_from(data.customer_access_token_renew, "access token renew")
    }

    async fn fetch_customer(&self, access_token: &str) -> Result<CustomerIdentity, Error> {
        let variables = json!({ "customerAccessToken": access_token });
        let data: CustomerData = self
            .execute(CUSTOMER_QUERY, variables, "customer lookup")
            .await?;
        data.customer
            .ok_or_else(|| missing("customer lookup", "customer"))
    }
}
