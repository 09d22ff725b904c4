use serde::{Deserialize, Serialize};

use crate::session::SessionToken;
use crate::types::{CustomerId, Email, OtpPurpose};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct OtpRequestBody {
    pub(super) email: String,
    #[serde(rename = "type")]
    pub(super) purpose: OtpPurpose,
    #[serde(default)]
    pub(super) first_name: Option<String>,
    #[serde(default)]
    pub(super) last_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct OtpVerifyBody {
    pub(super) email: String,
    pub(super) code: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct PasswordLoginBody {
    pub(super) email: String,
    pub(super) password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct RegisterBody {
    pub(super) email: String,
    pub(super) password: String,
    pub(super) first_name: String,
    pub(super) last_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct OtpIssuedBody {
    pub(super) sent: bool,
    /// Seconds until the code expires.
    pub(super) expires_in: i64,
}

/// Public view of a signed-in customer. Tokens never leave the cookie.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CustomerView {
    pub(super) id: CustomerId,
    pub(super) email: Email,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) last_name: Option<String>,
}

impl From<&SessionToken> for CustomerView {
    fn from(session: &SessionToken) -> Self {
        Self {
            id: session.customer_id.clone(),
            email: session.email.clone(),
            first_name: session.first_name.clone(),
            last_name: session.last_name.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct SignedInBody {
    pub(super) customer: CustomerView,
}

impl From<&SessionToken> for SignedInBody {
    fn from(session: &SessionToken) -> Self {
        Self {
            customer: session.into(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct PasswordResetBody {
    pub(super) needs_password_reset: bool,
    pub(super) email: Email,
}

#[derive(Debug, Serialize)]
pub(super) struct SessionBody {
    pub(super) authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) customer: Option<CustomerView>,
}
