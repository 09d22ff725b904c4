use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Number of digits in a one-time code.
pub const OTP_LENGTH: usize = 6;

/// Normalized customer email address (trimmed, lowercased).
///
/// Holding an `Email` proves the address passed the shape check; OTP records
/// are keyed by it, so `" New@X.com "` and `"new@x.com"` share one slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Email(String);

impl Email {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Email {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Email {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s.to_owned())
    }
}

impl TryFrom<String> for Email {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        let normalized = s.trim().to_lowercase();
        let valid = normalized.len() <= 254
            && !normalized.chars().any(char::is_whitespace)
            && matches!(
                normalized.split_once('@'),
                Some((local, domain))
                    if !local.is_empty()
                        && !domain.contains('@')
                        && domain.contains('.')
                        && !domain.starts_with('.')
                        && !domain.ends_with('.')
            );
        if valid {
            Ok(Self(normalized))
        } else {
            Err(Error::Validation(format!("invalid email: {s}")))
        }
    }
}

impl From<Email> for String {
    fn from(e: Email) -> Self {
        e.0
    }
}

/// Fixed-length numeric one-time code.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OtpCode(String);

impl OtpCode {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn from_number(n: u32) -> Self {
        Self(format!("{n:0width$}", width = OTP_LENGTH))
    }
}

// Codes are secrets; keep them out of debug output and logs.
impl std::fmt::Debug for OtpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("OtpCode(******)")
    }
}

impl std::str::FromStr for OtpCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s.to_owned())
    }
}

impl TryFrom<String> for OtpCode {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        let s = s.trim();
        if s.len() == OTP_LENGTH && s.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(s.to_owned()))
        } else {
            Err(Error::Validation("code must be 6 digits".into()))
        }
    }
}

impl From<OtpCode> for String {
    fn from(c: OtpCode) -> Self {
        c.0
    }
}

/// Upstream customer identifier (opaque, owned by the commerce platform).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct CustomerId(pub String);

/// What a one-time code was requested for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OtpPurpose {
    Login,
    Signup,
}

/// Name fields collected at signup, held until the code is verified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingProfile {
    pub first_name: String,
    pub last_name: String,
}

impl PendingProfile {
    /// Builds a profile, rejecting blank names.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if either name is empty after trimming.
    pub fn new(first_name: &str, last_name: &str) -> Result<Self, Error> {
        let (first_name, last_name) = (first_name.trim(), last_name.trim());
        if first_name.is_empty() || last_name.is_empty() {
            return Err(Error::Validation(
                "firstName and lastName are required".into(),
            ));
        }
        Ok(Self {
            first_name: first_name.to_owned(),
            last_name: last_name.to_owned(),
        })
    }
}
