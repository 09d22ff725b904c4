//! Passwordless one-time codes keyed by email.
//!
//! Issuing a code for an email that already has one outstanding replaces it:
//! the earlier code stops working without any "already pending" error. A
//! verified code is deleted in the same step that matches it, so each code
//! signs in at most once.

use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::error::Error;
use crate::traits::{OtpCache, OtpMailer};
use crate::types::{Email, OTP_LENGTH, OtpCode, OtpPurpose, PendingProfile};

/// How long an issued code stays redeemable.
pub const OTP_TTL: Duration = Duration::minutes(10);

/// An outstanding one-time code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpRecord {
    pub email: Email,
    pub code: OtpCode,
    #[serde(rename = "type")]
    pub purpose: OtpPurpose,
    #[serde(default)]
    pub pending_profile: Option<PendingProfile>,
    #[serde(with = "time::serde::rfc3339")]
    pub issued_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl OtpRecord {
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now > self.expires_at
    }
}

/// Issues and redeems one-time codes.
pub struct OtpStore<K, M> {
    cache: K,
    mailer: M,
    ttl: Duration,
}

impl<K: OtpCache, M: OtpMailer> OtpStore<K, M> {
    #[must_use]
    pub fn new(cache: K, mailer: M) -> Self {
        Self {
            cache,
            mailer,
            ttl: OTP_TTL,
        }
    }

    /// Override the code lifetime (default: 10 minutes).
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Issue a fresh code for `email` and hand it to the mailer.
    ///
    /// Signup codes must carry the profile the account will be created with.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] for a signup request without a profile.
    /// - [`Error::Delivery`] if the mailer fails. The record stays stored, so
    ///   a code that did reach the customer still verifies.
    pub async fn issue(
        &self,
        email: &Email,
        purpose: OtpPurpose,
        pending_profile: Option<PendingProfile>,
    ) -> Result<OtpCode, Error> {
        if purpose == OtpPurpose::Signup && pending_profile.is_none() {
            return Err(Error::Validation(
                "firstName and lastName are required for signup".into(),
            ));
        }

        let issued_at = OffsetDateTime::now_utc();
        let code = generate_code();
        let record = OtpRecord {
            email: email.clone(),
            code: code.clone(),
            purpose,
            pending_profile,
            issued_at,
            expires_at: issued_at + self.ttl,
        };
        self.cache.put(record).await?;

        if let Err(e) = self.mailer.send_code(email, &code, purpose).await {
            tracing::warn!(email = %email, error = %e, "One-time code delivery failed");
            return Err(match e {
                Error::Delivery(_) => e,
                other => Error::Delivery(other.to_string()),
            });
        }

        tracing::info!(email = %email, purpose = ?purpose, "One-time code issued");
        Ok(code)
    }

    /// Redeem `code` for `email`.
    ///
    /// Returns `None` when there is no record, the code differs, or the
    /// record has expired. These cases are deliberately indistinguishable.
    ///
    /// # Errors
    ///
    /// Only cache backend failures surface as errors.
    pub async fn verify(&self, email: &Email, code: &OtpCode) -> Result<Option<OtpRecord>, Error> {
        self.verify_at(email, code, OffsetDateTime::now_utc()).await
    }

    pub(crate) async fn verify_at(
        &self,
        email: &Email,
        code: &OtpCode,
        now: OffsetDateTime,
    ) -> Result<Option<OtpRecord>, Error> {
        let record = self.cache.take_if_valid(email, code, now).await?;
        if record.is_none() {
            tracing::debug!(email = %email, "One-time code rejected");
        }
        Ok(record)
    }
}

fn generate_code() -> OtpCode {
    let upper = 10u32.pow(OTP_LENGTH as u32);
    OtpCode::from_number(rand::rng().random_range(0..upper))
}

/// Single-process [`OtpCache`].
///
/// Each email hashes to one shard of the map and `remove_if` holds that
/// shard's write lock across the comparison and the removal.
#[derive(Debug, Default)]
pub struct MemoryOtpCache {
    records: DashMap<Email, OtpRecord>,
}

impl MemoryOtpCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl OtpCache for MemoryOtpCache {
    async fn put(&self, record: OtpRecord) -> Result<(), Error> {
        self.records.insert(record.email.clone(), record);
        Ok(())
    }

    async fn take_if_valid(
        &self,
        email: &Email,
        code: &OtpCode,
        now: OffsetDateTime,
    ) -> Result<Option<OtpRecord>, Error> {
        if let Some((_, record)) = self
            .records
            .remove_if(email, |_, r| !r.is_expired_at(now) && r.code == *code)
        {
            return Ok(Some(record));
        }
        self.records.remove_if(email, |_, r| r.is_expired_at(now));
        Ok(None)
    }
}

/// Development mailer that writes codes to the log instead of sending email.
///
/// The code itself is only logged at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

impl OtpMailer for LogMailer {
    async fn send_code(&self, email: &Email, code: &OtpCode, purpose: OtpPurpose) -> Result<(), Error> {
        tracing::info!(email = %email, purpose = ?purpose, "One-time code issued via log mailer");
        tracing::debug!(email = %email, code = code.as_str(), "One-time code (not delivered)");
        Ok(())
    }
}
