use std::future::Future;

use time::OffsetDateTime;

use crate::customer::{CustomerAccessToken, CustomerIdentity, NewCustomer};
use crate::error::Error;
use crate::otp::OtpRecord;
use crate::types::{Email, OtpCode, OtpPurpose};

/// Upstream commerce platform customer API.
///
/// [`StorefrontApi`](crate::customer::StorefrontApi) talks to the real
/// GraphQL endpoint; tests substitute an in-memory implementation.
pub trait CustomerApi: Send + Sync + 'static {
    /// Create a customer account.
    ///
    /// Rejected fields (duplicate email, weak password) come back as
    /// [`Error::UpstreamValidation`].
    fn create_customer(
        &self,
        customer: &NewCustomer,
    ) -> impl Future<Output = Result<CustomerIdentity, Error>> + Send;

    /// Exchange email + password for a customer access token.
    ///
    /// Unknown customers and wrong passwords come back as
    /// [`Error::UpstreamValidation`].
    fn create_access_token(
        &self,
        email: &Email,
        password: &str,
    ) -> impl Future<Output = Result<CustomerAccessToken, Error>> + Send;

    /// Extend a customer access token's lifetime.
    fn renew_access_token(
        &self,
        access_token: &str,
    ) -> impl Future<Output = Result<CustomerAccessToken, Error>> + Send;

    /// Look up the customer an access token belongs to.
    fn fetch_customer(
        &self,
        access_token: &str,
    ) -> impl Future<Output = Result<CustomerIdentity, Error>> + Send;
}

/// Shared TTL store behind the one-time code flow.
///
/// One record per email. Implementations must make [`take_if_valid`]
/// a single atomic compare-and-delete: of two concurrent calls with the
/// right code, exactly one may observe the record.
///
/// [`take_if_valid`]: OtpCache::take_if_valid
pub trait OtpCache: Send + Sync + 'static {
    /// Store `record`, replacing any outstanding record for the same email.
    fn put(&self, record: OtpRecord) -> impl Future<Output = Result<(), Error>> + Send;

    /// Remove and return the record for `email` if its code equals `code`
    /// and it has not expired at `now`. An expired record is removed and
    /// `None` returned.
    fn take_if_valid(
        &self,
        email: &Email,
        code: &OtpCode,
        now: OffsetDateTime,
    ) -> impl Future<Output = Result<Option<OtpRecord>, Error>> + Send;
}

/// Out-of-band delivery of one-time codes.
pub trait OtpMailer: Send + Sync + 'static {
    fn send_code(
        &self,
        email: &Email,
        code: &OtpCode,
        purpose: OtpPurpose,
    ) -> impl Future<Output = Result<(), Error>> + Send;
}
