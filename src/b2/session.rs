//! Authorized session state
//!
//! A [`Session`] is built once per successful `b2_authorize_account` call and
//! is never mutated afterwards. Re-authenticating produces a new value; the
//! old one is dropped. Concurrent part uploads share it behind an `Arc`.

use super::types::AuthorizeAccountResponse;

/// Short-lived access to the API, plus the part-size bounds negotiated for it
#[derive(Debug, Clone)]
pub struct Session {
    pub account_id: String,
    pub auth_token: String,
    pub api_url: String,
    pub download_url: String,
    /// Smallest part the backend accepts
    pub min_part_size: u64,
    /// Part size the backend suggests
    pub recommended_part_size: u64,
    /// Largest part this process is willing to hold in memory
    pub max_part_size: u64,
    /// Working part size: recommended, clamped into `[min, max]`
    pub part_size: u64,
}

impl Session {
    /// Build a session from an authorization response.
    ///
    /// The backend minimum wins over the configured maximum when the two
    /// conflict, since parts below the minimum are rejected outright.
    pub fn from_authorization(auth: AuthorizeAccountResponse, max_part_size: u64) -> Self {
        let part_size = auth
            .recommended_part_size
            .min(max_part_size)
            .max(auth.absolute_minimum_part_size)
            .max(1);

        Self {
            account_id: auth.account_id,
            auth_token: auth.authorization_token,
            api_url: auth.api_url.trim_end_matches('/').to_string(),
            download_url: auth.download_url.trim_end_matches('/').to_string(),
            min_part_size: auth.absolute_minimum_part_size,
            recommended_part_size: auth.recommended_part_size,
            max_part_size,
            part_size,
        }
    }
}

/// Destination bucket, confirmed to exist for the session's account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    pub id: String,
    pub name: String,
}
