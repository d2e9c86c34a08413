//! Error taxonomy for the distribution client.
//!
//! The variants mirror the kinds of failure the OCI distribution spec
//! actually distinguishes (see the registry error codes and the HTTP status
//! table), not an open-ended wrapper around every crate this library pulls
//! in.

use crate::descriptor::Descriptor;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// 404 from any endpoint except the referrers-probe's not-supported 404.
    #[error("not found: {0}")]
    NotFound(String),

    /// Digest mismatch, size mismatch, missing required header, malformed
    /// Link, malformed redirect Location, oversized metadata body.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Non-2xx/3xx statuses, network errors, cancellation.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// Syntactic errors in reference strings or digests.
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    /// Attempt to transition `ReferrersState` to a different terminal value.
    #[error("referrers state already set to a different value")]
    StateAlreadySet,

    /// HTTP client followed a redirect when auto-redirect was requested
    /// disabled, or a required field was left empty.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Optional capability requested where not applicable.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Push collision signalled by a downstream store.
    #[error("already exists: {0:?}")]
    AlreadyExists(Descriptor),

    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Url(#[from] url::ParseError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Classifies a non-2xx/3xx response body. A `404` is `NotFound` here
    /// regardless of the error code it carries — `NAME_UNKNOWN` only
    /// distinguishes "missing repository" from "Referrers API absent" on
    /// the referrers probe, and that special case lives entirely in
    /// `referrers.rs::ensure_probed`, not here.
    pub fn registry_error_body(status: reqwest::StatusCode, body: &[u8]) -> Self {
        let message = match serde_json::from_slice::<crate::descriptor::ErrorResponse>(body) {
            Ok(resp) => resp.to_string(),
            Err(_) => String::from_utf8_lossy(body).to_string(),
        };
        if status == reqwest::StatusCode::NOT_FOUND {
            Error::NotFound(message)
        } else {
            Error::TransportFailure(format!("{status}: {message}"))
        }
    }
}

/// Whether a registry error body's `errors[].code` contains `NAME_UNKNOWN`
/// — the signal that distinguishes "repository doesn't exist" from "this
/// endpoint isn't implemented" on an otherwise-ambiguous 404 (spec.md §4.6).
pub fn body_has_name_unknown(body: &[u8]) -> bool {
    serde_json::from_slice::<crate::descriptor::ErrorResponse>(body)
        .map(|resp| resp.errors.iter().any(|e| e.code == "NAME_UNKNOWN"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_404_is_not_found_regardless_of_error_code() {
        let body = br#"{"errors":[{"code":"MANIFEST_UNKNOWN","message":"not found"}]}"#;
        assert!(matches!(
            Error::registry_error_body(reqwest::StatusCode::NOT_FOUND, body),
            Error::NotFound(_)
        ));
    }

    #[test]
    fn a_404_with_name_unknown_is_still_not_found() {
        let body = br#"{"errors":[{"code":"NAME_UNKNOWN","message":"repo not found"}]}"#;
        assert!(matches!(
            Error::registry_error_body(reqwest::StatusCode::NOT_FOUND, body),
            Error::NotFound(_)
        ));
    }

    #[test]
    fn a_404_with_unparsable_body_is_still_not_found() {
        assert!(matches!(
            Error::registry_error_body(reqwest::StatusCode::NOT_FOUND, b"not json"),
            Error::NotFound(_)
        ));
    }

    #[test]
    fn a_non_404_status_is_a_transport_failure() {
        let body = br#"{"errors":[{"code":"DENIED","message":"no"}]}"#;
        assert!(matches!(
            Error::registry_error_body(reqwest::StatusCode::FORBIDDEN, body),
            Error::TransportFailure(_)
        ));
    }
}
