// caldav-proto/src/error.rs
use thiserror::Error;

/// Failure modes distinguished at the wire-protocol boundary.
///
/// Callers above this crate match on these variants to decide retry vs.
/// abort; everything below this layer is collapsed into one of them
/// rather than leaking transport-specific error types upward.
#[derive(Debug, Error)]
pub enum DavError {
    /// HTTP 401/403 — never retried, always propagated.
    #[error("authentication rejected by server (status {status})")]
    Auth { status: u16 },

    /// Any other non-2xx status, or a connection-level failure.
    #[error("transient failure: {0}")]
    Transient(String),

    /// PROPFIND multistatus body or iCal body could not be parsed.
    #[error("failed to parse response body: {0}")]
    Parse(String),

    #[error("request was cancelled")]
    Cancelled,
}

impl DavError {
    pub fn from_status(status: u16, body_snippet: impl Into<String>) -> Self {
        if status == 401 || status == 403 {
            DavError::Auth { status }
        } else {
            DavError::Transient(format!("HTTP {status}: {}", body_snippet.into()))
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, DavError::Auth { .. })
    }
}
