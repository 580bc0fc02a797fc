// sync-core/src/error.rs
use caldav_proto::DavError;
use thiserror::Error;

/// The cycle-level error taxonomy. The supervisor matches on these
/// variants to decide whether to surface an auth modal, log and move on,
/// or unwind the cycle silently.
#[derive(Debug, Error)]
pub enum SyncError {
    /// CalDAV returned 401/403.
    #[error("authentication rejected by destination")]
    AuthFailure,

    /// A cancellation scope fired; carries whether this was a full
    /// service stop (vs. a per-cycle cancel such as a triggered resync).
    #[error("cancelled ({0})")]
    Cancelled(CancelReason),

    /// The source fetch exceeded its deadline.
    #[error("source fetch timed out")]
    TimedOut,

    /// The source automation host could not be attached after all
    /// retries. Callers must *not* treat this the same as "empty
    /// calendar" — see [`crate::reconciler::DesiredSet::NoData`].
    #[error("source host unavailable")]
    HostUnavailable,

    /// A non-auth HTTP failure that persisted through the one retry.
    #[error("transient network failure: {0}")]
    TransientNetwork(String),

    /// A PROPFIND response or an iCal body could not be parsed.
    #[error("parse failure: {0}")]
    ParseFailure(String),

    /// Inconsistent timestamps or duplicate signatures detected while
    /// materializing events.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    ServiceStop,
    PerCycle,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelReason::ServiceStop => write!(f, "service stop"),
            CancelReason::PerCycle => write!(f, "per-cycle cancel"),
        }
    }
}

impl From<DavError> for SyncError {
    fn from(e: DavError) -> Self {
        match e {
            DavError::Auth { .. } => SyncError::AuthFailure,
            DavError::Transient(msg) => SyncError::TransientNetwork(msg),
            DavError::Parse(msg) => SyncError::ParseFailure(msg),
            DavError::Cancelled => SyncError::Cancelled(CancelReason::PerCycle),
        }
    }
}
