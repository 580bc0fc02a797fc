// sync-core/src/uid.rs
//! C2: deterministic managed-UID construction and classification.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Builds the managed UID for an occurrence.
///
/// Shape: `{source_id-}outlook-{sha256_hex(global_id)}-{YYYYMMDDTHHMMSSZ}`.
/// An empty `global_id` still digests to a stable all-zero-input hash
/// rather than panicking or omitting the segment.
pub fn build_uid(source_id: &str, global_id: &str, start_utc: DateTime<Utc>) -> String {
    let digest = hex::encode(Sha256::digest(global_id.as_bytes()));
    let suffix = start_utc.format("%Y%m%dT%H%M%SZ");
    if source_id.is_empty() {
        format!("outlook-{digest}-{suffix}")
    } else {
        format!("{source_id}-outlook-{digest}-{suffix}")
    }
}

/// Decides whether `uid` is managed by this instance.
///
/// The bare `source_id + "-"` fallback named as an open question in the
/// design notes is deliberately **not** applied here — see `DESIGN.md`
/// for the rationale. Only the three safe prefixes are checked.
pub fn is_managed(uid: &str, source_id: &str) -> bool {
    let trimmed = uid.trim().to_ascii_lowercase();
    let source_id = source_id.to_ascii_lowercase();

    if !source_id.is_empty() && trimmed.starts_with(&format!("{source_id}-outlook-")) {
        return true;
    }
    trimmed.starts_with("-outlook-") || trimmed.starts_with("outlook-")
}
