//! Wire-level CalDAV/WebDAV plumbing.
//!
//! This crate knows HTTP, Basic auth, PROPFIND/PUT/GET/DELETE, and
//! multistatus XML. It has no idea what an event, a recurrence, or a
//! managed UID is — that domain knowledge lives one layer up.

pub mod client;
pub mod error;
pub mod multistatus;
pub mod transport;

pub use client::CalDavClient;
pub use error::DavError;
pub use multistatus::{parse_ctag, parse_multistatus, ResourceStatus};
pub use transport::{CalDavTransport, HyperTransport, RawResponse};
