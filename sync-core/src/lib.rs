//! The sync domain: clock/zone resolution, UID construction, the source
//! bridge, recurrence expansion, normalization, iCal encoding, the
//! CalDAV reconciler, and the supervisor loop that ties them together.

pub mod bridge;
pub mod clock;
pub mod error;
pub mod ical;
pub mod normalize;
pub mod reconciler;
pub mod recurrence;
pub mod supervisor;
pub mod tray;
pub mod uid;

pub use error::SyncError;
