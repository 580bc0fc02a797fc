// sync-core/src/clock.rs
//! C1: named time-zone resolution and source/UTC/target conversions.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::warn;

/// Resolves a named zone (IANA or a handful of common platform aliases),
/// falling back to the host's local offset with a warning rather than
/// failing the cycle.
#[derive(Debug, Clone)]
pub struct ZoneResolver {
    host_local: Tz,
}

impl ZoneResolver {
    pub fn new(host_local: Tz) -> Self {
        Self { host_local }
    }

    /// Resolves `name` (e.g. `"Europe/Berlin"`, or a Windows-style name
    /// like `"W. Europe Standard Time"`) to a [`Tz`]. Unknown names fall
    /// back to the host-local zone.
    pub fn resolve(&self, name: &str) -> Tz {
        if name.trim().is_empty() {
            return self.host_local;
        }
        if let Ok(tz) = name.parse::<Tz>() {
            return tz;
        }
        if let Some(tz) = platform_alias(name) {
            return tz;
        }
        warn!(zone = name, "unknown time zone, falling back to host local");
        self.host_local
    }
}

/// A handful of common Windows time-zone names mapped to IANA
/// equivalents; sources exposing Windows-style zone identifiers are
/// common enough to warrant a short table rather than failing outright.
fn platform_alias(name: &str) -> Option<Tz> {
    let iana = match name {
        "W. Europe Standard Time" => "Europe/Berlin",
        "GMT Standard Time" => "Europe/London",
        "Eastern Standard Time" => "America/New_York",
        "Pacific Standard Time" => "America/Los_Angeles",
        "Central European Standard Time" => "Europe/Warsaw",
        "UTC" => "UTC",
        _ => return None,
    };
    iana.parse().ok()
}

/// Converts a naive (tag-free) wall-clock time in `zone` to UTC.
pub fn local_to_utc(local: NaiveDateTime, zone: Tz) -> DateTime<Utc> {
    zone.from_local_datetime(&local)
        .single()
        .unwrap_or_else(|| zone.from_utc_datetime(&local))
        .with_timezone(&Utc)
}

/// Converts a UTC instant to a naive wall-clock time in `zone`.
pub fn utc_to_local(utc: DateTime<Utc>, zone: Tz) -> NaiveDateTime {
    utc.with_timezone(&zone).naive_local()
}

/// Absolute difference between two naive wall-clock times, used for the
/// alignment tolerance checks in the normalizer.
pub fn naive_diff_abs(a: NaiveDateTime, b: NaiveDateTime) -> chrono::Duration {
    let d = a - b;
    if d < chrono::Duration::zero() {
        -d
    } else {
        d
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn resolves_known_iana_zone() {
        let resolver = ZoneResolver::new(chrono_tz::UTC);
        assert_eq!(resolver.resolve("Europe/Berlin"), chrono_tz::Europe::Berlin);
    }

    #[test]
    fn resolves_platform_alias() {
        let resolver = ZoneResolver::new(chrono_tz::UTC);
        assert_eq!(resolver.resolve("W. Europe Standard Time"), chrono_tz::Europe::Berlin);
    }

    #[test]
    fn falls_back_to_host_local_on_unknown_zone() {
        let resolver = ZoneResolver::new(chrono_tz::Europe::Paris);
        assert_eq!(resolver.resolve("Not/AZone"), chrono_tz::Europe::Paris);
    }

    #[test]
    fn empty_name_falls_back_to_host_local() {
        let resolver = ZoneResolver::new(chrono_tz::Europe::Paris);
        assert_eq!(resolver.resolve(""), chrono_tz::Europe::Paris);
    }

    #[test]
    fn round_trips_within_tolerance() {
        let local = NaiveDate::from_ymd_opt(2025, 2, 3).unwrap().and_hms_opt(9, 0, 0).unwrap();
        let zone = chrono_tz::Europe::Berlin;
        let utc = local_to_utc(local, zone);
        let back = utc_to_local(utc, zone);
        assert_eq!(naive_diff_abs(local, back), chrono::Duration::zero());
    }
}
