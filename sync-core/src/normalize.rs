// sync-core/src/normalize.rs
//! C5: consolidates raw appointments/occurrences into atomic `Event`
//! records with consistent UTC/local timestamps, all-day inference, and
//! per-day chunking of multi-day all-day items.

use std::collections::HashSet;

use chrono::{DateTime, Datelike, Duration, NaiveDateTime, Timelike, Utc};
use chrono_tz::Tz;
use tracing::warn;

use crate::clock::{local_to_utc, naive_diff_abs, utc_to_local};

const MISMATCH_TOLERANCE_SECS: i64 = 60;
const ALL_DAY_SPAN_HOURS: i64 = 23;

/// An atomic, post-expansion event ready for encoding.
#[derive(Debug, Clone)]
pub struct Event {
    pub subject: String,
    pub body: String,
    pub location: String,
    pub start_local: NaiveDateTime,
    pub end_local: NaiveDateTime,
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
    pub global_id: String,
    pub is_all_day: bool,
}

/// One pre-normalization candidate: either a plain appointment or an
/// expanded occurrence, already carrying whatever local/UTC times the
/// source gave it (either may be absent).
pub struct RawTimes {
    pub start_local: Option<NaiveDateTime>,
    pub end_local: Option<NaiveDateTime>,
    pub start_utc: Option<DateTime<Utc>>,
    pub end_utc: Option<DateTime<Utc>>,
    pub source_flagged_all_day: bool,
}

#[derive(Debug)]
pub struct NormalizeOutcome {
    pub events: Vec<Event>,
    pub dropped_invariant_violations: u32,
    pub mismatches_logged: u32,
}

/// Normalizes one candidate's times, returning `None` (with a warning)
/// when neither local nor UTC times are present.
fn normalize_times(
    raw: &RawTimes,
    source_zone: Tz,
    target_zone: Tz,
) -> Option<(NaiveDateTime, NaiveDateTime, DateTime<Utc>, DateTime<Utc>)> {
    let (start_local, start_utc) = reconcile_pair(raw.start_local, raw.start_utc, source_zone)?;
    let (end_local, end_utc) = reconcile_pair(raw.end_local, raw.end_utc, source_zone)?;

    if source_zone.name() == target_zone.name() {
        let target_local = utc_to_local(start_utc, target_zone);
        if naive_diff_abs(start_local, target_local) > Duration::seconds(MISMATCH_TOLERANCE_SECS) {
            warn!(
                source_local = %start_local,
                target_local = %target_local,
                "source/target zone alignment mismatch"
            );
        }
    }

    Some((start_local, end_local, start_utc, end_utc))
}

fn reconcile_pair(
    local: Option<NaiveDateTime>,
    utc: Option<DateTime<Utc>>,
    zone: Tz,
) -> Option<(NaiveDateTime, DateTime<Utc>)> {
    match (local, utc) {
        (None, None) => None,
        (Some(l), None) => Some((l, local_to_utc(l, zone))),
        (None, Some(u)) => Some((utc_to_local(u, zone), u)),
        (Some(l), Some(u)) => {
            let derived_local = utc_to_local(u, zone);
            if naive_diff_abs(l, derived_local) > Duration::seconds(MISMATCH_TOLERANCE_SECS) {
                warn!(local = %l, derived_local = %derived_local, "local/UTC mismatch, preferring UTC-derived value");
                Some((derived_local, u))
            } else {
                Some((l, u))
            }
        }
    }
}

/// Inference per the design: explicit flag, or midnight-to-midnight span
/// of at least 23 hours with an end time-of-day that is midnight or
/// ≥23:59.
fn infer_all_day(flagged: bool, start_local: NaiveDateTime, end_local: NaiveDateTime) -> bool {
    if flagged {
        return true;
    }
    let starts_at_midnight = start_local.hour() == 0 && start_local.minute() == 0;
    let span = end_local - start_local;
    let ends_at_midnight_or_late =
        (end_local.hour() == 0 && end_local.minute() == 0) || (end_local.hour() == 23 && end_local.minute() >= 59);

    starts_at_midnight && span >= Duration::hours(ALL_DAY_SPAN_HOURS) && ends_at_midnight_or_late
}

/// Splits a multi-day all-day event into one atomic event per day, each
/// using the start-of-day as its occurrence marker.
fn chunk_all_day(
    global_id: &str,
    subject: &str,
    body: &str,
    location: &str,
    start_local: NaiveDateTime,
    end_local: NaiveDateTime,
) -> Vec<Event> {
    let mut out = Vec::new();
    let mut day_start = start_local.date();
    let last_day = end_local.date();

    while day_start < last_day {
        let day_end = day_start.succ_opt().unwrap_or(day_start);
        let start = day_start.and_hms_opt(0, 0, 0).unwrap();
        let end = day_end.and_hms_opt(0, 0, 0).unwrap();
        out.push(Event {
            subject: subject.to_string(),
            body: body.to_string(),
            location: location.to_string(),
            start_local: start,
            end_local: end,
            start_utc: DateTime::<Utc>::from_naive_utc_and_offset(start, Utc),
            end_utc: DateTime::<Utc>::from_naive_utc_and_offset(end, Utc),
            global_id: global_id.to_string(),
            is_all_day: true,
        });
        day_start = day_end;
    }

    out
}

/// One candidate appointment/occurrence fed into [`normalize_all`].
pub struct Candidate {
    pub global_id: String,
    pub subject: String,
    pub body: String,
    pub location: String,
    pub raw: RawTimes,
}

/// Normalizes a batch of candidates: per-candidate time normalization,
/// all-day inference, multi-day chunking, then a final dedup pass keyed
/// by `(global_id, start_utc, end_utc)`.
pub fn normalize_all(candidates: Vec<Candidate>, source_zone: Tz, target_zone: Tz) -> NormalizeOutcome {
    let mut events = Vec::new();
    let mut dropped = 0;

    for candidate in candidates {
        let Some((start_local, end_local, start_utc, end_utc)) =
            normalize_times(&candidate.raw, source_zone, target_zone)
        else {
            warn!(global_id = %candidate.global_id, "dropping candidate with no usable local or UTC time");
            dropped += 1;
            continue;
        };

        if end_utc <= start_utc {
            warn!(global_id = %candidate.global_id, "dropping candidate with non-positive duration");
            dropped += 1;
            continue;
        }

        let is_all_day = infer_all_day(candidate.raw.source_flagged_all_day, start_local, end_local);

        if is_all_day && (end_local.date() - start_local.date()).num_days() > 1 {
            events.extend(chunk_all_day(
                &candidate.global_id,
                &candidate.subject,
                &candidate.body,
                &candidate.location,
                start_local,
                end_local,
            ));
        } else {
            events.push(Event {
                subject: candidate.subject,
                body: candidate.body,
                location: candidate.location,
                start_local,
                end_local,
                start_utc,
                end_utc,
                global_id: candidate.global_id,
                is_all_day,
            });
        }
    }

    let mut seen = HashSet::new();
    let mut mismatches = 0;
    events.retain(|e| {
        let key = (e.global_id.clone(), e.start_utc, e.end_utc);
        if seen.contains(&key) {
            warn!(global_id = %e.global_id, "dropping duplicate event signature");
            mismatches += 1;
            false
        } else {
            seen.insert(key);
            true
        }
    });

    NormalizeOutcome {
        events,
        dropped_invariant_violations: dropped,
        mismatches_logged: mismatches,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn naive(y: i32, m: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, mi, 0).unwrap()
    }

    fn candidate(id: &str, start: NaiveDateTime, end: NaiveDateTime, all_day: bool) -> Candidate {
        Candidate {
            global_id: id.to_string(),
            subject: "Test".into(),
            body: String::new(),
            location: String::new(),
            raw: RawTimes {
                start_local: Some(start),
                end_local: Some(end),
                start_utc: None,
                end_utc: None,
                source_flagged_all_day: all_day,
            },
        }
    }

    #[test]
    fn derives_utc_from_local_when_utc_absent() {
        let c = candidate("G1", naive(2025, 2, 3, 9, 0), naive(2025, 2, 3, 9, 30), false);
        let outcome = normalize_all(vec![c], chrono_tz::Europe::Berlin, chrono_tz::Europe::Berlin);
        assert_eq!(outcome.events.len(), 1);
        assert!(!outcome.events[0].is_all_day);
    }

    #[test]
    fn infers_all_day_from_midnight_span_without_flag() {
        let c = candidate("G2", naive(2025, 2, 10, 0, 0), naive(2025, 2, 11, 0, 0), false);
        let outcome = normalize_all(vec![c], chrono_tz::UTC, chrono_tz::UTC);
        assert_eq!(outcome.events.len(), 1);
        assert!(outcome.events[0].is_all_day);
    }

    #[test]
    fn explicit_all_day_flag_without_midnight_span_is_still_all_day() {
        let c = candidate("G3", naive(2025, 2, 10, 9, 0), naive(2025, 2, 10, 17, 0), true);
        let outcome = normalize_all(vec![c], chrono_tz::UTC, chrono_tz::UTC);
        assert!(outcome.events[0].is_all_day);
    }

    #[test]
    fn chunks_multi_day_all_day_event_per_day() {
        let c = candidate("G4", naive(2025, 2, 10, 0, 0), naive(2025, 2, 13, 0, 0), true);
        let outcome = normalize_all(vec![c], chrono_tz::UTC, chrono_tz::UTC);
        assert_eq!(outcome.events.len(), 3);
        assert!(outcome.events.iter().all(|e| e.is_all_day));
    }

    #[test]
    fn drops_candidate_with_no_times() {
        let c = Candidate {
            global_id: "G5".into(),
            subject: "Test".into(),
            body: String::new(),
            location: String::new(),
            raw: RawTimes {
                start_local: None,
                end_local: None,
                start_utc: None,
                end_utc: None,
                source_flagged_all_day: false,
            },
        };
        let outcome = normalize_all(vec![c], chrono_tz::UTC, chrono_tz::UTC);
        assert_eq!(outcome.events.len(), 0);
        assert_eq!(outcome.dropped_invariant_violations, 1);
    }

    #[test]
    fn deduplicates_identical_signatures() {
        let a = candidate("G6", naive(2025, 2, 3, 9, 0), naive(2025, 2, 3, 9, 30), false);
        let b = candidate("G6", naive(2025, 2, 3, 9, 0), naive(2025, 2, 3, 9, 30), false);
        let outcome = normalize_all(vec![a, b], chrono_tz::UTC, chrono_tz::UTC);
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.mismatches_logged, 1);
    }
}
