// sync-core/src/recurrence/mod.rs
//! C4: recurrence expansion — translates a source series descriptor into
//! a canonical rule and enumerates concrete occurrences within a window,
//! honouring exceptions (skips and overrides).

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rrule::{RRuleSet, Tz as RTz};
use tracing::warn;

use crate::clock::{local_to_utc, utc_to_local};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    MonthlyNth,
    Yearly,
    YearlyNth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Weekday {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl Weekday {
    fn ical_code(self) -> &'static str {
        match self {
            Weekday::Mon => "MO",
            Weekday::Tue => "TU",
            Weekday::Wed => "WE",
            Weekday::Thu => "TH",
            Weekday::Fri => "FR",
            Weekday::Sat => "SA",
            Weekday::Sun => "SU",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Termination {
    Never,
    AfterCount(u32),
    UntilDate(NaiveDate),
}

#[derive(Debug, Clone)]
pub struct OverrideInstance {
    pub start_local: NaiveDateTime,
    pub end_local: NaiveDateTime,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Exception {
    pub original_date: NaiveDate,
    pub override_instance: Option<OverrideInstance>,
}

#[derive(Debug, Clone)]
pub struct SeriesDescriptor {
    pub frequency: Frequency,
    pub interval: u32,
    pub days_of_week: Vec<Weekday>,
    pub day_of_month: Option<u32>,
    pub month_of_year: Option<u32>,
    /// 1..=5; 5 means "last" (normalised to BYSETPOS=-1).
    pub nth_instance: Option<u8>,
    pub termination: Termination,
    pub exceptions: Vec<Exception>,

    /// Candidates for the series base start/end, in resolution order
    /// (pattern -> master -> appointment's own times), in source-local
    /// wall-clock time.
    pub pattern_local: Option<(NaiveDateTime, NaiveDateTime)>,
    pub master_local: Option<(NaiveDateTime, NaiveDateTime)>,
    pub appointment_local: Option<(NaiveDateTime, NaiveDateTime)>,
}

#[derive(Debug, Clone)]
pub struct OccurrenceInfo {
    pub start_local: NaiveDateTime,
    pub end_local: NaiveDateTime,
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
    pub is_all_day: bool,
    pub subject_override: Option<String>,
    pub body_override: Option<String>,
    pub location_override: Option<String>,
}

const FALLBACK_DURATION_MINUTES: i64 = 30;

/// Resolves `base_duration` per the resolution order in the design
/// notes: pattern times -> master times -> appointment's own times,
/// falling back to 30 minutes only if every candidate yields a
/// non-positive span.
fn resolve_base_duration(series: &SeriesDescriptor) -> chrono::Duration {
    for candidate in [
        series.pattern_local,
        series.master_local,
        series.appointment_local,
    ]
    .into_iter()
    .flatten()
    {
        let (start, end) = candidate;
        let span = end - start;
        if span > chrono::Duration::zero() {
            return span;
        }
    }
    warn!("no series time source yielded a positive duration, falling back to 30 minutes");
    chrono::Duration::minutes(FALLBACK_DURATION_MINUTES)
}

/// Resolves the series base start: pattern -> master -> appointment's
/// own times, in that order.
fn resolve_base_start(series: &SeriesDescriptor) -> NaiveDateTime {
    series
        .pattern_local
        .or(series.master_local)
        .or(series.appointment_local)
        .map(|(start, _)| start)
        .unwrap_or_else(|| {
            warn!("series has no usable start time source, defaulting to epoch-local");
            NaiveDate::from_ymd_opt(1970, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
        })
}

fn build_rrule_string(series: &SeriesDescriptor) -> String {
    let freq = match series.frequency {
        Frequency::Daily => "DAILY",
        Frequency::Weekly => "WEEKLY",
        Frequency::Monthly | Frequency::MonthlyNth => "MONTHLY",
        Frequency::Yearly | Frequency::YearlyNth => "YEARLY",
    };

    let mut parts = vec![format!("FREQ={freq}"), format!("INTERVAL={}", series.interval.max(1))];

    if !series.days_of_week.is_empty() {
        let days: Vec<&str> = series.days_of_week.iter().map(|d| d.ical_code()).collect();
        parts.push(format!("BYDAY={}", days.join(",")));
    }
    if let Some(dom) = series.day_of_month {
        parts.push(format!("BYMONTHDAY={dom}"));
    }
    if let Some(moy) = series.month_of_year {
        parts.push(format!("BYMONTH={moy}"));
    }
    if matches!(series.frequency, Frequency::MonthlyNth | Frequency::YearlyNth) {
        if let Some(nth) = series.nth_instance {
            let setpos = if nth == 5 { -1 } else { nth as i32 };
            parts.push(format!("BYSETPOS={setpos}"));
        }
    }

    match &series.termination {
        Termination::Never => {}
        Termination::AfterCount(n) => parts.push(format!("COUNT={n}")),
        Termination::UntilDate(d) => {
            parts.push(format!("UNTIL={}", d.format("%Y%m%dT235959Z")));
        }
    }

    parts.join(";")
}

/// Expands `series` into concrete occurrences within `[from, to]`
/// (inclusive), in source-local time plus derived UTC, honouring
/// exceptions per the canonical algorithm in the component design.
pub fn expand_series(
    series: &SeriesDescriptor,
    base_is_all_day: bool,
    source_zone: rrule::Tz,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Vec<OccurrenceInfo> {
    let base_start_local = resolve_base_start(series);
    let duration = resolve_base_duration(series);

    let dtstart_utc = local_to_utc(base_start_local, tz_to_chrono_tz(source_zone));

    let rrule_str = build_rrule_string(series);
    let full = format!(
        "DTSTART:{}\nRRULE:{}",
        dtstart_utc.format("%Y%m%dT%H%M%SZ"),
        rrule_str
    );

    let rrule_set: RRuleSet = match full.parse() {
        Ok(set) => set,
        Err(e) => {
            warn!(rule = %rrule_str, error = %e, "unsupported or malformed recurrence rule, skipping series");
            return emit_exception_overrides_only(series, base_is_all_day, from, to);
        }
    };

    let mut skip_dates: Vec<NaiveDate> = Vec::new();
    let mut overrides_in_window = Vec::new();

    for exception in &series.exceptions {
        skip_dates.push(exception.original_date);
        if let Some(ov) = &exception.override_instance {
            let start_utc = local_to_utc(ov.start_local, tz_to_chrono_tz(source_zone));
            if start_utc >= from && start_utc <= to {
                let end_utc = local_to_utc(ov.end_local, tz_to_chrono_tz(source_zone));
                overrides_in_window.push(OccurrenceInfo {
                    start_local: ov.start_local,
                    end_local: ov.end_local,
                    start_utc,
                    end_utc,
                    is_all_day: base_is_all_day,
                    subject_override: ov.subject.clone(),
                    body_override: ov.body.clone(),
                    location_override: ov.location.clone(),
                });
            }
        }
    }

    let search_start = from.with_timezone(&RTz::UTC) - chrono::Duration::seconds(1);
    let limit: u16 = 10_000;
    let rule_occurrences = rrule_set
        .after(search_start)
        .all(limit)
        .dates
        .into_iter()
        .take_while(|d| d.with_timezone(&Utc) <= to)
        .map(|d| d.with_timezone(&Utc));

    let mut out = overrides_in_window;
    for start_utc in rule_occurrences {
        if start_utc < from {
            continue;
        }
        let start_local = utc_to_local(start_utc, tz_to_chrono_tz(source_zone));
        if skip_dates.contains(&start_local.date()) {
            continue;
        }
        let end_local = start_local + duration;
        let end_utc = start_utc + duration;
        out.push(OccurrenceInfo {
            start_local,
            end_local,
            start_utc,
            end_utc,
            is_all_day: base_is_all_day,
            subject_override: None,
            body_override: None,
            location_override: None,
        });
    }

    out.sort_by_key(|o| o.start_utc);
    out
}

fn emit_exception_overrides_only(
    series: &SeriesDescriptor,
    base_is_all_day: bool,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Vec<OccurrenceInfo> {
    let mut out = Vec::new();
    for exception in &series.exceptions {
        if let Some(ov) = &exception.override_instance {
            let zone = chrono_tz::UTC;
            let start_utc = local_to_utc(ov.start_local, zone);
            if start_utc >= from && start_utc <= to {
                let end_utc = local_to_utc(ov.end_local, zone);
                out.push(OccurrenceInfo {
                    start_local: ov.start_local,
                    end_local: ov.end_local,
                    start_utc,
                    end_utc,
                    is_all_day: base_is_all_day,
                    subject_override: ov.subject.clone(),
                    body_override: ov.body.clone(),
                    location_override: ov.location.clone(),
                });
            }
        }
    }
    out
}

fn tz_to_chrono_tz(tz: rrule::Tz) -> chrono_tz::Tz {
    tz.to_string().parse().unwrap_or(chrono_tz::UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn naive(y: i32, m: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, mi, 0).unwrap()
    }

    fn descriptor(freq: Frequency, days: Vec<Weekday>, until: NaiveDate) -> SeriesDescriptor {
        SeriesDescriptor {
            frequency: freq,
            interval: 1,
            days_of_week: days,
            day_of_month: None,
            month_of_year: None,
            nth_instance: None,
            termination: Termination::UntilDate(until),
            exceptions: Vec::new(),
            pattern_local: Some((naive(2025, 1, 6, 9, 0), naive(2025, 1, 6, 9, 30))),
            master_local: None,
            appointment_local: None,
        }
    }

    #[test]
    fn weekly_expands_within_window() {
        let series = descriptor(
            Frequency::Weekly,
            vec![Weekday::Mon],
            NaiveDate::from_ymd_opt(2025, 2, 3).unwrap(),
        );
        let from = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let occurrences = expand_series(&series, false, RTz::UTC, from, to);
        assert_eq!(occurrences.len(), 5);
    }

    #[test]
    fn exception_override_replaces_rule_occurrence() {
        let mut series = descriptor(
            Frequency::Weekly,
            vec![Weekday::Mon],
            NaiveDate::from_ymd_opt(2025, 2, 3).unwrap(),
        );
        series.exceptions.push(Exception {
            original_date: NaiveDate::from_ymd_opt(2025, 1, 20).unwrap(),
            override_instance: Some(OverrideInstance {
                start_local: naive(2025, 1, 21, 10, 0),
                end_local: naive(2025, 1, 21, 10, 30),
                subject: Some("Moved".to_string()),
                body: None,
                location: None,
            }),
        });

        let from = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let occurrences = expand_series(&series, false, RTz::UTC, from, to);

        assert_eq!(occurrences.len(), 5);
        assert!(occurrences
            .iter()
            .any(|o| o.subject_override.as_deref() == Some("Moved")));
        assert!(!occurrences
            .iter()
            .any(|o| o.start_local.date() == NaiveDate::from_ymd_opt(2025, 1, 20).unwrap()));
    }

    #[test]
    fn monthly_nth_last_uses_negative_setpos() {
        let mut series = descriptor(
            Frequency::MonthlyNth,
            vec![Weekday::Fri],
            NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
        );
        series.nth_instance = Some(5);
        let rule = build_rrule_string(&series);
        assert!(rule.contains("BYSETPOS=-1"));
    }

    #[test]
    fn fallback_duration_applies_when_all_sources_non_positive() {
        let mut series = descriptor(
            Frequency::Daily,
            vec![],
            NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
        );
        series.pattern_local = Some((naive(2025, 1, 6, 9, 0), naive(2025, 1, 6, 9, 0)));
        let duration = resolve_base_duration(&series);
        assert_eq!(duration, chrono::Duration::minutes(FALLBACK_DURATION_MINUTES));
    }
}
