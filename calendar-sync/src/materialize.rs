// calendar-sync/src/materialize.rs
//! Wires C3 (source bridge) through C4 (recurrence expansion) and C5
//! (normalization) into the `DesiredSetProvider` the supervisor drives
//! each cycle: fetch -> expand -> normalize -> assign UIDs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use chrono_tz::Tz;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use sync_core::bridge::{RawAppointment, SourceBridge};
use sync_core::normalize::{normalize_all, Candidate, RawTimes};
use sync_core::reconciler::DesiredSet;
use sync_core::recurrence::expand_series;
use sync_core::supervisor::DesiredSetProvider;
use sync_core::uid::build_uid;

const FETCH_TIMEOUT: Duration = Duration::from_secs(120);

pub struct MaterializeConfig {
    pub source_id: String,
    pub source_zone: Tz,
    pub target_zone: Tz,
    pub days_into_past: i64,
    pub days_into_future: i64,
    pub recurrence_expansion_days_past: i64,
    pub recurrence_expansion_days_future: i64,
}

pub struct Materializer {
    bridge: Arc<dyn SourceBridge>,
    config: MaterializeConfig,
}

impl Materializer {
    pub fn new(bridge: Arc<dyn SourceBridge>, config: MaterializeConfig) -> Self {
        Self { bridge, config }
    }

    /// Expands `appointment` into normalizer candidates: a recurring
    /// series is run through [`expand_series`] (using a slightly wider
    /// window so exceptions just outside `[from, to]` still resolve
    /// correctly against the rule), a plain appointment becomes a
    /// single candidate.
    fn candidates_for(
        &self,
        appointment: &RawAppointment,
        from: chrono::DateTime<Utc>,
        to: chrono::DateTime<Utc>,
    ) -> Vec<Candidate> {
        if appointment.is_recurring {
            let Some(series) = &appointment.series else {
                warn!(global_id = %appointment.global_id, "marked recurring but has no series descriptor, skipping");
                return Vec::new();
            };

            let expansion_from = from
                - chrono::Duration::days(self.config.recurrence_expansion_days_past);
            let expansion_to = to + chrono::Duration::days(self.config.recurrence_expansion_days_future);

            let rtz: rrule::Tz = self
                .config
                .source_zone
                .to_string()
                .parse()
                .unwrap_or(rrule::Tz::UTC);

            expand_series(series, appointment.is_all_day_flag, rtz, expansion_from, expansion_to)
                .into_iter()
                .filter(|o| o.start_utc >= from && o.start_utc <= to)
                .map(|o| Candidate {
                    global_id: appointment.global_id.clone(),
                    subject: o.subject_override.unwrap_or_else(|| appointment.subject.clone()),
                    body: o.body_override.unwrap_or_else(|| appointment.body.clone()),
                    location: o.location_override.unwrap_or_else(|| appointment.location.clone()),
                    raw: RawTimes {
                        start_local: Some(o.start_local),
                        end_local: Some(o.end_local),
                        start_utc: Some(o.start_utc),
                        end_utc: Some(o.end_utc),
                        source_flagged_all_day: o.is_all_day,
                    },
                })
                .collect()
        } else {
            vec![Candidate {
                global_id: appointment.global_id.clone(),
                subject: appointment.subject.clone(),
                body: appointment.body.clone(),
                location: appointment.location.clone(),
                raw: RawTimes {
                    start_local: appointment.start_local,
                    end_local: appointment.end_local,
                    start_utc: appointment.start_utc,
                    end_utc: appointment.end_utc,
                    source_flagged_all_day: appointment.is_all_day_flag,
                },
            }]
        }
    }
}

#[async_trait::async_trait]
impl DesiredSetProvider for Materializer {
    async fn materialize(&self, cancel: &CancellationToken) -> DesiredSet {
        let now = Utc::now();
        let from = now - chrono::Duration::days(self.config.days_into_past);
        let to = now + chrono::Duration::days(self.config.days_into_future);

        let fetch = self.bridge.fetch_appointments(from, to);

        let appointments = tokio::select! {
            result = tokio::time::timeout(FETCH_TIMEOUT, fetch) => match result {
                Ok(Ok(appointments)) => appointments,
                Ok(Err(e)) => {
                    warn!(error = %e, "source fetch failed, treating as no-data rather than an empty calendar");
                    return DesiredSet::NoData;
                }
                Err(_) => {
                    warn!("source fetch exceeded its two-minute deadline");
                    return DesiredSet::NoData;
                }
            },
            _ = cancel.cancelled() => {
                return DesiredSet::NoData;
            }
        };

        let mut candidates = Vec::new();
        for appointment in &appointments {
            if appointment.is_cancelled {
                continue;
            }
            candidates.extend(self.candidates_for(appointment, from, to));
        }

        let outcome = normalize_all(candidates, self.config.source_zone, self.config.target_zone);
        if outcome.dropped_invariant_violations > 0 {
            warn!(
                dropped = outcome.dropped_invariant_violations,
                "dropped candidates with unusable or non-positive time spans"
            );
        }

        let mut desired = HashMap::with_capacity(outcome.events.len());
        for event in outcome.events {
            let uid = build_uid(&self.config.source_id, &event.global_id, event.start_utc);
            desired.insert(uid, event);
        }

        DesiredSet::Events(desired)
    }
}
