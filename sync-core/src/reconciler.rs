// sync-core/src/reconciler.rs
//! C8: given a desired event set and a destination snapshot, computes
//! the stale set, performs ordered delete-then-upsert, verifies each
//! write, and retries once on mismatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use caldav_proto::{CalDavClient, CalDavTransport};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{CancelReason, SyncError};
use crate::ical::{encode_event, EncodeOptions};
use crate::normalize::Event;
use crate::supervisor::cancellable_sleep;
use crate::tray::{TrayHandle, TrayPhase};
use crate::uid::is_managed;

const VERIFY_TOLERANCE_TIMED_SECS: i64 = 120;
const FIRST_CYCLE_SETTLE: Duration = Duration::from_secs(30);

/// The destination's current managed-UID -> etag snapshot, or a
/// sentinel marking that the source itself could not be reached this
/// cycle. The sentinel exists so the stale-reap phase never treats a
/// `HostUnavailable` cycle as "the user deleted everything".
pub enum DesiredSet {
    Events(HashMap<String, Event>),
    NoData,
}

pub struct ReconcileReport {
    pub deleted: Vec<String>,
    pub upserted: Vec<String>,
    pub verify_mismatches: Vec<String>,
    pub delete_failures: Vec<String>,
}

pub struct Reconciler<T: CalDavTransport> {
    client: Arc<CalDavClient<T>>,
    calendar_url: String,
    source_id: String,
    options: EncodeOptions,
    tray: Arc<dyn TrayHandle>,
}

impl<T: CalDavTransport> Reconciler<T> {
    pub fn new(
        client: Arc<CalDavClient<T>>,
        calendar_url: impl Into<String>,
        source_id: impl Into<String>,
        options: EncodeOptions,
        tray: Arc<dyn TrayHandle>,
    ) -> Self {
        Self {
            client,
            calendar_url: calendar_url.into(),
            source_id: source_id.into(),
            options,
            tray,
        }
    }

    fn event_url(&self, uid: &str) -> String {
        format!("{}{}.ics", self.calendar_url, uid)
    }

    /// Runs one reconciliation cycle. `desired` being [`DesiredSet::NoData`]
    /// skips Phase A entirely (stale reap never runs without real source
    /// data) but still nothing to upsert in Phase B. `cancel` is the
    /// in-flight cycle's scope; every client call below honours it.
    pub async fn reconcile(&self, desired: DesiredSet, cancel: &CancellationToken) -> Result<ReconcileReport, SyncError> {
        let desired = match desired {
            DesiredSet::Events(map) => map,
            DesiredSet::NoData => {
                warn!("source produced no data this cycle; skipping reap to avoid a destructive wipe");
                return Ok(ReconcileReport {
                    deleted: Vec::new(),
                    upserted: Vec::new(),
                    verify_mismatches: Vec::new(),
                    delete_failures: Vec::new(),
                });
            }
        };

        self.tray.set_phase(TrayPhase::Deleting);
        let current = self
            .client
            .enumerate(&self.calendar_url, true, |uid| is_managed(uid, &self.source_id), cancel)
            .await?;

        let (deleted, delete_failures) = self.reap_stale(&current, &desired, cancel).await?;

        self.tray.set_phase(TrayPhase::Updating);
        let (upserted, verify_mismatches) = self.upsert_and_verify(&desired, cancel).await?;

        self.tray.set_phase(TrayPhase::Idle);

        Ok(ReconcileReport {
            deleted,
            upserted,
            verify_mismatches,
            delete_failures,
        })
    }

    async fn reap_stale(
        &self,
        current: &HashMap<String, String>,
        desired: &HashMap<String, Event>,
        cancel: &CancellationToken,
    ) -> Result<(Vec<String>, Vec<String>), SyncError> {
        let mut deleted = Vec::new();
        let mut failures = Vec::new();

        let stale: Vec<&String> = current
            .keys()
            .filter(|uid| is_managed(uid, &self.source_id) && !desired.contains_key(uid.as_str()))
            .collect();

        for uid in stale {
            let total = current.len();
            self.tray.update_text(&format!("deleting {}/{}", deleted.len() + 1, total));
            match self.client.delete(&self.event_url(uid), cancel).await {
                Ok(()) => {
                    info!(uid, "deleted stale destination entry");
                    deleted.push(uid.clone());
                }
                Err(e) if e.is_auth() => return Err(SyncError::AuthFailure),
                Err(e) if matches!(e, caldav_proto::DavError::Cancelled) => return Err(e.into()),
                Err(e) => {
                    warn!(uid, error = %e, "delete failed, will not retry further this cycle");
                    failures.push(uid.clone());
                }
            }
        }

        Ok((deleted, failures))
    }

    async fn upsert_and_verify(
        &self,
        desired: &HashMap<String, Event>,
        cancel: &CancellationToken,
    ) -> Result<(Vec<String>, Vec<String>), SyncError> {
        let mut upserted = Vec::new();
        let mut mismatches = Vec::new();
        let total = desired.len();

        for (index, (uid, event)) in desired.iter().enumerate() {
            self.tray
                .update_text(&format!("updating {}/{} ({}%)", index + 1, total, ((index + 1) * 100) / total.max(1)));

            let ics = encode_event(event, uid, &self.options);
            let url = self.event_url(uid);

            match self.client.upsert(&url, ics.as_bytes(), cancel).await {
                Ok(_) => {}
                Err(e) if e.is_auth() => return Err(SyncError::AuthFailure),
                Err(e) if matches!(e, caldav_proto::DavError::Cancelled) => return Err(e.into()),
                Err(e) => {
                    warn!(uid, error = %e, "upsert failed");
                    continue;
                }
            }

            upserted.push(uid.clone());

            if !self.verify(uid, &url, event, cancel).await? {
                warn!(uid, "verify mismatch after upsert, attempting one corrective PUT");
                let _ = self.client.upsert(&url, ics.as_bytes(), cancel).await;
                if !self.verify(uid, &url, event, cancel).await.unwrap_or(false) {
                    warn!(uid, "corrective PUT still mismatched, leaving as-is");
                    mismatches.push(uid.clone());
                }
            }
        }

        Ok((upserted, mismatches))
    }

    /// Fetches `url` and compares against `event`, within tolerance: 2
    /// minutes for timed events, whole-day equality for all-day events.
    async fn verify(&self, uid: &str, url: &str, event: &Event, cancel: &CancellationToken) -> Result<bool, SyncError> {
        let body = match self.client.fetch(url, cancel).await {
            Ok(b) => b,
            Err(e) if e.is_auth() => return Err(SyncError::AuthFailure),
            Err(e) if matches!(e, caldav_proto::DavError::Cancelled) => return Err(e.into()),
            Err(e) => {
                warn!(uid, error = %e, "verify fetch failed");
                return Ok(false);
            }
        };

        let text = String::from_utf8_lossy(&body);
        let observed = parse_verify_fields(&text);

        let Some(observed) = observed else {
            warn!(uid, "could not parse fetched body during verify");
            return Ok(false);
        };

        if event.is_all_day {
            let ok = observed.all_day
                && observed.start.date() == event.start_local.date()
                && observed.end.date() == event.end_local.date();
            if !ok {
                warn!(
                    uid,
                    expected_start = %event.start_local,
                    observed_start = %observed.start,
                    "all-day verify mismatch"
                );
            }
            Ok(ok)
        } else {
            let start_diff = (observed.start_utc - event.start_utc).num_seconds().abs();
            let end_diff = (observed.end_utc - event.end_utc).num_seconds().abs();
            Ok(start_diff <= VERIFY_TOLERANCE_TIMED_SECS && end_diff <= VERIFY_TOLERANCE_TIMED_SECS)
        }
    }

    /// The first-cycle wipe: enumerate with `filter_managed=true`, delete
    /// everything found, then wait for destination caches to settle.
    pub async fn first_cycle_wipe(&self, cancel: &CancellationToken) -> Result<(), SyncError> {
        self.wipe(true, cancel).await
    }

    /// A manually triggered full resync wipe: every entry in the
    /// collection, managed or not.
    pub async fn full_resync_wipe(&self, cancel: &CancellationToken) -> Result<(), SyncError> {
        self.wipe(false, cancel).await
    }

    async fn wipe(&self, filter_managed: bool, cancel: &CancellationToken) -> Result<(), SyncError> {
        self.tray.set_phase(TrayPhase::Deleting);
        let current = self
            .client
            .enumerate(&self.calendar_url, filter_managed, |uid| is_managed(uid, &self.source_id), cancel)
            .await?;

        let urls: Vec<String> = current.keys().map(|uid| self.event_url(uid)).collect();
        let results = self.client.wipe(&urls, cancel).await;
        for (url, result) in results {
            if let Err(e) = result {
                if e.is_auth() {
                    return Err(SyncError::AuthFailure);
                }
                warn!(url, error = %e, "wipe delete failed, continuing");
            }
        }

        cancellable_sleep(FIRST_CYCLE_SETTLE, cancel)
            .await
            .map_err(|()| SyncError::Cancelled(CancelReason::PerCycle))?;
        Ok(())
    }
}

struct VerifiedFields {
    start: chrono::NaiveDateTime,
    end: chrono::NaiveDateTime,
    start_utc: chrono::DateTime<chrono::Utc>,
    end_utc: chrono::DateTime<chrono::Utc>,
    all_day: bool,
}

/// Extracts DTSTART/DTEND from a fetched iCal body for the verify step.
/// This is intentionally minimal: it only needs to recover what
/// [`encode_event`] wrote, not parse arbitrary third-party iCal.
fn parse_verify_fields(text: &str) -> Option<VerifiedFields> {
    let mut dtstart = None;
    let mut dtend = None;
    let mut all_day = false;

    for line in text.lines() {
        let line = line.trim_end();
        if let Some(rest) = line.strip_prefix("DTSTART;VALUE=DATE:") {
            dtstart = Some(rest.to_string());
            all_day = true;
        } else if let Some(rest) = line.strip_prefix("DTEND;VALUE=DATE:") {
            dtend = Some(rest.to_string());
        } else if let Some(rest) = line.strip_prefix("DTSTART:") {
            dtstart = Some(rest.to_string());
        } else if let Some(rest) = line.strip_prefix("DTEND:") {
            dtend = Some(rest.to_string());
        }
    }

    let dtstart = dtstart?;
    let dtend = dtend?;

    if all_day {
        let start = chrono::NaiveDate::parse_from_str(&dtstart, "%Y%m%d").ok()?.and_hms_opt(0, 0, 0)?;
        let end = chrono::NaiveDate::parse_from_str(&dtend, "%Y%m%d").ok()?.and_hms_opt(0, 0, 0)?;
        Some(VerifiedFields {
            start,
            end,
            start_utc: chrono::DateTime::<chrono::Utc>::from_naive_utc_and_offset(start, chrono::Utc),
            end_utc: chrono::DateTime::<chrono::Utc>::from_naive_utc_and_offset(end, chrono::Utc),
            all_day: true,
        })
    } else {
        let start_utc = chrono::NaiveDateTime::parse_from_str(&dtstart, "%Y%m%dT%H%M%SZ").ok()?;
        let end_utc = chrono::NaiveDateTime::parse_from_str(&dtend, "%Y%m%dT%H%M%SZ").ok()?;
        Some(VerifiedFields {
            start: start_utc,
            end: end_utc,
            start_utc: chrono::DateTime::<chrono::Utc>::from_naive_utc_and_offset(start_utc, chrono::Utc),
            end_utc: chrono::DateTime::<chrono::Utc>::from_naive_utc_and_offset(end_utc, chrono::Utc),
            all_day: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tray::NullTray;
    use async_trait::async_trait;
    use caldav_proto::{DavError, RawResponse};
    use chrono::{NaiveDate, TimeZone, Utc};
    use std::sync::Mutex;

    struct FakeTransport {
        entries: Mutex<HashMap<String, String>>,
        bodies: Mutex<HashMap<String, Vec<u8>>>,
        deletes: Mutex<Vec<String>>,
    }

    impl FakeTransport {
        fn new(entries: Vec<(&str, &str)>) -> Self {
            Self {
                entries: Mutex::new(entries.into_iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()),
                bodies: Mutex::new(HashMap::new()),
                deletes: Mutex::new(Vec::new()),
            }
        }
    }

    fn multistatus_body(entries: &HashMap<String, String>) -> Vec<u8> {
        let mut body = String::from(r#"<D:multistatus xmlns:D="DAV:">"#);
        for (uid, etag) in entries {
            body.push_str(&format!(
                r#"<D:response><D:href>/cal/{uid}.ics</D:href><D:propstat><D:prop><D:getetag>"{etag}"</D:getetag></D:prop><D:status>HTTP/1.1 200 OK</D:status></D:propstat></D:response>"#
            ));
        }
        body.push_str("</D:multistatus>");
        body.into_bytes()
    }

    #[async_trait]
    impl CalDavTransport for FakeTransport {
        async fn propfind(&self, _url: &str, _body: &str, _depth: &str) -> Result<RawResponse, DavError> {
            let entries = self.entries.lock().unwrap();
            Ok(RawResponse {
                status: 207,
                body: multistatus_body(&entries),
                etag: None,
            })
        }

        async fn put(&self, url: &str, body: Vec<u8>, _content_type: &str) -> Result<RawResponse, DavError> {
            self.bodies.lock().unwrap().insert(url.to_string(), body);
            Ok(RawResponse {
                status: 201,
                body: Vec::new(),
                etag: Some("new-etag".into()),
            })
        }

        async fn get(&self, url: &str) -> Result<RawResponse, DavError> {
            let body = self.bodies.lock().unwrap().get(url).cloned().unwrap_or_default();
            Ok(RawResponse { status: 200, body, etag: None })
        }

        async fn delete(&self, url: &str) -> Result<RawResponse, DavError> {
            self.deletes.lock().unwrap().push(url.to_string());
            Ok(RawResponse { status: 204, body: Vec::new(), etag: None })
        }
    }

    fn event() -> Event {
        let start_local = NaiveDate::from_ymd_opt(2025, 2, 3).unwrap().and_hms_opt(9, 0, 0).unwrap();
        let end_local = NaiveDate::from_ymd_opt(2025, 2, 3).unwrap().and_hms_opt(9, 30, 0).unwrap();
        Event {
            subject: "Standup".into(),
            body: String::new(),
            location: String::new(),
            start_local,
            end_local,
            start_utc: Utc.with_ymd_and_hms(2025, 2, 3, 8, 0, 0).unwrap(),
            end_utc: Utc.with_ymd_and_hms(2025, 2, 3, 8, 30, 0).unwrap(),
            global_id: "G1".into(),
            is_all_day: false,
        }
    }

    #[tokio::test]
    async fn upsert_and_verify_succeeds_round_trip() {
        let transport = FakeTransport::new(vec![]);
        let client = Arc::new(CalDavClient::new(transport));
        let tray: Arc<dyn TrayHandle> = Arc::new(NullTray);
        let options = EncodeOptions {
            event_tag: String::new(),
            include_second_reminder: true,
        };
        let reconciler = Reconciler::new(client.clone(), "/cal/", "ACME", options, tray.clone());

        let mut desired = HashMap::new();
        desired.insert("ACME-outlook-deadbeef-20250203T080000Z".to_string(), event());

        let report = reconciler
            .reconcile(DesiredSet::Events(desired), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.upserted.len(), 1);
        assert!(report.verify_mismatches.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_managed_entry_is_deleted_foreign_is_not() {
        let transport = FakeTransport::new(vec![
            ("ACME-outlook-aaa-20250101T080000Z", "e1"),
            ("FOREIGN-outlook-bbb-20250101T080000Z", "e2"),
        ]);
        let client = Arc::new(CalDavClient::new(transport));
        let tray: Arc<dyn TrayHandle> = Arc::new(NullTray);
        let options = EncodeOptions {
            event_tag: String::new(),
            include_second_reminder: true,
        };
        let reconciler = Reconciler::new(client.clone(), "/cal/", "ACME", options, tray.clone());

        let report = reconciler
            .reconcile(DesiredSet::Events(HashMap::new()), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.deleted.len(), 1);
        assert!(report.deleted[0].starts_with("ACME-outlook-"));
    }

    #[tokio::test]
    async fn no_data_sentinel_skips_reap_entirely() {
        let transport = FakeTransport::new(vec![("ACME-outlook-aaa-20250101T080000Z", "e1")]);
        let client = Arc::new(CalDavClient::new(transport));
        let tray: Arc<dyn TrayHandle> = Arc::new(NullTray);
        let options = EncodeOptions {
            event_tag: String::new(),
            include_second_reminder: true,
        };
        let reconciler = Reconciler::new(client.clone(), "/cal/", "ACME", options, tray.clone());

        let report = reconciler.reconcile(DesiredSet::NoData, &CancellationToken::new()).await.unwrap();
        assert!(report.deleted.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn first_cycle_wipe_returns_promptly_when_cancelled_mid_settle() {
        let transport = FakeTransport::new(vec![]);
        let client = Arc::new(CalDavClient::new(transport));
        let tray: Arc<dyn TrayHandle> = Arc::new(NullTray);
        let options = EncodeOptions {
            event_tag: String::new(),
            include_second_reminder: true,
        };
        let reconciler = Reconciler::new(client, "/cal/", "ACME", options, tray);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = reconciler.first_cycle_wipe(&cancel).await;
        assert!(matches!(result, Err(SyncError::Cancelled(CancelReason::PerCycle))));
    }
}
