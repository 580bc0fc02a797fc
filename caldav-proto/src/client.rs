// caldav-proto/src/client.rs
//! High-level CalDAV operations: enumerate, upsert, fetch, delete.
//!
//! Builds on [`CalDavTransport`] by adding the retry policy and the
//! multistatus parsing the reconciler needs, without knowing anything
//! about events, recurrence, or UID construction.

use std::collections::HashMap;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::DavError;
use crate::multistatus::{build_propfind_body, parse_multistatus};
use crate::transport::CalDavTransport;

const RETRY_DELAY: Duration = Duration::from_secs(5);
const WIPE_DELETE_PACING: Duration = Duration::from_millis(300);

/// Sleeps for `duration` unless `cancel` fires first, in which case it
/// returns [`DavError::Cancelled`] instead of waiting out the rest of the
/// interval. Every pacing/backoff wait in this client goes through this
/// so a cancelled scope unwinds within one pacing interval.
async fn cancellable_sleep(duration: Duration, cancel: &CancellationToken) -> Result<(), DavError> {
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = cancel.cancelled() => Err(DavError::Cancelled),
    }
}

/// A CalDAV client bound to one collection's transport.
///
/// `T` is generic the same way a transport trait is generic elsewhere in
/// this codebase's sibling crates: production code plugs in
/// [`crate::transport::HyperTransport`], tests plug in a fake.
pub struct CalDavClient<T: CalDavTransport> {
    transport: T,
}

impl<T: CalDavTransport> CalDavClient<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Runs `op` once, and on any non-auth failure waits [`RETRY_DELAY`]
    /// and runs it exactly once more, preserving the same method and body
    /// (the closure recreates the request identically on each call). The
    /// retry wait is cancellable: if `cancel` fires while waiting, this
    /// returns [`DavError::Cancelled`] rather than retrying.
    async fn with_retry<F, Fut, R>(&self, cancel: &CancellationToken, op: F) -> Result<R, DavError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<R, DavError>>,
    {
        match op().await {
            Ok(v) => Ok(v),
            Err(e) if e.is_auth() => Err(e),
            Err(e) => {
                warn!(error = %e, "caldav request failed, retrying after delay");
                cancellable_sleep(RETRY_DELAY, cancel).await?;
                op().await
            }
        }
    }

    /// PROPFIND(Depth:1) over `calendar_url`, returning UID -> etag for
    /// every `.ics` resource. When `filter_managed` is set, `is_managed`
    /// decides which UIDs survive into the result.
    pub async fn enumerate(
        &self,
        calendar_url: &str,
        filter_managed: bool,
        is_managed: impl Fn(&str) -> bool,
        cancel: &CancellationToken,
    ) -> Result<HashMap<String, String>, DavError> {
        let body = build_propfind_body();
        let response = self
            .with_retry(cancel, || self.transport.propfind(calendar_url, body, "1"))
            .await?;

        let entries = parse_multistatus(&response.body)?;
        let mut out = HashMap::new();
        for entry in entries {
            let Some(uid) = entry.uid() else { continue };
            if filter_managed && !is_managed(&uid) {
                continue;
            }
            out.insert(uid, entry.etag.unwrap_or_default());
        }
        Ok(out)
    }

    /// PUT `ics_body` at `event_url` as `text/calendar; charset=utf-8`.
    pub async fn upsert(
        &self,
        event_url: &str,
        ics_body: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Option<String>, DavError> {
        let response = self
            .with_retry(cancel, || {
                self.transport
                    .put(event_url, ics_body.to_vec(), "text/calendar; charset=utf-8")
            })
            .await?;
        Ok(response.etag)
    }

    /// GET `event_url`, returning the body on success.
    pub async fn fetch(&self, event_url: &str, cancel: &CancellationToken) -> Result<Vec<u8>, DavError> {
        let response = self.with_retry(cancel, || self.transport.get(event_url)).await?;
        Ok(response.body)
    }

    /// DELETE `event_url`.
    pub async fn delete(&self, event_url: &str, cancel: &CancellationToken) -> Result<(), DavError> {
        self.with_retry(cancel, || self.transport.delete(event_url)).await?;
        Ok(())
    }

    /// Deletes every URL in `event_urls`, pacing 300ms before each DELETE
    /// and backing off 5s after any single deletion fails, continuing
    /// with the remainder rather than aborting the whole wipe. Every
    /// pacing/backoff wait is cancellable; once `cancel` fires the
    /// remaining URLs are reported as [`DavError::Cancelled`] rather than
    /// attempted, so the wipe unwinds within one pacing interval.
    pub async fn wipe(&self, event_urls: &[String], cancel: &CancellationToken) -> Vec<(String, Result<(), DavError>)> {
        let mut results = Vec::with_capacity(event_urls.len());
        for (index, url) in event_urls.iter().enumerate() {
            if cancellable_sleep(WIPE_DELETE_PACING, cancel).await.is_err() {
                for remaining in &event_urls[index..] {
                    results.push((remaining.clone(), Err(DavError::Cancelled)));
                }
                break;
            }
            let result = self.delete(url, cancel).await;
            if let Err(ref e) = result {
                warn!(url, error = %e, "delete during wipe failed, backing off");
                if cancellable_sleep(RETRY_DELAY, cancel).await.is_err() {
                    results.push((url.clone(), result));
                    for remaining in &event_urls[index + 1..] {
                        results.push((remaining.clone(), Err(DavError::Cancelled)));
                    }
                    break;
                }
            }
            results.push((url.clone(), result));
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::RawResponse;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeTransport {
        propfind_calls: AtomicUsize,
        propfind_body: Mutex<Option<String>>,
        fail_first_propfind: bool,
        always_auth_fail: bool,
    }

    #[async_trait]
    impl CalDavTransport for FakeTransport {
        async fn propfind(&self, _url: &str, _body: &str, _depth: &str) -> Result<RawResponse, DavError> {
            let n = self.propfind_calls.fetch_add(1, Ordering::SeqCst);
            if self.always_auth_fail {
                return Err(DavError::Auth { status: 401 });
            }
            if self.fail_first_propfind && n == 0 {
                return Err(DavError::Transient("connection reset".into()));
            }
            let body = self
                .propfind_body
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| {
                    r#"<D:multistatus xmlns:D="DAV:">
                        <D:response>
                          <D:href>/cal/outlook-aaa-20260101T000000Z.ics</D:href>
                          <D:propstat><D:prop><D:getetag>"e1"</D:getetag></D:prop><D:status>HTTP/1.1 200 OK</D:status></D:propstat>
                        </D:response>
                        <D:response>
                          <D:href>/cal/other-123.ics</D:href>
                          <D:propstat><D:prop><D:getetag>"e2"</D:getetag></D:prop><D:status>HTTP/1.1 200 OK</D:status></D:propstat>
                        </D:response>
                      </D:multistatus>"#
                        .to_string()
                });
            Ok(RawResponse {
                status: 207,
                body: body.into_bytes(),
                etag: None,
            })
        }

        async fn put(&self, _url: &str, _body: Vec<u8>, _content_type: &str) -> Result<RawResponse, DavError> {
            Ok(RawResponse {
                status: 201,
                body: Vec::new(),
                etag: Some("put-etag".into()),
            })
        }

        async fn get(&self, _url: &str) -> Result<RawResponse, DavError> {
            Ok(RawResponse {
                status: 200,
                body: b"BEGIN:VCALENDAR\r\nEND:VCALENDAR\r\n".to_vec(),
                etag: None,
            })
        }

        async fn delete(&self, _url: &str) -> Result<RawResponse, DavError> {
            Ok(RawResponse {
                status: 204,
                body: Vec::new(),
                etag: None,
            })
        }
    }

    #[tokio::test]
    async fn enumerate_filters_to_managed_uids() {
        let client = CalDavClient::new(FakeTransport::default());
        let result = client
            .enumerate("/cal/", true, |uid| uid.starts_with("outlook-"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.get("outlook-aaa-20260101T000000Z").map(String::as_str), Some("e1"));
    }

    #[tokio::test]
    async fn enumerate_without_filter_returns_all() {
        let client = CalDavClient::new(FakeTransport::default());
        let result = client.enumerate("/cal/", false, |_| false, &CancellationToken::new()).await.unwrap();
        assert_eq!(result.len(), 2);
    }

    #[tokio::test]
    async fn transient_failure_is_retried_once() {
        let transport = FakeTransport {
            fail_first_propfind: true,
            ..Default::default()
        };
        let client = CalDavClient::new(transport);
        let result = client.enumerate("/cal/", false, |_| true, &CancellationToken::new()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn auth_failure_is_never_retried() {
        let transport = FakeTransport {
            always_auth_fail: true,
            ..Default::default()
        };
        let client = CalDavClient::new(transport);
        let result = client.enumerate("/cal/", false, |_| true, &CancellationToken::new()).await;
        assert!(matches!(result, Err(DavError::Auth { status: 401 })));
        assert_eq!(transport_calls(&client), 1);
    }

    fn transport_calls(client: &CalDavClient<FakeTransport>) -> usize {
        client.transport.propfind_calls.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn upsert_returns_new_etag() {
        let client = CalDavClient::new(FakeTransport::default());
        let etag = client
            .upsert("/cal/x.ics", b"BEGIN:VCALENDAR\r\nEND:VCALENDAR\r\n", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(etag.as_deref(), Some("put-etag"));
    }

    #[tokio::test]
    async fn fetch_returns_body() {
        let client = CalDavClient::new(FakeTransport::default());
        let body = client.fetch("/cal/x.ics", &CancellationToken::new()).await.unwrap();
        assert!(body.starts_with(b"BEGIN:VCALENDAR"));
    }

    #[tokio::test]
    async fn wipe_deletes_every_url() {
        let client = CalDavClient::new(FakeTransport::default());
        let urls = vec!["/cal/a.ics".to_string(), "/cal/b.ics".to_string()];
        let results = client.wipe(&urls, &CancellationToken::new()).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, r)| r.is_ok()));
    }

    #[tokio::test(start_paused = true)]
    async fn wipe_stops_within_one_pacing_interval_after_cancellation() {
        let client = CalDavClient::new(FakeTransport::default());
        let urls = vec!["/cal/a.ics".to_string(), "/cal/b.ics".to_string(), "/cal/c.ics".to_string()];
        let cancel = CancellationToken::new();
        cancel.cancel();
        let results = client.wipe(&urls, &cancel).await;
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|(_, r)| matches!(r, Err(DavError::Cancelled))));
    }
}
