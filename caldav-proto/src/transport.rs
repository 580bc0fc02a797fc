// caldav-proto/src/transport.rs
//! Wire transport for CalDAV requests.
//!
//! Hides the concrete hyper/tower generic stack behind a small trait and
//! exposes raw method/body/header control, since CalDAV here needs a
//! custom PROPFIND body and Basic auth rather than pre-baked operations.

use crate::error::DavError;
use async_trait::async_trait;
use http::{Method, Request};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tower_http::auth::AddAuthorization;
use tower_service::Service;

/// A raw, already-buffered HTTP response.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub etag: Option<String>,
}

impl RawResponse {
    pub fn body_str(&self) -> Result<String, DavError> {
        String::from_utf8(self.body.clone()).map_err(|e| DavError::Parse(e.to_string()))
    }
}

/// The operations the reconciler needs against a CalDAV collection.
///
/// Implemented once against real hyper transport ([`HyperTransport`]); a
/// second, in-memory implementation backs the crate's unit tests (see
/// `sync-core`'s reconciler tests).
#[async_trait]
pub trait CalDavTransport: Send + Sync {
    async fn propfind(&self, url: &str, body: &str, depth: &str) -> Result<RawResponse, DavError>;
    async fn put(&self, url: &str, body: Vec<u8>, content_type: &str) -> Result<RawResponse, DavError>;
    async fn get(&self, url: &str) -> Result<RawResponse, DavError>;
    async fn delete(&self, url: &str) -> Result<RawResponse, DavError>;
}

type HttpsClient = Client<hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>, Full<Bytes>>;

/// Hyper-backed transport, authenticated with HTTP Basic.
pub struct HyperTransport {
    client: AddAuthorization<HttpsClient>,
    user_agent: String,
}

impl HyperTransport {
    pub fn new(user: &str, password: &str, user_agent: impl Into<String>) -> Result<Self, DavError> {
        let https = HttpsConnectorBuilder::new()
            .with_native_roots()
            .map_err(|e| DavError::Transient(format!("TLS roots: {e}")))?
            .https_or_http()
            .enable_http1()
            .build();

        let inner: HttpsClient = Client::builder(TokioExecutor::new()).build(https);
        let client = AddAuthorization::basic(inner, user, password);

        Ok(Self {
            client,
            user_agent: user_agent.into(),
        })
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
        extra_headers: &[(&str, &str)],
    ) -> Result<RawResponse, DavError> {
        let mut builder = Request::builder()
            .method(method)
            .uri(url)
            .header("User-Agent", &self.user_agent);

        if let Some(ct) = content_type {
            builder = builder.header("Content-Type", ct);
        }
        for (k, v) in extra_headers {
            builder = builder.header(*k, *v);
        }

        let request = builder
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| DavError::Transient(format!("request build: {e}")))?;

        let mut client = self.client.clone();
        let response = Service::call(&mut client, request)
            .await
            .map_err(|e| DavError::Transient(format!("{e}")))?;

        let status = response.status().as_u16();
        let etag = response
            .headers()
            .get("ETag")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim_matches('"').to_string());

        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| DavError::Transient(format!("body read: {e}")))?
            .to_bytes()
            .to_vec();

        if status >= 400 {
            let snippet = String::from_utf8_lossy(&body[..body.len().min(200)]).to_string();
            return Err(DavError::from_status(status, snippet));
        }

        Ok(RawResponse { status, body, etag })
    }
}

impl Clone for HyperTransport {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            user_agent: self.user_agent.clone(),
        }
    }
}

#[async_trait]
impl CalDavTransport for HyperTransport {
    async fn propfind(&self, url: &str, body: &str, depth: &str) -> Result<RawResponse, DavError> {
        self.send(
            Method::from_bytes(b"PROPFIND").unwrap(),
            url,
            body.as_bytes().to_vec(),
            Some("application/xml; charset=utf-8"),
            &[("Depth", depth)],
        )
        .await
    }

    async fn put(&self, url: &str, body: Vec<u8>, content_type: &str) -> Result<RawResponse, DavError> {
        self.send(Method::PUT, url, body, Some(content_type), &[]).await
    }

    async fn get(&self, url: &str) -> Result<RawResponse, DavError> {
        self.send(Method::GET, url, Vec::new(), None, &[]).await
    }

    async fn delete(&self, url: &str) -> Result<RawResponse, DavError> {
        self.send(Method::DELETE, url, Vec::new(), None, &[]).await
    }
}
