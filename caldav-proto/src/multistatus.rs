// caldav-proto/src/multistatus.rs
//! PROPFIND multistatus response parsing.
//!
//! The collection enumerate operation asks the server for `getetag` (and,
//! at the collection level, `getctag`) via a Depth:1 PROPFIND and gets
//! back a `DAV:multistatus` body with one `DAV:response` per resource.
//! This module turns that body into plain `ResourceStatus` values.

use crate::error::DavError;
use quick_xml::events::Event;
use quick_xml::Reader;

/// One `<D:response>` entry: a resource href paired with its etag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceStatus {
    pub href: String,
    pub etag: Option<String>,
}

impl ResourceStatus {
    /// The last path segment with a `.ics` suffix stripped, or `None` if
    /// the href doesn't name an `.ics` resource (e.g. the collection's own
    /// self-referential response entry).
    pub fn uid(&self) -> Option<String> {
        let last = self.href.rsplit('/').next().unwrap_or(&self.href);
        last.strip_suffix(".ics").map(|s| s.to_string())
    }
}

/// Parses a `DAV:multistatus` response body into one `ResourceStatus` per
/// `DAV:response` element, keeping only entries that name an `.ics`
/// resource.
pub fn parse_multistatus(xml: &[u8]) -> Result<Vec<ResourceStatus>, DavError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut out = Vec::new();

    let mut in_response = false;
    let mut in_href = false;
    let mut in_getetag = false;
    let mut in_propstat_ok = false;
    let mut status_text = String::new();

    let mut current_href: Option<String> = None;
    let mut current_etag: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf).map_err(|e| DavError::Parse(e.to_string()))? {
            Event::Start(ref e) => {
                let local = local_name(e.name().as_ref());
                match local.as_str() {
                    "response" => {
                        in_response = true;
                        current_href = None;
                        current_etag = None;
                    }
                    "href" if in_response => in_href = true,
                    "getetag" if in_response => in_getetag = true,
                    "status" if in_response => status_text.clear(),
                    _ => {}
                }
            }
            Event::Text(e) => {
                let text = e
                    .unescape()
                    .map_err(|err| DavError::Parse(err.to_string()))?
                    .into_owned();
                if in_href {
                    current_href = Some(text);
                } else if in_getetag {
                    current_etag = Some(text.trim_matches('"').to_string());
                } else {
                    status_text.push_str(&text);
                }
            }
            Event::End(ref e) => {
                let local = local_name(e.name().as_ref());
                match local.as_str() {
                    "href" => in_href = false,
                    "getetag" => in_getetag = false,
                    "status" => {
                        in_propstat_ok = status_text.contains("200");
                    }
                    "propstat" => {
                        if !in_propstat_ok {
                            current_etag = None;
                        }
                        in_propstat_ok = false;
                    }
                    "response" => {
                        in_response = false;
                        if let Some(href) = current_href.take() {
                            out.push(ResourceStatus {
                                href,
                                etag: current_etag.take(),
                            });
                        }
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}

/// Strips a namespace prefix (`D:response` -> `response`); quick-xml's
/// `local_name()` already does this for well-formed prefixed names, but
/// servers are inconsistent about declaring `DAV:` under a stable prefix
/// so this is a defensive second pass over the raw qualified name.
fn local_name(qname: &[u8]) -> String {
    let s = std::str::from_utf8(qname).unwrap_or("");
    match s.rsplit_once(':') {
        Some((_, local)) => local.to_string(),
        None => s.to_string(),
    }
}

/// Extracts the collection-level `getctag`, if the server returned one on
/// the collection's own (self-href) response entry.
pub fn parse_ctag(xml: &[u8]) -> Result<Option<String>, DavError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut in_ctag = false;

    loop {
        match reader.read_event_into(&mut buf).map_err(|e| DavError::Parse(e.to_string()))? {
            Event::Start(ref e) => {
                if local_name(e.name().as_ref()) == "getctag" {
                    in_ctag = true;
                }
            }
            Event::Text(e) if in_ctag => {
                let text = e
                    .unescape()
                    .map_err(|err| DavError::Parse(err.to_string()))?
                    .into_owned();
                return Ok(Some(text));
            }
            Event::End(ref e) => {
                if local_name(e.name().as_ref()) == "getctag" {
                    in_ctag = false;
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(None)
}

/// Builds the PROPFIND request body used for collection enumeration
/// (`getetag` per resource, `getctag` on the collection itself).
pub fn build_propfind_body() -> &'static str {
    r#"<?xml version="1.0" encoding="utf-8" ?>
<D:propfind xmlns:D="DAV:" xmlns:CS="http://calendarserver.org/ns/">
  <D:prop>
    <D:getetag/>
    <CS:getctag/>
  </D:prop>
</D:propfind>"#
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:multistatus xmlns:D="DAV:" xmlns:CS="http://calendarserver.org/ns/">
  <D:response>
    <D:href>/calendars/user/work/</D:href>
    <D:propstat>
      <D:prop>
        <D:getetag>"coll-etag-1"</D:getetag>
        <CS:getctag>ctag-42</CS:getctag>
      </D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
  <D:response>
    <D:href>/calendars/user/work/outlook-abcdef-20260101T120000Z.ics</D:href>
    <D:propstat>
      <D:prop>
        <D:getetag>"event-etag-1"</D:getetag>
      </D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
  <D:response>
    <D:href>/calendars/user/work/unmanaged-123.ics</D:href>
    <D:propstat>
      <D:prop>
        <D:getetag>"event-etag-2"</D:getetag>
      </D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
</D:multistatus>"#;

    #[test]
    fn parses_all_response_entries() {
        let entries = parse_multistatus(SAMPLE.as_bytes()).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].href, "/calendars/user/work/");
        assert_eq!(entries[0].etag.as_deref(), Some("coll-etag-1"));
    }

    #[test]
    fn extracts_uid_from_ics_hrefs_only() {
        let entries = parse_multistatus(SAMPLE.as_bytes()).unwrap();
        assert_eq!(entries[0].uid(), None);
        assert_eq!(
            entries[1].uid().as_deref(),
            Some("outlook-abcdef-20260101T120000Z")
        );
        assert_eq!(entries[2].uid().as_deref(), Some("unmanaged-123"));
    }

    #[test]
    fn reads_collection_ctag() {
        let ctag = parse_ctag(SAMPLE.as_bytes()).unwrap();
        assert_eq!(ctag.as_deref(), Some("ctag-42"));
    }

    #[test]
    fn missing_ctag_returns_none() {
        let xml = r#"<D:multistatus xmlns:D="DAV:"><D:response><D:href>/a</D:href></D:response></D:multistatus>"#;
        assert_eq!(parse_ctag(xml.as_bytes()).unwrap(), None);
    }

    #[test]
    fn strips_quotes_from_etag() {
        let entries = parse_multistatus(SAMPLE.as_bytes()).unwrap();
        assert!(!entries[1].etag.as_deref().unwrap().contains('"'));
    }
}
