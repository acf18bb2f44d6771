//! Builds [`ReportLog`] values from intercepted requests and responses.

use std::collections::BTreeMap;

use {
    bytes::Bytes,
    http::{HeaderMap, Request, Response, Uri, header::CONTENT_TYPE},
};

use crate::{Error, LogType, ReportLog, content_type::is_parseable};

/// The request half of a report, captured before the request is handed to
/// the transport.
#[derive(Debug, Clone)]
pub(crate) struct ReportDraft {
    protocol: String,
    path: String,
    hostname: String,
    method: String,
    url: String,
    request_headers: BTreeMap<String, String>,
    request_body: Option<String>,
    max_body_bytes: usize,
}

impl ReportDraft {
    pub(crate) fn from_request(request: &Request<Bytes>, max_body_bytes: usize) -> Self {
        let uri = request.uri();
        Self {
            protocol: uri.scheme_str().unwrap_or_default().to_string(),
            path: uri.path().to_string(),
            hostname: hostname(uri).unwrap_or_default().to_string(),
            method: request.method().to_string(),
            url: uri.to_string(),
            request_headers: header_map(request.headers()),
            request_body: capture_body(request.headers(), request.body(), max_body_bytes),
            max_body_bytes,
        }
    }

    /// Complete the report with the upstream response.
    pub(crate) fn finish(self, response: &Response<Bytes>, started_at: i64, ended_at: i64) -> ReportLog {
        let response_body = capture_body(response.headers(), response.body(), self.max_body_bytes);
        self.into_log(LogType::RequestEnd, started_at, ended_at, ReportOutcome {
            status_code: response.status().as_u16(),
            response_headers: header_map(response.headers()),
            response_body,
            error_message: None,
        })
    }

    /// Complete the report for a call that produced no response.
    pub(crate) fn failed(self, error: &Error, started_at: i64, ended_at: i64) -> ReportLog {
        self.into_log(LogType::RequestError, started_at, ended_at, ReportOutcome {
            status_code: 0,
            response_headers: BTreeMap::new(),
            response_body: None,
            error_message: Some(error.to_string()),
        })
    }

    fn into_log(self, log_type: LogType, started_at: i64, ended_at: i64, outcome: ReportOutcome) -> ReportLog {
        ReportLog {
            protocol: self.protocol,
            path: self.path,
            hostname: self.hostname,
            method: self.method,
            started_at,
            ended_at,
            log_type,
            status_code: outcome.status_code,
            url: self.url,
            request_headers: self.request_headers,
            request_body: self.request_body,
            response_headers: outcome.response_headers,
            response_body: outcome.response_body,
            error_message: outcome.error_message,
        }
    }
}

struct ReportOutcome {
    status_code: u16,
    response_headers: BTreeMap<String, String>,
    response_body: Option<String>,
    error_message: Option<String>,
}

/// The URI host without the brackets around an IPv6 literal.
pub(crate) fn hostname(uri: &Uri) -> Option<&str> {
    let host = uri.host()?;
    Some(
        host.strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host),
    )
}

/// Flatten headers into name → value, joining repeated names with `", "`.
/// Values that are not visible ASCII are skipped.
fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut map: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            continue;
        };
        map.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    map
}

/// The body as text when its content type is parseable, cut at `max_bytes`.
fn capture_body(headers: &HeaderMap, body: &Bytes, max_bytes: usize) -> Option<String> {
    let content_type = headers.get(CONTENT_TYPE)?.to_str().ok()?;
    if !is_parseable(content_type) {
        return None;
    }
    let end = body.len().min(max_bytes);
    Some(String::from_utf8_lossy(&body[..end]).into_owned())
}
