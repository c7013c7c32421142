//! Rekor transparency log client.
//!
//! Endpoints used:
//! - `GET  /api/v1/log/entries/{uuid}` and `GET /api/v1/log/entries?logIndex=n`
//! - `POST /api/v1/log/entries` with a `hashedrekord` v0.0.1 entry
//! - `POST /api/v1/index/retrieve` to find an existing entry by hash
//!
//! Every request carries the configured timeout. Connection failures,
//! timeouts and 5xx answers are reported as unreachable; a 4xx answer or an
//! unreadable entry means the log answered without confirming anything.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use salsag_ledger::{Digest, LogEntry, LogRef, LogSubmission, TransparencyError, TransparencyLog};
use serde_json::{json, Value};
use tracing::{debug, warn};

pub struct RekorLog {
    base: String,
    client: Client,
    timeout: Duration,
}

impl RekorLog {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, TransparencyError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(concat!("salsag/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransparencyError::Unreachable(e.to_string()))?;
        Ok(Self {
            base: format!("{}/api/v1", url.trim_end_matches('/')),
            client,
            timeout,
        })
    }

    fn map_err(&self, err: reqwest::Error) -> TransparencyError {
        if err.is_timeout() {
            TransparencyError::Timeout(self.timeout)
        } else {
            TransparencyError::Unreachable(err.to_string())
        }
    }

    /// UUIDs of entries attesting to `digest`, most relevant first.
    pub fn search_by_hash(&self, digest: &Digest) -> Result<Vec<String>, TransparencyError> {
        let response = self
            .client
            .post(format!("{}/index/retrieve", self.base))
            .json(&json!({ "hash": digest.to_string() }))
            .send()
            .map_err(|e| self.map_err(e))?;
        if !response.status().is_success() {
            return Err(status_error("index/retrieve", response.status()));
        }
        response
            .json::<Vec<String>>()
            .map_err(|e| TransparencyError::Malformed(e.to_string()))
    }
}

impl TransparencyLog for RekorLog {
    fn submit(&self, entry: &LogSubmission) -> Result<LogRef, TransparencyError> {
        let response = self
            .client
            .post(format!("{}/log/entries", self.base))
            .json(&hashedrekord(entry))
            .send()
            .map_err(|e| self.map_err(e))?;

        let status = response.status();
        match status {
            StatusCode::CREATED | StatusCode::OK => {
                let body: Value = response
                    .json()
                    .map_err(|e| TransparencyError::Malformed(e.to_string()))?;
                let uuid = body
                    .as_object()
                    .and_then(|m| m.keys().next().cloned())
                    .ok_or_else(|| TransparencyError::Malformed("empty entry response".to_string()))?;
                debug!(uuid = %uuid, "transparency entry created");
                Ok(LogRef::new(uuid))
            }
            StatusCode::CONFLICT => {
                let from_location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|loc| loc.rsplit('/').next())
                    .filter(|s| !s.is_empty())
                    .map(str::to_string);
                if let Some(uuid) = from_location {
                    debug!(uuid = %uuid, "transparency entry already present");
                    return Ok(LogRef::new(uuid));
                }
                self.search_by_hash(&entry.digest)?
                    .into_iter()
                    .next()
                    .map(LogRef::new)
                    .ok_or_else(|| TransparencyError::Malformed("conflict without an existing entry".to_string()))
            }
            other => {
                let text = response.text().unwrap_or_default();
                warn!(status = %other, "transparency log rejected entry");
                Err(TransparencyError::Rejected(format!("{}: {}", other, text.trim())))
            }
        }
    }

    fn lookup(&self, log_ref: &LogRef) -> Result<Option<LogEntry>, TransparencyError> {
        let url = if log_ref.is_log_index() {
            format!("{}/log/entries?logIndex={}", self.base, log_ref)
        } else {
            format!("{}/log/entries/{}", self.base, log_ref)
        };
        let response = self.client.get(url).send().map_err(|e| self.map_err(e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => {
                let body: Value = response
                    .json()
                    .map_err(|e| TransparencyError::Malformed(e.to_string()))?;
                parse_entry(log_ref, &body)
            }
            s => Err(status_error("entry lookup", s)),
        }
    }
}

fn status_error(call: &str, status: StatusCode) -> TransparencyError {
    let message = format!("{} returned {}", call, status);
    if status.is_server_error() {
        TransparencyError::Unreachable(message)
    } else {
        TransparencyError::Rejected(message)
    }
}

/// Build a `hashedrekord` v0.0.1 proposed entry.
///
/// Signatures that are already base64 text (cosign output) are passed
/// through; raw signatures are encoded.
pub fn hashedrekord(entry: &LogSubmission) -> Value {
    let sig_text = std::str::from_utf8(&entry.signature).map(str::trim).ok();
    let signature = match sig_text {
        Some(text) if STANDARD.decode(text).is_ok() => text.to_string(),
        _ => STANDARD.encode(&entry.signature),
    };
    json!({
        "apiVersion": "0.0.1",
        "kind": "hashedrekord",
        "spec": {
            "data": {
                "hash": { "algorithm": "sha256", "value": entry.digest.to_hex() }
            },
            "signature": {
                "content": signature,
                "publicKey": { "content": STANDARD.encode(&entry.certificate) }
            }
        }
    })
}

/// Parse a `{ "<uuid>": { "body": <base64 json>, ... } }` response.
pub fn parse_entry(requested: &LogRef, body: &Value) -> Result<Option<LogEntry>, TransparencyError> {
    let Some((uuid, entry)) = body.as_object().and_then(|m| m.iter().next()) else {
        return Ok(None);
    };

    let encoded = entry
        .get("body")
        .and_then(Value::as_str)
        .ok_or_else(|| TransparencyError::Malformed("entry has no body".to_string()))?;
    let decoded = STANDARD
        .decode(encoded)
        .map_err(|e| TransparencyError::Malformed(format!("body is not base64: {}", e)))?;
    let inner: Value =
        serde_json::from_slice(&decoded).map_err(|e| TransparencyError::Malformed(e.to_string()))?;

    let hash = inner
        .pointer("/spec/data/hash/value")
        .and_then(Value::as_str)
        .ok_or_else(|| TransparencyError::Malformed("entry body has no spec.data.hash.value".to_string()))?;
    let digest: Digest = hash
        .parse()
        .map_err(|e| TransparencyError::Malformed(format!("entry hash {:?}: {}", hash, e)))?;

    let log_ref = if requested.is_log_index() {
        LogRef::new(uuid.clone())
    } else {
        requested.clone()
    };

    Ok(Some(LogEntry {
        log_ref,
        digest,
        log_index: entry.get("logIndex").and_then(Value::as_u64),
        integrated_time: entry.get("integratedTime").and_then(Value::as_i64),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use salsag_ledger::digest;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    fn entry_body(hex: &str) -> Value {
        let inner = json!({"kind": "hashedrekord", "spec": {"data": {"hash": {"algorithm": "sha256", "value": hex}}}});
        json!({
            "24296fb24b8ad77a": {
                "body": STANDARD.encode(inner.to_string()),
                "logIndex": 7,
                "integratedTime": 1700000000
            }
        })
    }

    /// Serve one canned HTTP response on a local port.
    fn serve_once(status_line: &'static str, body: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf);
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status_line,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_parse_entry_extracts_hash() {
        let d = digest(b"artifact");
        let parsed = parse_entry(&LogRef::new("24296fb24b8ad77a"), &entry_body(&d.to_hex()))
            .unwrap()
            .unwrap();
        assert_eq!(parsed.digest, d);
        assert_eq!(parsed.log_index, Some(7));
        assert_eq!(parsed.integrated_time, Some(1_700_000_000));
    }

    #[test]
    fn test_parse_entry_by_index_reports_uuid() {
        let d = digest(b"artifact");
        let parsed = parse_entry(&LogRef::new("7"), &entry_body(&d.to_hex())).unwrap().unwrap();
        assert_eq!(parsed.log_ref, LogRef::new("24296fb24b8ad77a"));
    }

    #[test]
    fn test_parse_entry_malformed_body() {
        let body = json!({"u": {"body": "!!not base64!!"}});
        assert!(matches!(
            parse_entry(&LogRef::new("u"), &body),
            Err(TransparencyError::Malformed(_))
        ));
        assert!(parse_entry(&LogRef::new("u"), &json!({})).unwrap().is_none());
    }

    #[test]
    fn test_hashedrekord_shape() {
        let d = digest(b"a");
        let body = hashedrekord(&LogSubmission {
            digest: d,
            signature: b"c2lnbmF0dXJl".to_vec(),
            certificate: b"-----BEGIN CERTIFICATE-----".to_vec(),
        });
        assert_eq!(body["kind"], "hashedrekord");
        assert_eq!(body["apiVersion"], "0.0.1");
        assert_eq!(body["spec"]["data"]["hash"]["value"], d.to_hex());
        assert_eq!(body["spec"]["signature"]["content"], "c2lnbmF0dXJl");
    }

    #[test]
    fn test_lookup_over_http() {
        let d = digest(b"artifact");
        let url = serve_once("200 OK", entry_body(&d.to_hex()).to_string());
        let log = RekorLog::new(&url, Duration::from_secs(5)).unwrap();
        let entry = log.lookup(&LogRef::new("24296fb24b8ad77a")).unwrap().unwrap();
        assert_eq!(entry.digest, d);
    }

    #[test]
    fn test_lookup_not_found_is_none() {
        let url = serve_once("404 Not Found", "{}".to_string());
        let log = RekorLog::new(&url, Duration::from_secs(5)).unwrap();
        assert!(log.lookup(&LogRef::new("missing")).unwrap().is_none());
    }

    #[test]
    fn test_lookup_status_classes() {
        let url = serve_once("503 Service Unavailable", "{}".to_string());
        let log = RekorLog::new(&url, Duration::from_secs(5)).unwrap();
        let err = log.lookup(&LogRef::new("abc")).unwrap_err();
        assert!(err.is_unavailable(), "{}", err);

        let url = serve_once("400 Bad Request", "{}".to_string());
        let log = RekorLog::new(&url, Duration::from_secs(5)).unwrap();
        let err = log.lookup(&LogRef::new("abc")).unwrap_err();
        assert!(matches!(err, TransparencyError::Rejected(_)));
        assert!(!err.is_unavailable());
    }

    #[test]
    fn test_unreachable_log() {
        // Bind then drop to get a port with nothing listening.
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let log = RekorLog::new(&format!("http://127.0.0.1:{}", port), Duration::from_secs(2)).unwrap();
        assert!(matches!(
            log.lookup(&LogRef::new("abc")),
            Err(TransparencyError::Unreachable(_)) | Err(TransparencyError::Timeout(_))
        ));
    }
}
