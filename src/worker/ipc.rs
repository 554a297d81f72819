//! Worker IPC wire format.
//!
//! Parent and child exchange newline-delimited JSON frames over the child's
//! stdin/stdout. The request/response body is carried as a base64 field
//! inside the frame rather than a true by-reference byte buffer — the
//! nearest practical equivalent of the spec's "binary buffer passed by
//! reference where the runtime supports it" once the transport is a pipe
//! rather than an in-process channel.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A request bound for a worker, transport-agnostic.
#[derive(Debug, Clone)]
pub struct WorkerHttpRequest {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

/// A worker's response, transport-agnostic.
#[derive(Debug, Clone)]
pub struct WorkerHttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

/// Parent → child frames.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum ParentFrame {
    #[serde(rename = "REQUEST")]
    Request {
        #[serde(rename = "reqId")]
        req_id: Uuid,
        req: RequestFields,
    },
    /// Advisory, sent once when `idleTimeoutMs` elapses.
    #[serde(rename = "IDLE")]
    Idle,
    /// Advisory graceful-shutdown signal.
    #[serde(rename = "TERMINATE")]
    Terminate,
}

#[derive(Serialize, Debug, Clone)]
pub struct RequestFields {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    /// Base64-encoded body bytes.
    pub body: String,
}

impl ParentFrame {
    pub fn request(req_id: Uuid, req: &WorkerHttpRequest) -> Self {
        ParentFrame::Request {
            req_id,
            req: RequestFields {
                method: req.method.clone(),
                url: req.url.clone(),
                headers: req.headers.clone(),
                body: BASE64.encode(&req.body),
            },
        }
    }

    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut s = serde_json::to_string(self)?;
        s.push('\n');
        Ok(s)
    }
}

/// Child → parent frames.
#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum ChildFrame {
    #[serde(rename = "READY")]
    Ready,
    #[serde(rename = "RESPONSE")]
    Response {
        #[serde(rename = "reqId")]
        req_id: Uuid,
        status: u16,
        headers: HashMap<String, String>,
        /// Base64-encoded body bytes.
        body: String,
    },
    #[serde(rename = "ERROR")]
    Error {
        #[serde(rename = "reqId")]
        req_id: Uuid,
        message: String,
    },
    /// Unknown message types are ignored by both sides.
    #[serde(other)]
    Unknown,
}

impl ChildFrame {
    pub fn parse_line(line: &str) -> Option<Self> {
        serde_json::from_str(line).ok()
    }
}

pub fn decode_body(encoded: &str) -> Bytes {
    BASE64
        .decode(encoded)
        .map(Bytes::from)
        .unwrap_or_else(|_| Bytes::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_frame_round_trips_through_json() {
        let req = WorkerHttpRequest {
            method: "POST".to_string(),
            url: "/echo".to_string(),
            headers: HashMap::from([("content-type".to_string(), "text/plain".to_string())]),
            body: Bytes::from_static(b"hello"),
        };
        let req_id = Uuid::new_v4();
        let line = ParentFrame::request(req_id, &req).to_line().unwrap();
        assert!(line.ends_with('\n'));
        assert!(line.contains("\"type\":\"REQUEST\""));
        assert!(line.contains(&req_id.to_string()));
    }

    #[test]
    fn child_frame_parses_ready_response_and_error() {
        assert!(matches!(
            ChildFrame::parse_line(r#"{"type":"READY"}"#),
            Some(ChildFrame::Ready)
        ));

        let req_id = Uuid::new_v4();
        let line = format!(
            r#"{{"type":"RESPONSE","reqId":"{req_id}","status":200,"headers":{{}},"body":"aGVsbG8="}}"#
        );
        match ChildFrame::parse_line(&line) {
            Some(ChildFrame::Response { status, body, .. }) => {
                assert_eq!(status, 200);
                assert_eq!(decode_body(&body), Bytes::from_static(b"hello"));
            }
            other => panic!("expected RESPONSE, got {other:?}"),
        }

        let line = format!(r#"{{"type":"ERROR","reqId":"{req_id}","message":"boom"}}"#);
        match ChildFrame::parse_line(&line) {
            Some(ChildFrame::Error { message, .. }) => assert_eq!(message, "boom"),
            other => panic!("expected ERROR, got {other:?}"),
        }
    }

    #[test]
    fn unknown_message_type_is_ignored_not_an_error() {
        assert!(matches!(
            ChildFrame::parse_line(r#"{"type":"SOMETHING_ELSE"}"#),
            Some(ChildFrame::Unknown)
        ));
    }

    #[test]
    fn malformed_line_fails_to_parse() {
        assert!(ChildFrame::parse_line("not json").is_none());
    }

    #[test]
    fn decode_body_returns_empty_bytes_on_invalid_base64() {
        assert_eq!(decode_body("not-valid-base64!!"), Bytes::new());
    }
}
