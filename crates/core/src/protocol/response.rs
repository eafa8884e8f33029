//! RTSP response building (§4.8, §6).

use std::collections::BTreeMap;

/// A builder for an RTSP response: status line, headers (insertion order
/// stable via `BTreeMap` for deterministic wire output), and an optional
/// body.
#[derive(Debug, Clone)]
pub struct RtspResponse {
    status: u16,
    reason: &'static str,
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
}

impl RtspResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            reason: reason_phrase(status),
            headers: BTreeMap::new(),
            body: Vec::new(),
        }
    }

    pub fn ok() -> Self {
        Self::new(200)
    }

    pub fn bad_request() -> Self {
        Self::new(400)
    }

    pub fn not_found() -> Self {
        Self::new(404)
    }

    pub fn precondition_failed() -> Self {
        Self::new(412)
    }

    pub fn unsupported_media_type() -> Self {
        Self::new(415)
    }

    pub fn internal_error() -> Self {
        Self::new(500)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn cseq(self, cseq: u32) -> Self {
        self.header("CSeq", cseq.to_string())
    }

    pub fn session(self, session_id: impl Into<String>) -> Self {
        self.header("Session", session_id.into())
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>, content_type: &str) -> Self {
        self.body = body.into();
        self.headers
            .insert("Content-Type".to_string(), content_type.to_string());
        self.headers
            .insert("Content-Length".to_string(), self.body.len().to_string());
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// Serialize to wire bytes: status line, headers, blank line, body.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = format!("RTSP/1.0 {} {}\r\n", self.status, self.reason).into_bytes();
        for (name, value) in &self.headers {
            out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        412 => "Precondition Failed",
        415 => "Unsupported Media Type",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_status_line_headers_and_body() {
        let resp = RtspResponse::ok()
            .cseq(2)
            .body(b"v=0\r\n".to_vec(), "application/sdp");
        let bytes = resp.to_bytes();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("RTSP/1.0 200 OK\r\n"));
        assert!(text.contains("CSeq: 2\r\n"));
        assert!(text.contains("Content-Length: 5\r\n"));
        assert!(text.ends_with("v=0\r\n"));
    }

    #[test]
    fn no_body_has_empty_content_length_absent() {
        let resp = RtspResponse::not_found().cseq(1);
        let text = String::from_utf8(resp.to_bytes()).unwrap();
        assert!(!text.contains("Content-Length"));
    }
}
