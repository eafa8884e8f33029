//! RTSP request line + header parsing, and the `Transport` header
//! sub-grammar (§4.8).

use std::collections::HashMap;

use crate::error::{ParseErrorKind, Result, RtspError};

/// RTSP request methods this reflector routes (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Options,
    Describe,
    Announce,
    Setup,
    Record,
    Play,
    Pause,
    Teardown,
    GetParameter,
    SetParameter,
}

impl Method {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "OPTIONS" => Self::Options,
            "DESCRIBE" => Self::Describe,
            "ANNOUNCE" => Self::Announce,
            "SETUP" => Self::Setup,
            "RECORD" => Self::Record,
            "PLAY" => Self::Play,
            "PAUSE" => Self::Pause,
            "TEARDOWN" => Self::Teardown,
            "GET_PARAMETER" => Self::GetParameter,
            "SET_PARAMETER" => Self::SetParameter,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Options => "OPTIONS",
            Self::Describe => "DESCRIBE",
            Self::Announce => "ANNOUNCE",
            Self::Setup => "SETUP",
            Self::Record => "RECORD",
            Self::Play => "PLAY",
            Self::Pause => "PAUSE",
            Self::Teardown => "TEARDOWN",
            Self::GetParameter => "GET_PARAMETER",
            Self::SetParameter => "SET_PARAMETER",
        }
    }
}

/// Network mode negotiated on a `Transport` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkMode {
    Unicast,
    Multicast,
}

/// Parsed `Transport` header (§4.8): each `;`-separated sub-token matched
/// case-insensitively.
#[derive(Debug, Clone)]
pub struct TransportHeader {
    pub network_mode: NetworkMode,
    pub is_tcp_interleaved: bool,
    /// `mode=record` or `mode=receive`: this SETUP is for the publisher
    /// role.
    pub is_record: bool,
    pub interleaved: Option<(u8, u8)>,
    pub client_port: Option<(u16, u16)>,
}

impl TransportHeader {
    pub fn parse(value: &str) -> Result<Self> {
        let mut network_mode = NetworkMode::Unicast;
        let mut is_tcp_interleaved = false;
        let mut is_record = false;
        let mut interleaved = None;
        let mut client_port = None;

        for raw_token in value.split(';') {
            let token = raw_token.trim();
            if token.is_empty() {
                continue;
            }
            let lower = token.to_ascii_lowercase();

            if lower == "unicast" {
                network_mode = NetworkMode::Unicast;
            } else if lower == "multicast" {
                network_mode = NetworkMode::Multicast;
            } else if lower == "rtp/avp/tcp" || lower == "rtp/avp/tcp/unicast" {
                is_tcp_interleaved = true;
            } else if lower == "mode=record" || lower == "mode=receive" {
                is_record = true;
            } else if let Some(range) = lower.strip_prefix("interleaved=") {
                interleaved = Some(parse_u8_range(range)?);
            } else if let Some(range) = lower.strip_prefix("client_port=") {
                client_port = Some(parse_u16_range(range)?);
            }
        }

        Ok(Self {
            network_mode,
            is_tcp_interleaved,
            is_record,
            interleaved,
            client_port,
        })
    }

    /// Render the server-rewritten `Transport:` value for a SETUP response
    /// (§4.8: "respond 200 with a rewritten Transport that contains the
    /// server-allocated channels/ports").
    pub fn render(&self, server_port: Option<(u16, u16)>) -> String {
        let mut parts = vec![if self.is_tcp_interleaved {
            "RTP/AVP/TCP".to_string()
        } else {
            "RTP/AVP".to_string()
        }];
        parts.push(
            match self.network_mode {
                NetworkMode::Unicast => "unicast",
                NetworkMode::Multicast => "multicast",
            }
            .to_string(),
        );
        if self.is_record {
            parts.push("mode=record".to_string());
        }
        if let Some((a, b)) = self.interleaved {
            parts.push(format!("interleaved={a}-{b}"));
        }
        if let Some((a, b)) = server_port {
            parts.push(format!("server_port={a}-{b}"));
        }
        parts.join(";")
    }
}

fn parse_u8_range(range: &str) -> Result<(u8, u8)> {
    let (a, b) = range
        .split_once('-')
        .ok_or(RtspError::Parse { kind: ParseErrorKind::InvalidTransport })?;
    let a: u8 = a
        .parse()
        .map_err(|_| RtspError::Parse { kind: ParseErrorKind::InvalidTransport })?;
    let b: u8 = b
        .parse()
        .map_err(|_| RtspError::Parse { kind: ParseErrorKind::InvalidTransport })?;
    Ok((a, b))
}

fn parse_u16_range(range: &str) -> Result<(u16, u16)> {
    let (a, b) = range
        .split_once('-')
        .ok_or(RtspError::Parse { kind: ParseErrorKind::InvalidTransport })?;
    let a: u16 = a
        .parse()
        .map_err(|_| RtspError::Parse { kind: ParseErrorKind::InvalidTransport })?;
    let b: u16 = b
        .parse()
        .map_err(|_| RtspError::Parse { kind: ParseErrorKind::InvalidTransport })?;
    Ok((a, b))
}

/// A parsed RTSP request: method, URI split into path/query, version,
/// headers and body (§4.8).
#[derive(Debug, Clone)]
pub struct RtspRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub version: String,
    headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl RtspRequest {
    /// Parse one full request (request line + headers + body) out of
    /// `bytes`. `bytes` must already contain the full body per
    /// `Content-Length` — framing off the wire is the transport layer's job.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| RtspError::Parse { kind: ParseErrorKind::InvalidHeader })?;

        let mut lines = text.split("\r\n");
        let request_line = lines
            .next()
            .filter(|l| !l.is_empty())
            .ok_or(RtspError::Parse { kind: ParseErrorKind::EmptyRequest })?;

        let mut parts = request_line.split_whitespace();
        let method_str = parts
            .next()
            .ok_or(RtspError::Parse { kind: ParseErrorKind::InvalidRequestLine })?;
        let uri = parts
            .next()
            .ok_or(RtspError::Parse { kind: ParseErrorKind::InvalidRequestLine })?;
        let version = parts
            .next()
            .ok_or(RtspError::Parse { kind: ParseErrorKind::InvalidRequestLine })?
            .to_string();

        let method = Method::parse(method_str)
            .ok_or(RtspError::Parse { kind: ParseErrorKind::InvalidRequestLine })?;

        let (path, query) = match uri.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (uri.to_string(), None),
        };
        let path = strip_scheme_and_host(&path);

        let mut headers = HashMap::new();
        let mut body_start = 0usize;
        let mut consumed = request_line.len() + 2;
        for line in lines {
            consumed += line.len() + 2;
            if line.is_empty() {
                body_start = consumed;
                break;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or(RtspError::Parse { kind: ParseErrorKind::InvalidHeader })?;
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }

        let content_length = headers
            .get("content-length")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);

        let body = if content_length > 0 && body_start < bytes.len() {
            bytes[body_start..(body_start + content_length).min(bytes.len())].to_vec()
        } else {
            Vec::new()
        };

        Ok(Self {
            method,
            path,
            query,
            version,
            headers,
            body,
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
    }

    pub fn cseq(&self) -> Option<u32> {
        self.header("cseq").and_then(|v| v.parse().ok())
    }

    pub fn session_id(&self) -> Option<&str> {
        self.header("session")
    }

    pub fn transport(&self) -> Option<Result<TransportHeader>> {
        self.header("transport").map(TransportHeader::parse)
    }

    pub fn body_as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

fn strip_scheme_and_host(uri: &str) -> String {
    if let Some(rest) = uri.strip_prefix("rtsp://") {
        match rest.find('/') {
            Some(idx) => rest[idx..].to_string(),
            None => "/".to_string(),
        }
    } else {
        uri.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_request_line_headers_and_body() {
        let raw = b"ANNOUNCE rtsp://host/live.sdp RTSP/1.0\r\nCSeq: 1\r\nContent-Length: 4\r\nContent-Type: application/sdp\r\n\r\nv=0x";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.method, Method::Announce);
        assert_eq!(req.path, "/live.sdp");
        assert_eq!(req.cseq(), Some(1));
        assert_eq!(req.body, b"v=0x");
    }

    #[test]
    fn rejects_unknown_method() {
        let raw = b"FROB rtsp://host/x RTSP/1.0\r\nCSeq: 1\r\n\r\n";
        assert!(RtspRequest::parse(raw).is_err());
    }

    #[test]
    fn transport_header_parses_interleaved_and_record_mode() {
        let th = TransportHeader::parse("RTP/AVP/TCP;unicast;mode=record;interleaved=0-1").unwrap();
        assert!(th.is_tcp_interleaved);
        assert!(th.is_record);
        assert_eq!(th.interleaved, Some((0, 1)));
        assert_eq!(th.network_mode, NetworkMode::Unicast);
    }

    #[test]
    fn transport_header_rejects_malformed_interleaved_range() {
        assert!(TransportHeader::parse("RTP/AVP/TCP;interleaved=garbage").is_err());
    }

    #[test]
    fn strips_scheme_and_host_from_absolute_uri() {
        assert_eq!(strip_scheme_and_host("rtsp://host:554/live.sdp/trackID=1"), "/live.sdp/trackID=1");
        assert_eq!(strip_scheme_and_host("/already/relative"), "/already/relative");
    }
}
