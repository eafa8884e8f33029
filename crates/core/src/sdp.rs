//! SDP adapter: the boundary between ANNOUNCE'd SDP text and the
//! `StreamInfo` values the reflector core actually needs (§4.11).
//!
//! The upstream SDP parser is an external collaborator per the core
//! spec; this module defines that boundary as a trait so a fuller parser
//! can be substituted without touching `ReflectorSession`.

use std::net::{IpAddr, Ipv4Addr};

use crate::config::ReflectorConfig;
use crate::error::{Result, RtspError};
use crate::stream::{StreamInfo, TransportKind};

/// Turns ANNOUNCE'd SDP text into the `StreamInfo` values the reflector
/// binds sockets for. Swappable so a caller can plug in a fuller parser.
pub trait SdpParser: Send + Sync {
    fn parse(&self, sdp_text: &str) -> Result<Vec<StreamInfo>>;
}

/// A parser good enough to drive the end-to-end scenarios: one `StreamInfo`
/// per `m=` line, payload name and clock rate from `a=rtpmap`, track id
/// from `a=control:trackID=N` (falling back to positional index), and
/// destination/port/TTL from the `m=`/`c=` lines.
pub struct SimpleSdpParser;

impl SdpParser for SimpleSdpParser {
    fn parse(&self, sdp_text: &str) -> Result<Vec<StreamInfo>> {
        let mut infos = Vec::new();
        let mut current: Option<PendingStream> = None;
        let mut session_ttl: u32 = 16;
        let mut session_dest = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

        for raw_line in sdp_text.lines() {
            let line = raw_line.trim_end_matches('\r');
            if let Some(rest) = line.strip_prefix("c=") {
                let (ip, ttl) = parse_connection_line(rest)?;
                if let Some(pending) = current.as_mut() {
                    pending.dest_ip = ip;
                    pending.ttl = ttl.unwrap_or(session_ttl);
                } else {
                    session_dest = ip;
                    if let Some(t) = ttl {
                        session_ttl = t;
                    }
                }
                continue;
            }

            if let Some(rest) = line.strip_prefix("m=") {
                if let Some(pending) = current.take() {
                    infos.push(pending.finish(infos.len() as u32 + 1));
                }
                current = Some(parse_media_line(rest, session_dest, session_ttl)?);
                continue;
            }

            if let Some(rest) = line.strip_prefix("a=rtpmap:")
                && let Some(pending) = current.as_mut()
            {
                apply_rtpmap(pending, rest);
                continue;
            }

            if let Some(rest) = line.strip_prefix("a=control:track")
                && let Some(pending) = current.as_mut()
            {
                if let Some(id_str) = rest.strip_prefix("ID=")
                    && let Ok(id) = id_str.trim().parse::<u32>()
                {
                    pending.track_id = Some(id);
                    pending.track_name = format!("trackID={id}");
                }
                continue;
            }
        }

        if let Some(pending) = current.take() {
            infos.push(pending.finish(infos.len() as u32 + 1));
        }

        if infos.is_empty() {
            return Err(RtspError::MalformedSdp("no m= lines found".into()));
        }

        Ok(infos)
    }
}

struct PendingStream {
    dest_ip: IpAddr,
    dest_port: u16,
    ttl: u32,
    payload_type: u8,
    payload_name: String,
    timescale: u32,
    track_id: Option<u32>,
    track_name: String,
}

impl PendingStream {
    fn finish(self, fallback_track_id: u32) -> StreamInfo {
        let track_id = self.track_id.unwrap_or(fallback_track_id);
        StreamInfo {
            src_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            dest_ip: self.dest_ip,
            dest_port: self.dest_port,
            ttl: self.ttl,
            payload_type: self.payload_type,
            payload_name: self.payload_name,
            track_id,
            track_name: self.track_name,
            transport_kind: TransportKind::Udp,
            setup_to_receive: true,
            buffer_delay_s: 3.0,
            timescale: self.timescale,
        }
    }
}

fn parse_connection_line(rest: &str) -> Result<(IpAddr, Option<u32>)> {
    // "IN IP4 <addr>[/<ttl>]"
    let mut fields = rest.split_whitespace();
    let _net_type = fields.next();
    let _addr_type = fields.next();
    let addr_field = fields
        .next()
        .ok_or_else(|| RtspError::MalformedSdp("c= line missing address".into()))?;
    let mut parts = addr_field.splitn(2, '/');
    let addr_str = parts.next().unwrap_or_default();
    let ttl = parts.next().and_then(|t| t.parse::<u32>().ok());
    let ip: Ipv4Addr = addr_str
        .parse()
        .map_err(|_| RtspError::MalformedSdp(format!("bad c= address: {addr_str}")))?;
    Ok((IpAddr::V4(ip), ttl))
}

fn parse_media_line(rest: &str, dest_ip: IpAddr, ttl: u32) -> Result<PendingStream> {
    // "video 0 RTP/AVP 96"
    let mut fields = rest.split_whitespace();
    let _media_type = fields
        .next()
        .ok_or_else(|| RtspError::MalformedSdp("m= line missing media type".into()))?;
    let port_str = fields
        .next()
        .ok_or_else(|| RtspError::MalformedSdp("m= line missing port".into()))?;
    let dest_port: u16 = port_str
        .parse()
        .map_err(|_| RtspError::MalformedSdp(format!("bad m= port: {port_str}")))?;
    let _proto = fields.next();
    let payload_type: u8 = fields
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(96);

    Ok(PendingStream {
        dest_ip,
        dest_port,
        ttl,
        payload_type,
        payload_name: String::new(),
        timescale: 0,
        track_id: None,
        track_name: String::new(),
    })
}

fn apply_rtpmap(pending: &mut PendingStream, rest: &str) {
    // "96 H264/90000"
    let mut fields = rest.split_whitespace();
    let Some(pt_str) = fields.next() else { return };
    if pt_str.parse::<u8>().ok() != Some(pending.payload_type) {
        return;
    }
    let Some(encoding) = fields.next() else { return };
    let mut parts = encoding.splitn(2, '/');
    if let Some(name) = parts.next() {
        pending.payload_name = name.to_string();
    }
    if let Some(rate) = parts.next().and_then(|r| r.parse::<u32>().ok()) {
        pending.timescale = rate;
    }
}

/// Rewrite the `o=`/`s=` lines of an ANNOUNCE'd SDP to reflect this
/// server's identity, for when a session must synthesize SDP text rather
/// than echo the publisher's own (§4.10's `sdp_username`/`sdp_session_*`
/// fields). DESCRIBE of a session that still holds its originally
/// ANNOUNCE'd text returns that text unmodified — this is only exercised
/// when the core itself needs to mint SDP (e.g. before any ANNOUNCE body
/// has been cached).
pub fn rewrite_origin(original: &str, config: &ReflectorConfig) -> String {
    let mut out = String::with_capacity(original.len());
    for raw_line in original.lines() {
        let line = raw_line.trim_end_matches('\r');
        if let Some(rest) = line.strip_prefix("o=") {
            let mut fields = rest.split_whitespace();
            let _username = fields.next();
            let session_id = fields.next().unwrap_or("0");
            let _version = fields.next();
            let tail: Vec<&str> = fields.collect();
            out.push_str(&format!(
                "o={} {} {} {}\r\n",
                config.sdp_username,
                session_id,
                config.sdp_session_version,
                tail.join(" ")
            ));
        } else if line.strip_prefix("s=").is_some() {
            out.push_str(&format!("s={}\r\n", config.sdp_session_name));
        } else {
            out.push_str(line);
            out.push_str("\r\n");
        }
    }
    out
}
