//! RTCP wire helpers: the SR/RR handshake that keeps publisher and
//! subscribers alive (§4.4 step 2, §6).
//!
//! The reflector passes RTCP Sender Reports (type 200) through to
//! subscribers unmodified, consumes every other inbound RTCP type locally,
//! and emits its own compound RR + SDES + APP("QTSS" eye-count) packet to
//! the publisher on a 5-second cadence.

/// RTCP packet type: Sender Report (RFC 3550 §6.4.1).
pub const PT_SR: u8 = 200;
/// RTCP packet type: Receiver Report (RFC 3550 §6.4.2).
pub const PT_RR: u8 = 201;
/// RTCP packet type: Source Description (RFC 3550 §6.5).
pub const PT_SDES: u8 = 202;
/// RTCP packet type: Application-defined (RFC 3550 §6.7).
pub const PT_APP: u8 = 204;

/// SDES CNAME item type (RFC 3550 §6.5.1).
const SDES_CNAME: u8 = 1;

/// SSRC the reflector identifies itself with in the RTCP reports it
/// originates — spells "REFL" in ASCII.
pub const REFLECTOR_SSRC: u32 = 0x5245_464C;

/// Returns the RTCP packet type of the first packet in a (possibly
/// compound) RTCP datagram, or `None` if the buffer is too short to carry
/// a header.
pub fn packet_type(bytes: &[u8]) -> Option<u8> {
    bytes.get(1).copied()
}

/// Is this buffer's leading RTCP packet a Sender Report?
///
/// The reflector forwards SRs to subscribers verbatim; every other
/// publisher-originated RTCP type is consumed locally (§6).
pub fn is_sender_report(bytes: &[u8]) -> bool {
    packet_type(bytes) == Some(PT_SR)
}

/// Build the compound RR + SDES(CNAME) + APP("QTSS" eye-count) packet the
/// reflector sends the publisher every [`crate::config::RR_INTERVAL`] (§6).
///
/// `our_ssrc` identifies the reflector as an RTCP participant; `eye_count`
/// is the number of subscribers currently attached (the "QTSS" APP packet
/// historically reported this as a coarse viewer-count signal).
pub fn build_receiver_report(our_ssrc: u32, cname: &str, eye_count: u32) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&receiver_report(our_ssrc));
    out.extend_from_slice(&sdes_cname(our_ssrc, cname));
    out.extend_from_slice(&app_eye_count(our_ssrc, eye_count));
    out
}

/// An empty RR: reception-quality tracking of the publisher's stream is out
/// of scope for this reflector (§1 Non-goals); RC=0, no report blocks.
fn receiver_report(ssrc: u32) -> [u8; 8] {
    let mut buf = [0u8; 8];
    buf[0] = 0x80; // V=2, P=0, RC=0
    buf[1] = PT_RR;
    let length_words = (buf.len() / 4 - 1) as u16;
    buf[2..4].copy_from_slice(&length_words.to_be_bytes());
    buf[4..8].copy_from_slice(&ssrc.to_be_bytes());
    buf
}

fn sdes_cname(ssrc: u32, cname: &str) -> Vec<u8> {
    let cname_bytes = cname.as_bytes();
    let mut chunk = Vec::new();
    chunk.extend_from_slice(&ssrc.to_be_bytes());
    chunk.push(SDES_CNAME);
    chunk.push(cname_bytes.len() as u8);
    chunk.extend_from_slice(cname_bytes);
    chunk.push(0); // null terminator item

    while chunk.len() % 4 != 0 {
        chunk.push(0);
    }

    let mut buf = Vec::with_capacity(4 + chunk.len());
    let length_words = ((chunk.len() + 4) / 4 - 1) as u16;
    buf.push(0x81); // V=2, P=0, SC=1
    buf.push(PT_SDES);
    buf.extend_from_slice(&length_words.to_be_bytes());
    buf.extend_from_slice(&chunk);
    buf
}

/// APP packet with name "QTSS" carrying the current subscriber ("eye") count.
fn app_eye_count(ssrc: u32, eye_count: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(20);
    buf.push(0x80); // V=2, P=0, subtype=0
    buf.push(PT_APP);
    let length_words = (16 / 4 - 1) as u16;
    buf.extend_from_slice(&length_words.to_be_bytes());
    buf.extend_from_slice(&ssrc.to_be_bytes());
    buf.extend_from_slice(b"QTSS");
    buf.extend_from_slice(&eye_count.to_be_bytes());
    buf
}
