//! H.264 RTP keyframe classifier (RFC 6184), §4.2.
//!
//! A pure function over raw RTP packet bytes: does this packet begin an
//! H.264 IDR/SPS/PPS access unit? Handles the packetization modes defined
//! by RFC 6184 — single NAL unit, STAP-A/B and MTAP16/24 aggregation, and
//! FU-A/B fragmentation — so a joining subscriber can be bookmarked at a
//! genuine frame boundary.

/// NAL unit types that constitute a keyframe start (RFC 6184 §5.2, Table 1).
const NAL_TYPE_IDR: u8 = 5;
const NAL_TYPE_SPS: u8 = 7;
const NAL_TYPE_PPS: u8 = 8;

const NAL_TYPE_STAP_A: u8 = 24;
const NAL_TYPE_STAP_B: u8 = 25;
const NAL_TYPE_MTAP16: u8 = 26;
const NAL_TYPE_MTAP24: u8 = 27;
const NAL_TYPE_FU_A: u8 = 28;
const NAL_TYPE_FU_B: u8 = 29;

/// Minimum RTP packet length this classifier will inspect (§4.2 policy).
const MIN_PACKET_LEN: usize = 20;

fn is_keyframe_nal_type(nal_type: u8) -> bool {
    matches!(nal_type, NAL_TYPE_IDR | NAL_TYPE_SPS | NAL_TYPE_PPS)
}

/// Returns whether `payload` (a complete RTP packet, header included) begins
/// an H.264 IDR/SPS/PPS access unit.
///
/// Packets shorter than [`MIN_PACKET_LEN`] bytes, or any access past the
/// end of the slice while unwrapping an aggregation/fragmentation header,
/// short-circuit to `false` rather than panicking.
pub fn is_keyframe_start(payload: &[u8]) -> bool {
    if payload.len() < MIN_PACKET_LEN {
        return false;
    }

    let csrc_count = (payload[0] & 0x0F) as usize;
    let rtp_header_len = 12 + 4 * csrc_count;
    let Some(nal_byte) = payload.get(rtp_header_len).copied() else {
        return false;
    };
    let nal_type = nal_byte & 0x1F;

    match nal_type {
        NAL_TYPE_STAP_A => payload
            .get(rtp_header_len + 3)
            .is_some_and(|b| is_keyframe_nal_type(b & 0x1F)),
        NAL_TYPE_STAP_B => payload
            .get(rtp_header_len + 5)
            .is_some_and(|b| is_keyframe_nal_type(b & 0x1F)),
        NAL_TYPE_MTAP16 => payload
            .get(rtp_header_len + 8)
            .is_some_and(|b| is_keyframe_nal_type(b & 0x1F)),
        NAL_TYPE_MTAP24 => payload
            .get(rtp_header_len + 9)
            .is_some_and(|b| is_keyframe_nal_type(b & 0x1F)),
        NAL_TYPE_FU_A | NAL_TYPE_FU_B => {
            let Some(fu_header) = payload.get(rtp_header_len + 1).copied() else {
                return false;
            };
            let start_bit = fu_header & 0x80 != 0;
            start_bit && is_keyframe_nal_type(fu_header & 0x1F)
        }
        other => is_keyframe_nal_type(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet_of(nal_and_payload: &[u8], total_len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; 12];
        buf.extend_from_slice(nal_and_payload);
        buf.resize(total_len.max(buf.len()), 0xAA);
        buf
    }

    #[test]
    fn too_short_is_not_keyframe() {
        let buf = vec![0u8; 19];
        assert!(!is_keyframe_start(&buf));
    }

    #[test]
    fn single_nal_idr_at_boundary_is_keyframe() {
        let buf = packet_of(&[NAL_TYPE_IDR], 20);
        assert_eq!(buf.len(), 20);
        assert!(is_keyframe_start(&buf));
    }

    #[test]
    fn single_nal_non_idr_is_not_keyframe() {
        let buf = packet_of(&[1], 20); // NAL type 1: non-IDR slice
        assert!(!is_keyframe_start(&buf));
    }

    #[test]
    fn fu_a_with_start_bit_set_and_idr_type_is_keyframe() {
        let fu_indicator = NAL_TYPE_FU_A;
        let fu_header = 0x80 | NAL_TYPE_IDR; // start bit set, original type IDR
        let buf = packet_of(&[fu_indicator, fu_header], 20);
        assert!(is_keyframe_start(&buf));
    }

    #[test]
    fn fu_a_with_start_bit_clear_is_not_keyframe() {
        let fu_indicator = NAL_TYPE_FU_A;
        let fu_header = NAL_TYPE_IDR; // no start bit
        let buf = packet_of(&[fu_indicator, fu_header], 20);
        assert!(!is_keyframe_start(&buf));
    }

    #[test]
    fn stap_a_with_idr_inner_nal_is_keyframe() {
        // STAP-A: [nal=24][len16][inner NAL header]...
        let buf = packet_of(&[NAL_TYPE_STAP_A, 0x00, 0x01, NAL_TYPE_IDR], 20);
        assert!(is_keyframe_start(&buf));
    }

    #[test]
    fn stap_a_truncated_inner_nal_is_not_keyframe() {
        // Inner NAL byte sits at offset +3 from the NAL type byte; a packet
        // that ends right before it must short-circuit rather than panic.
        let mut buf = vec![0u8; 12];
        buf.push(NAL_TYPE_STAP_A);
        // total len < 12 + 1 (NAL byte) + 3 (offset to inner NAL)
        buf.resize(15, 0);
        assert!(!is_keyframe_start(&buf));
    }

    #[test]
    fn csrc_count_shifts_header_length() {
        // One CSRC entry adds 4 bytes to the RTP header.
        let mut buf = vec![0u8; 12 + 4];
        buf[0] = 0x81; // version bits irrelevant here, CSRC count = 1
        buf.push(NAL_TYPE_IDR);
        buf.resize(20, 0);
        assert!(is_keyframe_start(&buf));
    }

    #[test]
    fn mtap16_and_mtap24_offsets() {
        let mut buf16 = packet_of(&[NAL_TYPE_MTAP16], 20);
        buf16[12 + 8] = NAL_TYPE_IDR;
        assert!(is_keyframe_start(&buf16));

        let mut buf24 = packet_of(&[NAL_TYPE_MTAP24], 20);
        buf24[12 + 9] = NAL_TYPE_SPS;
        assert!(is_keyframe_start(&buf24));
    }
}
