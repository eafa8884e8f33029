//! Per-TCP-connection RTSP session state machine (§4.8).

mod transport_ids;

pub use transport_ids::{sdp_cache_key, stream_id_from_path, track_id_from_path};

use std::sync::Arc;

use rand::RngCore;

use crate::rtp_session::RtpSession;
use crate::subscriber::SubscriberOutput;

/// RTSP connection states (§4.8). Transitions advance left to right within
/// one request/response cycle; the connection loop returns to
/// `ReadingRequest` afterward, or exits on `CleaningUp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    ReadingFirstRequest,
    ReadingRequest,
    HaveMessage,
    Filtering,
    Preprocessing,
    Processing,
    PostProcessing,
    Sending,
    CleaningUp,
}

/// Per-connection RTSP session: interleaved channel allocation, the bound
/// `RTPSession`, and the connection's place in the state machine (§3's
/// `RTSPSession` row, §4.8).
pub struct RtspSession {
    state: ConnectionState,
    next_interleaved_channel: u8,
    rtp_session: Option<Arc<RtpSession>>,
    subscriber: Option<Arc<SubscriberOutput>>,
}

impl RtspSession {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::ReadingFirstRequest,
            next_interleaved_channel: 0,
            rtp_session: None,
            subscriber: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
    }

    /// Allocate the next interleaved channel pair for one SETUP: lower
    /// channel is RTP, lower+1 is RTCP, counter advances by 2 (§4.8).
    pub fn allocate_interleaved_channels(&mut self) -> (u8, u8) {
        let rtp = self.next_interleaved_channel;
        self.next_interleaved_channel = self.next_interleaved_channel.wrapping_add(2);
        (rtp, rtp + 1)
    }

    pub fn next_interleaved_channel(&self) -> u8 {
        self.next_interleaved_channel
    }

    pub fn set_next_interleaved_channel(&mut self, value: u8) {
        self.next_interleaved_channel = value;
    }

    pub fn rtp_session(&self) -> Option<&Arc<RtpSession>> {
        self.rtp_session.as_ref()
    }

    pub fn bind_rtp_session(&mut self, session: Arc<RtpSession>) {
        self.rtp_session = Some(session);
    }

    pub fn subscriber(&self) -> Option<&Arc<SubscriberOutput>> {
        self.subscriber.as_ref()
    }

    pub fn bind_subscriber(&mut self, subscriber: Arc<SubscriberOutput>) {
        self.subscriber = Some(subscriber);
    }
}

impl Default for RtspSession {
    fn default() -> Self {
        Self::new()
    }
}

/// A random 64-bit session ID, regenerated by the caller if it collides
/// with an existing entry in the RTP registry (§4.8).
pub fn generate_session_id() -> String {
    let value = rand::rng().next_u64();
    format!("{value:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interleaved_channels_advance_by_two_per_setup() {
        let mut session = RtspSession::new();
        assert_eq!(session.allocate_interleaved_channels(), (0, 1));
        assert_eq!(session.allocate_interleaved_channels(), (2, 3));
        assert_eq!(session.allocate_interleaved_channels(), (4, 5));
    }

    #[test]
    fn session_id_is_16_hex_chars() {
        let id = generate_session_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
