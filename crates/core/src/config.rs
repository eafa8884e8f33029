//! Read-only preferences view consumed by the reflector core (§6, §4.10).
//!
//! The real deployment's global configuration store lives outside this
//! crate; the core only ever sees this narrow, already-resolved snapshot.
//! Construct with [`ReflectorConfig::default`] or customize through
//! [`ReflectorConfig::builder`].

use std::time::Duration;

/// Minimum UDP port handed out by the socket pool (§4.3, §6).
pub const PORT_RANGE_MIN: u16 = 6970;
/// Maximum UDP port handed out by the socket pool (§4.3, §6).
pub const PORT_RANGE_MAX: u16 = 65534;

/// Receiver-report cadence: the reflector sends the publisher an RR every
/// this many seconds (§4.4 step 2).
pub const RR_INTERVAL: Duration = Duration::from_secs(5);
/// Bit-rate averaging window (§4.4 step 3).
pub const BITRATE_AVERAGE_INTERVAL: Duration = Duration::from_secs(30);
/// Default over-buffer window: how far back a joining subscriber without a
/// keyframe may start (§4.4 step 4).
pub const OVERBUFFER_SECONDS: Duration = Duration::from_secs(10);
/// A bookmark older than this, with a newer keyframe available, is relocated
/// forward to the keyframe (§4.4 step 5).
pub const RELOCATE_PACKET_AGE: Duration = Duration::from_secs(1);
/// Packets older than this are evicted from the queue once unreferenced
/// (§4.4 step 6).
pub const MAX_PACKET_AGE: Duration = Duration::from_secs(20);
/// A packet older than this when handed to a subscriber's write path is a
/// quality event, not delivered (§7).
pub const DROP_ALL_PACKETS_AGE: Duration = Duration::from_secs(30);
/// Broadcaster activity timeout: no ingress packet for this long tears the
/// ReflectorSession down (§5).
pub const BROADCASTER_TIMEOUT: Duration = Duration::from_secs(30);
/// The broadcaster timeout refresh is itself rate-limited to at most once
/// per this interval, per socket (§5).
pub const BROADCASTER_TIMEOUT_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// Read-only preferences view the reflector core consumes (§6).
///
/// Every field here corresponds to one of the "Recognised options" named in
/// §6: `send_interval_ms`, `max_send_ahead_s`, `overbuffer_rate`,
/// `overbuffer_window_s`, `rtsp_timeout_s`, `default_buffer_delay_s`,
/// `max_future_packet_s`, plus `default_stream_quality` and the fields the
/// locally-derived SDP origin needs.
#[derive(Debug, Clone)]
pub struct ReflectorConfig {
    /// Minimum gap between transmissions to one subscriber.
    pub send_interval_ms: u64,
    /// How far into the future a scheduled packet may be queued.
    pub max_send_ahead_s: u64,
    /// Multiplier for burst allowance above the steady per-subscriber rate.
    pub overbuffer_rate: f64,
    /// How far back a joining subscriber without a keyframe may start,
    /// seconds. Negotiated per `RtpSession` at SETUP time; defaults to
    /// [`OVERBUFFER_SECONDS`].
    pub overbuffer_window_s: u64,
    /// Idle close for RTSP control connections.
    pub rtsp_timeout_s: u64,
    /// Subscriber initial buffer delay, seconds.
    pub default_buffer_delay_s: f64,
    /// Ingress clamp: packets claiming to arrive further than this into the
    /// future are rejected.
    pub max_future_packet_s: u64,
    /// Default stream quality hint surfaced to callers; the core does not
    /// interpret it.
    pub default_stream_quality: u32,
    /// Public host advertised in the locally-derived SDP `o=`/`c=` lines.
    /// When `None`, the host is inferred from the request URI or client address.
    pub public_host: Option<String>,
    /// SDP origin username field (`o=<username> ...`).
    pub sdp_username: String,
    /// SDP origin session id field (`o=... <session-id> ...`).
    pub sdp_session_id: String,
    /// SDP origin session version field (`o=... ... <session-version> ...`).
    pub sdp_session_version: String,
    /// SDP session name (`s=`).
    pub sdp_session_name: String,
}

impl Default for ReflectorConfig {
    fn default() -> Self {
        Self {
            send_interval_ms: 20,
            max_send_ahead_s: 2,
            overbuffer_rate: 1.5,
            overbuffer_window_s: OVERBUFFER_SECONDS.as_secs(),
            rtsp_timeout_s: 60,
            default_buffer_delay_s: 3.0,
            max_future_packet_s: 10,
            default_stream_quality: 0,
            public_host: None,
            sdp_username: "-".to_string(),
            sdp_session_id: "0".to_string(),
            sdp_session_version: "0".to_string(),
            sdp_session_name: "Reflected Stream".to_string(),
        }
    }
}

impl ReflectorConfig {
    /// Start building a config from defaults.
    pub fn builder() -> ReflectorConfigBuilder {
        ReflectorConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ReflectorConfig`].
#[derive(Debug, Clone)]
pub struct ReflectorConfigBuilder {
    config: ReflectorConfig,
}

impl ReflectorConfigBuilder {
    pub fn send_interval_ms(mut self, v: u64) -> Self {
        self.config.send_interval_ms = v;
        self
    }

    pub fn max_send_ahead_s(mut self, v: u64) -> Self {
        self.config.max_send_ahead_s = v;
        self
    }

    pub fn overbuffer_rate(mut self, v: f64) -> Self {
        self.config.overbuffer_rate = v;
        self
    }

    pub fn overbuffer_window_s(mut self, v: u64) -> Self {
        self.config.overbuffer_window_s = v;
        self
    }

    pub fn rtsp_timeout_s(mut self, v: u64) -> Self {
        self.config.rtsp_timeout_s = v;
        self
    }

    pub fn default_buffer_delay_s(mut self, v: f64) -> Self {
        self.config.default_buffer_delay_s = v;
        self
    }

    pub fn max_future_packet_s(mut self, v: u64) -> Self {
        self.config.max_future_packet_s = v;
        self
    }

    pub fn default_stream_quality(mut self, v: u32) -> Self {
        self.config.default_stream_quality = v;
        self
    }

    pub fn public_host(mut self, host: impl Into<String>) -> Self {
        self.config.public_host = Some(host.into());
        self
    }

    pub fn sdp_session_name(mut self, name: impl Into<String>) -> Self {
        self.config.sdp_session_name = name.into();
        self
    }

    pub fn build(self) -> ReflectorConfig {
        self.config
    }
}
