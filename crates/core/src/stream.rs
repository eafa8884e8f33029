//! `Stream`: one media track, owning its two `Sender`s, its `SocketPair`,
//! and the canonical `StreamInfo` parsed out of SDP (§4.5).

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

use crate::error::{Result, RtspError};
use crate::reflector::ReflectorSession;
use crate::sender::{Direction, MediaKind, Sender};
use crate::socket::{SocketPair, SocketPool, WILDCARD};
use crate::subscriber::{PacketSink, SubscriberOutput, WriteBurstBegin};

/// How to reach the publisher to hand it an outbound RTCP packet (§6): a
/// learned UDP source address, or the same TCP-interleaved sink its media
/// arrives on.
#[derive(Clone)]
enum PublisherBack {
    Udp(SocketAddr),
    Tcp(Arc<dyn PacketSink>),
}

/// How a track's RTP/RTCP is carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Udp,
    TcpInterleaved,
}

/// The canonical, SDP-derived description of one media track (§3).
///
/// Immutable after SETUP; owned by the `ReflectorSession` it belongs to.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub src_ip: IpAddr,
    pub dest_ip: IpAddr,
    pub dest_port: u16,
    pub ttl: u32,
    pub payload_type: u8,
    pub payload_name: String,
    pub track_id: u32,
    pub track_name: String,
    pub transport_kind: TransportKind,
    pub setup_to_receive: bool,
    pub buffer_delay_s: f64,
    pub timescale: u32,
}

impl StreamInfo {
    pub fn is_video(&self) -> bool {
        self.payload_name.eq_ignore_ascii_case("H264")
    }

    pub fn is_audio(&self) -> bool {
        self.payload_name.eq_ignore_ascii_case("mpeg4-generic")
            || self.payload_name.eq_ignore_ascii_case("PCMU")
            || self.payload_name.eq_ignore_ascii_case("PCMA")
            || self.payload_name.eq_ignore_ascii_case("opus")
    }

    fn media_kind(&self) -> MediaKind {
        if self.is_video() {
            MediaKind::Video
        } else if self.is_audio() {
            MediaKind::Audio
        } else {
            MediaKind::Other
        }
    }

    fn is_h264_90000(&self) -> bool {
        self.is_video() && self.timescale == 90000
    }
}

/// One media track: `StreamInfo` + `SocketPair` + the RTP and RTCP
/// `Sender`s that own its packet queues (§4.5).
pub struct Stream {
    info: StreamInfo,
    socket_pair: Arc<SocketPair>,
    rtp: Sender,
    rtcp: Sender,
    bitrate_acc: AtomicU64,
    packet_id_source: AtomicU64,
    subscribers: Mutex<Vec<Arc<SubscriberOutput>>>,
    /// The owning session and this track's index within it, set once by
    /// `ReflectorSession::setup` after all tracks are bound (a Stream is
    /// built before its session exists, via `Arc::new_cyclic`, so this
    /// can't be wired in at `bind` time). Lets a UDP ingest task that only
    /// holds a `Weak<Stream>` from the socket demuxer find its way back to
    /// the session's "has-video-keyframe" flag and call `reflect` (§4.3, §5).
    owner: Mutex<Option<(Weak<ReflectorSession>, usize)>>,
    /// Where this track's own RTCP RR goes back to, learned from the first
    /// inbound UDP datagram or set once at publisher SETUP for TCP (§6).
    publisher_back: Mutex<Option<PublisherBack>>,
    /// Set once the publisher's SETUP for this track has completed. A
    /// second SETUP from the publisher against the same track while this
    /// is set is a conflict: "SETUP to an already-receiving push session"
    /// (§6, §7) — 412, not a silent re-bind.
    receiving: AtomicBool,
}

impl Stream {
    /// Bind a Stream's sockets per §4.5's binding semantics and return it
    /// wrapped in the `Arc` that its own socket demuxer holds a weak
    /// reference back to.
    ///
    /// On any failure the caller receives the error and nothing is
    /// registered — a partially-constructed Stream is never returned.
    pub fn bind(
        info: StreamInfo,
        pool: &SocketPool,
        interleaved_channels: Option<(u8, u8)>,
    ) -> Result<Arc<Self>> {
        let socket_pair = match info.transport_kind {
            TransportKind::TcpInterleaved => {
                let (rtp_ch, rtcp_ch) = interleaved_channels.ok_or_else(|| {
                    RtspError::BindFailed("TCP transport requires interleaved channels".into())
                })?;
                Arc::new(SocketPair::new_interleaved(rtp_ch, rtcp_ch))
            }
            TransportKind::Udp => {
                let src_ip = if info.src_ip.is_unspecified() {
                    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
                } else {
                    info.src_ip
                };
                let pair = match pool.get(info.dest_port, src_ip, 0) {
                    Ok(pair) => pair,
                    Err(e) if info.setup_to_receive => {
                        tracing::warn!(error = %e, "bind retry with port=0 for receive-side SETUP");
                        pool.get(0, src_ip, 0)?
                    }
                    Err(e) => return Err(e),
                };

                if info.dest_ip.is_multicast()
                    && let IpAddr::V4(group) = info.dest_ip
                    && let Err(e) = pair.join_multicast(group, info.ttl)
                {
                    tracing::warn!(error = %e, "failed to join multicast group");
                }

                pair
            }
        };

        let media_kind = info.media_kind();
        let is_h264_90000 = info.is_h264_90000();

        let stream = Arc::new_cyclic(|weak: &std::sync::Weak<Stream>| {
            let _ = socket_pair.rtp_demuxer().register(WILDCARD, weak.clone());
            let _ = socket_pair.rtcp_demuxer().register(WILDCARD, weak.clone());

            Stream {
                info,
                socket_pair,
                rtp: Sender::new(Direction::Rtp, media_kind, is_h264_90000),
                rtcp: Sender::new(Direction::Rtcp, media_kind, false),
                bitrate_acc: AtomicU64::new(0),
                packet_id_source: AtomicU64::new(0),
                subscribers: Mutex::new(Vec::new()),
                owner: Mutex::new(None),
                publisher_back: Mutex::new(None),
                receiving: AtomicBool::new(false),
            }
        });

        Ok(stream)
    }

    /// Wire this Stream back to its owning session, once the session
    /// exists (§4.3's UDP ingest task needs this to call `push_packet`
    /// and `reflect` from a demuxer's `Weak<Stream>` alone).
    pub fn set_owner(&self, session: Weak<ReflectorSession>, index: usize) {
        *self.owner.lock() = Some((session, index));
    }

    /// Feed one inbound datagram and immediately drive this track's
    /// reflect cycle, using the owning session's keyframe-join flag. A
    /// no-op if `set_owner` hasn't run yet (can't happen once a Stream is
    /// reachable through a session's socket demuxer).
    pub fn push_packet_and_reflect(&self, bytes: &[u8], is_rtcp: bool) {
        let Some((weak_session, index)) = self.owner.lock().clone() else {
            return;
        };
        let Some(session) = weak_session.upgrade() else {
            return;
        };
        session.maybe_refresh_publisher_activity();
        self.push_packet(bytes, is_rtcp, session.has_video_keyframe_flag());
        self.reflect(index, session.has_video_keyframe_flag());
    }

    /// Record the publisher's observed UDP source address, so its RTCP RR
    /// has somewhere to go (§6). A no-op once a TCP-interleaved sink has
    /// been wired — that transport doesn't need an address.
    pub fn learn_publisher_addr(&self, addr: SocketAddr) {
        let mut back = self.publisher_back.lock();
        if !matches!(*back, Some(PublisherBack::Tcp(_))) {
            *back = Some(PublisherBack::Udp(addr));
        }
    }

    /// Wire the publisher's own TCP-interleaved channel pair as the
    /// destination for its RTCP RR, set once at SETUP time (§4.8, §6).
    pub fn set_publisher_sink(&self, sink: Arc<dyn PacketSink>) {
        *self.publisher_back.lock() = Some(PublisherBack::Tcp(sink));
    }

    /// Is this track already bound to a publisher (§6, §7: re-SETUP of an
    /// already-receiving push session is a 412 conflict, not a rebind)?
    pub fn is_receiving(&self) -> bool {
        self.receiving.load(Ordering::SeqCst)
    }

    /// Mark this track as bound to a publisher. Called once the
    /// publisher's SETUP for this track has succeeded.
    pub fn mark_receiving(&self) {
        self.receiving.store(true, Ordering::SeqCst);
    }

    /// Send one RTCP packet back to the publisher over whichever transport
    /// it's bound on. Silently drops if no publisher back-channel is known
    /// yet (§6).
    pub fn send_to_publisher(&self, bytes: &[u8]) {
        match self.publisher_back.lock().clone() {
            Some(PublisherBack::Udp(addr)) => {
                if let Some(socket) = self.socket_pair.rtcp_socket() {
                    let _ = socket.send_to(bytes, addr);
                }
            }
            Some(PublisherBack::Tcp(sink)) => {
                let index = self.owner.lock().as_ref().map(|(_, idx)| *idx).unwrap_or(0);
                let _ = sink.write(index, Direction::Rtcp, bytes, std::time::Instant::now(), WriteBurstBegin(true));
            }
            None => {}
        }
    }

    pub fn info(&self) -> &StreamInfo {
        &self.info
    }

    pub fn socket_pair(&self) -> &Arc<SocketPair> {
        &self.socket_pair
    }

    pub fn rtp_sender(&self) -> &Sender {
        &self.rtp
    }

    pub fn rtcp_sender(&self) -> &Sender {
        &self.rtcp
    }

    pub fn bitrate_avg_bps(&self) -> f64 {
        self.rtp.bitrate_avg_bps()
    }

    /// Ingress entry point for both the UDP reflector socket and the
    /// TCP-interleaved `$`-frame path (§4.5 `push_packet`).
    pub fn push_packet(&self, bytes: &[u8], is_rtcp: bool, has_video_keyframe: &AtomicBool) {
        let now = Instant::now();
        let sender = if is_rtcp { &self.rtcp } else { &self.rtp };
        sender.append_packet(bytes, now, has_video_keyframe, &self.bitrate_acc);
    }

    pub fn add_subscriber(&self, subscriber: Arc<SubscriberOutput>) {
        self.subscribers.lock().push(subscriber);
    }

    pub fn remove_subscriber(&self, subscriber: &Arc<SubscriberOutput>) {
        self.subscribers
            .lock()
            .retain(|s| !Arc::ptr_eq(s, subscriber));
    }

    pub fn subscribers(&self) -> Vec<Arc<SubscriberOutput>> {
        self.subscribers.lock().clone()
    }

    pub fn clear_subscribers(&self) -> Vec<Arc<SubscriberOutput>> {
        std::mem::take(&mut *self.subscribers.lock())
    }

    /// Drive one reflect cycle for this track's two Senders (§4.4, §5).
    pub fn reflect(&self, stream_index: usize, has_video_keyframe: &AtomicBool) {
        let now = Instant::now();
        let subscribers = self.subscribers();
        if self.rtp.has_new_packets() {
            self.rtp
                .reflect_packets(stream_index, &subscribers, now, has_video_keyframe);
        }
        if self.rtcp.has_new_packets() {
            self.rtcp
                .reflect_packets(stream_index, &subscribers, now, has_video_keyframe);
        }
        self.rtp.maybe_update_bitrate_average(now, &self.bitrate_acc);
    }

    /// Monotonic per-stream ID source, used to number subscriber-visible
    /// RTP-Info track references and similar diagnostics.
    pub fn next_diagnostic_id(&self) -> u64 {
        self.packet_id_source.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn udp_info(port: u16) -> StreamInfo {
        StreamInfo {
            src_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            dest_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            dest_port: port,
            ttl: 16,
            payload_type: 96,
            payload_name: "H264".to_string(),
            track_id: 1,
            track_name: "track1".to_string(),
            transport_kind: TransportKind::Udp,
            setup_to_receive: true,
            buffer_delay_s: 3.0,
            timescale: 90000,
        }
    }

    #[test]
    fn bind_produces_adjacent_ports() {
        let pool = SocketPool::new(IpAddr::V4(Ipv4Addr::LOCALHOST));
        let stream = Stream::bind(udp_info(0), &pool, None).expect("bind");
        let pair = stream.socket_pair();
        assert_eq!(pair.rtcp_port(), pair.rtp_port().map(|p| p + 1));
    }

    #[test]
    fn tcp_interleaved_requires_channels() {
        let pool = SocketPool::new(IpAddr::V4(Ipv4Addr::LOCALHOST));
        let mut info = udp_info(0);
        info.transport_kind = TransportKind::TcpInterleaved;
        assert!(Stream::bind(info.clone(), &pool, None).is_err());
        let stream = Stream::bind(info, &pool, Some((0, 1))).expect("bind interleaved");
        assert!(stream.socket_pair().is_interleaved());
        assert_eq!(stream.socket_pair().interleaved_channels(), Some((0, 1)));
    }

    #[test]
    fn push_packet_routes_by_rtcp_flag() {
        let pool = SocketPool::new(IpAddr::V4(Ipv4Addr::LOCALHOST));
        let stream = Stream::bind(udp_info(0), &pool, None).expect("bind");
        let flag = AtomicBool::new(false);
        stream.push_packet(&[0u8; 20], false, &flag);
        stream.push_packet(&[0u8; 8], true, &flag);
        assert_eq!(stream.rtp_sender().queue_len(), 1);
        assert_eq!(stream.rtcp_sender().queue_len(), 1);
    }
}
