//! `ReflectorSession`: the per-broadcast object binding a publisher's
//! tracks to the set of subscribers attached to them (§4.6).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

use crate::error::Result;
use crate::rtp_session::RtpSession;
use crate::sdp::SdpParser;
use crate::socket::SocketPool;
use crate::stream::{Stream, TransportKind};
use crate::subscriber::SubscriberOutput;

/// One live broadcast: the Streams derived from its SDP, the subscribers
/// attached to them, and the cross-stream "has-video-keyframe" signal that
/// gates audio/video join alignment (§3, §4.6).
pub struct ReflectorSession {
    source_id: String,
    streams: Vec<Arc<Stream>>,
    has_video_keyframe: AtomicBool,
    is_setup: AtomicBool,
    local_sdp: Mutex<Option<String>>,
    /// The session's bucket: the canonical subscriber list, and the lock
    /// that `reflect_all` and `add_output`/`remove_output` all serialize
    /// through (§5 "ReflectorSession holds a 'bucket' mutex").
    bucket: Mutex<Vec<Arc<SubscriberOutput>>>,
    /// The publisher's own `RtpSession`, set at its SETUP so the
    /// maintenance sweep can refresh its activity clock and evict it on
    /// timeout (§5).
    publisher_rtp_session: Mutex<Option<Arc<RtpSession>>>,
    last_publisher_activity_refresh: Mutex<Option<Instant>>,
}

impl ReflectorSession {
    /// Parse `sdp_text` into N [`StreamInfo`](crate::stream::StreamInfo)
    /// values and bind a Stream for each, allocating a fresh interleaved
    /// channel pair per TCP track via `next_channel_pair`. Aborts and
    /// propagates on the first bind failure, releasing every socket pair
    /// bound so far — a partially-bound session is never returned (§4.5,
    /// §4.6).
    pub fn setup(
        source_id: impl Into<String>,
        sdp_text: &str,
        parser: &dyn SdpParser,
        pool: &SocketPool,
        mut next_channel_pair: impl FnMut() -> (u8, u8),
    ) -> Result<Arc<Self>> {
        let infos = parser.parse(sdp_text)?;
        let mut streams = Vec::with_capacity(infos.len());

        for info in infos {
            let channels = match info.transport_kind {
                TransportKind::TcpInterleaved => Some(next_channel_pair()),
                TransportKind::Udp => None,
            };
            match Stream::bind(info, pool, channels) {
                Ok(stream) => streams.push(stream),
                Err(e) => {
                    for bound in &streams {
                        pool.release(bound.socket_pair());
                    }
                    tracing::warn!(source_id = %source_id.into(), error = %e, "session setup aborted");
                    return Err(e);
                }
            }
        }

        tracing::info!(track_count = streams.len(), "reflector session set up");

        let session = Arc::new(Self {
            source_id: source_id.into(),
            streams,
            has_video_keyframe: AtomicBool::new(false),
            is_setup: AtomicBool::new(true),
            local_sdp: Mutex::new(None),
            bucket: Mutex::new(Vec::new()),
            publisher_rtp_session: Mutex::new(None),
            last_publisher_activity_refresh: Mutex::new(None),
        });

        for (index, stream) in session.streams.iter().enumerate() {
            stream.set_owner(Arc::downgrade(&session), index);
        }

        Ok(session)
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn is_setup(&self) -> bool {
        self.is_setup.load(Ordering::SeqCst)
    }

    pub fn streams(&self) -> &[Arc<Stream>] {
        &self.streams
    }

    pub fn stream(&self, index: usize) -> Option<&Arc<Stream>> {
        self.streams.get(index)
    }

    pub fn local_sdp(&self) -> Option<String> {
        self.local_sdp.lock().clone()
    }

    pub fn set_local_sdp(&self, sdp: String) {
        *self.local_sdp.lock() = Some(sdp);
    }

    pub fn has_video_keyframe(&self) -> bool {
        self.has_video_keyframe.load(Ordering::SeqCst)
    }

    pub fn set_has_video_keyframe_update(&self, value: bool) {
        self.has_video_keyframe.store(value, Ordering::SeqCst);
    }

    /// The shared keyframe-join flag, exposed by reference so a `Stream`
    /// reached only through its owning session's `Weak` back-link can
    /// drive the same ingest/reflect path as one reached via
    /// `reflect_all` (§4.3 UDP ingest).
    pub fn has_video_keyframe_flag(&self) -> &AtomicBool {
        &self.has_video_keyframe
    }

    /// Attach a subscriber to every track's Stream, under the bucket lock
    /// (§4.6 "appends a Subscriber to every Stream's subscriber list under
    /// the session's bucket mutex").
    pub fn add_output(&self, subscriber: Arc<SubscriberOutput>) {
        let mut bucket = self.bucket.lock();
        for stream in &self.streams {
            stream.add_subscriber(subscriber.clone());
        }
        bucket.push(subscriber);
    }

    pub fn remove_output(&self, subscriber: &Arc<SubscriberOutput>) {
        let mut bucket = self.bucket.lock();
        for stream in &self.streams {
            stream.remove_subscriber(subscriber);
        }
        bucket.retain(|s| !Arc::ptr_eq(s, subscriber));
    }

    /// Detach every subscriber. The session itself stays alive for the
    /// publisher until its own TEARDOWN (§4.6).
    pub fn tear_down_all_outputs(&self) {
        let mut bucket = self.bucket.lock();
        for subscriber in bucket.drain(..) {
            subscriber.set_playing(false);
            subscriber.clear_bookmarks();
        }
        for stream in &self.streams {
            stream.clear_subscribers();
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.bucket.lock().len()
    }

    pub fn set_publisher_rtp_session(&self, session: Arc<RtpSession>) {
        *self.publisher_rtp_session.lock() = Some(session);
    }

    pub fn publisher_rtp_session(&self) -> Option<Arc<RtpSession>> {
        self.publisher_rtp_session.lock().clone()
    }

    /// Refresh the publisher's inactivity clock, rate-limited to at most
    /// once per [`crate::config::BROADCASTER_TIMEOUT_REFRESH_INTERVAL`] so
    /// every ingress packet doesn't take the `RtpSession`'s activity lock
    /// (§5).
    pub fn maybe_refresh_publisher_activity(&self) {
        let now = Instant::now();
        {
            let mut last = self.last_publisher_activity_refresh.lock();
            if let Some(prev) = *last
                && now.saturating_duration_since(prev) < crate::config::BROADCASTER_TIMEOUT_REFRESH_INTERVAL
            {
                return;
            }
            *last = Some(now);
        }
        if let Some(session) = self.publisher_rtp_session() {
            session.mark_active();
        }
    }

    /// Drive one reflect cycle across every track (§5: the scheduler calls
    /// this per Sender with `has_new_packets` set; here scoped per Stream
    /// since each Stream owns both its RTP and RTCP Senders).
    pub fn reflect_all(&self) {
        let _bucket = self.bucket.lock();
        for (index, stream) in self.streams.iter().enumerate() {
            stream.reflect(index, &self.has_video_keyframe);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn pool() -> SocketPool {
        SocketPool::new(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }

    const SDP: &str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=live\r\nt=0 0\r\nm=video 0 RTP/AVP 96\r\na=rtpmap:96 H264/90000\r\na=control:trackID=1\r\n";

    #[test]
    fn setup_binds_one_stream_per_track_and_marks_setup() {
        let parser = crate::sdp::SimpleSdpParser;
        let pool = pool();
        let session =
            ReflectorSession::setup("live.sdp", SDP, &parser, &pool, || (0, 1)).expect("setup");
        assert!(session.is_setup());
        assert_eq!(session.streams().len(), 1);
    }

    #[test]
    fn add_output_attaches_to_every_stream() {
        let parser = crate::sdp::SimpleSdpParser;
        let pool = pool();
        let session =
            ReflectorSession::setup("live.sdp", SDP, &parser, &pool, || (0, 1)).expect("setup");

        let playing = Arc::new(AtomicBool::new(true));
        struct NullSink;
        impl crate::subscriber::PacketSink for NullSink {
            fn write(
                &self,
                _stream_index: usize,
                _direction: crate::sender::Direction,
                _bytes: &[u8],
                _transmit_time: std::time::Instant,
                _burst: crate::subscriber::WriteBurstBegin,
            ) -> crate::subscriber::WriteOutcome {
                crate::subscriber::WriteOutcome::Ok
            }
        }
        let sub = Arc::new(SubscriberOutput::new(
            Arc::new(NullSink),
            session.streams().len(),
            playing,
            std::time::Duration::from_secs(3),
        ));
        session.add_output(sub.clone());
        assert_eq!(session.streams()[0].subscribers().len(), 1);
        assert_eq!(session.subscriber_count(), 1);
    }

    #[test]
    fn tear_down_clears_bookmarks_and_subscriber_lists() {
        let parser = crate::sdp::SimpleSdpParser;
        let pool = pool();
        let session =
            ReflectorSession::setup("live.sdp", SDP, &parser, &pool, || (0, 1)).expect("setup");

        let playing = Arc::new(AtomicBool::new(true));
        struct NullSink;
        impl crate::subscriber::PacketSink for NullSink {
            fn write(
                &self,
                _stream_index: usize,
                _direction: crate::sender::Direction,
                _bytes: &[u8],
                _transmit_time: std::time::Instant,
                _burst: crate::subscriber::WriteBurstBegin,
            ) -> crate::subscriber::WriteOutcome {
                crate::subscriber::WriteOutcome::Ok
            }
        }
        let sub = Arc::new(SubscriberOutput::new(
            Arc::new(NullSink),
            session.streams().len(),
            playing,
            std::time::Duration::from_secs(3),
        ));
        sub.set_bookmark_seq(0, crate::sender::Direction::Rtp, Some(5));
        session.add_output(sub.clone());

        session.tear_down_all_outputs();
        assert_eq!(session.subscriber_count(), 0);
        assert_eq!(session.streams()[0].subscribers().len(), 0);
        assert_eq!(sub.bookmark_seq(0, crate::sender::Direction::Rtp), None);
    }
}
