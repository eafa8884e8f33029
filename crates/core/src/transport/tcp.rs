//! TCP transport (§4.8, §5): one OS thread per RTSP connection, reading
//! either an ASCII RTSP request or a `$`-framed interleaved data packet
//! off the same socket, and the TCP-interleaved subscriber sink that
//! writes reflected packets back onto it.

use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::context::ReflectorContext;
use crate::error::{RtspError, Result};
use crate::protocol::handler::SinkFactory;
use crate::protocol::request::{Method, RtspRequest, TransportHeader};
use crate::rtp_session::Role;
use crate::sender::Direction;
use crate::session::RtspSession;
use crate::subscriber::{PacketSink, WriteBurstBegin, WriteOutcome};

/// Non-blocking-between-accepts TCP accept loop: checks `ctx.running`
/// between accepts with a 50ms poll so `ReflectorServer::stop` terminates
/// it promptly.
pub fn accept_loop(listener: TcpListener, ctx: ReflectorContext) {
    while ctx.running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer_addr)) => {
                let ctx = ctx.clone();
                thread::spawn(move || Connection::handle(stream, peer_addr, ctx));
            }
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                if ctx.running.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "TCP accept error");
                }
            }
        }
    }
    tracing::debug!("accept loop exited");
}

/// A single RTSP client connection with its own lifecycle and state
/// machine instance.
struct Connection {
    reader: BufReader<TcpStream>,
    writer: Arc<Mutex<TcpStream>>,
    peer_addr: SocketAddr,
    ctx: ReflectorContext,
    session: RtspSession,
    sinks: TcpSinkFactory,
}

impl Connection {
    fn handle(stream: TcpStream, peer_addr: SocketAddr, ctx: ReflectorContext) {
        tracing::info!(%peer_addr, "client connected");

        let timeout = Duration::from_secs(ctx.config.rtsp_timeout_s);
        let _ = stream.set_read_timeout(Some(timeout));

        let Ok(reader_stream) = stream.try_clone() else {
            return;
        };
        let writer = Arc::new(Mutex::new(stream));
        let sinks = TcpSinkFactory::new(writer.clone());

        let mut conn = Connection {
            reader: BufReader::new(reader_stream),
            writer,
            peer_addr,
            ctx,
            session: RtspSession::new(),
            sinks,
        };

        let reason = conn.run();
        conn.cleanup();

        tracing::info!(%peer_addr, reason, "client disconnected");
    }

    /// RTSP request/response loop, with inline `$`-frame ingestion (§5:
    /// "TCP-interleaved ingress uses the RTSP connection's own thread to
    /// call push_packet directly").
    fn run(&mut self) -> &'static str {
        loop {
            let first_byte = match self.reader.fill_buf() {
                Ok(buf) if buf.is_empty() => return "connection closed by client",
                Ok(buf) => buf[0],
                Err(ref e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                    return "idle timeout"
                }
                Err(_) => return "read error",
            };

            if first_byte == b'$' {
                if !self.read_interleaved_frame() {
                    return "read error";
                }
                continue;
            }

            match self.read_request() {
                None => return "connection closed by client",
                Some(Err(e)) => {
                    tracing::warn!(peer = %self.peer_addr, error = %e, "parse error");
                    let _ = self.writer.lock().write_all(&crate::protocol::response::RtspResponse::bad_request().to_bytes());
                }
                Some(Ok(request)) => {
                    tracing::debug!(
                        peer = %self.peer_addr,
                        method = request.method.as_str(),
                        path = %request.path,
                        cseq = ?request.cseq(),
                        "request"
                    );

                    let method = request.method;
                    let response =
                        crate::protocol::dispatch(&request, &mut self.session, &self.ctx, &self.sinks);

                    tracing::debug!(peer = %self.peer_addr, status = response.status(), "response");

                    let ok = response.status() == 200;
                    if self.writer.lock().write_all(&response.to_bytes()).is_err() {
                        return "write error";
                    }

                    // A bound publisher's control connection can sit idle
                    // indefinitely once RECORD succeeds — media keeps
                    // flowing over UDP, or over this same socket's `$`
                    // frames, neither of which touches `rtsp_timeout_s`.
                    // Liveness for that case is the maintenance sweep's
                    // BROADCASTER_TIMEOUT reaper instead (§5).
                    if ok && matches!(method, Method::Record | Method::Play) {
                        let _ = self.reader.get_ref().set_read_timeout(None);
                    }
                }
            }
        }
    }

    /// Read one full request (headers, then `Content-Length` body bytes)
    /// off the wire and parse it. `None` means the client closed the
    /// connection before a new request began.
    fn read_request(&mut self) -> Option<Result<RtspRequest>> {
        let mut header_text = String::new();
        loop {
            let mut line = String::new();
            match self.reader.read_line(&mut line) {
                Ok(0) => return None,
                Ok(_) => {
                    let blank = line == "\r\n" || line == "\n";
                    header_text.push_str(&line);
                    if blank {
                        break;
                    }
                }
                Err(e) => return Some(Err(RtspError::Io(e))),
            }
        }

        let content_length = header_text
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.trim().eq_ignore_ascii_case("content-length").then(|| value.trim().parse().ok())
            })
            .flatten()
            .unwrap_or(0usize);

        let mut full = header_text.into_bytes();
        if content_length > 0 {
            let mut body = vec![0u8; content_length];
            if let Err(e) = self.reader.read_exact(&mut body) {
                return Some(Err(RtspError::Io(e)));
            }
            full.extend_from_slice(&body);
        }

        Some(RtspRequest::parse(&full))
    }

    /// Read a `$`, channel, u16-BE length frame and its payload, then
    /// route it by channel to the matching track's `push_packet` (§4.8,
    /// §5).
    fn read_interleaved_frame(&mut self) -> bool {
        let mut header = [0u8; 4];
        if self.reader.read_exact(&mut header).is_err() {
            return false;
        }
        let channel = header[1];
        let len = u16::from_be_bytes([header[2], header[3]]) as usize;
        let mut payload = vec![0u8; len];
        if self.reader.read_exact(&mut payload).is_err() {
            return false;
        }
        self.route_interleaved(channel, &payload);
        true
    }

    fn route_interleaved(&self, channel: u8, bytes: &[u8]) {
        let Some(rtp_session) = self.session.rtp_session() else {
            return;
        };
        let Some(reflector_session) = rtp_session.reflector_session() else {
            return;
        };
        for stream in reflector_session.streams() {
            let Some((rtp_channel, rtcp_channel)) = stream.socket_pair().interleaved_channels() else {
                continue;
            };
            if channel == rtp_channel {
                stream.push_packet_and_reflect(bytes, false);
                return;
            }
            if channel == rtcp_channel {
                stream.push_packet_and_reflect(bytes, true);
                return;
            }
        }
    }

    /// Release whatever this connection's `RtspSession` holds, mirroring
    /// `protocol::handler::handle_teardown` for a client that disconnects
    /// without sending TEARDOWN first.
    fn cleanup(&mut self) {
        let Some(rtp_session) = self.session.rtp_session().cloned() else {
            return;
        };

        if let Some(session) = rtp_session.reflector_session() {
            match rtp_session.role() {
                Some(Role::Publisher) => {
                    tracing::info!(stream_id = %session.source_id(), "publisher disconnected without TEARDOWN");
                    session.tear_down_all_outputs();
                    self.ctx.sessions.remove(session.source_id());
                }
                Some(Role::Subscriber) | None => {
                    if let Some(subscriber) = self.session.subscriber() {
                        session.remove_output(subscriber);
                    }
                }
            }
        }

        self.ctx.rtp_sessions.remove(rtp_session.id());
    }
}

/// Per-track channel pair this sink knows how to frame outbound packets
/// onto.
#[derive(Debug, Clone, Copy)]
struct TrackChannels {
    rtp_channel: u8,
    rtcp_channel: u8,
}

/// A subscriber sink that `$`-frames reflected packets onto the shared
/// RTSP connection socket, one channel pair per track (§4.7, §4.8).
///
/// Writes share `writer`'s mutex with the connection's own RTSP response
/// writes (§5: "an inbound data packet acquires the read mutex, a
/// response acquires the session mutex"), and may run on a different
/// thread than the connection that created it — the publisher's ingest
/// thread, or a UDP idle-task thread, drives this sink's `write` calls
/// whenever this subscriber is attached to a Stream being reflected.
pub struct TcpInterleavedSink {
    writer: Arc<Mutex<TcpStream>>,
    channels: Mutex<Vec<Option<TrackChannels>>>,
}

impl TcpInterleavedSink {
    fn new(writer: Arc<Mutex<TcpStream>>) -> Self {
        Self {
            writer,
            channels: Mutex::new(Vec::new()),
        }
    }

    fn register_channel(&self, stream_index: usize, channels: (u8, u8)) {
        let mut table = self.channels.lock();
        if table.len() <= stream_index {
            table.resize(stream_index + 1, None);
        }
        table[stream_index] = Some(TrackChannels {
            rtp_channel: channels.0,
            rtcp_channel: channels.1,
        });
    }
}

impl PacketSink for TcpInterleavedSink {
    fn write(
        &self,
        stream_index: usize,
        direction: Direction,
        bytes: &[u8],
        _transmit_time: Instant,
        _burst_begin: WriteBurstBegin,
    ) -> WriteOutcome {
        let channels = self.channels.lock().get(stream_index).copied().flatten();
        let Some(channels) = channels else {
            return WriteOutcome::Ok;
        };
        let channel = match direction {
            Direction::Rtp => channels.rtp_channel,
            Direction::Rtcp => channels.rtcp_channel,
        };

        let mut frame = Vec::with_capacity(4 + bytes.len());
        frame.push(b'$');
        frame.push(channel);
        frame.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
        frame.extend_from_slice(bytes);

        match self.writer.lock().write_all(&frame) {
            Ok(()) => WriteOutcome::Ok,
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => WriteOutcome::WouldBlock,
            Err(e) => {
                tracing::trace!(error = %e, "tcp-interleaved write failed, dropping datagram");
                WriteOutcome::Ok
            }
        }
    }
}

/// Builds (and reuses, across a connection's several track SETUPs) the
/// one [`TcpInterleavedSink`] that serves a TCP-interleaved subscriber.
struct TcpSinkFactory {
    writer: Arc<Mutex<TcpStream>>,
    sink: Mutex<Option<Arc<TcpInterleavedSink>>>,
}

impl TcpSinkFactory {
    fn new(writer: Arc<Mutex<TcpStream>>) -> Self {
        Self {
            writer,
            sink: Mutex::new(None),
        }
    }
}

impl SinkFactory for TcpSinkFactory {
    fn make_sink(
        &self,
        _transport: &TransportHeader,
        interleaved: Option<(u8, u8)>,
        stream_index: usize,
    ) -> (Arc<dyn PacketSink>, Option<(u16, u16)>) {
        let mut guard = self.sink.lock();
        let sink = guard
            .get_or_insert_with(|| Arc::new(TcpInterleavedSink::new(self.writer.clone())))
            .clone();

        if let Some(channels) = interleaved {
            sink.register_channel(stream_index, channels);
        }

        (sink as Arc<dyn PacketSink>, None)
    }
}
