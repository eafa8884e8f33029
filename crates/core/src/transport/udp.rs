//! UDP media transport (§4.3, §5): one idle-task thread per bound
//! `SocketPair`, demuxing inbound datagrams to their owning `Stream` and
//! driving its reflect cycle, plus the subscriber-side sink that sends
//! reflected packets out to a client's negotiated `client_port`.

use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::sender::Direction;
use crate::socket::SocketPair;
use crate::subscriber::{PacketSink, WriteBurstBegin, WriteOutcome};

/// Idle-timer granularity named in §5: once a drain pass finds nothing to
/// read on either socket, the task sleeps this long before trying again.
const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Spawn this pair's ingest idle-task, unless it's the virtual
/// TCP-interleaved pair (that ingress runs on the RTSP connection's own
/// thread instead, per §5).
pub fn spawn_idle_task(pair: Arc<SocketPair>, running: Arc<AtomicBool>) {
    if pair.is_interleaved() {
        return;
    }
    thread::spawn(move || run_idle_task(pair, running));
}

fn run_idle_task(pair: Arc<SocketPair>, running: Arc<AtomicBool>) {
    let (Some(rtp_socket), Some(rtcp_socket)) = (pair.rtp_socket(), pair.rtcp_socket()) else {
        return;
    };

    let mut buf = [0u8; 65_536];
    while running.load(Ordering::SeqCst) {
        let got_rtp = drain_socket(rtp_socket, &pair, false, &mut buf);
        let got_rtcp = drain_socket(rtcp_socket, &pair, true, &mut buf);
        if !got_rtp && !got_rtcp {
            thread::sleep(IDLE_POLL_INTERVAL);
        }
    }
}

/// Read every datagram currently available on `socket`, routing each to
/// its Stream. Returns whether anything was read this pass.
fn drain_socket(socket: &UdpSocket, pair: &SocketPair, is_rtcp: bool, buf: &mut [u8]) -> bool {
    let mut drained = false;
    loop {
        match socket.recv_from(buf) {
            Ok((len, addr)) => {
                drained = true;
                route(pair, is_rtcp, addr, &buf[..len]);
            }
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
            Err(e) => {
                tracing::warn!(error = %e, rtcp = is_rtcp, "udp recv error");
                break;
            }
        }
    }
    drained
}

fn route(pair: &SocketPair, is_rtcp: bool, src: SocketAddr, bytes: &[u8]) {
    let demuxer = if is_rtcp { pair.rtcp_demuxer() } else { pair.rtp_demuxer() };
    let Some(weak_stream) = demuxer.lookup((src.ip(), src.port())) else {
        return;
    };
    let Some(stream) = weak_stream.upgrade() else {
        return;
    };
    stream.learn_publisher_addr(src);
    stream.push_packet_and_reflect(bytes, is_rtcp);
}

/// Per-track destination this sink knows how to deliver to: the client's
/// negotiated RTP/RTCP port pair.
#[derive(Debug, Clone, Copy)]
struct TrackRoute {
    rtp_port: u16,
    rtcp_port: u16,
}

/// A subscriber sink that sends reflected packets to a client's
/// `client_port` over a shared outbound socket, one route per track
/// (§4.7, §4.8).
pub struct UdpSink {
    socket: Arc<UdpSocket>,
    client_ip: IpAddr,
    routes: parking_lot::Mutex<Vec<Option<TrackRoute>>>,
}

impl UdpSink {
    pub fn new(socket: Arc<UdpSocket>, client_ip: IpAddr) -> Self {
        Self {
            socket,
            client_ip,
            routes: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Record this track's client port pair. Grows the route table as
    /// needed — tracks may be SETUP in any order.
    pub fn register_route(&self, stream_index: usize, client_port: (u16, u16)) {
        let mut routes = self.routes.lock();
        if routes.len() <= stream_index {
            routes.resize(stream_index + 1, None);
        }
        routes[stream_index] = Some(TrackRoute {
            rtp_port: client_port.0,
            rtcp_port: client_port.1,
        });
    }

    pub fn local_port(&self) -> Option<u16> {
        self.socket.local_addr().ok().map(|a| a.port())
    }
}

impl PacketSink for UdpSink {
    fn write(
        &self,
        stream_index: usize,
        direction: Direction,
        bytes: &[u8],
        _transmit_time: Instant,
        _burst_begin: WriteBurstBegin,
    ) -> WriteOutcome {
        // Best-effort immediate delivery: this sink writes to the socket's
        // own send buffer as soon as it is called rather than holding the
        // packet until `_transmit_time`; the idle-task ingest loop already
        // paces how often this is invoked.
        let route = self.routes.lock().get(stream_index).copied().flatten();
        let Some(route) = route else {
            return WriteOutcome::Ok;
        };
        let port = match direction {
            Direction::Rtp => route.rtp_port,
            Direction::Rtcp => route.rtcp_port,
        };
        match self.socket.send_to(bytes, SocketAddr::new(self.client_ip, port)) {
            Ok(_) => WriteOutcome::Ok,
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => WriteOutcome::WouldBlock,
            Err(e) => {
                tracing::trace!(error = %e, "udp subscriber send failed, dropping datagram");
                WriteOutcome::Ok
            }
        }
    }
}

/// Builds [`UdpSink`]s for one subscriber connection: the same shared
/// outbound socket and client address across every track SETUP on that
/// connection, with one [`UdpSink`] reused and added to across calls.
pub struct UdpSinkFactory {
    socket: Arc<UdpSocket>,
    client_ip: IpAddr,
    sink: parking_lot::Mutex<Option<Arc<UdpSink>>>,
}

impl UdpSinkFactory {
    pub fn new(socket: Arc<UdpSocket>, client_ip: IpAddr) -> Self {
        Self {
            socket,
            client_ip,
            sink: parking_lot::Mutex::new(None),
        }
    }
}

impl crate::protocol::handler::SinkFactory for UdpSinkFactory {
    fn make_sink(
        &self,
        transport: &crate::protocol::request::TransportHeader,
        _interleaved: Option<(u8, u8)>,
        stream_index: usize,
    ) -> (Arc<dyn PacketSink>, Option<(u16, u16)>) {
        let mut guard = self.sink.lock();
        let sink = guard
            .get_or_insert_with(|| Arc::new(UdpSink::new(self.socket.clone(), self.client_ip)))
            .clone();

        if let Some(client_port) = transport.client_port {
            sink.register_route(stream_index, client_port);
        }

        let server_port = sink.local_port().map(|p| (p, p));
        (sink as Arc<dyn PacketSink>, server_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn route_table_grows_and_reports_unregistered_as_none() {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").unwrap());
        let sink = UdpSink::new(socket, IpAddr::V4(Ipv4Addr::LOCALHOST));
        sink.register_route(2, (6000, 6001));
        assert_eq!(sink.routes.lock().len(), 3);
        assert!(sink.routes.lock()[0].is_none());
        assert!(sink.routes.lock()[2].is_some());
    }

    #[test]
    fn write_without_route_is_ok_and_silent() {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").unwrap());
        let sink = UdpSink::new(socket, IpAddr::V4(Ipv4Addr::LOCALHOST));
        let outcome = sink.write(0, Direction::Rtp, &[0u8; 12], Instant::now(), WriteBurstBegin(true));
        assert_eq!(outcome, WriteOutcome::Ok);
    }
}
