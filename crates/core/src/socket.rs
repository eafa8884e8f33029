//! `SocketPair` + `Demuxer`: a bound UDP port pair (even=RTP, odd=RTCP) and
//! the concurrent lookup table that routes inbound datagrams to the
//! `Stream` that owns them (§4.3).
//!
//! The same type also represents the virtual "interleaved" pair used when
//! a track's transport is TCP: no OS sockets are bound, and routing is done
//! by `$`-frame channel number instead of source address.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::config::{PORT_RANGE_MAX, PORT_RANGE_MIN};
use crate::error::{Result, RtspError};
use crate::stream::Stream;

/// A key `(source-ip, source-port)` used to demultiplex inbound datagrams.
/// `(0.0.0.0, 0)` is the wildcard entry matched when nothing more specific
/// is registered (§4.3).
pub type DemuxKey = (IpAddr, u16);

/// The wildcard demux key: matched when no more specific `(src_ip, src_port)`
/// entry is registered.
pub const WILDCARD: DemuxKey = (IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);

/// Concurrent `(src_ip, src_port) -> T` table with O(1) register/lookup/unregister.
///
/// Registering an already-occupied key is an invariant violation (§4.3) —
/// it returns [`RtspError::DemuxerConflict`] rather than silently
/// overwriting, since that would mean two broadcasters racing for the same
/// source address on the same pair.
pub struct Demuxer<T: Clone> {
    entries: RwLock<HashMap<DemuxKey, T>>,
}

impl<T: Clone> Demuxer<T> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, key: DemuxKey, value: T) -> Result<()> {
        let mut entries = self.entries.write();
        if entries.contains_key(&key) {
            return Err(RtspError::DemuxerConflict(format!("{:?}", key)));
        }
        entries.insert(key, value);
        Ok(())
    }

    pub fn unregister(&self, key: DemuxKey) -> Option<T> {
        self.entries.write().remove(&key)
    }

    /// Look up the exact key, falling back to the wildcard entry.
    pub fn lookup(&self, key: DemuxKey) -> Option<T> {
        let entries = self.entries.read();
        entries.get(&key).or_else(|| entries.get(&WILDCARD)).cloned()
    }

    pub fn contains_exact(&self, key: DemuxKey) -> bool {
        self.entries.read().contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> Default for Demuxer<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// How a `SocketPair`'s two channels are realized on the wire.
enum PairTransport {
    /// Two bound UDP sockets: `rtp` on an even port, `rtcp` on `rtp + 1`.
    Udp {
        rtp: UdpSocket,
        rtcp: UdpSocket,
        rtp_port: u16,
    },
    /// No OS sockets — RTP/RTCP ride the RTSP TCP connection as `$`-framed
    /// interleaved data (§4.8); routing is by channel number.
    Interleaved { rtp_channel: u8, rtcp_channel: u8 },
}

/// A bound UDP port pair, or its virtual TCP-interleaved equivalent (§4.3).
pub struct SocketPair {
    transport: PairTransport,
    rtp_demuxer: Demuxer<Weak<Stream>>,
    rtcp_demuxer: Demuxer<Weak<Stream>>,
}

impl SocketPair {
    /// Bind two adjacent UDP ports (`port`, `port + 1`) on `local_ip`.
    fn bind_udp(local_ip: IpAddr, port: u16) -> std::io::Result<Self> {
        let rtp = UdpSocket::bind(SocketAddr::new(local_ip, port))?;
        let rtcp = UdpSocket::bind(SocketAddr::new(local_ip, port + 1))?;
        rtp.set_nonblocking(true)?;
        rtcp.set_nonblocking(true)?;
        Ok(Self {
            transport: PairTransport::Udp {
                rtp,
                rtcp,
                rtp_port: port,
            },
            rtp_demuxer: Demuxer::new(),
            rtcp_demuxer: Demuxer::new(),
        })
    }

    /// Construct the virtual pair backing a TCP-interleaved track.
    pub fn new_interleaved(rtp_channel: u8, rtcp_channel: u8) -> Self {
        Self {
            transport: PairTransport::Interleaved {
                rtp_channel,
                rtcp_channel,
            },
            rtp_demuxer: Demuxer::new(),
            rtcp_demuxer: Demuxer::new(),
        }
    }

    pub fn is_interleaved(&self) -> bool {
        matches!(self.transport, PairTransport::Interleaved { .. })
    }

    pub fn rtp_port(&self) -> Option<u16> {
        match &self.transport {
            PairTransport::Udp { rtp_port, .. } => Some(*rtp_port),
            PairTransport::Interleaved { .. } => None,
        }
    }

    pub fn rtcp_port(&self) -> Option<u16> {
        self.rtp_port().map(|p| p + 1)
    }

    pub fn interleaved_channels(&self) -> Option<(u8, u8)> {
        match &self.transport {
            PairTransport::Interleaved {
                rtp_channel,
                rtcp_channel,
            } => Some((*rtp_channel, *rtcp_channel)),
            PairTransport::Udp { .. } => None,
        }
    }

    pub fn rtp_socket(&self) -> Option<&UdpSocket> {
        match &self.transport {
            PairTransport::Udp { rtp, .. } => Some(rtp),
            PairTransport::Interleaved { .. } => None,
        }
    }

    pub fn rtcp_socket(&self) -> Option<&UdpSocket> {
        match &self.transport {
            PairTransport::Udp { rtcp, .. } => Some(rtcp),
            PairTransport::Interleaved { .. } => None,
        }
    }

    pub fn join_multicast(&self, group: Ipv4Addr, ttl: u32) -> std::io::Result<()> {
        if let PairTransport::Udp { rtp, rtcp, .. } = &self.transport {
            rtp.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
            rtcp.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
            rtp.set_multicast_ttl_v4(ttl)?;
            rtcp.set_multicast_ttl_v4(ttl)?;
        }
        Ok(())
    }

    pub fn rtp_demuxer(&self) -> &Demuxer<Weak<Stream>> {
        &self.rtp_demuxer
    }

    pub fn rtcp_demuxer(&self) -> &Demuxer<Weak<Stream>> {
        &self.rtcp_demuxer
    }
}

struct PoolEntry {
    pair: Arc<SocketPair>,
    refcount: usize,
}

/// Allocates and reference-counts UDP [`SocketPair`]s from the configured
/// port range (§4.3, §6). The pool mutex protects membership only — packet
/// flow through an already-allocated pair never touches it.
pub struct SocketPool {
    local_ip: IpAddr,
    entries: parking_lot::Mutex<HashMap<u16, PoolEntry>>,
}

impl SocketPool {
    pub fn new(local_ip: IpAddr) -> Self {
        Self {
            local_ip,
            entries: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Allocate or share a `SocketPair`.
    ///
    /// If `src_ip` is non-zero, an existing pair with no demuxer entry for
    /// `(src_ip, src_port)` is reused. Otherwise, if `desired_port` is
    /// nonzero it must match exactly or the call fails; a zero
    /// `desired_port` scans `[PORT_RANGE_MIN, PORT_RANGE_MAX]` stepping by
    /// 2 until a bind succeeds on both ports.
    pub fn get(
        &self,
        desired_port: u16,
        src_ip: IpAddr,
        src_port: u16,
    ) -> Result<Arc<SocketPair>> {
        let mut entries = self.entries.lock();

        if !src_ip.is_unspecified() {
            for entry in entries.values_mut() {
                let key = (src_ip, src_port);
                if !entry.pair.rtp_demuxer().contains_exact(key) {
                    entry.refcount += 1;
                    return Ok(entry.pair.clone());
                }
            }
        }

        if desired_port != 0 {
            if let Some(entry) = entries.get_mut(&desired_port) {
                entry.refcount += 1;
                return Ok(entry.pair.clone());
            }
            let pair = SocketPair::bind_udp(self.local_ip, desired_port)
                .map_err(|e| RtspError::BindFailed(e.to_string()))?;
            let pair = Arc::new(pair);
            entries.insert(
                desired_port,
                PoolEntry {
                    pair: pair.clone(),
                    refcount: 1,
                },
            );
            return Ok(pair);
        }

        let mut port = PORT_RANGE_MIN;
        while port < PORT_RANGE_MAX {
            if !entries.contains_key(&port) {
                if let Ok(pair) = SocketPair::bind_udp(self.local_ip, port) {
                    let pair = Arc::new(pair);
                    entries.insert(
                        port,
                        PoolEntry {
                            pair: pair.clone(),
                            refcount: 1,
                        },
                    );
                    return Ok(pair);
                }
            }
            port += 2;
        }

        Err(RtspError::PortRangeExhausted)
    }

    /// Release a reference; the pair is dropped (and its OS sockets closed)
    /// once the refcount reaches zero.
    pub fn release(&self, pair: &Arc<SocketPair>) {
        let Some(port) = pair.rtp_port() else {
            return;
        };
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(&port) {
            entry.refcount = entry.refcount.saturating_sub(1);
            if entry.refcount == 0 {
                entries.remove(&port);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demuxer_register_lookup_unregister() {
        let d: Demuxer<u32> = Demuxer::new();
        let key = (IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 5000);
        d.register(key, 7).unwrap();
        assert_eq!(d.lookup(key), Some(7));
        assert_eq!(d.unregister(key), Some(7));
        assert_eq!(d.lookup(key), None);
    }

    #[test]
    fn demuxer_register_conflict_fails_loudly() {
        let d: Demuxer<u32> = Demuxer::new();
        let key = (IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 5000);
        d.register(key, 1).unwrap();
        assert!(d.register(key, 2).is_err());
    }

    #[test]
    fn demuxer_falls_back_to_wildcard() {
        let d: Demuxer<&'static str> = Demuxer::new();
        d.register(WILDCARD, "default").unwrap();
        let key = (IpAddr::V4(Ipv4Addr::new(192, 168, 1, 9)), 4000);
        assert_eq!(d.lookup(key), Some("default"));
    }

    #[test]
    fn pool_allocates_adjacent_even_odd_ports() {
        let pool = SocketPool::new(IpAddr::V4(Ipv4Addr::LOCALHOST));
        let pair = pool
            .get(0, IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
            .expect("bind a pair");
        let rtp = pair.rtp_port().unwrap();
        let rtcp = pair.rtcp_port().unwrap();
        assert_eq!(rtcp, rtp + 1);
        assert_eq!(rtp % 2, 0);
    }

    #[test]
    fn pool_refuses_mismatched_desired_port() {
        let pool = SocketPool::new(IpAddr::V4(Ipv4Addr::LOCALHOST));
        let first = pool
            .get(0, IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
            .expect("bind a pair");
        let desired = first.rtp_port().unwrap().wrapping_add(1000);
        // Asking for a specific, unallocated port binds fresh (doesn't
        // collide with `first`), demonstrating desired_port is honored.
        let second = pool
            .get(desired, IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
            .expect("bind a pair on the exact requested port");
        assert_eq!(second.rtp_port(), Some(desired));
    }

    #[test]
    fn pool_release_drops_refcount_to_zero() {
        let pool = SocketPool::new(IpAddr::V4(Ipv4Addr::LOCALHOST));
        let pair = pool
            .get(0, IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
            .expect("bind a pair");
        pool.release(&pair);
        assert!(pool.entries.lock().is_empty());
    }
}
