//! `ReflectorContext`: the shared, explicitly-constructed services every
//! RTSP connection handler is given (Design Note "Global singletons" —
//! no ambient statics, everything is threaded in).

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use crate::config::ReflectorConfig;
use crate::registry::{RtpRegistry, SdpCache, SessionRegistry};
use crate::sdp::SdpParser;
use crate::socket::SocketPool;

/// Everything a connection handler needs beyond the bytes on its own
/// socket: the three registries from §4.9, the socket pool, the config,
/// and the SDP parser collaborator.
///
/// `running` is the same flag the TCP accept loop and every UDP idle-task
/// thread watch, so one `ReflectorServer::stop` call tears the whole
/// process down (Design Note "Global singletons" resolved by explicit
/// construction instead of statics).
#[derive(Clone)]
pub struct ReflectorContext {
    pub config: Arc<ReflectorConfig>,
    pub sdp_cache: Arc<SdpCache>,
    pub sessions: Arc<SessionRegistry>,
    pub rtp_sessions: Arc<RtpRegistry>,
    pub socket_pool: Arc<SocketPool>,
    pub sdp_parser: Arc<dyn SdpParser>,
    pub running: Arc<AtomicBool>,
}

impl ReflectorContext {
    pub fn new(config: ReflectorConfig, local_ip: IpAddr) -> Self {
        Self {
            config: Arc::new(config),
            sdp_cache: Arc::new(SdpCache::new()),
            sessions: Arc::new(SessionRegistry::new()),
            rtp_sessions: Arc::new(RtpRegistry::new()),
            socket_pool: Arc::new(SocketPool::new(local_ip)),
            sdp_parser: Arc::new(crate::sdp::SimpleSdpParser),
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn with_parser(mut self, parser: Arc<dyn SdpParser>) -> Self {
        self.sdp_parser = parser;
        self
    }
}
