//! Shared lookup tables that bridge ANNOUNCE, SETUP, and DESCRIBE across
//! RTSP connections (§4.9, §5, Design Note "Global singletons").
//!
//! Each map uses the single `get_or_insert`/`get`/`remove` shape the
//! unification note in §9 calls for, so the ad-hoc locking the source
//! used at each call site collapses to one pattern here.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Result, RtspError};
use crate::reflector::ReflectorSession;
use crate::rtp_session::RtpSession;

/// `path -> SDP text`, bridging a publisher's ANNOUNCE to the first SETUP
/// and every subsequent DESCRIBE (§4.9).
#[derive(Default)]
pub struct SdpCache {
    entries: RwLock<HashMap<String, String>>,
}

impl SdpCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, path: impl Into<String>, sdp_text: impl Into<String>) {
        self.entries.write().insert(path.into(), sdp_text.into());
    }

    pub fn get(&self, path: &str) -> Option<String> {
        self.entries.read().get(path).cloned()
    }

    pub fn remove(&self, path: &str) -> Option<String> {
        self.entries.write().remove(path)
    }
}

/// `stream ID -> ReflectorSession`, one lock for lookup; once resolved the
/// session is used without holding this lock (§4.9, §5).
#[derive(Default)]
pub struct SessionRegistry {
    entries: RwLock<HashMap<String, Arc<ReflectorSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, stream_id: &str) -> Option<Arc<ReflectorSession>> {
        self.entries.read().get(stream_id).cloned()
    }

    /// Register a freshly-setup session. Fails with [`RtspError::SessionConflict`]
    /// if one is already registered under this ID (a publisher re-ANNOUNCEing
    /// the same path without a TEARDOWN first).
    pub fn insert(&self, stream_id: impl Into<String>, session: Arc<ReflectorSession>) -> Result<()> {
        let stream_id = stream_id.into();
        let mut entries = self.entries.write();
        if entries.contains_key(&stream_id) {
            return Err(RtspError::SessionConflict(stream_id));
        }
        entries.insert(stream_id, session);
        Ok(())
    }

    pub fn remove(&self, stream_id: &str) -> Option<Arc<ReflectorSession>> {
        self.entries.write().remove(stream_id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A point-in-time copy of every registered session, for a sweep that
    /// shouldn't hold the registry lock while doing per-session work (§5).
    pub fn snapshot(&self) -> Vec<Arc<ReflectorSession>> {
        self.entries.read().values().cloned().collect()
    }
}

/// `RTSP session ID -> RTP session`, same single-lock discipline as
/// [`SessionRegistry`] (§4.9).
#[derive(Default)]
pub struct RtpRegistry {
    entries: RwLock<HashMap<String, Arc<RtpSession>>>,
}

impl RtpRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<RtpSession>> {
        self.entries.read().get(session_id).cloned()
    }

    pub fn insert(&self, session_id: impl Into<String>, session: Arc<RtpSession>) {
        self.entries.write().insert(session_id.into(), session);
    }

    pub fn remove(&self, session_id: &str) -> Option<Arc<RtpSession>> {
        self.entries.write().remove(session_id)
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.entries.read().contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sdp_cache_round_trips() {
        let cache = SdpCache::new();
        cache.set("live.sdp", "v=0\r\n");
        assert_eq!(cache.get("live.sdp").as_deref(), Some("v=0\r\n"));
        assert_eq!(cache.remove("live.sdp").as_deref(), Some("v=0\r\n"));
        assert_eq!(cache.get("live.sdp"), None);
    }

    #[test]
    fn session_registry_rejects_duplicate_insert() {
        let registry = SessionRegistry::new();
        let parser = crate::sdp::SimpleSdpParser;
        let pool = crate::socket::SocketPool::new(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST));
        let sdp = "v=0\r\nm=video 0 RTP/AVP 96\r\na=rtpmap:96 H264/90000\r\n";
        let session = ReflectorSession::setup("live.sdp", sdp, &parser, &pool, || (0, 1)).unwrap();
        registry.insert("live.sdp", session.clone()).unwrap();
        assert!(registry.insert("live.sdp", session).is_err());
    }

    #[test]
    fn rtp_registry_insert_get_remove() {
        let registry = RtpRegistry::new();
        let session = Arc::new(RtpSession::new("abc123", 1));
        registry.insert("abc123", session);
        assert!(registry.contains("abc123"));
        assert!(registry.remove("abc123").is_some());
        assert!(!registry.contains("abc123"));
    }
}
