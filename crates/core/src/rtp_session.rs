//! `RTPSession`: the per-client RTP-level state that outlives any single
//! RTSP request — created on first SETUP, evicted on inactivity (§3, §5).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::reflector::ReflectorSession;

/// Which side of the reflector this RTP session represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The broadcaster, pushing media via ANNOUNCE/SETUP/RECORD.
    Publisher,
    /// A player, pulling media via SETUP/PLAY.
    Subscriber,
}

/// Per-client RTP session: which `ReflectorSession` it's bound to, the
/// overbuffer window it negotiated, and the inactivity clock that drives
/// eviction (§3's `RTPSession` row).
pub struct RtpSession {
    id: String,
    role: Mutex<Option<Role>>,
    reflector_session: Mutex<Option<Arc<ReflectorSession>>>,
    playing: Arc<AtomicBool>,
    overbuffer_window_s: u64,
    last_activity: Mutex<Instant>,
}

impl RtpSession {
    pub fn new(session_id: impl Into<String>, overbuffer_window_s: u64) -> Self {
        Self {
            id: session_id.into(),
            role: Mutex::new(None),
            reflector_session: Mutex::new(None),
            playing: Arc::new(AtomicBool::new(false)),
            overbuffer_window_s,
            last_activity: Mutex::new(Instant::now()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> Option<Role> {
        *self.role.lock()
    }

    pub fn set_role(&self, role: Role) {
        *self.role.lock() = Some(role);
    }

    pub fn bind_reflector_session(&self, session: Arc<ReflectorSession>) {
        *self.reflector_session.lock() = Some(session);
    }

    pub fn reflector_session(&self) -> Option<Arc<ReflectorSession>> {
        self.reflector_session.lock().clone()
    }

    /// The shared playing flag a [`SubscriberOutput`](crate::subscriber::SubscriberOutput)
    /// is constructed with, so PLAY/PAUSE/TEARDOWN toggle delivery without
    /// the Sender ever touching this session directly.
    pub fn playing_flag(&self) -> Arc<AtomicBool> {
        self.playing.clone()
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    pub fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::SeqCst);
    }

    pub fn overbuffer_window(&self) -> Duration {
        Duration::from_secs(self.overbuffer_window_s)
    }

    /// Refresh the inactivity clock. Called on every ingress packet
    /// (rate-limited by the caller per §5) and on every RTCP RR.
    pub fn mark_active(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn is_expired(&self, timeout: Duration, now: Instant) -> bool {
        now.saturating_duration_since(*self.last_activity.lock()) > timeout
    }
}
