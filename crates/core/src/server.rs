//! `ReflectorServer`: owns the listening socket and the background threads
//! that make the reflector core observable from outside (§5).

use std::net::{IpAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::ReflectorConfig;
use crate::context::ReflectorContext;
use crate::error::{Result, RtspError};
use crate::maintenance;
use crate::transport::tcp;

/// Construction and lifecycle wrapper around a [`ReflectorContext`]: binds
/// the RTSP TCP listener, spawns its accept loop and the maintenance
/// sweep, and tears both down on `stop` (§5).
pub struct ReflectorServer {
    bind_addr: String,
    local_ip: IpAddr,
    ctx: ReflectorContext,
    running: Arc<AtomicBool>,
}

impl ReflectorServer {
    /// Build a server bound to `bind_addr` (e.g. `"0.0.0.0:554"`), with
    /// `local_ip` the address its UDP socket pool binds RTP/RTCP pairs on.
    pub fn new(bind_addr: impl Into<String>, local_ip: IpAddr) -> Self {
        Self::with_config(bind_addr, local_ip, ReflectorConfig::default())
    }

    pub fn with_config(bind_addr: impl Into<String>, local_ip: IpAddr, config: ReflectorConfig) -> Self {
        let running = Arc::new(AtomicBool::new(false));
        let mut ctx = ReflectorContext::new(config, local_ip);
        ctx.running = running.clone();
        Self {
            bind_addr: bind_addr.into(),
            local_ip,
            ctx,
            running,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The shared services every connection handler sees; useful for tests
    /// that want to inspect the session/rtp registries directly.
    pub fn context(&self) -> &ReflectorContext {
        &self.ctx
    }

    /// Bind the TCP listener and spawn the accept loop plus the
    /// maintenance sweep (§5). UDP socket pairs are bound lazily per
    /// publisher SETUP, not here.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(RtspError::AlreadyRunning);
        }

        let listener = TcpListener::bind(&self.bind_addr).map_err(|e| RtspError::BindFailed(e.to_string()))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| RtspError::BindFailed(e.to_string()))?;

        self.running.store(true, Ordering::SeqCst);

        let ctx = self.ctx.clone();
        std::thread::spawn(move || tcp::accept_loop(listener, ctx));
        maintenance::spawn(self.ctx.clone());

        tracing::info!(bind_addr = %self.bind_addr, local_ip = %self.local_ip, "reflector server started");
        Ok(())
    }

    /// Signal every accept loop, idle-task, and maintenance sweep thread to
    /// exit. Threads observe `ctx.running` on their own poll cadence, so
    /// this returns before they've necessarily all stopped.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        tracing::info!(bind_addr = %self.bind_addr, "reflector server stopping");
    }
}
