//! Periodic maintenance sweep (§5, §6): on a fixed tick, send each stream's
//! due compound RTCP receiver report back to its publisher, and tear down
//! any session whose publisher has gone quiet past `BROADCASTER_TIMEOUT`.
//!
//! Runs on its own thread, started alongside the TCP accept loop and every
//! UDP idle-task by [`crate::server::ReflectorServer::start`], and stopped
//! by the same `ctx.running` flag.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::BROADCASTER_TIMEOUT;
use crate::context::ReflectorContext;
use crate::reflector::ReflectorSession;
use crate::rtcp::{build_receiver_report, REFLECTOR_SSRC};
use crate::rtp_session::Role;

/// Sweep granularity. Coarser than either `RR_INTERVAL` or
/// `BROADCASTER_TIMEOUT` themselves; each is tracked against its own last-
/// event timestamp, so the tick only needs to be frequent enough that
/// neither cadence drifts noticeably.
const TICK_INTERVAL: Duration = Duration::from_millis(500);

pub fn spawn(ctx: ReflectorContext) {
    thread::spawn(move || run(ctx));
}

fn run(ctx: ReflectorContext) {
    while ctx.running.load(Ordering::SeqCst) {
        sweep(&ctx);
        thread::sleep(TICK_INTERVAL);
    }
    tracing::debug!("maintenance sweep exited");
}

fn sweep(ctx: &ReflectorContext) {
    let now = Instant::now();
    for session in ctx.sessions.snapshot() {
        send_due_receiver_reports(&session, now);
        evict_if_broadcaster_timed_out(ctx, &session, now);
    }
}

/// Emit one compound RR + SDES + APP("QTSS" eye-count) packet per track
/// whose RTP `Sender` is due, addressed back to that track's publisher
/// (§4.4 step 2, §6).
fn send_due_receiver_reports(session: &Arc<ReflectorSession>, now: Instant) {
    let cname = format!("reflector@{}", session.source_id());
    for stream in session.streams() {
        if stream.rtp_sender().due_for_receiver_report(now) {
            let report =
                build_receiver_report(REFLECTOR_SSRC, &cname, session.subscriber_count() as u32);
            stream.send_to_publisher(&report);
            stream.rtp_sender().mark_receiver_report_sent(now);
        }
    }
}

/// Tear a session down once its publisher's `RtpSession` has had no
/// ingress activity for `BROADCASTER_TIMEOUT` (§5).
fn evict_if_broadcaster_timed_out(ctx: &ReflectorContext, session: &Arc<ReflectorSession>, now: Instant) {
    let Some(publisher) = session.publisher_rtp_session() else {
        return;
    };
    if publisher.role() != Some(Role::Publisher) {
        return;
    }
    if !publisher.is_expired(BROADCASTER_TIMEOUT, now) {
        return;
    }

    tracing::info!(stream_id = %session.source_id(), "broadcaster timed out, tearing down session");
    session.tear_down_all_outputs();
    ctx.sessions.remove(session.source_id());
    ctx.rtp_sessions.remove(publisher.id());
}
