//! Request routing (§4.8): `Request -> Response` with every side effect
//! confined to the explicitly-passed [`ReflectorContext`] and
//! [`RtspSession`] (Design Note "Exception/error control flow").

use std::sync::Arc;
use std::time::Duration;

use crate::context::ReflectorContext;
use crate::error::RtspError;
use crate::protocol::request::{Method, RtspRequest, TransportHeader};
use crate::protocol::response::RtspResponse;
use crate::reflector::ReflectorSession;
use crate::rtp_session::{Role, RtpSession};
use crate::session::{sdp_cache_key, stream_id_from_path, track_id_from_path, RtspSession};
use crate::subscriber::{PacketSink, SubscriberOutput};

/// Builds the concrete transport a SETUP needs: for a TCP-interleaved
/// track, no sink-level binding is required up front beyond the channel
/// numbers already allocated by the caller; for UDP, the transport layer
/// binds a socket and reports back the server's chosen port pair.
///
/// `stream_index` is this track's position within the session; a
/// subscriber that SETUPs several tracks on the same connection gets the
/// *same* sink handed back for each call (the factory is responsible for
/// registering the new track's route — channel pair or client port pair
/// — against that existing sink rather than building a second one), so
/// one `SubscriberOutput` ends up fed by one sink spanning every track.
pub trait SinkFactory {
    fn make_sink(
        &self,
        transport: &TransportHeader,
        interleaved: Option<(u8, u8)>,
        stream_index: usize,
    ) -> (Arc<dyn PacketSink>, Option<(u16, u16)>);
}

/// Dispatch one parsed request and produce its response. `sinks` is only
/// consulted for a subscriber SETUP (§4.8).
pub fn dispatch(request: &RtspRequest, conn: &mut RtspSession, ctx: &ReflectorContext, sinks: &dyn SinkFactory) -> RtspResponse {
    let cseq = request.cseq();
    tracing::debug!(method = request.method.as_str(), path = %request.path, cseq = ?cseq, "routing request");

    let response = match request.method {
        Method::Options => handle_options(request),
        Method::Announce => handle_announce(request, ctx),
        Method::Describe => handle_describe(request, ctx),
        Method::Setup => handle_setup(request, conn, ctx, sinks),
        Method::Record => handle_record(conn),
        Method::Play => handle_play(conn),
        Method::Pause => handle_pause(conn),
        Method::Teardown => handle_teardown(conn, ctx),
        Method::GetParameter => RtspResponse::ok(),
        Method::SetParameter => RtspResponse::ok(),
    };

    match cseq {
        Some(seq) => response.cseq(seq),
        None => response,
    }
}

fn handle_options(request: &RtspRequest) -> RtspResponse {
    if request.cseq().is_none() {
        return RtspResponse::bad_request();
    }
    RtspResponse::ok().header(
        "Public",
        "DESCRIBE, SETUP, TEARDOWN, PLAY, PAUSE, OPTIONS, ANNOUNCE, RECORD",
    )
}

fn handle_announce(request: &RtspRequest, ctx: &ReflectorContext) -> RtspResponse {
    let Some(sdp_text) = request.body_as_str() else {
        return RtspResponse::unsupported_media_type();
    };
    let key = sdp_cache_key(&request.path);
    ctx.sdp_cache.set(key.clone(), sdp_text.to_string());
    tracing::info!(stream_id = %key, "cached announced SDP");
    RtspResponse::ok()
}

fn handle_describe(request: &RtspRequest, ctx: &ReflectorContext) -> RtspResponse {
    let key = sdp_cache_key(&request.path);
    match ctx.sdp_cache.get(&key) {
        Some(sdp_text) => RtspResponse::ok().body(sdp_text.into_bytes(), "application/sdp"),
        None => RtspResponse::not_found(),
    }
}

fn handle_setup(
    request: &RtspRequest,
    conn: &mut RtspSession,
    ctx: &ReflectorContext,
    sinks: &dyn SinkFactory,
) -> RtspResponse {
    let transport = match request.transport() {
        Some(Ok(t)) => t,
        Some(Err(_)) | None => return RtspResponse::bad_request(),
    };

    let stream_id = stream_id_from_path(&request.path);

    if transport.is_record {
        return handle_setup_publisher(&stream_id, &transport, &request.path, conn, ctx, sinks);
    }
    handle_setup_subscriber(&stream_id, &transport, &request.path, conn, ctx, sinks)
}

fn handle_setup_publisher(
    stream_id: &str,
    transport: &TransportHeader,
    path: &str,
    conn: &mut RtspSession,
    ctx: &ReflectorContext,
    sinks: &dyn SinkFactory,
) -> RtspResponse {
    let session = match ctx.sessions.get(stream_id) {
        Some(existing) => existing,
        None => {
            let Some(sdp_text) = ctx.sdp_cache.get(stream_id) else {
                return RtspResponse::not_found();
            };
            let mut next_channel = conn.next_interleaved_channel();
            let setup_result = ReflectorSession::setup(
                stream_id.to_string(),
                &sdp_text,
                ctx.sdp_parser.as_ref(),
                &ctx.socket_pool,
                || {
                    let pair = (next_channel, next_channel + 1);
                    next_channel = next_channel.wrapping_add(2);
                    pair
                },
            );
            conn.set_next_interleaved_channel(next_channel);

            let session = match setup_result {
                Ok(session) => session,
                Err(RtspError::BindFailed(_)) | Err(RtspError::PortRangeExhausted) => {
                    return RtspResponse::internal_error();
                }
                Err(_) => return RtspResponse::unsupported_media_type(),
            };

            if ctx.sessions.insert(stream_id.to_string(), session.clone()).is_err() {
                // Lost a race with another publisher connection; reuse whichever won.
                ctx.sessions.get(stream_id).unwrap_or(session)
            } else {
                for stream in session.streams() {
                    crate::transport::udp::spawn_idle_task(stream.socket_pair().clone(), ctx.running.clone());
                }
                session
            }
        }
    };

    bind_rtp_session(conn, ctx, Role::Publisher, session.clone());
    if let Some(rtp_session) = conn.rtp_session() {
        session.set_publisher_rtp_session(rtp_session.clone());
    }

    let Some(track_id) = track_id_from_path(path) else {
        return RtspResponse::bad_request();
    };
    let Some(stream_index) = session.streams().iter().position(|s| s.info().track_id == track_id) else {
        return RtspResponse::not_found();
    };
    let stream = &session.streams()[stream_index];

    // §6/§7: re-SETUP of a track the publisher already bound is a
    // conflict, not a silent rebind.
    if stream.is_receiving() {
        return RtspResponse::precondition_failed();
    }

    let server_port = stream.socket_pair().rtp_port().zip(stream.socket_pair().rtcp_port());
    let mut reply_transport = transport.clone();
    reply_transport.interleaved = stream.socket_pair().interleaved_channels();

    if transport.is_tcp_interleaved
        && let Some(channels) = stream.socket_pair().interleaved_channels()
    {
        let (sink, _) = sinks.make_sink(transport, Some(channels), stream_index);
        stream.set_publisher_sink(sink);
    }
    stream.mark_receiving();

    RtspResponse::ok()
        .session(conn.rtp_session().map(|s| s.id().to_string()).unwrap_or_default())
        .header("Transport", reply_transport.render(server_port))
}

fn handle_setup_subscriber(
    stream_id: &str,
    transport: &TransportHeader,
    path: &str,
    conn: &mut RtspSession,
    ctx: &ReflectorContext,
    sinks: &dyn SinkFactory,
) -> RtspResponse {
    let Some(session) = ctx.sessions.get(stream_id) else {
        return RtspResponse::not_found();
    };

    let Some(track_id) = track_id_from_path(path) else {
        return RtspResponse::bad_request();
    };
    let Some(stream_index) = session.streams().iter().position(|s| s.info().track_id == track_id) else {
        return RtspResponse::not_found();
    };

    bind_rtp_session(conn, ctx, Role::Subscriber, session.clone());

    let interleaved = if transport.is_tcp_interleaved {
        Some(conn.allocate_interleaved_channels())
    } else {
        None
    };
    let (sink, server_port) = sinks.make_sink(transport, interleaved, stream_index);

    if conn.subscriber().is_none() {
        let buffer_delay = Duration::from_secs_f64(ctx.config.default_buffer_delay_s);
        let playing_flag = conn
            .rtp_session()
            .expect("just bound")
            .playing_flag();
        let subscriber = Arc::new(SubscriberOutput::new(
            sink,
            session.streams().len(),
            playing_flag,
            buffer_delay,
        ));
        session.add_output(subscriber.clone());
        conn.bind_subscriber(subscriber);
    }

    let mut reply_transport = transport.clone();
    reply_transport.interleaved = interleaved;

    RtspResponse::ok()
        .session(conn.rtp_session().map(|s| s.id().to_string()).unwrap_or_default())
        .header("Transport", reply_transport.render(server_port))
}

fn bind_rtp_session(conn: &mut RtspSession, ctx: &ReflectorContext, role: Role, session: Arc<ReflectorSession>) {
    if conn.rtp_session().is_some() {
        return;
    }
    let mut id = crate::session::generate_session_id();
    while ctx.rtp_sessions.contains(&id) {
        id = crate::session::generate_session_id();
    }
    let rtp_session = Arc::new(RtpSession::new(id.clone(), ctx.config.overbuffer_window_s));
    rtp_session.set_role(role);
    rtp_session.bind_reflector_session(session);
    ctx.rtp_sessions.insert(id, rtp_session.clone());
    conn.bind_rtp_session(rtp_session);
}

fn handle_record(conn: &mut RtspSession) -> RtspResponse {
    let Some(rtp_session) = conn.rtp_session() else {
        return RtspResponse::not_found();
    };
    let Some(session) = rtp_session.reflector_session() else {
        return RtspResponse::not_found();
    };
    rtp_session.set_playing(true);
    rtp_session.mark_active();

    let rtp_info = session
        .streams()
        .iter()
        .map(|s| format!("url=trackID={};seq=0;rtptime=0", s.info().track_id))
        .collect::<Vec<_>>()
        .join(",");

    RtspResponse::ok()
        .session(rtp_session.id().to_string())
        .header("RTP-Info", rtp_info)
}

fn handle_play(conn: &mut RtspSession) -> RtspResponse {
    let Some(rtp_session) = conn.rtp_session() else {
        return RtspResponse::not_found();
    };
    rtp_session.set_playing(true);
    rtp_session.mark_active();

    let rtp_info = match rtp_session.reflector_session() {
        Some(session) => session
            .streams()
            .iter()
            .map(|s| format!("url=trackID={};seq=0;rtptime=0", s.info().track_id))
            .collect::<Vec<_>>()
            .join(","),
        None => String::new(),
    };

    RtspResponse::ok()
        .session(rtp_session.id().to_string())
        .header("RTP-Info", rtp_info)
}

fn handle_pause(conn: &mut RtspSession) -> RtspResponse {
    let Some(rtp_session) = conn.rtp_session() else {
        return RtspResponse::not_found();
    };
    rtp_session.set_playing(false);
    RtspResponse::ok().session(rtp_session.id().to_string())
}

fn handle_teardown(conn: &mut RtspSession, ctx: &ReflectorContext) -> RtspResponse {
    let Some(rtp_session) = conn.rtp_session().cloned() else {
        return RtspResponse::ok();
    };

    if let Some(session) = rtp_session.reflector_session() {
        match rtp_session.role() {
            Some(Role::Publisher) => {
                tracing::info!(stream_id = %session.source_id(), "publisher teardown");
                session.tear_down_all_outputs();
                ctx.sessions.remove(session.source_id());
            }
            Some(Role::Subscriber) | None => {
                if let Some(subscriber) = conn.subscriber() {
                    session.remove_output(subscriber);
                }
            }
        }
    }

    ctx.rtp_sessions.remove(rtp_session.id());
    RtspResponse::ok().session(rtp_session.id().to_string())
}
