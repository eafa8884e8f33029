//! Integration test: drives the RTSP handshake end-to-end over a real
//! loopback TCP socket — ANNOUNCE/DESCRIBE, publisher SETUP/RECORD with
//! TCP-interleaved transport, a subscriber SETUP/PLAY, and an interleaved
//! `$`-framed data packet routed all the way to the Stream's queue.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{IpAddr, Ipv4Addr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use rtsp::ReflectorServer;

fn rtsp_request(stream: &mut TcpStream, request: &str) -> std::io::Result<String> {
    stream.write_all(request.as_bytes())?;
    stream.flush()?;

    let mut reader = BufReader::new(stream.try_clone()?);
    let mut response = String::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        response.push_str(&line);
        if line == "\r\n" || line == "\n" {
            break;
        }
    }

    if let Some(len) = response
        .lines()
        .find(|l| l.to_lowercase().starts_with("content-length:"))
        .and_then(|l| l.split(':').nth(1))
        .and_then(|v| v.trim().parse::<usize>().ok())
        && len > 0
    {
        let mut body = vec![0u8; len];
        reader.read_exact(&mut body)?;
        response.push_str(&String::from_utf8_lossy(&body));
    }

    Ok(response)
}

fn connect(bind_addr: &str) -> TcpStream {
    let addr = bind_addr.to_socket_addrs().unwrap().next().unwrap();
    let stream = TcpStream::connect_timeout(&addr, Duration::from_secs(2)).expect("connect");
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    stream.set_write_timeout(Some(Duration::from_secs(2))).unwrap();
    stream
}

fn session_id_from(response: &str) -> String {
    response
        .lines()
        .find(|l| l.to_lowercase().starts_with("session:"))
        .and_then(|l| l.split(':').nth(1))
        .map(|v| v.trim().split(';').next().unwrap_or("").trim().to_string())
        .unwrap_or_default()
}

const SDP_BODY: &str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=live\r\nt=0 0\r\nm=video 0 RTP/AVP 96\r\na=rtpmap:96 H264/90000\r\na=control:trackID=1\r\n";

#[test]
fn announce_then_describe_returns_cached_sdp() {
    const BIND: &str = "127.0.0.1:19554";
    let mut server = ReflectorServer::new(BIND, IpAddr::V4(Ipv4Addr::LOCALHOST));
    server.start().expect("server start");

    let mut stream = connect(BIND);

    let announce = format!(
        "ANNOUNCE rtsp://127.0.0.1:19554/live.sdp RTSP/1.0\r\nCSeq: 1\r\nContent-Type: application/sdp\r\nContent-Length: {}\r\n\r\n{}",
        SDP_BODY.len(),
        SDP_BODY
    );
    let resp = rtsp_request(&mut stream, &announce).expect("ANNOUNCE response");
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "ANNOUNCE: {}", resp.lines().next().unwrap_or(""));
    assert!(resp.contains("CSeq: 1"));

    let describe = "DESCRIBE rtsp://127.0.0.1:19554/live.sdp RTSP/1.0\r\nCSeq: 2\r\n\r\n";
    let resp = rtsp_request(&mut stream, describe).expect("DESCRIBE response");
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "DESCRIBE: {}", resp.lines().next().unwrap_or(""));
    assert!(resp.contains("CSeq: 2"));
    assert!(resp.ends_with(SDP_BODY), "DESCRIBE body must equal the cached SDP");

    server.stop();
}

#[test]
fn describe_without_prior_announce_is_not_found() {
    const BIND: &str = "127.0.0.1:19556";
    let mut server = ReflectorServer::new(BIND, IpAddr::V4(Ipv4Addr::LOCALHOST));
    server.start().expect("server start");

    let mut stream = connect(BIND);
    let describe = "DESCRIBE rtsp://127.0.0.1:19556/nothing.sdp RTSP/1.0\r\nCSeq: 1\r\n\r\n";
    let resp = rtsp_request(&mut stream, describe).expect("DESCRIBE response");
    assert!(resp.starts_with("RTSP/1.0 404"), "expected 404, got: {}", resp.lines().next().unwrap_or(""));

    server.stop();
}

#[test]
fn publisher_setup_record_then_interleaved_frame_reaches_stream_queue() {
    const BIND: &str = "127.0.0.1:19558";
    let mut server = ReflectorServer::new(BIND, IpAddr::V4(Ipv4Addr::LOCALHOST));
    server.start().expect("server start");
    let ctx = server.context().clone();

    let mut stream = connect(BIND);

    let announce = format!(
        "ANNOUNCE rtsp://127.0.0.1:19558/live.sdp RTSP/1.0\r\nCSeq: 1\r\nContent-Length: {}\r\n\r\n{}",
        SDP_BODY.len(),
        SDP_BODY
    );
    rtsp_request(&mut stream, &announce).expect("ANNOUNCE response");

    let setup = "SETUP rtsp://127.0.0.1:19558/live.sdp/trackID=1 RTSP/1.0\r\nCSeq: 2\r\nTransport: RTP/AVP/TCP;unicast;mode=record;interleaved=0-1\r\n\r\n";
    let resp = rtsp_request(&mut stream, setup).expect("SETUP response");
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "SETUP: {}", resp.lines().next().unwrap_or(""));
    assert!(resp.contains("interleaved=0-1"), "SETUP response must echo server-allocated channels");
    let session_id = session_id_from(&resp);
    assert!(!session_id.is_empty());

    let record = format!(
        "RECORD rtsp://127.0.0.1:19558/live.sdp RTSP/1.0\r\nCSeq: 3\r\nSession: {session_id}\r\n\r\n"
    );
    let resp = rtsp_request(&mut stream, &record).expect("RECORD response");
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "RECORD: {}", resp.lines().next().unwrap_or(""));
    assert!(resp.contains("RTP-Info:"));

    // A `$`-framed data packet on channel 0 (RTP) must be routed to the
    // track's Stream and land in its RTP Sender queue (§4.8, §8 scenario 6).
    let mut frame = vec![b'$', 0u8];
    frame.extend_from_slice(&20u16.to_be_bytes());
    frame.extend_from_slice(&[0xAAu8; 20]);
    stream.write_all(&frame).expect("write interleaved frame");
    stream.flush().unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    loop {
        if let Some(session) = ctx.sessions.get("live.sdp") {
            let queued = session.streams()[0].rtp_sender().queue_len();
            if queued >= 1 {
                break;
            }
        }
        assert!(std::time::Instant::now() < deadline, "interleaved frame never reached the Stream queue");
        std::thread::sleep(Duration::from_millis(20));
    }

    server.stop();
}

#[test]
fn publisher_re_setup_of_bound_track_is_precondition_failed() {
    const BIND: &str = "127.0.0.1:19559";
    let mut server = ReflectorServer::new(BIND, IpAddr::V4(Ipv4Addr::LOCALHOST));
    server.start().expect("server start");

    let mut stream = connect(BIND);

    let announce = format!(
        "ANNOUNCE rtsp://127.0.0.1:19559/live.sdp RTSP/1.0\r\nCSeq: 1\r\nContent-Length: {}\r\n\r\n{}",
        SDP_BODY.len(),
        SDP_BODY
    );
    rtsp_request(&mut stream, &announce).expect("ANNOUNCE response");

    let setup = "SETUP rtsp://127.0.0.1:19559/live.sdp/trackID=1 RTSP/1.0\r\nCSeq: 2\r\nTransport: RTP/AVP/TCP;unicast;mode=record;interleaved=0-1\r\n\r\n";
    let resp = rtsp_request(&mut stream, setup).expect("first SETUP response");
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "first SETUP: {}", resp.lines().next().unwrap_or(""));

    // Re-SETUP of the same already-receiving track must be rejected as a
    // conflict, not silently re-bound (§6, §7).
    let resetup = "SETUP rtsp://127.0.0.1:19559/live.sdp/trackID=1 RTSP/1.0\r\nCSeq: 3\r\nTransport: RTP/AVP/TCP;unicast;mode=record;interleaved=2-3\r\n\r\n";
    let resp = rtsp_request(&mut stream, resetup).expect("second SETUP response");
    assert!(resp.starts_with("RTSP/1.0 412"), "expected 412, got: {}", resp.lines().next().unwrap_or(""));

    server.stop();
}

#[test]
fn setup_with_unknown_track_id_is_not_found() {
    const BIND: &str = "127.0.0.1:19561";
    let mut server = ReflectorServer::new(BIND, IpAddr::V4(Ipv4Addr::LOCALHOST));
    server.start().expect("server start");

    let mut stream = connect(BIND);
    let announce = format!(
        "ANNOUNCE rtsp://127.0.0.1:19561/live.sdp RTSP/1.0\r\nCSeq: 1\r\nContent-Length: {}\r\n\r\n{}",
        SDP_BODY.len(),
        SDP_BODY
    );
    rtsp_request(&mut stream, &announce).expect("ANNOUNCE response");

    let setup = "SETUP rtsp://127.0.0.1:19561/live.sdp/trackID=9 RTSP/1.0\r\nCSeq: 2\r\nTransport: RTP/AVP/TCP;unicast;mode=record;interleaved=0-1\r\n\r\n";
    let resp = rtsp_request(&mut stream, setup).expect("SETUP response");
    assert!(resp.starts_with("RTSP/1.0 404"), "expected 404, got: {}", resp.lines().next().unwrap_or(""));

    server.stop();
}

#[test]
fn subscriber_setup_play_gets_session_and_rtp_info() {
    const BIND: &str = "127.0.0.1:19560";
    let mut server = ReflectorServer::new(BIND, IpAddr::V4(Ipv4Addr::LOCALHOST));
    server.start().expect("server start");

    let mut publisher = connect(BIND);
    let announce = format!(
        "ANNOUNCE rtsp://127.0.0.1:19560/live.sdp RTSP/1.0\r\nCSeq: 1\r\nContent-Length: {}\r\n\r\n{}",
        SDP_BODY.len(),
        SDP_BODY
    );
    rtsp_request(&mut publisher, &announce).expect("ANNOUNCE response");

    let mut subscriber = connect(BIND);
    let setup = "SETUP rtsp://127.0.0.1:19560/live.sdp/trackID=1 RTSP/1.0\r\nCSeq: 1\r\nTransport: RTP/AVP;unicast;client_port=5000-5001\r\n\r\n";
    let resp = rtsp_request(&mut subscriber, setup).expect("SETUP response");
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "SETUP: {}", resp.lines().next().unwrap_or(""));
    assert!(resp.contains("Session:"));
    assert!(resp.contains("Transport:"));
    let session_id = session_id_from(&resp);

    let play = format!(
        "PLAY rtsp://127.0.0.1:19560/live.sdp RTSP/1.0\r\nCSeq: 2\r\nSession: {session_id}\r\n\r\n"
    );
    let resp = rtsp_request(&mut subscriber, &play).expect("PLAY response");
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "PLAY: {}", resp.lines().next().unwrap_or(""));
    assert!(resp.contains("RTP-Info:"));

    server.stop();
}

#[test]
fn options_requires_cseq() {
    const BIND: &str = "127.0.0.1:19562";
    let mut server = ReflectorServer::new(BIND, IpAddr::V4(Ipv4Addr::LOCALHOST));
    server.start().expect("server start");

    let mut stream = connect(BIND);
    let resp = rtsp_request(&mut stream, "OPTIONS rtsp://127.0.0.1:19562/ RTSP/1.0\r\nCSeq: 1\r\n\r\n")
        .expect("OPTIONS response");
    assert!(resp.starts_with("RTSP/1.0 200 OK"));
    assert!(resp.contains("Public:"));

    server.stop();
}
