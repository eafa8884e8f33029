use std::io;
use std::net::IpAddr;

use clap::Parser;
use rtsp::{ReflectorConfig, ReflectorServer};

#[derive(Parser)]
#[command(name = "rtsp-reflector-server", about = "Standalone RTSP reflector: relays one publisher's RTP/RTCP to many subscribers")]
struct Args {
    /// Address the RTSP TCP listener binds to.
    #[arg(long, short, default_value = "0.0.0.0:554")]
    bind: String,

    /// Address the UDP socket pool binds its RTP/RTCP pairs on.
    #[arg(long, default_value = "0.0.0.0")]
    local_ip: IpAddr,

    /// Idle close for RTSP control connections, seconds.
    #[arg(long)]
    rtsp_timeout_s: Option<u64>,

    /// How far back a joining subscriber without a keyframe may start, seconds.
    #[arg(long)]
    overbuffer_s: Option<u64>,

    /// Public host advertised in the locally-derived SDP `o=`/`c=` lines.
    #[arg(long)]
    public_host: Option<String>,
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let mut builder = ReflectorConfig::builder();
    if let Some(timeout) = args.rtsp_timeout_s {
        builder = builder.rtsp_timeout_s(timeout);
    }
    if let Some(overbuffer) = args.overbuffer_s {
        builder = builder.overbuffer_window_s(overbuffer);
    }
    if let Some(host) = args.public_host {
        builder = builder.public_host(host);
    }
    let config = builder.build();

    let mut server = ReflectorServer::with_config(&args.bind, args.local_ip, config);
    if let Err(e) = server.start() {
        eprintln!("Failed to start reflector server: {e}");
        return;
    }

    println!("RTSP reflector on {} — press Enter to stop", args.bind);
    let mut input = String::new();
    io::stdin().read_line(&mut input).unwrap();
    server.stop();
}
