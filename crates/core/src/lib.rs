//! An RTSP reflector: fans the RTP/RTCP media one ANNOUNCE'd publisher
//! pushes in out to every subscriber that SETUPs/PLAYs the same stream.
//!
//! | Concern | Reference |
//! |---|---|
//! | Session control | RFC 2326 (RTSP) |
//! | Media transport | RFC 3550 (RTP/RTCP) |
//! | Session description | RFC 4566 (SDP) |
//! | H.264 payloadization | RFC 6184 |
//!
//! ```text
//!                  ANNOUNCE/SETUP/RECORD            SETUP/PLAY
//! publisher  ───────────────────────────▶  ┌──────┐  ◀────────────────  subscriber(s)
//!  (UDP or   ───────────────────────────▶  │ this │  ────────────────▶
//!   TCP $)        RTP/RTCP ingress         │ crate│    reflected RTP/RTCP
//!                                          └──────┘
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use rtsp::ReflectorServer;
//! use std::net::{IpAddr, Ipv4Addr};
//!
//! let mut server = ReflectorServer::new("0.0.0.0:554", IpAddr::V4(Ipv4Addr::UNSPECIFIED));
//! server.start().expect("failed to start reflector");
//! // ... server runs on background threads until `server.stop()` ...
//! server.stop();
//! ```
//!
//! # Crate layout
//!
//! - [`config`] — the read-only preferences view the core consumes
//! - [`context`] — [`ReflectorContext`], the explicitly-constructed shared services
//! - [`error`] — [`RtspError`] and the crate's `Result` alias
//! - [`media`] — payload-format helpers (H.264 keyframe classification)
//! - [`protocol`] — request/response parsing and method dispatch
//! - [`reflector`] — [`ReflectorSession`], one live broadcast's tracks and subscribers
//! - [`registry`] — the SDP cache and session lookup tables
//! - [`rtcp`] — RTCP SR/RR/SDES/APP wire helpers
//! - [`rtp_session`] — [`RtpSession`], per-client RTP-level state
//! - [`sdp`] — SDP parsing into [`stream::StreamInfo`]
//! - [`sender`] — [`sender::Sender`], the ingress-to-egress packet engine
//! - [`server`] — [`ReflectorServer`], the listener + background-thread orchestrator
//! - [`session`] — per-TCP-connection RTSP state machine
//! - [`socket`] — UDP socket-pair allocation and datagram demuxing
//! - [`stream`] — [`stream::Stream`], one media track
//! - [`subscriber`] — [`subscriber::SubscriberOutput`], a per-player sink

pub mod config;
pub mod context;
pub mod error;
mod maintenance;
pub mod media;
mod packet;
pub mod protocol;
pub mod reflector;
pub mod registry;
pub mod rtcp;
pub mod rtp_session;
pub mod sdp;
pub mod sender;
pub mod server;
pub mod session;
pub mod socket;
pub mod stream;
pub mod subscriber;
pub mod transport;

pub use config::ReflectorConfig;
pub use context::ReflectorContext;
pub use error::{Result, RtspError};
pub use server::ReflectorServer;
