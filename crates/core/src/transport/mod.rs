//! Network transport layer (§5).
//!
//! - **TCP** ([`tcp`]): RTSP request/response signaling, one thread per
//!   connection, plus `$`-framed interleaved RTP/RTCP for tracks set up
//!   as `RTP/AVP/TCP`.
//! - **UDP** ([`udp`]): one idle-task thread per bound `SocketPair`,
//!   demultiplexing inbound datagrams to the owning `Stream` and driving
//!   its reflect cycle.

pub mod tcp;
pub mod udp;
