//! RTSP request/response parsing and the transport-header sub-grammar
//! (§4.8).

pub mod handler;
pub mod request;
pub mod response;

pub use handler::dispatch;
pub use request::{Method, RtspRequest, TransportHeader};
pub use response::RtspResponse;
