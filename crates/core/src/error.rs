//! Error types for the RTSP reflector library.

use std::fmt;

/// Errors that can occur in the reflector library.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Protocol**: [`Parse`](Self::Parse), [`MalformedSdp`](Self::MalformedSdp) — malformed input.
/// - **Transport**: [`Io`](Self::Io), [`BindFailed`](Self::BindFailed), [`PortRangeExhausted`](Self::PortRangeExhausted).
/// - **Session**: [`SessionNotFound`](Self::SessionNotFound), [`SessionNotPlaying`](Self::SessionNotPlaying),
///   [`TransportNotConfigured`](Self::TransportNotConfigured), [`SessionConflict`](Self::SessionConflict).
/// - **Server**: [`NotStarted`](Self::NotStarted), [`AlreadyRunning`](Self::AlreadyRunning).
/// - **Reflector**: [`ReflectorNotFound`](Self::ReflectorNotFound), [`DemuxerConflict`](Self::DemuxerConflict).
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No session with the given ID exists in the session registry.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// SETUP attempted against a track that is already bound for receive (412 Precondition Failed).
    #[error("session conflict: {0}")]
    SessionConflict(String),

    /// A requested operation needs negotiated transport that SETUP never produced.
    #[error("transport not configured for session: {0}")]
    TransportNotConfigured(String),

    /// An operation that requires the Playing state was attempted outside it.
    #[error("session not in playing state: {0}")]
    SessionNotPlaying(String),

    /// The server has not been started yet.
    #[error("server not started")]
    NotStarted,

    /// The server was started while already running.
    #[error("server already running")]
    AlreadyRunning,

    /// Failed to parse an RTSP request message (RFC 2326 §6).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// Server-side UDP port allocation exhausted the configured range.
    #[error("port range exhausted")]
    PortRangeExhausted,

    /// No ReflectorSession registered under the requested stream ID.
    #[error("reflector session not found: {0}")]
    ReflectorNotFound(String),

    /// A UDP socket pair failed to bind on any port in the allowed range.
    #[error("failed to bind socket pair: {0}")]
    BindFailed(String),

    /// The cached SDP text could not be turned into stream descriptions.
    #[error("malformed SDP: {0}")]
    MalformedSdp(String),

    /// Demuxer registration collided with an existing (src_ip, src_port) entry.
    #[error("demuxer entry already registered for {0}")]
    DemuxerConflict(String),
}

/// Specific kind of RTSP parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no request line).
    EmptyRequest,
    /// Request line did not have the expected `Method URI Version` format.
    InvalidRequestLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// The `Transport` header contained a sub-token this server does not understand.
    InvalidTransport,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRequest => write!(f, "empty request"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::InvalidTransport => write!(f, "invalid Transport header"),
        }
    }
}

/// Convenience alias for `Result<T, RtspError>`.
pub type Result<T> = std::result::Result<T, RtspError>;
