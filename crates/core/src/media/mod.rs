//! Codec-aware packet inspection used by the reflect loop.
//!
//! The reflector never decodes media — the only thing it needs to know
//! about a codec is "does this RTP packet start an H.264 keyframe", so a
//! joining subscriber can be handed a frame boundary instead of mid-GOP
//! garbage. See [`h264::is_keyframe_start`].

pub mod h264;
