//! Path-to-ID derivations used by SETUP/ANNOUNCE/DESCRIBE (§4.8, §6).

/// SDP cache key: the request path with leading and trailing `/` stripped
/// (§6 "SDP cache key").
pub fn sdp_cache_key(path: &str) -> String {
    path.trim_start_matches('/').trim_end_matches('/').to_string()
}

/// Stream ID for a SETUP path: the URL path with a trailing
/// `trackID=<digits>` (or bare trailing digit) segment removed (§4.8
/// "derive stream ID = URL path with the trailing track-id digits
/// removed").
pub fn stream_id_from_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if let Some(idx) = trimmed.rfind('/') {
        let last_segment = &trimmed[idx + 1..];
        if is_track_segment(last_segment) {
            return sdp_cache_key(&trimmed[..idx]);
        }
    }
    sdp_cache_key(trimmed)
}

/// The numeric track ID named by a SETUP path's trailing segment, if any.
pub fn track_id_from_path(path: &str) -> Option<u32> {
    let trimmed = path.trim_end_matches('/');
    let last_segment = trimmed.rsplit('/').next()?;
    if let Some(digits) = last_segment.to_ascii_lowercase().strip_prefix("trackid=") {
        return digits.parse().ok();
    }
    last_segment.parse().ok()
}

fn is_track_segment(segment: &str) -> bool {
    let lower = segment.to_ascii_lowercase();
    if let Some(digits) = lower.strip_prefix("trackid=") {
        return !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit());
    }
    !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_trackid_suffix() {
        assert_eq!(stream_id_from_path("/live.sdp/trackID=1"), "live.sdp");
        assert_eq!(stream_id_from_path("/live.sdp/trackID=2"), "live.sdp");
    }

    #[test]
    fn leaves_plain_path_unchanged_but_trims_slashes() {
        assert_eq!(stream_id_from_path("/live.sdp"), "live.sdp");
        assert_eq!(stream_id_from_path("/live.sdp/"), "live.sdp");
    }

    #[test]
    fn sdp_cache_key_trims_both_slashes() {
        assert_eq!(sdp_cache_key("/live.sdp/"), "live.sdp");
    }

    #[test]
    fn extracts_numeric_track_id() {
        assert_eq!(track_id_from_path("/live.sdp/trackID=3"), Some(3));
        assert_eq!(track_id_from_path("/live.sdp/2"), Some(2));
        assert_eq!(track_id_from_path("/live.sdp"), None);
    }
}
