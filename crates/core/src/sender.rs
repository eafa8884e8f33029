//! `Sender`: a single direction's (RTP or RTCP) ingress-to-egress engine for
//! one `Stream` (§4.4).
//!
//! Owns the ordered packet queue, the newest-keyframe-start pointer, the
//! bit-rate accumulator and the reflect loop that fans packets out to every
//! attached [`SubscriberOutput`](crate::subscriber::SubscriberOutput).

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

use crate::config::{
    BITRATE_AVERAGE_INTERVAL, MAX_PACKET_AGE, OVERBUFFER_SECONDS, RELOCATE_PACKET_AGE,
    RR_INTERVAL,
};
use crate::media::h264;
use crate::packet::Packet;
use crate::subscriber::{SubscriberOutput, WriteOutcome};

/// Which half of the RTP/RTCP pair this Sender drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Rtp,
    Rtcp,
}

/// Coarse media kind, enough to decide whether the keyframe classifier and
/// the audio-sync marker apply (§4.4 steps 1–2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
    Other,
}

struct SenderQueue {
    packets: VecDeque<Packet>,
    keyframe_start_seq: Option<u64>,
    has_new_packets: bool,
    last_rr_sent: Option<Instant>,
    bitrate_bytes_acc: u64,
    bitrate_avg_bps: f64,
    last_bitrate_update: Instant,
}

impl SenderQueue {
    fn new(now: Instant) -> Self {
        Self {
            packets: VecDeque::new(),
            keyframe_start_seq: None,
            has_new_packets: false,
            last_rr_sent: None,
            bitrate_bytes_acc: 0,
            bitrate_avg_bps: 0.0,
            last_bitrate_update: now,
        }
    }

    fn find_index(&self, seq_id: u64) -> Option<usize> {
        self.packets.iter().position(|p| p.seq_id() == seq_id)
    }
}

/// Per-direction, per-stream ingress-to-egress engine (§4.4).
pub struct Sender {
    direction: Direction,
    media_kind: MediaKind,
    is_h264_90000: bool,
    packet_counter: AtomicU64,
    queue: Mutex<SenderQueue>,
}

impl Sender {
    pub fn new(direction: Direction, media_kind: MediaKind, is_h264_90000: bool) -> Self {
        Self {
            direction,
            media_kind,
            is_h264_90000,
            packet_counter: AtomicU64::new(0),
            queue: Mutex::new(SenderQueue::new(Instant::now())),
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Number of packets currently queued (test/diagnostic hook).
    pub fn queue_len(&self) -> usize {
        self.queue.lock().packets.len()
    }

    pub fn has_new_packets(&self) -> bool {
        self.queue.lock().has_new_packets
    }

    /// Ingress: enqueue a freshly-arrived packet (§4.4 "append_packet").
    ///
    /// `bitrate_acc` is the Stream's shared bit-rate byte counter — an
    /// atomic the ingress hot path bumps without taking any queue lock
    /// (§5 "Stream's bit-rate counter is an atomic counter").
    pub fn append_packet(
        &self,
        bytes: &[u8],
        now: Instant,
        has_video_keyframe: &AtomicBool,
        bitrate_acc: &AtomicU64,
    ) {
        let is_rtcp = self.direction == Direction::Rtcp;
        let seq_id = self.packet_counter.fetch_add(1, Ordering::SeqCst);
        let mut packet = Packet::new(bytes, is_rtcp, seq_id, now);

        let mut queue = self.queue.lock();

        let is_keyframe_marker = !is_rtcp
            && self.media_kind == MediaKind::Video
            && self.is_h264_90000
            && h264::is_keyframe_start(bytes);

        let is_audio_sync_marker = !is_rtcp
            && self.media_kind == MediaKind::Audio
            && has_video_keyframe.load(Ordering::SeqCst);

        if is_keyframe_marker || is_audio_sync_marker {
            if let Some(prev_seq) = queue.keyframe_start_seq
                && let Some(idx) = queue.find_index(prev_seq)
            {
                queue.packets[idx].set_needed_by_output(false);
            }
            packet.set_needed_by_output(true);
            queue.keyframe_start_seq = Some(seq_id);

            if is_keyframe_marker {
                has_video_keyframe.store(true, Ordering::SeqCst);
            } else {
                has_video_keyframe.store(false, Ordering::SeqCst);
            }
        }

        queue.has_new_packets = true;

        if !is_rtcp {
            bitrate_acc.fetch_add(bytes.len() as u64, Ordering::Relaxed);
        }

        queue.packets.push_back(packet);
    }

    /// Does this Sender's RR cadence call for an outbound receiver report?
    pub fn due_for_receiver_report(&self, now: Instant) -> bool {
        let queue = self.queue.lock();
        match queue.last_rr_sent {
            None => true,
            Some(last) => now.saturating_duration_since(last) > RR_INTERVAL,
        }
    }

    pub fn mark_receiver_report_sent(&self, now: Instant) {
        self.queue.lock().last_rr_sent = Some(now);
    }

    /// Roll the bit-rate average forward if the averaging window elapsed
    /// (§4.4 step 3). Returns the updated average in bits/sec, if recomputed.
    pub fn maybe_update_bitrate_average(&self, now: Instant, bitrate_acc: &AtomicU64) -> Option<f64> {
        let mut queue = self.queue.lock();
        let elapsed = now.saturating_duration_since(queue.last_bitrate_update);
        if elapsed < BITRATE_AVERAGE_INTERVAL {
            return None;
        }
        let bytes = bitrate_acc.swap(0, Ordering::Relaxed);
        let bps = (bytes as f64 * 8.0) / elapsed.as_secs_f64().max(1.0);
        queue.bitrate_avg_bps = bps;
        queue.last_bitrate_update = now;
        Some(bps)
    }

    pub fn bitrate_avg_bps(&self) -> f64 {
        self.queue.lock().bitrate_avg_bps
    }

    /// Egress: fan new packets out to every attached subscriber (§4.4
    /// "reflect_packets").
    ///
    /// Returns the set of subscribers that should be retried sooner than
    /// the normal schedule (they returned `WouldBlock` on their first
    /// packet and auto-tuned their buffer delay).
    pub fn reflect_packets(
        &self,
        stream_index: usize,
        subscribers: &[Arc<SubscriberOutput>],
        now: Instant,
        has_video_keyframe: &AtomicBool,
    ) {
        let mut queue = self.queue.lock();
        if !queue.has_new_packets {
            return;
        }
        queue.has_new_packets = false;

        for sub in subscribers {
            let bookmark = sub.bookmark_seq(stream_index, self.direction);

            let start_seq = match bookmark {
                Some(seq) => seq,
                None => {
                    let chosen = queue
                        .keyframe_start_seq
                        .filter(|&seq| queue.find_index(seq).is_some())
                        .or_else(|| {
                            queue
                                .packets
                                .iter()
                                .find(|p| p.age(now) <= OVERBUFFER_SECONDS)
                                .map(|p| p.seq_id())
                        });
                    if let Some(seq) = chosen {
                        sub.set_bookmark_seq(stream_index, self.direction, Some(seq));
                    }
                    chosen
                }
            };

            let Some(mut cursor_seq) = start_seq else {
                continue;
            };

            let Some(mut idx) = queue.find_index(cursor_seq) else {
                continue;
            };

            let mut is_first = true;
            loop {
                let packet = &queue.packets[idx];
                match sub.write_packet(stream_index, self.direction, packet, is_first) {
                    WriteOutcome::Ok => {
                        cursor_seq = packet.seq_id();
                        is_first = false;
                        if idx + 1 >= queue.packets.len() {
                            break;
                        }
                        idx += 1;
                    }
                    WriteOutcome::WouldBlock => break,
                }
            }

            sub.set_bookmark_seq(stream_index, self.direction, Some(cursor_seq));

            if let Some(cursor_idx) = queue.find_index(cursor_seq) {
                let cursor_age = queue.packets[cursor_idx].age(now);
                let keyframe_is_newer = queue
                    .keyframe_start_seq
                    .is_some_and(|kf_seq| kf_seq != cursor_seq && kf_seq > cursor_seq);

                if cursor_age > RELOCATE_PACKET_AGE && keyframe_is_newer {
                    let kf_seq = queue.keyframe_start_seq.unwrap();
                    sub.set_bookmark_seq(stream_index, self.direction, Some(kf_seq));
                    has_video_keyframe.store(true, Ordering::SeqCst);
                } else {
                    queue.packets[cursor_idx].set_needed_by_output(true);
                }
            }
        }

        self.age_queue(&mut queue, now);
    }

    /// Walk the queue oldest-first, dropping unreferenced packets older
    /// than `MAX_PACKET_AGE` (§4.4 step 6).
    fn age_queue(&self, queue: &mut SenderQueue, now: Instant) {
        let keyframe_seq = queue.keyframe_start_seq;

        while let Some(front) = queue.packets.front() {
            if Some(front.seq_id()) == keyframe_seq {
                break;
            }
            let age = front.age(now);
            if age <= MAX_PACKET_AGE {
                break;
            }
            if front.needed_by_output() {
                break;
            }
            queue.packets.pop_front();
        }

        for packet in queue.packets.iter_mut() {
            if Some(packet.seq_id()) != keyframe_seq {
                packet.set_needed_by_output(false);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn queue_seq_ids(&self) -> Vec<u64> {
        self.queue.lock().packets.iter().map(|p| p.seq_id()).collect()
    }

    #[cfg(test)]
    pub(crate) fn keyframe_start_seq(&self) -> Option<u64> {
        self.queue.lock().keyframe_start_seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn rtp_video_sender() -> Sender {
        Sender::new(Direction::Rtp, MediaKind::Video, true)
    }

    fn idr_packet(len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; 12];
        buf.push(5); // NAL type 5 = IDR
        buf.resize(len.max(buf.len()), 0xAA);
        buf
    }

    #[test]
    fn appending_keyframe_sets_session_flag_and_pointer() {
        let sender = rtp_video_sender();
        let flag = AtomicBool::new(false);
        let acc = AtomicU64::new(0);
        sender.append_packet(&idr_packet(20), Instant::now(), &flag, &acc);
        assert!(flag.load(Ordering::SeqCst));
        assert!(sender.keyframe_start_seq().is_some());
    }

    #[test]
    fn audio_packet_after_video_keyframe_clears_flag() {
        let sender = Sender::new(Direction::Rtp, MediaKind::Audio, false);
        let flag = AtomicBool::new(true);
        let acc = AtomicU64::new(0);
        sender.append_packet(&[0u8; 20], Instant::now(), &flag, &acc);
        assert!(!flag.load(Ordering::SeqCst));
        assert!(sender.keyframe_start_seq().is_some());
    }

    #[test]
    fn sequence_ids_are_monotonic() {
        let sender = rtp_video_sender();
        let flag = AtomicBool::new(false);
        let acc = AtomicU64::new(0);
        for _ in 0..5 {
            sender.append_packet(&[0u8; 20], Instant::now(), &flag, &acc);
        }
        let seqs = sender.queue_seq_ids();
        for w in seqs.windows(2) {
            assert!(w[0] < w[1]);
        }
    }

    #[test]
    fn rtcp_ingress_does_not_touch_bitrate_counter() {
        let sender = Sender::new(Direction::Rtcp, MediaKind::Other, false);
        let flag = AtomicBool::new(false);
        let acc = AtomicU64::new(0);
        sender.append_packet(&[0u8; 20], Instant::now(), &flag, &acc);
        assert_eq!(acc.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn aging_retains_packet_at_exactly_max_age_and_evicts_one_ms_later() {
        let sender = Sender::new(Direction::Rtp, MediaKind::Other, false);
        let flag = AtomicBool::new(false);
        let acc = AtomicU64::new(0);
        let t0 = Instant::now();
        sender.append_packet(&[0u8; 20], t0, &flag, &acc);

        {
            let mut queue = sender.queue.lock();
            sender.age_queue(&mut queue, t0 + MAX_PACKET_AGE);
        }
        assert_eq!(sender.queue_len(), 1, "exactly MAX_PACKET_AGE is retained");

        {
            let mut queue = sender.queue.lock();
            sender.age_queue(&mut queue, t0 + MAX_PACKET_AGE + Duration::from_millis(1));
        }
        assert_eq!(sender.queue_len(), 0, "MAX_PACKET_AGE + 1ms is evicted");
    }
}
