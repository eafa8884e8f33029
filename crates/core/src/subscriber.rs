//! `SubscriberOutput`: a per-player sink bound to a `ReflectorSession` (§4.7).
//!
//! Holds the bookmark array (one slot per `Sender`), the transport kind,
//! and the `write_packet` contract that the reflect loop calls into.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::packet::Packet;
use crate::sender::Direction;

/// Outcome of handing a packet to the underlying transport writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Ok,
    WouldBlock,
}

/// A signal telling the writer this is the first packet of a reflect cycle
/// burst, so TCP-interleaved writers can coalesce a `$`-frame burst and UDP
/// writers can reset any per-cycle pacing state (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteBurstBegin(pub bool);

/// How a subscriber receives its media.
pub trait PacketSink: Send + Sync {
    /// Write one packet for `stream_index`/`direction`. `transmit_time` is
    /// the ideal wall-clock instant computed for this packet under the
    /// buffer-delay contract (§4.7); a sink that can schedule delivery
    /// rather than writing immediately should aim for it. `burst_begin` is
    /// set on the first packet of a reflect cycle.
    fn write(
        &self,
        stream_index: usize,
        direction: Direction,
        bytes: &[u8],
        transmit_time: Instant,
        burst_begin: WriteBurstBegin,
    ) -> WriteOutcome;
}

#[derive(Debug, Clone, Copy, Default)]
struct RtpStreamFilter {
    /// Packets with a wire RTP sequence number below this are dropped;
    /// `None` means the filter is inactive (never armed, or already
    /// self-disabled after the first in-range packet passed).
    first_sequence_number: Option<u16>,
}

struct SubscriberState {
    bookmarks: Vec<Option<u64>>,
    last_packet_id: Vec<[Option<u64>; 2]>,
    rtp_filters: Vec<RtpStreamFilter>,
    buffer_delay: Duration,
}

/// A per-player sink bound to one `ReflectorSession`.
///
/// The sink is `Arc`-shared, not owned outright: a TCP-interleaved
/// subscriber spanning several tracks registers one channel pair per
/// track SETUP against the *same* sink instance, so the transport layer
/// needs its own handle to it alongside the one stored here (§4.8).
pub struct SubscriberOutput {
    sink: Arc<dyn PacketSink>,
    playing: Arc<AtomicBool>,
    state: Mutex<SubscriberState>,
    dropped_too_old: std::sync::atomic::AtomicU64,
}

fn direction_index(direction: Direction) -> usize {
    match direction {
        Direction::Rtp => 0,
        Direction::Rtcp => 1,
    }
}

fn rtp_sequence_number(bytes: &[u8]) -> Option<u16> {
    if bytes.len() < 4 {
        return None;
    }
    Some(u16::from_be_bytes([bytes[2], bytes[3]]))
}

impl SubscriberOutput {
    pub fn new(
        sink: Arc<dyn PacketSink>,
        stream_count: usize,
        playing: Arc<AtomicBool>,
        initial_buffer_delay: Duration,
    ) -> Self {
        Self {
            sink,
            playing,
            state: Mutex::new(SubscriberState {
                bookmarks: vec![None; stream_count * 2],
                last_packet_id: vec![[None; 2]; stream_count],
                rtp_filters: vec![RtpStreamFilter::default(); stream_count],
                buffer_delay: initial_buffer_delay,
            }),
            dropped_too_old: std::sync::atomic::AtomicU64::new(0),
        }
    }

    fn flat_index(stream_index: usize, direction: Direction) -> usize {
        stream_index * 2 + direction_index(direction)
    }

    pub fn bookmark_seq(&self, stream_index: usize, direction: Direction) -> Option<u64> {
        let idx = Self::flat_index(stream_index, direction);
        self.state.lock().bookmarks.get(idx).copied().flatten()
    }

    pub fn set_bookmark_seq(&self, stream_index: usize, direction: Direction, seq: Option<u64>) {
        let idx = Self::flat_index(stream_index, direction);
        if let Some(slot) = self.state.lock().bookmarks.get_mut(idx) {
            *slot = seq;
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    pub fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::SeqCst);
    }

    /// Arm the pre-filter for one RTP stream: packets below `first_seq`
    /// are dropped until the filter self-disables (§4.7).
    pub fn arm_rtp_prefilter(&self, stream_index: usize, first_seq: u16) {
        if let Some(filter) = self.state.lock().rtp_filters.get_mut(stream_index) {
            filter.first_sequence_number = Some(first_seq);
        }
    }

    pub fn buffer_delay(&self) -> Duration {
        self.state.lock().buffer_delay
    }

    pub fn dropped_too_old_count(&self) -> u64 {
        self.dropped_too_old.load(Ordering::Relaxed)
    }

    /// Tear down: clear every bookmark so a dereference can't find stale
    /// packet indices (§8 invariant: former subscribers' bookmark slots are
    /// null after `tear_down_all_outputs`).
    pub fn clear_bookmarks(&self) {
        let mut state = self.state.lock();
        for slot in state.bookmarks.iter_mut() {
            *slot = None;
        }
    }

    /// §4.7's `write_packet` contract.
    pub fn write_packet(
        &self,
        stream_index: usize,
        direction: Direction,
        packet: &Packet,
        is_first: bool,
    ) -> WriteOutcome {
        if !self.is_playing() {
            return WriteOutcome::Ok;
        }

        let now = Instant::now();
        if packet.age(now) > crate::config::DROP_ALL_PACKETS_AGE {
            self.dropped_too_old.fetch_add(1, Ordering::Relaxed);
            return WriteOutcome::Ok;
        }

        let dir_idx = direction_index(direction);
        let packet_id = packet.seq_id();

        {
            let mut state = self.state.lock();

            if direction == Direction::Rtp
                && let Some(filter) = state.rtp_filters.get_mut(stream_index)
                && let Some(threshold) = filter.first_sequence_number
            {
                match rtp_sequence_number(packet.bytes()) {
                    Some(wire_seq) if wire_seq < threshold => return WriteOutcome::Ok,
                    Some(_) => filter.first_sequence_number = None,
                    None => {}
                }
            }

            if let Some(last_entry) = state.last_packet_id.get(stream_index) {
                if let Some(last) = last_entry[dir_idx]
                    && packet_id <= last
                {
                    return WriteOutcome::Ok;
                }
            }
        }

        // §4.7: transmit_time = now - lateness + buffer_delay_adjustment.
        // This reflect loop has no scheduled-cycle clock to measure
        // lateness against (packets are dispatched as they arrive, not on
        // a fixed tick), so lateness is 0 here, matching the call site in
        // the reflector this was grounded on, which likewise never threads
        // a lateness value into the per-packet write. buffer_delay_adjustment
        // is the gap between the configured buffer delay and how long this
        // packet has already sat in the queue; it's 0 for RTCP.
        let transmit_time = if direction == Direction::Rtp {
            let buffer_delay = self.state.lock().buffer_delay;
            let queued_for = now.saturating_duration_since(packet.arrival());
            match buffer_delay.checked_sub(queued_for) {
                Some(ahead) => now + ahead,
                None => now.checked_sub(queued_for - buffer_delay).unwrap_or(now),
            }
        } else {
            now
        };

        let outcome = self.sink.write(
            stream_index,
            direction,
            packet.bytes(),
            transmit_time,
            WriteBurstBegin(is_first),
        );

        match outcome {
            WriteOutcome::WouldBlock => {
                if is_first {
                    let adjusted = now.saturating_duration_since(packet.arrival());
                    self.state.lock().buffer_delay = adjusted;
                }
                WriteOutcome::WouldBlock
            }
            WriteOutcome::Ok => {
                if let Some(entry) = self.state.lock().last_packet_id.get_mut(stream_index) {
                    entry[dir_idx] = Some(packet_id);
                }
                WriteOutcome::Ok
            }
        }
    }
}
