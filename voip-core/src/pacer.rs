//! Send pacer (component J, spec §4.6). A single FIFO between the message
//! thread and the wire: every enqueue checks the socket's readiness first,
//! and a backlog counter pauses stream-data sends for a second once it's
//! been over budget for 30 consecutive ticks. Grounded on the teacher's
//! `net::channel` outgoing-queue bookkeeping, generalized from "reliable
//! stream backpressure" to "send-pacing backpressure".

use std::collections::VecDeque;

const OVER_BUDGET_TICK_LIMIT: u32 = 30;
const SEND_PAUSE_DURATION: f64 = 1.0;

#[derive(Debug, Clone)]
pub struct OutgoingPacket {
    pub seq: u32,
    pub is_stream_data: bool,
    pub data: Vec<u8>,
}

/// Tracks, for each recently generated outgoing sequence number, whether it
/// has been sent yet — used by `GenerateOutSeq`'s monotonicity guarantee and
/// by the congestion controller to correlate acks back to send times.
pub struct SendPacer {
    queue: VecDeque<OutgoingPacket>,
    next_seq: u32,
    unsent_stream_packets: usize,
    max_unsent_stream_packets: usize,
    over_budget_ticks: u32,
    paused_until: Option<f64>,
}

impl SendPacer {
    pub fn new(max_unsent_stream_packets: usize) -> Self {
        SendPacer {
            queue: VecDeque::new(),
            next_seq: 1,
            unsent_stream_packets: 0,
            max_unsent_stream_packets,
            over_budget_ticks: 0,
            paused_until: None,
        }
    }

    /// `GenerateOutSeq()`: hands out the next sequence number and advances
    /// the monotonic counter. Every outgoing packet — stream-data, ping,
    /// nop, network-changed — must go through this before `enqueue`.
    pub fn generate_out_seq(&mut self) -> u32 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        seq
    }

    /// `WritePacketHeader → SendPacket → rawSendQueue`: parks the packet in
    /// the FIFO if the socket isn't ready to send, otherwise it's handed
    /// straight to `drain_ready`'s caller on the next poll either way — the
    /// pacer doesn't distinguish "sent immediately" from "sent next tick",
    /// it just owns the queue.
    pub fn enqueue(&mut self, packet: OutgoingPacket) {
        if packet.is_stream_data {
            self.unsent_stream_packets += 1;
        }
        self.queue.push_back(packet);
    }

    /// Drains packets ready to go out, honoring `IsReadyToSend()` and an
    /// active send pause. Returns an empty vec while paused.
    pub fn drain_ready(&mut self, now: f64, socket_ready_to_send: bool) -> Vec<OutgoingPacket> {
        if let Some(until) = self.paused_until {
            if now < until {
                return Vec::new();
            }
            self.paused_until = None;
            self.over_budget_ticks = 0;
        }
        if !socket_ready_to_send {
            return Vec::new();
        }
        let drained: Vec<OutgoingPacket> = self.queue.drain(..).collect();
        for packet in &drained {
            if packet.is_stream_data {
                self.unsent_stream_packets = self.unsent_stream_packets.saturating_sub(1);
            }
        }
        drained
    }

    /// Runs once per tick. If the unsent-stream-packet backlog has been over
    /// budget for `OVER_BUDGET_TICK_LIMIT` consecutive ticks, flushes the
    /// queue and pauses sending for `SEND_PAUSE_DURATION` seconds.
    pub fn tick(&mut self, now: f64) {
        if self.unsent_stream_packets > self.max_unsent_stream_packets {
            self.over_budget_ticks += 1;
        } else {
            self.over_budget_ticks = 0;
        }

        if self.over_budget_ticks >= OVER_BUDGET_TICK_LIMIT {
            self.queue.clear();
            self.unsent_stream_packets = 0;
            self.over_budget_ticks = 0;
            self.paused_until = Some(now + SEND_PAUSE_DURATION);
        }
    }

    pub fn is_paused(&self, now: f64) -> bool {
        matches!(self.paused_until, Some(until) if now < until)
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    pub fn unsent_stream_packets(&self) -> usize {
        self.unsent_stream_packets
    }
}
