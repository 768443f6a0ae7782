//! Jitter-aware frame reassembler with XOR-parity FEC recovery (component H,
//! spec §4.4). Grounded on `PacketReassembler.cpp`/`.h` and
//! `video/VideoFEC.cpp`: video frames arrive as out-of-order UDP fragments
//! and must be regrouped by timestamp, with at most one fragment per frame
//! recoverable by XOR parity when it never arrives.
//!
//! Open Question #1 (resolved in SPEC_FULL.md): FEC recovery is attempted
//! only against the single oldest in-flight frame, never against the whole
//! backlog, matching `PacketReassembler::AddFragment`'s pop loop which only
//! ever looks at `packets[0]`.

use std::collections::VecDeque;

const MAX_IN_FLIGHT: usize = 3;
const NUM_OLD_PACKETS: usize = 3;
const NUM_FEC_PACKETS: usize = 10;

/// A fully reassembled video frame, handed back to the caller in arrival
/// (not necessarily capture) order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReassembledFrame {
    pub data: Vec<u8>,
    pub seq: u32,
    pub keyframe: bool,
    pub rotation: u16,
}

struct PartialFrame {
    seq: u32,
    timestamp: u32,
    part_count: usize,
    received_count: usize,
    parts: Vec<Option<Vec<u8>>>,
    keyframe: bool,
    rotation: u16,
}

impl PartialFrame {
    fn new(seq: u32, timestamp: u32, part_count: usize, keyframe: bool, rotation: u16) -> Self {
        PartialFrame {
            seq,
            timestamp,
            part_count,
            received_count: 0,
            parts: vec![None; part_count],
            keyframe,
            rotation,
        }
    }

    fn add_fragment(&mut self, index: usize, data: Vec<u8>) {
        if self.parts[index].is_none() {
            self.received_count += 1;
        }
        self.parts[index] = Some(data);
    }

    fn is_complete(&self) -> bool {
        self.received_count == self.part_count
    }

    fn missing_count(&self) -> usize {
        self.part_count - self.received_count
    }

    fn reassemble(&self) -> ReassembledFrame {
        debug_assert!(self.is_complete());
        let mut data = Vec::new();
        for part in &self.parts {
            data.extend_from_slice(part.as_ref().expect("complete frame has every fragment"));
        }
        ReassembledFrame { data, seq: self.seq, keyframe: self.keyframe, rotation: self.rotation }
    }

    /// True if this frame is among the last `prev_frame_count` frames ending
    /// at `fec_seq` (the range an FEC packet with that header covers).
    fn covered_by(&self, fec_seq: u32, prev_frame_count: u32) -> bool {
        self.seq <= fec_seq && self.seq > fec_seq.wrapping_sub(prev_frame_count)
    }
}

struct FecPacket {
    seq: u32,
    prev_frame_count: u32,
    data: Vec<u8>,
}

impl FecPacket {
    fn covers(&self, frame_seq: u32) -> bool {
        frame_seq <= self.seq && frame_seq > self.seq.wrapping_sub(self.prev_frame_count)
    }
}

/// XOR-parity encode: one fragment per input slot, recoverable if exactly
/// one of the corresponding decode inputs is missing. Mirrors
/// `ParityFEC::Encode`.
fn parity_encode(packets: &[Vec<u8>]) -> Vec<u8> {
    let max_size = packets.iter().map(|p| p.len()).max().unwrap_or(0);
    let mut result = vec![0u8; max_size + 2];
    for pkt in packets {
        for (i, b) in pkt.iter().enumerate() {
            result[i] ^= b;
        }
        let len = pkt.len() as u16;
        result[max_size] ^= (len & 0xff) as u8;
        result[max_size + 1] ^= (len >> 8) as u8;
    }
    result
}

/// XOR-parity decode: `data_packets` holds one entry per covered slot, empty
/// for whichever one is missing. Recovers that one slot if and only if
/// exactly one is missing. Mirrors `ParityFEC::Decode`.
fn parity_decode(data_packets: &[Vec<u8>], fec_payload: &[u8]) -> Option<Vec<u8>> {
    let max_size = data_packets.iter().map(|p| p.len()).max().unwrap_or(0);
    if fec_payload.len() < max_size + 2 {
        return None;
    }
    let mut result = fec_payload.to_vec();
    let mut empty_count = 0;
    for pkt in data_packets {
        if pkt.is_empty() {
            empty_count += 1;
            continue;
        }
        for (i, b) in pkt.iter().enumerate() {
            result[i] ^= b;
        }
        let len = pkt.len() as u16;
        result[max_size] ^= (len & 0xff) as u8;
        result[max_size + 1] ^= (len >> 8) as u8;
    }
    if empty_count != 1 {
        return None;
    }
    let len = (result[max_size] as usize) | ((result[max_size + 1] as usize) << 8);
    if len > max_size {
        return None;
    }
    result.truncate(len);
    Some(result)
}

/// Per-stream reassembly state for one video stream.
pub struct Reassembler {
    packets: VecDeque<PartialFrame>,
    old_packets: VecDeque<PartialFrame>,
    fec_packets: VecDeque<FecPacket>,
    last_frame_seq: u32,
    max_timestamp: u32,
    waiting_for_fec: bool,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reassembler {
    pub fn new() -> Self {
        Reassembler {
            packets: VecDeque::new(),
            old_packets: VecDeque::new(),
            fec_packets: VecDeque::new(),
            last_frame_seq: 0,
            max_timestamp: 0,
            waiting_for_fec: false,
        }
    }

    /// Accepts one fragment. Returns any frames this fragment's arrival
    /// completed (almost always 0 or 1, but a recovered FEC fragment can
    /// free up the next frame too).
    pub fn add_fragment(
        &mut self,
        data: Vec<u8>,
        fragment_index: usize,
        fragment_count: usize,
        timestamp: u32,
        frame_seq_low: u8,
        keyframe: bool,
        rotation: u16,
    ) -> Vec<ReassembledFrame> {
        if let Some(frame) = self.packets.iter_mut().find(|f| f.timestamp == timestamp) {
            if fragment_count != frame.part_count {
                log::error!("fragment total count {} inconsistent with {}", fragment_count, frame.part_count);
                return Vec::new();
            }
            if fragment_index >= frame.part_count {
                log::error!("fragment index {} out of bounds {}", fragment_index, frame.part_count);
                return Vec::new();
            }
            frame.add_fragment(fragment_index, data);
            return self.drain_complete();
        }

        let mut fseq = (self.last_frame_seq & 0xFFFF_FF00) | frame_seq_low as u32;
        if (self.last_frame_seq as u8) > frame_seq_low {
            fseq += 256;
        }

        if self.last_frame_seq > 3 && fseq < self.last_frame_seq - 3 {
            log::warn!("frame too late (fseq={}, last={})", fseq, self.last_frame_seq);
            return Vec::new();
        }
        if fragment_index >= fragment_count {
            log::error!("fragment index {} out of bounds {}", fragment_index, fragment_count);
            return Vec::new();
        }
        if fragment_count > 255 {
            log::error!("fragment total count too big {}", fragment_count);
            return Vec::new();
        }

        self.max_timestamp = self.max_timestamp.max(timestamp);

        let mut frame = PartialFrame::new(fseq, timestamp, fragment_count, keyframe, rotation);
        frame.add_fragment(fragment_index, data);
        self.packets.push_back(frame);

        let emitted = self.drain_complete();
        self.last_frame_seq = fseq;
        emitted
    }

    /// Accepts one parity-FEC packet covering the `prev_frame_count` frames
    /// ending at `frame_seq_low`.
    pub fn add_fec(&mut self, data: Vec<u8>, frame_seq_low: u8, prev_frame_count: u32, _fec_scheme: u8) -> Vec<ReassembledFrame> {
        let fseq = (self.last_frame_seq & 0xFFFF_FF00) | frame_seq_low as u32;
        let fec = FecPacket { seq: fseq, prev_frame_count, data };

        let mut emitted = Vec::new();
        if self.waiting_for_fec {
            if let Some(front) = self.packets.front() {
                if fec.covers(front.seq) {
                    if let Some(recovered) = self.gather_and_decode(&fec) {
                        let mut front = self.packets.pop_front().unwrap();
                        apply_recovered_fragment(&mut front, recovered);
                        if front.is_complete() {
                            emitted.push(front.reassemble());
                        }
                        self.push_old(front);
                    } else {
                        let front = self.packets.pop_front().unwrap();
                        self.push_old(front);
                    }
                    self.waiting_for_fec = false;
                }
            }
        }

        self.fec_packets.push_back(fec);
        while self.fec_packets.len() > NUM_FEC_PACKETS {
            self.fec_packets.pop_front();
        }
        emitted
    }

    fn gather_and_decode(&self, fec: &FecPacket) -> Option<Vec<u8>> {
        let mut gathered = Vec::new();
        for frame in self.old_packets.iter().chain(self.packets.iter()) {
            if frame.covered_by(fec.seq, fec.prev_frame_count) {
                for part in &frame.parts {
                    gathered.push(part.clone().unwrap_or_default());
                }
            }
        }
        parity_decode(&gathered, &fec.data)
    }

    fn push_old(&mut self, frame: PartialFrame) {
        self.old_packets.push_back(frame);
        while self.old_packets.len() > NUM_OLD_PACKETS {
            self.old_packets.pop_front();
        }
    }

    /// Pops complete (or unrecoverably lost) frames off the front of the
    /// in-flight queue until it's back within `MAX_IN_FLIGHT`, or until the
    /// front is incomplete and not yet given up on.
    fn drain_complete(&mut self) -> Vec<ReassembledFrame> {
        let mut emitted = Vec::new();
        while self.packets.len() > MAX_IN_FLIGHT {
            let complete = self.packets.front().unwrap().is_complete();
            if complete {
                let frame = self.packets.pop_front().unwrap();
                emitted.push(frame.reassemble());
                self.push_old(frame);
                continue;
            }

            let missing = self.packets.front().unwrap().missing_count();
            if missing == 1 && !self.waiting_for_fec {
                let front_seq = self.packets.front().unwrap().seq;
                let covering = self.fec_packets.iter().find(|fec| fec.covers(front_seq)).map(|fec| FecPacket {
                    seq: fec.seq,
                    prev_frame_count: fec.prev_frame_count,
                    data: fec.data.clone(),
                });

                match covering {
                    Some(fec) => {
                        let recovered = self.gather_and_decode(&fec);
                        let mut frame = self.packets.pop_front().unwrap();
                        if let Some(recovered) = recovered {
                            apply_recovered_fragment(&mut frame, recovered);
                            if frame.is_complete() {
                                emitted.push(frame.reassemble());
                            }
                        }
                        self.push_old(frame);
                    }
                    None => {
                        self.waiting_for_fec = true;
                        break;
                    }
                }
            } else {
                self.waiting_for_fec = false;
                log::error!("unrecoverable packet loss, frame {} not reassembled", self.packets.front().unwrap().seq);
                let frame = self.packets.pop_front().unwrap();
                self.push_old(frame);
            }
        }
        emitted
    }
}

fn apply_recovered_fragment(frame: &mut PartialFrame, recovered: Vec<u8>) {
    for i in 0..frame.part_count {
        if frame.parts[i].is_none() {
            frame.parts[i] = Some(recovered);
            frame.received_count += 1;
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_fragment_frame_completes_immediately_once_evicted() {
        let mut r = Reassembler::new();
        for ts in 0..4u32 {
            let out = r.add_fragment(vec![ts as u8], 0, 1, ts, ts as u8, false, 0);
            if ts < 3 {
                assert!(out.is_empty());
            } else {
                assert_eq!(out.len(), 1);
                assert_eq!(out[0].seq, 0);
                assert_eq!(out[0].data, vec![0]);
            }
        }
    }

    #[test]
    fn out_of_order_fragments_reassemble_in_part_order() {
        let mut r = Reassembler::new();
        r.add_fragment(b"b".to_vec(), 1, 2, 100, 0, true, 90);
        let out = r.add_fragment(b"a".to_vec(), 0, 2, 100, 0, true, 90);
        assert!(out.is_empty());
        // Two more whole frames keep the in-flight queue at exactly 3
        // (frame 0 plus these two) without tipping it past MAX_IN_FLIGHT.
        for ts in 1..3u32 {
            r.add_fragment(vec![0], 0, 1, 100 + ts, ts as u8, false, 0);
        }
        // A third pushes the queue past MAX_IN_FLIGHT, evicting frame 0,
        // now complete: "a" ++ "b".
        let out = r.add_fragment(vec![0], 0, 1, 103, 3, false, 0);
        assert_eq!(out[0].data, b"ab");
        assert!(out[0].keyframe);
        assert_eq!(out[0].rotation, 90);
    }

    #[test]
    fn fec_arriving_before_the_gap_is_evicted_completes_nothing_yet() {
        let mut r = Reassembler::new();
        for ts in 0..3u32 {
            r.add_fragment(vec![0], 0, 1, ts, ts as u8, false, 0);
        }
        // frame 3: two fragments, only the first arrives.
        let out = r.add_fragment(b"left".to_vec(), 0, 2, 3, 3, false, 0);
        // Pushing frame 3 evicted frame 0, which was already complete.
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].seq, 0);

        // An FEC packet covering frame 3 only arrives before frame 3
        // becomes the oldest pending frame with exactly one gap.
        let fec_payload = parity_encode(&[b"left".to_vec(), b"rite".to_vec()]);
        let out = r.add_fec(fec_payload, 3, 1, 0);
        assert!(out.is_empty(), "FEC shouldn't complete anything before frame 3 is the oldest pending with exactly one gap");
    }

    #[test]
    fn fec_recovery_reconstructs_missing_fragment_bytes() {
        let mut r = Reassembler::new();
        for ts in 0..3u32 {
            r.add_fragment(vec![0], 0, 1, ts, ts as u8, false, 0);
        }
        r.add_fragment(b"left".to_vec(), 0, 2, 3, 3, false, 0);
        let fec_payload = parity_encode(&[b"left".to_vec(), b"rite".to_vec()]);
        r.add_fec(fec_payload, 3, 1, 0);

        // Three more whole frames evict frame 1 and frame 2 ahead of it,
        // finally bringing frame 3's single gap to the front, where it's
        // looked up against the stored FEC packet.
        r.add_fragment(vec![0], 0, 1, 4, 4, false, 0);
        r.add_fragment(vec![0], 0, 1, 5, 5, false, 0);
        let out = r.add_fragment(vec![0], 0, 1, 6, 6, false, 0);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].data, b"leftrite");
    }

    #[test]
    fn two_missing_fragments_are_unrecoverable_and_frame_is_dropped() {
        let mut r = Reassembler::new();
        r.add_fragment(b"a".to_vec(), 0, 3, 0, 0, false, 0);
        for ts in 1..3u32 {
            r.add_fragment(vec![0], 0, 1, ts, ts as u8, false, 0);
        }
        // frame 0 has 2 of 3 fragments missing: not FEC-recoverable (only
        // ever attempted when exactly one fragment is missing, per the
        // resolved Open Question #1), so it's dropped rather than stalling
        // the whole reassembler waiting on FEC that can't help.
        let out = r.add_fragment(vec![0], 0, 1, 3, 3, false, 0);
        assert!(out.is_empty());
    }

    #[test]
    fn fragment_index_out_of_bounds_is_rejected() {
        let mut r = Reassembler::new();
        let out = r.add_fragment(b"x".to_vec(), 5, 2, 0, 0, false, 0);
        assert!(out.is_empty());
    }

    #[test]
    fn inconsistent_fragment_count_for_known_frame_is_rejected() {
        let mut r = Reassembler::new();
        r.add_fragment(b"a".to_vec(), 0, 2, 0, 0, false, 0);
        // Same timestamp, different total fragment count: malformed, drop it.
        let out = r.add_fragment(b"b".to_vec(), 1, 3, 0, 0, false, 0);
        assert!(out.is_empty());
    }

    #[test]
    fn parity_recovers_the_one_missing_slot() {
        let parts = vec![b"one".to_vec(), b"two!".to_vec(), b"c".to_vec()];
        let fec = parity_encode(&parts);
        let with_one_missing = vec![b"one".to_vec(), Vec::new(), b"c".to_vec()];
        let recovered = parity_decode(&with_one_missing, &fec).unwrap();
        assert_eq!(recovered, b"two!");
    }

    #[test]
    fn parity_decode_refuses_when_more_than_one_missing() {
        let parts = vec![b"one".to_vec(), b"two!".to_vec(), b"c".to_vec()];
        let fec = parity_encode(&parts);
        let with_two_missing = vec![Vec::new(), Vec::new(), b"c".to_vec()];
        assert!(parity_decode(&with_two_missing, &fec).is_none());
    }
}
