//! Reliable-extras layer (component G, spec §4.5). Carries typed, idempotent
//! control items piggybacked on the header of every outgoing packet until
//! the peer's reported `last_ack` clears them. Grounded on the teacher's
//! `net::channel` retained-until-acked bookkeeping, generalized from "one
//! reliable byte stream" to "a handful of overwrite-or-append typed slots".

use sha1::{Digest, Sha1};

pub const EXTRA_STREAM_FLAGS: u8 = 1;
pub const EXTRA_STREAM_CSD: u8 = 2;
pub const EXTRA_LAN_ENDPOINT: u8 = 3;
pub const EXTRA_NETWORK_CHANGED: u8 = 4;
pub const EXTRA_GROUP_CALL_KEY: u8 = 5;
pub const EXTRA_REQUEST_GROUP: u8 = 6;
pub const EXTRA_IPV6_ENDPOINT: u8 = 7;

/// One dedup tag, SHA-1(type||data) truncated to 8 bytes, per spec §4.5.
pub type ExtraHash = [u8; 8];

pub fn hash_extra(extra_type: u8, data: &[u8]) -> ExtraHash {
    let mut hasher = Sha1::new();
    hasher.update([extra_type]);
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[0..8]);
    out
}

struct PendingExtra {
    extra_type: u8,
    data: Vec<u8>,
    first_containing_seq: u32,
}

/// Outgoing side: entries waiting to be acked by the peer, one slot per
/// `extra_type` (a fresh `SendExtra` call for a type already pending
/// overwrites it in place rather than queuing a second copy).
#[derive(Default)]
pub struct UnacknowledgedExtraData {
    pending: Vec<PendingExtra>,
}

impl UnacknowledgedExtraData {
    pub fn new() -> Self {
        UnacknowledgedExtraData { pending: Vec::new() }
    }

    /// `SendExtra(type, data)` from spec §4.5: overwrite-or-append, resetting
    /// `first_containing_seq` so the entry is re-attached to the next
    /// outgoing packet's header.
    pub fn send_extra(&mut self, extra_type: u8, data: Vec<u8>) {
        if let Some(existing) = self.pending.iter_mut().find(|e| e.extra_type == extra_type) {
            existing.data = data;
            existing.first_containing_seq = 0;
        } else {
            self.pending.push(PendingExtra { extra_type, data, first_containing_seq: 0 });
        }
    }

    /// Entries that still need `first_containing_seq` set, paired with the
    /// seq number of the packet about to carry them.
    pub fn entries_for_next_packet(&mut self, out_seq: u32) -> Vec<(u8, Vec<u8>)> {
        let mut out = Vec::new();
        for entry in &mut self.pending {
            if entry.first_containing_seq == 0 {
                entry.first_containing_seq = out_seq;
            }
            out.push((entry.extra_type, entry.data.clone()));
        }
        out
    }

    /// Drops entries the peer has acked and returns which types were
    /// delivered, so the caller can fire the one-shot callbacks for
    /// `GROUP_CALL_KEY`/`REQUEST_GROUP`.
    pub fn acknowledge(&mut self, last_ack: u32) -> Vec<u8> {
        let mut delivered = Vec::new();
        self.pending.retain(|entry| {
            let acked = entry.first_containing_seq != 0 && crate::seq::seq_ge(last_ack, entry.first_containing_seq);
            if acked {
                delivered.push(entry.extra_type);
            }
            !acked
        });
        delivered
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Incoming side: dedups by `hash_extra` per type so a retransmitted extra
/// (the peer doesn't yet know we've seen it) doesn't get dispatched twice.
#[derive(Default)]
pub struct ReceivedExtraTracker {
    seen: Vec<(u8, ExtraHash)>,
}

const MAX_SEEN_PER_TYPE: usize = 4;

impl ReceivedExtraTracker {
    pub fn new() -> Self {
        ReceivedExtraTracker { seen: Vec::new() }
    }

    /// Returns `true` if this is the first time this exact `(type, data)`
    /// pair has been observed and the caller should dispatch it.
    pub fn observe(&mut self, extra_type: u8, data: &[u8]) -> bool {
        let hash = hash_extra(extra_type, data);
        if self.seen.iter().any(|(t, h)| *t == extra_type && *h == hash) {
            return false;
        }
        self.seen.push((extra_type, hash));
        let count = self.seen.iter().filter(|(t, _)| *t == extra_type).count();
        if count > MAX_SEEN_PER_TYPE {
            if let Some(pos) = self.seen.iter().position(|(t, _)| *t == extra_type) {
                self.seen.remove(pos);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_extra_overwrites_pending_entry_of_same_type() {
        let mut pending = UnacknowledgedExtraData::new();
        pending.send_extra(EXTRA_STREAM_FLAGS, vec![1]);
        pending.entries_for_next_packet(10);
        pending.send_extra(EXTRA_STREAM_FLAGS, vec![2]);
        let entries = pending.entries_for_next_packet(20);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].1, vec![2]);
    }

    #[test]
    fn entry_is_acknowledged_once_last_ack_covers_its_first_seq() {
        let mut pending = UnacknowledgedExtraData::new();
        pending.send_extra(EXTRA_GROUP_CALL_KEY, vec![9; 256]);
        pending.entries_for_next_packet(100);
        assert!(pending.acknowledge(99).is_empty());
        let delivered = pending.acknowledge(100);
        assert_eq!(delivered, vec![EXTRA_GROUP_CALL_KEY]);
        assert!(pending.is_empty());
    }

    #[test]
    fn fresh_send_after_ack_gets_a_new_first_containing_seq() {
        let mut pending = UnacknowledgedExtraData::new();
        pending.send_extra(EXTRA_STREAM_FLAGS, vec![1]);
        pending.entries_for_next_packet(5);
        pending.acknowledge(5);
        assert!(pending.is_empty());

        pending.send_extra(EXTRA_STREAM_FLAGS, vec![3]);
        let entries = pending.entries_for_next_packet(6);
        assert_eq!(entries[0].0, EXTRA_STREAM_FLAGS);
        assert!(pending.acknowledge(5).is_empty());
        assert_eq!(pending.acknowledge(6), vec![EXTRA_STREAM_FLAGS]);
    }

    #[test]
    fn received_tracker_dedups_identical_payload() {
        let mut tracker = ReceivedExtraTracker::new();
        assert!(tracker.observe(EXTRA_NETWORK_CHANGED, &[1]));
        assert!(!tracker.observe(EXTRA_NETWORK_CHANGED, &[1]));
        assert!(tracker.observe(EXTRA_NETWORK_CHANGED, &[0]));
    }

    #[test]
    fn received_tracker_distinguishes_by_type() {
        let mut tracker = ReceivedExtraTracker::new();
        assert!(tracker.observe(EXTRA_STREAM_CSD, &[7]));
        assert!(tracker.observe(EXTRA_IPV6_ENDPOINT, &[7]));
    }
}
