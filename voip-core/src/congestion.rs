//! Congestion controller (component I, spec §4.3). Tracks RTT and in-flight
//! byte history and turns it into a `cwnd` and a bitrate hint the caller's
//! audio-bitrate loop can act on. Grounded on the teacher's ring-buffer
//! style (`net::endpoint` RTT tracking) generalized from "one small fixed
//! window" to the two differently-sized windows this controller needs.

use crate::util::HistoricBuffer;

const RTT_HISTORY_LEN: usize = 100;
const INFLIGHT_HISTORY_LEN: usize = 30;
const INITIAL_CWND: u32 = 1024;
const MIN_CWND: u32 = 1024;
const MAX_CWND: u32 = 102_400;
const STATE_TRANSITION_COOLDOWN: f64 = 10.0;
const SHITTY_INTERNET_LOSS_FLOOR: f64 = 0.02;
const SHITTY_INTERNET_LOSS_CEILING: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandwidthAction {
    Increase,
    Decrease,
    None,
}

#[derive(Clone, Copy)]
struct InFlightSlot {
    seq: u32,
    sent_at: f64,
    size: u32,
    acked: bool,
}

impl Default for InFlightSlot {
    fn default() -> Self {
        InFlightSlot { seq: 0, sent_at: 0.0, size: 0, acked: true }
    }
}

/// Extra forward error correction the shitty-internet-mode heuristic can
/// turn on when loss climbs but the link isn't bad enough to blame on a 2G
/// radio outright (spec §4.3 "Shitty-internet mode").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtraEcLevel(pub u8);

pub struct CongestionController {
    slots: Box<[InFlightSlot; RTT_HISTORY_LEN]>,
    next_slot: usize,
    inflight_bytes: u32,
    inflight_history: HistoricBuffer<u32, INFLIGHT_HISTORY_LEN>,
    cwnd: u32,
    loss_count: u32,
    sent_count: u32,
    last_action_time: f64,
    rtt_history: HistoricBuffer<f64, RTT_HISTORY_LEN>,
    avg_rtt: f64,
    min_rtt: f64,
    extra_ec: Option<ExtraEcLevel>,
}

impl CongestionController {
    pub fn new() -> Self {
        CongestionController {
            slots: Box::new([InFlightSlot::default(); RTT_HISTORY_LEN]),
            next_slot: 0,
            inflight_bytes: 0,
            inflight_history: HistoricBuffer::new(),
            cwnd: INITIAL_CWND,
            loss_count: 0,
            sent_count: 0,
            last_action_time: 0.0,
            rtt_history: HistoricBuffer::new(),
            avg_rtt: 0.0,
            min_rtt: 0.0,
            extra_ec: None,
        }
    }

    pub fn cwnd(&self) -> u32 {
        self.cwnd
    }

    pub fn inflight_bytes(&self) -> u32 {
        self.inflight_bytes
    }

    pub fn send_loss_ratio(&self) -> f64 {
        if self.sent_count == 0 {
            0.0
        } else {
            self.loss_count as f64 / self.sent_count as f64
        }
    }

    pub fn extra_ec_level(&self) -> Option<ExtraEcLevel> {
        self.extra_ec
    }

    /// Records a freshly sent packet, evicting (and counting as lost) the
    /// packet that previously lived in this ring slot, if any.
    pub fn packet_sent(&mut self, now: f64, seq: u32, size: u32) {
        let slot = self.next_slot;
        self.next_slot = (self.next_slot + 1) % RTT_HISTORY_LEN;

        let evicted = self.slots[slot];
        if !evicted.acked {
            self.inflight_bytes = self.inflight_bytes.saturating_sub(evicted.size);
            self.loss_count += 1;
        }

        self.slots[slot] = InFlightSlot { seq, sent_at: now, size, acked: false };
        self.inflight_bytes += size;
        self.sent_count += 1;
    }

    fn find_slot(&mut self, seq: u32) -> Option<&mut InFlightSlot> {
        self.slots.iter_mut().find(|slot| !slot.acked && slot.seq == seq)
    }

    pub fn packet_acknowledged(&mut self, now: f64, seq: u32) {
        let size = match self.find_slot(seq) {
            Some(slot) => {
                let rtt = now - slot.sent_at;
                slot.acked = true;
                let size = slot.size;
                self.rtt_history.push(rtt);
                size
            }
            None => return,
        };
        self.inflight_bytes = self.inflight_bytes.saturating_sub(size);
    }

    pub fn packet_lost(&mut self, seq: u32) {
        if let Some(slot) = self.find_slot(seq) {
            slot.acked = true;
            let size = slot.size;
            self.inflight_bytes = self.inflight_bytes.saturating_sub(size);
        }
        self.loss_count += 1;
    }

    /// Runs once a second: snapshots in-flight bytes into history and
    /// recomputes `avg_rtt`/`min_rtt` over the last `RTT_HISTORY_LEN`
    /// acknowledged samples, so a sustained RTT regression isn't diluted by
    /// a lifetime average and `min_rtt` ages out old, no-longer-true bests.
    pub fn tick(&mut self) {
        self.inflight_history.push(self.inflight_bytes);
        if !self.rtt_history.is_empty() {
            self.avg_rtt = self.rtt_history.average(|v| *v);
            self.min_rtt = self.rtt_history.min_by(|v| *v).unwrap_or(0.0);
        }
    }

    pub fn avg_rtt(&self) -> f64 {
        self.avg_rtt
    }

    pub fn avg_inflight_bytes(&self) -> f64 {
        self.inflight_history.average(|v| *v as f64)
    }

    pub fn min_rtt(&self) -> f64 {
        self.min_rtt
    }

    /// Bandwidth hint for the caller's bitrate loop. A `DECREASE`/`INCREASE`
    /// verdict also starts the 10 s cooldown before the next non-`NONE`
    /// verdict is allowed to fire.
    pub fn bandwidth_control_action(&mut self, now: f64) -> BandwidthAction {
        if now - self.last_action_time < STATE_TRANSITION_COOLDOWN {
            return BandwidthAction::None;
        }
        let min_rtt = self.min_rtt();
        if min_rtt <= 0.0 {
            return BandwidthAction::None;
        }

        let action = if self.avg_rtt > min_rtt * 1.5 {
            BandwidthAction::Decrease
        } else if self.avg_rtt < min_rtt * 1.2 && self.inflight_bytes as f64 / self.cwnd as f64 > 0.75 {
            BandwidthAction::Increase
        } else {
            BandwidthAction::None
        };

        if action != BandwidthAction::None {
            self.last_action_time = now;
            self.apply_cwnd_step(action);
        }
        action
    }

    fn apply_cwnd_step(&mut self, action: BandwidthAction) {
        self.cwnd = match action {
            BandwidthAction::Increase => (self.cwnd * 2).min(MAX_CWND),
            BandwidthAction::Decrease => (self.cwnd / 2).max(MIN_CWND),
            BandwidthAction::None => self.cwnd,
        };
    }

    /// Shitty-internet-mode heuristic (spec §4.3): enables extra parity FEC
    /// once send loss crosses `packet_loss_for_extra_ec` but hasn't gotten
    /// so bad it looks like a 2G/EDGE radio outright, and auto-disables
    /// once loss recovers.
    pub fn update_extra_ec(&mut self, packet_loss_for_extra_ec: f64, is_low_bandwidth_radio: bool) {
        let loss = self.send_loss_ratio();
        if is_low_bandwidth_radio {
            self.extra_ec = None;
            return;
        }
        if loss > packet_loss_for_extra_ec && loss < SHITTY_INTERNET_LOSS_CEILING {
            let level = if loss > 0.04 {
                4
            } else if loss > 0.03 {
                3
            } else {
                2
            };
            self.extra_ec = Some(ExtraEcLevel(level));
        } else {
            self.extra_ec = None;
        }
    }
}

impl Default for CongestionController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sent_and_acked_packet_tracks_rtt_and_frees_inflight() {
        let mut cc = CongestionController::new();
        cc.packet_sent(0.0, 1, 200);
        assert_eq!(cc.inflight_bytes(), 200);
        cc.packet_acknowledged(0.05, 1);
        assert_eq!(cc.inflight_bytes(), 0);
        cc.tick();
        assert!((cc.avg_rtt() - 0.05).abs() < 1e-9);
        assert!((cc.avg_inflight_bytes() - 0.0).abs() < 1e-9);
    }

    #[test]
    fn ring_eviction_counts_as_loss() {
        let mut cc = CongestionController::new();
        for seq in 0..RTT_HISTORY_LEN as u32 {
            cc.packet_sent(seq as f64, seq, 100);
        }
        assert_eq!(cc.send_loss_ratio(), 0.0);
        // Wraps around: slot 0 (still unacked) gets evicted and counted lost.
        cc.packet_sent(200.0, RTT_HISTORY_LEN as u32, 100);
        assert_eq!(cc.loss_count, 1);
    }

    #[test]
    fn explicit_packet_lost_increments_loss_count() {
        let mut cc = CongestionController::new();
        cc.packet_sent(0.0, 5, 100);
        cc.packet_lost(5);
        assert_eq!(cc.loss_count, 1);
        assert_eq!(cc.inflight_bytes(), 0);
    }

    #[test]
    fn decrease_when_avg_rtt_exceeds_one_point_five_times_min() {
        let mut cc = CongestionController::new();
        cc.packet_sent(0.0, 1, 100);
        cc.packet_acknowledged(0.05, 1);
        cc.tick();
        cc.packet_sent(1.0, 2, 100);
        cc.packet_acknowledged(1.2, 2);
        // avg rtt now averages two samples: (0.05 + 0.2)/2 = 0.125, min 0.05.
        cc.tick();
        let action = cc.bandwidth_control_action(100.0);
        assert_eq!(action, BandwidthAction::Decrease);
        assert_eq!(cc.cwnd(), INITIAL_CWND / 2);
    }

    #[test]
    fn cooldown_suppresses_repeat_actions() {
        let mut cc = CongestionController::new();
        cc.packet_sent(0.0, 1, 100);
        cc.packet_acknowledged(0.3, 1);
        cc.tick();
        let first = cc.bandwidth_control_action(20.0);
        assert_ne!(first, BandwidthAction::None);
        let second = cc.bandwidth_control_action(21.0);
        assert_eq!(second, BandwidthAction::None);
    }

    #[test]
    fn extra_ec_enables_in_the_shitty_internet_band() {
        let mut cc = CongestionController::new();
        for seq in 0..100u32 {
            cc.packet_sent(seq as f64, seq, 100);
            if seq % 30 == 0 {
                cc.packet_lost(seq);
            } else {
                cc.packet_acknowledged(seq as f64 + 0.05, seq);
            }
        }
        cc.update_extra_ec(0.02, false);
        assert!(cc.extra_ec_level().is_some());
    }

    #[test]
    fn extra_ec_disabled_on_low_bandwidth_radio_regardless_of_loss() {
        let mut cc = CongestionController::new();
        for seq in 0..10u32 {
            cc.packet_sent(seq as f64, seq, 100);
            cc.packet_lost(seq);
        }
        cc.update_extra_ec(0.02, true);
        assert!(cc.extra_ec_level().is_none());
    }

    #[test]
    fn extra_ec_disabled_once_loss_is_too_severe_for_fec_to_help() {
        let mut cc = CongestionController::new();
        for seq in 0..10u32 {
            cc.packet_sent(seq as f64, seq, 100);
            cc.packet_lost(seq);
        }
        // 100% loss is past the ceiling: FEC can't keep up, don't bother.
        cc.update_extra_ec(0.02, false);
        assert!(cc.extra_ec_level().is_none());
    }
}
