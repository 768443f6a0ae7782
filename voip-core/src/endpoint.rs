//! Endpoint registry (component E): the set of candidate peers and relays,
//! each tracked with its own ping/RTT history. Grounded on the teacher's
//! `net::endpoint::Endpoint` (channel pooling, per-connection bookkeeping)
//! generalized from "one TCP channel" to "one network destination of any
//! kind", and on the source library's `RTT ring of 6` / ping accounting.

use std::net::{Ipv4Addr, Ipv6Addr};

use hashbrown::HashMap;

use crate::util::HistoricBuffer;

pub type EndpointId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    UdpP2pInet,
    UdpP2pLan,
    UdpRelay,
    TcpRelay,
}

impl EndpointKind {
    pub fn is_p2p(&self) -> bool {
        matches!(self, EndpointKind::UdpP2pInet | EndpointKind::UdpP2pLan)
    }

    pub fn is_relay(&self) -> bool {
        matches!(self, EndpointKind::UdpRelay | EndpointKind::TcpRelay)
    }

    pub fn is_tcp(&self) -> bool {
        matches!(self, EndpointKind::TcpRelay)
    }
}

/// One candidate network destination. The registry owns every `Endpoint`;
/// nothing outside it holds a reference longer than a single call into the
/// controller (spec §9: "no back-pointers except a borrowed reference to
/// the controller, scoped to the controller's lifetime").
pub struct Endpoint {
    pub id: EndpointId,
    pub kind: EndpointKind,
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
    pub port: u16,
    pub peer_tag: [u8; 16],

    pub last_ping_seq: u32,
    pub last_ping_time: f64,
    rtt_history: HistoricBuffer<f64, 6>,
    pub udp_pong_count: u32,
    pub udp_ping_count: u32,
    pub udp_reply_count: u32,
}

impl Endpoint {
    pub fn new(id: EndpointId, kind: EndpointKind, ipv4: Option<Ipv4Addr>, ipv6: Option<Ipv6Addr>, port: u16, peer_tag: [u8; 16]) -> Self {
        Endpoint {
            id,
            kind,
            ipv4,
            ipv6,
            port,
            peer_tag,
            last_ping_seq: 0,
            last_ping_time: 0.0,
            rtt_history: HistoricBuffer::new(),
            udp_pong_count: 0,
            udp_ping_count: 0,
            udp_reply_count: 0,
        }
    }

    pub fn record_rtt(&mut self, rtt: f64) {
        self.rtt_history.push(rtt);
        self.udp_pong_count += 1;
    }

    pub fn average_rtt(&self) -> Option<f64> {
        if self.rtt_history.is_empty() {
            None
        } else {
            Some(self.rtt_history.average(|v| *v))
        }
    }

    /// RTT weighted the way the relay-preference comparison wants it: TCP
    /// endpoints count double (spec §4.2 "preferred-relay selection").
    pub fn weighted_rtt(&self) -> Option<f64> {
        let rtt = self.average_rtt()?;
        Some(if self.kind.is_tcp() { rtt * 2.0 } else { rtt })
    }

    pub fn due_for_ping(&self, now: f64, ping_interval: f64) -> bool {
        now - self.last_ping_time >= ping_interval
    }
}

/// Owns all known endpoints for one call.
#[derive(Default)]
pub struct EndpointRegistry {
    endpoints: HashMap<EndpointId, Endpoint>,
    next_synthetic_id: u64,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        EndpointRegistry { endpoints: HashMap::new(), next_synthetic_id: 1 }
    }

    pub fn insert(&mut self, endpoint: Endpoint) -> EndpointId {
        let id = endpoint.id;
        self.endpoints.insert(id, endpoint);
        id
    }

    /// Allocates an id for an endpoint discovered at runtime (e.g. a
    /// reflector-reported peer address or a LAN broadcast), distinct from
    /// the ids handed out via `SetRemoteEndpoints`.
    pub fn next_discovered_id(&mut self) -> EndpointId {
        let id = 0x8000_0000_0000_0000 | self.next_synthetic_id;
        self.next_synthetic_id += 1;
        id
    }

    pub fn get(&self, id: EndpointId) -> Option<&Endpoint> {
        self.endpoints.get(&id)
    }

    pub fn get_mut(&mut self, id: EndpointId) -> Option<&mut Endpoint> {
        self.endpoints.get_mut(&id)
    }

    pub fn remove(&mut self, id: EndpointId) -> Option<Endpoint> {
        self.endpoints.remove(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Endpoint> {
        self.endpoints.values_mut()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Picks the preferred relay per spec §4.2: lowest weighted RTT among
    /// usable relay endpoints, preferring the current choice unless a
    /// candidate beats it by at least `switch_threshold` (a multiplicative
    /// margin, e.g. 0.8 means "20% better").
    pub fn select_preferred_relay(&self, use_udp: bool, use_tcp: bool, current: Option<EndpointId>, switch_threshold: f64) -> Option<EndpointId> {
        let mut best: Option<(EndpointId, f64)> = None;
        for ep in self.endpoints.values() {
            if !ep.kind.is_relay() {
                continue;
            }
            if ep.kind == EndpointKind::UdpRelay && !use_udp {
                continue;
            }
            if ep.kind == EndpointKind::TcpRelay && !use_tcp {
                continue;
            }
            let Some(rtt) = ep.weighted_rtt() else { continue };
            match best {
                None => best = Some((ep.id, rtt)),
                Some((_, best_rtt)) if rtt < best_rtt => best = Some((ep.id, rtt)),
                _ => {}
            }
        }

        let (candidate_id, candidate_rtt) = best?;
        match current.and_then(|id| self.get(id)).and_then(|ep| ep.weighted_rtt()) {
            Some(current_rtt) if current.unwrap() != candidate_id => {
                if candidate_rtt < current_rtt * switch_threshold {
                    Some(candidate_id)
                } else {
                    current
                }
            }
            _ => Some(candidate_id),
        }
    }

    /// Best reachable P2P endpoint by RTT, used by the relay<->P2P switch
    /// logic in spec §4.2.
    pub fn best_p2p(&self) -> Option<(EndpointId, f64)> {
        self.endpoints
            .values()
            .filter(|ep| ep.kind.is_p2p())
            .filter_map(|ep| ep.average_rtt().map(|rtt| (ep.id, rtt)))
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relay(id: EndpointId, kind: EndpointKind, rtt_ms: f64) -> Endpoint {
        let mut ep = Endpoint::new(id, kind, Some(Ipv4Addr::new(127, 0, 0, 1)), None, 1234, [0u8; 16]);
        ep.record_rtt(rtt_ms / 1000.0);
        ep
    }

    #[test]
    fn preferred_relay_converges_to_lowest_rtt() {
        let mut reg = EndpointRegistry::new();
        reg.insert(relay(1, EndpointKind::UdpRelay, 120.0));
        reg.insert(relay(2, EndpointKind::UdpRelay, 80.0));

        let chosen = reg.select_preferred_relay(true, true, None, 0.8);
        assert_eq!(chosen, Some(2));
    }

    #[test]
    fn preferred_relay_requires_threshold_margin_to_switch() {
        let mut reg = EndpointRegistry::new();
        reg.insert(relay(1, EndpointKind::UdpRelay, 100.0));
        reg.insert(relay(2, EndpointKind::UdpRelay, 85.0));

        // 85 is not below 100 * 0.8 = 80, so the incumbent should stick.
        let chosen = reg.select_preferred_relay(true, true, Some(1), 0.8);
        assert_eq!(chosen, Some(1));
    }

    #[test]
    fn relay_switch_scenario_from_spec() {
        let mut reg = EndpointRegistry::new();
        reg.insert(relay(1, EndpointKind::UdpRelay, 120.0));
        reg.insert(relay(2, EndpointKind::UdpRelay, 80.0));

        let chosen = reg.select_preferred_relay(true, true, None, 0.8);
        assert_eq!(chosen, Some(2));

        // B degrades to 200ms; A (120ms) should win back.
        reg.get_mut(2).unwrap().record_rtt(0.2);
        reg.get_mut(2).unwrap().record_rtt(0.2);
        reg.get_mut(2).unwrap().record_rtt(0.2);
        reg.get_mut(2).unwrap().record_rtt(0.2);
        reg.get_mut(2).unwrap().record_rtt(0.2);
        let chosen = reg.select_preferred_relay(true, true, Some(2), 0.8);
        assert_eq!(chosen, Some(1));
    }

    #[test]
    fn tcp_rtt_is_weighted_double() {
        let ep = relay(1, EndpointKind::TcpRelay, 50.0);
        assert!((ep.weighted_rtt().unwrap() - 0.1).abs() < 1e-9);
    }
}
