//! Loopback smoke-test harness: wires two in-process `Controller`s together
//! through a channel standing in for a socket, drives the handshake, and
//! exchanges one audio frame, logging every state transition and effect.

use std::net::Ipv4Addr;
use std::sync::mpsc;
use std::sync::Arc;

use voip_core::clock::FakeClock;
use voip_core::config::{EngineConfig, ServerConfig};
use voip_core::controller::{Controller, Effect, IncomingPacket};
use voip_core::endpoint::{Endpoint, EndpointKind};
use voip_core::packet;
use voip_core::stream::Stream;

struct Peer {
    name: &'static str,
    controller: Controller,
    endpoint_id: u64,
    next_out_seq: u32,
}

fn main() {
    env_logger::init();

    let clock = Arc::new(FakeClock::new());
    let (tx_a_to_b, rx_a_to_b) = mpsc::channel::<(u8, Vec<u8>)>();
    let (tx_b_to_a, rx_b_to_a) = mpsc::channel::<(u8, Vec<u8>)>();

    let mut alice = Peer {
        name: "alice",
        controller: Controller::new(EngineConfig::default(), ServerConfig::default(), clock.clone()),
        endpoint_id: 1,
        next_out_seq: 1,
    };
    let mut bob = Peer {
        name: "bob",
        controller: Controller::new(EngineConfig::default(), ServerConfig::default(), clock.clone()),
        endpoint_id: 2,
        next_out_seq: 1,
    };

    alice.controller.add_endpoint(Endpoint::new(bob.endpoint_id, EndpointKind::UdpP2pInet, Some(Ipv4Addr::LOCALHOST), None, 4000, [0u8; 16]));
    bob.controller.add_endpoint(Endpoint::new(alice.endpoint_id, EndpointKind::UdpP2pInet, Some(Ipv4Addr::LOCALHOST), None, 4001, [0u8; 16]));

    alice.controller.add_outgoing_stream(Stream::new_audio(0, 0x4f505553, 60));
    bob.controller.add_outgoing_stream(Stream::new_audio(0, 0x4f505553, 60));

    apply_effects("alice", alice.controller.start(), &tx_a_to_b);

    // Deliver INIT -> INIT_ACK -> first stream data, driving the state
    // machine to ESTABLISHED on both sides.
    for _round in 0..4 {
        drain_inbox(&mut bob, &rx_a_to_b, &tx_b_to_a);
        drain_inbox(&mut alice, &rx_b_to_a, &tx_a_to_b);
        clock.advance(0.5);
        apply_effects("alice", alice.controller.tick(), &tx_a_to_b);
        apply_effects("bob", bob.controller.tick(), &tx_b_to_a);
    }

    clock.advance(1.5);
    apply_effects("alice", alice.controller.tick(), &tx_a_to_b);
    apply_effects("bob", bob.controller.tick(), &tx_b_to_a);

    log::info!("alice state: {:?}", alice.controller.state());
    log::info!("bob state: {:?}", bob.controller.state());

    let frame = packet::StreamDataSubPacket { stream_id: 0, pts: 1000, fragment: None, keyframe: false, extra_fec: false, payload: b"opus-frame-bytes".to_vec() };
    let mut body = Vec::new();
    frame.write_to(&mut body).expect("writing to a Vec never fails");
    send_raw(&mut alice, packet::PKT_STREAM_DATA, body, &tx_a_to_b);
    drain_inbox(&mut bob, &rx_a_to_b, &tx_b_to_a);
}

fn send_raw(peer: &mut Peer, packet_type: u8, body: Vec<u8>, tx: &mpsc::Sender<(u8, Vec<u8>)>) {
    peer.next_out_seq += 1;
    let _ = tx.send((packet_type, body));
}

fn drain_inbox(peer: &mut Peer, rx: &mpsc::Receiver<(u8, Vec<u8>)>, reply_tx: &mpsc::Sender<(u8, Vec<u8>)>) {
    while let Ok((packet_type, body)) = rx.try_recv() {
        let seq = peer.next_out_seq;
        peer.next_out_seq += 1;
        let effects = peer.controller.handle_packet(IncomingPacket {
            packet_type,
            seq,
            last_remote_seq: 0,
            ack_mask: 0,
            extras: Vec::new(),
            body,
            from: peer.endpoint_id,
        });
        apply_effects(peer.name, effects, reply_tx);
    }
}

fn apply_effects(who: &str, effects: Vec<Effect>, tx: &mpsc::Sender<(u8, Vec<u8>)>) {
    for effect in effects {
        match effect {
            Effect::Send { packet_type, body, .. } => {
                log::debug!("{who} sends packet type {packet_type}");
                let _ = tx.send((packet_type, body));
            }
            Effect::ConnectionStateChanged(state) => log::info!("{who} -> {state:?}"),
            Effect::StreamDataReady { stream_id, data } => log::info!("{who} received {} bytes on stream {stream_id}", data.len()),
            Effect::GroupCallKeyDelivered => log::info!("{who} group call key delivered"),
            Effect::RequestGroupDelivered => log::info!("{who} request-group delivered"),
        }
    }
}
