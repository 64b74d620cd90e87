//! Two switches wired back to back through an in-memory transport.
//!
//! Node A sends a few echo packets (one large enough to be fragmented) to
//! node B, which prints what it receives.
//!
//! Run:
//! - cargo run -p tessera --example loopback

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tessera::prelude::*;

const NODE_A: Address = Address::new(0x0a0a0a0a0a);
const NODE_B: Address = Address::new(0x0b0b0b0b0b);

struct Directory {
    peers: HashMap<Address, Identity>,
}

impl PeerDirectory for Directory {
    fn identity(&self, address: Address) -> Option<Identity> {
        self.peers.get(&address).cloned()
    }

    fn upstream(&self) -> Option<Address> {
        None
    }
}

struct NoNetworks;

impl NetworkAuthority for NoNetworks {
    fn network(&self, _network: NetworkId) -> Option<Arc<NetworkConfig>> {
        None
    }

    fn member_certificate(&self, _network: NetworkId, _member: Address) -> Option<CertificateOfMembership> {
        None
    }
}

struct Printer(&'static str);

impl PacketHandler for Printer {
    fn handle(&self, inbound: &InboundPacket, _now: Instant) -> Decode {
        let packet = &inbound.packet;
        println!(
            "[{}] from={} verb={:?} len={} fragmented={}",
            self.0,
            packet.source(),
            packet.verb(),
            packet.len(),
            packet.is_fragmented()
        );
        Decode::Handled
    }
}

/// Hands datagrams to a channel the main loop delivers from.
struct Wire(Sender<(Address, Vec<u8>)>);

impl Transport for Wire {
    fn transmit(&self, destination: Address, _path: Option<&Path>, payload: &[u8]) -> bool {
        self.0.send((destination, payload.to_vec())).is_ok()
    }
}

fn node(address: Address, name: &'static str, wire: Sender<(Address, Vec<u8>)>) -> Switch {
    let peers = [NODE_A, NODE_B]
        .into_iter()
        .map(|peer| (peer, Identity::new(peer, peer.to_bytes().to_vec())))
        .collect();
    let services = Services {
        directory: Arc::new(Directory { peers }),
        authority: Arc::new(NoNetworks),
        handler: Arc::new(Printer(name)),
        transport: Arc::new(Wire(wire)),
        cipher: Arc::new(PlaintextCipher),
    };
    Switch::new(Config::default(), address, services)
}

fn deliver(wire: &Receiver<(Address, Vec<u8>)>, nodes: &[&Switch], now: Instant) {
    for (destination, bytes) in wire.try_iter() {
        if let Some(node) = nodes.iter().find(|node| node.address() == destination) {
            node.on_remote_packet(None, &bytes, now);
        }
    }
}

fn main() {
    let (tx, rx) = unbounded();
    let a = node(NODE_A, "a", tx.clone());
    let b = node(NODE_B, "b", tx);

    for size in [16, 600, 4000] {
        let mut packet = Packet::new(NODE_B, NODE_A, Verb::Echo);
        packet.append(&vec![0x42; size]);
        a.send(packet, true, Instant::now());
    }

    for _ in 0..3 {
        let now = Instant::now();
        let delay = a.run_maintenance(now).max(b.run_maintenance(now));
        deliver(&rx, &[&a, &b], now);
        std::thread::sleep(delay.min(Duration::from_millis(20)));
    }

    println!("a: {:?}", a.statistics());
    println!("b: {:?}", b.statistics());
}
