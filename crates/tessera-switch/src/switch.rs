use std::{
    fmt::Debug,
    net::{IpAddr, Ipv4Addr},
    sync::Arc,
    time::{Duration, Instant},
};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tessera_core::{
    cipher::Cipher,
    config::Config,
    error::{ErrorKind, Result},
    transport::{Path, Transport},
    Address, Identity, Mac, NetworkId,
};
use tessera_protocol::{
    ethertype, split_for_mtu, Fragment, FragmentHeader, MulticastGroup, Packet, Verb, MAX_HOPS,
};
use tracing::{debug, error, trace, warn};

use crate::{
    aqm::{Aqm, OutboundEntry},
    authority::NetworkAuthority,
    environment::{Decode, InboundPacket, PacketHandler, PeerDirectory},
    event_types::SwitchEvent,
    membership::{MembershipTracker, NetworkSummary},
    reassembly::{Reassembled, ReassemblyRing},
    statistics::{SwitchCounters, SwitchStatistics},
    unite::UniteTable,
    whois::{earliest, Deferred, WhoisTable},
};

/// QoS class used for control traffic.
pub const CONTROL_QOS_CLASS: u8 = 0;

// ============================================================================
// Services
// ============================================================================

/// Capabilities the switch borrows from the node that embeds it.
#[derive(Clone)]
pub struct Services {
    /// Peer identities, upstream and paths.
    pub directory: Arc<dyn PeerDirectory>,
    /// Joined networks and member authorization.
    pub authority: Arc<dyn NetworkAuthority>,
    /// Consumer of packets addressed to this node.
    pub handler: Arc<dyn PacketHandler>,
    /// Outbound datagram primitive.
    pub transport: Arc<dyn Transport>,
    /// Armors packets right before transmission.
    pub cipher: Arc<dyn Cipher>,
}

impl Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("directory", &"<directory>")
            .field("authority", &"<authority>")
            .field("handler", &"<handler>")
            .field("transport", &"<transport>")
            .field("cipher", &"<cipher>")
            .finish()
    }
}

// ============================================================================
// Switch
// ============================================================================

/// The packet switching core of a node.
///
/// Every entry point takes `&self` and may be called from any thread: receive
/// threads feed [`Switch::on_remote_packet`], the tap feeds
/// [`Switch::on_local_ethernet`], and a single maintenance thread calls
/// [`Switch::run_maintenance`] at the delay it returns. Outbound packets
/// only leave through the maintenance pass.
#[derive(Debug)]
pub struct Switch {
    config: Config,
    address: Address,
    services: Services,
    whois: WhoisTable,
    reassembly: ReassemblyRing,
    unite: UniteTable,
    aqm: Aqm,
    membership: MembershipTracker,
    counters: SwitchCounters,
    event_sender: Sender<SwitchEvent>,
    event_receiver: Receiver<SwitchEvent>,
}

impl Switch {
    /// Creates a switch for the node at `address`.
    pub fn new(config: Config, address: Address, services: Services) -> Self {
        let (event_sender, event_receiver) = unbounded();
        Self {
            whois: WhoisTable::new(&config),
            reassembly: ReassemblyRing::new(&config),
            unite: UniteTable::new(config.unite_cooldown),
            aqm: Aqm::new(&config),
            membership: MembershipTracker::new(config.member_online_window(), event_sender.clone()),
            counters: SwitchCounters::default(),
            event_sender,
            event_receiver,
            config,
            address,
            services,
        }
    }

    /// Returns the local address.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Returns the configuration in use.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns a handle to the receiver for events.
    pub fn event_receiver(&self) -> &Receiver<SwitchEvent> {
        &self.event_receiver
    }

    /// Returns a snapshot of the counters.
    pub fn statistics(&self) -> SwitchStatistics {
        self.counters.snapshot()
    }

    /// Returns the pending WHOIS table.
    pub fn whois(&self) -> &WhoisTable {
        &self.whois
    }

    /// Returns the reassembly ring.
    pub fn reassembly(&self) -> &ReassemblyRing {
        &self.reassembly
    }

    /// Returns the outbound scheduler.
    pub fn aqm(&self) -> &Aqm {
        &self.aqm
    }

    // ------------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------------

    /// Schedules a control packet for transmission.
    ///
    /// The packet is armored for its destination at transmit time. If the
    /// destination's identity is unknown the packet waits for WHOIS.
    pub fn send(&self, packet: Packet, encrypt: bool, now: Instant) {
        self.dispatch(NetworkId::CONTROL, CONTROL_QOS_CLASS, packet, encrypt, now);
    }

    /// Schedules a packet on a joined network's flow for its destination.
    pub fn send_frame(
        &self,
        network: NetworkId,
        packet: Packet,
        encrypt: bool,
        qos_class: u8,
        now: Instant,
    ) -> Result<()> {
        if self.services.authority.network(network).is_none() {
            return Err(ErrorKind::UnknownNetwork(network));
        }
        self.dispatch(network, qos_class, packet, encrypt, now);
        Ok(())
    }

    fn dispatch(&self, network: NetworkId, qos_class: u8, packet: Packet, encrypt: bool, now: Instant) {
        let destination = packet.destination();
        if destination == self.address || destination.is_reserved() {
            debug!("Dropping packet addressed to {}", destination);
            SwitchCounters::bump(&self.counters.transmit_failures);
            return;
        }

        if self.services.directory.identity(destination).is_some() {
            self.enqueue(network, qos_class, packet, encrypt, now);
            return;
        }

        let action = Deferred::Transmit { network, qos_class, packet, encrypt };
        if self.whois.defer(destination, action).is_err() {
            SwitchCounters::bump(&self.counters.whois_dropped_actions);
        }
        self.request_resolution(destination, now);
    }

    fn enqueue(&self, network: NetworkId, qos_class: u8, packet: Packet, encrypt: bool, now: Instant) {
        let entry = OutboundEntry { destination: packet.destination(), created_at: now, packet, encrypt };
        if self.aqm.enqueue(network, qos_class, entry).is_some() {
            SwitchCounters::bump(&self.counters.overflow_drops);
        }
    }

    // ------------------------------------------------------------------------
    // Address resolution
    // ------------------------------------------------------------------------

    /// Asks upstream for the identity of `address`.
    ///
    /// At most one request per address goes out per retry delay; the local
    /// and reserved addresses are ignored.
    pub fn request_resolution(&self, address: Address, now: Instant) {
        if address == self.address || address.is_reserved() {
            return;
        }
        if self.whois.request(address, now) {
            self.send_whois(address, now);
        }
    }

    fn send_whois(&self, address: Address, now: Instant) {
        let Some(upstream) = self.services.directory.upstream() else {
            debug!("No upstream to ask about {}", address);
            return;
        };
        if upstream == self.address || self.services.directory.identity(upstream).is_none() {
            debug!("Upstream {} unusable for WHOIS", upstream);
            return;
        }

        trace!("WHOIS {} via {}", address, upstream);
        let mut packet = Packet::new(upstream, self.address, Verb::Whois);
        packet.append(&address.to_bytes());
        self.enqueue(NetworkId::CONTROL, CONTROL_QOS_CLASS, packet, false, now);
        SwitchCounters::bump(&self.counters.whois_requests);
    }

    /// Replays everything parked on an identity that just became known.
    ///
    /// Parked transmissions go to the scheduler and parked inbound packets go
    /// back to the handler, in the order they were parked. An inbound packet
    /// that still cannot be authenticated is dropped. Returns the number of
    /// actions replayed.
    pub fn on_identity_resolved(&self, identity: &Identity, now: Instant) -> usize {
        let actions = self.whois.resolve(identity.address());
        let count = actions.len();
        if count > 0 {
            debug!("Identity of {} resolved, replaying {} actions", identity.address(), count);
        }

        for action in actions {
            match action {
                Deferred::Transmit { network, qos_class, packet, encrypt } => {
                    if network != NetworkId::CONTROL && self.services.authority.network(network).is_none() {
                        trace!("Network {} left while waiting on WHOIS", network);
                        continue;
                    }
                    self.enqueue(network, qos_class, packet, encrypt, now);
                }
                Deferred::Inbound(inbound) => {
                    if let Decode::NeedIdentity(missing) = self.services.handler.handle(&inbound, now) {
                        debug!("Inbound packet still needs identity of {}, dropping", missing);
                        SwitchCounters::bump(&self.counters.inbound_dropped);
                    }
                }
            }
        }
        count
    }

    // ------------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------------

    /// Processes a datagram received from the physical network.
    ///
    /// Fragments and packets for other peers are relayed; pieces of packets
    /// for this node go through reassembly; complete packets go to the
    /// handler.
    pub fn on_remote_packet(&self, path: Option<Path>, data: &[u8], now: Instant) {
        if Fragment::is_fragment(data) {
            self.on_remote_fragment(path, data, now);
            return;
        }

        let packet = match Packet::from_bytes(data.to_vec()) {
            Ok(packet) => packet,
            Err(err) => {
                trace!("Discarding datagram: {}", err);
                SwitchCounters::bump(&self.counters.inbound_dropped);
                return;
            }
        };

        if let Err(err) = packet.check_source() {
            trace!("Discarding packet: {}", err);
            SwitchCounters::bump(&self.counters.inbound_dropped);
            return;
        }
        if packet.source() == self.address {
            trace!("Discarding packet that claims to come from us");
            SwitchCounters::bump(&self.counters.inbound_dropped);
            return;
        }

        if packet.destination() != self.address {
            self.relay_packet(packet, now);
            return;
        }

        if packet.is_fragmented() {
            let reassembled = self.reassembly.on_head(packet.packet_id(), packet.as_bytes(), now);
            self.on_reassembled(path, reassembled, now);
        } else {
            self.deliver(path, packet, now);
        }
    }

    fn on_remote_fragment(&self, path: Option<Path>, data: &[u8], now: Instant) {
        let (header, payload) = match Fragment::decode(data) {
            Ok(decoded) => decoded,
            Err(err) => {
                trace!("Discarding fragment: {}", err);
                SwitchCounters::bump(&self.counters.fragments_dropped);
                return;
            }
        };

        if header.destination != self.address {
            self.relay_fragment(&header, data);
            return;
        }

        let reassembled = self.reassembly.on_fragment(&header, payload, now);
        self.on_reassembled(path, reassembled, now);
    }

    fn on_reassembled(&self, path: Option<Path>, reassembled: Reassembled, now: Instant) {
        match reassembled {
            Reassembled::Pending => {}
            Reassembled::Complete(bytes) => {
                SwitchCounters::bump(&self.counters.packets_reassembled);
                match Packet::from_bytes(bytes) {
                    Ok(packet) => self.deliver(path, packet, now),
                    Err(err) => {
                        warn!("Reassembled packet is malformed: {}", err);
                        SwitchCounters::bump(&self.counters.inbound_dropped);
                    }
                }
            }
            Reassembled::Duplicate | Reassembled::Inconsistent => {
                SwitchCounters::bump(&self.counters.fragments_dropped);
            }
        }
    }

    fn deliver(&self, path: Option<Path>, packet: Packet, now: Instant) {
        let inbound = InboundPacket { path, packet, received_at: now };
        if let Decode::NeedIdentity(missing) = self.services.handler.handle(&inbound, now) {
            if missing == self.address || missing.is_reserved() {
                debug!("Packet needs the identity of {}, which cannot be resolved", missing);
                SwitchCounters::bump(&self.counters.inbound_dropped);
                return;
            }
            trace!("Parking packet until the identity of {} is known", missing);
            if self.whois.defer(missing, Deferred::Inbound(inbound)).is_err() {
                SwitchCounters::bump(&self.counters.whois_dropped_actions);
            }
            self.request_resolution(missing, now);
        }
    }

    // ------------------------------------------------------------------------
    // Relaying
    // ------------------------------------------------------------------------

    /// Picks the next hop for `destination`: the peer itself when known,
    /// upstream otherwise.
    fn next_hop(&self, destination: Address) -> Option<Address> {
        if self.services.directory.identity(destination).is_some() {
            return Some(destination);
        }
        self.services.directory.upstream().filter(|upstream| *upstream != self.address)
    }

    /// Hop limit for relaying, capped by what the 3-bit counter can hold.
    fn hop_limit(&self) -> u8 {
        self.config.relay_max_hops.min(MAX_HOPS)
    }

    fn relay_packet(&self, mut packet: Packet, now: Instant) {
        if packet.hops() >= self.hop_limit() {
            trace!("Relay hop limit reached for {}", packet.destination());
            SwitchCounters::bump(&self.counters.relay_drops);
            return;
        }
        packet.increment_hops();

        let source = packet.source();
        let destination = packet.destination();
        let Some(next_hop) = self.next_hop(destination) else {
            SwitchCounters::bump(&self.counters.relay_drops);
            return;
        };

        let path = self.services.directory.best_path(next_hop);
        if !self.services.transport.transmit(next_hop, path.as_ref(), packet.as_bytes()) {
            SwitchCounters::bump(&self.counters.relay_drops);
            return;
        }
        SwitchCounters::bump(&self.counters.packets_relayed);

        if next_hop == destination && self.unite.should_unite(now, source, destination) {
            let (a, b) = if source < destination { (source, destination) } else { (destination, source) };
            debug!("Suggesting rendezvous between {} and {}", a, b);
            SwitchCounters::bump(&self.counters.rendezvous_hints);
            self.emit(SwitchEvent::Rendezvous { a, b });
        }
    }

    fn relay_fragment(&self, header: &FragmentHeader, data: &[u8]) {
        if header.hops >= self.hop_limit() {
            trace!("Relay hop limit reached for fragment of {:016x}", header.packet_id);
            SwitchCounters::bump(&self.counters.relay_drops);
            return;
        }
        let Some(next_hop) = self.next_hop(header.destination) else {
            SwitchCounters::bump(&self.counters.relay_drops);
            return;
        };

        let mut bytes = data.to_vec();
        Fragment::increment_raw_hops(&mut bytes);
        let path = self.services.directory.best_path(next_hop);
        if self.services.transport.transmit(next_hop, path.as_ref(), &bytes) {
            SwitchCounters::bump(&self.counters.packets_relayed);
        } else {
            SwitchCounters::bump(&self.counters.relay_drops);
        }
    }

    // ------------------------------------------------------------------------
    // Local Ethernet
    // ------------------------------------------------------------------------

    /// Accepts a frame from the local tap of `network`.
    ///
    /// Multicast and broadcast frames are announced as
    /// [`SwitchEvent::MulticastFrame`]. Unicast frames to a peer MAC become a
    /// FRAME packet on the destination's flow. Frames from foreign MACs are
    /// dropped since bridging is not supported.
    #[allow(clippy::too_many_arguments)]
    pub fn on_local_ethernet(
        &self,
        network: NetworkId,
        from: Mac,
        to: Mac,
        ether_type: u16,
        vlan_id: u16,
        payload: &[u8],
        now: Instant,
    ) -> Result<()> {
        let config = self.services.authority.network(network).ok_or(ErrorKind::UnknownNetwork(network))?;

        if payload.len() > config.mtu {
            debug!("Frame of {} bytes exceeds MTU {} of {}", payload.len(), config.mtu, network);
            SwitchCounters::bump(&self.counters.frames_dropped);
            return Ok(());
        }
        if from != Mac::from_address(self.address, network) {
            trace!("Dropping frame from foreign MAC {}", from);
            SwitchCounters::bump(&self.counters.frames_dropped);
            return Ok(());
        }

        if to.is_multicast() {
            if to.is_broadcast() && !config.enable_broadcast {
                SwitchCounters::bump(&self.counters.frames_dropped);
                return Ok(());
            }
            let group = multicast_group_for(to, ether_type, payload);
            self.emit(SwitchEvent::MulticastFrame {
                network,
                group,
                from,
                ether_type,
                vlan_id,
                payload: payload.to_vec(),
                limit: config.multicast_limit,
            });
            return Ok(());
        }

        if !to.is_overlay_assigned(network) {
            trace!("No bridge for {}", to);
            SwitchCounters::bump(&self.counters.frames_dropped);
            return Ok(());
        }
        let destination = to.to_address(network);
        let certificate = self.services.authority.member_certificate(network, destination);
        if destination == self.address || !config.admits(destination, certificate.as_ref()) {
            trace!("Peer {} not a valid frame destination on {}", destination, network);
            SwitchCounters::bump(&self.counters.frames_dropped);
            return Ok(());
        }

        let mut packet = Packet::new(destination, self.address, Verb::Frame);
        packet.append(&network.as_u64().to_be_bytes());
        packet.append(&ether_type.to_be_bytes());
        packet.append(payload);
        let qos_class = config.classify(ether_type, vlan_id);
        self.dispatch(network, qos_class, packet, true, now);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Networks and members
    // ------------------------------------------------------------------------

    /// Discards everything queued or parked for `network`.
    pub fn teardown_network(&self, network: NetworkId) -> usize {
        let discarded = self.aqm.teardown(network) + self.whois.drop_network(network);
        self.membership.forget_network(network);
        debug!("Tore down network {}, discarded {} packets", network, discarded);
        discarded
    }

    /// Records a configuration request from a member.
    pub fn record_member_request(&self, network: NetworkId, member: Address, now: Instant) -> bool {
        self.membership.record_request(network, member, now)
    }

    /// True if `member` was seen within the online window.
    pub fn is_member_online(&self, network: NetworkId, member: Address, now: Instant) -> bool {
        self.membership.is_online(network, member, now)
    }

    /// Counts the members of `network`.
    pub fn network_summary(&self, network: NetworkId, now: Instant) -> NetworkSummary {
        self.membership.summary(network, now)
    }

    /// Drops a member's authorization and discards its queued traffic.
    pub fn deauthorize_member(&self, network: NetworkId, member: Address) -> usize {
        let discarded = self.aqm.purge_flow(network, member) + self.whois.drop_flow(network, member);
        self.membership.deauthorize(network, member);
        discarded
    }

    /// Announces that `network`'s configuration changed.
    pub fn network_updated(&self, network: NetworkId) {
        self.membership.network_updated(network);
    }

    // ------------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------------

    /// Runs periodic work and returns the suggested delay until the next call.
    ///
    /// Order: WHOIS retries and abandonment, reassembly expiry, rendezvous
    /// cooldown expiry, then one scheduling pass whose output is armored and
    /// transmitted.
    pub fn run_maintenance(&self, now: Instant) -> Duration {
        let sweep = self.whois.sweep(now);
        for address in &sweep.retry {
            self.send_whois(*address, now);
        }
        if !sweep.abandoned.is_empty() {
            debug!("Gave up resolving {} addresses", sweep.abandoned.len());
        }
        SwitchCounters::add(&self.counters.whois_dropped_actions, sweep.dropped_actions);

        let expiry = self.reassembly.expire(now);
        SwitchCounters::add(&self.counters.reassemblies_expired, expiry.expired);

        self.unite.expire(now);

        let backlog = self.transmit_pass(now);

        let mut delay = earliest(sweep.next_deadline, expiry.next_deadline)
            .map_or(self.config.maintenance_idle_delay, |deadline| deadline.saturating_duration_since(now));
        if backlog > 0 {
            delay = self.config.maintenance_min_delay;
        }
        delay.clamp(self.config.maintenance_min_delay, self.config.maintenance_idle_delay)
    }

    fn transmit_pass(&self, now: Instant) -> usize {
        let pass = self.aqm.dequeue_pass(now);
        SwitchCounters::add(&self.counters.codel_drops, pass.dropped);
        for entry in pass.transmit {
            self.transmit(entry);
        }
        pass.backlog
    }

    fn transmit(&self, entry: OutboundEntry) {
        let destination = entry.destination;
        let Some(identity) = self.services.directory.identity(destination) else {
            debug!("Identity of {} vanished before transmit", destination);
            SwitchCounters::bump(&self.counters.transmit_failures);
            return;
        };

        let mut packet = entry.packet;
        packet.set_fragmented(packet.len() > self.config.physical_mtu);
        let mut bytes = packet.into_bytes();
        if !self.services.cipher.armor(&identity, &mut bytes, entry.encrypt) {
            debug!("Cipher refused packet for {}", destination);
            SwitchCounters::bump(&self.counters.transmit_failures);
            return;
        }

        let Some(pieces) = split_for_mtu(&bytes, self.config.physical_mtu) else {
            warn!("Packet of {} bytes for {} is too large to fragment", bytes.len(), destination);
            SwitchCounters::bump(&self.counters.transmit_failures);
            return;
        };

        let path = self.services.directory.best_path(destination);
        let mut sent = 0;
        for piece in &pieces {
            if self.services.transport.transmit(destination, path.as_ref(), piece) {
                sent += piece.len();
            } else {
                SwitchCounters::bump(&self.counters.transmit_failures);
                return;
            }
        }
        SwitchCounters::bump(&self.counters.packets_transmitted);
        SwitchCounters::add(&self.counters.bytes_transmitted, sent);
    }

    fn emit(&self, event: SwitchEvent) {
        if let Err(err) = self.event_sender.send(event) {
            error!("Event receiver dropped: {}", err);
        }
    }
}

/// Picks the multicast group for a frame sent to a group MAC.
///
/// Broadcast ARP requests are narrowed to the group of the IPv4 address being
/// resolved so only its owner needs to receive them.
fn multicast_group_for(to: Mac, ether_type: u16, payload: &[u8]) -> MulticastGroup {
    if to.is_broadcast() && ether_type == ethertype::ARP && payload.len() >= 28 {
        let target = Ipv4Addr::new(payload[24], payload[25], payload[26], payload[27]);
        return MulticastGroup::for_address_resolution(IpAddr::V4(target));
    }
    MulticastGroup::new(to, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arp_broadcast_group() {
        let mut arp = vec![0u8; 28];
        arp[24..28].copy_from_slice(&[10, 0, 0, 7]);
        let group = multicast_group_for(Mac::BROADCAST, ethertype::ARP, &arp);
        assert_eq!(group.mac(), Mac::BROADCAST);
        assert_eq!(group.adi(), 0x0a000007);

        let group = multicast_group_for(Mac::BROADCAST, ethertype::IPV4, &arp);
        assert_eq!(group.adi(), 0);

        let mdns = Mac::from_octets([0x01, 0x00, 0x5e, 0x00, 0x00, 0xfb]);
        assert_eq!(multicast_group_for(mdns, ethertype::IPV4, &arp), MulticastGroup::new(mdns, 0));
    }

    #[test]
    fn test_short_arp_is_plain_broadcast() {
        let group = multicast_group_for(Mac::BROADCAST, ethertype::ARP, &[0u8; 10]);
        assert_eq!(group, MulticastGroup::new(Mac::BROADCAST, 0));
    }
}
