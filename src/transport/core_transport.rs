//! The engine loop: owns the path table, announce cache, link table, and
//! registered interfaces, and drives packet dispatch from a single
//! `tokio::task`.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;

use crate::hash::AddressHash;
use crate::identity::PrivateIdentity;
use crate::packet::{Packet, PacketContext, PacketType};

use super::announce_cache::AnnounceCache;
use super::config::TransportConfig;
use super::destination_ext::link::{build_link_proof_payload, parse_link_proof_payload, Link, LinkId};
use super::error::TransportError;
use super::iface::{InterfaceHandle, InterfaceId};
use super::link_table::LinkTable;
use super::path_table::PathTable;
use super::time::now_epoch_secs_i64;

/// How often `run_gc` ticks, used to turn a per-second announce bandwidth
/// cap into a per-tick budget for `flush_announce_queue`.
const GC_TICK_SECS: f64 = 30.0;

/// Minimum time between two PATH_REQUESTs for the same destination, so a
/// burst of queued packets for an unresolved destination doesn't flood the
/// network with duplicate requests.
const PATH_REQUEST_MIN_INTERVAL_SECS: f64 = 5.0;

/// How many DATA packets are held per destination while a path is being
/// resolved, oldest dropped first once full.
const MAX_PENDING_PACKETS_PER_DESTINATION: usize = 8;

/// Rough on-wire size of a packet, used to budget the announce bandwidth
/// cap. Doesn't need to be exact, only proportionate.
fn estimate_packet_bytes(packet: &Packet) -> usize {
    2 + packet.destination.as_slice().len()
        + packet.transport.map(|hash| hash.as_slice().len()).unwrap_or(0)
        + 1
        + packet.data.as_slice().len()
}

/// An inbound frame handed off by an interface driver, tagged with the
/// interface it arrived on.
pub struct InboundFrame {
    pub interface: InterfaceId,
    pub bytes: Vec<u8>,
}

/// A mutation requested by application code holding a `Destination`/`Link`/
/// `Resource` handle, queued for the engine loop to apply.
pub enum EngineCommand {
    SendPacket { interface: InterfaceId, packet: Packet },
    RegisterInterface { handle: InterfaceHandle },
    RemoveInterface { interface: InterfaceId, done: oneshot::Sender<()> },
    Shutdown,
}

/// Owns all engine-wide tables and drives dispatch. Application code talks
/// to a running engine only through the `EngineCommand` sender it kept when
/// constructing the channels passed to `new`; the engine itself is moved
/// into a dedicated task by calling `tokio::spawn(engine.run())`.
pub struct TransportEngine {
    identity: PrivateIdentity,
    config: TransportConfig,
    interfaces: HashMap<InterfaceId, InterfaceHandle>,
    path_table: PathTable,
    announce_cache: AnnounceCache,
    link_table: LinkTable,
    links: HashMap<LinkId, Link>,
    /// Signing keys learned for other destinations, from their announces or
    /// via `register_known_identity`, used to verify LINK_PROOF signatures.
    destination_identities: HashMap<AddressHash, crate::identity::Identity>,
    /// DATA packets held for a destination with no known path yet, flushed
    /// once an announce resolves one.
    pending_data: HashMap<AddressHash, Vec<Packet>>,
    /// Last time a PATH_REQUEST was sent for a destination, for rate limiting.
    requested_paths: HashMap<AddressHash, f64>,
    /// The fixed address PATH_REQUEST packets are addressed to.
    path_request_destination: AddressHash,
    inbound_rx: mpsc::Receiver<InboundFrame>,
    command_rx: mpsc::Receiver<EngineCommand>,
}

impl TransportEngine {
    pub fn new(
        identity: PrivateIdentity,
        config: TransportConfig,
        inbound_rx: mpsc::Receiver<InboundFrame>,
        command_rx: mpsc::Receiver<EngineCommand>,
    ) -> Self {
        let path_request_destination = crate::destination::PlainInputDestination::new(
            crate::destination::DestinationName::new("rnstransport", "path.request"),
        )
        .desc
        .address_hash;

        Self {
            identity,
            config,
            interfaces: HashMap::new(),
            path_table: PathTable::new(),
            announce_cache: AnnounceCache::new(),
            link_table: LinkTable::new(),
            links: HashMap::new(),
            destination_identities: HashMap::new(),
            pending_data: HashMap::new(),
            requested_paths: HashMap::new(),
            path_request_destination,
            inbound_rx,
            command_rx,
        }
    }

    pub fn local_address(&self) -> AddressHash {
        self.identity.address_hash()
    }

    /// The local node's full public identity, e.g. to hand to a peer so it
    /// can `register_known_identity` it ahead of a link request.
    pub fn identity(&self) -> &crate::identity::Identity {
        self.identity.as_identity()
    }

    /// Records a destination's known signing key ahead of time, so a later
    /// LINK_PROOF addressed through it can be verified even if its announce
    /// hasn't been seen yet.
    pub fn register_known_identity(&mut self, identity: crate::identity::Identity) {
        self.destination_identities.insert(identity.address_hash(), identity);
    }

    /// Looks up the current best path to `destination`, if any.
    pub fn resolve_path(&self, destination: &AddressHash) -> Option<(AddressHash, InterfaceId, u8)> {
        self.path_table.resolve(destination)
    }

    /// Looks up the current lifecycle state of a link by its id.
    pub fn link_state(&self, link_id: &LinkId) -> Option<super::destination_ext::link::LinkState> {
        self.link_table.get(link_id).map(|entry| entry.state)
    }

    /// Processes one inbound frame synchronously, outside of `run`'s select
    /// loop. Exposed so embedding code (and tests) can drive the engine one
    /// step at a time instead of spawning the full `tokio` task.
    pub fn handle_inbound_frame(&mut self, frame: InboundFrame) {
        self.handle_inbound(frame);
    }

    /// Applies one engine command synchronously, outside of `run`'s select
    /// loop.
    pub fn apply_command(&mut self, command: EngineCommand) {
        self.handle_command(command);
    }

    /// Initiates a link to `destination` over `interface` as the requesting
    /// side: builds the LINK_REQUEST packet, tracks the link under the id
    /// derived from it (mirroring what the responder's `handle_link_request`
    /// will compute from the same packet), and sends it out. The returned id
    /// is what `link_state` and the eventual LINK_PROOF resolve against.
    pub fn initiate_link(
        &mut self,
        destination: AddressHash,
        interface: InterfaceId,
        signing_key: &ed25519_dalek::SigningKey,
    ) -> Result<LinkId, TransportError> {
        let (mut link, request_payload) =
            Link::initiate(self.config.link, signing_key, now_epoch_secs_i64() as f64, rand_core::OsRng);

        let mut data = crate::buffer::PacketDataBuffer::new();
        data.write(&request_payload).map_err(TransportError::Core)?;
        let packet = Packet {
            header: crate::packet::Header {
                ifac_flag: crate::packet::IfacFlag::Open,
                header_type: crate::packet::HeaderType::Type1,
                context_flag: false,
                propagation_type: crate::packet::PropagationType::Broadcast,
                destination_type: crate::packet::DestinationType::Single,
                packet_type: PacketType::LinkRequest,
                hops: 0,
            },
            ifac: None,
            destination,
            transport: None,
            context: crate::packet::PacketContext::None,
            data,
        };

        let link_id = LinkId::from(&packet);
        link.id = link_id;
        self.link_table.insert(
            link_id,
            super::link_table::LinkTableEntry {
                state: super::destination_ext::link::LinkState::Pending,
                next_hop_interface: Some(interface),
                prev_hop_interface: None,
                validated_at: None,
                expires_at: now_epoch_secs_i64() as f64 + self.config.link.establishment_timeout.as_secs_f64(),
                proof_material: None,
                destination,
            },
        );
        self.links.insert(link_id, link);
        self.send_packet_on(interface, &packet);
        Ok(link_id)
    }

    /// Announces a destination owned by this node: remembers the announce so
    /// an echo of it coming back in from a neighbor doesn't re-propagate, and
    /// queues it for transmission on every registered interface. Unlike
    /// `handle_announce`, there is no originating interface to exclude.
    pub fn originate_announce(&mut self, packet: Packet) {
        let hash = packet.packet_hash();
        let now = now_epoch_secs_i64() as f64;
        self.announce_cache.record(&hash, now);

        for handle in self.interfaces.values_mut() {
            handle.announce_queue.push(super::iface::AnnounceQueueEntry {
                packet: packet.clone(),
                destination_hash: packet.destination,
                hops: packet.header.hops,
                enqueued_at: now,
                retry_count: 0,
                priority: 1.0,
                ready_at: now,
            });
        }
    }

    /// The main select loop: inbound frames, a GC timer tick, and engine
    /// commands, until a `Shutdown` command or both channels close.
    pub async fn run(mut self) {
        let mut gc_tick = interval(Duration::from_secs(30));
        loop {
            tokio::select! {
                frame = self.inbound_rx.recv() => {
                    match frame {
                        Some(frame) => self.handle_inbound(frame),
                        None => break,
                    }
                }
                command = self.command_rx.recv() => {
                    match command {
                        Some(EngineCommand::Shutdown) | None => break,
                        Some(command) => self.handle_command(command),
                    }
                }
                _ = gc_tick.tick() => {
                    self.run_gc();
                }
            }
        }
    }

    fn handle_inbound(&mut self, frame: InboundFrame) {
        let bytes = match self.strip_and_verify_ifac(&frame) {
            Ok(bytes) => bytes,
            Err(err) => {
                if err.is_silent_drop() {
                    log::debug!(target: "rns_core::transport", "dropping frame: {err}");
                } else {
                    log::warn!(target: "rns_core::transport", "frame rejected: {err}");
                }
                return;
            }
        };

        use crate::serde::Deserialize;
        let packet = match Packet::deserialize(&bytes) {
            Ok((packet, _consumed)) => packet,
            Err(err) => {
                log::debug!(target: "rns_core::transport", "dropping malformed frame: {err}");
                return;
            }
        };

        if let Err(err) = self.dispatch(&packet, frame.interface) {
            if err.is_silent_drop() {
                log::debug!(target: "rns_core::transport", "silently dropping packet: {err}");
            } else {
                log::warn!(target: "rns_core::transport", "packet dispatch error: {err}");
            }
        }
    }

    /// Verifies and strips the per-interface Interface Access Code from an
    /// inbound frame before handing it to the wire codec. Frames without the
    /// authenticated-header bit set pass through untouched; an interface
    /// configured with an IFAC key rejects anything that isn't tagged with a
    /// matching code (including plaintext frames).
    fn strip_and_verify_ifac(&self, frame: &InboundFrame) -> Result<Vec<u8>, TransportError> {
        let bytes = &frame.bytes;
        if bytes.len() < 2 {
            return Err(TransportError::Core(crate::error::RnsError::PacketError));
        }
        let byte1 = bytes[0];
        let authenticated = byte1 & 0b1000_0000 != 0;

        let handle = self.interfaces.get(&frame.interface);
        let ifac_key = handle.and_then(|handle| handle.ifac.as_ref());

        match (authenticated, ifac_key) {
            (false, None) => Ok(bytes.clone()),
            (false, Some(_)) => Err(TransportError::IfacMismatch),
            (true, None) => Err(TransportError::IfacMismatch),
            (true, Some(key)) => {
                let tag_len = key.tag_len();
                if bytes.len() < 2 + tag_len {
                    return Err(TransportError::Core(crate::error::RnsError::PacketError));
                }
                let tag = &bytes[2..2 + tag_len];
                let rest = &bytes[2 + tag_len..];

                let mut verify_data = Vec::with_capacity(1 + rest.len());
                verify_data.push(byte1);
                verify_data.extend_from_slice(rest);
                if !key.verify(&verify_data, tag) {
                    return Err(TransportError::IfacMismatch);
                }

                let mut out = Vec::with_capacity(2 + rest.len());
                out.push(byte1);
                out.push(bytes[1]);
                out.extend_from_slice(rest);
                Ok(out)
            }
        }
    }

    fn dispatch(&mut self, packet: &Packet, from_interface: InterfaceId) -> Result<(), TransportError> {
        match packet.header.packet_type {
            PacketType::Announce => self.handle_announce(packet, from_interface),
            PacketType::LinkRequest => self.handle_link_request(packet, from_interface),
            PacketType::Proof => self.handle_proof(packet),
            PacketType::Data => self.handle_data(packet, from_interface),
        }
    }

    fn handle_announce(&mut self, packet: &Packet, from_interface: InterfaceId) -> Result<(), TransportError> {
        let hash = packet.packet_hash();
        if !self.announce_cache.record(&hash, now_epoch_secs_i64() as f64) {
            // A rebroadcast of an announce we've already propagated: no need
            // to propagate it again, but it does mean any retry we had
            // scheduled for it is no longer necessary.
            self.announce_cache.note_rebroadcast(&hash);
            return Ok(());
        }

        let info = crate::identity::Identity::validate_announce(packet).map_err(TransportError::Core)?;
        self.register_known_identity(info.destination.desc.identity);

        self.path_table.update(
            packet.destination,
            super::path_table::PathEntry {
                next_hop_identity_hash: packet.destination,
                via_interface: from_interface,
                hops: packet.header.hops,
                last_updated: now_epoch_secs_i64() as f64,
                expires_at: now_epoch_secs_i64() as f64
                    + self
                        .interfaces
                        .get(&from_interface)
                        .map(|handle| handle.mode.path_expiry().as_secs_f64())
                        .unwrap_or(86_400.0),
            },
        );

        self.flush_pending_data(&packet.destination);
        self.propagate_announce(packet, from_interface);
        Ok(())
    }

    /// Queues `packet` for re-broadcast on every interface that should hear
    /// it, gated to become eligible only after `base_delay^hops` seconds so
    /// nodes further from the origin don't all retransmit at once.
    fn propagate_announce(&mut self, packet: &Packet, from_interface: InterfaceId) {
        let Some(from_mode) = self.interfaces.get(&from_interface).map(|handle| handle.mode) else { return };
        let mut next_packet = packet.clone();
        next_packet.header.hops = next_packet.header.hops.saturating_add(1);

        let now = now_epoch_secs_i64() as f64;
        let delay = self.config.announce.base_delay.powf(next_packet.header.hops as f64);

        for (id, handle) in self.interfaces.iter_mut() {
            if *id == from_interface {
                continue;
            }
            if !handle.mode.propagates_from(from_mode) {
                continue;
            }
            handle.announce_queue.push(super::iface::AnnounceQueueEntry {
                packet: next_packet.clone(),
                destination_hash: next_packet.destination,
                hops: next_packet.header.hops,
                enqueued_at: now,
                retry_count: 0,
                priority: 1.0 / (next_packet.header.hops as f64 + 1.0),
                ready_at: now + delay,
            });
        }
    }

    fn handle_link_request(&mut self, packet: &Packet, from_interface: InterfaceId) -> Result<(), TransportError> {
        let link_id = LinkId::from(packet);
        if self.link_table.get(&link_id).is_some() {
            // Already known; a retransmitted request, not a new link.
            return Ok(());
        }
        let (link, responder_ephemeral) = Link::accept(
            self.config.link,
            link_id,
            packet.data.as_slice(),
            now_epoch_secs_i64() as f64,
            rand_core::OsRng,
        )
        .map_err(TransportError::Core)?;

        self.link_table.insert(
            link_id,
            super::link_table::LinkTableEntry {
                state: super::destination_ext::link::LinkState::Handshake,
                next_hop_interface: None,
                prev_hop_interface: Some(from_interface),
                validated_at: None,
                expires_at: now_epoch_secs_i64() as f64 + self.config.link.establishment_timeout.as_secs_f64(),
                proof_material: None,
                destination: packet.destination,
            },
        );
        self.links.insert(link_id, link);

        let proof_payload = build_link_proof_payload(&link_id, &responder_ephemeral, self.identity.sign_key());
        let mut data = crate::buffer::PacketDataBuffer::new();
        data.write(&proof_payload).map_err(TransportError::Core)?;
        let proof = Packet {
            header: crate::packet::Header {
                ifac_flag: crate::packet::IfacFlag::Open,
                header_type: crate::packet::HeaderType::Type1,
                context_flag: false,
                propagation_type: crate::packet::PropagationType::Broadcast,
                destination_type: crate::packet::DestinationType::Single,
                packet_type: PacketType::Proof,
                hops: 0,
            },
            ifac: None,
            destination: link_id.0,
            transport: None,
            context: crate::packet::PacketContext::LinkProof,
            data,
        };
        self.send_packet_on(from_interface, &proof);
        Ok(())
    }

    fn handle_proof(&mut self, packet: &Packet) -> Result<(), TransportError> {
        // A LINK_PROOF addresses the link directly by id rather than
        // carrying request payload bytes to re-derive one from.
        let link_id = LinkId(packet.destination);
        let Some(destination) = self.link_table.get(&link_id).map(|entry| entry.destination) else {
            return Err(TransportError::UnknownDestination);
        };
        let expected_signing_key = self
            .destination_identities
            .get(&destination)
            .map(|identity| identity.verifying_key)
            .ok_or(TransportError::UnknownDestination)?;

        let responder_public = parse_link_proof_payload(&link_id, packet.data.as_slice(), &expected_signing_key)
            .map_err(TransportError::Core)?;

        let Some(link) = self.links.get_mut(&link_id) else {
            return Err(TransportError::UnknownDestination);
        };
        link.complete_handshake(&responder_public, now_epoch_secs_i64() as f64).map_err(TransportError::Core)?;

        if let Some(entry) = self.link_table.get_mut(&link_id) {
            entry.state = super::destination_ext::link::LinkState::Active;
            entry.validated_at = Some(now_epoch_secs_i64() as f64);
        }
        Ok(())
    }

    /// Forwards a resolvable DATA packet on towards its destination,
    /// promoting it to a Type2/Transport packet per hop. An unresolvable
    /// destination is queued and a PATH_REQUEST is issued; a PATH_REQUEST
    /// packet addressed to this node's well-known path-request destination
    /// is handled separately.
    fn handle_data(&mut self, packet: &Packet, from_interface: InterfaceId) -> Result<(), TransportError> {
        if packet.destination == self.local_address() {
            return Ok(());
        }

        if packet.context == PacketContext::PathRequest && packet.destination == self.path_request_destination {
            return self.handle_path_request(packet, from_interface);
        }

        match self.path_table.resolve(&packet.destination) {
            Some((next_hop, via_interface, _hops)) => {
                if via_interface == from_interface {
                    // Forwarding back out the interface it arrived on would
                    // just bounce it; drop.
                    return Ok(());
                }
                if packet.header.hops >= crate::packet::MAX_FORWARD_HOPS {
                    return Err(TransportError::Core(crate::error::RnsError::PacketError));
                }
                let forwarded = Packet {
                    header: crate::packet::Header {
                        ifac_flag: packet.header.ifac_flag,
                        header_type: crate::packet::HeaderType::Type2,
                        context_flag: packet.header.context_flag,
                        propagation_type: crate::packet::PropagationType::Transport,
                        destination_type: packet.header.destination_type,
                        packet_type: packet.header.packet_type,
                        hops: packet.header.hops.saturating_add(1),
                    },
                    ifac: None,
                    destination: packet.destination,
                    transport: Some(next_hop),
                    context: packet.context,
                    data: packet.data.clone(),
                };
                self.send_packet_on(via_interface, &forwarded);
                Ok(())
            }
            None => {
                self.queue_pending_data(packet.destination, packet.clone());
                self.request_path(packet.destination);
                Ok(())
            }
        }
    }

    /// Holds a DATA packet for a destination with no known path, oldest
    /// dropped first once the per-destination cap is reached.
    fn queue_pending_data(&mut self, destination: AddressHash, packet: Packet) {
        let queue = self.pending_data.entry(destination).or_default();
        if queue.len() >= MAX_PENDING_PACKETS_PER_DESTINATION {
            queue.remove(0);
        }
        queue.push(packet);
    }

    /// Replays any DATA packets queued for `destination` now that a path to
    /// it has just been learned.
    fn flush_pending_data(&mut self, destination: &AddressHash) {
        let Some(packets) = self.pending_data.remove(destination) else { return };
        for packet in packets {
            let _ = self.handle_data(&packet, InterfaceId(u32::MAX));
        }
    }

    /// Broadcasts a PATH_REQUEST for `destination` on every registered
    /// interface, rate-limited so a burst of packets for the same
    /// unresolved destination doesn't flood the network with duplicates.
    fn request_path(&mut self, destination: AddressHash) {
        let now = now_epoch_secs_i64() as f64;
        if let Some(last) = self.requested_paths.get(&destination) {
            if now - last < PATH_REQUEST_MIN_INTERVAL_SECS {
                return;
            }
        }
        self.requested_paths.insert(destination, now);

        let mut data = crate::buffer::PacketDataBuffer::new();
        if data.write(destination.as_slice()).is_err() {
            return;
        }
        let packet = Packet {
            header: crate::packet::Header {
                ifac_flag: crate::packet::IfacFlag::Open,
                header_type: crate::packet::HeaderType::Type1,
                context_flag: false,
                propagation_type: crate::packet::PropagationType::Broadcast,
                destination_type: crate::packet::DestinationType::Plain,
                packet_type: PacketType::Data,
                hops: 0,
            },
            ifac: None,
            destination: self.path_request_destination,
            transport: None,
            context: PacketContext::PathRequest,
            data,
        };

        let interfaces: Vec<InterfaceId> = self.interfaces.keys().copied().collect();
        for interface in interfaces {
            self.send_packet_on(interface, &packet);
        }
    }

    /// Handles an inbound PATH_REQUEST: if this node knows a path to the
    /// queried destination, forwards the request on towards it so the
    /// owning node (or a closer hop) can respond; otherwise drops it.
    fn handle_path_request(&mut self, packet: &Packet, from_interface: InterfaceId) -> Result<(), TransportError> {
        let payload = packet.data.as_slice();
        if payload.len() < crate::hash::ADDRESS_HASH_LENGTH {
            return Err(TransportError::Core(crate::error::RnsError::PacketError));
        }
        let mut queried_bytes = [0u8; crate::hash::ADDRESS_HASH_LENGTH];
        queried_bytes.copy_from_slice(&payload[..crate::hash::ADDRESS_HASH_LENGTH]);
        let queried = AddressHash::new(queried_bytes);

        if queried == self.local_address() {
            return Ok(());
        }

        if let Some((next_hop, via_interface, _hops)) = self.path_table.resolve(&queried) {
            if via_interface != from_interface {
                let mut forwarded = packet.clone();
                forwarded.transport = Some(next_hop);
                self.send_packet_on(via_interface, &forwarded);
            }
        }
        Ok(())
    }

    fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::SendPacket { interface, packet } => self.send_packet_on(interface, &packet),
            EngineCommand::RegisterInterface { handle } => {
                self.interfaces.insert(handle.id, handle);
            }
            EngineCommand::RemoveInterface { interface, done } => {
                self.interfaces.remove(&interface);
                let _ = done.send(());
            }
            EngineCommand::Shutdown => {}
        }
    }

    /// Tags the packet with the interface's Interface Access Code (if one is
    /// configured) and hands the serialized frame to the driver.
    fn send_packet_on(&self, interface: InterfaceId, packet: &Packet) {
        let Some(handle) = self.interfaces.get(&interface) else { return };
        let mut packet = packet.clone();

        if let Some(key) = &handle.ifac {
            packet.header.ifac_flag = crate::packet::IfacFlag::Authenticated;
            let byte1 = packet.header.to_meta();

            let mut tail = Vec::new();
            tail.extend_from_slice(packet.destination.as_slice());
            if let Some(transport) = &packet.transport {
                tail.extend_from_slice(transport.as_slice());
            }
            tail.push(packet.context as u8);
            tail.extend_from_slice(packet.data.as_slice());

            let mut sign_input = Vec::with_capacity(1 + tail.len());
            sign_input.push(byte1);
            sign_input.extend_from_slice(&tail);
            packet.ifac = Some(crate::buffer::PacketDataBuffer::from(key.sign(&sign_input).as_slice()));
        }

        let mut buf = [0u8; crate::packet::MAX_PAYLOAD_LENGTH + 128];
        let mut out = crate::buffer::OutputBuffer::new(&mut buf);
        if crate::serde::Serialize::serialize(&packet, &mut out).is_ok() {
            handle.driver.send(out.as_slice());
        }
    }

    /// Sends every ready, within-budget announce currently queued for
    /// `interface`, highest priority first. An entry whose `ready_at` hasn't
    /// arrived yet, or that would exceed the interface's announce bandwidth
    /// cap for this tick, is put back for a later call. A sent re-broadcast
    /// (`hops > 0`) is re-queued once more as a retry unless a rebroadcast of
    /// the same announce is later heard from someone else.
    pub fn flush_announce_queue(&mut self, interface: InterfaceId) -> usize {
        let now = now_epoch_secs_i64() as f64;
        let cap_fraction = self.config.announce.announce_cap_fraction;
        let budget = self
            .interfaces
            .get(&interface)
            .map(|handle| handle.announce_cap_bytes_per_sec(cap_fraction) * GC_TICK_SECS);

        let mut sent = 0usize;
        let mut bytes_sent = 0usize;
        let mut deferred = Vec::new();
        let mut retries = Vec::new();

        loop {
            let Some(handle) = self.interfaces.get_mut(&interface) else { break };
            let Some(entry) = handle.announce_queue.pop() else { break };

            if entry.ready_at > now {
                deferred.push(entry);
                continue;
            }

            let hash = entry.packet.packet_hash();
            if entry.retry_count > 0 && self.announce_cache.was_rebroadcast(&hash) {
                // Someone else already re-broadcast this; the retry is moot.
                continue;
            }

            let packet_bytes = estimate_packet_bytes(&entry.packet);
            if let Some(budget) = budget {
                if (bytes_sent + packet_bytes) as f64 > budget {
                    deferred.push(entry);
                    continue;
                }
            }

            self.send_packet_on(interface, &entry.packet);
            sent += 1;
            bytes_sent += packet_bytes;

            if entry.hops > 0 && entry.retry_count < self.config.announce.max_retries {
                retries.push(super::iface::AnnounceQueueEntry {
                    enqueued_at: now,
                    retry_count: entry.retry_count + 1,
                    ready_at: now + self.config.announce.rebroadcast_grace,
                    ..entry
                });
            }
        }

        if let Some(handle) = self.interfaces.get_mut(&interface) {
            for entry in deferred.into_iter().chain(retries) {
                handle.announce_queue.push(entry);
            }
        }

        sent
    }

    fn flush_all_announce_queues(&mut self) {
        let interfaces: Vec<InterfaceId> = self.interfaces.keys().copied().collect();
        for interface in interfaces {
            self.flush_announce_queue(interface);
        }
    }

    fn run_gc(&mut self) {
        let now = now_epoch_secs_i64() as f64;
        self.path_table.expire(now);
        self.link_table.expire(now);
        self.announce_cache.expire(now, 60.0 * 15.0);
        self.flush_all_announce_queues();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    fn test_engine() -> (TransportEngine, mpsc::Sender<InboundFrame>, mpsc::Sender<EngineCommand>) {
        let identity = PrivateIdentity::new_from_rand(OsRng);
        let (inbound_tx, inbound_rx) = mpsc::channel(16);
        let (command_tx, command_rx) = mpsc::channel(16);
        let engine = TransportEngine::new(identity, TransportConfig::default(), inbound_rx, command_rx);
        (engine, inbound_tx, command_tx)
    }

    #[tokio::test]
    async fn malformed_frame_is_dropped_without_panicking() {
        let (mut engine, _inbound_tx, _command_tx) = test_engine();
        engine.handle_inbound(InboundFrame { interface: InterfaceId(0), bytes: vec![0xFFu8; 1] });
    }

    #[tokio::test]
    async fn engine_shuts_down_cleanly_on_command() {
        let (engine, _inbound_tx, command_tx) = test_engine();
        let handle = tokio::spawn(engine.run());
        command_tx.send(EngineCommand::Shutdown).await.expect("send shutdown");
        handle.await.expect("engine task");
    }

    fn register_in_memory(
        engine: &mut TransportEngine,
        id: u32,
        mode: super::super::iface::InterfaceMode,
        ifac: Option<crate::crypt::ifac::IfacKey>,
    ) -> std::sync::Arc<super::super::iface::InMemoryInterface> {
        let driver = std::sync::Arc::new(super::super::iface::InMemoryInterface::new(mode));
        engine.apply_command(EngineCommand::RegisterInterface {
            handle: InterfaceHandle {
                id: InterfaceId(id),
                name: format!("if{id}"),
                mode,
                driver: driver.clone(),
                ifac,
                announce_queue: super::super::iface::AnnounceQueue::new(),
            },
        });
        driver
    }

    #[tokio::test]
    async fn mismatched_ifac_passphrase_drops_the_frame_silently() {
        use crate::crypt::ifac::{IfacConfig, IfacKey};

        let (mut sender, _rx1, _rx2) = test_engine();
        let (mut receiver, _rx3, _rx4) = test_engine();

        let alpha = IfacKey::derive(&IfacConfig::new(Some("mesh"), Some("alpha"), 64)).expect("derive alpha");
        let beta = IfacKey::derive(&IfacConfig::new(Some("mesh"), Some("beta"), 64)).expect("derive beta");

        let sender_driver = register_in_memory(&mut sender, 1, super::super::iface::InterfaceMode::Full, Some(alpha));
        register_in_memory(&mut receiver, 1, super::super::iface::InterfaceMode::Full, Some(beta));

        let announce = crate::destination::new_in(PrivateIdentity::new_from_rand(OsRng), "app", "aspect");
        let packet = announce.announce(OsRng, None).expect("announce");
        let destination = packet.destination;

        sender.send_packet_on(InterfaceId(1), &packet);
        let frame_bytes = sender_driver.drain_sent().pop().expect("frame sent");

        receiver.handle_inbound_frame(InboundFrame { interface: InterfaceId(1), bytes: frame_bytes });
        assert!(receiver.resolve_path(&destination).is_none());
    }

    #[tokio::test]
    async fn matching_ifac_passphrase_is_accepted() {
        use crate::crypt::ifac::{IfacConfig, IfacKey};

        let (mut sender, _rx1, _rx2) = test_engine();
        let (mut receiver, _rx3, _rx4) = test_engine();

        let key = || IfacKey::derive(&IfacConfig::new(Some("mesh"), Some("alpha"), 64)).expect("derive");
        let sender_driver = register_in_memory(&mut sender, 1, super::super::iface::InterfaceMode::Full, Some(key()));
        register_in_memory(&mut receiver, 1, super::super::iface::InterfaceMode::Full, Some(key()));

        let announce = crate::destination::new_in(PrivateIdentity::new_from_rand(OsRng), "app", "aspect");
        let packet = announce.announce(OsRng, None).expect("announce");
        let destination = packet.destination;

        sender.send_packet_on(InterfaceId(1), &packet);
        let frame_bytes = sender_driver.drain_sent().pop().expect("frame sent");

        receiver.handle_inbound_frame(InboundFrame { interface: InterfaceId(1), bytes: frame_bytes });
        assert!(receiver.resolve_path(&destination).is_some());
    }

    #[tokio::test]
    async fn originated_announce_is_queued_on_every_interface_and_flushes_out() {
        let (mut engine, _rx1, _rx2) = test_engine();
        let to_a = register_in_memory(&mut engine, 1, super::super::iface::InterfaceMode::Full, None);
        let to_b = register_in_memory(&mut engine, 2, super::super::iface::InterfaceMode::Full, None);

        let announce = crate::destination::new_in(PrivateIdentity::new_from_rand(OsRng), "app", "aspect");
        let packet = announce.announce(OsRng, None).expect("announce");
        engine.originate_announce(packet);

        assert_eq!(engine.flush_announce_queue(InterfaceId(1)), 1);
        assert_eq!(engine.flush_announce_queue(InterfaceId(2)), 1);
        assert_eq!(to_a.drain_sent().len(), 1);
        assert_eq!(to_b.drain_sent().len(), 1);
    }
}
