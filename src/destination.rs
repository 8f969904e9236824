//! Destinations: named, reachable endpoints bound to an identity (or none,
//! for PLAIN) plus a dot-joined aspect path. Modeled as `Destination<I, D,
//! T>`, phantom-tagged on direction (`Input`/`Output`) and type
//! (`Single`/`Plain`/`Group`), so the encrypt/decrypt/announce method table
//! is resolved at compile time instead of through a runtime tag.

use alloc::vec::Vec;
use core::fmt;
use core::marker::PhantomData;

use ed25519_dalek::{Signature, SigningKey, VerifyingKey, SIGNATURE_LENGTH};
use rand_core::{CryptoRngCore, OsRng};
use sha2::Digest;
use x25519_dalek::PublicKey;

use crate::buffer::PacketDataBuffer;
use crate::crypt::fernet::{Fernet, PlainText, Token};
use crate::error::RnsError;
use crate::hash::{AddressHash, Hash};
use crate::identity::{EmptyIdentity, HashIdentity, Identity, PrivateIdentity, PUBLIC_KEY_LENGTH};
use crate::packet::{self, DestinationType, Header, HeaderType, IfacFlag, Packet, PacketContext, PropagationType};

pub trait Direction {}

pub struct Input;
pub struct Output;

impl Direction for Input {}
impl Direction for Output {}

pub trait Type {
    fn destination_type() -> DestinationType;
}

pub struct Single;
pub struct Plain;
pub struct Group;

impl Type for Single {
    fn destination_type() -> DestinationType {
        DestinationType::Single
    }
}

impl Type for Plain {
    fn destination_type() -> DestinationType {
        DestinationType::Plain
    }
}

impl Type for Group {
    fn destination_type() -> DestinationType {
        DestinationType::Group
    }
}

/// A GROUP destination's pre-shared 16-byte key, treated as its
/// `HashIdentity` contribution so two groups with identical aspects but
/// different keys still get different destination hashes.
#[derive(Clone, Copy)]
pub struct GroupKey(pub [u8; 16]);

impl HashIdentity for GroupKey {
    fn as_address_hash_slice(&self) -> &[u8] {
        &self.0
    }
}

/// Symmetric encryption for GROUP destinations: same Fernet token format as
/// SINGLE, but keyed directly by the pre-shared key instead of an ECDH
/// derivation.
pub fn group_encrypt(key: &[u8; 16], data: &[u8]) -> Result<Vec<u8>, RnsError> {
    let fernet = Fernet::new_from_slices(key, key, OsRng);
    let mut out_buf = alloc::vec![0u8; data.len() + 64];
    let token = fernet.encrypt(PlainText::from(data), &mut out_buf)?;
    Ok(token.as_bytes().to_vec())
}

pub fn group_decrypt(key: &[u8; 16], data: &[u8]) -> Result<Vec<u8>, RnsError> {
    let fernet = Fernet::new_from_slices(key, key, OsRng);
    let token = Token::from(data);
    let verified = fernet.verify(token)?;
    let mut out_buf = alloc::vec![0u8; data.len()];
    let plaintext = fernet.decrypt(verified, &mut out_buf)?;
    Ok(plaintext.as_bytes().to_vec())
}

pub const NAME_HASH_LENGTH: usize = 10;
pub const RAND_HASH_LENGTH: usize = 10;
pub const RATCHET_LENGTH: usize = PUBLIC_KEY_LENGTH;
pub const MIN_ANNOUNCE_DATA_LENGTH: usize =
    PUBLIC_KEY_LENGTH * 2 + NAME_HASH_LENGTH + RAND_HASH_LENGTH + SIGNATURE_LENGTH;

/// `app_name.aspect1.aspect2...` hashed, as both a full 32-byte digest (for
/// display/debugging) and the 10-byte prefix carried on the wire.
#[derive(Copy, Clone)]
pub struct DestinationName {
    pub hash: Hash,
}

impl DestinationName {
    pub fn new(app_name: &str, aspects: &str) -> Self {
        let hash = Hash::new(
            Hash::generator()
                .chain_update(app_name.as_bytes())
                .chain_update(".".as_bytes())
                .chain_update(aspects.as_bytes())
                .finalize()
                .into(),
        );
        Self { hash }
    }

    pub fn new_from_hash_slice(hash_slice: &[u8]) -> Self {
        let mut hash = [0u8; 32];
        hash[..hash_slice.len()].copy_from_slice(hash_slice);
        Self { hash: Hash::new(hash) }
    }

    pub fn as_name_hash_slice(&self) -> &[u8] {
        &self.hash.as_slice()[..NAME_HASH_LENGTH]
    }
}

#[derive(Copy, Clone)]
pub struct DestinationDesc {
    pub identity: Identity,
    pub address_hash: AddressHash,
    pub name: DestinationName,
}

impl fmt::Display for DestinationDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address_hash)
    }
}

pub type DestinationAnnounce = Packet;

pub struct AnnounceInfo<'a> {
    pub destination: SingleOutputDestination,
    pub app_data: &'a [u8],
    pub ratchet: Option<[u8; RATCHET_LENGTH]>,
}

impl DestinationAnnounce {
    /// Validates an ANNOUNCE packet: checks the embedded Ed25519 signature,
    /// and that the identity derived from the embedded public keys matches
    /// the packet's addressed destination hash (the hash-collision defense
    /// from the announce propagation algorithm, step 3).
    pub fn validate(packet: &Packet) -> Result<AnnounceInfo<'_>, RnsError> {
        if packet.header.packet_type != packet::PacketType::Announce {
            return Err(RnsError::PacketError);
        }

        let announce_data = packet.data.as_slice();

        if announce_data.len() < MIN_ANNOUNCE_DATA_LENGTH {
            return Err(RnsError::OutOfMemory);
        }

        let mut offset = 0usize;

        let public_key = {
            let mut key_data = [0u8; PUBLIC_KEY_LENGTH];
            key_data.copy_from_slice(&announce_data[offset..(offset + PUBLIC_KEY_LENGTH)]);
            offset += PUBLIC_KEY_LENGTH;
            PublicKey::from(key_data)
        };

        let verifying_key = {
            let mut key_data = [0u8; PUBLIC_KEY_LENGTH];
            key_data.copy_from_slice(&announce_data[offset..(offset + PUBLIC_KEY_LENGTH)]);
            offset += PUBLIC_KEY_LENGTH;
            VerifyingKey::from_bytes(&key_data).map_err(|_| RnsError::CryptoError)?
        };

        let identity = Identity::new(public_key, verifying_key);

        let name_hash = &announce_data[offset..(offset + NAME_HASH_LENGTH)];
        offset += NAME_HASH_LENGTH;
        let rand_hash = &announce_data[offset..(offset + RAND_HASH_LENGTH)];
        offset += RAND_HASH_LENGTH;

        let destination = &packet.destination;
        let expected_hash =
            create_address_hash(&identity, &DestinationName::new_from_hash_slice(name_hash));
        if expected_hash != *destination {
            return Err(RnsError::IncorrectHash);
        }

        let verify_announce = |ratchet: Option<&[u8]>,
                                signature: &[u8],
                                app_data: &[u8]|
         -> Result<(), RnsError> {
            let mut signed_data = PacketDataBuffer::new();
            signed_data
                .chain_write(destination.as_slice())?
                .chain_write(public_key.as_bytes())?
                .chain_write(verifying_key.as_bytes())?
                .chain_write(name_hash)?
                .chain_write(rand_hash)?;
            if let Some(ratchet) = ratchet {
                signed_data.chain_write(ratchet)?;
            }
            if !app_data.is_empty() {
                signed_data.chain_write(app_data)?;
            }
            let signature = Signature::from_slice(signature).map_err(|_| RnsError::CryptoError)?;
            identity.verify(signed_data.as_slice(), &signature).map_err(|_| RnsError::IncorrectSignature)
        };

        let remaining = announce_data.len().saturating_sub(offset);
        if remaining < SIGNATURE_LENGTH {
            return Err(RnsError::OutOfMemory);
        }

        if remaining >= SIGNATURE_LENGTH + RATCHET_LENGTH {
            let ratchet = &announce_data[offset..offset + RATCHET_LENGTH];
            let sig_start = offset + RATCHET_LENGTH;
            let sig_end = sig_start + SIGNATURE_LENGTH;
            let signature = &announce_data[sig_start..sig_end];
            let app_data = &announce_data[sig_end..];
            if verify_announce(Some(ratchet), signature, app_data).is_ok() {
                let mut ratchet_bytes = [0u8; RATCHET_LENGTH];
                ratchet_bytes.copy_from_slice(ratchet);
                return Ok(AnnounceInfo {
                    destination: SingleOutputDestination::new(
                        identity,
                        DestinationName::new_from_hash_slice(name_hash),
                    ),
                    app_data,
                    ratchet: Some(ratchet_bytes),
                });
            }
        }

        let signature = &announce_data[offset..(offset + SIGNATURE_LENGTH)];
        let app_data = &announce_data[(offset + SIGNATURE_LENGTH)..];
        verify_announce(None, signature, app_data)?;

        Ok(AnnounceInfo {
            destination: SingleOutputDestination::new(
                identity,
                DestinationName::new_from_hash_slice(name_hash),
            ),
            app_data,
            ratchet: None,
        })
    }
}

pub struct Destination<I: HashIdentity, D: Direction, T: Type> {
    pub direction: PhantomData<D>,
    pub r#type: PhantomData<T>,
    pub identity: I,
    pub desc: DestinationDesc,
}

impl<I: HashIdentity, D: Direction, T: Type> Destination<I, D, T> {
    pub fn destination_type(&self) -> DestinationType {
        <T as Type>::destination_type()
    }
}

pub enum DestinationHandleStatus {
    None,
    LinkProof,
}

impl Destination<PrivateIdentity, Input, Single> {
    pub fn new(identity: PrivateIdentity, name: DestinationName) -> Self {
        let address_hash = create_address_hash(&identity, &name);
        let pub_identity = *identity.as_identity();
        Self {
            direction: PhantomData,
            r#type: PhantomData,
            identity,
            desc: DestinationDesc { identity: pub_identity, name, address_hash },
        }
    }

    /// Emits an ANNOUNCE packet: signs `(dest_hash || pub_key || verifying_key
    /// || name_hash || rand_hash [|| ratchet] [|| app_data])`, then packs the
    /// unsigned preimage's tail (everything but the destination hash) as the
    /// wire payload.
    pub fn announce<R: CryptoRngCore + Copy>(
        &self,
        rng: R,
        app_data: Option<&[u8]>,
    ) -> Result<Packet, RnsError> {
        let mut packet_data = PacketDataBuffer::new();

        let rand_hash = Hash::new_from_rand(rng);
        let rand_hash = &rand_hash.as_slice()[..RAND_HASH_LENGTH];

        let pub_key = self.identity.as_identity().public_key_bytes();
        let verifying_key = self.identity.as_identity().verifying_key_bytes();

        packet_data
            .chain_safe_write(self.desc.address_hash.as_slice())
            .chain_safe_write(pub_key)
            .chain_safe_write(verifying_key)
            .chain_safe_write(self.desc.name.as_name_hash_slice())
            .chain_safe_write(rand_hash);

        if let Some(data) = app_data {
            packet_data.write(data)?;
        }

        let signature = self.identity.sign(packet_data.as_slice());

        packet_data.reset();
        packet_data
            .chain_safe_write(pub_key)
            .chain_safe_write(verifying_key)
            .chain_safe_write(self.desc.name.as_name_hash_slice())
            .chain_safe_write(rand_hash)
            .chain_safe_write(&signature.to_bytes());

        if let Some(data) = app_data {
            packet_data.write(data)?;
        }

        Ok(Packet {
            header: Header {
                ifac_flag: IfacFlag::Open,
                header_type: HeaderType::Type1,
                context_flag: false,
                propagation_type: PropagationType::Broadcast,
                destination_type: DestinationType::Single,
                packet_type: packet::PacketType::Announce,
                hops: 0,
            },
            ifac: None,
            destination: self.desc.address_hash,
            transport: None,
            context: PacketContext::None,
            data: packet_data,
        })
    }

    /// Same payload as `announce`, but tagged as a response to a PATH_REQUEST
    /// rather than an unsolicited propagation.
    pub fn path_response<R: CryptoRngCore + Copy>(
        &self,
        rng: R,
        app_data: Option<&[u8]>,
    ) -> Result<Packet, RnsError> {
        let mut response = self.announce(rng, app_data)?;
        response.context = PacketContext::PathResponse;
        Ok(response)
    }

    /// Routes an inbound packet addressed to this destination. Link requests
    /// are handed to the caller (who owns the link table) as a "please prove"
    /// signal; everything else not addressed here is ignored.
    pub fn handle_packet(&self, packet: &Packet) -> DestinationHandleStatus {
        if self.desc.address_hash != packet.destination {
            return DestinationHandleStatus::None;
        }
        if packet.header.packet_type == packet::PacketType::LinkRequest {
            return DestinationHandleStatus::LinkProof;
        }
        DestinationHandleStatus::None
    }

    pub fn sign_key(&self) -> &SigningKey {
        self.identity.sign_key()
    }
}

impl Destination<Identity, Output, Single> {
    pub fn new(identity: Identity, name: DestinationName) -> Self {
        let address_hash = create_address_hash(&identity, &name);
        Self {
            direction: PhantomData,
            r#type: PhantomData,
            identity,
            desc: DestinationDesc { identity, name, address_hash },
        }
    }

    /// Encrypts for this destination's identity (per-packet asymmetric
    /// encryption via ephemeral ECDH).
    pub fn encrypt<R: CryptoRngCore + Copy>(&self, rng: R, plaintext: &[u8]) -> Result<Vec<u8>, RnsError> {
        self.identity.encrypt_for(rng, plaintext)
    }
}

impl<D: Direction> Destination<EmptyIdentity, D, Plain> {
    pub fn new(name: DestinationName) -> Self {
        let address_hash = create_address_hash(&EmptyIdentity, &name);
        Self {
            direction: PhantomData,
            r#type: PhantomData,
            identity: EmptyIdentity,
            desc: DestinationDesc { identity: Identity::placeholder(), name, address_hash },
        }
    }
}

impl<D: Direction> Destination<GroupKey, D, Group> {
    pub fn new(key: [u8; 16], name: DestinationName) -> Self {
        let group_key = GroupKey(key);
        let address_hash = create_address_hash(&group_key, &name);
        Self {
            direction: PhantomData,
            r#type: PhantomData,
            identity: group_key,
            desc: DestinationDesc { identity: Identity::placeholder(), name, address_hash },
        }
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, RnsError> {
        group_encrypt(&self.identity.0, plaintext)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, RnsError> {
        group_decrypt(&self.identity.0, ciphertext)
    }
}

fn create_address_hash<I: HashIdentity>(identity: &I, name: &DestinationName) -> AddressHash {
    AddressHash::new_from_hash(&Hash::new(
        Hash::generator()
            .chain_update(name.as_name_hash_slice())
            .chain_update(identity.as_address_hash_slice())
            .finalize()
            .into(),
    ))
}

pub type SingleInputDestination = Destination<PrivateIdentity, Input, Single>;
pub type SingleOutputDestination = Destination<Identity, Output, Single>;
pub type PlainInputDestination = Destination<EmptyIdentity, Input, Plain>;
pub type PlainOutputDestination = Destination<EmptyIdentity, Output, Plain>;
pub type GroupOutputDestination = Destination<GroupKey, Output, Group>;

pub fn new_in(identity: PrivateIdentity, app_name: &str, aspect: &str) -> SingleInputDestination {
    SingleInputDestination::new(identity, DestinationName::new(app_name, aspect))
}

pub fn new_out(identity: Identity, app_name: &str, aspect: &str) -> SingleOutputDestination {
    SingleOutputDestination::new(identity, DestinationName::new(app_name, aspect))
}
