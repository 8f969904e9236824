//! Link establishment and operation: a forward-secret channel between two
//! destinations, built on an ephemeral X25519 exchange authenticated by the
//! initiator's signing key, with per-direction ratcheting traffic keys.

pub mod id;

pub use id::LinkId;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use rand_core::CryptoRngCore;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::crypt::fernet::{Fernet, PlainText, Token, AES_KEY_SIZE};
use crate::error::RnsError;
use crate::hash::Hash;
use crate::identity::PUBLIC_KEY_LENGTH;

use super::super::config::LinkConfig;

const HKDF_INFO_I2R: &[u8] = b"initiator->responder";
const HKDF_INFO_R2I: &[u8] = b"responder->initiator";

/// Ed25519 signature length, as encoded in a LINK_REQUEST payload.
const SIGNATURE_LENGTH: usize = 64;

/// Length of the trailing key-and-proof material a LINK_REQUEST payload
/// carries (ephemeral public key, verifying key, and a self-signature over
/// the ephemeral key). `LinkId::from` trims exactly this many trailing bytes
/// so two LINK_REQUEST retransmits that differ only in key material still
/// hash to the same id.
pub const LINK_REQUEST_TRAILER_LEN: usize = PUBLIC_KEY_LENGTH * 2 + SIGNATURE_LENGTH;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRole {
    Initiator,
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Pending,
    Handshake,
    Active,
    Stale,
    Closed,
}

/// One direction's traffic key: a sign key and an encrypt key for the
/// Fernet token, derived from the shared secret and ratcheted forward on
/// every packet sent in that direction.
#[derive(Clone)]
struct DirectionalKey {
    sign_key: [u8; AES_KEY_SIZE],
    enc_key: [u8; AES_KEY_SIZE],
}

fn hkdf_expand_pair(shared_secret: &[u8], info: &[u8]) -> Result<DirectionalKey, RnsError> {
    let hk = Hkdf::<Sha256>::new(None, shared_secret);
    let mut okm = [0u8; 2 * AES_KEY_SIZE];
    hk.expand(info, &mut okm).map_err(|_| RnsError::CryptoError)?;
    let mut sign_key = [0u8; AES_KEY_SIZE];
    let mut enc_key = [0u8; AES_KEY_SIZE];
    sign_key.copy_from_slice(&okm[..AES_KEY_SIZE]);
    enc_key.copy_from_slice(&okm[AES_KEY_SIZE..]);
    Ok(DirectionalKey { sign_key, enc_key })
}

/// Advances a ratchet: `HKDF-SHA-256(ikm = previous_key || packet_hash)`,
/// producing a fresh sign/enc pair for the next packet in that direction.
fn advance_ratchet(previous: &DirectionalKey, packet_hash: &Hash) -> Result<DirectionalKey, RnsError> {
    let mut ikm = alloc::vec::Vec::with_capacity(2 * AES_KEY_SIZE + 32);
    ikm.extend_from_slice(&previous.sign_key);
    ikm.extend_from_slice(&previous.enc_key);
    ikm.extend_from_slice(packet_hash.as_slice());
    hkdf_expand_pair(&ikm, b"reticulum-link-ratchet")
}

/// Builds the payload carried in a LINK_REQUEST packet: the initiator's
/// ephemeral X25519 public key, its Ed25519 verifying key, and a signature
/// over the ephemeral key proving the initiator holds the matching signing
/// key. The trailing `LINK_REQUEST_TRAILER_LEN` bytes are exactly what
/// `LinkId::from` trims when computing the link id, so a retransmitted
/// request with fresh key material still lands on the same id.
pub fn build_link_request_payload(ephemeral_public: &PublicKey, signing_key: &SigningKey) -> alloc::vec::Vec<u8> {
    let verifying_key = signing_key.verifying_key();
    let signature = signing_key.sign(ephemeral_public.as_bytes());

    let mut payload = alloc::vec::Vec::with_capacity(LINK_REQUEST_TRAILER_LEN);
    payload.extend_from_slice(ephemeral_public.as_bytes());
    payload.extend_from_slice(verifying_key.as_bytes());
    payload.extend_from_slice(&signature.to_bytes());
    payload
}

/// Parses and authenticates a LINK_REQUEST payload: rejects it unless the
/// embedded signature verifies against the embedded verifying key, proving
/// the initiator controls the private key matching the identity it claims.
fn parse_link_request_payload(payload: &[u8]) -> Result<(PublicKey, VerifyingKey), RnsError> {
    if payload.len() < LINK_REQUEST_TRAILER_LEN {
        return Err(RnsError::PacketError);
    }
    let mut ephemeral_bytes = [0u8; PUBLIC_KEY_LENGTH];
    ephemeral_bytes.copy_from_slice(&payload[..PUBLIC_KEY_LENGTH]);
    let mut verifying_bytes = [0u8; PUBLIC_KEY_LENGTH];
    verifying_bytes.copy_from_slice(&payload[PUBLIC_KEY_LENGTH..PUBLIC_KEY_LENGTH * 2]);
    let mut signature_bytes = [0u8; SIGNATURE_LENGTH];
    signature_bytes.copy_from_slice(&payload[PUBLIC_KEY_LENGTH * 2..LINK_REQUEST_TRAILER_LEN]);

    let verifying_key = VerifyingKey::from_bytes(&verifying_bytes).map_err(|_| RnsError::PacketError)?;
    let signature = Signature::from_bytes(&signature_bytes);
    verifying_key.verify(&ephemeral_bytes, &signature).map_err(|_| RnsError::IncorrectSignature)?;

    Ok((PublicKey::from(ephemeral_bytes), verifying_key))
}

/// Length of a LINK_PROOF payload: the responder's ephemeral X25519 public
/// key, its long-term Ed25519 verifying key, and a signature over both tied
/// to the link id.
pub const LINK_PROOF_LENGTH: usize = PUBLIC_KEY_LENGTH * 2 + SIGNATURE_LENGTH;

/// Builds the payload carried in a LINK_PROOF packet: the responder's
/// ephemeral public key, its long-term verifying key, and a signature over
/// `link_id || ephemeral_public || verifying_key` made with the responder's
/// long-term signing key. Binding the signature to the link id stops a
/// proof minted for one handshake from being replayed against another.
pub fn build_link_proof_payload(
    link_id: &LinkId,
    responder_ephemeral_public: &PublicKey,
    responder_signing_key: &SigningKey,
) -> alloc::vec::Vec<u8> {
    let responder_verifying_key = responder_signing_key.verifying_key();

    let mut signed = alloc::vec::Vec::with_capacity(16 + PUBLIC_KEY_LENGTH * 2);
    signed.extend_from_slice(link_id.0.as_slice());
    signed.extend_from_slice(responder_ephemeral_public.as_bytes());
    signed.extend_from_slice(responder_verifying_key.as_bytes());
    let signature = responder_signing_key.sign(&signed);

    let mut payload = alloc::vec::Vec::with_capacity(LINK_PROOF_LENGTH);
    payload.extend_from_slice(responder_ephemeral_public.as_bytes());
    payload.extend_from_slice(responder_verifying_key.as_bytes());
    payload.extend_from_slice(&signature.to_bytes());
    payload
}

/// Parses a LINK_PROOF payload and verifies its embedded signature against
/// `expected_signing_key` — the long-term signing key already known for the
/// destination the link was requested against. Rejects the proof outright
/// if the embedded verifying key doesn't match that known key, so a
/// different identity can't substitute its own (self-consistent) signature.
/// Returns the responder's ephemeral public key once verified.
pub fn parse_link_proof_payload(
    link_id: &LinkId,
    payload: &[u8],
    expected_signing_key: &VerifyingKey,
) -> Result<PublicKey, RnsError> {
    if payload.len() < LINK_PROOF_LENGTH {
        return Err(RnsError::PacketError);
    }
    let mut ephemeral_bytes = [0u8; PUBLIC_KEY_LENGTH];
    ephemeral_bytes.copy_from_slice(&payload[..PUBLIC_KEY_LENGTH]);
    let mut verifying_bytes = [0u8; PUBLIC_KEY_LENGTH];
    verifying_bytes.copy_from_slice(&payload[PUBLIC_KEY_LENGTH..PUBLIC_KEY_LENGTH * 2]);
    let mut signature_bytes = [0u8; SIGNATURE_LENGTH];
    signature_bytes.copy_from_slice(&payload[PUBLIC_KEY_LENGTH * 2..LINK_PROOF_LENGTH]);

    if verifying_bytes != *expected_signing_key.as_bytes() {
        return Err(RnsError::IncorrectSignature);
    }

    let mut signed = alloc::vec::Vec::with_capacity(16 + PUBLIC_KEY_LENGTH * 2);
    signed.extend_from_slice(link_id.0.as_slice());
    signed.extend_from_slice(&ephemeral_bytes);
    signed.extend_from_slice(&verifying_bytes);
    let signature = Signature::from_bytes(&signature_bytes);
    expected_signing_key.verify(&signed, &signature).map_err(|_| RnsError::IncorrectSignature)?;

    Ok(PublicKey::from(ephemeral_bytes))
}

/// A link endpoint's local state: its role, current lifecycle phase, and
/// (once the handshake completes) its directional traffic keys.
pub struct Link {
    pub id: LinkId,
    pub role: LinkRole,
    pub state: LinkState,
    pub config: LinkConfig,
    ephemeral_secret: Option<StaticSecret>,
    peer_verifying_key: Option<VerifyingKey>,
    tx_key: Option<DirectionalKey>,
    rx_key: Option<DirectionalKey>,
    pub established_at: Option<f64>,
    pub last_activity_at: f64,
    pub rtt: Option<f64>,
}

impl Link {
    /// Starts a link as the initiator: generates an ephemeral keypair and
    /// returns the link together with the LINK_REQUEST payload to send.
    pub fn initiate<R: CryptoRngCore + Copy>(
        config: LinkConfig,
        signing_key: &SigningKey,
        now: f64,
        rng: R,
    ) -> (Self, alloc::vec::Vec<u8>) {
        let ephemeral_secret = StaticSecret::random_from_rng(rng);
        let ephemeral_public = PublicKey::from(&ephemeral_secret);
        let payload = build_link_request_payload(&ephemeral_public, signing_key);

        let link = Self {
            // The real ID is only known once the request packet (and its
            // destination/context) exists; callers fill this in after
            // building the packet via `LinkId::from(&packet)`.
            id: LinkId(crate::hash::AddressHash::new([0u8; 16])),
            role: LinkRole::Initiator,
            state: LinkState::Pending,
            config,
            ephemeral_secret: Some(ephemeral_secret),
            peer_verifying_key: None,
            tx_key: None,
            rx_key: None,
            established_at: None,
            last_activity_at: now,
            rtt: None,
        };
        (link, payload)
    }

    /// Accepts an inbound LINK_REQUEST as the responder: parses the
    /// initiator's ephemeral and verifying keys, derives directional traffic
    /// keys, and returns the link together with the responder's ephemeral
    /// public key to embed in the LINK_PROOF.
    pub fn accept<R: CryptoRngCore + Copy>(
        config: LinkConfig,
        link_id: LinkId,
        request_payload: &[u8],
        now: f64,
        rng: R,
    ) -> Result<(Self, PublicKey), RnsError> {
        let (initiator_ephemeral, initiator_verifying_key) = parse_link_request_payload(request_payload)?;
        let responder_secret = StaticSecret::random_from_rng(rng);
        let responder_public = PublicKey::from(&responder_secret);
        let shared_secret = responder_secret.diffie_hellman(&initiator_ephemeral);

        let rx_key = hkdf_expand_pair(shared_secret.as_bytes(), HKDF_INFO_I2R)?;
        let tx_key = hkdf_expand_pair(shared_secret.as_bytes(), HKDF_INFO_R2I)?;

        let link = Self {
            id: link_id,
            role: LinkRole::Responder,
            state: LinkState::Handshake,
            config,
            ephemeral_secret: None,
            peer_verifying_key: Some(initiator_verifying_key),
            tx_key: Some(tx_key),
            rx_key: Some(rx_key),
            established_at: None,
            last_activity_at: now,
            rtt: None,
        };
        Ok((link, responder_public))
    }

    /// Completes the initiator side of the handshake once the LINK_PROOF
    /// (carrying the responder's ephemeral public key) arrives.
    pub fn complete_handshake(&mut self, responder_public: &PublicKey, now: f64) -> Result<(), RnsError> {
        let ephemeral_secret = self.ephemeral_secret.take().ok_or(RnsError::InvalidArgument)?;
        let shared_secret = ephemeral_secret.diffie_hellman(responder_public);

        self.tx_key = Some(hkdf_expand_pair(shared_secret.as_bytes(), HKDF_INFO_I2R)?);
        self.rx_key = Some(hkdf_expand_pair(shared_secret.as_bytes(), HKDF_INFO_R2I)?);
        self.state = LinkState::Active;
        self.established_at = Some(now);
        self.last_activity_at = now;
        Ok(())
    }

    pub fn mark_active(&mut self, now: f64) {
        self.state = LinkState::Active;
        self.established_at.get_or_insert(now);
        self.last_activity_at = now;
    }

    pub fn record_rtt(&mut self, round_trip_seconds: f64) {
        self.rtt = Some(round_trip_seconds);
    }

    pub fn is_stale(&self, now: f64) -> bool {
        self.state == LinkState::Active
            && now - self.last_activity_at > self.config.stale_time.as_secs_f64()
    }

    pub fn keepalive_due(&self, now: f64) -> bool {
        self.state == LinkState::Active
            && now - self.last_activity_at > self.config.keepalive_interval.as_secs_f64()
    }

    pub fn is_establishment_timed_out(&self, now: f64) -> bool {
        matches!(self.state, LinkState::Pending | LinkState::Handshake)
            && now - self.last_activity_at > self.config.establishment_timeout.as_secs_f64()
    }

    pub fn close(&mut self) {
        self.state = LinkState::Closed;
        self.tx_key = None;
        self.rx_key = None;
    }

    /// Encrypts `plaintext` with the current outbound key, then advances the
    /// outbound ratchet forward. `packet_hash` is the hash of the packet
    /// this payload will be carried in, used as ratchet input.
    pub fn encrypt<R: CryptoRngCore + Copy>(
        &mut self,
        plaintext: &[u8],
        packet_hash: &Hash,
        rng: R,
    ) -> Result<alloc::vec::Vec<u8>, RnsError> {
        let key = self.tx_key.as_ref().ok_or(RnsError::InvalidArgument)?;
        let fernet = Fernet::new_from_slices(&key.sign_key, &key.enc_key, rng);
        let mut scratch = vec![0u8; plaintext.len() + 64];
        let token = fernet.encrypt(PlainText::from(plaintext), &mut scratch)?;
        let out = token.as_bytes().to_vec();

        let next = advance_ratchet(key, packet_hash)?;
        self.tx_key = Some(next);
        Ok(out)
    }

    /// Verifies and decrypts with the current inbound key, then advances the
    /// inbound ratchet forward.
    pub fn decrypt(&mut self, token_bytes: &[u8], packet_hash: &Hash) -> Result<alloc::vec::Vec<u8>, RnsError> {
        let key = self.rx_key.as_ref().ok_or(RnsError::InvalidArgument)?;
        let fernet = Fernet::new_from_slices(&key.sign_key, &key.enc_key, rand_core::OsRng);
        let verified = fernet.verify(Token::from(token_bytes))?;
        let mut scratch = vec![0u8; token_bytes.len()];
        let plaintext = fernet.decrypt(verified, &mut scratch)?.as_slice().to_vec();

        let next = advance_ratchet(key, packet_hash)?;
        self.rx_key = Some(next);
        Ok(plaintext)
    }

    pub fn peer_verifying_key(&self) -> Option<&VerifyingKey> {
        self.peer_verifying_key.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use rand_core::OsRng;

    fn config() -> LinkConfig {
        LinkConfig::default()
    }

    #[test]
    fn initiator_and_responder_derive_matching_directional_keys() {
        let initiator_signing = SigningKey::generate(&mut OsRng);
        let (mut initiator, request_payload) = Link::initiate(config(), &initiator_signing, 0.0, OsRng);

        let link_id = LinkId(crate::hash::AddressHash::new([5u8; 16]));
        let (mut responder, responder_public) =
            Link::accept(config(), link_id, &request_payload, 0.0, OsRng).expect("accept");

        initiator.complete_handshake(&responder_public, 1.0).expect("complete");
        responder.mark_active(1.0);

        let packet_hash = Hash::new_from_slice(b"first packet");
        let ciphertext = initiator.encrypt(b"hello responder", &packet_hash, OsRng).expect("encrypt");
        let plaintext = responder.decrypt(&ciphertext, &packet_hash).expect("decrypt");
        assert_eq!(plaintext, b"hello responder");
    }

    #[test]
    fn ratchet_advances_so_keys_do_not_repeat() {
        let initiator_signing = SigningKey::generate(&mut OsRng);
        let (mut initiator, request_payload) = Link::initiate(config(), &initiator_signing, 0.0, OsRng);
        let link_id = LinkId(crate::hash::AddressHash::new([6u8; 16]));
        let (mut responder, responder_public) =
            Link::accept(config(), link_id, &request_payload, 0.0, OsRng).expect("accept");
        initiator.complete_handshake(&responder_public, 1.0).expect("complete");
        responder.mark_active(1.0);

        let hash_a = Hash::new_from_slice(b"packet a");
        let hash_b = Hash::new_from_slice(b"packet b");

        let first = initiator.encrypt(b"one", &hash_a, OsRng).expect("encrypt 1");
        let second = initiator.encrypt(b"two", &hash_b, OsRng).expect("encrypt 2");
        assert_ne!(first, second);

        assert_eq!(responder.decrypt(&first, &hash_a).expect("decrypt 1"), b"one");
        assert_eq!(responder.decrypt(&second, &hash_b).expect("decrypt 2"), b"two");
    }

    #[test]
    fn link_proof_signature_verifies_against_the_responders_known_key() {
        let responder_signing = SigningKey::generate(&mut OsRng);
        let responder_verifying = responder_signing.verifying_key();
        let responder_secret = x25519_dalek::StaticSecret::random_from_rng(OsRng);
        let responder_ephemeral = PublicKey::from(&responder_secret);
        let link_id = LinkId(crate::hash::AddressHash::new([9u8; 16]));

        let payload = build_link_proof_payload(&link_id, &responder_ephemeral, &responder_signing);
        let recovered = parse_link_proof_payload(&link_id, &payload, &responder_verifying).expect("verifies");
        assert_eq!(recovered.as_bytes(), responder_ephemeral.as_bytes());
    }

    #[test]
    fn link_proof_is_rejected_against_the_wrong_signing_key() {
        let responder_signing = SigningKey::generate(&mut OsRng);
        let impostor_verifying = SigningKey::generate(&mut OsRng).verifying_key();
        let responder_secret = x25519_dalek::StaticSecret::random_from_rng(OsRng);
        let responder_ephemeral = PublicKey::from(&responder_secret);
        let link_id = LinkId(crate::hash::AddressHash::new([9u8; 16]));

        let payload = build_link_proof_payload(&link_id, &responder_ephemeral, &responder_signing);
        assert!(parse_link_proof_payload(&link_id, &payload, &impostor_verifying).is_err());
    }

    #[test]
    fn link_proof_bound_to_one_link_id_fails_against_another() {
        let responder_signing = SigningKey::generate(&mut OsRng);
        let responder_verifying = responder_signing.verifying_key();
        let responder_secret = x25519_dalek::StaticSecret::random_from_rng(OsRng);
        let responder_ephemeral = PublicKey::from(&responder_secret);
        let link_id = LinkId(crate::hash::AddressHash::new([9u8; 16]));
        let other_link_id = LinkId(crate::hash::AddressHash::new([10u8; 16]));

        let payload = build_link_proof_payload(&link_id, &responder_ephemeral, &responder_signing);
        assert!(parse_link_proof_payload(&other_link_id, &payload, &responder_verifying).is_err());
    }

    #[test]
    fn stale_and_timeout_detection_respect_configured_durations() {
        let mut config = config();
        config.stale_time = core::time::Duration::from_secs(10);
        config.establishment_timeout = core::time::Duration::from_secs(5);

        let initiator_signing = SigningKey::generate(&mut OsRng);
        let (mut link, _payload) = Link::initiate(config, &initiator_signing, 0.0, OsRng);
        assert!(link.is_establishment_timed_out(6.0));

        link.mark_active(0.0);
        assert!(!link.is_stale(5.0));
        assert!(link.is_stale(11.0));
    }
}
