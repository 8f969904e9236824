//! Identity key pairs: an X25519 pair for ECDH/encryption and an Ed25519
//! pair for signing.

use alloc::vec::Vec;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::CryptoRngCore;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::RnsError;
use crate::hash::{AddressHash, Hash};
use crate::key_manager::{KeyManagerBackend, KeyPurpose, StoredKey};
use crate::packet::Packet;
use crate::ratchets;

pub const PUBLIC_KEY_LENGTH: usize = 32;
pub const SIGNATURE_LENGTH: usize = 64;

/// Anything that can contribute bytes to a destination hash computation.
/// `Identity` contributes its address hash; `EmptyIdentity` (used by PLAIN
/// destinations) contributes nothing.
pub trait HashIdentity {
    fn as_address_hash_slice(&self) -> &[u8];
}

fn compute_identity_hash(public_key: &PublicKey, verifying_key: &VerifyingKey) -> AddressHash {
    let hash = Hash::new(
        Hash::generator()
            .chain_update(public_key.as_bytes())
            .chain_update(verifying_key.as_bytes())
            .finalize()
            .into(),
    );
    AddressHash::new_from_hash(&hash)
}

/// The public half of an identity: what gets embedded in announces and what
/// other nodes address packets to.
#[derive(Clone, Copy)]
pub struct Identity {
    pub public_key: PublicKey,
    pub verifying_key: VerifyingKey,
    pub address_hash: AddressHash,
}

impl Identity {
    pub fn new(public_key: PublicKey, verifying_key: VerifyingKey) -> Self {
        let address_hash = compute_identity_hash(&public_key, &verifying_key);
        Self { public_key, verifying_key, address_hash }
    }

    pub fn public_key_bytes(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        self.public_key.as_bytes()
    }

    pub fn verifying_key_bytes(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        self.verifying_key.as_bytes()
    }

    pub fn address_hash(&self) -> AddressHash {
        self.address_hash
    }

    /// A fixed, non-secret identity used as filler in `DestinationDesc` for
    /// PLAIN and GROUP destinations, which have no asymmetric identity of
    /// their own but still carry the field for display purposes.
    pub fn placeholder() -> Self {
        let secret = StaticSecret::from([0u8; 32]);
        let public_key = PublicKey::from(&secret);
        let signing_key = SigningKey::from_bytes(&[0u8; 32]);
        let verifying_key = signing_key.verifying_key();
        Self::new(public_key, verifying_key)
    }

    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), RnsError> {
        self.verifying_key.verify(message, signature).map_err(|_| RnsError::IncorrectSignature)
    }

    /// Per-packet encryption for a SINGLE destination: an ephemeral X25519
    /// keypair is generated, ECDH'd against `self`, and the shared secret is
    /// expanded with HKDF-SHA-256 into a Fernet key.
    pub fn encrypt_for<R: CryptoRngCore + Copy>(
        &self,
        rng: R,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, RnsError> {
        ratchets::encrypt_for_public_key(&self.public_key, self.address_hash.as_slice(), plaintext, rng)
    }

    /// Validates an ANNOUNCE packet's embedded signature and that the
    /// identity derived from the embedded public keys matches the packet's
    /// addressed destination hash, defending against hash collisions. See
    /// `destination::DestinationAnnounce::validate` for the full parse.
    pub fn validate_announce(
        announce: &Packet,
    ) -> Result<crate::destination::AnnounceInfo<'_>, RnsError> {
        crate::destination::DestinationAnnounce::validate(announce)
    }
}

impl HashIdentity for Identity {
    fn as_address_hash_slice(&self) -> &[u8] {
        self.address_hash.as_slice()
    }
}

/// Placeholder identity for PLAIN destinations, which carry no keys and
/// contribute nothing to their destination hash.
#[derive(Default, Clone, Copy)]
pub struct EmptyIdentity;

impl HashIdentity for EmptyIdentity {
    fn as_address_hash_slice(&self) -> &[u8] {
        &[]
    }
}

/// An identity's private half: the X25519 static secret and Ed25519 signing
/// key, plus the derived public `Identity`.
pub struct PrivateIdentity {
    secret: StaticSecret,
    signing_key: SigningKey,
    identity: Identity,
}

impl PrivateIdentity {
    pub fn new(secret: StaticSecret, signing_key: SigningKey) -> Self {
        let public_key = PublicKey::from(&secret);
        let verifying_key = signing_key.verifying_key();
        let identity = Identity::new(public_key, verifying_key);
        Self { secret, signing_key, identity }
    }

    pub fn new_from_rand<R: CryptoRngCore + Clone>(rng: R) -> Self {
        let secret = StaticSecret::random_from_rng(rng.clone());
        let signing_key = SigningKey::generate(&mut rng.clone());
        Self::new(secret, signing_key)
    }

    pub fn as_identity(&self) -> &Identity {
        &self.identity
    }

    pub fn address_hash(&self) -> AddressHash {
        self.identity.address_hash
    }

    pub fn secret(&self) -> &StaticSecret {
        &self.secret
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    pub fn sign_key(&self) -> &SigningKey {
        &self.signing_key
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, RnsError> {
        ratchets::decrypt_with_identity(self, self.identity.address_hash.as_slice(), ciphertext)
    }

    /// Persists the private key material via a `KeyManagerBackend`.
    pub fn save(&self, manager: &dyn KeyManagerBackend, key_id: &str) -> Result<(), RnsError> {
        let mut material = Vec::with_capacity(64);
        material.extend_from_slice(self.secret.to_bytes().as_slice());
        material.extend_from_slice(self.signing_key.to_bytes().as_slice());
        manager.put(StoredKey {
            key_id: key_id.into(),
            purpose: KeyPurpose::IdentitySigning,
            material,
        })
    }

    /// Loads previously-saved private key material, if present.
    pub fn load(manager: &dyn KeyManagerBackend, key_id: &str) -> Result<Option<Self>, RnsError> {
        let Some(stored) = manager.get(key_id)? else {
            return Ok(None);
        };
        if stored.material.len() != 64 {
            return Err(RnsError::InvalidArgument);
        }
        let mut secret_bytes = [0u8; 32];
        let mut signing_bytes = [0u8; 32];
        secret_bytes.copy_from_slice(&stored.material[..32]);
        signing_bytes.copy_from_slice(&stored.material[32..]);
        Ok(Some(Self::new(StaticSecret::from(secret_bytes), SigningKey::from_bytes(&signing_bytes))))
    }
}

impl HashIdentity for PrivateIdentity {
    fn as_address_hash_slice(&self) -> &[u8] {
        self.identity.as_address_hash_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    #[test]
    fn identity_hash_is_stable_for_same_keys() {
        let identity = PrivateIdentity::new_from_rand(OsRng);
        let a = identity.as_identity().address_hash;
        let b = Identity::new(identity.as_identity().public_key, identity.as_identity().verifying_key)
            .address_hash;
        assert_eq!(a, b);
    }

    #[test]
    fn different_identities_yield_different_hashes() {
        let a = PrivateIdentity::new_from_rand(OsRng);
        let b = PrivateIdentity::new_from_rand(OsRng);
        assert_ne!(a.as_identity().address_hash, b.as_identity().address_hash);
    }

    #[test]
    fn sign_then_verify_round_trips() {
        let identity = PrivateIdentity::new_from_rand(OsRng);
        let message = b"reticulum";
        let signature = identity.sign(message);
        assert!(identity.as_identity().verify(message, &signature).is_ok());
    }

    #[test]
    fn verify_rejects_tampered_message() {
        let identity = PrivateIdentity::new_from_rand(OsRng);
        let signature = identity.sign(b"reticulum");
        assert!(identity.as_identity().verify(b"reticulom", &signature).is_err());
    }

    #[test]
    fn save_and_load_round_trips_through_in_memory_backend() {
        use crate::key_manager::InMemoryKeyManager;

        let manager = InMemoryKeyManager::new();
        let identity = PrivateIdentity::new_from_rand(OsRng);
        identity.save(&manager, "node").expect("save");
        let loaded = PrivateIdentity::load(&manager, "node").expect("load").expect("present");
        assert_eq!(loaded.address_hash(), identity.address_hash());
    }
}
