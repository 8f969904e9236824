use core::fmt;

use rand_core::CryptoRngCore;
use sha2::{Digest, Sha256};

/// Length in bytes of a truncated destination/identity/link address hash.
pub const ADDRESS_HASH_LENGTH: usize = 16;

/// A full 32-byte SHA-256 digest, used for signed data and resource integrity
/// hashes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hash([u8; 32]);

impl Hash {
    pub fn generator() -> Sha256 {
        Sha256::new()
    }

    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn new_from_slice(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    pub fn new_from_rand<R: CryptoRngCore>(mut rng: R) -> Self {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", hex::encode(self.0))
    }
}

/// A 16-byte truncated address: an identity hash, a destination hash, or a
/// link ID, depending on the context it was derived in.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AddressHash([u8; ADDRESS_HASH_LENGTH]);

impl AddressHash {
    pub fn new(bytes: [u8; ADDRESS_HASH_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn new_from_hash(hash: &Hash) -> Self {
        let mut bytes = [0u8; ADDRESS_HASH_LENGTH];
        bytes.copy_from_slice(&hash.as_slice()[..ADDRESS_HASH_LENGTH]);
        Self(bytes)
    }

    pub fn new_from_rand<R: CryptoRngCore>(mut rng: R) -> Self {
        let mut bytes = [0u8; ADDRESS_HASH_LENGTH];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn to_bytes(&self) -> [u8; ADDRESS_HASH_LENGTH] {
        self.0
    }

    pub fn to_hex_string(&self) -> alloc::string::String {
        hex::encode(self.0)
    }
}

impl fmt::Display for AddressHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for AddressHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AddressHash({})", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_hash_truncates_to_sixteen_bytes() {
        let hash = Hash::new_from_slice(b"hello reticulum");
        let addr = AddressHash::new_from_hash(&hash);
        assert_eq!(addr.as_slice(), &hash.as_slice()[..ADDRESS_HASH_LENGTH]);
    }

    #[test]
    fn display_is_lowercase_hex() {
        let addr = AddressHash::new([0xAB; ADDRESS_HASH_LENGTH]);
        assert_eq!(addr.to_string(), "ab".repeat(ADDRESS_HASH_LENGTH));
    }
}
