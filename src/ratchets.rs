//! Asymmetric encryption for destinations: ephemeral X25519 ECDH plus
//! HKDF-SHA-256 key derivation, wrapping payloads in a Fernet token.
//!
//! Also covers ratchet key advancement: a ratchet is just a rotating
//! `StaticSecret`, so the same ECDH-then-HKDF path handles both the
//! identity's long-term key and any ratchet key offered in an announce.

use alloc::vec::Vec;

use hkdf::Hkdf;
use rand_core::CryptoRngCore;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::crypt::fernet::{Fernet, PlainText, Token, AES_KEY_SIZE};
use crate::error::RnsError;
use crate::identity::PrivateIdentity;

const HKDF_INFO: &[u8] = b"reticulum-transport-key";

fn derive_fernet_keys(shared_secret: &[u8], salt: &[u8]) -> Result<([u8; AES_KEY_SIZE], [u8; AES_KEY_SIZE]), RnsError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), shared_secret);
    let mut okm = [0u8; 2 * AES_KEY_SIZE];
    hk.expand(HKDF_INFO, &mut okm).map_err(|_| RnsError::CryptoError)?;
    let mut sign_key = [0u8; AES_KEY_SIZE];
    let mut enc_key = [0u8; AES_KEY_SIZE];
    sign_key.copy_from_slice(&okm[..AES_KEY_SIZE]);
    enc_key.copy_from_slice(&okm[AES_KEY_SIZE..]);
    Ok((sign_key, enc_key))
}

/// Encrypts `plaintext` for `public_key` (an identity's or a ratchet's).
/// Generates an ephemeral X25519 keypair, ECDHs against `public_key`, and
/// packs the ephemeral public key ahead of the Fernet token.
pub fn encrypt_for_public_key<R: CryptoRngCore + Copy>(
    public_key: &PublicKey,
    salt: &[u8],
    plaintext: &[u8],
    mut rng: R,
) -> Result<Vec<u8>, RnsError> {
    let ephemeral_secret = StaticSecret::random_from_rng(rng);
    let ephemeral_public = PublicKey::from(&ephemeral_secret);
    let shared_secret = ephemeral_secret.diffie_hellman(public_key);

    let (sign_key, enc_key) = derive_fernet_keys(shared_secret.as_bytes(), salt)?;
    let fernet = Fernet::new_from_slices(&sign_key, &enc_key, rng);

    let mut scratch = alloc::vec![0u8; plaintext.len() + 64];
    let token = fernet.encrypt(PlainText::from(plaintext), &mut scratch)?;

    let mut out = Vec::with_capacity(32 + token.len());
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend_from_slice(token.as_bytes());
    let _ = &mut rng;
    Ok(out)
}

/// Decrypts a payload produced by `encrypt_for_public_key` using the
/// matching static secret.
pub fn decrypt_with_private_key(
    private_key: &StaticSecret,
    salt: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, RnsError> {
    if ciphertext.len() <= 32 {
        return Err(RnsError::InvalidArgument);
    }
    let mut ephemeral_bytes = [0u8; 32];
    ephemeral_bytes.copy_from_slice(&ciphertext[..32]);
    let ephemeral_public = PublicKey::from(ephemeral_bytes);
    let token_bytes = &ciphertext[32..];

    let shared_secret = private_key.diffie_hellman(&ephemeral_public);
    let (sign_key, enc_key) = derive_fernet_keys(shared_secret.as_bytes(), salt)?;

    // rng is only used for encryption; a throwaway is fine for decrypt-only use.
    let fernet = Fernet::new_from_slices(&sign_key, &enc_key, rand_core::OsRng);

    let token = fernet.verify(Token::from(token_bytes))?;
    let mut scratch = alloc::vec![0u8; token_bytes.len()];
    let plaintext = fernet.decrypt(token, &mut scratch)?;
    Ok(plaintext.as_slice().to_vec())
}

/// Decrypts using an identity's long-term secret.
pub fn decrypt_with_identity(
    identity: &PrivateIdentity,
    salt: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, RnsError> {
    decrypt_with_private_key(identity.secret(), salt, ciphertext)
}

/// Seconds since the Unix epoch, as a float (matches the timestamp
/// granularity used in ratchet expiry bookkeeping).
#[cfg(feature = "std")]
pub fn now_secs() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        let salt = b"destination-hash";

        let ciphertext = encrypt_for_public_key(&public, salt, b"hello mesh", OsRng).expect("encrypt");
        let plaintext = decrypt_with_private_key(&secret, salt, &ciphertext).expect("decrypt");
        assert_eq!(plaintext, b"hello mesh");
    }

    #[test]
    fn wrong_salt_fails_verification() {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);

        let ciphertext = encrypt_for_public_key(&public, b"salt-a", b"hello mesh", OsRng).expect("encrypt");
        assert!(decrypt_with_private_key(&secret, b"salt-b", &ciphertext).is_err());
    }

    #[test]
    fn wrong_key_fails_verification() {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        let other_secret = StaticSecret::random_from_rng(OsRng);

        let ciphertext = encrypt_for_public_key(&public, b"salt", b"hello mesh", OsRng).expect("encrypt");
        assert!(decrypt_with_private_key(&other_secret, b"salt", &ciphertext).is_err());
    }
}
