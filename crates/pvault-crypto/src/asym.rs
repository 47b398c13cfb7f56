//! Raw ("textbook") RSA over a whole block
//!
//! The designated block is interpreted as a big-endian integer and raised to
//! the public exponent. There is no padding scheme: the ciphertext is exactly
//! the modulus size, which is what lets it replace the plaintext block in
//! place. A block whose value is not below the modulus cannot be encrypted.
//!
//! The exponentiation itself is `rsa`'s hazmat primitive: CRT with blinding
//! on the private side, and a re-encryption check of every result.

use rsa::hazmat::{rsa_decrypt_and_check, rsa_encrypt};
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};

/// The block's integer value is not below the modulus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("block value is not below the RSA modulus")]
pub struct BlockRejected;

/// Encrypt `block` with the public key. Output is `key.size()` bytes.
pub fn encrypt_block(key: &RsaPublicKey, block: &[u8]) -> Result<Vec<u8>, BlockRejected> {
    let m = BigUint::from_bytes_be(block);
    if &m >= key.n() {
        return Err(BlockRejected);
    }
    let c = rsa_encrypt(key, &m).map_err(|_| BlockRejected)?;
    Ok(left_pad(c.to_bytes_be(), key.size()))
}

/// Decrypt `ciphertext` with the private key. Output is `key.size()` bytes.
///
/// `None` when the input cannot be an RSA ciphertext under this key. Any
/// other input decrypts to *something*; callers verify the result.
pub fn decrypt_block(key: &RsaPrivateKey, ciphertext: &[u8]) -> Option<Vec<u8>> {
    if ciphertext.len() != key.size() {
        return None;
    }
    let c = BigUint::from_bytes_be(ciphertext);
    if &c >= key.n() {
        return None;
    }
    let m = rsa_decrypt_and_check(key, Some(&mut rand::thread_rng()), &c).ok()?;
    Some(left_pad(m.to_bytes_be(), key.size()))
}

fn left_pad(bytes: Vec<u8>, size: usize) -> Vec<u8> {
    if bytes.len() >= size {
        return bytes;
    }
    let mut out = vec![0u8; size - bytes.len()];
    out.extend_from_slice(&bytes);
    out
}
