//! Key, challenge and fast-auth derivation

use secrecy::{ExposeSecret, SecretString};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use zeroize::Zeroize;

use crate::{AUTH_SIZE, CHALLENGE_SIZE, KEY_SIZE};

/// The AES-256 key shared by every non-designated block. Zeroized on drop.
#[derive(Clone)]
pub struct SymmetricKey {
    bytes: [u8; KEY_SIZE],
}

impl SymmetricKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// `SHA-256(block || password)`: the symmetric key hidden in the designated
/// block's plaintext.
pub fn derive_block_key(block: &[u8], password: &SecretString) -> SymmetricKey {
    let digest = Sha256::new()
        .chain_update(block)
        .chain_update(password.expose_secret().as_bytes())
        .finalize();

    let mut bytes = [0u8; KEY_SIZE];
    bytes.copy_from_slice(&digest);
    SymmetricKey::from_bytes(bytes)
}

/// `SHA-1(key)`: stored in the header to recognise the right key.
pub fn key_challenge(key: &SymmetricKey) -> [u8; CHALLENGE_SIZE] {
    let digest = Sha1::digest(key.as_bytes());
    let mut out = [0u8; CHALLENGE_SIZE];
    out.copy_from_slice(&digest);
    out
}

/// `SHA-512(hex(challenge) || index || password)` with `index` in decimal.
pub fn auth_tag(
    challenge: &[u8; CHALLENGE_SIZE],
    index: usize,
    password: &SecretString,
) -> [u8; AUTH_SIZE] {
    let digest = Sha512::new()
        .chain_update(hex::encode(challenge))
        .chain_update(index.to_string())
        .chain_update(password.expose_secret().as_bytes())
        .finalize();

    let mut out = [0u8; AUTH_SIZE];
    out.copy_from_slice(&digest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pw(s: &str) -> SecretString {
        SecretString::from(s)
    }

    #[test]
    fn test_key_is_sha256_of_block_and_password() {
        let key = derive_block_key(b"block", &pw("secret"));
        let expected = Sha256::digest(b"blocksecret");
        assert_eq!(key.as_bytes().as_slice(), expected.as_slice());
    }

    #[test]
    fn test_challenge_depends_on_password() {
        let a = key_challenge(&derive_block_key(b"block", &pw("one")));
        let b = key_challenge(&derive_block_key(b"block", &pw("two")));
        assert_ne!(a, b);
    }

    #[test]
    fn test_auth_tag_matches_concatenated_text() {
        let challenge = [0xA5u8; CHALLENGE_SIZE];
        let tag = auth_tag(&challenge, 12, &pw("hunter2"));

        let text = format!("{}{}{}", hex::encode(challenge), 12, "hunter2");
        let expected = Sha512::digest(text.as_bytes());
        assert_eq!(tag.as_slice(), expected.as_slice());
    }

    #[test]
    fn test_auth_tag_binds_index() {
        let challenge = [1u8; CHALLENGE_SIZE];
        assert_ne!(
            auth_tag(&challenge, 1, &pw("p")),
            auth_tag(&challenge, 2, &pw("p"))
        );
    }

    #[test]
    fn test_debug_redacts_key() {
        let key = derive_block_key(b"x", &pw("y"));
        assert!(format!("{key:?}").contains("REDACTED"));
    }
}
