//! Locating the designated block
//!
//! The header never says which block carries the key material. With a fast
//! header the stored auth hash is recomputed per index, which costs one
//! SHA-512 per block and a single RSA decryption. Otherwise every block is
//! trial-decrypted with RSA until its derived key matches the challenge.

use rsa::RsaPrivateKey;
use secrecy::SecretString;
use subtle::ConstantTimeEq;

use pvault_core::{VaultError, VaultResult};

use crate::asym::decrypt_block;
use crate::container::Container;
use crate::digest::{auth_tag, derive_block_key, key_challenge, SymmetricKey};

/// A verified designated block.
#[derive(Debug)]
pub struct Designated {
    pub index: usize,
    /// RSA-decrypted content of the block
    pub plaintext: Vec<u8>,
    pub key: SymmetricKey,
}

/// RSA-decrypt block `index` and check that it yields the header's
/// challenge under `password`.
pub fn verify_block(
    container: &Container,
    index: usize,
    password: &SecretString,
    private_key: &RsaPrivateKey,
) -> Option<Designated> {
    let block = container.blocks().get(index)?;
    let plaintext = decrypt_block(private_key, block)?;
    let key = derive_block_key(&plaintext, password);
    let challenge = key_challenge(&key);

    if bool::from(challenge.as_slice().ct_eq(container.header().challenge().as_slice())) {
        Some(Designated {
            index,
            plaintext,
            key,
        })
    } else {
        None
    }
}

/// Match the stored auth hash against each index. `None` for a plain header
/// or when no index verifies.
pub fn discover_fast(
    container: &Container,
    password: &SecretString,
    private_key: &RsaPrivateKey,
) -> Option<Designated> {
    let stored = container.header().auth()?;
    let challenge = container.header().challenge();

    (0..container.blocks().len())
        .filter(|&i| bool::from(auth_tag(challenge, i, password).as_slice().ct_eq(stored.as_slice())))
        .find_map(|i| verify_block(container, i, password, private_key))
}

/// Trial-decrypt blocks in order until one verifies.
pub fn discover_slow(
    container: &Container,
    password: &SecretString,
    private_key: &RsaPrivateKey,
) -> Option<Designated> {
    (0..container.blocks().len()).find_map(|i| verify_block(container, i, password, private_key))
}

/// Fast lookup when the header allows it, falling back to the full scan.
pub fn discover(
    container: &Container,
    password: &SecretString,
    private_key: &RsaPrivateKey,
) -> VaultResult<Designated> {
    if container.header().is_fast() {
        if let Some(found) = discover_fast(container, password, private_key) {
            return Ok(found);
        }
        tracing::debug!("fast lookup failed, scanning all blocks");
    }
    discover_slow(container, password, private_key).ok_or_else(VaultError::authentication)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EncryptOptions, HybridEngine};
    use crate::keys::generate_keypair;
    use std::sync::OnceLock;

    fn test_key() -> &'static RsaPrivateKey {
        static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
        KEY.get_or_init(|| generate_keypair(1024).unwrap())
    }

    fn payload() -> Vec<u8> {
        (0..40)
            .map(|i| format!("service{i}\tuser{i}\tpassword{i}\n"))
            .collect::<String>()
            .into_bytes()
    }

    fn seal(fast: bool, selected: usize) -> Container {
        let engine = HybridEngine::new(128).unwrap();
        let options = EncryptOptions {
            selected_block: Some(selected),
            fast,
            ..EncryptOptions::default()
        };
        engine
            .encrypt(&payload(), &SecretString::from("pw"), &test_key().to_public_key(), &options)
            .unwrap()
    }

    #[test]
    fn test_fast_and_slow_agree() {
        let container = seal(true, 4);
        let pw = SecretString::from("pw");

        let fast = discover_fast(&container, &pw, test_key()).unwrap();
        let slow = discover_slow(&container, &pw, test_key()).unwrap();
        assert_eq!(fast.index, 4);
        assert_eq!(slow.index, 4);
        assert_eq!(fast.key.as_bytes(), slow.key.as_bytes());
    }

    #[test]
    fn test_plain_header_has_no_fast_path() {
        let container = seal(false, 2);
        let pw = SecretString::from("pw");

        assert!(discover_fast(&container, &pw, test_key()).is_none());
        assert_eq!(discover(&container, &pw, test_key()).unwrap().index, 2);
    }

    #[test]
    fn test_wrong_password_fails_with_fixed_message() {
        let container = seal(true, 1);
        let err = discover(&container, &SecretString::from("nope"), test_key()).unwrap_err();
        assert_eq!(err.to_string(), VaultError::authentication().to_string());
    }

    #[test]
    fn test_verify_rejects_other_blocks() {
        let container = seal(true, 3);
        let pw = SecretString::from("pw");
        assert!(verify_block(&container, 3, &pw, test_key()).is_some());
        assert!(verify_block(&container, 0, &pw, test_key()).is_none());
        assert!(verify_block(&container, 999, &pw, test_key()).is_none());
    }
}
