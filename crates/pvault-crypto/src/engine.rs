//! Hybrid encryption of a whole payload into a [`Container`]

use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use secrecy::SecretString;

use pvault_chunks::{chunk, pad_last, select_block, Block};
use pvault_core::{ContainerConfig, VaultError, VaultResult};

use crate::asym::encrypt_block;
use crate::container::{Container, Header};
use crate::digest::{auth_tag, derive_block_key, key_challenge};
use crate::discovery::{discover, verify_block};
use crate::symmetric::BlockCipher;
use crate::AES_BLOCK_SIZE;

/// Largest chunk size whose padding still fits the 2-byte header field
const MAX_CHUNK_SIZE: usize = 65536;

/// Per-call encryption settings
#[derive(Debug, Clone)]
pub struct EncryptOptions {
    /// Force the designated block instead of picking one by entropy
    pub selected_block: Option<usize>,
    /// Write a fast header
    pub fast: bool,
    /// Candidates sampled per selection
    pub try_limit: usize,
    /// Selections attempted before giving up
    pub try_max: usize,
}

impl Default for EncryptOptions {
    fn default() -> Self {
        Self {
            selected_block: None,
            fast: true,
            try_limit: 5,
            try_max: 10,
        }
    }
}

impl EncryptOptions {
    pub fn from_config(config: &ContainerConfig) -> Self {
        Self {
            selected_block: None,
            fast: config.fast_auth,
            try_limit: config.try_limit,
            try_max: config.try_max,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HybridEngine {
    chunk_size: usize,
}

impl HybridEngine {
    pub fn new(chunk_size: usize) -> VaultResult<Self> {
        if chunk_size == 0 || chunk_size % AES_BLOCK_SIZE != 0 || chunk_size > MAX_CHUNK_SIZE {
            return Err(VaultError::Validation(format!(
                "chunk size must be a non-zero multiple of {AES_BLOCK_SIZE} up to {MAX_CHUNK_SIZE}, got {chunk_size}"
            )));
        }
        Ok(Self { chunk_size })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn check_modulus(&self, modulus_size: usize) -> VaultResult<()> {
        if modulus_size != self.chunk_size {
            return Err(VaultError::KeyFormat(format!(
                "RSA modulus is {modulus_size} bytes but the chunk size is {}",
                self.chunk_size
            )));
        }
        Ok(())
    }

    /// Chunk, pad and encrypt `payload`.
    pub fn encrypt(
        &self,
        payload: &[u8],
        password: &SecretString,
        public_key: &RsaPublicKey,
        options: &EncryptOptions,
    ) -> VaultResult<Container> {
        if payload.is_empty() {
            return Err(VaultError::Validation("nothing to encrypt".into()));
        }
        self.check_modulus(public_key.size())?;

        let mut blocks = chunk(payload, self.chunk_size);
        let padding = pad_last(&mut blocks, self.chunk_size);
        tracing::debug!(blocks = blocks.len(), padding, "payload chunked");

        if let Some(selected) = options.selected_block {
            if selected >= blocks.len() {
                return Err(VaultError::Validation(format!(
                    "selected block {selected} out of range 0..{}",
                    blocks.len()
                )));
            }
            return self
                .seal(&blocks, selected, padding, password, public_key, options.fast)
                .ok_or_else(|| {
                    VaultError::Validation(format!(
                        "block {selected} can not be encrypted with this key"
                    ))
                });
        }

        let mut rng = rand::thread_rng();
        let attempts = options.try_max.max(1);
        for attempt in 1..=attempts {
            let Some(selected) = select_block(&blocks, options.try_limit, &mut rng) else {
                break;
            };
            if let Some(container) =
                self.seal(&blocks, selected, padding, password, public_key, options.fast)
            {
                return Ok(container);
            }
            tracing::warn!(attempt, attempts, "key block rejected by RSA, selecting again");
        }
        Err(VaultError::Validation(format!(
            "no encryptable key block found after {attempts} attempts"
        )))
    }

    /// `None` when RSA rejects the designated block.
    fn seal(
        &self,
        blocks: &[Block],
        selected: usize,
        padding: usize,
        password: &SecretString,
        public_key: &RsaPublicKey,
        fast: bool,
    ) -> Option<Container> {
        let designated = encrypt_block(public_key, &blocks[selected]).ok()?;

        let key = derive_block_key(&blocks[selected], password);
        let challenge = key_challenge(&key);
        let cipher = BlockCipher::new(&key);

        let mut encrypted: Vec<Block> = Vec::with_capacity(blocks.len());
        for (i, block) in blocks.iter().enumerate() {
            if i == selected {
                encrypted.push(designated.clone());
            } else {
                encrypted.push(cipher.encrypt(block));
            }
        }

        // padding < chunk_size <= 65536
        let padding = padding as u16;
        let header = if fast {
            Header::Fast {
                padding,
                challenge,
                auth: auth_tag(&challenge, selected, password),
            }
        } else {
            Header::Plain { padding, challenge }
        };
        Some(Container::new(header, encrypted))
    }

    /// Find the designated block (or verify `selected_block`) and decrypt
    /// the whole container back to the original payload.
    pub fn decrypt(
        &self,
        container: &Container,
        password: &SecretString,
        private_key: &RsaPrivateKey,
        selected_block: Option<usize>,
    ) -> VaultResult<Vec<u8>> {
        self.check_modulus(private_key.size())?;

        let blocks = container.blocks();
        if blocks.is_empty() || blocks.iter().any(|b| b.len() != self.chunk_size) {
            return Err(VaultError::Format(format!(
                "container blocks are not all {} bytes",
                self.chunk_size
            )));
        }
        let padding = container.header().padding();
        if padding >= self.chunk_size {
            return Err(VaultError::Format(format!(
                "padding {padding} not below chunk size {}",
                self.chunk_size
            )));
        }

        let designated = match selected_block {
            None => discover(container, password, private_key)?,
            Some(index) if index >= blocks.len() => {
                return Err(VaultError::Validation(format!(
                    "selected block {index} out of range 0..{}",
                    blocks.len()
                )));
            }
            Some(index) => verify_block(container, index, password, private_key)
                .ok_or_else(VaultError::authentication)?,
        };
        tracing::debug!(blocks = blocks.len(), "key block verified");

        let cipher = BlockCipher::new(&designated.key);
        let mut payload = Vec::with_capacity(blocks.len() * self.chunk_size);
        for (i, block) in blocks.iter().enumerate() {
            if i == designated.index {
                payload.extend_from_slice(&designated.plaintext);
            } else {
                payload.extend_from_slice(&cipher.decrypt(block));
            }
        }
        payload.truncate(payload.len() - padding);
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_keypair;
    use proptest::prelude::*;
    use std::sync::OnceLock;

    const CHUNK: usize = 128;

    fn test_key() -> &'static RsaPrivateKey {
        static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
        KEY.get_or_init(|| generate_keypair(1024).unwrap())
    }

    fn other_key() -> &'static RsaPrivateKey {
        static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
        KEY.get_or_init(|| generate_keypair(1024).unwrap())
    }

    fn pw() -> SecretString {
        SecretString::from("correct horse")
    }

    fn engine() -> HybridEngine {
        HybridEngine::new(CHUNK).unwrap()
    }

    fn roundtrip(payload: &[u8], options: &EncryptOptions) -> Vec<u8> {
        let container = engine()
            .encrypt(payload, &pw(), &test_key().to_public_key(), options)
            .unwrap();
        engine().decrypt(&container, &pw(), test_key(), None).unwrap()
    }

    #[test]
    fn test_roundtrip_fast_and_plain() {
        let payload = b"pvault_database:v1.1\nsvc\tuser\tpass\n".repeat(9);
        for fast in [true, false] {
            let options = EncryptOptions {
                fast,
                ..EncryptOptions::default()
            };
            assert_eq!(roundtrip(&payload, &options), payload);
        }
    }

    #[test]
    fn test_roundtrip_edge_lengths() {
        for len in [1, CHUNK - 1, CHUNK, CHUNK + 1, 3 * CHUNK] {
            let payload: Vec<u8> = (0..len).map(|i| b'a' + (i % 26) as u8).collect();
            assert_eq!(roundtrip(&payload, &EncryptOptions::default()), payload, "len {len}");
        }
    }

    #[test]
    fn test_padding_recorded_and_blocks_full() {
        let payload = vec![b'x'; CHUNK + 10];
        let container = engine()
            .encrypt(&payload, &pw(), &test_key().to_public_key(), &EncryptOptions::default())
            .unwrap();

        assert_eq!(container.header().padding(), CHUNK - 10);
        assert_eq!(container.blocks().len(), 2);
        assert!(container.blocks().iter().all(|b| b.len() == CHUNK));
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let public = test_key().to_public_key();

        let err = engine().encrypt(b"", &pw(), &public, &EncryptOptions::default());
        assert!(matches!(err, Err(VaultError::Validation(_))));

        let wide = HybridEngine::new(256).unwrap();
        let err = wide.encrypt(b"data", &pw(), &public, &EncryptOptions::default());
        assert!(matches!(err, Err(VaultError::KeyFormat(_))));

        let options = EncryptOptions {
            selected_block: Some(1),
            ..EncryptOptions::default()
        };
        let err = engine().encrypt(b"one block", &pw(), &public, &options);
        assert!(matches!(err, Err(VaultError::Validation(_))));
    }

    #[test]
    fn test_chunk_size_validation() {
        for size in [0, 100, MAX_CHUNK_SIZE + AES_BLOCK_SIZE] {
            assert!(matches!(HybridEngine::new(size), Err(VaultError::Validation(_))));
        }
        assert!(HybridEngine::new(MAX_CHUNK_SIZE).is_ok());
    }

    #[test]
    fn test_rejected_block_retried_when_random() {
        // block 0 is all 0xFF and never fits below the modulus
        let mut payload = vec![0xFF; CHUNK];
        payload.extend_from_slice(b"hello");
        let public = test_key().to_public_key();

        let container = engine()
            .encrypt(&payload, &pw(), &public, &EncryptOptions::default())
            .unwrap();
        assert_eq!(engine().decrypt(&container, &pw(), test_key(), None).unwrap(), payload);

        let forced = EncryptOptions {
            selected_block: Some(0),
            ..EncryptOptions::default()
        };
        let err = engine().encrypt(&payload, &pw(), &public, &forced);
        assert!(matches!(err, Err(VaultError::Validation(_))));
    }

    #[test]
    fn test_explicit_index_on_decrypt() {
        let payload = b"row\n".repeat(100);
        let options = EncryptOptions {
            selected_block: Some(2),
            ..EncryptOptions::default()
        };
        let container = engine()
            .encrypt(&payload, &pw(), &test_key().to_public_key(), &options)
            .unwrap();

        assert_eq!(engine().decrypt(&container, &pw(), test_key(), Some(2)).unwrap(), payload);
        assert!(matches!(
            engine().decrypt(&container, &pw(), test_key(), Some(1)),
            Err(VaultError::Authentication(_))
        ));
        assert!(matches!(
            engine().decrypt(&container, &pw(), test_key(), Some(99)),
            Err(VaultError::Validation(_))
        ));
    }

    #[test]
    fn test_wrong_password_or_key() {
        let container = engine()
            .encrypt(b"secret rows\n", &pw(), &test_key().to_public_key(), &EncryptOptions::default())
            .unwrap();

        let err = engine()
            .decrypt(&container, &SecretString::from("wrong"), test_key(), None)
            .unwrap_err();
        assert!(matches!(err, VaultError::Authentication(_)));

        let err = engine().decrypt(&container, &pw(), other_key(), None).unwrap_err();
        assert!(matches!(err, VaultError::Authentication(_)));
    }

    #[test]
    fn test_decrypt_survives_codec() {
        let payload = b"github\tbob\tX\n".repeat(20);
        let container = engine()
            .encrypt(&payload, &pw(), &test_key().to_public_key(), &EncryptOptions::default())
            .unwrap();
        let parsed = Container::from_bytes(&container.to_bytes(), CHUNK).unwrap();
        assert_eq!(engine().decrypt(&parsed, &pw(), test_key(), None).unwrap(), payload);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_roundtrip_is_byte_exact(
            // high bit clear so every block sits below the modulus
            payload in proptest::collection::vec(0u8..0x80, 1..=600),
            fast in any::<bool>(),
        ) {
            let options = EncryptOptions { fast, ..EncryptOptions::default() };
            prop_assert_eq!(roundtrip(&payload, &options), payload);
        }
    }
}
