//! AES-256 in ECB steps over pre-padded blocks
//!
//! Every block handed to this cipher is already exactly `chunk_size` bytes,
//! a multiple of the AES block size, so no mode padding is applied.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes256;

use crate::digest::SymmetricKey;
use crate::AES_BLOCK_SIZE;

pub struct BlockCipher {
    cipher: Aes256,
}

impl BlockCipher {
    pub fn new(key: &SymmetricKey) -> Self {
        Self {
            cipher: Aes256::new(GenericArray::from_slice(key.as_bytes())),
        }
    }

    /// Encrypt a block whose length is a multiple of 16.
    pub fn encrypt(&self, block: &[u8]) -> Vec<u8> {
        debug_assert_eq!(block.len() % AES_BLOCK_SIZE, 0);
        let mut out = block.to_vec();
        for step in out.chunks_exact_mut(AES_BLOCK_SIZE) {
            self.cipher.encrypt_block(GenericArray::from_mut_slice(step));
        }
        out
    }

    /// Decrypt a block whose length is a multiple of 16.
    pub fn decrypt(&self, block: &[u8]) -> Vec<u8> {
        debug_assert_eq!(block.len() % AES_BLOCK_SIZE, 0);
        let mut out = block.to_vec();
        for step in out.chunks_exact_mut(AES_BLOCK_SIZE) {
            self.cipher.decrypt_block(GenericArray::from_mut_slice(step));
        }
        out
    }
}

impl std::fmt::Debug for BlockCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockCipher").finish_non_exhaustive()
    }
}
