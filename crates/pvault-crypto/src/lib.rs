//! pvault-crypto: hybrid RSA + AES block container
//!
//! Architecture: chunk, hide the key in one block, encrypt
//!
//! ```text
//! payload ──chunk──► [b0][b1]..[bk]..[bn]   (last block random-padded)
//!                            │
//!   key       = SHA-256(bk || password)
//!   challenge = SHA-1(key)
//!   auth      = SHA-512(hex(challenge) || k || password)   (fast mode only)
//!
//!   bk        → raw RSA under the public key (ciphertext replaces the block)
//!   bi (i≠k)  → AES-256-ECB under `key`
//! ```
//!
//! Decryption has to find `k` first: in fast mode by recomputing `auth` per
//! index, otherwise (or when that fails) by trial RSA decryption of every
//! block until the challenge matches.
//!
//! File layout: see [`container`].

pub mod asym;
pub mod container;
pub mod digest;
pub mod discovery;
pub mod engine;
pub mod keys;
pub mod symmetric;

pub use container::{Container, Header};
pub use digest::{auth_tag, derive_block_key, key_challenge, SymmetricKey};
pub use discovery::{discover, discover_fast, discover_slow, verify_block, Designated};
pub use engine::{EncryptOptions, HybridEngine};
pub use keys::{
    check_pair, generate_keypair, load_private_key, load_public_key, stage_keypair,
    write_keypair, write_owner_only, StagedKeypair,
};

/// Size of the derived symmetric key (AES-256)
pub const KEY_SIZE: usize = 32;

/// Size of the SHA-1 challenge stored in the header
pub const CHALLENGE_SIZE: usize = 20;

/// Size of the SHA-512 fast-auth hash stored in the header
pub const AUTH_SIZE: usize = 64;

/// AES block size; chunk sizes must be a multiple of it
pub const AES_BLOCK_SIZE: usize = 16;

/// Default block size, equal to the modulus size of a 4096-bit key
pub const DEFAULT_CHUNK_SIZE: usize = 512;

/// Default RSA modulus size for generated key pairs
pub const DEFAULT_KEY_BITS: usize = 4096;
