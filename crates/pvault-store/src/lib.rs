//! pvault-store: rows on top of the encrypted container
//!
//! # Overview
//! - `records`: the decrypted payload as a version line plus tab-separated
//!   rows, with line-level append and remove spliced through the block model
//! - `passgen`: random passwords for rows inserted without one
//! - `vault`: database operations, each a full read, decrypt, modify,
//!   encrypt and replace cycle against one file

pub mod passgen;
pub mod records;
pub mod vault;

pub use passgen::{passgen, passgen_with};
pub use records::{Record, RecordStore, VERSION_HEADER};
pub use vault::{KeySource, RemoveTarget, Row, Vault};
