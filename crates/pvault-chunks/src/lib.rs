//! pvault-chunks: fixed-size block model and key-block selection
//!
//! # Overview
//! - `blocks`: splits a payload into `chunk_size` blocks, pads the last one,
//!   and splices appended bytes across block boundaries
//! - `entropy`: Shannon entropy and the sampling heuristic that picks which
//!   block carries the symmetric key material

pub mod blocks;
pub mod entropy;

pub use blocks::{chunk, pad_last, Block, BlockStore};
pub use entropy::{select_block, shannon_entropy};
