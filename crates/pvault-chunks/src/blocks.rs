//! Fixed-size block model
//!
//! A payload is cut into blocks of exactly `chunk_size` bytes, except the
//! last one which holds the remainder. Before encryption the last block is
//! topped up with random bytes; the number of bytes added is the container's
//! `padding` and is stripped again after decryption.
//!
//! Invariant: concatenating the (unpadded) blocks in order yields the
//! original payload.

use rand::RngCore;

/// One chunk of payload or ciphertext.
pub type Block = Vec<u8>;

/// Split `payload` into blocks of `size` bytes; the last block holds the
/// remainder. An empty payload (or a zero size) yields no blocks.
pub fn chunk(payload: &[u8], size: usize) -> Vec<Block> {
    if payload.is_empty() || size == 0 {
        return vec![];
    }
    payload.chunks(size).map(<[u8]>::to_vec).collect()
}

/// Append random bytes to the last block until it is `size` bytes long.
///
/// Returns the number of bytes appended, always `< size` for a non-empty
/// last block. No blocks means nothing to pad.
pub fn pad_last(blocks: &mut [Block], size: usize) -> usize {
    let Some(last) = blocks.last_mut() else {
        return 0;
    };
    let padding = size.saturating_sub(last.len());
    if padding > 0 {
        let mut pad = vec![0u8; padding];
        rand::thread_rng().fill_bytes(&mut pad);
        last.extend_from_slice(&pad);
    }
    padding
}

/// Ordered, unpadded plaintext blocks of one payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockStore {
    chunk_size: usize,
    blocks: Vec<Block>,
}

impl BlockStore {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size,
            blocks: Vec::new(),
        }
    }

    pub fn from_payload(payload: &[u8], chunk_size: usize) -> Self {
        Self {
            chunk_size,
            blocks: chunk(payload, chunk_size),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn into_blocks(self) -> Vec<Block> {
        self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Concatenation of all blocks.
    pub fn payload(&self) -> Vec<u8> {
        self.blocks.concat()
    }

    /// Replace the whole content, re-chunking `payload`.
    pub fn set_payload(&mut self, payload: &[u8]) {
        self.blocks = chunk(payload, self.chunk_size);
    }

    /// Splice `bytes` onto the end: fill what is left of the last block,
    /// then push full blocks, then a final partial block.
    pub fn append(&mut self, mut bytes: &[u8]) {
        if let Some(last) = self.blocks.last_mut() {
            let room = self.chunk_size.saturating_sub(last.len()).min(bytes.len());
            last.extend_from_slice(&bytes[..room]);
            bytes = &bytes[room..];
        }
        self.blocks.extend(chunk(bytes, self.chunk_size));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_payload_yields_no_blocks() {
        assert!(chunk(b"", 8).is_empty());
        assert_eq!(pad_last(&mut [], 8), 0);
    }

    #[test]
    fn version_line_in_one_padded_block() {
        let mut blocks = chunk(b"v1\n", 8);
        assert_eq!(blocks.len(), 1);

        let padding = pad_last(&mut blocks, 8);
        assert_eq!(padding, 5);
        assert_eq!(blocks[0].len(), 8);
        assert_eq!(&blocks[0][..3], b"v1\n");
    }

    #[test]
    fn full_last_block_gets_no_padding() {
        let mut blocks = chunk(&[7u8; 32], 16);
        assert_eq!(blocks.len(), 2);
        assert_eq!(pad_last(&mut blocks, 16), 0);
        assert_eq!(blocks[1], vec![7u8; 16]);
    }

    #[test]
    fn append_fills_last_block_first() {
        let mut store = BlockStore::from_payload(b"abcdef", 8);
        store.append(b"ghijklmnopqrstuvwxyz");

        let lens: Vec<usize> = store.blocks().iter().map(Vec::len).collect();
        assert_eq!(lens, vec![8, 8, 8, 2]);
        assert_eq!(store.payload(), b"abcdefghijklmnopqrstuvwxyz");
    }

    #[test]
    fn append_to_empty_store() {
        let mut store = BlockStore::new(4);
        store.append(b"hello");
        assert_eq!(store.len(), 2);
        assert_eq!(store.payload(), b"hello");
    }

    #[test]
    fn set_payload_rechunks() {
        let mut store = BlockStore::from_payload(&[1u8; 40], 16);
        store.set_payload(b"short");
        assert_eq!(store.len(), 1);
        assert_eq!(store.payload(), b"short");
    }

    proptest! {
        #[test]
        fn chunks_concatenate_to_payload(
            data in proptest::collection::vec(any::<u8>(), 0..=4096),
            size in 1usize..=600,
        ) {
            let blocks = chunk(&data, size);
            prop_assert_eq!(blocks.concat(), data.clone());
            for (i, b) in blocks.iter().enumerate() {
                if i + 1 < blocks.len() {
                    prop_assert_eq!(b.len(), size);
                } else {
                    prop_assert!(!b.is_empty() && b.len() <= size);
                }
            }
        }

        #[test]
        fn padding_stays_below_chunk_size(
            data in proptest::collection::vec(any::<u8>(), 1..=2048),
            size in 1usize..=512,
        ) {
            let mut blocks = chunk(&data, size);
            let unpadded_last = blocks.last().map(Vec::len).unwrap_or(0);
            let padding = pad_last(&mut blocks, size);
            prop_assert!(padding < size);
            prop_assert_eq!(unpadded_last + padding, size);
            prop_assert!(blocks.iter().all(|b| b.len() == size));
        }

        #[test]
        fn append_matches_rechunking(
            head in proptest::collection::vec(any::<u8>(), 0..=1024),
            tail in proptest::collection::vec(any::<u8>(), 0..=1024),
            size in 1usize..=256,
        ) {
            let mut store = BlockStore::from_payload(&head, size);
            store.append(&tail);

            let joined = [head.as_slice(), tail.as_slice()].concat();
            let expected = chunk(&joined, size);
            prop_assert_eq!(store.blocks(), expected.as_slice());
        }
    }
}
