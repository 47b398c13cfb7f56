//! Binary container codec
//!
//! ```text
//! [fast:1][padding:2 LE][challenge:20][auth:64, fast only][block 0]..[block n]
//! ```
//!
//! Every stored block is exactly `chunk_size` bytes, the designated one
//! included, so the body is read in fixed strides.

use std::io::Write;
use std::path::Path;

use pvault_chunks::Block;
use pvault_core::{VaultError, VaultResult};

use crate::{AUTH_SIZE, CHALLENGE_SIZE};

/// Header bytes before the optional auth hash
const FIXED_HEADER: usize = 1 + 2 + CHALLENGE_SIZE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Header {
    Fast {
        padding: u16,
        challenge: [u8; CHALLENGE_SIZE],
        auth: [u8; AUTH_SIZE],
    },
    Plain {
        padding: u16,
        challenge: [u8; CHALLENGE_SIZE],
    },
}

impl Header {
    pub fn is_fast(&self) -> bool {
        matches!(self, Header::Fast { .. })
    }

    pub fn padding(&self) -> usize {
        match self {
            Header::Fast { padding, .. } | Header::Plain { padding, .. } => *padding as usize,
        }
    }

    pub fn challenge(&self) -> &[u8; CHALLENGE_SIZE] {
        match self {
            Header::Fast { challenge, .. } | Header::Plain { challenge, .. } => challenge,
        }
    }

    pub fn auth(&self) -> Option<&[u8; AUTH_SIZE]> {
        match self {
            Header::Fast { auth, .. } => Some(auth),
            Header::Plain { .. } => None,
        }
    }

    /// Encoded length in bytes.
    pub fn encoded_len(&self) -> usize {
        if self.is_fast() {
            FIXED_HEADER + AUTH_SIZE
        } else {
            FIXED_HEADER
        }
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(u8::from(self.is_fast()));
        out.extend_from_slice(&(self.padding() as u16).to_le_bytes());
        out.extend_from_slice(self.challenge());
        if let Some(auth) = self.auth() {
            out.extend_from_slice(auth);
        }
    }

    /// Parse a header from the front of `data`, checking `padding` against
    /// `chunk_size`.
    pub fn decode(data: &[u8], chunk_size: usize) -> VaultResult<Self> {
        if data.len() < FIXED_HEADER {
            return Err(VaultError::Format(format!(
                "container too short: {} bytes, header needs {FIXED_HEADER}",
                data.len()
            )));
        }
        let fast = match data[0] {
            0 => false,
            1 => true,
            other => {
                return Err(VaultError::Format(format!("invalid mode byte: {other}")));
            }
        };
        let padding = u16::from_le_bytes([data[1], data[2]]);
        if padding as usize >= chunk_size {
            return Err(VaultError::Format(format!(
                "padding {padding} not below chunk size {chunk_size}"
            )));
        }
        let mut challenge = [0u8; CHALLENGE_SIZE];
        challenge.copy_from_slice(&data[3..FIXED_HEADER]);

        if !fast {
            return Ok(Header::Plain { padding, challenge });
        }

        let Some(auth_bytes) = data.get(FIXED_HEADER..FIXED_HEADER + AUTH_SIZE) else {
            return Err(VaultError::Format("container too short for auth hash".into()));
        };
        let mut auth = [0u8; AUTH_SIZE];
        auth.copy_from_slice(auth_bytes);
        Ok(Header::Fast {
            padding,
            challenge,
            auth,
        })
    }
}

/// Header plus ciphertext blocks, as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    header: Header,
    blocks: Vec<Block>,
}

impl Container {
    pub fn new(header: Header, blocks: Vec<Block>) -> Self {
        Self { header, blocks }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let body: usize = self.blocks.iter().map(Vec::len).sum();
        let mut out = Vec::with_capacity(self.header.encoded_len() + body);
        self.header.encode(&mut out);
        for block in &self.blocks {
            out.extend_from_slice(block);
        }
        out
    }

    pub fn from_bytes(data: &[u8], chunk_size: usize) -> VaultResult<Self> {
        if chunk_size == 0 {
            return Err(VaultError::Validation("chunk size must be non-zero".into()));
        }
        let header = Header::decode(data, chunk_size)?;
        let body = &data[header.encoded_len()..];
        if body.is_empty() {
            return Err(VaultError::Format("container has no blocks".into()));
        }
        if body.len() % chunk_size != 0 {
            return Err(VaultError::Format(format!(
                "body length {} is not a multiple of chunk size {chunk_size}",
                body.len()
            )));
        }
        let blocks = body.chunks_exact(chunk_size).map(<[u8]>::to_vec).collect();
        Ok(Self { header, blocks })
    }

    pub fn read(path: &Path, chunk_size: usize) -> VaultResult<Self> {
        let data = std::fs::read(path).map_err(|e| VaultError::from_io(e, "read", path))?;
        tracing::debug!(path = %path.display(), bytes = data.len(), "container read");
        Self::from_bytes(&data, chunk_size)
    }

    /// Replace `path` atomically: write a sibling temp file, sync, rename.
    pub fn write(&self, path: &Path) -> VaultResult<()> {
        let file_name = path
            .file_name()
            .ok_or_else(|| VaultError::Validation(format!("not a file path: {}", path.display())))?;
        let tmp_path = path.with_file_name(format!(".{}.tmp", file_name.to_string_lossy()));

        let result = (|| -> std::io::Result<()> {
            let mut file = std::fs::File::create(&tmp_path)?;
            file.write_all(&self.to_bytes())?;
            file.sync_all()?;
            std::fs::rename(&tmp_path, path)
        })();
        if let Err(e) = result {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(VaultError::from_io(e, "write", path));
        }
        tracing::debug!(path = %path.display(), blocks = self.blocks.len(), "container written");
        Ok(())
    }
}
