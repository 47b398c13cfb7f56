//! Line records over the block model
//!
//! ```text
//! pvault_database:v1.1\tpvault_interface:v1.1\tpvault_config:v0\n   <- line 0, never removed
//! service\tuser\tpassword\n                                          <- data row 0
//! ...
//! ```
//!
//! Rows are addressed by their 0-based position among data rows. Removal
//! works on the exact line text, so duplicate rows are interchangeable and
//! only the first occurrence goes.

use zeroize::{Zeroize, ZeroizeOnDrop};

use pvault_chunks::BlockStore;
use pvault_core::{VaultError, VaultResult};

/// Line 0 of every payload
pub const VERSION_HEADER: &str = "pvault_database:v1.1\tpvault_interface:v1.1\tpvault_config:v0";

/// One `(service, user, password)` row. Fields never contain tabs or newlines.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Record {
    service: String,
    user: String,
    password: String,
}

impl Record {
    pub fn new(service: &str, user: &str, password: &str) -> VaultResult<Self> {
        if service.is_empty() {
            return Err(VaultError::Validation("the service can not be empty".into()));
        }
        if user.is_empty() {
            return Err(VaultError::Validation("the user can not be empty".into()));
        }
        for (name, value) in [("service", service), ("user", user), ("password", password)] {
            if value.contains(['\t', '\n']) {
                return Err(VaultError::Validation(format!(
                    "the {name} can not contain tabs or newlines"
                )));
            }
        }
        Ok(Self {
            service: service.to_string(),
            user: user.to_string(),
            password: password.to_string(),
        })
    }

    /// Parse a raw row (without its newline).
    pub fn parse(line: &str) -> VaultResult<Self> {
        let fields: Vec<&str> = line.split('\t').collect();
        match fields.as_slice() {
            [service, user, password] => Ok(Self {
                service: service.to_string(),
                user: user.to_string(),
                password: password.to_string(),
            }),
            _ => Err(VaultError::Format(format!(
                "row has {} fields, expected 3",
                fields.len()
            ))),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// The row as stored, without its newline.
    pub fn to_line(&self) -> String {
        format!("{}\t{}\t{}", self.service, self.user, self.password)
    }
}

impl std::fmt::Debug for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Record")
            .field("service", &self.service)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// The decrypted payload of one database.
#[derive(Debug, Clone)]
pub struct RecordStore {
    blocks: BlockStore,
}

impl RecordStore {
    /// A payload holding only the version line.
    pub fn new(chunk_size: usize) -> Self {
        Self {
            blocks: BlockStore::from_payload(format!("{VERSION_HEADER}\n").as_bytes(), chunk_size),
        }
    }

    pub fn from_payload(payload: &[u8], chunk_size: usize) -> Self {
        Self {
            blocks: BlockStore::from_payload(payload, chunk_size),
        }
    }

    pub fn payload(&self) -> Vec<u8> {
        self.blocks.payload()
    }

    pub fn blocks(&self) -> &BlockStore {
        &self.blocks
    }

    /// Append `line` and its newline.
    pub fn append(&mut self, line: &str) {
        self.blocks.append(line.as_bytes());
        self.blocks.append(b"\n");
    }

    fn text(payload: &[u8]) -> VaultResult<&str> {
        std::str::from_utf8(payload)
            .map_err(|e| VaultError::Format(format!("payload is not valid UTF-8: {e}")))
    }

    /// Data rows whose service equals `filter` (`*` for all), paired with
    /// their index among all data rows.
    pub fn get_lines(&self, filter: &str) -> VaultResult<Vec<(usize, String)>> {
        let payload = self.payload();
        let text = Self::text(&payload)?;

        let mut lines: Vec<&str> = text.split('\n').collect();
        if lines.last() == Some(&"") {
            lines.pop();
        }
        Ok(lines
            .into_iter()
            .skip(1)
            .enumerate()
            .filter(|(_, line)| filter == "*" || line.split('\t').next() == Some(filter))
            .map(|(i, line)| (i, line.to_string()))
            .collect())
    }

    /// Remove the first occurrence of each target line. Either every target
    /// is found and removed, or nothing changes.
    pub fn remove(&mut self, targets: &[String]) -> VaultResult<()> {
        let mut payload = self.payload();
        let header_end = payload
            .iter()
            .position(|&b| b == b'\n')
            .map(|p| p + 1)
            .ok_or_else(|| VaultError::Format("payload has no version line".into()))?;

        for target in targets {
            let needle = [target.as_bytes(), b"\n"].concat();
            let start = line_starts(&payload, header_end)
                .find(|&p| payload[p..].starts_with(&needle))
                .ok_or_else(|| VaultError::Lookup(format!("record not found: {}", service_of(target))))?;
            payload.drain(start..start + needle.len());
        }

        self.blocks.set_payload(&payload);
        Ok(())
    }

    /// The version line split on tabs.
    pub fn version(&self) -> VaultResult<Vec<String>> {
        let payload = self.payload();
        let text = Self::text(&payload)?;
        match text.split('\n').next() {
            Some(line) if !line.is_empty() => Ok(line.split('\t').map(str::to_string).collect()),
            _ => Err(VaultError::Format("payload has no version line".into())),
        }
    }
}

/// Offsets at which a line begins, from `from` onwards.
fn line_starts(payload: &[u8], from: usize) -> impl Iterator<Item = usize> + '_ {
    std::iter::successors(Some(from).filter(|&p| p < payload.len()), move |&p| {
        payload[p..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|n| p + n + 1)
            .filter(|&next| next < payload.len())
    })
}

/// Service field only, so lookup errors never echo a password.
fn service_of(line: &str) -> &str {
    line.split('\t').next().unwrap_or_default()
}
