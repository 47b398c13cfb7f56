//! Database operations
//!
//! Every operation reads the container from disk, decrypts it, works on the
//! [`RecordStore`] and, when something changed, encrypts again and replaces
//! the file atomically. Read-only operations re-encrypt as well when
//! `refresh_on_read` is set, so the designated block moves on every access.

use std::path::{Path, PathBuf};

use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use secrecy::SecretString;

use pvault_core::{DatabaseConfig, VaultConfig, VaultError, VaultResult};
use pvault_crypto::{
    check_pair, generate_keypair, load_private_key, load_public_key, stage_keypair,
    write_owner_only, Container, EncryptOptions, HybridEngine, StagedKeypair,
};

use crate::passgen::passgen;
use crate::records::{Record, RecordStore};

/// Header line of export files
const EXPORT_HEADER: &str = "service\tuser\tpassword";

/// Where a database's key pair comes from.
pub enum KeySource {
    /// Generate a fresh pair and write it to `private` and `public`.
    Generate {
        private: PathBuf,
        public: PathBuf,
        passphrase: SecretString,
        bits: usize,
    },
    /// Use a pair that already exists on disk.
    Existing {
        private: PathBuf,
        public: PathBuf,
        passphrase: SecretString,
    },
}

struct KeyPair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl KeySource {
    /// Load or generate the pair in memory and check its modulus matches
    /// `chunk_size`. Writes nothing.
    fn prepare(&self, chunk_size: usize) -> VaultResult<KeyPair> {
        let pair = match self {
            KeySource::Generate { bits, .. } => {
                if *bits != chunk_size * 8 {
                    return Err(VaultError::Validation(format!(
                        "a {bits}-bit key does not match the {chunk_size}-byte chunk size"
                    )));
                }
                let key = generate_keypair(*bits)?;
                KeyPair {
                    public: key.to_public_key(),
                    private: key,
                }
            }
            KeySource::Existing {
                private,
                public,
                passphrase,
            } => {
                let pair = KeyPair {
                    private: load_private_key(private, passphrase)?,
                    public: load_public_key(public)?,
                };
                check_pair(&pair.private, &pair.public)?;
                pair
            }
        };
        if pair.public.size() != chunk_size {
            return Err(VaultError::KeyFormat(format!(
                "RSA modulus is {} bytes but the chunk size is {chunk_size}",
                pair.public.size()
            )));
        }
        Ok(pair)
    }

    /// Write a generated pair beside its destinations. The live files are
    /// only replaced by committing the stage, after the database has been
    /// re-encrypted under the new key.
    fn stage(&self, pair: &KeyPair) -> VaultResult<Option<StagedKeypair>> {
        match self {
            KeySource::Generate {
                private,
                public,
                passphrase,
                ..
            } => stage_keypair(&pair.private, private, public, passphrase).map(Some),
            KeySource::Existing { .. } => Ok(None),
        }
    }

    fn into_parts(self) -> (PathBuf, PathBuf, SecretString) {
        match self {
            KeySource::Generate {
                private,
                public,
                passphrase,
                ..
            }
            | KeySource::Existing {
                private,
                public,
                passphrase,
            } => (private, public, passphrase),
        }
    }
}

/// Which matching rows `remove` deletes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveTarget {
    /// The row at this index among all rows
    Index(usize),
    All,
}

/// A row as returned by `select` and `list`.
#[derive(Clone, PartialEq, Eq)]
pub struct Row {
    pub index: usize,
    pub service: String,
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for Row {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Row")
            .field("index", &self.index)
            .field("service", &self.service)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// An open database: file locations plus the secrets that unlock it.
pub struct Vault<'a> {
    config: &'a VaultConfig,
    db: DatabaseConfig,
    password: SecretString,
    passphrase: SecretString,
}

impl<'a> Vault<'a> {
    /// Bind to an existing database. Nothing is read until an operation runs.
    pub fn open(
        config: &'a VaultConfig,
        db: DatabaseConfig,
        password: SecretString,
        passphrase: SecretString,
    ) -> Self {
        Self {
            config,
            db,
            password,
            passphrase,
        }
    }

    /// Create a database at `dbfile` holding only the version line.
    pub fn create(
        config: &'a VaultConfig,
        dbfile: PathBuf,
        password: SecretString,
        keys: KeySource,
    ) -> VaultResult<Self> {
        if dbfile.exists() {
            return Err(VaultError::Validation(format!(
                "{} already exists",
                dbfile.display()
            )));
        }
        let chunk_size = config.container.chunk_size;
        let pair = keys.prepare(chunk_size)?;
        let staged = keys.stage(&pair)?;
        let (privkey, pubkey, passphrase) = keys.into_parts();

        if let Some(parent) = dbfile.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| VaultError::from_io(e, "create directory", parent))?;
        }

        let vault = Self {
            config,
            db: DatabaseConfig {
                dbfile,
                privkey,
                pubkey,
            },
            password,
            passphrase,
        };
        vault.save_with(&RecordStore::new(chunk_size), &pair.public)?;
        if let Some(staged) = staged {
            staged.commit()?;
        }
        tracing::info!(path = %vault.db.dbfile.display(), "database created");
        Ok(vault)
    }

    pub fn database(&self) -> &DatabaseConfig {
        &self.db
    }

    fn engine(&self) -> VaultResult<HybridEngine> {
        HybridEngine::new(self.config.container.chunk_size)
    }

    fn load(&self) -> VaultResult<RecordStore> {
        let private = load_private_key(&self.db.privkey, &self.passphrase)?;
        self.load_with(&private)
    }

    fn load_with(&self, private: &RsaPrivateKey) -> VaultResult<RecordStore> {
        let engine = self.engine()?;
        let container = Container::read(&self.db.dbfile, engine.chunk_size())?;
        let payload = engine.decrypt(&container, &self.password, private, None)?;
        tracing::debug!(bytes = payload.len(), "database decrypted");
        Ok(RecordStore::from_payload(&payload, engine.chunk_size()))
    }

    fn save(&self, store: &RecordStore) -> VaultResult<()> {
        let public = load_public_key(&self.db.pubkey)?;
        self.save_with(store, &public)
    }

    fn save_with(&self, store: &RecordStore, public: &RsaPublicKey) -> VaultResult<()> {
        let engine = self.engine()?;
        let options = EncryptOptions::from_config(&self.config.container);
        let container = engine.encrypt(&store.payload(), &self.password, public, &options)?;
        container.write(&self.db.dbfile)?;
        tracing::info!(
            path = %self.db.dbfile.display(),
            blocks = container.blocks().len(),
            "database saved"
        );
        Ok(())
    }

    fn refresh(&self, store: &RecordStore) -> VaultResult<()> {
        if self.config.container.refresh_on_read {
            self.save(store)?;
        }
        Ok(())
    }

    /// Check that the password and private key open the database.
    pub fn verify_auth(&self) -> VaultResult<()> {
        self.load().map(|_| ())
    }

    /// Add a row. An empty `password` is replaced by a generated one, which
    /// is returned.
    pub fn insert(&self, service: &str, user: &str, password: &str) -> VaultResult<Option<String>> {
        // validate before generating so bad input fails fast
        Record::new(service, user, password)?;

        let generated = if password.is_empty() {
            Some(passgen(
                self.config.passgen.length,
                &self.config.passgen.alphabet,
            )?)
        } else {
            None
        };
        let record = Record::new(service, user, generated.as_deref().unwrap_or(password))?;

        let mut store = self.load()?;
        store.append(&record.to_line());
        self.save(&store)?;
        tracing::debug!(service, "row inserted");
        Ok(generated)
    }

    fn rows(store: &RecordStore, filter: &str) -> VaultResult<Vec<Row>> {
        store
            .get_lines(filter)?
            .into_iter()
            .map(|(index, line)| {
                let record = Record::parse(&line)?;
                Ok(Row {
                    index,
                    service: record.service().to_string(),
                    user: record.user().to_string(),
                    password: record.password().to_string(),
                })
            })
            .collect()
    }

    /// Rows whose service equals `service` (`*` for all).
    pub fn select(&self, service: &str) -> VaultResult<Vec<Row>> {
        let store = self.load()?;
        let rows = Self::rows(&store, service)?;
        self.refresh(&store)?;
        Ok(rows)
    }

    pub fn list(&self) -> VaultResult<Vec<Row>> {
        self.select("*")
    }

    /// Remove rows matching `filter` (a service or `*`). Returns how many
    /// were removed.
    pub fn remove(&self, filter: &str, target: RemoveTarget) -> VaultResult<usize> {
        let mut store = self.load()?;
        let matching = store.get_lines(filter)?;

        let targets: Vec<String> = match target {
            RemoveTarget::Index(index) => {
                let line = matching
                    .into_iter()
                    .find(|(i, _)| *i == index)
                    .map(|(_, line)| line)
                    .ok_or_else(|| {
                        VaultError::Lookup(format!("no row {index} matching {filter}"))
                    })?;
                vec![line]
            }
            RemoveTarget::All => matching.into_iter().map(|(_, line)| line).collect(),
        };
        if targets.is_empty() {
            return Err(VaultError::Lookup(format!("no rows matching {filter}")));
        }

        store.remove(&targets)?;
        self.save(&store)?;
        tracing::debug!(filter, removed = targets.len(), "rows removed");
        Ok(targets.len())
    }

    /// The version line fields.
    pub fn version(&self) -> VaultResult<Vec<String>> {
        let store = self.load()?;
        let version = store.version()?;
        self.refresh(&store)?;
        Ok(version)
    }

    /// Re-encrypt under `new_password`.
    pub fn change_password(&mut self, new_password: SecretString) -> VaultResult<()> {
        let store = self.load()?;
        self.password = new_password;
        self.save(&store)?;
        tracing::info!(path = %self.db.dbfile.display(), "password changed");
        Ok(())
    }

    /// Re-encrypt under another key pair. Returns the updated file locations
    /// so the caller can persist them.
    ///
    /// A generated pair only replaces its files once the database is saved
    /// under it, so a failed save leaves the current pair in charge.
    pub fn change_keypair(&mut self, keys: KeySource) -> VaultResult<&DatabaseConfig> {
        let store = self.load()?;
        let pair = keys.prepare(self.config.container.chunk_size)?;
        let staged = keys.stage(&pair)?;
        let (privkey, pubkey, passphrase) = keys.into_parts();

        self.save_with(&store, &pair.public)?;
        if let Some(staged) = staged {
            staged.commit()?;
        }
        self.db.privkey = privkey;
        self.db.pubkey = pubkey;
        self.passphrase = passphrase;
        tracing::info!(path = %self.db.dbfile.display(), "key pair changed");
        Ok(&self.db)
    }

    /// Write every row to `path` as TSV. Returns the row count.
    pub fn export(&self, path: &Path) -> VaultResult<usize> {
        let store = self.load()?;
        let rows = Self::rows(&store, "*")?;
        if rows.is_empty() {
            return Err(VaultError::Validation("the database has no rows to export".into()));
        }

        let mut out = format!("{EXPORT_HEADER}\n");
        for row in &rows {
            out.push_str(&format!("{}\t{}\t{}\n", row.service, row.user, row.password));
        }
        write_owner_only(path, out.as_bytes()).map_err(|e| VaultError::from_io(e, "write", path))?;
        self.refresh(&store)?;
        Ok(rows.len())
    }

    /// Append rows from a TSV file written by `export`. Returns the row count.
    pub fn import(&self, path: &Path) -> VaultResult<usize> {
        let content =
            std::fs::read_to_string(path).map_err(|e| VaultError::from_io(e, "read", path))?;
        let mut lines = content.lines();
        if lines.next() != Some(EXPORT_HEADER) {
            return Err(VaultError::Format(format!(
                "{} does not start with the header {EXPORT_HEADER:?}",
                path.display()
            )));
        }

        let mut records = Vec::new();
        for (n, line) in lines.enumerate().filter(|(_, l)| !l.is_empty()) {
            let fields: Vec<&str> = line.split('\t').collect();
            let [service, user, password] = fields.as_slice() else {
                return Err(VaultError::Format(format!(
                    "{} line {}: expected 3 fields, got {}",
                    path.display(),
                    n + 2,
                    fields.len()
                )));
            };
            let password = if password.is_empty() {
                passgen(self.config.passgen.length, &self.config.passgen.alphabet)?
            } else {
                password.to_string()
            };
            records.push(Record::new(service, user, &password)?);
        }
        if records.is_empty() {
            return Ok(0);
        }

        let mut store = self.load()?;
        for record in &records {
            store.append(&record.to_line());
        }
        self.save(&store)?;
        tracing::debug!(rows = records.len(), "rows imported");
        Ok(records.len())
    }
}
