use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{VaultError, VaultResult};

/// Alphabet used by the password generator when none is configured.
pub const DEFAULT_ALPHABET: &str =
    "qwertyuiopasdfghjklzxcvbnmQWERTYUIOPASDFGHJKLZXCVBNM1234567890!¡()?¿{}[]<>|@#$%&/=+*-_.:;,";

/// Top-level configuration (loaded from config.toml)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Directory new database files are created in
    pub databases_dir: PathBuf,
    pub container: ContainerConfig,
    pub keys: KeyConfig,
    pub passgen: PassgenConfig,
    pub log: LogConfig,
    /// Known databases by name
    pub databases: BTreeMap<String, DatabaseConfig>,
}

/// Container engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Block size in bytes; must equal the RSA modulus size (default: 512)
    pub chunk_size: usize,
    /// Store the fast-auth hash so the key block is found without trial decryption
    pub fast_auth: bool,
    /// Candidate blocks sampled by the entropy selector
    pub try_limit: usize,
    /// Encryption attempts before giving up on a random key block
    pub try_max: usize,
    /// Re-encrypt after read-only operations so the key block moves
    pub refresh_on_read: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyConfig {
    /// RSA modulus size for generated key pairs (default: 4096)
    pub bits: usize,
    /// Directory generated key pairs are written to
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PassgenConfig {
    pub length: usize,
    pub alphabet: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: warn)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

/// File locations of one database and its key pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub dbfile: PathBuf,
    pub privkey: PathBuf,
    pub pubkey: PathBuf,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            databases_dir: PathBuf::from("~/.local/share/pvault/databases"),
            container: ContainerConfig::default(),
            keys: KeyConfig::default(),
            passgen: PassgenConfig::default(),
            log: LogConfig::default(),
            databases: BTreeMap::new(),
        }
    }
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            fast_auth: true,
            try_limit: 5,
            try_max: 10,
            refresh_on_read: true,
        }
    }
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            bits: 4096,
            dir: PathBuf::from("~/.local/share/pvault/keys"),
        }
    }
}

impl Default for PassgenConfig {
    fn default() -> Self {
        Self {
            length: 20,
            alphabet: DEFAULT_ALPHABET.into(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".into(),
            format: "text".into(),
        }
    }
}

impl VaultConfig {
    /// Load the configuration at `path`, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: &Path) -> VaultResult<Self> {
        if !path.exists() {
            tracing::debug!("config file not found: {} (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| VaultError::from_io(e, "reading config", path))?;
        toml::from_str(&content)
            .map_err(|e| VaultError::Config(format!("parsing {}: {e}", path.display())))
    }

    /// Persist the configuration, writing to a temp file then renaming.
    pub fn save(&self, path: &Path) -> VaultResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| VaultError::Config(format!("serializing config: {e}")))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| VaultError::from_io(e, "creating config dir", parent))?;
        }
        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, content)
            .map_err(|e| VaultError::from_io(e, "writing config", &tmp_path))?;
        std::fs::rename(&tmp_path, path)
            .map_err(|e| VaultError::from_io(e, "replacing config", path))?;
        Ok(())
    }

    /// Look up a database by name.
    pub fn database(&self, name: &str) -> VaultResult<&DatabaseConfig> {
        self.databases
            .get(name)
            .ok_or_else(|| VaultError::Config(format!("the database {name} does not exist")))
    }

    /// Register a new database named `name` with the default file layout:
    /// `<databases_dir>/<name>`, `<keys.dir>/<name>` and `<keys.dir>/<name>.pub`.
    pub fn add_database(&mut self, name: &str) -> VaultResult<DatabaseConfig> {
        if name.is_empty() {
            return Err(VaultError::Validation("the database name can not be empty".into()));
        }
        if self.databases.contains_key(name) {
            return Err(VaultError::Config(format!("the database {name} already exists")));
        }
        let keys_dir = expand_tilde(&self.keys.dir);
        let db = DatabaseConfig {
            dbfile: expand_tilde(&self.databases_dir).join(name),
            privkey: keys_dir.join(name),
            pubkey: keys_dir.join(format!("{name}.pub")),
        };
        self.databases.insert(name.to_string(), db.clone());
        Ok(db)
    }

    /// Forget a database. Its files are left in place.
    pub fn remove_database(&mut self, name: &str) -> VaultResult<DatabaseConfig> {
        self.databases
            .remove(name)
            .ok_or_else(|| VaultError::Config(format!("the database {name} does not exist")))
    }
}

/// Expand `~` in path to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_default();
        PathBuf::from(home).join(rest)
    } else {
        path.to_path_buf()
    }
}
