//! pvault: password databases in hybrid RSA + AES containers
//!
//! Commands:
//!   create <db>                      - new database (and key pair unless --private/--public)
//!   insert <db> <service> <user>     - add a row; an empty password is generated
//!   select <db> <service>            - rows of one service (`*` for all)
//!   list <db>                        - all rows
//!   remove <db> <filter> <index|*>   - remove one matching row or all of them
//!   version <db>                     - payload version fields
//!   change-password <db>             - re-encrypt under a new password
//!   change-key <db>                  - re-encrypt under a new or existing key pair
//!   export <db> <file> / import <db> <file> - TSV with a service/user/password header
//!   passgen                          - print a random password
//!   databases                        - list configured databases
//!
//! The database password is read from PVAULT_PASSWORD, the key passphrase
//! from PVAULT_PASSPHRASE and a row password for insert from
//! PVAULT_ROW_PASSWORD when set, otherwise prompted for.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use secrecy::{ExposeSecret, SecretString};
use std::path::{Path, PathBuf};

use pvault_core::config::expand_tilde;
use pvault_core::{DatabaseConfig, VaultConfig};
use pvault_store::{passgen, KeySource, RemoveTarget, Row, Vault};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "pvault", version, about = "Encrypted password databases")]
struct Cli {
    /// Path to config.toml
    #[arg(
        long,
        short = 'c',
        env = "PVAULT_CONFIG",
        default_value = "~/.config/pvault/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, env = "PVAULT_LOG")]
    log: Option<String>,

    /// Log format (json, text); overrides the config file
    #[arg(long, env = "PVAULT_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a database and register it in the config
    Create {
        name: String,
        /// Use an existing private key instead of generating a pair
        #[arg(long, requires = "public")]
        private: Option<PathBuf>,
        /// Public key matching --private
        #[arg(long, requires = "private")]
        public: Option<PathBuf>,
    },

    /// Add a row; leave the password empty to generate one
    Insert {
        db: String,
        service: String,
        user: String,
    },

    /// Show the rows of one service (`*` for all)
    Select { db: String, service: String },

    /// Show every row
    List { db: String },

    /// Remove the row at <target> (its index) or every row (`*`) matching <filter>
    Remove {
        db: String,
        filter: String,
        #[arg(value_parser = parse_remove_target)]
        target: RemoveTarget,
    },

    /// Show the database version fields
    Version { db: String },

    /// Re-encrypt under a new password
    #[command(name = "change-password")]
    ChangePassword { db: String },

    /// Re-encrypt under a new key pair (generated unless --private/--public)
    #[command(name = "change-key")]
    ChangeKey {
        db: String,
        #[arg(long, requires = "public")]
        private: Option<PathBuf>,
        #[arg(long, requires = "private")]
        public: Option<PathBuf>,
    },

    /// Write every row to a TSV file
    Export { db: String, file: PathBuf },

    /// Append rows from a TSV file
    Import { db: String, file: PathBuf },

    /// Print a random password
    Passgen {
        /// Length (default: from config)
        #[arg(long, short = 'l')]
        length: Option<usize>,
        /// Alphabet (default: from config)
        #[arg(long, short = 'a')]
        alphabet: Option<String>,
    },

    /// List configured databases
    Databases,
}

fn parse_remove_target(s: &str) -> std::result::Result<RemoveTarget, String> {
    if s == "*" {
        return Ok(RemoveTarget::All);
    }
    s.parse()
        .map(RemoveTarget::Index)
        .map_err(|_| format!("expected a row index or `*`, got {s:?}"))
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let mut config = VaultConfig::load(&config_path)
        .with_context(|| format!("loading config: {}", config_path.display()))?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = cli.log_format.clone().unwrap_or(match config.log.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(&level, &format);

    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "pvault starting"
    );

    match cli.command {
        Commands::Create {
            name,
            private,
            public,
        } => cmd_create(&config, &config_path, &name, private, public),
        Commands::Insert { db, service, user } => cmd_insert(&config, &db, &service, &user),
        Commands::Select { db, service } => cmd_select(&config, &db, &service),
        Commands::List { db } => cmd_select(&config, &db, "*"),
        Commands::Remove { db, filter, target } => cmd_remove(&config, &db, &filter, target),
        Commands::Version { db } => cmd_version(&config, &db),
        Commands::ChangePassword { db } => cmd_change_password(&config, &db),
        Commands::ChangeKey {
            db,
            private,
            public,
        } => cmd_change_key(&mut config, &config_path, &db, private, public),
        Commands::Export { db, file } => cmd_export(&config, &db, &file),
        Commands::Import { db, file } => cmd_import(&config, &db, &file),
        Commands::Passgen { length, alphabet } => {
            let password = passgen(
                length.unwrap_or(config.passgen.length),
                alphabet.as_deref().unwrap_or(&config.passgen.alphabet),
            )?;
            println!("{password}");
            Ok(())
        }
        Commands::Databases => {
            for (name, db) in &config.databases {
                println!("{name}\t{}", db.dbfile.display());
            }
            Ok(())
        }
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let layer = fmt::layer().with_writer(std::io::stderr);

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(layer.json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry().with(filter).with(layer).init();
        }
    }
}

// ── Secrets ───────────────────────────────────────────────────────────────────

/// Read a secret from `env_var`, or prompt on the terminal.
fn read_secret(env_var: &str, prompt: &str) -> Result<SecretString> {
    if let Ok(value) = std::env::var(env_var) {
        return Ok(SecretString::from(value));
    }
    let value = rpassword::prompt_password(prompt).context("reading from terminal")?;
    Ok(SecretString::from(value))
}

/// Prompt twice for a new secret unless it comes from the environment.
fn read_new_secret(env_var: &str, prompt: &str) -> Result<SecretString> {
    if let Ok(value) = std::env::var(env_var) {
        return Ok(SecretString::from(value));
    }
    let first = rpassword::prompt_password(prompt).context("reading from terminal")?;
    let second = rpassword::prompt_password("Repeat: ").context("reading from terminal")?;
    confirm_entry(first, second)
}

fn confirm_entry(first: String, second: String) -> Result<SecretString> {
    let first = SecretString::from(first);
    let second = SecretString::from(second);
    if first.expose_secret() != second.expose_secret() {
        anyhow::bail!("the entries do not match");
    }
    Ok(first)
}

/// First `<name>.<n>` / `<name>.<n>.pub` beside `private` where neither
/// file exists. A numeric suffix already on `private` is replaced, so
/// repeated rotations count up instead of stacking suffixes.
fn rotated_key_paths(private: &Path) -> (PathBuf, PathBuf) {
    let name = private
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let base = match name.rsplit_once('.') {
        Some((stem, n)) if !stem.is_empty() && n.parse::<u32>().is_ok() => stem.to_string(),
        _ => name,
    };
    let mut n = 1u32;
    loop {
        let candidate = private.with_file_name(format!("{base}.{n}"));
        let public = private.with_file_name(format!("{base}.{n}.pub"));
        if !candidate.exists() && !public.exists() {
            return (candidate, public);
        }
        n += 1;
    }
}

fn database(config: &VaultConfig, name: &str) -> Result<DatabaseConfig> {
    Ok(config.database(name)?.clone())
}

fn open<'a>(config: &'a VaultConfig, name: &str) -> Result<Vault<'a>> {
    let db = database(config, name)?;
    let password = read_secret("PVAULT_PASSWORD", "Database password: ")?;
    let passphrase = read_secret("PVAULT_PASSPHRASE", "Key passphrase (empty if none): ")?;
    Ok(Vault::open(config, db, password, passphrase))
}

/// Existing pair from flags, or a generated one at the given default paths.
fn key_source(
    config: &VaultConfig,
    private: Option<PathBuf>,
    public: Option<PathBuf>,
    default_private: PathBuf,
    default_public: PathBuf,
) -> Result<KeySource> {
    Ok(match (private, public) {
        (Some(private), Some(public)) => KeySource::Existing {
            private: expand_tilde(&private),
            public: expand_tilde(&public),
            passphrase: read_secret("PVAULT_PASSPHRASE", "Key passphrase (empty if none): ")?,
        },
        _ => KeySource::Generate {
            private: default_private,
            public: default_public,
            passphrase: read_new_secret(
                "PVAULT_PASSPHRASE",
                "New key passphrase (empty for none): ",
            )?,
            bits: config.keys.bits,
        },
    })
}

fn print_rows(rows: &[Row]) {
    for row in rows {
        println!("{}\t{}\t{}\t{}", row.index, row.service, row.user, row.password);
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

fn cmd_create(
    config: &VaultConfig,
    config_path: &Path,
    name: &str,
    private: Option<PathBuf>,
    public: Option<PathBuf>,
) -> Result<()> {
    let mut registry = config.clone();
    let db = registry.add_database(name)?;

    let password = read_new_secret("PVAULT_PASSWORD", "New database password: ")?;
    let keys = key_source(config, private, public, db.privkey.clone(), db.pubkey.clone())?;
    let vault = Vault::create(config, db.dbfile.clone(), password, keys)
        .with_context(|| format!("creating database {name}"))?;

    registry.databases.insert(name.to_string(), vault.database().clone());
    registry
        .save(config_path)
        .with_context(|| format!("saving config: {}", config_path.display()))?;
    println!("created {name} at {}", vault.database().dbfile.display());
    Ok(())
}

fn cmd_insert(config: &VaultConfig, db: &str, service: &str, user: &str) -> Result<()> {
    let vault = open(config, db)?;
    let password = read_new_secret("PVAULT_ROW_PASSWORD", "Row password (empty to generate): ")?;
    if let Some(generated) = vault.insert(service, user, password.expose_secret())? {
        println!("{generated}");
    }
    Ok(())
}

fn cmd_select(config: &VaultConfig, db: &str, service: &str) -> Result<()> {
    let rows = open(config, db)?.select(service)?;
    print_rows(&rows);
    Ok(())
}

fn cmd_remove(config: &VaultConfig, db: &str, filter: &str, target: RemoveTarget) -> Result<()> {
    let removed = open(config, db)?.remove(filter, target)?;
    println!("removed {removed} row(s)");
    Ok(())
}

fn cmd_version(config: &VaultConfig, db: &str) -> Result<()> {
    for field in open(config, db)?.version()? {
        println!("{field}");
    }
    Ok(())
}

fn cmd_change_password(config: &VaultConfig, db: &str) -> Result<()> {
    let mut vault = open(config, db)?;
    vault.verify_auth()?;
    let new_password = read_new_secret("PVAULT_NEW_PASSWORD", "New database password: ")?;
    if new_password.expose_secret().is_empty() {
        anyhow::bail!("the password can not be empty");
    }
    vault.change_password(new_password)?;
    println!("password changed");
    Ok(())
}

fn cmd_change_key(
    config: &mut VaultConfig,
    config_path: &Path,
    db: &str,
    private: Option<PathBuf>,
    public: Option<PathBuf>,
) -> Result<()> {
    let current = database(config, db)?;
    let updated = {
        let mut vault = open(config, db)?;
        vault.verify_auth()?;
        let (default_private, default_public) = rotated_key_paths(&current.privkey);
        let keys = key_source(config, private, public, default_private, default_public)?;
        vault.change_keypair(keys)?.clone()
    };

    config.databases.insert(db.to_string(), updated.clone());
    config
        .save(config_path)
        .with_context(|| format!("saving config: {}", config_path.display()))?;
    println!("{db} now uses {}", updated.privkey.display());
    Ok(())
}

fn cmd_export(config: &VaultConfig, db: &str, file: &Path) -> Result<()> {
    let count = open(config, db)?.export(file)?;
    println!("exported {count} row(s) to {}", file.display());
    Ok(())
}

fn cmd_import(config: &VaultConfig, db: &str, file: &Path) -> Result<()> {
    let count = open(config, db)?.import(file)?;
    println!("imported {count} row(s) from {}", file.display());
    Ok(())
}
