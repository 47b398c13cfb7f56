//! RSA key pairs and their PEM files
//!
//! Private keys are written as PKCS#8, encrypted under the passphrase when
//! one is given. Loading also accepts PKCS#1 (`RSA PRIVATE KEY`,
//! `RSA PUBLIC KEY`) so existing OpenSSL-generated pairs can be used.

use std::io::Write;
use std::path::{Path, PathBuf};

use pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use secrecy::{ExposeSecret, SecretString};

use pvault_core::{VaultError, VaultResult};

const MIN_KEY_BITS: usize = 512;

/// Generate a key whose modulus is exactly `bits` long.
///
/// `bits` must be a multiple of 128 so the modulus size is a valid chunk size.
pub fn generate_keypair(bits: usize) -> VaultResult<RsaPrivateKey> {
    if bits < MIN_KEY_BITS || bits % 128 != 0 {
        return Err(VaultError::Validation(format!(
            "key size must be a multiple of 128 and at least {MIN_KEY_BITS} bits, got {bits}"
        )));
    }
    tracing::debug!(bits, "generating RSA key pair");
    RsaPrivateKey::new(&mut rand::thread_rng(), bits)
        .map_err(|e| VaultError::KeyFormat(format!("generating key: {e}")))
}

/// Write `key` as a PEM pair. An empty passphrase leaves the private key
/// unencrypted. Each file is replaced atomically.
pub fn write_keypair(
    key: &RsaPrivateKey,
    private_path: &Path,
    public_path: &Path,
    passphrase: &SecretString,
) -> VaultResult<()> {
    stage_keypair(key, private_path, public_path, passphrase)?.commit()?;
    tracing::info!(
        private = %private_path.display(),
        public = %public_path.display(),
        "key pair written"
    );
    Ok(())
}

/// Write `key` next to its destinations without touching them. Nothing is
/// replaced until [`StagedKeypair::commit`]; dropping the stage removes the
/// temp files.
pub fn stage_keypair(
    key: &RsaPrivateKey,
    private_path: &Path,
    public_path: &Path,
    passphrase: &SecretString,
) -> VaultResult<StagedKeypair> {
    let passphrase = passphrase.expose_secret();
    let private_pem = if passphrase.is_empty() {
        key.to_pkcs8_pem(LineEnding::LF)
    } else {
        key.to_pkcs8_encrypted_pem(&mut rand::thread_rng(), passphrase.as_bytes(), LineEnding::LF)
    }
    .map_err(|e| VaultError::KeyFormat(format!("encoding private key: {e}")))?;

    let public_pem = key
        .to_public_key()
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| VaultError::KeyFormat(format!("encoding public key: {e}")))?;

    for path in [private_path, public_path] {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| VaultError::from_io(e, "create directory", parent))?;
        }
    }

    let mut staged = StagedKeypair { files: Vec::new() };
    for (path, contents, owner_only) in [
        (private_path, private_pem.as_bytes(), true),
        (public_path, public_pem.as_bytes(), false),
    ] {
        let tmp = temp_sibling(path)?;
        // pushed first so a partial write is cleaned up on drop
        staged.files.push((tmp.clone(), path.to_path_buf()));
        let written = if owner_only {
            write_owner_only(&tmp, contents)
        } else {
            write_synced(&tmp, contents)
        };
        written.map_err(|e| VaultError::from_io(e, "write", &tmp))?;
    }
    Ok(staged)
}

/// A key pair written to temp files beside its final paths.
#[derive(Debug)]
pub struct StagedKeypair {
    /// (temp, destination), private key first
    files: Vec<(PathBuf, PathBuf)>,
}

impl StagedKeypair {
    /// Rename the temp files over their destinations. On failure the
    /// remaining temp files stay on disk and the error names the first one.
    pub fn commit(mut self) -> VaultResult<()> {
        for (tmp, dest) in std::mem::take(&mut self.files) {
            std::fs::rename(&tmp, &dest).map_err(|e| {
                tracing::error!(staged = %tmp.display(), "key file left beside its destination");
                VaultError::from_io(e, "rename", &tmp)
            })?;
        }
        Ok(())
    }
}

impl Drop for StagedKeypair {
    fn drop(&mut self) {
        for (tmp, _) in self.files.drain(..) {
            let _ = std::fs::remove_file(tmp);
        }
    }
}

fn temp_sibling(path: &Path) -> VaultResult<PathBuf> {
    let file_name = path
        .file_name()
        .ok_or_else(|| VaultError::Validation(format!("not a file path: {}", path.display())))?;
    Ok(path.with_file_name(format!(".{}.tmp", file_name.to_string_lossy())))
}

/// Create or truncate `path` readable by the owner only (0600 on unix) and
/// write `contents` to it.
#[cfg(unix)]
pub fn write_owner_only(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // mode only applies on create
    file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    file.write_all(contents)?;
    file.sync_all()
}

#[cfg(not(unix))]
pub fn write_owner_only(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    write_synced(path, contents)
}

fn write_synced(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

/// Label of the first `-----BEGIN <label>-----` line.
fn pem_label(pem: &str) -> Option<&str> {
    pem.lines()
        .find_map(|line| line.trim().strip_prefix("-----BEGIN "))
        .and_then(|rest| rest.strip_suffix("-----"))
}

fn read_pem(path: &Path) -> VaultResult<String> {
    std::fs::read_to_string(path).map_err(|e| VaultError::from_io(e, "read", path))
}

pub fn load_public_key(path: &Path) -> VaultResult<RsaPublicKey> {
    let pem = read_pem(path)?;
    let parsed = match pem_label(&pem) {
        Some("PUBLIC KEY") => RsaPublicKey::from_public_key_pem(&pem).map_err(|e| e.to_string()),
        Some("RSA PUBLIC KEY") => RsaPublicKey::from_pkcs1_pem(&pem).map_err(|e| e.to_string()),
        Some(label) if label.contains("PRIVATE KEY") => {
            return Err(VaultError::KeyFormat(format!(
                "{} holds a private key, expected a public key",
                path.display()
            )));
        }
        _ => Err("no public key PEM block".to_string()),
    };
    parsed.map_err(|e| VaultError::KeyFormat(format!("{}: {e}", path.display())))
}

pub fn load_private_key(path: &Path, passphrase: &SecretString) -> VaultResult<RsaPrivateKey> {
    let pem = read_pem(path)?;
    let parsed = match pem_label(&pem) {
        Some("ENCRYPTED PRIVATE KEY") => {
            let passphrase = passphrase.expose_secret();
            if passphrase.is_empty() {
                return Err(VaultError::Authentication(format!(
                    "{} is encrypted and needs a passphrase",
                    path.display()
                )));
            }
            return RsaPrivateKey::from_pkcs8_encrypted_pem(&pem, passphrase.as_bytes()).map_err(
                |_| VaultError::Authentication(format!("wrong passphrase for {}", path.display())),
            );
        }
        Some("PRIVATE KEY") => RsaPrivateKey::from_pkcs8_pem(&pem).map_err(|e| e.to_string()),
        Some("RSA PRIVATE KEY") => RsaPrivateKey::from_pkcs1_pem(&pem).map_err(|e| e.to_string()),
        Some(label) if label.contains("PUBLIC KEY") => {
            return Err(VaultError::KeyFormat(format!(
                "{} holds a public key, expected a private key",
                path.display()
            )));
        }
        _ => Err("no private key PEM block".to_string()),
    };
    parsed.map_err(|e| VaultError::KeyFormat(format!("{}: {e}", path.display())))
}

/// KeyFormat error unless `public` is the public half of `private`.
pub fn check_pair(private: &RsaPrivateKey, public: &RsaPublicKey) -> VaultResult<()> {
    if private.to_public_key() == *public {
        Ok(())
    } else {
        Err(VaultError::KeyFormat(
            "public key does not belong to the private key".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs1::{EncodeRsaPrivateKey, EncodeRsaPublicKey};
    use std::sync::OnceLock;

    fn test_key() -> &'static RsaPrivateKey {
        static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
        KEY.get_or_init(|| generate_keypair(1024).unwrap())
    }

    #[test]
    fn test_generate_rejects_odd_sizes() {
        assert!(matches!(generate_keypair(1000), Err(VaultError::Validation(_))));
        assert!(matches!(generate_keypair(256), Err(VaultError::Validation(_))));
    }

    #[test]
    fn test_plain_pair_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let (private, public) = (dir.path().join("keys/db"), dir.path().join("keys/db.pub"));
        write_keypair(test_key(), &private, &public, &SecretString::from("")).unwrap();

        let pem = std::fs::read_to_string(&private).unwrap();
        assert_eq!(pem_label(&pem), Some("PRIVATE KEY"));

        let loaded = load_private_key(&private, &SecretString::from("")).unwrap();
        assert_eq!(&loaded, test_key());
        let loaded_public = load_public_key(&public).unwrap();
        check_pair(&loaded, &loaded_public).unwrap();
    }

    #[test]
    fn test_encrypted_pair_needs_passphrase() {
        let dir = tempfile::tempdir().unwrap();
        let (private, public) = (dir.path().join("db"), dir.path().join("db.pub"));
        write_keypair(test_key(), &private, &public, &SecretString::from("s3cret")).unwrap();

        let pem = std::fs::read_to_string(&private).unwrap();
        assert_eq!(pem_label(&pem), Some("ENCRYPTED PRIVATE KEY"));

        assert!(matches!(
            load_private_key(&private, &SecretString::from("")),
            Err(VaultError::Authentication(_))
        ));
        assert!(matches!(
            load_private_key(&private, &SecretString::from("wrong")),
            Err(VaultError::Authentication(_))
        ));
        let loaded = load_private_key(&private, &SecretString::from("s3cret")).unwrap();
        assert_eq!(&loaded, test_key());
    }

    #[test]
    fn test_swapped_files_are_key_format_errors() {
        let dir = tempfile::tempdir().unwrap();
        let (private, public) = (dir.path().join("db"), dir.path().join("db.pub"));
        write_keypair(test_key(), &private, &public, &SecretString::from("")).unwrap();

        assert!(matches!(load_public_key(&private), Err(VaultError::KeyFormat(_))));
        assert!(matches!(
            load_private_key(&public, &SecretString::from("")),
            Err(VaultError::KeyFormat(_))
        ));
    }

    #[test]
    fn test_pkcs1_files_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let private = dir.path().join("rsa");
        let public = dir.path().join("rsa.pub");
        std::fs::write(&private, test_key().to_pkcs1_pem(LineEnding::LF).unwrap().as_bytes())
            .unwrap();
        std::fs::write(
            &public,
            test_key().to_public_key().to_pkcs1_pem(LineEnding::LF).unwrap(),
        )
        .unwrap();

        let loaded = load_private_key(&private, &SecretString::from("")).unwrap();
        check_pair(&loaded, &load_public_key(&public).unwrap()).unwrap();
    }

    #[test]
    fn test_garbage_and_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let junk = dir.path().join("junk");
        std::fs::write(&junk, "not a key").unwrap();

        assert!(matches!(load_public_key(&junk), Err(VaultError::KeyFormat(_))));
        assert!(matches!(
            load_private_key(&dir.path().join("absent"), &SecretString::from("")),
            Err(VaultError::Validation(_))
        ));
    }

    #[test]
    fn test_mismatched_pair() {
        let other = generate_keypair(512).unwrap();
        assert!(matches!(
            check_pair(test_key(), &other.to_public_key()),
            Err(VaultError::KeyFormat(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_private_file_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let (private, public) = (dir.path().join("db"), dir.path().join("db.pub"));
        write_keypair(test_key(), &private, &public, &SecretString::from("")).unwrap();

        let mode = std::fs::metadata(&private).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn test_owner_only_tightens_existing_file() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.tsv");
        std::fs::write(&path, "old").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        write_owner_only(&path, b"new").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"new");
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_dropped_stage_leaves_destinations_alone() {
        let dir = tempfile::tempdir().unwrap();
        let (private, public) = (dir.path().join("db"), dir.path().join("db.pub"));
        std::fs::write(&private, "live private").unwrap();
        std::fs::write(&public, "live public").unwrap();

        let staged = stage_keypair(test_key(), &private, &public, &SecretString::from("")).unwrap();
        assert!(dir.path().join(".db.tmp").exists());
        assert!(dir.path().join(".db.pub.tmp").exists());
        assert_eq!(std::fs::read_to_string(&private).unwrap(), "live private");
        drop(staged);

        assert!(!dir.path().join(".db.tmp").exists());
        assert!(!dir.path().join(".db.pub.tmp").exists());
        assert_eq!(std::fs::read_to_string(&private).unwrap(), "live private");
        assert_eq!(std::fs::read_to_string(&public).unwrap(), "live public");
    }

    #[test]
    fn test_committed_stage_replaces_destinations() {
        let dir = tempfile::tempdir().unwrap();
        let (private, public) = (dir.path().join("db"), dir.path().join("db.pub"));
        std::fs::write(&private, "old").unwrap();

        stage_keypair(test_key(), &private, &public, &SecretString::from(""))
            .unwrap()
            .commit()
            .unwrap();
        let loaded = load_private_key(&private, &SecretString::from("")).unwrap();
        check_pair(&loaded, &load_public_key(&public).unwrap()).unwrap();
        assert!(!dir.path().join(".db.tmp").exists());
    }
}
