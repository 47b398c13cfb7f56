use std::path::Path;

use thiserror::Error;

pub type VaultResult<T> = Result<T, VaultError>;

#[derive(Debug, Error)]
pub enum VaultError {
    /// Malformed container, header, payload or import file.
    #[error("format error: {0}")]
    Format(String),

    /// Wrong password, private key or passphrase. The message never says
    /// which blocks were tried.
    #[error("authentication failure: {0}")]
    Authentication(String),

    /// Wrong PEM type or unusable key for this container.
    #[error("key format error: {0}")]
    KeyFormat(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("validation error: {0}")]
    Validation(String),

    /// A record targeted for removal is not present.
    #[error("lookup error: {0}")]
    Lookup(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VaultError {
    /// The one message every discovery failure carries.
    pub fn authentication() -> Self {
        VaultError::Authentication("wrong password and/or private key".into())
    }

    /// Classify an I/O error raised while touching `path`.
    ///
    /// `PermissionDenied` becomes [`VaultError::Permission`] and `NotFound`
    /// becomes [`VaultError::Validation`]; everything else stays an I/O error.
    pub fn from_io(err: std::io::Error, action: &str, path: &Path) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => {
                VaultError::Permission(format!("{action} {}", path.display()))
            }
            std::io::ErrorKind::NotFound => {
                VaultError::Validation(format!("no such file or directory: {}", path.display()))
            }
            _ => VaultError::Io(err),
        }
    }
}
