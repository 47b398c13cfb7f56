pub mod config;
pub mod error;

pub use config::{ContainerConfig, DatabaseConfig, VaultConfig};
pub use error::{VaultError, VaultResult};
