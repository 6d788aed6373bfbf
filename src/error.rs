//! Error types for the vault engine.
//!
//! The engine uses a single flat error enum. Lower-layer failures (I/O,
//! serialization, crypto backends) are wrapped into a typed kind with a
//! short context string at the point where they occur. Errors that have a
//! sensible operator remedy expose it through [`VaultError::suggestion`].

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// All errors surfaced by the vault engine.
#[derive(Error, Debug)]
pub enum VaultError {
    /// The vault directory layout has not been created yet.
    #[error("Vault is not initialized")]
    VaultNotInitialized,

    /// This machine has no key pair or machine record.
    #[error("Machine is not initialized")]
    MachineNotInitialized,

    /// A vault already exists at the target location.
    #[error("Vault already exists")]
    VaultAlreadyExists,

    /// A user-supplied name or value failed validation.
    #[error("Invalid input for {field}: {reason}")]
    InvalidInput {
        /// Which input was rejected.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// A required file was missing.
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// The filesystem denied access to a path.
    #[error("Permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),

    /// Any other filesystem failure, with the path it occurred on.
    #[error("IO error on {}: {source}", path.display())]
    Io {
        /// The path the operation was acting on.
        path: PathBuf,
        /// The underlying error.
        source: io::Error,
    },

    /// Asymmetric or symmetric key generation failed.
    #[error("Key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// Encryption failed before producing a ciphertext.
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption failed. Deliberately carries no detail about which step
    /// broke so that callers cannot distinguish a bad key from bad data.
    #[error("Decryption failed")]
    DecryptionFailed,

    /// An AEAD authentication tag did not verify.
    #[error("Integrity check failed: data was tampered with or the wrong key was used")]
    IntegrityFailed,

    /// The payload is too large for the RSA modulus.
    #[error("Input too large for asymmetric encryption ({size} bytes, maximum {max})")]
    InputTooLarge {
        /// Size of the rejected payload.
        size: usize,
        /// Largest payload the key can wrap.
        max: usize,
    },

    /// An on-disk record carries a format version this build cannot read.
    #[error("Unsupported record version: {0}")]
    UnsupportedVersion(u32),

    /// The current machine holds no wrapped key for the environment.
    #[error("Access denied to environment '{0}'")]
    AccessDenied(String),

    /// No machine record with the given id.
    #[error("Machine not found: {0}")]
    MachineNotFound(String),

    /// A machine record with the given id already exists.
    #[error("Machine already exists: {0}")]
    MachineAlreadyExists(String),

    /// A machine id failed validation.
    #[error("Invalid machine id: {0}")]
    InvalidMachineId(String),

    /// No secret with the given key.
    #[error("Secret not found: {0}")]
    SecretNotFound(String),

    /// The environment has no secrets and no wrapped keys.
    #[error("Environment not found: {0}")]
    EnvironmentNotFound(String),

    /// A push was requested with an empty secret map.
    #[error("No secrets to encrypt")]
    NoSecretsToEncrypt,

    /// The git binary is missing or not executable.
    #[error("Git is not available: {0}")]
    GitNotAvailable(String),

    /// A git subcommand exited unsuccessfully.
    #[error("Git operation failed: {0}")]
    GitOperationFailed(String),

    /// Pull or push hit conflicting remote history.
    #[error("Merge conflict: {0}")]
    MergeConflict(String),

    /// The remote could not be reached.
    #[error("Remote unreachable: {0}")]
    RemoteUnreachable(String),

    /// A record on disk could not be parsed.
    #[error("Malformed record at {}: {source}", path.display())]
    MalformedRecord {
        /// Path of the unreadable record.
        path: PathBuf,
        /// The underlying parse error.
        source: serde_json::Error,
    },
}

/// Convenience alias used throughout the crate.
pub type VaultResult<T> = Result<T, VaultError>;

impl VaultError {
    /// A short recovery hint suitable for display after the error message,
    /// or `None` when there is no canned remedy.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            VaultError::VaultNotInitialized => {
                Some("Run `nvolt init` in the project directory first")
            }
            VaultError::MachineNotInitialized => {
                Some("Run `nvolt machine init` to create this machine's key pair")
            }
            VaultError::AccessDenied(_) => {
                Some("Ask a machine with access to run `nvolt grant` for this machine")
            }
            VaultError::MergeConflict(_) => {
                Some("Resolve the conflict in the vault repository, then retry")
            }
            VaultError::RemoteUnreachable(_) => {
                Some("Check network connectivity and the vault remote URL")
            }
            VaultError::GitNotAvailable(_) => Some("Install git and make sure it is on PATH"),
            VaultError::UnsupportedVersion(_) => {
                Some("Update nvolt to a release that understands this record format")
            }
            VaultError::DecryptionFailed | VaultError::IntegrityFailed => {
                Some("The file may be corrupted or encrypted under a rotated key; re-pull the vault")
            }
            _ => None,
        }
    }

    /// Map an I/O error to a typed kind, keeping the path it occurred on.
    pub(crate) fn from_io(path: &Path, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => VaultError::FileNotFound(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => VaultError::PermissionDenied(path.to_path_buf()),
            _ => VaultError::Io {
                path: path.to_path_buf(),
                source: err,
            },
        }
    }
}
