//! # nvolt - Zero-Trust Secret Vault Engine
//!
//! A vault engine that stores environment variables encrypted at rest in a
//! Git-backed file layout. Every machine holds an RSA-4096 key pair; each
//! (project, environment) pair has a 32-byte master key that encrypts its
//! secrets with AES-256-GCM. Access to an environment is a wrapped copy of
//! its master key, encrypted for the recipient machine; revocation deletes
//! the wrapped copy and, for durability against copied ciphertexts, rotates
//! the master key.
//!
//! ## Architecture
//!
//! - `crypto`: key pairs, AEAD, wrapping, fingerprints, zeroization
//! - `paths`: pure path resolver shared by both storage modes
//! - `store`: atomic writes, permission enforcement, secure deletion
//! - `machine`: local machine identity and enrollment records
//! - `vault`: the engine: master keys, secrets, grants, rotation, verify
//! - `mode`: local vs. global vault classification
//! - `sync`: the Git transport contract and its process-backed default
//!
//! ## Example
//!
//! ```rust,ignore
//! use nvolt::machine::MachineIdentity;
//! use nvolt::paths::HomePaths;
//! use nvolt::vault::{GrantPolicy, Vault};
//! use std::collections::BTreeMap;
//!
//! let home = HomePaths::discover()?;
//! let identity = MachineIdentity::load(&home)?;
//! let vault = Vault::open_local(std::path::Path::new("."), home, identity)?;
//!
//! let mut secrets = BTreeMap::new();
//! secrets.insert("DB_URL".to_string(), "postgres://localhost/app".to_string());
//! vault.push("default", &secrets, &GrantPolicy::SkipUngranted)?;
//!
//! let pulled = vault.pull("default")?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Cryptographic primitives
pub mod crypto;

// Error taxonomy
pub mod error;

// Machine identity
pub mod machine;

// Mode classification
pub mod mode;

// Path resolution
pub mod paths;

// Atomic filesystem store
pub mod store;

// Git transport
pub mod sync;

// The vault engine
pub mod vault;

// Re-export commonly used types
pub use error::{VaultError, VaultResult};
pub use machine::{MachineIdentity, MachineRecord};
pub use mode::VaultMode;
pub use paths::HomePaths;
pub use vault::{GrantOutcome, GrantPolicy, RotationScope, Vault, VerifyReport};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
