//! Cryptographic primitives for the vault engine.
//!
//! Two layers of keys protect every secret:
//!
//! 1. A per-environment 32-byte master key encrypts individual secrets with
//!    AES-256-GCM ([`symmetric`]).
//! 2. Each enrolled machine holds an RSA-4096 key pair; the master key is
//!    wrapped under every authorized machine's public key with RSA-OAEP
//!    ([`asymmetric`]).
//!
//! All key material is zeroized on drop. Decryption failures are reported
//! without distinguishing a wrong key from tampered data.

pub mod asymmetric;
pub mod symmetric;

pub use asymmetric::{MachineKeyPair, FINGERPRINT_PREFIX, RSA_KEY_BITS};
pub use symmetric::{constant_time_equal, EncryptedPayload, MasterKey, MASTER_KEY_SIZE, NONCE_SIZE};

// Callers holding intermediate secret buffers wipe them with these.
pub use zeroize::{Zeroize, Zeroizing};
