//! Local machine identity.
//!
//! Each machine enrolls with an RSA key pair. The private key lives at
//! `~/.nvolt/private_key.pem` with owner-only permissions and never enters
//! a vault repository; the public half travels inside the machine record so
//! that other members can wrap master keys for it.

use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};

use crate::crypto::asymmetric::{self, MachineKeyPair};
use crate::error::{VaultError, VaultResult};
use crate::paths::HomePaths;
use crate::store::{self, FileMode};

/// Hostname values that carry no information for id derivation.
const UNKNOWN_HOSTNAME: &str = "unknown";

/// Number of fingerprint characters used in a machine id suffix.
const ID_SUFFIX_LEN: usize = 7;

/// A machine's public enrollment record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineRecord {
    /// Unique machine id, derived from the key fingerprint.
    pub id: String,
    /// Public key, PEM encoded.
    pub public_key: String,
    /// `SHA256:` fingerprint of the public key.
    pub fingerprint: String,
    /// Hostname at enrollment time.
    pub hostname: String,
    /// Free-form operator description.
    pub description: String,
    /// When the machine was enrolled.
    pub created_at: DateTime<Utc>,
}

/// The local machine: its record plus the private key.
pub struct MachineIdentity {
    record: MachineRecord,
    keypair: MachineKeyPair,
}

impl MachineIdentity {
    /// Create this machine's key pair and record.
    ///
    /// Refused when a private key already exists; re-enrollment requires
    /// removing the old key explicitly.
    pub fn init(
        home: &HomePaths,
        custom_name: Option<&str>,
        description: &str,
    ) -> VaultResult<Self> {
        let key_path = home.private_key_file();
        if store::exists(&key_path) {
            let existing = load_record(home)
                .map(|r| r.id)
                .unwrap_or_else(|_| "local machine".to_string());
            return Err(VaultError::MachineAlreadyExists(existing));
        }

        if let Some(name) = custom_name {
            crate::paths::validate_segment("machine_name", name)?;
        }

        info!("generating machine key pair");
        let keypair = MachineKeyPair::generate()?;
        let fingerprint = asymmetric::fingerprint(keypair.public_key())?;
        let host = local_hostname();
        let id = derive_machine_id(custom_name, &host, &fingerprint);

        let record = MachineRecord {
            id,
            public_key: keypair.public_key_to_pem()?,
            fingerprint,
            hostname: host,
            description: description.to_string(),
            created_at: Utc::now(),
        };

        let pem = keypair.private_key_to_pem()?;
        store::write_atomic(&key_path, pem.as_bytes(), FileMode::Private)?;

        let json = to_pretty_json(&record)?;
        store::write_atomic(&home.machine_info_file(), json.as_bytes(), FileMode::Public)?;

        info!("machine {} initialized", record.id);
        Ok(Self { record, keypair })
    }

    /// Load the machine record and private key from the home layout.
    pub fn load(home: &HomePaths) -> VaultResult<Self> {
        let record = load_record(home)?;

        let key_path = home.private_key_file();
        if !store::exists(&key_path) {
            return Err(VaultError::MachineNotInitialized);
        }
        let pem = store::read_to_string(&key_path)?;
        let keypair = MachineKeyPair::from_private_pem(&pem)?;

        let actual = asymmetric::fingerprint(keypair.public_key())?;
        if actual != record.fingerprint {
            return Err(VaultError::InvalidInput {
                field: "machine_record",
                reason: "fingerprint does not match the private key on disk".to_string(),
            });
        }

        Ok(Self { record, keypair })
    }

    /// This machine's enrollment record.
    pub fn record(&self) -> &MachineRecord {
        &self.record
    }

    /// This machine's id.
    pub fn id(&self) -> &str {
        &self.record.id
    }

    /// The key pair backing this identity.
    pub fn keypair(&self) -> &MachineKeyPair {
        &self.keypair
    }

    /// Sign a server-issued login challenge with this machine's key.
    pub fn sign_challenge(&self, challenge: &[u8]) -> VaultResult<Vec<u8>> {
        self.keypair.sign(challenge)
    }
}

/// Verify a login-challenge signature against a machine's record.
pub fn verify_challenge(
    record: &MachineRecord,
    challenge: &[u8],
    signature: &[u8],
) -> VaultResult<()> {
    let public_key = asymmetric::public_key_from_pem(&record.public_key)?;
    asymmetric::verify_signature(&public_key, challenge, signature)
}

fn load_record(home: &HomePaths) -> VaultResult<MachineRecord> {
    let path = home.machine_info_file();
    if !store::exists(&path) {
        return Err(VaultError::MachineNotInitialized);
    }
    let bytes = store::read(&path)?;
    serde_json::from_slice(&bytes).map_err(|e| VaultError::MalformedRecord { path, source: e })
}

/// Derive a machine id from an optional custom name, the hostname, and the
/// key fingerprint.
///
/// The suffix is the first seven characters of the fingerprint hash with
/// any `/`, `\` or `:` replaced by `_`. When the hash is unavailable the
/// suffix falls back to a six-digit tail of the current time.
pub fn derive_machine_id(custom_name: Option<&str>, hostname: &str, fingerprint: &str) -> String {
    let hash = fingerprint
        .strip_prefix(asymmetric::FINGERPRINT_PREFIX)
        .unwrap_or(fingerprint);

    let suffix = if hash.is_empty() {
        format!("{:06}", Utc::now().timestamp().rem_euclid(1_000_000))
    } else {
        hash.chars()
            .take(ID_SUFFIX_LEN)
            .map(|c| match c {
                '/' | '\\' | ':' => '_',
                other => other,
            })
            .collect()
    };

    match custom_name {
        Some(name) => format!("{name}-{suffix}"),
        None if !hostname.is_empty() && hostname != UNKNOWN_HOSTNAME => {
            format!("m-{hostname}-{suffix}")
        }
        None => format!("m-{suffix}"),
    }
}

/// Hostname of this machine, or `unknown` when the lookup fails.
pub fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| UNKNOWN_HOSTNAME.to_string())
}

pub(crate) fn to_pretty_json<T: Serialize>(value: &T) -> VaultResult<String> {
    serde_json::to_string_pretty(value).map_err(|e| VaultError::InvalidInput {
        field: "record",
        reason: format!("serialization failed: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn fake_home() -> (tempfile::TempDir, HomePaths) {
        let dir = tempdir().unwrap();
        let home = HomePaths::new(PathBuf::from(dir.path()));
        (dir, home)
    }

    #[test]
    fn test_derive_id_with_custom_name() {
        let id = derive_machine_id(Some("build"), "ci-runner", "SHA256:abcdefghij");
        assert_eq!(id, "build-abcdefg");
    }

    #[test]
    fn test_derive_id_from_hostname() {
        let id = derive_machine_id(None, "laptop", "SHA256:abcdefghij");
        assert_eq!(id, "m-laptop-abcdefg");
    }

    #[test]
    fn test_derive_id_without_hostname() {
        assert_eq!(derive_machine_id(None, "", "SHA256:abcdefghij"), "m-abcdefg");
        assert_eq!(
            derive_machine_id(None, "unknown", "SHA256:abcdefghij"),
            "m-abcdefg"
        );
    }

    #[test]
    fn test_derive_id_sanitizes_suffix() {
        let id = derive_machine_id(None, "host", "SHA256:a/b\\c:def");
        assert_eq!(id, "m-host-a_b_c_d");
    }

    #[test]
    fn test_derive_id_time_fallback() {
        let id = derive_machine_id(None, "host", "SHA256:");
        let suffix = id.strip_prefix("m-host-").unwrap();
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_init_and_load_roundtrip() {
        let (_dir, home) = fake_home();

        let identity = MachineIdentity::init(&home, Some("test"), "unit test machine").unwrap();
        assert!(identity.id().starts_with("test-"));
        assert!(store::exists(&home.private_key_file()));

        let loaded = MachineIdentity::load(&home).unwrap();
        assert_eq!(loaded.id(), identity.id());
        assert_eq!(loaded.record().fingerprint, identity.record().fingerprint);
    }

    #[test]
    fn test_init_refused_when_key_exists() {
        let (_dir, home) = fake_home();

        MachineIdentity::init(&home, Some("test"), "").unwrap();
        let result = MachineIdentity::init(&home, Some("again"), "");

        assert!(matches!(result, Err(VaultError::MachineAlreadyExists(_))));
    }

    #[test]
    fn test_challenge_sign_and_verify() {
        let (_dir, home) = fake_home();
        let identity = MachineIdentity::init(&home, Some("test"), "").unwrap();

        let challenge = b"nonce-20260801-0001";
        let signature = identity.sign_challenge(challenge).unwrap();

        verify_challenge(identity.record(), challenge, &signature).unwrap();
        assert!(verify_challenge(identity.record(), b"other nonce", &signature).is_err());
    }

    #[test]
    fn test_load_without_init_is_typed() {
        let (_dir, home) = fake_home();
        let result = MachineIdentity::load(&home);
        assert!(matches!(result, Err(VaultError::MachineNotInitialized)));
    }

    #[cfg(unix)]
    #[test]
    fn test_private_key_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, home) = fake_home();
        MachineIdentity::init(&home, Some("test"), "").unwrap();

        let mode = std::fs::metadata(home.private_key_file())
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o600);
    }
}
