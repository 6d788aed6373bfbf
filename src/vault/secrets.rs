//! Secret records: encryption, persistence, and retrieval.
//!
//! A secret is stored as a small JSON record holding the AES-256-GCM
//! ciphertext and nonce, base64 encoded. The record format is versioned;
//! this build reads and writes version 2 only.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use log::info;
use serde::{Deserialize, Serialize};

use crate::crypto::symmetric::MasterKey;
use crate::error::{VaultError, VaultResult};
use crate::machine;
use crate::paths::{validate_segment, SECRET_FILE_SUFFIX};
use crate::store::{self, FileMode};

use super::{GrantPolicy, Vault};

/// On-disk format version this build understands.
pub(crate) const SECRET_FORMAT_VERSION: u32 = 2;

/// On-disk form of one encrypted secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedSecretRecord {
    /// Record format version; always 2.
    pub version: u32,
    /// Base64 of the AEAD ciphertext, authentication tag included.
    pub data: String,
    /// Base64 of the 12-byte nonce.
    pub nonce: String,
    /// Historical field. The tag lives inside `data`; this is always
    /// empty and kept only for on-disk compatibility.
    #[serde(default)]
    pub tag: String,
}

impl Vault {
    /// Encrypt secrets and write them to an environment, creating the
    /// environment's master key on first push.
    ///
    /// Existing members are re-wrapped in place; machines without a
    /// wrapped key are handled per `policy` and are never granted
    /// silently.
    pub fn push(
        &self,
        environment: &str,
        secrets: &BTreeMap<String, String>,
        policy: &GrantPolicy,
    ) -> VaultResult<()> {
        self.ensure_initialized()?;
        validate_segment("environment", environment)?;
        if secrets.is_empty() {
            return Err(VaultError::NoSecretsToEncrypt);
        }
        for key in secrets.keys() {
            validate_segment("secret_key", key)?;
        }

        self.with_sync(
            &format!("nvolt: push {} secret(s) to {environment}", secrets.len()),
            |vault| {
                let (master, created) =
                    vault.get_or_create_master_key(&vault.project, environment)?;

                for (key, value) in secrets {
                    vault.save_secret(&vault.project, environment, key, value, &master)?;
                }

                vault.rewrap_members(&vault.project, environment, &master, policy)?;

                if created {
                    info!("created master key for environment {environment}");
                }
                info!("pushed {} secret(s) to {environment}", secrets.len());
                Ok(())
            },
        )
    }

    /// Decrypt all secrets of an environment of this project.
    pub fn pull(&self, environment: &str) -> VaultResult<BTreeMap<String, String>> {
        self.ensure_initialized()?;
        validate_segment("environment", environment)?;
        self.pull_from(&self.project, environment)
    }

    fn pull_from(&self, project: &str, environment: &str) -> VaultResult<BTreeMap<String, String>> {
        let has_keys = store::exists(&self.paths.wrapped_keys_env(project, environment));
        let has_secrets = store::exists(&self.paths.secrets_env(project, environment));
        if !has_keys && !has_secrets {
            return Err(VaultError::EnvironmentNotFound(environment.to_string()));
        }

        let master = self.load_master_key(project, environment)?;
        self.load_env_secrets(project, environment, &master)
    }

    /// Decrypt several (project, environment) pairs into one map.
    ///
    /// Input order defines precedence: on key collisions, later pairs
    /// overwrite earlier ones.
    pub fn pull_merged(
        &self,
        targets: &[(String, String)],
    ) -> VaultResult<BTreeMap<String, String>> {
        self.ensure_initialized()?;
        let mut merged = BTreeMap::new();
        for (project, environment) in targets {
            if !project.is_empty() {
                validate_segment("project", project)?;
            }
            validate_segment("environment", environment)?;
            let map = self.pull_from(project, environment)?;
            merged.extend(map);
        }
        Ok(merged)
    }

    /// Delete one secret from an environment.
    pub fn delete_secret(&self, environment: &str, key: &str) -> VaultResult<()> {
        self.ensure_initialized()?;
        validate_segment("environment", environment)?;
        validate_segment("secret_key", key)?;

        let path = self.paths.secret_file(&self.project, environment, key);
        if !store::exists(&path) {
            return Err(VaultError::SecretNotFound(key.to_string()));
        }

        self.with_sync(&format!("nvolt: delete {key} from {environment}"), |_| {
            store::delete(&path)?;
            info!("deleted secret {key} from {environment}");
            Ok(())
        })
    }

    /// Names of the secrets stored in an environment, sorted.
    pub fn secret_names(&self, environment: &str) -> VaultResult<Vec<String>> {
        validate_segment("environment", environment)?;
        self.secret_names_of(&self.project, environment)
    }

    pub(crate) fn secret_names_of(
        &self,
        project: &str,
        environment: &str,
    ) -> VaultResult<Vec<String>> {
        let dir = self.paths.secrets_env(project, environment);
        let mut names: Vec<String> = store::list_files(&dir)?
            .into_iter()
            .filter_map(|name| name.strip_suffix(SECRET_FILE_SUFFIX).map(str::to_string))
            .collect();
        names.sort();
        Ok(names)
    }

    /// Encrypt one value and write its record atomically.
    pub(crate) fn save_secret(
        &self,
        project: &str,
        environment: &str,
        key: &str,
        value: &str,
        master: &MasterKey,
    ) -> VaultResult<()> {
        let sealed = master.encrypt(value.as_bytes())?;
        let record = EncryptedSecretRecord {
            version: SECRET_FORMAT_VERSION,
            data: BASE64.encode(&sealed.ciphertext),
            nonce: BASE64.encode(&sealed.nonce),
            tag: String::new(),
        };

        let json = machine::to_pretty_json(&record)?;
        store::write_atomic(
            &self.paths.secret_file(project, environment, key),
            json.as_bytes(),
            FileMode::Public,
        )
    }

    /// Read and decrypt one secret.
    ///
    /// A version other than 2 fails with [`VaultError::UnsupportedVersion`].
    /// Every other failure collapses into [`VaultError::DecryptionFailed`]
    /// so callers cannot tell a bad key from bad data.
    pub(crate) fn load_secret(
        &self,
        project: &str,
        environment: &str,
        key: &str,
        master: &MasterKey,
    ) -> VaultResult<String> {
        let path = self.paths.secret_file(project, environment, key);
        if !store::exists(&path) {
            return Err(VaultError::SecretNotFound(key.to_string()));
        }

        let bytes = store::read(&path)?;
        let record: EncryptedSecretRecord = serde_json::from_slice(&bytes)
            .map_err(|e| VaultError::MalformedRecord { path, source: e })?;

        if record.version != SECRET_FORMAT_VERSION {
            return Err(VaultError::UnsupportedVersion(record.version));
        }

        let ciphertext = BASE64
            .decode(record.data.as_bytes())
            .map_err(|_| VaultError::DecryptionFailed)?;
        let nonce = BASE64
            .decode(record.nonce.as_bytes())
            .map_err(|_| VaultError::DecryptionFailed)?;

        let plaintext = master
            .decrypt(&ciphertext, &nonce)
            .map_err(|_| VaultError::DecryptionFailed)?;

        // `plaintext` zeroizes itself on drop; the returned String is the
        // caller's to dispose of.
        let text = std::str::from_utf8(&plaintext)
            .map_err(|_| VaultError::DecryptionFailed)?
            .to_string();
        Ok(text)
    }

    /// Decrypt every secret in an environment.
    pub(crate) fn load_env_secrets(
        &self,
        project: &str,
        environment: &str,
        master: &MasterKey,
    ) -> VaultResult<BTreeMap<String, String>> {
        let mut map = BTreeMap::new();
        for key in self.secret_names_of(project, environment)? {
            let value = self.load_secret(project, environment, &key, master)?;
            map.insert(key, value);
        }
        Ok(map)
    }
}
