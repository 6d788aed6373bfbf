//! Master-key lifecycle per (project, environment).
//!
//! A master key is never written in cleartext. Its persisted form is the
//! set of wrapped-key records for the environment: one RSA-OAEP ciphertext
//! of the key per authorized machine. The presence of a machine's
//! wrapped-key file IS that machine's access grant.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::asymmetric;
use crate::crypto::symmetric::MasterKey;
use crate::error::{VaultError, VaultResult};
use crate::machine::{self, MachineRecord};
use crate::store::{self, FileMode};

use super::Vault;

/// One machine's wrapped copy of an environment master key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WrappedKeyRecord {
    /// Machine the key is wrapped for.
    pub machine_id: String,
    /// Fingerprint of the public key used for wrapping.
    pub public_key_fingerprint: String,
    /// Base64 of the RSA-OAEP ciphertext of the master key.
    pub wrapped_key: String,
    /// Machine that performed the grant.
    pub granted_by: String,
    /// When the grant occurred.
    pub granted_at: DateTime<Utc>,
}

impl Vault {
    /// Read a machine's wrapped-key record, or `None` when the machine has
    /// no grant for the environment.
    pub(crate) fn read_wrapped(
        &self,
        project: &str,
        environment: &str,
        machine_id: &str,
    ) -> VaultResult<Option<WrappedKeyRecord>> {
        let path = self.paths.wrapped_key_file(project, environment, machine_id);
        if !store::exists(&path) {
            return Ok(None);
        }
        let bytes = store::read(&path)?;
        let record = serde_json::from_slice(&bytes)
            .map_err(|e| VaultError::MalformedRecord { path, source: e })?;
        Ok(Some(record))
    }

    /// Unwrap the environment's master key with this machine's private key.
    ///
    /// Fails with [`VaultError::AccessDenied`] when this machine has no
    /// wrapped-key record for the environment.
    pub(crate) fn load_master_key(
        &self,
        project: &str,
        environment: &str,
    ) -> VaultResult<MasterKey> {
        let record = self
            .read_wrapped(project, environment, self.identity.id())?
            .ok_or_else(|| VaultError::AccessDenied(environment.to_string()))?;
        self.unwrap_record(&record)
    }

    /// Unwrap a wrapped-key record with this machine's private key.
    pub(crate) fn unwrap_record(&self, record: &WrappedKeyRecord) -> VaultResult<MasterKey> {
        let wrapped = BASE64
            .decode(record.wrapped_key.as_bytes())
            .map_err(|_| VaultError::DecryptionFailed)?;
        let unwrapped = self.identity.keypair().unwrap_key(&wrapped)?;
        MasterKey::from_bytes(&unwrapped)
    }

    /// The environment's master key, creating a fresh one when this is the
    /// first push. Returns `(key, created)`; when `created` is true the
    /// caller must wrap the key for the members before the operation ends.
    pub(crate) fn get_or_create_master_key(
        &self,
        project: &str,
        environment: &str,
    ) -> VaultResult<(MasterKey, bool)> {
        if self
            .read_wrapped(project, environment, self.identity.id())?
            .is_some()
        {
            return Ok((self.load_master_key(project, environment)?, false));
        }
        Ok((MasterKey::generate(), true))
    }

    /// Wrap `key` under `target`'s public key and write the wrapped-key
    /// record atomically. Overwrites any previous record for the machine.
    pub(crate) fn write_wrapped(
        &self,
        project: &str,
        environment: &str,
        key: &MasterKey,
        target: &MachineRecord,
    ) -> VaultResult<()> {
        let record = self.make_wrapped_record(key, target)?;
        let json = machine::to_pretty_json(&record)?;
        store::write_atomic(
            &self.paths.wrapped_key_file(project, environment, &target.id),
            json.as_bytes(),
            FileMode::Public,
        )
    }

    fn make_wrapped_record(
        &self,
        key: &MasterKey,
        target: &MachineRecord,
    ) -> VaultResult<WrappedKeyRecord> {
        let public_key = asymmetric::public_key_from_pem(&target.public_key)?;
        let wrapped = asymmetric::wrap_key(&public_key, key.as_bytes())?;

        Ok(WrappedKeyRecord {
            machine_id: target.id.clone(),
            public_key_fingerprint: target.fingerprint.clone(),
            wrapped_key: BASE64.encode(wrapped),
            granted_by: self.identity.id().to_string(),
            granted_at: Utc::now(),
        })
    }

    /// Read the pending wrapped record this machine left behind by an
    /// interrupted rotation, if any.
    pub(crate) fn read_pending_wrapped(
        &self,
        project: &str,
        environment: &str,
    ) -> VaultResult<Option<WrappedKeyRecord>> {
        let path = self
            .paths
            .pending_wrapped_key_file(project, environment, self.identity.id());
        if !store::exists(&path) {
            return Ok(None);
        }
        let bytes = store::read(&path)?;
        let record = serde_json::from_slice(&bytes)
            .map_err(|e| VaultError::MalformedRecord { path, source: e })?;
        Ok(Some(record))
    }

    /// Persist a rotation's new master key, wrapped for this machine,
    /// before any secret is rewritten under it. The record survives a
    /// mid-rotation failure so a re-run can recover the key.
    pub(crate) fn write_pending_wrapped(
        &self,
        project: &str,
        environment: &str,
        key: &MasterKey,
    ) -> VaultResult<()> {
        let record = self.make_wrapped_record(key, self.identity.record())?;
        let json = machine::to_pretty_json(&record)?;
        store::write_atomic(
            &self
                .paths
                .pending_wrapped_key_file(project, environment, self.identity.id()),
            json.as_bytes(),
            FileMode::Public,
        )
    }

    /// Remove this machine's pending wrapped record after the rotation
    /// that wrote it has fully completed.
    pub(crate) fn clear_pending_wrapped(
        &self,
        project: &str,
        environment: &str,
    ) -> VaultResult<()> {
        store::delete(
            &self
                .paths
                .pending_wrapped_key_file(project, environment, self.identity.id()),
        )
    }

    /// Machine ids that currently hold a wrapped key for the environment.
    pub(crate) fn granted_machine_ids(
        &self,
        project: &str,
        environment: &str,
    ) -> VaultResult<Vec<String>> {
        let dir = self.paths.wrapped_keys_env(project, environment);
        let mut ids: Vec<String> = store::list_files(&dir)?
            .into_iter()
            .filter_map(|name| name.strip_suffix(".json").map(str::to_string))
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// The wrapped-key records of an environment of this project, sorted
    /// by machine id. This is the environment's access list.
    pub fn grants(&self, environment: &str) -> VaultResult<Vec<WrappedKeyRecord>> {
        self.ensure_initialized()?;
        crate::paths::validate_segment("environment", environment)?;

        let mut records = Vec::new();
        for id in self.granted_machine_ids(&self.project, environment)? {
            if let Some(record) = self.read_wrapped(&self.project, environment, &id)? {
                records.push(record);
            }
        }
        Ok(records)
    }
}
