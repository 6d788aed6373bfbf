//! Master-key rotation.
//!
//! Rotation generates a fresh master key, persists it wrapped for the
//! rotating machine as a pending record, re-encrypts every secret in the
//! environment under it, re-wraps it for the retained machines, and only
//! then removes the pending record. The steps are sequential and not
//! transactional at the filesystem scale: a failure mid-way leaves earlier
//! secrets under the new key and later ones under the old key, but the new
//! key is never lost, because the pending record was written before the
//! first secret was touched. Re-running the rotation on the same machine
//! resumes with the pending key and skips secrets that were already
//! migrated; other machines cannot unwrap the pending record and must
//! leave the resume to the machine that started it.

use log::{error, info};
use zeroize::Zeroizing;

use crate::crypto::symmetric::MasterKey;
use crate::error::VaultResult;
use crate::paths::validate_segment;

use super::{GrantPolicy, Vault};

/// Which machines receive the new master key after a rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationScope {
    /// Machines that already held a wrapped key, plus the operator.
    #[default]
    RetainedMachines,
    /// Every machine currently enrolled in the vault.
    AllMachines,
}

impl Vault {
    /// Rotate the master key of an environment of this project.
    ///
    /// An environment with zero secrets rotates successfully; only the
    /// wrapped keys change. Secrets are processed in sorted order and the
    /// first failing key aborts the operation; see the module notes for
    /// the recovery contract.
    pub fn rotate(&self, environment: &str, scope: RotationScope) -> VaultResult<usize> {
        self.ensure_initialized()?;
        validate_segment("environment", environment)?;

        self.with_sync(
            &format!("nvolt: rotate master key of {environment}"),
            |vault| {
                let old = vault.load_master_key(&vault.project, environment)?;

                // The new key goes to disk, wrapped for this machine,
                // before any secret is rewritten under it. An interrupted
                // run leaves that pending record behind and a re-run picks
                // the same key back up instead of generating another.
                let fresh = match vault.read_pending_wrapped(&vault.project, environment)? {
                    Some(record) => {
                        info!("resuming interrupted rotation of {environment}");
                        vault.unwrap_record(&record)?
                    }
                    None => {
                        let key = MasterKey::generate();
                        vault.write_pending_wrapped(&vault.project, environment, &key)?;
                        key
                    }
                };

                let names = vault.secret_names_of(&vault.project, environment)?;
                for key in &names {
                    if let Err(e) = vault.reencrypt_secret(environment, key, &old, &fresh) {
                        error!("rotation of {environment} failed at secret {key}");
                        return Err(e);
                    }
                }

                let policy = match scope {
                    RotationScope::RetainedMachines => GrantPolicy::SkipUngranted,
                    RotationScope::AllMachines => GrantPolicy::GrantAll,
                };
                vault.rewrap_members(&vault.project, environment, &fresh, &policy)?;
                vault.clear_pending_wrapped(&vault.project, environment)?;

                info!(
                    "rotated master key of {environment}, {} secret(s) re-encrypted",
                    names.len()
                );
                Ok(names.len())
            },
        )
    }

    fn reencrypt_secret(
        &self,
        environment: &str,
        key: &str,
        old: &MasterKey,
        fresh: &MasterKey,
    ) -> VaultResult<()> {
        let plaintext = match self.load_secret(&self.project, environment, key, old) {
            Ok(value) => Zeroizing::new(value),
            Err(e) => {
                // A secret the old key cannot read but the new key can was
                // already migrated by an interrupted run.
                if self
                    .load_secret(&self.project, environment, key, fresh)
                    .is_ok()
                {
                    return Ok(());
                }
                return Err(e);
            }
        };
        self.save_secret(&self.project, environment, key, &plaintext, fresh)
    }
}
