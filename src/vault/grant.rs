//! Access grants: wrapping policy, explicit grants, and revocation.
//!
//! A push re-wraps the master key only for machines that already hold a
//! wrapped-key file, plus the grantor. New machines gain access through an
//! explicit grant or through the policy the caller passes; the engine
//! itself never prompts.

use log::{info, warn};

use crate::crypto::symmetric::MasterKey;
use crate::error::{VaultError, VaultResult};
use crate::machine::MachineRecord;
use crate::store;

use super::Vault;

/// What to do with enrolled machines that have no wrapped key yet when
/// re-wrapping on push or rotation.
pub enum GrantPolicy {
    /// Leave ungranted machines ungranted. The default: a push never
    /// silently widens access.
    SkipUngranted,
    /// Wrap the key for every enrolled machine.
    GrantAll,
    /// Ask the callback per machine; `true` grants.
    Callback(Box<dyn Fn(&MachineRecord) -> bool>),
}

impl Default for GrantPolicy {
    fn default() -> Self {
        GrantPolicy::SkipUngranted
    }
}

impl std::fmt::Debug for GrantPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GrantPolicy::SkipUngranted => f.write_str("SkipUngranted"),
            GrantPolicy::GrantAll => f.write_str("GrantAll"),
            GrantPolicy::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

/// Result of an explicit grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantOutcome {
    /// A wrapped-key record was written for the machine.
    Granted,
    /// The machine already had a wrapped-key record; nothing was written.
    AlreadyGranted,
}

impl Vault {
    /// Re-wrap `key` for the environment's members.
    ///
    /// Every machine that already holds a wrapped-key file gets a fresh
    /// record, as does the grantor itself. Machines without one are
    /// handled per `policy`. Fails with [`VaultError::MachineNotFound`]
    /// when the vault has no enrolled machines at all.
    pub(crate) fn rewrap_members(
        &self,
        project: &str,
        environment: &str,
        key: &MasterKey,
        policy: &GrantPolicy,
    ) -> VaultResult<usize> {
        let machines = self.machines()?;
        if machines.is_empty() {
            return Err(VaultError::MachineNotFound(
                "no machines enrolled in the vault".to_string(),
            ));
        }

        let mut written = 0;
        for machine in &machines {
            let already_granted = store::exists(&self.paths.wrapped_key_file(
                project,
                environment,
                &machine.id,
            ));
            let include = already_granted
                || machine.id == self.identity.id()
                || match policy {
                    GrantPolicy::SkipUngranted => false,
                    GrantPolicy::GrantAll => true,
                    GrantPolicy::Callback(decide) => decide(machine),
                };

            if include {
                self.write_wrapped(project, environment, key, machine)?;
                written += 1;
            }
        }
        Ok(written)
    }

    /// Grant a specific machine access to an environment of this project.
    ///
    /// Idempotent: a machine that already holds a wrapped key yields
    /// [`GrantOutcome::AlreadyGranted`] without touching its record.
    pub fn grant(&self, machine_id: &str, environment: &str) -> VaultResult<GrantOutcome> {
        self.ensure_initialized()?;
        crate::paths::validate_segment("environment", environment)?;
        let target = self.machine(machine_id)?;

        if self
            .read_wrapped(&self.project, environment, machine_id)?
            .is_some()
        {
            return Ok(GrantOutcome::AlreadyGranted);
        }

        self.with_sync(
            &format!("nvolt: grant {machine_id} access to {environment}"),
            |vault| {
                let key = vault.load_master_key(&vault.project, environment)?;
                vault.write_wrapped(&vault.project, environment, &key, &target)?;
                info!("granted {machine_id} access to {environment}");
                Ok(GrantOutcome::Granted)
            },
        )
    }

    /// Revoke a machine: delete its wrapped-key files across every project
    /// and environment in the vault, then its machine record.
    ///
    /// Durable revocation against ciphertexts the machine may have copied
    /// additionally requires [`Vault::rotate`].
    pub fn revoke(&self, machine_id: &str) -> VaultResult<()> {
        self.ensure_initialized()?;
        // Resolve first so a typo fails before any deletion.
        let target = self.machine(machine_id)?;

        self.with_sync(&format!("nvolt: revoke machine {machine_id}"), |vault| {
            for project in vault.projects()? {
                for environment in vault.environments_of(&project)? {
                    let path = vault
                        .paths
                        .wrapped_key_file(&project, &environment, &target.id);
                    if store::exists(&path) {
                        store::delete(&path)?;
                        info!("revoked {machine_id} from {project}/{environment}");
                    }
                    // Including any rotation the machine left unfinished.
                    store::delete(&vault.paths.pending_wrapped_key_file(
                        &project,
                        &environment,
                        &target.id,
                    ))?;
                }
            }
            store::delete(&vault.paths.machine_file(&target.id))?;
            warn!(
                "machine {machine_id} revoked; rotate affected environments to fence old ciphertexts"
            );
            Ok(())
        })
    }
}
