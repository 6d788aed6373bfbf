//! The vault engine.
//!
//! [`Vault`] owns every write to records and secrets. It wires together the
//! machine identity, the path resolver, the atomic store, and the Git
//! transport, and exposes the operation surface the CLI builds on:
//!
//! - [`Vault::push`] / [`Vault::pull`] / [`Vault::pull_merged`] for secrets
//! - [`Vault::grant`] / [`Vault::revoke`] / [`Vault::rotate`] for access
//! - [`Vault::verify`] for integrity reporting
//!
//! In global mode every mutating operation is bracketed by a pull before
//! and a commit-and-push after. The engine holds no filesystem locks;
//! conflicting concurrent writers surface as push rejections that the
//! caller resolves by re-pulling and retrying.

mod grant;
mod master_key;
mod rotation;
mod secrets;
mod verify;

pub use grant::{GrantOutcome, GrantPolicy};
pub use master_key::WrappedKeyRecord;
pub use rotation::RotationScope;
pub use secrets::EncryptedSecretRecord;
pub use verify::{CheckKind, VerifyIssue, VerifyReport};

use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::error::{VaultError, VaultResult};
use crate::machine::{self, MachineIdentity, MachineRecord};
use crate::mode::{self, VaultMode};
use crate::paths::{self, HomePaths, VaultPaths, MACHINES_DIR, VAULT_DIR_NAME};
use crate::store::{self, FileMode};
use crate::sync::{GitTransport, ProcessGit};

/// A handle on one vault root, bound to the local machine identity.
pub struct Vault {
    pub(crate) home: HomePaths,
    pub(crate) paths: VaultPaths,
    pub(crate) project: String,
    pub(crate) mode: VaultMode,
    pub(crate) identity: MachineIdentity,
    pub(crate) transport: Box<dyn GitTransport>,
}

impl Vault {
    /// Open a vault at an explicit root.
    ///
    /// `project` is the project segment for secrets and wrapped keys; it is
    /// empty in local mode and a top-level directory name in global mode.
    pub fn open(
        home: HomePaths,
        root: PathBuf,
        project: &str,
        identity: MachineIdentity,
        transport: Box<dyn GitTransport>,
    ) -> VaultResult<Self> {
        if !project.is_empty() {
            paths::validate_segment("project", project)?;
        }
        let mode = mode::classify(&home, &root);
        if mode.is_global() && project.is_empty() {
            return Err(VaultError::InvalidInput {
                field: "project",
                reason: "global vaults require a project name".to_string(),
            });
        }
        Ok(Self {
            home,
            paths: VaultPaths::new(root),
            project: project.to_string(),
            mode,
            identity,
            transport,
        })
    }

    /// Open the local vault of a project directory (`<project>/.nvolt`).
    pub fn open_local(
        project_dir: &Path,
        home: HomePaths,
        identity: MachineIdentity,
    ) -> VaultResult<Self> {
        Self::open(
            home,
            project_dir.join(VAULT_DIR_NAME),
            "",
            identity,
            Box::new(ProcessGit::new()),
        )
    }

    /// Open a global vault under `<home>/.nvolt/orgs/<org>/<repo>`.
    pub fn open_global(
        home: HomePaths,
        org: &str,
        repo: &str,
        project: &str,
        identity: MachineIdentity,
        transport: Box<dyn GitTransport>,
    ) -> VaultResult<Self> {
        paths::validate_segment("org", org)?;
        paths::validate_segment("repo", repo)?;
        let root = home.org_vault_root(org, repo);
        Self::open(home, root, project, identity, transport)
    }

    /// Clone a shared vault repository into the home orgs tree and open it
    /// as a global vault.
    pub fn clone_global(
        home: HomePaths,
        org: &str,
        repo: &str,
        url: &str,
        project: &str,
        identity: MachineIdentity,
        transport: Box<dyn GitTransport>,
    ) -> VaultResult<Self> {
        paths::validate_segment("org", org)?;
        paths::validate_segment("repo", repo)?;

        let root = home.org_vault_root(org, repo);
        if store::exists(&root) {
            return Err(VaultError::VaultAlreadyExists);
        }

        transport.clone_repo(url, &root)?;
        if !transport.is_git_repo(&root) {
            return Err(VaultError::GitOperationFailed(format!(
                "{} is not a git work tree after clone",
                root.display()
            )));
        }

        Self::open(home, root, project, identity, transport)
    }

    /// Create the vault layout and enroll this machine.
    ///
    /// Fails with [`VaultError::VaultAlreadyExists`] when the layout is
    /// already present.
    pub fn init(&self) -> VaultResult<()> {
        if store::exists(&self.paths.machines_dir()) {
            return Err(VaultError::VaultAlreadyExists);
        }

        self.with_sync("nvolt: initialize vault", |vault| {
            store::ensure_dir(vault.paths.root())?;
            store::ensure_dir(&vault.paths.machines_dir())?;
            vault.write_machine_record(vault.identity.record())?;
            info!(
                "initialized vault at {} as {}",
                vault.paths.root().display(),
                vault.identity.id()
            );
            Ok(())
        })
    }

    /// Enroll another machine from its record.
    ///
    /// The record's fingerprint must match its public key; duplicate ids
    /// are refused rather than overwritten.
    pub fn enroll(&self, record: &MachineRecord) -> VaultResult<()> {
        self.ensure_initialized()?;
        paths::validate_segment("machine_id", &record.id)
            .map_err(|_| VaultError::InvalidMachineId(record.id.clone()))?;

        let public_key = crate::crypto::asymmetric::public_key_from_pem(&record.public_key)?;
        let fingerprint = crate::crypto::asymmetric::fingerprint(&public_key)?;
        if fingerprint != record.fingerprint {
            return Err(VaultError::InvalidInput {
                field: "machine_record",
                reason: "fingerprint does not match public key".to_string(),
            });
        }

        if store::exists(&self.paths.machine_file(&record.id)) {
            return Err(VaultError::MachineAlreadyExists(record.id.clone()));
        }

        self.with_sync(&format!("nvolt: enroll machine {}", record.id), |vault| {
            vault.write_machine_record(record)
        })
    }

    /// All machine records in the vault, sorted by id.
    pub fn machines(&self) -> VaultResult<Vec<MachineRecord>> {
        let dir = self.paths.machines_dir();
        let mut names = store::list_files(&dir)?;
        names.sort();

        let mut records = Vec::new();
        for name in names {
            let Some(id) = name.strip_suffix(".json") else {
                continue;
            };
            records.push(self.machine(id)?);
        }
        Ok(records)
    }

    /// Load one machine record by id.
    pub fn machine(&self, machine_id: &str) -> VaultResult<MachineRecord> {
        let path = self.paths.machine_file(machine_id);
        if !store::exists(&path) {
            return Err(VaultError::MachineNotFound(machine_id.to_string()));
        }
        let bytes = store::read(&path)?;
        serde_json::from_slice(&bytes).map_err(|e| VaultError::MalformedRecord { path, source: e })
    }

    /// Project names present in the vault. Local mode has exactly the
    /// empty project.
    pub fn projects(&self) -> VaultResult<Vec<String>> {
        if !self.mode.is_global() {
            return Ok(vec![String::new()]);
        }
        let mut dirs = store::list_dirs(self.paths.root())?;
        dirs.retain(|d| d != MACHINES_DIR && !d.starts_with('.'));
        dirs.sort();
        Ok(dirs)
    }

    /// Environments of this vault's project, from the union of the
    /// secrets and wrapped-keys trees, sorted.
    pub fn environments(&self) -> VaultResult<Vec<String>> {
        self.environments_of(&self.project)
    }

    pub(crate) fn environments_of(&self, project: &str) -> VaultResult<Vec<String>> {
        let mut envs = store::list_dirs(&self.paths.wrapped_keys_dir(project))?;
        for env in store::list_dirs(&self.paths.secrets_dir(project))? {
            if !envs.contains(&env) {
                envs.push(env);
            }
        }
        envs.sort();
        Ok(envs)
    }

    /// The machine identity this handle operates as.
    pub fn identity(&self) -> &MachineIdentity {
        &self.identity
    }

    /// The vault's storage mode.
    pub fn mode(&self) -> VaultMode {
        self.mode
    }

    /// The project segment this handle is bound to.
    pub fn project(&self) -> &str {
        &self.project
    }

    /// The path resolver for this vault root.
    pub fn paths(&self) -> &VaultPaths {
        &self.paths
    }

    /// The repository root used for synchronization and verification.
    pub fn repo_root(&self) -> PathBuf {
        mode::repo_root(self.mode, self.paths.root())
    }

    /// Refuse to operate on a vault whose layout was never created.
    pub(crate) fn ensure_initialized(&self) -> VaultResult<()> {
        if !store::exists(&self.paths.machines_dir()) {
            return Err(VaultError::VaultNotInitialized);
        }
        Ok(())
    }

    pub(crate) fn write_machine_record(&self, record: &MachineRecord) -> VaultResult<()> {
        let json = machine::to_pretty_json(record)?;
        store::write_atomic(
            &self.paths.machine_file(&record.id),
            json.as_bytes(),
            FileMode::Public,
        )
    }

    /// Run `f`, bracketed by pull-before and commit-and-push-after when the
    /// vault is global. The commit scope is the project directory plus the
    /// machines directory.
    pub(crate) fn with_sync<T>(
        &self,
        message: &str,
        f: impl FnOnce(&Self) -> VaultResult<T>,
    ) -> VaultResult<T> {
        if !self.mode.is_global() {
            return f(self);
        }

        let repo = self.repo_root();
        if self.transport.has_uncommitted_changes(&repo).unwrap_or(false) {
            warn!(
                "vault repository {} has uncommitted changes; they will be swept into this commit",
                repo.display()
            );
        }
        self.transport.safe_pull(&repo)?;
        let result = f(self)?;

        let mut scope = vec![PathBuf::from(MACHINES_DIR)];
        if !self.project.is_empty() {
            scope.insert(0, PathBuf::from(&self.project));
        }
        self.transport.commit_and_push(&repo, message, &scope)?;
        Ok(result)
    }
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("root", &self.paths.root())
            .field("project", &self.project)
            .field("mode", &self.mode)
            .field("machine", &self.identity.id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VaultError;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex, OnceLock};
    use tempfile::TempDir;

    /// Transport double that records every call and can be told to fail.
    #[derive(Clone, Default)]
    struct RecordingTransport {
        calls: Arc<Mutex<Vec<String>>>,
        fail_pull: bool,
        fail_push: bool,
    }

    impl RecordingTransport {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl GitTransport for RecordingTransport {
        fn safe_pull(&self, _repo_root: &Path) -> VaultResult<()> {
            self.record("pull".to_string());
            if self.fail_pull {
                return Err(VaultError::RemoteUnreachable("test".to_string()));
            }
            Ok(())
        }

        fn commit_and_push(
            &self,
            _repo_root: &Path,
            message: &str,
            paths: &[PathBuf],
        ) -> VaultResult<()> {
            let scope: Vec<String> = paths
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect();
            self.record(format!("push:{message}:{}", scope.join(",")));
            if self.fail_push {
                return Err(VaultError::MergeConflict("test".to_string()));
            }
            Ok(())
        }

        fn is_git_repo(&self, _path: &Path) -> bool {
            true
        }

        fn has_uncommitted_changes(&self, _path: &Path) -> VaultResult<bool> {
            Ok(false)
        }

        fn clone_repo(&self, url: &str, path: &Path) -> VaultResult<()> {
            self.record(format!("clone:{url}"));
            store::ensure_dir(path)
        }
    }

    // One shared home and identity; RSA-4096 generation is too slow to
    // repeat per test. Each test uses its own org/repo under the home.
    fn shared_home() -> &'static (TempDir, HomePaths) {
        static HOME: OnceLock<(TempDir, HomePaths)> = OnceLock::new();
        HOME.get_or_init(|| {
            let dir = TempDir::new().unwrap();
            let home = HomePaths::new(dir.path().to_path_buf());
            MachineIdentity::init(&home, Some("unit"), "vault unit tests").unwrap();
            (dir, home)
        })
    }

    fn global_vault(repo: &str, transport: RecordingTransport) -> Vault {
        let (_, home) = shared_home();
        let identity = MachineIdentity::load(home).unwrap();
        Vault::open_global(
            home.clone(),
            "acme",
            repo,
            "api",
            identity,
            Box::new(transport),
        )
        .unwrap()
    }

    fn one_secret() -> BTreeMap<String, String> {
        let mut secrets = BTreeMap::new();
        secrets.insert("TOKEN".to_string(), "t".to_string());
        secrets
    }

    #[test]
    fn test_global_mutation_is_bracketed_by_sync() {
        let transport = RecordingTransport::default();
        let vault = global_vault("bracketed", transport.clone());
        vault.init().unwrap();
        vault
            .push("default", &one_secret(), &GrantPolicy::default())
            .unwrap();

        let calls = transport.calls();
        // init: pull then push, then the same bracket around the secret push
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[0], "pull");
        assert!(calls[1].starts_with("push:nvolt: initialize vault"));
        assert_eq!(calls[2], "pull");
        assert!(calls[3].starts_with("push:nvolt: push 1 secret(s) to default"));

        // The commit scope is the project directory plus machines.
        assert!(calls[3].ends_with(":api,machines"));
    }

    #[test]
    fn test_failed_pull_aborts_before_mutation() {
        let transport = RecordingTransport {
            fail_pull: true,
            ..Default::default()
        };
        let vault = global_vault("pullfail", transport.clone());

        let result = vault.init();
        assert!(matches!(result, Err(VaultError::RemoteUnreachable(_))));
        assert!(!store::exists(&vault.paths.machines_dir()));
    }

    #[test]
    fn test_rejected_push_surfaces_conflict() {
        let transport = RecordingTransport {
            fail_push: true,
            ..Default::default()
        };
        let vault = global_vault("pushfail", transport.clone());

        let result = vault.init();
        assert!(matches!(result, Err(VaultError::MergeConflict(_))));
    }

    #[test]
    fn test_local_mode_never_touches_transport() {
        let (_, home) = shared_home();
        let identity = MachineIdentity::load(home).unwrap();
        let project = TempDir::new().unwrap();
        let transport = RecordingTransport::default();

        let vault = Vault::open(
            home.clone(),
            project.path().join(VAULT_DIR_NAME),
            "",
            identity,
            Box::new(transport.clone()),
        )
        .unwrap();
        vault.init().unwrap();
        vault
            .push("default", &one_secret(), &GrantPolicy::default())
            .unwrap();

        assert!(transport.calls().is_empty());
    }

    #[test]
    fn test_clone_global_runs_clone_and_opens() {
        let (_, home) = shared_home();
        let identity = MachineIdentity::load(home).unwrap();
        let transport = RecordingTransport::default();

        let vault = Vault::clone_global(
            home.clone(),
            "acme",
            "cloned",
            "git@example.com:acme/vault.git",
            "api",
            identity,
            Box::new(transport.clone()),
        )
        .unwrap();

        assert_eq!(vault.mode(), VaultMode::Global);
        assert_eq!(
            transport.calls(),
            vec!["clone:git@example.com:acme/vault.git".to_string()]
        );

        // A second clone into the same org/repo is refused.
        let identity = MachineIdentity::load(home).unwrap();
        let result = Vault::clone_global(
            home.clone(),
            "acme",
            "cloned",
            "git@example.com:acme/vault.git",
            "api",
            identity,
            Box::new(RecordingTransport::default()),
        );
        assert!(matches!(result, Err(VaultError::VaultAlreadyExists)));
    }

    #[test]
    fn test_global_vault_requires_project() {
        let (_, home) = shared_home();
        let identity = MachineIdentity::load(home).unwrap();

        let result = Vault::open_global(
            home.clone(),
            "acme",
            "noproject",
            "",
            identity,
            Box::new(RecordingTransport::default()),
        );
        assert!(matches!(result, Err(VaultError::InvalidInput { .. })));
    }

    #[test]
    fn test_enroll_rejects_mismatched_fingerprint() {
        let transport = RecordingTransport::default();
        let vault = global_vault("badenroll", transport);
        vault.init().unwrap();

        let mut record = vault.identity().record().clone();
        record.id = "m-intruder-0000000".to_string();
        record.fingerprint = "SHA256:AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=".to_string();

        let result = vault.enroll(&record);
        assert!(matches!(result, Err(VaultError::InvalidInput { .. })));
    }
}
