//! On-disk layout of vaults and the machine home directory.
//!
//! The resolver is a pure mapping from (vault root, project, environment,
//! machine id, secret key) to file paths. Equal inputs yield equal outputs
//! across processes and runs; nothing in here touches the filesystem.
//!
//! Two modes share one layout. In local mode the project segment is empty
//! and collapses away, so machines and secrets live directly under the
//! project's `.nvolt` directory. In global mode the vault root is a shared
//! repository: machines live at the repository root and each project is a
//! top-level directory with its own `secrets/` and `wrapped_keys/` trees.

use std::path::{Path, PathBuf};

use crate::error::{VaultError, VaultResult};

/// Name of the vault directory inside a project (local mode) and of the
/// machine home directory under `$HOME`.
pub const VAULT_DIR_NAME: &str = ".nvolt";

/// Directory holding machine records.
pub const MACHINES_DIR: &str = "machines";

/// Directory holding encrypted secrets, per environment.
pub const SECRETS_DIR: &str = "secrets";

/// Directory holding wrapped master keys, per environment.
pub const WRAPPED_KEYS_DIR: &str = "wrapped_keys";

/// Suffix of encrypted secret files.
pub const SECRET_FILE_SUFFIX: &str = ".enc.json";

/// File name of the local machine's private key under the home vault.
pub const PRIVATE_KEY_FILE: &str = "private_key.pem";

/// File name of the local machine record under the home vault.
pub const MACHINE_INFO_FILE: &str = "machine-info.json";

/// Resolved paths under the user's home directory.
///
/// The home directory is looked up exactly once at the boundary and carried
/// in this value; no other component consults process-wide state.
#[derive(Debug, Clone)]
pub struct HomePaths {
    home: PathBuf,
}

impl HomePaths {
    /// Wrap an explicit home directory.
    pub fn new(home: PathBuf) -> Self {
        Self { home }
    }

    /// Look up the home directory from the environment.
    pub fn discover() -> VaultResult<Self> {
        dirs::home_dir()
            .map(Self::new)
            .ok_or_else(|| VaultError::InvalidInput {
                field: "home",
                reason: "could not determine the home directory".to_string(),
            })
    }

    /// `<home>/.nvolt`
    pub fn nvolt_dir(&self) -> PathBuf {
        self.home.join(VAULT_DIR_NAME)
    }

    /// `<home>/.nvolt/private_key.pem`
    pub fn private_key_file(&self) -> PathBuf {
        self.nvolt_dir().join(PRIVATE_KEY_FILE)
    }

    /// `<home>/.nvolt/machines/machine-info.json`
    pub fn machine_info_file(&self) -> PathBuf {
        self.nvolt_dir().join(MACHINES_DIR).join(MACHINE_INFO_FILE)
    }

    /// `<home>/.nvolt/orgs/<org>/<repo>`, the root of a global vault.
    pub fn org_vault_root(&self, org: &str, repo: &str) -> PathBuf {
        self.nvolt_dir().join("orgs").join(org).join(repo)
    }

    /// `<home>/.nvolt/orgs`
    pub fn orgs_dir(&self) -> PathBuf {
        self.nvolt_dir().join("orgs")
    }
}

/// Pure path resolver for a single vault root.
#[derive(Debug, Clone)]
pub struct VaultPaths {
    root: PathBuf,
}

impl VaultPaths {
    /// Resolver rooted at `root`.
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// The vault root itself.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of a project inside the vault. An empty project collapses
    /// to the vault root (local mode).
    pub fn project_dir(&self, project: &str) -> PathBuf {
        if project.is_empty() {
            self.root.clone()
        } else {
            self.root.join(project)
        }
    }

    /// Machine records always live at the vault root, in both modes.
    pub fn machines_dir(&self) -> PathBuf {
        self.root.join(MACHINES_DIR)
    }

    /// `machines/<machine_id>.json`
    pub fn machine_file(&self, machine_id: &str) -> PathBuf {
        self.machines_dir().join(format!("{machine_id}.json"))
    }

    /// `<project>/wrapped_keys/<environment>`
    pub fn wrapped_keys_env(&self, project: &str, environment: &str) -> PathBuf {
        self.project_dir(project)
            .join(WRAPPED_KEYS_DIR)
            .join(environment)
    }

    /// `<project>/wrapped_keys/<environment>/<machine_id>.json`
    pub fn wrapped_key_file(&self, project: &str, environment: &str, machine_id: &str) -> PathBuf {
        self.wrapped_keys_env(project, environment)
            .join(format!("{machine_id}.json"))
    }

    /// `<project>/wrapped_keys/<environment>/<machine_id>.json.pending`
    ///
    /// Holds a rotation's new master key, wrapped for the rotating
    /// machine, until every secret has been rewritten under it. The
    /// `.pending` suffix keeps the file out of the access list.
    pub fn pending_wrapped_key_file(
        &self,
        project: &str,
        environment: &str,
        machine_id: &str,
    ) -> PathBuf {
        self.wrapped_keys_env(project, environment)
            .join(format!("{machine_id}.json.pending"))
    }

    /// `<project>/wrapped_keys`
    pub fn wrapped_keys_dir(&self, project: &str) -> PathBuf {
        self.project_dir(project).join(WRAPPED_KEYS_DIR)
    }

    /// `<project>/secrets/<environment>`
    pub fn secrets_env(&self, project: &str, environment: &str) -> PathBuf {
        self.project_dir(project).join(SECRETS_DIR).join(environment)
    }

    /// `<project>/secrets`
    pub fn secrets_dir(&self, project: &str) -> PathBuf {
        self.project_dir(project).join(SECRETS_DIR)
    }

    /// `<project>/secrets/<environment>/<KEY>.enc.json`
    pub fn secret_file(&self, project: &str, environment: &str, secret_key: &str) -> PathBuf {
        self.secrets_env(project, environment)
            .join(format!("{secret_key}{SECRET_FILE_SUFFIX}"))
    }
}

/// Reject names that could escape the vault tree or corrupt file names.
///
/// Applies to environments, machine ids, secret keys, and non-empty
/// project names. The empty project segment of local mode is handled by
/// the callers that know it is legal.
pub fn validate_segment(field: &'static str, value: &str) -> VaultResult<()> {
    if value.is_empty() {
        return Err(VaultError::InvalidInput {
            field,
            reason: "must not be empty".to_string(),
        });
    }
    if value.contains('/') || value.contains('\\') {
        return Err(VaultError::InvalidInput {
            field,
            reason: "must not contain path separators".to_string(),
        });
    }
    if value == ".." || value.contains("..") {
        return Err(VaultError::InvalidInput {
            field,
            reason: "must not contain '..'".to_string(),
        });
    }
    if value.contains('\0') {
        return Err(VaultError::InvalidInput {
            field,
            reason: "must not contain NUL".to_string(),
        });
    }
    Ok(())
}
