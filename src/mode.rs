//! Vault mode classification.
//!
//! A vault root is either local (a `.nvolt` directory alongside one
//! project) or global (a shared repository under `~/.nvolt/orgs/`). This is
//! the only component that encodes the distinction; everything else asks.

use std::path::{Path, PathBuf};

use crate::paths::HomePaths;

/// Storage mode of a vault root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultMode {
    /// Vault lives inside a single project directory on this machine.
    Local,
    /// Vault is a shared Git repository under the home orgs tree.
    Global,
}

impl VaultMode {
    /// Whether synchronization hooks run around mutations.
    pub fn is_global(&self) -> bool {
        matches!(self, VaultMode::Global)
    }
}

/// Classify a vault root. Roots under `<home>/.nvolt/orgs/` are global;
/// everything else is local.
pub fn classify(home: &HomePaths, vault_root: &Path) -> VaultMode {
    if vault_root.starts_with(home.orgs_dir()) {
        VaultMode::Global
    } else {
        VaultMode::Local
    }
}

/// The repository root enclosing a vault, used by synchronization hooks
/// and by verification.
///
/// A global vault root is itself the repository root. For a local vault
/// the enclosing project directory (the parent of `.nvolt`) is returned.
pub fn repo_root(mode: VaultMode, vault_root: &Path) -> PathBuf {
    match mode {
        VaultMode::Global => vault_root.to_path_buf(),
        VaultMode::Local => vault_root
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| vault_root.to_path_buf()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_global() {
        let home = HomePaths::new(PathBuf::from("/home/u"));
        let root = PathBuf::from("/home/u/.nvolt/orgs/acme/infra");
        assert_eq!(classify(&home, &root), VaultMode::Global);
    }

    #[test]
    fn test_classify_local() {
        let home = HomePaths::new(PathBuf::from("/home/u"));
        let root = PathBuf::from("/work/app/.nvolt");
        assert_eq!(classify(&home, &root), VaultMode::Local);

        // The home vault dir itself is not under orgs/
        assert_eq!(classify(&home, &home.nvolt_dir()), VaultMode::Local);
    }

    #[test]
    fn test_repo_root_global_is_vault_root() {
        let root = PathBuf::from("/home/u/.nvolt/orgs/acme/infra");
        assert_eq!(repo_root(VaultMode::Global, &root), root);
    }

    #[test]
    fn test_repo_root_local_is_project_dir() {
        let root = PathBuf::from("/work/app/.nvolt");
        assert_eq!(repo_root(VaultMode::Local, &root), PathBuf::from("/work/app"));
    }
}
