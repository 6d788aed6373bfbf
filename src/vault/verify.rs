//! Vault integrity verification.
//!
//! `verify` walks the vault and produces a typed report. Errors are
//! conditions the engine cannot operate under; warnings are suspicious but
//! survivable, like a machine no environment has granted yet.

use std::collections::BTreeSet;
use std::path::Path;

use log::warn;
use serde::Serialize;

use crate::paths::PRIVATE_KEY_FILE;
use crate::store;

use super::Vault;
use crate::error::VaultResult;

/// Patterns the vault repository's `.gitignore` must carry so that key
/// material and rendered env files stay out of history.
const REQUIRED_GITIGNORE_PATTERNS: &[&str] = &[PRIVATE_KEY_FILE, "*.pem", ".env", ".env.*"];

/// Which verification step produced an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CheckKind {
    /// Required directories exist and are directories.
    Structure,
    /// The private key lives outside the repository.
    PrivateKeyLocation,
    /// The repository ignores key and env files.
    GitIgnore,
    /// This machine can unwrap each environment's master key.
    Access,
    /// Every wrapped-key file references an enrolled machine.
    OrphanedWrappedKey,
    /// Every machine holds at least one wrapped key.
    MachineCoverage,
}

/// One finding of a verification run.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyIssue {
    /// The check that produced the finding.
    pub check: CheckKind,
    /// Human-readable description.
    pub message: String,
}

/// Outcome of [`Vault::verify`].
#[derive(Debug, Default, Serialize)]
pub struct VerifyReport {
    /// Conditions that abort with a non-zero status.
    pub errors: Vec<VerifyIssue>,
    /// Suspicious conditions that do not abort.
    pub warnings: Vec<VerifyIssue>,
}

impl VerifyReport {
    /// Whether the vault passed without errors. Warnings do not fail.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, check: CheckKind, message: String) {
        self.errors.push(VerifyIssue { check, message });
    }

    fn warning(&mut self, check: CheckKind, message: String) {
        warn!("verify: {message}");
        self.warnings.push(VerifyIssue { check, message });
    }
}

impl Vault {
    /// Verify the vault's structure, key placement, and grant consistency.
    pub fn verify(&self) -> VaultResult<VerifyReport> {
        let mut report = VerifyReport::default();

        self.check_structure(&mut report);
        if !report.is_ok() {
            // Without the base layout the remaining checks only cascade.
            return Ok(report);
        }

        self.check_private_key_location(&mut report);
        self.check_gitignore(&mut report);
        self.check_access_and_orphans(&mut report)?;

        Ok(report)
    }

    fn check_structure(&self, report: &mut VerifyReport) {
        let root = self.paths.root();
        if !root.is_dir() {
            report.error(
                CheckKind::Structure,
                format!("vault root {} is missing or not a directory", root.display()),
            );
            return;
        }
        let machines = self.paths.machines_dir();
        if !machines.is_dir() {
            report.error(
                CheckKind::Structure,
                format!(
                    "machines directory {} is missing or not a directory",
                    machines.display()
                ),
            );
        }
    }

    fn check_private_key_location(&self, report: &mut VerifyReport) {
        let key_path = self.home.private_key_file();
        let repo = self.repo_root();

        if path_within(&key_path, &repo) {
            report.error(
                CheckKind::PrivateKeyLocation,
                format!(
                    "private key {} is inside the repository {}",
                    key_path.display(),
                    repo.display()
                ),
            );
        }
    }

    fn check_gitignore(&self, report: &mut VerifyReport) {
        let path = self.repo_root().join(".gitignore");
        let content = store::read_to_string(&path).unwrap_or_default();
        let lines: BTreeSet<&str> = content.lines().map(str::trim).collect();

        for pattern in REQUIRED_GITIGNORE_PATTERNS {
            if !lines.contains(pattern) {
                report.warning(
                    CheckKind::GitIgnore,
                    format!("{} does not ignore '{pattern}'", path.display()),
                );
            }
        }
    }

    fn check_access_and_orphans(&self, report: &mut VerifyReport) -> VaultResult<()> {
        let machines = self.machines()?;
        let machine_ids: BTreeSet<String> = machines.iter().map(|m| m.id.clone()).collect();
        let mut covered: BTreeSet<String> = BTreeSet::new();

        for project in self.projects()? {
            let label = if project.is_empty() {
                "this project".to_string()
            } else {
                project.clone()
            };

            for environment in self.environments_of(&project)? {
                match self.load_master_key(&project, &environment) {
                    Ok(_) => {}
                    Err(e) => report.warning(
                        CheckKind::Access,
                        format!("no access to {environment} of {label}: {e}"),
                    ),
                }

                for id in self.granted_machine_ids(&project, &environment)? {
                    if machine_ids.contains(&id) {
                        covered.insert(id);
                    } else {
                        report.warning(
                            CheckKind::OrphanedWrappedKey,
                            format!(
                                "wrapped key for unknown machine {id} in {environment} of {label}"
                            ),
                        );
                    }
                }
            }
        }

        for machine in &machines {
            if !covered.contains(&machine.id) {
                report.warning(
                    CheckKind::MachineCoverage,
                    format!("machine {} has no wrapped key in any environment", machine.id),
                );
            }
        }

        Ok(())
    }
}

/// Whether a path is inside `root` after canonicalization.
pub fn path_within(path: &Path, root: &Path) -> bool {
    let canonical_path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let canonical_root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    canonical_path.starts_with(canonical_root)
}
