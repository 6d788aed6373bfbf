//! Atomic filesystem operations.
//!
//! Every record the engine writes goes through [`write_atomic`]: the bytes
//! land in a `<path>.tmp` sibling first and are renamed into place, so a
//! concurrent reader sees either the old file or the new one, never a torn
//! write. Permissions are set before any byte is written.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use zeroize::Zeroize;

use crate::error::{VaultError, VaultResult};

/// Permission class of a file the store writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    /// Private key material, owner-only (0600).
    Private,
    /// Records and ciphertexts, world-readable (0644).
    Public,
}

#[cfg(unix)]
fn permissions_for(mode: FileMode) -> fs::Permissions {
    use std::os::unix::fs::PermissionsExt;
    let bits = match mode {
        FileMode::Private => 0o600,
        FileMode::Public => 0o644,
    };
    fs::Permissions::from_mode(bits)
}

/// Create `dir` and any missing parents. Directories get 0755.
pub fn ensure_dir(dir: &Path) -> VaultResult<()> {
    fs::create_dir_all(dir).map_err(|e| VaultError::from_io(dir, e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        // Only adjust directories we just created or own; failure here is
        // not fatal.
        if let Err(e) = fs::set_permissions(dir, fs::Permissions::from_mode(0o755)) {
            warn!("could not set permissions on {}: {e}", dir.display());
        }
    }
    Ok(())
}

/// Write `bytes` to `path` atomically with the requested permission class.
///
/// The data is written to `<path>.tmp` and renamed over the target. If the
/// rename fails the temp file is removed, leaving any previous file intact.
pub fn write_atomic(path: &Path, bytes: &[u8], mode: FileMode) -> VaultResult<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }

    let tmp = tmp_path(path);
    {
        let mut file = File::create(&tmp).map_err(|e| VaultError::from_io(&tmp, e))?;
        #[cfg(unix)]
        file.set_permissions(permissions_for(mode))
            .map_err(|e| VaultError::from_io(&tmp, e))?;
        #[cfg(not(unix))]
        let _ = mode;
        file.write_all(bytes).map_err(|e| VaultError::from_io(&tmp, e))?;
        file.sync_all().map_err(|e| VaultError::from_io(&tmp, e))?;
    }

    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(VaultError::from_io(path, e));
    }

    debug!("wrote {}", path.display());
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Read a file's bytes.
pub fn read(path: &Path) -> VaultResult<Vec<u8>> {
    fs::read(path).map_err(|e| VaultError::from_io(path, e))
}

/// Read a file as UTF-8 text.
pub fn read_to_string(path: &Path) -> VaultResult<String> {
    fs::read_to_string(path).map_err(|e| VaultError::from_io(path, e))
}

/// Whether a path exists. Never errors; unreadable paths count as absent.
pub fn exists(path: &Path) -> bool {
    path.exists()
}

/// Names of subdirectories of `dir`. A missing directory yields an empty
/// list. Order is not guaranteed; callers needing determinism must sort.
pub fn list_dirs(dir: &Path) -> VaultResult<Vec<String>> {
    list_entries(dir, true)
}

/// Names of regular files in `dir`. A missing directory yields an empty
/// list. Order is not guaranteed; callers needing determinism must sort.
pub fn list_files(dir: &Path) -> VaultResult<Vec<String>> {
    list_entries(dir, false)
}

fn list_entries(dir: &Path, dirs_only: bool) -> VaultResult<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(VaultError::from_io(dir, e)),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| VaultError::from_io(dir, e))?;
        let is_dir = entry
            .file_type()
            .map_err(|e| VaultError::from_io(&entry.path(), e))?
            .is_dir();
        if is_dir == dirs_only {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    Ok(names)
}

/// Remove a file. Missing files are not an error.
pub fn delete(path: &Path) -> VaultResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(VaultError::from_io(path, e)),
    }
}

/// Remove a file holding private key material.
///
/// The file's bytes are overwritten with zeros before the unlink. Best
/// effort: an overwrite failure still proceeds to the unlink.
pub fn secure_delete(path: &Path) -> VaultResult<()> {
    match fs::metadata(path) {
        Ok(meta) => {
            let len = meta.len() as usize;
            if let Err(e) = overwrite_with_zeros(path, len) {
                warn!("could not scrub {} before delete: {e}", path.display());
            }
            fs::remove_file(path).map_err(|e| VaultError::from_io(path, e))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(VaultError::from_io(path, e)),
    }
}

fn overwrite_with_zeros(path: &Path, len: usize) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).open(path)?;
    let mut zeros = vec![0u8; len];
    file.write_all(&zeros)?;
    file.sync_all()?;
    zeros.zeroize();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_atomic_creates_parents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a/b/c.json");

        write_atomic(&path, b"{}", FileMode::Public).unwrap();

        assert_eq!(read(&path).unwrap(), b"{}");
        assert!(!exists(&tmp_path(&path)));
    }

    #[test]
    fn test_write_atomic_replaces_existing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.json");

        write_atomic(&path, b"old", FileMode::Public).unwrap();
        write_atomic(&path, b"new", FileMode::Public).unwrap();

        assert_eq!(read(&path).unwrap(), b"new");
    }

    #[cfg(unix)]
    #[test]
    fn test_private_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("key.pem");

        write_atomic(&path, b"secret", FileMode::Private).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn test_public_files_are_world_readable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("record.json");

        write_atomic(&path, b"{}", FileMode::Public).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
    }

    #[test]
    fn test_list_missing_dir_is_empty() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");

        assert!(list_files(&missing).unwrap().is_empty());
        assert!(list_dirs(&missing).unwrap().is_empty());
    }

    #[test]
    fn test_list_separates_files_and_dirs() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("f.txt"), b"x").unwrap();

        let mut files = list_files(dir.path()).unwrap();
        files.sort();
        assert_eq!(files, vec!["f.txt"]);

        let mut dirs = list_dirs(dir.path()).unwrap();
        dirs.sort();
        assert_eq!(dirs, vec!["sub"]);
    }

    #[test]
    fn test_delete_missing_is_ok() {
        let dir = tempdir().unwrap();
        delete(&dir.path().join("ghost")).unwrap();
        secure_delete(&dir.path().join("ghost")).unwrap();
    }

    #[test]
    fn test_secure_delete_removes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("key.pem");
        fs::write(&path, b"very secret material").unwrap();

        secure_delete(&path).unwrap();
        assert!(!exists(&path));
    }

    #[test]
    fn test_read_missing_file_is_typed() {
        let dir = tempdir().unwrap();
        let result = read(&dir.path().join("ghost"));
        assert!(matches!(result, Err(VaultError::FileNotFound(_))));
    }
}
