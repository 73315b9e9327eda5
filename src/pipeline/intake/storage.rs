//! Blob storage behind a trait.
//!
//! Locators are `/`-separated paths relative to the store root, e.g.
//! `slips/boleto_12244.pdf`. [`FsBlobStore`] maps them onto a directory tree.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};

use super::format::{sanitize_filename, stem_of};
use super::IntakeError;
use crate::config::STAGING_DIR;

/// Outcome of a move. A source that vanished before the move is not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    Moved,
    AlreadyGone,
}

pub trait BlobStore: Send + Sync {
    /// Store an upload in the staging area. Identical content under the same
    /// name resolves to the existing locator.
    fn put_file(&self, filename: &str, bytes: &[u8]) -> Result<String, IntakeError>;
    fn read_file(&self, locator: &str) -> Result<Vec<u8>, IntakeError>;
    fn move_file(&self, from: &str, to: &str) -> Result<MoveOutcome, IntakeError>;
    fn file_exists(&self, locator: &str) -> bool;
    /// Locators of the regular files directly under `prefix`, sorted.
    fn list_dir(&self, prefix: &str) -> Result<Vec<String>, IntakeError>;
}

/// SHA-256 of the content, lowercase hex.
pub fn content_digest(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Join a directory prefix and a file name into a locator.
pub fn join_locator(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

/// Last path segment of a locator.
pub fn locator_file_name(locator: &str) -> &str {
    locator.rsplit('/').next().unwrap_or(locator)
}

/// `name_1.ext`, `name_2.ext`, ... until `taken` says no.
pub fn unique_name(name: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(name) {
        return name.to_string();
    }
    let stem = stem_of(name);
    let ext = Path::new(name)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let mut n = 1;
    loop {
        let candidate = format!("{stem}_{n}{ext}");
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Filesystem-backed blob store.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a locator to a path under the root. Absolute paths and `..`
    /// segments are rejected.
    pub fn resolve(&self, locator: &str) -> Result<PathBuf, IntakeError> {
        let rel = Path::new(locator);
        if locator.trim().is_empty()
            || rel
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(IntakeError::InvalidLocator(locator.to_string()));
        }
        Ok(self.root.join(rel))
    }
}

impl BlobStore for FsBlobStore {
    fn put_file(&self, filename: &str, bytes: &[u8]) -> Result<String, IntakeError> {
        let digest = content_digest(bytes);
        let staging = self.resolve(STAGING_DIR)?;
        std::fs::create_dir_all(&staging)?;

        let name = sanitize_filename(filename);
        let same_content = |candidate: &str| -> bool {
            std::fs::read(staging.join(candidate))
                .map(|existing| content_digest(&existing) == digest)
                .unwrap_or(false)
        };
        if same_content(&name) {
            tracing::debug!(digest = %digest, name = %name, "Upload already staged");
            return Ok(join_locator(STAGING_DIR, &name));
        }

        let name = unique_name(&name, |candidate| staging.join(candidate).exists());
        std::fs::write(staging.join(&name), bytes)?;
        tracing::debug!(digest = %digest, name = %name, size = bytes.len(), "File staged");
        Ok(join_locator(STAGING_DIR, &name))
    }

    fn read_file(&self, locator: &str) -> Result<Vec<u8>, IntakeError> {
        let path = self.resolve(locator)?;
        std::fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => IntakeError::NotFound(locator.to_string()),
            _ => IntakeError::Io(e),
        })
    }

    fn move_file(&self, from: &str, to: &str) -> Result<MoveOutcome, IntakeError> {
        let from_path = self.resolve(from)?;
        let to_path = self.resolve(to)?;
        move_path(&from_path, &to_path)
    }

    fn file_exists(&self, locator: &str) -> bool {
        self.resolve(locator).map(|p| p.is_file()).unwrap_or(false)
    }

    fn list_dir(&self, prefix: &str) -> Result<Vec<String>, IntakeError> {
        let dir = self.resolve(prefix)?;
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut locators = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            locators.push(join_locator(prefix, &name));
        }
        locators.sort();
        Ok(locators)
    }
}

/// Rename, falling back to copy + remove when the rename cannot cross devices.
fn move_path(from: &Path, to: &Path) -> Result<MoveOutcome, IntakeError> {
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent)?;
    }

    match std::fs::rename(from, to) {
        Ok(()) => return Ok(MoveOutcome::Moved),
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(MoveOutcome::AlreadyGone),
        Err(e) => {
            tracing::debug!(error = %e, from = %from.display(), "Rename failed, copying instead");
        }
    }

    match std::fs::copy(from, to) {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(MoveOutcome::AlreadyGone),
        Err(e) => return Err(e.into()),
    }
    match std::fs::remove_file(from) {
        Ok(()) => Ok(MoveOutcome::Moved),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(MoveOutcome::Moved),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, FsBlobStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn put_then_read() {
        let (_dir, store) = store();
        let locator = store.put_file("boleto_12244.pdf", b"%PDF-1.4").unwrap();
        assert_eq!(locator, "staging/boleto_12244.pdf");
        assert_eq!(store.read_file(&locator).unwrap(), b"%PDF-1.4");
        assert!(store.file_exists(&locator));
    }

    #[test]
    fn identical_upload_reuses_locator() {
        let (_dir, store) = store();
        let a = store.put_file("nf.pdf", b"same").unwrap();
        let b = store.put_file("nf.pdf", b"same").unwrap();
        assert_eq!(a, b);
        assert_eq!(store.list_dir(STAGING_DIR).unwrap().len(), 1);
    }

    #[test]
    fn different_content_same_name_gets_suffix() {
        let (_dir, store) = store();
        let a = store.put_file("nf.pdf", b"one").unwrap();
        let b = store.put_file("nf.pdf", b"two").unwrap();
        assert_eq!(a, "staging/nf.pdf");
        assert_eq!(b, "staging/nf_1.pdf");
    }

    #[test]
    fn move_between_buckets() {
        let (_dir, store) = store();
        let locator = store.put_file("nf.pdf", b"x").unwrap();
        let outcome = store.move_file(&locator, "invoices/nf.pdf").unwrap();
        assert_eq!(outcome, MoveOutcome::Moved);
        assert!(!store.file_exists(&locator));
        assert!(store.file_exists("invoices/nf.pdf"));
    }

    #[test]
    fn moving_vanished_file_is_benign() {
        let (_dir, store) = store();
        let outcome = store.move_file("staging/ghost.pdf", "slips/ghost.pdf").unwrap();
        assert_eq!(outcome, MoveOutcome::AlreadyGone);
    }

    #[test]
    fn read_missing_is_not_found() {
        let (_dir, store) = store();
        assert!(matches!(store.read_file("slips/none.pdf"), Err(IntakeError::NotFound(_))));
    }

    #[test]
    fn traversal_locators_rejected() {
        let (_dir, store) = store();
        assert!(matches!(store.resolve("../etc/passwd"), Err(IntakeError::InvalidLocator(_))));
        assert!(matches!(store.resolve("/etc/passwd"), Err(IntakeError::InvalidLocator(_))));
        assert!(!store.file_exists("../x"));
    }

    #[test]
    fn list_missing_dir_is_empty() {
        let (_dir, store) = store();
        assert!(store.list_dir("bonus").unwrap().is_empty());
    }

    #[test]
    fn list_skips_subdirectories() {
        let (dir, store) = store();
        std::fs::create_dir_all(dir.path().join("slips/nested")).unwrap();
        std::fs::write(dir.path().join("slips/b.pdf"), b"b").unwrap();
        std::fs::write(dir.path().join("slips/a.pdf"), b"a").unwrap();
        assert_eq!(store.list_dir("slips").unwrap(), vec!["slips/a.pdf", "slips/b.pdf"]);
    }

    #[test]
    fn unique_name_appends_counter() {
        let taken = ["x.pdf", "x_1.pdf"];
        assert_eq!(unique_name("x.pdf", |n| taken.contains(&n)), "x_2.pdf");
        assert_eq!(unique_name("y.pdf", |n| taken.contains(&n)), "y.pdf");
    }

    #[test]
    fn digest_is_hex_sha256() {
        assert_eq!(
            content_digest(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
