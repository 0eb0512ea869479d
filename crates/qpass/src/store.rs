//! Store - one password store directory
//!
//! Each credential is a separate `.gpg` file somewhere below the store root.
//! Directories group entries (e.g. `email/personal`, `email/work`); hidden
//! directories such as `.git` hold metadata and are never entered.

use qpass_core::StoreSpec;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::entry::{Entry, StoreId, ENTRY_EXTENSION};
use crate::error::{QpassError, Result};

/// Result of enumerating one store
///
/// A symlink cycle or unreadable subdirectory only costs that subtree; the
/// rest of the store is still listed and the problem is reported alongside.
#[derive(Debug, Default)]
pub struct StoreListing {
    pub entries: Vec<Entry>,
    pub problems: Vec<QpassError>,
}

/// Location of one encrypted entry, ready to hand to the decryption program
#[derive(Debug, Clone)]
pub struct Ciphertext {
    entry: Entry,
    path: PathBuf,
}

impl Ciphertext {
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Absolute path of the encrypted file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A configured password store
#[derive(Debug, Clone)]
pub struct Store {
    id: StoreId,
    root: PathBuf,
    label: String,
}

impl Store {
    pub fn new(id: StoreId, spec: &StoreSpec) -> Self {
        let label = spec.label.clone().unwrap_or_else(|| {
            spec.path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| spec.path.display().to_string())
        });

        Self {
            id,
            root: spec.path.clone(),
            label,
        }
    }

    pub fn id(&self) -> StoreId {
        self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    fn unavailable(&self, path: &Path, reason: impl Into<String>) -> QpassError {
        QpassError::StoreUnavailable {
            store: self.label.clone(),
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Check that the root is a readable directory
    pub fn check(&self) -> Result<()> {
        let metadata =
            fs::metadata(&self.root).map_err(|e| self.unavailable(&self.root, e.to_string()))?;
        if !metadata.is_dir() {
            return Err(self.unavailable(&self.root, "not a directory"));
        }
        fs::read_dir(&self.root).map_err(|e| self.unavailable(&self.root, e.to_string()))?;
        Ok(())
    }

    /// Enumerate every entry below the root, sorted by display name
    pub fn list(&self) -> Result<StoreListing> {
        self.check()?;

        let mut listing = StoreListing::default();
        let walker = WalkDir::new(&self.root)
            .follow_links(true)
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| !is_metadata_dir(e));

        for item in walker {
            match item {
                Ok(dir_entry) => {
                    if let Some(entry) = self.entry_for(&dir_entry) {
                        listing.entries.push(entry);
                    }
                }
                Err(err) => {
                    let path = err.path().unwrap_or(&self.root).to_path_buf();
                    let reason = match err.loop_ancestor() {
                        Some(ancestor) => {
                            format!("symbolic link cycle back to {}", ancestor.display())
                        }
                        None => err.to_string(),
                    };
                    let problem = self.unavailable(&path, reason);
                    warn!("{}", problem);
                    listing.problems.push(problem);
                }
            }
        }

        listing.entries.sort();
        debug!(
            store = %self.label,
            entries = listing.entries.len(),
            problems = listing.problems.len(),
            "listed store"
        );
        Ok(listing)
    }

    fn entry_for(&self, dir_entry: &DirEntry) -> Option<Entry> {
        if !dir_entry.file_type().is_file() {
            return None;
        }
        let path = dir_entry.path();
        if path.extension().map(|e| e != ENTRY_EXTENSION).unwrap_or(true) {
            return None;
        }
        let relative = path.strip_prefix(&self.root).ok()?;
        Some(Entry::new(self.id, relative))
    }

    /// Locate the encrypted file of an entry
    pub fn read(&self, entry: &Entry) -> Result<Ciphertext> {
        if entry.store_id() != self.id {
            return Err(self.unavailable(
                &self.root,
                format!("{} belongs to store {}", entry.name(), entry.store_id()),
            ));
        }

        let path = self.root.join(entry.relative_path());
        if !path.is_file() {
            return Err(self.unavailable(&path, "entry no longer exists"));
        }

        let path = path.canonicalize().unwrap_or(path);
        Ok(Ciphertext {
            entry: entry.clone(),
            path,
        })
    }
}

/// Hidden directories (`.git`, `.extensions`, ...) hold store metadata
fn is_metadata_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry.file_name().to_string_lossy().starts_with('.')
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Create empty entry files below a fresh temporary store
    pub(crate) fn temp_store(names: &[&str]) -> TempDir {
        let tmp = TempDir::new().unwrap();
        for name in names {
            let path = tmp.path().join(format!("{}.gpg", name));
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, b"ciphertext").unwrap();
        }
        tmp
    }

    fn names(listing: &StoreListing) -> Vec<&str> {
        listing.entries.iter().map(|e| e.name()).collect()
    }

    #[test]
    fn test_password_discovery() -> Result<()> {
        let tmp = temp_store(&["foo", "foo/bar", "foo/bar/baz", "Also with spaces"]);
        let store = Store::new(StoreId(0), &StoreSpec::new(tmp.path()));

        let listing = store.list()?;
        assert_eq!(names(&listing), vec!["Also with spaces", "foo", "foo/bar", "foo/bar/baz"]);
        assert!(listing.problems.is_empty());
        Ok(())
    }

    #[test]
    fn test_skips_metadata_and_other_files() -> Result<()> {
        let tmp = temp_store(&["visible", ".git/objects/hidden"]);
        fs::write(tmp.path().join(".gpg-id"), "ABCDEF").unwrap();
        fs::write(tmp.path().join("notes.txt"), "not an entry").unwrap();
        let store = Store::new(StoreId(0), &StoreSpec::new(tmp.path()));

        assert_eq!(names(&store.list()?), vec!["visible"]);
        Ok(())
    }

    #[test]
    fn test_missing_root() {
        let tmp = TempDir::new().unwrap();
        let store = Store::new(StoreId(3), &StoreSpec::new(tmp.path().join("missing")));

        match store.list() {
            Err(QpassError::StoreUnavailable { store, path, .. }) => {
                assert_eq!(store, "missing");
                assert!(path.ends_with("missing"));
            }
            other => panic!("expected StoreUnavailable, got {:?}", other),
        }
    }

    #[test]
    fn test_root_is_a_file() {
        let tmp = temp_store(&["entry"]);
        let store = Store::new(StoreId(0), &StoreSpec::new(tmp.path().join("entry.gpg")));
        assert!(matches!(store.check(), Err(QpassError::StoreUnavailable { .. })));
    }

    #[test]
    fn test_label_defaults_to_directory_name() {
        let spec = StoreSpec::new("/home/user/.password-store");
        assert_eq!(Store::new(StoreId(0), &spec).label(), ".password-store");

        let spec = StoreSpec::new("/srv/team").with_label("team");
        assert_eq!(Store::new(StoreId(0), &spec).label(), "team");
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_cycle_is_scoped() -> Result<()> {
        let tmp = temp_store(&["email/work", "web/github"]);
        std::os::unix::fs::symlink(tmp.path().join("email"), tmp.path().join("email/loop"))
            .unwrap();
        let store = Store::new(StoreId(0), &StoreSpec::new(tmp.path()));

        let listing = store.list()?;
        assert_eq!(names(&listing), vec!["email/work", "web/github"]);
        assert_eq!(listing.problems.len(), 1);
        match &listing.problems[0] {
            QpassError::StoreUnavailable { path, reason, .. } => {
                assert!(path.ends_with("email/loop"));
                assert!(reason.contains("cycle"));
            }
            other => panic!("unexpected problem {:?}", other),
        }
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_directory_is_followed() -> Result<()> {
        let shared = temp_store(&["db/prod"]);
        let tmp = temp_store(&["local"]);
        std::os::unix::fs::symlink(shared.path(), tmp.path().join("shared")).unwrap();
        let store = Store::new(StoreId(0), &StoreSpec::new(tmp.path()));

        assert_eq!(names(&store.list()?), vec!["local", "shared/db/prod"]);
        Ok(())
    }

    #[test]
    fn test_read() -> Result<()> {
        let tmp = temp_store(&["email/work"]);
        let store = Store::new(StoreId(0), &StoreSpec::new(tmp.path()));
        let entry = store.list()?.entries.remove(0);

        let ciphertext = store.read(&entry)?;
        assert!(ciphertext.path().is_absolute());
        assert!(ciphertext.path().ends_with("email/work.gpg"));
        assert_eq!(ciphertext.entry(), &entry);

        fs::remove_file(tmp.path().join("email/work.gpg")).unwrap();
        assert!(store.read(&entry).is_err());

        let foreign = Entry::new(StoreId(9), "email/work.gpg");
        assert!(store.read(&foreign).is_err());
        Ok(())
    }
}
