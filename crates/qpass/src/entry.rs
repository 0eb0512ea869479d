//! Entry identity - which credential, not what it contains

use std::cmp::Ordering;
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Extension of encrypted credential files
pub const ENTRY_EXTENSION: &str = "gpg";

/// Position of a store in the configured store list
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StoreId(pub usize);

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One credential in one store
///
/// Identity is `(store_id, relative_path)`. The display name is the relative
/// path with `/` separators and without the `.gpg` suffix, so two stores can
/// produce entries with equal names but never equal identities.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Entry {
    store_id: StoreId,
    relative_path: PathBuf,
    name: String,
}

impl Entry {
    pub fn new(store_id: StoreId, relative_path: impl Into<PathBuf>) -> Self {
        let relative_path = relative_path.into();
        let name = display_name(&relative_path);
        Self {
            store_id,
            relative_path,
            name,
        }
    }

    pub fn store_id(&self) -> StoreId {
        self.store_id
    }

    /// Path of the encrypted file relative to its store root
    pub fn relative_path(&self) -> &Path {
        &self.relative_path
    }

    /// Name shown to the user (e.g. `email/work`)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name with spaced separators (e.g. `email / work`)
    pub fn title(&self) -> String {
        self.name.split('/').collect::<Vec<_>>().join(" / ")
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name
            .cmp(&other.name)
            .then(self.store_id.cmp(&other.store_id))
            .then_with(|| self.relative_path.cmp(&other.relative_path))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

fn display_name(relative_path: &Path) -> String {
    let joined = relative_path
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/");

    let suffix = format!(".{}", ENTRY_EXTENSION);
    match joined.strip_suffix(&suffix) {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => joined,
    }
}
