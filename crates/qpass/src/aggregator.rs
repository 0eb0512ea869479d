//! Aggregator - all configured stores behind one namespace
//!
//! Entries are indexed by `(store_id, relative_path)`, never by display name
//! alone: when several stores contain `email/work`, every copy stays visible.
//! Resolving such a name fails with the full candidate list; searching returns
//! each copy as its own result. Store order only breaks display ties.

use qpass_core::StoreSpec;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::entry::{Entry, StoreId};
use crate::error::{QpassError, Result};
use crate::matcher::{MatchKind, Matcher, RankedEntry};
use crate::store::{Ciphertext, Store};

type EntryKey = (StoreId, PathBuf);

/// Every entry of every available store, plus what could not be read
#[derive(Debug, Default)]
pub struct Listing {
    pub entries: Vec<Entry>,
    pub unavailable: Vec<QpassError>,
}

#[derive(Debug, Default)]
struct Index {
    entries: BTreeMap<EntryKey, Entry>,
    by_name: BTreeMap<String, Vec<EntryKey>>,
}

impl Index {
    fn insert(&mut self, entry: Entry) {
        let key = (entry.store_id(), entry.relative_path().to_path_buf());
        let keys = self.by_name.entry(entry.name().to_string()).or_default();
        if !keys.contains(&key) {
            keys.push(key.clone());
            keys.sort();
        }
        self.entries.insert(key, entry);
    }

    /// Entries in display-name order, colliding names in store order
    fn sorted(&self) -> Vec<Entry> {
        self.by_name
            .values()
            .flatten()
            .filter_map(|key| self.entries.get(key).cloned())
            .collect()
    }

    fn named(&self, name: &str) -> Vec<&Entry> {
        self.by_name
            .get(name)
            .map(|keys| keys.iter().filter_map(|k| self.entries.get(k)).collect())
            .unwrap_or_default()
    }
}

/// Merges the configured stores into one searchable index
#[derive(Debug)]
pub struct Aggregator {
    stores: Vec<Store>,
    index: Index,
    sorted: Vec<Entry>,
    unavailable: Vec<QpassError>,
    matcher: Matcher,
}

impl Aggregator {
    /// Open every configured store
    ///
    /// Stores that cannot be read are reported and skipped. Having no
    /// readable store at all is a configuration error.
    pub fn configure(specs: &[StoreSpec]) -> Result<Self> {
        if specs.is_empty() {
            return Err(QpassError::Configuration(
                "no password store configured".to_string(),
            ));
        }

        let stores = specs
            .iter()
            .enumerate()
            .map(|(i, spec)| Store::new(StoreId(i), spec))
            .collect();

        let mut aggregator = Self {
            stores,
            index: Index::default(),
            sorted: Vec::new(),
            unavailable: Vec::new(),
            matcher: Matcher::default(),
        };
        aggregator.rescan()?;
        Ok(aggregator)
    }

    pub fn with_matcher(mut self, matcher: Matcher) -> Self {
        self.matcher = matcher;
        self
    }

    /// Enumerate every store again
    ///
    /// On error the previous index is kept.
    pub fn rescan(&mut self) -> Result<()> {
        let (index, unavailable) = scan(&self.stores)?;
        self.commit(index, unavailable);
        Ok(())
    }

    fn commit(&mut self, index: Index, unavailable: Vec<QpassError>) {
        self.sorted = index.sorted();
        self.index = index;
        self.unavailable = unavailable;
        debug!(
            stores = self.stores.len(),
            entries = self.sorted.len(),
            unavailable = self.unavailable.len(),
            "index built"
        );
    }

    pub fn stores(&self) -> &[Store] {
        &self.stores
    }

    pub fn store(&self, id: StoreId) -> Option<&Store> {
        self.stores.iter().find(|s| s.id() == id)
    }

    /// Keep only the store whose label or id (`3` or `#3`) equals `selector`
    pub fn restrict(&mut self, selector: &str) -> Result<()> {
        let wanted = selector.trim_start_matches('#').parse::<usize>().ok();
        let matches =
            |store: &Store| store.label() == selector || Some(store.id().0) == wanted;

        if !self.stores.iter().any(|s| matches(s)) {
            return Err(QpassError::Configuration(format!(
                "no password store matches {:?}",
                selector
            )));
        }

        let selected: Vec<Store> = self.stores.iter().filter(|s| matches(s)).cloned().collect();
        let (index, unavailable) = scan(&selected)?;
        self.stores = selected;
        self.commit(index, unavailable);
        Ok(())
    }

    /// Union of every store's entries, with the stores that were skipped
    pub fn list_all(&self) -> Listing {
        Listing {
            entries: self.sorted.clone(),
            unavailable: self.unavailable.clone(),
        }
    }

    pub fn entries(&self) -> &[Entry] {
        &self.sorted
    }

    pub fn unavailable(&self) -> &[QpassError] {
        &self.unavailable
    }

    /// Rank every entry against one query
    pub fn search(&self, query: &str) -> Vec<RankedEntry> {
        self.matcher.rank(&self.sorted, query)
    }

    /// Rank entries matching all terms
    pub fn search_terms<S: AsRef<str>>(&self, terms: &[S]) -> Vec<RankedEntry> {
        self.matcher.rank_terms(&self.sorted, terms)
    }

    /// Substring matches if there are any, fuzzy matches otherwise
    pub fn smart_search<S: AsRef<str>>(&self, terms: &[S]) -> Vec<RankedEntry> {
        let ranked = self.search_terms(terms);
        if ranked.iter().any(|r| r.kind >= MatchKind::Substring) {
            ranked
                .into_iter()
                .filter(|r| r.kind >= MatchKind::Substring)
                .collect()
        } else {
            ranked
        }
    }

    /// Find the one entry with this display name
    pub fn resolve(&self, display_name: &str) -> Result<Entry> {
        let found = self.index.named(display_name);
        match found.as_slice() {
            [] => Err(QpassError::NoMatch {
                query: display_name.to_string(),
            }),
            [entry] => Ok((*entry).clone()),
            candidates => Err(QpassError::AmbiguousName {
                name: display_name.to_string(),
                candidates: candidates
                    .iter()
                    .map(|e| (e.store_id(), self.store_label(e.store_id())))
                    .collect(),
            }),
        }
    }

    /// Whether more than one store has an entry with this name
    pub fn is_ambiguous(&self, display_name: &str) -> bool {
        self.index
            .by_name
            .get(display_name)
            .map(|keys| keys.len() > 1)
            .unwrap_or(false)
    }

    /// Display name, prefixed with the store label when the name collides
    pub fn label(&self, entry: &Entry) -> String {
        if self.is_ambiguous(entry.name()) {
            format!("[{}] {}", self.store_label(entry.store_id()), entry.name())
        } else {
            entry.name().to_string()
        }
    }

    fn store_label(&self, id: StoreId) -> String {
        self.store(id)
            .map(|s| s.label().to_string())
            .unwrap_or_else(|| id.to_string())
    }

    /// Locate the encrypted file of an entry
    pub fn read(&self, entry: &Entry) -> Result<Ciphertext> {
        let store = self
            .store(entry.store_id())
            .ok_or_else(|| QpassError::StoreUnavailable {
                store: entry.store_id().to_string(),
                path: entry.relative_path().to_path_buf(),
                reason: "store is not configured".to_string(),
            })?;
        store.read(entry)
    }
}

/// List every store into a fresh index, failing when none is usable
fn scan(stores: &[Store]) -> Result<(Index, Vec<QpassError>)> {
    let mut index = Index::default();
    let mut unavailable = Vec::new();
    let mut usable = 0;

    for store in stores {
        match store.list() {
            Ok(listing) => {
                usable += 1;
                for entry in listing.entries {
                    index.insert(entry);
                }
                unavailable.extend(listing.problems);
            }
            Err(e) => {
                warn!("skipping store: {}", e);
                unavailable.push(e);
            }
        }
    }

    if usable == 0 {
        let reasons = unavailable
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(QpassError::Configuration(format!(
            "no usable password store ({})",
            reasons
        )));
    }
    Ok((index, unavailable))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::temp_store;
    use tempfile::TempDir;

    fn spec(tmp: &TempDir, label: &str) -> StoreSpec {
        StoreSpec::new(tmp.path()).with_label(label)
    }

    fn names(entries: &[Entry]) -> Vec<&str> {
        entries.iter().map(|e| e.name()).collect()
    }

    #[test]
    fn test_union_of_disjoint_stores() -> Result<()> {
        let personal = temp_store(&["email/personal", "bank", "web/github"]);
        let work = temp_store(&["email/work", "vpn"]);

        let aggregator = Aggregator::configure(&[spec(&personal, "personal"), spec(&work, "work")])?;
        let listing = aggregator.list_all();

        assert_eq!(listing.entries.len(), 3 + 2);
        assert!(listing.unavailable.is_empty());
        assert_eq!(
            names(&listing.entries),
            vec!["bank", "email/personal", "email/work", "vpn", "web/github"]
        );
        Ok(())
    }

    #[test]
    fn test_collisions_are_surfaced() -> Result<()> {
        let personal = temp_store(&["email/work", "bank"]);
        let team = temp_store(&["email/work"]);
        let aggregator = Aggregator::configure(&[spec(&personal, "personal"), spec(&team, "team")])?;

        match aggregator.resolve("email/work") {
            Err(QpassError::AmbiguousName { name, candidates }) => {
                assert_eq!(name, "email/work");
                assert_eq!(
                    candidates,
                    vec![(StoreId(0), "personal".to_string()), (StoreId(1), "team".to_string())]
                );
            }
            other => panic!("expected AmbiguousName, got {:?}", other),
        }

        let ranked = aggregator.search("email/work");
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].entry.store_id(), StoreId(0));
        assert_eq!(ranked[1].entry.store_id(), StoreId(1));
        assert_eq!(aggregator.label(&ranked[0].entry), "[personal] email/work");
        assert_eq!(aggregator.label(&ranked[1].entry), "[team] email/work");

        // Unique names resolve and display without a prefix
        let bank = aggregator.resolve("bank")?;
        assert_eq!(aggregator.label(&bank), "bank");
        Ok(())
    }

    #[test]
    fn test_missing_store_is_skipped() -> Result<()> {
        let good = temp_store(&["foo", "bar"]);
        let missing = TempDir::new().unwrap();
        let missing_spec = StoreSpec::new(missing.path().join("gone")).with_label("gone");

        let aggregator = Aggregator::configure(&[missing_spec, spec(&good, "good")])?;
        let listing = aggregator.list_all();

        assert_eq!(names(&listing.entries), vec!["bar", "foo"]);
        assert_eq!(listing.unavailable.len(), 1);
        assert!(matches!(
            &listing.unavailable[0],
            QpassError::StoreUnavailable { store, .. } if store == "gone"
        ));
        Ok(())
    }

    #[test]
    fn test_no_usable_store() {
        let missing = TempDir::new().unwrap();
        let result = Aggregator::configure(&[StoreSpec::new(missing.path().join("gone"))]);
        match result {
            Err(err @ QpassError::Configuration(_)) => assert_eq!(err.exit_code(), 3),
            other => panic!("expected Configuration, got {:?}", other),
        }

        assert!(matches!(Aggregator::configure(&[]), Err(QpassError::Configuration(_))));
    }

    #[test]
    fn test_empty_store_is_usable() -> Result<()> {
        let empty = TempDir::new().unwrap();
        let aggregator = Aggregator::configure(&[StoreSpec::new(empty.path())])?;
        assert!(aggregator.entries().is_empty());
        assert!(matches!(aggregator.resolve("x"), Err(QpassError::NoMatch { .. })));
        Ok(())
    }

    #[test]
    fn test_smart_search() -> Result<()> {
        let store = temp_store(&["abcdef", "aabbccddeeff", "Google"]);
        let aggregator = Aggregator::configure(&[StoreSpec::new(store.path())])?;

        // A substring match hides the fuzzy candidates
        let matches = aggregator.smart_search(&["abc"]);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].entry.name(), "abcdef");

        // Fuzzy matching is the fallback
        let matches = aggregator.smart_search(&["gg"]);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].entry.name(), "Google");

        // No terms lists everything
        assert_eq!(aggregator.smart_search::<&str>(&[]).len(), 3);
        Ok(())
    }

    #[test]
    fn test_restrict() -> Result<()> {
        let personal = temp_store(&["email/work"]);
        let team = temp_store(&["email/work", "vpn"]);
        let specs = [spec(&personal, "personal"), spec(&team, "team")];

        let mut aggregator = Aggregator::configure(&specs)?;
        aggregator.restrict("team")?;
        assert_eq!(names(aggregator.entries()), vec!["email/work", "vpn"]);
        assert_eq!(aggregator.resolve("email/work")?.store_id(), StoreId(1));

        let mut aggregator = Aggregator::configure(&specs)?;
        aggregator.restrict("#0")?;
        assert_eq!(names(aggregator.entries()), vec!["email/work"]);

        let mut aggregator = Aggregator::configure(&specs)?;
        assert!(matches!(aggregator.restrict("nope"), Err(QpassError::Configuration(_))));
        Ok(())
    }

    #[test]
    fn test_failed_restrict_keeps_previous_state() -> Result<()> {
        let good = temp_store(&["foo", "bar"]);
        let missing = TempDir::new().unwrap();
        let specs = [
            spec(&good, "good"),
            StoreSpec::new(missing.path().join("gone")).with_label("gone"),
        ];

        let mut aggregator = Aggregator::configure(&specs)?;
        assert!(matches!(aggregator.restrict("gone"), Err(QpassError::Configuration(_))));

        assert_eq!(aggregator.stores().len(), 2);
        assert_eq!(names(aggregator.entries()), vec!["bar", "foo"]);
        assert_eq!(aggregator.resolve("foo")?.store_id(), StoreId(0));
        assert_eq!(aggregator.unavailable().len(), 1);
        Ok(())
    }

    #[test]
    fn test_custom_matcher() -> Result<()> {
        use crate::matcher::MatchWeights;

        let store = temp_store(&["web/github", "bank"]);
        let weights = MatchWeights {
            boundary_bonus: 0,
            ..MatchWeights::default()
        };
        let aggregator =
            Aggregator::configure(&[StoreSpec::new(store.path())])?.with_matcher(Matcher::new(weights));

        let ranked = aggregator.search("gh");
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].entry.name(), "web/github");
        Ok(())
    }

    #[test]
    fn test_read_through_aggregator() -> Result<()> {
        let first = temp_store(&["a"]);
        let second = temp_store(&["b"]);
        let aggregator = Aggregator::configure(&[StoreSpec::new(first.path()), StoreSpec::new(second.path())])?;

        let entry = aggregator.resolve("b")?;
        let ciphertext = aggregator.read(&entry)?;
        assert!(ciphertext.path().ends_with("b.gpg"));

        let stranger = Entry::new(StoreId(7), "b.gpg");
        assert!(matches!(aggregator.read(&stranger), Err(QpassError::StoreUnavailable { .. })));
        Ok(())
    }
}
