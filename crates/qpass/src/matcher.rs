//! Matcher - fuzzy ranking of entries against a query
//!
//! Matching is case-insensitive. Every query character must appear in the
//! display name in order; entries that do not contain the whole query as a
//! subsequence are dropped rather than scored at zero.
//!
//! Scores are tiered: an exact match beats any prefix match, which beats any
//! contiguous substring, which beats any loose subsequence. Within a tier the
//! alignment score decides: every matched character is worth
//! [`MatchWeights::char_match`], characters right after a separator earn
//! [`MatchWeights::boundary_bonus`], adjacent matches earn
//! [`MatchWeights::consecutive_bonus`] and gaps between matched characters
//! cost [`MatchWeights::gap_open`] plus [`MatchWeights::gap_extend`] per
//! extra skipped character. Ties fall back to display-name order.
//!
//! `matched_spans` are half-open `(start, end)` ranges of *character*
//! indices into the display name.

use std::cmp::Reverse;

use crate::entry::Entry;

/// Characters that start a new word or path segment
const SEPARATORS: &[char] = &['/', '-', '_', ' ', '.'];

const UNREACHABLE: i64 = i64::MIN / 4;

/// Scoring constants
///
/// These are tuning knobs, not invariants. The only contract is that a more
/// specific or more contiguous match outranks a looser one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchWeights {
    /// Distance between tiers; must exceed any alignment score difference
    pub tier_width: i64,
    pub char_match: i64,
    pub boundary_bonus: i64,
    pub consecutive_bonus: i64,
    pub gap_open: i64,
    pub gap_extend: i64,
}

impl Default for MatchWeights {
    fn default() -> Self {
        Self {
            tier_width: 1_000_000,
            char_match: 16,
            boundary_bonus: 8,
            consecutive_bonus: 4,
            gap_open: 3,
            gap_extend: 1,
        }
    }
}

/// How a query matched, weakest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchKind {
    /// Empty query, every entry matches
    Unfiltered,
    Subsequence,
    Substring,
    Prefix,
    Exact,
}

impl MatchKind {
    fn tier(self) -> i64 {
        match self {
            Self::Unfiltered => 0,
            Self::Subsequence => 1,
            Self::Substring => 2,
            Self::Prefix => 3,
            Self::Exact => 4,
        }
    }
}

/// An entry that matched a query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedEntry {
    pub entry: Entry,
    pub score: i64,
    pub matched_spans: Vec<(usize, usize)>,
    /// Weakest match kind over all query terms
    pub kind: MatchKind,
}

/// Score of one query term against one name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermMatch {
    pub kind: MatchKind,
    pub score: i64,
    pub positions: Vec<usize>,
}

/// Ranks entries by how well their display names match a query
#[derive(Debug, Clone, Default)]
pub struct Matcher {
    weights: MatchWeights,
}

impl Matcher {
    pub fn new(weights: MatchWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &MatchWeights {
        &self.weights
    }

    /// Rank entries against a single query, best first
    ///
    /// An empty query returns every entry with the same score, in
    /// display-name order.
    pub fn rank(&self, entries: &[Entry], query: &str) -> Vec<RankedEntry> {
        self.rank_terms(entries, &[query])
    }

    /// Rank entries that match every term
    ///
    /// Scores add up across terms and matched spans are merged.
    pub fn rank_terms<S: AsRef<str>>(&self, entries: &[Entry], terms: &[S]) -> Vec<RankedEntry> {
        let terms: Vec<&str> = terms
            .iter()
            .map(|t| t.as_ref())
            .filter(|t| !t.is_empty())
            .collect();

        let mut ranked: Vec<RankedEntry> = entries
            .iter()
            .filter_map(|entry| self.rank_entry(entry, &terms))
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| a.entry.cmp(&b.entry))
        });
        ranked
    }

    fn rank_entry(&self, entry: &Entry, terms: &[&str]) -> Option<RankedEntry> {
        if terms.is_empty() {
            return Some(RankedEntry {
                entry: entry.clone(),
                score: 0,
                matched_spans: Vec::new(),
                kind: MatchKind::Unfiltered,
            });
        }

        let mut score = 0;
        let mut kind = MatchKind::Exact;
        let mut positions = Vec::new();
        for term in terms {
            let m = self.score(entry.name(), term)?;
            score += m.score;
            kind = kind.min(m.kind);
            positions.extend(m.positions);
        }
        positions.sort_unstable();
        positions.dedup();

        Some(RankedEntry {
            entry: entry.clone(),
            score,
            matched_spans: spans(&positions),
            kind,
        })
    }

    /// Score one term against a name, `None` when it does not match
    pub fn score(&self, name: &str, term: &str) -> Option<TermMatch> {
        let name_chars: Vec<char> = name.chars().collect();
        let folded: Vec<char> = name_chars.iter().map(|&c| fold(c)).collect();
        let query: Vec<char> = term.chars().map(fold).collect();
        let n = folded.len();
        let m = query.len();

        if m == 0 || m > n {
            return None;
        }

        let (kind, alignment, positions) = if folded == query {
            let score = self.contiguous_score(&name_chars, 0, m);
            (MatchKind::Exact, score, (0..m).collect())
        } else if folded[..m] == query[..] {
            let score = self.contiguous_score(&name_chars, 0, m);
            (MatchKind::Prefix, score, (0..m).collect())
        } else if let Some((start, score)) = self.best_substring(&name_chars, &folded, &query) {
            (MatchKind::Substring, score, (start..start + m).collect())
        } else {
            let (score, positions) = self.align(&name_chars, &folded, &query)?;
            (MatchKind::Subsequence, score, positions)
        };

        Some(TermMatch {
            kind,
            score: kind.tier() * self.weights.tier_width + alignment,
            positions,
        })
    }

    fn char_bonus(&self, name: &[char], j: usize) -> i64 {
        let boundary = j == 0 || SEPARATORS.contains(&name[j - 1]);
        self.weights.char_match + if boundary { self.weights.boundary_bonus } else { 0 }
    }

    fn contiguous_score(&self, name: &[char], start: usize, len: usize) -> i64 {
        let chars: i64 = (start..start + len).map(|j| self.char_bonus(name, j)).sum();
        chars + self.weights.consecutive_bonus * (len as i64 - 1)
    }

    /// Highest scoring occurrence of the query as a contiguous run
    fn best_substring(&self, name: &[char], folded: &[char], query: &[char]) -> Option<(usize, i64)> {
        let m = query.len();
        (0..=folded.len() - m)
            .filter(|&start| folded[start..start + m] == query[..])
            .map(|start| (start, self.contiguous_score(name, start, m)))
            .max_by_key(|&(start, score)| (score, Reverse(start)))
    }

    /// Best subsequence alignment, returning its score and matched positions
    ///
    /// `best[i][j]` is the best score with query char `i` matched at name
    /// char `j`. Gap penalties are affine, so the best gapped predecessor can
    /// be carried along each row instead of rescanning it.
    fn align(&self, name: &[char], folded: &[char], query: &[char]) -> Option<(i64, Vec<usize>)> {
        let n = folded.len();
        let m = query.len();
        let w = &self.weights;

        let mut best = vec![vec![UNREACHABLE; n]; m];
        let mut from = vec![vec![0usize; n]; m];

        for i in 0..m {
            let mut gapped = (UNREACHABLE, 0usize);
            for j in 0..n {
                if i > 0 && j >= 2 {
                    if gapped.0 > UNREACHABLE {
                        gapped.0 -= w.gap_extend;
                    }
                    let k = j - 2;
                    if best[i - 1][k] > UNREACHABLE && best[i - 1][k] - w.gap_open > gapped.0 {
                        gapped = (best[i - 1][k] - w.gap_open, k);
                    }
                }

                if folded[j] != query[i] {
                    continue;
                }

                let bonus = self.char_bonus(name, j);
                if i == 0 {
                    best[i][j] = bonus;
                    continue;
                }

                let mut pred = gapped;
                if j >= 1 && best[i - 1][j - 1] > UNREACHABLE {
                    let adjacent = best[i - 1][j - 1] + w.consecutive_bonus;
                    if adjacent > pred.0 {
                        pred = (adjacent, j - 1);
                    }
                }
                if pred.0 > UNREACHABLE {
                    best[i][j] = pred.0 + bonus;
                    from[i][j] = pred.1;
                }
            }
        }

        let (end, score) = (0..n)
            .filter(|&j| best[m - 1][j] > UNREACHABLE)
            .map(|j| (j, best[m - 1][j]))
            .max_by_key(|&(j, score)| (score, Reverse(j)))?;

        let mut positions = vec![0; m];
        let mut j = end;
        positions[m - 1] = j;
        for i in (1..m).rev() {
            j = from[i][j];
            positions[i - 1] = j;
        }
        Some((score, positions))
    }
}

fn fold(c: char) -> char {
    c.to_lowercase().next().unwrap_or(c)
}

/// Merge sorted character positions into half-open runs
fn spans(positions: &[usize]) -> Vec<(usize, usize)> {
    let mut spans: Vec<(usize, usize)> = Vec::new();
    for &p in positions {
        match spans.last_mut() {
            Some((_, end)) if *end == p => *end = p + 1,
            _ => spans.push((p, p + 1)),
        }
    }
    spans
}
