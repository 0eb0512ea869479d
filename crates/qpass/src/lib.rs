//! qpass - Quick search frontend for `pass` password stores
//!
//! Several stores are merged into one namespace. Entries are found by
//! fuzzy search, decrypted through an external program, and the password
//! is held on the clipboard for a limited time.
//!
//! Decrypted text lives only in [`RevealedSecret`], which wipes itself on
//! drop. Errors and log lines never carry it.

mod aggregator;
mod clipboard;
mod entry;
mod error;
mod matcher;
mod revealer;
mod store;

pub use aggregator::{Aggregator, Listing};
pub use clipboard::{
    ClipboardBackend, ClipboardGuard, ClipboardSession, CommandClipboard, MemoryClipboard,
    SessionHandle,
};
pub use entry::{Entry, StoreId, ENTRY_EXTENSION};
pub use error::{QpassError, Result};
pub use matcher::{MatchKind, MatchWeights, Matcher, RankedEntry, TermMatch};
pub use revealer::{compile_filters, FieldSelector, RevealedSecret, Revealer, MAX_REASON_CHARS};
pub use store::{Ciphertext, Store, StoreListing};

use std::io::{self, BufRead, Write};
use tracing::debug;

/// Outcome of matching keywords against the stores
enum Selection {
    One(Entry),
    Many { query: String, entries: Vec<Entry> },
}

fn find_matches<S: AsRef<str>>(aggregator: &Aggregator, keywords: &[S]) -> Result<Selection> {
    let query = keywords
        .iter()
        .map(|k| k.as_ref())
        .collect::<Vec<_>>()
        .join(" ");

    match aggregator.resolve(&query) {
        Err(QpassError::NoMatch { .. }) => {}
        resolved => return resolved.map(Selection::One),
    }

    let mut matches = aggregator.smart_search(keywords);
    match matches.len() {
        0 => Err(QpassError::NoMatch { query }),
        1 => Ok(Selection::One(matches.remove(0).entry)),
        _ if matches.iter().all(|m| m.entry.name() == matches[0].entry.name()) => {
            // Only copies of one name matched
            aggregator.resolve(matches[0].entry.name()).map(Selection::One)
        }
        _ => Ok(Selection::Many {
            query,
            entries: matches.into_iter().map(|m| m.entry).collect(),
        }),
    }
}

/// Pick the single entry the keywords refer to
///
/// Keywords that spell out a display name select that entry directly.
/// Otherwise the smart search must narrow the stores down to one entry.
pub fn select_entry<S: AsRef<str>>(aggregator: &Aggregator, keywords: &[S]) -> Result<Entry> {
    match find_matches(aggregator, keywords)? {
        Selection::One(entry) => Ok(entry),
        Selection::Many { query, entries } => Err(QpassError::MultipleMatches {
            query,
            candidates: entries.iter().map(|e| aggregator.label(e)).collect(),
        }),
    }
}

/// Like [`select_entry`], but asks the user when several entries match
///
/// The candidates are listed on `output`. Each answer read from `input` is
/// either a number from the list or text that narrows the list down to the
/// entries containing it. An empty answer or end of input gives up with
/// [`QpassError::MultipleMatches`].
pub fn select_entry_interactive<S, R, W>(
    aggregator: &Aggregator,
    keywords: &[S],
    input: &mut R,
    output: &mut W,
) -> Result<Entry>
where
    S: AsRef<str>,
    R: BufRead,
    W: Write,
{
    let (query, mut entries) = match find_matches(aggregator, keywords)? {
        Selection::One(entry) => return Ok(entry),
        Selection::Many { query, entries } => (query, entries),
    };

    let give_up = |query: String, entries: &[Entry]| QpassError::MultipleMatches {
        query,
        candidates: entries.iter().map(|e| aggregator.label(e)).collect(),
    };

    loop {
        let labels: Vec<String> = entries.iter().map(|e| aggregator.label(e)).collect();
        let answer = match prompt(output, input, &labels) {
            Ok(answer) => answer,
            Err(e) => {
                debug!("selection prompt failed: {}", e);
                return Err(give_up(query, &entries));
            }
        };
        if answer.is_empty() {
            return Err(give_up(query, &entries));
        }

        if let Ok(n) = answer.parse::<usize>() {
            if (1..=entries.len()).contains(&n) {
                return Ok(entries.swap_remove(n - 1));
            }
        }

        let needle = answer.to_lowercase();
        let mut narrowed: Vec<Entry> = entries
            .iter()
            .zip(&labels)
            .filter(|(_, label)| label.to_lowercase().contains(&needle))
            .map(|(entry, _)| entry.clone())
            .collect();

        match narrowed.len() {
            0 => {
                let _ = writeln!(output, "No entry matches {:?}", answer);
            }
            1 => return Ok(narrowed.swap_remove(0)),
            _ => entries = narrowed,
        }
    }
}

/// Show the numbered choices and read one trimmed answer (empty at end of input)
fn prompt<R: BufRead, W: Write>(output: &mut W, input: &mut R, labels: &[String]) -> io::Result<String> {
    writeln!(output)?;
    for (i, label) in labels.iter().enumerate() {
        writeln!(output, " {}. {}", i + 1, label)?;
    }
    write!(output, "\nSelect an entry (number or text): ")?;
    output.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(answer.trim().to_string())
}
