//! Error taxonomy shared by every qpass component
//!
//! Variants carry owned text only, never I/O handles and never decrypted
//! content, so a scan can collect several of them and hand them back.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::entry::StoreId;

/// qpass errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QpassError {
    /// A store (or one subtree of it) could not be enumerated
    #[error("Password store {store} unavailable at {}: {reason}", .path.display())]
    StoreUnavailable {
        store: String,
        path: PathBuf,
        reason: String,
    },

    /// A display name exists in more than one store
    #[error("{name} exists in {} stores: {}", .candidates.len(), candidate_list(.candidates))]
    AmbiguousName {
        name: String,
        candidates: Vec<(StoreId, String)>,
    },

    #[error("No matching password entries for {query:?}")]
    NoMatch { query: String },

    /// A search matched more than one entry and nothing can pick between them
    #[error("{} entries match {query:?}, refine the query", .candidates.len())]
    MultipleMatches { query: String, candidates: Vec<String> },

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Decryption did not finish within {timeout:?}")]
    DecryptionTimeout { timeout: Duration },

    #[error("{entry} has no {field:?} line")]
    MissingField { entry: String, field: String },

    #[error("Clipboard error: {0}")]
    Clipboard(String),

    /// No usable store exists
    #[error("Configuration error: {0}")]
    Configuration(String),
}

fn candidate_list(candidates: &[(StoreId, String)]) -> String {
    candidates
        .iter()
        .map(|(id, label)| format!("{} ({})", label, id))
        .collect::<Vec<_>>()
        .join(", ")
}

impl QpassError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NoMatch { .. }
            | Self::MultipleMatches { .. }
            | Self::AmbiguousName { .. }
            | Self::MissingField { .. } => 1,
            Self::DecryptionFailed(_) | Self::DecryptionTimeout { .. } => 2,
            Self::Configuration(_) | Self::StoreUnavailable { .. } => 3,
            Self::Clipboard(_) => 4,
        }
    }
}

pub type Result<T> = std::result::Result<T, QpassError>;
