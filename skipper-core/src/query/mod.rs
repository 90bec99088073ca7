//! Query-side file pruning
//!
//! - `predicates`: engine-neutral filters and their evaluation against file statistics
//! - `filters`: DataFusion `Expr` → `Predicate` translation
//! - `pruning` / `file_statistics`: DataFusion `PruningPredicate` over per-file stats
//! - `data_skipping`: candidate file selection from secondary indexes
//! - `coordinator`: partition pruning plus data skipping, with metrics

pub mod coordinator;
pub mod data_skipping;
pub mod file_statistics;
pub mod filters;
pub mod predicates;
pub mod pruning;

pub use coordinator::{PruneMetrics, PrunedListing, PruningCoordinator};
pub use data_skipping::DataSkippingEngine;
pub use predicates::{CompareOp, FilePredicate, FileVerdict, Predicate};
pub use pruning::ExprPruningPredicate;

use crate::indexes::{IndexError, IndexKind};
use crate::table::ListingError;

/// Errors surfaced by a prune call
#[derive(Debug, thiserror::Error)]
pub enum PruneError {
    /// An index failed under `FailureMode::Strict`
    #[error("Failed to prune with {index} index for predicate [{predicate}]: {source}")]
    IndexLookup {
        index: IndexKind,
        predicate: String,
        source: IndexError,
    },

    #[error("Listing error: {0}")]
    Listing(#[from] ListingError),
}

impl PruneError {
    pub(crate) fn index_lookup(index: IndexKind, predicate: String, source: IndexError) -> Self {
        PruneError::IndexLookup {
            index,
            predicate,
            source,
        }
    }

    /// Index the error came from, if any
    pub fn index(&self) -> Option<IndexKind> {
        match self {
            PruneError::IndexLookup { index, .. } => Some(*index),
            PruneError::Listing(_) => None,
        }
    }
}
