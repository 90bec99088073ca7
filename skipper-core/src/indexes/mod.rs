pub mod bucket_identifier;
pub mod bucket_index;
pub mod column_stats;
pub mod record_index;

use datafusion::error::DataFusionError;
use std::fmt;

/// Which secondary index an error or decision refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    ColumnStats,
    RecordKey,
}

impl IndexKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexKind::ColumnStats => "column_stats",
            IndexKind::RecordKey => "record_index",
        }
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by secondary index providers
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("{0} index is not available")]
    Unavailable(IndexKind),

    #[error("{index} index lookup failed: {message}")]
    Lookup { index: IndexKind, message: String },

    #[error("{index} index returned malformed data: {message}")]
    Evaluation { index: IndexKind, message: String },

    #[error("DataFusion error: {0}")]
    DataFusion(#[from] DataFusionError),
}

impl IndexError {
    pub fn lookup(index: IndexKind, message: impl Into<String>) -> Self {
        IndexError::Lookup {
            index,
            message: message.into(),
        }
    }

    pub fn evaluation(index: IndexKind, message: impl Into<String>) -> Self {
        IndexError::Evaluation {
            index,
            message: message.into(),
        }
    }
}
