//! Bucket-index routing and data-skipping file pruning
//!
//! Two read/write path accelerators over a table of versioned file slices:
//!
//! - `indexes::bucket_index`: record key → owning file group in O(1), from
//!   the bucket id encoded in file ids
//! - `query`: narrows the files a query scans using column stats and the
//!   record key index, never dropping a file that could hold a match

pub mod config;
pub mod indexes;
pub mod query;
pub mod table;

pub use config::{BucketIndexConfig, ConfigError, DataSkippingConfig, FailureMode};
pub use indexes::bucket_index::{BucketIndexError, BucketLocationIndex};
pub use indexes::column_stats::{ColumnStatsEntry, ColumnStatsProvider, InMemoryColumnStatsIndex};
pub use indexes::record_index::{InMemoryRecordIndex, RecordKeyIndexProvider};
pub use indexes::{IndexError, IndexKind};
pub use query::{
    DataSkippingEngine, ExprPruningPredicate, Predicate, PruneError, PruneMetrics, PrunedListing,
    PruningCoordinator,
};
pub use table::{
    BaseFile, FileSlice, InMemoryTableListing, ListingError, LogFile, Partition, PartitionLister,
    RecordKey, RecordLocation,
};
