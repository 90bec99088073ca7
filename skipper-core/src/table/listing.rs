use super::{FileSlice, Partition};
use crate::indexes::column_stats::{ColumnStatistics, FileStats};
use crate::query::predicates::{FilePredicate, FileVerdict, Predicate};
use std::collections::BTreeMap;

/// Listing errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ListingError {
    #[error("Partition not found: {0}")]
    PartitionNotFound(String),

    #[error("I/O error listing '{path}': {message}")]
    Io { path: String, message: String },
}

/// Source of partitions and their latest file slices
///
/// Implemented by whatever owns the timeline and directory listing; this
/// crate only consumes its output.
pub trait PartitionLister {
    /// Root of the table; file paths are `{base_path}/{partition}/{file}`
    fn base_path(&self) -> &str;

    /// Partition columns in path order; empty for an unpartitioned table
    fn partition_columns(&self) -> &[String];

    /// Partitions that may satisfy the given filters
    ///
    /// Filters on non-partition columns must not drop anything. An
    /// unpartitioned table returns its single implicit partition.
    fn list_partitions(&self, filters: &[Predicate]) -> Result<Vec<Partition>, ListingError>;

    /// Latest slice of every file group in the partition
    fn latest_file_slices(&self, partition_path: &str) -> Result<Vec<FileSlice>, ListingError>;
}

/// Table listing held in memory
///
/// Keeps every slice version per file group and answers with the latest
/// one visible at `as_of_instant` (or the latest overall).
#[derive(Debug, Clone)]
pub struct InMemoryTableListing {
    base_path: String,
    partition_columns: Vec<String>,

    /// partition path → (partition, all slice versions)
    partitions: BTreeMap<String, (Partition, Vec<FileSlice>)>,

    /// Time-travel instant; slices created after it are invisible
    as_of_instant: Option<String>,
}

impl InMemoryTableListing {
    pub fn new(base_path: impl Into<String>, partition_columns: Vec<String>) -> Self {
        Self {
            base_path: base_path.into(),
            partition_columns,
            partitions: BTreeMap::new(),
            as_of_instant: None,
        }
    }

    /// Table without partition columns: one implicit partition holds everything
    pub fn unpartitioned(base_path: impl Into<String>, slices: Vec<FileSlice>) -> Self {
        let mut listing = Self::new(base_path, vec![]);
        listing.add_partition(Partition::unpartitioned(), slices);
        listing
    }

    /// Builder pattern: read as of an instant
    pub fn with_as_of_instant(mut self, instant: impl Into<String>) -> Self {
        self.as_of_instant = Some(instant.into());
        self
    }

    /// Register a partition, replacing any previous listing of the same path
    pub fn add_partition(&mut self, partition: Partition, slices: Vec<FileSlice>) {
        self.partitions
            .insert(partition.path.clone(), (partition, slices));
    }

    /// Append a slice version to an existing partition
    pub fn add_slice(
        &mut self,
        partition_path: &str,
        slice: FileSlice,
    ) -> Result<(), ListingError> {
        let (_, slices) = self
            .partitions
            .get_mut(partition_path)
            .ok_or_else(|| ListingError::PartitionNotFound(partition_path.to_string()))?;
        slices.push(slice);
        Ok(())
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Partition values as exact single-value statistics
    fn partition_stats(&self, partition: &Partition) -> FileStats {
        self.partition_columns
            .iter()
            .zip(partition.values.iter())
            .map(|(column, value)| (column.clone(), ColumnStatistics::point(value)))
            .collect()
    }

    fn is_visible(&self, slice: &FileSlice) -> bool {
        self.as_of_instant
            .as_deref()
            .map_or(true, |as_of| slice.base_instant_time.as_str() <= as_of)
    }
}

impl PartitionLister for InMemoryTableListing {
    fn base_path(&self) -> &str {
        &self.base_path
    }

    fn partition_columns(&self) -> &[String] {
        &self.partition_columns
    }

    fn list_partitions(&self, filters: &[Predicate]) -> Result<Vec<Partition>, ListingError> {
        Ok(self
            .partitions
            .values()
            .filter(|(partition, _)| {
                filters.evaluate(&self.partition_stats(partition)) == FileVerdict::MayInclude
            })
            .map(|(partition, _)| partition.clone())
            .collect())
    }

    fn latest_file_slices(&self, partition_path: &str) -> Result<Vec<FileSlice>, ListingError> {
        let (_, slices) = self
            .partitions
            .get(partition_path)
            .ok_or_else(|| ListingError::PartitionNotFound(partition_path.to_string()))?;

        // Latest visible version per file group, in file id order
        let mut latest: BTreeMap<&str, &FileSlice> = BTreeMap::new();
        for slice in slices.iter().filter(|s| self.is_visible(s)) {
            let newer = latest
                .get(slice.file_id.as_str())
                .map_or(true, |current| slice.base_instant_time > current.base_instant_time);
            if newer {
                latest.insert(slice.file_id.as_str(), slice);
            }
        }

        Ok(latest.into_values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::BaseFile;
    use datafusion::common::ScalarValue;

    fn slice(file_id: &str, instant: &str) -> FileSlice {
        FileSlice::new(file_id, instant).with_base_file(BaseFile::new(
            format!("{}_0-1-1_{}.parquet", file_id, instant),
            100,
        ))
    }

    fn day_listing() -> InMemoryTableListing {
        let mut listing = InMemoryTableListing::new("/t", vec!["day".to_string()]);
        for day in ["2024-01-01", "2024-01-02", "2024-01-03"] {
            listing.add_partition(
                Partition::new(day, vec![ScalarValue::from(day)]),
                vec![slice("f1", "001"), slice("f2", "001")],
            );
        }
        listing
    }

    #[test]
    fn test_partition_filters_prune_paths() {
        let listing = day_listing();

        let all = listing.list_partitions(&[]).unwrap();
        assert_eq!(all.len(), 3);

        let one = listing
            .list_partitions(&[Predicate::eq("day", "2024-01-02")])
            .unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].path, "2024-01-02");

        let later = listing
            .list_partitions(&[Predicate::gt("day", "2024-01-01")])
            .unwrap();
        assert_eq!(later.len(), 2);
    }

    #[test]
    fn test_filters_on_data_columns_keep_partitions() {
        let listing = day_listing();
        let kept = listing
            .list_partitions(&[Predicate::eq("amount", 5i64)])
            .unwrap();
        assert_eq!(kept.len(), 3);
    }

    #[test]
    fn test_unpartitioned_ignores_filters() {
        let listing = InMemoryTableListing::unpartitioned("/t", vec![slice("f1", "001")]);
        let partitions = listing
            .list_partitions(&[Predicate::eq("day", "2024-01-02")])
            .unwrap();
        assert_eq!(partitions, vec![Partition::unpartitioned()]);
        assert_eq!(listing.latest_file_slices("").unwrap().len(), 1);
    }

    #[test]
    fn test_latest_slice_per_file_group() {
        let mut listing = day_listing();
        listing.add_slice("2024-01-01", slice("f1", "003")).unwrap();

        let slices = listing.latest_file_slices("2024-01-01").unwrap();
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].file_id, "f1");
        assert_eq!(slices[0].base_instant_time, "003");

        let travelled = listing.with_as_of_instant("002");
        let slices = travelled.latest_file_slices("2024-01-01").unwrap();
        assert_eq!(slices[0].base_instant_time, "001");
    }

    #[test]
    fn test_unknown_partition() {
        let listing = day_listing();
        assert_eq!(
            listing.latest_file_slices("1999-01-01").unwrap_err(),
            ListingError::PartitionNotFound("1999-01-01".to_string())
        );
        assert!(listing.clone().add_slice("nope", slice("f9", "001")).is_err());
    }
}
