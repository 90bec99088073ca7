use super::{IndexError, IndexKind};
use arrow::array::{Array, StringArray};
use arrow::datatypes::{Field, Schema};
use arrow::record_batch::RecordBatch;
use datafusion::common::ScalarValue;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Column of the transposed stats batch holding the file name
pub const FILE_NAME_COLUMN: &str = "fileName";

const MIN_VALUE_SUFFIX: &str = "_minValue";
const MAX_VALUE_SUFFIX: &str = "_maxValue";
const NULL_COUNT_SUFFIX: &str = "_nullCount";
const VALUE_COUNT_SUFFIX: &str = "_valueCount";

/// Statistics of one column in one file
///
/// Every field is optional: a missing bound or count only makes pruning
/// less effective, never incorrect.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnStatistics {
    /// Smallest non-null value; None if unknown or all values are null
    pub min: Option<ScalarValue>,

    /// Largest non-null value; None if unknown or all values are null
    pub max: Option<ScalarValue>,

    pub null_count: Option<u64>,

    /// Total number of values (nulls included)
    pub value_count: Option<u64>,
}

impl ColumnStatistics {
    pub fn new(
        min: Option<ScalarValue>,
        max: Option<ScalarValue>,
        null_count: Option<u64>,
    ) -> Self {
        Self {
            min,
            max,
            null_count,
            value_count: None,
        }
    }

    /// Builder pattern: set value count
    pub fn with_value_count(mut self, value_count: u64) -> Self {
        self.value_count = Some(value_count);
        self
    }

    /// Exact statistics of a single value (used for partition values)
    pub fn point(value: &ScalarValue) -> Self {
        if value.is_null() {
            Self::new(None, None, Some(1)).with_value_count(1)
        } else {
            Self::new(Some(value.clone()), Some(value.clone()), Some(0)).with_value_count(1)
        }
    }

    /// False only when stats prove there are no nulls
    pub fn may_contain_null(&self) -> bool {
        self.null_count.map_or(true, |n| n > 0)
    }

    /// False only when stats prove every value is null
    pub fn may_contain_non_null(&self) -> bool {
        if self.min.is_some() || self.max.is_some() {
            return true;
        }
        match (self.null_count, self.value_count) {
            (Some(nulls), Some(values)) => values > nulls,
            _ => true,
        }
    }
}

/// Per-file statistics keyed by column name
pub type FileStats = HashMap<String, ColumnStatistics>;

/// One row of the column stats index
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnStatsEntry {
    pub file_name: String,
    pub column_name: String,
    pub min: Option<ScalarValue>,
    pub max: Option<ScalarValue>,
    pub null_count: u64,
    pub value_count: Option<u64>,
}

impl ColumnStatsEntry {
    pub fn new(
        file_name: impl Into<String>,
        column_name: impl Into<String>,
        min: Option<ScalarValue>,
        max: Option<ScalarValue>,
        null_count: u64,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            column_name: column_name.into(),
            min,
            max,
            null_count,
            value_count: None,
        }
    }

    /// Builder pattern: set value count
    pub fn with_value_count(mut self, value_count: u64) -> Self {
        self.value_count = Some(value_count);
        self
    }

    fn statistics(&self) -> ColumnStatistics {
        ColumnStatistics {
            min: self.min.clone(),
            max: self.max.clone(),
            null_count: Some(self.null_count),
            value_count: self.value_count,
        }
    }
}

/// Stats table pivoted to one row per file, restricted to the queried columns
///
/// ```text
/// fileName | amount_minValue | amount_maxValue | amount_nullCount | ...
/// f1.parq  | 50              | 150             | 0                |
/// f2.parq  | 10              | 80              | 2                |
/// ```
///
/// A file appears here only if the index holds stats for at least one of
/// the requested columns; everything else counts as not indexed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransposedColumnStats {
    columns: Vec<String>,
    files: BTreeMap<String, FileStats>,
}

impl TransposedColumnStats {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            files: BTreeMap::new(),
        }
    }

    /// Pivot index rows, dropping columns that weren't requested
    pub fn from_entries<'a, I>(columns: &[String], entries: I) -> Self
    where
        I: IntoIterator<Item = &'a ColumnStatsEntry>,
    {
        let wanted: BTreeSet<&str> = columns.iter().map(String::as_str).collect();
        let mut table = Self::new(columns.to_vec());
        for entry in entries {
            if wanted.contains(entry.column_name.as_str()) {
                table.insert(&entry.file_name, &entry.column_name, entry.statistics());
            }
        }
        table
    }

    /// Read the transposed Arrow layout the distributed stats loader returns
    ///
    /// Expects a Utf8 `fileName` column and, per requested column `c`,
    /// `c_minValue`, `c_maxValue`, `c_nullCount` and optionally
    /// `c_valueCount`. A requested column with no `_minValue` or
    /// `_maxValue` column is left without stats.
    pub fn from_record_batch(batch: &RecordBatch, columns: &[String]) -> Result<Self, IndexError> {
        let file_names = batch
            .column_by_name(FILE_NAME_COLUMN)
            .and_then(|array| array.as_any().downcast_ref::<StringArray>())
            .ok_or_else(|| {
                IndexError::evaluation(
                    IndexKind::ColumnStats,
                    format!("transposed stats batch has no Utf8 '{}' column", FILE_NAME_COLUMN),
                )
            })?;

        let mut table = Self::new(columns.to_vec());

        for column in columns {
            let min_array = batch.column_by_name(&format!("{}{}", column, MIN_VALUE_SUFFIX));
            let max_array = batch.column_by_name(&format!("{}{}", column, MAX_VALUE_SUFFIX));
            let (Some(min_array), Some(max_array)) = (min_array, max_array) else {
                continue;
            };
            let null_counts = batch.column_by_name(&format!("{}{}", column, NULL_COUNT_SUFFIX));
            let value_counts = batch.column_by_name(&format!("{}{}", column, VALUE_COUNT_SUFFIX));

            for row in 0..batch.num_rows() {
                if file_names.is_null(row) {
                    return Err(IndexError::evaluation(
                        IndexKind::ColumnStats,
                        format!("null file name at row {}", row),
                    ));
                }

                let stats = ColumnStatistics {
                    min: non_null_scalar(min_array.as_ref(), row)?,
                    max: non_null_scalar(max_array.as_ref(), row)?,
                    null_count: count_at(null_counts, row)?,
                    value_count: count_at(value_counts, row)?,
                };
                table.insert(file_names.value(row), column, stats);
            }
        }

        Ok(table)
    }

    pub fn insert(&mut self, file_name: &str, column: &str, stats: ColumnStatistics) {
        self.files
            .entry(file_name.to_string())
            .or_default()
            .insert(column.to_string(), stats);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn get(&self, file_name: &str) -> Option<&FileStats> {
        self.files.get(file_name)
    }

    pub fn contains_file(&self, file_name: &str) -> bool {
        self.files.contains_key(file_name)
    }

    /// Files the index has an entry for
    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn files(&self) -> impl Iterator<Item = (&str, &FileStats)> {
        self.files.iter().map(|(name, stats)| (name.as_str(), stats))
    }

    pub fn num_files(&self) -> usize {
        self.files.len()
    }

    /// Rows of the un-pivoted index this table was built from
    pub fn projected_rows(&self) -> usize {
        self.files.len() * self.columns.len()
    }

    /// Arrow schema of the requested columns, typed by the first known bound
    ///
    /// Columns without a single non-null min or max in any file are left out.
    pub fn arrow_schema(&self) -> Schema {
        let fields: Vec<Field> = self
            .columns
            .iter()
            .filter_map(|column| {
                self.files
                    .values()
                    .filter_map(|stats| stats.get(column))
                    .find_map(|stats| stats.min.as_ref().or(stats.max.as_ref()))
                    .map(|value| Field::new(column.as_str(), value.data_type(), true))
            })
            .collect();
        Schema::new(fields)
    }
}

fn non_null_scalar(array: &dyn Array, row: usize) -> Result<Option<ScalarValue>, IndexError> {
    if array.is_null(row) {
        return Ok(None);
    }
    Ok(Some(ScalarValue::try_from_array(array, row)?))
}

fn count_at(array: Option<&arrow::array::ArrayRef>, row: usize) -> Result<Option<u64>, IndexError> {
    let Some(array) = array else {
        return Ok(None);
    };
    let Some(value) = non_null_scalar(array.as_ref(), row)? else {
        return Ok(None);
    };
    match value {
        ScalarValue::UInt64(Some(v)) => Ok(Some(v)),
        ScalarValue::UInt32(Some(v)) => Ok(Some(u64::from(v))),
        ScalarValue::Int64(Some(v)) if v >= 0 => Ok(Some(v as u64)),
        ScalarValue::Int32(Some(v)) if v >= 0 => Ok(Some(v as u64)),
        other => Err(IndexError::evaluation(
            IndexKind::ColumnStats,
            format!("count column holds non-count value {:?} at row {}", other, row),
        )),
    }
}

/// Source of per-file column statistics
///
/// Implementations are owned by one coordinator and consulted from its
/// planning thread only.
pub trait ColumnStatsProvider {
    fn is_index_available(&self) -> bool;

    /// Columns the index tracks; None means "any column may have stats"
    fn indexed_columns(&self) -> Option<BTreeSet<String>> {
        None
    }

    /// Whether the projected stats for these columns stay under `threshold` rows
    /// and can be evaluated serially
    fn should_read_in_memory(&self, columns: &[String], threshold: usize) -> bool;

    /// Load stats for the given columns, pivoted per file
    fn load_transposed(
        &self,
        columns: &[String],
        in_memory: bool,
    ) -> Result<TransposedColumnStats, IndexError>;

    /// Drop anything cached from previous loads
    fn invalidate_caches(&mut self) {}
}

/// Column stats index held in memory
///
/// Useful as the provider for small tables and for tests; a missing file
/// entry models asynchronous index maintenance that hasn't caught up yet.
#[derive(Debug, Clone)]
pub struct InMemoryColumnStatsIndex {
    entries: Vec<ColumnStatsEntry>,
    indexed_columns: BTreeSet<String>,
    indexed_files: BTreeSet<String>,
    available: bool,
}

impl Default for InMemoryColumnStatsIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryColumnStatsIndex {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            indexed_columns: BTreeSet::new(),
            indexed_files: BTreeSet::new(),
            available: true,
        }
    }

    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = ColumnStatsEntry>,
    {
        let mut index = Self::new();
        for entry in entries {
            index.insert(entry);
        }
        index
    }

    pub fn insert(&mut self, entry: ColumnStatsEntry) {
        self.indexed_columns.insert(entry.column_name.clone());
        self.indexed_files.insert(entry.file_name.clone());
        self.entries.push(entry);
    }

    /// Mark the index as present or absent (e.g. still being bootstrapped)
    pub fn set_available(&mut self, available: bool) {
        self.available = available;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ColumnStatsProvider for InMemoryColumnStatsIndex {
    fn is_index_available(&self) -> bool {
        self.available
    }

    fn indexed_columns(&self) -> Option<BTreeSet<String>> {
        Some(self.indexed_columns.clone())
    }

    fn should_read_in_memory(&self, columns: &[String], threshold: usize) -> bool {
        let projected = self.indexed_files.len().saturating_mul(columns.len());
        projected < threshold
    }

    fn load_transposed(
        &self,
        columns: &[String],
        _in_memory: bool,
    ) -> Result<TransposedColumnStats, IndexError> {
        if !self.available {
            return Err(IndexError::Unavailable(IndexKind::ColumnStats));
        }
        Ok(TransposedColumnStats::from_entries(columns, &self.entries))
    }
}
