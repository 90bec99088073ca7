use crate::indexes::column_stats::{ColumnStatistics, FileStats};
use arrow::array::{ArrayRef, BooleanArray, UInt64Array};
use arrow::datatypes::Schema;
use datafusion::common::{Column, ScalarValue};
use datafusion::physical_optimizer::pruning::PruningStatistics;
use std::collections::HashSet;
use std::sync::Arc;

/// Adapter that exposes per-file column stats to DataFusion's PruningPredicate
///
/// DataFusion's pruning model:
/// - Each "container" = one file, in the order given
/// - For each column, provide arrays of [min, max, null_count, row_count] across all containers
///
/// A file without an entry, or without stats for a column, contributes
/// nulls. DataFusion reads a null statistic as unknown and keeps the file.
pub struct FilePruningStatistics<'a> {
    files: Vec<Option<&'a FileStats>>,

    /// Types the min/max arrays are built with
    schema: &'a Schema,
}

impl<'a> FilePruningStatistics<'a> {
    pub fn new(files: Vec<Option<&'a FileStats>>, schema: &'a Schema) -> Self {
        Self { files, schema }
    }

    fn column_stats<'s>(
        &'s self,
        column: &'s str,
    ) -> impl Iterator<Item = Option<&'a ColumnStatistics>> + 's {
        self.files
            .iter()
            .map(move |file| file.and_then(|stats| stats.get(column)))
    }

    /// One bound of `column` across all files, cast to the schema type
    ///
    /// A bound that doesn't cast becomes null rather than failing the prune.
    fn bound_values<F>(&self, column: &Column, bound: F) -> Option<ArrayRef>
    where
        F: Fn(&ColumnStatistics) -> Option<&ScalarValue>,
    {
        let data_type = self.schema.field_with_name(&column.name).ok()?.data_type();
        let unknown = ScalarValue::try_from(data_type).ok()?;

        let values = self.column_stats(&column.name).map(|stats| {
            stats
                .and_then(|stats| bound(stats))
                .and_then(|value| value.cast_to(data_type).ok())
                .unwrap_or_else(|| unknown.clone())
        });
        ScalarValue::iter_to_array(values).ok()
    }

    fn counts<F>(&self, column: &Column, count: F) -> Option<ArrayRef>
    where
        F: Fn(&ColumnStatistics) -> Option<u64>,
    {
        let counts: UInt64Array = self
            .column_stats(&column.name)
            .map(|stats| stats.and_then(|stats| count(stats)))
            .collect();
        Some(Arc::new(counts))
    }
}

impl PruningStatistics for FilePruningStatistics<'_> {
    fn min_values(&self, column: &Column) -> Option<ArrayRef> {
        self.bound_values(column, |stats| stats.min.as_ref())
    }

    fn max_values(&self, column: &Column) -> Option<ArrayRef> {
        self.bound_values(column, |stats| stats.max.as_ref())
    }

    fn num_containers(&self) -> usize {
        self.files.len()
    }

    fn null_counts(&self, column: &Column) -> Option<ArrayRef> {
        self.counts(column, |stats| stats.null_count)
    }

    /// Value counts include nulls, so they double as row counts
    fn row_counts(&self, column: &Column) -> Option<ArrayRef> {
        self.counts(column, |stats| stats.value_count)
    }

    /// No bloom filters or value sets in the index
    fn contained(&self, _column: &Column, _values: &HashSet<ScalarValue>) -> Option<BooleanArray> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, Int64Array};
    use arrow::datatypes::{DataType, Field};
    use std::collections::HashMap;

    fn amount(min: Option<i64>, max: Option<i64>, nulls: u64) -> FileStats {
        HashMap::from([(
            "amount".to_string(),
            ColumnStatistics::new(min.map(Into::into), max.map(Into::into), Some(nulls))
                .with_value_count(10),
        )])
    }

    #[test]
    fn test_arrays_follow_file_order_with_nulls_for_gaps() {
        let schema = Schema::new(vec![Field::new("amount", DataType::Int64, true)]);
        let f1 = amount(Some(5), Some(50), 0);
        let f3 = amount(None, None, 10);
        let statistics = FilePruningStatistics::new(vec![Some(&f1), None, Some(&f3)], &schema);
        let column = Column::from_name("amount");

        assert_eq!(statistics.num_containers(), 3);

        let mins = statistics.min_values(&column).unwrap();
        let mins = mins.as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(mins.value(0), 5);
        assert!(mins.is_null(1));
        assert!(mins.is_null(2));

        let nulls = statistics.null_counts(&column).unwrap();
        let nulls = nulls.as_any().downcast_ref::<UInt64Array>().unwrap();
        assert_eq!(nulls.value(0), 0);
        assert!(nulls.is_null(1));
        assert_eq!(nulls.value(2), 10);
    }

    #[test]
    fn test_bounds_cast_to_schema_type() {
        let schema = Schema::new(vec![Field::new("amount", DataType::Int64, true)]);
        let narrow = HashMap::from([(
            "amount".to_string(),
            ColumnStatistics::new(Some(7i32.into()), Some("oops".into()), Some(0)),
        )]);
        let statistics = FilePruningStatistics::new(vec![Some(&narrow)], &schema);
        let column = Column::from_name("amount");

        let mins = statistics.min_values(&column).unwrap();
        assert_eq!(mins.as_any().downcast_ref::<Int64Array>().unwrap().value(0), 7);

        // A string max can't be an Int64, so it becomes unknown
        let maxs = statistics.max_values(&column).unwrap();
        assert!(maxs.is_null(0));
    }

    #[test]
    fn test_untyped_column_has_no_bounds() {
        let schema = Schema::new(vec![Field::new("amount", DataType::Int64, true)]);
        let f1 = amount(Some(1), Some(2), 0);
        let statistics = FilePruningStatistics::new(vec![Some(&f1)], &schema);
        assert!(statistics.min_values(&Column::from_name("region")).is_none());
    }
}
