//! Column stats pruning for DataFusion filters
//!
//! Filters are compiled into DataFusion's `PruningPredicate`, which
//! rewrites them to work with statistics (`amount > 100` becomes
//! `max(amount) > 100`) and is evaluated over `FilePruningStatistics`.

use super::file_statistics::FilePruningStatistics;
use super::predicates::{FilePredicate, FileVerdict};
use crate::indexes::column_stats::{FileStats, TransposedColumnStats};
use arrow::datatypes::SchemaRef;
use datafusion::common::DFSchema;
use datafusion::error::Result;
use datafusion::logical_expr::utils::{conjunction, split_conjunction};
use datafusion::logical_expr::Expr;
use datafusion::physical_optimizer::pruning::PruningPredicate;
use datafusion::prelude::SessionContext;
use std::sync::Arc;

/// DataFusion filters compiled against the column types found in the stats
///
/// # Example
/// ```text
/// Filters: [amount > 100, region = 'eu', a = b]
/// Stats schema: {amount: Int64, region: Utf8}
///
/// a = b has no typed columns and is dropped (dropping a conjunct only widens)
/// Compiled: max(amount) > 100 AND min(region) <= 'eu' AND 'eu' <= max(region)
/// ```
#[derive(Debug)]
pub struct ExprPruningPredicate {
    predicate: PruningPredicate,
    schema: SchemaRef,
}

impl ExprPruningPredicate {
    /// Compile the top-level conjuncts whose columns all appear in `schema`
    ///
    /// Returns `Ok(None)` when no conjunct compiles, or when what compiles
    /// can never rule a file out.
    pub fn try_new(filters: &[Expr], schema: SchemaRef) -> Result<Option<Self>> {
        let usable = filters
            .iter()
            .flat_map(split_conjunction)
            .filter(|expr| {
                expr.column_refs()
                    .iter()
                    .all(|column| schema.field_with_name(&column.name).is_ok())
            })
            .cloned();
        let Some(combined) = conjunction(usable) else {
            return Ok(None);
        };

        // Type coercion happens here, so Int32 literals compare against Int64 stats
        let df_schema = DFSchema::try_from(schema.as_ref().clone())?;
        let physical_expr = SessionContext::new().create_physical_expr(combined, &df_schema)?;

        let predicate = PruningPredicate::try_new(physical_expr, Arc::clone(&schema))?;
        if predicate.always_true() {
            return Ok(None);
        }
        Ok(Some(Self { predicate, schema }))
    }

    /// Keep flag per file, in order; a file missing from `stats` is kept
    pub fn prune_files(&self, stats: &TransposedColumnStats, files: &[&str]) -> Result<Vec<bool>> {
        let statistics = FilePruningStatistics::new(
            files.iter().map(|name| stats.get(name)).collect(),
            &self.schema,
        );
        self.predicate.prune(&statistics)
    }
}

impl FilePredicate for ExprPruningPredicate {
    fn evaluate(&self, stats: &FileStats) -> FileVerdict {
        let statistics = FilePruningStatistics::new(vec![Some(stats)], &self.schema);
        match self.predicate.prune(&statistics) {
            Ok(keep) if keep.first() == Some(&false) => FileVerdict::DefinitelyExcluded,
            _ => FileVerdict::MayInclude,
        }
    }
}
