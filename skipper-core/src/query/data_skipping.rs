use super::filters;
use super::predicates::{self, FilePredicate, FileVerdict, Predicate};
use super::pruning::ExprPruningPredicate;
use super::PruneError;
use crate::config::{DataSkippingConfig, FailureMode};
use crate::indexes::column_stats::{ColumnStatsProvider, TransposedColumnStats};
use crate::indexes::record_index::RecordKeyIndexProvider;
use crate::indexes::{IndexError, IndexKind};
use crate::table::FileSlice;
use datafusion::logical_expr::Expr;
use rayon::prelude::*;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

/// Files per rayon task when DataFusion evaluates stats off the planning thread
const PARALLEL_PRUNE_CHUNK: usize = 1024;

/// Filters handed to the engine
#[derive(Clone, Copy)]
enum DataFilters<'a> {
    Predicates(&'a [Predicate]),
    /// DataFusion filters, with their translation for the record key path
    Exprs(&'a [Expr], &'a [Predicate]),
}

impl DataFilters<'_> {
    fn is_empty(&self) -> bool {
        match self {
            DataFilters::Predicates(predicates) => predicates.is_empty(),
            DataFilters::Exprs(exprs, _) => exprs.is_empty(),
        }
    }

    fn predicates(&self) -> &[Predicate] {
        match self {
            DataFilters::Predicates(predicates) | DataFilters::Exprs(_, predicates) => predicates,
        }
    }

    /// Columns whose stats evaluation reads
    fn columns(&self) -> BTreeSet<String> {
        match self {
            DataFilters::Predicates(predicates) => predicates::referenced_columns(predicates),
            DataFilters::Exprs(exprs, _) => exprs
                .iter()
                .flat_map(|expr| expr.column_refs())
                .map(|column| column.name.clone())
                .collect(),
        }
    }

    fn describe(&self) -> String {
        match self {
            DataFilters::Predicates(predicates) => predicates::describe(predicates),
            DataFilters::Exprs(exprs, _) => exprs
                .iter()
                .map(|expr| expr.to_string())
                .collect::<Vec<_>>()
                .join(" AND "),
        }
    }
}

/// Candidate file selection from secondary indexes
///
/// Lookup order (cheapest and most exact first):
/// 1. Record key index: equality/IN on the record key → exact file set
/// 2. Column stats: per-file min/max/null counts → files the filter can't rule out
///
/// Either way the result is repaired for index coverage: a file the index
/// knows nothing about is always a candidate.
///
/// `Ok(None)` means "no skipping": every file must be scanned.
pub struct DataSkippingEngine {
    config: DataSkippingConfig,
    column_stats: Option<Box<dyn ColumnStatsProvider>>,
    record_index: Option<Box<dyn RecordKeyIndexProvider>>,

    /// Loaded stats by (sorted) column set, kept until `invalidate_caches`
    stats_cache: HashMap<Vec<String>, Arc<TransposedColumnStats>>,
}

impl DataSkippingEngine {
    pub fn new(config: DataSkippingConfig) -> Self {
        Self {
            config,
            column_stats: None,
            record_index: None,
            stats_cache: HashMap::new(),
        }
    }

    /// Builder pattern: attach the column stats index
    pub fn with_column_stats<P>(mut self, provider: P) -> Self
    where
        P: ColumnStatsProvider + 'static,
    {
        self.column_stats = Some(Box::new(provider));
        self
    }

    /// Builder pattern: attach the record key index
    pub fn with_record_index<P>(mut self, provider: P) -> Self
    where
        P: RecordKeyIndexProvider + 'static,
    {
        self.record_index = Some(Box::new(provider));
        self
    }

    pub fn config(&self) -> &DataSkippingConfig {
        &self.config
    }

    /// Names among `all_files` that may hold rows matching every predicate
    pub fn candidate_files(
        &mut self,
        predicates: &[Predicate],
        all_files: &[String],
    ) -> Result<Option<BTreeSet<String>>, PruneError> {
        self.select_candidates(DataFilters::Predicates(predicates), all_files)
    }

    /// `candidate_files` for DataFusion filters
    ///
    /// The record key path reads the translated predicates; column stats
    /// are evaluated by DataFusion's `PruningPredicate` on the filters themselves.
    pub fn candidate_files_for_exprs(
        &mut self,
        filters: &[Expr],
        all_files: &[String],
    ) -> Result<Option<BTreeSet<String>>, PruneError> {
        let translated = filters::predicates_from_exprs(filters);
        self.select_candidates(DataFilters::Exprs(filters, &translated), all_files)
    }

    fn select_candidates(
        &mut self,
        filters: DataFilters<'_>,
        all_files: &[String],
    ) -> Result<Option<BTreeSet<String>>, PruneError> {
        if filters.is_empty() {
            return Ok(None);
        }

        if !self.config.skipping_possible() {
            if self.config.data_skipping_enabled {
                warn!("data skipping requested but the metadata table is disabled; scanning all files");
            }
            return Ok(None);
        }

        let result = match self.record_index_candidates(filters.predicates(), all_files) {
            Ok(Some(candidates)) => Ok(Some(candidates)),
            Ok(None) => self.column_stats_candidates(filters, all_files),
            Err(err) => Err(err),
        };

        match result {
            Ok(Some(candidates)) => {
                debug!(
                    total_files = all_files.len(),
                    candidate_files = candidates.len(),
                    "data skipping selected candidate files"
                );
                Ok(Some(candidates))
            }
            Ok(None) => {
                warn!(
                    predicate = %filters.describe(),
                    "data skipping requested but no usable index covers the predicate; scanning all files"
                );
                Ok(None)
            }
            Err(err) => self.on_index_failure(err),
        }
    }

    /// The single place `FailureMode` is consulted
    fn on_index_failure(&self, err: PruneError) -> Result<Option<BTreeSet<String>>, PruneError> {
        if let PruneError::IndexLookup {
            source: IndexError::Unavailable(index),
            ..
        } = &err
        {
            warn!(index = %index, "index became unavailable while pruning; scanning all files");
            return Ok(None);
        }

        match self.config.failure_mode {
            FailureMode::Fallback => {
                warn!(error = %err, "data skipping failed; scanning all files for this query");
                Ok(None)
            }
            FailureMode::Strict => Err(err),
        }
    }

    fn record_index_candidates(
        &self,
        predicates: &[Predicate],
        all_files: &[String],
    ) -> Result<Option<BTreeSet<String>>, PruneError> {
        if !self.config.record_index_enabled {
            return Ok(None);
        }
        let Some(index) = self.record_index.as_deref() else {
            return Ok(None);
        };
        if !index.is_index_available() {
            return Ok(None);
        }
        let Some(key_field) = self.config.simple_record_key_field() else {
            return Ok(None);
        };
        let Some(keys) = index.extract_exact_match_keys(predicates, key_field) else {
            return Ok(None);
        };

        let failed = |source| {
            PruneError::index_lookup(IndexKind::RecordKey, predicates::describe(predicates), source)
        };
        let passing = index.get_candidate_files(all_files, &keys).map_err(failed)?;
        let indexed = index.indexed_files(all_files).map_err(failed)?;

        debug!(
            keys = keys.len(),
            matched_files = passing.len(),
            indexed_files = indexed.len(),
            "record index lookup"
        );
        Ok(Some(apply_coverage_repair(passing, all_files, &indexed)))
    }

    fn column_stats_candidates(
        &mut self,
        filters: DataFilters<'_>,
        all_files: &[String],
    ) -> Result<Option<BTreeSet<String>>, PruneError> {
        if !self.config.column_stats_enabled {
            return Ok(None);
        }
        let Some(provider) = self.column_stats.as_deref() else {
            return Ok(None);
        };
        if !provider.is_index_available() {
            return Ok(None);
        }

        let mut columns: Vec<String> = filters.columns().into_iter().collect();
        if let Some(indexed) = provider.indexed_columns() {
            columns.retain(|column| indexed.contains(column));
        }
        if columns.is_empty() {
            return Ok(None);
        }

        let failed = |source: IndexError| {
            PruneError::index_lookup(IndexKind::ColumnStats, filters.describe(), source)
        };

        let threshold = self.config.in_memory_projection_threshold;
        let in_memory = provider.should_read_in_memory(&columns, threshold);
        let stats = match self.stats_cache.get(&columns) {
            Some(cached) => Arc::clone(cached),
            None => {
                let loaded = provider
                    .load_transposed(&columns, in_memory)
                    .map_err(failed)?;
                let loaded = Arc::new(loaded);
                self.stats_cache.insert(columns.clone(), Arc::clone(&loaded));
                loaded
            }
        };

        let passing = match filters {
            DataFilters::Predicates(predicates) => {
                evaluate_files(predicates, &stats, all_files, in_memory)
            }
            DataFilters::Exprs(exprs, _) => {
                match prune_files_with_exprs(exprs, &stats, all_files, in_memory).map_err(failed)? {
                    Some(passing) => passing,
                    None => return Ok(None),
                }
            }
        };
        let indexed: BTreeSet<String> = all_files
            .iter()
            .filter(|name| stats.contains_file(name))
            .cloned()
            .collect();

        debug!(
            columns = ?columns,
            in_memory,
            indexed_files = indexed.len(),
            passing_files = passing.len(),
            "column stats evaluation"
        );
        Ok(Some(apply_coverage_repair(passing, all_files, &indexed)))
    }

    /// Keep the slices with at least one file in `candidates`
    pub fn filter_slices(
        &self,
        slices: Vec<FileSlice>,
        candidates: &BTreeSet<String>,
    ) -> Vec<FileSlice> {
        let include_log_files = self.config.include_log_files;
        slices
            .into_iter()
            .filter(|slice| {
                slice
                    .file_names(include_log_files)
                    .iter()
                    .any(|name| candidates.contains(*name))
            })
            .collect()
    }

    /// Drop loaded stats and let providers drop theirs
    pub fn invalidate_caches(&mut self) {
        self.stats_cache.clear();
        if let Some(provider) = self.column_stats.as_deref_mut() {
            provider.invalidate_caches();
        }
        if let Some(index) = self.record_index.as_deref_mut() {
            index.invalidate_caches();
        }
    }

    /// Number of column sets with loaded stats
    pub fn cached_stats_count(&self) -> usize {
        self.stats_cache.len()
    }
}

impl std::fmt::Debug for DataSkippingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSkippingEngine")
            .field("config", &self.config)
            .field("column_stats", &self.column_stats.is_some())
            .field("record_index", &self.record_index.is_some())
            .field("cached_column_sets", &self.stats_cache.len())
            .finish()
    }
}

/// Indexed files the predicates can't rule out
///
/// Files without stats are not evaluated here; coverage repair adds them back.
fn evaluate_files(
    predicates: &[Predicate],
    stats: &TransposedColumnStats,
    all_files: &[String],
    in_memory: bool,
) -> BTreeSet<String> {
    let keep = |name: &String| -> Option<String> {
        let file_stats = stats.get(name)?;
        (predicates.evaluate(file_stats) == FileVerdict::MayInclude).then(|| name.clone())
    };

    if in_memory {
        all_files.iter().filter_map(keep).collect()
    } else {
        all_files.par_iter().filter_map(keep).collect()
    }
}

/// Indexed files DataFusion's `PruningPredicate` can't rule out
///
/// None when no filter compiles against the loaded stats.
fn prune_files_with_exprs(
    filters: &[Expr],
    stats: &TransposedColumnStats,
    all_files: &[String],
    in_memory: bool,
) -> Result<Option<BTreeSet<String>>, IndexError> {
    let schema = Arc::new(stats.arrow_schema());
    let Some(predicate) = ExprPruningPredicate::try_new(filters, schema)? else {
        return Ok(None);
    };

    let indexed: Vec<&str> = all_files
        .iter()
        .map(String::as_str)
        .filter(|name| stats.contains_file(name))
        .collect();
    if indexed.is_empty() {
        return Ok(Some(BTreeSet::new()));
    }

    let keep = |chunk: &[&str]| -> Result<Vec<String>, IndexError> {
        let flags = predicate.prune_files(stats, chunk)?;
        Ok(chunk
            .iter()
            .zip(flags)
            .filter(|(_, keep)| *keep)
            .map(|(name, _)| name.to_string())
            .collect())
    };

    let passing: Vec<String> = if in_memory {
        keep(indexed.as_slice())?
    } else {
        indexed
            .par_chunks(PARALLEL_PRUNE_CHUNK)
            .map(keep)
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .flatten()
            .collect()
    };
    Ok(Some(passing.into_iter().collect()))
}

/// Final candidates: files passing the predicate plus every file the index doesn't cover
///
/// Must run after evaluation. Folding coverage into evaluation would let a
/// stale index prune files it has never seen.
pub fn apply_coverage_repair(
    passing: BTreeSet<String>,
    all_files: &[String],
    indexed: &BTreeSet<String>,
) -> BTreeSet<String> {
    let mut candidates = passing;
    candidates.extend(
        all_files
            .iter()
            .filter(|name| !indexed.contains(*name))
            .cloned(),
    );
    candidates
}

/// Fraction of slices skipped; 0 when there was nothing to skip
pub fn skip_ratio(total_slices: usize, candidate_slices: usize) -> f64 {
    if total_slices == 0 {
        return 0.0;
    }
    total_slices.saturating_sub(candidate_slices) as f64 / total_slices as f64
}
