use super::data_skipping::{self, DataSkippingEngine};
use super::filters;
use super::predicates::Predicate;
use super::PruneError;
use crate::table::{FileSlice, Partition, PartitionLister};
use datafusion::logical_expr::Expr;
use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Skip ratio reported before a full unfiltered listing exists
pub const SKIP_RATIO_UNKNOWN: f64 = -1.0;

/// Partitions and the file slices left to scan in each, in listing order
#[derive(Debug, Clone, PartialEq)]
pub struct PrunedListing {
    base_path: String,
    include_log_files: bool,
    partitions: Vec<(Partition, Vec<FileSlice>)>,
}

impl PrunedListing {
    pub fn partitions(&self) -> &[(Partition, Vec<FileSlice>)] {
        &self.partitions
    }

    pub fn into_partitions(self) -> Vec<(Partition, Vec<FileSlice>)> {
        self.partitions
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn slice_count(&self) -> usize {
        self.partitions.iter().map(|(_, slices)| slices.len()).sum()
    }

    /// Files a scan will open (log files only if configured)
    pub fn file_count(&self) -> usize {
        self.slices()
            .map(|slice| slice.file_names(self.include_log_files).len())
            .sum()
    }

    /// Bytes across base and log files of every retained slice
    pub fn total_size_bytes(&self) -> u64 {
        self.slices().map(FileSlice::size_bytes).sum()
    }

    /// Full paths of every file to scan
    pub fn input_files(&self) -> Vec<String> {
        self.partitions
            .iter()
            .flat_map(|(partition, slices)| {
                slices.iter().flat_map(move |slice| {
                    slice
                        .file_names(self.include_log_files)
                        .into_iter()
                        .map(move |name| partition.file_path(&self.base_path, name))
                })
            })
            .collect()
    }

    fn slices(&self) -> impl Iterator<Item = &FileSlice> {
        self.partitions.iter().flat_map(|(_, slices)| slices.iter())
    }
}

/// Statistics from the last prune call
#[derive(Debug, Clone, PartialEq)]
pub struct PruneMetrics {
    /// Slices in the partitions that survived partition pruning
    pub total_slices: usize,

    /// Slices left after data skipping
    pub candidate_slices: usize,

    /// Fraction of slices skipped, or -1 if not yet measurable
    pub skip_ratio: f64,

    pub partitions_listed: usize,
    pub partitions_retained: usize,

    /// Whether a candidate set was applied (false means nothing was skipped)
    pub data_skipped: bool,

    pub elapsed: Duration,
}

/// Entry point for file pruning
///
/// ## Flow
/// ```text
/// prune(partition_filters, data_filters)
///   → lister.list_partitions(partition_filters)      (partition pruning)
///   → latest slices per partition                     (cached until refresh)
///   → engine.candidate_files(data_filters, all files) (data skipping)
///     (candidate_files_for_exprs for prune_exprs)
///   → keep slices with a candidate file
/// ```
///
/// Driven by one planning thread at a time; every cache lives in this
/// struct and is only emptied by `refresh`.
#[derive(Debug)]
pub struct PruningCoordinator<L> {
    lister: L,
    engine: DataSkippingEngine,

    /// partition path → latest slices
    slice_cache: HashMap<String, Vec<FileSlice>>,

    /// Set once every partition has been listed without filters
    fully_listed: bool,

    predicates_pushed_down: bool,
    last_metrics: Option<PruneMetrics>,
}

impl<L: PartitionLister> PruningCoordinator<L> {
    pub fn new(lister: L, engine: DataSkippingEngine) -> Self {
        Self {
            lister,
            engine,
            slice_cache: HashMap::new(),
            fully_listed: false,
            predicates_pushed_down: false,
            last_metrics: None,
        }
    }

    pub fn lister(&self) -> &L {
        &self.lister
    }

    pub fn engine(&self) -> &DataSkippingEngine {
        &self.engine
    }

    /// Prune with engine-neutral predicates
    pub fn prune(
        &mut self,
        partition_filters: &[Predicate],
        data_filters: &[Predicate],
    ) -> Result<PrunedListing, PruneError> {
        self.prune_with(partition_filters, |engine, all_files| {
            engine.candidate_files(data_filters, all_files)
        })
    }

    /// Prune with DataFusion filters
    ///
    /// Partition filters are translated to predicates, dropping what
    /// partition values can't decide. Data filters go to the engine as is.
    pub fn prune_exprs(
        &mut self,
        partition_filters: &[Expr],
        data_filters: &[Expr],
    ) -> Result<PrunedListing, PruneError> {
        let partition_filters = filters::predicates_from_exprs(partition_filters);
        self.prune_with(&partition_filters, |engine, all_files| {
            engine.candidate_files_for_exprs(data_filters, all_files)
        })
    }

    fn prune_with<F>(
        &mut self,
        partition_filters: &[Predicate],
        select_candidates: F,
    ) -> Result<PrunedListing, PruneError>
    where
        F: FnOnce(
            &mut DataSkippingEngine,
            &[String],
        ) -> Result<Option<BTreeSet<String>>, PruneError>,
    {
        let started = Instant::now();
        let include_log_files = self.engine.config().include_log_files;

        let partitions = self.lister.list_partitions(partition_filters)?;
        let partitions_listed = partitions.len();

        let mut listed = Vec::with_capacity(partitions.len());
        for partition in partitions {
            let slices = self.latest_slices(&partition.path)?;
            listed.push((partition, slices));
        }
        if partition_filters.is_empty() {
            self.fully_listed = true;
        }

        let all_files: Vec<String> = listed
            .iter()
            .flat_map(|(_, slices)| slices.iter())
            .flat_map(|slice| slice.file_names(include_log_files))
            .map(str::to_string)
            .collect();
        let total_slices: usize = listed.iter().map(|(_, slices)| slices.len()).sum();

        let candidates = select_candidates(&mut self.engine, &all_files)?;
        let data_skipped = candidates.is_some();
        let partitions = match candidates {
            Some(candidates) => self.apply_candidates(listed, &candidates),
            None => listed,
        };

        let candidate_slices: usize = partitions.iter().map(|(_, slices)| slices.len()).sum();
        let skip_ratio = if self.fully_listed {
            data_skipping::skip_ratio(total_slices, candidate_slices)
        } else {
            SKIP_RATIO_UNKNOWN
        };

        let metrics = PruneMetrics {
            total_slices,
            candidate_slices,
            skip_ratio,
            partitions_listed,
            partitions_retained: partitions.len(),
            data_skipped,
            elapsed: started.elapsed(),
        };
        info!(
            total_slices = metrics.total_slices,
            candidate_slices = metrics.candidate_slices,
            skip_ratio = metrics.skip_ratio,
            partitions_listed = metrics.partitions_listed,
            partitions_retained = metrics.partitions_retained,
            elapsed_ms = metrics.elapsed.as_millis() as u64,
            "pruned file listing"
        );

        self.last_metrics = Some(metrics);
        self.predicates_pushed_down = true;

        Ok(PrunedListing {
            base_path: self.lister.base_path().to_string(),
            include_log_files,
            partitions,
        })
    }

    /// Empty every cache and forget pushed-down predicates
    pub fn refresh(&mut self) {
        self.slice_cache.clear();
        self.fully_listed = false;
        self.predicates_pushed_down = false;
        self.last_metrics = None;
        self.engine.invalidate_caches();
        debug!("pruning caches invalidated");
    }

    pub fn has_predicates_pushed_down(&self) -> bool {
        self.predicates_pushed_down
    }

    /// Skip ratio of the last prune, -1 until it can be measured
    pub fn skip_ratio(&self) -> f64 {
        self.last_metrics
            .as_ref()
            .map_or(SKIP_RATIO_UNKNOWN, |metrics| metrics.skip_ratio)
    }

    pub fn last_metrics(&self) -> Option<&PruneMetrics> {
        self.last_metrics.as_ref()
    }

    /// Whether slices are cached for every partition of the table
    pub fn is_fully_listed(&self) -> bool {
        self.fully_listed
    }

    fn latest_slices(&mut self, partition_path: &str) -> Result<Vec<FileSlice>, PruneError> {
        if let Some(cached) = self.slice_cache.get(partition_path) {
            return Ok(cached.clone());
        }
        let slices = self.lister.latest_file_slices(partition_path)?;
        self.slice_cache
            .insert(partition_path.to_string(), slices.clone());
        Ok(slices)
    }

    /// Filter every partition's slices, dropping partitions left empty
    fn apply_candidates(
        &self,
        listed: Vec<(Partition, Vec<FileSlice>)>,
        candidates: &BTreeSet<String>,
    ) -> Vec<(Partition, Vec<FileSlice>)> {
        listed
            .into_iter()
            .filter_map(|(partition, slices)| {
                let before = slices.len();
                let kept = self.engine.filter_slices(slices, candidates);
                debug!(
                    partition = %partition,
                    slices = before,
                    kept = kept.len(),
                    "data skipping applied to partition"
                );
                (!kept.is_empty()).then_some((partition, kept))
            })
            .collect()
    }
}
