use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

pub const METADATA_ENABLE: &str = "hoodie.metadata.enable";
pub const DATA_SKIPPING_ENABLE: &str = "hoodie.enable.data.skipping";
pub const COLUMN_STATS_ENABLE: &str = "hoodie.metadata.index.column.stats.enable";
pub const RECORD_INDEX_ENABLE: &str = "hoodie.metadata.record.index.enable";
pub const DATA_SKIPPING_FAILURE_MODE: &str = "hoodie.fileIndex.dataSkippingFailureMode";
pub const IN_MEMORY_PROJECTION_THRESHOLD: &str =
    "hoodie.metadata.index.column.stats.inMemory.projection.threshold";
pub const INCLUDE_LOG_FILES: &str = "hoodie.datasource.read.include.log.files";
pub const RECORD_KEY_FIELD: &str = "hoodie.datasource.write.recordkey.field";
pub const BUCKET_NUM_BUCKETS: &str = "hoodie.bucket.index.num.buckets";
pub const BUCKET_HASH_FIELD: &str = "hoodie.bucket.index.hash.field";

/// Meta column holding the record key when no explicit key field is configured
pub const DEFAULT_RECORD_KEY_FIELD: &str = "_hoodie_record_key";

/// Projected stats rows above which column stats are evaluated in parallel
pub const DEFAULT_IN_MEMORY_PROJECTION_THRESHOLD: usize = 100_000;

/// What to do when a secondary index fails while pruning
///
/// Controls the trade-off between query availability and surfacing
/// index problems early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureMode {
    /// Log the error and scan every file for this call
    ///
    /// Use this when:
    /// - Queries must keep working while an index is being rebuilt
    /// - Scanning extra files is cheaper than a failed query
    Fallback,

    /// Propagate the error and abort planning
    ///
    /// Use this when:
    /// - Index health must be noticed immediately
    /// - Silent full scans would be too expensive
    Strict,
}

impl Default for FailureMode {
    fn default() -> Self {
        Self::Fallback
    }
}

impl FailureMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureMode::Fallback => "fallback",
            FailureMode::Strict => "strict",
        }
    }
}

impl fmt::Display for FailureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fallback" => Ok(FailureMode::Fallback),
            "strict" => Ok(FailureMode::Strict),
            _ => Err(ConfigError::InvalidValue {
                key: DATA_SKIPPING_FAILURE_MODE.to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Configuration for DataSkippingEngine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSkippingConfig {
    /// Secondary indexes live in the metadata table; without it nothing can be skipped
    pub metadata_table_enabled: bool,

    /// Caller asked for data skipping
    pub data_skipping_enabled: bool,

    /// Column min/max/null-count index may be consulted
    pub column_stats_enabled: bool,

    /// Record key to file index may be consulted
    pub record_index_enabled: bool,

    /// Behavior when an index lookup fails
    pub failure_mode: FailureMode,

    /// Above this many projected stats rows, evaluation runs on the rayon pool
    ///
    /// Recommended: 100k; lower it for wide tables with many indexed columns
    pub in_memory_projection_threshold: usize,

    /// Match candidate file names against log files as well as base files
    pub include_log_files: bool,

    /// Fields forming the record key, in key order
    pub record_key_fields: Vec<String>,
}

impl Default for DataSkippingConfig {
    fn default() -> Self {
        Self {
            metadata_table_enabled: true,
            data_skipping_enabled: false,
            column_stats_enabled: true,
            record_index_enabled: true,
            failure_mode: FailureMode::Fallback,
            in_memory_projection_threshold: DEFAULT_IN_MEMORY_PROJECTION_THRESHOLD,
            include_log_files: true,
            record_key_fields: vec![DEFAULT_RECORD_KEY_FIELD.to_string()],
        }
    }
}

impl DataSkippingConfig {
    /// Data skipping on, every index allowed, errors swallowed
    pub fn enabled() -> Self {
        Self {
            data_skipping_enabled: true,
            ..Self::default()
        }
    }

    /// Data skipping on, index failures abort planning
    pub fn strict() -> Self {
        Self {
            data_skipping_enabled: true,
            failure_mode: FailureMode::Strict,
            ..Self::default()
        }
    }

    /// Builder pattern: set record key fields
    pub fn with_record_key_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.record_key_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Builder pattern: set failure mode
    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    /// True when both prerequisites for skipping hold
    pub fn skipping_possible(&self) -> bool {
        self.metadata_table_enabled && self.data_skipping_enabled
    }

    /// Single field whose equality/IN predicates can hit the record index
    ///
    /// Composite keys can't be looked up from a single predicate.
    pub fn simple_record_key_field(&self) -> Option<&str> {
        match self.record_key_fields.as_slice() {
            [field] => Some(field.as_str()),
            _ => None,
        }
    }

    /// Read the table's well-known properties, defaulting absent keys
    pub fn from_properties(props: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let record_key_fields = match props.get(RECORD_KEY_FIELD) {
            Some(value) => split_fields(value),
            None => defaults.record_key_fields,
        };

        Ok(Self {
            metadata_table_enabled: parse_prop(props, METADATA_ENABLE)?
                .unwrap_or(defaults.metadata_table_enabled),
            data_skipping_enabled: parse_prop(props, DATA_SKIPPING_ENABLE)?
                .unwrap_or(defaults.data_skipping_enabled),
            column_stats_enabled: parse_prop(props, COLUMN_STATS_ENABLE)?
                .unwrap_or(defaults.column_stats_enabled),
            record_index_enabled: parse_prop(props, RECORD_INDEX_ENABLE)?
                .unwrap_or(defaults.record_index_enabled),
            failure_mode: parse_prop(props, DATA_SKIPPING_FAILURE_MODE)?
                .unwrap_or(defaults.failure_mode),
            in_memory_projection_threshold: parse_prop(props, IN_MEMORY_PROJECTION_THRESHOLD)?
                .unwrap_or(defaults.in_memory_projection_threshold),
            include_log_files: parse_prop(props, INCLUDE_LOG_FILES)?
                .unwrap_or(defaults.include_log_files),
            record_key_fields,
        })
    }
}

/// Configuration for the fixed-cardinality bucket index
///
/// Both fields are fixed for the lifetime of a table: file ids written
/// under one bucket count can't be routed under another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketIndexConfig {
    /// Number of buckets per partition
    pub num_buckets: u32,

    /// Record key fields hashed into the bucket id, in order
    pub index_key_fields: Vec<String>,
}

impl BucketIndexConfig {
    pub fn new<I, S>(num_buckets: u32, index_key_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            num_buckets,
            index_key_fields: index_key_fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_buckets == 0 {
            return Err(ConfigError::InvalidValue {
                key: BUCKET_NUM_BUCKETS.to_string(),
                value: "0".to_string(),
            });
        }
        if self.index_key_fields.is_empty() {
            return Err(ConfigError::Missing(BUCKET_HASH_FIELD.to_string()));
        }
        Ok(())
    }

    /// Hash fields default to the record key fields when not set explicitly
    pub fn from_properties(props: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let num_buckets = parse_prop::<u32>(props, BUCKET_NUM_BUCKETS)?
            .ok_or_else(|| ConfigError::Missing(BUCKET_NUM_BUCKETS.to_string()))?;
        let fields = props
            .get(BUCKET_HASH_FIELD)
            .or_else(|| props.get(RECORD_KEY_FIELD))
            .map(|value| split_fields(value))
            .ok_or_else(|| ConfigError::Missing(BUCKET_HASH_FIELD.to_string()))?;

        let config = Self {
            num_buckets,
            index_key_fields: fields,
        };
        config.validate()?;
        Ok(config)
    }
}

fn parse_prop<T: FromStr>(
    props: &HashMap<String, String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    match props.get(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw.clone(),
            }),
    }
}

fn split_fields(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|field| !field.is_empty())
        .map(str::to_string)
        .collect()
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required property: {0}")]
    Missing(String),

    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
}
