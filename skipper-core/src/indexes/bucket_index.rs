use super::bucket_identifier::{self, BucketId};
use crate::config::{BucketIndexConfig, ConfigError};
use crate::table::{ListingError, PartitionLister, RecordKey, RecordLocation};
use std::collections::HashMap;
use tracing::debug;

/// Errors from loading or querying the bucket index
#[derive(Debug, thiserror::Error)]
pub enum BucketIndexError {
    /// File id does not carry a decodable bucket id
    #[error("Malformed bucket file id '{file_id}'{}: {reason}", partition_suffix(.partition))]
    MalformedFileId {
        partition: Option<String>,
        file_id: String,
        reason: String,
    },

    #[error(
        "Bucket id {bucket_id} decoded from file id '{file_id}' in partition '{partition}' is outside [0, {num_buckets})"
    )]
    BucketOutOfRange {
        partition: String,
        file_id: String,
        bucket_id: BucketId,
        num_buckets: u32,
    },

    /// Two latest file slices claim the same bucket; the table needs repair before further writes
    #[error(
        "Found multiple files at partition path={partition} belonging to bucket id {bucket_id}: '{existing_file_id}' and '{file_id}'"
    )]
    DuplicateBucket {
        partition: String,
        bucket_id: BucketId,
        existing_file_id: String,
        file_id: String,
    },

    #[error("Listing error: {0}")]
    Listing(#[from] ListingError),

    #[error("Invalid bucket index config: {0}")]
    Config(#[from] ConfigError),
}

fn partition_suffix(partition: &Option<String>) -> String {
    partition
        .as_deref()
        .map(|p| format!(" in partition '{}'", p))
        .unwrap_or_default()
}

impl BucketIndexError {
    fn in_partition(self, partition_path: &str) -> Self {
        match self {
            BucketIndexError::MalformedFileId {
                partition: None,
                file_id,
                reason,
            } => BucketIndexError::MalformedFileId {
                partition: Some(partition_path.to_string()),
                file_id,
                reason,
            },
            other => other,
        }
    }
}

/// Per-partition map of bucket id → owning file group
///
/// ## Routing
/// ```text
/// RecordKey { "id:42", partition "2024-01-01" }
///     ↓ get_bucket_id (hash of index fields % num_buckets)
/// bucket 3
///     ↓ partitions["2024-01-01"][3]
/// Some(RecordLocation { "00000003-...-0", "20240101093000" })  → update
/// None                                                         → insert into a new file group
/// ```
///
/// Maps are rebuilt wholesale from the latest listing on every load; a
/// partition is never patched in place, so a changed listing can't leave
/// stale buckets behind.
#[derive(Debug, Clone)]
pub struct BucketLocationIndex {
    config: BucketIndexConfig,

    /// partition path → bucket id → location
    partitions: HashMap<String, HashMap<BucketId, RecordLocation>>,
}

impl BucketLocationIndex {
    /// Create an index with no partitions loaded
    pub fn new(config: BucketIndexConfig) -> Result<Self, BucketIndexError> {
        config.validate()?;
        Ok(Self {
            config,
            partitions: HashMap::new(),
        })
    }

    /// Create an index and eagerly load the given partitions
    pub fn load<L>(
        lister: &L,
        config: BucketIndexConfig,
        partition_paths: &[String],
    ) -> Result<Self, BucketIndexError>
    where
        L: PartitionLister + ?Sized,
    {
        let mut index = Self::new(config)?;
        for partition_path in partition_paths {
            index.reload_partition(lister, partition_path)?;
        }
        Ok(index)
    }

    /// Build the bucket map of one partition from its latest file slices
    ///
    /// Fails with `DuplicateBucket` if two slices decode to the same bucket
    /// id; the existing mapping is never silently overwritten.
    pub fn load_for_partition<L>(
        lister: &L,
        config: &BucketIndexConfig,
        partition_path: &str,
    ) -> Result<HashMap<BucketId, RecordLocation>, BucketIndexError>
    where
        L: PartitionLister + ?Sized,
    {
        let slices = lister.latest_file_slices(partition_path)?;
        let mut mapping: HashMap<BucketId, RecordLocation> = HashMap::with_capacity(slices.len());

        for slice in &slices {
            let bucket_id = bucket_identifier::bucket_id_from_file_id(&slice.file_id)
                .map_err(|e| e.in_partition(partition_path))?;

            if bucket_id >= config.num_buckets {
                return Err(BucketIndexError::BucketOutOfRange {
                    partition: partition_path.to_string(),
                    file_id: slice.file_id.clone(),
                    bucket_id,
                    num_buckets: config.num_buckets,
                });
            }

            if let Some(existing) = mapping.get(&bucket_id) {
                return Err(BucketIndexError::DuplicateBucket {
                    partition: partition_path.to_string(),
                    bucket_id,
                    existing_file_id: existing.file_id.clone(),
                    file_id: slice.file_id.clone(),
                });
            }
            mapping.insert(bucket_id, slice.location());
        }

        debug!(
            partition = partition_path,
            buckets = mapping.len(),
            num_buckets = config.num_buckets,
            "loaded bucket mapping"
        );
        Ok(mapping)
    }

    /// Replace one partition's map with a fresh load
    ///
    /// On failure the partition is left unloaded, so its keys stop routing
    /// to locations from the previous load.
    pub fn reload_partition<L>(
        &mut self,
        lister: &L,
        partition_path: &str,
    ) -> Result<(), BucketIndexError>
    where
        L: PartitionLister + ?Sized,
    {
        match Self::load_for_partition(lister, &self.config, partition_path) {
            Ok(mapping) => {
                self.partitions.insert(partition_path.to_string(), mapping);
                Ok(())
            }
            Err(err) => {
                self.partitions.remove(partition_path);
                Err(err)
            }
        }
    }

    pub fn get_bucket_id(&self, key: &RecordKey) -> BucketId {
        bucket_identifier::get_bucket_id(
            &key.record_key,
            &self.config.index_key_fields,
            self.config.num_buckets,
        )
    }

    /// Current location of the key's bucket
    ///
    /// None when the partition hasn't been loaded or the bucket has no file
    /// group yet; the record is then an insert into a new file group.
    pub fn get_record_location(&self, key: &RecordKey) -> Option<&RecordLocation> {
        let bucket_id = self.get_bucket_id(key);
        self.partitions
            .get(&key.partition_path)
            .and_then(|mapping| mapping.get(&bucket_id))
    }

    /// Route a batch of keys, keeping input order
    pub fn tag_locations<I>(&self, keys: I) -> Vec<(RecordKey, Option<RecordLocation>)>
    where
        I: IntoIterator<Item = RecordKey>,
    {
        keys.into_iter()
            .map(|key| {
                let location = self.get_record_location(&key).cloned();
                (key, location)
            })
            .collect()
    }

    /// Bucket ownership is encoded in file ids, so log files never need indexing
    pub fn can_index_log_files(&self) -> bool {
        false
    }

    pub fn num_buckets(&self) -> u32 {
        self.config.num_buckets
    }

    pub fn is_loaded(&self, partition_path: &str) -> bool {
        self.partitions.contains_key(partition_path)
    }

    /// Number of partitions loaded
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Buckets with a file group in this partition
    pub fn bucket_count(&self, partition_path: &str) -> usize {
        self.partitions.get(partition_path).map_or(0, HashMap::len)
    }
}
