pub mod listing;

pub use listing::{InMemoryTableListing, ListingError, PartitionLister};

use datafusion::common::ScalarValue;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Extension marking a log file name (`.{fileId}_{baseInstant}.log.{version}_{token}`)
const LOG_FILE_MARKER: &str = ".log.";

/// A partition of the table
///
/// The path is relative to the table base path. An unpartitioned table has
/// exactly one partition with an empty path and no values.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    /// Relative path (e.g., "2024-01-01" or "region=eu/day=2024-01-01")
    pub path: String,

    /// Partition column values, in partition column order
    pub values: Vec<ScalarValue>,
}

impl Partition {
    pub fn new(path: impl Into<String>, values: Vec<ScalarValue>) -> Self {
        Self {
            path: path.into(),
            values,
        }
    }

    /// The single implicit partition of an unpartitioned table
    pub fn unpartitioned() -> Self {
        Self {
            path: String::new(),
            values: vec![],
        }
    }

    pub fn is_unpartitioned(&self) -> bool {
        self.path.is_empty() && self.values.is_empty()
    }

    /// Full path of a file in this partition under the table base path
    pub fn file_path(&self, base_path: &str, file_name: &str) -> String {
        let base = base_path.trim_end_matches('/');
        if self.path.is_empty() {
            format!("{}/{}", base, file_name)
        } else {
            format!("{}/{}/{}", base, self.path, file_name)
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            f.write_str("<unpartitioned>")
        } else {
            f.write_str(&self.path)
        }
    }
}

/// Columnar base file of a file slice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseFile {
    pub file_name: String,
    pub size_bytes: u64,
}

impl BaseFile {
    pub fn new(file_name: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            file_name: file_name.into(),
            size_bytes,
        }
    }
}

/// Incremental log file layered on top of a base file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFile {
    pub file_name: String,
    pub size_bytes: u64,
}

impl LogFile {
    pub fn new(file_name: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            file_name: file_name.into(),
            size_bytes,
        }
    }
}

/// One versioned state of a file group within a partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSlice {
    /// File group id; the first 8 characters carry the bucket id for bucketed tables
    pub file_id: String,

    /// Instant time of the commit that created this slice
    pub base_instant_time: String,

    /// Base file, absent for log-only slices
    pub base_file: Option<BaseFile>,

    /// Log files in version order
    #[serde(default)]
    pub log_files: Vec<LogFile>,
}

impl FileSlice {
    pub fn new(file_id: impl Into<String>, base_instant_time: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            base_instant_time: base_instant_time.into(),
            base_file: None,
            log_files: vec![],
        }
    }

    /// Builder pattern: set base file
    pub fn with_base_file(mut self, base_file: BaseFile) -> Self {
        self.base_file = Some(base_file);
        self
    }

    /// Builder pattern: append a log file
    pub fn with_log_file(mut self, log_file: LogFile) -> Self {
        self.log_files.push(log_file);
        self
    }

    /// Names of the files making up this slice
    ///
    /// Log files are only included when `include_log_files` is set; a
    /// read that ignores logs only ever scans the base file.
    pub fn file_names(&self, include_log_files: bool) -> Vec<&str> {
        let mut names = Vec::with_capacity(1 + self.log_files.len());
        if let Some(base) = &self.base_file {
            names.push(base.file_name.as_str());
        }
        if include_log_files {
            names.extend(self.log_files.iter().map(|log| log.file_name.as_str()));
        }
        names
    }

    /// Total bytes across base and log files
    pub fn size_bytes(&self) -> u64 {
        let base = self.base_file.as_ref().map_or(0, |b| b.size_bytes);
        base + self.log_files.iter().map(|l| l.size_bytes).sum::<u64>()
    }

    /// Location this slice represents for upsert routing
    pub fn location(&self) -> RecordLocation {
        RecordLocation::new(self.file_id.clone(), self.base_instant_time.clone())
    }
}

/// Record key plus the partition that owns it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    /// Either a plain value or `field:value` pairs joined by `,`
    pub record_key: String,

    pub partition_path: String,
}

impl RecordKey {
    pub fn new(record_key: impl Into<String>, partition_path: impl Into<String>) -> Self {
        Self {
            record_key: record_key.into(),
            partition_path: partition_path.into(),
        }
    }
}

/// Where a record currently lives: the file group and the slice version
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordLocation {
    pub file_id: String,
    pub instant_time: String,
}

impl RecordLocation {
    pub fn new(file_id: impl Into<String>, instant_time: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            instant_time: instant_time.into(),
        }
    }
}

/// Extract the file group id from a base or log file name
///
/// - Base file: `{fileId}_{writeToken}_{instant}.{ext}`
/// - Log file: `.{fileId}_{baseInstant}.log.{version}_{writeToken}`
///
/// Returns None when the name has no `_` separator.
pub fn file_id_from_file_name(file_name: &str) -> Option<&str> {
    let name = if is_log_file(file_name) {
        file_name.strip_prefix('.').unwrap_or(file_name)
    } else {
        file_name
    };
    match name.split_once('_') {
        Some((file_id, _)) if !file_id.is_empty() => Some(file_id),
        _ => None,
    }
}

pub fn is_log_file(file_name: &str) -> bool {
    file_name.starts_with('.') && file_name.contains(LOG_FILE_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slice_with_logs() -> FileSlice {
        FileSlice::new("00000001-abcd-0", "20240101000000")
            .with_base_file(BaseFile::new(
                "00000001-abcd-0_1-0-1_20240101000000.parquet",
                1000,
            ))
            .with_log_file(LogFile::new(
                ".00000001-abcd-0_20240101000000.log.1_1-0-1",
                200,
            ))
    }

    #[test]
    fn test_file_names_respect_log_switch() {
        let slice = slice_with_logs();
        assert_eq!(slice.file_names(false).len(), 1);
        assert_eq!(slice.file_names(true).len(), 2);
        assert_eq!(slice.size_bytes(), 1200);
    }

    #[test]
    fn test_log_only_slice() {
        let slice =
            FileSlice::new("f1", "001").with_log_file(LogFile::new(".f1_001.log.1_0-1-1", 10));
        assert!(slice.file_names(false).is_empty());
        assert_eq!(slice.file_names(true), vec![".f1_001.log.1_0-1-1"]);
    }

    #[test]
    fn test_file_id_from_file_name() {
        assert_eq!(
            file_id_from_file_name("00000001-abcd-0_1-0-1_20240101000000.parquet"),
            Some("00000001-abcd-0")
        );
        assert_eq!(
            file_id_from_file_name(".00000001-abcd-0_20240101000000.log.1_1-0-1"),
            Some("00000001-abcd-0")
        );
        assert_eq!(file_id_from_file_name("no-separator.parquet"), None);
        assert_eq!(file_id_from_file_name("_leading"), None);
    }

    #[test]
    fn test_partition_file_path() {
        let partition = Partition::new("2024-01-01", vec![ScalarValue::from("2024-01-01")]);
        assert_eq!(
            partition.file_path("/data/trips/", "f1.parquet"),
            "/data/trips/2024-01-01/f1.parquet"
        );
        assert_eq!(
            Partition::unpartitioned().file_path("/data/trips", "f1.parquet"),
            "/data/trips/f1.parquet"
        );
        assert!(Partition::unpartitioned().is_unpartitioned());
    }
}
