//! Bucket id computation and its encoding in file group ids
//!
//! The write path names every file group of a bucketed table after its
//! bucket: the first 8 characters of the file id are the zero-padded
//! bucket number. Routing a record therefore needs no index lookup, only
//! the same hash the writer used:
//!
//! ```text
//! record key "id:42,region:eu"   index fields [id]
//!   → hash keys ["42"]
//!   → list hash 31 * 1 + hash("42")  (32-bit, wrapping)
//!   → (hash & i32::MAX) % num_buckets
//!   → bucket 3 → file id "00000003-<uuid tail>-0"
//! ```
//!
//! The hash is the 32-bit list hash over UTF-16 string hashes and must not
//! change: file ids already on disk were named with it.

use super::bucket_index::BucketIndexError;
use uuid::Uuid;

/// Bucket number within a partition, in `[0, num_buckets)`
pub type BucketId = u32;

/// Width of the bucket id prefix of a file id
pub const BUCKET_ID_WIDTH: usize = 8;

/// Decode the bucket id embedded in a file group id
///
/// Fails when the id doesn't start with 8 ASCII digits, which means the
/// file wasn't written by the bucket index (or the data is corrupt).
pub fn bucket_id_from_file_id(file_id: &str) -> Result<BucketId, BucketIndexError> {
    let prefix = file_id
        .get(..BUCKET_ID_WIDTH)
        .filter(|p| p.bytes().all(|b| b.is_ascii_digit()))
        .ok_or_else(|| BucketIndexError::MalformedFileId {
            partition: None,
            file_id: file_id.to_string(),
            reason: format!("expected {} leading digits", BUCKET_ID_WIDTH),
        })?;

    prefix
        .parse::<BucketId>()
        .map_err(|e| BucketIndexError::MalformedFileId {
            partition: None,
            file_id: file_id.to_string(),
            reason: e.to_string(),
        })
}

/// Bucket id of a record key
///
/// Pure: identical inputs always produce the identical bucket, and the
/// result always lies in `[0, num_buckets)`. `num_buckets` must be non-zero
/// (enforced by `BucketIndexConfig::validate`).
pub fn get_bucket_id(record_key: &str, index_key_fields: &[String], num_buckets: u32) -> BucketId {
    debug_assert!(num_buckets > 0, "num_buckets must be positive");
    let hash_keys = hash_keys(record_key, index_key_fields);
    let hash = list_hash(&hash_keys) & i32::MAX;
    (hash as u32) % num_buckets.max(1)
}

/// Values of the index key fields, in index field order
///
/// A key with no `:` is a plain single-field key and hashes as-is.
/// Otherwise it is `field:value` pairs joined by `,`; a field missing from
/// the key contributes a null element.
pub fn hash_keys<'a>(record_key: &'a str, index_key_fields: &[String]) -> Vec<Option<&'a str>> {
    if !record_key.contains(':') {
        return vec![Some(record_key)];
    }

    let mut pairs: Vec<(&str, &str)> = Vec::new();
    for part in record_key.split(',') {
        let mut pieces = part.split(':');
        let field = pieces.next().unwrap_or_default();
        let value = pieces.next().unwrap_or_default();
        pairs.push((field, value));
    }

    index_key_fields
        .iter()
        .map(|field| {
            pairs
                .iter()
                .rev()
                .find(|(name, _)| *name == field.as_str())
                .map(|(_, value)| *value)
        })
        .collect()
}

/// Zero-padded bucket id as it appears at the start of file ids
pub fn bucket_id_str(bucket_id: BucketId) -> String {
    format!("{:0width$}", bucket_id, width = BUCKET_ID_WIDTH)
}

/// Fresh file id prefix for a bucket: a random UUID whose first 8
/// characters are replaced by the padded bucket id
pub fn new_bucket_file_id_prefix(bucket_id: BucketId) -> String {
    let uuid = Uuid::new_v4().to_string();
    format!("{}{}", bucket_id_str(bucket_id), &uuid[BUCKET_ID_WIDTH..])
}

/// Fresh file group id for a bucket (prefix plus the first file group suffix)
pub fn new_bucket_file_id(bucket_id: BucketId) -> String {
    format!("{}-0", new_bucket_file_id_prefix(bucket_id))
}

/// 32-bit string hash over UTF-16 code units: `s[0]*31^(n-1) + ... + s[n-1]`
fn string_hash(value: &str) -> i32 {
    value
        .encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(i32::from(unit)))
}

/// 32-bit ordered list hash; null elements hash to 0
fn list_hash(values: &[Option<&str>]) -> i32 {
    values.iter().fold(1i32, |h, value| {
        h.wrapping_mul(31)
            .wrapping_add(value.map_or(0, string_hash))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng as _, SeedableRng as _};

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_string_hash_known_values() {
        assert_eq!(string_hash(""), 0);
        assert_eq!(string_hash("a"), 97);
        assert_eq!(string_hash("abc"), 96354);
        // Overflows and wraps negative
        assert_eq!(string_hash("polygenelubricants"), i32::MIN);
        assert_eq!(string_hash("hello world"), 1794106052);
    }

    #[test]
    fn test_list_hash_known_values() {
        assert_eq!(list_hash(&[]), 1);
        assert_eq!(list_hash(&[Some("a")]), 31 + 97);
        assert_eq!(list_hash(&[None]), 31);
        assert_eq!(list_hash(&[Some("a"), Some("b")]), (31 + 97) * 31 + 98);
    }

    #[test]
    fn test_known_bucket_ids() {
        // list hash of ["abc"] = 31 + 96354 = 96385
        assert_eq!(get_bucket_id("abc", &fields(&["id"]), 10), 5);
        assert_eq!(get_bucket_id("abc", &fields(&["id"]), 4), 1);
        // Composite key picks the value of the index field
        assert_eq!(get_bucket_id("id:abc,region:eu", &fields(&["id"]), 10), 5);
    }

    #[test]
    fn test_hash_keys_follow_index_field_order() {
        let key = "id:1,region:eu,ts:99";
        assert_eq!(hash_keys(key, &fields(&["region", "id"])), vec![Some("eu"), Some("1")]);
        assert_eq!(hash_keys(key, &fields(&["missing"])), vec![None]);
        assert_eq!(hash_keys("plain-key", &fields(&["a", "b"])), vec![Some("plain-key")]);
    }

    #[test]
    fn test_bucket_id_is_pure_and_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let index_fields = fields(&["id", "region"]);

        for _ in 0..2_000 {
            let num_buckets = rng.random_range(1..512u32);
            let key = format!(
                "id:{},region:r{}",
                rng.random::<u64>(),
                rng.random_range(0..16)
            );
            let first = get_bucket_id(&key, &index_fields, num_buckets);
            let second = get_bucket_id(&key, &index_fields, num_buckets);
            assert_eq!(first, second);
            assert!(first < num_buckets);
        }
    }

    #[test]
    fn test_bucket_id_handles_negative_hashes() {
        // hash of ["polygenelubricants"] is negative before masking
        let bucket = get_bucket_id("polygenelubricants", &fields(&["id"]), 7);
        assert!(bucket < 7);
    }

    #[test]
    fn test_file_id_round_trip() {
        for bucket in [0u32, 1, 42, 99_999_999] {
            let file_id = new_bucket_file_id(bucket);
            assert!(file_id.ends_with("-0"));
            assert_eq!(bucket_id_from_file_id(&file_id).unwrap(), bucket);
        }
        assert_eq!(bucket_id_str(3), "00000003");
    }

    #[test]
    fn test_malformed_file_ids() {
        for bad in ["", "0000001", "abcdefgh-1234", "-0000001-rest", "0000 001-rest"] {
            let err = bucket_id_from_file_id(bad).unwrap_err();
            assert!(matches!(err, BucketIndexError::MalformedFileId { .. }), "{}", bad);
        }
    }
}
