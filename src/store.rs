//! The `BucketStore` abstraction: where bucket records and the helper record live.
//!
//! The core never talks to a concrete database directly; every backend implements
//! this trait. Two reference backends ship in this crate: [`mem::MemoryBucketStore`]
//! and, behind the `sqlite` feature, [`sqlite::SqliteBucketStore`].
pub mod mem;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use crate::error::Result;
use crate::vector::Vector;
use fnv::FnvHashMap as HashMap;
use serde::{Deserialize, Serialize};

/// One stored point: an id, its original vector, and its bucket key per table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BucketRecord {
    pub id: String,
    pub vector: Vector,
    /// Bucket key per table, keyed by the table's field name (`"0"`, `"1"`, ...).
    pub hashes: HashMap<String, u64>,
}

/// Conjunction of field-equality predicates: a candidate must match every entry.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub equals: Vec<(String, u64)>,
}

impl Filter {
    pub fn new() -> Self {
        Filter { equals: Vec::new() }
    }

    pub fn eq(mut self, field: impl Into<String>, value: u64) -> Self {
        self.equals.push((field.into(), value));
        self
    }

    fn matches(&self, record: &BucketRecord) -> bool {
        self.equals
            .iter()
            .all(|(field, value)| record.hashes.get(field) == Some(value))
    }
}

/// The singleton record describing the currently-published index (§6.2).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HelperRecord {
    pub hasher: Vec<u8>,
    pub hash_coll_name: String,
    pub is_build_done: bool,
    pub build_error: String,
    pub last_build_time: i64,
    pub build_elapsed_time: i64,
}

impl HelperRecord {
    /// The record before any build has ever completed: no hasher, build considered
    /// "done" (idle) so the first `build_index` call is accepted.
    pub fn empty() -> Self {
        HelperRecord {
            hasher: Vec::new(),
            hash_coll_name: String::new(),
            is_build_done: true,
            build_error: String::new(),
            last_build_time: 0,
            build_elapsed_time: 0,
        }
    }
}

/// An abstract document store for bucket records plus the helper record.
///
/// Implementations must be `Send + Sync`: the `IndexService` shares a store behind
/// an `Arc` across concurrent readers and its single rebuilder.
pub trait BucketStore: Send + Sync {
    fn create_collection(&self, name: &str) -> Result<()>;
    fn drop_collection(&self, name: &str) -> Result<()>;
    fn has_collection(&self, name: &str) -> Result<bool>;

    /// Build a secondary index on each of `fields`, independently, in `collection`.
    fn create_indexes(&self, collection: &str, fields: &[String]) -> Result<()>;

    /// Unordered batch insert; a store is free to accept any subset that validates.
    fn insert_many(&self, collection: &str, records: &[BucketRecord]) -> Result<()>;

    fn delete(&self, collection: &str, id: &str) -> Result<()>;

    /// Records in `collection` matching every predicate in `filter`, capped at `limit`.
    fn find(&self, collection: &str, filter: &Filter, limit: usize) -> Result<Vec<BucketRecord>>;

    /// Point lookup by id, used to resolve a query-by-id request to its stored vector.
    fn get_by_id(&self, collection: &str, id: &str) -> Result<Option<BucketRecord>>;

    fn estimated_count(&self, collection: &str) -> Result<i64>;

    /// Replace the singleton helper record.
    fn upsert_helper(&self, record: &HelperRecord) -> Result<()>;

    /// The current helper record, if a build has ever been attempted.
    fn get_helper(&self) -> Result<Option<HelperRecord>>;
}

#[cfg(test)]
pub(crate) fn make_record(id: &str, vector: Vector, hashes: &[(&str, u64)]) -> BucketRecord {
    BucketRecord {
        id: id.to_string(),
        vector,
        hashes: hashes
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect(),
    }
}
