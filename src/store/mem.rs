//! In-process `BucketStore` backend: the default for tests and embedded use.
use crate::error::{Error, Result};
use crate::store::{BucketRecord, BucketStore, Filter, HelperRecord};
use fnv::FnvHashMap as HashMap;
use parking_lot::RwLock;

#[derive(Default)]
struct Collection {
    records: HashMap<String, BucketRecord>,
}

/// A `BucketStore` held entirely in memory, guarded by one `RwLock` per logical
/// resource so readers (queries) don't block each other.
#[derive(Default)]
pub struct MemoryBucketStore {
    collections: RwLock<HashMap<String, Collection>>,
    helper: RwLock<Option<HelperRecord>>,
}

impl MemoryBucketStore {
    pub fn new() -> Self {
        MemoryBucketStore::default()
    }
}

impl BucketStore for MemoryBucketStore {
    fn create_collection(&self, name: &str) -> Result<()> {
        self.collections
            .write()
            .entry(name.to_string())
            .or_insert_with(Collection::default);
        Ok(())
    }

    fn drop_collection(&self, name: &str) -> Result<()> {
        self.collections.write().remove(name);
        Ok(())
    }

    fn has_collection(&self, name: &str) -> Result<bool> {
        Ok(self.collections.read().contains_key(name))
    }

    fn create_indexes(&self, collection: &str, _fields: &[String]) -> Result<()> {
        // Records are matched by a linear scan of the field map; no secondary
        // structure needs building for the in-memory backend.
        if !self.collections.read().contains_key(collection) {
            return Err(Error::StoreUnavailable(format!(
                "no such collection: {}",
                collection
            )));
        }
        Ok(())
    }

    fn insert_many(&self, collection: &str, records: &[BucketRecord]) -> Result<()> {
        let mut guard = self.collections.write();
        let coll = guard
            .get_mut(collection)
            .ok_or_else(|| Error::StoreUnavailable(format!("no such collection: {}", collection)))?;
        for record in records {
            coll.records.insert(record.id.clone(), record.clone());
        }
        Ok(())
    }

    fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let mut guard = self.collections.write();
        let coll = guard
            .get_mut(collection)
            .ok_or_else(|| Error::StoreUnavailable(format!("no such collection: {}", collection)))?;
        coll.records.remove(id);
        Ok(())
    }

    fn find(&self, collection: &str, filter: &Filter, limit: usize) -> Result<Vec<BucketRecord>> {
        let guard = self.collections.read();
        let coll = guard
            .get(collection)
            .ok_or_else(|| Error::StoreUnavailable(format!("no such collection: {}", collection)))?;
        Ok(coll
            .records
            .values()
            .filter(|r| filter.matches(r))
            .take(limit)
            .cloned()
            .collect())
    }

    fn get_by_id(&self, collection: &str, id: &str) -> Result<Option<BucketRecord>> {
        let guard = self.collections.read();
        let coll = guard
            .get(collection)
            .ok_or_else(|| Error::StoreUnavailable(format!("no such collection: {}", collection)))?;
        Ok(coll.records.get(id).cloned())
    }

    fn estimated_count(&self, collection: &str) -> Result<i64> {
        let guard = self.collections.read();
        let coll = guard
            .get(collection)
            .ok_or_else(|| Error::StoreUnavailable(format!("no such collection: {}", collection)))?;
        Ok(coll.records.len() as i64)
    }

    fn upsert_helper(&self, record: &HelperRecord) -> Result<()> {
        *self.helper.write() = Some(record.clone());
        Ok(())
    }

    fn get_helper(&self) -> Result<Option<HelperRecord>> {
        Ok(self.helper.read().clone())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::store::make_record;
    use crate::vector::Vector;

    #[test]
    fn test_insert_find_delete_roundtrip() {
        let store = MemoryBucketStore::new();
        store.create_collection("c").unwrap();
        let rec = make_record("a", Vector::from_vec(vec![1., 2.]), &[("0", 5)]);
        store.insert_many("c", &[rec.clone()]).unwrap();

        let filter = Filter::new().eq("0", 5);
        let found = store.find("c", &filter, 10).unwrap();
        assert_eq!(found, vec![rec]);

        store.delete("c", "a").unwrap();
        assert!(store.find("c", &filter, 10).unwrap().is_empty());
    }

    #[test]
    fn test_find_is_conjunction_across_fields() {
        let store = MemoryBucketStore::new();
        store.create_collection("c").unwrap();
        let a = make_record("a", Vector::from_vec(vec![0.]), &[("0", 1), ("1", 2)]);
        let b = make_record("b", Vector::from_vec(vec![0.]), &[("0", 1), ("1", 9)]);
        store.insert_many("c", &[a.clone(), b]).unwrap();

        let filter = Filter::new().eq("0", 1).eq("1", 2);
        let found = store.find("c", &filter, 10).unwrap();
        assert_eq!(found, vec![a]);
    }

    #[test]
    fn test_get_by_id_finds_and_misses() {
        let store = MemoryBucketStore::new();
        store.create_collection("c").unwrap();
        let rec = make_record("a", Vector::from_vec(vec![1., 2.]), &[("0", 5)]);
        store.insert_many("c", &[rec.clone()]).unwrap();

        assert_eq!(store.get_by_id("c", "a").unwrap(), Some(rec));
        assert_eq!(store.get_by_id("c", "missing").unwrap(), None);
    }

    #[test]
    fn test_operations_on_missing_collection_fail() {
        let store = MemoryBucketStore::new();
        assert!(store.insert_many("missing", &[]).is_err());
        assert!(store.find("missing", &Filter::new(), 1).is_err());
    }

    #[test]
    fn test_helper_record_round_trips() {
        let store = MemoryBucketStore::new();
        assert!(store.get_helper().unwrap().is_none());
        let helper = HelperRecord {
            hasher: vec![1, 2, 3],
            hash_coll_name: "coll-1".into(),
            is_build_done: true,
            build_error: String::new(),
            last_build_time: 42,
            build_elapsed_time: 7,
        };
        store.upsert_helper(&helper).unwrap();
        assert_eq!(store.get_helper().unwrap(), Some(helper));
    }
}
