//! The live, updatable index: wires a [`Hasher`] to a [`BucketStore`] and
//! owns the build/publish lifecycle.
use crate::config::ServiceConfig;
use crate::error::{Error, Result};
use crate::hasher::Hasher;
use crate::stats::DatasetStats;
use crate::store::{BucketStore, Filter, HelperRecord};
use crate::vector::Vector;
use arc_swap::ArcSwap;
use log::{info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// One record to insert: an id and its vector.
pub struct InsertRecord {
    pub id: String,
    pub vector: Vector,
}

/// A query's input: either a raw vector, or the id of a previously-inserted
/// record whose stored vector is resolved via the store before running the
/// usual pipeline (the `{id?, vec}` request shape).
pub enum QueryRequest {
    Vector(Vector),
    Id(String),
}

/// One survivor of a query, in final sorted order.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryHit {
    pub id: String,
    pub distance: f64,
}

/// Snapshot of the helper record's build-status fields, as returned to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildStatus {
    pub done: bool,
    pub error: String,
    pub last_build_time: i64,
}

/// The currently-published hasher and the bucket collection it indexes into,
/// published and read as one atomic unit.
struct Published {
    hasher: Hasher,
    collection: String,
    build_time: i64,
}

impl Published {
    fn empty(config: &ServiceConfig) -> Result<Self> {
        Ok(Published {
            hasher: Hasher::new(config.hasher_config())?,
            collection: String::new(),
            build_time: 0,
        })
    }
}

/// Orchestrates insert/delete/query against a `BucketStore`, plus atomic,
/// non-blocking rebuilds of the underlying hasher.
pub struct IndexService {
    store: Arc<dyn BucketStore>,
    config: ServiceConfig,
    published: ArcSwap<Published>,
    build_lock: Mutex<()>,
}

impl IndexService {
    /// Construct a service against `store`, resuming from its helper record
    /// (if a build was ever published) or starting empty otherwise.
    pub fn new(store: Arc<dyn BucketStore>, config: ServiceConfig) -> Result<Self> {
        config.validate()?;

        // No helper record yet is the same idle state as one nobody has ever
        // published to: normalize both through `HelperRecord::empty()`.
        let helper = store.get_helper()?.unwrap_or_else(HelperRecord::empty);
        let published = if helper.is_build_done
            && helper.build_error.is_empty()
            && !helper.hash_coll_name.is_empty()
        {
            Published {
                hasher: Hasher::load(&helper.hasher)?,
                collection: helper.hash_coll_name,
                build_time: helper.last_build_time,
            }
        } else {
            Published::empty(&config)?
        };

        Ok(IndexService {
            store,
            config,
            published: ArcSwap::from_pointee(published),
            build_lock: Mutex::new(()),
        })
    }

    /// Generate a fresh hasher from `stats`, publish it under a new bucket
    /// collection, and drop the previously-published collection.
    ///
    /// Fails with [`Error::BuildInProgress`] if a build is already running.
    pub fn build_index(&self, stats: &DatasetStats) -> Result<()> {
        let _guard = self
            .build_lock
            .try_lock()
            .ok_or(Error::BuildInProgress)?;
        info!("starting index build");

        let current = self.published.load_full();
        let building = HelperRecord {
            hasher: current.hasher.dump()?,
            hash_coll_name: current.collection.clone(),
            is_build_done: false,
            build_error: String::new(),
            last_build_time: current.build_time,
            build_elapsed_time: 0,
        };
        self.store.upsert_helper(&building)?;

        let start = Instant::now();
        let outcome = self.run_build(stats);
        let elapsed_nanos = start.elapsed().as_nanos() as i64;

        match outcome {
            Ok((hasher, collection)) => {
                let last_build_time = now_nanos();
                let record = HelperRecord {
                    hasher: hasher.dump()?,
                    hash_coll_name: collection.clone(),
                    is_build_done: true,
                    build_error: String::new(),
                    last_build_time,
                    build_elapsed_time: elapsed_nanos,
                };
                self.store.upsert_helper(&record)?;
                self.published.store(Arc::new(Published {
                    hasher,
                    collection: collection.clone(),
                    build_time: last_build_time,
                }));

                if !current.collection.is_empty() {
                    if let Err(e) = self.store.drop_collection(&current.collection) {
                        warn!(
                            "failed to drop previous bucket collection {}: {}",
                            current.collection, e
                        );
                    }
                }
                info!("index build succeeded, collection={}", collection);
                Ok(())
            }
            Err(e) => {
                let record = HelperRecord {
                    hasher: current.hasher.dump()?,
                    hash_coll_name: current.collection.clone(),
                    is_build_done: true,
                    build_error: e.to_string(),
                    last_build_time: current.build_time,
                    build_elapsed_time: elapsed_nanos,
                };
                if let Err(store_err) = self.store.upsert_helper(&record) {
                    warn!("failed to persist build failure: {}", store_err);
                }
                warn!("index build failed: {}", e);
                Err(e)
            }
        }
    }

    fn run_build(&self, stats: &DatasetStats) -> Result<(Hasher, String)> {
        let mut hasher = Hasher::new(self.config.hasher_config())?;
        hasher.generate(&stats.mean, &stats.std_dev)?;

        let collection = Uuid::new_v4().to_string();
        self.store.create_collection(&collection)?;
        if let Err(e) = self.store.create_indexes(&collection, hasher.field_names()) {
            if let Err(drop_err) = self.store.drop_collection(&collection) {
                warn!(
                    "failed to drop orphaned collection {} after failed build: {}",
                    collection, drop_err
                );
            }
            return Err(e);
        }
        Ok((hasher, collection))
    }

    /// The build-status fields of the current helper record, if any build has
    /// ever been attempted.
    pub fn check_build(&self) -> Result<Option<BuildStatus>> {
        Ok(self.store.get_helper()?.map(|h| BuildStatus {
            done: h.is_build_done,
            error: h.build_error,
            last_build_time: h.last_build_time,
        }))
    }

    pub fn insert(&self, records: &[InsertRecord]) -> Result<()> {
        let published = self.ensure_fresh()?;
        if !published.hasher.is_generated() {
            return Err(Error::BuildInProgress);
        }

        let mut bucket_records = Vec::with_capacity(records.len());
        for record in records {
            let hashes = published.hasher.hashes(&record.vector)?;
            let hashes = hashes
                .into_iter()
                .map(|(table, key)| (table.to_string(), key))
                .collect();
            bucket_records.push(crate::store::BucketRecord {
                id: record.id.clone(),
                vector: record.vector.clone(),
                hashes,
            });
        }
        self.store
            .insert_many(&published.collection, &bucket_records)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let published = self.ensure_fresh()?;
        if !published.hasher.is_generated() {
            return Err(Error::BuildInProgress);
        }
        self.store.delete(&published.collection, id)
    }

    /// Candidate retrieval (AND across all tables) + exact re-rank + threshold
    /// + top-K, deterministically ordered by distance then id.
    pub fn query(&self, request: &QueryRequest, k: usize) -> Result<Vec<QueryHit>> {
        let published = self.ensure_fresh()?;
        if !published.hasher.is_generated() {
            return Err(Error::BuildInProgress);
        }

        let q = match request {
            QueryRequest::Vector(v) => v.clone(),
            QueryRequest::Id(id) => {
                self.store
                    .get_by_id(&published.collection, id)?
                    .ok_or_else(|| Error::IdUnknown(id.clone()))?
                    .vector
            }
        };
        let q = &q;

        let hashes = published.hasher.hashes(q)?;
        let mut filter = Filter::new();
        for (table, key) in &hashes {
            filter = filter.eq(table.to_string(), *key);
        }

        let candidates =
            self.store
                .find(&published.collection, &filter, self.config.max_candidates)?;

        let mut survivors: Vec<QueryHit> = candidates
            .into_iter()
            .filter_map(|c| {
                let (dist, valid) = published.hasher.distance(q, &c.vector);
                if valid && dist <= self.config.distance_threshold {
                    Some(QueryHit {
                        id: c.id,
                        distance: dist,
                    })
                } else {
                    None
                }
            })
            .collect();

        survivors.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });

        let k = self.config.clamp_k(k);
        survivors.truncate(k);
        Ok(survivors)
    }

    pub fn size(&self) -> Result<i64> {
        let published = self.ensure_fresh()?;
        self.store.estimated_count(&published.collection)
    }

    /// Checks the helper record and, if a newer build was published since our
    /// last observation, reloads the cached hasher/collection. Fails with
    /// `BuildInProgress` if a build is running or the last one failed.
    fn ensure_fresh(&self) -> Result<Arc<Published>> {
        let helper = match self.store.get_helper()? {
            Some(helper) => helper,
            None => return Ok(self.published.load_full()),
        };
        if !helper.is_build_done || !helper.build_error.is_empty() {
            return Err(Error::BuildInProgress);
        }

        let current = self.published.load_full();
        if helper.last_build_time > current.build_time {
            let hasher = Hasher::load(&helper.hasher)?;
            let refreshed = Arc::new(Published {
                hasher,
                collection: helper.hash_coll_name,
                build_time: helper.last_build_time,
            });
            self.published.store(refreshed.clone());
            return Ok(refreshed);
        }
        Ok(current)
    }
}

fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::test_config;
    use crate::metric::Metric;
    use crate::stats::from_batch;
    use crate::store::mem::MemoryBucketStore;

    fn new_service(metric: Metric) -> IndexService {
        let store: Arc<dyn BucketStore> = Arc::new(MemoryBucketStore::new());
        IndexService::new(store, test_config(3, metric)).unwrap()
    }

    fn v(xs: &[f64]) -> Vector {
        Vector::from_vec(xs.to_vec())
    }

    #[test]
    fn test_operations_before_any_build_fail_with_build_in_progress() {
        let service = new_service(Metric::Euclidean);
        let err = service
            .query(&QueryRequest::Vector(v(&[0., 0., 0.])), 1)
            .unwrap_err();
        assert!(matches!(err, Error::BuildInProgress));
        assert!(matches!(service.delete("x"), Err(Error::BuildInProgress)));
    }

    #[test]
    fn test_build_then_insert_then_query_scenario_s6() {
        let service = new_service(Metric::Euclidean);
        let a = v(&[1., 0., 0.]);
        let b = v(&[0.9, 0.1, 0.]);
        let c = v(&[-1., 0., 0.]);
        let stats = from_batch(&[a.clone(), b.clone(), c.clone()]);
        service.build_index(&stats).unwrap();

        service
            .insert(&[
                InsertRecord {
                    id: "A".into(),
                    vector: a.clone(),
                },
                InsertRecord {
                    id: "B".into(),
                    vector: b,
                },
                InsertRecord {
                    id: "C".into(),
                    vector: c,
                },
            ])
            .unwrap();

        let hits = service.query(&QueryRequest::Vector(a), 2).unwrap();
        assert!(hits.iter().any(|h| h.id == "A" && h.distance < 1e-9));
        assert!(hits.iter().all(|h| h.id != "C"));
    }

    #[test]
    fn test_query_by_id_resolves_stored_vector() {
        let service = new_service(Metric::Euclidean);
        let a = v(&[1., 0., 0.]);
        let b = v(&[0.9, 0.1, 0.]);
        let stats = from_batch(&[a.clone(), b.clone()]);
        service.build_index(&stats).unwrap();
        service
            .insert(&[
                InsertRecord {
                    id: "A".into(),
                    vector: a,
                },
                InsertRecord {
                    id: "B".into(),
                    vector: b,
                },
            ])
            .unwrap();

        let hits = service
            .query(&QueryRequest::Id("A".into()), 2)
            .unwrap();
        assert!(hits.iter().any(|h| h.id == "A" && h.distance < 1e-9));
    }

    #[test]
    fn test_query_by_unknown_id_fails() {
        let service = new_service(Metric::Euclidean);
        let stats = from_batch(&[v(&[0., 0., 0.]), v(&[1., 1., 1.])]);
        service.build_index(&stats).unwrap();

        let err = service
            .query(&QueryRequest::Id("missing".into()), 1)
            .unwrap_err();
        assert!(matches!(err, Error::IdUnknown(id) if id == "missing"));
    }

    #[test]
    fn test_rebuild_publishes_new_collection_and_drops_old() {
        let service = new_service(Metric::Euclidean);
        let vecs = [v(&[0., 0., 0.]), v(&[1., 1., 1.]), v(&[2., 2., 2.])];
        let stats = from_batch(&vecs);
        service.build_index(&stats).unwrap();
        service
            .insert(&[InsertRecord {
                id: "x".into(),
                vector: vecs[0].clone(),
            }])
            .unwrap();
        let first_collection = service.published.load_full().collection.clone();

        service.build_index(&stats).unwrap();
        let second_collection = service.published.load_full().collection.clone();
        assert_ne!(first_collection, second_collection);
        assert!(!service.store.has_collection(&first_collection).unwrap());
    }

    #[test]
    fn test_second_concurrent_build_is_rejected() {
        let service = new_service(Metric::Angular);
        let _guard = service.build_lock.lock();
        let stats = from_batch(&[v(&[1., 0., 0.]), v(&[0., 1., 0.])]);
        assert!(matches!(
            service.build_index(&stats),
            Err(Error::BuildInProgress)
        ));
    }

    #[test]
    fn test_query_results_sorted_and_thresholded() {
        let service = new_service(Metric::Euclidean);
        let near = v(&[1., 0., 0.]);
        let far = v(&[10., 10., 10.]);
        let origin = v(&[0., 0., 0.]);
        let stats = from_batch(&[near.clone(), far.clone(), origin.clone()]);
        service.build_index(&stats).unwrap();
        service
            .insert(&[
                InsertRecord {
                    id: "near".into(),
                    vector: near,
                },
                InsertRecord {
                    id: "far".into(),
                    vector: far,
                },
            ])
            .unwrap();

        let hits = service
            .query(&QueryRequest::Vector(origin), 10)
            .unwrap();
        for w in hits.windows(2) {
            assert!(w[0].distance <= w[1].distance);
        }
        assert!(hits.iter().all(|h| h.distance <= service.config.distance_threshold));
    }

    proptest::proptest! {
        #[test]
        fn test_insert_delete_count_invariant(
            ops in proptest::collection::vec(
                (0..5usize, proptest::bool::ANY, proptest::collection::vec(-5.0f64..5.0, 3)),
                1..30,
            )
        ) {
            let service = new_service(Metric::Euclidean);
            let stats = from_batch(&[v(&[0., 0., 0.]), v(&[1., 1., 1.]), v(&[-1., -1., -1.])]);
            service.build_index(&stats).unwrap();

            let mut present = std::collections::HashSet::new();
            for (id_idx, is_insert, coords) in ops {
                let id = format!("id-{}", id_idx);
                if is_insert {
                    service
                        .insert(&[InsertRecord {
                            id: id.clone(),
                            vector: Vector::from_vec(coords),
                        }])
                        .unwrap();
                    present.insert(id);
                } else {
                    service.delete(&id).unwrap();
                    present.remove(&id);
                }
            }
            proptest::prop_assert_eq!(service.size().unwrap() as usize, present.len());
        }
    }
}
