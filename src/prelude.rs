//! Re-export of the crate's public API.
pub use crate::config::ServiceConfig;
pub use crate::error::{Error, Result};
pub use crate::hasher::{Hasher, HasherConfig};
pub use crate::index::{BuildStatus, IndexService, InsertRecord, QueryHit, QueryRequest};
pub use crate::metric::Metric;
pub use crate::stats::DatasetStats;
pub use crate::store::mem::MemoryBucketStore;
#[cfg(feature = "sqlite")]
pub use crate::store::sqlite::SqliteBucketStore;
pub use crate::store::{BucketRecord, BucketStore, Filter, HelperRecord};
pub use crate::vector::Vector;
