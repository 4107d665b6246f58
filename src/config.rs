//! Service-level configuration, constructed once by the (out-of-scope) façade.
use crate::error::{Error, Result};
use crate::hasher::HasherConfig;
use crate::metric::Metric;
use std::time::Duration;

/// Every knob the `IndexService` recognizes. Never read from process-wide
/// environment state inside the core; the façade parses environment/CLI/file
/// configuration and constructs one of these.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub dims: usize,
    pub permutations: usize,
    pub planes_per_table: usize,
    pub metric: Metric,
    pub distance_threshold: f64,
    pub bias: f64,
    pub bias_multiplier: f64,
    pub seed: u64,
    /// Cap on candidates fetched from the `BucketStore` per query.
    pub max_candidates: usize,
    /// Cap on `K` returned by a query.
    pub max_nn: usize,
    /// Per-call deadline a `BucketStore` backend is constructed with (e.g. the
    /// SQLite backend's `busy_timeout`); the façade reads this when building
    /// the store it hands to `IndexService::new`.
    pub db_client_timeout: Duration,
    /// Max duration `BucketStore::create_indexes` spends per collection
    /// before giving up; also passed to the backend at construction time.
    pub create_index_max_time: Duration,
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.permutations == 0 {
            return Err(Error::ConfigInvalid("permutations must be > 0".into()));
        }
        if self.max_candidates == 0 {
            return Err(Error::ConfigInvalid("max_candidates must be > 0".into()));
        }
        if self.max_nn == 0 {
            return Err(Error::ConfigInvalid("max_nn must be > 0".into()));
        }
        self.hasher_config().validate()
    }

    pub(crate) fn hasher_config(&self) -> HasherConfig {
        HasherConfig {
            dims: self.dims,
            permutations: self.permutations,
            planes_per_table: self.planes_per_table,
            metric: self.metric,
            distance_threshold: self.distance_threshold,
            bias: self.bias,
            bias_multiplier: self.bias_multiplier,
            seed: self.seed,
        }
    }

    /// `K` clamped to `[1, max_nn]`.
    pub(crate) fn clamp_k(&self, k: usize) -> usize {
        k.max(1).min(self.max_nn)
    }
}

#[cfg(test)]
pub(crate) fn test_config(dims: usize, metric: Metric) -> ServiceConfig {
    ServiceConfig {
        dims,
        permutations: 4,
        planes_per_table: 8,
        metric,
        distance_threshold: 1.0,
        bias: 2.0,
        bias_multiplier: 2.0,
        seed: 7,
        max_candidates: 100,
        max_nn: 10,
        db_client_timeout: Duration::from_secs(1),
        create_index_max_time: Duration::from_secs(5),
    }
}
