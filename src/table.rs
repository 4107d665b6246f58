//! A single hash table: `L` hyperplanes whose side-bits concatenate into one bucket key.
use crate::error::{Error, Result};
use crate::metric::Metric;
use crate::plane::Plane;
use crate::vector::Vector;
use log::{debug, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// How many times plane generation resamples a degenerate (all-zero) normal
/// before giving up with [`Error::DegenerateStats`].
const MAX_DEGENERATE_RETRIES: u32 = 8;

/// One of the `P` tables making up a [`crate::hasher::Hasher`]: an ordered list of
/// exactly `L` planes. Bit `i` of a key is plane `i`'s side (LSB = plane 0).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HasherTable {
    planes: Vec<Plane>,
}

impl HasherTable {
    /// Generate `l` planes from the dataset's per-coordinate standard-deviation profile.
    ///
    /// `sigma` scales each plane's normal; for the `Euclidean` metric the offset
    /// is additionally drawn uniformly from `[-bias * bias_multiplier, bias *
    /// bias_multiplier]`, while `Angular` planes always pass through the origin
    /// (`d = 0`).
    pub fn generate(
        l: usize,
        metric: Metric,
        sigma: &Vector,
        bias: f64,
        bias_multiplier: f64,
        rng: &mut impl Rng,
    ) -> Result<Self> {
        let mut planes = Vec::with_capacity(l);
        for _ in 0..l {
            planes.push(Self::generate_plane(metric, sigma, bias, bias_multiplier, rng)?);
        }
        Ok(HasherTable { planes })
    }

    fn generate_plane(
        metric: Metric,
        sigma: &Vector,
        bias: f64,
        bias_multiplier: f64,
        rng: &mut impl Rng,
    ) -> Result<Plane> {
        for attempt in 0..MAX_DEGENERATE_RETRIES {
            let normal = Self::sample_normal(sigma, rng);
            if !normal.is_zero() {
                let offset = match metric {
                    Metric::Angular => 0.0,
                    Metric::Euclidean => {
                        let bound = bias * bias_multiplier;
                        if bound > 0.0 {
                            rng.gen_range(-bound, bound)
                        } else {
                            0.0
                        }
                    }
                };
                return Ok(Plane::new(normal, offset));
            }
            debug!(
                "degenerate hyperplane normal on attempt {}/{}, resampling",
                attempt + 1,
                MAX_DEGENERATE_RETRIES
            );
        }
        warn!(
            "exhausted {} retries generating a nonzero hyperplane normal",
            MAX_DEGENERATE_RETRIES
        );
        Err(Error::DegenerateStats)
    }

    fn sample_normal(sigma: &Vector, rng: &mut impl Rng) -> Vector {
        let coords: Vec<f64> = sigma
            .as_slice()
            .iter()
            .map(|&s| if s > 0.0 { rng.gen_range(-s, s) } else { 0.0 })
            .collect();
        Vector::from_vec(coords)
    }

    /// Assemble the `L`-bit bucket key for `x`, relative to reference origin `mu`.
    pub fn key(&self, x: &Vector, mu: &Vector) -> u64 {
        let mut key = 0u64;
        for (i, plane) in self.planes.iter().enumerate() {
            key |= plane.bit(x, mu) << i;
        }
        key
    }

    pub fn len(&self) -> usize {
        self.planes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.planes.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_generate_angular_planes_pass_through_origin() {
        let mut rng = rand::rngs::SmallRng::seed_from_u64(7);
        let sigma = Vector::from_vec(vec![1., 1., 1.]);
        let table = HasherTable::generate(4, Metric::Angular, &sigma, 0.0, 0.0, &mut rng).unwrap();
        assert_eq!(table.len(), 4);
        let mu = Vector::from_vec(vec![0., 0., 0.]);
        // A point exactly at mu sits on the boundary of every plane (offset 0),
        // so the tie-break rule must send the whole key to 0.
        assert_eq!(table.key(&mu, &mu), 0);
    }

    #[test]
    fn test_generate_euclidean_offsets_are_bounded() {
        let mut rng = rand::rngs::SmallRng::seed_from_u64(11);
        let sigma = Vector::from_vec(vec![2., 2.]);
        let bias = 4.0;
        let bias_multiplier = 2.0;
        let table =
            HasherTable::generate(32, Metric::Euclidean, &sigma, bias, bias_multiplier, &mut rng)
                .unwrap();
        let bound = bias * bias_multiplier;
        for plane in &table.planes {
            assert!(plane.offset.abs() <= bound);
        }
    }

    #[test]
    fn test_degenerate_sigma_fails_after_retries() {
        let mut rng = rand::rngs::SmallRng::seed_from_u64(1);
        let sigma = Vector::from_vec(vec![0., 0., 0.]);
        let result = HasherTable::generate(1, Metric::Angular, &sigma, 1.0, 1.0, &mut rng);
        assert!(matches!(result, Err(Error::DegenerateStats)));
    }

    #[test]
    fn test_key_bit_order_lsb_is_plane_zero() {
        // Plane 0 sends x to the positive side, plane 1 does not: key should be 0b01.
        let p0 = Plane::new(Vector::from_vec(vec![1., 0.]), 0.0);
        let p1 = Plane::new(Vector::from_vec(vec![-1., 0.]), 0.0);
        let table = HasherTable {
            planes: vec![p0, p1],
        };
        let mu = Vector::from_vec(vec![0., 0.]);
        let x = Vector::from_vec(vec![1., 0.]);
        assert_eq!(table.key(&x, &mu), 0b01);
    }
}
