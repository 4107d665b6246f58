//! Dataset statistics used to seed a hasher build.
use crate::vector::Vector;

/// Per-coordinate mean and standard deviation, supplied by the caller at build
/// time. The core never computes these from raw samples in production code
/// paths; streaming estimation of either is out of scope for this crate.
#[derive(Debug, Clone)]
pub struct DatasetStats {
    pub mean: Vector,
    pub std_dev: Vector,
}

impl DatasetStats {
    pub fn new(mean: Vector, std_dev: Vector) -> Self {
        DatasetStats { mean, std_dev }
    }
}

/// Derive `DatasetStats` from a batch of same-length vectors. Test-fixture
/// convenience only: production callers compute these upstream (possibly over
/// a far larger or streaming sample) and construct `DatasetStats` directly.
#[cfg(test)]
pub(crate) fn from_batch(vectors: &[Vector]) -> DatasetStats {
    let dims = vectors[0].len();
    let n = vectors.len() as f64;

    let mut mean = vec![0.0; dims];
    for v in vectors {
        for (i, &c) in v.as_slice().iter().enumerate() {
            mean[i] += c;
        }
    }
    for m in mean.iter_mut() {
        *m /= n;
    }

    let mut var = vec![0.0; dims];
    for v in vectors {
        for (i, &c) in v.as_slice().iter().enumerate() {
            var[i] += (c - mean[i]).powi(2);
        }
    }
    let std_dev: Vec<f64> = var.into_iter().map(|v| (v / n).sqrt()).collect();

    DatasetStats::new(Vector::from_vec(mean), Vector::from_vec(std_dev))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_from_batch_mean_and_std() {
        let vectors = vec![
            Vector::from_vec(vec![0., 0.]),
            Vector::from_vec(vec![2., 2.]),
        ];
        let stats = from_batch(&vectors);
        assert_eq!(stats.mean.as_slice(), &[1., 1.]);
        assert_eq!(stats.std_dev.as_slice(), &[1., 1.]);
    }
}
