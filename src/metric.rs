//! Distance metrics supported by the hasher.
use crate::vector::Vector;
use serde::{Deserialize, Serialize};

/// Which notion of distance a [`crate::hasher::Hasher`] is built for.
///
/// The metric governs both how [`crate::table::HasherTable`] generates its planes
/// (`Euclidean` draws a nonzero offset, `Angular` pins planes through the origin)
/// and how exact re-ranking distance is computed (see [`distance`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    Angular,
    Euclidean,
}

/// Exact distance between `a` and `b` under `metric`, plus a validity flag.
///
/// Angular distance is undefined (flag `false`) when either input is the zero
/// vector, since cosine similarity has no defined value there.
pub fn distance(metric: Metric, a: &Vector, b: &Vector) -> (f64, bool) {
    match metric {
        Metric::Euclidean => (a.sub(b).norm(), true),
        Metric::Angular => {
            if a.is_zero() || b.is_zero() {
                (0.0, false)
            } else {
                let cosine = a.dot(b) / (a.norm() * b.norm());
                let d = (1.0 - cosine).max(0.0).min(2.0);
                (d, true)
            }
        }
    }
}
