use rand::rngs::SmallRng;
use rand::SeedableRng;

/// Seed a fast, non-cryptographic RNG. A `seed` of `0` seeds from OS entropy;
/// any other value gives reproducible table generation.
pub fn create_rng(seed: u64) -> SmallRng {
    if seed == 0 {
        SmallRng::from_entropy()
    } else {
        SmallRng::seed_from_u64(seed)
    }
}
