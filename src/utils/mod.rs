use ndarray::ArrayView2;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Seeded generator for reproducible runs, otherwise one seeded from the thread RNG.
pub(crate) fn make_rng(seed: Option<u64>) -> ChaCha8Rng {
    match seed {
        Some(s) => ChaCha8Rng::seed_from_u64(s),
        None => ChaCha8Rng::from_rng(&mut rand::rng()),
    }
}

pub(crate) fn all_finite(values: ArrayView2<f64>) -> bool {
    values.iter().all(|v| v.is_finite())
}
