use rand::seq::SliceRandom;

/// Up to `n` distinct drivers drawn uniformly from `pool`, without touching
/// the pool itself. Asking for at least the whole pool returns all of it,
/// shuffled.
pub fn pick_random_drivers(pool: &[String], n: usize) -> Vec<String> {
    if n == 0 || pool.is_empty() {
        return Vec::new();
    }

    let mut picked = pool.to_vec();
    picked.shuffle(&mut rand::thread_rng());
    picked.truncate(n);
    picked
}
