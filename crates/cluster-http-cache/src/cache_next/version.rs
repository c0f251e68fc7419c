//! Write generation tags.

use rand::Rng;

/// A random non-zero version distinct from `previous`.
pub(crate) fn next_version(previous: Option<i32>) -> i32 {
    let mut rng = rand::thread_rng();
    loop {
        let version = rng.gen_range(1..=i32::MAX);
        if Some(version) != previous {
            return version;
        }
    }
}
