//! Short random identifiers for engine entities.

use rand::{Rng, distributions::Alphanumeric};

/// Generate a prefixed id with a short random alphanumeric suffix.
pub fn fresh_id(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(8)
        .collect();
    format!("{prefix}-{suffix}")
}
