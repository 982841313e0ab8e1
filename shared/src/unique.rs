use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(0);

/// A process-unique identity token.
///
/// The only observable properties are equality with itself and a stable hash.
/// Block hashes and note identities are modelled as `Unique` values rather
/// than cryptographic digests; forging one is impossible short of copying it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Unique(u64);

impl Unique {
    /// Allocates a token distinct from every other token in this process.
    #[must_use]
    pub fn fresh() -> Self {
        Self(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for Unique {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_tokens_are_distinct() {
        let a = Unique::fresh();
        let b = Unique::fresh();

        assert_eq!(a, a);
        assert_ne!(a, b);
    }

    #[test]
    fn test_tokens_hash_stably() {
        let a = Unique::fresh();
        let mut set = HashSet::new();

        assert!(set.insert(a));
        assert!(!set.insert(a));
        assert!(set.contains(&a));
    }
}
