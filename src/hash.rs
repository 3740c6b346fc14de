//! Hasher for the reconciler's internal maps.
//!
//! Keys hashed here are element keys and child indices chosen by the
//! embedding application's own render functions, so flooding resistance buys
//! nothing. A fixed-seed foldhash keeps the builder zero-sized and the
//! iteration order of equal inputs identical from run to run.

use std::hash::BuildHasher;

use foldhash::fast::{FixedState, FoldHasher};

/// Zero-sized, deterministic [`BuildHasher`] backed by foldhash.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct FastHashBuilder;

impl BuildHasher for FastHashBuilder {
    type Hasher = FoldHasher<'static>;

    #[inline]
    fn build_hasher(&self) -> Self::Hasher {
        FixedState::with_seed(0x9e37_79b9_7f4a_7c15).build_hasher()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::Key;

    #[test]
    fn builder_carries_no_state() {
        assert_eq!(std::mem::size_of::<FastHashBuilder>(), 0);
    }

    #[test]
    fn equal_keys_hash_alike_across_builders() {
        let a = FastHashBuilder.hash_one(Key::from("row-1"));
        let b = FastHashBuilder.hash_one(Key::from(String::from("row-1")));
        assert_eq!(a, b);
        assert_ne!(a, FastHashBuilder.hash_one(Key::from("row-2")));
    }
}
