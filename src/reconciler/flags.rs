//! Fiber effect flags.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Side effects recorded on a fiber during render and applied at commit.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct Flags(u32);

impl Flags {
    /// No effects.
    pub const NONE: Flags = Flags(0);
    /// The fiber's render function ran in this pass.
    pub const PERFORMED_WORK: Flags = Flags(1 << 0);
    /// Insert or move the fiber's host nodes.
    pub const PLACEMENT: Flags = Flags(1 << 1);
    /// Apply changed props or text to the existing host node.
    pub const UPDATE: Flags = Flags(1 << 2);
    /// At least one child is listed in `deletions`.
    pub const CHILD_DELETION: Flags = Flags(1 << 4);
    /// Clear text content set directly on the host node.
    pub const CONTENT_RESET: Flags = Flags(1 << 5);
    /// Attach or detach a ref.
    pub const REF: Flags = Flags(1 << 9);
    /// Created by the non-tracking (mount) reconciler.
    pub const FORKED: Flags = Flags(1 << 20);
    /// Static: the fiber carries a ref.
    pub const REF_STATIC: Flags = Flags(1 << 21);
    /// Static: the fiber has layout effects.
    pub const LAYOUT_STATIC: Flags = Flags(1 << 22);
    /// Static: the fiber has passive effects.
    pub const PASSIVE_STATIC: Flags = Flags(1 << 23);

    /// Flags that describe the fiber rather than one render, and survive
    /// `create_work_in_progress`.
    pub const STATIC_MASK: Flags =
        Flags(Self::REF_STATIC.0 | Self::LAYOUT_STATIC.0 | Self::PASSIVE_STATIC.0);

    /// Flags handled by the mutation phase of commit.
    pub const MUTATION_MASK: Flags = Flags(
        Self::PLACEMENT.0 | Self::UPDATE.0 | Self::CHILD_DELETION.0 | Self::CONTENT_RESET.0 | Self::REF.0,
    );

    /// Raw bits.
    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// True if no flag is set.
    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True if every flag in `other` is set.
    #[inline]
    pub const fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if any flag in `other` is set.
    #[inline]
    pub const fn intersects(self, other: Flags) -> bool {
        self.0 & other.0 != 0
    }

    /// Flags in both sets.
    #[inline]
    pub const fn intersection(self, other: Flags) -> Flags {
        Flags(self.0 & other.0)
    }

    /// Set `other`.
    #[inline]
    pub fn insert(&mut self, other: Flags) {
        self.0 |= other.0;
    }

    /// Clear `other`.
    #[inline]
    pub fn remove(&mut self, other: Flags) {
        self.0 &= !other.0;
    }
}

impl BitOr for Flags {
    type Output = Flags;

    #[inline]
    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl BitOrAssign for Flags {
    #[inline]
    fn bitor_assign(&mut self, rhs: Flags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(Flags, &str); 10] = [
            (Flags::PERFORMED_WORK, "PERFORMED_WORK"),
            (Flags::PLACEMENT, "PLACEMENT"),
            (Flags::UPDATE, "UPDATE"),
            (Flags::CHILD_DELETION, "CHILD_DELETION"),
            (Flags::CONTENT_RESET, "CONTENT_RESET"),
            (Flags::REF, "REF"),
            (Flags::FORKED, "FORKED"),
            (Flags::REF_STATIC, "REF_STATIC"),
            (Flags::LAYOUT_STATIC, "LAYOUT_STATIC"),
            (Flags::PASSIVE_STATIC, "PASSIVE_STATIC"),
        ];
        let mut set = f.debug_set();
        for (flag, name) in NAMES {
            if self.contains(flag) {
                set.entry(&format_args!("{name}"));
            }
        }
        set.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_flags_are_not_mutations() {
        assert!(!Flags::STATIC_MASK.intersects(Flags::MUTATION_MASK));
        assert!(Flags::MUTATION_MASK.contains(Flags::PLACEMENT | Flags::CHILD_DELETION));
    }

    #[test]
    fn debug_lists_set_flags() {
        let flags = Flags::PLACEMENT | Flags::UPDATE;
        assert_eq!(format!("{flags:?}"), "{PLACEMENT, UPDATE}");
        assert_eq!(format!("{:?}", Flags::NONE), "{}");
    }
}
