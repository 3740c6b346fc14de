//! Priority lanes.
//!
//! Pending work is described by a 31-bit set. Each bit is a *lane*; the lower
//! the bit index, the more urgent the lane. Lanes are grouped into named
//! classes (sync, continuous input, default, sixteen transition lanes, five
//! retry lanes, idle, offscreen, and hydration variants sitting right above
//! the lane they hydrate for).
//!
//! A [`Lanes`] value is any subset of the 31 bits. A [`Lane`] is the same type
//! conventionally holding one bit, usually obtained from
//! [`Lanes::highest_priority_lane`].
//!
//! The scheduler never sees raw lanes: [`lanes_to_event_priority`] snaps a set
//! to one of four [`EventPriority`] buckets, and
//! [`EventPriority::to_scheduler_priority`] is the only bridge to
//! [`PriorityLevel`].

use std::fmt;
use std::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign};

use crate::error::invariant_violation;
use crate::scheduler::PriorityLevel;

/// Number of usable lanes.
pub const TOTAL_LANES: usize = 31;

const ALL_BITS: u32 = (1 << TOTAL_LANES) - 1;

/// A set of lanes.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Default, PartialOrd, Ord)]
pub struct Lanes(u32);

/// A single lane. Same representation as [`Lanes`].
pub type Lane = Lanes;

impl Lanes {
    /// The empty set.
    pub const NONE: Lanes = Lanes(0);

    /// Discrete user input (clicks, key presses) and legacy sync roots.
    pub const SYNC: Lane = Lanes(0b0000000000000000000000000000001);
    /// Hydration of continuous-input work.
    pub const INPUT_CONTINUOUS_HYDRATION: Lane = Lanes(0b0000000000000000000000000000010);
    /// Continuous input such as pointer moves and scrolling.
    pub const INPUT_CONTINUOUS: Lane = Lanes(0b0000000000000000000000000000100);
    /// Hydration of default-priority work.
    pub const DEFAULT_HYDRATION: Lane = Lanes(0b0000000000000000000000000001000);
    /// Updates outside of any event.
    pub const DEFAULT: Lane = Lanes(0b0000000000000000000000000010000);
    /// Hydration of transition work.
    pub const TRANSITION_HYDRATION: Lane = Lanes(0b0000000000000000000000000100000);
    /// All sixteen transition lanes.
    pub const TRANSITIONS: Lanes = Lanes(0b0000000001111111111111111000000);
    /// First transition lane.
    pub const TRANSITION_1: Lane = Lanes(1 << 6);
    /// Last transition lane.
    pub const TRANSITION_16: Lane = Lanes(1 << 21);
    /// All five retry lanes.
    pub const RETRIES: Lanes = Lanes(0b0000111110000000000000000000000);
    /// First retry lane.
    pub const RETRY_1: Lane = Lanes(1 << 22);
    /// Last retry lane.
    pub const RETRY_5: Lane = Lanes(1 << 26);
    /// Hydration forced by a user interaction.
    pub const SELECTIVE_HYDRATION: Lane = Lanes(0b0001000000000000000000000000000);
    /// Every lane that is not idle or offscreen.
    pub const NON_IDLE: Lanes = Lanes(0b0001111111111111111111111111111);
    /// Hydration of idle work.
    pub const IDLE_HYDRATION: Lane = Lanes(0b0010000000000000000000000000000);
    /// Work that only runs when nothing else is pending.
    pub const IDLE: Lane = Lanes(0b0100000000000000000000000000000);
    /// Pre-rendering of hidden trees.
    pub const OFFSCREEN: Lane = Lanes(0b1000000000000000000000000000000);

    /// Lanes that block the host from painting: continuous input and default,
    /// including their hydration variants.
    pub const BLOCKING: Lanes = Lanes(
        Self::INPUT_CONTINUOUS_HYDRATION.0
            | Self::INPUT_CONTINUOUS.0
            | Self::DEFAULT_HYDRATION.0
            | Self::DEFAULT.0,
    );

    /// Every usable lane.
    pub const ALL: Lanes = Lanes(ALL_BITS);

    /// Build a set from raw bits. Bit 31 is discarded.
    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        Lanes(bits & ALL_BITS)
    }

    /// The lane at `index`.
    #[inline]
    pub const fn from_index(index: usize) -> Lane {
        debug_assert!(index < TOTAL_LANES);
        Lanes(1 << index)
    }

    /// Raw bits.
    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// True if no lane is set.
    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Union.
    #[inline]
    #[must_use]
    pub const fn merge(self, other: Lanes) -> Lanes {
        Lanes(self.0 | other.0)
    }

    /// Intersection.
    #[inline]
    #[must_use]
    pub const fn intersect(self, other: Lanes) -> Lanes {
        Lanes(self.0 & other.0)
    }

    /// `self` without the lanes of `subset`.
    #[inline]
    #[must_use]
    pub const fn remove(self, subset: Lanes) -> Lanes {
        Lanes(self.0 & !subset.0)
    }

    /// True if the two sets share at least one lane.
    #[inline]
    pub const fn includes_some(self, other: Lanes) -> bool {
        self.0 & other.0 != 0
    }

    /// True if every lane of `subset` is in `self`.
    #[inline]
    pub const fn contains(self, subset: Lanes) -> bool {
        self.0 & subset.0 == subset.0
    }

    /// The most urgent lane of the set, `lanes & -lanes`.
    #[inline]
    #[must_use]
    pub const fn highest_priority_lane(self) -> Lane {
        Lanes(self.0 & self.0.wrapping_neg())
    }

    /// Index of the highest set bit. For a single lane this is its position.
    ///
    /// Must not be called on the empty set.
    #[inline]
    pub const fn index(self) -> usize {
        debug_assert!(self.0 != 0);
        31 - self.0.leading_zeros() as usize
    }

    /// Iterate over `(index, lane)` pairs, most urgent first.
    #[inline]
    pub fn iter(self) -> LaneIter {
        LaneIter(self.0)
    }

    /// Number of lanes in the set.
    #[inline]
    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }

    /// Class of the most urgent lane, `None` for the empty set.
    pub fn class(self) -> Option<LaneClass> {
        if self.is_empty() {
            return None;
        }
        let class = match self.highest_priority_lane().0.trailing_zeros() {
            0 => LaneClass::Sync,
            1 => LaneClass::InputContinuousHydration,
            2 => LaneClass::InputContinuous,
            3 => LaneClass::DefaultHydration,
            4 => LaneClass::Default,
            5 => LaneClass::TransitionHydration,
            6..=21 => LaneClass::Transition,
            22..=26 => LaneClass::Retry,
            27 => LaneClass::SelectiveHydration,
            28 => LaneClass::IdleHydration,
            29 => LaneClass::Idle,
            _ => LaneClass::Offscreen,
        };
        Some(class)
    }

    /// True if the set contains the sync lane.
    #[inline]
    pub const fn includes_sync(self) -> bool {
        self.includes_some(Self::SYNC)
    }

    /// True if any lane is neither idle nor offscreen.
    #[inline]
    pub const fn includes_non_idle_work(self) -> bool {
        self.includes_some(Self::NON_IDLE)
    }

    /// True if every lane is a retry lane.
    #[inline]
    pub const fn includes_only_retries(self) -> bool {
        self.0 & Self::RETRIES.0 == self.0
    }

    /// True if every lane is a transition lane.
    #[inline]
    pub const fn includes_only_transitions(self) -> bool {
        self.0 & Self::TRANSITIONS.0 == self.0
    }

    /// True if no lane needs an urgent render.
    #[inline]
    pub const fn includes_only_non_urgent(self) -> bool {
        const URGENT: u32 = Lanes::SYNC.0 | Lanes::INPUT_CONTINUOUS.0 | Lanes::DEFAULT.0;
        self.0 & URGENT == 0
    }

    /// True if the set contains a lane that must not be time sliced.
    #[inline]
    pub const fn includes_blocking(self) -> bool {
        self.includes_some(Self::BLOCKING)
    }

    /// True if the set contains a transition lane.
    #[inline]
    pub const fn is_transition(self) -> bool {
        self.includes_some(Self::TRANSITIONS)
    }
}

impl BitOr for Lanes {
    type Output = Lanes;

    #[inline]
    fn bitor(self, rhs: Lanes) -> Lanes {
        self.merge(rhs)
    }
}

impl BitOrAssign for Lanes {
    #[inline]
    fn bitor_assign(&mut self, rhs: Lanes) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Lanes {
    type Output = Lanes;

    #[inline]
    fn bitand(self, rhs: Lanes) -> Lanes {
        self.intersect(rhs)
    }
}

impl BitAndAssign for Lanes {
    #[inline]
    fn bitand_assign(&mut self, rhs: Lanes) {
        self.0 &= rhs.0;
    }
}

impl FromIterator<Lane> for Lanes {
    fn from_iter<I: IntoIterator<Item = Lane>>(iter: I) -> Self {
        iter.into_iter().fold(Lanes::NONE, Lanes::merge)
    }
}

impl fmt::Debug for Lanes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lanes({:#033b})", self.0)
    }
}

impl fmt::Binary for Lanes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Binary::fmt(&self.0, f)
    }
}

/// Iterator over the lanes of a set, see [`Lanes::iter`].
#[derive(Clone, Debug)]
pub struct LaneIter(u32);

impl Iterator for LaneIter {
    type Item = (usize, Lane);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        if self.0 == 0 {
            return None;
        }
        let index = self.0.trailing_zeros() as usize;
        let lane = 1 << index;
        self.0 &= !lane;
        Some((index, Lanes(lane)))
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.0.count_ones() as usize;
        (n, Some(n))
    }
}

impl ExactSizeIterator for LaneIter {}

/// Named lane ranges.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum LaneClass {
    /// [`Lanes::SYNC`]
    Sync,
    /// [`Lanes::INPUT_CONTINUOUS_HYDRATION`]
    InputContinuousHydration,
    /// [`Lanes::INPUT_CONTINUOUS`]
    InputContinuous,
    /// [`Lanes::DEFAULT_HYDRATION`]
    DefaultHydration,
    /// [`Lanes::DEFAULT`]
    Default,
    /// [`Lanes::TRANSITION_HYDRATION`]
    TransitionHydration,
    /// One of [`Lanes::TRANSITIONS`]
    Transition,
    /// One of [`Lanes::RETRIES`]
    Retry,
    /// [`Lanes::SELECTIVE_HYDRATION`]
    SelectiveHydration,
    /// [`Lanes::IDLE_HYDRATION`]
    IdleHydration,
    /// [`Lanes::IDLE`]
    Idle,
    /// [`Lanes::OFFSCREEN`]
    Offscreen,
}

impl LaneClass {
    /// How long a pending lane of this class may wait before it is treated
    /// as expired, in milliseconds. `None` means it never expires.
    pub const fn expiration_timeout(self) -> Option<i64> {
        match self {
            LaneClass::Sync | LaneClass::InputContinuousHydration | LaneClass::InputContinuous => {
                Some(250)
            }
            LaneClass::DefaultHydration
            | LaneClass::Default
            | LaneClass::TransitionHydration
            | LaneClass::Transition => Some(5000),
            // Retries are expected to be blocked on data; expiring them would
            // commit fallbacks early.
            LaneClass::Retry
            | LaneClass::SelectiveHydration
            | LaneClass::IdleHydration
            | LaneClass::Idle
            | LaneClass::Offscreen => None,
        }
    }
}

/// The batch to render next for a given set of lanes.
///
/// Returns the most urgent lane, widened to every pending lane of its group
/// for transitions and retries so they render together.
///
/// Calling this with an empty set is an internal invariant violation; in
/// release builds the input is returned unchanged.
pub fn highest_priority_lanes(lanes: Lanes) -> Lanes {
    match lanes.class() {
        Some(LaneClass::Transition) => lanes & Lanes::TRANSITIONS,
        Some(LaneClass::Retry) => lanes & Lanes::RETRIES,
        Some(_) => lanes.highest_priority_lane(),
        None => invariant_violation!(
            lanes,
            "should have found matching lanes in {:?}; this is a bug in the lane model",
            lanes
        ),
    }
}

/// Pick the more urgent of two lanes. An empty `a` always loses.
#[inline]
pub const fn higher_priority_lane(a: Lane, b: Lane) -> Lane {
    if a.0 != 0 && a.0 < b.0 { a } else { b }
}

/// Event priority buckets, each backed by a representative lane.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventPriority {
    /// Discrete interactions, backed by [`Lanes::SYNC`].
    Discrete,
    /// Continuous interactions, backed by [`Lanes::INPUT_CONTINUOUS`].
    Continuous,
    /// Everything else, backed by [`Lanes::DEFAULT`].
    Default,
    /// Background work, backed by [`Lanes::IDLE`].
    Idle,
}

impl EventPriority {
    /// Representative lane of the bucket.
    #[inline]
    pub const fn lane(self) -> Lane {
        match self {
            EventPriority::Discrete => Lanes::SYNC,
            EventPriority::Continuous => Lanes::INPUT_CONTINUOUS,
            EventPriority::Default => Lanes::DEFAULT,
            EventPriority::Idle => Lanes::IDLE,
        }
    }

    /// True if `self` is strictly more urgent than `other`.
    #[inline]
    pub const fn is_higher_than(self, other: EventPriority) -> bool {
        is_higher_event_priority(self.lane(), other.lane())
    }

    /// Scheduler priority used for root tasks of this bucket.
    pub const fn to_scheduler_priority(self) -> PriorityLevel {
        match self {
            EventPriority::Discrete => PriorityLevel::Immediate,
            EventPriority::Continuous => PriorityLevel::UserBlocking,
            EventPriority::Default => PriorityLevel::Normal,
            EventPriority::Idle => PriorityLevel::Idle,
        }
    }
}

/// True if lane `a` is strictly more urgent than lane `b`.
#[inline]
pub const fn is_higher_event_priority(a: Lane, b: Lane) -> bool {
    a.0 != 0 && a.0 < b.0
}

/// Snap a set of lanes to its event priority bucket.
///
/// The most urgent lane is rounded towards the closest bucket that is not
/// more urgent than it. The empty set maps to [`EventPriority::Discrete`].
pub fn lanes_to_event_priority(lanes: Lanes) -> EventPriority {
    let lane = lanes.highest_priority_lane();
    if !is_higher_event_priority(EventPriority::Discrete.lane(), lane) {
        return EventPriority::Discrete;
    }
    if !is_higher_event_priority(EventPriority::Continuous.lane(), lane) {
        return EventPriority::Continuous;
    }
    if lane.includes_non_idle_work() {
        return EventPriority::Default;
    }
    EventPriority::Idle
}

/// Hands out transition and retry lanes round-robin.
///
/// Consecutive transitions land on different lanes so that they can be
/// finished independently; after the last lane of a group the cursor wraps
/// back to the first.
#[derive(Debug, Clone)]
pub struct LaneAllocator {
    next_transition: Lane,
    next_retry: Lane,
}

impl Default for LaneAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl LaneAllocator {
    /// Allocator starting at the first transition and retry lanes.
    pub const fn new() -> Self {
        Self {
            next_transition: Lanes::TRANSITION_1,
            next_retry: Lanes::RETRY_1,
        }
    }

    /// Next transition lane.
    pub fn claim_next_transition_lane(&mut self) -> Lane {
        let lane = self.next_transition;
        self.next_transition = Lanes(lane.0 << 1);
        if !self.next_transition.includes_some(Lanes::TRANSITIONS) {
            self.next_transition = Lanes::TRANSITION_1;
        }
        lane
    }

    /// Next retry lane.
    pub fn claim_next_retry_lane(&mut self) -> Lane {
        let lane = self.next_retry;
        self.next_retry = Lanes(lane.0 << 1);
        if !self.next_retry.includes_some(Lanes::RETRIES) {
            self.next_retry = Lanes::RETRY_1;
        }
        lane
    }
}
