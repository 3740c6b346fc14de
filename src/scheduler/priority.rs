//! Scheduler priority levels and their timeouts.

use super::Timestamp;

/// Milliseconds until idle work expires: the largest signed 31-bit integer,
/// i.e. never in practice.
pub const IDLE_PRIORITY_TIMEOUT: Timestamp = 1_073_741_823;

/// Task priority. Lower discriminant means more urgent.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PriorityLevel {
    /// No explicit priority; scheduled as [`PriorityLevel::Normal`].
    NoPriority = 0,
    /// Already expired when scheduled.
    Immediate = 1,
    /// Must respond within a quarter second.
    UserBlocking = 2,
    /// Regular work.
    #[default]
    Normal = 3,
    /// Deferred work.
    Low = 4,
    /// Runs only when nothing else is queued.
    Idle = 5,
}

impl PriorityLevel {
    /// Offset from the start time to the task's expiration, in milliseconds.
    pub const fn timeout(self) -> Timestamp {
        match self {
            PriorityLevel::Immediate => -1,
            PriorityLevel::UserBlocking => 250,
            PriorityLevel::NoPriority | PriorityLevel::Normal => 5000,
            PriorityLevel::Low => 10000,
            PriorityLevel::Idle => IDLE_PRIORITY_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_grow_with_lower_priority() {
        let levels = [
            PriorityLevel::Immediate,
            PriorityLevel::UserBlocking,
            PriorityLevel::Normal,
            PriorityLevel::Low,
            PriorityLevel::Idle,
        ];
        for pair in levels.windows(2) {
            assert!(pair[0].timeout() < pair[1].timeout(), "{pair:?}");
        }
        assert_eq!(PriorityLevel::NoPriority.timeout(), PriorityLevel::Normal.timeout());
    }
}
