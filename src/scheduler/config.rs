//! Scheduler tuning.

use std::time::Duration;

/// Default length of one time slice.
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(5);

/// Default slice ceiling while only continuous input could be pending.
pub const DEFAULT_CONTINUOUS_INPUT_INTERVAL: Duration = Duration::from_millis(50);

/// Default hard ceiling for a slice when the host reports input state.
pub const DEFAULT_MAX_YIELD_INTERVAL: Duration = Duration::from_millis(300);

/// Time-slicing parameters.
///
/// ```ignore
/// let config = SchedulerConfig::new()
///     .frame_interval(Duration::from_millis(8))
///     .input_pending_signals(true);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub(crate) frame_interval: Duration,
    pub(crate) continuous_input_interval: Duration,
    pub(crate) max_yield_interval: Duration,
    pub(crate) input_pending_signals: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerConfig {
    /// Defaults:
    /// - `frame_interval`: 5ms
    /// - `continuous_input_interval`: 50ms
    /// - `max_yield_interval`: 300ms
    /// - `input_pending_signals`: false
    pub const fn new() -> Self {
        Self {
            frame_interval: DEFAULT_FRAME_INTERVAL,
            continuous_input_interval: DEFAULT_CONTINUOUS_INPUT_INTERVAL,
            max_yield_interval: DEFAULT_MAX_YIELD_INTERVAL,
            input_pending_signals: false,
        }
    }

    /// Work at least this long before yielding to the host.
    pub const fn frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    /// With input signals, keep working up to this long unless discrete
    /// input is pending.
    pub const fn continuous_input_interval(mut self, interval: Duration) -> Self {
        self.continuous_input_interval = interval;
        self
    }

    /// With input signals, never work longer than this without yielding.
    pub const fn max_yield_interval(mut self, interval: Duration) -> Self {
        self.max_yield_interval = interval;
        self
    }

    /// Ask the host whether input is pending before yielding. Without this,
    /// every slice ends after `frame_interval`.
    pub const fn input_pending_signals(mut self, enabled: bool) -> Self {
        self.input_pending_signals = enabled;
        self
    }

    pub(crate) fn frame_interval_ms(&self) -> i64 {
        duration_ms(self.frame_interval)
    }

    pub(crate) fn continuous_input_interval_ms(&self) -> i64 {
        duration_ms(self.continuous_input_interval)
    }

    pub(crate) fn max_yield_interval_ms(&self) -> i64 {
        duration_ms(self.max_yield_interval)
    }
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
