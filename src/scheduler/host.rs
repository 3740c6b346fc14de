//! Host event-loop integration.
//!
//! The scheduler never runs work on its own. It asks its [`Host`] to call
//! [`Scheduler::perform_work_until_deadline`](super::Scheduler::perform_work_until_deadline)
//! on a later turn of the host's event loop (a macrotask), and to call
//! [`Scheduler::handle_timeout`](super::Scheduler::handle_timeout) once the
//! earliest delayed task is due.
//!
//! Contract for implementors: none of the methods may call back into the
//! scheduler synchronously. Callbacks must always run on a later turn so the
//! scheduler is never re-entered and the host's own work is never starved.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use super::Timestamp;

/// Capabilities the scheduler needs from the embedding event loop.
pub trait Host: Send + Sync + 'static {
    /// Run `perform_work_until_deadline` on a later turn.
    fn request_callback(&self);

    /// Run `handle_timeout` after `delay` milliseconds, replacing any
    /// previously armed timeout.
    fn request_timeout(&self, delay: Timestamp);

    /// Disarm the pending timeout, if any.
    fn cancel_timeout(&self);

    /// Whether user input is waiting to be handled.
    ///
    /// `include_continuous` widens the question from discrete input (clicks,
    /// key presses) to continuous input (pointer moves). `None` means the host
    /// has no such signal.
    fn input_pending(&self, include_continuous: bool) -> Option<bool> {
        let _ = include_continuous;
        None
    }
}

/// Host that only records requests; the embedder (usually a test) drives the
/// scheduler by hand.
///
/// ```ignore
/// while host.take_callback_request() {
///     scheduler.perform_work_until_deadline();
/// }
/// ```
#[derive(Debug, Default)]
pub struct ManualHost {
    callback_requested: AtomicBool,
    timeout: Mutex<Option<Timestamp>>,
    input: Mutex<Option<(bool, bool)>>,
}

impl ManualHost {
    /// Host with nothing requested and no input signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume an outstanding callback request.
    pub fn take_callback_request(&self) -> bool {
        self.callback_requested.swap(false, Ordering::SeqCst)
    }

    /// True if a callback has been requested and not yet consumed.
    pub fn has_callback_request(&self) -> bool {
        self.callback_requested.load(Ordering::SeqCst)
    }

    /// Delay of the armed timeout, if any.
    pub fn armed_timeout(&self) -> Option<Timestamp> {
        *self.timeout.lock()
    }

    /// Consume the armed timeout.
    pub fn take_timeout(&self) -> Option<Timestamp> {
        self.timeout.lock().take()
    }

    /// Start reporting input state: `discrete` and `continuous` pending flags.
    pub fn set_input_pending(&self, discrete: bool, continuous: bool) {
        *self.input.lock() = Some((discrete, continuous));
    }
}

impl Host for ManualHost {
    fn request_callback(&self) {
        self.callback_requested.store(true, Ordering::SeqCst);
    }

    fn request_timeout(&self, delay: Timestamp) {
        *self.timeout.lock() = Some(delay);
    }

    fn cancel_timeout(&self) {
        *self.timeout.lock() = None;
    }

    fn input_pending(&self, include_continuous: bool) -> Option<bool> {
        self.input
            .lock()
            .map(|(discrete, continuous)| discrete || (include_continuous && continuous))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_host_records_requests() {
        let host = ManualHost::new();
        assert!(!host.take_callback_request());
        host.request_callback();
        host.request_callback();
        assert!(host.has_callback_request());
        assert!(host.take_callback_request());
        assert!(!host.take_callback_request());

        host.request_timeout(40);
        assert_eq!(host.armed_timeout(), Some(40));
        host.cancel_timeout();
        assert_eq!(host.take_timeout(), None);
    }

    #[test]
    fn manual_host_input_signal() {
        let host = ManualHost::new();
        assert_eq!(host.input_pending(true), None);
        host.set_input_pending(false, true);
        assert_eq!(host.input_pending(false), Some(false));
        assert_eq!(host.input_pending(true), Some(true));
    }
}
