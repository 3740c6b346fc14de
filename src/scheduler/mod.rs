//! Cooperative task scheduler.
//!
//! Tasks are queued by priority and run in time slices on the host's event
//! loop:
//!
//! 1. [`Scheduler::schedule_callback`] puts a task either on the ready heap
//!    (ordered by expiration time) or, if it is delayed, on the timer heap
//!    (ordered by start time), and asks the [`Host`] for a callback or a
//!    timeout.
//! 2. The host later calls [`Scheduler::perform_work_until_deadline`], which
//!    runs the most urgent tasks until the slice is used up
//!    ([`Scheduler::should_yield_to_host`]) and then asks for another callback
//!    if work remains.
//! 3. A task callback returns [`Continuation::Yield`] to say "not done": the
//!    continuation replaces the callback on the same task, which keeps its
//!    place in the heap, and the loop yields to the host.
//!
//! A task that already passed its expiration time is run even when the slice
//! is exhausted, so nothing starves.
//!
//! ## Task states
//!
//! `Delayed -> Queued -> Running -> {Done | Yielded -> Queued}`; cancelling
//! moves a task to `Done` at any point. Done tasks stay in the heaps until
//! they reach the top and are then dropped.
//!
//! ## Faults
//!
//! Every callback runs under [`std::panic::catch_unwind`]. A panicking task is
//! discarded without retry, recorded as a [`TaskFault`] and logged; the loop
//! then carries on with the remaining tasks.
//!
//! All state lives in one [`SchedulerState`] behind a mutex owned by the
//! handle; there are no globals, so independent schedulers can coexist. The
//! lock is never held while a callback runs, so callbacks are free to
//! schedule or cancel tasks through a cloned handle.

mod clock;
mod config;
pub mod executor;
mod heap;
mod host;
mod priority;

pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use config::{
    DEFAULT_CONTINUOUS_INPUT_INTERVAL, DEFAULT_FRAME_INTERVAL, DEFAULT_MAX_YIELD_INTERVAL,
    SchedulerConfig,
};
pub use host::{Host, ManualHost};
pub use priority::{IDLE_PRIORITY_TIMEOUT, PriorityLevel};

use heap::{HeapEntry, MinHeap};
use parking_lot::{Mutex, MutexGuard};
use slab::Slab;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::error::{ValidationError, panic_message};

/// A task body. The flag tells the callback whether the task is already past
/// its expiration time, in which case it should finish without yielding.
pub type Callback = Box<dyn FnOnce(bool) -> Continuation + Send + 'static>;

/// Result of running a task callback.
pub enum Continuation {
    /// The task is finished.
    Complete,
    /// The task yielded; run this next time, keeping the task's priority and
    /// expiration.
    Yield(Callback),
}

impl Continuation {
    /// Yield with `f` as the continuation.
    pub fn yield_with<F>(f: F) -> Self
    where
        F: FnOnce(bool) -> Continuation + Send + 'static,
    {
        Continuation::Yield(Box::new(f))
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Continuation::Complete => f.write_str("Complete"),
            Continuation::Yield(_) => f.write_str("Yield(..)"),
        }
    }
}

/// Options for [`Scheduler::schedule_callback`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScheduleOptions {
    /// Milliseconds to wait before the task becomes runnable. Zero or
    /// negative means no delay.
    pub delay: Timestamp,
}

impl ScheduleOptions {
    /// Options with the given delay.
    pub const fn delayed(delay: Timestamp) -> Self {
        Self { delay }
    }
}

/// Handle to a scheduled task.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TaskHandle {
    slot: usize,
    id: u64,
    priority: PriorityLevel,
}

impl TaskHandle {
    /// Monotonic task id. Ids are never reused.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Priority the task was scheduled with.
    pub fn priority(&self) -> PriorityLevel {
        self.priority
    }
}

/// Externally visible task state.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting on the timer heap for its start time.
    Delayed,
    /// On the ready heap.
    Queued,
    /// Its callback is executing right now.
    Running,
}

/// A task whose callback panicked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskFault {
    /// Id of the faulting task.
    pub task_id: u64,
    /// Priority it ran at.
    pub priority: PriorityLevel,
    /// Panic message, if it was a string.
    pub message: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Phase {
    Delayed,
    Queued,
    Running,
    /// Completed, cancelled or faulted; removed when it surfaces in a heap.
    Done,
}

struct Task {
    id: u64,
    callback: Option<Callback>,
    priority: PriorityLevel,
    start_time: Timestamp,
    expiration_time: Timestamp,
    phase: Phase,
}

/// Mutable scheduler state. One per [`Scheduler`].
pub struct SchedulerState {
    tasks: Slab<Task>,
    task_queue: MinHeap,
    timer_queue: MinHeap,
    next_task_id: u64,
    current_task: Option<usize>,
    current_priority: PriorityLevel,
    is_performing_work: bool,
    is_host_callback_scheduled: bool,
    is_host_timeout_scheduled: bool,
    is_message_loop_running: bool,
    slice_start: Timestamp,
    frame_interval: Timestamp,
    needs_paint: bool,
    paused: bool,
    faults: Vec<TaskFault>,
    config: SchedulerConfig,
}

impl SchedulerState {
    fn new(config: SchedulerConfig) -> Self {
        Self {
            tasks: Slab::new(),
            task_queue: MinHeap::new(),
            timer_queue: MinHeap::new(),
            next_task_id: 1,
            current_task: None,
            current_priority: PriorityLevel::Normal,
            is_performing_work: false,
            is_host_callback_scheduled: false,
            is_host_timeout_scheduled: false,
            is_message_loop_running: false,
            slice_start: -1,
            frame_interval: config.frame_interval_ms(),
            needs_paint: false,
            paused: false,
            faults: Vec::new(),
            config,
        }
    }

    fn entry_is_live(&self, entry: &HeapEntry) -> bool {
        self.tasks
            .get(entry.slot)
            .is_some_and(|task| task.id == entry.id && task.phase != Phase::Done)
    }

    fn release(&mut self, entry: HeapEntry) {
        if self.tasks.get(entry.slot).is_some_and(|task| task.id == entry.id) {
            self.tasks.remove(entry.slot);
        }
    }

    /// Move timers whose start time has arrived onto the ready heap.
    fn advance_timers(&mut self, now: Timestamp) {
        while let Some(&entry) = self.timer_queue.peek() {
            if !self.entry_is_live(&entry) {
                cov_mark::hit!(cancelled_timer_dropped);
                self.timer_queue.pop();
                self.release(entry);
                continue;
            }
            let task = &mut self.tasks[entry.slot];
            if task.start_time > now {
                return;
            }
            self.timer_queue.pop();
            task.phase = Phase::Queued;
            let expiration_time = task.expiration_time;
            tracing::trace!(task = entry.id, "timer promoted to ready queue");
            self.task_queue.push(HeapEntry {
                sort_index: expiration_time,
                ..entry
            });
        }
    }
}

struct Inner {
    state: Mutex<SchedulerState>,
    clock: Arc<dyn Clock>,
    host: Arc<dyn Host>,
}

/// Handle to a scheduler. Cloning is cheap; clones share the same queues.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Scheduler")
            .field("queued", &state.task_queue.len())
            .field("delayed", &state.timer_queue.len())
            .field("performing_work", &state.is_performing_work)
            .finish()
    }
}

/// Restores the current priority level when dropped, also on unwind.
struct PriorityGuard<'a> {
    scheduler: &'a Scheduler,
    previous: PriorityLevel,
}

impl Drop for PriorityGuard<'_> {
    fn drop(&mut self) {
        self.scheduler.lock().current_priority = self.previous;
    }
}

impl Scheduler {
    /// Scheduler with the default configuration.
    pub fn new(clock: Arc<dyn Clock>, host: Arc<dyn Host>) -> Self {
        Self::with_config(clock, host, SchedulerConfig::default())
    }

    /// Scheduler with an explicit configuration.
    pub fn with_config(clock: Arc<dyn Clock>, host: Arc<dyn Host>, config: SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SchedulerState::new(config)),
                clock,
                host,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.inner.state.lock()
    }

    /// Current time of the scheduler's clock.
    pub fn now(&self) -> Timestamp {
        self.inner.clock.now()
    }

    /// Queue `callback` at `priority`.
    pub fn schedule_callback<F>(&self, priority: PriorityLevel, callback: F) -> TaskHandle
    where
        F: FnOnce(bool) -> Continuation + Send + 'static,
    {
        self.schedule_callback_with(priority, callback, ScheduleOptions::default())
    }

    /// Queue `callback` at `priority` with extra options.
    pub fn schedule_callback_with<F>(
        &self,
        priority: PriorityLevel,
        callback: F,
        options: ScheduleOptions,
    ) -> TaskHandle
    where
        F: FnOnce(bool) -> Continuation + Send + 'static,
    {
        let now = self.now();
        let start_time = if options.delay > 0 {
            now.saturating_add(options.delay)
        } else {
            now
        };
        let expiration_time = start_time.saturating_add(priority.timeout());
        let delayed = start_time > now;

        let mut state = self.lock();
        let id = state.next_task_id;
        state.next_task_id += 1;
        let slot = state.tasks.insert(Task {
            id,
            callback: Some(Box::new(callback)),
            priority,
            start_time,
            expiration_time,
            phase: if delayed { Phase::Delayed } else { Phase::Queued },
        });
        tracing::trace!(task = id, ?priority, start_time, expiration_time, "task scheduled");

        if delayed {
            state.timer_queue.push(HeapEntry {
                sort_index: start_time,
                id,
                slot,
            });
            let is_earliest_timer = state.timer_queue.peek().is_some_and(|e| e.id == id);
            if state.task_queue.is_empty() && is_earliest_timer {
                if state.is_host_timeout_scheduled {
                    self.inner.host.cancel_timeout();
                } else {
                    state.is_host_timeout_scheduled = true;
                }
                self.inner.host.request_timeout(start_time - now);
            }
        } else {
            state.task_queue.push(HeapEntry {
                sort_index: expiration_time,
                id,
                slot,
            });
            if !state.is_host_callback_scheduled && !state.is_performing_work {
                state.is_host_callback_scheduled = true;
                self.request_host_callback(&mut state);
            }
        }

        TaskHandle { slot, id, priority }
    }

    /// Cancel a task. Idempotent; unknown or finished handles are ignored.
    ///
    /// The task stays in its heap and is dropped once it reaches the top. A
    /// task that is running right now finishes its current callback, but any
    /// continuation it returns is discarded.
    pub fn cancel_callback(&self, handle: &TaskHandle) {
        let mut state = self.lock();
        if let Some(task) = state.tasks.get_mut(handle.slot) {
            if task.id == handle.id && task.phase != Phase::Done {
                tracing::trace!(task = handle.id, "task cancelled");
                task.callback = None;
                task.phase = Phase::Done;
            }
        }
    }

    /// State of a task, `None` once it completed or was cancelled.
    pub fn task_state(&self, handle: &TaskHandle) -> Option<TaskState> {
        let state = self.lock();
        let task = state.tasks.get(handle.slot).filter(|t| t.id == handle.id)?;
        match task.phase {
            Phase::Delayed => Some(TaskState::Delayed),
            Phase::Queued => Some(TaskState::Queued),
            Phase::Running => Some(TaskState::Running),
            Phase::Done => None,
        }
    }

    /// The most urgent live task on the ready heap.
    pub fn first_callback(&self) -> Option<TaskHandle> {
        let state = self.lock();
        let entry = state.task_queue.peek()?;
        let task = state.tasks.get(entry.slot)?;
        (task.id == entry.id && task.phase != Phase::Done).then_some(TaskHandle {
            slot: entry.slot,
            id: task.id,
            priority: task.priority,
        })
    }

    /// True if any live task is queued or delayed.
    pub fn has_pending_work(&self) -> bool {
        let state = self.lock();
        state.tasks.iter().any(|(_, task)| task.phase != Phase::Done)
    }

    /// Priority of the task currently running, or the one set by
    /// [`run_with_priority`](Self::run_with_priority).
    pub fn current_priority_level(&self) -> PriorityLevel {
        self.lock().current_priority
    }

    /// Run `f` with the current priority level set to `priority`.
    pub fn run_with_priority<F, R>(&self, priority: PriorityLevel, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let priority = match priority {
            PriorityLevel::NoPriority => PriorityLevel::Normal,
            other => other,
        };
        let previous = std::mem::replace(&mut self.lock().current_priority, priority);
        let _guard = PriorityGuard {
            scheduler: self,
            previous,
        };
        f()
    }

    /// Stop running tasks until [`continue_execution`](Self::continue_execution).
    pub fn pause_execution(&self) {
        self.lock().paused = true;
    }

    /// Resume after [`pause_execution`](Self::pause_execution).
    pub fn continue_execution(&self) {
        let mut state = self.lock();
        state.paused = false;
        if !state.is_host_callback_scheduled && !state.is_performing_work {
            state.is_host_callback_scheduled = true;
            self.request_host_callback(&mut state);
        }
    }

    /// Ask the scheduler to yield at the next opportunity so the host can
    /// paint.
    pub fn request_paint(&self) {
        self.lock().needs_paint = true;
    }

    /// Override the slice length for a target frame rate.
    ///
    /// `0` restores the configured frame interval. Rates above 125 fps are
    /// rejected.
    pub fn force_frame_rate(&self, fps: u32) -> Result<(), ValidationError> {
        if fps > 125 {
            tracing::warn!(fps, "rejected frame rate");
            return Err(ValidationError::InvalidFrameRate { fps });
        }
        let mut state = self.lock();
        state.frame_interval = if fps > 0 {
            Timestamp::from(1000 / fps)
        } else {
            state.config.frame_interval_ms()
        };
        Ok(())
    }

    /// Faults recorded since the last call.
    pub fn take_faults(&self) -> Vec<TaskFault> {
        std::mem::take(&mut self.lock().faults)
    }

    /// Whether the current slice is used up.
    pub fn should_yield_to_host(&self) -> bool {
        let now = self.now();
        let (elapsed, needs_paint, frame_interval, config) = {
            let state = self.lock();
            (
                now - state.slice_start,
                state.needs_paint,
                state.frame_interval,
                state.config,
            )
        };
        if needs_paint {
            return true;
        }
        if elapsed < frame_interval {
            return false;
        }
        if config.input_pending_signals {
            // The slice is over, but with an input signal we may keep going
            // for a while as long as nobody is waiting.
            let host = &self.inner.host;
            if elapsed < config.continuous_input_interval_ms() {
                return host.input_pending(false).unwrap_or(true);
            }
            if elapsed < config.max_yield_interval_ms() {
                return host.input_pending(true).unwrap_or(true);
            }
        }
        true
    }

    /// Host entry point: run tasks until the slice is used up.
    pub fn perform_work_until_deadline(&self) {
        let now = self.now();
        {
            let mut state = self.lock();
            if !state.is_message_loop_running {
                return;
            }
            state.slice_start = now;
        }

        let has_more_work = self.flush_work(now);

        let mut state = self.lock();
        state.needs_paint = false;
        if has_more_work {
            self.inner.host.request_callback();
        } else {
            state.is_message_loop_running = false;
        }
    }

    /// Host entry point: the timeout armed through
    /// [`Host::request_timeout`] fired.
    pub fn handle_timeout(&self) {
        let now = self.now();
        let mut state = self.lock();
        state.is_host_timeout_scheduled = false;
        state.advance_timers(now);

        if state.is_host_callback_scheduled {
            return;
        }
        if !state.task_queue.is_empty() {
            state.is_host_callback_scheduled = true;
            self.request_host_callback(&mut state);
        } else if let Some(first_timer) = state.timer_queue.peek().copied() {
            let start_time = state.tasks[first_timer.slot].start_time;
            state.is_host_timeout_scheduled = true;
            self.inner.host.request_timeout(start_time - now);
        }
    }

    fn request_host_callback(&self, state: &mut SchedulerState) {
        if !state.is_message_loop_running {
            state.is_message_loop_running = true;
            self.inner.host.request_callback();
        }
    }

    fn flush_work(&self, initial_time: Timestamp) -> bool {
        let previous_priority = {
            let mut state = self.lock();
            state.is_host_callback_scheduled = false;
            if state.is_host_timeout_scheduled {
                state.is_host_timeout_scheduled = false;
                self.inner.host.cancel_timeout();
            }
            state.is_performing_work = true;
            state.current_priority
        };

        let has_more_work = self.work_loop(initial_time);

        let mut state = self.lock();
        state.current_task = None;
        state.current_priority = previous_priority;
        state.is_performing_work = false;
        has_more_work
    }

    fn work_loop(&self, initial_time: Timestamp) -> bool {
        let mut now = initial_time;
        self.lock().advance_timers(now);

        loop {
            let mut state = self.lock();
            if state.paused {
                // `continue_execution` requests the next callback.
                return false;
            }
            let Some(&entry) = state.task_queue.peek() else {
                break;
            };
            if !state.entry_is_live(&entry) {
                cov_mark::hit!(cancelled_task_skipped);
                state.task_queue.pop();
                state.release(entry);
                continue;
            }

            let expiration_time = state.tasks[entry.slot].expiration_time;
            if expiration_time > now {
                drop(state);
                if self.should_yield_to_host() {
                    return true;
                }
                state = self.lock();
            }

            let task = &mut state.tasks[entry.slot];
            let Some(callback) = task.callback.take() else {
                state.task_queue.pop();
                state.release(entry);
                continue;
            };
            task.phase = Phase::Running;
            let priority = task.priority;
            state.current_task = Some(entry.slot);
            state.current_priority = priority;
            drop(state);

            let did_timeout = expiration_time <= now;
            tracing::trace!(task = entry.id, ?priority, did_timeout, "running task");
            let outcome = catch_unwind(AssertUnwindSafe(move || callback(did_timeout)));
            now = self.now();

            let mut state = self.lock();
            state.current_task = None;
            let cancelled_while_running = state.tasks[entry.slot].phase == Phase::Done;
            match outcome {
                Ok(Continuation::Yield(next)) if !cancelled_while_running => {
                    cov_mark::hit!(continuation_reinstalled);
                    let task = &mut state.tasks[entry.slot];
                    task.callback = Some(next);
                    task.phase = Phase::Queued;
                    state.advance_timers(now);
                    return true;
                }
                Ok(_) => {
                    state.tasks[entry.slot].phase = Phase::Done;
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    tracing::error!(task = entry.id, ?priority, %message, "task panicked; discarding it");
                    state.tasks[entry.slot].phase = Phase::Done;
                    state.faults.push(TaskFault {
                        task_id: entry.id,
                        priority,
                        message,
                    });
                }
            }
            if state.task_queue.peek().is_some_and(|top| top.id == entry.id) {
                state.task_queue.pop();
                state.release(entry);
            }
            state.advance_timers(now);
        }

        let mut state = self.lock();
        if let Some(first_timer) = state.timer_queue.peek().copied() {
            let start_time = state.tasks[first_timer.slot].start_time;
            state.is_host_timeout_scheduled = true;
            self.inner.host.request_timeout(start_time - now);
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Harness {
        scheduler: Scheduler,
        clock: ManualClock,
        host: Arc<ManualHost>,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_config(SchedulerConfig::default())
        }

        fn with_config(config: SchedulerConfig) -> Self {
            let clock = ManualClock::new();
            let host = Arc::new(ManualHost::new());
            let scheduler = Scheduler::with_config(Arc::new(clock.clone()), host.clone(), config);
            Self {
                scheduler,
                clock,
                host,
                log: Arc::default(),
            }
        }

        fn logger(&self, name: &str) -> impl FnOnce(bool) -> Continuation + Send + 'static {
            let log = self.log.clone();
            let name = name.to_owned();
            move |_| {
                log.lock().push(name);
                Continuation::Complete
            }
        }

        /// Drive the host until no callback is requested.
        fn flush_all(&self) {
            while self.host.take_callback_request() {
                self.scheduler.perform_work_until_deadline();
            }
        }

        /// Run exactly one host turn.
        fn flush_one_turn(&self) {
            if self.host.take_callback_request() {
                self.scheduler.perform_work_until_deadline();
            }
        }

        fn log(&self) -> Vec<String> {
            std::mem::take(&mut *self.log.lock())
        }
    }

    #[test]
    fn runs_tasks_by_expiration_not_insertion() {
        let h = Harness::new();
        h.scheduler.schedule_callback(PriorityLevel::Idle, h.logger("idle"));
        h.scheduler.schedule_callback(PriorityLevel::Normal, h.logger("normal"));
        h.scheduler.schedule_callback(PriorityLevel::Immediate, h.logger("immediate"));
        h.flush_all();
        assert_eq!(h.log(), vec!["immediate", "normal", "idle"]);
        assert!(!h.scheduler.has_pending_work());
    }

    #[test]
    fn same_priority_runs_fifo() {
        let h = Harness::new();
        for name in ["a", "b", "c"] {
            h.scheduler.schedule_callback(PriorityLevel::Normal, h.logger(name));
        }
        h.flush_all();
        assert_eq!(h.log(), vec!["a", "b", "c"]);
    }

    #[test]
    fn scheduling_never_runs_synchronously() {
        let h = Harness::new();
        h.scheduler.schedule_callback(PriorityLevel::Immediate, h.logger("a"));
        assert!(h.log().is_empty());
        assert!(h.host.has_callback_request());
        // A second task does not request a second callback.
        h.host.take_callback_request();
        h.scheduler.schedule_callback(PriorityLevel::Immediate, h.logger("b"));
        assert!(!h.host.has_callback_request());
        h.scheduler.perform_work_until_deadline();
        assert_eq!(h.log(), vec!["a", "b"]);
    }

    #[test]
    fn cancelled_task_is_skipped() {
        cov_mark::check!(cancelled_task_skipped);
        let h = Harness::new();
        h.scheduler.schedule_callback(PriorityLevel::Normal, h.logger("a"));
        let b = h.scheduler.schedule_callback(PriorityLevel::Normal, h.logger("b"));
        h.scheduler.schedule_callback(PriorityLevel::Normal, h.logger("c"));
        h.scheduler.cancel_callback(&b);
        h.scheduler.cancel_callback(&b);
        assert_eq!(h.scheduler.task_state(&b), None);
        h.flush_all();
        assert_eq!(h.log(), vec!["a", "c"]);
        h.scheduler.cancel_callback(&b);
    }

    #[test]
    fn cancelling_the_first_task_exposes_the_next() {
        let h = Harness::new();
        let a = h.scheduler.schedule_callback(PriorityLevel::UserBlocking, h.logger("a"));
        let b = h.scheduler.schedule_callback(PriorityLevel::Normal, h.logger("b"));
        assert_eq!(h.scheduler.first_callback(), Some(a));
        h.scheduler.cancel_callback(&a);
        assert_eq!(h.scheduler.first_callback(), None);
        h.flush_all();
        assert_eq!(h.log(), vec!["b"]);
        assert_eq!(h.scheduler.task_state(&b), None);
    }

    #[test]
    fn yields_when_slice_is_used_up() {
        let h = Harness::new();
        for name in ["a", "b", "c"] {
            let log = h.log.clone();
            let clock = h.clock.clone();
            h.scheduler.schedule_callback(PriorityLevel::Normal, move |_| {
                log.lock().push(name.to_owned());
                clock.advance(3);
                Continuation::Complete
            });
        }
        h.flush_one_turn();
        // a (3ms) and b (6ms > 5ms frame) run, then the slice is over.
        assert_eq!(h.log(), vec!["a", "b"]);
        assert!(h.host.has_callback_request());
        h.flush_one_turn();
        assert_eq!(h.log(), vec!["c"]);
        assert!(!h.host.has_callback_request());
    }

    #[test]
    fn expired_tasks_run_even_without_time_left() {
        let h = Harness::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..3 {
            let clock = h.clock.clone();
            let seen = seen.clone();
            h.scheduler.schedule_callback(PriorityLevel::Immediate, move |did_timeout| {
                seen.lock().push(did_timeout);
                clock.advance(10);
                Continuation::Complete
            });
        }
        h.flush_one_turn();
        assert_eq!(*seen.lock(), vec![true, true, true]);
    }

    #[test]
    fn continuation_keeps_task_and_yields() {
        cov_mark::check!(continuation_reinstalled);
        let h = Harness::new();
        let steps = Arc::new(AtomicUsize::new(0));
        let counter = steps.clone();
        let task = h.scheduler.schedule_callback(PriorityLevel::Normal, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            let counter = counter.clone();
            Continuation::yield_with(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Continuation::Complete
            })
        });
        h.scheduler.schedule_callback(PriorityLevel::Normal, h.logger("after"));

        h.flush_one_turn();
        assert_eq!(steps.load(Ordering::SeqCst), 1);
        assert_eq!(h.scheduler.task_state(&task), Some(TaskState::Queued));
        assert_eq!(h.scheduler.first_callback(), Some(task));
        assert!(h.log().is_empty());

        h.flush_all();
        assert_eq!(steps.load(Ordering::SeqCst), 2);
        assert_eq!(h.log(), vec!["after"]);
        assert_eq!(h.scheduler.task_state(&task), None);
    }

    #[test]
    fn cancelling_a_running_task_drops_its_continuation() {
        let h = Harness::new();
        let handle: Arc<Mutex<Option<TaskHandle>>> = Arc::default();
        let scheduler = h.scheduler.clone();
        let handle_in_task = handle.clone();
        let log = h.log.clone();
        let task = h.scheduler.schedule_callback(PriorityLevel::Normal, move |_| {
            let me = handle_in_task.lock().expect("handle stored before run");
            scheduler.cancel_callback(&me);
            Continuation::yield_with(move |_| {
                log.lock().push("continuation".into());
                Continuation::Complete
            })
        });
        *handle.lock() = Some(task);
        h.flush_all();
        assert!(h.log().is_empty());
        assert!(!h.scheduler.has_pending_work());
    }

    #[test]
    fn callbacks_can_schedule_more_work() {
        let h = Harness::new();
        let scheduler = h.scheduler.clone();
        let log = h.log.clone();
        h.scheduler.schedule_callback(PriorityLevel::Normal, move |_| {
            log.lock().push("outer".into());
            let log = log.clone();
            scheduler.schedule_callback(PriorityLevel::Immediate, move |_| {
                log.lock().push("inner".into());
                Continuation::Complete
            });
            Continuation::Complete
        });
        h.flush_all();
        assert_eq!(h.log(), vec!["outer", "inner"]);
    }

    #[test]
    fn panicking_task_does_not_wedge_the_loop() {
        let h = Harness::new();
        h.scheduler.schedule_callback(PriorityLevel::Normal, h.logger("before"));
        let bad = h
            .scheduler
            .schedule_callback(PriorityLevel::Normal, |_| panic!("boom"));
        h.scheduler.schedule_callback(PriorityLevel::Normal, h.logger("after"));
        h.flush_all();

        assert_eq!(h.log(), vec!["before", "after"]);
        let faults = h.scheduler.take_faults();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].task_id, bad.id());
        assert_eq!(faults[0].message, "boom");
        assert!(h.scheduler.take_faults().is_empty());
        assert_eq!(h.scheduler.current_priority_level(), PriorityLevel::Normal);
    }

    #[test]
    fn delayed_task_waits_for_its_start_time() {
        cov_mark::check!(cancelled_timer_dropped);
        let h = Harness::new();
        let delayed = h.scheduler.schedule_callback_with(
            PriorityLevel::Normal,
            h.logger("delayed"),
            ScheduleOptions::delayed(100),
        );
        let cancelled = h.scheduler.schedule_callback_with(
            PriorityLevel::Normal,
            h.logger("cancelled"),
            ScheduleOptions::delayed(50),
        );
        assert_eq!(h.scheduler.task_state(&delayed), Some(TaskState::Delayed));
        assert!(!h.host.has_callback_request());
        assert_eq!(h.host.armed_timeout(), Some(50));
        h.scheduler.cancel_callback(&cancelled);

        h.clock.set(60);
        h.scheduler.handle_timeout();
        // Only the cancelled timer was due; the real one re-arms the timeout.
        assert!(!h.host.has_callback_request());
        assert_eq!(h.host.armed_timeout(), Some(40));

        h.clock.set(100);
        h.scheduler.handle_timeout();
        assert_eq!(h.scheduler.task_state(&delayed), Some(TaskState::Queued));
        h.flush_all();
        assert_eq!(h.log(), vec!["delayed"]);
    }

    #[test]
    fn huge_delay_saturates_instead_of_wrapping() {
        let h = Harness::new();
        h.clock.set(10);
        let far = h.scheduler.schedule_callback_with(
            PriorityLevel::Idle,
            h.logger("far"),
            ScheduleOptions::delayed(Timestamp::MAX),
        );
        assert_eq!(h.scheduler.task_state(&far), Some(TaskState::Delayed));
        assert_eq!(h.host.armed_timeout(), Some(Timestamp::MAX - 10));

        h.scheduler.schedule_callback(PriorityLevel::Normal, h.logger("now"));
        h.flush_all();
        assert_eq!(h.log(), vec!["now"]);
        assert_eq!(h.scheduler.task_state(&far), Some(TaskState::Delayed));
    }

    #[test]
    fn due_timers_are_promoted_during_work() {
        let h = Harness::new();
        h.scheduler.schedule_callback_with(
            PriorityLevel::Immediate,
            h.logger("timer"),
            ScheduleOptions::delayed(1),
        );
        let clock = h.clock.clone();
        let log = h.log.clone();
        h.scheduler.schedule_callback(PriorityLevel::Normal, move |_| {
            log.lock().push("first".into());
            clock.advance(1);
            Continuation::Complete
        });
        h.flush_all();
        assert_eq!(h.log(), vec!["first", "timer"]);
    }

    #[test]
    fn paused_scheduler_runs_nothing() {
        let h = Harness::new();
        h.scheduler.pause_execution();
        h.scheduler.schedule_callback(PriorityLevel::Immediate, h.logger("a"));
        h.flush_one_turn();
        assert!(h.log().is_empty());
        h.scheduler.continue_execution();
        h.flush_all();
        assert_eq!(h.log(), vec!["a"]);
    }

    #[test]
    fn run_with_priority_restores_previous_level() {
        let h = Harness::new();
        let inner = h.scheduler.run_with_priority(PriorityLevel::UserBlocking, || {
            h.scheduler.current_priority_level()
        });
        assert_eq!(inner, PriorityLevel::UserBlocking);
        assert_eq!(h.scheduler.current_priority_level(), PriorityLevel::Normal);

        let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
            h.scheduler
                .run_with_priority(PriorityLevel::Idle, || panic!("inside"))
        }));
        assert!(result.is_err());
        assert_eq!(h.scheduler.current_priority_level(), PriorityLevel::Normal);
    }

    #[test]
    fn current_priority_tracks_running_task() {
        let h = Harness::new();
        let seen = Arc::new(Mutex::new(None));
        let scheduler = h.scheduler.clone();
        let slot = seen.clone();
        h.scheduler.schedule_callback(PriorityLevel::Low, move |_| {
            *slot.lock() = Some(scheduler.current_priority_level());
            Continuation::Complete
        });
        h.flush_all();
        assert_eq!(*seen.lock(), Some(PriorityLevel::Low));
    }

    #[test]
    fn frame_rate_bounds() {
        let h = Harness::new();
        assert_eq!(
            h.scheduler.force_frame_rate(200),
            Err(ValidationError::InvalidFrameRate { fps: 200 })
        );
        h.scheduler.force_frame_rate(50).expect("valid rate");
        h.scheduler.schedule_callback(PriorityLevel::Normal, |_| Continuation::Complete);
        h.host.take_callback_request();

        // With a 20ms frame a 10ms slice does not yield.
        h.clock.set(0);
        h.scheduler.lock().slice_start = 0;
        h.clock.set(10);
        assert!(!h.scheduler.should_yield_to_host());
        h.scheduler.force_frame_rate(0).expect("reset");
        assert!(h.scheduler.should_yield_to_host());
    }

    #[test]
    fn paint_request_yields_immediately() {
        let h = Harness::new();
        h.scheduler.lock().slice_start = 0;
        assert!(!h.scheduler.should_yield_to_host());
        h.scheduler.request_paint();
        assert!(h.scheduler.should_yield_to_host());
    }

    #[test]
    fn input_signals_extend_the_slice() {
        let h = Harness::with_config(SchedulerConfig::new().input_pending_signals(true));
        h.host.set_input_pending(false, false);
        h.scheduler.lock().slice_start = 0;

        h.clock.set(20);
        assert!(!h.scheduler.should_yield_to_host());
        h.host.set_input_pending(true, false);
        assert!(h.scheduler.should_yield_to_host());

        h.host.set_input_pending(false, true);
        assert!(!h.scheduler.should_yield_to_host());
        h.clock.set(100);
        assert!(h.scheduler.should_yield_to_host());

        h.host.set_input_pending(false, false);
        assert!(!h.scheduler.should_yield_to_host());
        h.clock.set(300);
        assert!(h.scheduler.should_yield_to_host());
    }

    #[test]
    fn schedulers_are_independent() {
        let a = Harness::new();
        let b = Harness::new();
        a.scheduler.schedule_callback(PriorityLevel::Normal, a.logger("a"));
        assert!(!b.host.has_callback_request());
        assert!(!b.scheduler.has_pending_work());
        a.flush_all();
        assert_eq!(a.log(), vec!["a"]);
    }
}
