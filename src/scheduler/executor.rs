//! Thread-backed host for the scheduler.
//!
//! [`SchedulerLoop`] spawns a thread that plays the role of a host event
//! loop: every [`Host`] request becomes a message on a channel, and the thread
//! handles one message per turn. Requests made while a slice is running are
//! therefore always served on a later turn, never re-entrantly.
//!
//! ```ignore
//! let handle = SchedulerLoop::new()
//!     .config(SchedulerConfig::new().frame_interval(Duration::from_millis(8)))
//!     .spawn_fn(|f| {
//!         std::thread::Builder::new()
//!             .name("scheduler".into())
//!             .spawn(f)
//!             .unwrap()
//!     })
//!     .spawn();
//!
//! handle.scheduler().schedule_callback(PriorityLevel::Normal, |_| {
//!     do_some_work();
//!     Continuation::Complete
//! });
//!
//! handle.shutdown();
//! ```

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::{Clock, Host, Scheduler, SchedulerConfig, SystemClock, Timestamp};

#[derive(Debug)]
enum Message {
    Perform,
    ArmTimeout(Timestamp),
    CancelTimeout,
    Shutdown,
}

/// [`Host`] that forwards requests to a [`SchedulerLoop`] thread.
#[derive(Debug)]
pub struct ThreadHost {
    sender: Sender<Message>,
}

impl Host for ThreadHost {
    fn request_callback(&self) {
        // A closed channel means the loop has stopped; nothing left to wake.
        let _ = self.sender.send(Message::Perform);
    }

    fn request_timeout(&self, delay: Timestamp) {
        let _ = self.sender.send(Message::ArmTimeout(delay));
    }

    fn cancel_timeout(&self) {
        let _ = self.sender.send(Message::CancelTimeout);
    }
}

/// Builder for a scheduler driven by its own thread.
#[allow(clippy::type_complexity)]
pub struct SchedulerLoop {
    config: SchedulerConfig,
    clock: Option<Arc<dyn Clock>>,
    spawn_fn: Option<Box<dyn FnOnce(Box<dyn FnOnce() + Send>) -> JoinHandle<()> + Send>>,
}

impl Default for SchedulerLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerLoop {
    /// Defaults:
    /// - `config`: [`SchedulerConfig::default`]
    /// - `clock`: [`SystemClock`]
    /// - `spawn_fn`: `std::thread::spawn`
    pub fn new() -> Self {
        Self {
            config: SchedulerConfig::default(),
            clock: None,
            spawn_fn: None,
        }
    }

    /// Time-slicing parameters.
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Clock used for slices and expiration times.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Custom thread spawning function, e.g. to name the thread.
    pub fn spawn_fn<F>(mut self, f: F) -> Self
    where
        F: FnOnce(Box<dyn FnOnce() + Send>) -> JoinHandle<()> + Send + 'static,
    {
        self.spawn_fn = Some(Box::new(f));
        self
    }

    /// Start the loop thread.
    pub fn spawn(self) -> SchedulerLoopHandle {
        let (tx, rx) = mpsc::channel::<Message>();
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::new()));
        let host = Arc::new(ThreadHost { sender: tx.clone() });
        let scheduler = Scheduler::with_config(clock, host, self.config);

        let loop_scheduler = scheduler.clone();
        let loop_fn: Box<dyn FnOnce() + Send> = Box::new(move || {
            message_loop(rx, loop_scheduler);
        });

        let join = match self.spawn_fn {
            Some(spawn_fn) => spawn_fn(loop_fn),
            None => thread::spawn(loop_fn),
        };

        SchedulerLoopHandle {
            scheduler,
            sender: tx,
            join: Some(join),
        }
    }
}

/// Running [`SchedulerLoop`]. Dropping it asks the thread to stop.
#[derive(Debug)]
pub struct SchedulerLoopHandle {
    scheduler: Scheduler,
    sender: Sender<Message>,
    join: Option<JoinHandle<()>>,
}

impl SchedulerLoopHandle {
    /// Scheduler served by the loop.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Stop the loop and wait for the thread. Tasks still queued are dropped
    /// without running.
    pub fn shutdown(mut self) {
        let _ = self.sender.send(Message::Shutdown);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                tracing::error!("scheduler loop thread panicked");
            }
        }
    }
}

impl Drop for SchedulerLoopHandle {
    fn drop(&mut self) {
        if self.join.is_some() {
            let _ = self.sender.send(Message::Shutdown);
        }
    }
}

fn message_loop(rx: Receiver<Message>, scheduler: Scheduler) {
    tracing::debug!("scheduler loop started");
    let mut deadline: Option<Instant> = None;

    loop {
        let message = match deadline {
            Some(at) => rx.recv_timeout(at.saturating_duration_since(Instant::now())),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match message {
            Ok(Message::Perform) => scheduler.perform_work_until_deadline(),
            Ok(Message::ArmTimeout(delay)) => {
                let delay = Duration::from_millis(u64::try_from(delay).unwrap_or(0));
                deadline = Some(Instant::now() + delay);
            }
            Ok(Message::CancelTimeout) => deadline = None,
            Err(RecvTimeoutError::Timeout) => {
                deadline = None;
                scheduler.handle_timeout();
            }
            Ok(Message::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    tracing::debug!("scheduler loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{Continuation, PriorityLevel, ScheduleOptions};

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn runs_tasks_on_the_loop_thread() {
        let handle = SchedulerLoop::new()
            .spawn_fn(|f| {
                thread::Builder::new()
                    .name("scheduler-test".into())
                    .spawn(f)
                    .expect("spawn scheduler thread")
            })
            .spawn();
        let (tx, rx) = mpsc::channel();
        let scheduler = handle.scheduler().clone();
        // Queue both from inside a task so neither can start before the other
        // is queued.
        handle.scheduler().schedule_callback(PriorityLevel::Normal, move |_| {
            for (priority, name) in [
                (PriorityLevel::Idle, "idle"),
                (PriorityLevel::Immediate, "immediate"),
            ] {
                let tx = tx.clone();
                scheduler.schedule_callback(priority, move |_| {
                    let thread = thread::current().name().map(str::to_owned);
                    let _ = tx.send((name, thread));
                    Continuation::Complete
                });
            }
            Continuation::Complete
        });
        let first = rx.recv_timeout(WAIT).expect("first task ran");
        let second = rx.recv_timeout(WAIT).expect("second task ran");
        assert_eq!(first.0, "immediate");
        assert_eq!(second.0, "idle");
        assert_eq!(first.1.as_deref(), Some("scheduler-test"));
        handle.shutdown();
    }

    #[test]
    fn delayed_tasks_fire_after_their_delay() {
        let handle = SchedulerLoop::new().spawn();
        let (tx, rx) = mpsc::channel();
        let scheduled_at = Instant::now();
        handle.scheduler().schedule_callback_with(
            PriorityLevel::Normal,
            move |_| {
                let _ = tx.send(Instant::now());
                Continuation::Complete
            },
            ScheduleOptions::delayed(20),
        );
        let ran_at = rx.recv_timeout(WAIT).expect("delayed task ran");
        assert!(ran_at.duration_since(scheduled_at) >= Duration::from_millis(19));
        handle.shutdown();
    }

    #[test]
    fn continuations_and_faults_do_not_stop_the_loop() {
        let handle = SchedulerLoop::new().spawn();
        let (tx, rx) = mpsc::channel();
        handle
            .scheduler()
            .schedule_callback(PriorityLevel::Normal, |_| panic!("task failure"));
        let tx2 = tx.clone();
        handle.scheduler().schedule_callback(PriorityLevel::Normal, move |_| {
            let _ = tx2.send("step 1");
            Continuation::yield_with(move |_| {
                let _ = tx2.send("step 2");
                Continuation::Complete
            })
        });
        assert_eq!(rx.recv_timeout(WAIT), Ok("step 1"));
        assert_eq!(rx.recv_timeout(WAIT), Ok("step 2"));
        drop(tx);
        assert_eq!(handle.scheduler().take_faults().len(), 1);
        handle.shutdown();
    }
}
