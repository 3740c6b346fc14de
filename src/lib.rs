#![deny(missing_docs)]

//! Lane-prioritized fiber reconciliation on top of a cooperative scheduler.
//!
//! The crate has three layers:
//!
//! - [`Lanes`] and [`RootLanes`]: a 31-bit priority model. Every update gets
//!   one lane; a root tracks which lanes are pending, suspended, pinged,
//!   expired or entangled and picks the next batch to render.
//! - [`scheduler`]: a single-threaded cooperative task queue with five
//!   priority levels, delayed tasks, time slicing and continuations.
//! - [`reconciler`]: double-buffered fiber trees, the keyed child diff and a
//!   render/commit pipeline that drives a [`HostConfig`].
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use fibra::reconciler::{ContainerHandle, Element, Renderer};
//! use fibra::scheduler::{ManualClock, ManualHost, Scheduler};
//!
//! let host = Arc::new(ManualHost::new());
//! let scheduler = Scheduler::new(Arc::new(ManualClock::new()), host.clone());
//! let renderer = Renderer::new(my_host_config, ContainerHandle::new(0), scheduler.clone());
//!
//! renderer.update_container(Element::host("div").children("hello"));
//!
//! // Drive the scheduler the way a host event loop would.
//! while host.take_callback_request() {
//!     scheduler.perform_work_until_deadline();
//! }
//! ```
//!
//! For a scheduler that runs on its own thread, see
//! [`scheduler::executor::SchedulerLoop`].
//!
//! # Errors
//!
//! Invalid input (a plain object rendered as a child, an out-of-range frame
//! rate, an update aimed at an unmounted fiber) is reported as a
//! [`ValidationError`]. A render that fails is abandoned as a whole; the
//! committed tree stays as it was and the error is available from
//! [`Renderer::take_errors`](reconciler::Renderer::take_errors).

mod error;
mod hash;
mod lane;
pub mod reconciler;
mod root_lanes;
pub mod scheduler;

pub use error::{Error, Result, ValidationError};
pub use lane::{
    EventPriority, Lane, LaneAllocator, LaneClass, LaneIter, Lanes, TOTAL_LANES, higher_priority_lane,
    highest_priority_lanes, is_higher_event_priority, lanes_to_event_priority,
};
pub use reconciler::HostConfig;
pub use root_lanes::RootLanes;
