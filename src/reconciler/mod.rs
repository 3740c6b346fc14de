//! Fiber tree, child reconciliation and the render/commit pipeline.
//!
//! A render walks the work-in-progress tree depth first. `begin_work`
//! computes a fiber's children (running component render functions and the
//! keyed child diff), `complete_work` creates or diffs host nodes on
//! the way back up, and once the root completes the commit applies the
//! recorded effects through the [`HostConfig`] and swaps the two buffers.

mod begin_work;
mod child;
mod commit;
mod complete_work;
mod element;
mod fiber;
mod flags;
mod host_config;
mod update_queue;
mod work_loop;

#[cfg(test)]
pub(crate) mod test_host;

pub use element::{
    Component, Element, ElementType, Iterable, Key, LazyNode, LazyType, Node, Portal, Props, RenderFn,
};
pub use fiber::{CommittedTree, FiberId, FiberRef, WorkTag};
pub use flags::Flags;
pub use host_config::{ContainerHandle, HostConfig, InstanceHandle};
pub use update_queue::Update;
pub use work_loop::{Renderer, RendererOptions, RootMode};
