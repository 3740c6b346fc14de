//! The renderer: update entry points, root scheduling and the render loop.
//!
//! A [`Renderer`] owns one root. Updates mark lanes on the root's
//! [`RootLanes`] and on the fibers between the target and the root, then
//! `ensure_root_is_scheduled` makes sure exactly one scheduler task exists
//! for the most urgent pending lanes:
//!
//! - sync lanes are queued and flushed by an `Immediate` task (or right away
//!   by [`Renderer::flush_sync`]);
//! - everything else gets a task at the scheduler priority of its event
//!   priority bucket. The task renders in time slices and hands itself back to
//!   the scheduler as a [`Continuation`] while the same lanes stay the most
//!   urgent.
//!
//! All render and commit work happens with the renderer locked. Component
//! render functions and [`HostConfig`] methods run under that lock and must not
//! call back into the renderer.

use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, ValidationError};
use crate::lane::{EventPriority, Lane, LaneAllocator, Lanes, lanes_to_event_priority};
use crate::root_lanes::RootLanes;
use crate::scheduler::{Continuation, PriorityLevel, Scheduler, TaskHandle, Timestamp};

use super::element::Node;
use super::fiber::{CommittedTree, FiberArena, FiberId, FiberProps, WorkTag, create_host_root, create_work_in_progress};
use super::host_config::{ContainerHandle, HostConfig};
use super::update_queue::Update;

/// How a root treats updates that don't come with an explicit priority.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum RootMode {
    /// Every update is synchronous.
    Legacy,
    /// Updates get a lane from the current event priority and may be time
    /// sliced.
    #[default]
    Concurrent,
}

/// Options for [`Renderer::with_options`].
#[derive(Copy, Clone, Debug, Default)]
pub struct RendererOptions {
    /// Root mode.
    pub mode: RootMode,
    /// Time slice default and continuous-input lanes as well. Off by default:
    /// such lanes then render without yielding once started.
    pub concurrent_updates_by_default: bool,
}

impl RendererOptions {
    /// Concurrent root with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Legacy (always synchronous) root.
    pub fn legacy() -> Self {
        Self {
            mode: RootMode::Legacy,
            ..Self::default()
        }
    }

    /// Builder: see [`concurrent_updates_by_default`](Self::concurrent_updates_by_default).
    pub fn concurrent_updates_by_default(mut self, enabled: bool) -> Self {
        self.concurrent_updates_by_default = enabled;
        self
    }
}

/// The mounted tree and its scheduling state.
pub(crate) struct FiberRoot {
    pub(crate) container: ContainerHandle,
    /// Root fiber of the committed tree.
    pub(crate) current: FiberId,
    pub(crate) lanes: RootLanes,
    /// Updates not yet moved into the root fiber's queue.
    pub(crate) pending_updates: Vec<Update>,
    callback_node: Option<TaskHandle>,
    callback_priority: Lane,
}

/// A render that has started but not committed.
#[derive(Copy, Clone, Debug)]
pub(crate) struct WorkInProgress {
    pub(crate) root: FiberId,
    pub(crate) lanes: Lanes,
    pub(crate) next: Option<FiberId>,
}

pub(crate) struct RendererState<H> {
    pub(crate) host: H,
    pub(crate) arena: FiberArena,
    pub(crate) root: FiberRoot,
    pub(crate) in_progress: Option<WorkInProgress>,
    allocator: LaneAllocator,
    options: RendererOptions,
    update_priority: Option<EventPriority>,
    in_transition: bool,
    transition_lane: Option<Lane>,
    sync_work_queued: bool,
    sync_flush_scheduled: bool,
    errors: Vec<Error>,
}

enum RenderStatus {
    Completed,
    Yielded,
}

/// Handle to a root and its render pipeline. Clones share the root.
pub struct Renderer<H: HostConfig> {
    inner: Arc<Mutex<RendererState<H>>>,
    scheduler: Scheduler,
}

impl<H: HostConfig> Clone for Renderer<H> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            scheduler: self.scheduler.clone(),
        }
    }
}

impl<H: HostConfig> fmt::Debug for Renderer<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Renderer")
            .field("container", &state.root.container)
            .field("pending", &state.root.lanes.pending)
            .field("rendering", &state.in_progress.map(|wip| wip.lanes))
            .finish_non_exhaustive()
    }
}

struct UpdatePriorityGuard<'a, H: HostConfig> {
    renderer: &'a Renderer<H>,
    previous: Option<EventPriority>,
}

impl<H: HostConfig> Drop for UpdatePriorityGuard<'_, H> {
    fn drop(&mut self) {
        self.renderer.lock().update_priority = self.previous;
    }
}

struct TransitionGuard<'a, H: HostConfig> {
    renderer: &'a Renderer<H>,
    previous: bool,
}

impl<H: HostConfig> Drop for TransitionGuard<'_, H> {
    fn drop(&mut self) {
        let mut state = self.renderer.lock();
        state.in_transition = self.previous;
        if !self.previous {
            state.transition_lane = None;
        }
    }
}

impl<H: HostConfig> Renderer<H> {
    /// Concurrent root rendering into `container`.
    pub fn new(host: H, container: ContainerHandle, scheduler: Scheduler) -> Self {
        Self::with_options(host, container, scheduler, RendererOptions::default())
    }

    /// Root with explicit options.
    pub fn with_options(host: H, container: ContainerHandle, scheduler: Scheduler, options: RendererOptions) -> Self {
        let mut arena = FiberArena::new();
        let current = create_host_root(&mut arena, container);
        let state = RendererState {
            host,
            arena,
            root: FiberRoot {
                container,
                current,
                lanes: RootLanes::new(options.concurrent_updates_by_default),
                pending_updates: Vec::new(),
                callback_node: None,
                callback_priority: Lanes::NONE,
            },
            in_progress: None,
            allocator: LaneAllocator::new(),
            options,
            update_priority: None,
            in_transition: false,
            transition_lane: None,
            sync_work_queued: false,
            sync_flush_scheduled: false,
            errors: Vec::new(),
        };
        Self {
            inner: Arc::new(Mutex::new(state)),
            scheduler,
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, RendererState<H>> {
        self.inner.lock()
    }

    /// The scheduler the root's tasks run on.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Current root fiber.
    pub fn root_fiber(&self) -> FiberId {
        self.lock().root.current
    }

    /// Lanes with work that has not been committed yet.
    pub fn pending_lanes(&self) -> Lanes {
        self.lock().root.lanes.pending
    }

    /// True while a render has started but not committed.
    pub fn is_rendering(&self) -> bool {
        self.lock().in_progress.is_some()
    }

    /// Lane for an update requested now.
    ///
    /// Legacy roots always use the sync lane. Otherwise updates inside
    /// [`start_transition`](Self::start_transition) share one transition lane,
    /// then an explicit [`with_update_priority`](Self::with_update_priority)
    /// wins, then the host's current event priority.
    pub fn request_update_lane(&self) -> Lane {
        let mut state = self.lock();
        state.request_update_lane()
    }

    /// Time stamp for an update requested now.
    pub fn request_event_time(&self) -> Timestamp {
        self.scheduler.now()
    }

    /// Render `element` into the root. Returns the lane of the update.
    pub fn update_container(&self, element: impl Into<Node>) -> Lane {
        let event_time = self.request_event_time();
        let mut state = self.lock();
        let lane = state.request_update_lane();
        state.root.pending_updates.push(Update {
            lane,
            event_time,
            element: element.into(),
        });
        let root = state.root.current;
        tracing::debug!(?lane, "root update");
        // The root fiber is always mounted.
        if let Err(err) = self.schedule_update_locked(&mut state, root, lane, event_time) {
            tracing::error!(%err, "root fiber is not mounted");
        }
        lane
    }

    /// Schedule a re-render of `fiber` on `lane`.
    ///
    /// Marks the lane on the fiber and on the child lanes of every ancestor,
    /// records it on the root and makes sure a task will process it.
    pub fn schedule_update_on_fiber(&self, fiber: FiberId, lane: Lane, event_time: Timestamp) -> Result<(), ValidationError> {
        let mut state = self.lock();
        self.schedule_update_locked(&mut state, fiber, lane, event_time)
    }

    fn schedule_update_locked(
        &self,
        state: &mut RendererState<H>,
        fiber: FiberId,
        lane: Lane,
        event_time: Timestamp,
    ) -> Result<(), ValidationError> {
        state.mark_update_lane_from_fiber_to_root(fiber, lane)?;
        state.root.lanes.mark_updated(lane, event_time);
        self.ensure_root_is_scheduled(state);
        Ok(())
    }

    /// Run `f` with `priority` as the update priority.
    pub fn with_update_priority<R>(&self, priority: EventPriority, f: impl FnOnce() -> R) -> R {
        let previous = self.lock().update_priority.replace(priority);
        let _guard = UpdatePriorityGuard {
            renderer: self,
            previous,
        };
        f()
    }

    /// Run `f` at discrete priority, then flush all pending sync work.
    pub fn flush_sync<R>(&self, f: impl FnOnce() -> R) -> R {
        let result = self.with_update_priority(EventPriority::Discrete, f);
        self.flush_sync_work();
        result
    }

    /// Run `f` as a transition: its updates share one transition lane.
    pub fn start_transition<R>(&self, f: impl FnOnce() -> R) -> R {
        let previous = std::mem::replace(&mut self.lock().in_transition, true);
        let _guard = TransitionGuard { renderer: self, previous };
        f()
    }

    /// Render and commit queued sync work now.
    pub fn flush_sync_work(&self) {
        loop {
            let mut state = self.lock();
            if !state.sync_work_queued {
                return;
            }
            state.sync_work_queued = false;
            self.perform_sync_work_on_root(&mut state);
        }
    }

    /// Errors of aborted renders since the last call.
    pub fn take_errors(&self) -> Vec<Error> {
        std::mem::take(&mut self.lock().errors)
    }

    /// Inspect the committed tree.
    pub fn with_committed_tree<R>(&self, f: impl FnOnce(CommittedTree<'_>) -> R) -> R {
        let state = self.lock();
        f(CommittedTree::new(&state.arena, state.root.current))
    }

    /// Inspect the host.
    pub fn with_host<R>(&self, f: impl FnOnce(&H) -> R) -> R {
        f(&self.lock().host)
    }

    /// Mutate the host, e.g. to change what it reports as the current event
    /// priority.
    pub fn with_host_mut<R>(&self, f: impl FnOnce(&mut H) -> R) -> R {
        f(&mut self.lock().host)
    }

    /// Make sure exactly one task exists for the most urgent pending lanes.
    fn ensure_root_is_scheduled(&self, state: &mut RendererState<H>) {
        let now = self.scheduler.now();
        state.root.lanes.mark_starved_lanes_as_expired(now);

        let wip_lanes = state.in_progress.map_or(Lanes::NONE, |wip| wip.lanes);
        let next_lanes = state.root.lanes.next_lanes(wip_lanes);
        let existing = state.root.callback_node;

        if next_lanes.is_empty() {
            if let Some(task) = existing {
                self.scheduler.cancel_callback(&task);
            }
            state.root.callback_node = None;
            state.root.callback_priority = Lanes::NONE;
            return;
        }

        let new_priority = next_lanes.highest_priority_lane();
        if state.root.callback_priority == new_priority {
            let alive = if new_priority == Lanes::SYNC {
                state.sync_work_queued
            } else {
                existing.is_some_and(|task| self.scheduler.task_state(&task).is_some())
            };
            if alive {
                cov_mark::hit!(root_task_reused);
                return;
            }
        }

        if let Some(task) = existing {
            tracing::trace!(task = task.id(), "cancelling root task");
            self.scheduler.cancel_callback(&task);
        }

        let new_node = if new_priority == Lanes::SYNC {
            state.sync_work_queued = true;
            if !state.sync_flush_scheduled {
                state.sync_flush_scheduled = true;
                let renderer = self.clone();
                self.scheduler.schedule_callback(PriorityLevel::Immediate, move |_| {
                    renderer.lock().sync_flush_scheduled = false;
                    renderer.flush_sync_work();
                    Continuation::Complete
                });
            }
            None
        } else {
            let priority = lanes_to_event_priority(next_lanes).to_scheduler_priority();
            let renderer = self.clone();
            let task = self.scheduler.schedule_callback(priority, move |did_timeout| {
                renderer.perform_concurrent_work_on_root(did_timeout)
            });
            tracing::debug!(?next_lanes, ?priority, task = task.id(), "scheduled root task");
            Some(task)
        };
        state.root.callback_priority = new_priority;
        state.root.callback_node = new_node;
    }

    /// Body of a root task.
    fn perform_concurrent_work_on_root(&self, did_timeout: bool) -> Continuation {
        let mut state = self.lock();
        let original_callback_node = state.root.callback_node;

        let wip_lanes = state.in_progress.map_or(Lanes::NONE, |wip| wip.lanes);
        let lanes = state.root.lanes.next_lanes(wip_lanes);
        if lanes.is_empty() {
            return Continuation::Complete;
        }

        let blocking = !state.options.concurrent_updates_by_default && lanes.includes_blocking();
        let should_time_slice = !blocking && !state.root.lanes.includes_expired_lane(lanes) && !did_timeout;
        tracing::trace!(?lanes, should_time_slice, "performing concurrent work");

        let status = if should_time_slice {
            self.render_root_concurrent(&mut state, lanes)
        } else {
            state.render_root_sync(lanes).map(|()| RenderStatus::Completed)
        };
        match status {
            Ok(RenderStatus::Completed) => state.commit_root(),
            Ok(RenderStatus::Yielded) => {}
            Err(err) => state.abort_render(lanes, err),
        }

        self.ensure_root_is_scheduled(&mut state);
        if state.root.callback_node.is_some() && state.root.callback_node == original_callback_node {
            cov_mark::hit!(root_task_continued);
            drop(state);
            let renderer = self.clone();
            return Continuation::yield_with(move |did_timeout| renderer.perform_concurrent_work_on_root(did_timeout));
        }
        Continuation::Complete
    }

    fn perform_sync_work_on_root(&self, state: &mut RendererState<H>) {
        let lanes = state.root.lanes.next_lanes(Lanes::NONE);
        if !lanes.includes_some(Lanes::SYNC) {
            self.ensure_root_is_scheduled(state);
            return;
        }
        match state.render_root_sync(lanes) {
            Ok(()) => state.commit_root(),
            Err(err) => state.abort_render(lanes, err),
        }
        self.ensure_root_is_scheduled(state);
    }

    fn render_root_concurrent(&self, state: &mut RendererState<H>, lanes: Lanes) -> Result<RenderStatus, Error> {
        if state.in_progress.map(|wip| wip.lanes) != Some(lanes) {
            state.prepare_fresh_stack(lanes);
        }
        while let Some(unit) = state.next_unit() {
            if self.scheduler.should_yield_to_host() {
                tracing::trace!(?lanes, "render yielded");
                return Ok(RenderStatus::Yielded);
            }
            state.perform_unit_of_work(unit)?;
        }
        Ok(RenderStatus::Completed)
    }
}

impl<H: HostConfig> RendererState<H> {
    fn request_update_lane(&mut self) -> Lane {
        if self.options.mode == RootMode::Legacy {
            return Lanes::SYNC;
        }
        if self.in_transition {
            return *self
                .transition_lane
                .get_or_insert_with(|| self.allocator.claim_next_transition_lane());
        }
        match self.update_priority {
            Some(priority) => priority.lane(),
            None => self.host.current_event_priority().lane(),
        }
    }

    /// Mark `lane` on `fiber`, its alternate and the child lanes of every
    /// ancestor (both halves).
    fn mark_update_lane_from_fiber_to_root(&mut self, fiber: FiberId, lane: Lane) -> Result<(), ValidationError> {
        let arena = &mut self.arena;
        let Some(target) = arena.get_mut(fiber) else {
            return Err(ValidationError::UnmountedFiber);
        };
        target.lanes |= lane;
        let alternate = target.alternate;
        if let Some(alternate) = alternate.and_then(|id| arena.get_mut(id)) {
            alternate.lanes |= lane;
        }

        let mut node = fiber;
        while let Some(parent) = arena[node].parent.filter(|&parent| arena.contains(parent)) {
            let parent_fiber = &mut arena[parent];
            parent_fiber.child_lanes |= lane;
            let alternate = parent_fiber.alternate;
            if let Some(alternate) = alternate.and_then(|id| arena.get_mut(id)) {
                alternate.child_lanes |= lane;
            }
            node = parent;
        }

        let current = self.root.current;
        let reached_root = arena[node].tag == WorkTag::HostRoot
            && (node == current || arena[current].alternate == Some(node));
        if !reached_root {
            return Err(ValidationError::UnmountedFiber);
        }
        Ok(())
    }

    fn next_unit(&self) -> Option<FiberId> {
        self.in_progress.and_then(|wip| wip.next)
    }

    fn prepare_fresh_stack(&mut self, lanes: Lanes) {
        let current = self.root.current;
        if self.in_progress.is_some() {
            tracing::debug!(?lanes, "restarting render from the root");
        }
        self.arena.retain_tree(current);
        let root = create_work_in_progress(&mut self.arena, current, FiberProps::None);
        self.in_progress = Some(WorkInProgress {
            root,
            lanes,
            next: Some(root),
        });
    }

    fn render_root_sync(&mut self, lanes: Lanes) -> Result<(), Error> {
        if self.in_progress.map(|wip| wip.lanes) != Some(lanes) {
            self.prepare_fresh_stack(lanes);
        }
        while let Some(unit) = self.next_unit() {
            self.perform_unit_of_work(unit)?;
        }
        Ok(())
    }

    fn perform_unit_of_work(&mut self, unit: FiberId) -> Result<(), Error> {
        let lanes = self.in_progress.map_or(Lanes::NONE, |wip| wip.lanes);
        let current = self.arena[unit].alternate;
        tracing::trace!(fiber = ?unit, tag = ?self.arena[unit].tag, "begin work");
        let next = self.begin_work(current, unit, lanes)?;
        let fiber = &mut self.arena[unit];
        fiber.memoized_props = fiber.pending_props.clone();
        match next {
            Some(child) => self.set_next_unit(Some(child)),
            None => self.complete_unit_of_work(unit),
        }
        Ok(())
    }

    fn set_next_unit(&mut self, next: Option<FiberId>) {
        if let Some(wip) = self.in_progress.as_mut() {
            wip.next = next;
        }
    }

    fn complete_unit_of_work(&mut self, unit: FiberId) {
        let mut completed = unit;
        loop {
            let current = self.arena[completed].alternate;
            self.complete_work(current, completed);
            if let Some(sibling) = self.arena[completed].sibling {
                self.set_next_unit(Some(sibling));
                return;
            }
            match self.arena[completed].parent {
                Some(parent) => completed = parent,
                None => {
                    self.set_next_unit(None);
                    return;
                }
            }
        }
    }

    /// Drop a failed render: free its fibers, retire its lanes together with
    /// the updates on them and keep the error for the embedder.
    fn abort_render(&mut self, lanes: Lanes, err: Error) {
        tracing::warn!(%err, ?lanes, "render aborted; committed tree left untouched");
        self.in_progress = None;
        let current = self.root.current;
        self.arena.retain_tree(current);
        self.arena.clear_lanes(lanes);

        let alternate = self.arena[current].alternate;
        for id in std::iter::once(current).chain(alternate) {
            if let Some(queue) = self.arena[id].update_queue.as_mut() {
                queue.discard_lanes(lanes);
            }
        }
        self.root
            .pending_updates
            .retain(|update| !lanes.contains(update.lane));
        let remaining = self.root.lanes.pending.remove(lanes);
        self.root.lanes.mark_finished(remaining);
        self.errors.push(err);
    }

    /// Commit the finished work-in-progress tree.
    fn commit_root(&mut self) {
        let Some(wip) = self.in_progress.take() else {
            return;
        };
        let finished = wip.root;
        let remaining = self.arena[finished].lanes | self.arena[finished].child_lanes;
        self.root.lanes.mark_finished(remaining);

        tracing::debug!(lanes = ?wip.lanes, ?remaining, "committing root");
        self.commit_mutation_effects(finished);
        self.root.current = finished;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::Element;
    use crate::reconciler::test_host::TestHost;
    use crate::scheduler::{ManualClock, ManualHost};

    struct Harness {
        renderer: Renderer<TestHost>,
        host: Arc<ManualHost>,
    }

    impl Harness {
        fn new(options: RendererOptions) -> Self {
            let host = Arc::new(ManualHost::new());
            let scheduler = Scheduler::new(Arc::new(ManualClock::new()), host.clone());
            let renderer = Renderer::with_options(TestHost::new(), ContainerHandle::new(0), scheduler, options);
            Self { renderer, host }
        }

        fn flush(&self) {
            while self.host.take_callback_request() {
                self.renderer.scheduler().perform_work_until_deadline();
            }
        }

        fn markup(&self) -> String {
            self.renderer.with_host(|host| host.markup(ContainerHandle::new(0)))
        }
    }

    #[test]
    fn updates_take_the_host_event_priority() {
        let harness = Harness::new(RendererOptions::new());
        harness
            .renderer
            .with_host(|host| assert_eq!(host.current_event_priority(), EventPriority::Default));
        assert_eq!(harness.renderer.request_update_lane(), Lanes::DEFAULT);
        let lane = harness
            .renderer
            .with_update_priority(EventPriority::Continuous, || harness.renderer.request_update_lane());
        assert_eq!(lane, Lanes::INPUT_CONTINUOUS);
        assert_eq!(harness.renderer.request_update_lane(), Lanes::DEFAULT);
    }

    #[test]
    fn legacy_roots_are_always_sync() {
        let harness = Harness::new(RendererOptions::legacy());
        let lane = harness
            .renderer
            .start_transition(|| harness.renderer.request_update_lane());
        assert_eq!(lane, Lanes::SYNC);
    }

    #[test]
    fn one_transition_shares_one_lane() {
        let harness = Harness::new(RendererOptions::new());
        let (a, b) = harness.renderer.start_transition(|| {
            (harness.renderer.request_update_lane(), harness.renderer.request_update_lane())
        });
        assert_eq!(a, b);
        assert!(a.is_transition());
        let c = harness
            .renderer
            .start_transition(|| harness.renderer.request_update_lane());
        assert_ne!(a, c);
        assert!(c.is_transition());
    }

    #[test]
    fn update_is_rendered_by_a_normal_task() {
        let harness = Harness::new(RendererOptions::new());
        let lane = harness.renderer.update_container(Element::host("div").children("hi"));
        assert_eq!(lane, Lanes::DEFAULT);
        assert_eq!(harness.renderer.pending_lanes(), Lanes::DEFAULT);
        assert_eq!(harness.markup(), "");

        harness.flush();
        assert_eq!(harness.markup(), "<div>hi</div>");
        assert!(harness.renderer.pending_lanes().is_empty());
        assert!(!harness.renderer.scheduler().has_pending_work());
    }

    #[test]
    fn second_update_at_same_priority_reuses_the_task() {
        cov_mark::check!(root_task_reused);
        let harness = Harness::new(RendererOptions::new());
        harness.renderer.update_container("a");
        harness.renderer.update_container("b");
        harness.flush();
        assert_eq!(harness.markup(), "b");
    }

    #[test]
    fn sync_updates_flush_in_flush_sync() {
        let harness = Harness::new(RendererOptions::new());
        harness.renderer.flush_sync(|| {
            harness.renderer.update_container(Element::host("p"));
        });
        assert_eq!(harness.markup(), "<p></p>");
        // The Immediate task left behind finds nothing to do.
        harness.flush();
        assert_eq!(harness.markup(), "<p></p>");
    }

    #[test]
    fn stale_fiber_cannot_be_updated() {
        let harness = Harness::new(RendererOptions::new());
        harness
            .renderer
            .update_container(Node::list([Element::host("a").key("1").into()]));
        harness.flush();
        let child = harness
            .renderer
            .with_committed_tree(|tree| tree.root().children().next().map(|child| child.id()));
        let child = child.expect("mounted child");

        harness.renderer.update_container(Node::Empty);
        harness.flush();
        let err = harness
            .renderer
            .schedule_update_on_fiber(child, Lanes::DEFAULT, 0)
            .unwrap_err();
        assert_eq!(err, ValidationError::UnmountedFiber);
    }
}
