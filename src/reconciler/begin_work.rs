//! Render phase, top-down half: compute the children of a fiber.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::error::{Error, invariant_violation, panic_message};
use crate::lane::Lanes;

use super::child::{ChildReconciler, clone_child_fibers};
use super::element::{ElementType, Node, Props};
use super::fiber::{FiberArena, FiberId, WorkTag};
use super::flags::Flags;
use super::host_config::HostConfig;
use super::update_queue::UpdateQueue;
use super::work_loop::RendererState;

/// Reconcile `next_children` into the children of `wip`.
fn reconcile_children(
    arena: &mut FiberArena,
    current: Option<FiberId>,
    wip: FiberId,
    next_children: &Node,
    render_lanes: Lanes,
) -> Result<(), Error> {
    let child = match current {
        None => ChildReconciler::MOUNT.reconcile_child_fibers(arena, wip, None, next_children, render_lanes)?,
        Some(current) => {
            let current_child = arena[current].child;
            ChildReconciler::RECONCILE.reconcile_child_fibers(arena, wip, current_child, next_children, render_lanes)?
        }
    };
    arena[wip].child = child;
    Ok(())
}

/// Skip `wip` itself; descend only if something below has work.
fn bailout_on_already_finished_work(arena: &mut FiberArena, wip: FiberId, render_lanes: Lanes) -> Option<FiberId> {
    if !arena[wip].child_lanes.includes_some(render_lanes) {
        cov_mark::hit!(subtree_bailout);
        tracing::trace!(fiber = ?wip, "subtree has no work");
        return None;
    }
    clone_child_fibers(arena, wip);
    arena[wip].child
}

fn element_props(arena: &FiberArena, wip: FiberId) -> Arc<Props> {
    match arena[wip].pending_props.element() {
        Some(props) => props.clone(),
        None => invariant_violation!(Arc::default(), "component fiber {wip:?} has no element props"),
    }
}

impl<H: HostConfig> RendererState<H> {
    /// Begin work on `wip` and return the next fiber to work on, its first
    /// child.
    pub(crate) fn begin_work(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        render_lanes: Lanes,
    ) -> Result<Option<FiberId>, Error> {
        if let Some(current) = current {
            let unchanged = self.arena[current]
                .memoized_props
                .same(&self.arena[wip].pending_props);
            if unchanged && !self.arena[current].lanes.includes_some(render_lanes) {
                return Ok(bailout_on_already_finished_work(&mut self.arena, wip, render_lanes));
            }
        }

        self.arena[wip].lanes = Lanes::NONE;
        match self.arena[wip].tag {
            WorkTag::HostRoot => self.update_host_root(current, wip, render_lanes),
            WorkTag::FunctionComponent => self.update_function_component(current, wip, render_lanes),
            WorkTag::HostComponent => self.update_host_component(current, wip, render_lanes),
            WorkTag::HostText => Ok(None),
            WorkTag::HostPortal => self.update_portal_component(current, wip, render_lanes),
            WorkTag::Fragment => {
                let children = self.arena[wip].pending_props.children().cloned().unwrap_or_default();
                reconcile_children(&mut self.arena, current, wip, &children, render_lanes)?;
                Ok(self.arena[wip].child)
            }
        }
    }

    fn update_host_root(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        render_lanes: Lanes,
    ) -> Result<Option<FiberId>, Error> {
        // Pending updates go into both halves so an interrupted render
        // doesn't lose them.
        let pending = std::mem::take(&mut self.root.pending_updates);
        if let Some(queue) = current.and_then(|current| self.arena[current].update_queue.as_mut()) {
            queue.enqueue(&pending);
        }
        let fiber = &mut self.arena[wip];
        let queue = fiber.update_queue.get_or_insert_with(UpdateQueue::default);
        queue.enqueue(&pending);
        let processed = queue.process(render_lanes);

        let previous = fiber.memoized_state.replace(processed.state.clone());
        fiber.lanes = processed.remaining_lanes;
        if previous.is_some_and(|previous| previous.same(&processed.state)) {
            return Ok(bailout_on_already_finished_work(&mut self.arena, wip, render_lanes));
        }
        reconcile_children(&mut self.arena, current, wip, &processed.state, render_lanes)?;
        Ok(self.arena[wip].child)
    }

    fn update_function_component(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        render_lanes: Lanes,
    ) -> Result<Option<FiberId>, Error> {
        let Some(ElementType::Component(component)) = self.arena[wip].ty.clone() else {
            return Ok(invariant_violation!(None, "function component fiber {wip:?} has no component type"));
        };
        let props = element_props(&self.arena, wip);

        tracing::trace!(component = component.name(), "rendering component");
        let children = catch_unwind(AssertUnwindSafe(|| component.render(&props))).map_err(|payload| {
            Error::ComponentPanicked {
                component: component.name().to_owned(),
                message: panic_message(payload.as_ref()),
            }
        })?;

        self.arena[wip].flags |= Flags::PERFORMED_WORK;
        reconcile_children(&mut self.arena, current, wip, &children, render_lanes)?;
        Ok(self.arena[wip].child)
    }

    fn update_host_component(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        render_lanes: Lanes,
    ) -> Result<Option<FiberId>, Error> {
        let props = element_props(&self.arena, wip);
        let ty = self.arena[wip].host_type().unwrap_or_default().to_owned();

        let is_direct_text_child = self.host.should_set_text_content(&ty, &props);
        let next_children = if is_direct_text_child {
            // The host renders the text itself; no child fiber.
            Node::Empty
        } else {
            props.children.clone()
        };
        let previous_was_text = current
            .and_then(|current| self.arena[current].memoized_props.element().cloned())
            .is_some_and(|previous| self.host.should_set_text_content(&ty, &previous));
        if !is_direct_text_child && previous_was_text {
            self.arena[wip].flags |= Flags::CONTENT_RESET;
        }

        reconcile_children(&mut self.arena, current, wip, &next_children, render_lanes)?;
        Ok(self.arena[wip].child)
    }

    fn update_portal_component(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        render_lanes: Lanes,
    ) -> Result<Option<FiberId>, Error> {
        let children = self.arena[wip].pending_props.children().cloned().unwrap_or_default();
        match current {
            // A new portal still places its children: the portal itself has
            // no host node that would carry them in.
            None => {
                let child = ChildReconciler::RECONCILE.reconcile_child_fibers(
                    &mut self.arena,
                    wip,
                    None,
                    &children,
                    render_lanes,
                )?;
                self.arena[wip].child = child;
            }
            Some(_) => reconcile_children(&mut self.arena, current, wip, &children, render_lanes)?,
        }
        Ok(self.arena[wip].child)
    }
}
