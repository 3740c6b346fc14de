//! Render phase, bottom-up half: create or diff host nodes and bubble effect
//! flags and child lanes to the parent.

use crate::lane::Lanes;

use super::fiber::{FiberArena, FiberId, StateNode, WorkTag};
use super::flags::Flags;
use super::host_config::{HostConfig, InstanceHandle};
use super::work_loop::RendererState;

/// Collect child lanes and subtree flags of `completed`.
///
/// If the fiber kept the exact children of its current twin, nothing below it
/// was rendered in this pass and only static flags are carried up.
fn bubble_properties(arena: &mut FiberArena, completed: FiberId) {
    let did_bailout = arena[completed]
        .alternate
        .and_then(|current| arena.get(current))
        .is_some_and(|current| current.child == arena[completed].child);

    let mut child_lanes = Lanes::NONE;
    let mut subtree_flags = Flags::NONE;
    let mut next = arena[completed].child;
    while let Some(id) = next {
        let child = &mut arena[id];
        child_lanes |= child.lanes | child.child_lanes;
        if did_bailout {
            subtree_flags |= child.subtree_flags.intersection(Flags::STATIC_MASK);
            subtree_flags |= child.flags.intersection(Flags::STATIC_MASK);
        } else {
            subtree_flags |= child.subtree_flags | child.flags;
        }
        child.parent = Some(completed);
        next = child.sibling;
    }

    let fiber = &mut arena[completed];
    fiber.subtree_flags |= subtree_flags;
    fiber.child_lanes = child_lanes;
}

/// Append the topmost host nodes below `wip` to the new `parent` node.
fn append_all_children<H: HostConfig>(arena: &FiberArena, host: &mut H, parent: InstanceHandle, wip: FiberId) {
    let Some(mut node) = arena[wip].child else {
        return;
    };
    loop {
        let fiber = &arena[node];
        match fiber.tag {
            WorkTag::HostComponent | WorkTag::HostText => {
                if let Some(child) = fiber.instance() {
                    host.append_initial_child(parent, child);
                }
            }
            // Portal children live in another container.
            WorkTag::HostPortal => {}
            _ => {
                if let Some(child) = fiber.child {
                    node = child;
                    continue;
                }
            }
        }
        loop {
            if let Some(sibling) = arena[node].sibling {
                node = sibling;
                break;
            }
            match arena[node].parent {
                Some(parent_fiber) if parent_fiber != wip => node = parent_fiber,
                _ => return,
            }
        }
    }
}

impl<H: HostConfig> RendererState<H> {
    pub(crate) fn complete_work(&mut self, current: Option<FiberId>, wip: FiberId) {
        match self.arena[wip].tag {
            WorkTag::HostComponent => self.complete_host_component(current, wip),
            WorkTag::HostText => self.complete_host_text(current, wip),
            WorkTag::HostRoot | WorkTag::HostPortal | WorkTag::FunctionComponent | WorkTag::Fragment => {}
        }
        bubble_properties(&mut self.arena, wip);
    }

    fn complete_host_component(&mut self, current: Option<FiberId>, wip: FiberId) {
        let Some(new_props) = self.arena[wip].pending_props.element().cloned() else {
            return;
        };
        let ty = self.arena[wip].host_type().unwrap_or_default().to_owned();

        let existing = current.and(self.arena[wip].instance());
        match existing {
            Some(instance) => {
                let Some(old_props) = current.and_then(|current| self.arena[current].memoized_props.element().cloned())
                else {
                    return;
                };
                if std::sync::Arc::ptr_eq(&old_props, &new_props) {
                    return;
                }
                if self.host.prepare_update(instance, &ty, &old_props, &new_props) {
                    self.arena[wip].flags |= Flags::UPDATE;
                }
            }
            None => {
                let instance = self.host.create_instance(&ty, &new_props);
                append_all_children(&self.arena, &mut self.host, instance, wip);
                self.arena[wip].state_node = Some(StateNode::Instance(instance));
                tracing::trace!(fiber = ?wip, ty = %ty, instance = instance.raw(), "created host instance");
            }
        }
    }

    fn complete_host_text(&mut self, current: Option<FiberId>, wip: FiberId) {
        let new_text = self.arena[wip].pending_props.text().unwrap_or_default().to_owned();
        let existing = current.and(self.arena[wip].instance());
        match existing {
            Some(_) => {
                let changed = current
                    .and_then(|current| self.arena[current].memoized_props.text())
                    .is_none_or(|old_text| old_text != new_text);
                if changed {
                    self.arena[wip].flags |= Flags::UPDATE;
                }
            }
            None => {
                let instance = self.host.create_text_instance(&new_text);
                self.arena[wip].state_node = Some(StateNode::Instance(instance));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::element::Element;
    use crate::reconciler::fiber::{FiberProps, create_fiber_from_element, create_work_in_progress};

    #[test]
    fn bailed_out_children_only_bubble_static_flags() {
        let mut arena = FiberArena::new();
        let parent = create_fiber_from_element(&mut arena, &Element::host("div"), Lanes::NONE);
        let child = create_fiber_from_element(&mut arena, &Element::host("span"), Lanes::IDLE);
        arena[child].flags = Flags::PLACEMENT | Flags::REF_STATIC;
        arena[parent].child = Some(child);

        let wip = create_work_in_progress(&mut arena, parent, FiberProps::None);
        bubble_properties(&mut arena, wip);
        assert_eq!(arena[wip].subtree_flags, Flags::REF_STATIC);
        assert_eq!(arena[wip].child_lanes, Lanes::IDLE);
        assert_eq!(arena[child].parent, Some(wip));
    }

    #[test]
    fn rendered_children_bubble_every_flag() {
        let mut arena = FiberArena::new();
        let parent = create_fiber_from_element(&mut arena, &Element::host("div"), Lanes::NONE);
        let a = create_fiber_from_element(&mut arena, &Element::host("a"), Lanes::NONE);
        let b = create_fiber_from_element(&mut arena, &Element::host("b"), Lanes::NONE);
        arena[a].flags = Flags::PLACEMENT;
        arena[b].subtree_flags = Flags::UPDATE;
        arena[b].child_lanes = Lanes::DEFAULT;
        arena[parent].child = Some(a);
        arena[a].sibling = Some(b);

        bubble_properties(&mut arena, parent);
        assert_eq!(arena[parent].subtree_flags, Flags::PLACEMENT | Flags::UPDATE);
        assert_eq!(arena[parent].child_lanes, Lanes::DEFAULT);
    }
}
