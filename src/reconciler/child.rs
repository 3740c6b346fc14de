//! Child reconciliation: diffing a new child description against the
//! current list of child fibers.
//!
//! The result is a freshly linked list of work-in-progress children. Side
//! effects are only recorded by the tracking variant
//! ([`ChildReconciler::RECONCILE`]):
//!
//! - `PLACEMENT` on fibers that are new or moved,
//! - the parent's `deletions` list (plus `CHILD_DELETION`) for old fibers
//!   with no counterpart.
//!
//! The mounting variant ([`ChildReconciler::MOUNT`]) is used under a parent
//! that is itself new; its whole subtree is inserted at once, so nothing
//! below it needs an effect.
//!
//! Lists are diffed in two phases. Phase 1 walks old and new children in
//! lockstep and stops at the first slot whose key does not match; there is no
//! search from the other end. If both sides still have children left, the
//! remaining old fibers are put in a map by key (or index, when unkeyed) and
//! looked up for each remaining new child. A reused fiber is a *move* if its
//! old index lies before the highest old index kept so far.

use indexmap::IndexMap;
use std::sync::Arc;

use crate::error::ValidationError;
use crate::hash::FastHashBuilder;
use crate::lane::Lanes;

use super::element::{Element, ElementType, Iterable, Key, Node, Portal};
use super::fiber::{
    FiberArena, FiberId, FiberProps, WorkTag, create_fiber_from_element, create_fiber_from_fragment,
    create_fiber_from_portal, create_fiber_from_text, create_work_in_progress,
};
use super::flags::Flags;

/// Map key of an old child in the fallback phase.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum MapKey {
    Key(Key),
    Index(usize),
}

fn map_key(key: Option<&Key>, index: usize) -> MapKey {
    match key {
        Some(key) => MapKey::Key(key.clone()),
        None => MapKey::Index(index),
    }
}

/// Remaining old children, in sibling order.
type ExistingChildren = IndexMap<MapKey, FiberId, FastHashBuilder>;

type ChildResult = Result<Option<FiberId>, ValidationError>;

fn invalid_object_child(fields: &[String]) -> ValidationError {
    ValidationError::ObjectAsChild {
        found: format!("object with keys {{{}}}", fields.join(", ")),
    }
}

fn is_compatible(arena: &FiberArena, fiber: FiberId, element: &Element) -> bool {
    let fiber = &arena[fiber];
    if fiber.element_type.as_ref() == Some(&element.ty) {
        return true;
    }
    match &element.ty {
        ElementType::Lazy(lazy) => fiber.ty.as_ref() == Some(&lazy.resolve()),
        _ => false,
    }
}

fn link(
    arena: &mut FiberArena,
    first: &mut Option<FiberId>,
    previous: &mut Option<FiberId>,
    fiber: FiberId,
) {
    match *previous {
        None => *first = Some(fiber),
        Some(previous) => arena[previous].sibling = Some(fiber),
    }
    *previous = Some(fiber);
}

/// One of the two reconciler variants.
#[derive(Copy, Clone, Debug)]
pub(crate) struct ChildReconciler {
    track_side_effects: bool,
}

impl ChildReconciler {
    /// Diff against existing children, recording effects.
    pub(crate) const RECONCILE: ChildReconciler = ChildReconciler {
        track_side_effects: true,
    };

    /// Build children under a new parent without effects.
    pub(crate) const MOUNT: ChildReconciler = ChildReconciler {
        track_side_effects: false,
    };

    /// Reconcile `new_child` against the list starting at
    /// `current_first_child` and return the first new child.
    pub(crate) fn reconcile_child_fibers(
        &self,
        arena: &mut FiberArena,
        return_fiber: FiberId,
        current_first_child: Option<FiberId>,
        new_child: &Node,
        lanes: Lanes,
    ) -> ChildResult {
        // A top-level unkeyed fragment stands for its children.
        let new_child = match new_child {
            Node::Element(element) if element.key.is_none() && element.ty == ElementType::Fragment => {
                &element.props.children
            }
            other => other,
        };

        match new_child {
            Node::Element(element) => {
                let fiber = self.reconcile_single_element(arena, return_fiber, current_first_child, element, lanes);
                Ok(Some(self.place_single_child(arena, fiber)))
            }
            Node::Portal(portal) => {
                let fiber = self.reconcile_single_portal(arena, return_fiber, current_first_child, portal, lanes);
                Ok(Some(self.place_single_child(arena, fiber)))
            }
            Node::Lazy(lazy) => {
                let resolved = lazy.resolve();
                self.reconcile_child_fibers(arena, return_fiber, current_first_child, &resolved, lanes)
            }
            Node::List(children) => {
                self.reconcile_children_array(arena, return_fiber, current_first_child, children, lanes)
            }
            Node::Iter(children) => {
                self.reconcile_children_iterator(arena, return_fiber, current_first_child, children, lanes)
            }
            Node::Text(text) => {
                let fiber = self.reconcile_single_text_node(arena, return_fiber, current_first_child, text, lanes);
                Ok(Some(self.place_single_child(arena, fiber)))
            }
            Node::Object(fields) => Err(invalid_object_child(fields)),
            Node::Empty => {
                self.delete_remaining_children(arena, return_fiber, current_first_child);
                Ok(None)
            }
        }
    }

    fn delete_child(&self, arena: &mut FiberArena, return_fiber: FiberId, child: FiberId) {
        if !self.track_side_effects {
            return;
        }
        let parent = &mut arena[return_fiber];
        parent.deletions.push(child);
        parent.flags |= Flags::CHILD_DELETION;
    }

    fn delete_remaining_children(
        &self,
        arena: &mut FiberArena,
        return_fiber: FiberId,
        current_first_child: Option<FiberId>,
    ) {
        if !self.track_side_effects {
            return;
        }
        let mut child = current_first_child;
        while let Some(id) = child {
            self.delete_child(arena, return_fiber, id);
            child = arena[id].sibling;
        }
    }

    /// Delete the old children no new child claimed, in old sibling order.
    /// Matches are `swap_remove`d from the map, so its order is scrambled.
    fn delete_unmatched_children(&self, arena: &mut FiberArena, return_fiber: FiberId, existing: ExistingChildren) {
        let mut unmatched: Vec<FiberId> = existing.into_values().collect();
        unmatched.sort_unstable_by_key(|&old| arena[old].index);
        for old in unmatched {
            self.delete_child(arena, return_fiber, old);
        }
    }

    fn map_remaining_children(&self, arena: &FiberArena, current_first_child: Option<FiberId>) -> ExistingChildren {
        let mut existing = ExistingChildren::default();
        let mut child = current_first_child;
        while let Some(id) = child {
            let fiber = &arena[id];
            existing.insert(map_key(fiber.key.as_ref(), fiber.index), id);
            child = fiber.sibling;
        }
        existing
    }

    /// Work-in-progress twin of `fiber` as the only child of its list.
    fn use_fiber(&self, arena: &mut FiberArena, fiber: FiberId, pending_props: FiberProps) -> FiberId {
        let clone = create_work_in_progress(arena, fiber, pending_props);
        arena[clone].index = 0;
        arena[clone].sibling = None;
        clone
    }

    fn place_child(
        &self,
        arena: &mut FiberArena,
        new_fiber: FiberId,
        last_placed_index: usize,
        new_index: usize,
    ) -> usize {
        arena[new_fiber].index = new_index;
        if !self.track_side_effects {
            arena[new_fiber].flags |= Flags::FORKED;
            return last_placed_index;
        }
        let old_index = arena[new_fiber]
            .alternate
            .and_then(|current| arena.get(current))
            .map(|current| current.index);
        match old_index {
            Some(old_index) if old_index >= last_placed_index => old_index,
            Some(_) => {
                cov_mark::hit!(child_moved);
                arena[new_fiber].flags |= Flags::PLACEMENT;
                last_placed_index
            }
            None => {
                arena[new_fiber].flags |= Flags::PLACEMENT;
                last_placed_index
            }
        }
    }

    fn place_single_child(&self, arena: &mut FiberArena, new_fiber: FiberId) -> FiberId {
        if self.track_side_effects && arena[new_fiber].alternate.is_none() {
            arena[new_fiber].flags |= Flags::PLACEMENT;
        }
        new_fiber
    }

    fn update_text_node(
        &self,
        arena: &mut FiberArena,
        return_fiber: FiberId,
        current: Option<FiberId>,
        text: &Arc<str>,
        lanes: Lanes,
    ) -> FiberId {
        let fiber = match current.filter(|&id| arena[id].tag == WorkTag::HostText) {
            Some(existing) => self.use_fiber(arena, existing, FiberProps::Text(text.clone())),
            None => create_fiber_from_text(arena, text.clone(), lanes),
        };
        arena[fiber].parent = Some(return_fiber);
        fiber
    }

    fn update_element(
        &self,
        arena: &mut FiberArena,
        return_fiber: FiberId,
        current: Option<FiberId>,
        element: &Element,
        lanes: Lanes,
    ) -> FiberId {
        if element.ty == ElementType::Fragment {
            return self.update_fragment(
                arena,
                return_fiber,
                current,
                element.props.children.clone(),
                lanes,
                element.key.clone(),
            );
        }
        let fiber = match current.filter(|&id| is_compatible(arena, id, element)) {
            Some(existing) => self.use_fiber(arena, existing, FiberProps::Element(element.props.clone())),
            None => create_fiber_from_element(arena, element, lanes),
        };
        arena[fiber].parent = Some(return_fiber);
        fiber
    }

    fn update_portal(
        &self,
        arena: &mut FiberArena,
        return_fiber: FiberId,
        current: Option<FiberId>,
        portal: &Portal,
        lanes: Lanes,
    ) -> FiberId {
        let reusable = current.filter(|&id| {
            let fiber = &arena[id];
            fiber.tag == WorkTag::HostPortal && fiber.container() == Some(portal.container)
        });
        let fiber = match reusable {
            Some(existing) => self.use_fiber(arena, existing, FiberProps::Children(portal.children.clone())),
            None => create_fiber_from_portal(arena, portal, lanes),
        };
        arena[fiber].parent = Some(return_fiber);
        fiber
    }

    fn update_fragment(
        &self,
        arena: &mut FiberArena,
        return_fiber: FiberId,
        current: Option<FiberId>,
        children: Node,
        lanes: Lanes,
        key: Option<Key>,
    ) -> FiberId {
        let fiber = match current.filter(|&id| arena[id].tag == WorkTag::Fragment) {
            Some(existing) => self.use_fiber(arena, existing, FiberProps::Children(children)),
            None => create_fiber_from_fragment(arena, children, lanes, key),
        };
        arena[fiber].parent = Some(return_fiber);
        fiber
    }

    fn create_child(&self, arena: &mut FiberArena, return_fiber: FiberId, new_child: &Node, lanes: Lanes) -> ChildResult {
        let fiber = match new_child {
            Node::Text(text) => create_fiber_from_text(arena, text.clone(), lanes),
            Node::Element(element) => create_fiber_from_element(arena, element, lanes),
            Node::Portal(portal) => create_fiber_from_portal(arena, portal, lanes),
            Node::Lazy(lazy) => {
                let resolved = lazy.resolve();
                return self.create_child(arena, return_fiber, &resolved, lanes);
            }
            Node::List(_) | Node::Iter(_) => create_fiber_from_fragment(arena, new_child.clone(), lanes, None),
            Node::Object(fields) => return Err(invalid_object_child(fields)),
            Node::Empty => return Ok(None),
        };
        arena[fiber].parent = Some(return_fiber);
        Ok(Some(fiber))
    }

    /// Reuse `old_fiber` for `new_child` if their keys match. `None` means
    /// the slot does not match and phase 1 ends.
    fn update_slot(
        &self,
        arena: &mut FiberArena,
        return_fiber: FiberId,
        old_fiber: Option<FiberId>,
        new_child: &Node,
        lanes: Lanes,
    ) -> ChildResult {
        let key = old_fiber.and_then(|id| arena[id].key.clone());
        let fiber = match new_child {
            // Text nodes carry no key.
            Node::Text(text) if key.is_none() => self.update_text_node(arena, return_fiber, old_fiber, text, lanes),
            Node::Element(element) if element.key == key => {
                self.update_element(arena, return_fiber, old_fiber, element, lanes)
            }
            Node::Portal(portal) if portal.key == key => {
                self.update_portal(arena, return_fiber, old_fiber, portal, lanes)
            }
            Node::Lazy(lazy) => {
                let resolved = lazy.resolve();
                return self.update_slot(arena, return_fiber, old_fiber, &resolved, lanes);
            }
            Node::List(_) | Node::Iter(_) if key.is_none() => {
                self.update_fragment(arena, return_fiber, old_fiber, new_child.clone(), lanes, None)
            }
            Node::Object(fields) => return Err(invalid_object_child(fields)),
            _ => return Ok(None),
        };
        Ok(Some(fiber))
    }

    fn update_from_map(
        &self,
        arena: &mut FiberArena,
        existing: &ExistingChildren,
        return_fiber: FiberId,
        new_index: usize,
        new_child: &Node,
        lanes: Lanes,
    ) -> ChildResult {
        let by_index = || existing.get(&MapKey::Index(new_index)).copied();
        let fiber = match new_child {
            Node::Text(text) => self.update_text_node(arena, return_fiber, by_index(), text, lanes),
            Node::Element(element) => {
                let matched = existing.get(&map_key(element.key.as_ref(), new_index)).copied();
                self.update_element(arena, return_fiber, matched, element, lanes)
            }
            Node::Portal(portal) => {
                let matched = existing.get(&map_key(portal.key.as_ref(), new_index)).copied();
                self.update_portal(arena, return_fiber, matched, portal, lanes)
            }
            Node::Lazy(lazy) => {
                let resolved = lazy.resolve();
                return self.update_from_map(arena, existing, return_fiber, new_index, &resolved, lanes);
            }
            Node::List(_) | Node::Iter(_) => {
                self.update_fragment(arena, return_fiber, by_index(), new_child.clone(), lanes, None)
            }
            Node::Object(fields) => return Err(invalid_object_child(fields)),
            Node::Empty => return Ok(None),
        };
        Ok(Some(fiber))
    }

    fn reconcile_children_array(
        &self,
        arena: &mut FiberArena,
        return_fiber: FiberId,
        current_first_child: Option<FiberId>,
        new_children: &[Node],
        lanes: Lanes,
    ) -> ChildResult {
        let mut resulting_first_child = None;
        let mut previous_new_fiber = None;

        let mut old_fiber = current_first_child;
        let mut last_placed_index = 0;
        let mut new_index = 0;

        while let Some(old) = old_fiber {
            if new_index >= new_children.len() {
                break;
            }
            // An old fiber ahead of the cursor belongs to a later slot.
            let (slot, next_old_fiber) = if arena[old].index > new_index {
                (None, Some(old))
            } else {
                (Some(old), arena[old].sibling)
            };
            let Some(new_fiber) =
                self.update_slot(arena, return_fiber, slot, &new_children[new_index], lanes)?
            else {
                break;
            };
            if self.track_side_effects {
                if let Some(old) = slot {
                    if arena[new_fiber].alternate.is_none() {
                        // Matched the slot without reusing the fiber.
                        self.delete_child(arena, return_fiber, old);
                    }
                }
            }
            last_placed_index = self.place_child(arena, new_fiber, last_placed_index, new_index);
            link(arena, &mut resulting_first_child, &mut previous_new_fiber, new_fiber);
            old_fiber = next_old_fiber;
            new_index += 1;
        }

        if new_index == new_children.len() {
            self.delete_remaining_children(arena, return_fiber, old_fiber);
            return Ok(resulting_first_child);
        }

        if old_fiber.is_none() {
            for (index, child) in new_children.iter().enumerate().skip(new_index) {
                let Some(new_fiber) = self.create_child(arena, return_fiber, child, lanes)? else {
                    continue;
                };
                last_placed_index = self.place_child(arena, new_fiber, last_placed_index, index);
                link(arena, &mut resulting_first_child, &mut previous_new_fiber, new_fiber);
            }
            return Ok(resulting_first_child);
        }

        cov_mark::hit!(children_key_map_fallback);
        let mut existing = self.map_remaining_children(arena, old_fiber);
        for (index, child) in new_children.iter().enumerate().skip(new_index) {
            let Some(new_fiber) = self.update_from_map(arena, &existing, return_fiber, index, child, lanes)? else {
                continue;
            };
            if self.track_side_effects && arena[new_fiber].alternate.is_some() {
                existing.swap_remove(&map_key(arena[new_fiber].key.as_ref(), index));
            }
            last_placed_index = self.place_child(arena, new_fiber, last_placed_index, index);
            link(arena, &mut resulting_first_child, &mut previous_new_fiber, new_fiber);
        }
        if self.track_side_effects {
            self.delete_unmatched_children(arena, return_fiber, existing);
        }
        Ok(resulting_first_child)
    }

    fn reconcile_children_iterator(
        &self,
        arena: &mut FiberArena,
        return_fiber: FiberId,
        current_first_child: Option<FiberId>,
        new_children: &Iterable,
        lanes: Lanes,
    ) -> ChildResult {
        let mut resulting_first_child = None;
        let mut previous_new_fiber = None;

        let mut old_fiber = current_first_child;
        let mut last_placed_index = 0;
        let mut new_index = 0;

        let mut iter = new_children.iter();
        let mut step = iter.next();

        while let Some(old) = old_fiber {
            let Some(child) = step.as_ref() else {
                break;
            };
            let (slot, next_old_fiber) = if arena[old].index > new_index {
                (None, Some(old))
            } else {
                (Some(old), arena[old].sibling)
            };
            let Some(new_fiber) = self.update_slot(arena, return_fiber, slot, child, lanes)? else {
                break;
            };
            if self.track_side_effects {
                if let Some(old) = slot {
                    if arena[new_fiber].alternate.is_none() {
                        self.delete_child(arena, return_fiber, old);
                    }
                }
            }
            last_placed_index = self.place_child(arena, new_fiber, last_placed_index, new_index);
            link(arena, &mut resulting_first_child, &mut previous_new_fiber, new_fiber);
            old_fiber = next_old_fiber;
            new_index += 1;
            step = iter.next();
        }

        if step.is_none() {
            self.delete_remaining_children(arena, return_fiber, old_fiber);
            return Ok(resulting_first_child);
        }

        let remaining = step.into_iter().chain(iter).enumerate();

        if old_fiber.is_none() {
            for (offset, child) in remaining {
                let Some(new_fiber) = self.create_child(arena, return_fiber, &child, lanes)? else {
                    continue;
                };
                last_placed_index = self.place_child(arena, new_fiber, last_placed_index, new_index + offset);
                link(arena, &mut resulting_first_child, &mut previous_new_fiber, new_fiber);
            }
            return Ok(resulting_first_child);
        }

        let mut existing = self.map_remaining_children(arena, old_fiber);
        for (offset, child) in remaining {
            let index = new_index + offset;
            let Some(new_fiber) = self.update_from_map(arena, &existing, return_fiber, index, &child, lanes)? else {
                continue;
            };
            if self.track_side_effects && arena[new_fiber].alternate.is_some() {
                existing.swap_remove(&map_key(arena[new_fiber].key.as_ref(), index));
            }
            last_placed_index = self.place_child(arena, new_fiber, last_placed_index, index);
            link(arena, &mut resulting_first_child, &mut previous_new_fiber, new_fiber);
        }
        if self.track_side_effects {
            self.delete_unmatched_children(arena, return_fiber, existing);
        }
        Ok(resulting_first_child)
    }

    fn reconcile_single_text_node(
        &self,
        arena: &mut FiberArena,
        return_fiber: FiberId,
        current_first_child: Option<FiberId>,
        text: &Arc<str>,
        lanes: Lanes,
    ) -> FiberId {
        if let Some(first) = current_first_child.filter(|&id| arena[id].tag == WorkTag::HostText) {
            let rest = arena[first].sibling;
            self.delete_remaining_children(arena, return_fiber, rest);
            let existing = self.use_fiber(arena, first, FiberProps::Text(text.clone()));
            arena[existing].parent = Some(return_fiber);
            return existing;
        }
        self.delete_remaining_children(arena, return_fiber, current_first_child);
        let created = create_fiber_from_text(arena, text.clone(), lanes);
        arena[created].parent = Some(return_fiber);
        created
    }

    fn reconcile_single_element(
        &self,
        arena: &mut FiberArena,
        return_fiber: FiberId,
        current_first_child: Option<FiberId>,
        element: &Element,
        lanes: Lanes,
    ) -> FiberId {
        let mut child = current_first_child;
        while let Some(id) = child {
            if arena[id].key == element.key {
                let reusable_props = if element.ty == ElementType::Fragment {
                    (arena[id].tag == WorkTag::Fragment)
                        .then(|| FiberProps::Children(element.props.children.clone()))
                } else {
                    is_compatible(arena, id, element).then(|| FiberProps::Element(element.props.clone()))
                };
                if let Some(props) = reusable_props {
                    let rest = arena[id].sibling;
                    self.delete_remaining_children(arena, return_fiber, rest);
                    let existing = self.use_fiber(arena, id, props);
                    arena[existing].parent = Some(return_fiber);
                    return existing;
                }
                // Same key, different type: nothing after it can match either.
                cov_mark::hit!(single_element_type_changed);
                self.delete_remaining_children(arena, return_fiber, Some(id));
                break;
            }
            self.delete_child(arena, return_fiber, id);
            child = arena[id].sibling;
        }

        let created = if element.ty == ElementType::Fragment {
            create_fiber_from_fragment(arena, element.props.children.clone(), lanes, element.key.clone())
        } else {
            create_fiber_from_element(arena, element, lanes)
        };
        arena[created].parent = Some(return_fiber);
        created
    }

    fn reconcile_single_portal(
        &self,
        arena: &mut FiberArena,
        return_fiber: FiberId,
        current_first_child: Option<FiberId>,
        portal: &Portal,
        lanes: Lanes,
    ) -> FiberId {
        let mut child = current_first_child;
        while let Some(id) = child {
            if arena[id].key == portal.key {
                let fiber = &arena[id];
                if fiber.tag == WorkTag::HostPortal && fiber.container() == Some(portal.container) {
                    let rest = fiber.sibling;
                    self.delete_remaining_children(arena, return_fiber, rest);
                    let existing = self.use_fiber(arena, id, FiberProps::Children(portal.children.clone()));
                    arena[existing].parent = Some(return_fiber);
                    return existing;
                }
                self.delete_remaining_children(arena, return_fiber, Some(id));
                break;
            }
            self.delete_child(arena, return_fiber, id);
            child = arena[id].sibling;
        }

        let created = create_fiber_from_portal(arena, portal, lanes);
        arena[created].parent = Some(return_fiber);
        created
    }
}

/// Give a bailed-out `wip` fresh work-in-progress twins of its current
/// children, so the subtree can be walked without re-rendering it.
pub(crate) fn clone_child_fibers(arena: &mut FiberArena, wip: FiberId) {
    let Some(first) = arena[wip].child else {
        return;
    };
    let props = arena[first].pending_props.clone();
    let mut new_child = create_work_in_progress(arena, first, props);
    arena[wip].child = Some(new_child);
    arena[new_child].parent = Some(wip);

    let mut current_child = first;
    while let Some(next) = arena[current_child].sibling {
        let props = arena[next].pending_props.clone();
        let sibling = create_work_in_progress(arena, next, props);
        arena[new_child].sibling = Some(sibling);
        arena[sibling].parent = Some(wip);
        new_child = sibling;
        current_child = next;
    }
    arena[new_child].sibling = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::element::LazyNode;
    use crate::reconciler::host_config::ContainerHandle;

    fn item(key: &str) -> Node {
        Element::host("li").key(key).into()
    }

    fn list(keys: &[&str]) -> Node {
        Node::list(keys.iter().map(|key| item(key)))
    }

    fn siblings(arena: &FiberArena, first: Option<FiberId>) -> Vec<FiberId> {
        std::iter::successors(first, |&id| arena[id].sibling).collect()
    }

    fn keys(arena: &FiberArena, ids: &[FiberId]) -> Vec<String> {
        ids.iter()
            .map(|&id| arena[id].key.as_ref().map(|k| k.as_str().to_owned()).unwrap_or_default())
            .collect()
    }

    fn placed(arena: &FiberArena, ids: &[FiberId]) -> Vec<String> {
        let placed: Vec<FiberId> = ids
            .iter()
            .copied()
            .filter(|&id| arena[id].flags.contains(Flags::PLACEMENT))
            .collect();
        keys(arena, &placed)
    }

    /// A parent with committed children built from `initial`, plus its
    /// work-in-progress twin.
    struct Fixture {
        arena: FiberArena,
        current: FiberId,
        wip: FiberId,
    }

    impl Fixture {
        fn new(initial: &Node) -> Self {
            let mut arena = FiberArena::new();
            let current = create_fiber_from_element(&mut arena, &Element::host("ul"), Lanes::NONE);
            let first = ChildReconciler::RECONCILE
                .reconcile_child_fibers(&mut arena, current, None, initial, Lanes::NONE)
                .expect("valid children");
            arena[current].child = first;
            let wip = create_work_in_progress(&mut arena, current, FiberProps::None);
            Self { arena, current, wip }
        }

        fn old_children(&self) -> Vec<FiberId> {
            siblings(&self.arena, self.arena[self.current].child)
        }

        fn reconcile(&mut self, next: &Node) -> Result<Vec<FiberId>, ValidationError> {
            let current_first = self.arena[self.current].child;
            let first = ChildReconciler::RECONCILE.reconcile_child_fibers(
                &mut self.arena,
                self.wip,
                current_first,
                next,
                Lanes::DEFAULT,
            )?;
            Ok(siblings(&self.arena, first))
        }

        fn deletions(&self) -> Vec<FiberId> {
            self.arena[self.wip].deletions.clone()
        }
    }

    #[test]
    fn identical_children_produce_no_effects() {
        let mut fx = Fixture::new(&list(&["1", "2", "3"]));
        let children = fx.reconcile(&list(&["1", "2", "3"])).unwrap();
        assert_eq!(keys(&fx.arena, &children), ["1", "2", "3"]);
        assert!(placed(&fx.arena, &children).is_empty());
        assert!(fx.deletions().is_empty());
        assert!(!fx.arena[fx.wip].flags.contains(Flags::CHILD_DELETION));
        for (index, id) in children.iter().enumerate() {
            assert!(fx.arena[*id].alternate.is_some());
            assert_eq!(fx.arena[*id].index, index);
            assert_eq!(fx.arena[*id].parent, Some(fx.wip));
        }
    }

    #[test]
    fn rotating_left_moves_only_the_first_child() {
        cov_mark::check!(children_key_map_fallback);
        cov_mark::check!(child_moved);
        let mut fx = Fixture::new(&list(&["1", "2", "3"]));
        let children = fx.reconcile(&list(&["2", "3", "1"])).unwrap();
        assert_eq!(keys(&fx.arena, &children), ["2", "3", "1"]);
        assert_eq!(placed(&fx.arena, &children), ["1"]);
        assert!(fx.deletions().is_empty());
    }

    #[test]
    fn prepending_to_a_long_list_reuses_every_old_child() {
        const LEN: usize = 5_000;
        let keys_of = |range: std::ops::Range<usize>| range.map(|i| item(&i.to_string()));
        let mut fx = Fixture::new(&Node::list(keys_of(0..LEN)));
        let old = fx.old_children();

        let next = Node::list(std::iter::once(item("fresh")).chain(keys_of(0..LEN)));
        let children = fx.reconcile(&next).unwrap();
        assert_eq!(children.len(), LEN + 1);
        assert_eq!(placed(&fx.arena, &children), ["fresh"]);
        assert!(fx.deletions().is_empty());
        for (new, old) in children[1..].iter().zip(&old) {
            assert_eq!(fx.arena[*new].alternate, Some(*old));
        }
    }

    #[test]
    fn unmatched_children_are_deleted_in_old_order() {
        let mut fx = Fixture::new(&list(&["1", "2", "3", "4", "5", "6"]));
        let old = fx.old_children();
        let children = fx.reconcile(&list(&["6", "2", "4"])).unwrap();
        assert_eq!(keys(&fx.arena, &children), ["6", "2", "4"]);
        assert_eq!(fx.deletions(), vec![old[0], old[2], old[4]]);
    }

    #[test]
    fn unmatched_iterator_children_are_deleted_in_old_order() {
        let mut fx = Fixture::new(&list(&["1", "2", "3", "4", "5", "6"]));
        let old = fx.old_children();
        let next = Iterable::new(|| ["6", "2", "4"].into_iter().map(item));
        let children = fx.reconcile(&Node::Iter(next)).unwrap();
        assert_eq!(keys(&fx.arena, &children), ["6", "2", "4"]);
        assert_eq!(fx.deletions(), vec![old[0], old[2], old[4]]);
    }

    #[test]
    fn key_miss_deletes_reuses_and_creates() {
        let mut fx = Fixture::new(&list(&["1", "2"]));
        let old = fx.old_children();
        let children = fx.reconcile(&list(&["2", "3"])).unwrap();
        assert_eq!(keys(&fx.arena, &children), ["2", "3"]);
        assert_eq!(fx.arena[children[0]].alternate, Some(old[1]));
        assert!(fx.arena[children[1]].alternate.is_none());
        assert_eq!(placed(&fx.arena, &children), ["3"]);
        assert_eq!(fx.deletions(), vec![old[0]]);
        assert!(fx.arena[fx.wip].flags.contains(Flags::CHILD_DELETION));
    }

    #[test]
    fn appended_children_take_the_insert_path() {
        let mut fx = Fixture::new(&list(&["1"]));
        let children = fx.reconcile(&list(&["1", "2", "3"])).unwrap();
        assert_eq!(placed(&fx.arena, &children), ["2", "3"]);
        assert!(fx.deletions().is_empty());
    }

    #[test]
    fn removed_tail_is_deleted() {
        let mut fx = Fixture::new(&list(&["1", "2", "3"]));
        let old = fx.old_children();
        let children = fx.reconcile(&list(&["1"])).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(fx.deletions(), vec![old[1], old[2]]);
    }

    #[test]
    fn unkeyed_children_match_by_position() {
        let initial = Node::list([Element::host("div").into(), Element::host("span").into()]);
        let mut fx = Fixture::new(&initial);
        let old = fx.old_children();
        let swapped = Node::list([Element::host("span").into(), Element::host("div").into()]);
        let children = fx.reconcile(&swapped).unwrap();
        // Phase 1 keeps going on matching (absent) keys but the types differ,
        // so both slots are replaced rather than moved.
        assert!(children.iter().all(|&id| fx.arena[id].alternate.is_none()));
        assert_eq!(fx.deletions(), old);
    }

    #[test]
    fn phase_one_stops_at_first_key_mismatch() {
        let mut fx = Fixture::new(&list(&["a", "b", "c", "d"]));
        let children = fx.reconcile(&list(&["a", "x", "b", "c", "d"])).unwrap();
        assert_eq!(keys(&fx.arena, &children), ["a", "x", "b", "c", "d"]);
        assert_eq!(placed(&fx.arena, &children), ["x"]);
    }

    #[test]
    fn iterables_diff_like_lists() {
        let mut fx = Fixture::new(&list(&["1", "2", "3"]));
        let rotated = Iterable::new(|| ["2", "3", "1"].into_iter().map(item));
        let children = fx.reconcile(&Node::Iter(rotated)).unwrap();
        assert_eq!(keys(&fx.arena, &children), ["2", "3", "1"]);
        assert_eq!(placed(&fx.arena, &children), ["1"]);
    }

    #[test]
    fn text_fiber_is_reused_for_new_text() {
        let mut fx = Fixture::new(&Node::text("before"));
        let old = fx.old_children();
        let children = fx.reconcile(&Node::text("after")).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(fx.arena[children[0]].alternate, Some(old[0]));
        assert_eq!(fx.arena[children[0]].pending_props.text(), Some("after"));
        assert!(placed(&fx.arena, &children).is_empty());
    }

    #[test]
    fn single_element_with_new_type_replaces_old() {
        cov_mark::check!(single_element_type_changed);
        let mut fx = Fixture::new(&Element::host("div").key("k").into());
        let old = fx.old_children();
        let children = fx.reconcile(&Element::host("span").key("k").into()).unwrap();
        assert_eq!(fx.deletions(), old);
        assert!(fx.arena[children[0]].flags.contains(Flags::PLACEMENT));
        assert_eq!(fx.arena[children[0]].host_type(), Some("span"));
    }

    #[test]
    fn single_element_finds_its_key_among_siblings() {
        let mut fx = Fixture::new(&list(&["1", "2", "3"]));
        let old = fx.old_children();
        let children = fx.reconcile(&item("2")).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(fx.arena[children[0]].alternate, Some(old[1]));
        assert!(placed(&fx.arena, &children).is_empty());
        assert_eq!(fx.deletions(), vec![old[0], old[2]]);
    }

    #[test]
    fn keyed_fragment_is_reused() {
        let fragment = |text: &str| -> Node { Element::fragment().key("f").children(Node::text(text)).into() };
        let mut fx = Fixture::new(&fragment("a"));
        let old = fx.old_children();
        assert_eq!(fx.arena[old[0]].tag, WorkTag::Fragment);
        let children = fx.reconcile(&fragment("b")).unwrap();
        assert_eq!(fx.arena[children[0]].alternate, Some(old[0]));
    }

    #[test]
    fn unkeyed_top_level_fragment_is_transparent() {
        let mut fx = Fixture::new(&Node::Empty);
        let children = fx
            .reconcile(&Element::fragment().children(list(&["1", "2"])).into())
            .unwrap();
        assert_eq!(keys(&fx.arena, &children), ["1", "2"]);
        assert!(children.iter().all(|&id| fx.arena[id].tag == WorkTag::HostComponent));
    }

    #[test]
    fn lazy_children_are_unwrapped() {
        let mut fx = Fixture::new(&list(&["1", "2"]));
        let nested = LazyNode::new(|| Node::Lazy(LazyNode::new(|| list(&["2", "1"]))));
        let children = fx.reconcile(&Node::Lazy(nested)).unwrap();
        assert_eq!(keys(&fx.arena, &children), ["2", "1"]);
        assert_eq!(placed(&fx.arena, &children), ["1"]);
    }

    #[test]
    fn portal_to_same_container_is_reused() {
        let container = ContainerHandle::new(7);
        let portal = |text: &str| -> Node { Portal::new(container, Node::text(text)).into() };
        let mut fx = Fixture::new(&portal("a"));
        let old = fx.old_children();
        let children = fx.reconcile(&portal("b")).unwrap();
        assert_eq!(fx.arena[children[0]].alternate, Some(old[0]));

        let moved: Node = Portal::new(ContainerHandle::new(8), Node::text("b")).into();
        let mut fx = Fixture::new(&portal("a"));
        let children = fx.reconcile(&moved).unwrap();
        assert!(fx.arena[children[0]].alternate.is_none());
        assert_eq!(fx.deletions().len(), 1);
    }

    #[test]
    fn plain_objects_are_rejected() {
        let mut fx = Fixture::new(&Node::Empty);
        let err = fx
            .reconcile(&Node::list([item("1"), Node::object(["title", "body"])]))
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::ObjectAsChild {
                found: "object with keys {title, body}".into()
            }
        );
    }

    #[test]
    fn mount_variant_records_no_effects() {
        let mut arena = FiberArena::new();
        let parent = create_fiber_from_element(&mut arena, &Element::host("ul"), Lanes::NONE);
        let first = ChildReconciler::MOUNT
            .reconcile_child_fibers(&mut arena, parent, None, &list(&["1", "2"]), Lanes::NONE)
            .unwrap();
        let children = siblings(&arena, first);
        assert!(placed(&arena, &children).is_empty());
        assert!(children.iter().all(|&id| arena[id].flags.contains(Flags::FORKED)));

        let single = ChildReconciler::MOUNT
            .reconcile_child_fibers(&mut arena, parent, None, &item("3"), Lanes::NONE)
            .unwrap();
        assert!(single.is_some_and(|id| arena[id].flags.is_empty()));
    }

    #[test]
    fn empty_children_delete_everything() {
        let mut fx = Fixture::new(&list(&["1", "2"]));
        let old = fx.old_children();
        let children = fx.reconcile(&Node::Empty).unwrap();
        assert!(children.is_empty());
        assert_eq!(fx.deletions(), old);
    }

    #[test]
    fn cloned_children_point_at_the_new_parent() {
        let mut fx = Fixture::new(&list(&["1", "2"]));
        let old = fx.old_children();
        clone_child_fibers(&mut fx.arena, fx.wip);
        let cloned = siblings(&fx.arena, fx.arena[fx.wip].child);
        assert_eq!(cloned.len(), 2);
        for (clone, old) in cloned.iter().zip(&old) {
            assert_eq!(fx.arena[*clone].alternate, Some(*old));
            assert_eq!(fx.arena[*clone].parent, Some(fx.wip));
        }
    }
}
