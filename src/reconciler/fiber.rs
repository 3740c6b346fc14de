//! Fiber nodes and their arena.
//!
//! Every position in the tree is represented by up to two fibers: the
//! *current* one, describing what is on screen, and a *work-in-progress* one
//! that a render builds. The two are linked through `alternate` in both
//! directions. When a render commits, the work-in-progress half becomes
//! current and the old current half is recycled by the next
//! [`create_work_in_progress`] call instead of being reallocated.
//!
//! Fibers live in a [`FiberArena`] and refer to each other by [`FiberId`]. Ids
//! carry a generation, so an id that outlived its fiber never resolves to the
//! fiber that later reuses the slot.

use slab::Slab;
use std::fmt;
use std::ops::{Index, IndexMut};
use std::sync::Arc;

use crate::error::invariant_violation;
use crate::lane::Lanes;

use super::element::{Element, ElementType, Key, Node, Portal, Props};
use super::flags::Flags;
use super::host_config::{ContainerHandle, InstanceHandle};
use super::update_queue::UpdateQueue;

/// Generation-tagged handle to a fiber.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct FiberId {
    index: u32,
    generation: u32,
}

impl FiberId {
    #[inline]
    fn slot(self) -> usize {
        self.index as usize
    }
}

impl fmt::Debug for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FiberId({}v{})", self.index, self.generation)
    }
}

/// Kind of tree position a fiber represents.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum WorkTag {
    /// Renders children by calling a [`Component`](super::element::Component).
    FunctionComponent,
    /// The root of a tree.
    HostRoot,
    /// Renders its children into another container.
    HostPortal,
    /// A host node with children.
    HostComponent,
    /// A host text node.
    HostText,
    /// A group of children without a host node.
    Fragment,
}

/// Host object owned by a fiber.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum StateNode {
    Instance(InstanceHandle),
    Container(ContainerHandle),
}

/// Props as stored on a fiber. The variant depends on the tag.
#[derive(Clone, Debug, Default)]
pub(crate) enum FiberProps {
    /// Host root, or not set yet.
    #[default]
    None,
    /// Function and host components.
    Element(Arc<Props>),
    /// Host text.
    Text(Arc<str>),
    /// Fragments and portals.
    Children(Node),
}

impl FiberProps {
    /// Identity comparison used for bailouts.
    pub(crate) fn same(&self, other: &FiberProps) -> bool {
        match (self, other) {
            (FiberProps::None, FiberProps::None) => true,
            (FiberProps::Element(a), FiberProps::Element(b)) => Arc::ptr_eq(a, b),
            (FiberProps::Text(a), FiberProps::Text(b)) => Arc::ptr_eq(a, b),
            (FiberProps::Children(a), FiberProps::Children(b)) => a.same(b),
            _ => false,
        }
    }

    pub(crate) fn element(&self) -> Option<&Arc<Props>> {
        match self {
            FiberProps::Element(props) => Some(props),
            _ => None,
        }
    }

    pub(crate) fn text(&self) -> Option<&str> {
        match self {
            FiberProps::Text(text) => Some(&**text),
            _ => None,
        }
    }

    pub(crate) fn children(&self) -> Option<&Node> {
        match self {
            FiberProps::Children(children) => Some(children),
            _ => None,
        }
    }
}

/// One tree position in one of the two buffers.
#[derive(Debug)]
pub(crate) struct Fiber {
    pub(crate) tag: WorkTag,
    pub(crate) key: Option<Key>,
    /// Type as written in the element, possibly lazy.
    pub(crate) element_type: Option<ElementType>,
    /// Resolved type.
    pub(crate) ty: Option<ElementType>,
    pub(crate) state_node: Option<StateNode>,

    /// The `return` fiber.
    pub(crate) parent: Option<FiberId>,
    pub(crate) child: Option<FiberId>,
    pub(crate) sibling: Option<FiberId>,
    pub(crate) index: usize,

    pub(crate) pending_props: FiberProps,
    pub(crate) memoized_props: FiberProps,
    /// Host root only: the element rendered into the root.
    pub(crate) memoized_state: Option<Node>,
    /// Host root only.
    pub(crate) update_queue: Option<UpdateQueue>,

    pub(crate) flags: Flags,
    pub(crate) subtree_flags: Flags,
    pub(crate) deletions: Vec<FiberId>,

    pub(crate) lanes: Lanes,
    pub(crate) child_lanes: Lanes,

    pub(crate) alternate: Option<FiberId>,
}

impl Fiber {
    fn new(tag: WorkTag, pending_props: FiberProps, key: Option<Key>) -> Self {
        Self {
            tag,
            key,
            element_type: None,
            ty: None,
            state_node: None,
            parent: None,
            child: None,
            sibling: None,
            index: 0,
            pending_props,
            memoized_props: FiberProps::None,
            memoized_state: None,
            update_queue: None,
            flags: Flags::NONE,
            subtree_flags: Flags::NONE,
            deletions: Vec::new(),
            lanes: Lanes::NONE,
            child_lanes: Lanes::NONE,
            alternate: None,
        }
    }

    pub(crate) fn instance(&self) -> Option<InstanceHandle> {
        match self.state_node {
            Some(StateNode::Instance(instance)) => Some(instance),
            _ => None,
        }
    }

    pub(crate) fn container(&self) -> Option<ContainerHandle> {
        match self.state_node {
            Some(StateNode::Container(container)) => Some(container),
            _ => None,
        }
    }

    /// Tag name of a host component.
    pub(crate) fn host_type(&self) -> Option<&str> {
        match &self.ty {
            Some(ElementType::Host(tag)) => Some(&**tag),
            _ => None,
        }
    }
}

/// Storage for every fiber of one root.
#[derive(Debug, Default)]
pub(crate) struct FiberArena {
    fibers: Slab<Fiber>,
    generations: Vec<u32>,
}

impl FiberArena {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Number of live fibers, both halves included.
    pub fn len(&self) -> usize {
        self.fibers.len()
    }

    /// True if no fiber is allocated.
    pub fn is_empty(&self) -> bool {
        self.fibers.is_empty()
    }

    pub(crate) fn insert(&mut self, fiber: Fiber) -> FiberId {
        let slot = self.fibers.insert(fiber);
        if slot == self.generations.len() {
            self.generations.push(0);
        }
        FiberId {
            index: slot as u32,
            generation: self.generations[slot],
        }
    }

    /// True if `id` refers to a live fiber.
    pub fn contains(&self, id: FiberId) -> bool {
        self.get(id).is_some()
    }

    pub(crate) fn get(&self, id: FiberId) -> Option<&Fiber> {
        if self.generations.get(id.slot()) != Some(&id.generation) {
            return None;
        }
        self.fibers.get(id.slot())
    }

    pub(crate) fn get_mut(&mut self, id: FiberId) -> Option<&mut Fiber> {
        if self.generations.get(id.slot()) != Some(&id.generation) {
            return None;
        }
        self.fibers.get_mut(id.slot())
    }

    pub(crate) fn remove(&mut self, id: FiberId) -> Option<Fiber> {
        self.get(id)?;
        self.generations[id.slot()] = self.generations[id.slot()].wrapping_add(1);
        Some(self.fibers.remove(id.slot()))
    }

    /// Ids of the children of `parent`, in sibling order.
    pub(crate) fn child_ids(&self, parent: FiberId) -> Vec<FiberId> {
        let mut ids = Vec::new();
        let mut next = self[parent].child;
        while let Some(id) = next {
            ids.push(id);
            next = self[id].sibling;
        }
        ids
    }

    /// Free `root`, its descendants and their alternates.
    pub(crate) fn release_subtree(&mut self, root: FiberId) {
        let mut doomed = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(fiber) = self.get(id) else {
                continue;
            };
            doomed.push(id);
            doomed.extend(fiber.alternate);
            stack.extend(fiber.child);
            if id != root {
                stack.extend(fiber.sibling);
            }
        }
        tracing::trace!(count = doomed.len(), "releasing fibers");
        for id in doomed {
            self.remove(id);
        }
    }

    /// Remove `lanes` from the pending lanes of every fiber.
    pub(crate) fn clear_lanes(&mut self, lanes: Lanes) {
        for (_, fiber) in self.fibers.iter_mut() {
            fiber.lanes = fiber.lanes.remove(lanes);
            fiber.child_lanes = fiber.child_lanes.remove(lanes);
        }
    }

    /// Free every fiber that is neither in the tree under `root` nor the
    /// alternate of such a fiber.
    pub(crate) fn retain_tree(&mut self, root: FiberId) {
        let mut keep = vec![false; self.generations.len()];
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(fiber) = self.get(id) else {
                continue;
            };
            keep[id.slot()] = true;
            if let Some(alternate) = fiber.alternate.filter(|&a| self.contains(a)) {
                keep[alternate.slot()] = true;
            }
            stack.extend(fiber.child);
            if id != root {
                stack.extend(fiber.sibling);
            }
        }
        let doomed: Vec<usize> = self
            .fibers
            .iter()
            .map(|(slot, _)| slot)
            .filter(|&slot| !keep[slot])
            .collect();
        if !doomed.is_empty() {
            cov_mark::hit!(orphaned_fibers_released);
            tracing::debug!(count = doomed.len(), "releasing fibers of an abandoned render");
        }
        for slot in doomed {
            self.generations[slot] = self.generations[slot].wrapping_add(1);
            self.fibers.remove(slot);
        }
    }
}

impl Index<FiberId> for FiberArena {
    type Output = Fiber;

    fn index(&self, id: FiberId) -> &Fiber {
        match self.get(id) {
            Some(fiber) => fiber,
            None => panic!("stale fiber id {id:?}"),
        }
    }
}

impl IndexMut<FiberId> for FiberArena {
    fn index_mut(&mut self, id: FiberId) -> &mut Fiber {
        match self.get_mut(id) {
            Some(fiber) => fiber,
            None => panic!("stale fiber id {id:?}"),
        }
    }
}

/// Create the current fiber of a new root.
pub(crate) fn create_host_root(arena: &mut FiberArena, container: ContainerHandle) -> FiberId {
    let mut fiber = Fiber::new(WorkTag::HostRoot, FiberProps::None, None);
    fiber.state_node = Some(StateNode::Container(container));
    fiber.memoized_state = Some(Node::Empty);
    fiber.update_queue = Some(UpdateQueue::new(Node::Empty));
    arena.insert(fiber)
}

/// Return the work-in-progress twin of `current`, reusing the existing
/// alternate when there is one.
pub(crate) fn create_work_in_progress(
    arena: &mut FiberArena,
    current: FiberId,
    pending_props: FiberProps,
) -> FiberId {
    let existing = arena[current]
        .alternate
        .filter(|&alternate| arena.contains(alternate));
    let wip = match existing {
        Some(wip) => {
            let cur = &arena[current];
            let ty = cur.ty.clone();
            let fiber = &mut arena[wip];
            fiber.pending_props = pending_props;
            fiber.ty = ty;
            fiber.flags = Flags::NONE;
            fiber.subtree_flags = Flags::NONE;
            fiber.deletions.clear();
            wip
        }
        None => {
            let cur = &arena[current];
            let mut fiber = Fiber::new(cur.tag, pending_props, cur.key.clone());
            fiber.element_type = cur.element_type.clone();
            fiber.ty = cur.ty.clone();
            fiber.state_node = cur.state_node;
            fiber.alternate = Some(current);
            let wip = arena.insert(fiber);
            arena[current].alternate = Some(wip);
            wip
        }
    };

    let cur = &arena[current];
    let flags = cur.flags.intersection(Flags::STATIC_MASK);
    let (child_lanes, lanes) = (cur.child_lanes, cur.lanes);
    let (child, sibling, index) = (cur.child, cur.sibling, cur.index);
    let memoized_props = cur.memoized_props.clone();
    let memoized_state = cur.memoized_state.clone();
    let update_queue = cur.update_queue.clone();

    let fiber = &mut arena[wip];
    fiber.flags = flags;
    fiber.child_lanes = child_lanes;
    fiber.lanes = lanes;
    fiber.child = child;
    fiber.sibling = sibling;
    fiber.index = index;
    fiber.memoized_props = memoized_props;
    fiber.memoized_state = memoized_state;
    fiber.update_queue = update_queue;
    wip
}

fn tag_for_type(ty: &ElementType) -> WorkTag {
    match ty {
        ElementType::Host(_) => WorkTag::HostComponent,
        ElementType::Component(_) => WorkTag::FunctionComponent,
        ElementType::Fragment => WorkTag::Fragment,
        ElementType::Lazy(_) => invariant_violation!(
            WorkTag::Fragment,
            "lazy element type resolved to another lazy type"
        ),
    }
}

/// Resolve a possibly lazy element type.
pub(crate) fn resolve_type(ty: &ElementType) -> ElementType {
    match ty {
        ElementType::Lazy(lazy) => lazy.resolve(),
        other => other.clone(),
    }
}

pub(crate) fn create_fiber_from_element(arena: &mut FiberArena, element: &Element, lanes: Lanes) -> FiberId {
    let resolved = resolve_type(&element.ty);
    if resolved == ElementType::Fragment {
        return create_fiber_from_fragment(
            arena,
            element.props.children.clone(),
            lanes,
            element.key.clone(),
        );
    }
    let mut fiber = Fiber::new(
        tag_for_type(&resolved),
        FiberProps::Element(element.props.clone()),
        element.key.clone(),
    );
    fiber.element_type = Some(element.ty.clone());
    fiber.ty = Some(resolved);
    fiber.lanes = lanes;
    arena.insert(fiber)
}

pub(crate) fn create_fiber_from_fragment(
    arena: &mut FiberArena,
    children: Node,
    lanes: Lanes,
    key: Option<Key>,
) -> FiberId {
    let mut fiber = Fiber::new(WorkTag::Fragment, FiberProps::Children(children), key);
    fiber.lanes = lanes;
    arena.insert(fiber)
}

pub(crate) fn create_fiber_from_text(arena: &mut FiberArena, text: Arc<str>, lanes: Lanes) -> FiberId {
    let mut fiber = Fiber::new(WorkTag::HostText, FiberProps::Text(text), None);
    fiber.lanes = lanes;
    arena.insert(fiber)
}

pub(crate) fn create_fiber_from_portal(arena: &mut FiberArena, portal: &Portal, lanes: Lanes) -> FiberId {
    let mut fiber = Fiber::new(
        WorkTag::HostPortal,
        FiberProps::Children(portal.children.clone()),
        portal.key.clone(),
    );
    fiber.state_node = Some(StateNode::Container(portal.container));
    fiber.lanes = lanes;
    arena.insert(fiber)
}

/// Read-only view of a committed tree.
///
/// Handed out by [`Renderer::with_committed_tree`](super::Renderer::with_committed_tree);
/// the committed half of the double buffer cannot be changed through it.
#[derive(Copy, Clone)]
pub struct CommittedTree<'a> {
    arena: &'a FiberArena,
    root: FiberId,
}

impl<'a> CommittedTree<'a> {
    pub(crate) fn new(arena: &'a FiberArena, root: FiberId) -> Self {
        Self { arena, root }
    }

    /// The host root fiber.
    pub fn root(&self) -> FiberRef<'a> {
        FiberRef {
            arena: self.arena,
            id: self.root,
        }
    }

    /// Look up a fiber by id. `None` if it has been released.
    pub fn get(&self, id: FiberId) -> Option<FiberRef<'a>> {
        self.arena.contains(id).then_some(FiberRef {
            arena: self.arena,
            id,
        })
    }

    /// Total fibers allocated for this root, both buffers included.
    pub fn allocated_fibers(&self) -> usize {
        self.arena.len()
    }
}

/// Read-only handle to one fiber.
#[derive(Copy, Clone)]
pub struct FiberRef<'a> {
    arena: &'a FiberArena,
    id: FiberId,
}

impl<'a> FiberRef<'a> {
    fn fiber(&self) -> &'a Fiber {
        &self.arena[self.id]
    }

    /// Id of the fiber.
    pub fn id(&self) -> FiberId {
        self.id
    }

    /// Kind of position.
    pub fn tag(&self) -> WorkTag {
        self.fiber().tag
    }

    /// Reconciliation key.
    pub fn key(&self) -> Option<&'a Key> {
        self.fiber().key.as_ref()
    }

    /// Resolved element type.
    pub fn element_type(&self) -> Option<&'a ElementType> {
        self.fiber().ty.as_ref()
    }

    /// Content of a text fiber.
    pub fn text(&self) -> Option<&'a str> {
        self.fiber().memoized_props.text()
    }

    /// Committed props of a component fiber.
    pub fn props(&self) -> Option<&'a Props> {
        self.fiber().memoized_props.element().map(|props| &**props)
    }

    /// Position among its siblings.
    pub fn index(&self) -> usize {
        self.fiber().index
    }

    /// Effect flags left by the last render.
    pub fn flags(&self) -> Flags {
        self.fiber().flags
    }

    /// Lanes with pending work on this fiber.
    pub fn lanes(&self) -> Lanes {
        self.fiber().lanes
    }

    /// Lanes with pending work below this fiber.
    pub fn child_lanes(&self) -> Lanes {
        self.fiber().child_lanes
    }

    /// Host node of a host component or text fiber.
    pub fn instance(&self) -> Option<InstanceHandle> {
        self.fiber().instance()
    }

    /// True if the fiber has a work-in-progress twin allocated.
    pub fn has_alternate(&self) -> bool {
        self.fiber().alternate.is_some()
    }

    /// Children in order.
    pub fn children(&self) -> impl Iterator<Item = FiberRef<'a>> + 'a {
        let arena = self.arena;
        std::iter::successors(self.fiber().child, move |&id| arena[id].sibling)
            .map(move |id| FiberRef { arena, id })
    }
}

impl fmt::Debug for FiberRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fiber = self.fiber();
        f.debug_struct("Fiber")
            .field("id", &self.id)
            .field("tag", &fiber.tag)
            .field("key", &fiber.key)
            .field("index", &fiber.index)
            .field("flags", &fiber.flags)
            .finish()
    }
}
