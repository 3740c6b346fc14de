//! Commit phase: apply the effects recorded during render to the host.
//!
//! Runs synchronously with the renderer locked. Order per fiber: deletions
//! recorded on it, then its children, then its own placement and update.

use super::fiber::{FiberId, StateNode, WorkTag};
use super::flags::Flags;
use super::host_config::{HostConfig, InstanceHandle};
use super::work_loop::RendererState;

fn is_host_parent(tag: WorkTag) -> bool {
    matches!(tag, WorkTag::HostComponent | WorkTag::HostRoot | WorkTag::HostPortal)
}

impl<H: HostConfig> RendererState<H> {
    pub(crate) fn commit_mutation_effects(&mut self, finished: FiberId) {
        let fiber = &self.arena[finished];
        if !(fiber.flags | fiber.subtree_flags).intersects(Flags::MUTATION_MASK) {
            tracing::trace!("nothing to commit");
            return;
        }
        let container = self.root.container;
        self.host.prepare_for_commit(container);
        self.commit_mutation_effects_on_fiber(finished);
        self.host.reset_after_commit(container);
    }

    fn commit_mutation_effects_on_fiber(&mut self, fiber: FiberId) {
        self.recursively_traverse_mutation_effects(fiber);
        self.commit_reconciliation_effects(fiber);

        let node = &self.arena[fiber];
        let flags = node.flags;
        let Some(instance) = node.instance() else {
            return;
        };
        match node.tag {
            WorkTag::HostComponent => {
                if flags.contains(Flags::CONTENT_RESET) {
                    self.host.reset_text_content(instance);
                }
                if flags.contains(Flags::UPDATE) {
                    let Some(new_props) = node.memoized_props.element().cloned() else {
                        return;
                    };
                    let old_props = node
                        .alternate
                        .and_then(|current| self.arena.get(current))
                        .and_then(|current| current.memoized_props.element().cloned())
                        .unwrap_or_else(|| new_props.clone());
                    let ty = node.host_type().unwrap_or_default().to_owned();
                    self.host.commit_update(instance, &ty, &old_props, &new_props);
                }
            }
            WorkTag::HostText if flags.contains(Flags::UPDATE) => {
                let new_text = node.memoized_props.text().unwrap_or_default().to_owned();
                let old_text = node
                    .alternate
                    .and_then(|current| self.arena.get(current))
                    .and_then(|current| current.memoized_props.text())
                    .unwrap_or(new_text.as_str())
                    .to_owned();
                self.host.commit_text_update(instance, &old_text, &new_text);
            }
            _ => {}
        }
    }

    fn recursively_traverse_mutation_effects(&mut self, parent: FiberId) {
        let deletions = std::mem::take(&mut self.arena[parent].deletions);
        for deleted in deletions {
            self.commit_deletion_effects(parent, deleted);
        }

        if self.arena[parent].subtree_flags.intersects(Flags::MUTATION_MASK) {
            let mut child = self.arena[parent].child;
            while let Some(id) = child {
                self.commit_mutation_effects_on_fiber(id);
                child = self.arena[id].sibling;
            }
        }
    }

    fn commit_reconciliation_effects(&mut self, fiber: FiberId) {
        if self.arena[fiber].flags.contains(Flags::PLACEMENT) {
            self.commit_placement(fiber);
            self.arena[fiber].flags.remove(Flags::PLACEMENT);
        }
    }

    fn host_parent_fiber(&self, fiber: FiberId) -> Option<FiberId> {
        let mut parent = self.arena[fiber].parent;
        while let Some(id) = parent {
            if is_host_parent(self.arena[id].tag) {
                return Some(id);
            }
            parent = self.arena[id].parent;
        }
        None
    }

    /// Host node to insert before: the first host node after `fiber` in
    /// document order that is not being placed itself.
    ///
    /// Reused children may still point at their old parent, so the walk
    /// fixes up `parent` on every fiber it steps onto before climbing back.
    fn host_sibling(&mut self, fiber: FiberId) -> Option<InstanceHandle> {
        let arena = &mut self.arena;
        let mut node = fiber;
        'siblings: loop {
            while arena[node].sibling.is_none() {
                match arena[node].parent {
                    Some(parent) if !is_host_parent(arena[parent].tag) => node = parent,
                    _ => return None,
                }
            }
            let parent = arena[node].parent;
            node = arena[node].sibling?;
            arena[node].parent = parent;
            while !matches!(arena[node].tag, WorkTag::HostComponent | WorkTag::HostText) {
                let candidate = &arena[node];
                if candidate.flags.contains(Flags::PLACEMENT) || candidate.tag == WorkTag::HostPortal {
                    continue 'siblings;
                }
                let Some(child) = candidate.child else {
                    continue 'siblings;
                };
                arena[child].parent = Some(node);
                node = child;
            }
            if !arena[node].flags.contains(Flags::PLACEMENT) {
                cov_mark::hit!(host_sibling_found);
                return arena[node].instance();
            }
        }
    }

    fn commit_placement(&mut self, fiber: FiberId) {
        let Some(parent_fiber) = self.host_parent_fiber(fiber) else {
            tracing::error!(?fiber, "placed fiber has no host parent");
            return;
        };
        let before = self.host_sibling(fiber);
        match self.arena[parent_fiber].state_node {
            Some(StateNode::Instance(parent)) => {
                if self.arena[parent_fiber].flags.contains(Flags::CONTENT_RESET) {
                    self.host.reset_text_content(parent);
                    self.arena[parent_fiber].flags.remove(Flags::CONTENT_RESET);
                }
                self.insert_or_append_placement_node(fiber, before, StateNode::Instance(parent));
            }
            Some(container) => self.insert_or_append_placement_node(fiber, before, container),
            None => tracing::error!(?parent_fiber, "host parent has no host node"),
        }
    }

    fn insert_or_append_placement_node(&mut self, fiber: FiberId, before: Option<InstanceHandle>, parent: StateNode) {
        let node = &self.arena[fiber];
        let (tag, instance, first_child) = (node.tag, node.instance(), node.child);
        match tag {
            WorkTag::HostComponent | WorkTag::HostText => {
                let Some(child) = instance else {
                    return;
                };
                match (parent, before) {
                    (StateNode::Instance(parent), Some(before)) => self.host.insert_before(parent, child, before),
                    (StateNode::Instance(parent), None) => self.host.append_child(parent, child),
                    (StateNode::Container(container), Some(before)) => {
                        self.host.insert_in_container_before(container, child, before)
                    }
                    (StateNode::Container(container), None) => self.host.append_child_to_container(container, child),
                }
            }
            // The portal's children are placed into its own container.
            WorkTag::HostPortal => {}
            _ => {
                let mut child = first_child;
                while let Some(id) = child {
                    self.insert_or_append_placement_node(id, before, parent);
                    child = self.arena[id].sibling;
                }
            }
        }
    }

    /// Detach `deleted` (a current fiber) from the host and free it.
    fn commit_deletion_effects(&mut self, return_fiber: FiberId, deleted: FiberId) {
        if !self.arena.contains(deleted) {
            return;
        }
        let mut parent = Some(return_fiber);
        let host_parent = loop {
            let Some(id) = parent else {
                tracing::error!(?deleted, "deleted fiber has no host parent");
                break None;
            };
            if is_host_parent(self.arena[id].tag) {
                break self.arena[id].state_node;
            }
            parent = self.arena[id].parent;
        };
        if let Some(host_parent) = host_parent {
            self.remove_host_nodes(host_parent, deleted);
        }
        self.arena.release_subtree(deleted);
    }

    /// Remove the topmost host nodes of the subtree at `fiber`.
    fn remove_host_nodes(&mut self, host_parent: StateNode, fiber: FiberId) {
        let node = &self.arena[fiber];
        let (tag, instance, container) = (node.tag, node.instance(), node.container());
        match tag {
            WorkTag::HostComponent | WorkTag::HostText => {
                let Some(child) = instance else {
                    return;
                };
                match host_parent {
                    StateNode::Instance(parent) => self.host.remove_child(parent, child),
                    StateNode::Container(container) => self.host.remove_child_from_container(container, child),
                }
            }
            WorkTag::HostPortal => {
                let Some(container) = container else {
                    return;
                };
                self.remove_host_children(StateNode::Container(container), fiber);
            }
            _ => self.remove_host_children(host_parent, fiber),
        }
    }

    fn remove_host_children(&mut self, host_parent: StateNode, fiber: FiberId) {
        let mut child = self.arena[fiber].child;
        while let Some(id) = child {
            self.remove_host_nodes(host_parent, id);
            child = self.arena[id].sibling;
        }
    }
}
