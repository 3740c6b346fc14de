//! In-memory [`HostConfig`] for tests.
//!
//! Keeps a node table plus one child list per container and logs every
//! mutation, so tests can assert both on the resulting markup and on the
//! exact host operations a commit performed.

use indexmap::IndexMap;

use crate::lane::EventPriority;

use super::element::Props;
use super::host_config::{ContainerHandle, HostConfig, InstanceHandle};

#[derive(Debug, Clone)]
struct HostNode {
    /// `None` for text nodes.
    ty: Option<String>,
    attributes: IndexMap<String, String>,
    text: Option<String>,
    children: Vec<InstanceHandle>,
}

#[derive(Debug, Default)]
pub(crate) struct TestHost {
    nodes: IndexMap<InstanceHandle, HostNode>,
    containers: IndexMap<ContainerHandle, Vec<InstanceHandle>>,
    next_id: u64,
    ops: Vec<String>,
    event_priority: Option<EventPriority>,
}

fn detach(children: &mut Vec<InstanceHandle>, child: InstanceHandle) {
    children.retain(|&existing| existing != child);
}

fn insert_before(children: &mut Vec<InstanceHandle>, child: InstanceHandle, before: InstanceHandle) {
    detach(children, child);
    let at = children
        .iter()
        .position(|&existing| existing == before)
        .unwrap_or(children.len());
    children.insert(at, child);
}

impl TestHost {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Report `priority` as the current event priority.
    pub(crate) fn set_event_priority(&mut self, priority: EventPriority) {
        self.event_priority = Some(priority);
    }

    /// Mutations since the last call.
    pub(crate) fn take_ops(&mut self) -> Vec<String> {
        std::mem::take(&mut self.ops)
    }

    /// Number of live host nodes, attached or not.
    pub(crate) fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn markup(&self, container: ContainerHandle) -> String {
        let mut out = String::new();
        for &child in self.containers.get(&container).into_iter().flatten() {
            self.write_markup(child, &mut out);
        }
        out
    }

    fn write_markup(&self, id: InstanceHandle, out: &mut String) {
        let Some(node) = self.nodes.get(&id) else {
            out.push_str("<?>");
            return;
        };
        let Some(ty) = &node.ty else {
            out.push_str(node.text.as_deref().unwrap_or_default());
            return;
        };
        out.push('<');
        out.push_str(ty);
        for (name, value) in &node.attributes {
            out.push_str(&format!(" {name}=\"{value}\""));
        }
        out.push('>');
        if let Some(text) = &node.text {
            out.push_str(text);
        }
        for &child in &node.children {
            self.write_markup(child, out);
        }
        out.push_str(&format!("</{ty}>"));
    }

    fn describe(&self, id: InstanceHandle) -> String {
        match self.nodes.get(&id) {
            Some(HostNode { ty: Some(ty), .. }) => ty.clone(),
            Some(HostNode { text, .. }) => format!("{:?}", text.as_deref().unwrap_or_default()),
            None => "?".to_owned(),
        }
    }

    fn node_mut(&mut self, id: InstanceHandle) -> &mut HostNode {
        match self.nodes.get_mut(&id) {
            Some(node) => node,
            None => panic!("unknown host node {id:?}"),
        }
    }
}

impl HostConfig for TestHost {
    fn create_instance(&mut self, ty: &str, props: &Props) -> InstanceHandle {
        self.next_id += 1;
        let id = InstanceHandle::new(self.next_id);
        self.nodes.insert(
            id,
            HostNode {
                ty: Some(ty.to_owned()),
                attributes: props.attributes.clone(),
                text: props.text_children().map(str::to_owned),
                children: Vec::new(),
            },
        );
        id
    }

    fn create_text_instance(&mut self, text: &str) -> InstanceHandle {
        self.next_id += 1;
        let id = InstanceHandle::new(self.next_id);
        self.nodes.insert(
            id,
            HostNode {
                ty: None,
                attributes: IndexMap::new(),
                text: Some(text.to_owned()),
                children: Vec::new(),
            },
        );
        id
    }

    fn append_initial_child(&mut self, parent: InstanceHandle, child: InstanceHandle) {
        self.node_mut(parent).children.push(child);
    }

    fn append_child(&mut self, parent: InstanceHandle, child: InstanceHandle) {
        self.ops
            .push(format!("append {} to {}", self.describe(child), self.describe(parent)));
        let children = &mut self.node_mut(parent).children;
        detach(children, child);
        children.push(child);
    }

    fn append_child_to_container(&mut self, container: ContainerHandle, child: InstanceHandle) {
        self.ops
            .push(format!("append {} to container {}", self.describe(child), container.raw()));
        let children = self.containers.entry(container).or_default();
        detach(children, child);
        children.push(child);
    }

    fn insert_before(&mut self, parent: InstanceHandle, child: InstanceHandle, before: InstanceHandle) {
        self.ops.push(format!(
            "insert {} before {} in {}",
            self.describe(child),
            self.describe(before),
            self.describe(parent)
        ));
        insert_before(&mut self.node_mut(parent).children, child, before);
    }

    fn insert_in_container_before(&mut self, container: ContainerHandle, child: InstanceHandle, before: InstanceHandle) {
        self.ops.push(format!(
            "insert {} before {} in container {}",
            self.describe(child),
            self.describe(before),
            container.raw()
        ));
        insert_before(self.containers.entry(container).or_default(), child, before);
    }

    fn remove_child(&mut self, parent: InstanceHandle, child: InstanceHandle) {
        self.ops
            .push(format!("remove {} from {}", self.describe(child), self.describe(parent)));
        detach(&mut self.node_mut(parent).children, child);
        self.drop_subtree(child);
    }

    fn remove_child_from_container(&mut self, container: ContainerHandle, child: InstanceHandle) {
        self.ops
            .push(format!("remove {} from container {}", self.describe(child), container.raw()));
        if let Some(children) = self.containers.get_mut(&container) {
            detach(children, child);
        }
        self.drop_subtree(child);
    }

    fn prepare_update(&mut self, _instance: InstanceHandle, _ty: &str, old_props: &Props, new_props: &Props) -> bool {
        old_props.attributes != new_props.attributes || old_props.text_children() != new_props.text_children()
    }

    fn commit_update(&mut self, instance: InstanceHandle, ty: &str, _old_props: &Props, new_props: &Props) {
        self.ops.push(format!("update {ty}"));
        let node = self.node_mut(instance);
        node.attributes = new_props.attributes.clone();
        if let Some(text) = new_props.text_children() {
            node.text = Some(text.to_owned());
        }
    }

    fn commit_text_update(&mut self, instance: InstanceHandle, old_text: &str, new_text: &str) {
        self.ops.push(format!("text {old_text:?} -> {new_text:?}"));
        self.node_mut(instance).text = Some(new_text.to_owned());
    }

    fn reset_text_content(&mut self, instance: InstanceHandle) {
        self.ops.push(format!("reset text of {}", self.describe(instance)));
        self.node_mut(instance).text = None;
    }

    fn current_event_priority(&self) -> EventPriority {
        self.event_priority.unwrap_or(EventPriority::Default)
    }
}

impl TestHost {
    fn drop_subtree(&mut self, root: InstanceHandle) {
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if let Some(node) = self.nodes.shift_remove(&id) {
                stack.extend(node.children);
            }
        }
    }
}
