//! The boundary to the platform that owns the actual nodes.
//!
//! The reconciler never touches host nodes directly. It holds opaque
//! [`InstanceHandle`]s minted by the host and calls the [`HostConfig`]
//! capability set during complete work (instance creation) and commit
//! (mutations).

use crate::lane::EventPriority;

use super::element::Props;

/// Opaque host node (element or text) created by a [`HostConfig`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceHandle(u64);

impl InstanceHandle {
    /// Wrap a host-chosen id.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The host-chosen id.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Opaque host container (root or portal target).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerHandle(u64);

impl ContainerHandle {
    /// Wrap a host-chosen id.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The host-chosen id.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Capabilities a host platform provides to the reconciler.
///
/// Methods are called with the renderer locked; they must not call back into
/// the renderer.
pub trait HostConfig: Send + 'static {
    /// Create a detached host node of type `ty`.
    fn create_instance(&mut self, ty: &str, props: &Props) -> InstanceHandle;

    /// Create a detached text node.
    fn create_text_instance(&mut self, text: &str) -> InstanceHandle;

    /// Append `child` to a node that is not attached yet.
    fn append_initial_child(&mut self, parent: InstanceHandle, child: InstanceHandle);

    /// Whether the host renders the children of `ty` itself as text content,
    /// in which case no child fibers are created.
    fn should_set_text_content(&self, ty: &str, props: &Props) -> bool {
        let _ = ty;
        props.text_children().is_some()
    }

    /// Append `child` as the last child of `parent`.
    fn append_child(&mut self, parent: InstanceHandle, child: InstanceHandle);

    /// Append `child` as the last child of `container`.
    fn append_child_to_container(&mut self, container: ContainerHandle, child: InstanceHandle);

    /// Insert `child` into `parent` right before `before`.
    fn insert_before(&mut self, parent: InstanceHandle, child: InstanceHandle, before: InstanceHandle);

    /// Insert `child` into `container` right before `before`.
    fn insert_in_container_before(
        &mut self,
        container: ContainerHandle,
        child: InstanceHandle,
        before: InstanceHandle,
    );

    /// Remove `child` from `parent`.
    fn remove_child(&mut self, parent: InstanceHandle, child: InstanceHandle);

    /// Remove `child` from `container`.
    fn remove_child_from_container(&mut self, container: ContainerHandle, child: InstanceHandle);

    /// Compare props during render. Returning `true` schedules
    /// [`commit_update`](Self::commit_update).
    fn prepare_update(
        &mut self,
        instance: InstanceHandle,
        ty: &str,
        old_props: &Props,
        new_props: &Props,
    ) -> bool;

    /// Apply new props to an attached node.
    fn commit_update(&mut self, instance: InstanceHandle, ty: &str, old_props: &Props, new_props: &Props);

    /// Replace the content of a text node.
    fn commit_text_update(&mut self, instance: InstanceHandle, old_text: &str, new_text: &str);

    /// Clear text content set through `should_set_text_content`.
    fn reset_text_content(&mut self, instance: InstanceHandle) {
        let _ = instance;
    }

    /// Called before the mutation phase of a commit.
    fn prepare_for_commit(&mut self, container: ContainerHandle) {
        let _ = container;
    }

    /// Called after the mutation phase of a commit.
    fn reset_after_commit(&mut self, container: ContainerHandle) {
        let _ = container;
    }

    /// Priority of the event currently being dispatched by the host.
    fn current_event_priority(&self) -> EventPriority {
        EventPriority::Default
    }
}
