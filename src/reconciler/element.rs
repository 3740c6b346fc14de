//! Child descriptions fed into the reconciler.
//!
//! A [`Node`] is what a component renders: nothing, a text leaf, an
//! [`Element`], a [`Portal`], a list or iterable of further nodes, or a lazy
//! node resolved on first use. Everything is reference counted so that
//! cloning a description, or storing it as props on a fiber, is cheap and so
//! that unchanged props can be detected by identity.

use indexmap::IndexMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use super::host_config::ContainerHandle;

/// Reconciliation key of an element.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Key(Arc<str>);

impl Key {
    /// The key as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

impl From<&str> for Key {
    fn from(key: &str) -> Self {
        Key(key.into())
    }
}

impl From<String> for Key {
    fn from(key: String) -> Self {
        Key(key.into())
    }
}

impl From<u64> for Key {
    fn from(key: u64) -> Self {
        Key(key.to_string().into())
    }
}

/// Signature of a component's render function.
pub type RenderFn = dyn Fn(&Props) -> Node + Send + Sync;

/// A function component: a pure function from props to children.
///
/// Two components are the same type only if they share the same render
/// function allocation; clones of one `Component` compare equal.
#[derive(Clone)]
pub struct Component {
    name: Arc<str>,
    render: Arc<RenderFn>,
}

impl Component {
    /// Wrap `render` as a component type called `name`.
    pub fn new<F>(name: &str, render: F) -> Self
    where
        F: Fn(&Props) -> Node + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            render: Arc::new(render),
        }
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn render(&self, props: &Props) -> Node {
        (self.render)(props)
    }
}

impl PartialEq for Component {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.render, &other.render)
    }
}

impl Eq for Component {}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Component({})", self.name)
    }
}

struct LazyCell<T> {
    init: Box<dyn Fn() -> T + Send + Sync>,
    value: OnceLock<T>,
}

impl<T: Clone> LazyCell<T> {
    fn resolve(&self) -> T {
        self.value.get_or_init(|| (self.init)()).clone()
    }
}

/// An element type produced on demand, e.g. a component loaded later.
///
/// The initializer runs at most once; every clone shares the result.
#[derive(Clone)]
pub struct LazyType(Arc<LazyCell<ElementType>>);

impl LazyType {
    /// Type resolved by `init` on first use.
    pub fn new<F>(init: F) -> Self
    where
        F: Fn() -> ElementType + Send + Sync + 'static,
    {
        LazyType(Arc::new(LazyCell {
            init: Box::new(init),
            value: OnceLock::new(),
        }))
    }

    /// Resolve the underlying type. Nested lazy types are resolved as well.
    pub fn resolve(&self) -> ElementType {
        match self.0.resolve() {
            ElementType::Lazy(inner) => inner.resolve(),
            ty => ty,
        }
    }
}

impl PartialEq for LazyType {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for LazyType {}

impl fmt::Debug for LazyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.value.get() {
            Some(ty) => write!(f, "Lazy({ty:?})"),
            None => f.write_str("Lazy(<pending>)"),
        }
    }
}

/// A child node produced on demand.
#[derive(Clone)]
pub struct LazyNode(Arc<LazyCell<Node>>);

impl LazyNode {
    /// Node produced by `init` on first use.
    pub fn new<F>(init: F) -> Self
    where
        F: Fn() -> Node + Send + Sync + 'static,
    {
        LazyNode(Arc::new(LazyCell {
            init: Box::new(init),
            value: OnceLock::new(),
        }))
    }

    /// The resolved node. May itself be lazy.
    pub fn resolve(&self) -> Node {
        self.0.resolve()
    }
}

impl fmt::Debug for LazyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LazyNode")
    }
}

/// What kind of thing an element instantiates.
#[derive(Clone, PartialEq, Eq)]
pub enum ElementType {
    /// A host node such as `"div"`.
    Host(Arc<str>),
    /// A function component.
    Component(Component),
    /// A keyed group of children without a host node of its own.
    Fragment,
    /// A type resolved on first use.
    Lazy(LazyType),
}

impl ElementType {
    /// Name used in logs and diagnostics.
    pub fn name(&self) -> &str {
        match self {
            ElementType::Host(tag) => &**tag,
            ElementType::Component(component) => component.name(),
            ElementType::Fragment => "Fragment",
            ElementType::Lazy(_) => "Lazy",
        }
    }
}

impl fmt::Debug for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementType::Host(tag) => write!(f, "Host({tag})"),
            ElementType::Component(component) => component.fmt(f),
            ElementType::Fragment => f.write_str("Fragment"),
            ElementType::Lazy(lazy) => lazy.fmt(f),
        }
    }
}

/// Element props: attributes plus children.
#[derive(Clone, Debug, Default)]
pub struct Props {
    /// Attributes in declaration order.
    pub attributes: IndexMap<String, String>,
    /// Nested children.
    pub children: Node,
}

impl Props {
    /// Value of an attribute.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// The children as text, if they are a single text leaf.
    pub fn text_children(&self) -> Option<&str> {
        match &self.children {
            Node::Text(text) => Some(&**text),
            _ => None,
        }
    }
}

/// One element of a rendered tree.
#[derive(Clone, Debug)]
pub struct Element {
    /// Optional reconciliation key.
    pub key: Option<Key>,
    /// What the element instantiates.
    pub ty: ElementType,
    /// Shared props. Re-rendering with the same `Arc` counts as unchanged.
    pub props: Arc<Props>,
}

impl Element {
    /// Element of type `ty` with empty props.
    pub fn new(ty: ElementType) -> Self {
        Self {
            key: None,
            ty,
            props: Arc::default(),
        }
    }

    /// Host element such as `div`.
    pub fn host(tag: &str) -> Self {
        Self::new(ElementType::Host(tag.into()))
    }

    /// Element rendering `component`.
    pub fn component(component: &Component) -> Self {
        Self::new(ElementType::Component(component.clone()))
    }

    /// Fragment element.
    pub fn fragment() -> Self {
        Self::new(ElementType::Fragment)
    }

    /// Element whose type resolves lazily.
    pub fn lazy(ty: &LazyType) -> Self {
        Self::new(ElementType::Lazy(ty.clone()))
    }

    /// Set the key.
    pub fn key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Set an attribute.
    pub fn attr(mut self, name: &str, value: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.props)
            .attributes
            .insert(name.to_owned(), value.into());
        self
    }

    /// Set the children.
    pub fn children(mut self, children: impl Into<Node>) -> Self {
        Arc::make_mut(&mut self.props).children = children.into();
        self
    }
}

/// Target container and children of a portal.
#[derive(Clone, Debug)]
pub struct Portal {
    /// Optional reconciliation key.
    pub key: Option<Key>,
    /// Host container the children are rendered into.
    pub container: ContainerHandle,
    /// Children rendered into `container`.
    pub children: Node,
}

impl Portal {
    /// Portal rendering `children` into `container`.
    pub fn new(container: ContainerHandle, children: impl Into<Node>) -> Self {
        Self {
            key: None,
            container,
            children: children.into(),
        }
    }

    /// Set the key.
    pub fn key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }
}

type IterFn = dyn Fn() -> Box<dyn Iterator<Item = Node>> + Send + Sync;

/// Children produced by an iterator. Every call to [`iter`](Self::iter)
/// starts a fresh pass.
#[derive(Clone)]
pub struct Iterable(Arc<IterFn>);

impl Iterable {
    /// Children yielded by the iterators `make` returns.
    pub fn new<F, I>(make: F) -> Self
    where
        F: Fn() -> I + Send + Sync + 'static,
        I: Iterator<Item = Node> + 'static,
    {
        Iterable(Arc::new(move || Box::new(make()) as Box<dyn Iterator<Item = Node>>))
    }

    /// Start a pass over the children.
    pub fn iter(&self) -> Box<dyn Iterator<Item = Node>> {
        (self.0)()
    }
}

impl fmt::Debug for Iterable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Iterable")
    }
}

/// A renderable child description.
#[derive(Clone, Debug, Default)]
pub enum Node {
    /// Renders nothing.
    #[default]
    Empty,
    /// A text leaf.
    Text(Arc<str>),
    /// An element.
    Element(Element),
    /// Children rendered into another container.
    Portal(Box<Portal>),
    /// An ordered list of children.
    List(Arc<[Node]>),
    /// Children produced by an iterator.
    Iter(Iterable),
    /// A node resolved on first use.
    Lazy(LazyNode),
    /// A plain record with the given field names. Not renderable; passing one
    /// as a child is a validation error.
    Object(Arc<[String]>),
}

impl Node {
    /// A text leaf.
    pub fn text(text: impl Into<Arc<str>>) -> Self {
        Node::Text(text.into())
    }

    /// A list of children.
    pub fn list(children: impl IntoIterator<Item = Node>) -> Self {
        Node::List(children.into_iter().collect())
    }

    /// A plain record with the given field names.
    pub fn object<'a>(fields: impl IntoIterator<Item = &'a str>) -> Self {
        Node::Object(fields.into_iter().map(str::to_owned).collect())
    }

    /// Identity comparison: true if both describe the same allocation.
    ///
    /// Used for bailouts; two equal-looking but separately built nodes are
    /// not the same.
    pub fn same(&self, other: &Node) -> bool {
        match (self, other) {
            (Node::Empty, Node::Empty) => true,
            (Node::Text(a), Node::Text(b)) => Arc::ptr_eq(a, b),
            (Node::Element(a), Node::Element(b)) => {
                a.key == b.key && a.ty == b.ty && Arc::ptr_eq(&a.props, &b.props)
            }
            (Node::List(a), Node::List(b)) => Arc::ptr_eq(a, b),
            (Node::Iter(a), Node::Iter(b)) => Arc::ptr_eq(&a.0, &b.0),
            (Node::Lazy(a), Node::Lazy(b)) => Arc::ptr_eq(&a.0, &b.0),
            (Node::Portal(a), Node::Portal(b)) => {
                a.key == b.key && a.container == b.container && a.children.same(&b.children)
            }
            (Node::Object(a), Node::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<Element> for Node {
    fn from(element: Element) -> Self {
        Node::Element(element)
    }
}

impl From<Portal> for Node {
    fn from(portal: Portal) -> Self {
        Node::Portal(Box::new(portal))
    }
}

impl From<&str> for Node {
    fn from(text: &str) -> Self {
        Node::Text(text.into())
    }
}

impl From<String> for Node {
    fn from(text: String) -> Self {
        Node::Text(text.into())
    }
}

impl From<i64> for Node {
    fn from(number: i64) -> Self {
        Node::Text(number.to_string().into())
    }
}

impl From<Vec<Node>> for Node {
    fn from(children: Vec<Node>) -> Self {
        Node::List(children.into())
    }
}

impl From<Option<Node>> for Node {
    fn from(node: Option<Node>) -> Self {
        node.unwrap_or_default()
    }
}
