//! The declarative input tree (spec.md §3 "Element") and its normalization
//! rules (spec.md §4.4).
//!
//! The Design Notes call for replacing the duck-typed original element tree
//! with an explicit tagged union, preferring symbol/enum identity over
//! name-based matching and keeping name matching only as a cross-boundary
//! fallback. [`ElementType`] and [`HostPrimitive`] are that union.

use crate::{
    component::{AnyClassComponent, AnyClassInstance, AnyFunctionComponent},
    content::ContentRenderer,
};
use serde_json::{Map, Value};
use std::{cell::RefCell, fmt, rc::Rc, sync::Arc};

/// Recognized primitive tags (spec.md §6 "Recognized primitive names"). This
/// is the closed set used for symbol/name-based identity of host primitives;
/// identity by `Rc::ptr_eq` on a shared marker is preferred where the
/// producing code can supply one (see [`ElementType::HostPrimitive`]'s
/// `marker` field), with name matching as the documented fallback.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum HostPrimitive {
    Section,
    Entry,
    Timeline,
    Tool,
    Ephemeral,
    Text,
    Image,
    Code,
    Json,
    Document,
    Audio,
    Video,
    Renderer,
}

impl HostPrimitive {
    pub fn from_name(name: &str) -> Option<Self> {
        use HostPrimitive::*;
        Some(match name {
            "Section" => Section,
            "Entry" => Entry,
            "Timeline" => Timeline,
            "Tool" => Tool,
            "Ephemeral" => Ephemeral,
            "Text" => Text,
            "Image" => Image,
            "Code" => Code,
            "Json" => Json,
            "Document" => Document,
            "Audio" => Audio,
            "Video" => Video,
            "Renderer" => Renderer,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        use HostPrimitive::*;
        match self {
            Section => "Section",
            Entry => "Entry",
            Timeline => "Timeline",
            Tool => "Tool",
            Ephemeral => "Ephemeral",
            Text => "Text",
            Image => "Image",
            Code => "Code",
            Json => "Json",
            Document => "Document",
            Audio => "Audio",
            Video => "Video",
            Renderer => "Renderer",
        }
    }
}

/// A unique marker for [`ElementType::Fragment`] identity, analogous to
/// `Symbol.for("aidk.fragment")`. Two `FragmentMarker`s obtained from
/// [`FragmentMarker::shared`] are `Rc`-identical; a fragment is also
/// recognized by the literal name `"Fragment"` as a cross-boundary fallback
/// per the Design Notes.
#[derive(Clone, Debug)]
pub struct FragmentMarker(Rc<()>);

impl FragmentMarker {
    pub fn shared() -> Self {
        thread_local! {
            static MARKER: Rc<()> = Rc::new(());
        }
        MARKER.with(|m| FragmentMarker(m.clone()))
    }
}

impl PartialEq for FragmentMarker {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for FragmentMarker {}

/// The tagged union over an element's `type`, replacing the original's
/// duck-typed dispatch on function/class/instance/string/symbol.
#[derive(Clone)]
pub enum ElementType {
    Function(Rc<dyn AnyFunctionComponent>),
    Class(Rc<dyn AnyClassComponent>),
    /// A plain object instance carrying its own `render` method (spec.md
    /// §4.4 rule 5). Wrapped in a `RefCell` rather than the bare `Rc` an
    /// immutable object reference would suggest, because `beginWork` needs
    /// `&mut` access to call lifecycle methods on it the same way it does
    /// for a class instance's `stateNode` — identity is still `Rc::ptr_eq`
    /// on this handle, unaffected by the added interior mutability.
    Instance(Rc<RefCell<dyn AnyClassInstance>>),
    /// A string host tag, e.g. a renderer-specific markup tag used inline in
    /// text content (spec.md §4.7.1's inline tag table operates on these).
    Host(String),
    Fragment(FragmentMarker),
    HostPrimitive(HostPrimitive),
}

impl fmt::Debug for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementType::Function(c) => write!(f, "Function({})", c.debug_name()),
            ElementType::Class(c) => write!(f, "Class({})", c.debug_name()),
            ElementType::Instance(c) => write!(f, "Instance({:p})", Rc::as_ptr(c)),
            ElementType::Host(tag) => write!(f, "Host({:?})", tag),
            ElementType::Fragment(_) => write!(f, "Fragment"),
            ElementType::HostPrimitive(p) => write!(f, "HostPrimitive({})", p.name()),
        }
    }
}

impl PartialEq for ElementType {
    /// Reuse-eligibility identity (spec.md §4.4: `oldFiber.type === element.type`).
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ElementType::Function(a), ElementType::Function(b)) => a.identity() == b.identity(),
            (ElementType::Class(a), ElementType::Class(b)) => a.identity() == b.identity(),
            (ElementType::Instance(a), ElementType::Instance(b)) => Rc::ptr_eq(a, b),
            (ElementType::Host(a), ElementType::Host(b)) => a == b,
            (ElementType::Fragment(a), ElementType::Fragment(b)) => a == b,
            (ElementType::HostPrimitive(a), ElementType::HostPrimitive(b)) => a == b,
            _ => false,
        }
    }
}

/// An element key, used for keyed child reuse (spec.md §4.4).
pub type ElementKey = Option<String>;

/// The declarative input: `{ type, props, key }` from spec.md §3.
#[derive(Clone)]
pub struct Element {
    pub element_type: ElementType,
    pub props: Props,
    pub key: ElementKey,
}

impl Element {
    pub fn new(element_type: ElementType, props: Props, key: ElementKey) -> Self {
        Self { element_type, props, key }
    }

    pub fn fragment(children: Children) -> Self {
        let mut props = Props::default();
        props.children = Some(Box::new(children));
        Self { element_type: ElementType::Fragment(FragmentMarker::shared()), props, key: None }
    }
}

/// Untyped props bag. `children` is kept out of the free-form `fields` map
/// and given a dedicated slot because it drives reconciliation; `content`
/// is likewise dedicated because §4.7's section/entry collection logic reads
/// it directly. Everything else a component author attaches rides along in
/// `fields` and is opaque to the compiler core.
#[derive(Clone, Default)]
pub struct Props {
    pub children: Option<Box<Children>>,
    /// Verbatim content captured for the collection phase (spec.md §3,
    /// §4.4 host primitives: "props.content is captured verbatim").
    pub content: Option<PropsContent>,
    /// `<Renderer instance={..}>` payload (spec.md §4.7 renderer stack).
    /// Dedicated because a renderer instance is a trait object, not
    /// something `fields`'s `serde_json::Value` map can hold.
    pub renderer: Option<Arc<dyn ContentRenderer>>,
    /// `<Tool .../>` payload (spec.md §6 tool authoring shapes). Dedicated
    /// for the same reason as `renderer`: a tool's `run` closure isn't
    /// JSON-representable. `props.message` for `Entry` elements has no such
    /// problem (`Message`/`ContentBlock` round-trip through `serde_json`
    /// cleanly) so it rides in `fields["message"]` instead of its own slot.
    pub tool_definition: Option<ToolDefinitionProp>,
    pub fields: Map<String, Value>,
}

/// The two tool-authoring shapes a `<Tool>` element's props may carry
/// (spec.md §6): a fully-described [`crate::com::ToolDescriptor`], or a bare
/// name string identifying a tool already registered elsewhere (e.g. by a
/// class component's static tool) that this element only re-exposes.
#[derive(Clone)]
pub enum ToolDefinitionProp {
    Descriptor(crate::com::ToolDescriptor),
    Name(String),
}

/// `props.content` may be a plain string or an array of content blocks
/// (spec.md §6 "Section content may alternatively be a plain string").
#[derive(Clone, Debug, PartialEq)]
pub enum PropsContent {
    Text(String),
    Blocks(Vec<crate::content::ContentBlock>),
}

impl Props {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_children(mut self, children: Children) -> Self {
        self.children = Some(Box::new(children));
        self
    }

    pub fn with_content(mut self, content: PropsContent) -> Self {
        self.content = Some(content);
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn ContentRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn with_tool_definition(mut self, tool: ToolDefinitionProp) -> Self {
        self.tool_definition = Some(tool);
        self
    }
}

/// `props.children`, before normalization (spec.md §3 / §4.4).
#[derive(Clone)]
pub enum Children {
    Element(Box<Element>),
    Array(Vec<Children>),
    Text(String),
    Number(f64),
    Bool(bool),
    ContentBlock(Box<crate::content::ContentBlock>),
    Empty,
}

impl From<Element> for Children {
    fn from(e: Element) -> Self {
        Children::Element(Box::new(e))
    }
}

/// A single normalized child, ready for positional reconciliation against
/// the previous sibling chain.
#[derive(Clone)]
pub enum NormalizedChild {
    Element(Box<Element>),
    ContentBlock(Box<crate::content::ContentBlock>),
    Text(String),
}

/// Flattens `children` one level per call, drops `null`/`undefined`/`false`,
/// stringifies numbers, and leaves content blocks/elements/strings intact
/// (spec.md §4.4 "Normalization rules").
pub fn normalize(children: &Children) -> Vec<NormalizedChild> {
    let mut out = Vec::new();
    normalize_into(children, &mut out);
    out
}

fn normalize_into(children: &Children, out: &mut Vec<NormalizedChild>) {
    match children {
        Children::Empty => {}
        Children::Bool(_) => {}
        Children::Element(e) => out.push(NormalizedChild::Element(e.clone())),
        Children::Text(s) => out.push(NormalizedChild::Text(s.clone())),
        Children::Number(n) => out.push(NormalizedChild::Text(format_number(*n))),
        Children::ContentBlock(b) => out.push(NormalizedChild::ContentBlock(b.clone())),
        Children::Array(items) => {
            for item in items {
                // "nested arrays are flattened one level per call": a
                // doubly-nested array inside this array is flattened by the
                // recursive call below, matching JS `Array.flat()` semantics
                // where normalize is invoked again on the reconciled result.
                normalize_into(item, out);
            }
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_flattens_nested_arrays_and_drops_falsy() {
        let children = Children::Array(vec![
            Children::Bool(false),
            Children::Array(vec![Children::Text("a".into()), Children::Number(2.0)]),
            Children::Empty,
        ]);
        let out = normalize(&children);
        assert_eq!(out.len(), 2);
        match &out[0] {
            NormalizedChild::Text(s) => assert_eq!(s, "a"),
            _ => panic!("expected text"),
        }
        match &out[1] {
            NormalizedChild::Text(s) => assert_eq!(s, "2"),
            _ => panic!("expected stringified number"),
        }
    }
}
