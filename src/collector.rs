//! The structure collector (spec.md §4.7): a post-commit walk over the
//! committed fiber tree that produces [`CompiledStructure`], the normalized
//! output this crate hands to the surrounding agent engine.
//!
//! The walk carries the renderer stack, the monotonic `systemMessageItems`
//! order index, and an `in_section_or_message` flag exactly as spec.md §4.7
//! describes. Content collection (§4.7.1) is a second, narrower recursion
//! used only while gathering a Section/Entry/Ephemeral/Text primitive's own
//! content; it deliberately does not re-descend into other recognized host
//! primitives nested in that subtree, since those get their own top-level
//! registration from the continuing outer walk and collecting them twice
//! would duplicate entries in `sections`/`timelineEntries`/`tools`.

use crate::{
    com::ToolDescriptor,
    config::Config,
    content::{ContentBlock, ContentMapperRegistry, ContentRenderer, SemanticKind, SemanticNode},
    element::{ElementType, HostPrimitive, PropsContent},
    fiber::{Arena, Fiber, FiberId},
    message::{Message, MessageContent, Role},
};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::sync::Arc;

const TEXT_HOST_TAG: &str = "text";
const CONTENT_BLOCK_HOST_TAG: &str = "content-block";

/// A section's gathered content (spec.md §4.7.2 merge rules). Kept distinct
/// from [`PropsContent`] because merging two sections of mismatched shape
/// ("otherwise wrap both into a 2-element array") needs a slot — `Mixed` —
/// that `props.content` itself never needs to represent.
#[derive(Clone, Debug, PartialEq)]
pub enum SectionContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
    Mixed(Vec<SectionContent>),
}

impl From<PropsContent> for SectionContent {
    fn from(content: PropsContent) -> Self {
        match content {
            PropsContent::Text(t) => SectionContent::Text(t),
            PropsContent::Blocks(b) => SectionContent::Blocks(b),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CompiledSection {
    pub id: String,
    pub title: Option<String>,
    pub content: SectionContent,
    pub visibility: Option<String>,
    pub audience: Option<String>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<Map<String, Value>>,
    pub renderer: Option<Arc<dyn ContentRenderer>>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TimelineEntryKind {
    Message,
    Event,
}

#[derive(Clone, Debug)]
pub struct CompiledTimelineEntry {
    pub kind: TimelineEntryKind,
    pub message: Option<Message>,
    pub event: Option<Vec<ContentBlock>>,
    pub visibility: Option<String>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<Map<String, Value>>,
    pub renderer: Option<Arc<dyn ContentRenderer>>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SystemMessageItemKind {
    Section,
    Message,
    Loose,
}

#[derive(Clone, Debug)]
pub struct SystemMessageItem {
    pub kind: SystemMessageItemKind,
    pub section_id: Option<String>,
    pub content: Option<Vec<ContentBlock>>,
    pub index: usize,
    pub renderer: Arc<dyn ContentRenderer>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EphemeralPosition {
    Start,
    End,
}

#[derive(Clone, Debug)]
pub struct CompiledEphemeral {
    pub content: Vec<ContentBlock>,
    pub kind: Option<String>,
    pub position: EphemeralPosition,
    pub order: i64,
    pub id: Option<String>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<Map<String, Value>>,
    pub renderer: Arc<dyn ContentRenderer>,
}

/// The compiled output (spec.md §3 "CompiledStructure"). Produced anew each
/// compile; invariant 5 explicitly disclaims pointer equality across
/// compiles, so nothing here implements `PartialEq` by identity.
#[derive(Clone, Debug, Default)]
pub struct CompiledStructure {
    pub sections: IndexMap<String, CompiledSection>,
    pub timeline_entries: Vec<CompiledTimelineEntry>,
    pub system_message_items: Vec<SystemMessageItem>,
    pub tools: IndexMap<String, ToolDescriptor>,
    pub ephemeral: Vec<CompiledEphemeral>,
    pub metadata: Map<String, Value>,
}

struct CollectContext<'a> {
    arena: &'a Arena,
    config: &'a Config,
    content_mappers: &'a ContentMapperRegistry,
    renderer_stack: Vec<Arc<dyn ContentRenderer>>,
    loose_blocks: Vec<ContentBlock>,
    structure: CompiledStructure,
}

impl<'a> CollectContext<'a> {
    fn current_renderer(&self) -> Arc<dyn ContentRenderer> {
        self.renderer_stack.last().expect("renderer stack always has a default").clone()
    }

    /// `None` when the renderer in scope is just the ambient default, per
    /// spec.md §4.7 "a non-default renderer is attached to the entry".
    fn non_default_renderer(&self) -> Option<Arc<dyn ContentRenderer>> {
        let top = self.current_renderer();
        if top.name() == self.config.default_renderer.name() {
            None
        } else {
            Some(top)
        }
    }

    fn push_system_message_item(&mut self, kind: SystemMessageItemKind, section_id: Option<String>, content: Option<Vec<ContentBlock>>) {
        let index = self.structure.system_message_items.len();
        let renderer = self.current_renderer();
        self.structure.system_message_items.push(SystemMessageItem { kind, section_id, content, index, renderer });
    }
}

/// `compile`'s second pass (spec.md §4.7): walks `root`'s committed subtree
/// and returns the normalized [`CompiledStructure`].
pub fn collect(arena: &Arena, root: FiberId, config: &Config, content_mappers: &ContentMapperRegistry) -> CompiledStructure {
    let mut ctx = CollectContext {
        arena,
        config,
        content_mappers,
        renderer_stack: vec![config.default_renderer.clone()],
        loose_blocks: Vec::new(),
        structure: CompiledStructure::default(),
    };
    walk(&mut ctx, root, false);
    if !ctx.loose_blocks.is_empty() {
        let blocks = std::mem::take(&mut ctx.loose_blocks);
        ctx.push_system_message_item(SystemMessageItemKind::Loose, None, Some(blocks));
    }
    // Stable sort preserves insertion (tree-encounter) order among entries
    // sharing an `order` value (spec.md §4.8's sibling Open Question for
    // ephemeral ordering; DESIGN.md records the resolution).
    ctx.structure.ephemeral.sort_by_key(|e| e.order);
    ctx.structure
}

fn walk(ctx: &mut CollectContext, id: FiberId, in_section_or_message: bool) {
    let Some(fiber) = ctx.arena.get(id) else { return };
    match &fiber.element_type {
        ElementType::HostPrimitive(HostPrimitive::Renderer) => {
            let renderer = fiber.props.renderer.clone().unwrap_or_else(|| ctx.current_renderer());
            ctx.renderer_stack.push(renderer);
            for child in ctx.arena.children_of(id) {
                walk(ctx, child, in_section_or_message);
            }
            ctx.renderer_stack.pop();
        }
        ElementType::HostPrimitive(HostPrimitive::Section) => {
            register_section(ctx, id);
            for child in ctx.arena.children_of(id) {
                walk(ctx, child, true);
            }
        }
        ElementType::HostPrimitive(HostPrimitive::Entry) => {
            register_entry(ctx, id);
            for child in ctx.arena.children_of(id) {
                walk(ctx, child, true);
            }
        }
        ElementType::HostPrimitive(HostPrimitive::Ephemeral) => {
            register_ephemeral(ctx, id);
            for child in ctx.arena.children_of(id) {
                walk(ctx, child, in_section_or_message);
            }
        }
        ElementType::HostPrimitive(HostPrimitive::Tool) => {
            register_tool(ctx, id);
            for child in ctx.arena.children_of(id) {
                walk(ctx, child, in_section_or_message);
            }
        }
        _ => {
            if !in_section_or_message {
                single_node_loose_contribution(ctx, fiber);
            }
            for child in ctx.arena.children_of(id) {
                walk(ctx, child, in_section_or_message);
            }
        }
    }
}

fn single_node_loose_contribution(ctx: &mut CollectContext, fiber: &Fiber) {
    match &fiber.element_type {
        ElementType::Host(tag) if tag == TEXT_HOST_TAG => {
            let text = fiber.props.get("text").and_then(Value::as_str).unwrap_or_default().to_string();
            ctx.loose_blocks.push(ContentBlock::text(text));
        }
        ElementType::Host(tag) if tag == CONTENT_BLOCK_HOST_TAG => {
            if let Some(PropsContent::Blocks(blocks)) = &fiber.props.content {
                ctx.loose_blocks.extend(blocks.iter().cloned());
            }
        }
        ElementType::Host(tag) => {
            if let Some(block) = ctx.content_mappers.map(tag, &fiber.props.fields) {
                ctx.loose_blocks.push(block);
            }
        }
        _ => {}
    }
}

/// Gathers a section's content, preferring its reconciled children over
/// `props.content` whenever any child exists (the resolved Open Question;
/// see DESIGN.md).
fn gather_section_content(ctx: &mut CollectContext, id: FiberId) -> SectionContent {
    let children = ctx.arena.children_of(id);
    if !children.is_empty() {
        let mut out = Vec::new();
        for child in children {
            collect_node_content(ctx, child, &mut out);
        }
        SectionContent::Blocks(out)
    } else {
        ctx.arena.get(id).and_then(|f| f.props.content.clone()).map(SectionContent::from).unwrap_or(SectionContent::Blocks(Vec::new()))
    }
}

/// Gathers content as a plain block list, used by Entry/Ephemeral/`<Text>`
/// where (unlike Section) a plain-string `props.content` is always
/// normalized to a single text block rather than passed through verbatim
/// (spec.md §8 scenario 4).
fn gather_block_content(ctx: &mut CollectContext, id: FiberId) -> Vec<ContentBlock> {
    let children = ctx.arena.children_of(id);
    if !children.is_empty() {
        let mut out = Vec::new();
        for child in children {
            collect_node_content(ctx, child, &mut out);
        }
        out
    } else {
        match ctx.arena.get(id).and_then(|f| f.props.content.clone()) {
            Some(PropsContent::Text(t)) => vec![ContentBlock::text(t)],
            Some(PropsContent::Blocks(b)) => b,
            None => Vec::new(),
        }
    }
}

/// Content collection for one child fiber of a section/entry/ephemeral/loose
/// host (spec.md §4.7.1).
fn collect_node_content(ctx: &mut CollectContext, id: FiberId, out: &mut Vec<ContentBlock>) {
    let Some(fiber) = ctx.arena.get(id) else { return };
    match &fiber.element_type {
        ElementType::Host(tag) if tag == TEXT_HOST_TAG => {
            let text = fiber.props.get("text").and_then(Value::as_str).unwrap_or_default().to_string();
            out.push(ContentBlock::text(text));
        }
        ElementType::Host(tag) if tag == CONTENT_BLOCK_HOST_TAG => {
            if let Some(PropsContent::Blocks(blocks)) = &fiber.props.content {
                out.extend(blocks.iter().cloned());
            }
        }
        ElementType::HostPrimitive(HostPrimitive::Renderer) => {
            let renderer = fiber.props.renderer.clone().unwrap_or_else(|| ctx.current_renderer());
            ctx.renderer_stack.push(renderer);
            for child in ctx.arena.children_of(id) {
                collect_node_content(ctx, child, out);
            }
            ctx.renderer_stack.pop();
        }
        ElementType::HostPrimitive(HostPrimitive::Text) => {
            out.extend(gather_block_content(ctx, id));
        }
        ElementType::HostPrimitive(p @ HostPrimitive::Image)
        | ElementType::HostPrimitive(p @ HostPrimitive::Document)
        | ElementType::HostPrimitive(p @ HostPrimitive::Audio)
        | ElementType::HostPrimitive(p @ HostPrimitive::Video)
        | ElementType::HostPrimitive(p @ HostPrimitive::Code)
        | ElementType::HostPrimitive(p @ HostPrimitive::Json) => {
            out.push(builtin_primitive_block(*p, &fiber.props.fields));
        }
        ElementType::HostPrimitive(HostPrimitive::Section)
        | ElementType::HostPrimitive(HostPrimitive::Entry)
        | ElementType::HostPrimitive(HostPrimitive::Ephemeral)
        | ElementType::HostPrimitive(HostPrimitive::Tool)
        | ElementType::HostPrimitive(HostPrimitive::Timeline) => {
            // Handled by the outer top-level walk's own recursion; collected
            // here too it would duplicate their registration.
        }
        ElementType::Host(tag) => {
            if let Some(block) = ctx.content_mappers.map(tag, &fiber.props.fields) {
                out.push(block);
            } else {
                out.push(unknown_host_block(ctx, id, fiber, tag));
            }
        }
        _ => {
            // Function/Class/Instance/Fragment fibers were already replaced
            // by their rendered output in the committed tree; descend
            // transparently (spec.md §4.7.1 "non-mapped host elements are
            // transparent").
            for child in ctx.arena.children_of(id) {
                collect_node_content(ctx, child, out);
            }
        }
    }
}

fn builtin_primitive_block(primitive: HostPrimitive, fields: &Map<String, Value>) -> ContentBlock {
    match primitive {
        HostPrimitive::Image => ContentBlock::Image(fields.clone()),
        HostPrimitive::Document => ContentBlock::Document(fields.clone()),
        HostPrimitive::Audio => ContentBlock::Audio(fields.clone()),
        HostPrimitive::Video => ContentBlock::Video(fields.clone()),
        HostPrimitive::Code => ContentBlock::Code(fields.clone()),
        HostPrimitive::Json => ContentBlock::Json(fields.clone()),
        _ => unreachable!("builtin_primitive_block called with a non-content primitive"),
    }
}

/// An unrecognized string-typed host captured per spec.md §4.7.1's fallback
/// shape: a custom marker carrying the original tag/attrs, plus whatever
/// inline-semantic tree (§4.7.1's table) its subtree yields.
fn unknown_host_block(ctx: &CollectContext, id: FiberId, fiber: &Fiber, tag: &str) -> ContentBlock {
    let mut nodes = Vec::new();
    inline_extract_into(ctx, id, &mut nodes);
    let semantic_node = nodes.into_iter().next().map(Box::new);
    let mut custom_props = Map::new();
    custom_props.insert("rendererTag".into(), Value::String(tag.to_string()));
    custom_props.insert("rendererAttrs".into(), Value::Object(fiber.props.fields.clone()));
    let custom = SemanticNode { semantic: SemanticKind::Custom, children: Vec::new(), props: custom_props };
    ContentBlock::Text { text: String::new(), semantic: Some(custom), semantic_node }
}

/// Inline semantic extraction (spec.md §4.7.1's tag table): a recognized
/// host tag becomes one [`SemanticNode`]; a non-recognized one is
/// transparent and splices its own extracted descendants into `out` in
/// place.
fn inline_extract_into(ctx: &CollectContext, id: FiberId, out: &mut Vec<SemanticNode>) {
    let Some(fiber) = ctx.arena.get(id) else { return };
    let tag = match &fiber.element_type {
        ElementType::Host(tag) => tag.clone(),
        ElementType::HostPrimitive(p) => p.name().to_string(),
        _ => {
            for child in ctx.arena.children_of(id) {
                inline_extract_into(ctx, child, out);
            }
            return;
        }
    };
    match SemanticKind::for_tag(&tag.to_lowercase()) {
        Some(kind) => {
            let children = if kind.captures_props_only() {
                Vec::new()
            } else {
                let mut child_nodes = Vec::new();
                for child in ctx.arena.children_of(id) {
                    inline_extract_into(ctx, child, &mut child_nodes);
                }
                child_nodes
            };
            out.push(SemanticNode { semantic: kind, children, props: fiber.props.fields.clone() });
        }
        None => {
            for child in ctx.arena.children_of(id) {
                inline_extract_into(ctx, child, out);
            }
        }
    }
}

fn string_field(fiber: &Fiber, key: &str) -> Option<String> {
    fiber.props.get(key).and_then(Value::as_str).map(str::to_string)
}

fn string_list_field(fiber: &Fiber, key: &str) -> Option<Vec<String>> {
    fiber.props.get(key).and_then(Value::as_array).map(|items| items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
}

fn object_field(fiber: &Fiber, key: &str) -> Option<Map<String, Value>> {
    fiber.props.get(key).and_then(Value::as_object).cloned()
}

fn merge_section_content(old: SectionContent, new: SectionContent) -> SectionContent {
    match (old, new) {
        (SectionContent::Text(a), SectionContent::Text(b)) => SectionContent::Text(format!("{a}\n{b}")),
        (SectionContent::Blocks(mut a), SectionContent::Blocks(b)) => {
            a.extend(b);
            SectionContent::Blocks(a)
        }
        (a, b) => SectionContent::Mixed(vec![a, b]),
    }
}

fn register_section(ctx: &mut CollectContext, id: FiberId) {
    let content = gather_section_content(ctx, id);
    let Some(fiber) = ctx.arena.get(id) else { return };
    let section_id = string_field(fiber, "id").unwrap_or_else(|| format!("section-{}", ctx.structure.sections.len()));
    let title = string_field(fiber, "title");
    let visibility = string_field(fiber, "visibility");
    let audience = string_field(fiber, "audience");
    let tags = string_list_field(fiber, "tags");
    let metadata = object_field(fiber, "metadata");
    let renderer = fiber.props.renderer.clone().or_else(|| ctx.non_default_renderer());

    match ctx.structure.sections.get_mut(&section_id) {
        Some(existing) => {
            let old_content = std::mem::replace(&mut existing.content, SectionContent::Text(String::new()));
            existing.content = merge_section_content(old_content, content);
            existing.title = title;
            existing.visibility = visibility;
            existing.audience = audience;
            existing.tags = tags;
            existing.metadata = metadata;
            existing.renderer = renderer;
        }
        None => {
            ctx.structure.sections.insert(
                section_id.clone(),
                CompiledSection { id: section_id.clone(), title, content, visibility, audience, tags, metadata, renderer },
            );
        }
    }
    ctx.push_system_message_item(SystemMessageItemKind::Section, Some(section_id), None);
}

fn register_entry(ctx: &mut CollectContext, id: FiberId) {
    let Some(fiber) = ctx.arena.get(id) else { return };
    let kind = string_field(fiber, "kind").unwrap_or_else(|| "event".to_string());
    let visibility = string_field(fiber, "visibility");
    let tags = string_list_field(fiber, "tags");
    let metadata = object_field(fiber, "metadata");
    let renderer = fiber.props.renderer.clone().or_else(|| ctx.non_default_renderer());

    if kind == "message" {
        let raw_message = fiber.props.get("message").cloned();
        let parsed: Option<Message> = raw_message.and_then(|v| serde_json::from_value(v).ok());
        let Some(message) = parsed else {
            tracing::warn!(fiber = ?id, "Entry kind=\"message\" missing a valid message prop; skipped");
            return;
        };
        let blocks = gather_block_content(ctx, id);
        let content = if blocks.is_empty() { message.content.into_blocks() } else { blocks };
        let final_message = Message { role: message.role, content: MessageContent::Blocks(content) };

        if final_message.role == Role::System {
            ctx.push_system_message_item(SystemMessageItemKind::Message, None, Some(final_message.content.into_blocks()));
        } else {
            ctx.structure.timeline_entries.push(CompiledTimelineEntry {
                kind: TimelineEntryKind::Message,
                message: Some(final_message),
                event: None,
                visibility,
                tags,
                metadata,
                renderer,
            });
        }
    } else {
        let blocks = gather_block_content(ctx, id);
        ctx.structure.timeline_entries.push(CompiledTimelineEntry {
            kind: TimelineEntryKind::Event,
            message: None,
            event: Some(blocks),
            visibility,
            tags,
            metadata,
            renderer,
        });
    }
}

fn register_ephemeral(ctx: &mut CollectContext, id: FiberId) {
    let content = gather_block_content(ctx, id);
    let Some(fiber) = ctx.arena.get(id) else { return };
    let position = match string_field(fiber, "position").as_deref() {
        Some("start") => EphemeralPosition::Start,
        _ => EphemeralPosition::End,
    };
    let order = fiber.props.get("order").and_then(Value::as_i64).unwrap_or(0);
    let ephemeral_id = string_field(fiber, "id");
    let tags = string_list_field(fiber, "tags");
    let metadata = object_field(fiber, "metadata");
    let kind = string_field(fiber, "type");
    let renderer = ctx.current_renderer();
    ctx.structure.ephemeral.push(CompiledEphemeral { content, kind, position, order, id: ephemeral_id, tags, metadata, renderer });
}

fn register_tool(ctx: &mut CollectContext, id: FiberId) {
    let Some(fiber) = ctx.arena.get(id) else { return };
    match &fiber.props.tool_definition {
        Some(crate::element::ToolDefinitionProp::Descriptor(descriptor)) => {
            ctx.structure.tools.insert(descriptor.metadata.name.clone(), descriptor.clone());
        }
        Some(crate::element::ToolDefinitionProp::Name(name)) => {
            // A bare name has no embedded `run`/`metadata` pair to upsert
            // into this crate's typed `tools` map; resolving it against an
            // already-registered COM tool is the engine's concern (spec.md
            // §4.8.1), not this collection pass's.
            tracing::debug!(fiber = ?id, tool = %name, "Tool props.definition is a bare name; nothing to upsert");
        }
        None => {
            tracing::warn!(fiber = ?id, "Tool element missing props.tool_definition; skipped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        com::{StateChangeHandler, SubscriptionToken},
        compiler::TickState,
        effects::EffectQueues,
        element::{Children, Element, Props},
        reconciler::{reconcile_root, FiberIdOrElement},
    };
    use std::rc::Rc;

    struct NullCom;
    impl crate::com::Com for NullCom {
        fn get_state(&self, _key: &str) -> Option<Value> {
            None
        }
        fn set_state(&self, _key: &str, _value: Value) {}
        fn on_state_changed(&self, _handler: StateChangeHandler) -> SubscriptionToken {
            SubscriptionToken(0)
        }
        fn off_state_changed(&self, _token: SubscriptionToken) {}
        fn add_tool(&self, _tool: ToolDescriptor) {}
        fn get_tool(&self, _name: &str) -> Option<ToolDescriptor> {
            None
        }
        fn set_ref(&self, _name: &str, _instance: Rc<dyn std::any::Any>) {}
        fn remove_ref(&self, _name: &str) {}
        fn request_recompile(&self, _reason: String) {}
        fn reset_recompile_request(&self) {}
        fn was_recompile_requested(&self) -> bool {
            false
        }
        fn recompile_reasons(&self) -> Vec<String> {
            Vec::new()
        }
    }

    fn build(element: &Element) -> (Arena, FiberId) {
        let mut arena = Arena::new();
        let com = NullCom;
        let tick = TickState::new();
        let mut queues = EffectQueues::new();
        let root = futures::executor::block_on(reconcile_root(&mut arena, FiberIdOrElement::None, element, &com, &tick, &mut queues)).unwrap();
        (arena, root)
    }

    #[test]
    fn simple_section_collects_verbatim_string_content() {
        let element = Element::new(
            ElementType::HostPrimitive(HostPrimitive::Section),
            Props::default().with_field("id", "s").with_content(PropsContent::Text("hello".into())),
            None,
        );
        let (arena, root) = build(&element);
        let config = Config::default();
        let mappers = ContentMapperRegistry::new();
        let compiled = collect(&arena, root, &config, &mappers);

        assert_eq!(compiled.sections.get("s").unwrap().content, SectionContent::Text("hello".into()));
        assert_eq!(compiled.system_message_items.len(), 1);
        assert_eq!(compiled.system_message_items[0].index, 0);
        assert_eq!(compiled.system_message_items[0].kind, SystemMessageItemKind::Section);
    }

    #[test]
    fn duplicate_section_ids_merge_in_place_without_reordering() {
        fn section(id: &str, text: &str) -> Element {
            Element::new(
                ElementType::HostPrimitive(HostPrimitive::Section),
                Props::default().with_field("id", id).with_content(PropsContent::Text(text.into())),
                None,
            )
        }

        let root = Element::new(
            ElementType::Fragment(crate::element::FragmentMarker::shared()),
            Props::default().with_children(Children::Array(vec![
                Children::from(section("s", "one")),
                Children::from(section("a", "mid")),
                Children::from(section("s", "two")),
            ])),
            None,
        );
        let (arena, root_id) = build(&root);
        let config = Config::default();
        let mappers = ContentMapperRegistry::new();
        let compiled = collect(&arena, root_id, &config, &mappers);

        let ids: Vec<&String> = compiled.sections.keys().collect();
        assert_eq!(ids, vec!["s", "a"], "merging a duplicate id must keep its original slot, not move it to the end");
        assert_eq!(compiled.sections.get("s").unwrap().content, SectionContent::Text("one\ntwo".into()));
    }

    #[test]
    fn entry_children_override_message_content() {
        let message = serde_json::json!({ "role": "user", "content": "ignored" });
        let element = Element::new(
            ElementType::HostPrimitive(HostPrimitive::Entry),
            Props::default()
                .with_field("kind", "message")
                .with_field("message", message)
                .with_children(Children::from(Element::new(
                    ElementType::HostPrimitive(HostPrimitive::Text),
                    Props::default().with_children(Children::Text("used".into())),
                    None,
                ))),
            None,
        );
        let (arena, root) = build(&element);
        let config = Config::default();
        let mappers = ContentMapperRegistry::new();
        let compiled = collect(&arena, root, &config, &mappers);

        assert_eq!(compiled.timeline_entries.len(), 1);
        let entry = &compiled.timeline_entries[0];
        match &entry.message {
            Some(m) => assert_eq!(m.content, MessageContent::Blocks(vec![ContentBlock::text("used")])),
            None => panic!("expected a message entry"),
        }
    }

    #[test]
    fn tool_last_write_wins_by_name() {
        fn tool(value: &str) -> ToolDescriptor {
            let value = value.to_string();
            ToolDescriptor::flat(Some("t".into()), None, None, Rc::new(move |_input| {
                let value = value.clone();
                Box::pin(async move { Ok(Value::String(value)) })
            }))
            .unwrap()
        }

        let a = Element::new(
            ElementType::HostPrimitive(HostPrimitive::Tool),
            Props::default().with_tool_definition(crate::element::ToolDefinitionProp::Descriptor(tool("a"))),
            None,
        );
        let b = Element::new(
            ElementType::HostPrimitive(HostPrimitive::Tool),
            Props::default().with_tool_definition(crate::element::ToolDefinitionProp::Descriptor(tool("b"))),
            None,
        );
        let root = Element::new(
            ElementType::Fragment(crate::element::FragmentMarker::shared()),
            Props::default().with_children(Children::Array(vec![Children::from(a), Children::from(b)])),
            None,
        );
        let (arena, root_id) = build(&root);
        let config = Config::default();
        let mappers = ContentMapperRegistry::new();
        let compiled = collect(&arena, root_id, &config, &mappers);

        assert_eq!(compiled.tools.len(), 1);
        assert!(compiled.tools.contains_key("t"));
    }

    #[test]
    fn ephemeral_ties_keep_insertion_order() {
        fn ephemeral(id: &str) -> Element {
            Element::new(
                ElementType::HostPrimitive(HostPrimitive::Ephemeral),
                Props::default().with_field("id", id).with_content(PropsContent::Text(id.to_string())),
                None,
            )
        }
        let root = Element::new(
            ElementType::Fragment(crate::element::FragmentMarker::shared()),
            Props::default().with_children(Children::Array(vec![Children::from(ephemeral("a")), Children::from(ephemeral("b"))])),
            None,
        );
        let (arena, root_id) = build(&root);
        let config = Config::default();
        let mappers = ContentMapperRegistry::new();
        let compiled = collect(&arena, root_id, &config, &mappers);

        assert_eq!(compiled.ephemeral.len(), 2);
        assert_eq!(compiled.ephemeral[0].id.as_deref(), Some("a"));
        assert_eq!(compiled.ephemeral[1].id.as_deref(), Some("b"));
    }
}
