//! The content-block wire shape, the `ContentRenderer` abstraction consumed
//! (not implemented) by this crate, and inline semantic extraction for host
//! elements appearing inside text-bearing content (spec.md §4.7.1).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{collections::HashMap, fmt, sync::Arc};

/// The closed set of content-block kinds recognized by the collector.
/// Unknown `type` values still round-trip (see [`ContentBlock::Other`]) so
/// that a future engine revision can add kinds without this crate rejecting
/// them outright, but only these are given first-class treatment (e.g.
/// `Text` is what synthetic `"text"` fibers emit).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        semantic: Option<SemanticNode>,
        #[serde(skip_serializing_if = "Option::is_none", rename = "semanticNode")]
        semantic_node: Option<Box<SemanticNode>>,
    },
    Image(Map<String, Value>),
    Document(Map<String, Value>),
    Audio(Map<String, Value>),
    Video(Map<String, Value>),
    Code(Map<String, Value>),
    Json(Map<String, Value>),
    ToolUse(Map<String, Value>),
    ToolResult(Map<String, Value>),
    Reasoning(Map<String, Value>),
    UserAction(Map<String, Value>),
    SystemEvent(Map<String, Value>),
    StateChange(Map<String, Value>),
    /// Anything carrying a `type` this crate doesn't special-case; kept
    /// verbatim per spec.md's "carried verbatim through compilation".
    #[serde(other)]
    Other,
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into(), semantic: None, semantic_node: None }
    }

    /// The closed set of recognized type tags, used by [`is_default_content_block`].
    pub const KNOWN_TYPES: &'static [&'static str] = &[
        "text",
        "image",
        "document",
        "audio",
        "video",
        "code",
        "json",
        "tool_use",
        "tool_result",
        "reasoning",
        "user_action",
        "system_event",
        "state_change",
    ];
}

/// Default predicate recognizing a value as a content block: an object
/// carrying a `type` field drawn from the closed set.
pub fn is_default_content_block(value: &Value) -> bool {
    match value.as_object().and_then(|obj| obj.get("type")).and_then(Value::as_str) {
        Some(ty) => ContentBlock::KNOWN_TYPES.contains(&ty),
        None => false,
    }
}

/// Shape produced by inline semantic extraction for host elements that
/// appear inside text-bearing content (spec.md §4.7.1's inline tag table).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SemanticNode {
    pub semantic: SemanticKind,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub children: Vec<SemanticNode>,
    #[serde(skip_serializing_if = "Map::is_empty", default)]
    pub props: Map<String, Value>,
}

/// The fixed inline-tag-to-semantic mapping from spec.md §4.7.1.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticKind {
    Code,
    Strong,
    Em,
    Underline,
    Strikethrough,
    Mark,
    Subscript,
    Superscript,
    Small,
    Link,
    Quote,
    Citation,
    Keyboard,
    Variable,
    Paragraph,
    Blockquote,
    Image,
    Audio,
    Video,
    /// A non-mapped host element tag fell through to the custom fallback
    /// shape `{ type: 'text', text: '', semantic: { type: 'custom', ... } }`
    /// described in spec.md §4.7.1.
    Custom,
}

impl SemanticKind {
    /// Looks up the inline semantic mapping for a lowercased host tag name.
    pub fn for_tag(tag: &str) -> Option<Self> {
        use SemanticKind::*;
        Some(match tag {
            "inlinecode" | "code" => Code,
            "strong" | "b" => Strong,
            "em" | "i" => Em,
            "u" => Underline,
            "s" | "del" => Strikethrough,
            "mark" => Mark,
            "sub" => Subscript,
            "sup" => Superscript,
            "small" => Small,
            "a" => Link,
            "q" => Quote,
            "cite" => Citation,
            "kbd" => Keyboard,
            "var" => Variable,
            "p" => Paragraph,
            "blockquote" => Blockquote,
            "img" => Image,
            "audio" => Audio,
            "video" => Video,
            _ => return None,
        })
    }

    /// Tags whose children are flattened in place rather than nested
    /// (`img`/`audio`/`video` capture props but have no text children to
    /// descend into in the same sense paragraph-like tags do — still, per
    /// spec, their props are captured "minus children").
    pub fn captures_props_only(self) -> bool {
        matches!(self, SemanticKind::Image | SemanticKind::Audio | SemanticKind::Video)
    }
}

/// A `ContentRenderer` is an external collaborator: something capable of
/// turning already-collected content into a final presentation form. The
/// compiler only tracks *which* renderer is in scope at each point in the
/// tree (the renderer stack, spec.md §4.7) and attaches a reference to the
/// collected output; it never calls into the renderer itself.
pub trait ContentRenderer: fmt::Debug + Send + Sync {
    /// A stable name used for equality/debugging when comparing renderer
    /// identity is needed (e.g. "did exiting this subtree restore the prior
    /// renderer").
    fn name(&self) -> &str;
}

/// The renderer installed when no `Renderer` primitive is in scope and no
/// `Config::default_renderer` override was supplied.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughRenderer;

impl ContentRenderer for PassthroughRenderer {
    fn name(&self) -> &str {
        "passthrough"
    }
}

/// Maps a recognized element type (keyed by name, lowercased, per spec.md
/// §4.7.1 "elements matching a registered content mapper ... keyed by type,
/// or by lowercased name") to a content block constructor. Function-typed
/// components aren't mappable this way; only string/symbol host primitives
/// carrying a recognizable name are.
#[derive(Default)]
pub struct ContentMapperRegistry {
    by_name: HashMap<String, Arc<dyn Fn(&Map<String, Value>) -> ContentBlock + Send + Sync>>,
}

impl ContentMapperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        mapper: impl Fn(&Map<String, Value>) -> ContentBlock + Send + Sync + 'static,
    ) {
        self.by_name.insert(name.into().to_lowercase(), Arc::new(mapper));
    }

    pub fn map(&self, name: &str, props: &Map<String, Value>) -> Option<ContentBlock> {
        self.by_name.get(&name.to_lowercase()).map(|mapper| mapper(props))
    }
}

impl fmt::Debug for ContentMapperRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentMapperRegistry")
            .field("registered", &self.by_name.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_known_content_block() {
        let v: Value = serde_json::json!({ "type": "text", "text": "hi" });
        assert!(is_default_content_block(&v));
    }

    #[test]
    fn rejects_objects_without_closed_set_type() {
        let v: Value = serde_json::json!({ "type": "widget" });
        assert!(!is_default_content_block(&v));
    }

    #[test]
    fn inline_tag_lookup_is_case_sensitive_on_lowercased_input() {
        assert_eq!(SemanticKind::for_tag("strong"), Some(SemanticKind::Strong));
        assert_eq!(SemanticKind::for_tag("b"), Some(SemanticKind::Strong));
        assert_eq!(SemanticKind::for_tag("div"), None);
    }
}
