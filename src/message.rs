//! Timeline message shapes consumed by `Entry` elements and
//! `notifyOnMessage` (spec.md §4.6, §4.7 scenario 4).

use crate::content::ContentBlock;
use serde::{Deserialize, Serialize};

/// The role of a message on the timeline. `System` is diverted to
/// `systemMessageItems` rather than `timelineEntries` by the collector
/// (spec.md §4.7).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// A message's content: either a plain string (normalized to a single text
/// block by the collector) or an explicit list of content blocks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    pub fn into_blocks(self) -> Vec<ContentBlock> {
        match self {
            MessageContent::Text(t) => vec![ContentBlock::text(t)],
            MessageContent::Blocks(b) => b,
        }
    }
}

/// `props.message` on an `Entry` element.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

/// A message delivered to `notifyOnMessage` and `OnMessage` hooks, separate
/// from [`Message`] (the `Entry` element payload) because inbound messages
/// to the running execution are not necessarily well-formed timeline
/// entries — they may carry engine-specific payloads the compiler never
/// inspects.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub role: Role,
    pub content: MessageContent,
}
