//! The "Context Object Model" (COM): a process-wide keyed state store
//! consumed, not implemented, by this crate (spec.md §6). Only the
//! interface the compiler and component authors rely on is specified here.

use serde_json::Value;
use std::{fmt, rc::Rc};

/// A function a component's effect/state-change subscription calls back
/// into when a COM key changes.
pub type StateChangeHandler = Rc<dyn Fn(&str, &Value)>;

/// The external, process-wide keyed state store. The compiler never stores
/// a `Box<dyn Com>` in a fiber long-term; it borrows one for the duration
/// of a render or notification pass, matching the single-threaded
/// cooperative scheduling model (spec.md §5).
pub trait Com {
    fn get_state(&self, key: &str) -> Option<Value>;
    fn set_state(&self, key: &str, value: Value);
    fn on_state_changed(&self, handler: StateChangeHandler) -> SubscriptionToken;
    fn off_state_changed(&self, token: SubscriptionToken);

    fn add_tool(&self, tool: ToolDescriptor);
    fn get_tool(&self, name: &str) -> Option<ToolDescriptor>;

    fn set_ref(&self, name: &str, instance: Rc<dyn std::any::Any>);
    fn remove_ref(&self, name: &str);

    fn request_recompile(&self, reason: String);
    fn reset_recompile_request(&self);
    fn was_recompile_requested(&self) -> bool;
    fn recompile_reasons(&self) -> Vec<String>;
}

/// Opaque handle returned by [`Com::on_state_changed`], passed back to
/// [`Com::off_state_changed`] to unsubscribe.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct SubscriptionToken(pub u64);

/// A tool, in either of the two authoring shapes spec.md §6 allows: the
/// flat shorthand `{ name, description, input, run }` (auto-lifted here)
/// or the already-shaped `{ metadata, run }`.
#[derive(Clone)]
pub struct ToolDescriptor {
    pub metadata: ToolMetadata,
    pub run: Rc<dyn Fn(Value) -> futures::future::LocalBoxFuture<'static, Result<Value, anyhow::Error>>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ToolMetadata {
    pub name: String,
    pub description: Option<String>,
    pub input: Option<Value>,
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor").field("metadata", &self.metadata).finish()
    }
}

impl ToolDescriptor {
    /// Builds a tool from the flat shorthand, returning `None` (and letting
    /// the caller warn) when `name` is missing, per spec.md §6 "Missing
    /// `name` skips registration with a warning".
    pub fn flat(
        name: Option<String>,
        description: Option<String>,
        input: Option<Value>,
        run: Rc<dyn Fn(Value) -> futures::future::LocalBoxFuture<'static, Result<Value, anyhow::Error>>>,
    ) -> Option<Self> {
        let name = match name {
            Some(n) if !n.is_empty() => n,
            _ => {
                tracing::warn!("tool registration skipped: missing name");
                return None;
            }
        };
        Some(Self { metadata: ToolMetadata { name, description, input }, run })
    }
}
