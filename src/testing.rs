//! Test helpers for driving a [`crate::compiler::Compiler`] without a real
//! engine around it. Spec.md treats the COM and `ContentRenderer` as
//! external collaborators (§1 "Out of scope"); [`InMemoryCom`] is a minimal
//! concrete stand-in so this crate's own tests, and a downstream component
//! author's tests, don't need one.
//!
//! A small owned runtime wrapper plus throwaway collaborator
//! implementations, built for unit tests rather than production use.

use crate::{
    collector::CompiledStructure,
    com::{Com, StateChangeHandler, SubscriptionToken, ToolDescriptor},
    compiler::{Compiler, TickState},
    config::Config,
    element::Element,
    error::CompileError,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::{
    collections::HashMap,
    rc::Rc,
    sync::atomic::{AtomicU64, Ordering},
};

/// A process-local, single-threaded [`Com`] backed by plain hash maps. Not
/// meant for production: COM's real implementation belongs to the
/// surrounding engine (§1), but component behavior still needs something
/// concrete to read and write state through in isolation.
#[derive(Default)]
pub struct InMemoryCom {
    state: Mutex<HashMap<String, Value>>,
    handlers: Mutex<HashMap<u64, StateChangeHandler>>,
    tools: Mutex<HashMap<String, ToolDescriptor>>,
    refs: Mutex<HashMap<String, Rc<dyn std::any::Any>>>,
    next_token: AtomicU64,
    recompile_requested: Mutex<bool>,
    recompile_reasons: Mutex<Vec<String>>,
}

impl InMemoryCom {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Test-only accessor for a tool registered during a compile, without
    /// going through a `ToolDescriptor`'s `run` closure.
    pub fn tool_names(&self) -> Vec<String> {
        self.tools.lock().keys().cloned().collect()
    }
}

impl Com for InMemoryCom {
    fn get_state(&self, key: &str) -> Option<Value> {
        self.state.lock().get(key).cloned()
    }

    fn set_state(&self, key: &str, value: Value) {
        self.state.lock().insert(key.to_string(), value.clone());
        let handlers: Vec<_> = self.handlers.lock().values().cloned().collect();
        for handler in handlers {
            handler(key, &value);
        }
    }

    fn on_state_changed(&self, handler: StateChangeHandler) -> SubscriptionToken {
        let id = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.handlers.lock().insert(id, handler);
        SubscriptionToken(id)
    }

    fn off_state_changed(&self, token: SubscriptionToken) {
        self.handlers.lock().remove(&token.0);
    }

    fn add_tool(&self, tool: ToolDescriptor) {
        self.tools.lock().insert(tool.metadata.name.clone(), tool);
    }

    fn get_tool(&self, name: &str) -> Option<ToolDescriptor> {
        self.tools.lock().get(name).cloned()
    }

    fn set_ref(&self, name: &str, instance: Rc<dyn std::any::Any>) {
        self.refs.lock().insert(name.to_string(), instance);
    }

    fn remove_ref(&self, name: &str) {
        self.refs.lock().remove(name);
    }

    fn request_recompile(&self, reason: String) {
        *self.recompile_requested.lock() = true;
        self.recompile_reasons.lock().push(reason);
    }

    fn reset_recompile_request(&self) {
        *self.recompile_requested.lock() = false;
        self.recompile_reasons.lock().clear();
    }

    fn was_recompile_requested(&self) -> bool {
        *self.recompile_requested.lock()
    }

    fn recompile_reasons(&self) -> Vec<String> {
        self.recompile_reasons.lock().clone()
    }
}

/// Bundles a [`Compiler`] with its own [`InMemoryCom`] for single-call-site
/// test setup; `com` stays reachable for assertions on state/tools the
/// compile produced as a side effect.
pub struct TestCompiler {
    pub compiler: Compiler,
    pub com: Rc<InMemoryCom>,
}

impl TestCompiler {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let com = InMemoryCom::new();
        let compiler = Compiler::new(com.clone(), config);
        Self { compiler, com }
    }

    /// Drives `notifyTickStart` → `compile` → `notifyTickEnd` once, the way
    /// an embedding engine's tick loop does (spec.md §2 "Control flow per
    /// tick"), returning the collected structure.
    pub fn run_tick(&mut self, element: &Element, tick: &TickState) -> Result<CompiledStructure, CompileError> {
        self.compiler.notify_tick_start(tick);
        let compiled = self.compiler.compile(element, tick)?;
        self.compiler.notify_tick_end(tick)?;
        Ok(compiled)
    }

    /// Runs `n` (`n >= 1`) ticks with fresh, empty tick state, returning the
    /// last compile's structure. For scenarios that need to inspect every
    /// intermediate tick, call [`Self::run_tick`] directly in a loop instead.
    pub fn run_ticks(&mut self, element: &Element, n: u32) -> Result<CompiledStructure, CompileError> {
        assert!(n >= 1, "run_ticks requires at least one tick");
        let mut last = None;
        for _ in 0..n {
            last = Some(self.run_tick(element, &TickState::new())?);
        }
        Ok(last.unwrap())
    }
}

impl Default for TestCompiler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_com_round_trips_state() {
        let com = InMemoryCom::new();
        assert_eq!(com.get_state("k"), None);
        com.set_state("k", Value::from(1));
        assert_eq!(com.get_state("k"), Some(Value::from(1)));
    }

    #[test]
    fn reset_clears_both_flag_and_reasons() {
        let com = InMemoryCom::new();
        com.request_recompile("a".into());
        assert!(com.was_recompile_requested());
        assert_eq!(com.recompile_reasons(), vec!["a".to_string()]);
        com.reset_recompile_request();
        assert!(!com.was_recompile_requested());
        assert!(com.recompile_reasons().is_empty());
    }

    #[test]
    fn test_compiler_builds_with_default_config() {
        let harness = TestCompiler::new();
        assert!(!harness.com.was_recompile_requested());
    }

    #[test]
    fn run_ticks_drives_tick_start_and_tick_end_around_each_compile() {
        use crate::{
            collector::SectionContent,
            element::{ElementType, HostPrimitive, Props, PropsContent},
        };

        let mut harness = TestCompiler::new();
        let element = Element::new(
            ElementType::HostPrimitive(HostPrimitive::Section),
            Props::default().with_field("id", "s").with_content(PropsContent::Text("hi".into())),
            None,
        );
        let structure = harness.run_ticks(&element, 3).unwrap();
        match &structure.sections.get("s").unwrap().content {
            SectionContent::Text(t) => assert_eq!(t, "hi"),
            other => panic!("expected text content, got {:?}", other),
        }
    }
}
