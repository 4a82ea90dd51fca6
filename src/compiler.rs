//! The compiler itself (spec.md §2, §6): owns the double-buffered fiber
//! arena, the active-compiler context, the effect queues, and the
//! middleware/content-mapper registries, and exposes the engine-facing API
//! (`compile`, the `notify*` family, `unmount`).
//!
//! A struct that owns one root's worth of reconciliation state across
//! repeated compile calls, installing the active environment for the
//! duration of each one, and drives each `compile` with a single
//! `futures::executor::block_on` call made
//! *inside* the synchronous closure `active::enter` installs the active
//! compiler around — the whole render-to-commit pass for one execution is
//! cooperative and single-threaded (spec.md §5), so nothing ever suspends
//! past that boundary.

use crate::{
    active::{self, ActiveCompiler, Phase},
    collector::{self, CompiledStructure},
    com::Com,
    config::Config,
    content::ContentMapperRegistry,
    element::Element,
    error::CompileError,
    fiber::{Arena, FiberId},
    lifecycle::{self, AfterCompileCtx, MiddlewareRegistry, RecoveryAction},
    message::InboundMessage,
    reconciler::{self, FiberIdOrElement},
};
use serde_json::Value;
use std::{rc::Rc, sync::Arc};

/// Opaque, engine-supplied tick context (spec.md §6: `compile(element,
/// tickState)` takes "opaque tick state"). This crate never interprets
/// `data`; the one exception is [`TickState::with_error`], which synthesizes
/// the `{ error, phase, recoverable }` overlay spec.md §4.6 describes for
/// routing a `tickEnd` failure through a component's `onError`.
#[derive(Clone, Debug, Default)]
pub struct TickState {
    /// Engine-defined payload. Opaque to the compiler core.
    pub data: Value,
    /// Present only on a tick state synthesized by a lifecycle error route.
    pub error: Option<Arc<TickError>>,
}

/// The `{ error, phase, recoverable }` shape a synthesized error tick state
/// carries (spec.md §4.6).
#[derive(Debug)]
pub struct TickError {
    pub message: String,
    pub phase: String,
    pub recoverable: bool,
}

impl TickState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(data: Value) -> Self {
        Self { data, error: None }
    }

    /// Synthesizes a copy of this tick state carrying an error overlay,
    /// keeping the original's `data` (spec.md §4.6: "a synthesized tick
    /// state carrying `{ error, phase: 'tick_end', recoverable: true }`").
    pub fn with_error(&self, err: anyhow::Error, phase: &str, recoverable: bool) -> TickState {
        TickState {
            data: self.data.clone(),
            error: Some(Arc::new(TickError { message: err.to_string(), phase: phase.to_string(), recoverable })),
        }
    }
}

/// A one-off callback queued for the next successful compile (spec.md §4.8
/// step 4: "Invoke every queued after-compile callback with `compiled`").
/// Distinct from a component's `onAfterCompile`/AfterCompile hook: this is
/// an engine-facing queue, not part of the component contract.
pub type AfterCompileCallback = Box<dyn FnOnce(&CompiledStructure)>;

/// Owns one execution's worth of compiler state: the double-buffered fiber
/// tree, its effect queues, and the registries an embedding engine installs
/// once up front (spec.md §2 "Core components").
pub struct Compiler {
    com: Rc<dyn Com>,
    config: Config,
    content_mappers: ContentMapperRegistry,
    middleware: MiddlewareRegistry,
    arena: Arena,
    root: Option<FiberId>,
    queues: crate::effects::EffectQueues,
    active: ActiveCompiler,
    after_compile_callbacks: Vec<AfterCompileCallback>,
    start_notified: bool,
}

impl Compiler {
    pub fn new(com: Rc<dyn Com>, config: Config) -> Self {
        Self {
            com,
            config,
            content_mappers: ContentMapperRegistry::new(),
            middleware: MiddlewareRegistry::new(),
            arena: Arena::new(),
            root: None,
            queues: crate::effects::EffectQueues::new(),
            active: ActiveCompiler::new(),
            after_compile_callbacks: Vec::new(),
            start_notified: false,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn content_mappers_mut(&mut self) -> &mut ContentMapperRegistry {
        &mut self.content_mappers
    }

    /// Registers an observability hook invoked on every lifecycle-method
    /// call (spec.md §4.6 "Wrapping enables observability").
    pub fn register_middleware(&mut self, hook: crate::lifecycle::LifecycleHook) {
        self.middleware.register(hook);
    }

    /// Queues a one-off callback for the next successful `compile` (spec.md
    /// §4.8 step 4).
    pub fn queue_after_compile(&mut self, callback: impl FnOnce(&CompiledStructure) + 'static) {
        self.after_compile_callbacks.push(Box::new(callback));
    }

    /// `compile(element, tickState)` (spec.md §6): a single reconcile +
    /// commit + collect pass.
    ///
    /// On a contract violation or component error, the compile is aborted,
    /// the phase is reset, and the error is rethrown without touching
    /// `self.root` — the in-progress alternate stays cached in the arena for
    /// the next attempt to reuse, matching spec.md §7 rule 1/2 ("discard
    /// WIP" is a no-op here since the WIP buffer is never promoted to
    /// `self.root` until it succeeds).
    pub fn compile(&mut self, element: &Element, tick: &TickState) -> Result<CompiledStructure, CompileError> {
        self.active.set_phase(Phase::Compile);

        let active = self.active.clone();
        let com = Rc::clone(&self.com);
        let arena = &mut self.arena;
        let queues = &mut self.queues;
        let current = match self.root {
            Some(id) => FiberIdOrElement::Id(id),
            None => FiberIdOrElement::None,
        };

        let reconciled = active::enter(active.clone(), || {
            futures::executor::block_on(async {
                active.set_phase(Phase::Render);
                active.set_rendering(true);
                let result = reconciler::reconcile_root(arena, current, element, &*com, tick, queues).await;
                active.set_rendering(false);
                result
            })
        });

        let new_root = match reconciled {
            Ok(id) => id,
            Err(err) => {
                self.active.set_phase(Phase::Idle);
                return Err(err);
            }
        };
        self.root = Some(new_root);

        let active = self.active.clone();
        active::enter(active, || futures::executor::block_on(self.commit(new_root)));

        // Recompile requests accumulated on the active-compiler context
        // during this compile (signal writes, `ComSignal::set` with no
        // external COM fallback needed) surface through the same COM
        // bookkeeping the engine already drains between compiles (spec.md
        // §4.8: "Recompile requests originate from COM-state writes,
        // component actions, and the active-compiler context").
        for reason in self.active.take_recompile_reasons() {
            self.com.request_recompile(reason);
        }

        self.active.set_phase(Phase::Idle);
        Ok(collector::collect(&self.arena, new_root, &self.config, &self.content_mappers))
    }

    /// `commitWork` (spec.md §4.5): processes subtree deletions depth-first,
    /// then drains Mount and Commit effects and writes their `destroy`
    /// closures back onto the owning hook cells.
    async fn commit(&mut self, root: FiberId) -> Result<(), CompileError> {
        let mut ids = Vec::new();
        self.arena.walk_pre_order(root, |id| ids.push(id));
        for id in ids {
            let deletions = match self.arena.get_mut(id) {
                Some(fiber) => std::mem::take(&mut fiber.deletions),
                None => continue,
            };
            for deleted in deletions {
                lifecycle::unmount_subtree(&mut self.arena, deleted, &*self.com).await;
                let mut dead = Vec::new();
                self.arena.walk_post_order(deleted, |id| dead.push(id));
                for dead_id in dead {
                    self.arena.remove(dead_id);
                }
            }
        }

        let destroys = self.queues.drain_commit().await;
        for (fiber, cell, destroy) in destroys {
            if let Some(f) = self.arena.get_mut(fiber) {
                f.hooks.set_effect_destroy(cell, destroy);
            }
        }
        Ok(())
    }

    /// `notifyStart()` (spec.md §6): once per execution, regardless of how
    /// many times `compile` has run since.
    pub fn notify_start(&mut self) {
        if self.start_notified {
            return;
        }
        self.start_notified = true;
        let Some(root) = self.root else { return };
        let active = self.active.clone();
        active::enter(active, || {
            futures::executor::block_on(lifecycle::notify_start(&mut self.arena, root, &self.middleware))
        });
    }

    pub fn notify_tick_start(&mut self, tick: &TickState) {
        let Some(root) = self.root else { return };
        let active = self.active.clone();
        let com = Rc::clone(&self.com);
        active::enter(active, || {
            futures::executor::block_on(lifecycle::notify_tick_start(
                &mut self.arena,
                root,
                &*com,
                tick,
                &mut self.queues,
                &self.middleware,
            ))
        });
    }

    /// May route a failure through the owning component's `onError`; if
    /// unrouted, propagates per spec.md §7 rule 3.
    pub fn notify_tick_end(&mut self, tick: &TickState) -> Result<(), CompileError> {
        let Some(root) = self.root else { return Ok(()) };
        let active = self.active.clone();
        let com = Rc::clone(&self.com);
        active::enter(active, || {
            futures::executor::block_on(lifecycle::notify_tick_end(
                &mut self.arena,
                root,
                &*com,
                tick,
                &mut self.queues,
                &self.middleware,
            ))
        })
    }

    pub fn notify_on_message(&mut self, msg: &InboundMessage, tick: &TickState) {
        let Some(root) = self.root else { return };
        let active = self.active.clone();
        let com = Rc::clone(&self.com);
        active::enter(active, || {
            futures::executor::block_on(lifecycle::notify_on_message(
                &mut self.arena,
                root,
                msg,
                tick,
                &*com,
                &mut self.queues,
                &self.middleware,
            ))
        });
    }

    /// Invokes every queued after-compile callback, then `notifyAfterCompile`
    /// (spec.md §4.8 step 4), clearing the callback queue either way.
    pub fn notify_after_compile(&mut self, compiled: &CompiledStructure, ctx: AfterCompileCtx) {
        let Some(root) = self.root else {
            self.after_compile_callbacks.clear();
            return;
        };
        for callback in self.after_compile_callbacks.drain(..) {
            callback(compiled);
        }
        let active = self.active.clone();
        active::enter(active, || {
            futures::executor::block_on(lifecycle::notify_after_compile(
                &mut self.arena,
                root,
                compiled,
                ctx,
                &mut self.queues,
                &self.middleware,
            ))
        });

        // An AfterCompile hook or `onAfterCompile` is exactly where spec.md
        // §8's stabilization scenario requests the next iteration from; fold
        // it into the same COM-facing bookkeeping `compile` uses so
        // `compileUntilStable`'s `was_recompile_requested`/
        // `take_recompile_reasons` see it without waiting for another
        // `compile` call.
        for reason in self.active.take_recompile_reasons() {
            self.com.request_recompile(reason);
        }
    }

    pub fn notify_complete(&mut self, tick: &TickState) {
        let Some(root) = self.root else { return };
        let active = self.active.clone();
        active::enter(active, || {
            futures::executor::block_on(lifecycle::notify_complete(&mut self.arena, root, tick, &self.middleware))
        });
    }

    pub fn notify_error(&mut self, tick: &TickState) -> Option<RecoveryAction> {
        let root = self.root?;
        let active = self.active.clone();
        active::enter(active, || {
            futures::executor::block_on(lifecycle::notify_error(&mut self.arena, root, tick, &self.middleware))
        })
    }

    /// `unmount()` (spec.md §6): terminal. Tears down the whole tree,
    /// depth-first, and clears the root so a further `compile` starts fresh.
    pub fn unmount(&mut self) {
        let Some(root) = self.root.take() else { return };
        self.active.set_phase(Phase::Unmount);
        let com = Rc::clone(&self.com);
        let active = self.active.clone();
        active::enter(active, || {
            futures::executor::block_on(lifecycle::unmount_subtree(&mut self.arena, root, &*com))
        });
        self.active.set_phase(Phase::Idle);
    }

    /// Whether a recompile has been requested since the last reset
    /// (spec.md §4.8's COM-sourced recompile flag; see [`Compiler::compile`]
    /// for how active-compiler-internal requests end up here too).
    pub fn was_recompile_requested(&self) -> bool {
        self.com.was_recompile_requested()
    }

    pub fn reset_recompile_request(&self) {
        self.com.reset_recompile_request()
    }

    pub fn take_recompile_reasons(&self) -> Vec<String> {
        let reasons = self.com.recompile_reasons();
        self.com.reset_recompile_request();
        reasons
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        element::{ElementType, Props},
        testing::InMemoryCom,
    };

    fn section(id: &str, content: &str) -> Element {
        Element::new(
            ElementType::HostPrimitive(crate::element::HostPrimitive::Section),
            Props::default().with_field("id", id).with_content(crate::element::PropsContent::Text(content.into())),
            None,
        )
    }

    #[test]
    fn compile_collects_a_simple_section() {
        let com = InMemoryCom::new();
        let mut compiler = Compiler::new(com, Config::default());
        let structure = compiler.compile(&section("s", "hello"), &TickState::new()).unwrap();
        match &structure.sections.get("s").unwrap().content {
            crate::collector::SectionContent::Text(t) => assert_eq!(t, "hello"),
            other => panic!("expected text content, got {:?}", other),
        }
    }

    #[test]
    fn repeated_compiles_flip_between_cross_linked_alternates() {
        let com = InMemoryCom::new();
        let mut compiler = Compiler::new(com, Config::default());
        compiler.compile(&section("s", "one"), &TickState::new()).unwrap();
        let first_root = compiler.root.unwrap();
        compiler.compile(&section("s", "two"), &TickState::new()).unwrap();
        let second_root = compiler.root.unwrap();

        // The root pointer legitimately flips to the other buffer every
        // compile; what must hold is that the two are each other's alternate.
        assert_ne!(second_root, first_root);
        assert_eq!(compiler.arena.get(first_root).unwrap().alternate, Some(second_root));
        assert_eq!(compiler.arena.get(second_root).unwrap().alternate, Some(first_root));

        compiler.compile(&section("s", "three"), &TickState::new()).unwrap();
        assert_eq!(compiler.root.unwrap(), first_root, "third compile flips back to the first buffer");
    }

    #[test]
    fn unmount_clears_the_root() {
        let com = InMemoryCom::new();
        let mut compiler = Compiler::new(com, Config::default());
        compiler.compile(&section("s", "hello"), &TickState::new()).unwrap();
        assert!(compiler.root.is_some());
        compiler.unmount();
        assert!(compiler.root.is_none());
    }
}
