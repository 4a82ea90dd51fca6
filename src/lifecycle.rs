//! Class-component lifecycle dispatch and traversal-based notifications
//! (spec.md §4.6).
//!
//! Every `notify_*` function here collects the fiber ids to visit with a
//! synchronous [`crate::fiber::Arena::walk_pre_order`]/`walk_post_order` call
//! first, then iterates the collected `Vec<FiberId>` with `.await` points —
//! the same split `reconciler::begin_work` uses to let an async body run
//! between two borrows of the same `&mut Arena` that can't both be alive at
//! once.

use crate::{
    active::{self, Phase},
    collector::CompiledStructure,
    com::Com,
    compiler::TickState,
    effects::EffectQueues,
    error::{CompileError, Result},
    fiber::{Arena, FiberId, StateNode},
    hooks,
    message::InboundMessage,
};
use futures::FutureExt;
use std::rc::Rc;

/// `{ continue, ... }` returned by a component's `onError` to request the
/// execution proceed despite the error (spec.md §4.6, §7: "Recovery is a
/// component opt-in").
#[derive(Clone, Debug, Default)]
pub struct RecoveryAction {
    pub continue_: bool,
    pub reason: Option<String>,
}

/// Iteration context handed to `onAfterCompile` (spec.md §4.6
/// `notifyAfterCompile`, §4.8 `compileUntilStable`).
#[derive(Clone, Copy, Debug)]
pub struct AfterCompileCtx {
    pub iteration: u32,
    pub max_iterations: u32,
}

/// An observer of lifecycle-method invocations, keyed by method name and the
/// invoking component's debug name. Wrapping here is purely observational —
/// it never changes call semantics (spec.md §4.6: "Wrapping enables
/// observability and must preserve call semantics"). Spec.md additionally
/// keys this registry by component class/tag set; this crate only threads
/// the method name and debug name through, since identity-based keying is
/// already available to a registered hook via its own closure capture.
pub type LifecycleHook = Rc<dyn Fn(&'static str, &str)>;

#[derive(Default, Clone)]
pub struct MiddlewareRegistry {
    hooks: Vec<LifecycleHook>,
}

impl MiddlewareRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: LifecycleHook) {
        self.hooks.push(hook);
    }

    fn notify(&self, method: &'static str, debug_name: &str) {
        for hook in &self.hooks {
            hook(method, debug_name);
        }
    }
}

fn collect_ids(arena: &Arena, root: FiberId) -> Vec<FiberId> {
    let mut ids = Vec::new();
    arena.walk_pre_order(root, |id| ids.push(id));
    ids
}

fn debug_name_of(arena: &Arena, id: FiberId) -> String {
    arena.get(id).map(|f| f.debug_name.clone()).unwrap_or_default()
}

/// Writes back the `destroy` closures a drained effect phase produced onto
/// their owning hook cells, mirroring `reconciler::begin_work`'s own
/// destroy-write-back for the Commit phase (spec.md §4.5).
async fn run_and_writeback(arena: &mut Arena, items: Vec<crate::effects::QueuedEffect>) {
    let results = crate::effects::run_phase(items).await;
    for (fiber, cell, destroy) in results {
        if let Some(f) = arena.get_mut(fiber) {
            f.hooks.set_effect_destroy(cell, destroy);
        }
    }
}

/// `notifyStart` (spec.md §4.6): calls `onStart` where present, once per
/// execution.
pub async fn notify_start(arena: &mut Arena, root: FiberId, middleware: &MiddlewareRegistry) {
    for id in collect_ids(arena, root) {
        let debug_name = debug_name_of(arena, id);
        middleware.notify("onStart", &debug_name);
        match &mut arena.get_mut(id).unwrap().state_node {
            StateNode::Class(instance) => instance.on_start().await,
            StateNode::Instance(instance) => {
                let instance = instance.clone();
                instance.borrow_mut().on_start().await;
            }
            StateNode::None => {}
        }
    }
}

/// `notifyTickStart(state)` (spec.md §4.6): sets phase `tickStart`, runs
/// TickStart effects, calls `onTickStart` (errors logged, not thrown), then
/// re-registers tools from the fiber tree (§4.8.1).
pub async fn notify_tick_start(
    arena: &mut Arena,
    root: FiberId,
    com: &dyn Com,
    tick: &TickState,
    queues: &mut EffectQueues,
    middleware: &MiddlewareRegistry,
) {
    if let Some(active) = active::current() {
        active.set_phase(Phase::TickStart);
    }
    run_and_writeback(arena, queues.drain_tick_start()).await;

    for id in collect_ids(arena, root) {
        let debug_name = debug_name_of(arena, id);
        middleware.notify("onTickStart", &debug_name);
        let result = match &mut arena.get_mut(id).unwrap().state_node {
            StateNode::Class(instance) => instance.on_tick_start(com, tick).await,
            StateNode::Instance(instance) => {
                let instance = instance.clone();
                instance.borrow_mut().on_tick_start(com, tick).await
            }
            StateNode::None => Ok(()),
        };
        if let Err(err) = result {
            tracing::error!(fiber = ?id, component = %debug_name, error = %err, "onTickStart failed");
        }
    }

    reregister_tools(arena, root, com);
}

/// `notifyTickEnd(state)` (spec.md §4.6): sets phase `tickEnd`, runs TickEnd
/// effects, calls `onTickEnd`; on a thrown error, routes it through the
/// failing fiber's own `onError` if it declares one, otherwise rethrows.
pub async fn notify_tick_end(
    arena: &mut Arena,
    root: FiberId,
    com: &dyn Com,
    tick: &TickState,
    queues: &mut EffectQueues,
    middleware: &MiddlewareRegistry,
) -> Result<()> {
    if let Some(active) = active::current() {
        active.set_phase(Phase::TickEnd);
    }
    run_and_writeback(arena, queues.drain_tick_end()).await;

    for id in collect_ids(arena, root) {
        let debug_name = debug_name_of(arena, id);
        middleware.notify("onTickEnd", &debug_name);
        let result = match &mut arena.get_mut(id).unwrap().state_node {
            StateNode::Class(instance) => instance.on_tick_end(com, tick).await,
            StateNode::Instance(instance) => {
                let instance = instance.clone();
                instance.borrow_mut().on_tick_end(com, tick).await
            }
            StateNode::None => Ok(()),
        };
        if let Err(err) = result {
            handle_tick_end_error(arena, id, &debug_name, tick, err).await?;
        }
    }
    Ok(())
}

async fn handle_tick_end_error(
    arena: &mut Arena,
    id: FiberId,
    debug_name: &str,
    tick: &TickState,
    err: anyhow::Error,
) -> Result<()> {
    let has_on_error = match &arena.get(id).unwrap().state_node {
        StateNode::Class(instance) => instance.has_on_error(),
        StateNode::Instance(instance) => instance.borrow().has_on_error(),
        StateNode::None => false,
    };
    if !has_on_error {
        return Err(CompileError::UnroutedLifecycle {
            phase: Phase::TickEnd,
            component: debug_name.to_string(),
            source: err,
        });
    }

    let message = err.to_string();
    let synthesized = tick.with_error(err, "tick_end", true);
    let recovery = match &mut arena.get_mut(id).unwrap().state_node {
        StateNode::Class(instance) => instance.on_error(&synthesized).await,
        StateNode::Instance(instance) => {
            let instance = instance.clone();
            instance.borrow_mut().on_error(&synthesized).await
        }
        StateNode::None => None,
    };

    match recovery {
        Some(action) if action.continue_ => {
            tracing::warn!(
                fiber = ?id,
                component = debug_name,
                reason = ?action.reason,
                "onTickEnd error recovered by onError"
            );
            Ok(())
        }
        _ => Err(CompileError::UnroutedLifecycle {
            phase: Phase::TickEnd,
            component: debug_name.to_string(),
            source: anyhow::anyhow!(message),
        }),
    }
}

/// `notifyOnMessage(msg, state)` (spec.md §4.6): traverses the tree,
/// invoking each `onMessage` and each OnMessage hook effect; errors are
/// logged per-handler, never propagated.
pub async fn notify_on_message(
    arena: &mut Arena,
    root: FiberId,
    msg: &InboundMessage,
    tick: &TickState,
    com: &dyn Com,
    queues: &mut EffectQueues,
    middleware: &MiddlewareRegistry,
) {
    for id in collect_ids(arena, root) {
        let debug_name = debug_name_of(arena, id);
        middleware.notify("onMessage", &debug_name);
        let result = match &mut arena.get_mut(id).unwrap().state_node {
            StateNode::Class(instance) => instance.on_message(com, msg, tick).await,
            StateNode::Instance(instance) => {
                let instance = instance.clone();
                instance.borrow_mut().on_message(com, msg, tick).await
            }
            StateNode::None => Ok(()),
        };
        if let Err(err) = result {
            tracing::error!(fiber = ?id, component = %debug_name, error = %err, "onMessage failed");
        }
    }

    run_and_writeback(arena, queues.drain_on_message()).await;
}

/// `notifyAfterCompile(compiled, state, ctx)` (spec.md §4.6): calls
/// `onAfterCompile` and each AfterCompile hook with the freshly compiled
/// structure and the stabilization iteration context.
pub async fn notify_after_compile(
    arena: &mut Arena,
    root: FiberId,
    compiled: &CompiledStructure,
    ctx: AfterCompileCtx,
    queues: &mut EffectQueues,
    middleware: &MiddlewareRegistry,
) {
    for id in collect_ids(arena, root) {
        let debug_name = debug_name_of(arena, id);
        middleware.notify("onAfterCompile", &debug_name);
        let result = match &mut arena.get_mut(id).unwrap().state_node {
            StateNode::Class(instance) => instance.on_after_compile(compiled, ctx).await,
            StateNode::Instance(instance) => {
                let instance = instance.clone();
                instance.borrow_mut().on_after_compile(compiled, ctx).await
            }
            StateNode::None => Ok(()),
        };
        if let Err(err) = result {
            tracing::error!(fiber = ?id, component = %debug_name, error = %err, "onAfterCompile failed");
        }
    }

    run_and_writeback(arena, queues.drain_after_compile()).await;
}

/// `notifyComplete(finalState)` (spec.md §4.6): sets phase `complete`, calls
/// `onComplete` where present.
pub async fn notify_complete(arena: &mut Arena, root: FiberId, tick: &TickState, middleware: &MiddlewareRegistry) {
    if let Some(active) = active::current() {
        active.set_phase(Phase::Complete);
    }
    for id in collect_ids(arena, root) {
        let debug_name = debug_name_of(arena, id);
        middleware.notify("onComplete", &debug_name);
        match &mut arena.get_mut(id).unwrap().state_node {
            StateNode::Class(instance) => instance.on_complete(tick).await,
            StateNode::Instance(instance) => {
                let instance = instance.clone();
                instance.borrow_mut().on_complete(tick).await;
            }
            StateNode::None => {}
        }
    }
}

/// `notifyError(state)` (spec.md §4.6): calls each `onError`, returning the
/// first returned [`RecoveryAction`] with `continue_: true`, else `None`.
pub async fn notify_error(
    arena: &mut Arena,
    root: FiberId,
    tick: &TickState,
    middleware: &MiddlewareRegistry,
) -> Option<RecoveryAction> {
    for id in collect_ids(arena, root) {
        let debug_name = debug_name_of(arena, id);
        middleware.notify("onError", &debug_name);
        let recovery = match &mut arena.get_mut(id).unwrap().state_node {
            StateNode::Class(instance) => instance.on_error(tick).await,
            StateNode::Instance(instance) => {
                let instance = instance.clone();
                instance.borrow_mut().on_error(tick).await
            }
            StateNode::None => None,
        };
        if let Some(action) = recovery {
            if action.continue_ {
                return Some(action);
            }
        }
    }
    None
}

/// Tears down one fiber: runs any Commit/Mount effect's stored `destroy`,
/// fires Unmount-phase effect bodies (these run only here, never bucketed
/// into [`EffectQueues`] — spec.md §4.5 "Unmount effects run during fiber
/// unmount"), disposes its COM bindings, then calls `onUnmount` (spec.md §3
/// "Lifecycles").
async fn unmount_fiber(arena: &mut Arena, id: FiberId, com: &dyn Com) {
    let debug_name = debug_name_of(arena, id);
    tracing::debug!(fiber = ?id, component = %debug_name, "unmounting fiber");

    let hook_ids = arena.get(id).map(|f| f.hooks.iter_ids()).unwrap_or_default();
    for hook_id in hook_ids {
        let (destroy, unmount_create) = {
            let fiber = arena.get_mut(id).unwrap();
            let cell = fiber.hooks.get_mut(hook_id).unwrap();
            let destroy = cell.effect.as_ref().and_then(|e| e.destroy.clone());
            let unmount_create = cell.effect.as_mut().and_then(|e| {
                matches!(e.phase, crate::effects::EffectPhase::Unmount)
                    .then(|| std::mem::replace(&mut e.create, Box::new(|| Box::pin(async { None }))))
            });
            (destroy, unmount_create)
        };
        if let Some(destroy) = destroy {
            destroy().await;
        }
        if let Some(create) = unmount_create {
            if std::panic::AssertUnwindSafe(create()).catch_unwind().await.is_err() {
                tracing::error!(fiber = ?id, component = %debug_name, "unmount effect panicked");
            }
        }
    }

    if let Some(fiber) = arena.get(id) {
        hooks::dispose_com_bindings(&fiber.hooks, com);
    }

    match &mut arena.get_mut(id).unwrap().state_node {
        StateNode::Class(instance) => instance.on_unmount().await,
        StateNode::Instance(instance) => {
            let instance = instance.clone();
            instance.borrow_mut().on_unmount().await;
        }
        StateNode::None => {}
    }
}

/// Tears down `root` and its whole subtree, depth-first (children before
/// parent), matching spec.md §4.5's unmount ordering. Used both for the
/// top-level `unmount()` engine call and for fibers moved to
/// `parent.deletions` during reconciliation.
pub async fn unmount_subtree(arena: &mut Arena, root: FiberId, com: &dyn Com) {
    let mut ids = Vec::new();
    arena.walk_post_order(root, |id| ids.push(id));
    for id in ids {
        unmount_fiber(arena, id, com).await;
    }
}

/// Tool re-registration (spec.md §4.8.1): after tick-start notifications,
/// traverse the tree and attempt, for every class-instance fiber, the three
/// tool patterns in order — (a)/(b) the class's static tool (already
/// resolved once at registration by [`crate::component::AnyClassComponent::static_tool`]),
/// and (c) the instance's own `tool()` property — registering each match
/// with the COM tool registry, overwriting by name.
pub fn reregister_tools(arena: &Arena, root: FiberId, com: &dyn Com) {
    for id in collect_ids(arena, root) {
        let Some(fiber) = arena.get(id) else { continue };
        if let crate::element::ElementType::Class(class) = &fiber.element_type {
            if let Some(tool) = class.static_tool() {
                com.add_tool(tool);
            }
        }
        let instance_tool = match &fiber.state_node {
            StateNode::Class(instance) => instance.tool(),
            StateNode::Instance(instance) => instance.borrow().tool(),
            StateNode::None => None,
        };
        if let Some(tool) = instance_tool {
            com.add_tool(tool);
        }
    }
}
