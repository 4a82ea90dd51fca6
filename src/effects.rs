//! The effect scheduler (spec.md §3 "Effect descriptor", §4.5): phase-
//! bucketed queues and the `commitWork` drain.
//!
//! Effect bodies are boxed `LocalBoxFuture`s — a single-threaded,
//! `!Send`-friendly future object, matching this crate's cooperative
//! scheduling model (spec.md §5).

use crate::{fiber::FiberId, hooks::HookCellId};
use futures::{future::LocalBoxFuture, FutureExt};
use std::rc::Rc;

/// The closed set of effect phases (spec.md §3 "Effect descriptor").
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum EffectPhase {
    Mount,
    Commit,
    TickStart,
    AfterCompile,
    TickEnd,
    Unmount,
    OnMessage,
}

/// The future an effect's `create` produces, optionally yielding its own
/// `destroy` closure (spec.md: "a returned function... becomes the new
/// `destroy`").
pub type EffectCreateFuture = LocalBoxFuture<'static, Option<EffectDestroy>>;

/// An effect's cleanup, `Rc`-wrapped so a hook cell's previous run can hand
/// its `destroy` forward to the next one without re-running `create`
/// (spec.md §4.3 "rebind `destroy` from the prior run").
pub type EffectDestroy = Rc<dyn Fn() -> LocalBoxFuture<'static, ()>>;

/// One queued effect invocation, detached from its originating hook cell so
/// the scheduler can drain a phase's queue without holding a borrow across
/// `.await` points.
pub struct QueuedEffect {
    pub fiber: FiberId,
    /// Identifies exactly which hook cell on `fiber` this effect came from,
    /// so a produced `destroy` writes back onto the right cell rather than
    /// onto "some effect on this fiber" when a fiber owns more than one.
    pub cell: HookCellId,
    pub phase: EffectPhase,
    pub debug_label: &'static str,
    pub create: LocalBoxFuture<'static, Option<EffectDestroy>>,
    pub previous_destroy: Option<EffectDestroy>,
}

/// Phase-bucketed queues built up during one render pass (spec.md §4.5
/// "Effects are bucketed by phase into queues at the end of each render
/// phase").
#[derive(Default)]
pub struct EffectQueues {
    mount: Vec<QueuedEffect>,
    commit: Vec<QueuedEffect>,
    tick_start: Vec<QueuedEffect>,
    tick_end: Vec<QueuedEffect>,
    after_compile: Vec<QueuedEffect>,
    on_message: Vec<QueuedEffect>,
}

impl EffectQueues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, effect: QueuedEffect) {
        match effect.phase {
            EffectPhase::Mount => self.mount.push(effect),
            EffectPhase::Commit => self.commit.push(effect),
            EffectPhase::TickStart => self.tick_start.push(effect),
            EffectPhase::TickEnd => self.tick_end.push(effect),
            EffectPhase::AfterCompile => self.after_compile.push(effect),
            EffectPhase::OnMessage => self.on_message.push(effect),
            EffectPhase::Unmount => {
                // Unmount effects run inline during fiber teardown
                // (spec.md §4.5), not via this queue; callers should not
                // push them here, but accept it defensively rather than
                // dropping work silently.
                self.commit.push(effect);
            }
        }
    }

    pub fn drain_tick_start(&mut self) -> Vec<QueuedEffect> {
        std::mem::take(&mut self.tick_start)
    }

    pub fn drain_tick_end(&mut self) -> Vec<QueuedEffect> {
        std::mem::take(&mut self.tick_end)
    }

    pub fn drain_after_compile(&mut self) -> Vec<QueuedEffect> {
        std::mem::take(&mut self.after_compile)
    }

    pub fn drain_on_message(&mut self) -> Vec<QueuedEffect> {
        std::mem::take(&mut self.on_message)
    }

    /// `commitWork` (spec.md §4.5): drains Mount then Commit effects, in
    /// that order, returning the new `destroy` each produced so the caller
    /// can write it back onto the owning hook cell.
    pub async fn drain_commit(&mut self) -> Vec<(FiberId, HookCellId, EffectDestroy)> {
        let mount = std::mem::take(&mut self.mount);
        let commit = std::mem::take(&mut self.commit);
        run_phase(mount.into_iter().chain(commit).collect()).await
    }
}

/// Runs a drained phase's effects in queue order, awaiting each one's prior
/// `destroy` first, and collects the `destroy` closures produced so the
/// caller can write them back onto their owning hook cells.
pub async fn run_phase(items: Vec<QueuedEffect>) -> Vec<(FiberId, HookCellId, EffectDestroy)> {
    let mut results = Vec::new();
    for effect in items {
        run_one(effect, &mut results).await;
    }
    results
}

async fn run_one(effect: QueuedEffect, results: &mut Vec<(FiberId, HookCellId, EffectDestroy)>) {
    if let Some(previous) = &effect.previous_destroy {
        // "Each effect awaits any previous `destroy` before running
        // `create`" (spec.md §4.5).
        previous().await;
    }
    match std::panic::AssertUnwindSafe(effect.create).catch_unwind().await {
        Ok(Some(destroy)) => results.push((effect.fiber, effect.cell, destroy)),
        Ok(None) => {}
        Err(_) => {
            tracing::error!(
                fiber = ?effect.fiber,
                phase = ?effect.phase,
                label = effect.debug_label,
                "effect body panicked; isolated, remaining effects proceed"
            );
        }
    }
}

/// Runs a fallible effect body, logging and isolating a returned error
/// rather than propagating it (spec.md §4.5 "Errors are caught per-effect,
/// logged with phase and label, and do not abort remaining effects in the
/// same pass").
pub async fn run_fallible(
    fiber: FiberId,
    phase: EffectPhase,
    debug_label: &'static str,
    body: impl std::future::Future<Output = Result<(), anyhow::Error>>,
) {
    if let Err(err) = body.await {
        tracing::error!(?fiber, ?phase, label = debug_label, error = %err, "effect failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queues_route_by_phase() {
        let mut queues = EffectQueues::new();
        let fiber = crate::fiber::Arena::new().create_fiber(&crate::element::Element::new(
            crate::element::ElementType::Host("x".into()),
            crate::element::Props::default(),
            None,
        ));
        queues.push(QueuedEffect {
            fiber,
            cell: HookCellId::default(),
            phase: EffectPhase::TickStart,
            debug_label: "t",
            create: Box::pin(async { None }),
            previous_destroy: None,
        });
        assert_eq!(queues.drain_tick_start().len(), 1);
        assert_eq!(queues.drain_tick_start().len(), 0);
    }
}
