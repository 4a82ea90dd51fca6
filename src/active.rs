//! The active-compiler context (spec.md §4.9): an async-local handle that
//! lets signal-layer code (and anything else running "inside" a compile)
//! discover the current phase and request a recompile without being handed
//! an explicit reference to the compiler.
//!
//! Grounded directly on the `illicit` crate, which provides exactly this
//! "async-local cell keyed by the current execution chain" shape.
//! `illicit::Layer::new().offer(handle).enter(|| ...)` installs the
//! active compiler for the duration of a closure; `illicit::get::<Handle>()`
//! retrieves it from anywhere nested inside that closure, including across
//! `.await` points as long as the enclosing task doesn't move threads
//! (true for this crate's single-threaded cooperative model, spec.md §5).

use std::{cell::RefCell, rc::Rc};

/// The compiler's current phase, consulted by signal writes to decide
/// whether a recompile should be scheduled (spec.md §4.9 policy table).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Phase {
    Idle,
    Compile,
    Render,
    TickStart,
    TickEnd,
    Complete,
    Unmount,
}

impl Phase {
    /// Implements the §4.9 policy table. `is_rendering` disambiguates the
    /// `render` row ("skip — class-component mount inside render" vs. the
    /// `mount` row "allow" for a post-first-render function-component
    /// mount) since both can be active while `self == Phase::Render`.
    pub fn allows_new_recompile(self, is_rendering: bool) -> bool {
        match self {
            Phase::TickStart | Phase::TickEnd | Phase::Complete | Phase::Unmount => false,
            Phase::Render if is_rendering => false,
            Phase::Render => true, // post-first-render function-component mount
            Phase::Idle | Phase::Compile => true,
        }
    }
}

/// Shared, mutable state reachable from anywhere inside the active
/// compile: the current phase, whether a render is actively in flight, and
/// the accumulated recompile requests for this iteration.
#[derive(Default)]
struct Inner {
    phase: RefCell<Phase>,
    rendering: RefCell<bool>,
    recompile_requested: RefCell<bool>,
    recompile_reasons: RefCell<Vec<String>>,
}

impl Default for Phase {
    fn default() -> Self {
        Phase::Idle
    }
}

/// The handle installed into the `illicit` environment for the duration of
/// one [`crate::compiler::Compiler::compile`] call. Cheap to clone (an
/// `Rc`), so it can be captured by hook closures that outlive a single
/// `.await`.
#[derive(Clone)]
pub struct ActiveCompiler {
    inner: Rc<Inner>,
}

impl ActiveCompiler {
    pub fn new() -> Self {
        Self { inner: Rc::new(Inner::default()) }
    }

    pub fn set_phase(&self, phase: Phase) {
        *self.inner.phase.borrow_mut() = phase;
    }

    pub fn phase(&self) -> Phase {
        *self.inner.phase.borrow()
    }

    pub fn set_rendering(&self, rendering: bool) {
        *self.inner.rendering.borrow_mut() = rendering;
    }

    pub fn is_rendering(&self) -> bool {
        *self.inner.rendering.borrow()
    }

    pub fn is_in_tick_start(&self) -> bool {
        self.phase() == Phase::TickStart
    }

    pub fn is_in_tick_end(&self) -> bool {
        self.phase() == Phase::TickEnd
    }

    /// Returns `true` when a COM-bound signal write or explicit recompile
    /// request occurring right now would be silently dropped rather than
    /// scheduling another iteration.
    pub fn should_skip_recompile(&self) -> bool {
        !self.phase().allows_new_recompile(self.is_rendering())
    }

    /// Requests a recompile with a human-readable reason, subject to the
    /// phase gate. Returns whether the request was accepted.
    pub fn request_recompile(&self, reason: impl Into<String>) -> bool {
        if self.should_skip_recompile() {
            tracing::debug!(phase = ?self.phase(), "recompile request skipped by phase gate");
            return false;
        }
        *self.inner.recompile_requested.borrow_mut() = true;
        self.inner.recompile_reasons.borrow_mut().push(reason.into());
        true
    }

    pub fn was_recompile_requested(&self) -> bool {
        *self.inner.recompile_requested.borrow()
    }

    pub fn reset_recompile_request(&self) {
        *self.inner.recompile_requested.borrow_mut() = false;
    }

    /// Drains (takes, clearing) the accumulated recompile reasons.
    pub fn take_recompile_reasons(&self) -> Vec<String> {
        std::mem::take(&mut *self.inner.recompile_reasons.borrow_mut())
    }
}

impl Default for ActiveCompiler {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs `compiler` as the active one for the duration of `body`, via
/// `illicit::Layer::new().offer(handle).enter(op)`.
pub fn enter<R>(compiler: ActiveCompiler, body: impl FnOnce() -> R) -> R {
    illicit::Layer::new().offer(compiler).enter(body)
}

/// Retrieves the currently active compiler, if any execution has installed
/// one around the calling code. Returns `None` (rather than panicking) so
/// signal code can be used safely outside a compile, e.g. in unit tests.
pub fn current() -> Option<ActiveCompiler> {
    illicit::get::<ActiveCompiler>().map(|r| (*r).clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_policy_matches_table() {
        assert!(!Phase::TickStart.allows_new_recompile(false));
        assert!(!Phase::TickEnd.allows_new_recompile(false));
        assert!(!Phase::Complete.allows_new_recompile(false));
        assert!(!Phase::Unmount.allows_new_recompile(false));
        assert!(!Phase::Render.allows_new_recompile(true));
        assert!(Phase::Render.allows_new_recompile(false));
        assert!(Phase::Idle.allows_new_recompile(false));
        assert!(Phase::Compile.allows_new_recompile(false));
    }

    #[test]
    fn recompile_requests_are_gated_by_phase() {
        let compiler = ActiveCompiler::new();
        compiler.set_phase(Phase::TickStart);
        assert!(!compiler.request_recompile("should be skipped"));
        assert!(!compiler.was_recompile_requested());

        compiler.set_phase(Phase::Idle);
        assert!(compiler.request_recompile("accepted"));
        assert!(compiler.was_recompile_requested());
        assert_eq!(compiler.take_recompile_reasons(), vec!["accepted".to_string()]);
        assert!(compiler.take_recompile_reasons().is_empty());
    }

    #[test]
    fn current_is_none_outside_a_compile() {
        assert!(current().is_none());
    }

    #[test]
    fn current_is_some_inside_enter() {
        let compiler = ActiveCompiler::new();
        compiler.set_phase(Phase::Render);
        enter(compiler.clone(), || {
            let found = current().expect("active compiler");
            assert_eq!(found.phase(), Phase::Render);
        });
        assert!(current().is_none());
    }
}
