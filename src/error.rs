//! Error taxonomy for the compiler, per the error handling design.
//!
//! Contract violations and component errors abort the current compile and
//! are surfaced here. Lifecycle, effect, and unmount errors are logged and
//! handled in place (see [`crate::lifecycle`] and [`crate::effects`]) and
//! never become a [`CompileError`] unless a lifecycle error has nowhere else
//! to go and must be rethrown.

use crate::fiber::FiberId;
use std::fmt;

/// Tag identifying which hook kind a [`CompileError::HookOrderMismatch`]
/// expected vs. found, kept loose (a string) because hook kinds are defined
/// across `hooks.rs` and component authors benefit from a readable name more
/// than an enum discriminant.
pub type HookTagName = &'static str;

/// Errors that abort the compile in progress.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// A fiber's hooks were called in a different order, or a different
    /// count, than on its previous render. Fatal per spec: the hook list
    /// must have identical shape across renders for a given fiber.
    #[error(
        "fiber {fiber:?} ({debug_name}) rendered hooks out of order at index {index}: expected {expected}, found {found}"
    )]
    HookOrderMismatch {
        fiber: FiberId,
        debug_name: String,
        index: usize,
        expected: HookTagName,
        found: HookTagName,
    },

    /// A fiber rendered more hooks than it did on a previous render.
    #[error("fiber {fiber:?} ({debug_name}) rendered more hooks than on its previous render")]
    TooManyHooks { fiber: FiberId, debug_name: String },

    /// A computed signal's recomputation observed itself being recomputed.
    #[error("computed signal {0:?} read itself during its own recomputation")]
    ComputedCycle(crate::signal::SignalId),

    /// Two elements with colliding host-primitive identity could not be
    /// disambiguated (e.g. a name-based fallback matched two distinct
    /// symbols in the same position).
    #[error("ambiguous primitive identity for element at {0:?}: {1}")]
    AmbiguousPrimitive(FiberId, String),

    /// A function or class component's render raised an error.
    #[error("component {component} raised an error during render: {source}")]
    ComponentRender {
        component: String,
        #[source]
        source: anyhow::Error,
    },

    /// A lifecycle notification (`onTickEnd`, ...) raised an error with no
    /// `onError` handler available to route it to.
    #[error("unrouted lifecycle error in phase {phase:?} from component {component}: {source}")]
    UnroutedLifecycle {
        phase: crate::active::Phase,
        component: String,
        #[source]
        source: anyhow::Error,
    },
}

pub(crate) type Result<T> = std::result::Result<T, CompileError>;
