//! The hook state machine (spec.md §4.3): a per-fiber linked list of hook
//! cells, and the render context function components consult while they
//! run.
//!
//! Grounded on two sources: the *shape* of the per-fiber cell chain follows
//! the Design Notes ("acceptable as a linked list... mount-vs-update
//! discipline... index equality instead of pointer traversal" — we use a
//! slotmap-backed list rather than raw pointers for the same reason
//! `fiber.rs` uses an arena for fibers), and the hook *surface* (`use_state`,
//! `use_effect`, `use_memo`, `use_ref`, `use_reducer`, `use_callback`)
//! mirrors `flui_core::hooks`'s adapter-function naming.

use crate::{
    active,
    com::SubscriptionToken,
    error::{CompileError, HookTagName, Result},
    fiber::FiberId,
    signal::{ComSignal, Computed, Signal, Watch},
};
use slotmap::{new_key_type, SlotMap};
use std::{any::Any, rc::Rc};

new_key_type! {
    /// A handle into the hook-cell arena, replacing a raw linked-list
    /// pointer the way `FiberId` replaces a raw fiber pointer.
    pub struct HookCellId;
}

/// Discriminates the kind of state carried by a hook cell (spec.md §3
/// "Hook cell").
#[derive(Clone, Copy)]
pub enum HookTag {
    State,
    Reducer,
    Signal,
    ComState,
    Watch,
    Effect,
    TickStart,
    TickEnd,
    AfterCompile,
    OnMessage,
    Mount,
    Unmount,
    Init,
    Memo,
    Callback,
    Computed,
    Ref,
}

impl HookTag {
    pub fn name(&self) -> HookTagName {
        match self {
            HookTag::State => "State",
            HookTag::Reducer => "Reducer",
            HookTag::Signal => "Signal",
            HookTag::ComState => "ComState",
            HookTag::Watch => "Watch",
            HookTag::Effect => "Effect",
            HookTag::TickStart => "TickStart",
            HookTag::TickEnd => "TickEnd",
            HookTag::AfterCompile => "AfterCompile",
            HookTag::OnMessage => "OnMessage",
            HookTag::Mount => "Mount",
            HookTag::Unmount => "Unmount",
            HookTag::Init => "Init",
            HookTag::Memo => "Memo",
            HookTag::Callback => "Callback",
            HookTag::Computed => "Computed",
            HookTag::Ref => "Ref",
        }
    }
}

/// A pending effect registration, drained by the effect scheduler
/// (spec.md §3 "Effect descriptor", §4.5).
pub struct EffectCell {
    pub phase: crate::effects::EffectPhase,
    pub create: Box<dyn FnOnce() -> crate::effects::EffectCreateFuture>,
    pub destroy: Option<crate::effects::EffectDestroy>,
    pub deps: Option<Vec<DepKey>>,
    pub pending: bool,
    pub debug_label: &'static str,
}

/// A comparable snapshot of one dependency slot. Signals are unwrapped to
/// their current value before comparison (spec.md §4.3 "Dependency
/// comparison unwraps signals by reading their current value").
#[derive(Clone, PartialEq)]
pub enum DepKey {
    I64(i64),
    F64Bits(u64),
    Bool(bool),
    Str(String),
    SignalVersion(crate::signal::SignalId, u64),
    Opaque(usize),
}

/// One element of the fiber's hook linked list (spec.md §3 "Hook cell").
pub struct HookCell {
    pub tag: HookTag,
    pub memoized_state: Box<dyn Any>,
    pub base_state: Option<Box<dyn Any>>,
    pub queue: Option<Vec<Box<dyn Any>>>,
    pub effect: Option<EffectCell>,
    pub next: Option<HookCellId>,
}

/// Per-fiber arena of hook cells plus the head pointer stored back on the
/// fiber (spec.md: `fiber.memoizedState` is the head of the list).
#[derive(Default)]
pub struct HookList {
    cells: SlotMap<HookCellId, HookCell>,
    pub head: Option<HookCellId>,
}

impl HookList {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, cell: HookCell) -> HookCellId {
        self.cells.insert(cell)
    }

    pub fn get(&self, id: HookCellId) -> Option<&HookCell> {
        self.cells.get(id)
    }

    pub fn get_mut(&mut self, id: HookCellId) -> Option<&mut HookCell> {
        self.cells.get_mut(id)
    }

    pub fn iter_ids(&self) -> Vec<HookCellId> {
        let mut out = Vec::new();
        let mut cur = self.head;
        while let Some(id) = cur {
            out.push(id);
            cur = self.cells.get(id).and_then(|c| c.next);
        }
        out
    }

    /// Writes an effect's freshly produced `destroy` back onto its cell so
    /// the next run (or unmount) can find it (spec.md §4.5 "rebind `destroy`
    /// from the prior run"). A no-op if the cell or its effect slot is gone,
    /// which can happen if the fiber was deleted before its commit effects
    /// finished draining.
    pub fn set_effect_destroy(&mut self, id: HookCellId, destroy: crate::effects::EffectDestroy) {
        if let Some(effect) = self.cells.get_mut(id).and_then(|c| c.effect.as_mut()) {
            effect.destroy = Some(destroy);
        }
    }
}

/// The render context a function component's hooks consult while running
/// (spec.md §4.3: `{ fiber, com, tickState, currentHook, workInProgressHook
/// }`).
pub struct RenderContext<'a> {
    pub fiber: FiberId,
    pub fiber_debug_name: &'a str,
    pub com: &'a dyn crate::com::Com,
    pub tick: &'a crate::compiler::TickState,
    /// The previous render's list, walked in lockstep on update; `None` on
    /// mount.
    current_list: Option<&'a HookList>,
    current_cursor: Option<HookCellId>,
    new_list: HookList,
    hook_index: usize,
    /// The first order violation encountered, if any; recorded rather than
    /// panicking so rendering can finish and [`RenderContext::finish`] can
    /// surface it as a proper [`CompileError`] (spec.md §4.3, §7 item 1).
    error: Option<CompileError>,
}

impl<'a> RenderContext<'a> {
    pub(crate) fn new(
        fiber: FiberId,
        fiber_debug_name: &'a str,
        com: &'a dyn crate::com::Com,
        tick: &'a crate::compiler::TickState,
        current_list: Option<&'a HookList>,
    ) -> Self {
        let current_cursor = current_list.and_then(|l| l.head);
        Self {
            fiber,
            fiber_debug_name,
            com,
            tick,
            current_list,
            current_cursor,
            new_list: HookList::new(),
            hook_index: 0,
            error: None,
        }
    }

    /// Advances to the next cell of the previous render's list, if any,
    /// verifying the tag matches (spec.md §4.3 "violating order raises a
    /// fatal ... error"). Returns `None` both on a genuine mount (no
    /// previous list) and after recording a `TooManyHooks`/order-mismatch
    /// error, so callers can fall back to initializing a fresh cell without
    /// panicking mid-render.
    fn advance_previous(&mut self, expected: HookTag) -> Option<HookCellId> {
        let current_list = self.current_list?;
        let id = match self.current_cursor {
            Some(id) => id,
            None => {
                if self.error.is_none() {
                    self.error = Some(CompileError::TooManyHooks {
                        fiber: self.fiber,
                        debug_name: self.fiber_debug_name.to_string(),
                    });
                }
                return None;
            }
        };
        let prev = current_list.get(id).expect("hook cell vanished mid-render");
        self.current_cursor = prev.next;
        if self.error.is_none() && prev.tag.name() != expected.name() {
            self.error = Some(CompileError::HookOrderMismatch {
                fiber: self.fiber,
                debug_name: self.fiber_debug_name.to_string(),
                index: self.hook_index,
                expected: expected.name(),
                found: prev.tag.name(),
            });
        }
        Some(id)
    }

    fn append(&mut self, cell: HookCell) -> HookCellId {
        let id = self.new_list.push(cell);
        if let Some(last) = self.last_id() {
            self.new_list.get_mut(last).unwrap().next = Some(id);
        } else {
            self.new_list.head = Some(id);
        }
        self.hook_index += 1;
        id
    }

    fn last_id(&self) -> Option<HookCellId> {
        let mut cur = self.new_list.head;
        let mut last = None;
        while let Some(id) = cur {
            last = Some(id);
            cur = self.new_list.get(id).unwrap().next;
        }
        last
    }

    /// Finalizes this render's hook list, checking that an update consumed
    /// every cell the previous render had (spec.md §4.3: mismatched count is
    /// a fatal error).
    pub(crate) fn finish(self) -> Result<HookList> {
        if let Some(err) = self.error {
            return Err(err);
        }
        if let Some(current_list) = self.current_list {
            if let Some(remaining) = self.current_cursor {
                let found = current_list.get(remaining).unwrap().tag.name();
                return Err(CompileError::HookOrderMismatch {
                    fiber: self.fiber,
                    debug_name: self.fiber_debug_name.to_string(),
                    index: self.hook_index,
                    expected: "<end of render>",
                    found,
                });
            }
        }
        Ok(self.new_list)
    }

    /// `useState`/`useReducer` (spec.md §4.3 "State/Reducer"). The cell is
    /// stored as an `Rc<RefCell<T>>` carried forward by identity across
    /// renders, the same trick [`Self::use_ref`] uses, so the returned
    /// [`StateHandle`] stays dispatchable after this render has finished —
    /// spec.md §4.3 has `dispatch` "eagerly compute the next value" outside
    /// a batched render, which means it can't depend on a `RenderContext`
    /// still being alive.
    pub fn use_state<T: Clone + PartialEq + 'static>(&mut self, initial: impl FnOnce() -> T) -> (T, StateHandle<T>) {
        let cell = if let Some(prev_id) = self.advance_previous(HookTag::State) {
            let prev_cell = self.current_list.unwrap().get(prev_id).unwrap();
            let cell = prev_cell
                .memoized_state
                .downcast_ref::<Rc<std::cell::RefCell<T>>>()
                .cloned()
                .expect("hook type mismatch");
            self.append(HookCell {
                tag: HookTag::State,
                memoized_state: Box::new(cell.clone()),
                base_state: None,
                queue: None,
                effect: None,
                next: None,
            });
            cell
        } else {
            let cell = Rc::new(std::cell::RefCell::new(initial()));
            self.append(HookCell {
                tag: HookTag::State,
                memoized_state: Box::new(cell.clone()),
                base_state: None,
                queue: None,
                effect: None,
                next: None,
            });
            cell
        };
        let value = cell.borrow().clone();
        (value, StateHandle { cell })
    }

    /// `useSignal` (spec.md §4.3 "Signal (function-component)"): a signal
    /// whose writes additionally request a recompile subject to the phase
    /// gate (§4.9), handled by [`crate::signal::Signal::set`] itself since
    /// it already consults [`active::current`].
    pub fn use_signal<T: Clone + PartialEq + 'static>(&mut self, initial: impl FnOnce() -> T) -> Signal<T> {
        if let Some(prev_id) = self.advance_previous(HookTag::Signal) {
            let prev_cell = self.current_list.unwrap().get(prev_id).unwrap();
            let signal = prev_cell.memoized_state.downcast_ref::<Signal<T>>().cloned().expect("hook type mismatch");
            self.append(HookCell {
                tag: HookTag::Signal,
                memoized_state: Box::new(signal.clone()),
                base_state: None,
                queue: None,
                effect: None,
                next: None,
            });
            signal
        } else {
            let signal = Signal::new(initial());
            self.append(HookCell {
                tag: HookTag::Signal,
                memoized_state: Box::new(signal.clone()),
                base_state: None,
                queue: None,
                effect: None,
                next: None,
            });
            signal
        }
    }

    /// `useRef`: a mutable `{ current }` cell allocated once on mount
    /// (spec.md §4.3 "Ref").
    pub fn use_ref<T: 'static>(&mut self, initial: impl FnOnce() -> T) -> HookCellId {
        if let Some(prev_id) = self.advance_previous(HookTag::Ref) {
            // The cell is moved forward by identity; its `Any` box is not
            // re-created, so existing mutations made through the previous
            // render's handle are preserved.
            let moved = self.current_list.unwrap().get(prev_id).unwrap();
            let placeholder: Box<dyn Any> = Box::new(());
            let _ = placeholder;
            // Refs are intentionally stored in `memoized_state` as a
            // `Rc<RefCell<T>>` so both renders' handles alias the same cell;
            // see RefCell wrapper constructed below on mount only.
            let value = moved
                .memoized_state
                .downcast_ref::<std::rc::Rc<std::cell::RefCell<T>>>()
                .cloned()
                .expect("hook type mismatch");
            self.append(HookCell {
                tag: HookTag::Ref,
                memoized_state: Box::new(value),
                base_state: None,
                queue: None,
                effect: None,
                next: None,
            })
        } else {
            let cell = std::rc::Rc::new(std::cell::RefCell::new(initial()));
            self.append(HookCell {
                tag: HookTag::Ref,
                memoized_state: Box::new(cell),
                base_state: None,
                queue: None,
                effect: None,
                next: None,
            })
        }
    }

    pub fn ref_value<T: 'static>(&self, id: HookCellId) -> std::rc::Rc<std::cell::RefCell<T>> {
        self.new_list.get(id).unwrap().memoized_state.downcast_ref::<std::rc::Rc<std::cell::RefCell<T>>>().cloned().unwrap()
    }

    /// `useMemo`/`useCallback` (spec.md §4.3 "Memo / Callback"): cache
    /// `[value, deps]`; recompute on deps change.
    pub fn use_memo<T: Clone + 'static>(&mut self, deps: Vec<DepKey>, compute: impl FnOnce() -> T) -> T {
        if let Some(prev_id) = self.advance_previous(HookTag::Memo) {
            let prev_cell = self.current_list.unwrap().get(prev_id).unwrap();
            let prev_deps = prev_cell.base_state.as_ref().and_then(|d| d.downcast_ref::<Vec<DepKey>>());
            let unchanged = prev_deps.map(|d| deps_equal(d, &deps)).unwrap_or(false);
            let value = if unchanged {
                prev_cell.memoized_state.downcast_ref::<T>().cloned().expect("hook type mismatch")
            } else {
                compute()
            };
            self.append(HookCell {
                tag: HookTag::Memo,
                memoized_state: Box::new(value.clone()),
                base_state: Some(Box::new(deps)),
                queue: None,
                effect: None,
                next: None,
            });
            value
        } else {
            let value = compute();
            self.append(HookCell {
                tag: HookTag::Memo,
                memoized_state: Box::new(value.clone()),
                base_state: Some(Box::new(deps)),
                queue: None,
                effect: None,
                next: None,
            });
            value
        }
    }

    /// `useEffect` (spec.md §4.3 "Effect"): records `{ phase: Commit, create,
    /// deps }`; marks pending when deps changed, rebinding `destroy` from
    /// the prior run.
    pub fn use_effect(
        &mut self,
        phase: crate::effects::EffectPhase,
        deps: Option<Vec<DepKey>>,
        debug_label: &'static str,
        create: impl FnOnce() -> crate::effects::EffectCreateFuture + 'static,
    ) {
        let always_pending = !matches!(phase, crate::effects::EffectPhase::Commit);
        let (destroy, pending) = if let Some(prev_id) = self.advance_previous(HookTag::Effect) {
            let prev_cell = self.current_list.unwrap().get(prev_id).unwrap();
            let prev_effect = prev_cell.effect.as_ref().expect("effect cell missing");
            let changed = match (&prev_effect.deps, &deps) {
                (Some(prev_deps), Some(new_deps)) => !deps_equal(prev_deps, new_deps),
                _ => true,
            };
            (prev_effect.destroy.clone(), always_pending || changed)
        } else {
            (None, true)
        };
        self.append(HookCell {
            tag: match phase {
                crate::effects::EffectPhase::Commit => HookTag::Effect,
                crate::effects::EffectPhase::TickStart => HookTag::TickStart,
                crate::effects::EffectPhase::TickEnd => HookTag::TickEnd,
                crate::effects::EffectPhase::AfterCompile => HookTag::AfterCompile,
                crate::effects::EffectPhase::OnMessage => HookTag::OnMessage,
                crate::effects::EffectPhase::Mount => HookTag::Mount,
                crate::effects::EffectPhase::Unmount => HookTag::Unmount,
            },
            memoized_state: Box::new(()),
            base_state: None,
            queue: None,
            effect: Some(EffectCell {
                phase,
                create: Box::new(create),
                destroy,
                deps,
                pending,
                debug_label,
            }),
            next: None,
        });
    }

    /// `useOnMount`: a commit-phase effect with empty deps, running exactly
    /// once (spec.md §4.3 "Mount").
    pub fn use_on_mount(&mut self, create: impl FnOnce() -> crate::effects::EffectCreateFuture + 'static) {
        self.use_effect(crate::effects::EffectPhase::Mount, Some(Vec::new()), "useOnMount", create);
    }

    /// `useInit` (spec.md §4.3 "Init"): a once-per-lifetime hook that awaits
    /// an async initializer during render. On mount the initializer runs and
    /// its result is cached; every later render returns the cached value
    /// without re-running it.
    pub async fn use_init<T, Fut>(&mut self, init: impl FnOnce() -> Fut) -> T
    where
        T: Clone + 'static,
        Fut: std::future::Future<Output = T>,
    {
        if let Some(prev_id) = self.advance_previous(HookTag::Init) {
            let prev_cell = self.current_list.unwrap().get(prev_id).unwrap();
            let value = prev_cell.memoized_state.downcast_ref::<T>().cloned().expect("hook type mismatch");
            self.append(HookCell {
                tag: HookTag::Init,
                memoized_state: Box::new(value.clone()),
                base_state: None,
                queue: None,
                effect: None,
                next: None,
            });
            value
        } else {
            let value = init().await;
            self.append(HookCell {
                tag: HookTag::Init,
                memoized_state: Box::new(value.clone()),
                base_state: None,
                queue: None,
                effect: None,
                next: None,
            });
            value
        }
    }

    /// `useCallback` (spec.md §4.3 "Memo / Callback"): caches a callback
    /// value keyed by `deps`, distinct from [`Self::use_memo`] only in its
    /// hook tag so order-mismatch detection can tell the two apart.
    pub fn use_callback<T: Clone + 'static>(&mut self, deps: Vec<DepKey>, make: impl FnOnce() -> T) -> T {
        if let Some(prev_id) = self.advance_previous(HookTag::Callback) {
            let prev_cell = self.current_list.unwrap().get(prev_id).unwrap();
            let prev_deps = prev_cell.base_state.as_ref().and_then(|d| d.downcast_ref::<Vec<DepKey>>());
            let unchanged = prev_deps.map(|d| deps_equal(d, &deps)).unwrap_or(false);
            let value = if unchanged {
                prev_cell.memoized_state.downcast_ref::<T>().cloned().expect("hook type mismatch")
            } else {
                make()
            };
            self.append(HookCell {
                tag: HookTag::Callback,
                memoized_state: Box::new(value.clone()),
                base_state: Some(Box::new(deps)),
                queue: None,
                effect: None,
                next: None,
            });
            value
        } else {
            let value = make();
            self.append(HookCell {
                tag: HookTag::Callback,
                memoized_state: Box::new(value.clone()),
                base_state: Some(Box::new(deps)),
                queue: None,
                effect: None,
                next: None,
            });
            value
        }
    }

    /// `useReducer` (spec.md §4.3 "State/Reducer"): like [`Self::use_state`]
    /// but next-value derivation runs through a supplied reducer rather than
    /// a free-form updater. Cell and reducer are both cached on the returned
    /// [`ReducerHandle`] directly (same `Rc<RefCell<T>>`-by-identity carry
    /// forward as [`Self::use_state`]) so `dispatch` needs nothing beyond the
    /// handle itself.
    pub fn use_reducer<T: Clone + PartialEq + 'static, A: 'static>(
        &mut self,
        reducer: impl Fn(&T, A) -> T + 'static,
        initial: impl FnOnce() -> T,
    ) -> (T, ReducerHandle<T, A>) {
        let reducer: Rc<dyn Fn(&T, A) -> T> = Rc::new(reducer);
        let cell = if let Some(prev_id) = self.advance_previous(HookTag::Reducer) {
            let prev_cell = self.current_list.unwrap().get(prev_id).unwrap();
            let cell = prev_cell
                .memoized_state
                .downcast_ref::<Rc<std::cell::RefCell<T>>>()
                .cloned()
                .expect("hook type mismatch");
            self.append(HookCell {
                tag: HookTag::Reducer,
                memoized_state: Box::new(cell.clone()),
                base_state: Some(Box::new(reducer.clone())),
                queue: None,
                effect: None,
                next: None,
            });
            cell
        } else {
            let cell = Rc::new(std::cell::RefCell::new(initial()));
            self.append(HookCell {
                tag: HookTag::Reducer,
                memoized_state: Box::new(cell.clone()),
                base_state: Some(Box::new(reducer.clone())),
                queue: None,
                effect: None,
                next: None,
            });
            cell
        };
        let value = cell.borrow().clone();
        (value, ReducerHandle { cell, reducer })
    }

    /// `useComputed` (spec.md §4.3 "Computed (function-component)"): like
    /// [`Self::use_memo`] but returns a reactive [`Computed`] signal rather
    /// than a plain value; when `deps` change, the previous `Computed` is
    /// replaced (its subscriptions drop along with it) rather than mutated
    /// in place.
    pub fn use_computed<T: Clone + PartialEq + 'static>(
        &mut self,
        deps: Vec<DepKey>,
        compute: impl Fn() -> std::result::Result<T, CompileError> + 'static,
    ) -> Computed<T> {
        if let Some(prev_id) = self.advance_previous(HookTag::Computed) {
            let prev_cell = self.current_list.unwrap().get(prev_id).unwrap();
            let prev_deps = prev_cell.base_state.as_ref().and_then(|d| d.downcast_ref::<Vec<DepKey>>());
            let unchanged = prev_deps.map(|d| deps_equal(d, &deps)).unwrap_or(false);
            let computed = if unchanged {
                prev_cell.memoized_state.downcast_ref::<Computed<T>>().cloned().expect("hook type mismatch")
            } else {
                Computed::new(compute)
            };
            self.append(HookCell {
                tag: HookTag::Computed,
                memoized_state: Box::new(computed.clone()),
                base_state: Some(Box::new(deps)),
                queue: None,
                effect: None,
                next: None,
            });
            computed
        } else {
            let computed = Computed::new(compute);
            self.append(HookCell {
                tag: HookTag::Computed,
                memoized_state: Box::new(computed.clone()),
                base_state: Some(Box::new(deps)),
                queue: None,
                effect: None,
                next: None,
            });
            computed
        }
    }

    /// `useComState` (spec.md §4.3 "ComState / Watch"): binds this cell to a
    /// COM key for the fiber's lifetime. Mount subscribes to COM change
    /// notifications for `key` and stashes the [`SubscriptionToken`] in
    /// `base_state`; [`dispose_com_bindings`] reads it back at unmount.
    pub fn use_com_state(&mut self, key: impl Into<String>) -> ComSignal {
        let key = key.into();
        if let Some(prev_id) = self.advance_previous(HookTag::ComState) {
            self.carry_com_binding(prev_id, HookTag::ComState);
            ComSignal::new(key)
        } else {
            let token = self.subscribe_com_binding(&key);
            self.append(HookCell {
                tag: HookTag::ComState,
                memoized_state: Box::new(()),
                base_state: Some(Box::new(token)),
                queue: None,
                effect: None,
                next: None,
            });
            ComSignal::new(key)
        }
    }

    /// `useWatch`: the read-only counterpart of [`Self::use_com_state`]
    /// (spec.md §4.3 "ComState / Watch").
    pub fn use_watch(&mut self, key: impl Into<String>) -> Watch {
        let key = key.into();
        if let Some(prev_id) = self.advance_previous(HookTag::Watch) {
            self.carry_com_binding(prev_id, HookTag::Watch);
            Watch::new(key)
        } else {
            let token = self.subscribe_com_binding(&key);
            self.append(HookCell {
                tag: HookTag::Watch,
                memoized_state: Box::new(()),
                base_state: Some(Box::new(token)),
                queue: None,
                effect: None,
                next: None,
            });
            Watch::new(key)
        }
    }

    /// Carries a previous render's COM subscription token forward onto the
    /// new cell unchanged; the binding lives for the fiber's whole life, not
    /// just one render.
    fn carry_com_binding(&mut self, prev_id: HookCellId, tag: HookTag) {
        let prev_cell = self.current_list.unwrap().get(prev_id).unwrap();
        let token = prev_cell.base_state.as_ref().and_then(|b| b.downcast_ref::<SubscriptionToken>()).copied();
        self.append(HookCell {
            tag,
            memoized_state: Box::new(()),
            base_state: token.map(|t| Box::new(t) as Box<dyn Any>),
            queue: None,
            effect: None,
            next: None,
        });
    }

    /// Subscribes to COM state-change notifications for `key`, requesting a
    /// recompile (subject to the active-compiler phase gate, spec.md §4.9)
    /// whenever that key changes.
    fn subscribe_com_binding(&self, key: &str) -> SubscriptionToken {
        let fiber = self.fiber;
        let watched_key = key.to_string();
        self.com.on_state_changed(Rc::new(move |changed_key, _value| {
            if changed_key == watched_key {
                if let Some(active) = active::current() {
                    active.request_recompile(format!("com state {changed_key:?} changed (fiber {fiber:?})"));
                }
            }
        }))
    }

    /// Drains every hook cell in this render's new list whose effect is
    /// pending, handing its phase/label/create-thunk/previous-destroy to
    /// `f` and clearing `pending` so a later call (there isn't one, but
    /// [`finish`](Self::finish) still reads the cell) doesn't redeliver it.
    /// Called by the reconciler once per render, before `finish()` (spec.md
    /// §4.5 "Effects are bucketed by phase into queues at the end of each
    /// render phase").
    pub fn for_each_pending_effect(
        &mut self,
        mut f: impl FnMut(
            HookCellId,
            crate::effects::EffectPhase,
            &'static str,
            Box<dyn FnOnce() -> crate::effects::EffectCreateFuture>,
            Option<crate::effects::EffectDestroy>,
        ),
    ) {
        for id in self.new_list.iter_ids() {
            let cell = self.new_list.get_mut(id).unwrap();
            let Some(effect) = &mut cell.effect else { continue };
            if !effect.pending {
                continue;
            }
            effect.pending = false;
            let create = std::mem::replace(&mut effect.create, Box::new(|| Box::pin(async { None })));
            let destroy = effect.destroy.clone();
            f(id, effect.phase, effect.debug_label, create, destroy);
        }
    }
}

fn deps_equal(a: &[DepKey], b: &[DepKey]) -> bool {
    // "length changes across renders warn in development and still compare
    // prefix-wise" (spec.md §4.3).
    if a.len() != b.len() {
        tracing::warn!(old_len = a.len(), new_len = b.len(), "hook dependency array length changed across renders");
    }
    a.iter().zip(b.iter()).all(|(x, y)| x == y)
}

/// Opaque handle returned by [`RenderContext::use_state`]. Wraps the same
/// `Rc<RefCell<T>>` carried on the hook cell itself, so `dispatch` can write
/// straight through it without needing the `HookList` (or even the fiber)
/// it came from back in scope.
pub struct StateHandle<T> {
    cell: Rc<std::cell::RefCell<T>>,
}

impl<T> Clone for StateHandle<T> {
    fn clone(&self) -> Self {
        Self { cell: self.cell.clone() }
    }
}

impl<T: Clone + PartialEq + 'static> StateHandle<T> {
    /// Reads the current value without going through a render.
    pub fn get(&self) -> T {
        self.cell.borrow().clone()
    }

    /// `dispatch(action)` (spec.md §4.3 "State/Reducer"): recomputes the
    /// next value eagerly and bails out without scheduling a recompile if
    /// unchanged.
    pub fn dispatch(&self, next: impl FnOnce(&T) -> T) {
        let mut current = self.cell.borrow_mut();
        let new_value = next(&current);
        if new_value == *current {
            return;
        }
        *current = new_value;
        drop(current);
        if let Some(active) = active::current() {
            active.request_recompile("state hook dispatched".to_string());
        }
    }
}

/// Opaque handle returned by [`RenderContext::use_reducer`].
pub struct ReducerHandle<T, A> {
    cell: Rc<std::cell::RefCell<T>>,
    reducer: Rc<dyn Fn(&T, A) -> T>,
}

impl<T, A> Clone for ReducerHandle<T, A> {
    fn clone(&self) -> Self {
        Self { cell: self.cell.clone(), reducer: self.reducer.clone() }
    }
}

impl<T: Clone + PartialEq + 'static, A: 'static> ReducerHandle<T, A> {
    /// Reads the current value without going through a render.
    pub fn get(&self) -> T {
        self.cell.borrow().clone()
    }

    /// Applies `action` through the cached reducer; bails out without
    /// scheduling a recompile if the result is unchanged, matching
    /// [`StateHandle::dispatch`]'s bail-out rule.
    pub fn dispatch(&self, action: A) {
        let mut current = self.cell.borrow_mut();
        let new_value = (self.reducer)(&current, action);
        if new_value == *current {
            return;
        }
        *current = new_value;
        drop(current);
        if let Some(active) = active::current() {
            active.request_recompile("reducer hook dispatched".to_string());
        }
    }
}

/// Unsubscribes every `ComState`/`Watch` binding still held by `hooks`,
/// called once during fiber unmount (spec.md §3 "Lifecycles": "its hook
/// cells' effect cleanups are invoked... its `ref` is released" — COM
/// bindings are the analogous cleanup for these two hook kinds).
pub fn dispose_com_bindings(hooks: &HookList, com: &dyn crate::com::Com) {
    for id in hooks.iter_ids() {
        let cell = hooks.get(id).unwrap();
        if !matches!(cell.tag, HookTag::ComState | HookTag::Watch) {
            continue;
        }
        if let Some(token) = cell.base_state.as_ref().and_then(|b| b.downcast_ref::<SubscriptionToken>()) {
            com.off_state_changed(*token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dep_key_equality_detects_changes() {
        let a = vec![DepKey::I64(1), DepKey::Str("x".into())];
        let b = vec![DepKey::I64(1), DepKey::Str("x".into())];
        let c = vec![DepKey::I64(2), DepKey::Str("x".into())];
        assert!(deps_equal(&a, &b));
        assert!(!deps_equal(&a, &c));
    }

    #[test]
    fn dep_key_length_change_still_compares_prefix() {
        let a = vec![DepKey::I64(1)];
        let b = vec![DepKey::I64(1), DepKey::I64(2)];
        // Prefix matches for the shorter length, `zip` stops at the shorter
        // side, so this reports "equal" on the shared prefix per spec.
        assert!(deps_equal(&a, &b));
    }

    #[test]
    fn state_handle_dispatches_without_a_hook_list() {
        let handle = StateHandle { cell: Rc::new(std::cell::RefCell::new(1i32)) };
        assert_eq!(handle.get(), 1);
        handle.dispatch(|n| n + 1);
        assert_eq!(handle.get(), 2);
    }

    #[test]
    fn state_handle_dispatch_bails_out_when_unchanged() {
        let handle = StateHandle { cell: Rc::new(std::cell::RefCell::new(5i32)) };
        handle.dispatch(|n| *n);
        assert_eq!(handle.get(), 5);
    }

    #[test]
    fn reducer_handle_dispatches_through_the_cached_reducer() {
        let handle = ReducerHandle {
            cell: Rc::new(std::cell::RefCell::new(0i32)),
            reducer: Rc::new(|n: &i32, delta: i32| n + delta),
        };
        handle.dispatch(3);
        handle.dispatch(4);
        assert_eq!(handle.get(), 7);
    }

    #[test]
    fn cloned_state_handle_shares_the_same_cell() {
        let handle = StateHandle { cell: Rc::new(std::cell::RefCell::new(0i32)) };
        let other = handle.clone();
        handle.dispatch(|n| n + 1);
        assert_eq!(other.get(), 1);
    }
}
