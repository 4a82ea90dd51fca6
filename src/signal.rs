//! Reactive signal primitives (spec.md §4.1).
//!
//! `Signal<T>` is a mutex-guarded inner cell plus a cheap-to-clone handle,
//! generalized from callsite identity to an explicit [`SignalId`]. Subscription
//! bookkeeping (registering/removing a callback, the RAII guard that
//! unsubscribes on drop) follows `flui_core::hooks::signal`'s
//! `SubscriptionId`/`Subscription` pattern.

use crate::active;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    fmt,
    rc::Rc,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

/// Identifies a signal for dependency tracking and debugging. Never reused.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct SignalId(u64);

impl SignalId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Handle returned by [`Signal::subscribe`], passed back to
/// [`Signal::unsubscribe`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

type Subscriber = Arc<dyn Fn() + 'static>;

struct Inner<T> {
    id: SignalId,
    value: T,
    subscribers: HashMap<SubscriptionId, Subscriber>,
    disposed: bool,
}

/// A reactive cell (spec.md §4.1). Reads are identity-equal to the original
/// reference semantics (`set` with an equal value is a no-op); writes
/// schedule notification of subscribers through the active batch, or
/// immediately if no batch is open.
pub struct Signal<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T: fmt::Debug> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.inner.lock();
        f.debug_struct("Signal").field("id", &guard.id).field("value", &guard.value).finish()
    }
}

impl<T: Clone> Signal<T> {
    pub fn new(initial: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                id: SignalId::next(),
                value: initial,
                subscribers: HashMap::new(),
                disposed: false,
            })),
        }
    }

    pub fn id(&self) -> SignalId {
        self.inner.lock().id
    }

    /// Reads the current value. Spec.md describes signals as callable /
    /// `.value`-readable; Rust expresses both as a method.
    ///
    /// Reading inside a tracking scope (e.g. a [`Computed`]'s recomputation)
    /// registers this signal as a dependency of that scope (spec.md §4.1
    /// "Reading inside a tracking context registers the current tracker as a
    /// subscriber").
    pub fn get(&self) -> T {
        let (id, value) = {
            let guard = self.inner.lock();
            (guard.id, guard.value.clone())
        };
        let this = self.clone();
        tracking::record(id, Box::new(move |on_dirty| this.subscribe_dyn(on_dirty)));
        value
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let id = self.inner.lock().id;
        let this = self.clone();
        tracking::record(id, Box::new(move |on_dirty| this.subscribe_dyn(on_dirty)));
        f(&self.inner.lock().value)
    }

    fn notify(&self) {
        let subscribers: Vec<Subscriber> = self.inner.lock().subscribers.values().cloned().collect();
        batch::run_or_enqueue(subscribers);
        if let Some(active) = active::current() {
            active.request_recompile(format!("signal {:?} changed", self.id()));
        }
    }

    #[must_use = "drop the returned handle to unsubscribe, or store the SubscriptionId for manual unsubscribe()"]
    pub fn subscribe(&self, callback: impl Fn() + 'static) -> SubscriptionId {
        let id = SubscriptionId::next();
        self.inner.lock().subscribers.insert(id, Arc::new(callback));
        id
    }

    /// Type-erased [`Self::subscribe`] used by the dependency tracker: takes
    /// an already-built [`Arc<dyn Fn()>`] rather than a generic closure, and
    /// returns a teardown thunk instead of a raw id.
    fn subscribe_dyn(&self, on_dirty: Arc<dyn Fn()>) -> Box<dyn FnOnce()> {
        let id = self.subscribe(move || (*on_dirty)());
        let this = self.clone();
        Box::new(move || this.unsubscribe(id))
    }

    pub fn subscribe_scoped(&self, callback: impl Fn() + 'static) -> Subscription<T> {
        let id = self.subscribe(callback);
        Subscription { signal: self.clone(), id }
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.lock().subscribers.remove(&id);
    }

    pub fn dispose(&self) {
        let mut guard = self.inner.lock();
        guard.subscribers.clear();
        guard.disposed = true;
    }

    pub fn disposed(&self) -> bool {
        self.inner.lock().disposed
    }
}

impl<T: Clone + PartialEq + 'static> Signal<T> {
    /// Sets a new value. A no-op (no notification, no recompile request) if
    /// `value` equals the current one (spec.md §4.1 "Setting an equal value
    /// is a no-op").
    pub fn set(&self, value: T) {
        let changed = {
            let mut guard = self.inner.lock();
            if guard.value == value {
                false
            } else {
                guard.value = value;
                true
            }
        };
        if changed {
            self.notify();
        }
    }

    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let new_value = f(&self.inner.lock().value);
        self.set(new_value);
    }
}

/// RAII subscription guard; unsubscribes automatically on drop, mirroring
/// the `subscribe_scoped` pattern.
pub struct Subscription<T: Clone + 'static> {
    signal: Signal<T>,
    id: SubscriptionId,
}

impl<T: Clone + 'static> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.signal.unsubscribe(self.id);
    }
}

/// Batching support (spec.md §4.1 "Batching"): notifications raised while a
/// batch is open are coalesced and flushed once, at the outermost block's
/// exit. Thread-local because the compiler is single-threaded cooperative
/// (spec.md §5); there is exactly one batch stack per OS thread, which in
/// this crate means per compiler instance's executor thread.
mod batch {
    use super::Subscriber;
    use std::cell::RefCell;

    thread_local! {
        static DEPTH: RefCell<u32> = RefCell::new(0);
        static PENDING: RefCell<Vec<Subscriber>> = RefCell::new(Vec::new());
    }

    pub fn run_or_enqueue(subscribers: Vec<Subscriber>) {
        let in_batch = DEPTH.with(|d| *d.borrow() > 0);
        if in_batch {
            PENDING.with(|p| p.borrow_mut().extend(subscribers));
        } else {
            for s in subscribers {
                s();
            }
        }
    }

    pub fn enter() {
        DEPTH.with(|d| *d.borrow_mut() += 1);
    }

    /// Returns the pending subscriber list to flush, if this was the
    /// outermost batch exiting.
    pub fn exit() -> Option<Vec<Subscriber>> {
        DEPTH.with(|d| {
            let mut depth = d.borrow_mut();
            *depth -= 1;
            if *depth == 0 {
                Some(PENDING.with(|p| std::mem::take(&mut *p.borrow_mut())))
            } else {
                None
            }
        })
    }
}

/// Dependency tracking support for [`Computed`] (spec.md §4.1 "A computed is
/// a lazy memoized derivation... recomputed on next read"). A [`Computed`]
/// recomputation pushes a tracker frame; every [`Signal::get`]/[`Computed::get`]
/// that runs while a frame is active records a registrar closure instead of
/// subscribing eagerly, so the caller can batch-subscribe once the full
/// dependency set for that recomputation is known.
mod tracking {
    use super::SignalId;
    use std::{cell::RefCell, sync::Arc};

    /// Given the "mark dirty" callback a dependent will notify on change,
    /// subscribes to the recorded signal/computed and returns a teardown
    /// thunk that undoes it.
    pub type Registrar = Box<dyn FnOnce(Arc<dyn Fn()>) -> Box<dyn FnOnce()>>;

    thread_local! {
        static STACK: RefCell<Vec<Vec<(SignalId, Registrar)>>> = RefCell::new(Vec::new());
    }

    pub fn record(id: SignalId, registrar: Registrar) {
        STACK.with(|s| {
            if let Some(frame) = s.borrow_mut().last_mut() {
                frame.push((id, registrar));
            }
        });
    }

    /// Runs `body` with a fresh tracker frame active, returning its result
    /// plus every dependency recorded during it.
    pub fn track<R>(body: impl FnOnce() -> R) -> (R, Vec<(SignalId, Registrar)>) {
        STACK.with(|s| s.borrow_mut().push(Vec::new()));
        let result = body();
        let deps = STACK.with(|s| s.borrow_mut().pop().expect("tracker frame popped out of order"));
        (result, deps)
    }
}

/// Runs `body`, coalescing every signal notification raised inside it (and
/// any nested `batch` calls) into a single flush at the outermost exit
/// (spec.md §4.1 "Batching").
pub fn batch<R>(body: impl FnOnce() -> R) -> R {
    batch::enter();
    let result = body();
    if let Some(pending) = batch::exit() {
        for s in pending {
            s();
        }
    }
    result
}

/// A COM-bound signal (spec.md §4.1 "COM-bound signals"): its authoritative
/// value lives in the external Context Object Model under `key`. Reads
/// return the live COM value; `set` writes through (a no-op if the value
/// would be unchanged) and, unless the active phase forbids it, requests a
/// recompile.
pub struct ComSignal {
    key: String,
}

impl ComSignal {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn get(&self, com: &dyn crate::com::Com) -> Option<serde_json::Value> {
        com.get_state(&self.key)
    }

    pub fn set(&self, com: &dyn crate::com::Com, value: serde_json::Value) {
        if com.get_state(&self.key).as_ref() == Some(&value) {
            return;
        }
        com.set_state(&self.key, value);
        self.request_recompile_if_allowed(com);
    }

    fn request_recompile_if_allowed(&self, com: &dyn crate::com::Com) {
        if let Some(active) = active::current() {
            active.request_recompile(format!("com state {:?} changed", self.key));
        } else {
            com.request_recompile(format!("com state {:?} changed", self.key));
        }
    }
}

/// The read-only variant of [`ComSignal`] (spec.md: "A read-only variant
/// (`watch`) exposes only reads").
pub struct Watch {
    key: String,
}

impl Watch {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    pub fn get(&self, com: &dyn crate::com::Com) -> Option<serde_json::Value> {
        com.get_state(&self.key)
    }
}

struct ComputedInner<T> {
    id: SignalId,
    value: Option<T>,
    dirty: bool,
    computing: bool,
    compute: Rc<dyn Fn() -> std::result::Result<T, crate::error::CompileError>>,
    dep_teardowns: Vec<Box<dyn FnOnce()>>,
    subscribers: HashMap<SubscriptionId, Subscriber>,
}

/// A lazy memoized derivation over other signals/computeds (spec.md §4.1
/// "A computed is a lazy memoized derivation"). Dependencies are discovered
/// automatically: whichever signals/computeds `compute` reads during a
/// recomputation become its dependency set for that recomputation, rebound
/// every time it runs (so a computed that reads different signals on
/// different branches tracks whichever branch it last took).
///
/// Grounded on the same `Arc<Mutex<Inner>>` shape as [`Signal`]; the
/// dependency graph follows a "revalidate or reuse" split — a computed is
/// reused (not recomputed) until something marks it dirty, checked against
/// a staleness revision counter.
pub struct Computed<T> {
    inner: Arc<Mutex<ComputedInner<T>>>,
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T: Clone + PartialEq + 'static> Computed<T> {
    pub fn new(compute: impl Fn() -> std::result::Result<T, crate::error::CompileError> + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ComputedInner {
                id: SignalId::next(),
                value: None,
                dirty: true,
                computing: false,
                compute: Rc::new(compute),
                dep_teardowns: Vec::new(),
                subscribers: HashMap::new(),
            })),
        }
    }

    pub fn id(&self) -> SignalId {
        self.inner.lock().id
    }

    /// Reads the current value, recomputing first if dirty. Registers this
    /// computed as a dependency of the enclosing tracking scope, if any, the
    /// same way [`Signal::get`] does. Fails with
    /// [`crate::error::CompileError::ComputedCycle`] if recomputation
    /// observes itself already in progress (spec.md §4.1 "Circular
    /// self-reads must fail explicitly").
    pub fn get(&self) -> std::result::Result<T, crate::error::CompileError> {
        self.recompute_if_dirty()?;
        let (id, value) = {
            let guard = self.inner.lock();
            (guard.id, guard.value.clone().expect("computed has no cached value after recompute"))
        };
        let this = self.clone();
        tracking::record(id, Box::new(move |on_dirty| this.subscribe_dyn(on_dirty)));
        Ok(value)
    }

    fn recompute_if_dirty(&self) -> std::result::Result<(), crate::error::CompileError> {
        if !self.inner.lock().dirty {
            return Ok(());
        }
        let compute = {
            let mut guard = self.inner.lock();
            if guard.computing {
                return Err(crate::error::CompileError::ComputedCycle(guard.id));
            }
            guard.computing = true;
            guard.compute.clone()
        };

        // Drop the previous recomputation's dependency subscriptions before
        // recording a fresh set; a branch that stops reading some signal
        // must stop being notified by it.
        let old_teardowns = std::mem::take(&mut self.inner.lock().dep_teardowns);
        for teardown in old_teardowns {
            teardown();
        }

        let weak_inner = Arc::downgrade(&self.inner);
        let mark_dirty: Arc<dyn Fn()> = Arc::new(move || {
            let Some(inner) = weak_inner.upgrade() else { return };
            let became_dirty = {
                let mut guard = inner.lock();
                if guard.dirty {
                    false
                } else {
                    guard.dirty = true;
                    true
                }
            };
            if became_dirty {
                let subs: Vec<Subscriber> = inner.lock().subscribers.values().cloned().collect();
                batch::run_or_enqueue(subs);
            }
        });

        let (result, deps) = tracking::track(|| (*compute)());

        let mut guard = self.inner.lock();
        guard.computing = false;
        match result {
            Ok(value) => {
                guard.dep_teardowns = deps.into_iter().map(|(_, registrar)| registrar(mark_dirty.clone())).collect();
                guard.value = Some(value);
                guard.dirty = false;
                Ok(())
            }
            Err(err) => {
                // Leave `dirty` set so the next read retries recomputation
                // rather than silently serving a stale cached value.
                guard.dep_teardowns = deps.into_iter().map(|(_, registrar)| registrar(mark_dirty.clone())).collect();
                Err(err)
            }
        }
    }

    #[must_use = "drop the returned handle to unsubscribe, or store the SubscriptionId for manual unsubscribe()"]
    pub fn subscribe(&self, callback: impl Fn() + 'static) -> SubscriptionId {
        let id = SubscriptionId::next();
        self.inner.lock().subscribers.insert(id, Arc::new(callback));
        id
    }

    fn subscribe_dyn(&self, on_dirty: Arc<dyn Fn()>) -> Box<dyn FnOnce()> {
        let id = self.subscribe(move || (*on_dirty)());
        let this = self.clone();
        Box::new(move || this.unsubscribe(id))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.lock().subscribers.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{cell::RefCell, rc::Rc};

    #[test]
    fn set_equal_value_is_a_no_op() {
        let signal = Signal::new(1);
        let calls = Rc::new(RefCell::new(0));
        let calls_clone = calls.clone();
        signal.subscribe(move || *calls_clone.borrow_mut() += 1);

        signal.set(1);
        assert_eq!(*calls.borrow(), 0);

        signal.set(2);
        assert_eq!(*calls.borrow(), 1);
    }

    #[test]
    fn batch_coalesces_multiple_writes_into_one_flush() {
        let signal = Signal::new(0);
        let calls = Rc::new(RefCell::new(0));
        let calls_clone = calls.clone();
        signal.subscribe(move || *calls_clone.borrow_mut() += 1);

        batch(|| {
            signal.set(1);
            signal.set(2);
            signal.set(3);
        });

        assert_eq!(*calls.borrow(), 1);
        assert_eq!(signal.get(), 3);
    }

    #[test]
    fn unsubscribe_stops_notifications() {
        let signal = Signal::new(0);
        let calls = Rc::new(RefCell::new(0));
        let calls_clone = calls.clone();
        let id = signal.subscribe(move || *calls_clone.borrow_mut() += 1);

        signal.set(1);
        assert_eq!(*calls.borrow(), 1);

        signal.unsubscribe(id);
        signal.set(2);
        assert_eq!(*calls.borrow(), 1);
    }

    #[test]
    fn subscribe_scoped_unsubscribes_on_drop() {
        let signal = Signal::new(0);
        let calls = Rc::new(RefCell::new(0));
        let calls_clone = calls.clone();
        {
            let _sub = signal.subscribe_scoped(move || *calls_clone.borrow_mut() += 1);
            signal.set(1);
            assert_eq!(*calls.borrow(), 1);
        }
        signal.set(2);
        assert_eq!(*calls.borrow(), 1);
    }

    #[test]
    fn disposed_tracks_an_explicit_flag_not_subscriber_count() {
        let signal = Signal::new(0);
        assert!(!signal.disposed(), "a fresh signal with no subscribers is not disposed");

        let id = signal.subscribe(|| {});
        signal.unsubscribe(id);
        assert!(!signal.disposed(), "losing its last subscriber does not dispose a signal");

        signal.dispose();
        assert!(signal.disposed());
    }
}
