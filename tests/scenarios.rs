//! End-to-end scenarios exercising a [`Compiler`] the way the surrounding
//! engine's tick loop does: `notify_tick_start` → `compile` → `notify_tick_end`,
//! repeated, with assertions on the collected [`CompiledStructure`] and on
//! component lifecycle call counts (spec.md §8).

use fiber_compiler::{
    AnyClassInstance, ClassComponent, Compiler, Config, Element, ElementType, HostPrimitive, Props, RecoveryAction,
    SectionContent, TickState,
};
use futures::future::LocalBoxFuture;
use std::{
    cell::Cell,
    rc::Rc,
    sync::atomic::{AtomicUsize, Ordering},
};

fn section_with_text(id: &str, text: String) -> Element {
    Element::new(
        ElementType::HostPrimitive(HostPrimitive::Section),
        Props::default().with_field("id", id).with_content(fiber_compiler::PropsContent::Text(text)),
        None,
    )
}

/// Scenario 2: a class component with `Rc<Cell<i32>>`-backed counter state,
/// incremented once per `onTickStart`, rendering its current value into a
/// section so each compile's output reflects the count as of that tick.
struct Counter {
    count: Rc<Cell<i32>>,
}

impl AnyClassInstance for Counter {
    fn set_props(&mut self, _props: Props) {}

    fn render<'a>(
        &'a mut self,
        _com: &'a dyn fiber_compiler::Com,
        _tick: &'a TickState,
    ) -> LocalBoxFuture<'a, Result<fiber_compiler::Children, anyhow::Error>> {
        let text = format!("Count: {}", self.count.get());
        Box::pin(async move {
            Ok(fiber_compiler::Children::from(section_with_text("counter", text)))
        })
    }

    fn on_tick_start<'a>(
        &'a mut self,
        _com: &'a dyn fiber_compiler::Com,
        _tick: &'a TickState,
    ) -> LocalBoxFuture<'a, Result<(), anyhow::Error>> {
        self.count.set(self.count.get() + 1);
        Box::pin(async { Ok(()) })
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[test]
fn counter_reflects_tick_start_increments_across_three_ticks() {
    let com = fiber_compiler::testing::InMemoryCom::new();
    let mut compiler = Compiler::new(com, Config::default());
    let count = Rc::new(Cell::new(0));

    let element = Element::new(
        ElementType::Class(Rc::new(ClassComponent::<Counter>::new("Counter", {
            let count = count.clone();
            move |_props| Box::new(Counter { count: count.clone() })
        }))),
        Props::default(),
        None,
    );

    // Mounts the component (count stays 0: onTickStart can't fire for a
    // fiber that doesn't exist until this first compile creates it).
    let initial = compiler.compile(&element, &TickState::new()).unwrap();
    match &initial.sections.get("counter").unwrap().content {
        SectionContent::Text(t) => assert_eq!(t, "Count: 0"),
        other => panic!("expected text content, got {:?}", other),
    }

    for expected in 1..=3 {
        let tick = TickState::new();
        compiler.notify_tick_start(&tick);
        let structure = compiler.compile(&element, &tick).unwrap();
        compiler.notify_tick_end(&tick).unwrap();

        match &structure.sections.get("counter").unwrap().content {
            SectionContent::Text(t) => assert_eq!(t, &format!("Count: {expected}")),
            other => panic!("expected text content, got {:?}", other),
        }
    }
}

/// Scenario 3: swapping which component occupies a position across ticks
/// tears down the old one and mounts the new one exactly once each, rather
/// than reusing the fiber (different `ElementType` identity, spec.md §4.4).
struct TrackedMount {
    mounts: Rc<AtomicUsize>,
    unmounts: Rc<AtomicUsize>,
}

impl AnyClassInstance for TrackedMount {
    fn set_props(&mut self, _props: Props) {}

    fn render<'a>(
        &'a mut self,
        _com: &'a dyn fiber_compiler::Com,
        _tick: &'a TickState,
    ) -> LocalBoxFuture<'a, Result<fiber_compiler::Children, anyhow::Error>> {
        Box::pin(async { Ok(fiber_compiler::Children::Empty) })
    }

    fn on_mount<'a>(&'a mut self, _com: &'a dyn fiber_compiler::Com) -> LocalBoxFuture<'a, Result<(), anyhow::Error>> {
        self.mounts.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }

    fn on_unmount(&mut self) -> LocalBoxFuture<'_, ()> {
        self.unmounts.fetch_add(1, Ordering::SeqCst);
        Box::pin(async {})
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

struct LabelA;
struct LabelB;

#[test]
fn swapping_component_type_at_a_position_mounts_and_unmounts_exactly_once() {
    let com = fiber_compiler::testing::InMemoryCom::new();
    let mut compiler = Compiler::new(com, Config::default());

    let a_mounts = Rc::new(AtomicUsize::new(0));
    let a_unmounts = Rc::new(AtomicUsize::new(0));
    let b_mounts = Rc::new(AtomicUsize::new(0));
    let b_unmounts = Rc::new(AtomicUsize::new(0));

    let element_a = Element::new(
        ElementType::Class(Rc::new(ClassComponent::<LabelA>::new("A", {
            let mounts = a_mounts.clone();
            let unmounts = a_unmounts.clone();
            move |_props| Box::new(TrackedMount { mounts: mounts.clone(), unmounts: unmounts.clone() })
        }))),
        Props::default(),
        None,
    );
    let element_b = Element::new(
        ElementType::Class(Rc::new(ClassComponent::<LabelB>::new("B", {
            let mounts = b_mounts.clone();
            let unmounts = b_unmounts.clone();
            move |_props| Box::new(TrackedMount { mounts: mounts.clone(), unmounts: unmounts.clone() })
        }))),
        Props::default(),
        None,
    );

    compiler.compile(&element_a, &TickState::new()).unwrap();
    assert_eq!(a_mounts.load(Ordering::SeqCst), 1);
    assert_eq!(a_unmounts.load(Ordering::SeqCst), 0);
    assert_eq!(b_mounts.load(Ordering::SeqCst), 0);

    compiler.compile(&element_b, &TickState::new()).unwrap();
    assert_eq!(a_unmounts.load(Ordering::SeqCst), 1, "A's onUnmount should run exactly once");
    assert_eq!(b_mounts.load(Ordering::SeqCst), 1, "B's onMount should run exactly once");

    compiler.compile(&element_b, &TickState::new()).unwrap();
    assert_eq!(b_mounts.load(Ordering::SeqCst), 1, "re-rendering B again must not remount it");
    assert_eq!(a_unmounts.load(Ordering::SeqCst), 1, "A stays unmounted, not re-torn-down");
}

/// A tick-end error with no component `onError` propagates to the caller
/// (spec.md §7 rule 3), rather than being silently swallowed.
struct NoRecovery;
impl AnyClassInstance for NoRecovery {
    fn set_props(&mut self, _props: Props) {}
    fn render<'a>(
        &'a mut self,
        _com: &'a dyn fiber_compiler::Com,
        _tick: &'a TickState,
    ) -> LocalBoxFuture<'a, Result<fiber_compiler::Children, anyhow::Error>> {
        Box::pin(async { Ok(fiber_compiler::Children::Empty) })
    }
    fn on_tick_end<'a>(
        &'a mut self,
        _com: &'a dyn fiber_compiler::Com,
        _tick: &'a TickState,
    ) -> LocalBoxFuture<'a, Result<(), anyhow::Error>> {
        Box::pin(async { Err(anyhow::anyhow!("boom")) })
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[test]
fn unrouted_tick_end_error_propagates() {
    let com = fiber_compiler::testing::InMemoryCom::new();
    let mut compiler = Compiler::new(com, Config::default());
    let element = Element::new(
        ElementType::Class(Rc::new(ClassComponent::<NoRecovery>::new("NoRecovery", |_props| Box::new(NoRecovery)))),
        Props::default(),
        None,
    );
    let tick = TickState::new();
    compiler.compile(&element, &tick).unwrap();
    assert!(compiler.notify_tick_end(&tick).is_err());
}

/// A component whose `onError` marks the tick recoverable (spec.md §4.6).
struct Recovers {
    recovered: Rc<Cell<bool>>,
}
impl AnyClassInstance for Recovers {
    fn set_props(&mut self, _props: Props) {}
    fn render<'a>(
        &'a mut self,
        _com: &'a dyn fiber_compiler::Com,
        _tick: &'a TickState,
    ) -> LocalBoxFuture<'a, Result<fiber_compiler::Children, anyhow::Error>> {
        Box::pin(async { Ok(fiber_compiler::Children::Empty) })
    }
    fn on_tick_end<'a>(
        &'a mut self,
        _com: &'a dyn fiber_compiler::Com,
        _tick: &'a TickState,
    ) -> LocalBoxFuture<'a, Result<(), anyhow::Error>> {
        Box::pin(async { Err(anyhow::anyhow!("boom")) })
    }
    fn has_on_error(&self) -> bool {
        true
    }
    fn on_error(&mut self, _tick: &TickState) -> LocalBoxFuture<'_, Option<RecoveryAction>> {
        self.recovered.set(true);
        Box::pin(async { Some(RecoveryAction { continue_: true, reason: Some("recovered".into()) }) })
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[test]
fn tick_end_error_routed_through_on_error_does_not_propagate() {
    let com = fiber_compiler::testing::InMemoryCom::new();
    let mut compiler = Compiler::new(com, Config::default());
    let recovered = Rc::new(Cell::new(false));
    let element = Element::new(
        ElementType::Class(Rc::new(ClassComponent::<Recovers>::new("Recovers", {
            let recovered = recovered.clone();
            move |_props| Box::new(Recovers { recovered: recovered.clone() })
        }))),
        Props::default(),
        None,
    );
    let tick = TickState::new();
    compiler.compile(&element, &tick).unwrap();
    assert!(compiler.notify_tick_end(&tick).is_ok());
    assert!(recovered.get());
}
