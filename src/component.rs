//! Type-erased component interfaces (spec.md §3, §4.4, §4.6).
//!
//! Rust has no runtime arity inspection, so where spec.md allows a function
//! component to be invoked with `(props)`, `(props, com)`, or `(props, com,
//! tickState)` depending on its declared arity, this crate settles on one
//! canonical signature — `(props, ctx)`, where `ctx: &mut RenderContext`
//! exposes `com`/`tick` as fields alongside the hook API — and lets
//! component authors ignore what they don't need. This is recorded as an
//! Open Question resolution in DESIGN.md.

use crate::{
    com::{Com, ToolDescriptor},
    compiler::TickState,
    element::{Children, Props},
    hooks::RenderContext,
    lifecycle::{AfterCompileCtx, RecoveryAction},
    message::InboundMessage,
};
use futures::future::LocalBoxFuture;
use std::any::TypeId;

/// Identity used for fiber-reuse eligibility (spec.md §4.4:
/// `oldFiber.type === element.type`).
pub type ComponentIdentity = TypeId;

/// Object-safe, type-erased function component. `render` borrows its
/// [`RenderContext`] rather than returning a `'static` future: hooks are
/// called through the context while the future runs, so the future cannot
/// outlive the single synchronous `beginWork` call that drives it to
/// completion (spec.md §4.3 "During render of a function component the
/// compiler sets a *render context*").
pub trait AnyFunctionComponent {
    fn identity(&self) -> ComponentIdentity;
    fn debug_name(&self) -> &str;
    fn render<'a>(
        &'a self,
        props: Props,
        ctx: &'a mut RenderContext<'a>,
    ) -> LocalBoxFuture<'a, Result<Children, anyhow::Error>>;
}

/// Wraps any `Fn(Props, &mut RenderContext) -> impl Future<Output = ...>`
/// closure as an [`AnyFunctionComponent`], erasing its concrete type behind
/// a `TypeId` marker supplied at registration (typically the function
/// item's own zero-sized type, so two calls to the same Rust function are
/// always reuse-eligible).
pub struct FnComponent<M> {
    marker: std::marker::PhantomData<M>,
    debug_name: &'static str,
    render: Box<
        dyn for<'a> Fn(Props, &'a mut RenderContext<'a>) -> LocalBoxFuture<'a, Result<Children, anyhow::Error>>,
    >,
}

impl<M: 'static> FnComponent<M> {
    pub fn new(
        debug_name: &'static str,
        render: impl for<'a> Fn(Props, &'a mut RenderContext<'a>) -> LocalBoxFuture<'a, Result<Children, anyhow::Error>>
            + 'static,
    ) -> Self {
        Self { marker: std::marker::PhantomData, debug_name, render: Box::new(render) }
    }
}

impl<M: 'static> AnyFunctionComponent for FnComponent<M> {
    fn identity(&self) -> ComponentIdentity {
        TypeId::of::<M>()
    }

    fn debug_name(&self) -> &str {
        self.debug_name
    }

    fn render<'a>(
        &'a self,
        props: Props,
        ctx: &'a mut RenderContext<'a>,
    ) -> LocalBoxFuture<'a, Result<Children, anyhow::Error>> {
        (self.render)(props, ctx)
    }
}

/// An instantiated class component or object instance (spec.md §4.4 rules
/// 4 and 5 share this shape; object instances skip `construct`/`identity`
/// and are adapted directly). Every method has a no-op default so authors
/// only override what their component actually uses, matching spec.md's
/// "Unwrapped methods are still callable" framing — a component that
/// implements nothing beyond `render` is a valid, common case.
pub trait AnyClassInstance {
    fn set_props(&mut self, props: Props);

    fn render<'a>(
        &'a mut self,
        com: &'a dyn Com,
        tick: &'a TickState,
    ) -> LocalBoxFuture<'a, Result<Children, anyhow::Error>>;

    fn on_start(&mut self) -> LocalBoxFuture<'_, ()> {
        Box::pin(async {})
    }

    fn on_mount<'a>(&'a mut self, _com: &'a dyn Com) -> LocalBoxFuture<'a, Result<(), anyhow::Error>> {
        Box::pin(async { Ok(()) })
    }

    fn on_tick_start<'a>(
        &'a mut self,
        _com: &'a dyn Com,
        _tick: &'a TickState,
    ) -> LocalBoxFuture<'a, Result<(), anyhow::Error>> {
        Box::pin(async { Ok(()) })
    }

    fn on_tick_end<'a>(
        &'a mut self,
        _com: &'a dyn Com,
        _tick: &'a TickState,
    ) -> LocalBoxFuture<'a, Result<(), anyhow::Error>> {
        Box::pin(async { Ok(()) })
    }

    fn on_after_compile<'a>(
        &'a mut self,
        _compiled: &'a crate::collector::CompiledStructure,
        _ctx: AfterCompileCtx,
    ) -> LocalBoxFuture<'a, Result<(), anyhow::Error>> {
        Box::pin(async { Ok(()) })
    }

    fn on_message<'a>(
        &'a mut self,
        _com: &'a dyn Com,
        _msg: &'a InboundMessage,
        _tick: &'a TickState,
    ) -> LocalBoxFuture<'a, Result<(), anyhow::Error>> {
        Box::pin(async { Ok(()) })
    }

    fn on_complete(&mut self, _tick: &TickState) -> LocalBoxFuture<'_, ()> {
        Box::pin(async {})
    }

    /// Declares error-recovery support. Returning `None` here (the
    /// default) means this component has no `onError`, so a tick-end error
    /// passes through it unhandled (spec.md §4.6).
    fn on_error(&mut self, _tick: &TickState) -> LocalBoxFuture<'_, Option<RecoveryAction>> {
        Box::pin(async { None })
    }

    fn has_on_error(&self) -> bool {
        false
    }

    fn on_unmount(&mut self) -> LocalBoxFuture<'_, ()> {
        Box::pin(async {})
    }

    /// Instance `tool` property (pattern (c) in spec.md §4.8.1), distinct
    /// from the static tool returned by [`AnyClassComponent::static_tool`].
    fn tool(&self) -> Option<ToolDescriptor> {
        None
    }

    fn as_any(&self) -> &dyn std::any::Any;
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}

/// The un-instantiated class: knows how to construct a fresh
/// [`AnyClassInstance`] from props, and carries identity + any static tool
/// registration (spec.md §4.8.1 pattern (a)/(b)).
pub trait AnyClassComponent {
    fn identity(&self) -> ComponentIdentity;
    fn debug_name(&self) -> &str;
    fn construct(&self, props: Props) -> Box<dyn AnyClassInstance>;

    /// Static `metadata` + `run`, or a static `tool` property, resolved at
    /// registration time rather than per-instance.
    fn static_tool(&self) -> Option<ToolDescriptor> {
        None
    }
}

/// Generic class-component wrapper. `C` is the concrete user type; `Ctor`
/// builds a boxed instance. Authors typically get one of these via a small
/// helper rather than implementing `AnyClassComponent` by hand.
pub struct ClassComponent<C> {
    marker: std::marker::PhantomData<C>,
    debug_name: &'static str,
    construct: Box<dyn Fn(Props) -> Box<dyn AnyClassInstance>>,
    static_tool: Option<ToolDescriptor>,
}

impl<C: 'static> ClassComponent<C> {
    pub fn new(
        debug_name: &'static str,
        construct: impl Fn(Props) -> Box<dyn AnyClassInstance> + 'static,
    ) -> Self {
        Self { marker: std::marker::PhantomData, debug_name, construct: Box::new(construct), static_tool: None }
    }

    pub fn with_static_tool(mut self, tool: ToolDescriptor) -> Self {
        self.static_tool = Some(tool);
        self
    }
}

impl<C: 'static> AnyClassComponent for ClassComponent<C> {
    fn identity(&self) -> ComponentIdentity {
        TypeId::of::<C>()
    }

    fn debug_name(&self) -> &str {
        self.debug_name
    }

    fn construct(&self, props: Props) -> Box<dyn AnyClassInstance> {
        (self.construct)(props)
    }

    fn static_tool(&self) -> Option<ToolDescriptor> {
        self.static_tool.clone()
    }
}

// A plain object instance (spec.md §4.4 rule 5) needs no dedicated trait
// beyond `AnyClassInstance`: the element's "type" *is* the already-
// constructed instance (`element::ElementType::Instance`), so there is no
// separate ctor/identity split the way there is for class components —
// identity is `Rc::ptr_eq` on the instance handle itself.
