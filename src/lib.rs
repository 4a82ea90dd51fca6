//! A tick-based reconciliation engine that compiles a tree of declarative,
//! possibly-asynchronous components into a normalized execution structure
//! for an agent loop.
//!
//! The core provides two contracts: inwards to component authors, a hook
//! API ([`hooks`]) and a class-component lifecycle ([`component`]); outwards
//! to the surrounding engine, [`compiler::Compiler::compile`] /
//! [`stabilize::compile_until_stable`] and the `notify*` family. Everything
//! else the engine owns — the tick loop, model invocation, tool dispatch,
//! transport, persistence, UI rendering — is an external collaborator whose
//! interface this crate consumes ([`com::Com`], [`content::ContentRenderer`])
//! but does not implement.

#![deny(clippy::all)]
#![allow(clippy::unused_unit, clippy::too_many_arguments, clippy::large_enum_variant)]

mod active;
mod collector;
mod com;
mod compiler;
mod component;
mod config;
mod content;
mod effects;
mod element;
mod error;
mod fiber;
mod hooks;
mod id;
mod lifecycle;
mod message;
mod reconciler;
mod signal;
mod stabilize;
pub mod testing;

pub use crate::{
    active::{current as active_compiler, ActiveCompiler, Phase},
    collector::{
        CompiledEphemeral, CompiledSection, CompiledStructure, CompiledTimelineEntry, EphemeralPosition,
        SectionContent, SystemMessageItem, SystemMessageItemKind, TimelineEntryKind,
    },
    com::{Com, StateChangeHandler, SubscriptionToken, ToolDescriptor, ToolMetadata},
    compiler::{AfterCompileCallback, Compiler, TickError, TickState},
    component::{
        AnyClassComponent, AnyClassInstance, AnyFunctionComponent, ClassComponent, ComponentIdentity, FnComponent,
    },
    config::{Config, ContentBlockPredicate},
    content::{
        is_default_content_block, ContentBlock, ContentMapperRegistry, ContentRenderer, PassthroughRenderer,
        SemanticKind, SemanticNode,
    },
    effects::{EffectCreateFuture, EffectDestroy, EffectPhase},
    element::{
        Children, Element, ElementKey, ElementType, FragmentMarker, HostPrimitive, NormalizedChild, Props,
        PropsContent, ToolDefinitionProp,
    },
    error::CompileError,
    hooks::{DepKey, HookCellId, HookTag, ReducerHandle, RenderContext, StateHandle},
    id::FiberId,
    lifecycle::{AfterCompileCtx, LifecycleHook, MiddlewareRegistry, RecoveryAction},
    message::{InboundMessage, Message, MessageContent, Role},
    signal::{batch, ComSignal, Computed, Signal, SignalId, Subscription, SubscriptionId, Watch},
    stabilize::{compile_until_stable, StabilizationResult},
};
