//! `beginWork` dispatch and child reconciliation (spec.md §4.4).
//!
//! Recursion here is driven entirely by `FiberId`s rather than borrowed
//! fiber references: `fiber::Arena` is a `SlotMap`, so a `&Fiber` and a
//! `&mut Fiber` for two different keys cannot both be alive at once without
//! unsafe code. Every step that needs data from one fiber while mutating
//! another (or while a `beginWork` of a child needs `&mut Arena` itself)
//! copies the data it needs out into a local first, matching the same
//! arena-by-id discipline `fiber.rs` already uses for `parent`/`child`
//! edges.

use crate::{
    com::Com,
    compiler::TickState,
    component::AnyFunctionComponent,
    effects::{EffectQueues, QueuedEffect},
    element::{Children, Element, ElementKey, ElementType, NormalizedChild, Props},
    error::{CompileError, Result},
    fiber::{Arena, FiberFlags, FiberId, StateNode},
    hooks::{HookList, RenderContext},
};
use std::rc::Rc;

/// Host tag synthesized for a normalized text child (spec.md §4.4 "Text
/// children ... materialize into synthetic fibers with types `"text"`").
const TEXT_HOST_TAG: &str = "text";
/// Host tag synthesized for a normalized content-block child.
const CONTENT_BLOCK_HOST_TAG: &str = "content-block";

/// Top-level entry point: reconciles `element` against `current_root` (the
/// previously committed root fiber, if any), returning the new root's
/// `FiberId`. Used by `compiler::Compiler::compile`.
pub async fn reconcile_root(
    arena: &mut Arena,
    current_root: FiberIdOrElement,
    element: &Element,
    com: &dyn Com,
    tick: &TickState,
    queues: &mut EffectQueues,
) -> Result<FiberId> {
    let wip = match current_root {
        FiberIdOrElement::Id(current) if reusable(arena, current, element) => {
            arena.create_work_in_progress(current, element.props.clone())
        }
        _ => {
            let id = arena.create_fiber(element);
            arena.get_mut(id).unwrap().flags |= FiberFlags::PLACEMENT;
            id
        }
    };
    begin_work(arena, wip, element, com, tick, queues).await?;
    Ok(wip)
}

/// Disambiguates "no previous root" from "previous root, by id" without
/// requiring callers to keep a dummy fiber around for the very first compile.
pub enum FiberIdOrElement {
    Id(FiberId),
    None,
}

fn reusable(arena: &Arena, current: FiberId, element: &Element) -> bool {
    match arena.get(current) {
        Some(fiber) => fiber.is_same_identity(&element.element_type, &element.key),
        None => false,
    }
}

/// `beginWork` (spec.md §4.4): sets the fiber's type/props then dispatches
/// on element type, reconciling the resulting children onto it.
pub async fn begin_work(
    arena: &mut Arena,
    fiber_id: FiberId,
    element: &Element,
    com: &dyn Com,
    tick: &TickState,
    queues: &mut EffectQueues,
) -> Result<()> {
    {
        let fiber = arena.get_mut(fiber_id).expect("fiber vanished during beginWork");
        fiber.element_type = element.element_type.clone();
        fiber.pending_props = Some(element.props.clone());
    }

    match element.element_type.clone() {
        ElementType::Fragment(_) => {
            arena.commit_pending_props(fiber_id);
            reconcile_rendered_children(arena, fiber_id, children_of_props(element), com, tick, queues).await?;
        }
        ElementType::HostPrimitive(_) | ElementType::Host(_) => {
            arena.commit_pending_props(fiber_id);
            reconcile_rendered_children(arena, fiber_id, children_of_props(element), com, tick, queues).await?;
        }
        ElementType::Class(class) => {
            let is_mount = matches!(arena.get(fiber_id).unwrap().state_node, StateNode::None);
            if is_mount {
                let mut instance = class.construct(element.props.clone());
                instance
                    .on_mount(com)
                    .await
                    .map_err(|err| component_render_error(class.debug_name(), err))?;
                if let Some(tool) = class.static_tool() {
                    com.add_tool(tool);
                }
                arena.get_mut(fiber_id).unwrap().state_node = StateNode::Class(instance);
            } else {
                arena.commit_pending_props(fiber_id);
                let props = arena.get(fiber_id).unwrap().props.clone();
                if let StateNode::Class(instance) = &mut arena.get_mut(fiber_id).unwrap().state_node {
                    instance.set_props(props);
                }
            }

            let rendered = {
                let fiber = arena.get_mut(fiber_id).unwrap();
                let StateNode::Class(instance) = &mut fiber.state_node else {
                    unreachable!("class fiber without a Class state_node");
                };
                instance
                    .render(com, tick)
                    .await
                    .map_err(|err| component_render_error(class.debug_name(), err))?
            };
            arena.commit_pending_props(fiber_id);
            reconcile_self_referential(arena, fiber_id, &element.element_type, rendered, com, tick, queues).await?;
        }
        ElementType::Instance(instance) => {
            let is_mount = matches!(arena.get(fiber_id).unwrap().state_node, StateNode::None);
            if is_mount {
                instance
                    .borrow_mut()
                    .on_mount(com)
                    .await
                    .map_err(|err| component_render_error("<instance>", err))?;
                arena.get_mut(fiber_id).unwrap().state_node = StateNode::Instance(instance.clone());
            } else {
                arena.commit_pending_props(fiber_id);
                let props = arena.get(fiber_id).unwrap().props.clone();
                instance.borrow_mut().set_props(props);
            }
            let rendered = instance
                .borrow_mut()
                .render(com, tick)
                .await
                .map_err(|err| component_render_error("<instance>", err))?;
            arena.commit_pending_props(fiber_id);
            reconcile_self_referential(arena, fiber_id, &element.element_type, rendered, com, tick, queues).await?;
        }
        ElementType::Function(component) => {
            let debug_name = component.debug_name().to_string();
            let props = element.props.clone();
            // Hooks are mounted fresh on every render; the previous list is
            // moved out of the *current* fiber (its own buffer, distinct
            // from `fiber_id`'s wip buffer) for the duration of the call so
            // `RenderContext` can borrow it as a plain local rather than a
            // borrow of `arena` itself (see module docs).
            let current_id = arena.get(fiber_id).and_then(|f| f.alternate);
            let mut old_hooks = match current_id {
                Some(cur) => std::mem::take(&mut arena.get_mut(cur).unwrap().hooks),
                None => HookList::new(),
            };
            let current_list = current_id.map(|_| &old_hooks);

            let rendered = {
                let mut ctx = RenderContext::new(fiber_id, &debug_name, com, tick, current_list);
                let result = component.render(props, &mut ctx).await;
                drain_hook_effects(&mut ctx, fiber_id, queues);
                let hooks = ctx.finish()?;
                arena.get_mut(fiber_id).unwrap().hooks = hooks;
                result.map_err(|err| component_render_error(&debug_name, err))?
            };

            if let Some(cur) = current_id {
                arena.get_mut(cur).unwrap().hooks = std::mem::take(&mut old_hooks);
            }

            arena.commit_pending_props(fiber_id);
            reconcile_self_referential(arena, fiber_id, &element.element_type, rendered, com, tick, queues).await?;
        }
    }
    Ok(())
}

fn component_render_error(component: &str, source: anyhow::Error) -> CompileError {
    CompileError::ComponentRender { component: component.to_string(), source }
}

fn children_of_props(element: &Element) -> Children {
    element.props.children.as_deref().cloned().unwrap_or(Children::Empty)
}

/// Moves any queued effect cells out of a just-finished render context's new
/// hook list into the phase-bucketed scheduler queues (spec.md §4.5
/// "bucketed by phase into queues at the end of each render phase").
///
/// This walks `ctx`'s in-progress list before `finish()` consumes it; effect
/// cells whose `pending` flag is set have their `create` thunk taken and
/// queued, leaving the cell otherwise intact for `finish()` to hand back.
fn drain_hook_effects(ctx: &mut RenderContext<'_>, fiber_id: FiberId, queues: &mut EffectQueues) {
    ctx.for_each_pending_effect(|cell, phase, debug_label, create, previous_destroy| {
        queues.push(QueuedEffect {
            fiber: fiber_id,
            cell,
            phase,
            debug_label,
            create: create(),
            previous_destroy,
        });
    });
}

/// Handles spec.md §4.4 rule 6's terminal self-reference guard: if a
/// function/class/instance component's rendered output is itself an element
/// of the *same* type, that element is not invoked again — its
/// `props.children` is reconciled directly onto this fiber as if it were a
/// transparent host, preventing unbounded recursion on patterns like
/// `return <Self>{props.children}</Self>`.
async fn reconcile_self_referential(
    arena: &mut Arena,
    fiber_id: FiberId,
    own_type: &ElementType,
    rendered: Children,
    com: &dyn Com,
    tick: &TickState,
    queues: &mut EffectQueues,
) -> Result<()> {
    if let Children::Element(inner) = &rendered {
        if &inner.element_type == own_type {
            tracing::debug!(fiber = ?fiber_id, "self-referential component return; reconciling children only");
            reconcile_rendered_children(arena, fiber_id, children_of_props(inner), com, tick, queues).await?;
            return Ok(());
        }
    }
    reconcile_rendered_children(arena, fiber_id, rendered, com, tick, queues).await
}

/// Reconciles `children` against `fiber_id`'s existing child chain,
/// replacing it (spec.md §4.4 "Child reconciliation").
async fn reconcile_rendered_children(
    arena: &mut Arena,
    fiber_id: FiberId,
    children: Children,
    com: &dyn Com,
    tick: &TickState,
    queues: &mut EffectQueues,
) -> Result<()> {
    let normalized = crate::element::normalize(&children);

    let mut old_chain = Vec::new();
    let mut cursor = arena.get(fiber_id).and_then(|f| f.child);
    while let Some(id) = cursor {
        old_chain.push(id);
        cursor = arena.get(id).and_then(|f| f.sibling);
    }

    let mut new_chain: Vec<FiberId> = Vec::with_capacity(normalized.len());
    let mut consumed = vec![false; old_chain.len()];

    for (index, child) in normalized.iter().enumerate() {
        let (child_type, child_key, child_element): (ElementType, ElementKey, Option<Element>) = match child {
            NormalizedChild::Element(e) => (e.element_type.clone(), e.key.clone(), Some((**e).clone())),
            NormalizedChild::Text(text) => (
                ElementType::Host(TEXT_HOST_TAG.to_string()),
                None,
                Some(Element::new(
                    ElementType::Host(TEXT_HOST_TAG.to_string()),
                    Props::default().with_field("text", text.clone()),
                    None,
                )),
            ),
            NormalizedChild::ContentBlock(block) => (
                ElementType::Host(CONTENT_BLOCK_HOST_TAG.to_string()),
                None,
                Some(Element::new(
                    ElementType::Host(CONTENT_BLOCK_HOST_TAG.to_string()),
                    Props::default().with_content(crate::element::PropsContent::Blocks(vec![(**block).clone()])),
                    None,
                )),
            ),
        };
        let element = child_element.expect("every normalized child kind synthesizes an element");

        let reuse_slot = old_chain.iter().enumerate().find(|(i, &old_id)| {
            !consumed[*i]
                && arena.get(old_id).map_or(false, |f| f.is_same_identity(&child_type, &child_key))
        });

        let child_id = match reuse_slot {
            Some((slot, &old_id)) => {
                consumed[slot] = true;
                let wip = arena.create_work_in_progress(old_id, element.props.clone());
                Box::pin(begin_work(arena, wip, &element, com, tick, queues)).await?;
                wip
            }
            None => {
                let new_id = arena.create_fiber(&element);
                arena.get_mut(new_id).unwrap().flags |= FiberFlags::PLACEMENT;
                arena.get_mut(new_id).unwrap().parent = Some(fiber_id);
                Box::pin(begin_work(arena, new_id, &element, com, tick, queues)).await?;
                new_id
            }
        };
        arena.get_mut(child_id).unwrap().parent = Some(fiber_id);
        arena.get_mut(child_id).unwrap().index = index;
        new_chain.push(child_id);
    }

    // "Remaining old siblings beyond the new length are moved to
    // `parent.deletions`" (spec.md §4.4) — in practice any old slot not
    // consumed above, not just a length-based tail, since keyed reuse may
    // leave holes anywhere in the chain.
    let mut deletions = Vec::new();
    for (i, &old_id) in old_chain.iter().enumerate() {
        if !consumed[i] {
            arena.get_mut(old_id).unwrap().flags |= FiberFlags::DELETION;
            deletions.push(old_id);
        }
    }

    for window in new_chain.windows(2) {
        arena.get_mut(window[0]).unwrap().sibling = Some(window[1]);
    }
    if let Some(&last) = new_chain.last() {
        arena.get_mut(last).unwrap().sibling = None;
    }

    let fiber = arena.get_mut(fiber_id).unwrap();
    fiber.child = new_chain.first().copied();
    fiber.deletions.extend(deletions);

    Ok(())
}

/// Rewraps a boxed class instance's render call so a caller that only has
/// `Rc<dyn AnyFunctionComponent>` around (e.g. a future test helper building
/// a root element directly) doesn't need its own import of the trait.
pub fn function_component_debug_name(component: &Rc<dyn AnyFunctionComponent>) -> &str {
    component.debug_name()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        com::{StateChangeHandler, SubscriptionToken, ToolDescriptor},
        component::FnComponent,
        compiler::TickState,
        element::{Element, ElementType, Props},
    };
    use futures::FutureExt;
    use std::cell::RefCell;

    struct NullCom;
    impl Com for NullCom {
        fn get_state(&self, _key: &str) -> Option<serde_json::Value> {
            None
        }
        fn set_state(&self, _key: &str, _value: serde_json::Value) {}
        fn on_state_changed(&self, _handler: StateChangeHandler) -> SubscriptionToken {
            SubscriptionToken(0)
        }
        fn off_state_changed(&self, _token: SubscriptionToken) {}
        fn add_tool(&self, _tool: ToolDescriptor) {}
        fn get_tool(&self, _name: &str) -> Option<ToolDescriptor> {
            None
        }
        fn set_ref(&self, _name: &str, _instance: Rc<dyn std::any::Any>) {}
        fn remove_ref(&self, _name: &str) {}
        fn request_recompile(&self, _reason: String) {}
        fn reset_recompile_request(&self) {}
        fn was_recompile_requested(&self) -> bool {
            false
        }
        fn recompile_reasons(&self) -> Vec<String> {
            Vec::new()
        }
    }

    fn host(tag: &str) -> Element {
        Element::new(ElementType::Host(tag.to_string()), Props::default(), None)
    }

    #[test]
    fn host_primitive_reconciles_children_without_invoking_anything() {
        let mut arena = Arena::new();
        let com = NullCom;
        let tick = TickState::new();
        let mut queues = EffectQueues::new();

        let root = Element::new(
            ElementType::Host("div".into()),
            Props::default().with_children(Children::Array(vec![
                Children::Element(Box::new(host("a"))),
                Children::Element(Box::new(host("b"))),
            ])),
            None,
        );

        let fiber_id = futures::executor::block_on(reconcile_root(
            &mut arena,
            FiberIdOrElement::None,
            &root,
            &com,
            &tick,
            &mut queues,
        ))
        .unwrap();

        let children = arena.children_of(fiber_id);
        assert_eq!(children.len(), 2);
    }

    #[test]
    fn keyed_children_are_reused_across_reorder() {
        let mut arena = Arena::new();
        let com = NullCom;
        let tick = TickState::new();
        let mut queues = EffectQueues::new();

        fn keyed(key: &str) -> Element {
            Element::new(ElementType::Host("x".into()), Props::default(), Some(key.to_string()))
        }

        let first = Element::new(
            ElementType::Host("root".into()),
            Props::default()
                .with_children(Children::Array(vec![Children::from(keyed("a")), Children::from(keyed("b"))])),
            None,
        );
        let root_id = futures::executor::block_on(reconcile_root(
            &mut arena,
            FiberIdOrElement::None,
            &first,
            &com,
            &tick,
            &mut queues,
        ))
        .unwrap();
        let before = arena.children_of(root_id);

        let second = Element::new(
            ElementType::Host("root".into()),
            Props::default()
                .with_children(Children::Array(vec![Children::from(keyed("b")), Children::from(keyed("a"))])),
            None,
        );
        futures::executor::block_on(begin_work(&mut arena, root_id, &second, &com, &tick, &mut queues)).unwrap();
        let after = arena.children_of(root_id);

        assert_eq!(after.len(), 2);
        assert_eq!(after[0], before[1]);
        assert_eq!(after[1], before[0]);
    }

    #[test]
    fn removed_child_is_moved_to_deletions() {
        let mut arena = Arena::new();
        let com = NullCom;
        let tick = TickState::new();
        let mut queues = EffectQueues::new();

        let first = Element::new(
            ElementType::Host("root".into()),
            Props::default().with_children(Children::Array(vec![
                Children::from(host("a")),
                Children::from(host("b")),
            ])),
            None,
        );
        let root_id = futures::executor::block_on(reconcile_root(
            &mut arena,
            FiberIdOrElement::None,
            &first,
            &com,
            &tick,
            &mut queues,
        ))
        .unwrap();
        let before = arena.children_of(root_id);

        let second = Element::new(
            ElementType::Host("root".into()),
            Props::default().with_children(Children::Array(vec![Children::from(host("a"))])),
            None,
        );
        futures::executor::block_on(begin_work(&mut arena, root_id, &second, &com, &tick, &mut queues)).unwrap();

        let deletions = arena.get(root_id).unwrap().deletions.clone();
        assert_eq!(deletions, vec![before[1]]);
    }

    #[test]
    fn function_component_hooks_persist_state_across_rerender() {
        let mut arena = Arena::new();
        let com = NullCom;
        let tick = TickState::new();
        let mut queues = EffectQueues::new();

        let render_count = Rc::new(RefCell::new(0));
        let rc = render_count.clone();
        struct Marker;
        let component: Rc<dyn AnyFunctionComponent> = Rc::new(FnComponent::<Marker>::new("Counter", move |_props, ctx| {
            let rc = rc.clone();
            async move {
                let (value, _handle) = ctx.use_state(|| 0i32);
                *rc.borrow_mut() += 1;
                let _ = value;
                Ok(Children::Empty)
            }
            .boxed_local()
        }));

        let element = Element::new(ElementType::Function(component), Props::default(), None);
        let fiber_id = futures::executor::block_on(reconcile_root(
            &mut arena,
            FiberIdOrElement::None,
            &element,
            &com,
            &tick,
            &mut queues,
        ))
        .unwrap();
        futures::executor::block_on(begin_work(&mut arena, fiber_id, &element, &com, &tick, &mut queues)).unwrap();

        assert_eq!(*render_count.borrow(), 2);
        assert!(arena.get(fiber_id).unwrap().hooks.head.is_some());
    }
}
