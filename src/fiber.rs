//! The mutable shadow tree (spec.md §3 "Fiber", §4.2, Design Notes).
//!
//! The Design Notes call for replacing `parent` back-references with
//! non-owning handles into an arena keyed by fiber id, since this crate has
//! no garbage collector to make a cyclic `Rc` graph safe. [`Arena`] is a
//! `slotmap::SlotMap` for exactly that reason — stale `FiberId`s from a
//! deleted fiber simply fail to resolve rather than dangling.

use crate::{
    component::AnyClassInstance,
    element::{Element, ElementKey, ElementType, Props},
    id::FiberId,
};
use slotmap::SlotMap;
use std::rc::Rc;

bitflags::bitflags! {
    /// Work flags bitset (spec.md §3 "Fiber" fields).
    pub struct FiberFlags: u16 {
        const NONE = 0;
        const PLACEMENT = 1 << 0;
        const UPDATE = 1 << 1;
        const DELETION = 1 << 2;
        const CHILD_DELETION = 1 << 3;
        const HAS_EFFECT = 1 << 4;
        const REF = 1 << 5;
    }
}

/// `fiber.stateNode` (spec.md §3): a class instance, a plain object
/// instance, or nothing for function components and host primitives.
pub enum StateNode {
    None,
    Class(Box<dyn AnyClassInstance>),
    Instance(Rc<std::cell::RefCell<dyn AnyClassInstance>>),
}

/// A mutable tree-identity handle (spec.md §3 "Fiber"). Stored in an
/// [`Arena`]; tree edges are expressed as `FiberId`s rather than `Rc`
/// pointers because `parent` is explicitly a non-owning lookup edge while
/// `child`/`sibling` are the owning chain.
pub struct Fiber {
    pub element_type: ElementType,
    pub key: ElementKey,
    pub props: Props,
    pub pending_props: Option<Props>,
    pub state_node: StateNode,
    /// The fiber's own hook-cell list for function components (§4.3). A
    /// fiber exclusively owns its hook list (spec.md invariant 4: "Only the
    /// fiber that created a hook may mutate its state"), so it lives here
    /// rather than in a shared arena.
    pub hooks: crate::hooks::HookList,
    pub parent: Option<FiberId>,
    pub child: Option<FiberId>,
    pub sibling: Option<FiberId>,
    pub index: usize,
    pub ref_name: Option<String>,
    pub flags: FiberFlags,
    pub deletions: Vec<FiberId>,
    pub alternate: Option<FiberId>,
    pub debug_name: String,
}

impl Fiber {
    fn new(element_type: ElementType, props: Props, key: ElementKey, debug_name: String) -> Self {
        Self {
            element_type,
            key,
            props,
            pending_props: None,
            state_node: StateNode::None,
            hooks: crate::hooks::HookList::new(),
            parent: None,
            child: None,
            sibling: None,
            index: 0,
            ref_name: None,
            flags: FiberFlags::NONE,
            deletions: Vec::new(),
            alternate: None,
            debug_name,
        }
    }

    pub fn is_same_identity(&self, element_type: &ElementType, key: &ElementKey) -> bool {
        &self.element_type == element_type && &self.key == key
    }
}

/// The arena owning every live fiber across both buffers of one execution
/// (spec.md Design Notes: "an arena keyed by fiber id").
#[derive(Default)]
pub struct Arena {
    fibers: SlotMap<FiberId, Fiber>,
}

impl Arena {
    pub fn new() -> Self {
        Self { fibers: SlotMap::with_key() }
    }

    pub fn get(&self, id: FiberId) -> Option<&Fiber> {
        self.fibers.get(id)
    }

    pub fn get_mut(&mut self, id: FiberId) -> Option<&mut Fiber> {
        self.fibers.get_mut(id)
    }

    pub fn remove(&mut self, id: FiberId) -> Option<Fiber> {
        self.fibers.remove(id)
    }

    /// `createFiber(type, props, key)` (spec.md §4.2): allocates a fiber
    /// with empty tree pointers and `NoFlags`.
    pub fn create_fiber(&mut self, element: &Element) -> FiberId {
        let debug_name = format!("{:?}", element.element_type);
        let fiber =
            Fiber::new(element.element_type.clone(), element.props.clone(), element.key.clone(), debug_name);
        self.fibers.insert(fiber)
    }

    /// `createWorkInProgress(current, pendingProps)` (spec.md §4.2): returns
    /// the alternate of `current`, allocating and cross-linking it on first
    /// use, then copying `memoizedState`/`stateNode`/`child`/`ref`/flags
    /// reset per spec.
    pub fn create_work_in_progress(&mut self, current: FiberId, pending_props: Props) -> FiberId {
        let existing_alternate = self.fibers[current].alternate;
        let wip_id = match existing_alternate {
            Some(wip) => wip,
            None => {
                let debug_name = self.fibers[current].debug_name.clone();
                let element_type = self.fibers[current].element_type.clone();
                let key = self.fibers[current].key.clone();
                let new_fiber = Fiber::new(element_type, pending_props.clone(), key, debug_name);
                let wip_id = self.fibers.insert(new_fiber);
                self.fibers[wip_id].alternate = Some(current);
                self.fibers[current].alternate = Some(wip_id);
                wip_id
            }
        };

        let (child, ref_name, parent) = {
            let cur = &self.fibers[current];
            (cur.child, cur.ref_name.clone(), cur.parent)
        };
        // `stateNode` moves forward from `current` to the wip buffer (spec.md
        // §4.2: "The WIP copies ... stateNode ... from current"). It is
        // moved rather than cloned since `StateNode::Class` holds a
        // non-`Clone` `Box<dyn AnyClassInstance>`; `current` is left with
        // `StateNode::None` until the buffers swap back on its next turn as
        // wip, at which point this same move happens in the other direction.
        let state_node = std::mem::replace(&mut self.fibers[current].state_node, StateNode::None);
        let wip = &mut self.fibers[wip_id];
        wip.pending_props = Some(pending_props);
        // The hook list is rebuilt fresh each render by `RenderContext`,
        // seeded from `current`'s list (read, never copied) and written
        // back onto this fiber once rendering finishes successfully; see
        // `reconciler::begin_work`.
        wip.state_node = state_node;
        wip.child = child;
        wip.ref_name = ref_name;
        wip.parent = parent;
        wip.flags = FiberFlags::NONE;
        wip.deletions.clear();
        wip_id
    }

    /// Commits `pending_props` into `props` and clears it, called once a
    /// fiber's WIP render has completed successfully.
    pub fn commit_pending_props(&mut self, id: FiberId) {
        if let Some(fiber) = self.fibers.get_mut(id) {
            if let Some(pending) = fiber.pending_props.take() {
                fiber.props = pending;
            }
        }
    }

    /// Depth-first pre-order traversal starting at `root`, calling
    /// `visit(id)` before descending into children (spec.md §4.2
    /// "Traversal helpers are depth-first (pre- and post-order variants)").
    pub fn walk_pre_order(&self, root: FiberId, mut visit: impl FnMut(FiberId)) {
        fn go(arena: &Arena, id: FiberId, visit: &mut impl FnMut(FiberId)) {
            visit(id);
            let mut child = arena.get(id).and_then(|f| f.child);
            while let Some(c) = child {
                go(arena, c, visit);
                child = arena.get(c).and_then(|f| f.sibling);
            }
        }
        go(self, root, &mut visit);
    }

    /// Depth-first post-order traversal (children visited before the node
    /// itself), used for unmount (spec.md §4.5 "Unmount effects run during
    /// fiber unmount in depth-first order").
    pub fn walk_post_order(&self, root: FiberId, mut visit: impl FnMut(FiberId)) {
        fn go(arena: &Arena, id: FiberId, visit: &mut impl FnMut(FiberId)) {
            let mut child = arena.get(id).and_then(|f| f.child);
            while let Some(c) = child {
                go(arena, c, visit);
                child = arena.get(c).and_then(|f| f.sibling);
            }
            visit(id);
        }
        go(self, root, &mut visit);
    }

    pub fn children_of(&self, id: FiberId) -> Vec<FiberId> {
        let mut out = Vec::new();
        let mut child = self.get(id).and_then(|f| f.child);
        while let Some(c) = child {
            out.push(c);
            child = self.get(c).and_then(|f| f.sibling);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{Element, ElementType};

    fn host(tag: &str) -> Element {
        Element::new(ElementType::Host(tag.to_string()), Props::default(), None)
    }

    #[test]
    fn create_work_in_progress_reuses_the_same_alternate() {
        let mut arena = Arena::new();
        let current = arena.create_fiber(&host("div"));
        let wip1 = arena.create_work_in_progress(current, Props::default());
        let wip2 = arena.create_work_in_progress(current, Props::default());
        assert_eq!(wip1, wip2);
        assert_eq!(arena.get(wip1).unwrap().alternate, Some(current));
        assert_eq!(arena.get(current).unwrap().alternate, Some(wip1));
    }

    #[test]
    fn pre_order_visits_parent_before_children() {
        let mut arena = Arena::new();
        let root = arena.create_fiber(&host("root"));
        let child_a = arena.create_fiber(&host("a"));
        let child_b = arena.create_fiber(&host("b"));
        arena.get_mut(root).unwrap().child = Some(child_a);
        arena.get_mut(child_a).unwrap().sibling = Some(child_b);

        let mut order = Vec::new();
        arena.walk_pre_order(root, |id| order.push(id));
        assert_eq!(order, vec![root, child_a, child_b]);
    }

    #[test]
    fn post_order_visits_children_before_parent() {
        let mut arena = Arena::new();
        let root = arena.create_fiber(&host("root"));
        let child_a = arena.create_fiber(&host("a"));
        arena.get_mut(root).unwrap().child = Some(child_a);

        let mut order = Vec::new();
        arena.walk_post_order(root, |id| order.push(id));
        assert_eq!(order, vec![child_a, root]);
    }
}
