//! Stable, non-owning identity for fibers.
//!
//! The Design Notes call for modeling the fiber tree's `parent` back-edge as
//! a non-owning handle into an arena keyed by fiber id, rather than a
//! reference-counted or garbage-collected pointer. `slotmap` gives us exactly
//! that: a generational key that is cheap to copy, safe to keep around after
//! its slot is freed (lookups just fail), and doesn't require `unsafe`.

use slotmap::new_key_type;

new_key_type! {
    /// Identity of a fiber within a [`crate::fiber::Arena`]. Two fibers
    /// never compare equal even if one is reused after the other's slot is
    /// freed, because `slotmap` keys carry a generation counter.
    pub struct FiberId;
}
