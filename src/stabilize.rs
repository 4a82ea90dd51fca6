//! The stabilization loop (spec.md §4.8): re-runs `compile` while a
//! recompile keeps being requested, bounded by `maxIterations`.
//!
//! A re-render loop (compile, notify, check for a requested follow-up,
//! repeat) with an explicit iteration cap and `forcedStable`/
//! `recompileReasons` bookkeeping (spec.md §4.8).

use crate::{
    collector::CompiledStructure,
    compiler::{Compiler, TickState},
    element::Element,
    error::CompileError,
    lifecycle::AfterCompileCtx,
};

/// `compileUntilStable`'s return shape (spec.md §6).
#[derive(Debug)]
pub struct StabilizationResult {
    pub compiled: CompiledStructure,
    pub iterations: u32,
    pub forced_stable: bool,
    pub recompile_reasons: Vec<String>,
}

/// `compileUntilStable(element, state, { maxIterations })` (spec.md §4.8).
/// `max_iterations` overrides `compiler.config().max_compile_iterations`
/// when given, matching the engine-facing API's optional `maxIterations`.
pub fn compile_until_stable(
    compiler: &mut Compiler,
    element: &Element,
    tick: &TickState,
    max_iterations: Option<u32>,
) -> Result<StabilizationResult, CompileError> {
    let max_iterations = max_iterations.unwrap_or(compiler.config().max_compile_iterations);
    let mut iterations = 0u32;
    let mut reasons = Vec::new();
    let mut compiled;

    loop {
        compiler.reset_recompile_request();
        compiled = compiler.compile(element, tick)?;

        compiler.notify_after_compile(&compiled, AfterCompileCtx { iteration: iterations, max_iterations });

        let requested = compiler.was_recompile_requested();
        for reason in compiler.take_recompile_reasons() {
            reasons.push(format!("[iteration {}] {}", iterations, reason));
        }

        iterations += 1;
        if !requested {
            break;
        }
        if iterations >= max_iterations {
            tracing::warn!(iterations, ?reasons, "compileUntilStable forced stable at max_iterations");
            return Ok(StabilizationResult { compiled, iterations, forced_stable: true, recompile_reasons: reasons });
        }
    }

    Ok(StabilizationResult { compiled, iterations, forced_stable: false, recompile_reasons: reasons })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        component::AnyClassInstance,
        config::Config,
        element::{ElementType, Props},
        testing::InMemoryCom,
    };
    use futures::future::LocalBoxFuture;
    use std::{cell::Cell, rc::Rc};

    /// A class component that requests a recompile from `onAfterCompile`,
    /// but only on the first call (scenario 5, spec.md §8).
    struct RecompileOnce {
        requested: Rc<Cell<bool>>,
    }

    impl AnyClassInstance for RecompileOnce {
        fn set_props(&mut self, _props: Props) {}

        fn render<'a>(
            &'a mut self,
            _com: &'a dyn crate::com::Com,
            _tick: &'a TickState,
        ) -> LocalBoxFuture<'a, Result<crate::element::Children, anyhow::Error>> {
            Box::pin(async { Ok(crate::element::Children::Empty) })
        }

        fn on_after_compile<'a>(
            &'a mut self,
            _compiled: &'a CompiledStructure,
            ctx: AfterCompileCtx,
        ) -> LocalBoxFuture<'a, Result<(), anyhow::Error>> {
            Box::pin(async move {
                if ctx.iteration == 0 && !self.requested.get() {
                    self.requested.set(true);
                    if let Some(active) = crate::active::current() {
                        active.request_recompile("first iteration only");
                    }
                }
                Ok(())
            })
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    }

    #[test]
    fn stabilizes_after_a_single_requested_recompile() {
        let com = InMemoryCom::new();
        let mut compiler = Compiler::new(com, Config::default());
        let requested = Rc::new(Cell::new(false));
        let element = Element::new(
            ElementType::Class(Rc::new(crate::component::ClassComponent::<RecompileOnce>::new("RecompileOnce", {
                let requested = requested.clone();
                move |_props| Box::new(RecompileOnce { requested: requested.clone() })
            }))),
            Props::default(),
            None,
        );

        let result = compile_until_stable(&mut compiler, &element, &TickState::new(), None).unwrap();
        assert_eq!(result.iterations, 2);
        assert!(!result.forced_stable);
        assert_eq!(result.recompile_reasons.len(), 1);
    }

    #[test]
    fn forces_stable_at_max_iterations() {
        struct AlwaysRecompile;
        impl AnyClassInstance for AlwaysRecompile {
            fn set_props(&mut self, _props: Props) {}
            fn render<'a>(
                &'a mut self,
                _com: &'a dyn crate::com::Com,
                _tick: &'a TickState,
            ) -> LocalBoxFuture<'a, Result<crate::element::Children, anyhow::Error>> {
                Box::pin(async { Ok(crate::element::Children::Empty) })
            }
            fn on_after_compile<'a>(
                &'a mut self,
                _compiled: &'a CompiledStructure,
                _ctx: AfterCompileCtx,
            ) -> LocalBoxFuture<'a, Result<(), anyhow::Error>> {
                Box::pin(async {
                    if let Some(active) = crate::active::current() {
                        active.request_recompile("always");
                    }
                    Ok(())
                })
            }
            fn as_any(&self) -> &dyn std::any::Any {
                self
            }
            fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
                self
            }
        }

        let com = InMemoryCom::new();
        let mut compiler = Compiler::new(com, Config::default().with_max_compile_iterations(3));
        let element = Element::new(
            ElementType::Class(Rc::new(crate::component::ClassComponent::<AlwaysRecompile>::new(
                "AlwaysRecompile",
                |_props| Box::new(AlwaysRecompile),
            ))),
            Props::default(),
            None,
        );

        let result = compile_until_stable(&mut compiler, &element, &TickState::new(), None).unwrap();
        assert_eq!(result.iterations, 3);
        assert!(result.forced_stable);
        assert_eq!(result.recompile_reasons.len(), 3);
    }
}
