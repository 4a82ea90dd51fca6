//! Compiler configuration, per the Design Notes' open configuration surface.

use crate::content::ContentRenderer;
use std::{fmt, sync::Arc};

/// Predicate used to recognize a `props.children` value as a content block
/// rather than an element/string/array, overriding the default structural
/// check (`serde_json::Value` carrying a `type` field drawn from the closed
/// content-block set).
pub type ContentBlockPredicate = Arc<dyn Fn(&serde_json::Value) -> bool + Send + Sync>;

/// Compiler-wide configuration, supplied once when constructing a
/// [`crate::compiler::Compiler`].
#[derive(Clone)]
pub struct Config {
    /// Enables development-mode warnings: hook dependency-array length
    /// changes across renders, recompile requests during a skipped phase,
    /// forced-stable stabilization, and similar non-fatal diagnostics.
    pub dev: bool,
    /// Upper bound on `compileUntilStable`'s iteration count (spec.md §4.8).
    pub max_compile_iterations: u32,
    /// Whether effect `create`/`destroy` closures may be awaited. When
    /// `false`, effect closures must resolve synchronously; attempting to
    /// await inside one is a logic error in the embedding engine, not this
    /// crate's concern to detect.
    pub async_effects: bool,
    /// The renderer pushed onto the collector's renderer stack before
    /// walking the committed tree (spec.md §4.7).
    pub default_renderer: Arc<dyn ContentRenderer>,
    /// Overrides the default content-block recognition predicate.
    pub is_content_block: Option<ContentBlockPredicate>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("dev", &self.dev)
            .field("max_compile_iterations", &self.max_compile_iterations)
            .field("async_effects", &self.async_effects)
            .field("is_content_block", &self.is_content_block.is_some())
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dev: false,
            max_compile_iterations: 10,
            async_effects: true,
            default_renderer: Arc::new(crate::content::PassthroughRenderer),
            is_content_block: None,
        }
    }
}

impl Config {
    /// Builder-style toggle for development warnings.
    pub fn with_dev(mut self, dev: bool) -> Self {
        self.dev = dev;
        self
    }

    /// Builder-style override of the stabilization bound.
    pub fn with_max_compile_iterations(mut self, n: u32) -> Self {
        self.max_compile_iterations = n;
        self
    }

    /// Builder-style override of whether effects may be awaited.
    pub fn with_async_effects(mut self, enabled: bool) -> Self {
        self.async_effects = enabled;
        self
    }

    /// Builder-style override of the default renderer.
    pub fn with_default_renderer(mut self, renderer: Arc<dyn ContentRenderer>) -> Self {
        self.default_renderer = renderer;
        self
    }

    /// Builder-style override of content-block recognition.
    pub fn with_is_content_block(mut self, pred: ContentBlockPredicate) -> Self {
        self.is_content_block = Some(pred);
        self
    }

    pub(crate) fn recognizes_content_block(&self, value: &serde_json::Value) -> bool {
        if let Some(pred) = &self.is_content_block {
            return pred(value);
        }
        crate::content::is_default_content_block(value)
    }
}
