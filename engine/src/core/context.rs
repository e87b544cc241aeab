//! Shared evaluation context.
//!
//! Holds the process-wide, read-mostly caches the engine consults during
//! evaluation. Passed explicitly into every run instead of living as global
//! state so tests stay isolated.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;

use crate::core::property::{Accessor, PropertyKey};

/// Evaluation context shared across a run (and across parallel source
/// workers in a batch).
///
/// The accessor cache is insert-once per key and never mutated afterward,
/// which makes concurrent reads from parallel workers safe.
#[derive(Debug, Default)]
pub struct EvalContext {
    accessors: DashMap<PropertyKey, Arc<Accessor>>,
    compiles: AtomicUsize,
}

impl EvalContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of accessors compiled so far. An accessor is compiled at most
    /// once per property key.
    pub fn compile_count(&self) -> usize {
        self.compiles.load(Ordering::Relaxed)
    }

    pub(crate) fn accessor_for(
        &self,
        key: &PropertyKey,
        build: impl FnOnce() -> Accessor,
    ) -> Arc<Accessor> {
        if let Some(found) = self.accessors.get(key) {
            return Arc::clone(found.value());
        }
        let entry = self.accessors.entry(key.clone()).or_insert_with(|| {
            self.compiles.fetch_add(1, Ordering::Relaxed);
            Arc::new(build())
        });
        Arc::clone(entry.value())
    }
}
