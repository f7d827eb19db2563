//! Compilation cache: one executable routine per distinct `KernelConfig`.
//!
//! Keys are compared by value: two plans with the same shapes, element type
//! and relu flag share the same mapped code.
//!
//! The key is the whole `KernelConfig`, output dims included, so that
//! `CompiledConcat::config` describes the exact op it was compiled for. The
//! generator never reads those dims: ops that differ only in batch, height
//! or width get separate entries holding byte-identical code.

use std::collections::HashMap;
use std::sync::Arc;

use crate::compiler::executable::CompiledConcat;
use crate::compiler::planner::KernelConfig;

/// In-memory compilation cache.
#[derive(Default)]
pub struct CompilationCache {
    entries: HashMap<KernelConfig, Arc<CompiledConcat>>,
    hits: u64,
    misses: u64,
}

impl CompilationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a compiled routine, counting the hit or miss.
    pub fn get(&mut self, config: &KernelConfig) -> Option<Arc<CompiledConcat>> {
        match self.entries.get(config) {
            Some(entry) => {
                self.hits += 1;
                Some(Arc::clone(entry))
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Store a compiled routine, returning the shared handle.
    pub fn put(&mut self, compiled: CompiledConcat) -> Arc<CompiledConcat> {
        let config = *compiled.config();
        let entry = Arc::new(compiled);
        self.entries.insert(config, Arc::clone(&entry));
        entry
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// (hits, misses) since creation or the last `clear`.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    /// Drop every cached routine. Handles already given out stay valid.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.hits = 0;
        self.misses = 0;
    }
}
