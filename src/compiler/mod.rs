//! Concat compiler: plans, generates and caches specialized routines.
//!
//! # Pipeline
//!
//! ```text
//! TensorDesc[] → KernelConfig → InstrSelection → machine code → CompiledConcat
//!                    ↑               ↑               ↑
//!                planner.rs     codegen/isel.rs  codegen/x86_64.rs
//! ```
//!
//! Planning runs once per distinct (shapes, dtype, relu) combination and
//! codegen once per distinct `KernelConfig`; the routine is then called any
//! number of times.

pub mod cache;
pub mod codegen;
pub mod executable;
pub mod options;
pub mod planner;

pub use cache::CompilationCache;
pub use codegen::{select_codegen, CodegenOutput, ConcatCodegen};
pub use executable::{CompiledConcat, ConcatCallArgs, ConcatKernelFn};
pub use options::CompilerOptions;
pub use planner::{plan, plan_with_limit, KernelConfig};

use std::sync::Arc;

use crate::dispatch::{device_profile, DeviceProfile};
use crate::types::{ConcatError, ConcatResult, TensorDesc};

/// The concat compiler: holds the hardware profile, options and cache.
///
/// Typically created once and shared by every concat in a graph.
pub struct ConcatCompiler {
    profile: DeviceProfile,
    options: CompilerOptions,
    cache: CompilationCache,
}

impl ConcatCompiler {
    /// Create a compiler for the detected host, configured from the environment.
    pub fn new() -> Self {
        Self::with_profile(*device_profile(), CompilerOptions::from_env())
    }

    /// Create a compiler with a specific profile and options (for testing).
    pub fn with_profile(profile: DeviceProfile, options: CompilerOptions) -> Self {
        ConcatCompiler {
            profile,
            options,
            cache: CompilationCache::new(),
        }
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    /// Widest vector the generated code may use.
    pub fn max_vector_bits(&self) -> usize {
        self.profile.max_vector_bits().min(self.options.max_vector_bits)
    }

    /// Whether compiled routines can run in this process.
    ///
    /// An injected profile above the detected host never enables execution.
    pub fn jit_available(&self) -> bool {
        self.runs_on(device_profile())
    }

    fn runs_on(&self, host: &DeviceProfile) -> bool {
        self.options.enable_jit && self.profile.can_execute_jit() && self.profile.isa <= host.isa
    }

    /// Plan within the width this compiler can target.
    pub fn plan(
        &self,
        inputs: &[TensorDesc],
        output: &TensorDesc,
        with_relu: bool,
    ) -> ConcatResult<KernelConfig> {
        plan_with_limit(inputs, output, with_relu, self.max_vector_bits())
    }

    /// Plan and compile, reusing cached code when the config was seen before.
    pub fn compile(
        &mut self,
        inputs: &[TensorDesc],
        output: &TensorDesc,
        with_relu: bool,
    ) -> ConcatResult<Arc<CompiledConcat>> {
        let config = self.plan(inputs, output, with_relu)?;
        self.compile_config(&config)
    }

    /// Compile an already-planned configuration.
    pub fn compile_config(&mut self, config: &KernelConfig) -> ConcatResult<Arc<CompiledConcat>> {
        if !self.options.enable_jit {
            return Err(ConcatError::Unsupported("concat JIT disabled".into()));
        }
        if let Some(cached) = self.cache.get(config) {
            log::debug!("concat cache hit: {config:?}");
            return Ok(cached);
        }

        let codegen = select_codegen(self.profile.isa)?;
        let output = codegen.generate(config)?;
        let compiled = CompiledConcat::from_code(&output.code, *config)?;
        Ok(self.cache.put(compiled))
    }

    /// Number of cached routines.
    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }

    /// (hits, misses) of the routine cache.
    pub fn cache_stats(&self) -> (u64, u64) {
        self.cache.stats()
    }

    /// Clear the compilation cache.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }
}

impl Default for ConcatCompiler {
    fn default() -> Self {
        Self::new()
    }
}
