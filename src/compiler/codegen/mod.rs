//! Code generation trait and dispatch.
//!
//! The `ConcatCodegen` trait defines the interface for architecture-specific
//! code generators. Each target implements it to emit the machine code of one
//! specialized concat routine from a planned `KernelConfig`.

pub mod isel;
#[cfg(feature = "jit-x86")]
pub mod x86_64;

use crate::compiler::planner::KernelConfig;
use crate::dispatch::IsaLevel;
use crate::types::{ConcatError, ConcatResult};

/// Output of code generation: raw machine code bytes.
#[derive(Debug, Clone)]
pub struct CodegenOutput {
    pub code: Vec<u8>,
}

/// Trait for architecture-specific code generators.
pub trait ConcatCodegen: Send + Sync {
    /// Generate machine code for one concat configuration.
    ///
    /// Fails only on assembler errors or when the configuration needs a
    /// wider ISA than this generator targets.
    fn generate(&self, config: &KernelConfig) -> ConcatResult<CodegenOutput>;

    /// Target ISA level.
    fn isa_level(&self) -> IsaLevel;
}

/// Select the codegen backend for an ISA level.
pub fn select_codegen(isa: IsaLevel) -> ConcatResult<Box<dyn ConcatCodegen>> {
    match isa {
        #[cfg(feature = "jit-x86")]
        IsaLevel::Avx2 | IsaLevel::Avx512 => Ok(Box::new(x86_64::X86_64Codegen::new(isa))),
        _ => Err(ConcatError::Unsupported(format!(
            "no concat codegen backend for ISA level {isa:?}"
        ))),
    }
}
