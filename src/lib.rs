//! gllm-concat: JIT-specialized channel concat kernels for NHWC tensors.
//!
//! Concatenating activations along the channel axis is a pure memory copy,
//! but its shape is only known at graph-build time. This crate inspects the
//! concrete shapes and element type once, picks the widest channel block
//! that divides every input, and emits a tight x86_64 routine (with ReLU
//! optionally fused into the copy) that is then reused for every call.
//!
//! - **Planner** ([`compiler::planner`]): validates descriptors, selects the
//!   block and vector width (128/256/512 bits).
//! - **Generator** ([`compiler::codegen`]): emits the routine with iced-x86.
//! - **Driver** ([`ops::ConcatOp`]): safe per-pixel invocation with a scalar
//!   reference fallback.
//!
//! # Quick Start
//!
//! ```ignore
//! use gllm_concat::{ConcatCompiler, ConcatOp, DType, TensorDesc};
//!
//! let mut compiler = ConcatCompiler::new();
//! let a = TensorDesc::nhwc(DType::F32, 1, 8, 8, 16);
//! let b = TensorDesc::nhwc(DType::F32, 1, 8, 8, 32);
//! let out = TensorDesc::nhwc(DType::F32, 1, 8, 8, 48);
//! let op = ConcatOp::new(&mut compiler, &[a, b], &out, true)?;
//! op.execute(&[&src_a, &src_b], &mut dst)?;
//! ```

pub mod compiler;
pub mod dispatch;
pub mod ops;
pub mod types;

pub use compiler::{
    plan, plan_with_limit, CompiledConcat, CompilerOptions, ConcatCallArgs, ConcatCompiler,
    KernelConfig,
};
pub use dispatch::{device_profile, DeviceProfile, IsaLevel};
pub use ops::{concat_nhwc_reference, ConcatOp, Element};
pub use types::{ConcatError, ConcatResult, DType, MemoryLayout, TensorDesc};
