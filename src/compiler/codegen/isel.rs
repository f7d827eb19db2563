//! Instruction selection for the concat block body.
//!
//! The (vector width × element type) fan-out is resolved once per
//! `KernelConfig` into an [`InstrSelection`]; the emitter then runs the same
//! load → clamp → store sequence for every block without re-branching.

use crate::dispatch::IsaLevel;
use crate::types::DType;

/// Vector register tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VecWidth {
    Xmm,
    Ymm,
    Zmm,
}

impl VecWidth {
    /// Tier for a vector width in bits.
    ///
    /// # Panics
    /// For anything other than 128, 256 or 512: the planner never produces
    /// such a width, so reaching here is a bug.
    pub fn from_bits(bits: usize) -> Self {
        match bits {
            128 => VecWidth::Xmm,
            256 => VecWidth::Ymm,
            512 => VecWidth::Zmm,
            _ => unreachable!("error bits size {bits}"),
        }
    }

    pub const fn bits(self) -> usize {
        match self {
            VecWidth::Xmm => 128,
            VecWidth::Ymm => 256,
            VecWidth::Zmm => 512,
        }
    }
}

/// Elementwise max against zero used for the fused ReLU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClampOp {
    /// `vpmaxsb`: signed byte max. Also used for `U8`, which is only
    /// correct while every value is below 128.
    MaxI8,
    /// `vpmaxsd`: signed dword max.
    MaxI32,
    /// `vmaxps zero, src`: a NaN source is passed through.
    MaxF32,
}

impl ClampOp {
    pub fn for_dtype(dtype: DType) -> Self {
        match dtype {
            DType::S8 | DType::U8 => ClampOp::MaxI8,
            DType::S32 => ClampOp::MaxI32,
            DType::F32 => ClampOp::MaxF32,
            DType::F16 | DType::BF16 => unreachable!("no concat clamp for {dtype:?}"),
        }
    }
}

/// Load/clamp/store selection for one configuration. Loads and stores are
/// always unaligned `vmovups` of the selected tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstrSelection {
    pub width: VecWidth,
    /// `None` when ReLU is not fused.
    pub clamp: Option<ClampOp>,
}

impl InstrSelection {
    /// Minimum ISA level able to execute the selected instructions.
    pub fn required_isa(&self) -> IsaLevel {
        match self.width {
            VecWidth::Xmm | VecWidth::Ymm => IsaLevel::Avx2,
            VecWidth::Zmm => IsaLevel::Avx512,
        }
    }
}

/// Resolve the selection table for `(bits_size, dtype, with_relu)`.
pub fn select(bits_size: usize, dtype: DType, with_relu: bool) -> InstrSelection {
    InstrSelection {
        width: VecWidth::from_bits(bits_size),
        clamp: with_relu.then(|| ClampOp::for_dtype(dtype)),
    }
}
