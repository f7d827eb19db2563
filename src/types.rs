//! Tensor descriptors, element types and the crate error type.

use thiserror::Error;

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    S8,
    U8,
    S32,
    F32,
    F16,
    BF16,
}

impl DType {
    /// Size in bytes per element.
    pub const fn size_bytes(self) -> usize {
        match self {
            Self::S8 | Self::U8 => 1,
            Self::F16 | Self::BF16 => 2,
            Self::S32 | Self::F32 => 4,
        }
    }

    /// Whether the concat kernels can move this type (1- and 4-byte types only).
    pub const fn is_concat_supported(self) -> bool {
        matches!(self.size_bytes(), 1 | 4)
    }
}

/// Memory layout tag of a 4-D activation tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryLayout {
    /// Channel-interleaved: channels vary fastest.
    Nhwc,
    /// Channel-planar.
    Nchw,
}

/// Read-only description of a 4-D tensor: logical dims are always
/// (batch, height, width, channels) regardless of `layout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorDesc {
    pub dtype: DType,
    pub dims: [usize; 4],
    pub layout: MemoryLayout,
}

impl TensorDesc {
    pub const fn new(dtype: DType, dims: [usize; 4], layout: MemoryLayout) -> Self {
        TensorDesc { dtype, dims, layout }
    }

    /// Shorthand for a channel-interleaved tensor.
    pub const fn nhwc(
        dtype: DType,
        batch: usize,
        height: usize,
        width: usize,
        channels: usize,
    ) -> Self {
        TensorDesc::new(dtype, [batch, height, width, channels], MemoryLayout::Nhwc)
    }

    #[inline]
    pub const fn batch(&self) -> usize {
        self.dims[0]
    }

    #[inline]
    pub const fn height(&self) -> usize {
        self.dims[1]
    }

    #[inline]
    pub const fn width(&self) -> usize {
        self.dims[2]
    }

    #[inline]
    pub const fn channels(&self) -> usize {
        self.dims[3]
    }

    /// Number of spatial positions (batch * height * width).
    #[inline]
    pub const fn pixels(&self) -> usize {
        self.dims[0] * self.dims[1] * self.dims[2]
    }

    /// Total element count.
    #[inline]
    pub const fn num_elements(&self) -> usize {
        self.pixels() * self.dims[3]
    }

    /// Total element count, or `None` if it does not fit in `usize`.
    pub fn checked_num_elements(&self) -> Option<usize> {
        if self.dims.contains(&0) {
            return Some(0);
        }
        self.dims.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
    }
}

/// Errors from planning, compiling or executing a concat kernel.
#[derive(Debug, Error)]
pub enum ConcatError {
    #[error("unsupported element type {0:?}: only 1- and 4-byte types can be concatenated")]
    UnsupportedDType(DType),
    #[error("input {index} has layout {got:?}, expected {expected:?}")]
    LayoutMismatch {
        index: usize,
        expected: MemoryLayout,
        got: MemoryLayout,
    },
    #[error("input {index} has element type {got:?}, expected {expected:?}")]
    DTypeMismatch { index: usize, expected: DType, got: DType },
    #[error("no block size in {candidates:?} divides every input channel count")]
    NoValidBlock { candidates: Vec<usize> },
    #[error("input {index} has {channels} channels, not a multiple of block {block}")]
    ChannelsNotDivisible {
        index: usize,
        channels: usize,
        block: usize,
    },
    #[error("vector width of {0} bits is not 128, 256 or 512")]
    IllegalVectorWidth(usize),
    #[error("{0} inputs exceed the generated loop bound")]
    TooManyInputs(usize),
    #[error("buffer element type {got:?} does not match planned {expected:?}")]
    ElementMismatch { expected: DType, got: DType },
    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: String, got: String },
    #[error("compile error: {0}")]
    Compile(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ConcatResult<T> = Result<T, ConcatError>;
