//! Concat planner: validates tensor descriptors and picks the channel block.
//!
//! The planner decides every parameter the generated routine depends on:
//! element size, channel block and vector width. The codegen phase bakes
//! them in as immediates, so at runtime the routine makes no decisions.

use crate::types::{ConcatError, ConcatResult, DType, MemoryLayout, TensorDesc};

/// Vector register widths the generator can target.
pub const LEGAL_VECTOR_BITS: [usize; 3] = [128, 256, 512];

const BLOCKS_1BYTE: [usize; 3] = [64, 32, 16];
const BLOCKS_4BYTE: [usize; 3] = [16, 8, 4];

/// Immutable configuration of one specialized concat routine.
///
/// Two configs that compare equal produce behaviourally identical code,
/// so the config doubles as the compilation cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelConfig {
    pub n_inputs: usize,
    pub with_relu: bool,
    pub dtype: DType,
    pub type_size: usize,
    /// Channels moved per vector operation.
    pub block: usize,
    /// `8 * type_size * block`, one of [`LEGAL_VECTOR_BITS`].
    pub bits_size: usize,
    // Output dims: not read by the generated code, which relies on the
    // per-input block counts passed at call time.
    pub batch: usize,
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl KernelConfig {
    /// Bytes copied per block (the stride both cursors advance by).
    #[inline]
    pub const fn block_bytes(&self) -> usize {
        self.block * self.type_size
    }

    /// Block count of an input with `channels` channels.
    #[inline]
    pub const fn blocks_for(&self, channels: usize) -> usize {
        channels / self.block
    }
}

/// Candidate blocks for an element size, largest first.
///
/// # Panics
/// If `type_size` is not 1 or 4; callers check the element type first.
pub fn candidate_blocks(type_size: usize) -> &'static [usize] {
    match type_size {
        1 => &BLOCKS_1BYTE,
        4 => &BLOCKS_4BYTE,
        _ => panic!("no concat blocks for {type_size}-byte elements"),
    }
}

/// Plan a concat of `inputs` into `output`, allowing every vector width.
pub fn plan(
    inputs: &[TensorDesc],
    output: &TensorDesc,
    with_relu: bool,
) -> ConcatResult<KernelConfig> {
    plan_with_limit(inputs, output, with_relu, 512)
}

/// Plan a concat, skipping block sizes whose vector width exceeds `max_bits`.
///
/// The largest remaining block that divides every input's channel count wins.
///
/// # Panics
/// If `output` is not channel-interleaved: that is a caller contract
/// violation, not bad input data.
pub fn plan_with_limit(
    inputs: &[TensorDesc],
    output: &TensorDesc,
    with_relu: bool,
    max_bits: usize,
) -> ConcatResult<KernelConfig> {
    let dtype = output.dtype;
    if !dtype.is_concat_supported() {
        return Err(ConcatError::UnsupportedDType(dtype));
    }
    assert_eq!(
        output.layout,
        MemoryLayout::Nhwc,
        "concat output must be channel-interleaved"
    );
    if inputs.len() > i32::MAX as usize {
        return Err(ConcatError::TooManyInputs(inputs.len()));
    }

    let type_size = dtype.size_bytes();
    let candidates: Vec<usize> = candidate_blocks(type_size)
        .iter()
        .copied()
        .filter(|&b| 8 * type_size * b <= max_bits)
        .collect();
    if candidates.is_empty() {
        return Err(ConcatError::Unsupported(format!(
            "a {max_bits}-bit vector cap leaves no block for {dtype:?}"
        )));
    }

    let block = candidates
        .iter()
        .copied()
        .find(|&b| inputs.iter().all(|t| t.channels() % b == 0))
        .ok_or_else(|| ConcatError::NoValidBlock { candidates: candidates.clone() })?;

    for (index, t) in inputs.iter().enumerate() {
        if t.layout != MemoryLayout::Nhwc {
            return Err(ConcatError::LayoutMismatch {
                index,
                expected: MemoryLayout::Nhwc,
                got: t.layout,
            });
        }
        if t.dtype != dtype {
            return Err(ConcatError::DTypeMismatch { index, expected: dtype, got: t.dtype });
        }
        if t.channels() % block != 0 {
            return Err(ConcatError::ChannelsNotDivisible {
                index,
                channels: t.channels(),
                block,
            });
        }
    }

    let bits_size = 8 * type_size * block;
    if !LEGAL_VECTOR_BITS.contains(&bits_size) {
        return Err(ConcatError::IllegalVectorWidth(bits_size));
    }

    log::debug!(
        "concat plan: {} inputs {:?} block={} bits={} relu={}",
        inputs.len(),
        dtype,
        block,
        bits_size,
        with_relu
    );

    Ok(KernelConfig {
        n_inputs: inputs.len(),
        with_relu,
        dtype,
        type_size,
        block,
        bits_size,
        batch: output.batch(),
        height: output.height(),
        width: output.width(),
        channels: output.channels(),
    })
}
