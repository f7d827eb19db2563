//! Channel-wise concat of NHWC tensors with optional fused ReLU.
//!
//! `ConcatOp` is the safe entry point: it validates descriptors and buffer
//! lengths once, then drives the generated routine one spatial position at
//! a time (each call copies every input's channels for that position into
//! the output row). When no routine can be generated or run it falls back to
//! [`concat_nhwc_reference`].

use std::sync::Arc;

use rayon::prelude::*;

use crate::compiler::{CompiledConcat, ConcatCallArgs, ConcatCompiler, KernelConfig};
use crate::types::{ConcatError, ConcatResult, DType, MemoryLayout, TensorDesc};

/// Element types a concat can move.
pub trait Element: Copy + Send + Sync + 'static {
    const DTYPE: DType;

    /// Clamp matching the generated code's max-against-zero.
    fn relu(self) -> Self;
}

impl Element for f32 {
    const DTYPE: DType = DType::F32;

    /// `max(0, x)` with `x` returned when unordered, so NaN and -0.0 pass through.
    #[inline(always)]
    fn relu(self) -> Self {
        if 0.0 > self {
            0.0
        } else {
            self
        }
    }
}

impl Element for i32 {
    const DTYPE: DType = DType::S32;

    #[inline(always)]
    fn relu(self) -> Self {
        self.max(0)
    }
}

impl Element for i8 {
    const DTYPE: DType = DType::S8;

    #[inline(always)]
    fn relu(self) -> Self {
        self.max(0)
    }
}

impl Element for u8 {
    const DTYPE: DType = DType::U8;

    /// Signed byte max: values >= 128 read as negative and clamp to 0.
    #[inline(always)]
    fn relu(self) -> Self {
        if (self as i8) < 0 {
            0
        } else {
            self
        }
    }
}

enum ConcatKernel {
    Jit {
        compiled: Arc<CompiledConcat>,
        nb_ic: Vec<i32>,
    },
    Reference,
}

/// A planned concat of fixed input/output descriptors.
pub struct ConcatOp {
    inputs: Vec<TensorDesc>,
    channels: Vec<usize>,
    output: TensorDesc,
    with_relu: bool,
    parallel_min_pixels: usize,
    kernel: ConcatKernel,
}

impl ConcatOp {
    /// Validate the descriptors and compile (or fetch) the routine.
    ///
    /// Falls back to the reference path when the host cannot run generated
    /// code or no block size fits every input; other planner errors are
    /// returned.
    pub fn new(
        compiler: &mut ConcatCompiler,
        inputs: &[TensorDesc],
        output: &TensorDesc,
        with_relu: bool,
    ) -> ConcatResult<Self> {
        validate_shapes(inputs, output)?;

        let kernel = if compiler.jit_available() {
            match compiler.compile(inputs, output, with_relu) {
                Ok(compiled) => {
                    let nb_ic = block_counts(inputs, compiled.config())?;
                    ConcatKernel::Jit { compiled, nb_ic }
                }
                Err(e @ (ConcatError::NoValidBlock { .. } | ConcatError::Unsupported(_))) => {
                    log::warn!("concat fallback to reference path: {e}");
                    ConcatKernel::Reference
                }
                Err(e) => return Err(e),
            }
        } else {
            log::debug!("concat JIT unavailable on {}, using reference path", compiler.profile());
            ConcatKernel::Reference
        };

        Ok(ConcatOp {
            inputs: inputs.to_vec(),
            channels: inputs.iter().map(TensorDesc::channels).collect(),
            output: *output,
            with_relu,
            parallel_min_pixels: compiler.options().parallel_min_pixels,
            kernel,
        })
    }

    /// Whether calls run generated code.
    pub fn is_jit(&self) -> bool {
        matches!(self.kernel, ConcatKernel::Jit { .. })
    }

    /// Configuration of the generated routine, if any.
    pub fn config(&self) -> Option<&KernelConfig> {
        match &self.kernel {
            ConcatKernel::Jit { compiled, .. } => Some(compiled.config()),
            ConcatKernel::Reference => None,
        }
    }

    pub fn output(&self) -> &TensorDesc {
        &self.output
    }

    /// Concatenate `srcs` (in planning order) into `dst` along channels.
    pub fn execute<T: Element>(&self, srcs: &[&[T]], dst: &mut [T]) -> ConcatResult<()> {
        self.check_buffers(srcs, dst)?;

        let c_out = self.output.channels();
        let pixels = self.output.pixels();
        if c_out == 0 || pixels == 0 {
            return Ok(());
        }

        if pixels < self.parallel_min_pixels {
            self.run_pixels(srcs, dst, 0);
            return Ok(());
        }

        let per_task = pixels.div_ceil(rayon::current_num_threads() * 4).max(1);
        dst.par_chunks_mut(per_task * c_out)
            .enumerate()
            .for_each(|(task, chunk)| self.run_pixels(srcs, chunk, task * per_task));
        Ok(())
    }

    fn check_buffers<T: Element>(&self, srcs: &[&[T]], dst: &[T]) -> ConcatResult<()> {
        if T::DTYPE != self.output.dtype {
            return Err(ConcatError::ElementMismatch {
                expected: self.output.dtype,
                got: T::DTYPE,
            });
        }
        if srcs.len() != self.inputs.len() {
            return Err(ConcatError::ShapeMismatch {
                expected: format!("{} source buffers", self.inputs.len()),
                got: format!("{}", srcs.len()),
            });
        }
        for (index, (src, desc)) in srcs.iter().zip(&self.inputs).enumerate() {
            if src.len() != desc.num_elements() {
                return Err(ConcatError::ShapeMismatch {
                    expected: format!("input {index} of {} elements", desc.num_elements()),
                    got: format!("{}", src.len()),
                });
            }
        }
        if dst.len() != self.output.num_elements() {
            return Err(ConcatError::ShapeMismatch {
                expected: format!("output of {} elements", self.output.num_elements()),
                got: format!("{}", dst.len()),
            });
        }
        Ok(())
    }

    /// Fill whole output rows of `dst`, the first being spatial position `first_pixel`.
    fn run_pixels<T: Element>(&self, srcs: &[&[T]], dst: &mut [T], first_pixel: usize) {
        match &self.kernel {
            ConcatKernel::Jit { compiled, nb_ic } => {
                run_jit_pixels(compiled, nb_ic, &self.channels, srcs, dst, first_pixel)
            }
            ConcatKernel::Reference => {
                reference_pixels(srcs, &self.channels, dst, first_pixel, self.with_relu)
            }
        }
    }
}

fn run_jit_pixels<T: Element>(
    compiled: &CompiledConcat,
    nb_ic: &[i32],
    channels: &[usize],
    srcs: &[&[T]],
    dst: &mut [T],
    first_pixel: usize,
) {
    let c_out: usize = channels.iter().sum();
    let mut src_ptrs: Vec<*const u8> = vec![std::ptr::null(); srcs.len()];
    for (k, row) in dst.chunks_exact_mut(c_out).enumerate() {
        let p = first_pixel + k;
        for ((ptr, src), &c) in src_ptrs.iter_mut().zip(srcs).zip(channels) {
            *ptr = src[p * c..(p + 1) * c].as_ptr().cast();
        }
        let args = ConcatCallArgs {
            src: src_ptrs.as_ptr(),
            nb_ic: nb_ic.as_ptr(),
            dst: row.as_mut_ptr().cast(),
        };
        // SAFETY: one pointer and one block count per planned input; each
        // source row holds nb_ic[i] * block elements and `row` holds their
        // sum. `ConcatOp::new` only keeps a routine when
        // `ConcatCompiler::jit_available` confirmed the detected host runs
        // the profile's ISA.
        unsafe { compiled.call(&args) };
    }
}

fn reference_pixels<T: Element>(
    srcs: &[&[T]],
    channels: &[usize],
    dst: &mut [T],
    first_pixel: usize,
    with_relu: bool,
) {
    let c_out: usize = channels.iter().sum();
    for (k, row) in dst.chunks_exact_mut(c_out).enumerate() {
        let p = first_pixel + k;
        let mut offset = 0;
        for (src, &c) in srcs.iter().zip(channels) {
            let from = &src[p * c..(p + 1) * c];
            let to = &mut row[offset..offset + c];
            if with_relu {
                for (d, &s) in to.iter_mut().zip(from) {
                    *d = s.relu();
                }
            } else {
                to.copy_from_slice(from);
            }
            offset += c;
        }
    }
}

/// Scalar NHWC concat: `dst` holds `dst.len() / sum(channels)` rows, each the
/// concatenation of the matching row of every source.
pub fn concat_nhwc_reference<T: Element>(
    srcs: &[&[T]],
    channels: &[usize],
    dst: &mut [T],
    with_relu: bool,
) {
    debug_assert_eq!(srcs.len(), channels.len());
    if channels.iter().sum::<usize>() == 0 {
        return;
    }
    reference_pixels(srcs, channels, dst, 0, with_relu);
}

fn validate_shapes(inputs: &[TensorDesc], output: &TensorDesc) -> ConcatResult<()> {
    if output.layout != MemoryLayout::Nhwc {
        return Err(ConcatError::Unsupported(format!(
            "concat output layout {:?}, only NHWC is supported",
            output.layout
        )));
    }
    if !output.dtype.is_concat_supported() {
        return Err(ConcatError::UnsupportedDType(output.dtype));
    }
    for (index, t) in inputs.iter().enumerate() {
        if t.layout != MemoryLayout::Nhwc {
            return Err(ConcatError::LayoutMismatch {
                index,
                expected: MemoryLayout::Nhwc,
                got: t.layout,
            });
        }
        if t.dtype != output.dtype {
            return Err(ConcatError::DTypeMismatch {
                index,
                expected: output.dtype,
                got: t.dtype,
            });
        }
        if t.dims[..3] != output.dims[..3] {
            return Err(ConcatError::ShapeMismatch {
                expected: format!("input {index} spatial dims {:?}", &output.dims[..3]),
                got: format!("{:?}", &t.dims[..3]),
            });
        }
    }
    for (index, t) in inputs.iter().enumerate() {
        if t.checked_num_elements().is_none() {
            return Err(ConcatError::ShapeMismatch {
                expected: format!("input {index} element count within usize"),
                got: format!("{:?}", t.dims),
            });
        }
    }
    if output.checked_num_elements().is_none() {
        return Err(ConcatError::ShapeMismatch {
            expected: "output element count within usize".into(),
            got: format!("{:?}", output.dims),
        });
    }
    let sum = inputs
        .iter()
        .try_fold(0usize, |acc, t| acc.checked_add(t.channels()))
        .ok_or_else(|| ConcatError::ShapeMismatch {
            expected: "total input channels within usize".into(),
            got: format!("{} inputs", inputs.len()),
        })?;
    if sum != output.channels() {
        return Err(ConcatError::ShapeMismatch {
            expected: format!("{} output channels", sum),
            got: format!("{}", output.channels()),
        });
    }
    Ok(())
}

fn block_counts(inputs: &[TensorDesc], config: &KernelConfig) -> ConcatResult<Vec<i32>> {
    inputs
        .iter()
        .map(|t| {
            i32::try_from(config.blocks_for(t.channels())).map_err(|_| {
                ConcatError::Unsupported(format!(
                    "{} channels exceed the block counter",
                    t.channels()
                ))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::CompilerOptions;
    use crate::dispatch::{DeviceProfile, IsaLevel};

    fn reference_compiler() -> ConcatCompiler {
        ConcatCompiler::with_profile(
            DeviceProfile::with_isa(IsaLevel::Scalar),
            CompilerOptions::default(),
        )
    }

    #[test]
    fn test_relu_semantics() {
        assert_eq!((-3.0f32).relu(), 0.0);
        assert_eq!(5.0f32.relu(), 5.0);
        assert!(f32::NAN.relu().is_nan());
        assert_eq!((-7i32).relu(), 0);
        assert_eq!((-128i8).relu(), 0);
        assert_eq!(127u8.relu(), 127);
        assert_eq!(200u8.relu(), 0);
    }

    #[test]
    fn test_reference_concat_two_inputs() {
        let a = [-1.0f32, 2.0, -3.0, 4.0];
        let b = [5.0f32, -6.0, 7.0, -8.0];
        let mut dst = [0.0f32; 8];
        concat_nhwc_reference(&[&a, &b], &[4, 4], &mut dst, true);
        assert_eq!(dst, [0.0, 2.0, 0.0, 4.0, 5.0, 0.0, 7.0, 0.0]);
    }

    #[test]
    fn test_reference_concat_interleaves_rows() {
        // two pixels, channels 1 and 2
        let a = [1i32, 2];
        let b = [10i32, 11, 20, 21];
        let mut dst = [0i32; 6];
        concat_nhwc_reference(&[&a, &b], &[1, 2], &mut dst, false);
        assert_eq!(dst, [1, 10, 11, 2, 20, 21]);
    }

    #[test]
    fn test_op_reference_path() {
        let mut compiler = reference_compiler();
        let srcs = [
            TensorDesc::nhwc(DType::S8, 1, 1, 2, 2),
            TensorDesc::nhwc(DType::S8, 1, 1, 2, 1),
        ];
        let out = TensorDesc::nhwc(DType::S8, 1, 1, 2, 3);
        let op = ConcatOp::new(&mut compiler, &srcs, &out, true).unwrap();
        assert!(!op.is_jit());
        assert!(op.config().is_none());

        let a = [-1i8, 2, 3, -4];
        let b = [-5i8, 6];
        let mut dst = [0i8; 6];
        op.execute(&[&a, &b], &mut dst).unwrap();
        assert_eq!(dst, [0, 2, 0, 3, 0, 6]);
    }

    #[test]
    fn test_op_rejects_bad_buffers() {
        let mut compiler = reference_compiler();
        let srcs = [TensorDesc::nhwc(DType::F32, 1, 1, 1, 4)];
        let out = TensorDesc::nhwc(DType::F32, 1, 1, 1, 4);
        let op = ConcatOp::new(&mut compiler, &srcs, &out, false).unwrap();

        let a = [0.0f32; 4];
        let mut short = [0.0f32; 3];
        assert!(matches!(
            op.execute(&[&a], &mut short),
            Err(ConcatError::ShapeMismatch { .. })
        ));
        let mut dst = [0.0f32; 4];
        assert!(matches!(
            op.execute::<f32>(&[], &mut dst),
            Err(ConcatError::ShapeMismatch { .. })
        ));
        let ai = [0i32; 4];
        let mut di = [0i32; 4];
        assert!(matches!(
            op.execute(&[&ai], &mut di),
            Err(ConcatError::ElementMismatch { .. })
        ));
    }

    #[test]
    fn test_op_validates_descriptors() {
        let mut compiler = reference_compiler();
        let out = TensorDesc::nhwc(DType::F32, 1, 2, 2, 8);
        let wrong_sum = [TensorDesc::nhwc(DType::F32, 1, 2, 2, 4)];
        assert!(matches!(
            ConcatOp::new(&mut compiler, &wrong_sum, &out, false),
            Err(ConcatError::ShapeMismatch { .. })
        ));
        let wrong_hw = [
            TensorDesc::nhwc(DType::F32, 1, 2, 3, 4),
            TensorDesc::nhwc(DType::F32, 1, 2, 2, 4),
        ];
        assert!(matches!(
            ConcatOp::new(&mut compiler, &wrong_hw, &out, false),
            Err(ConcatError::ShapeMismatch { .. })
        ));
        let half = TensorDesc::nhwc(DType::F16, 1, 2, 2, 8);
        assert!(matches!(
            ConcatOp::new(&mut compiler, &[half], &half, false),
            Err(ConcatError::UnsupportedDType(DType::F16))
        ));
    }

    #[test]
    fn test_op_rejects_overflowing_dims() {
        let mut compiler = reference_compiler();
        let huge = TensorDesc::nhwc(DType::F32, usize::MAX / 2, 3, 1, 4);
        assert!(matches!(
            ConcatOp::new(&mut compiler, &[huge], &huge, false),
            Err(ConcatError::ShapeMismatch { .. })
        ));

        let wide = [
            TensorDesc::nhwc(DType::S8, 1, 1, 1, usize::MAX),
            TensorDesc::nhwc(DType::S8, 1, 1, 1, 2),
        ];
        let out = TensorDesc::nhwc(DType::S8, 1, 1, 1, 1);
        assert!(matches!(
            ConcatOp::new(&mut compiler, &wide, &out, false),
            Err(ConcatError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_profile_above_host_falls_back() {
        let mut compiler = ConcatCompiler::with_profile(
            DeviceProfile::with_isa(IsaLevel::Avx512),
            CompilerOptions::default(),
        );
        let srcs = [TensorDesc::nhwc(DType::F32, 1, 1, 2, 16)];
        let out = TensorDesc::nhwc(DType::F32, 1, 1, 2, 16);
        let op = ConcatOp::new(&mut compiler, &srcs, &out, true).unwrap();
        assert_eq!(op.is_jit(), compiler.jit_available());
        if crate::dispatch::device_profile().isa < IsaLevel::Avx512 {
            assert!(!op.is_jit());
        }

        let a: Vec<f32> = (0..32).map(|v| v as f32 - 16.0).collect();
        let mut got = vec![0.0f32; 32];
        op.execute(&[&a], &mut got).unwrap();
        let mut want = vec![0.0f32; 32];
        concat_nhwc_reference(&[&a], &[16], &mut want, true);
        assert_eq!(got, want);
    }

    #[test]
    fn test_parallel_reference_matches_serial() {
        let opts = CompilerOptions { parallel_min_pixels: 1, ..Default::default() };
        let mut compiler =
            ConcatCompiler::with_profile(DeviceProfile::with_isa(IsaLevel::Scalar), opts);
        let srcs = [
            TensorDesc::nhwc(DType::S32, 2, 5, 7, 3),
            TensorDesc::nhwc(DType::S32, 2, 5, 7, 5),
        ];
        let out = TensorDesc::nhwc(DType::S32, 2, 5, 7, 8);
        let op = ConcatOp::new(&mut compiler, &srcs, &out, true).unwrap();

        let a: Vec<i32> = (0..srcs[0].num_elements() as i32).map(|v| v - 100).collect();
        let b: Vec<i32> = (0..srcs[1].num_elements() as i32).map(|v| 50 - v).collect();
        let mut par = vec![0i32; out.num_elements()];
        op.execute(&[&a, &b], &mut par).unwrap();

        let mut serial = vec![0i32; out.num_elements()];
        concat_nhwc_reference(&[&a, &b], &[3, 5], &mut serial, true);
        assert_eq!(par, serial);
    }
}
