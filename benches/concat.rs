//! Generated concat vs scalar reference over typical NHWC activation shapes.
//!
//! Run with: cargo bench --bench concat

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use gllm_concat::compiler::{CompilerOptions, ConcatCompiler};
use gllm_concat::dispatch::{DeviceProfile, IsaLevel};
use gllm_concat::{ConcatOp, DType, TensorDesc};

/// (height, width, per-input channels)
const SHAPES: &[(usize, usize, &[usize])] = &[
    (28, 28, &[64, 64]),
    (14, 14, &[128, 256, 128]),
    (56, 56, &[32, 16]),
];

fn descs(h: usize, w: usize, channels: &[usize]) -> (Vec<TensorDesc>, TensorDesc) {
    let srcs = channels
        .iter()
        .map(|&c| TensorDesc::nhwc(DType::F32, 1, h, w, c))
        .collect();
    (srcs, TensorDesc::nhwc(DType::F32, 1, h, w, channels.iter().sum()))
}

fn bench_concat_f32(c: &mut Criterion) {
    let mut group = c.benchmark_group("concat_f32_relu");
    let mut jit = ConcatCompiler::with_profile(DeviceProfile::detect(), CompilerOptions::default());
    let mut reference = ConcatCompiler::with_profile(
        DeviceProfile::with_isa(IsaLevel::Scalar),
        CompilerOptions::default(),
    );

    for &(h, w, channels) in SHAPES {
        let (srcs, out) = descs(h, w, channels);
        let data: Vec<Vec<f32>> = srcs
            .iter()
            .map(|d| (0..d.num_elements()).map(|i| (i % 17) as f32 - 8.0).collect())
            .collect();
        let views: Vec<&[f32]> = data.iter().map(Vec::as_slice).collect();
        let mut dst = vec![0.0f32; out.num_elements()];
        let label = format!("{h}x{w}x{channels:?}");
        group.throughput(Throughput::Bytes((out.num_elements() * 4) as u64));

        let op = ConcatOp::new(&mut reference, &srcs, &out, true).unwrap();
        group.bench_with_input(BenchmarkId::new("reference", &label), &op, |b, op| {
            b.iter(|| op.execute(black_box(&views), black_box(&mut dst)).unwrap())
        });

        if jit.jit_available() {
            let op = ConcatOp::new(&mut jit, &srcs, &out, true).unwrap();
            group.bench_with_input(BenchmarkId::new("jit", &label), &op, |b, op| {
                b.iter(|| op.execute(black_box(&views), black_box(&mut dst)).unwrap())
            });
        }
    }
    group.finish();
}

fn bench_compile(c: &mut Criterion) {
    let (srcs, out) = descs(8, 8, &[64, 128, 64]);
    let profile = DeviceProfile::detect();
    if !profile.can_execute_jit() {
        return;
    }
    c.bench_function("concat_compile_uncached", |b| {
        b.iter(|| {
            let mut compiler = ConcatCompiler::with_profile(profile, CompilerOptions::default());
            black_box(compiler.compile(black_box(&srcs), &out, true).unwrap())
        })
    });
}

criterion_group!(benches, bench_concat_f32, bench_compile);
criterion_main!(benches);
