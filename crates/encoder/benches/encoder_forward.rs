use candle_core::{DType, Device, Tensor};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use encoder::{Encoder, EncoderConfig};

fn bench_encoder(c: &mut Criterion) {
    let device = Device::Cpu;
    let batch = 4usize;
    let (model_dim, heads, ffw_dim, layers) = (256usize, 8usize, 1024usize, 2usize);
    let seq_lens = [32usize, 128, 256];

    for dtype in [DType::F32, DType::BF16] {
        let encoder = Encoder::new(
            EncoderConfig::new(layers, model_dim, heads, ffw_dim, 0.1)
                .with_seed(0)
                .with_dtype(dtype),
        )
        .expect("encoder init");
        encoder.eval();

        let mut group = c.benchmark_group(format!("encoder/{dtype:?}"));
        for &seq in &seq_lens {
            let input = Tensor::randn(0f32, 1.0, (batch, seq, model_dim), &device)
                .expect("input")
                .to_dtype(dtype)
                .expect("cast input");
            let mask = Tensor::ones((batch, seq), DType::F32, &device).expect("mask");
            group.throughput(Throughput::Elements((batch * seq) as u64));
            group.bench_with_input(BenchmarkId::new("tokens", seq), &(input, mask), |b, (input, mask)| {
                b.iter(|| {
                    let out = encoder
                        .forward(black_box(input), Some(black_box(mask)))
                        .expect("forward");
                    black_box(out);
                });
            });
        }
        group.finish();
    }
}

criterion_group!(benches, bench_encoder);
criterion_main!(benches);
