//! Decorrelation benchmarks
//!
//! All-pass cascades, velvet convolution and the two widener strategies over
//! one second of stereo audio.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use sw_core::StereoBuffer;
use sw_dsp::allpass::design_decorrelating_cascade;
use sw_dsp::biquad::BiquadCascade;
use sw_dsp::crossover::FilterbankType;
use sw_dsp::velvet::{generate_multichannel, process_velvet, VelvetConfig, VelvetFilterBank};
use sw_dsp::widener::{
    BroadbandWidener, DecorrelationContext, DecorrelationSettings, DecorrelationType,
    FrequencyBasedWidener, TransientParams, WidenerStrategy,
};

const SAMPLE_RATE: f64 = 48000.0;

/// 440 Hz sine
fn generate_test_audio(samples: usize) -> Vec<f64> {
    (0..samples)
        .map(|i| {
            let t = i as f64 / SAMPLE_RATE;
            (2.0 * std::f64::consts::PI * 440.0 * t).sin() * 0.5
        })
        .collect()
}

fn stereo_test_audio(samples: usize) -> StereoBuffer {
    let mono = generate_test_audio(samples);
    StereoBuffer::from_channels(mono.clone(), mono).unwrap()
}

fn bench_allpass(c: &mut Criterion) {
    let mut group = c.benchmark_group("All-pass cascade");
    let input = generate_test_audio(SAMPLE_RATE as usize);

    for &sections in &[50usize, 100, 200] {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let cascade = design_decorrelating_cascade(&mut rng, SAMPLE_RATE, sections, 30.0).unwrap();
        group.bench_with_input(BenchmarkId::new("apply", sections), &sections, |b, _| {
            b.iter(|| black_box(cascade.apply(black_box(&input))))
        });
    }

    group.bench_function("design_200", |b| {
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        b.iter(|| black_box(design_decorrelating_cascade(&mut rng, SAMPLE_RATE, 200, 30.0)))
    });
    group.finish();
}

fn bench_butterworth(c: &mut Criterion) {
    let input = generate_test_audio(SAMPLE_RATE as usize);
    let lowpass = BiquadCascade::butterworth_lowpass(16, 1000.0, SAMPLE_RATE).unwrap();

    c.bench_function("butterworth16_1s", |b| {
        b.iter(|| black_box(lowpass.filter(black_box(&input))))
    });
}

fn bench_velvet(c: &mut Criterion) {
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    let filters = generate_multichannel(&mut rng, &VelvetConfig::default()).unwrap();
    let bank = VelvetFilterBank::new(filters).unwrap();
    let input = stereo_test_audio(SAMPLE_RATE as usize);

    c.bench_function("velvet_convolve_1s", |b| {
        b.iter(|| black_box(process_velvet(black_box(&input), &bank)))
    });

    c.bench_function("velvet_generate", |b| {
        b.iter(|| black_box(generate_multichannel(&mut rng, &VelvetConfig::default())))
    });
}

fn bench_widener(c: &mut Criterion) {
    let mut group = c.benchmark_group("Widener");
    let settings = DecorrelationSettings {
        seed: Some(4),
        ..Default::default()
    };
    let context = DecorrelationContext::new(
        stereo_test_audio(SAMPLE_RATE as usize),
        SAMPLE_RATE,
        DecorrelationType::Allpass,
        settings,
    )
    .unwrap();

    let broadband = BroadbandWidener::new(0.7).unwrap();
    group.bench_function("broadband", |b| {
        b.iter(|| black_box(broadband.process(&context)))
    });

    let gated = BroadbandWidener::new(0.7)
        .unwrap()
        .with_transient_gate(SAMPLE_RATE, &TransientParams::default());
    group.bench_function("broadband_transient", |b| {
        b.iter(|| black_box(gated.process(&context)))
    });

    for kind in [FilterbankType::AmplitudePreserving, FilterbankType::EnergyPreserving] {
        let widener = FrequencyBasedWidener::new([0.2, 1.0], kind, 1000.0, SAMPLE_RATE).unwrap();
        group.bench_with_input(BenchmarkId::new("frequency_based", kind), &kind, |b, _| {
            b.iter(|| black_box(widener.process(&context)))
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_allpass,
    bench_butterworth,
    bench_velvet,
    bench_widener
);
criterion_main!(benches);
