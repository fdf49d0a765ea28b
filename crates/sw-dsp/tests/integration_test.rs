//! Decorrelation integration tests
//!
//! Verifies complete decorrelation chains:
//! - Velvet filter banks: generate, optimise, persist, decorrelate
//! - All-pass decorrelation keeps the magnitude spectrum
//! - Widener output against its extremes and coherence targets

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sw_core::{AudioBuffer, StereoBuffer};
use sw_dsp::allpass::process_allpass;
use sw_dsp::analysis::{interchannel_coherence, xcorr};
use sw_dsp::velvet::bank::optimise_bank;
use sw_dsp::velvet::generator::{generate_interleaved, make_non_overlapping, target_decay_db_from_t60};
use sw_dsp::velvet::{generate_multichannel, OptimiserConfig, VelvetConfig, VelvetFilterBank};
use sw_dsp::widener::{
    Beta, DecorrelationSettings, DecorrelationType, WidenerConfig, WidenerMode,
};

const SAMPLE_RATE: f64 = 48000.0;

/// Generate test sine wave
fn generate_sine(samples: usize, freq: f64) -> Vec<f64> {
    (0..samples)
        .map(|i| {
            let t = i as f64 / SAMPLE_RATE;
            (2.0 * std::f64::consts::PI * freq * t).sin()
        })
        .collect()
}

/// Seeded uniform noise in [-1, 1)
fn generate_noise(samples: usize, seed: u64) -> Vec<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..samples).map(|_| rng.random_range(-1.0..1.0)).collect()
}

fn generate_impulse(samples: usize) -> Vec<f64> {
    let mut x = vec![0.0; samples];
    x[0] = 1.0;
    x
}

fn rms(signal: &[f64]) -> f64 {
    let sum: f64 = signal.iter().map(|x| x * x).sum();
    (sum / signal.len() as f64).sqrt()
}

fn is_valid_signal(signal: &[f64]) -> bool {
    signal.iter().all(|x| x.is_finite())
}

// ============ Velvet noise ============

#[test]
fn test_non_overlapping_rows_are_disjoint() {
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    let seqs = generate_interleaved(&mut rng, 4, 48, (480, 2400), true, false).unwrap();
    let shifted = make_non_overlapping(&seqs, 48);

    let width = shifted[0].len();
    for i in 0..width {
        let occupied = shifted.iter().filter(|row| row[i] != 0.0).count();
        assert!(occupied <= 1, "index {i} holds {occupied} impulses");
    }
}

#[test]
fn test_velvet_bank_end_to_end() {
    let mut rng = ChaCha8Rng::seed_from_u64(5);
    let config = VelvetConfig {
        max_length_ms: 15.0,
        ..Default::default()
    };
    let filters = generate_multichannel(&mut rng, &config).unwrap();
    for f in &filters {
        assert!(f.iter().all(|x| x.abs() <= 1.0));
    }

    let dir = tempfile::tempdir().unwrap();
    let init_path = dir.path().join("init_vn_filters.txt");
    let opt_path = dir.path().join("opt_vn_filters.txt");

    let bank = VelvetFilterBank::new(filters).unwrap();
    bank.save(&init_path).unwrap();

    let length_ms = bank.filter_length() as f64 / SAMPLE_RATE * 1000.0;
    let decay_db = target_decay_db_from_t60(config.decay_t60_ms, length_ms);
    let opt_config = OptimiserConfig {
        num_freq_bins: 128,
        max_iterations: 15,
        ..Default::default()
    };
    let optimised = optimise_bank(&bank, SAMPLE_RATE, config.density, decay_db, &opt_config).unwrap();
    assert_eq!(optimised.num_channels(), bank.num_channels());
    optimised.save(&opt_path).unwrap();

    let settings = DecorrelationSettings {
        velvet_filters: init_path,
        opt_velvet_filters: opt_path,
        seed: Some(1),
        ..Default::default()
    };
    let noise = generate_noise(16384, 2);
    let input = StereoBuffer::from_channels(noise.clone(), noise).unwrap();

    for kind in [DecorrelationType::Velvet, DecorrelationType::OptVelvet] {
        let widener = WidenerConfig {
            decorrelation: kind,
            settings: settings.clone(),
            mode: WidenerMode::Broadband {
                beta: std::f64::consts::FRAC_PI_2,
                transient: None,
            },
        }
        .build(input.clone(), SAMPLE_RATE)
        .unwrap();
        let out = widener.process().unwrap();
        assert_eq!(out.len(), input.len());
        assert!(is_valid_signal(out.left()) && is_valid_signal(out.right()));
        assert!(widener.correlation(&out) < 0.7, "{kind}: {}", widener.correlation(&out));
    }
}

// ============ All-pass ============

#[test]
fn test_allpass_preserves_energy() {
    let mut rng = ChaCha8Rng::seed_from_u64(9);
    let impulse = generate_impulse(SAMPLE_RATE as usize);
    let input = StereoBuffer::from_channels(impulse.clone(), impulse).unwrap();
    let out = process_allpass(&mut rng, &input, SAMPLE_RATE, 200, 30.0).unwrap();

    for ch in 0..2 {
        let energy: f64 = out.channel(ch).unwrap().iter().map(|x| x * x).sum();
        assert!((energy - 1.0).abs() < 1e-3, "channel {ch}: {energy}");
    }
    assert!(interchannel_coherence(out.left(), out.right()) < 0.5);
}

#[test]
fn test_allpass_sine_level_unchanged() {
    let mut rng = ChaCha8Rng::seed_from_u64(10);
    let sine = generate_sine(SAMPLE_RATE as usize, 1000.0);
    let input = StereoBuffer::from_channels(sine.clone(), sine.clone()).unwrap();
    let out = process_allpass(&mut rng, &input, SAMPLE_RATE, 100, 30.0).unwrap();

    // Skip the transient at the start
    let settle = 9600;
    let ratio = rms(&out.left()[settle..]) / rms(&sine[settle..]);
    assert!((ratio - 1.0).abs() < 0.01, "ratio {ratio}");
}

// ============ Analysis ============

#[test]
fn test_xcorr_finds_delay() {
    let x = generate_noise(4096, 3);
    let delay = 25;
    let mut y = vec![0.0; delay];
    y.extend_from_slice(&x[..x.len() - delay]);

    let (cc, lags) = xcorr(&x, &y, Some(64), true).unwrap();
    let best = cc
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
        .map(|(i, _)| lags[i])
        .unwrap();
    assert_eq!(best, delay as isize);
}

// ============ Widener ============

#[test]
fn test_widener_beta_sweep_monotone() {
    let noise = generate_noise(16384, 4);
    let input = StereoBuffer::from_channels(noise.clone(), noise).unwrap();
    let config = WidenerConfig {
        settings: DecorrelationSettings {
            seed: Some(8),
            ..Default::default()
        },
        ..Default::default()
    };
    let mut widener = config.build(input, SAMPLE_RATE).unwrap();

    let mut previous = f64::INFINITY;
    for step in 0..=4 {
        let beta = step as f64 / 4.0 * std::f64::consts::FRAC_PI_2;
        widener.update_beta(Beta::Broadband(beta)).unwrap();
        let icc = widener.correlation(&widener.process().unwrap());
        assert!(icc <= previous + 1e-9, "beta {beta}: {icc} > {previous}");
        previous = icc;
    }
}

#[test]
fn test_frequency_based_lr_impulse() {
    let impulse = generate_impulse(8192);
    let input = StereoBuffer::from_channels(impulse.clone(), impulse).unwrap();
    let json = r#"{
        "settings": { "seed": 3, "num_biquads": 20 },
        "mode": { "type": "frequency_based", "betas": [0.0, 0.0], "cutoff_hz": 1000.0 }
    }"#;
    let config: WidenerConfig = serde_json::from_str(json).unwrap();
    let widener = config.build(input, SAMPLE_RATE).unwrap();
    let out = widener.process().unwrap();

    // LR4 branches sum to an all-pass: energy and spectrum flatness survive
    let energy: f64 = out.left().iter().map(|x| x * x).sum();
    assert!((energy - 1.0).abs() < 1e-3);
    assert_eq!(out.left(), out.right());
}

#[test]
fn test_unknown_decorrelation_rejected() {
    let json = r#"{ "decorrelation": "reverb" }"#;
    assert!(serde_json::from_str::<WidenerConfig>(json).is_err());
}
