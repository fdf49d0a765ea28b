//! Spatial integration tests
//!
//! Renders noise through the spherical-head HRIRs and checks that the
//! estimated ITD agrees with the model.

use ndarray::Array3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sw_core::{rfft_frequencies, StereoBuffer, LEFT, RIGHT};
use sw_dsp::convolution::convolve_same;
use sw_spatial::hrtf::{compute, HeadModel, HrtfParams};
use sw_spatial::itd::{estimate_itd, estimate_itd_pair, ItdOptions};
use sw_spatial::widener::HrtfWidenerConfig;

const SAMPLE_RATE: f64 = 48000.0;
const NUM_SAMPLES: usize = 16384;

fn generate_noise(samples: usize, seed: u64) -> Vec<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..samples).map(|_| rng.random_range(-1.0..1.0)).collect()
}

fn hrtf_set(doas: &[f64]) -> HrtfParams {
    let freqs = rfft_frequencies(512, SAMPLE_RATE);
    compute(doas, &freqs, 1024, &HeadModel::default()).unwrap()
}

fn render(set: &HrtfParams, doa: usize, source: &[f64]) -> [Vec<f64>; 2] {
    [LEFT, RIGHT].map(|ear| convolve_same(source, &set.hrir(doa, ear).to_vec()).unwrap())
}

/// Arrival-time difference of the model, right minus left
fn geometric_itd(azimuth: f64) -> f64 {
    let model = HeadModel::default();
    model.time_delay(90.0 + azimuth) - model.time_delay(90.0 - azimuth)
}

// ============ ITD of rendered sources ============

#[test]
fn test_rendered_itd_matches_model() {
    let doas = [-40.0, 40.0];
    let set = hrtf_set(&doas);
    let source = generate_noise(NUM_SAMPLES, 1);

    for (i, &az) in doas.iter().enumerate() {
        let [left, right] = render(&set, i, &source);
        let (itd, iacc) = estimate_itd_pair(&left, &right, SAMPLE_RATE, &ItdOptions::default()).unwrap();
        let expected = geometric_itd(az);

        assert_eq!(itd.signum(), expected.signum(), "az {az}: itd {itd}");
        let ratio = itd / expected;
        assert!(ratio > 0.5 && ratio < 2.0, "az {az}: itd {itd} vs {expected}");
        assert!(iacc > 0.8, "az {az}: iacc {iacc}");
    }
}

#[test]
fn test_itd_grows_with_azimuth() {
    let doas = [0.0, 20.0, 40.0, 60.0];
    let set = hrtf_set(&doas);
    let source = generate_noise(NUM_SAMPLES, 2);

    // [doa, ear, time]
    let mut binaural = Array3::<f64>::zeros((doas.len(), 2, NUM_SAMPLES));
    for d in 0..doas.len() {
        let ears = render(&set, d, &source);
        for (ear, signal) in ears.iter().enumerate() {
            for (t, &x) in signal.iter().enumerate() {
                binaural[[d, ear, t]] = x;
            }
        }
    }

    let est = estimate_itd(binaural.view().into_dyn(), SAMPLE_RATE, &ItdOptions::default()).unwrap();
    assert_eq!(est.itd.shape(), &[4]);
    assert!(est.itd[[0]].abs() < 1.0 / SAMPLE_RATE);
    for d in 1..doas.len() {
        assert!(est.itd[[d]] > est.itd[[d - 1]], "itd {:?}", est.itd);
    }
}

// ============ Cross-talk widener ============

#[test]
fn test_hard_left_input_leads_at_left_ear() {
    let widener = HrtfWidenerConfig {
        speaker_angle_deg: 45.0,
        ..Default::default()
    }
    .build(SAMPLE_RATE)
    .unwrap();

    let source = generate_noise(NUM_SAMPLES, 3);
    let input = StereoBuffer::from_channels(source, vec![0.0; NUM_SAMPLES]).unwrap();
    let out = widener.process(&input).unwrap();

    let (itd, _) = estimate_itd_pair(out.left(), out.right(), SAMPLE_RATE, &ItdOptions::default()).unwrap();
    assert!(itd > 0.0, "itd {itd}");
}

#[test]
fn test_widener_config_from_json() {
    let json = r#"{ "azimuth_range": [-60.0, 60.0], "angular_res_deg": 5.0, "speaker_angle_deg": 20.0 }"#;
    let config: HrtfWidenerConfig = serde_json::from_str(json).unwrap();
    let widener = config.build(SAMPLE_RATE).unwrap();
    assert_eq!(widener.num_orientations(), 25);
    let (l, r) = widener.find_closest_doa();
    assert_eq!(widener.hrtf_set().doas[l], 20.0);
    assert_eq!(widener.hrtf_set().doas[r], -20.0);

    let out_of_range = r#"{ "azimuth_range": [-10.0, 10.0], "speaker_angle_deg": 30.0 }"#;
    let config: HrtfWidenerConfig = serde_json::from_str(out_of_range).unwrap();
    assert!(config.build(SAMPLE_RATE).is_err());
}
