//! Core integration tests: buffer shape normalisation and matrix files

use approx::assert_relative_eq;
use sw_core::array_io::{load_matrix, save_matrix};
use sw_core::{
    db, db2lin, half_hann_fade, ms_to_samps, AudioBuffer, StereoBuffer, SwError, LEFT, NUM_CHANNELS,
    RIGHT,
};

// ============ Shapes ============

#[test]
fn test_frame_and_channel_major_agree() {
    let frames: Vec<Vec<f64>> = (0..5).map(|i| vec![i as f64, -(i as f64)]).collect();
    let channel_major = vec![
        (0..5).map(|i| i as f64).collect::<Vec<_>>(),
        (0..5).map(|i| -(i as f64)).collect::<Vec<_>>(),
    ];

    let a = StereoBuffer::from_matrix(&frames).unwrap();
    let b = StereoBuffer::from_matrix(&channel_major).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.channel(LEFT), Some(&[0.0, 1.0, 2.0, 3.0, 4.0][..]));
    assert_eq!(a.channel(RIGHT).map(|r| r[4]), Some(-4.0));
    assert!(a.channel(NUM_CHANNELS).is_none());
}

#[test]
fn test_non_stereo_shapes_rejected() {
    let mono: Vec<Vec<f64>> = (0..8).map(|i| vec![i as f64]).collect();
    assert!(matches!(
        StereoBuffer::from_matrix(&mono),
        Err(SwError::InvalidShape(_))
    ));

    let three = vec![vec![0.0; 16]; 3];
    assert!(matches!(
        StereoBuffer::from_matrix(&three),
        Err(SwError::InvalidShape(_))
    ));

    assert!(StereoBuffer::from_interleaved(&[0.0; 9], 2).is_err());
}

#[test]
fn test_interleaved_round_trip() {
    let interleaved: Vec<f64> = (0..64).map(|i| i as f64 * 0.25).collect();
    let buffer = StereoBuffer::from_interleaved(&interleaved, 2).unwrap();
    assert_eq!(buffer.len(), 32);
    assert_eq!(buffer.to_interleaved(), interleaved);
}

// ============ Matrix files ============

#[test]
fn test_matrix_file_precision() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("bank.txt");
    let rows = vec![
        vec![1.0, 0.0, -0.123456789012345678, 1e-300],
        vec![0.0, -1.0, 3.5e12, f64::MIN_POSITIVE],
    ];

    save_matrix(&path, &rows).unwrap();
    let loaded = load_matrix(&path).unwrap();
    assert_eq!(loaded, rows);
}

#[test]
fn test_matrix_file_errors_carry_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ragged.txt");
    std::fs::write(&path, "1 2 3\n4 5\n").unwrap();

    match load_matrix(&path) {
        Err(SwError::ResourceLoad { path: p, .. }) => assert!(p.ends_with("ragged.txt")),
        other => panic!("expected ResourceLoad, got {other:?}"),
    }
}

// ============ Units ============

#[test]
fn test_unit_helpers() {
    assert_relative_eq!(db(db2lin(-18.0)), -18.0, epsilon = 1e-12);
    assert_eq!(ms_to_samps(30.0, 48000.0), 1440);

    let fade_in = half_hann_fade(48, false);
    let fade_out = half_hann_fade(48, true);
    for (a, b) in fade_in.iter().zip(&fade_out) {
        assert_relative_eq!(a + b, 1.0, epsilon = 1e-12);
    }
}
