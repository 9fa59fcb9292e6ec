//! Integration tests for dataset building.
//!
//! Tests cover:
//! - Sample counts for each combination of augmentation and all-columns
//! - Cascade labels relative to the narrowing view
//! - Narrowing monotonicity and label clamping on repeated columns
//! - Standardized tensors and label range
//! - Failing fast on unannotated files
//! - Shuffling and seeded determinism
//! - Debug previews

mod common;

use approx::assert_abs_diff_eq;
use common::*;
use facade_columns::{AnnotatedPositions, DebugConfig, Narrowing, SampleExpander, walk};
use ndarray::Axis;
use rand::SeedableRng;
use rand::rngs::StdRng;

fn one_image(columns: &[f64]) -> (Annotations, Vec<(String, FloatImage)>) {
    let mut annotations = Annotations::default();
    annotations.insert("a.jpg", columns.to_vec(), vec![0.0, 1.0]);
    (annotations, vec![("a.jpg".to_string(), ramp_image(400, 200))])
}

#[test]
fn test_sample_counts() -> anyhow::Result<()> {
    let (annotations, images) = one_image(&[0.3, 0.6, 0.45]);

    // (augmentation, all_columns) -> 1, 4, 5, 20
    let cases = [
        (None, false, 1),
        (None, true, 4),
        (Some(5), false, 5),
        (Some(5), true, 20),
    ];
    for (factor, all_columns, expected) in cases {
        let mut options = DatasetOptions::default().with_all_columns(all_columns);
        if let Some(factor) = factor {
            options = options.with_augmentation(factor);
        }
        let dataset = DatasetBuilder::new(&annotations, options).build_from_images(&images)?;

        assert_eq!(dataset.len(), expected, "factor {factor:?}, all {all_columns}");
        assert_eq!(dataset.images.shape(), &[expected, 160, 160, 3]);
        assert!(dataset.labels.iter().all(|l| (0.0..=1.0).contains(l)));
    }

    Ok(())
}

#[test]
fn test_cascade_labels() -> anyhow::Result<()> {
    // 1. Columns at 0.3 and 0.6 on a 400 px wide crop
    let (annotations, images) = one_image(&[0.3, 0.6]);
    let options = DatasetOptions::default().with_all_columns(true);
    let dataset = DatasetBuilder::new(&annotations, options).build_from_images(&images)?;

    // 2. Widest first, then 0.3 relative to the 240 px view, then "none left"
    let labels: Vec<f32> = dataset.labels.to_vec();
    assert_eq!(labels.len(), 3);
    assert_abs_diff_eq!(labels[0], 0.6, epsilon = 1e-6);
    assert_abs_diff_eq!(labels[1], 0.5, epsilon = 1e-6);
    assert_abs_diff_eq!(labels[2], 0.0, epsilon = 1e-6);
    assert_eq!(dataset.base_indices, vec![0]);

    // 3. Every sample is standardized
    for image in dataset.images.outer_iter() {
        let mean = image.mean().unwrap_or(f32::NAN);
        assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-3);
    }

    Ok(())
}

#[test]
fn test_expander_views_narrow() -> anyhow::Result<()> {
    // Distinct views for each step of the cascade
    let options = DatasetOptions::default().with_all_columns(true);
    let mut rng = StdRng::seed_from_u64(0);
    let samples =
        SampleExpander::new(&options).expand(ramp_image(500, 100), &[0.8, 0.4], &mut rng)?;

    assert_eq!(samples.len(), 3);
    assert_ne!(samples[0].image, samples[1].image);
    assert_ne!(samples[1].image, samples[2].image);
    assert_abs_diff_eq!(samples[1].label, 0.5, epsilon = 1e-9);

    Ok(())
}

#[test]
fn test_missing_annotation_fails_fast() {
    let (annotations, mut images) = one_image(&[0.5]);
    images.push(("unknown.jpg".to_string(), ramp_image(100, 100)));

    let result =
        DatasetBuilder::new(&annotations, DatasetOptions::default()).build_from_images(&images);

    assert!(matches!(
        result,
        Err(Error::MissingAnnotation { ref file, .. }) if file == "unknown.jpg"
    ));
}

#[test]
fn test_zero_augmentation_rejected() {
    let (annotations, images) = one_image(&[0.5]);
    let result = DatasetBuilder::new(&annotations, DatasetOptions::default().with_augmentation(0))
        .build_from_images(&images);

    assert!(matches!(result, Err(Error::InvalidConfig(_))));
}

#[test]
fn test_shuffle_keeps_pairs() -> anyhow::Result<()> {
    // 1. Two images, labels known per image
    let mut annotations = Annotations::default();
    annotations.insert("a.jpg", vec![0.7, 0.35], vec![0.0, 1.0]);
    annotations.insert("b.jpg", vec![0.9], vec![0.1, 0.8]);
    let images = vec![
        ("a.jpg".to_string(), ramp_image(400, 200)),
        ("b.jpg".to_string(), ramp_image(300, 150)),
    ];
    let plain = DatasetOptions::default().with_all_columns(true);
    let ordered = DatasetBuilder::new(&annotations, plain.clone()).build_from_images(&images)?;
    let shuffled = DatasetBuilder::new(&annotations, plain.with_shuffle(true).with_seed(3))
        .build_from_images(&images)?;

    // 2. Same multiset of labels
    let mut a = ordered.labels.to_vec();
    let mut b = shuffled.labels.to_vec();
    a.sort_by(f32::total_cmp);
    b.sort_by(f32::total_cmp);
    assert_eq!(a, b);

    // 3. Base indices still point at each image's first sample
    for (&o, &s) in ordered.base_indices.iter().zip(&shuffled.base_indices) {
        assert_eq!(ordered.labels[o], shuffled.labels[s]);
        assert_eq!(
            ordered.images.index_axis(Axis(0), o),
            shuffled.images.index_axis(Axis(0), s)
        );
    }

    Ok(())
}

#[test]
fn test_seeded_build_is_deterministic() -> anyhow::Result<()> {
    let (annotations, images) = one_image(&[0.3, 0.6]);
    let options = DatasetOptions::default()
        .with_augmentation(3)
        .with_all_columns(true)
        .with_shuffle(true)
        .with_seed(42);

    let first = DatasetBuilder::new(&annotations, options.clone()).build_from_images(&images)?;
    let second = DatasetBuilder::new(&annotations, options).build_from_images(&images)?;

    assert_eq!(first.labels, second.labels);
    assert_eq!(first.images, second.images);

    Ok(())
}

#[test]
fn test_build_from_files_with_debug() -> anyhow::Result<()> {
    // 1. One photo on disk with its annotations
    let dir = tempfile::tempdir()?;
    let photo = facade_photo(320, 240, &[0.25, 0.7]);
    let path = write_jpg(dir.path(), "f.jpg", &photo);
    let (columns, floors) = write_annotations(
        dir.path(),
        &[TestRecord::new("f.jpg", &[0.25, 0.7], &[0.1, 0.9])],
    );
    let annotations = Annotations::load(&AnnotationStore::new(), &columns, &floors)?;

    // 2. Debug directory starts with a stale file
    let debug_dir = dir.path().join("debug");
    std::fs::create_dir_all(&debug_dir)?;
    std::fs::write(debug_dir.join("stale.png"), b"old")?;
    let debug = DebugConfig::prepare(debug_dir.clone())?;

    // 3. Build writes one preview per sample
    let options = DatasetOptions::default().with_all_columns(true).with_debug(debug);
    let dataset = DatasetBuilder::new(&annotations, options).build(&[path])?;

    assert_eq!(dataset.len(), 3);
    assert_eq!(dataset.files, vec!["f.jpg".to_string()]);
    assert!(!debug_dir.join("stale.png").exists());
    for i in 0..3 {
        assert!(debug_dir.join(format!("{i}.png")).exists());
    }

    Ok(())
}

#[test]
fn test_end_to_end_floor_crop_and_labels() -> anyhow::Result<()> {
    // 1. 200 wide, 100 tall, floors [0.1, 0.9] keep rows 10..90
    let mut annotations = Annotations::default();
    annotations.insert("e.jpg", vec![0.3, 0.6], vec![0.1, 0.9]);
    let images = vec![("e.jpg".to_string(), ramp_image(200, 100))];

    // 2. All columns, no augmentation
    let options = DatasetOptions::default().with_all_columns(true);
    let dataset = DatasetBuilder::new(&annotations, options).build_from_images(&images)?;

    // 3. 0.6 of 200, then 0.3 of the 120 px view, then none left
    assert_eq!(dataset.len(), 3);
    assert_abs_diff_eq!(dataset.labels[0], 0.6, epsilon = 1e-6);
    assert_abs_diff_eq!(dataset.labels[1], 0.5, epsilon = 1e-6);
    assert_abs_diff_eq!(dataset.labels[2], 0.0, epsilon = 1e-6);

    Ok(())
}

#[test]
fn test_zero_width_narrowing_is_degenerate() {
    // 0.001 of 400 px leaves no columns to keep
    let options = DatasetOptions::default().with_all_columns(true);
    let mut rng = StdRng::seed_from_u64(0);
    let result = SampleExpander::new(&options).expand(ramp_image(400, 100), &[0.001], &mut rng);

    assert!(matches!(result, Err(Error::DegenerateImage(_))));
}

#[test]
fn test_narrowing_width_never_grows() -> anyhow::Result<()> {
    // 1. Record the view width each time a column is visited
    let mut narrowing = Narrowing::new(ramp_image(500, 100))?;
    let mut positions = AnnotatedPositions::new(&[0.3, 0.8, 0.55, 0.1]);
    let mut visits: Vec<(f64, u32)> = Vec::new();
    let end = walk(&mut narrowing, &mut positions, true, |view, position| {
        visits.push((position, view.width()));
        Ok(())
    })?;

    // 2. Widest first, then the terminal 0.0
    let values: Vec<f64> = visits.iter().map(|(p, _)| *p).collect();
    assert_eq!(values, vec![0.8, 0.55, 0.3, 0.1, 0.0]);
    assert_eq!(end, WalkEnd::Exhausted);

    // 3. Each positive value shrinks the next view to floor(500 * value)
    assert_eq!(visits[0].1, 500);
    for pair in visits.windows(2) {
        let ((value, width), (_, next)) = (pair[0], pair[1]);
        assert!(next <= width);
        if value > 0.0 && value < 1.0 {
            assert!(next < width, "{value}: {width} -> {next}");
            assert_eq!(next, (500.0 * value) as u32);
        }
    }

    Ok(())
}

#[test]
fn test_repeated_column_label_is_clamped() -> anyhow::Result<()> {
    // 0.333 of 400 leaves 133 px, where 0.333 of the full width is past the edge
    let options = DatasetOptions::default().with_all_columns(true);
    let mut rng = StdRng::seed_from_u64(0);
    let samples = SampleExpander::new(&options).expand(
        ramp_image(400, 100),
        &[0.333, 0.333],
        &mut rng,
    )?;

    let labels: Vec<f64> = samples.iter().map(|s| s.label).collect();
    assert_eq!(labels.len(), 3);
    assert_abs_diff_eq!(labels[0], 0.333, epsilon = 1e-12);
    assert_eq!(labels[1], 1.0);
    assert_eq!(labels[2], 0.0);
    assert!(labels.iter().all(|l| (0.0..=1.0).contains(l)));

    Ok(())
}

#[test]
fn test_permute_in_place() {
    // Row i of the images and label i both hold the value i
    let mut images = ndarray::Array4::<f32>::zeros((4, 2, 2, 3));
    for (i, mut row) in images.outer_iter_mut().enumerate() {
        row.fill(i as f32);
    }
    let mut dataset = Dataset {
        images,
        labels: ndarray::Array1::from(vec![0.0, 1.0, 2.0, 3.0]),
        files: vec!["a.jpg".to_string(), "b.jpg".to_string()],
        base_indices: vec![0, 2],
    };

    dataset.permute(&[2, 0, 3, 1]);

    assert_eq!(dataset.labels.to_vec(), vec![2.0, 0.0, 3.0, 1.0]);
    for (k, row) in dataset.images.outer_iter().enumerate() {
        assert!(row.iter().all(|&v| v == dataset.labels[k]));
    }
    assert_eq!(dataset.base_indices, vec![1, 0]);
}
