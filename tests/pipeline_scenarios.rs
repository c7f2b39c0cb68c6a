//! End-to-end scenarios for the detection and tracking pipeline.

mod common;

use approx::assert_abs_diff_eq;
use blob_tracker::core_modules::blob_detector::process_frame;
use blob_tracker::core_modules::byte_tracker::ByteTracker;
use blob_tracker::core_modules::tracker::SimpleTracker;
use blob_tracker::core_modules::tracking::BlobTracker;
use blob_tracker::{
    Blob, Centroid, KalmanConfig, PipelineConfig, PixelRect, Roi, TrackState, TrackerKind,
    TrackingConfig, TrackingPipeline,
};
use common::{frame_with_squares, square_config};

// =============================================================================
// Frame processor
// =============================================================================

#[test]
fn single_rectangle_is_detected_exactly() {
    let config = square_config();
    let frame = frame_with_squares(100, 100, &[(30, 40, 20)]);
    let processed = process_frame(&frame, &config.roi, &config.processing);

    assert_eq!(processed.blobs.len(), 1);
    let blob = &processed.blobs[0];
    assert_eq!(blob.bbox, PixelRect::new(30, 40, 20, 20));
    assert_eq!(blob.area, 400);
    assert_abs_diff_eq!(blob.centroid.x, 39.5, epsilon = 1e-9);
    assert_abs_diff_eq!(blob.centroid.y, 49.5, epsilon = 1e-9);
    assert_abs_diff_eq!(blob.confidence, 0.8, epsilon = 1e-6);
}

#[test]
fn frame_processor_is_idempotent() {
    let mut config = square_config();
    config.processing.blur_radius = 2;
    config.processing.morphological_open = 3;
    config.processing.morphological_close = 3;
    config.processing.min_area = 50;
    config.processing.max_area = 1000;
    let frame = frame_with_squares(100, 100, &[(5, 5, 20), (60, 10, 15), (30, 60, 25)]);

    let first = process_frame(&frame, &config.roi, &config.processing);
    let second = process_frame(&frame, &config.roi, &config.processing);
    assert_eq!(first.blobs, second.blobs);
    assert_eq!(first.mask, second.mask);
    assert_eq!(first.blobs.len(), 3);
}

#[test]
fn area_bounds_are_inclusive() {
    let frame = frame_with_squares(100, 100, &[(10, 10, 20)]);
    let mut config = square_config();

    for (min_area, max_area, expected) in [
        (400, 1000, 1),
        (401, 1000, 0),
        (0, 400, 1),
        (0, 399, 0),
    ] {
        config.processing.min_area = min_area;
        config.processing.max_area = max_area;
        let processed = process_frame(&frame, &config.roi, &config.processing);
        assert_eq!(
            processed.blobs.len(),
            expected,
            "min_area {min_area}, max_area {max_area}"
        );
    }
}

// =============================================================================
// Orchestrated cycles
// =============================================================================

#[test]
fn moving_square_keeps_one_stable_track() {
    let mut pipeline = TrackingPipeline::new(square_config()).unwrap();
    let mut previous_x = None;

    for cycle in 0..10u32 {
        let frame = frame_with_squares(100, 100, &[(40 + 2 * cycle, 40, 20)]);
        let output = pipeline.process_frame(&frame);

        assert_eq!(output.blobs.len(), 1, "cycle {cycle}");
        let blob = &output.blobs[0];
        assert_eq!(blob.id, 0, "cycle {cycle}");
        assert_eq!(blob.state, TrackState::Confirmed);
        assert_abs_diff_eq!(blob.confidence, 400.0 / 500.0, epsilon = 1e-6);

        if let Some(x) = previous_x {
            assert_abs_diff_eq!(blob.centroid.x - x, 2.0, epsilon = 0.5);
        }
        previous_x = Some(blob.centroid.x);
    }

    let stats = pipeline.stats();
    assert_eq!(stats.cycles, 10);
    assert_eq!(stats.next_id, 1);
}

#[test]
fn default_configuration_tracks_an_ordinary_square() {
    let config = PipelineConfig {
        roi: Roi::new(0, 0, 100, 100).unwrap(),
        ..Default::default()
    };
    let mut pipeline = TrackingPipeline::new(config).unwrap();

    for cycle in 0..10u32 {
        let frame = frame_with_squares(100, 100, &[(30 + 2 * cycle, 40, 20)]);
        let output = pipeline.process_frame(&frame);

        assert_eq!(output.blobs.len(), 1, "cycle {cycle}");
        let blob = &output.blobs[0];
        assert_eq!(blob.id, 0, "cycle {cycle}");
        assert_eq!(blob.state, TrackState::Confirmed);
        assert_eq!(blob.age, cycle);
        assert_abs_diff_eq!(blob.confidence, 400.0 / 20000.0, epsilon = 1e-3);
    }
    assert_eq!(pipeline.stats().next_id, 1);
}

fn occlusion_run(blank_cycles: u32, track_buffer: u32) -> u64 {
    let mut config = square_config();
    config.tracking.track_buffer = track_buffer;
    let mut pipeline = TrackingPipeline::new(config).unwrap();

    let visible = frame_with_squares(100, 100, &[(40, 40, 20)]);
    let empty = frame_with_squares(100, 100, &[]);

    for _ in 0..3 {
        pipeline.process_frame(&visible);
    }
    for i in 0..blank_cycles {
        // Alternate between empty frames and missing frames; both age the track.
        if i % 2 == 0 {
            pipeline.process_frame(&empty);
        } else {
            pipeline.skip_frame();
        }
    }
    let output = pipeline.process_frame(&visible);
    assert_eq!(output.blobs.len(), 1);
    output.blobs[0].id
}

#[test]
fn short_occlusion_keeps_identity() {
    assert_eq!(occlusion_run(4, 5), 0);
    assert_eq!(occlusion_run(5, 5), 0);
}

#[test]
fn long_occlusion_allocates_new_identity() {
    assert_eq!(occlusion_run(6, 5), 1);
    assert_eq!(occlusion_run(12, 5), 1);
}

#[test]
fn lost_track_is_reported_during_occlusion() {
    let mut pipeline = TrackingPipeline::new(square_config()).unwrap();
    pipeline.process_frame(&frame_with_squares(100, 100, &[(40, 40, 20)]));
    let output = pipeline.process_frame(&frame_with_squares(100, 100, &[]));

    assert_eq!(output.blobs.len(), 1);
    assert_eq!(output.blobs[0].state, TrackState::Lost);
    assert_eq!(output.blobs[0].frames_since_seen, 1);
    assert_eq!(output.blobs[0].area, 400);
}

#[test]
fn clear_ids_restarts_numbering() {
    let mut pipeline = TrackingPipeline::new(square_config()).unwrap();
    pipeline.process_frame(&frame_with_squares(100, 100, &[(5, 5, 20)]));
    pipeline.process_frame(&frame_with_squares(100, 100, &[(70, 70, 20)]));
    assert_eq!(pipeline.stats().next_id, 2);

    pipeline.clear_ids();
    let output = pipeline.process_frame(&frame_with_squares(100, 100, &[(70, 70, 20)]));
    assert_eq!(output.blobs.len(), 1);
    assert_eq!(output.blobs[0].id, 0);
}

#[test]
fn simple_tracker_through_the_pipeline() {
    let mut config = square_config();
    config.tracking.tracker = TrackerKind::Simple;
    let mut pipeline = TrackingPipeline::new(config).unwrap();
    assert_eq!(pipeline.tracker_kind(), TrackerKind::Simple);

    for cycle in 0..5u32 {
        let output = pipeline.process_frame(&frame_with_squares(100, 100, &[(20 + cycle, 40, 20)]));
        assert_eq!(output.blobs[0].id, 0);
    }
    // No grace period: a single empty frame forgets the track.
    assert!(pipeline.process_frame(&frame_with_squares(100, 100, &[])).blobs.is_empty());
    let output = pipeline.process_frame(&frame_with_squares(100, 100, &[(25, 40, 20)]));
    assert_eq!(output.blobs[0].id, 1);
}

#[test]
fn configuration_loads_from_file() {
    let path = std::env::temp_dir().join(format!("blob_tracker_config_{}.json", std::process::id()));
    let json = square_config().to_json_string().unwrap();
    std::fs::write(&path, json).unwrap();

    let loaded = PipelineConfig::from_json_file(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(loaded, square_config());
}

// =============================================================================
// Crossing objects at the tracker level
// =============================================================================

fn square_blob(x: i32, y: i32) -> Blob {
    Blob {
        bbox: PixelRect::new(x, y, 20, 20),
        centroid: Centroid::new(x as f64 + 9.5, y as f64 + 9.5),
        area: 400,
        confidence: 1.0,
        polygon: Vec::new(),
    }
}

/// Two squares on the same row, one moving right from x = 0 and one moving left
/// from x = 100. Detections are listed left to right, as contour discovery would.
/// Returns the identity of the object that ends on the right.
fn crossing_run(tracker: &mut dyn BlobTracker) -> u64 {
    let config = TrackingConfig::default();
    let roi = Roi::new(0, 0, 200, 200).unwrap();
    let mut right_id = None;
    let mut first_right_mover = None;

    for t in 0..25 {
        let right_mover = square_blob(4 * t, 50);
        let left_mover = square_blob(100 - 4 * t, 50);
        let mut detections = vec![right_mover.clone(), left_mover];
        detections.sort_by_key(|b| b.bbox.x);

        let output = tracker.predict_and_update(&detections, &config, &roi);
        assert_eq!(output.len(), 2, "cycle {t}");

        let mover = output
            .iter()
            .find(|b| b.bbox.x == right_mover.bbox.x)
            .map(|b| b.id);
        if t == 0 {
            first_right_mover = mover;
        }
        right_id = mover;
    }

    assert!(first_right_mover.is_some());
    assert_eq!(first_right_mover, Some(0));
    right_id.unwrap_or(u64::MAX)
}

#[test]
fn predictive_tracker_preserves_identities_through_crossing() {
    let mut tracker = ByteTracker::new(&KalmanConfig::default()).unwrap();
    assert_eq!(crossing_run(&mut tracker), 0);
}

#[test]
fn nearest_centroid_tracker_swaps_identities_at_crossing() {
    let mut tracker = SimpleTracker::new();
    assert_eq!(crossing_run(&mut tracker), 1);
}

#[test]
fn simple_tracker_never_transfers_beyond_gate() {
    let roi = Roi::new(0, 0, 200, 200).unwrap();
    let gate = SimpleTracker::gating_distance(&roi);
    let config = TrackingConfig::default();
    let mut tracker = SimpleTracker::new();

    let first = tracker.predict_and_update(&[square_blob(10, 10)], &config, &roi);
    let jump = gate.ceil() as i32 + 1;
    let second = tracker.predict_and_update(&[square_blob(10 + jump, 10)], &config, &roi);
    assert_ne!(first[0].id, second[0].id);
}
