mod common;

use approx::assert_abs_diff_eq;
use common::*;
use cv_ar::image::{Rgba, RgbaImage};
use cv_ar::draw::{NOT_FOUND_COLOR, ROW_COLORS};
use cv_ar::nalgebra::{Point3, Vector3};
use cv_ar::{
    FrameBuffer, ModelPoints, Outcome, PatternSize, Pose, PoseError, Tracker, TrackerSettings,
};

fn tracker() -> Tracker {
    Tracker::with_planar_pattern(TrackerSettings::default(), camera()).unwrap()
}

#[test]
fn frontal_board_corners_and_pose() {
    init_logging();
    let size = PatternSize::new(8, 6);
    let pose = frontal_pose();
    let mut image = render_board(&camera(), &pose, size);
    let expected = ground_truth(&camera(), &pose, size);

    let tracker = tracker();
    let mut frame = FrameBuffer::from_image(&mut image).unwrap();
    let track = tracker.detect_checkerboard(&mut frame).found().unwrap();

    assert_eq!(track.corners.len(), 48);
    assert!(max_distance(track.corners.points(), &expected) < 1.0);
    assert!(track.inliers.len() >= 24);
    assert!(track.rms_error < 1.0);
    assert_abs_diff_eq!(track.pose.rvec, Vector3::zeros(), epsilon = 0.02);
    assert_abs_diff_eq!(track.pose.tvec, pose.tvec, epsilon = 0.1);
}

#[test]
fn tilted_board_pose() {
    init_logging();
    let size = PatternSize::new(8, 6);
    let pose = Pose {
        rvec: Vector3::new(0.25, -0.2, 0.08),
        tvec: Vector3::new(-3.5, -2.5, 14.0),
    };
    let mut image = render_board(&camera(), &pose, size);
    let expected = ground_truth(&camera(), &pose, size);

    let tracker = tracker();
    let mut frame = FrameBuffer::from_image(&mut image).unwrap();
    let mut written = Pose::default();
    let outcome = tracker.detect_checkerboard(&mut frame);
    assert!(outcome.write_pose(&mut written));

    let track = outcome.found().unwrap();
    assert!(max_distance(track.corners.points(), &expected) < 1.0);
    assert_eq!(written, track.pose);
    assert_abs_diff_eq!(written.rvec, pose.rvec, epsilon = 0.03);
    assert_abs_diff_eq!(written.tvec, pose.tvec, epsilon = 0.2);
}

#[test]
fn found_board_is_painted() {
    init_logging();
    let size = PatternSize::new(8, 6);
    let mut image = render_board(&camera(), &frontal_pose(), size);
    let original = image.clone();
    let mut frame = FrameBuffer::from_image(&mut image).unwrap();
    assert!(tracker().detect_checkerboard(&mut frame).is_found());
    assert_ne!(image, original);
    // The first row is marked in red.
    let corner = ground_truth(&camera(), &frontal_pose(), size)[0];
    let (x, y) = (corner.x.round() as u32, corner.y.round() as u32);
    let red = Rgba([255, 0, 0, 255]);
    let near_red = (y - 5..=y + 5)
        .flat_map(|y| (x - 5..=x + 5).map(move |x| (x, y)))
        .any(|(x, y)| *image.get_pixel(x, y) == red);
    assert!(near_red);
}

/// A tracker whose model points all lie on one line, so no pose explains the board.
fn collinear_tracker() -> Tracker {
    let points = (0..48).map(|i| Point3::new(i as f64, 0.0, 0.0)).collect();
    Tracker::new(TrackerSettings::default(), camera(), ModelPoints::new(points)).unwrap()
}

#[test]
fn degenerate_model_fails_solver_and_keeps_pose() {
    init_logging();
    let size = PatternSize::new(8, 6);
    let mut image = render_board(&camera(), &frontal_pose(), size);
    let expected = ground_truth(&camera(), &frontal_pose(), size);
    let mut frame = FrameBuffer::from_image(&mut image).unwrap();

    let stale = Pose {
        rvec: Vector3::new(0.1, 0.2, 0.3),
        tvec: Vector3::new(1.0, 2.0, 3.0),
    };
    let mut pose = stale;
    let outcome = collinear_tracker().detect_checkerboard(&mut frame);
    assert!(!outcome.write_pose(&mut pose));
    assert_eq!(pose, stale);
    match outcome {
        Outcome::SolverFailed(failure) => {
            assert!(matches!(
                failure.error,
                PoseError::NoConsensus | PoseError::InsufficientInliers { .. }
            ));
            assert!(max_distance(failure.corners.points(), &expected) < 1.0);
        }
        other => panic!("expected a solver failure, got {:?}", other),
    }
}

#[test]
fn solver_failure_is_painted_as_not_found() {
    init_logging();
    let size = PatternSize::new(8, 6);
    let mut image = render_board(&camera(), &frontal_pose(), size);
    let mut frame = FrameBuffer::from_image(&mut image).unwrap();
    let outcome = collinear_tracker().detect_checkerboard(&mut frame);
    assert!(matches!(outcome, Outcome::SolverFailed(_)));

    assert!(image.pixels().any(|&p| p == NOT_FOUND_COLOR));
    // Row colors other than the first never appear.
    for color in &ROW_COLORS[1..] {
        assert!(image.pixels().all(|p| p != color));
    }
}

#[test]
fn blank_frame_leaves_pose_untouched() {
    init_logging();
    let mut image = RgbaImage::from_pixel(WIDTH, HEIGHT, Rgba([128, 128, 128, 255]));
    let original = image.clone();
    let mut frame = FrameBuffer::from_image(&mut image).unwrap();

    let stale = frontal_pose();
    let mut pose = stale;
    let outcome = tracker().detect_checkerboard(&mut frame);
    assert_eq!(outcome, Outcome::NotFound);
    assert!(!outcome.write_pose(&mut pose));
    assert_eq!(pose, stale);
    assert_eq!(image, original);
}

#[test]
fn partially_visible_board_is_not_found() {
    init_logging();
    let size = PatternSize::new(8, 6);
    // Shift the board so that its right part leaves the frame.
    let pose = Pose {
        rvec: Vector3::zeros(),
        tvec: Vector3::new(1.5, -2.5, 12.5),
    };
    let mut image = render_board(&camera(), &pose, size);
    let mut frame = FrameBuffer::from_image(&mut image).unwrap();
    assert_eq!(tracker().detect_checkerboard(&mut frame), Outcome::NotFound);
}

#[test]
fn projects_board_points_into_output() {
    init_logging();
    let size = PatternSize::new(8, 6);
    let pose = frontal_pose();
    let mut image = render_board(&camera(), &pose, size);
    let mut output = RgbaImage::from_pixel(WIDTH, HEIGHT, BLACK);
    let original = image.clone();
    let expected = ground_truth(&camera(), &pose, size);

    let tracker = tracker();
    let mut frame = FrameBuffer::from_image(&mut image).unwrap();
    let mut output_frame = FrameBuffer::from_image(&mut output).unwrap();
    let points = [
        cv_ar::nalgebra::Point3::new(0.0, 0.0, 0.0),
        cv_ar::nalgebra::Point3::new(7.0, 5.0, 0.0),
        cv_ar::nalgebra::Point3::new(0.0, 0.0, -100.0),
    ];
    let overlay = tracker
        .project_points(&mut frame, &points, Some(&mut output_frame))
        .found()
        .unwrap();

    assert_eq!(image, original);
    assert!(output.pixels().any(|&p| p != BLACK));
    assert_eq!(overlay.image_points.len(), 3);
    let first = overlay.image_points[0].unwrap();
    let last = overlay.image_points[1].unwrap();
    assert!((first.x as f32 - expected[0].x).abs() < 1.0);
    assert!((last.y as f32 - expected[47].y).abs() < 1.0);
    // A point 100 squares towards the camera lies behind it.
    assert_eq!(overlay.image_points[2], None);
}
