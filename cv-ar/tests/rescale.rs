mod common;

use common::*;
use cv_ar::frame::{downscale, downscaled_dimensions, upscale_point};
use cv_ar::nalgebra::Point2;
use cv_ar::{FrameBuffer, LineSegment, PatternSize, Tracker, TrackerSettings};

#[test]
fn integer_ratio_maps_back_exactly() {
    for &(x, y) in &[(0.0, 0.0), (180.0, 140.0), (638.0, 478.0), (321.0, 17.0)] {
        let small = Point2::new(x / 2.0, y / 2.0);
        assert_eq!(upscale_point(small, 2.0), Point2::new(x, y));
    }
}

#[test]
fn fractional_ratio_stays_within_a_pixel() {
    for x in (0..640).step_by(37) {
        for y in (0..480).step_by(29) {
            let point = Point2::new(x as f32, y as f32);
            let small = Point2::new(point.x / 2.5, point.y / 2.5);
            assert!((upscale_point(small, 2.5) - point).norm() < 1.0);
        }
    }
}

#[test]
fn segments_scale_with_their_frame() {
    let segment = LineSegment::from([40.0, 80.0, 216.0, 80.0]).upscaled(2.5);
    assert_eq!(segment.coords(), [100.0, 200.0, 540.0, 200.0]);
}

#[test]
fn downscaled_copy_has_rounded_size() {
    let mut image = render_board(&camera(), &frontal_pose(), PatternSize::new(8, 6));
    let frame = FrameBuffer::from_image(&mut image).unwrap();
    for ratio in [2.0, 2.5, 3.0] {
        let small = downscale(&frame, ratio);
        assert_eq!(
            small.image.dimensions(),
            downscaled_dimensions((WIDTH, HEIGHT), ratio)
        );
        assert_eq!(
            small.upscale_point(Point2::new(10.0, 4.0)),
            Point2::new(10.0 * ratio, 4.0 * ratio)
        );
    }
}

#[test]
fn corners_come_back_in_frame_coordinates() {
    init_logging();
    let size = PatternSize::new(8, 6);
    let pose = frontal_pose();
    let expected = ground_truth(&camera(), &pose, size);
    for ratio in [2.0, 2.5] {
        let settings = TrackerSettings::default().downscale_ratio(ratio);
        let tracker = Tracker::with_planar_pattern(settings, camera()).unwrap();
        let mut image = render_board(&camera(), &pose, size);
        let frame = FrameBuffer::from_image(&mut image).unwrap();
        let corners = tracker.locate_board(&frame).unwrap();
        assert!(
            max_distance(corners.points(), &expected) < 1.0,
            "corners drifted at ratio {}",
            ratio
        );
    }
}
