#![allow(dead_code)]

use cv_ar::image::{Rgba, RgbaImage};
use cv_ar::nalgebra::{Point2, Point3, Vector2, Vector3};
use cv_ar::{CameraModel, PatternSize, Pose};

pub const WIDTH: u32 = 640;
pub const HEIGHT: u32 = 480;

pub const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);
pub const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

pub fn init_logging() {
    let _ = pretty_env_logger::try_init();
}

pub fn camera() -> CameraModel {
    CameraModel::pinhole(Vector2::new(500.0, 500.0), Point2::new(320.0, 240.0))
}

/// The intrinsics of the phone the tracker was first used with.
pub fn phone_camera() -> CameraModel {
    #[rustfmt::skip]
    let matrix = cv_ar::nalgebra::Matrix3::new(
        517.65350405, 0.0,          319.06418667,
        0.0,          518.2757208,  238.78380146,
        0.0,          0.0,          1.0,
    );
    CameraModel::new(
        matrix,
        &[0.209547937, -1.21926310, -0.00129976649, 0.00252504602, 2.26952234],
    )
    .unwrap()
}

/// An 8x6 board with unit squares facing the camera, with 40 pixel squares and the
/// first inner corner at pixel (180, 140).
pub fn frontal_pose() -> Pose {
    Pose {
        rvec: Vector3::zeros(),
        tvec: Vector3::new(-3.5, -2.5, 12.5),
    }
}

/// Renders a chessboard of `size` inner corners with unit squares seen from `pose`.
///
/// The inner corner in row `i` and column `j` sits at board point `(j, i, 0)`. The
/// board is surrounded by white. Every pixel is supersampled 4x4.
pub fn render_board(camera: &CameraModel, pose: &Pose, size: PatternSize) -> RgbaImage {
    let rotation = pose.rotation();
    let center = -(rotation.inverse() * pose.tvec);
    let mut image = RgbaImage::new(WIDTH, HEIGHT);
    for (u, v, pixel) in image.enumerate_pixels_mut() {
        let mut sum = 0.0;
        for sy in 0..4 {
            for sx in 0..4 {
                let sample = Point2::new(
                    u as f64 - 0.375 + 0.25 * sx as f64,
                    v as f64 - 0.375 + 0.25 * sy as f64,
                );
                sum += board_intensity(camera, &rotation, &center, sample, size);
            }
        }
        let value = (sum / 16.0).round() as u8;
        *pixel = Rgba([value, value, value, 255]);
    }
    image
}

fn board_intensity(
    camera: &CameraModel,
    rotation: &cv_ar::nalgebra::Rotation3<f64>,
    center: &Vector3<f64>,
    pixel: Point2<f64>,
    size: PatternSize,
) -> f64 {
    let normalized = camera.calibrate(pixel);
    let direction = rotation.inverse() * Vector3::new(normalized.x, normalized.y, 1.0);
    if direction.z.abs() < 1e-12 {
        return 255.0;
    }
    let lambda = -center.z / direction.z;
    if lambda <= 0.0 {
        return 255.0;
    }
    let point = center + direction * lambda;
    let (x, y) = (point.x.floor() as i64, point.y.floor() as i64);
    let inside =
        x >= -1 && y >= -1 && x < size.columns as i64 && y < size.rows as i64;
    if inside && (x + y).rem_euclid(2) == 0 {
        0.0
    } else {
        255.0
    }
}

/// Where the inner corners of the board land in the image, in raster order.
pub fn ground_truth(camera: &CameraModel, pose: &Pose, size: PatternSize) -> Vec<Point2<f32>> {
    (0..size.rows)
        .flat_map(|row| (0..size.columns).map(move |column| (row, column)))
        .map(|(row, column)| {
            let point = pose.transform(Point3::new(column as f64, row as f64, 0.0));
            let pixel = camera.project(point).unwrap();
            Point2::new(pixel.x as f32, pixel.y as f32)
        })
        .collect()
}

pub fn max_distance(found: &[Point2<f32>], expected: &[Point2<f32>]) -> f32 {
    assert_eq!(found.len(), expected.len());
    found
        .iter()
        .zip(expected)
        .map(|(a, b)| (a - b).norm())
        .fold(0.0, f32::max)
}
