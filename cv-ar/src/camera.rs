use crate::error::CameraError;
use cv_core::nalgebra as cv;
use cv_core::{CameraModel as _, KeyPoint};
use cv_pinhole::{CameraIntrinsics, NormalizedKeyPoint};
use nalgebra::{Matrix3, Point2, Point3, Vector2};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Lens distortion in the Brown-Conrady form used by OpenCV.
///
/// Coefficients are `k1 k2 p1 p2 k3 k4 k5 k6`. The radial factor is
///
/// ```text
/// (1 + k1 r² + k2 r⁴ + k3 r⁶) / (1 + k4 r² + k5 r⁴ + k6 r⁶)
/// ```
///
/// and `p1 p2` are the decentering (tangential) terms. Missing coefficients are zero.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Distortion {
    pub radial: [f64; 3],
    pub tangential: [f64; 2],
    pub rational: [f64; 3],
}

impl Distortion {
    /// Builds the distortion from an OpenCV coefficient vector of length 0, 4, 5 or 8.
    pub fn from_coefficients(coefficients: &[f64]) -> Result<Self, CameraError> {
        if !matches!(coefficients.len(), 0 | 4 | 5 | 8) {
            return Err(CameraError::DistortionLength(coefficients.len()));
        }
        if coefficients.iter().any(|c| !c.is_finite()) {
            return Err(CameraError::DistortionValue);
        }
        let at = |ix: usize| coefficients.get(ix).copied().unwrap_or(0.0);
        Ok(Self {
            radial: [at(0), at(1), at(4)],
            tangential: [at(2), at(3)],
            rational: [at(5), at(6), at(7)],
        })
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::default()
    }

    /// Distorts an ideal normalized image point.
    pub fn distort(&self, point: Vector2<f64>) -> Vector2<f64> {
        let [k1, k2, k3] = self.radial;
        let [k4, k5, k6] = self.rational;
        let [p1, p2] = self.tangential;
        let (x, y) = (point.x, point.y);
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        let radial = (1.0 + k1 * r2 + k2 * r4 + k3 * r6) / (1.0 + k4 * r2 + k5 * r4 + k6 * r6);
        Vector2::new(
            x * radial + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x),
            y * radial + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y,
        )
    }

    /// Inverts [`Distortion::distort`] by fixed-point iteration.
    pub fn undistort(&self, distorted: Vector2<f64>) -> Vector2<f64> {
        if self.is_identity() {
            return distorted;
        }
        let [k1, k2, k3] = self.radial;
        let [k4, k5, k6] = self.rational;
        let [p1, p2] = self.tangential;
        let mut point = distorted;
        for _ in 0..200 {
            let (x, y) = (point.x, point.y);
            let r2 = x * x + y * y;
            let r4 = r2 * r2;
            let r6 = r4 * r2;
            let inv_radial =
                (1.0 + k4 * r2 + k5 * r4 + k6 * r6) / (1.0 + k1 * r2 + k2 * r4 + k3 * r6);
            let dx = 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
            let dy = p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;
            let next = Vector2::new(
                (distorted.x - dx) * inv_radial,
                (distorted.y - dy) * inv_radial,
            );
            let step = (next - point).norm_squared();
            point = next;
            if step < 1e-24 {
                break;
            }
        }
        point
    }
}

/// Intrinsic camera parameters and lens distortion.
///
/// The linear part is a [`CameraIntrinsics`] from `cv-pinhole`. Distortion is applied
/// on the normalized image plane between it and the pixel grid. This is supplied by
/// a calibration done elsewhere and only read while frames are processed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraModel {
    pub intrinsics: CameraIntrinsics,
    pub distortion: Distortion,
}

impl CameraModel {
    /// Builds a camera from a 3x3 intrinsic matrix and OpenCV distortion coefficients.
    pub fn new(matrix: Matrix3<f64>, distortion: &[f64]) -> Result<Self, CameraError> {
        if matrix.iter().any(|v| !v.is_finite())
            || matrix[(1, 0)] != 0.0
            || matrix[(2, 0)] != 0.0
            || matrix[(2, 1)] != 0.0
            || matrix[(2, 2)] != 1.0
        {
            return Err(CameraError::Matrix);
        }
        let (fx, fy) = (matrix[(0, 0)], matrix[(1, 1)]);
        if fx <= 0.0 || fy <= 0.0 {
            return Err(CameraError::Focals { fx, fy });
        }
        let intrinsics = CameraIntrinsics::identity()
            .focals(cv::Vector2::new(fx, fy))
            .principal_point(cv::Point2::new(matrix[(0, 2)], matrix[(1, 2)]))
            .skew(matrix[(0, 1)]);
        Ok(Self {
            intrinsics,
            distortion: Distortion::from_coefficients(distortion)?,
        })
    }

    /// A camera without distortion.
    pub fn pinhole(focals: Vector2<f64>, principal_point: Point2<f64>) -> Self {
        Self {
            intrinsics: CameraIntrinsics::identity()
                .focals(cv::Vector2::new(focals.x, focals.y))
                .principal_point(cv::Point2::new(principal_point.x, principal_point.y)),
            distortion: Distortion::default(),
        }
    }

    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::from_column_slice(self.intrinsics.matrix().as_slice())
    }

    /// Mean focal length, used to express pixel tolerances in normalized units.
    pub fn mean_focal(&self) -> f64 {
        0.5 * (self.intrinsics.focals.x + self.intrinsics.focals.y)
    }

    /// Converts a pixel into an undistorted normalized image point.
    pub fn calibrate(&self, pixel: Point2<f64>) -> Point2<f64> {
        let NormalizedKeyPoint(distorted) = self
            .intrinsics
            .calibrate(KeyPoint(cv::Point2::new(pixel.x, pixel.y)));
        Point2::from(self.distortion.undistort(Vector2::new(distorted.x, distorted.y)))
    }

    /// The undistorted keypoint of a pixel, as the pose solvers consume it.
    pub fn normalize(&self, pixel: Point2<f64>) -> NormalizedKeyPoint {
        let normalized = self.calibrate(pixel);
        NormalizedKeyPoint(cv::Point2::new(normalized.x, normalized.y))
    }

    /// Converts an undistorted normalized image point into a pixel.
    pub fn uncalibrate(&self, normalized: Point2<f64>) -> Point2<f64> {
        let distorted = self.distortion.distort(normalized.coords);
        let KeyPoint(pixel) = self
            .intrinsics
            .uncalibrate(NormalizedKeyPoint(cv::Point2::new(distorted.x, distorted.y)));
        Point2::new(pixel.x, pixel.y)
    }

    /// Projects a point in camera coordinates into the image.
    ///
    /// Returns `None` for points on or behind the optical center.
    pub fn project(&self, point: Point3<f64>) -> Option<Point2<f64>> {
        if point.z <= f64::EPSILON {
            return None;
        }
        Some(self.uncalibrate(Point2::new(point.x / point.z, point.y / point.z)))
    }
}
