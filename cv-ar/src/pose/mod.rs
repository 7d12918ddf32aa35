//! Board pose from 2D-3D correspondences.
//!
//! The estimator runs in three steps:
//!
//! 1. Corners are undistorted into normalized image coordinates.
//! 2. ARRSAC samples triples of correspondences, solves each with the
//!    [`LambdaTwist`] P3P solver and keeps the pose most correspondences agree with.
//! 3. The consensus pose is refined on its inliers with Levenberg-Marquardt on the
//!    pixel reprojection error.
//!
//! Any failure along the way is a [`PoseError`], which the caller must keep apart
//! from the board simply not being visible.

mod refine;

pub use refine::{refine_pose, Observation, Refined};

use crate::camera::CameraModel;
use crate::chessboard::PatternSize;
use crate::error::{ConfigError, PoseError};
use crate::settings::{PatternSettings, PoseSettings};
use arrsac::Arrsac;
use cv_core::nalgebra as cv;
use cv_core::{FeatureWorldMatch, Projective, WorldPoint, WorldToCamera};
use cv_pinhole::NormalizedKeyPoint;
use derive_more::{Deref, From, Into};
use lambda_twist::LambdaTwist;
use log::*;
use nalgebra::{IsometryMatrix3, Point2, Point3, Rotation3, Translation3, Vector3};
use rand::{rngs::SmallRng, SeedableRng};
use sample_consensus::Consensus;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// The rigid transform from board coordinates into camera coordinates.
///
/// `rvec` is a rotation vector (axis times angle in radians) and `tvec` the
/// position of the board origin in the camera frame, both in the OpenCV convention.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pose {
    pub rvec: Vector3<f64>,
    pub tvec: Vector3<f64>,
}

impl Pose {
    pub fn rotation(&self) -> Rotation3<f64> {
        Rotation3::new(self.rvec)
    }

    pub fn isometry(&self) -> IsometryMatrix3<f64> {
        IsometryMatrix3::from_parts(Translation3::from(self.tvec), self.rotation())
    }

    /// Moves a board point into the camera frame.
    pub fn transform(&self, point: Point3<f64>) -> Point3<f64> {
        self.isometry() * point
    }
}

/// The board plays the part of the world for the P3P solver.
impl From<WorldToCamera> for Pose {
    fn from(WorldToCamera(isometry): WorldToCamera) -> Self {
        let rvec = isometry.rotation.scaled_axis();
        let tvec = isometry.translation.vector;
        Self {
            rvec: Vector3::new(rvec.x, rvec.y, rvec.z),
            tvec: Vector3::new(tvec.x, tvec.y, tvec.z),
        }
    }
}

impl From<Pose> for WorldToCamera {
    fn from(pose: Pose) -> Self {
        let rotation = cv::Rotation3::new(cv::Vector3::new(pose.rvec.x, pose.rvec.y, pose.rvec.z));
        let translation = cv::Translation3::new(pose.tvec.x, pose.tvec.y, pose.tvec.z);
        Self(cv::IsometryMatrix3::from_parts(translation, rotation))
    }
}

/// A corner as a bearing out of the camera paired with its board point.
type Correspondence = FeatureWorldMatch<NormalizedKeyPoint>;

fn correspondence(normalized: NormalizedKeyPoint, model: Point3<f64>) -> Correspondence {
    let model = WorldPoint::from_point(cv::Point3::new(model.x, model.y, model.z));
    FeatureWorldMatch(normalized, model)
}

/// Converts a pixel tolerance into the cosine distance [`WorldToCamera`] residuals use.
///
/// A corner `pixels` away from the principal point subtends this cosine distance
/// with the optical axis.
pub fn cosine_threshold(pixels: f64, focal: f64) -> f64 {
    1.0 - (pixels / focal).atan().cos()
}

/// The 3D board corners in the board's own frame, in the raster order of the corners.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Deref, From, Into)]
pub struct ModelPoints(Vec<Point3<f64>>);

impl ModelPoints {
    pub fn new(points: Vec<Point3<f64>>) -> Self {
        Self(points)
    }

    /// The flat grid `(column * square_size, row * square_size, 0)` in raster order.
    pub fn planar_grid(size: PatternSize, square_size: f64) -> Self {
        Self(
            (0..size.rows)
                .flat_map(|row| {
                    (0..size.columns).map(move |column| {
                        Point3::new(column as f64 * square_size, row as f64 * square_size, 0.0)
                    })
                })
                .collect(),
        )
    }

    pub fn from_pattern(pattern: &PatternSettings) -> Self {
        Self::planar_grid(PatternSize::from(*pattern), pattern.square_size)
    }

    /// Checks that there is one point per corner of `size`.
    pub fn check(&self, size: PatternSize) -> Result<(), ConfigError> {
        if self.len() != size.len() {
            return Err(ConfigError::ModelPoints {
                expected: size.len(),
                actual: self.len(),
            });
        }
        if self.iter().any(|p| !p.coords.iter().all(|v| v.is_finite())) {
            return Err(ConfigError::OutOfRange {
                field: "model_points",
                expected: "finite coordinates",
                value: f64::NAN,
            });
        }
        Ok(())
    }
}

/// The result of a successful pose estimate.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct PoseEstimate {
    pub pose: Pose,
    /// Indices of the correspondences that agree with the pose.
    pub inliers: Vec<usize>,
    /// Root mean square reprojection error of the inliers in pixels.
    pub rms_error: f64,
}

/// Robust pose estimation from board corners.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseEstimator {
    settings: PoseSettings,
    solver: LambdaTwist,
}

impl PoseEstimator {
    /// The fewest correspondences that let consensus choose between P3P solutions.
    pub const MIN_CORRESPONDENCES: usize = 4;

    pub fn new(settings: PoseSettings) -> Self {
        Self {
            settings,
            solver: LambdaTwist::new(),
        }
    }

    pub fn settings(&self) -> &PoseSettings {
        &self.settings
    }

    /// Estimates the pose of the board from its corners.
    ///
    /// `corners[i]` must be the image of `model[i]`. The consensus sampler is seeded
    /// from the settings on every call, so identical inputs give identical poses.
    pub fn estimate(
        &self,
        camera: &CameraModel,
        model: &ModelPoints,
        corners: &[Point2<f32>],
    ) -> Result<PoseEstimate, PoseError> {
        if corners.len() != model.len() {
            return Err(PoseError::CorrespondenceMismatch {
                corners: corners.len(),
                model_points: model.len(),
            });
        }
        if corners.len() < Self::MIN_CORRESPONDENCES {
            return Err(PoseError::TooFewCorrespondences {
                found: corners.len(),
                required: Self::MIN_CORRESPONDENCES,
            });
        }

        let pixels: Vec<Point2<f64>> = corners
            .iter()
            .map(|p| Point2::new(p.x as f64, p.y as f64))
            .collect();
        let correspondences: Vec<Correspondence> = pixels
            .iter()
            .zip(model.iter())
            .map(|(&pixel, &model)| correspondence(camera.normalize(pixel), model))
            .collect();

        let threshold = cosine_threshold(self.settings.reprojection_threshold, camera.mean_focal());
        let mut consensus = Arrsac::new(threshold, SmallRng::seed_from_u64(self.settings.seed));
        let (hypothesis, inliers) = consensus
            .model_inliers(&self.solver, correspondences.iter().copied())
            .ok_or(PoseError::NoConsensus)?;

        let total = correspondences.len();
        let required = (self.settings.min_inlier_ratio * total as f64).ceil() as usize;
        debug!("ARRSAC found {} of {} inliers", inliers.len(), total);
        if inliers.len() < required.max(3) {
            return Err(PoseError::InsufficientInliers {
                inliers: inliers.len(),
                total,
            });
        }

        let observations: Vec<Observation> = inliers
            .iter()
            .map(|&ix| Observation {
                model: model[ix],
                pixel: pixels[ix],
            })
            .collect();
        let refined = refine_pose(
            camera,
            &observations,
            Pose::from(hypothesis),
            self.settings.refine_iterations,
        )?;
        debug!(
            "Refined pose on {} inliers with an RMS error of {:.3} px",
            observations.len(),
            refined.rms_error
        );

        Ok(PoseEstimate {
            pose: refined.pose,
            inliers,
            rms_error: refined.rms_error,
        })
    }
}

/// Projects board points into the image with the full camera model.
///
/// Points on or behind the camera plane have no projection and come back as `None`.
pub fn project_points(
    camera: &CameraModel,
    pose: &Pose,
    points: &[Point3<f64>],
) -> Vec<Option<Point2<f64>>> {
    let isometry = pose.isometry();
    points
        .iter()
        .map(|&point| camera.project(isometry * point))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use sample_consensus::Model;
    use nalgebra::Vector2;

    #[test]
    fn planar_grid_is_raster_ordered() {
        let points = ModelPoints::planar_grid(PatternSize::new(3, 2), 0.5);
        assert_eq!(points.len(), 6);
        assert_eq!(points[1], Point3::new(0.5, 0.0, 0.0));
        assert_eq!(points[3], Point3::new(0.0, 0.5, 0.0));
        assert_eq!(points.check(PatternSize::new(2, 3)), Ok(()));
        assert!(points.check(PatternSize::new(4, 2)).is_err());
    }

    #[test]
    fn pose_round_trips_through_world_to_camera() {
        let pose = Pose {
            rvec: Vector3::new(0.3, -0.2, 0.1),
            tvec: Vector3::new(1.0, 2.0, 3.0),
        };
        let back = Pose::from(WorldToCamera::from(pose));
        assert_relative_eq!(back.rvec, pose.rvec, epsilon = 1e-12);
        assert_relative_eq!(back.tvec, pose.tvec, epsilon = 1e-12);
    }

    #[test]
    fn residual_matches_pixel_threshold() {
        let camera = CameraModel::pinhole(Vector2::new(500.0, 500.0), Point2::new(320.0, 240.0));
        let pose = WorldToCamera::from(Pose {
            rvec: Vector3::zeros(),
            tvec: Vector3::new(0.0, 0.0, 5.0),
        });
        let model = Point3::origin();
        let exact = correspondence(camera.normalize(Point2::new(320.0, 240.0)), model);
        assert!(pose.residual(&exact) < 1e-12);

        let off = correspondence(camera.normalize(Point2::new(328.0, 240.0)), model);
        assert_relative_eq!(
            pose.residual(&off),
            cosine_threshold(8.0, camera.mean_focal()),
            epsilon = 1e-12
        );
    }

    #[test]
    fn mismatched_lengths_fail() {
        let camera = CameraModel::pinhole(Vector2::new(500.0, 500.0), Point2::new(320.0, 240.0));
        let estimator = PoseEstimator::new(PoseSettings::default());
        let model = ModelPoints::planar_grid(PatternSize::new(3, 2), 1.0);
        assert_eq!(
            estimator.estimate(&camera, &model, &[Point2::origin(); 5]),
            Err(PoseError::CorrespondenceMismatch {
                corners: 5,
                model_points: 6
            })
        );
    }

    #[test]
    fn projection_skips_points_behind_camera() {
        let camera = CameraModel::pinhole(Vector2::new(500.0, 500.0), Point2::new(320.0, 240.0));
        let pose = Pose {
            rvec: Vector3::zeros(),
            tvec: Vector3::new(0.0, 0.0, 2.0),
        };
        let projected = project_points(
            &camera,
            &pose,
            &[Point3::new(0.0, 0.0, 0.0), Point3::new(0.0, 0.0, -3.0)],
        );
        assert_eq!(projected[0], Some(Point2::new(320.0, 240.0)));
        assert_eq!(projected[1], None);
    }
}
