use super::Pose;
use crate::camera::CameraModel;
use crate::error::PoseError;
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use log::*;
use nalgebra::{
    dimension::{Dynamic, U1, U6},
    storage::Owned,
    DVector, OMatrix, Point2, Point3, VecStorage, Vector3, Vector6,
};

/// A board point and the pixel it was observed at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub model: Point3<f64>,
    pub pixel: Point2<f64>,
}

/// A pose polished by [`refine_pose`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Refined {
    pub pose: Pose,
    /// Root mean square reprojection error in pixels.
    pub rms_error: f64,
}

/// Pixel reprojection error of a set of observations as a function of the pose.
///
/// The parameters are the translation followed by the rotation vector. Each
/// observation contributes its `u` and `v` error, and the projection includes lens
/// distortion, so the minimum is in the same units as the inlier threshold.
#[derive(Clone)]
struct ReprojectionProblem<'a> {
    camera: &'a CameraModel,
    observations: &'a [Observation],
    translation: Vector3<f64>,
    rotation: Vector3<f64>,
}

impl<'a> ReprojectionProblem<'a> {
    fn new(camera: &'a CameraModel, observations: &'a [Observation], pose: Pose) -> Self {
        Self {
            camera,
            observations,
            translation: pose.tvec,
            rotation: pose.rvec,
        }
    }

    fn pose(&self) -> Pose {
        Pose {
            rvec: self.rotation,
            tvec: self.translation,
        }
    }

    /// Sum of squared pixel errors, `None` if a point is not in front of the camera.
    fn cost(&self) -> Option<f64> {
        self.residuals()
            .map(|residuals| residuals.norm_squared())
            .filter(|cost| cost.is_finite())
    }
}

impl<'a> LeastSquaresProblem<f64, Dynamic, U6> for ReprojectionProblem<'a> {
    type ResidualStorage = VecStorage<f64, Dynamic, U1>;
    type JacobianStorage = VecStorage<f64, Dynamic, U6>;
    type ParameterStorage = Owned<f64, U6>;

    fn set_params(&mut self, x: &Vector6<f64>) {
        self.translation = x.xyz();
        self.rotation = Vector3::new(x[3], x[4], x[5]);
    }

    fn params(&self) -> Vector6<f64> {
        let (t, r) = (self.translation, self.rotation);
        Vector6::new(t.x, t.y, t.z, r.x, r.y, r.z)
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        let pose = self.pose().isometry();
        let mut residuals = DVector::zeros(2 * self.observations.len());
        for (ix, observation) in self.observations.iter().enumerate() {
            let error = self.camera.project(pose * observation.model)? - observation.pixel;
            residuals[2 * ix] = error.x;
            residuals[2 * ix + 1] = error.y;
        }
        Some(residuals)
    }

    /// Central differences, one residual vector per perturbed parameter.
    fn jacobian(&self) -> Option<OMatrix<f64, Dynamic, U6>> {
        let params = self.params();
        let mut shifted_problem = self.clone();
        let mut jacobian = OMatrix::<f64, Dynamic, U6>::zeros(2 * self.observations.len());
        for k in 0..6 {
            let h = 1e-6 * params[k].abs().max(1.0);
            let mut shifted = params;
            shifted[k] = params[k] + h;
            shifted_problem.set_params(&shifted);
            let forward = shifted_problem.residuals()?;
            shifted[k] = params[k] - h;
            shifted_problem.set_params(&shifted);
            let backward = shifted_problem.residuals()?;
            jacobian.set_column(k, &((forward - backward) / (2.0 * h)));
        }
        Some(jacobian)
    }
}

/// Levenberg-Marquardt on the pixel reprojection error of the observations.
///
/// `iterations` bounds the residual evaluations the solver may spend per parameter.
/// A starting pose that puts an observation behind the camera is
/// [`PoseError::Degenerate`]. If the solver ends up worse than it started, which
/// happens when it stops on a numerical problem, the starting pose is kept.
pub fn refine_pose(
    camera: &CameraModel,
    observations: &[Observation],
    initial: Pose,
    iterations: usize,
) -> Result<Refined, PoseError> {
    let problem = ReprojectionProblem::new(camera, observations, initial);
    let initial_cost = problem.cost().ok_or(PoseError::Degenerate)?;

    let (pose, cost) = if iterations == 0 || observations.is_empty() {
        (initial, initial_cost)
    } else {
        let (problem, report) = LevenbergMarquardt::new()
            .with_patience(iterations)
            .minimize(problem);
        trace!(
            "Pose refinement stopped with {:?} after {} evaluations",
            report.termination,
            report.number_of_evaluations
        );
        match problem.cost() {
            Some(cost) if cost <= initial_cost => (problem.pose(), cost),
            _ => {
                debug!(
                    "Pose refinement failed with {:?}, keeping the consensus pose",
                    report.termination
                );
                (initial, initial_cost)
            }
        }
    };

    let rms_error = if observations.is_empty() {
        0.0
    } else {
        (cost / observations.len() as f64).sqrt()
    };
    Ok(Refined { pose, rms_error })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use levenberg_marquardt::differentiate_numerically;
    use nalgebra::Vector2;

    #[test]
    fn pulls_perturbed_pose_back() {
        let camera = CameraModel::pinhole(Vector2::new(500.0, 500.0), Point2::new(320.0, 240.0));
        let truth = Pose {
            rvec: Vector3::new(0.1, -0.2, 0.05),
            tvec: Vector3::new(-1.0, 0.5, 10.0),
        };
        let observations: Vec<Observation> = (0..4)
            .flat_map(|row| (0..5).map(move |column| Point3::new(column as f64, row as f64, 0.0)))
            .map(|model| Observation {
                model,
                pixel: camera.project(truth.transform(model)).unwrap(),
            })
            .collect();
        let start = Pose {
            rvec: truth.rvec + Vector3::new(0.02, 0.01, -0.03),
            tvec: truth.tvec + Vector3::new(0.1, -0.1, 0.5),
        };

        let refined = refine_pose(&camera, &observations, start, 50).unwrap();
        assert!(refined.rms_error < 1e-6);
        assert_relative_eq!(refined.pose.rvec, truth.rvec, epsilon = 1e-6);
        assert_relative_eq!(refined.pose.tvec, truth.tvec, epsilon = 1e-6);
    }

    #[test]
    fn jacobian_follows_projection() {
        let camera = CameraModel::pinhole(Vector2::new(500.0, 500.0), Point2::new(320.0, 240.0));
        let observations = [Observation {
            model: Point3::new(1.0, 0.0, 0.0),
            pixel: Point2::new(370.0, 240.0),
        }];
        let pose = Pose {
            rvec: Vector3::zeros(),
            tvec: Vector3::new(0.0, 0.0, 10.0),
        };
        let jacobian = ReprojectionProblem::new(&camera, &observations, pose)
            .jacobian()
            .unwrap();
        assert_eq!(jacobian.shape(), (2, 6));
        // u = 320 + 500 (x + tx) / tz with the point at x = 1 and tz = 10.
        assert_relative_eq!(jacobian[(0, 0)], 50.0, epsilon = 1e-4);
        assert_relative_eq!(jacobian[(0, 2)], -5.0, epsilon = 1e-4);
        assert_relative_eq!(jacobian[(1, 1)], 50.0, epsilon = 1e-4);
    }

    #[test]
    fn jacobian_agrees_with_crate_differentiation() {
        let camera = CameraModel::new(
            nalgebra::Matrix3::new(520.0, 0.0, 319.0, 0.0, 518.0, 239.0, 0.0, 0.0, 1.0),
            &[0.2, -1.2, -0.001, 0.0025, 2.3],
        )
        .unwrap();
        let observations: Vec<Observation> = (0..3)
            .flat_map(|row| (0..4).map(move |column| Point3::new(column as f64, row as f64, 0.0)))
            .map(|model| Observation {
                model,
                pixel: Point2::new(300.0, 200.0),
            })
            .collect();
        let mut problem = ReprojectionProblem::new(
            &camera,
            &observations,
            Pose {
                rvec: Vector3::new(0.2, -0.1, 0.05),
                tvec: Vector3::new(-1.5, -1.0, 9.0),
            },
        );
        let ours = problem.jacobian().unwrap();
        let theirs = differentiate_numerically(&mut problem).unwrap();
        assert_relative_eq!(ours, theirs, epsilon = 1e-3, max_relative = 1e-5);
    }

    #[test]
    fn zero_iterations_keep_the_pose() {
        let camera = CameraModel::pinhole(Vector2::new(500.0, 500.0), Point2::new(320.0, 240.0));
        let observations = [Observation {
            model: Point3::origin(),
            pixel: Point2::new(323.0, 244.0),
        }];
        let pose = Pose {
            rvec: Vector3::zeros(),
            tvec: Vector3::new(0.0, 0.0, 5.0),
        };
        let refined = refine_pose(&camera, &observations, pose, 0).unwrap();
        assert_eq!(refined.pose, pose);
        assert_relative_eq!(refined.rms_error, 5.0, epsilon = 1e-9);
    }

    #[test]
    fn rejects_pose_behind_camera() {
        let camera = CameraModel::pinhole(Vector2::new(500.0, 500.0), Point2::new(320.0, 240.0));
        let observations = [Observation {
            model: Point3::origin(),
            pixel: Point2::new(320.0, 240.0),
        }];
        let behind = Pose {
            rvec: Vector3::zeros(),
            tvec: Vector3::new(0.0, 0.0, -5.0),
        };
        assert_eq!(
            refine_pose(&camera, &observations, behind, 10),
            Err(PoseError::Degenerate)
        );
    }
}
