use crate::camera::CameraModel;
use crate::chessboard::{detect_chessboard, CornerSet, PatternSize};
use crate::draw::{draw_corners, draw_line, draw_lines};
use crate::error::{ConfigError, PoseError};
use crate::frame::{downscale, FrameBuffer};
use crate::lines::{LineExtractor, LineSegment};
use crate::pose::{project_points, ModelPoints, Pose, PoseEstimator};
use crate::refine::CornerRefiner;
use crate::settings::TrackerSettings;
use image::Rgba;
use log::*;
use nalgebra::{Point2, Point3};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// The result of looking for the board in one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    /// The board was found and everything computed from it is valid.
    Found(T),
    /// The board is not (completely) visible. This is the common case and not an error.
    NotFound,
    /// The board was found but its corners do not yield a consistent pose.
    SolverFailed(SolverFailure),
}

/// Corners that were found but could not be turned into a pose.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverFailure {
    pub corners: CornerSet,
    pub error: PoseError,
}

impl<T> Outcome<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, Outcome::Found(_))
    }

    pub fn found(self) -> Option<T> {
        match self {
            Outcome::Found(found) => Some(found),
            _ => None,
        }
    }

    pub fn as_found(&self) -> Option<&T> {
        match self {
            Outcome::Found(found) => Some(found),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Found(found) => Outcome::Found(f(found)),
            Outcome::NotFound => Outcome::NotFound,
            Outcome::SolverFailed(failure) => Outcome::SolverFailed(failure),
        }
    }
}

impl<T: AsRef<BoardTrack>> Outcome<T> {
    /// Copies the pose into `pose` if the board was found and reports whether it did.
    ///
    /// `pose` is left untouched otherwise, so a stale value is never overwritten
    /// with garbage.
    pub fn write_pose(&self, pose: &mut Pose) -> bool {
        match self {
            Outcome::Found(found) => {
                *pose = found.as_ref().pose;
                true
            }
            _ => false,
        }
    }
}

/// A board located in a frame together with its pose.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct BoardTrack {
    /// Refined corners in full resolution frame coordinates.
    pub corners: CornerSet,
    pub pose: Pose,
    /// Indices of the corners that agree with the pose.
    pub inliers: Vec<usize>,
    /// Root mean square reprojection error of the inliers in pixels.
    pub rms_error: f64,
}

impl AsRef<BoardTrack> for BoardTrack {
    fn as_ref(&self) -> &BoardTrack {
        self
    }
}

/// A tracked board and caller supplied board points projected into the frame.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedOverlay {
    pub track: BoardTrack,
    /// One entry per input point, `None` for points behind the camera.
    pub image_points: Vec<Option<Point2<f64>>>,
}

impl AsRef<BoardTrack> for ProjectedOverlay {
    fn as_ref(&self) -> &BoardTrack {
        &self.track
    }
}

/// A cube standing on the board, as board points and the edges between them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CubeOverlay {
    pub vertices: [Point3<f64>; 8],
    pub edges: [(usize, usize); 12],
}

/// The cube with one corner at `origin` and sides of `size` along the board axes.
///
/// The first four vertices lie on the board and the last four above them, on the
/// camera side of the board (negative `z`).
pub fn cube_overlay(origin: Point3<f64>, size: f64) -> CubeOverlay {
    let offsets = [
        (0.0, 0.0, 0.0),
        (0.0, size, 0.0),
        (size, size, 0.0),
        (size, 0.0, 0.0),
        (0.0, 0.0, -size),
        (0.0, size, -size),
        (size, size, -size),
        (size, 0.0, -size),
    ];
    CubeOverlay {
        vertices: offsets.map(|(x, y, z)| origin + nalgebra::Vector3::new(x, y, z)),
        edges: [
            (0, 1),
            (1, 2),
            (2, 3),
            (3, 0),
            (0, 4),
            (1, 5),
            (2, 6),
            (3, 7),
            (4, 5),
            (5, 6),
            (6, 7),
            (7, 4),
        ],
    }
}

/// Processes camera frames one at a time.
///
/// A tracker only holds read-only configuration. Every intermediate image is
/// allocated by the call that needs it and every random generator is seeded from
/// the settings, so a tracker can be shared between threads and processing the
/// same frame twice gives the same result.
#[derive(Debug, Clone)]
pub struct Tracker {
    settings: TrackerSettings,
    camera: CameraModel,
    model_points: ModelPoints,
    refiner: CornerRefiner,
    estimator: PoseEstimator,
    extractor: LineExtractor,
}

impl Tracker {
    /// Validates the settings and checks that there is one model point per corner.
    pub fn new(
        settings: TrackerSettings,
        camera: CameraModel,
        model_points: ModelPoints,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;
        model_points.check(PatternSize::from(settings.pattern))?;
        Ok(Self {
            settings,
            camera,
            model_points,
            refiner: CornerRefiner::new(settings.refine),
            estimator: PoseEstimator::new(settings.pose),
            extractor: LineExtractor::new(settings.edges, settings.lines),
        })
    }

    /// A tracker for the flat board described by `settings.pattern`.
    pub fn with_planar_pattern(
        settings: TrackerSettings,
        camera: CameraModel,
    ) -> Result<Self, ConfigError> {
        let model_points = ModelPoints::from_pattern(&settings.pattern);
        Self::new(settings, camera, model_points)
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    pub fn camera(&self) -> &CameraModel {
        &self.camera
    }

    pub fn model_points(&self) -> &ModelPoints {
        &self.model_points
    }

    pub fn pattern_size(&self) -> PatternSize {
        PatternSize::from(self.settings.pattern)
    }

    /// Finds the board corners in full resolution frame coordinates.
    ///
    /// Detection runs on a downscaled copy of the frame. The corners are mapped back
    /// and then refined against the full resolution image.
    pub fn locate_board(&self, frame: &FrameBuffer<'_>) -> Option<CornerSet> {
        let downscaled = downscale(frame, self.settings.downscale_ratio);
        let small_gray = downscaled.to_gray();
        trace!("Converted downscaled frame to gray");
        let mut corners =
            detect_chessboard(&small_gray, self.pattern_size(), &self.settings.detector)?;
        corners.upscale(downscaled.ratio);

        let gray = frame.to_gray();
        self.refiner.refine(&gray, &mut corners);
        debug!("Located {} board corners", corners.len());
        Some(corners)
    }

    /// Finds the board, estimates its pose and draws its corners onto the frame.
    ///
    /// Corners get row colors when the pose was solved and are marked red when the
    /// board was found but the solver failed.
    pub fn detect_checkerboard(&self, frame: &mut FrameBuffer<'_>) -> Outcome<BoardTrack> {
        let corners = match self.locate_board(frame) {
            Some(corners) => corners,
            None => {
                debug!("Checkerboard not found");
                return Outcome::NotFound;
            }
        };
        let outcome = self.track(corners);
        self.draw_board(frame, &outcome);
        outcome
    }

    /// Finds the board, estimates its pose and projects `points` from board
    /// coordinates into the frame with the full camera model.
    ///
    /// The corners are drawn onto `output` when one is given, otherwise onto `frame`,
    /// in the same style as [`Tracker::detect_checkerboard`].
    pub fn project_points(
        &self,
        frame: &mut FrameBuffer<'_>,
        points: &[Point3<f64>],
        output: Option<&mut FrameBuffer<'_>>,
    ) -> Outcome<ProjectedOverlay> {
        let corners = match self.locate_board(frame) {
            Some(corners) => corners,
            None => {
                debug!("Checkerboard not found, nothing projected");
                return Outcome::NotFound;
            }
        };
        let outcome = self.track(corners);
        match output {
            Some(output) => self.draw_board(output, &outcome),
            None => self.draw_board(frame, &outcome),
        }
        outcome.map(|track| {
            let image_points = project_points(&self.camera, &track.pose, points);
            trace!("Projected {} points", image_points.len());
            ProjectedOverlay {
                track,
                image_points,
            }
        })
    }

    /// Extracts straight edges, draws them onto the frame and returns them in frame
    /// coordinates. An empty result is a normal outcome.
    pub fn detect_contour(&self, frame: &mut FrameBuffer<'_>) -> Vec<LineSegment> {
        let downscaled = downscale(frame, self.settings.downscale_ratio);
        let segments = self.extractor.extract(&downscaled);
        draw_lines(
            frame,
            &segments,
            self.line_color(),
            self.settings.overlay.line_thickness,
        );
        debug!("Drew {} contour segments", segments.len());
        segments
    }

    /// Draws a caller specified segment with the configured color and thickness.
    pub fn draw_line_coord(
        &self,
        frame: &mut FrameBuffer<'_>,
        start: Point2<f32>,
        end: Point2<f32>,
    ) {
        let thickness = self.settings.overlay.line_thickness;
        draw_line(frame, start, end, self.line_color(), thickness);
    }

    fn line_color(&self) -> Rgba<u8> {
        Rgba(self.settings.overlay.line_color)
    }

    fn draw_board(&self, frame: &mut FrameBuffer<'_>, outcome: &Outcome<BoardTrack>) {
        let (corners, solved) = match outcome {
            Outcome::Found(track) => (&track.corners, true),
            Outcome::SolverFailed(failure) => (&failure.corners, false),
            Outcome::NotFound => return,
        };
        draw_corners(
            frame,
            corners.points(),
            corners.size().columns,
            solved,
            self.settings.overlay.corner_radius,
        );
    }

    fn track(&self, corners: CornerSet) -> Outcome<BoardTrack> {
        match self
            .estimator
            .estimate(&self.camera, &self.model_points, corners.points())
        {
            Ok(estimate) => {
                info!(
                    "Board pose rvec {:?} tvec {:?}",
                    estimate.pose.rvec.as_slice(),
                    estimate.pose.tvec.as_slice()
                );
                Outcome::Found(BoardTrack {
                    corners,
                    pose: estimate.pose,
                    inliers: estimate.inliers,
                    rms_error: estimate.rms_error,
                })
            }
            Err(error) => {
                warn!("Board found but its pose could not be solved: {}", error);
                Outcome::SolverFailed(SolverFailure { corners, error })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use nalgebra::Vector2;

    fn camera() -> CameraModel {
        CameraModel::pinhole(Vector2::new(500.0, 500.0), Point2::new(320.0, 240.0))
    }

    #[test]
    fn tracker_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Tracker>();
    }

    #[test]
    fn rejects_wrong_model_point_count() {
        let model = ModelPoints::planar_grid(PatternSize::new(3, 3), 1.0);
        assert_eq!(
            Tracker::new(TrackerSettings::default(), camera(), model).unwrap_err(),
            ConfigError::ModelPoints {
                expected: 48,
                actual: 9
            }
        );
    }

    #[test]
    fn pose_is_written_only_when_found() {
        let mut pose = Pose {
            rvec: nalgebra::Vector3::new(1.0, 2.0, 3.0),
            tvec: nalgebra::Vector3::new(4.0, 5.0, 6.0),
        };
        let before = pose;
        assert!(!Outcome::<BoardTrack>::NotFound.write_pose(&mut pose));
        assert_eq!(pose, before);

        let corners = CornerSet::new(PatternSize::new(2, 2), vec![Point2::origin(); 4]).unwrap();
        let failed: Outcome<BoardTrack> = Outcome::SolverFailed(SolverFailure {
            corners: corners.clone(),
            error: PoseError::NoConsensus,
        });
        assert!(!failed.write_pose(&mut pose));
        assert_eq!(pose, before);

        let found = Outcome::Found(BoardTrack {
            corners,
            pose: Pose::default(),
            inliers: vec![],
            rms_error: 0.0,
        });
        assert!(found.write_pose(&mut pose));
        assert_eq!(pose, Pose::default());
    }

    #[test]
    fn cube_rises_toward_the_camera() {
        let cube = cube_overlay(Point3::new(1.0, 2.0, 0.0), 3.0);
        assert_eq!(cube.vertices[2], Point3::new(4.0, 5.0, 0.0));
        assert_eq!(cube.vertices[6], Point3::new(4.0, 5.0, -3.0));
        for (a, b) in cube.edges {
            let length = (cube.vertices[a] - cube.vertices[b]).norm();
            assert!((length - 3.0).abs() < 1e-12);
        }
    }

    #[test]
    fn draws_caller_line() {
        let tracker = Tracker::with_planar_pattern(TrackerSettings::default(), camera()).unwrap();
        let mut image = RgbaImage::from_pixel(50, 50, Rgba([0, 0, 0, 255]));
        let mut frame = FrameBuffer::from_image(&mut image).unwrap();
        tracker.draw_line_coord(&mut frame, Point2::new(5.0, 25.0), Point2::new(45.0, 25.0));
        assert_eq!(*image.get_pixel(25, 25), Rgba([0, 0, 255, 255]));
    }
}
