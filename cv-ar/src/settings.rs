use crate::error::ConfigError;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// The settings for every stage of the per-frame pipeline.
///
/// All the constants that used to be baked into the frame callbacks live here so that
/// detection is reproducible and tunable. Call [`TrackerSettings::validate`] (or build a
/// [`crate::Tracker`], which does it for you) before using a hand-edited value.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerSettings {
    /// The factor by which frames are shrunk before detection.
    ///
    /// Larger ratios are faster and less accurate. Must be greater than `1.0`.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_downscale_ratio")
    )]
    pub downscale_ratio: f32,
    /// The calibration pattern geometry.
    #[cfg_attr(feature = "serde-serialize", serde(default))]
    pub pattern: PatternSettings,
    /// Chessboard corner detection on the downscaled frame.
    #[cfg_attr(feature = "serde-serialize", serde(default))]
    pub detector: DetectorSettings,
    /// Subpixel refinement on the full resolution frame.
    #[cfg_attr(feature = "serde-serialize", serde(default))]
    pub refine: RefineSettings,
    /// Robust pose estimation.
    #[cfg_attr(feature = "serde-serialize", serde(default))]
    pub pose: PoseSettings,
    /// The dual-threshold edge detector.
    #[cfg_attr(feature = "serde-serialize", serde(default))]
    pub edges: EdgeSettings,
    /// The probabilistic line-segment detector.
    #[cfg_attr(feature = "serde-serialize", serde(default))]
    pub lines: LineSettings,
    /// Colors and sizes used when painting feedback onto the frame.
    #[cfg_attr(feature = "serde-serialize", serde(default))]
    pub overlay: OverlaySettings,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            downscale_ratio: default_downscale_ratio(),
            pattern: PatternSettings::default(),
            detector: DetectorSettings::default(),
            refine: RefineSettings::default(),
            pose: PoseSettings::default(),
            edges: EdgeSettings::default(),
            lines: LineSettings::default(),
            overlay: OverlaySettings::default(),
        }
    }
}

impl TrackerSettings {
    /// Sets the [`TrackerSettings::downscale_ratio`].
    #[must_use]
    pub fn downscale_ratio(self, downscale_ratio: f32) -> Self {
        Self {
            downscale_ratio,
            ..self
        }
    }

    /// Sets the pattern to `columns` inner corners per row and `rows` rows of corners.
    #[must_use]
    pub fn pattern(self, columns: usize, rows: usize) -> Self {
        Self {
            pattern: PatternSettings {
                columns,
                rows,
                ..self.pattern
            },
            ..self
        }
    }

    /// Checks every field and reports the first one that is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.downscale_ratio.is_finite() || self.downscale_ratio <= 1.0 {
            return Err(ConfigError::DownscaleRatio(self.downscale_ratio));
        }
        self.pattern.validate()?;
        self.detector.validate()?;
        self.refine.validate()?;
        self.pose.validate()?;
        self.edges.validate()?;
        self.lines.validate()?;
        self.overlay.validate()
    }
}

fn default_downscale_ratio() -> f32 {
    2.0
}

/// Geometry of the chessboard, counted in inner corners.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatternSettings {
    /// Inner corners per row.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_columns"))]
    pub columns: usize,
    /// Rows of inner corners.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_rows"))]
    pub rows: usize,
    /// Side length of one square in model units, used to build planar model points.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_square_size"))]
    pub square_size: f64,
}

impl Default for PatternSettings {
    fn default() -> Self {
        Self {
            columns: default_columns(),
            rows: default_rows(),
            square_size: default_square_size(),
        }
    }
}

impl PatternSettings {
    /// Total number of inner corners.
    pub fn len(&self) -> usize {
        self.columns * self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.columns < 2 || self.rows < 2 {
            return Err(ConfigError::PatternSize {
                columns: self.columns,
                rows: self.rows,
            });
        }
        if !self.square_size.is_finite() || self.square_size <= 0.0 {
            return Err(ConfigError::SquareSize(self.square_size));
        }
        Ok(())
    }
}

fn default_columns() -> usize {
    8
}

fn default_rows() -> usize {
    6
}

fn default_square_size() -> f64 {
    1.0
}

/// Tuning for the chessboard corner detector.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorSettings {
    /// Corner candidates must respond with at least this fraction of the strongest response.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_relative_threshold")
    )]
    pub relative_threshold: f32,
    /// Radius of the non-maximum suppression window.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_nms_radius"))]
    pub nms_radius: u32,
    /// The number of strongest candidates tried as grid seeds before giving up on a frame.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_max_seeds"))]
    pub max_seeds: usize,
    /// Skip grid assembly when there are fewer candidates than pattern corners.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_fast_check"))]
    pub fast_check: bool,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            relative_threshold: default_relative_threshold(),
            nms_radius: default_nms_radius(),
            max_seeds: default_max_seeds(),
            fast_check: default_fast_check(),
        }
    }
}

impl DetectorSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.relative_threshold) {
            return Err(ConfigError::OutOfRange {
                field: "detector.relative_threshold",
                expected: "within [0, 1]",
                value: self.relative_threshold as f64,
            });
        }
        if self.max_seeds == 0 {
            return Err(ConfigError::OutOfRange {
                field: "detector.max_seeds",
                expected: "at least 1",
                value: 0.0,
            });
        }
        Ok(())
    }
}

fn default_relative_threshold() -> f32 {
    0.2
}

fn default_nms_radius() -> u32 {
    3
}

fn default_max_seeds() -> usize {
    16
}

fn default_fast_check() -> bool {
    true
}

/// Termination of the subpixel corner refiner.
///
/// Refinement stops after `max_iterations` or once a corner moves less than `epsilon`
/// pixels in one iteration, whichever happens first.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefineSettings {
    /// Side length of the square search window in full resolution pixels (odd).
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_window"))]
    pub window: usize,
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_refine_max_iterations")
    )]
    pub max_iterations: usize,
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_epsilon"))]
    pub epsilon: f32,
}

impl Default for RefineSettings {
    fn default() -> Self {
        Self {
            window: default_window(),
            max_iterations: default_refine_max_iterations(),
            epsilon: default_epsilon(),
        }
    }
}

impl RefineSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.window < 3 || self.window % 2 == 0 {
            return Err(ConfigError::RefineWindow(self.window));
        }
        if self.max_iterations == 0 {
            return Err(ConfigError::OutOfRange {
                field: "refine.max_iterations",
                expected: "at least 1",
                value: 0.0,
            });
        }
        if !self.epsilon.is_finite() || self.epsilon < 0.0 {
            return Err(ConfigError::OutOfRange {
                field: "refine.epsilon",
                expected: "finite and non-negative",
                value: self.epsilon as f64,
            });
        }
        Ok(())
    }
}

fn default_window() -> usize {
    11
}

fn default_refine_max_iterations() -> usize {
    30
}

fn default_epsilon() -> f32 {
    0.1
}

/// Robust pose estimation from 2D-3D correspondences.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseSettings {
    /// Maximum reprojection error in pixels for a correspondence to count as an inlier.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_reprojection_threshold")
    )]
    pub reprojection_threshold: f64,
    /// The fraction of correspondences that must agree with the pose.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_min_inlier_ratio")
    )]
    pub min_inlier_ratio: f64,
    /// Levenberg-Marquardt iterations spent polishing the consensus pose on its inliers.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_refine_iterations")
    )]
    pub refine_iterations: usize,
    /// Seed of the consensus sampler, reset on every call.
    #[cfg_attr(feature = "serde-serialize", serde(default))]
    pub seed: u64,
}

impl Default for PoseSettings {
    fn default() -> Self {
        Self {
            reprojection_threshold: default_reprojection_threshold(),
            min_inlier_ratio: default_min_inlier_ratio(),
            refine_iterations: default_refine_iterations(),
            seed: 0,
        }
    }
}

impl PoseSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if !self.reprojection_threshold.is_finite() || self.reprojection_threshold <= 0.0 {
            return Err(ConfigError::OutOfRange {
                field: "pose.reprojection_threshold",
                expected: "finite and positive",
                value: self.reprojection_threshold,
            });
        }
        if !(0.0..=1.0).contains(&self.min_inlier_ratio) {
            return Err(ConfigError::OutOfRange {
                field: "pose.min_inlier_ratio",
                expected: "within [0, 1]",
                value: self.min_inlier_ratio,
            });
        }
        Ok(())
    }
}

fn default_reprojection_threshold() -> f64 {
    8.0
}

fn default_min_inlier_ratio() -> f64 {
    0.5
}

fn default_refine_iterations() -> usize {
    20
}

/// Gradient thresholds of the edge detector.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeSettings {
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_low_threshold"))]
    pub low_threshold: f32,
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_high_threshold")
    )]
    pub high_threshold: f32,
}

impl Default for EdgeSettings {
    fn default() -> Self {
        Self {
            low_threshold: default_low_threshold(),
            high_threshold: default_high_threshold(),
        }
    }
}

impl EdgeSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        let Self {
            low_threshold: low,
            high_threshold: high,
        } = *self;
        if !low.is_finite() || !high.is_finite() || low < 0.0 || low > high {
            return Err(ConfigError::EdgeThresholds { low, high });
        }
        Ok(())
    }
}

fn default_low_threshold() -> f32 {
    50.0
}

fn default_high_threshold() -> f32 {
    200.0
}

/// Parameters of the probabilistic line-segment detector.
///
/// Lengths are in downscaled pixels, since that is the image the detector sees.
/// The angle resolution is fixed at one degree.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineSettings {
    /// Distance resolution of the accumulator.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_rho"))]
    pub rho: f32,
    /// Minimum accumulator votes before a segment is traced.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_vote_threshold")
    )]
    pub vote_threshold: u32,
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_min_line_length")
    )]
    pub min_line_length: f32,
    /// Largest run of missing edge pixels bridged inside one segment.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_max_line_gap"))]
    pub max_line_gap: f32,
    /// Stop after this many segments. Unbounded when `None`.
    #[cfg_attr(feature = "serde-serialize", serde(default))]
    pub max_lines: Option<usize>,
    /// Seed of the edge pixel visiting order, reset on every call.
    #[cfg_attr(feature = "serde-serialize", serde(default))]
    pub seed: u64,
}

impl Default for LineSettings {
    fn default() -> Self {
        Self {
            rho: default_rho(),
            vote_threshold: default_vote_threshold(),
            min_line_length: default_min_line_length(),
            max_line_gap: default_max_line_gap(),
            max_lines: None,
            seed: 0,
        }
    }
}

impl LineSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if !self.rho.is_finite() || self.rho <= 0.0 {
            return Err(ConfigError::OutOfRange {
                field: "lines.rho",
                expected: "finite and positive",
                value: self.rho as f64,
            });
        }
        if !self.min_line_length.is_finite() || self.min_line_length < 0.0 {
            return Err(ConfigError::OutOfRange {
                field: "lines.min_line_length",
                expected: "finite and non-negative",
                value: self.min_line_length as f64,
            });
        }
        if !self.max_line_gap.is_finite() || self.max_line_gap < 0.0 {
            return Err(ConfigError::OutOfRange {
                field: "lines.max_line_gap",
                expected: "finite and non-negative",
                value: self.max_line_gap as f64,
            });
        }
        Ok(())
    }
}

fn default_rho() -> f32 {
    1.0
}

fn default_vote_threshold() -> u32 {
    50
}

fn default_min_line_length() -> f32 {
    50.0
}

fn default_max_line_gap() -> f32 {
    20.0
}

/// How feedback is painted onto the full resolution frame.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlaySettings {
    /// RGBA color of extracted and caller-specified lines.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_line_color"))]
    pub line_color: [u8; 4],
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_line_thickness")
    )]
    pub line_thickness: u32,
    /// Radius of the marker drawn at each chessboard corner.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_corner_radius"))]
    pub corner_radius: u32,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            line_color: default_line_color(),
            line_thickness: default_line_thickness(),
            corner_radius: default_corner_radius(),
        }
    }
}

impl OverlaySettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.line_thickness == 0 {
            return Err(ConfigError::OutOfRange {
                field: "overlay.line_thickness",
                expected: "at least 1",
                value: 0.0,
            });
        }
        Ok(())
    }
}

fn default_line_color() -> [u8; 4] {
    [0, 0, 255, 255]
}

fn default_line_thickness() -> u32 {
    3
}

fn default_corner_radius() -> u32 {
    4
}
