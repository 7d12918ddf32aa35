use thiserror::Error;

/// A frame buffer that cannot be processed.
///
/// These are precondition violations of the caller, not per-frame outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame has zero size ({width}x{height})")]
    ZeroSized { width: u32, height: u32 },
    #[error("frame buffer holds {actual} bytes but a {width}x{height} RGBA frame needs {expected}")]
    BufferSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

/// Invalid tracker settings or model description.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("downscale ratio must be finite and greater than 1.0, got {0}")]
    DownscaleRatio(f32),
    #[error("pattern must have at least 2x2 inner corners, got {columns}x{rows}")]
    PatternSize { columns: usize, rows: usize },
    #[error("pattern square size must be finite and positive, got {0}")]
    SquareSize(f64),
    #[error("{field} must be {expected}, got {value}")]
    OutOfRange {
        field: &'static str,
        expected: &'static str,
        value: f64,
    },
    #[error("refinement window must be odd and at least 3, got {0}")]
    RefineWindow(usize),
    #[error("edge thresholds must satisfy 0 <= low <= high, got low {low} and high {high}")]
    EdgeThresholds { low: f32, high: f32 },
    #[error("pattern has {expected} corners but {actual} model points were supplied")]
    ModelPoints { expected: usize, actual: usize },
}

/// Intrinsics that cannot describe a pinhole camera.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CameraError {
    #[error("focal lengths must be finite and positive, got ({fx}, {fy})")]
    Focals { fx: f64, fy: f64 },
    #[error("intrinsic matrix must be finite with a last row of [0 0 1]")]
    Matrix,
    #[error("distortion must have 0, 4, 5 or 8 coefficients, got {0}")]
    DistortionLength(usize),
    #[error("distortion coefficients must be finite")]
    DistortionValue,
}

/// The pose solver could not produce a consistent pose.
///
/// This is distinct from the pattern being absent: corners were found, but they
/// do not agree with the model points and the camera.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PoseError {
    #[error("{corners} image corners do not pair with {model_points} model points")]
    CorrespondenceMismatch { corners: usize, model_points: usize },
    #[error("{found} correspondences are not enough, at least {required} are required")]
    TooFewCorrespondences { found: usize, required: usize },
    #[error("sample consensus did not find any pose")]
    NoConsensus,
    #[error("only {inliers} of {total} correspondences agree with the best pose")]
    InsufficientInliers { inliers: usize, total: usize },
    #[error("pose refinement diverged")]
    Degenerate,
}

/// Every error the crate can produce.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error(transparent)]
    Pose(#[from] PoseError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
