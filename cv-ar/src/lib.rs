//! # `cv-ar`
//!
//! Per-frame chessboard tracking and straight edge extraction for augmented reality
//! overlays.
//!
//! A [`Tracker`] takes one RGBA camera frame at a time, wrapped in a [`FrameBuffer`].
//! It either locates a known chessboard and estimates its pose relative to the camera,
//! or it extracts the straight edges in the frame. Both paths run their detection on a
//! downscaled copy of the frame for speed and report results in full resolution frame
//! coordinates. Feedback is painted into the caller's buffer in place.
//!
//! ```no_run
//! use cv_ar::{CameraModel, FrameBuffer, Pose, Tracker, TrackerSettings};
//! use cv_ar::nalgebra::{Point2, Vector2};
//!
//! let camera = CameraModel::pinhole(Vector2::new(500.0, 500.0), Point2::new(320.0, 240.0));
//! let tracker = Tracker::with_planar_pattern(TrackerSettings::default(), camera).unwrap();
//!
//! let mut pixels = vec![0u8; 640 * 480 * 4];
//! let mut frame = FrameBuffer::from_raw(640, 480, &mut pixels).unwrap();
//! let mut pose = Pose::default();
//! if tracker.detect_checkerboard(&mut frame).write_pose(&mut pose) {
//!     println!("board at {:?}", pose.tvec);
//! }
//! ```
//!
//! ## Modules
//! * [`frame`] - wrapping caller buffers, gray conversion and downscaling
//! * [`chessboard`] - chessboard corner detection and grid assembly
//! * [`refine`] - subpixel corner refinement
//! * [`camera`] - `cv-pinhole` intrinsics with Brown-Conrady lens distortion
//! * [`pose`] - Lambda Twist under ARRSAC, Levenberg-Marquardt refinement and point projection
//! * [`lines`] and [`hough`] - straight edge extraction
//! * [`draw`] - painting overlays onto frames

pub mod camera;
pub mod chessboard;
pub mod draw;
mod error;
pub mod frame;
pub mod hough;
pub mod lines;
pub mod pose;
pub mod refine;
mod settings;
mod tracker;

pub use camera::{CameraModel, Distortion};
pub use chessboard::{detect_chessboard, CornerSet, PatternSize};
pub use draw::{draw_corners, draw_line, draw_lines};
pub use error::*;
pub use frame::{downscale, Downscaled, FrameBuffer};
pub use lines::{LineExtractor, LineSegment};
pub use pose::{project_points, ModelPoints, Pose, PoseEstimate, PoseEstimator};
pub use refine::CornerRefiner;
pub use settings::*;
pub use tracker::*;

pub use cv_core;
pub use cv_pinhole::{CameraIntrinsics, NormalizedKeyPoint};
pub use image;
pub use nalgebra;
