//! Renders the `cv-ar` overlays onto still images.
//!
//! Each function takes the decoded image, runs one tracker entry point on an RGBA
//! copy of it and hands back the painted copy along with what was found.

use cv_ar::nalgebra::{Point2, Point3};
use cv_ar::{
    cube_overlay, downscale, BoardTrack, FrameBuffer, LineExtractor, LineSegment, Outcome,
    ProjectedOverlay, Tracker, TrackerSettings,
};
use image::{DynamicImage, RgbaImage};
use log::*;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("settings: {0}")]
    Settings(#[from] serde_json::Error),
    #[error(transparent)]
    Tracker(#[from] cv_ar::Error),
}

impl From<cv_ar::FrameError> for Error {
    fn from(e: cv_ar::FrameError) -> Self {
        Self::Tracker(e.into())
    }
}

impl From<cv_ar::ConfigError> for Error {
    fn from(e: cv_ar::ConfigError) -> Self {
        Self::Tracker(e.into())
    }
}

impl From<cv_ar::CameraError> for Error {
    fn from(e: cv_ar::CameraError) -> Self {
        Self::Tracker(e.into())
    }
}

/// What to draw onto the input image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Board corners, with the pose logged.
    Checkerboard,
    /// Straight edges.
    Contour,
    /// A wireframe cube standing on the board.
    Cube,
    /// The binary edge map the contour mode runs on.
    Edges,
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "checkerboard" => Ok(Self::Checkerboard),
            "contour" => Ok(Self::Contour),
            "cube" => Ok(Self::Cube),
            "edges" => Ok(Self::Edges),
            _ => Err(format!(
                "unknown mode {:?}, expected checkerboard, contour, cube or edges",
                s
            )),
        }
    }
}

pub fn render_checkerboard(
    tracker: &Tracker,
    image: &DynamicImage,
) -> Result<(RgbaImage, Outcome<BoardTrack>), Error> {
    let mut rgba = image.to_rgba8();
    let outcome = tracker.detect_checkerboard(&mut FrameBuffer::from_image(&mut rgba)?);
    Ok((rgba, outcome))
}

pub fn render_contour(
    tracker: &Tracker,
    image: &DynamicImage,
) -> Result<(RgbaImage, Vec<LineSegment>), Error> {
    let mut rgba = image.to_rgba8();
    let segments = tracker.detect_contour(&mut FrameBuffer::from_image(&mut rgba)?);
    Ok((rgba, segments))
}

/// Draws a cube with sides of `size` board units on the first board square.
pub fn render_cube(
    tracker: &Tracker,
    image: &DynamicImage,
    size: f64,
) -> Result<(RgbaImage, Outcome<ProjectedOverlay>), Error> {
    let mut rgba = image.to_rgba8();
    let cube = cube_overlay(Point3::origin(), size);
    let outcome = {
        let mut frame = FrameBuffer::from_image(&mut rgba)?;
        let outcome = tracker.project_points(&mut frame, &cube.vertices, None);
        if let Some(overlay) = outcome.as_found() {
            let mut drawn = 0;
            for &(a, b) in &cube.edges {
                if let (Some(a), Some(b)) = (overlay.image_points[a], overlay.image_points[b]) {
                    tracker.draw_line_coord(&mut frame, pixel(a), pixel(b));
                    drawn += 1;
                }
            }
            debug!("Drew {} of {} cube edges", drawn, cube.edges.len());
        }
        outcome
    };
    Ok((rgba, outcome))
}

/// Replaces the image with the edge map of its downscaled copy, scaled back up.
pub fn render_edges(
    settings: &TrackerSettings,
    image: &DynamicImage,
) -> Result<RgbaImage, Error> {
    settings.validate()?;
    let mut rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    {
        let mut frame = FrameBuffer::from_image(&mut rgba)?;
        let downscaled = downscale(&frame, settings.downscale_ratio);
        let extractor = LineExtractor::new(settings.edges, settings.lines);
        let edges = extractor.edge_map(&downscaled.to_gray());
        let edges = image::imageops::resize(
            &edges,
            width,
            height,
            image::imageops::FilterType::Nearest,
        );
        frame.paint_gray(&edges);
    }
    Ok(rgba)
}

fn pixel(point: Point2<f64>) -> Point2<f32> {
    Point2::new(point.x as f32, point.y as f32)
}
