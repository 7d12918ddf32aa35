use crate::frame::{upscale_point, Downscaled};
use crate::hough::probabilistic_hough;
use crate::settings::{EdgeSettings, LineSettings};
use image::GrayImage;
use imageproc::edges::canny;
use log::*;
use nalgebra::Point2;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// A straight segment between two image points.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineSegment {
    pub start: Point2<f32>,
    pub end: Point2<f32>,
}

impl LineSegment {
    pub fn new(start: Point2<f32>, end: Point2<f32>) -> Self {
        Self { start, end }
    }

    /// The segment as `[x1, y1, x2, y2]`.
    pub fn coords(&self) -> [f32; 4] {
        [self.start.x, self.start.y, self.end.x, self.end.y]
    }

    pub fn length(&self) -> f32 {
        (self.end - self.start).norm()
    }

    /// Multiplies both endpoints by `ratio`.
    #[must_use]
    pub fn upscaled(self, ratio: f32) -> Self {
        Self {
            start: upscale_point(self.start, ratio),
            end: upscale_point(self.end, ratio),
        }
    }
}

impl From<[f32; 4]> for LineSegment {
    fn from([x1, y1, x2, y2]: [f32; 4]) -> Self {
        Self::new(Point2::new(x1, y1), Point2::new(x2, y2))
    }
}

/// Straight edge extraction: Canny edges followed by the probabilistic Hough transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineExtractor {
    edges: EdgeSettings,
    lines: LineSettings,
}

impl LineExtractor {
    pub fn new(edges: EdgeSettings, lines: LineSettings) -> Self {
        Self { edges, lines }
    }

    /// Binary edge map of a grayscale image.
    pub fn edge_map(&self, gray: &GrayImage) -> GrayImage {
        let edges = canny(gray, self.edges.low_threshold, self.edges.high_threshold);
        trace!(
            "Canny edges with thresholds {} and {}",
            self.edges.low_threshold,
            self.edges.high_threshold
        );
        edges
    }

    /// Segments of a grayscale image in its own coordinates.
    pub fn extract_gray(&self, gray: &GrayImage) -> Vec<LineSegment> {
        let segments = probabilistic_hough(&self.edge_map(gray), &self.lines);
        debug!("Hough transform found {} segments", segments.len());
        segments
    }

    /// Segments of a downscaled frame, mapped back into full resolution frame coordinates.
    pub fn extract(&self, downscaled: &Downscaled) -> Vec<LineSegment> {
        let segments: Vec<LineSegment> = self
            .extract_gray(&downscaled.to_gray())
            .into_iter()
            .map(|segment| segment.upscaled(downscaled.ratio))
            .collect();
        trace!("Rescaled segments by {}", downscaled.ratio);
        segments
    }
}
