//! Painting feedback onto frames.
//!
//! Everything here draws in place and never fails. Geometry outside the image is
//! clipped before it reaches the rasterizer.

use crate::frame::FrameBuffer;
use crate::lines::LineSegment;
use image::Rgba;
use imageproc::drawing::{
    draw_filled_circle_mut, draw_hollow_circle_mut, draw_line_segment_mut, Canvas,
};
use nalgebra::{Point2, Vector2};

/// Row colors of a found board, cycling from red through blue to magenta.
pub const ROW_COLORS: [Rgba<u8>; 7] = [
    Rgba([255, 0, 0, 255]),
    Rgba([255, 128, 0, 255]),
    Rgba([200, 200, 0, 255]),
    Rgba([0, 255, 0, 255]),
    Rgba([0, 200, 200, 255]),
    Rgba([0, 0, 255, 255]),
    Rgba([255, 0, 255, 255]),
];

/// Marker color of corners when the board was not found.
pub const NOT_FOUND_COLOR: Rgba<u8> = Rgba([255, 0, 0, 255]);

/// Draws chessboard corners given in raster order with `columns` corners per row.
///
/// A found board gets one color per row and a polyline through the corners in
/// order. Otherwise every corner is marked in red without connections.
pub fn draw_corners(
    frame: &mut FrameBuffer<'_>,
    corners: &[Point2<f32>],
    columns: usize,
    found: bool,
    radius: u32,
) {
    let canvas = frame.rgba_mut();
    let columns = columns.max(1);
    let mut previous: Option<Point2<f32>> = None;
    for (ix, &corner) in corners.iter().enumerate() {
        let color = if found {
            ROW_COLORS[(ix / columns) % ROW_COLORS.len()]
        } else {
            NOT_FOUND_COLOR
        };
        if found {
            if let Some(previous) = previous {
                paint_segment(canvas, previous, corner, color, 1);
            }
            previous = Some(corner);
        }
        mark(canvas, corner, color, radius);
    }
}

/// Draws a line of the given thickness with round ends.
pub fn draw_line(
    frame: &mut FrameBuffer<'_>,
    start: Point2<f32>,
    end: Point2<f32>,
    color: Rgba<u8>,
    thickness: u32,
) {
    paint_segment(frame.rgba_mut(), start, end, color, thickness);
}

/// Draws every segment with the same color and thickness.
pub fn draw_lines(
    frame: &mut FrameBuffer<'_>,
    segments: &[LineSegment],
    color: Rgba<u8>,
    thickness: u32,
) {
    let canvas = frame.rgba_mut();
    for segment in segments {
        paint_segment(canvas, segment.start, segment.end, color, thickness);
    }
}

/// A circle with a diagonal cross, the corner marker.
fn mark<C: Canvas<Pixel = Rgba<u8>>>(
    canvas: &mut C,
    center: Point2<f32>,
    color: Rgba<u8>,
    radius: u32,
) {
    if !center.x.is_finite() || !center.y.is_finite() {
        return;
    }
    let r = radius as f32;
    let (width, height) = canvas.dimensions();
    if center.x < -r
        || center.y < -r
        || center.x > width as f32 + r
        || center.y > height as f32 + r
    {
        return;
    }
    draw_hollow_circle_mut(
        canvas,
        (center.x.round() as i32, center.y.round() as i32),
        radius as i32,
        color,
    );
    let d = r * std::f32::consts::FRAC_1_SQRT_2;
    let diagonals = [
        (Vector2::new(-d, -d), Vector2::new(d, d)),
        (Vector2::new(-d, d), Vector2::new(d, -d)),
    ];
    for (from, to) in diagonals {
        paint_segment(canvas, center + from, center + to, color, 1);
    }
}

fn paint_segment<C: Canvas<Pixel = Rgba<u8>>>(
    canvas: &mut C,
    start: Point2<f32>,
    end: Point2<f32>,
    color: Rgba<u8>,
    thickness: u32,
) {
    let (width, height) = canvas.dimensions();
    let margin = thickness as f32;
    let (start, end) = match clip_segment(
        start,
        end,
        Point2::new(-margin, -margin),
        Point2::new(width as f32 + margin, height as f32 + margin),
    ) {
        Some(clipped) => clipped,
        None => return,
    };

    if thickness <= 1 {
        draw_line_segment_mut(canvas, (start.x, start.y), (end.x, end.y), color);
        return;
    }

    // A band of parallel strokes with round caps.
    let half = (thickness - 1) as f32 / 2.0;
    let direction = end - start;
    let normal = if direction.norm() > f32::EPSILON {
        Vector2::new(-direction.y, direction.x).normalize()
    } else {
        Vector2::zeros()
    };
    let strokes = (2.0 * half).ceil() as i32 * 2;
    for k in 0..=strokes {
        let offset = normal * (-half + half * 2.0 * k as f32 / strokes as f32);
        let (a, b) = (start + offset, end + offset);
        draw_line_segment_mut(canvas, (a.x, a.y), (b.x, b.y), color);
    }
    let cap = (thickness / 2) as i32;
    for point in [start, end] {
        let center = (point.x.round() as i32, point.y.round() as i32);
        draw_filled_circle_mut(canvas, center, cap, color);
    }
}

/// Clips a segment to an axis aligned box with the Liang-Barsky algorithm.
///
/// Returns `None` when no part of the segment lies inside the box or a coordinate
/// is not finite.
pub fn clip_segment(
    start: Point2<f32>,
    end: Point2<f32>,
    min: Point2<f32>,
    max: Point2<f32>,
) -> Option<(Point2<f32>, Point2<f32>)> {
    if !(start.coords.iter().chain(end.coords.iter())).all(|v| v.is_finite()) {
        return None;
    }
    let delta = end - start;
    let mut t0 = 0.0f32;
    let mut t1 = 1.0f32;
    let edges = [
        (-delta.x, start.x - min.x),
        (delta.x, max.x - start.x),
        (-delta.y, start.y - min.y),
        (delta.y, max.y - start.y),
    ];
    for (p, q) in edges {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let t = q / p;
        if p < 0.0 {
            t0 = t0.max(t);
        } else {
            t1 = t1.min(t);
        }
        if t0 > t1 {
            return None;
        }
    }
    Some((start + delta * t0, start + delta * t1))
}
