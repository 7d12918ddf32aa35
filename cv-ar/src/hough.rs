//! Progressive probabilistic Hough transform.
//!
//! Matas, J., Galambos, C. and Kittler, J., "Robust Detection of Lines Using the
//! Progressive Probabilistic Hough Transform", CVIU 2000.
//!
//! Edge pixels are visited in random order and vote into a `(theta, rho)`
//! accumulator. As soon as a bin collects enough votes, the line it stands for is
//! traced through the edge map in both directions, bridging gaps up to a limit. The
//! pixels of the traced segment are removed from the map, and if the segment is long
//! enough their votes are withdrawn, so that every pixel supports at most one line.

use crate::lines::LineSegment;
use crate::settings::LineSettings;
use image::{GrayImage, Luma};
use log::*;
use nalgebra::Point2;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::f32::consts::PI;

/// Angle resolution of the accumulator.
pub const THETA: f32 = PI / 180.0;

/// Fixed point shift of the line walk.
const SHIFT: i32 = 16;

/// Finds line segments in a binary edge map, in edge map coordinates.
///
/// Every non-zero pixel is an edge pixel. The visiting order is drawn from a
/// generator seeded with `settings.seed`, so the same input always gives the same
/// segments in the same order.
pub fn probabilistic_hough(edges: &GrayImage, settings: &LineSettings) -> Vec<LineSegment> {
    let (width, height) = edges.dimensions();
    let (width, height) = (width as i32, height as i32);
    let irho = 1.0 / settings.rho;
    let num_angle = (PI / THETA).round() as usize;
    let num_rho = (((width + height) * 2 + 1) as f32 / settings.rho).round() as i32;
    let rho_offset = (num_rho - 1) / 2;

    let trig: Vec<(f32, f32)> = (0..num_angle)
        .map(|n| {
            let angle = n as f32 * THETA;
            (angle.cos() * irho, angle.sin() * irho)
        })
        .collect();
    let bin = |n: usize, x: i32, y: i32| -> usize {
        let (cos, sin) = trig[n];
        let r = (x as f32 * cos + y as f32 * sin).round() as i32 + rho_offset;
        n * num_rho as usize + r.clamp(0, num_rho - 1) as usize
    };

    let mut accumulator = vec![0i32; num_angle * num_rho as usize];
    let mut mask: Vec<bool> = edges.pixels().map(|&Luma([v])| v != 0).collect();
    let mut pending: Vec<(i32, i32)> = edges
        .enumerate_pixels()
        .filter(|(_, _, pixel)| pixel[0] != 0)
        .map(|(x, y, _)| (x as i32, y as i32))
        .collect();
    trace!("Hough transform over {} edge pixels", pending.len());

    let threshold = settings.vote_threshold as i32;
    let min_length = settings.min_line_length;
    let max_gap = settings.max_line_gap;
    let mut rng = SmallRng::seed_from_u64(settings.seed);
    let mut segments = Vec::new();

    while !pending.is_empty() {
        let (x, y) = pending.swap_remove(rng.gen_range(0..pending.len()));
        if !mask[(y * width + x) as usize] {
            continue;
        }

        // Vote, remembering the strongest bin this pixel contributes to.
        let mut max_votes = threshold - 1;
        let mut max_n = 0;
        for n in 0..num_angle {
            let votes = &mut accumulator[bin(n, x, y)];
            *votes += 1;
            if max_votes < *votes {
                max_votes = *votes;
                max_n = n;
            }
        }
        if max_votes < threshold {
            continue;
        }

        // Walk along the line direction in fixed point, stepping one pixel on the major axis.
        let (cos, sin) = trig[max_n];
        let a = -sin;
        let b = cos;
        let (mut x0, mut y0) = (x, y);
        let x_major = a.abs() > b.abs();
        let (dx0, dy0) = if x_major {
            y0 = (y0 << SHIFT) + (1 << (SHIFT - 1));
            (
                if a > 0.0 { 1 } else { -1 },
                (b * (1 << SHIFT) as f32 / a.abs()).round() as i32,
            )
        } else {
            x0 = (x0 << SHIFT) + (1 << (SHIFT - 1));
            (
                (a * (1 << SHIFT) as f32 / b.abs()).round() as i32,
                if b > 0.0 { 1 } else { -1 },
            )
        };
        let pixel_at = |fx: i32, fy: i32| {
            if x_major {
                (fx, fy >> SHIFT)
            } else {
                (fx >> SHIFT, fy)
            }
        };

        let mut line_end = [(x, y); 2];
        for (k, end) in line_end.iter_mut().enumerate() {
            let (dx, dy) = if k == 0 { (dx0, dy0) } else { (-dx0, -dy0) };
            let (mut fx, mut fy) = (x0, y0);
            let mut gap = 0.0f32;
            loop {
                let (px, py) = pixel_at(fx, fy);
                if px < 0 || px >= width || py < 0 || py >= height {
                    break;
                }
                if mask[(py * width + px) as usize] {
                    gap = 0.0;
                    *end = (px, py);
                } else {
                    gap += 1.0;
                    if gap > max_gap {
                        break;
                    }
                }
                fx += dx;
                fy += dy;
            }
        }

        let good_line = ((line_end[1].0 - line_end[0].0).abs() as f32) >= min_length
            || ((line_end[1].1 - line_end[0].1).abs() as f32) >= min_length;

        // Clear the traced pixels, withdrawing their votes when the segment is kept.
        for (k, &end) in line_end.iter().enumerate() {
            let (dx, dy) = if k == 0 { (dx0, dy0) } else { (-dx0, -dy0) };
            let (mut fx, mut fy) = (x0, y0);
            loop {
                let (px, py) = pixel_at(fx, fy);
                let index = (py * width + px) as usize;
                if mask[index] {
                    if good_line {
                        for n in 0..num_angle {
                            accumulator[bin(n, px, py)] -= 1;
                        }
                    }
                    mask[index] = false;
                }
                if (px, py) == end {
                    break;
                }
                fx += dx;
                fy += dy;
            }
        }

        if good_line {
            segments.push(LineSegment::new(
                Point2::new(line_end[0].0 as f32, line_end[0].1 as f32),
                Point2::new(line_end[1].0 as f32, line_end[1].1 as f32),
            ));
            if settings.max_lines.map_or(false, |max| segments.len() >= max) {
                break;
            }
        }
    }
    segments
}
