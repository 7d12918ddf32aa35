//! Chessboard corner detection.
//!
//! Corners are found in two steps. First every pixel is scored with the ChESS
//! response (Bennett and Lasenby, "ChESS - Quick and Robust Detection of
//! Chess-board Features", 2014), which is strongly positive at the X-junction
//! where four squares meet and negative on plain edges and at the L-shaped
//! corners along the outer border of the board. The local maxima of the response
//! are then linked into a grid by walking from a seed corner to its neighbors,
//! extrapolating the next position from the previous step so that perspective
//! foreshortening is followed. Only a complete `columns` x `rows` grid is accepted.

use crate::settings::{DetectorSettings, PatternSettings};
use chess_corners_core::detect::{detect_corners_from_response, merge_corners_simple};
use chess_corners_core::response::chess_response_u8;
use chess_corners_core::ChessParams;
use float_ord::FloatOrd;
use image::GrayImage;
use log::*;
use nalgebra::{Point2, Vector2};
use std::collections::{HashMap, VecDeque};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

pub use chess_corners_core::ResponseMap;

/// A linked corner may sit at most this fraction of a grid step away from its prediction.
const LINK_TOLERANCE: f32 = 0.35;

/// The inner corner layout of a chessboard.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PatternSize {
    /// Corners per row.
    pub columns: usize,
    /// Rows of corners.
    pub rows: usize,
}

impl PatternSize {
    pub fn new(columns: usize, rows: usize) -> Self {
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.columns * self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<PatternSettings> for PatternSize {
    fn from(pattern: PatternSettings) -> Self {
        Self::new(pattern.columns, pattern.rows)
    }
}

/// The corners of one detected chessboard in raster order.
///
/// Corner `row * columns + column` is the intersection in the given row and column.
/// A corner set is always complete: it holds exactly `columns * rows` points.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct CornerSet {
    size: PatternSize,
    points: Vec<Point2<f32>>,
}

impl CornerSet {
    /// Returns `None` unless `points` has exactly one point per pattern corner.
    pub fn new(size: PatternSize, points: Vec<Point2<f32>>) -> Option<Self> {
        if size.is_empty() || points.len() != size.len() {
            return None;
        }
        Some(Self { size, points })
    }

    pub fn size(&self) -> PatternSize {
        self.size
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[Point2<f32>] {
        &self.points
    }

    /// Mutable access to the corner positions. The number of corners cannot change.
    pub fn points_mut(&mut self) -> &mut [Point2<f32>] {
        &mut self.points
    }

    pub fn get(&self, row: usize, column: usize) -> Option<Point2<f32>> {
        if row < self.size.rows && column < self.size.columns {
            Some(self.points[row * self.size.columns + column])
        } else {
            None
        }
    }

    /// Iterates over the rows of corners.
    pub fn rows(&self) -> impl Iterator<Item = &[Point2<f32>]> + '_ {
        self.points.chunks(self.size.columns)
    }

    /// Multiplies every corner by `ratio`, mapping downscaled coordinates to frame space.
    pub fn upscale(&mut self, ratio: f32) {
        for point in &mut self.points {
            *point = crate::frame::upscale_point(*point, ratio);
        }
    }
}

/// A local maximum of the ChESS response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub point: Point2<f32>,
    pub strength: f32,
}

/// Finds a complete chessboard of `size` in a grayscale image.
///
/// `None` means the board is not (fully) visible, which is the normal outcome for
/// most frames.
pub fn detect_chessboard(
    gray: &GrayImage,
    size: PatternSize,
    settings: &DetectorSettings,
) -> Option<CornerSet> {
    let candidates = corner_candidates(gray, settings);
    trace!("Found {} corner candidates", candidates.len());
    if settings.fast_check && candidates.len() < size.len() {
        trace!(
            "Fast check rejected the frame: {} candidates for {} corners",
            candidates.len(),
            size.len()
        );
        return None;
    }

    let mut seeds: Vec<usize> = (0..candidates.len()).collect();
    seeds.sort_unstable_by_key(|&ix| std::cmp::Reverse(FloatOrd(candidates[ix].strength)));
    let corners = seeds
        .into_iter()
        .take(settings.max_seeds)
        .find_map(|seed| assemble_grid(&candidates, seed, size));
    match &corners {
        Some(_) => debug!("Assembled a {}x{} chessboard", size.columns, size.rows),
        None => trace!("No complete {}x{} grid", size.columns, size.rows),
    }
    corners
}

/// The ChESS detector parameters for `settings`, on the canonical radius 5 ring.
pub fn chess_params(settings: &DetectorSettings) -> ChessParams {
    ChessParams {
        threshold_rel: settings.relative_threshold,
        nms_radius: settings.nms_radius,
        ..ChessParams::default()
    }
}

/// Computes the ChESS response of every pixel.
///
/// Pixels closer than the ring radius to the border have a response of zero.
pub fn chess_response(gray: &GrayImage, settings: &DetectorSettings) -> ResponseMap {
    let (width, height) = gray.dimensions();
    chess_response_u8(
        gray.as_raw(),
        width as usize,
        height as usize,
        &chess_params(settings),
    )
}

/// Extracts the local maxima of the ChESS response with subpixel positions.
///
/// Maxima on a plateau of equal response are merged into the strongest one.
pub fn corner_candidates(gray: &GrayImage, settings: &DetectorSettings) -> Vec<Candidate> {
    let response = chess_response(gray, settings);
    let mut corners = detect_corners_from_response(&response, &chess_params(settings));
    merge_corners_simple(&mut corners, settings.nms_radius as f32)
        .into_iter()
        .map(|corner| Candidate {
            point: Point2::new(corner.xy[0], corner.xy[1]),
            strength: corner.strength,
        })
        .collect()
}

#[derive(Debug, Clone, Copy)]
struct Node {
    candidate: usize,
    /// The most recent step observed along each grid axis at this node.
    axes: [Vector2<f32>; 2],
}

type Cell = (i32, i32);

fn neighbor(cell: Cell, axis: usize, sign: i32) -> Cell {
    match axis {
        0 => (cell.0 + sign, cell.1),
        _ => (cell.0, cell.1 + sign),
    }
}

/// Grows a grid of linked corners from `seed` and orders it if it matches `size`.
fn assemble_grid(candidates: &[Candidate], seed: usize, size: PatternSize) -> Option<CornerSet> {
    let position = |ix: usize| candidates[ix].point;
    let axes = seed_axes(candidates, seed)?;

    let mut used = vec![false; candidates.len()];
    let mut grid: HashMap<Cell, Node> = HashMap::new();
    let mut queue = VecDeque::new();
    used[seed] = true;
    grid.insert(
        (0, 0),
        Node {
            candidate: seed,
            axes,
        },
    );
    queue.push_back((0, 0));

    while let Some(cell) = queue.pop_front() {
        let node = grid[&cell];
        let here = position(node.candidate);
        for axis in 0..2 {
            for sign in [1, -1] {
                let next = neighbor(cell, axis, sign);
                if grid.contains_key(&next) {
                    continue;
                }
                let step = match grid.get(&neighbor(cell, axis, -sign)) {
                    Some(behind) => here - position(behind.candidate),
                    None => node.axes[axis] * sign as f32,
                };
                let prediction = here + step;
                let radius = LINK_TOLERANCE * step.norm();
                let found = nearest_unused(candidates, &used, prediction, radius);
                if let Some(found) = found {
                    used[found] = true;
                    let mut axes = node.axes;
                    axes[axis] = (position(found) - here) * sign as f32;
                    grid.insert(
                        next,
                        Node {
                            candidate: found,
                            axes,
                        },
                    );
                    if grid.len() > size.len() {
                        return None;
                    }
                    queue.push_back(next);
                }
            }
        }
    }

    if grid.len() != size.len() {
        return None;
    }
    order_grid(candidates, &grid, size)
}

/// Picks the two grid axes at a seed from its nearest, roughly perpendicular neighbors.
fn seed_axes(candidates: &[Candidate], seed: usize) -> Option<[Vector2<f32>; 2]> {
    let origin = candidates[seed].point;
    let mut neighbors: Vec<Vector2<f32>> = candidates
        .iter()
        .enumerate()
        .filter(|&(ix, _)| ix != seed)
        .map(|(_, c)| c.point - origin)
        .collect();
    neighbors.sort_unstable_by_key(|d| FloatOrd(d.norm_squared()));
    neighbors.truncate(8);

    let (&first, rest) = neighbors.split_first()?;
    let first_norm = first.norm();
    if first_norm <= f32::EPSILON {
        return None;
    }
    let second = rest.iter().copied().find(|d| {
        let norm = d.norm();
        let ratio = norm / first_norm;
        let cos = first.dot(d) / (first_norm * norm);
        cos.abs() < 0.5 && (0.5..=2.0).contains(&ratio)
    })?;
    Some([first, second])
}

fn nearest_unused(
    candidates: &[Candidate],
    used: &[bool],
    target: Point2<f32>,
    radius: f32,
) -> Option<usize> {
    candidates
        .iter()
        .enumerate()
        .filter(|&(ix, _)| !used[ix])
        .map(|(ix, c)| (ix, (c.point - target).norm_squared()))
        .filter(|&(_, d2)| d2 <= radius * radius)
        .min_by_key(|&(_, d2)| FloatOrd(d2))
        .map(|(ix, _)| ix)
}

/// Orders a complete rectangular grid into raster order.
///
/// Rows run along the axis with `columns` corners. Rows are read left to right and
/// the row order is chosen to keep the board right-handed in image coordinates,
/// so that the model points never see a mirrored board.
fn order_grid(
    candidates: &[Candidate],
    grid: &HashMap<Cell, Node>,
    size: PatternSize,
) -> Option<CornerSet> {
    let mut min = [i32::MAX; 2];
    let mut max = [i32::MIN; 2];
    for &(i, j) in grid.keys() {
        min = [min[0].min(i), min[1].min(j)];
        max = [max[0].max(i), max[1].max(j)];
    }
    let span = [
        (max[0] - min[0] + 1) as usize,
        (max[1] - min[1] + 1) as usize,
    ];
    if span[0] * span[1] != grid.len() {
        return None;
    }

    let direction = |axis: usize| -> Vector2<f32> {
        let mut sum = Vector2::zeros();
        for (&cell, node) in grid {
            if let Some(next) = grid.get(&neighbor(cell, axis, 1)) {
                sum += candidates[next.candidate].point - candidates[node.candidate].point;
            }
        }
        sum
    };
    let directions = [direction(0), direction(1)];

    let fits = |axis: usize| span[axis] == size.columns && span[1 - axis] == size.rows;
    let row_axis = match (fits(0), fits(1)) {
        (true, true) => {
            // Square pattern: rows follow the more horizontal axis.
            if directions[0].x.abs() >= directions[1].x.abs() {
                0
            } else {
                1
            }
        }
        (true, false) => 0,
        (false, true) => 1,
        (false, false) => return None,
    };
    let column_axis = 1 - row_axis;

    let row_direction = directions[row_axis];
    let flip_row = row_direction.x < 0.0;
    let row_direction = if flip_row {
        -row_direction
    } else {
        row_direction
    };
    let column_direction = directions[column_axis];
    let cross = row_direction.x * column_direction.y - row_direction.y * column_direction.x;
    let flip_column = cross < 0.0;

    let mut points = Vec::with_capacity(size.len());
    for row in 0..size.rows as i32 {
        for column in 0..size.columns as i32 {
            let along_row = if flip_row {
                max[row_axis] - column
            } else {
                min[row_axis] + column
            };
            let along_column = if flip_column {
                max[column_axis] - row
            } else {
                min[column_axis] + row
            };
            let cell = if row_axis == 0 {
                (along_row, along_column)
            } else {
                (along_column, along_row)
            };
            points.push(candidates[grid.get(&cell)?.candidate].point);
        }
    }
    CornerSet::new(size, points)
}
