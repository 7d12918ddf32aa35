use crate::chessboard::CornerSet;
use crate::settings::RefineSettings;
use image::GrayImage;
use log::*;
use nalgebra::{Point2, Vector2};

/// Iterative subpixel corner refinement.
///
/// A corner sits where the image gradient of every nearby pixel is orthogonal to the
/// vector from the corner to that pixel. Each iteration solves the resulting 2x2
/// least squares system over a Gaussian weighted window and moves the corner to the
/// solution. A corner that would leave its search window keeps its initial position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CornerRefiner {
    settings: RefineSettings,
}

impl CornerRefiner {
    pub fn new(settings: RefineSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &RefineSettings {
        &self.settings
    }

    /// Refines every corner of the set in place against the full resolution image.
    pub fn refine(&self, gray: &GrayImage, corners: &mut CornerSet) {
        let half = self.half_window();
        let weights = gaussian_weights(half);
        let mut moved = 0usize;
        for corner in corners.points_mut() {
            let refined = self.refine_with(gray, *corner, half, &weights);
            if refined != *corner {
                moved += 1;
            }
            *corner = refined;
        }
        trace!("Refined {} of {} corners", moved, corners.len());
    }

    /// Refines a single corner.
    pub fn refine_point(&self, gray: &GrayImage, corner: Point2<f32>) -> Point2<f32> {
        let half = self.half_window();
        self.refine_with(gray, corner, half, &gaussian_weights(half))
    }

    fn half_window(&self) -> i32 {
        (self.settings.window / 2) as i32
    }

    fn refine_with(
        &self,
        gray: &GrayImage,
        corner: Point2<f32>,
        half: i32,
        weights: &[f64],
    ) -> Point2<f32> {
        let initial = Point2::new(corner.x as f64, corner.y as f64);
        let epsilon = self.settings.epsilon as f64;
        let side = (2 * half + 3) as usize;
        let mut patch = vec![0.0f64; side * side];

        let mut current = initial;
        for _ in 0..self.settings.max_iterations {
            // The patch has a one pixel margin so that central differences fit.
            for (iy, row) in patch.chunks_mut(side).enumerate() {
                for (ix, value) in row.iter_mut().enumerate() {
                    let offset = Vector2::new(
                        ix as f64 - (half + 1) as f64,
                        iy as f64 - (half + 1) as f64,
                    );
                    *value = sample_bilinear(gray, current + offset);
                }
            }

            let (mut a, mut b, mut c, mut bb1, mut bb2) = (0.0, 0.0, 0.0, 0.0, 0.0);
            let wside = (2 * half + 1) as usize;
            for i in 0..wside {
                let py = i as f64 - half as f64;
                for j in 0..wside {
                    let px = j as f64 - half as f64;
                    let m = weights[i * wside + j];
                    let at = |x: usize, y: usize| patch[y * side + x];
                    let gx = at(j + 2, i + 1) - at(j, i + 1);
                    let gy = at(j + 1, i + 2) - at(j + 1, i);
                    let gxx = gx * gx * m;
                    let gxy = gx * gy * m;
                    let gyy = gy * gy * m;
                    a += gxx;
                    b += gxy;
                    c += gyy;
                    bb1 += gxx * px + gxy * py;
                    bb2 += gxy * px + gyy * py;
                }
            }

            let det = a * c - b * b;
            if det.abs() <= f64::EPSILON * f64::EPSILON {
                break;
            }
            let scale = 1.0 / det;
            let next = Point2::new(
                current.x + c * scale * bb1 - b * scale * bb2,
                current.y - b * scale * bb1 + a * scale * bb2,
            );
            let step = (next - current).norm_squared();
            current = next;
            if step <= epsilon * epsilon {
                break;
            }
        }

        let drift = current - initial;
        if !drift.x.is_finite()
            || !drift.y.is_finite()
            || drift.x.abs() > half as f64
            || drift.y.abs() > half as f64
        {
            return corner;
        }
        Point2::new(current.x as f32, current.y as f32)
    }
}

/// Separable Gaussian weights `exp(-x²) exp(-y²)` with `x` and `y` scaled to `[-1, 1]`.
fn gaussian_weights(half: i32) -> Vec<f64> {
    let axis: Vec<f64> = (-half..=half)
        .map(|i| {
            let t = i as f64 / half as f64;
            (-t * t).exp()
        })
        .collect();
    axis.iter()
        .flat_map(|&wy| axis.iter().map(move |&wx| wx * wy))
        .collect()
}

/// Bilinear intensity with coordinates clamped to the image.
fn sample_bilinear(gray: &GrayImage, point: Point2<f64>) -> f64 {
    let (width, height) = gray.dimensions();
    let max_x = (width - 1) as f64;
    let max_y = (height - 1) as f64;
    let x = point.x.max(0.0).min(max_x);
    let y = point.y.max(0.0).min(max_y);
    let (x0, y0) = (x.floor(), y.floor());
    let (fx, fy) = (x - x0, y - y0);
    let (x0, y0) = (x0 as u32, y0 as u32);
    let (x1, y1) = ((x0 + 1).min(width - 1), (y0 + 1).min(height - 1));
    let at = |x: u32, y: u32| gray.get_pixel(x, y)[0] as f64;
    let top = at(x0, y0) * (1.0 - fx) + at(x1, y0) * fx;
    let bottom = at(x0, y1) * (1.0 - fx) + at(x1, y1) * fx;
    top * (1.0 - fy) + bottom * fy
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// Four squares meeting between pixels 31 and 32 on both axes.
    fn junction() -> GrayImage {
        GrayImage::from_fn(64, 64, |x, y| {
            Luma([if (x < 32) == (y < 32) { 20 } else { 230 }])
        })
    }

    #[test]
    fn converges_onto_junction() {
        let refiner = CornerRefiner::new(RefineSettings {
            epsilon: 0.001,
            ..RefineSettings::default()
        });
        let refined = refiner.refine_point(&junction(), Point2::new(33.5, 30.0));
        assert!(
            (refined - Point2::new(31.5, 31.5)).norm() < 0.25,
            "refined to {}",
            refined
        );
    }

    #[test]
    fn flat_image_keeps_corner() {
        let refiner = CornerRefiner::new(RefineSettings::default());
        let gray = GrayImage::from_pixel(32, 32, Luma([100]));
        let corner = Point2::new(12.25, 17.75);
        assert_eq!(refiner.refine_point(&gray, corner), corner);
    }

    #[test]
    fn weights_peak_in_center() {
        let weights = gaussian_weights(2);
        assert_eq!(weights.len(), 25);
        assert!((weights[12] - 1.0).abs() < 1e-12);
        assert!(weights.iter().all(|&w| w <= 1.0 && w > 0.0));
    }

    #[test]
    fn bilinear_clamps_to_border() {
        let gray = GrayImage::from_fn(2, 1, |x, _| Luma([if x == 0 { 0 } else { 100 }]));
        assert_eq!(sample_bilinear(&gray, Point2::new(0.25, 0.0)), 25.0);
        assert_eq!(sample_bilinear(&gray, Point2::new(-4.0, -4.0)), 0.0);
        assert_eq!(sample_bilinear(&gray, Point2::new(9.0, 3.0)), 100.0);
    }
}
