use crate::error::FrameError;
use image::imageops::{self, FilterType};
use image::{GrayImage, ImageBuffer, Luma, Rgba, RgbaImage};
use log::*;
use nalgebra::Point2;

/// An RGBA image borrowing the caller's pixel memory.
pub type RgbaView<'a> = ImageBuffer<Rgba<u8>, &'a mut [u8]>;

/// Wraps the raw RGBA buffer of one camera frame.
///
/// The frame is borrowed for the duration of a single invocation. Detection reads
/// it and overlay drawing writes into it in place, so the caller sees the feedback
/// in its own buffer once the call returns.
#[derive(Debug)]
pub struct FrameBuffer<'a> {
    image: RgbaView<'a>,
}

impl<'a> FrameBuffer<'a> {
    /// Wraps `data` as a `width` x `height` RGBA frame.
    ///
    /// An empty frame or a buffer of the wrong length is a caller bug and is rejected.
    pub fn from_raw(width: u32, height: u32, data: &'a mut [u8]) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::ZeroSized { width, height });
        }
        let expected = width as usize * height as usize * 4;
        let actual = data.len();
        if actual != expected {
            return Err(FrameError::BufferSize {
                width,
                height,
                expected,
                actual,
            });
        }
        let image = ImageBuffer::from_raw(width, height, data).ok_or(FrameError::BufferSize {
            width,
            height,
            expected,
            actual,
        })?;
        Ok(Self { image })
    }

    /// Borrows an owned RGBA image as a frame.
    pub fn from_image(image: &'a mut RgbaImage) -> Result<Self, FrameError> {
        let (width, height) = image.dimensions();
        Self::from_raw(width, height, image)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn rgba(&self) -> &RgbaView<'a> {
        &self.image
    }

    pub fn rgba_mut(&mut self) -> &mut RgbaView<'a> {
        &mut self.image
    }

    /// Converts the frame to 8-bit luma.
    pub fn to_gray(&self) -> GrayImage {
        imageops::grayscale(&self.image)
    }

    /// Overwrites the frame with an opaque rendition of `gray`.
    ///
    /// `gray` must have the frame's dimensions.
    pub fn paint_gray(&mut self, gray: &GrayImage) {
        assert_eq!(
            gray.dimensions(),
            self.dimensions(),
            "gray image must match the frame dimensions"
        );
        for (dst, &Luma([l])) in self.image.pixels_mut().zip(gray.pixels()) {
            *dst = Rgba([l, l, l, 255]);
        }
    }
}

/// A reduced resolution copy of a frame.
///
/// It only lives while detection runs. Anything found in it must be mapped back
/// to frame coordinates with [`Downscaled::upscale_point`] before it is used.
#[derive(Debug, Clone)]
pub struct Downscaled {
    pub image: RgbaImage,
    pub ratio: f32,
}

impl Downscaled {
    pub fn to_gray(&self) -> GrayImage {
        imageops::grayscale(&self.image)
    }

    /// Maps a downscaled coordinate back into frame space.
    pub fn upscale_point(&self, point: Point2<f32>) -> Point2<f32> {
        upscale_point(point, self.ratio)
    }
}

/// Shrinks `frame` by `ratio` with nearest-neighbor sampling.
///
/// Panics unless `ratio` is finite and greater than `1.0`.
pub fn downscale(frame: &FrameBuffer<'_>, ratio: f32) -> Downscaled {
    assert!(
        ratio.is_finite() && ratio > 1.0,
        "downscale ratio must be greater than 1.0"
    );
    let (width, height) = downscaled_dimensions(frame.dimensions(), ratio);
    let image = imageops::resize(frame.rgba(), width, height, FilterType::Nearest);
    debug!(
        "Image resized by {}% to {}x{}",
        100.0 / ratio,
        width,
        height
    );
    Downscaled { image, ratio }
}

/// The size of a frame shrunk by `ratio`, never smaller than one pixel.
pub fn downscaled_dimensions((width, height): (u32, u32), ratio: f32) -> (u32, u32) {
    let shrink = |v: u32| ((v as f32 / ratio).round() as u32).max(1);
    (shrink(width), shrink(height))
}

/// Multiplies a downscaled coordinate by the downscale ratio.
pub fn upscale_point(point: Point2<f32>, ratio: f32) -> Point2<f32> {
    Point2::from(point.coords * ratio)
}
