use image::{imageops, imageops::FilterType, DynamicImage};
use ndarray::Array4;

use crate::models::BoundingBox;

const PAD_VALUE: u8 = 114;

/// How the source image was placed inside the square model input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub gain: f32,
    pub pad_x: u32,
    pub pad_y: u32,
    pub orig_width: u32,
    pub orig_height: u32,
}

/// Resizes `image` to fit a `size`x`size` square without distortion, pads the
/// rest with gray and returns the normalized `[1, 3, size, size]` tensor.
pub fn letterbox(image: &DynamicImage, size: u32) -> (Array4<f32>, Letterbox) {
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();

    let gain = (size as f32 / width as f32).min(size as f32 / height as f32);
    let new_width = ((width as f32 * gain).round() as u32).clamp(1, size);
    let new_height = ((height as f32 * gain).round() as u32).clamp(1, size);
    let resized = imageops::resize(&rgb, new_width, new_height, FilterType::Triangle);

    let pad_x = (size - new_width) / 2;
    let pad_y = (size - new_height) / 2;

    let side = size as usize;
    let mut input = Array4::from_elem((1, 3, side, side), PAD_VALUE as f32 / 255.0);
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (row, col) = ((y + pad_y) as usize, (x + pad_x) as usize);
        for c in 0..3 {
            input[[0, c, row, col]] = pixel[c] as f32 / 255.0;
        }
    }

    let geometry = Letterbox {
        gain,
        pad_x,
        pad_y,
        orig_width: width,
        orig_height: height,
    };
    (input, geometry)
}

impl Letterbox {
    /// Maps a box in model-input pixels back to source-image pixels.
    pub fn restore(&self, bbox: BoundingBox) -> BoundingBox {
        let (px, py) = (self.pad_x as f32, self.pad_y as f32);
        let (w, h) = (self.orig_width as f32, self.orig_height as f32);
        BoundingBox {
            x1: ((bbox.x1 - px) / self.gain).clamp(0.0, w),
            y1: ((bbox.y1 - py) / self.gain).clamp(0.0, h),
            x2: ((bbox.x2 - px) / self.gain).clamp(0.0, w),
            y2: ((bbox.y2 - py) / self.gain).clamp(0.0, h),
        }
    }
}
