#![allow(dead_code)]

use blob_tracker::{PipelineConfig, Roi};
use image::{DynamicImage, GrayImage, Luma};

/// A black frame with white axis-aligned squares, given as `(x, y, size)`.
pub fn frame_with_squares(width: u32, height: u32, squares: &[(u32, u32, u32)]) -> DynamicImage {
    let mut img = GrayImage::new(width, height);
    for &(x0, y0, size) in squares {
        for y in y0..(y0 + size).min(height) {
            for x in x0..(x0 + size).min(width) {
                img.put_pixel(x, y, Luma([255]));
            }
        }
    }
    DynamicImage::ImageLuma8(img)
}

/// A 100x100 ROI with blur disabled and an area window that fits one 20x20 square.
pub fn square_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.roi = Roi::new(0, 0, 100, 100).unwrap();
    config.processing.blur_radius = 0;
    config.processing.min_area = 200;
    config.processing.max_area = 500;
    config
}
