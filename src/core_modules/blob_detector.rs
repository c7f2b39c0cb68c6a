// THEORY:
// The blob detector is the engine of the spatial layer. It turns one raw frame into
// a binary foreground mask and a list of `Blob`s, and it is a stateless utility: the
// same frame, ROI and configuration always produce the same output.
//
// Algorithm steps:
// 1.  **Crop**: Clip the ROI to the frame and cut it out. Everything downstream works
//     in ROI-local coordinates.
// 2.  **Channel**: Reduce to a single channel, either luminance or one colour plane.
// 3.  **Blur**: Optional Gaussian smoothing of radius `r` (kernel `2r + 1`).
// 4.  **Threshold**: Global (fixed cutoff) or adaptive (pixel against the mean of its
//     neighbourhood minus a constant), then optional inversion.
// 5.  **Morphology**: Opening removes speckle, closing fills gaps.
// 6.  **Regions**: Outer contours of connected foreground regions give discovery order
//     and the polygon; connected-component labelling gives the exact pixel area, the
//     bounding box and the moment centroid of each region.
// 7.  **Filter**: Regions outside `[min_area, max_area]` are dropped, as is any region
//     whose outer contour encloses no area (single pixels, one-pixel-wide strokes).

use image::{DynamicImage, GrayImage, Luma};
use imageproc::contours::{BorderType, Contour, find_contours};
use imageproc::distance_transform::Norm;
use imageproc::filter::{box_filter, gaussian_blur_f32};
use imageproc::geometry::{approximate_polygon_dp, arc_length, contour_area};
use imageproc::morphology::{close, open};
use imageproc::point::Point as ContourPoint;
use imageproc::region_labelling::{Connectivity, connected_components};

use crate::config::{AdaptiveMethod, Channel, ProcessingConfig, ThresholdMode};
use crate::core_modules::blob::Blob;
use crate::core_modules::geometry::{Centroid, PixelRect, Point, Polygon, Roi};

/// Douglas-Peucker tolerance as a fraction of the closed contour perimeter.
const POLYGON_EPSILON_FACTOR: f64 = 0.02;

const FOREGROUND: u8 = 255;
const BACKGROUND: u8 = 0;

/// Output of one pass of the frame processor.
#[derive(Debug, Clone)]
pub struct ProcessedFrame {
    /// Binary mask (0 / 255) the size of the clipped ROI.
    pub mask: GrayImage,
    /// Detections in contour discovery order.
    pub blobs: Vec<Blob>,
}

impl ProcessedFrame {
    fn empty() -> Self {
        Self {
            mask: GrayImage::new(0, 0),
            blobs: Vec::new(),
        }
    }
}

/// Running pixel statistics for one labelled region.
#[derive(Debug, Clone, Copy)]
struct RegionStats {
    count: u32,
    sum_x: f64,
    sum_y: f64,
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
}

impl Default for RegionStats {
    fn default() -> Self {
        Self {
            count: 0,
            sum_x: 0.0,
            sum_y: 0.0,
            min_x: u32::MAX,
            min_y: u32::MAX,
            max_x: 0,
            max_y: 0,
        }
    }
}

impl RegionStats {
    fn add(&mut self, x: u32, y: u32) {
        self.count += 1;
        self.sum_x += x as f64;
        self.sum_y += y as f64;
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }
}

/// Runs the full detection pass for one frame.
pub fn process_frame(frame: &DynamicImage, roi: &Roi, config: &ProcessingConfig) -> ProcessedFrame {
    // --- 1. Crop ---
    let Some(region) = roi.constrain_to(frame.width(), frame.height()) else {
        return ProcessedFrame::empty();
    };
    let cropped = frame.crop_imm(region.x, region.y, region.w, region.h);

    // --- 2. Channel Selection ---
    let mut gray = select_channel(&cropped, config.channel);

    // --- 3. Blur ---
    if config.blur_radius > 0 {
        let kernel_size = config.blur_radius.saturating_mul(2).saturating_add(1);
        gray = gaussian_blur_f32(&gray, kernel_sigma(kernel_size));
    }

    // --- 4. Threshold ---
    let mut mask = match config.threshold_mode {
        ThresholdMode::Global => threshold_global(&gray, config.threshold_value, config.invert),
        ThresholdMode::Adaptive => threshold_adaptive(&gray, config),
    };

    // --- 5. Morphology ---
    let open_radius = config.morphological_open / 2;
    if open_radius > 0 {
        mask = open(&mask, Norm::LInf, open_radius);
    }
    let close_radius = config.morphological_close / 2;
    if close_radius > 0 {
        mask = close(&mask, Norm::LInf, close_radius);
    }

    // --- 6 & 7. Regions and Filtering ---
    let blobs = extract_blobs(&mask, config.min_area, config.max_area);
    ProcessedFrame { mask, blobs }
}

/// Reduces a frame to one channel. Single-channel frames pass through unchanged.
pub fn select_channel(frame: &DynamicImage, channel: Channel) -> GrayImage {
    if !frame.color().has_color() {
        return frame.to_luma8();
    }
    let rgb = frame.to_rgb8();
    let plane = match channel {
        Channel::Gray => return image::imageops::grayscale(&rgb),
        Channel::Red => 0,
        Channel::Green => 1,
        Channel::Blue => 2,
    };
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        Luma([rgb.get_pixel(x, y)[plane]])
    })
}

/// Fixed cutoff: pixels strictly above `value` become foreground.
pub fn threshold_global(gray: &GrayImage, value: u8, invert: bool) -> GrayImage {
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        binary(gray.get_pixel(x, y)[0] > value, invert)
    })
}

/// Local cutoff: a pixel is foreground when it exceeds its neighbourhood mean minus `c`.
pub fn threshold_adaptive(gray: &GrayImage, config: &ProcessingConfig) -> GrayImage {
    let block = config.adaptive.effective_block_size();
    let local_mean = match config.adaptive.method {
        AdaptiveMethod::Mean => box_filter(gray, block / 2, block / 2),
        AdaptiveMethod::Gaussian => gaussian_blur_f32(gray, kernel_sigma(block)),
    };
    let c = config.adaptive.c;
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let cutoff = local_mean.get_pixel(x, y)[0] as f32 - c;
        binary(gray.get_pixel(x, y)[0] as f32 > cutoff, config.invert)
    })
}

/// Extracts, measures and area-filters the outer regions of a binary mask.
pub fn extract_blobs(mask: &GrayImage, min_area: u32, max_area: u32) -> Vec<Blob> {
    if mask.width() == 0 || mask.height() == 0 {
        return Vec::new();
    }

    let labels = connected_components(mask, Connectivity::Eight, Luma([BACKGROUND]));
    let mut regions: Vec<RegionStats> = Vec::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label[0] as usize;
        if label == 0 {
            continue;
        }
        if label >= regions.len() {
            regions.resize(label + 1, RegionStats::default());
        }
        regions[label].add(x, y);
    }

    let contours: Vec<Contour<i32>> = find_contours(mask);
    let mut blobs = Vec::new();
    for contour in contours
        .iter()
        .filter(|c| matches!(c.border_type, BorderType::Outer) && c.parent.is_none())
    {
        let Some(first) = contour.points.first() else {
            continue;
        };
        if contour_area(&contour.points) <= 0.0 {
            continue;
        }
        let label = labels.get_pixel(first.x as u32, first.y as u32)[0] as usize;
        let Some(stats) = regions.get(label).filter(|s| s.count > 0) else {
            continue;
        };
        let area = stats.count;
        if area < min_area || area > max_area {
            continue;
        }

        blobs.push(Blob {
            bbox: PixelRect::new(
                stats.min_x as i32,
                stats.min_y as i32,
                stats.max_x - stats.min_x + 1,
                stats.max_y - stats.min_y + 1,
            ),
            centroid: Centroid::new(
                stats.sum_x / stats.count as f64,
                stats.sum_y / stats.count as f64,
            ),
            area,
            confidence: area_confidence(area, max_area),
            polygon: simplify_polygon(&contour.points),
        });
    }
    blobs
}

/// Detection confidence derived from area, clamped to `[0, 1]`.
pub fn area_confidence(area: u32, max_area: u32) -> f32 {
    if max_area == 0 {
        return 0.0;
    }
    (area as f32 / max_area as f32).clamp(0.0, 1.0)
}

fn simplify_polygon(points: &[ContourPoint<i32>]) -> Polygon {
    let epsilon = POLYGON_EPSILON_FACTOR * arc_length(points, true);
    approximate_polygon_dp(points, epsilon, true)
        .into_iter()
        .map(|p| Point::new(p.x, p.y))
        .collect()
}

/// Sigma of a Gaussian kernel of the given odd size.
fn kernel_sigma(kernel_size: u32) -> f32 {
    0.3 * ((kernel_size as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

fn binary(foreground: bool, invert: bool) -> Luma<u8> {
    if foreground != invert {
        Luma([FOREGROUND])
    } else {
        Luma([BACKGROUND])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use image::{Rgb, RgbImage};

    fn frame_with_rects(width: u32, height: u32, rects: &[(u32, u32, u32, u32)]) -> DynamicImage {
        let image = GrayImage::from_fn(width, height, |x, y| {
            let inside = rects
                .iter()
                .any(|&(rx, ry, rw, rh)| x >= rx && x < rx + rw && y >= ry && y < ry + rh);
            Luma([if inside { 255 } else { 0 }])
        });
        DynamicImage::ImageLuma8(image)
    }

    fn sharp_config() -> ProcessingConfig {
        ProcessingConfig {
            blur_radius: 0,
            min_area: 1,
            max_area: 10_000,
            ..Default::default()
        }
    }

    #[test]
    fn single_rectangle_is_measured_exactly() {
        let frame = frame_with_rects(100, 100, &[(40, 30, 20, 10)]);
        let out = process_frame(&frame, &Roi::full_frame(100, 100), &sharp_config());
        assert_eq!(out.blobs.len(), 1);
        let blob = &out.blobs[0];
        assert_eq!(blob.bbox, PixelRect::new(40, 30, 20, 10));
        assert_eq!(blob.area, 200);
        assert_abs_diff_eq!(blob.centroid.x, 49.5);
        assert_abs_diff_eq!(blob.centroid.y, 34.5);
        assert_abs_diff_eq!(blob.confidence, 0.02);
        assert!(blob.polygon.len() >= 4);
        assert_eq!((out.mask.width(), out.mask.height()), (100, 100));
    }

    #[test]
    fn coordinates_are_roi_local() {
        let frame = frame_with_rects(100, 100, &[(40, 30, 20, 10)]);
        let roi = Roi::new(20, 10, 60, 60).unwrap();
        let out = process_frame(&frame, &roi, &sharp_config());
        assert_eq!(out.blobs.len(), 1);
        assert_eq!(out.blobs[0].bbox, PixelRect::new(20, 20, 20, 10));
        assert_eq!((out.mask.width(), out.mask.height()), (60, 60));
    }

    #[test]
    fn area_bounds_are_inclusive() {
        let frame = frame_with_rects(64, 64, &[(10, 10, 10, 20)]);
        let roi = Roi::full_frame(64, 64);
        let with_bounds = |min_area, max_area| ProcessingConfig {
            min_area,
            max_area,
            ..sharp_config()
        };
        assert_eq!(process_frame(&frame, &roi, &with_bounds(200, 1000)).blobs.len(), 1);
        assert_eq!(process_frame(&frame, &roi, &with_bounds(201, 1000)).blobs.len(), 0);
        assert_eq!(process_frame(&frame, &roi, &with_bounds(1, 200)).blobs.len(), 1);
        assert_eq!(process_frame(&frame, &roi, &with_bounds(1, 199)).blobs.len(), 0);
    }

    #[test]
    fn zero_area_contours_are_excluded() {
        let frame = frame_with_rects(32, 32, &[(5, 5, 1, 1), (10, 2, 1, 20), (20, 20, 2, 2)]);
        let config = ProcessingConfig {
            min_area: 0,
            ..sharp_config()
        };
        let out = process_frame(&frame, &Roi::full_frame(32, 32), &config);
        // Only the 2x2 square encloses any area.
        assert_eq!(out.blobs.len(), 1);
        assert_eq!(out.blobs[0].bbox, PixelRect::new(20, 20, 2, 2));
        assert_eq!(out.blobs[0].area, 4);
    }

    #[test]
    fn separate_regions_become_separate_blobs() {
        let frame = frame_with_rects(100, 100, &[(5, 5, 10, 10), (60, 60, 20, 15)]);
        let out = process_frame(&frame, &Roi::full_frame(100, 100), &sharp_config());
        let mut areas: Vec<u32> = out.blobs.iter().map(|b| b.area).collect();
        areas.sort_unstable();
        assert_eq!(areas, vec![100, 300]);
    }

    #[test]
    fn invert_selects_dark_regions() {
        let image = GrayImage::from_fn(50, 50, |x, y| {
            let dark = (10..20).contains(&x) && (10..20).contains(&y);
            Luma([if dark { 0 } else { 255 }])
        });
        let config = ProcessingConfig {
            invert: true,
            ..sharp_config()
        };
        let out = process_frame(
            &DynamicImage::ImageLuma8(image),
            &Roi::full_frame(50, 50),
            &config,
        );
        assert_eq!(out.blobs.len(), 1);
        assert_eq!(out.blobs[0].area, 100);
    }

    #[test]
    fn colour_channel_selection() {
        let image = RgbImage::from_fn(40, 40, |x, y| {
            if (5..15).contains(&x) && (5..15).contains(&y) {
                Rgb([255, 0, 0])
            } else {
                Rgb([0, 0, 255])
            }
        });
        let frame = DynamicImage::ImageRgb8(image);
        let roi = Roi::full_frame(40, 40);

        let red = ProcessingConfig {
            channel: Channel::Red,
            ..sharp_config()
        };
        let out = process_frame(&frame, &roi, &red);
        assert_eq!(out.blobs.len(), 1);
        assert_eq!(out.blobs[0].bbox, PixelRect::new(5, 5, 10, 10));

        let green = ProcessingConfig {
            channel: Channel::Green,
            ..sharp_config()
        };
        assert!(process_frame(&frame, &roi, &green).blobs.is_empty());
    }

    #[test]
    fn opening_removes_speckle() {
        let frame = frame_with_rects(60, 60, &[(10, 10, 20, 20), (45, 45, 2, 2)]);
        let config = ProcessingConfig {
            morphological_open: 3,
            ..sharp_config()
        };
        let out = process_frame(&frame, &Roi::full_frame(60, 60), &config);
        assert_eq!(out.blobs.len(), 1);
        assert_eq!(out.blobs[0].area, 400);
    }

    #[test]
    fn closing_fills_gaps() {
        // Two bars separated by a one pixel gap merge after closing.
        let frame = frame_with_rects(60, 60, &[(10, 10, 10, 20), (21, 10, 10, 20)]);
        let config = ProcessingConfig {
            morphological_close: 3,
            ..sharp_config()
        };
        let out = process_frame(&frame, &Roi::full_frame(60, 60), &config);
        assert_eq!(out.blobs.len(), 1);
        assert_eq!(out.blobs[0].bbox, PixelRect::new(10, 10, 21, 20));
    }

    #[test]
    fn adaptive_threshold_finds_local_contrast() {
        // A brighter square on a bright gradient background that defeats a global cutoff.
        let image = GrayImage::from_fn(80, 80, |x, y| {
            let base = 150 + (x / 2) as u8;
            if (30..50).contains(&x) && (30..50).contains(&y) {
                Luma([base.saturating_add(60)])
            } else {
                Luma([base])
            }
        });
        let config = ProcessingConfig {
            threshold_mode: ThresholdMode::Adaptive,
            adaptive: crate::config::AdaptiveConfig {
                method: AdaptiveMethod::Mean,
                block_size: 31,
                c: -10.0,
            },
            min_area: 50,
            ..sharp_config()
        };
        let out = process_frame(
            &DynamicImage::ImageLuma8(image),
            &Roi::full_frame(80, 80),
            &config,
        );
        assert_eq!(out.blobs.len(), 1);
        let bbox = out.blobs[0].bbox;
        assert!(bbox.x >= 29 && bbox.x <= 31, "bbox {bbox:?}");
        assert!(bbox.y >= 29 && bbox.y <= 31, "bbox {bbox:?}");
    }

    #[test]
    fn roi_outside_frame_yields_empty_output() {
        let frame = frame_with_rects(50, 50, &[(10, 10, 10, 10)]);
        let roi = Roi::new(60, 60, 10, 10).unwrap();
        let out = process_frame(&frame, &roi, &sharp_config());
        assert!(out.blobs.is_empty());
        assert_eq!(out.mask.width(), 0);
    }

    #[test]
    fn confidence_is_clamped() {
        assert_abs_diff_eq!(area_confidence(400, 500), 0.8);
        assert_abs_diff_eq!(area_confidence(900, 500), 1.0);
        assert_abs_diff_eq!(area_confidence(10, 0), 0.0);
    }
}
