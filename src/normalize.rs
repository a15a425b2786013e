//! Image size normalization ahead of inference.
//!
//! Vision-language models allocate memory proportional to the number of image
//! patches, so every page is capped on its longest edge before it reaches the
//! backend.

use image::imageops::FilterType;
use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// Longest-edge cap applied when the caller does not pick one.
pub const DEFAULT_MAX_EDGE: u32 = 1200;

/// Pixel dimensions of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl ImageSize {
    /// Create a new size.
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Size of an image.
    pub fn of(image: &DynamicImage) -> Self {
        Self::new(image.width(), image.height())
    }

    /// Length of the longest edge.
    pub fn longest_edge(&self) -> u32 {
        self.width.max(self.height)
    }

    /// Size after capping the longest edge at `max_edge`.
    ///
    /// Returns `self` when it already fits. Otherwise both edges are scaled by
    /// the same ratio and rounded to the nearest pixel (never below one).
    pub fn capped(&self, max_edge: u32) -> Self {
        let longest = self.longest_edge();
        if longest <= max_edge {
            return *self;
        }

        let ratio = max_edge as f64 / longest as f64;
        let scale = |edge: u32| ((edge as f64 * ratio).round() as u32).max(1);
        Self::new(scale(self.width), scale(self.height))
    }

    /// Aspect ratio (width / height).
    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height.max(1) as f64
    }
}

/// An image after normalization, with the size it had before.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    /// The image to send to the backend
    pub image: DynamicImage,
    /// Size before normalization
    pub original: ImageSize,
    /// Size after normalization
    pub processed: ImageSize,
}

impl NormalizedImage {
    /// Whether the image had to be downscaled.
    pub fn was_resized(&self) -> bool {
        self.original != self.processed
    }
}

/// Cap the longest edge of `image` at `max_edge`, preserving aspect ratio.
///
/// Images that already fit are returned untouched. Larger images are resampled
/// with a Lanczos3 filter.
pub fn normalize(image: DynamicImage, max_edge: u32) -> NormalizedImage {
    let original = ImageSize::of(&image);
    let target = original.capped(max_edge);

    if target == original {
        return NormalizedImage {
            image,
            original,
            processed: original,
        };
    }

    log::debug!(
        "Resizing {}x{} -> {}x{} (max edge {})",
        original.width,
        original.height,
        target.width,
        target.height,
        max_edge
    );

    let resized = image.resize_exact(target.width, target.height, FilterType::Lanczos3);
    NormalizedImage {
        processed: ImageSize::of(&resized),
        image: resized,
        original,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn blank(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_pixel(width, height, Luma([255])))
    }

    #[test]
    fn test_small_image_untouched() {
        let result = normalize(blank(800, 600), 1200);
        assert!(!result.was_resized());
        assert_eq!(result.processed, ImageSize::new(800, 600));
    }

    #[test]
    fn test_exact_cap_untouched() {
        let result = normalize(blank(1200, 900), 1200);
        assert!(!result.was_resized());
    }

    #[test]
    fn test_portrait_page_capped() {
        // Letter page at 150 dpi
        let result = normalize(blank(1275, 1650), 1200);
        assert!(result.was_resized());
        assert_eq!(result.original, ImageSize::new(1275, 1650));
        // 1275 * 1200 / 1650 = 927.27
        assert_eq!(result.processed, ImageSize::new(927, 1200));
        assert_eq!(result.image.height(), 1200);
    }

    #[test]
    fn test_landscape_rounds_to_nearest() {
        // ratio 0.5, 1001 * 0.5 = 500.5 rounds up
        assert_eq!(
            ImageSize::new(2400, 1001).capped(1200),
            ImageSize::new(1200, 501)
        );
    }

    #[test]
    fn test_aspect_ratio_preserved() {
        for (w, h) in [(3000, 2000), (1700, 2200), (5000, 37), (1201, 1201)] {
            let before = ImageSize::new(w, h);
            let after = before.capped(1200);
            assert_eq!(after.longest_edge(), 1200);
            let tolerance = 1.0 / after.width.min(after.height) as f64 + 1e-9;
            let drift = (after.aspect_ratio() / before.aspect_ratio() - 1.0).abs();
            assert!(drift <= tolerance, "{}x{} drifted by {}", w, h, drift);
        }
    }

    #[test]
    fn test_extreme_ratio_keeps_one_pixel() {
        assert_eq!(
            ImageSize::new(100_000, 10).capped(1000),
            ImageSize::new(1000, 1)
        );
    }
}
