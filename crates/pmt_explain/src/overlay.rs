//! Heatmap overlays on the original image.

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma, Rgb, RgbImage};

use crate::error::{ExplainError, Result};
use crate::saliency::SaliencyMap;

/// Weight of the heatmap when compositing.
pub const OVERLAY_ALPHA: f32 = 0.45;

/// Jet colour scale: 0 is dark blue, 0.5 green-yellow, 1 dark red.
pub fn jet(value: f32) -> [u8; 3] {
    let v = if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let channel = |offset: f32| {
        let c = (1.5 - (4.0 * v - offset).abs()).clamp(0.0, 1.0);
        (c * 255.0).round() as u8
    };
    [channel(3.0), channel(2.0), channel(1.0)]
}

/// Bilinear resize of a saliency map to `width` x `height`.
pub fn resize_map(map: &SaliencyMap, width: u32, height: u32) -> Result<Vec<f32>> {
    let buffer: ImageBuffer<Luma<f32>, Vec<f32>> = ImageBuffer::from_raw(
        map.width() as u32,
        map.height() as u32,
        map.values().to_vec(),
    )
    .ok_or_else(|| {
        ExplainError::Shape(format!(
            "saliency buffer does not match {}x{}",
            map.width(),
            map.height()
        ))
    })?;
    let resized = imageops::resize(&buffer, width, height, FilterType::Triangle);
    Ok(resized
        .into_raw()
        .into_iter()
        .map(|v| v.clamp(0.0, 1.0))
        .collect())
}

/// Renders saliency maps as translucent colour overlays.
#[derive(Debug, Clone, Copy)]
pub struct OverlayRenderer {
    alpha: f32,
}

impl Default for OverlayRenderer {
    fn default() -> Self {
        Self {
            alpha: OVERLAY_ALPHA,
        }
    }
}

impl OverlayRenderer {
    /// Create a renderer with the fixed overlay weight.
    pub fn new() -> Self {
        Self::default()
    }

    /// Heatmap weight in use.
    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    /// Composite `map` over `original`, keeping the original dimensions.
    ///
    /// Each output pixel is `alpha * jet(map) + (1 - alpha) * original`,
    /// rounded and clamped to 8 bits.
    pub fn render(&self, original: &RgbImage, map: &SaliencyMap) -> Result<RgbImage> {
        let (width, height) = original.dimensions();
        if width == 0 || height == 0 {
            return Err(ExplainError::Shape(format!(
                "cannot overlay an empty {width}x{height} image"
            )));
        }

        let heat = resize_map(map, width, height)?;
        let alpha = self.alpha;

        let mut out = RgbImage::new(width, height);
        for (x, y, pixel) in out.enumerate_pixels_mut() {
            let idx = (y * width + x) as usize;
            let colour = jet(heat.get(idx).copied().unwrap_or(0.0));
            let base = original.get_pixel(x, y).0;
            let mut blended = [0u8; 3];
            for c in 0..3 {
                let v = alpha * f32::from(colour[c]) + (1.0 - alpha) * f32::from(base[c]);
                blended[c] = v.round().clamp(0.0, 255.0) as u8;
            }
            *pixel = Rgb(blended);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jet_endpoints() {
        assert_eq!(jet(0.0), [0, 0, 128]);
        assert_eq!(jet(1.0), [128, 0, 0]);
        assert_eq!(jet(0.5), [128, 255, 128]);
        assert_eq!(jet(f32::NAN), jet(0.0));
        assert_eq!(jet(7.0), jet(1.0));
    }

    #[test]
    fn test_alpha_in_range() {
        let renderer = OverlayRenderer::new();
        assert!((0.4..=0.45).contains(&renderer.alpha()));
    }

    #[test]
    fn test_render_preserves_dimensions() {
        let original = RgbImage::from_pixel(37, 21, Rgb([10, 200, 30]));
        let map = SaliencyMap::from_raw(4, 4, (0..16).map(|v| v as f32).collect()).unwrap();
        let overlay = OverlayRenderer::new().render(&original, &map).unwrap();
        assert_eq!(overlay.dimensions(), (37, 21));
    }

    #[test]
    fn test_render_composites() {
        let original = RgbImage::from_pixel(8, 8, Rgb([100, 100, 100]));
        let map = SaliencyMap::from_raw(2, 2, vec![0.0; 4]).unwrap();
        let overlay = OverlayRenderer::new().render(&original, &map).unwrap();

        // A zero map is uniform dark blue: [0, 0, 128]
        let expected = |heat: u8| (0.45 * f32::from(heat) + 0.55 * 100.0).round() as u8;
        assert_eq!(overlay.get_pixel(3, 5).0, [expected(0), expected(0), expected(128)]);
    }

    #[test]
    fn test_resize_map_range() {
        let map = SaliencyMap::from_raw(2, 2, vec![0.0, 1.0, 1.0, 0.0]).unwrap();
        let resized = resize_map(&map, 9, 7).unwrap();
        assert_eq!(resized.len(), 63);
        assert!(resized.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_render_rejects_empty_image() {
        let map = SaliencyMap::from_raw(1, 1, vec![0.0]).unwrap();
        assert!(OverlayRenderer::new().render(&RgbImage::new(0, 0), &map).is_err());
    }
}
