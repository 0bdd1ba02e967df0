//! Image decoding and model-input preprocessing.
//!
//! Images are decoded once, kept as an RGB raster for overlay rendering and
//! converted into a [`PreparedImage`]: a square, channel-normalised CHW buffer
//! holding a batch of one.

use std::path::{Path, PathBuf};

use burn::prelude::*;
use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Default square input resolution.
pub const DEFAULT_IMAGE_SIZE: u32 = 224;

/// ImageNet normalization mean values (RGB).
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// ImageNet normalization std values (RGB).
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Preprocessing parameters shared by every model in the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Side length of the square model input.
    pub image_size: u32,
    /// Per-channel mean subtracted after scaling to [0, 1].
    pub mean: [f32; 3],
    /// Per-channel standard deviation divided out after mean subtraction.
    pub std: [f32; 3],
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            image_size: DEFAULT_IMAGE_SIZE,
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
        }
    }
}

impl PreprocessConfig {
    /// Create a config with the given size and ImageNet statistics.
    pub fn new(image_size: u32) -> Self {
        Self {
            image_size,
            ..Default::default()
        }
    }

    /// Check that the parameters can produce a finite tensor.
    pub fn validate(&self) -> Result<()> {
        if self.image_size == 0 {
            return Err(CoreError::InvalidConfig(
                "image_size must be positive".to_string(),
            ));
        }
        if self.std.iter().any(|&s| s <= 0.0 || !s.is_finite()) {
            return Err(CoreError::InvalidConfig(format!(
                "std must be positive and finite, got {:?}",
                self.std
            )));
        }
        Ok(())
    }
}

/// A decoded input image.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// Where the image was read from.
    pub path: PathBuf,
    /// Original RGB raster at its native resolution.
    pub rgb: RgbImage,
}

/// A model-ready input: `[1, 3, size, size]` in CHW order.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedImage {
    size: usize,
    data: Vec<f32>,
}

impl PreparedImage {
    /// Wrap an existing CHW buffer.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidShape`] unless `data.len() == 3 * size * size`.
    pub fn from_chw(size: usize, data: Vec<f32>) -> Result<Self> {
        let expected = 3 * size * size;
        if size == 0 || data.len() != expected {
            return Err(CoreError::InvalidShape {
                expected: format!("[1, 3, {size}, {size}] ({expected} values)"),
                got: format!("{} values", data.len()),
            });
        }
        Ok(Self { size, data })
    }

    /// Side length of the square input.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Tensor dimensions `[1, 3, size, size]`.
    pub fn dims(&self) -> [usize; 4] {
        [1, 3, self.size, self.size]
    }

    /// The normalised CHW values.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Mean of all normalised values.
    pub fn mean(&self) -> f32 {
        self.data.iter().sum::<f32>() / self.data.len() as f32
    }

    /// Upload to `device` as a single-image batch.
    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 4> {
        Tensor::from_data(TensorData::new(self.data.clone(), self.dims()), device)
    }
}

/// Decodes image files and turns them into [`PreparedImage`]s.
#[derive(Debug, Clone, Default)]
pub struct Preprocessor {
    config: PreprocessConfig,
}

impl Preprocessor {
    /// Create a preprocessor after validating `config`.
    pub fn new(config: PreprocessConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The active configuration.
    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    /// Read and decode an image file into RGB.
    ///
    /// # Errors
    ///
    /// Any read or decode failure becomes [`CoreError::Decode`] carrying `path`.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<LoadedImage> {
        let path = path.as_ref();
        let decoded = image::ImageReader::open(path)
            .and_then(|reader| reader.with_guessed_format())
            .map_err(|e| CoreError::Decode {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?
            .decode()
            .map_err(|e| CoreError::Decode {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let rgb = decoded.to_rgb8();
        if rgb.width() == 0 || rgb.height() == 0 {
            return Err(CoreError::Decode {
                path: path.to_path_buf(),
                reason: "image has no pixels".to_string(),
            });
        }

        Ok(LoadedImage {
            path: path.to_path_buf(),
            rgb,
        })
    }

    /// Resize and normalise an RGB raster.
    pub fn prepare(&self, rgb: &RgbImage) -> PreparedImage {
        let size = self.config.image_size;
        let resized = DynamicImage::ImageRgb8(rgb.clone())
            .resize_exact(size, size, FilterType::Triangle)
            .to_rgb8();

        let num_pixels = (size * size) as usize;
        let mut data = vec![0.0f32; 3 * num_pixels];
        let PreprocessConfig { mean, std, .. } = self.config;

        for (i, pixel) in resized.pixels().enumerate() {
            for c in 0..3 {
                // CHW layout: all R values, then all G values, then all B values
                data[c * num_pixels + i] = (f32::from(pixel[c]) / 255.0 - mean[c]) / std[c];
            }
        }

        PreparedImage {
            size: size as usize,
            data,
        }
    }

    /// Load and prepare in one step.
    pub fn load_and_prepare(&self, path: impl AsRef<Path>) -> Result<(LoadedImage, PreparedImage)> {
        let loaded = self.load(path)?;
        let prepared = self.prepare(&loaded.rgb);
        Ok((loaded, prepared))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NdArray;
    use image::Rgb;

    #[test]
    fn test_prepare_shape_and_normalisation() {
        let pre = Preprocessor::new(PreprocessConfig::new(8)).unwrap();
        let rgb = RgbImage::from_pixel(20, 10, Rgb([255, 0, 128]));
        let prepared = pre.prepare(&rgb);

        assert_eq!(prepared.dims(), [1, 3, 8, 8]);
        assert_eq!(prepared.data().len(), 3 * 64);

        let red = (1.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0];
        let green = (0.0 - IMAGENET_MEAN[1]) / IMAGENET_STD[1];
        assert!((prepared.data()[0] - red).abs() < 1e-5);
        assert!((prepared.data()[64] - green).abs() < 1e-5);
    }

    #[test]
    fn test_to_tensor_dims() {
        let pre = Preprocessor::new(PreprocessConfig::new(4)).unwrap();
        let prepared = pre.prepare(&RgbImage::new(5, 5));
        let device = Default::default();
        let tensor = prepared.to_tensor::<NdArray>(&device);
        assert_eq!(tensor.dims(), [1, 3, 4, 4]);
    }

    #[test]
    fn test_from_chw_validates_length() {
        assert!(PreparedImage::from_chw(2, vec![0.0; 12]).is_ok());
        assert!(PreparedImage::from_chw(2, vec![0.0; 11]).is_err());
        assert!(PreparedImage::from_chw(0, vec![]).is_err());
    }

    #[test]
    fn test_invalid_config() {
        assert!(Preprocessor::new(PreprocessConfig::new(0)).is_err());
        let config = PreprocessConfig {
            std: [0.2, 0.0, 0.2],
            ..Default::default()
        };
        assert!(Preprocessor::new(config).is_err());
    }

    #[test]
    fn test_load_missing_file_is_decode_error() {
        let pre = Preprocessor::default();
        let err = pre.load("/definitely/not/here.jpg").unwrap_err();
        assert!(matches!(err, CoreError::Decode { .. }));
    }

    #[test]
    fn test_load_garbage_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"not an image at all").unwrap();

        let err = Preprocessor::default().load(&path).unwrap_err();
        match err {
            CoreError::Decode { path: p, .. } => assert_eq!(p, path),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_load_roundtrip_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pixel.png");
        RgbImage::from_pixel(3, 2, Rgb([10, 20, 30])).save(&path).unwrap();

        let (loaded, prepared) = Preprocessor::new(PreprocessConfig::new(4))
            .unwrap()
            .load_and_prepare(&path)
            .unwrap();
        assert_eq!(loaded.rgb.dimensions(), (3, 2));
        assert_eq!(prepared.size(), 4);
    }
}
