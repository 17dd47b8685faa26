use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};
use ndarray::Array4;

use super::spectrum::magnitude_spectrum;
use super::{ImageTensor, RGB_CHANNELS};
use crate::config::PreprocessingConfig;

#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("failed to build input tensor: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// Turns validated upload bytes into the tensor the network was trained on.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    image_size: u32,
    use_fft: bool,
    fft_epsilon: f64,
    mean: [f32; 3],
    std: [f32; 3],
}

impl Preprocessor {
    pub fn new(config: &PreprocessingConfig) -> Self {
        Self {
            image_size: config.image_size,
            use_fft: config.use_fft,
            fft_epsilon: config.fft_epsilon,
            mean: config.mean,
            std: config.std,
        }
    }

    pub fn process(&self, bytes: &[u8]) -> Result<ImageTensor, ProcessingError> {
        let image = image::load_from_memory(bytes).inspect_err(|e| {
            log::error!("Error decoding image after validation: {}", e);
        })?;
        self.process_image(&image)
    }

    pub fn process_image(&self, image: &DynamicImage) -> Result<ImageTensor, ProcessingError> {
        let prepared = self.prepare(image);
        self.to_tensor(&prepared).inspect_err(|e| {
            log::error!("Error building tensor: {}", e);
        })
    }

    /// RGB, resized, and swapped for its spectrum when the FFT branch is on.
    fn prepare(&self, image: &DynamicImage) -> RgbImage {
        let rgb = image.to_rgb8();
        let resized = imageops::resize(
            &rgb,
            self.image_size,
            self.image_size,
            FilterType::Lanczos3,
        );
        if self.use_fft {
            magnitude_spectrum(&resized, self.fft_epsilon)
        } else {
            resized
        }
    }

    fn to_tensor(&self, image: &RgbImage) -> Result<ImageTensor, ProcessingError> {
        let (width, height) = image.dimensions();
        let (w, h) = (width as usize, height as usize);

        let mut data = Vec::with_capacity(RGB_CHANNELS * h * w);
        for channel in 0..RGB_CHANNELS {
            let (mean, std) = (self.mean[channel], self.std[channel]);
            data.extend(
                image
                    .pixels()
                    .map(|p| (f32::from(p.0[channel]) / 255.0 - mean) / std),
            );
        }

        Ok(Array4::from_shape_vec((1, RGB_CHANNELS, h, w), data)?)
    }
}
