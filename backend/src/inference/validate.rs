use image::ImageFormat;

use crate::config::ValidationConfig;

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("File size exceeds maximum allowed size of {:.1}MB", megabytes(.max))]
    TooLarge { size: usize, max: usize },
    #[error("Invalid image file: format could not be identified")]
    Unidentified,
    #[error("Invalid image format. Only {allowed} are supported.")]
    UnsupportedFormat { allowed: &'static str },
    #[error("Invalid image file: {0}")]
    Corrupt(String),
}

fn megabytes(bytes: &usize) -> f64 {
    *bytes as f64 / (1024.0 * 1024.0)
}

pub fn check_size(size: usize, limits: &ValidationConfig) -> Result<(), ValidationError> {
    if size > limits.max_file_size {
        return Err(ValidationError::TooLarge {
            size,
            max: limits.max_file_size,
        });
    }
    Ok(())
}

/// Checks the upload size, the sniffed format and that the image decodes in full.
pub fn validate_image(
    bytes: &[u8],
    limits: &ValidationConfig,
) -> Result<ImageFormat, ValidationError> {
    check_size(bytes.len(), limits)?;

    let format = image::guess_format(bytes).map_err(|_| ValidationError::Unidentified)?;
    let supported = match format {
        ImageFormat::Jpeg | ImageFormat::Png => true,
        ImageFormat::WebP => limits.allow_webp,
        _ => false,
    };
    if !supported {
        log::warn!("Unsupported image format: {:?}", format);
        return Err(ValidationError::UnsupportedFormat {
            allowed: if limits.allow_webp {
                "JPEG, JPG, PNG, and WEBP"
            } else {
                "JPEG, JPG, and PNG"
            },
        });
    }

    image::load_from_memory_with_format(bytes, format)
        .map_err(|e| ValidationError::Corrupt(e.to_string()))?;

    Ok(format)
}
