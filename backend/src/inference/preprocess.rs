use image::imageops::{self, FilterType};
use image::{ImageFormat, ImageReader};
use ndarray::Array3;
use std::io::Cursor;

/// Height x width x channel input, channel values in `[0, 1]`.
pub type Tensor = Array3<f32>;

pub const MAX_IMAGE_SIZE: usize = 10 * 1024 * 1024;
pub const INPUT_SIZE: u32 = 224;
pub const CHANNELS: usize = 3;

const VALID_FORMATS: [ImageFormat; 2] = [ImageFormat::Jpeg, ImageFormat::Png];

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("File too large. Maximum size is 10MB.")]
    TooLarge,
    #[error("Invalid or corrupted image file")]
    Corrupt,
    #[error("Unsupported image format. Only JPEG and PNG are supported.")]
    UnsupportedFormat,
}

#[derive(Debug, Clone)]
pub struct Preprocessor {
    max_bytes: usize,
    input_size: u32,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new(MAX_IMAGE_SIZE, INPUT_SIZE)
    }
}

impl Preprocessor {
    pub fn new(max_bytes: usize, input_size: u32) -> Self {
        Self {
            max_bytes,
            input_size,
        }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Cheap admission-side check: size ceiling and magic bytes only.
    ///
    /// Nothing is decoded here, so a truncated GIF or BMP is reported as
    /// `UnsupportedFormat` rather than `Corrupt`: the header alone already
    /// rules it out. Bytes with no recognizable header are `Corrupt`.
    pub fn precheck(&self, bytes: &[u8]) -> Result<ImageFormat, ValidationError> {
        self.check_size(bytes)?;
        let format = image::guess_format(bytes).map_err(|_| ValidationError::Corrupt)?;
        check_format(format)?;
        Ok(format)
    }

    /// Full validation followed by RGB conversion, resize and normalization.
    pub fn validate_and_tensorize(&self, bytes: &[u8]) -> Result<Tensor, ValidationError> {
        self.check_size(bytes)?;

        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|_| ValidationError::Corrupt)?;
        let format = reader.format().ok_or(ValidationError::Corrupt)?;
        let image = reader.decode().map_err(|e| {
            log::debug!("Image decode failed ({:?}): {}", format, e);
            ValidationError::Corrupt
        })?;
        check_format(format)?;

        let size = self.input_size;
        let rgb = imageops::resize(&image.to_rgb8(), size, size, FilterType::CatmullRom);
        let side = size as usize;

        Ok(Tensor::from_shape_fn((side, side, CHANNELS), |(y, x, c)| {
            f32::from(rgb.get_pixel(x as u32, y as u32)[c]) / 255.0
        }))
    }

    fn check_size(&self, bytes: &[u8]) -> Result<(), ValidationError> {
        if bytes.len() > self.max_bytes {
            return Err(ValidationError::TooLarge);
        }
        Ok(())
    }
}

fn check_format(format: ImageFormat) -> Result<(), ValidationError> {
    if VALID_FORMATS.contains(&format) {
        Ok(())
    } else {
        Err(ValidationError::UnsupportedFormat)
    }
}
