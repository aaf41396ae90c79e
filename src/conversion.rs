//! Raster decoding and channel-order normalization.
//!
//! Turns an [`ImagePayload`] into a tightly packed RGB raster. Raw images
//! derive their channel count from the buffer size; `bgr8`/`bgra8` data is
//! reordered to RGB. Compressed images are decoded by the `image` crate and
//! never reordered.

use image::{DynamicImage, GrayImage, ImageBuffer, Luma, RgbImage, RgbaImage};

use crate::error::ConvertError;
use crate::payload::{CompressedImage, ImagePayload, RawImage};

/// A decoded frame ready for encoding.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub image: RgbImage,
    /// Channels per pixel in the source data (3 for compressed input).
    pub channels: u32,
    /// Whether the channel order was reversed from BGR.
    pub swapped_channels: bool,
}

/// Decode one payload to RGB.
///
/// # Errors
///
/// Returns [`ConvertError::FrameDecode`] for zero dimensions, a buffer that
/// is not a whole number of pixels, unsupported channel counts, or corrupt
/// compressed data. Callers skip the frame.
pub fn decode_frame(payload: &ImagePayload<'_>) -> Result<DecodedFrame, ConvertError> {
    match payload {
        ImagePayload::Raw(raw) => decode_raw(raw),
        ImagePayload::Compressed(compressed) => decode_compressed(compressed),
    }
}

fn decode_raw(raw: &RawImage<'_>) -> Result<DecodedFrame, ConvertError> {
    if raw.height == 0 || raw.width == 0 {
        return Err(ConvertError::FrameDecode(format!(
            "invalid dimensions {}x{}",
            raw.width, raw.height
        )));
    }

    let pixels = raw.width as usize * raw.height as usize;
    if raw.data.len() % pixels != 0 {
        return Err(ConvertError::FrameDecode(format!(
            "{} bytes is not a whole number of {}x{} pixels",
            raw.data.len(),
            raw.width,
            raw.height
        )));
    }
    let channels = (raw.data.len() / pixels) as u32;
    let data = raw.data.to_vec();

    let (image, swapped_channels) = match (channels, raw.encoding.as_str()) {
        (1, _) => {
            let gray = GrayImage::from_raw(raw.width, raw.height, data).ok_or_else(buffer_error)?;
            (DynamicImage::ImageLuma8(gray).to_rgb8(), false)
        }
        (2, "mono16" | "16uc1") => {
            let samples: Vec<u16> = data
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            let gray: ImageBuffer<Luma<u16>, Vec<u16>> =
                ImageBuffer::from_raw(raw.width, raw.height, samples).ok_or_else(buffer_error)?;
            (DynamicImage::ImageLuma16(gray).to_rgb8(), false)
        }
        (3, encoding) => {
            let mut data = data;
            let swap = encoding == "bgr8";
            if swap {
                data.chunks_exact_mut(3).for_each(|pixel| pixel.swap(0, 2));
            }
            let rgb = RgbImage::from_raw(raw.width, raw.height, data).ok_or_else(buffer_error)?;
            (rgb, swap)
        }
        (4, encoding) => {
            let mut data = data;
            let swap = encoding == "bgra8";
            if swap {
                data.chunks_exact_mut(4).for_each(|pixel| pixel.swap(0, 2));
            }
            let rgba = RgbaImage::from_raw(raw.width, raw.height, data).ok_or_else(buffer_error)?;
            (DynamicImage::ImageRgba8(rgba).to_rgb8(), swap)
        }
        (other, encoding) => {
            return Err(ConvertError::FrameDecode(format!(
                "unsupported {other}-channel layout for encoding `{encoding}`"
            )));
        }
    };

    Ok(DecodedFrame {
        image,
        channels,
        swapped_channels,
    })
}

fn decode_compressed(compressed: &CompressedImage<'_>) -> Result<DecodedFrame, ConvertError> {
    let image = image::load_from_memory(compressed.data).map_err(|error| {
        ConvertError::FrameDecode(format!(
            "cannot decode `{}` image: {error}",
            compressed.format
        ))
    })?;
    Ok(DecodedFrame {
        image: image.to_rgb8(),
        channels: 3,
        swapped_channels: false,
    })
}

fn buffer_error() -> ConvertError {
    ConvertError::FrameDecode("pixel buffer does not match image dimensions".to_string())
}
