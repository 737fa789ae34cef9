//! Reading and writing image files.

use std::{fs::File, io::BufWriter, path::Path};

use image::{codecs::jpeg::JpegEncoder, ColorType, DynamicImage, ImageBuffer, ImageFormat, Rgba};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
    buffer::{Pixel, PixelBuffer, PixelFormat},
    error::{Error, Result},
};

/// File formats which a composite can be exported to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// Lossless, keeping alpha.  16-bit and float buffers are written as 16-bit PNGs.
    Png,
    /// Lossy and opaque.  Transparent areas are flattened onto white.
    Jpeg,
}

impl ExportFormat {
    /// Guesses the format from a file extension
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        let ext = path.as_ref().extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            _ => None,
        }
    }
}

/// Decodes an image file into a [`PixelBuffer`].  The buffer's format follows the file's bit
/// depth: 16-bit files give [`PixelFormat::Rgba16`], float files [`PixelFormat::RgbaF32`] and
/// everything else [`PixelFormat::Rgba8`].
pub fn open_image_file(path: impl AsRef<Path>) -> Result<PixelBuffer> {
    let path = path.as_ref();
    let image = image::open(path).map_err(|e| Error::LoadError(format!("{:?}: {}", path, e)))?;
    let buffer = from_dynamic_image(image)?;
    log::info!(
        "Loaded {:?} ({}x{}, {:?})",
        path,
        buffer.width(),
        buffer.height(),
        buffer.format()
    );
    Ok(buffer)
}

fn from_dynamic_image(image: DynamicImage) -> Result<PixelBuffer> {
    let (width, height) = (image.width(), image.height());
    let (format, data) = match image.color() {
        ColorType::L16 | ColorType::La16 | ColorType::Rgb16 | ColorType::Rgba16 => {
            let pixels = image.to_rgba16();
            let data = pixels
                .pixels()
                .map(|Rgba(p)| p.map(|c| c as f32 / 65535.0))
                .collect_vec();
            (PixelFormat::Rgba16, data)
        }
        ColorType::Rgb32F | ColorType::Rgba32F => {
            let data = image.to_rgba32f().pixels().map(|Rgba(p)| *p).collect_vec();
            (PixelFormat::RgbaF32, data)
        }
        _ => {
            let pixels = image.to_rgba8();
            let data = pixels
                .pixels()
                .map(|Rgba(p)| p.map(|c| c as f32 / 255.0))
                .collect_vec();
            (PixelFormat::Rgba8, data)
        }
    };
    let mut buffer = PixelBuffer::from_raw(width, height, format, data)?;
    buffer.finalize();
    Ok(buffer)
}

/// Encodes a buffer to an image file.  `quality` (1-100) is only used by lossy formats.
pub fn save_composite(
    buffer: &PixelBuffer,
    path: impl AsRef<Path>,
    format: ExportFormat,
    quality: u8,
) -> Result<()> {
    let path = path.as_ref();
    let save_err = |e: &dyn std::fmt::Display| Error::SaveError(format!("{:?}: {}", path, e));
    match format {
        ExportFormat::Png => match buffer.format() {
            PixelFormat::Rgba8 => to_rgba8(buffer)?
                .save_with_format(path, ImageFormat::Png)
                .map_err(|e| save_err(&e))?,
            PixelFormat::Rgba16 | PixelFormat::RgbaF32 => to_rgba16(buffer)?
                .save_with_format(path, ImageFormat::Png)
                .map_err(|e| save_err(&e))?,
        },
        ExportFormat::Jpeg => {
            if !(1..=100).contains(&quality) {
                return Err(Error::SaveError(format!("JPEG quality {} is not in 1..=100", quality)));
            }
            let rgb = buffer
                .pixels()
                .iter()
                .flat_map(|&px| flatten_onto_white(px).map(to_u8))
                .collect_vec();
            let file = File::create(path).map_err(|e| save_err(&e))?;
            let mut writer = BufWriter::new(file);
            JpegEncoder::new_with_quality(&mut writer, quality)
                .encode(&rgb, buffer.width(), buffer.height(), ColorType::Rgb8)
                .map_err(|e| save_err(&e))?;
        }
    }
    log::info!("Saved {:?} as {:?}", path, format);
    Ok(())
}

pub(crate) fn to_rgba8(buffer: &PixelBuffer) -> Result<ImageBuffer<Rgba<u8>, Vec<u8>>> {
    let data = buffer
        .pixels()
        .iter()
        .flat_map(|px| px.map(to_u8))
        .collect_vec();
    ImageBuffer::from_raw(buffer.width(), buffer.height(), data).ok_or(Error::InvalidDimension {
        width: buffer.width(),
        height: buffer.height(),
    })
}

pub(crate) fn to_rgba16(buffer: &PixelBuffer) -> Result<ImageBuffer<Rgba<u16>, Vec<u16>>> {
    let data = buffer
        .pixels()
        .iter()
        .flat_map(|px| px.map(|c| (c.clamp(0.0, 1.0) * 65535.0).round() as u16))
        .collect_vec();
    ImageBuffer::from_raw(buffer.width(), buffer.height(), data).ok_or(Error::InvalidDimension {
        width: buffer.width(),
        height: buffer.height(),
    })
}

pub(crate) fn from_rgba16(
    image: ImageBuffer<Rgba<u16>, Vec<u16>>,
    format: PixelFormat,
) -> Result<PixelBuffer> {
    let (width, height) = image.dimensions();
    let data = image
        .pixels()
        .map(|Rgba(p)| p.map(|c| c as f32 / 65535.0))
        .collect_vec();
    PixelBuffer::from_raw(width, height, format, data)
}

pub(crate) fn from_rgba8(image: ImageBuffer<Rgba<u8>, Vec<u8>>) -> Result<PixelBuffer> {
    let (width, height) = image.dimensions();
    let data = image
        .pixels()
        .map(|Rgba(p)| p.map(|c| c as f32 / 255.0))
        .collect_vec();
    PixelBuffer::from_raw(width, height, PixelFormat::Rgba8, data)
}

fn to_u8(c: f32) -> u8 {
    (c.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn flatten_onto_white([r, g, b, a]: Pixel) -> [f32; 3] {
    let a = a.clamp(0.0, 1.0);
    [r * a + (1.0 - a), g * a + (1.0 - a), b * a + (1.0 - a)]
}
