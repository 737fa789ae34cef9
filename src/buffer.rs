//! Pixel storage.

use std::{
    fmt::{Debug, Formatter},
    sync::Arc,
};

use cgmath::{Point2, Vector2};
use itertools::Itertools;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    utils::Rect,
};

/// Default upper bound on either side of a buffer, used when no [`EngineConfig`] is at hand.
///
/// [`EngineConfig`]: crate::config::EngineConfig
pub const DEFAULT_MAX_DIMENSION: u32 = 16384;

/// One pixel: sRGB-encoded red, green, blue and straight (non-premultiplied) alpha
pub type Pixel = [f32; 4];

pub const TRANSPARENT: Pixel = [0.0; 4];

/// The channel format of a [`PixelBuffer`].  This decides which values are legal and how they get
/// quantized when an operation finishes writing a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    #[default]
    Rgba8,
    Rgba16,
    RgbaF32,
}

impl PixelFormat {
    /// Bytes per pixel of the format's on-disk representation
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgba8 => 4,
            Self::Rgba16 => 8,
            Self::RgbaF32 => 16,
        }
    }

    /// Clamp (and, for integer formats, round) one pixel into this format's legal range
    #[inline]
    pub fn finalize(self, [r, g, b, a]: Pixel) -> Pixel {
        match self {
            Self::Rgba8 => [q(r, 255.0), q(g, 255.0), q(b, 255.0), q(a, 255.0)],
            Self::Rgba16 => [q(r, 65535.0), q(g, 65535.0), q(b, 65535.0), q(a, 65535.0)],
            // Float colour may go out of gamut, but alpha is a coverage and must stay in [0, 1]
            Self::RgbaF32 => [r, g, b, a.clamp(0.0, 1.0)],
        }
    }
}

/// Quantize `v` onto `[0, 1]` with `levels` steps
#[inline]
fn q(v: f32, levels: f32) -> f32 {
    if v.is_nan() {
        return 0.0;
    }
    (v.clamp(0.0, 1.0) * levels).round() / levels
}

/// How [`PixelBuffer::resample`] fills in detail when enlarging.  Shrinking always area-averages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResampleFilter {
    #[default]
    Bilinear,
    Bicubic,
}

/// A rectangular grid of pixels in a fixed [`PixelFormat`].
///
/// The pixel data is shared between clones and copied the first time a clone is written to, so
/// handing a `PixelBuffer` to a history entry or a worker thread is cheap and can never observe a
/// later edit.
#[derive(Clone)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Arc<Vec<Pixel>>,
}

impl PixelBuffer {
    /// Creates a fully transparent buffer
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Result<Self> {
        Self::new_limited(width, height, format, DEFAULT_MAX_DIMENSION)
    }

    /// Creates a fully transparent buffer, checking against a configured `max_dimension`
    pub fn new_limited(
        width: u32,
        height: u32,
        format: PixelFormat,
        max_dimension: u32,
    ) -> Result<Self> {
        check_dimensions(width, height, max_dimension)?;
        Ok(Self::transparent(width, height, format))
    }

    /// Creates a buffer filled with a single colour
    pub fn filled(width: u32, height: u32, format: PixelFormat, colour: Pixel) -> Result<Self> {
        check_dimensions(width, height, DEFAULT_MAX_DIMENSION)?;
        Ok(Self {
            width,
            height,
            format,
            data: Arc::new(vec![format.finalize(colour); width as usize * height as usize]),
        })
    }

    /// Wraps existing row-major pixel data.  8- and 16-bit data is quantized to its format, so a
    /// buffer always holds values its format can store; float data is taken as-is.
    pub fn from_raw(width: u32, height: u32, format: PixelFormat, mut data: Vec<Pixel>) -> Result<Self> {
        check_dimensions(width, height, DEFAULT_MAX_DIMENSION)?;
        if data.len() != width as usize * height as usize {
            return Err(Error::InvalidDimension { width, height });
        }
        if format != PixelFormat::RgbaF32 {
            data.iter_mut().for_each(|px| *px = format.finalize(*px));
        }
        Ok(Self {
            width,
            height,
            format,
            data: Arc::new(data),
        })
    }

    /// Internal constructor for sizes which are already known to be valid (e.g. tiles)
    pub(crate) fn transparent(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
            data: Arc::new(vec![TRANSPARENT; width as usize * height as usize]),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> Vector2<u32> {
        Vector2::new(self.width, self.height)
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// The bounds of this buffer, with its top-left corner at the origin
    pub fn bounds(&self) -> Rect<i32> {
        Rect::from_origin(self.width as i32, self.height as i32)
    }

    pub fn pixels(&self) -> &[Pixel] {
        &self.data
    }

    /// Mutable access to the pixels, copying the data first if it is shared
    pub(crate) fn pixels_mut(&mut self) -> &mut [Pixel] {
        Arc::make_mut(&mut self.data).as_mut_slice()
    }

    /// Raw view of the pixel data, used for hashing and byte-exact comparisons
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(self.data.as_slice())
    }

    /// Approximate heap size of this buffer, used for cache accounting
    pub fn byte_size(&self) -> usize {
        self.data.len() * std::mem::size_of::<Pixel>()
    }

    /// Returns `true` if both buffers share the same pixel storage
    pub fn shares_storage_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    #[inline]
    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    pub fn get_pixel(&self, x: u32, y: u32) -> Result<Pixel> {
        if x >= self.width || y >= self.height {
            return Err(Error::OutOfBounds { x, y });
        }
        Ok(self.data[self.index(x, y)])
    }

    /// Writes one pixel (quantized to this buffer's format)
    pub fn set_pixel(&mut self, x: u32, y: u32, px: Pixel) -> Result<()> {
        if x >= self.width || y >= self.height {
            return Err(Error::OutOfBounds { x, y });
        }
        let idx = self.index(x, y);
        let format = self.format;
        self.pixels_mut()[idx] = format.finalize(px);
        Ok(())
    }

    pub fn row(&self, y: u32) -> &[Pixel] {
        let start = self.index(0, y);
        &self.data[start..start + self.width as usize]
    }

    /// Copies `src_rect` of `src` into `dst`, with `src_rect.min()` landing at `dst_offset`.  The
    /// copy is clipped to the parts which exist in both buffers; if there's no overlap then this is
    /// a no-op.
    pub fn copy_region(
        src: &PixelBuffer,
        src_rect: Rect<i32>,
        dst: &mut PixelBuffer,
        dst_offset: Point2<i32>,
    ) {
        let shift = dst_offset - src_rect.min();
        let clipped = src_rect
            .intersection(src.bounds())
            .intersection(dst.bounds().translate(-shift));
        if clipped.is_empty() {
            return;
        }
        let dst_width = dst.width as usize;
        let row_len = clipped.width() as usize;
        let dst_pixels = dst.pixels_mut();
        for y in clipped.min().y..clipped.max().y {
            let src_start = src.index(clipped.min().x as u32, y as u32);
            let dst_x = (clipped.min().x + shift.x) as usize;
            let dst_y = (y + shift.y) as usize;
            let dst_start = dst_y * dst_width + dst_x;
            dst_pixels[dst_start..dst_start + row_len]
                .copy_from_slice(&src.data[src_start..src_start + row_len]);
        }
    }

    /// Extracts `region` (in this buffer's coordinates, shifted by `origin`) into a new buffer of
    /// the region's size.  Anything outside this buffer comes back transparent.
    pub fn crop(&self, region: Rect<i32>, origin: Vector2<i32>) -> PixelBuffer {
        let mut out = Self::transparent(
            region.width().max(0) as u32,
            region.height().max(0) as u32,
            self.format,
        );
        Self::copy_region(self, region.translate(-origin), &mut out, Point2::new(0, 0));
        out
    }

    /// Returns a copy of this buffer tagged with another format, quantizing every pixel
    pub fn convert(&self, format: PixelFormat) -> PixelBuffer {
        let mut out = self.clone();
        out.format = format;
        out.finalize();
        out
    }

    /// Clamps every pixel into the legal range of this buffer's format.  Operations call this
    /// exactly once, when they're done, so intermediate values never get clipped early.
    pub fn finalize(&mut self) {
        let format = self.format;
        if format == PixelFormat::RgbaF32 && self.data.iter().all(|p| (0.0..=1.0).contains(&p[3])) {
            return; // Nothing to do, and we avoid un-sharing the storage
        }
        self.pixels_mut()
            .par_iter_mut()
            .for_each(|px| *px = format.finalize(*px));
    }

    /// Returns `false` if any pixel of `region` holds a non-finite value, i.e. the buffer has been
    /// corrupted by something upstream.
    pub fn is_finite_in(&self, region: Rect<i32>) -> bool {
        let r = region.intersection(self.bounds());
        (r.min().y..r.max().y).all(|y| {
            let row = self.row(y as u32);
            row[r.min().x as usize..r.max().x as usize]
                .iter()
                .all(|p| p.iter().all(|c| c.is_finite()))
        })
    }

    /// Returns a rescaled copy of this buffer.  Each axis is scaled independently: axes which
    /// shrink are area-averaged and axes which grow use `filter`.  Filtering happens on
    /// premultiplied colour so that transparent pixels don't bleed their colour into their
    /// neighbours.
    pub fn resample(&self, new_width: u32, new_height: u32, filter: ResampleFilter) -> Result<Self> {
        check_dimensions(new_width, new_height, DEFAULT_MAX_DIMENSION)?;
        if new_width == self.width && new_height == self.height {
            return Ok(self.clone());
        }

        let premultiplied = self
            .data
            .iter()
            .map(|&[r, g, b, a]| [r * a, g * a, b * a, a])
            .collect_vec();

        // Horizontal pass: (w, h) -> (new_w, h)
        let x_taps = axis_taps(self.width, new_width, filter);
        let src_w = self.width as usize;
        let mut horizontal = vec![TRANSPARENT; new_width as usize * self.height as usize];
        horizontal
            .par_chunks_mut(new_width as usize)
            .enumerate()
            .for_each(|(y, row_out)| {
                let row_in = &premultiplied[y * src_w..(y + 1) * src_w];
                for (px_out, taps) in row_out.iter_mut().zip_eq(&x_taps) {
                    *px_out = weighted_sum(taps.iter().map(|&(i, w)| (row_in[i], w)));
                }
            });

        // Vertical pass: (new_w, h) -> (new_w, new_h)
        let y_taps = axis_taps(self.height, new_height, filter);
        let out_w = new_width as usize;
        let mut out = vec![TRANSPARENT; out_w * new_height as usize];
        out.par_chunks_mut(out_w)
            .zip_eq(y_taps.par_iter())
            .for_each(|(row_out, taps)| {
                for (x, px_out) in row_out.iter_mut().enumerate() {
                    *px_out = weighted_sum(taps.iter().map(|&(j, w)| (horizontal[j * out_w + x], w)));
                }
            });

        // Un-premultiply and quantize
        let format = self.format;
        out.par_iter_mut().for_each(|px| {
            let [r, g, b, a] = *px;
            *px = if a > 0.0 {
                format.finalize([r / a, g / a, b / a, a])
            } else {
                TRANSPARENT
            };
        });

        Ok(Self {
            width: new_width,
            height: new_height,
            format,
            data: Arc::new(out),
        })
    }
}

impl PartialEq for PixelBuffer {
    /// Buffers are equal if they have the same size, format and bit-identical pixels
    fn eq(&self, other: &Self) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.format == other.format
            && (Arc::ptr_eq(&self.data, &other.data) || self.as_bytes() == other.as_bytes())
    }
}

impl Debug for PixelBuffer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "PixelBuffer({:?} {}x{})", self.format, self.width, self.height)
    }
}

fn check_dimensions(width: u32, height: u32, max_dimension: u32) -> Result<()> {
    if width == 0 || height == 0 || width > max_dimension || height > max_dimension {
        return Err(Error::InvalidDimension { width, height });
    }
    Ok(())
}

////////////////
// RESAMPLING //
////////////////

/// For every output index along one axis, the `(source index, weight)` pairs which contribute to
/// it.  Weights of each list sum to 1.
fn axis_taps(src_len: u32, dst_len: u32, filter: ResampleFilter) -> Vec<Vec<(usize, f32)>> {
    let scale = src_len as f64 / dst_len as f64;
    let last = src_len as i64 - 1;
    let clamp = |i: i64| i.clamp(0, last) as usize;

    (0..dst_len as i64)
        .map(|o| {
            let mut taps: Vec<(usize, f32)> = Vec::new();
            if scale > 1.0 {
                // Shrinking: average the source interval covered by this output pixel
                let start = o as f64 * scale;
                let end = start + scale;
                let mut i = start.floor() as i64;
                while (i as f64) < end {
                    let overlap = (end.min(i as f64 + 1.0) - start.max(i as f64)).max(0.0);
                    if overlap > 0.0 {
                        taps.push((clamp(i), overlap as f32));
                    }
                    i += 1;
                }
            } else {
                let centre = (o as f64 + 0.5) * scale - 0.5;
                let base = centre.floor() as i64;
                let t = (centre - base as f64) as f32;
                match filter {
                    ResampleFilter::Bilinear => {
                        taps.push((clamp(base), 1.0 - t));
                        taps.push((clamp(base + 1), t));
                    }
                    ResampleFilter::Bicubic => {
                        for k in -1..=2 {
                            taps.push((clamp(base + k), catmull_rom(k as f32 - t)));
                        }
                    }
                }
            }
            let total: f32 = taps.iter().map(|&(_, w)| w).sum();
            if total != 0.0 {
                taps.iter_mut().for_each(|(_, w)| *w /= total);
            }
            taps
        })
        .collect_vec()
}

/// Catmull-Rom cubic kernel
fn catmull_rom(x: f32) -> f32 {
    let x = x.abs();
    if x < 1.0 {
        1.5 * x * x * x - 2.5 * x * x + 1.0
    } else if x < 2.0 {
        -0.5 * x * x * x + 2.5 * x * x - 4.0 * x + 2.0
    } else {
        0.0
    }
}

#[inline]
fn weighted_sum(samples: impl Iterator<Item = (Pixel, f32)>) -> Pixel {
    let mut acc = TRANSPARENT;
    for (px, w) in samples {
        for c in 0..4 {
            acc[c] += px[c] * w;
        }
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Pixel = [1.0, 0.0, 0.0, 1.0];

    #[test]
    fn zero_and_oversized_dimensions_are_rejected() {
        assert!(matches!(
            PixelBuffer::new(0, 10, PixelFormat::Rgba8),
            Err(Error::InvalidDimension { .. })
        ));
        assert!(matches!(
            PixelBuffer::new_limited(101, 10, PixelFormat::Rgba8, 100),
            Err(Error::InvalidDimension { .. })
        ));
        assert!(PixelBuffer::new_limited(100, 100, PixelFormat::Rgba8, 100).is_ok());
    }

    #[test]
    fn pixel_access_is_bounds_checked() {
        let mut buf = PixelBuffer::new(4, 3, PixelFormat::Rgba8).unwrap();
        assert!(matches!(buf.get_pixel(4, 0), Err(Error::OutOfBounds { x: 4, y: 0 })));
        assert!(matches!(buf.set_pixel(0, 3, RED), Err(Error::OutOfBounds { .. })));
        buf.set_pixel(3, 2, RED).unwrap();
        assert_eq!(buf.get_pixel(3, 2).unwrap(), RED);
    }

    #[test]
    fn integer_formats_quantize_on_write() {
        let mut buf = PixelBuffer::new(1, 1, PixelFormat::Rgba8).unwrap();
        buf.set_pixel(0, 0, [1.5, -0.2, 0.5, 1.0]).unwrap();
        let [r, g, b, _] = buf.get_pixel(0, 0).unwrap();
        assert_eq!(r, 1.0);
        assert_eq!(g, 0.0);
        assert_eq!(b, 128.0 / 255.0);

        let mut float = PixelBuffer::new(1, 1, PixelFormat::RgbaF32).unwrap();
        float.set_pixel(0, 0, [1.5, -0.2, 0.5, 1.0]).unwrap();
        assert_eq!(float.get_pixel(0, 0).unwrap(), [1.5, -0.2, 0.5, 1.0]);
    }

    #[test]
    fn raw_data_is_quantized_to_integer_formats() {
        let data = vec![[0.3, 0.3, 0.3, 1.0]];
        let eight = PixelBuffer::from_raw(1, 1, PixelFormat::Rgba8, data.clone()).unwrap();
        let [r, ..] = eight.get_pixel(0, 0).unwrap();
        assert_eq!(r, 77.0 / 255.0);

        let sixteen = PixelBuffer::from_raw(1, 1, PixelFormat::Rgba16, data.clone()).unwrap();
        let [r, ..] = sixteen.get_pixel(0, 0).unwrap();
        assert_eq!(r, (0.3f32 * 65535.0).round() / 65535.0);

        // Float buffers keep out-of-gamut colour untouched
        let float = PixelBuffer::from_raw(1, 1, PixelFormat::RgbaF32, vec![[1.5, -0.2, 0.3, 1.0]])
            .unwrap();
        assert_eq!(float.get_pixel(0, 0).unwrap(), [1.5, -0.2, 0.3, 1.0]);
    }

    #[test]
    fn clones_are_copy_on_write() {
        let a = PixelBuffer::filled(8, 8, PixelFormat::Rgba8, RED).unwrap();
        let mut b = a.clone();
        assert!(a.shares_storage_with(&b));
        b.set_pixel(0, 0, TRANSPARENT).unwrap();
        assert!(!a.shares_storage_with(&b));
        assert_eq!(a.get_pixel(0, 0).unwrap(), RED);
    }

    #[test]
    fn copy_region_clips_to_overlap() {
        let src = PixelBuffer::filled(4, 4, PixelFormat::Rgba8, RED).unwrap();
        let mut dst = PixelBuffer::new(4, 4, PixelFormat::Rgba8).unwrap();
        PixelBuffer::copy_region(&src, Rect::from_origin(4, 4), &mut dst, Point2::new(2, 3));
        assert_eq!(dst.get_pixel(2, 3).unwrap(), RED);
        assert_eq!(dst.get_pixel(3, 3).unwrap(), RED);
        assert_eq!(dst.get_pixel(1, 3).unwrap(), TRANSPARENT);
        assert_eq!(dst.get_pixel(2, 2).unwrap(), TRANSPARENT);

        // Entirely outside: nothing happens
        let before = dst.clone();
        PixelBuffer::copy_region(&src, Rect::from_origin(4, 4), &mut dst, Point2::new(10, 10));
        assert_eq!(dst, before);
    }

    #[test]
    fn crop_pads_with_transparency() {
        let src = PixelBuffer::filled(2, 2, PixelFormat::Rgba8, RED).unwrap();
        let region = Rect::from_min_size(Point2::new(-1, -1), Vector2::new(3, 3));
        let out = src.crop(region, Vector2::new(0, 0));
        assert_eq!(out.get_pixel(0, 0).unwrap(), TRANSPARENT);
        assert_eq!(out.get_pixel(1, 1).unwrap(), RED);
        assert_eq!(out.get_pixel(2, 2).unwrap(), RED);
    }

    #[test]
    fn shrinking_averages_area() {
        // A 2x1 black/white buffer shrunk to 1x1 is mid-grey
        let buf = PixelBuffer::from_raw(
            2,
            1,
            PixelFormat::RgbaF32,
            vec![[0.0, 0.0, 0.0, 1.0], [1.0, 1.0, 1.0, 1.0]],
        )
        .unwrap();
        let small = buf.resample(1, 1, ResampleFilter::Bilinear).unwrap();
        let [r, g, b, a] = small.get_pixel(0, 0).unwrap();
        assert!((r - 0.5).abs() < 1e-6 && (g - 0.5).abs() < 1e-6 && (b - 0.5).abs() < 1e-6);
        assert_eq!(a, 1.0);
    }

    #[test]
    fn resampling_uniform_colour_preserves_it() {
        let buf = PixelBuffer::filled(5, 3, PixelFormat::Rgba8, RED).unwrap();
        for filter in [ResampleFilter::Bilinear, ResampleFilter::Bicubic] {
            for (w, h) in [(10, 6), (2, 1), (7, 2)] {
                let out = buf.resample(w, h, filter).unwrap();
                assert_eq!(out.dimensions(), Vector2::new(w, h));
                assert!(out.pixels().iter().all(|&p| p == RED));
            }
        }
    }

    #[test]
    fn non_finite_pixels_are_detected() {
        let mut data = vec![RED; 4];
        data[3] = [f32::NAN, 0.0, 0.0, 1.0];
        let buf = PixelBuffer::from_raw(2, 2, PixelFormat::RgbaF32, data).unwrap();
        assert!(buf.is_finite_in(Rect::from_origin(2, 1)));
        assert!(!buf.is_finite_in(buf.bounds()));
    }
}
