//! Single-channel coverage masks.

use std::{
    fmt::{Debug, Formatter},
    sync::Arc,
};

use cgmath::{Point2, Vector2};
use itertools::Itertools;
use rayon::prelude::*;

use crate::{
    error::{Error, Result},
    utils::Rect,
};

/// Per-pixel coverage in `[0, 1]` which restricts how strongly a layer applies.
///
/// A freshly created mask is 'full' and doesn't allocate anything; storage is only created the
/// first time the mask is painted on.  Like [`PixelBuffer`](crate::buffer::PixelBuffer)s, masks
/// share their storage between clones and copy it on write.
#[derive(Clone)]
pub struct Mask {
    width: u32,
    height: u32,
    /// `None` means full coverage everywhere
    coverage: Option<Arc<Vec<f32>>>,
}

impl Mask {
    /// A mask which covers everything, without allocating
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            coverage: None,
        }
    }

    /// A mask which covers nothing (i.e. hides its owner entirely until painted on)
    pub fn empty(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            coverage: Some(Arc::new(vec![0.0; width as usize * height as usize])),
        }
    }

    pub fn from_raw(width: u32, height: u32, coverage: Vec<f32>) -> Result<Self> {
        if width == 0 || height == 0 || coverage.len() != width as usize * height as usize {
            return Err(Error::InvalidDimension { width, height });
        }
        Ok(Self {
            width,
            height,
            coverage: Some(Arc::new(coverage)),
        })
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

    pub fn bounds(&self) -> Rect<i32> {
        Rect::from_origin(self.width as i32, self.height as i32)
    }

    pub fn is_full(&self) -> bool {
        self.coverage.is_none()
    }

    /// The stored coverage values, or `None` for a full mask
    pub fn values(&self) -> Option<&[f32]> {
        self.coverage.as_deref().map(Vec::as_slice)
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        self.values().map(bytemuck::cast_slice)
    }

    pub fn byte_size(&self) -> usize {
        self.values().map_or(0, |v| std::mem::size_of_val(v))
    }

    pub fn shares_storage_with(&self, other: &Self) -> bool {
        match (&self.coverage, &other.coverage) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    /// Bounds-checked coverage lookup
    pub fn get(&self, x: u32, y: u32) -> Result<f32> {
        if x >= self.width || y >= self.height {
            return Err(Error::OutOfBounds { x, y });
        }
        Ok(self.coverage_at(x as i32, y as i32))
    }

    /// Coverage at a point, where anything outside the mask has no coverage
    #[inline]
    pub(crate) fn coverage_at(&self, x: i32, y: i32) -> f32 {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return 0.0;
        }
        match &self.coverage {
            None => 1.0,
            Some(c) => c[y as usize * self.width as usize + x as usize],
        }
    }

    fn values_mut(&mut self) -> &mut [f32] {
        let len = self.width as usize * self.height as usize;
        let coverage = self.coverage.get_or_insert_with(|| Arc::new(vec![1.0; len]));
        Arc::make_mut(coverage).as_mut_slice()
    }

    /// Adds coverage under a circular dab.  `hardness` (0-100) sets how much of the radius is solid
    /// before the edge starts to fall off: 100 gives a hard edge and 0 feathers over the whole
    /// radius.  The dab's contribution builds up towards full coverage, so painting with a
    /// stronger `strength` never yields less coverage than a weaker one.  Parts of the dab outside
    /// the mask are clipped.
    pub fn paint_stroke(&mut self, center: Point2<f32>, radius: f32, hardness: f32, strength: f32) {
        self.dab(center, radius, hardness, strength, |c, f| c + (1.0 - c) * f);
    }

    /// The opposite of [`Self::paint_stroke`]: removes coverage under a dab
    pub fn erase_stroke(&mut self, center: Point2<f32>, radius: f32, hardness: f32, strength: f32) {
        self.dab(center, radius, hardness, strength, |c, f| c * (1.0 - f));
    }

    fn dab(
        &mut self,
        center: Point2<f32>,
        radius: f32,
        hardness: f32,
        strength: f32,
        combine: impl Fn(f32, f32) -> f32,
    ) {
        let strength = strength.clamp(0.0, 1.0);
        if radius <= 0.0 || strength == 0.0 {
            return;
        }
        let footprint = Rect::from_corners(
            Point2::new((center.x - radius).floor() as i32, (center.y - radius).floor() as i32),
            Point2::new((center.x + radius).ceil() as i32, (center.y + radius).ceil() as i32),
        )
        .intersection(self.bounds());
        if footprint.is_empty() {
            return;
        }

        let solid = (hardness / 100.0).clamp(0.0, 1.0);
        let width = self.width as usize;
        let values = self.values_mut();
        for y in footprint.min().y..footprint.max().y {
            for x in footprint.min().x..footprint.max().x {
                let dx = x as f32 + 0.5 - center.x;
                let dy = y as f32 + 0.5 - center.y;
                let falloff = brush_falloff((dx * dx + dy * dy).sqrt() / radius, solid);
                if falloff > 0.0 {
                    let c = &mut values[y as usize * width + x as usize];
                    *c = combine(*c, falloff * strength).clamp(0.0, 1.0);
                }
            }
        }
    }

    /// Returns `1 - coverage`
    pub fn invert(&self) -> Mask {
        let len = self.width as usize * self.height as usize;
        let inverted = match &self.coverage {
            None => vec![0.0; len],
            Some(c) => c.iter().map(|v| 1.0 - v).collect_vec(),
        };
        Self {
            width: self.width,
            height: self.height,
            coverage: Some(Arc::new(inverted)),
        }
    }

    /// Returns a copy blurred by a separable Gaussian of the given radius.  Edges are extended, so
    /// feathering a full mask leaves it full.
    pub fn feather(&self, radius_px: f32) -> Mask {
        let values = match &self.coverage {
            Some(c) if radius_px > 0.0 => c,
            _ => return self.clone(),
        };
        let kernel = gaussian_kernel(radius_px);
        let (w, h) = (self.width as usize, self.height as usize);

        let mut horizontal = vec![0.0; w * h];
        horizontal
            .par_chunks_mut(w)
            .enumerate()
            .for_each(|(y, row_out)| {
                let row_in = &values[y * w..(y + 1) * w];
                for (x, out) in row_out.iter_mut().enumerate() {
                    *out = convolve_1d(&kernel, |i| row_in[clamp_index(x as isize + i, w)]);
                }
            });
        let mut out = vec![0.0; w * h];
        out.par_chunks_mut(w).enumerate().for_each(|(y, row_out)| {
            for (x, v) in row_out.iter_mut().enumerate() {
                *v = convolve_1d(&kernel, |i| horizontal[clamp_index(y as isize + i, h) * w + x])
                    .clamp(0.0, 1.0);
            }
        });

        Self {
            width: self.width,
            height: self.height,
            coverage: Some(Arc::new(out)),
        }
    }
}

impl PartialEq for Mask {
    fn eq(&self, other: &Self) -> bool {
        self.width == other.width
            && self.height == other.height
            && (self.shares_storage_with(other) || self.values() == other.values())
    }
}

impl Debug for Mask {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_full() { "full" } else { "painted" };
        write!(f, "Mask({} {}x{})", kind, self.width, self.height)
    }
}

/// Brush strength at normalised distance `d` from the centre, where everything inside `solid` is
/// at full strength and the rest eases out to zero at `d = 1`.
fn brush_falloff(d: f32, solid: f32) -> f32 {
    if d >= 1.0 {
        0.0
    } else if d <= solid {
        1.0
    } else {
        let t = (d - solid) / (1.0 - solid);
        1.0 - t * t * (3.0 - 2.0 * t)
    }
}

/// Normalised Gaussian weights for offsets `-r..=r`, with sigma at a third of the radius
pub(crate) fn gaussian_kernel(radius: f32) -> Vec<f32> {
    let r = radius.ceil().max(1.0) as isize;
    let sigma = (radius / 3.0).max(0.5);
    let weights = (-r..=r)
        .map(|i| (-(i * i) as f32 / (2.0 * sigma * sigma)).exp())
        .collect_vec();
    let total: f32 = weights.iter().sum();
    weights.into_iter().map(|w| w / total).collect_vec()
}

/// Sums `kernel[k] * sample(k - r)` for a kernel centred on `r`
#[inline]
pub(crate) fn convolve_1d(kernel: &[f32], sample: impl Fn(isize) -> f32) -> f32 {
    let r = (kernel.len() / 2) as isize;
    kernel
        .iter()
        .enumerate()
        .map(|(k, w)| w * sample(k as isize - r))
        .sum()
}

#[inline]
pub(crate) fn clamp_index(i: isize, len: usize) -> usize {
    i.clamp(0, len as isize - 1) as usize
}
