//! Effects which read a neighbourhood around each output pixel.  These widen the region they need
//! as input, which the compositor accounts for through [`EffectType::inv_transform_bbox`].

use rayon::prelude::*;

use crate::{
    buffer::{Pixel, PixelBuffer, TRANSPARENT},
    color::WorkingSpace,
    mask::{clamp_index, gaussian_kernel},
    utils::Rect,
};

use super::{EffectType, ParamSpec, ResolvedParams};

const RADIUS: ParamSpec = ParamSpec::required("radius", 0.0, 250.0);
const SHARPEN_PARAMS: &[ParamSpec] = &[RADIUS, ParamSpec::optional("amount", 100.0, 0.0, 500.0)];

/// Gaussian blur in linear light
#[derive(Debug)]
pub struct GaussianBlur;

impl EffectType for GaussianBlur {
    fn name(&self) -> &'static str {
        "Gaussian Blur"
    }

    fn params(&self) -> &'static [ParamSpec] {
        &[RADIUS]
    }

    fn apply(&self, source: &PixelBuffer, params: &ResolvedParams, _: WorkingSpace) -> PixelBuffer {
        let radius = params.get("radius");
        if radius <= 0.0 {
            return source.clone();
        }
        let space = WorkingSpace::Linear;
        let blurred = blur(&premultiply(source, space), source.width(), source.height(), radius);
        unpremultiply(source, blurred, space)
    }

    fn transform_bbox(&self, params: &ResolvedParams, r: Rect<i32>) -> Rect<i32> {
        r.expand(margin(params))
    }

    fn inv_transform_bbox(&self, params: &ResolvedParams, r: Rect<i32>) -> Rect<i32> {
        r.expand(margin(params))
    }
}

/// Unsharp masking: pushes every pixel away from a blurred copy of its surroundings
#[derive(Debug)]
pub struct Sharpen;

impl EffectType for Sharpen {
    fn name(&self) -> &'static str {
        "Sharpen"
    }

    fn params(&self) -> &'static [ParamSpec] {
        SHARPEN_PARAMS
    }

    fn apply(&self, source: &PixelBuffer, params: &ResolvedParams, space: WorkingSpace) -> PixelBuffer {
        let radius = params.get("radius");
        let amount = params.get("amount") / 100.0;
        if radius <= 0.0 || amount == 0.0 {
            return source.clone();
        }
        let original = premultiply(source, space);
        let blurred = blur(&original, source.width(), source.height(), radius);
        let sharpened = original
            .par_iter()
            .zip_eq(blurred.par_iter())
            .map(|(o, b)| {
                let mut px = *o;
                // Only colour is sharpened, so that edges don't grow halos in the alpha channel
                for c in 0..3 {
                    px[c] = o[c] + amount * (o[c] - b[c]);
                }
                px
            })
            .collect::<Vec<_>>();
        unpremultiply(source, sharpened, space)
    }

    fn transform_bbox(&self, params: &ResolvedParams, r: Rect<i32>) -> Rect<i32> {
        r.expand(margin(params))
    }

    fn inv_transform_bbox(&self, params: &ResolvedParams, r: Rect<i32>) -> Rect<i32> {
        r.expand(margin(params))
    }
}

fn margin(params: &ResolvedParams) -> i32 {
    params.get("radius").ceil() as i32
}

fn premultiply(source: &PixelBuffer, space: WorkingSpace) -> Vec<Pixel> {
    source
        .pixels()
        .par_iter()
        .map(|&[r, g, b, a]| {
            let [r, g, b] = space.decode_rgb([r, g, b]);
            [r * a, g * a, b * a, a]
        })
        .collect()
}

fn unpremultiply(source: &PixelBuffer, data: Vec<Pixel>, space: WorkingSpace) -> PixelBuffer {
    let mut out = source.clone();
    out.pixels_mut()
        .par_iter_mut()
        .zip_eq(data.into_par_iter())
        .for_each(|(px, [r, g, b, a])| {
            *px = if a > 0.0 {
                let [r, g, b] = space.encode_rgb([r / a, g / a, b / a]);
                [r, g, b, a]
            } else {
                TRANSPARENT
            };
        });
    out
}

/// Separable Gaussian blur of premultiplied pixels, extending the edges
fn blur(data: &[Pixel], width: u32, height: u32, radius: f32) -> Vec<Pixel> {
    let kernel = gaussian_kernel(radius);
    let r = (kernel.len() / 2) as isize;
    let (w, h) = (width as usize, height as usize);

    let mut horizontal = vec![TRANSPARENT; w * h];
    horizontal
        .par_chunks_mut(w)
        .enumerate()
        .for_each(|(y, row_out)| {
            let row_in = &data[y * w..(y + 1) * w];
            for (x, out) in row_out.iter_mut().enumerate() {
                *out = accumulate(kernel.iter().enumerate().map(|(k, &wt)| {
                    (row_in[clamp_index(x as isize + k as isize - r, w)], wt)
                }));
            }
        });

    let mut out = vec![TRANSPARENT; w * h];
    out.par_chunks_mut(w).enumerate().for_each(|(y, row_out)| {
        for (x, px) in row_out.iter_mut().enumerate() {
            *px = accumulate(kernel.iter().enumerate().map(|(k, &wt)| {
                (horizontal[clamp_index(y as isize + k as isize - r, h) * w + x], wt)
            }));
        }
    });
    out
}

#[inline]
fn accumulate(samples: impl Iterator<Item = (Pixel, f32)>) -> Pixel {
    let mut acc = TRANSPARENT;
    for (px, w) in samples {
        for c in 0..4 {
            acc[c] += px[c] * w;
        }
    }
    acc
}
